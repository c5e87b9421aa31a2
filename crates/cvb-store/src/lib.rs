//! SQLite-backed credential store.
//!
//! One row per broadcaster. Expiry is kept as unix milliseconds so the
//! instant round-trips exactly.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cvb_core::{
    currency::CurrencyCode,
    domain::{Credential, CurrencySlot, UserId},
    ports::CredentialStore,
    Error, Result,
};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS credentials (
        user_id TEXT PRIMARY KEY,
        name TEXT,
        access_token TEXT NOT NULL,
        refresh_token TEXT NOT NULL,
        expires_ms INTEGER NOT NULL,
        home_currency TEXT NOT NULL DEFAULT 'USD',
        active_currency TEXT NOT NULL DEFAULT 'INR',
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
";

const SELECT_COLUMNS: &str = "SELECT user_id, name, access_token, refresh_token, expires_ms, \
     home_currency, active_currency FROM credentials";

#[derive(Clone)]
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCredentialStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage_err)?;
        info!(path = %db_path.as_ref().display(), "opened credential store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(storage_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking statement off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Storage("connection lock poisoned".to_string()))?;
            f(&guard).map_err(storage_err)
        })
        .await
        .map_err(|e| Error::Storage(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        let rows = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY user_id"))?;
                let rows = stmt.query_map([], read_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        debug!(count = rows.len(), "loaded credentials");
        Ok(rows.into_iter().filter_map(into_credential).collect())
    }

    async fn get(&self, user_id: &UserId) -> Result<Option<Credential>> {
        let id = user_id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{SELECT_COLUMNS} WHERE user_id = ?1"),
                    [id],
                    read_row,
                )
                .optional()
            })
            .await?;
        Ok(row.and_then(into_credential))
    }

    async fn upsert(&self, credential: &Credential) -> Result<()> {
        let c = credential.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO credentials
                    (user_id, name, access_token, refresh_token, expires_ms, home_currency, active_currency)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id) DO UPDATE SET
                    name = excluded.name,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_ms = excluded.expires_ms,
                    updated_at = CURRENT_TIMESTAMP",
                (
                    c.user_id.as_str(),
                    c.name.as_deref(),
                    c.access_token.as_str(),
                    c.refresh_token.as_str(),
                    c.expires.timestamp_millis(),
                    c.home_currency.as_str(),
                    c.active_currency.as_str(),
                ),
            )
            .map(|_| ())
        })
        .await
    }

    async fn update_tokens(
        &self,
        user_id: &UserId,
        access_token: &str,
        refresh_token: &str,
        expires: DateTime<Utc>,
    ) -> Result<()> {
        let id = user_id.to_string();
        let access = access_token.to_string();
        let refresh = refresh_token.to_string();
        let changed = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE credentials
                     SET access_token = ?2, refresh_token = ?3, expires_ms = ?4,
                         updated_at = CURRENT_TIMESTAMP
                     WHERE user_id = ?1",
                    (id, access, refresh, expires.timestamp_millis()),
                )
            })
            .await?;
        if changed == 0 {
            warn!(%user_id, "token update matched no stored credential");
        }
        Ok(())
    }

    async fn update_currency(
        &self,
        user_id: &UserId,
        slot: CurrencySlot,
        code: &CurrencyCode,
    ) -> Result<()> {
        let sql = match slot {
            CurrencySlot::Home => {
                "UPDATE credentials SET home_currency = ?2, updated_at = CURRENT_TIMESTAMP WHERE user_id = ?1"
            }
            CurrencySlot::Active => {
                "UPDATE credentials SET active_currency = ?2, updated_at = CURRENT_TIMESTAMP WHERE user_id = ?1"
            }
        };
        let id = user_id.to_string();
        let code = code.to_string();
        let changed = self
            .with_conn(move |conn| conn.execute(sql, (id, code)))
            .await?;
        if changed == 0 {
            warn!(%user_id, "currency update matched no stored credential");
        }
        Ok(())
    }
}

struct StoredRow {
    user_id: String,
    name: Option<String>,
    access_token: String,
    refresh_token: String,
    expires_ms: i64,
    home_currency: String,
    active_currency: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        user_id: row.get(0)?,
        name: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        expires_ms: row.get(4)?,
        home_currency: row.get(5)?,
        active_currency: row.get(6)?,
    })
}

fn into_credential(row: StoredRow) -> Option<Credential> {
    let Some(expires) = DateTime::<Utc>::from_timestamp_millis(row.expires_ms) else {
        warn!(user_id = %row.user_id, expires_ms = row.expires_ms, "skipping row with invalid expiry");
        return None;
    };

    let mut credential = Credential::new(
        UserId(row.user_id),
        row.access_token,
        row.refresh_token,
        expires,
    );
    credential.name = row.name;
    credential.home_currency =
        stored_currency(&credential.user_id, &row.home_currency, CurrencyCode::default_home());
    credential.active_currency = stored_currency(
        &credential.user_id,
        &row.active_currency,
        CurrencyCode::default_active(),
    );
    Some(credential)
}

fn stored_currency(user_id: &UserId, raw: &str, fallback: CurrencyCode) -> CurrencyCode {
    CurrencyCode::parse(raw).unwrap_or_else(|| {
        warn!(%user_id, stored = raw, %fallback, "unknown stored currency, using default");
        fallback
    })
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credential(id: &str, access: &str) -> Credential {
        let expires = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::milliseconds(678);
        let mut c = Credential::new(UserId::from(id), access, format!("r-{access}"), expires);
        c.name = Some(format!("user{id}"));
        c
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips_every_field() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let c = credential("1", "a1");

        store.upsert(&c).await.unwrap();

        assert_eq!(store.get(&UserId::from("1")).await.unwrap(), Some(c));
        assert_eq!(store.get(&UserId::from("2")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn upsert_keeps_currency_preferences() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let id = UserId::from("1");
        store.upsert(&credential("1", "a1")).await.unwrap();
        store
            .update_currency(&id, CurrencySlot::Home, &CurrencyCode::parse("EUR").unwrap())
            .await
            .unwrap();

        store.upsert(&credential("1", "a2")).await.unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.home_currency.as_str(), "EUR");
        assert_eq!(stored.active_currency.as_str(), "INR");
    }

    #[tokio::test]
    async fn update_tokens_writes_the_pair_and_expiry() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let id = UserId::from("1");
        store.upsert(&credential("1", "a1")).await.unwrap();
        let expires = Utc.with_ymd_and_hms(2031, 6, 7, 8, 9, 10).unwrap();

        store
            .update_tokens(&id, "a2", "r2", expires)
            .await
            .unwrap();

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token, "r2");
        assert_eq!(stored.expires, expires);
    }

    #[tokio::test]
    async fn updates_for_unknown_users_are_noops() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        let ghost = UserId::from("ghost");

        store
            .update_tokens(&ghost, "a", "r", Utc::now())
            .await
            .unwrap();
        store
            .update_currency(&ghost, CurrencySlot::Active, &CurrencyCode::usd())
            .await
            .unwrap();

        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_all_is_ordered_by_user_id() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        for id in ["b", "a", "c"] {
            store.upsert(&credential(id, "t")).await.unwrap();
        }

        let ids: Vec<String> = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.user_id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn unknown_stored_currency_falls_back_to_default() {
        let store = SqliteCredentialStore::open_in_memory().unwrap();
        store.upsert(&credential("1", "a1")).await.unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE credentials SET active_currency = 'ZZZ' WHERE user_id = '1'",
                    [],
                )
            })
            .await
            .unwrap();

        let stored = store.get(&UserId::from("1")).await.unwrap().unwrap();
        assert_eq!(stored.active_currency, CurrencyCode::default_active());
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "cvb-store-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.upsert(&credential("1", "a1")).await.unwrap();
        }

        let reopened = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.load_all().await.unwrap().len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}

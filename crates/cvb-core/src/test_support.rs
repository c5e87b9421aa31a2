//! In-memory fakes for the ports, shared by the unit tests in this crate.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    currency::CurrencyCode,
    domain::{Credential, CurrencySlot, Subscription, TokenGrant, UserId, UserProfile},
    ports::{AuthService, CredentialStore, PlatformApi, RateService},
    Error, Result,
};

pub fn credential_expiring_in(user_id: &str, token: &str, ttl: Duration) -> Credential {
    Credential::new(
        UserId::from(user_id),
        token,
        format!("refresh-{token}"),
        Utc::now() + ttl,
    )
}

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<HashMap<UserId, Credential>>,
    token_writes: AtomicUsize,
    currency_writes: AtomicUsize,
    pub fail_writes: AtomicBool,
}

impl FakeStore {
    pub fn with(credentials: Vec<Credential>) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for c in credentials {
                rows.insert(c.user_id.clone(), c);
            }
        }
        store
    }

    pub fn stored(&self, user_id: &UserId) -> Option<Credential> {
        self.rows.lock().unwrap().get(user_id).cloned()
    }

    pub fn token_writes(&self) -> usize {
        self.token_writes.load(Ordering::SeqCst)
    }

    pub fn currency_writes(&self) -> usize {
        self.currency_writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("disk full".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FakeStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        let mut all: Vec<Credential> = self.rows.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }

    async fn get(&self, user_id: &UserId) -> Result<Option<Credential>> {
        Ok(self.stored(user_id))
    }

    async fn upsert(&self, credential: &Credential) -> Result<()> {
        self.check_writable()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&credential.user_id) {
            Some(row) => {
                row.name = credential.name.clone();
                row.access_token = credential.access_token.clone();
                row.refresh_token = credential.refresh_token.clone();
                row.expires = credential.expires;
            }
            None => {
                rows.insert(credential.user_id.clone(), credential.clone());
            }
        }
        Ok(())
    }

    async fn update_tokens(
        &self,
        user_id: &UserId,
        access_token: &str,
        refresh_token: &str,
        expires: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        self.token_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(row) = self.rows.lock().unwrap().get_mut(user_id) {
            row.access_token = access_token.to_string();
            row.refresh_token = refresh_token.to_string();
            row.expires = expires;
        }
        Ok(())
    }

    async fn update_currency(
        &self,
        user_id: &UserId,
        slot: CurrencySlot,
        code: &CurrencyCode,
    ) -> Result<()> {
        self.check_writable()?;
        self.currency_writes.fetch_add(1, Ordering::SeqCst);
        if let Some(row) = self.rows.lock().unwrap().get_mut(user_id) {
            row.set_currency(slot, code.clone());
        }
        Ok(())
    }
}

/// Issues `access-N` / `refresh-N` on the N-th refresh.
#[derive(Default)]
pub struct FakeAuth {
    calls: AtomicUsize,
    pub fail: AtomicBool,
    pub omit_refresh_token: AtomicBool,
}

impl FakeAuth {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::External("invalid_grant".to_string()));
        }
        Ok(TokenGrant {
            access_token: format!("access-{n}"),
            refresh_token: (!self.omit_refresh_token.load(Ordering::SeqCst))
                .then(|| format!("refresh-{n}")),
            expires_in: 4 * 60 * 60,
        })
    }
}

#[derive(Default)]
pub struct FakePlatform {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicUsize,
    sent: Mutex<Vec<(UserId, String)>>,
    /// Tokens the platform answers with 401.
    rejected_tokens: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    pub fail_create: AtomicBool,
    pub fail_list: AtomicBool,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub profile: Mutex<Option<UserProfile>>,
}

impl FakePlatform {
    pub fn with_subscriptions(ids: &[&str]) -> Self {
        let p = Self::default();
        *p.subscriptions.lock().unwrap() = ids
            .iter()
            .map(|id| Subscription {
                id: id.to_string(),
                event: Some("chat.message.sent".to_string()),
            })
            .collect();
        p
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn fail_delete(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    pub fn subscription_ids(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn check_token(&self, token: &str) -> Result<()> {
        if self.rejected_tokens.lock().unwrap().contains(token) {
            return Err(Error::Unauthorized("Unauthorized".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformApi for FakePlatform {
    async fn list_subscriptions(&self, access_token: &str) -> Result<Vec<Subscription>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(access_token)?;
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::External("connection reset".to_string()));
        }
        Ok(self.subscriptions.lock().unwrap().clone())
    }

    async fn delete_subscription(&self, access_token: &str, subscription_id: &str) -> Result<()> {
        self.check_token(access_token)?;
        if self.failing_deletes.lock().unwrap().contains(subscription_id) {
            return Err(Error::External(format!("cannot delete {subscription_id}")));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|s| s.id != subscription_id);
        Ok(())
    }

    async fn create_subscription(&self, access_token: &str) -> Result<Subscription> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(access_token)?;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::External("503".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let sub = Subscription {
            id: format!("sub-new-{n}"),
            event: Some("chat.message.sent".to_string()),
        };
        self.subscriptions.lock().unwrap().push(sub.clone());
        Ok(sub)
    }

    async fn current_user(&self, access_token: &str) -> Result<UserProfile> {
        self.check_token(access_token)?;
        self.profile
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::External("no user".to_string()))
    }

    async fn send_chat_message(
        &self,
        access_token: &str,
        broadcaster_user_id: &UserId,
        content: &str,
    ) -> Result<()> {
        self.check_token(access_token)?;
        self.sent
            .lock()
            .unwrap()
            .push((broadcaster_user_id.clone(), content.to_string()));
        Ok(())
    }
}

/// Fixed rates quoted against USD; cross rates are derived from them.
pub struct FakeRates {
    usd: HashMap<String, f64>,
    calls: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl Default for FakeRates {
    fn default() -> Self {
        let usd = [("USD", 1.0), ("INR", 83.0), ("EUR", 0.92), ("GBP", 0.79)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self {
            usd,
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }
}

impl FakeRates {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateService for FakeRates {
    async fn latest_rates(&self, base: &CurrencyCode) -> Result<HashMap<String, f64>> {
        self.calls.lock().unwrap().push(base.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::External("rate service down".to_string()));
        }
        let Some(base_rate) = self.usd.get(base.as_str()) else {
            return Ok(HashMap::new());
        };
        Ok(self
            .usd
            .iter()
            .map(|(code, rate)| (code.clone(), rate / base_rate))
            .collect())
    }
}

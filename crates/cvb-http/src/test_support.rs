//! In-memory ports and local servers for the handler tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use axum::{http::StatusCode, routing::post, Form, Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use cvb_core::{
    bot::{BotSettings, ConvertBot, Ports},
    currency::CurrencyCode,
    domain::{Credential, CurrencySlot, Subscription, TokenGrant, UserId, UserProfile},
    ports::{AuthService, CredentialStore, PlatformApi, RateService},
    Error, Result,
};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<UserId, Credential>>,
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, user_id: &UserId) -> Result<Option<Credential>> {
        Ok(self.rows.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert(&self, credential: &Credential) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(credential.user_id.clone(), credential.clone());
        Ok(())
    }

    async fn update_tokens(
        &self,
        _user_id: &UserId,
        _access_token: &str,
        _refresh_token: &str,
        _expires: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }

    async fn update_currency(
        &self,
        _user_id: &UserId,
        _slot: CurrencySlot,
        _code: &CurrencyCode,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct NoRefresh;

#[async_trait]
impl AuthService for NoRefresh {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant> {
        Err(Error::External("refresh not expected".to_string()))
    }
}

/// Answers as user `42` and records chat messages and created subscriptions.
#[derive(Default)]
pub struct RecordingPlatform {
    sent: Mutex<Vec<String>>,
    created: AtomicUsize,
}

impl RecordingPlatform {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformApi for RecordingPlatform {
    async fn list_subscriptions(&self, _access_token: &str) -> Result<Vec<Subscription>> {
        Ok(Vec::new())
    }

    async fn delete_subscription(&self, _access_token: &str, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn create_subscription(&self, _access_token: &str) -> Result<Subscription> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Subscription {
            id: format!("sub-{n}"),
            event: None,
        })
    }

    async fn current_user(&self, _access_token: &str) -> Result<UserProfile> {
        Ok(UserProfile {
            user_id: UserId::from("42"),
            name: Some("streamer".to_string()),
        })
    }

    async fn send_chat_message(
        &self,
        _access_token: &str,
        _broadcaster_user_id: &UserId,
        content: &str,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(content.to_string());
        Ok(())
    }
}

/// USD-quoted table; other bases are derived.
pub struct FixedRates;

#[async_trait]
impl RateService for FixedRates {
    async fn latest_rates(&self, base: &CurrencyCode) -> Result<HashMap<String, f64>> {
        let usd: HashMap<&str, f64> = [("USD", 1.0), ("INR", 83.0), ("EUR", 0.92)].into();
        let Some(b) = usd.get(base.as_str()).copied() else {
            return Ok(HashMap::new());
        };
        Ok(usd.iter().map(|(k, v)| (k.to_string(), v / b)).collect())
    }
}

pub fn test_bot() -> (Arc<ConvertBot>, Arc<RecordingPlatform>) {
    let platform = Arc::new(RecordingPlatform::default());
    let bot = ConvertBot::new(
        Ports {
            store: Arc::new(MemoryStore::default()),
            auth: Arc::new(NoRefresh),
            platform: platform.clone(),
            rates: Arc::new(FixedRates),
        },
        BotSettings::default(),
    );
    (Arc::new(bot), platform)
}

pub async fn bot_with_user(user_id: &str) -> (Arc<ConvertBot>, Arc<RecordingPlatform>) {
    let (bot, platform) = test_bot();
    bot.registry()
        .insert(Credential::new(
            UserId::from(user_id),
            "tok",
            "refresh",
            Utc::now() + Duration::hours(4),
        ))
        .await;
    (bot, platform)
}

pub async fn spawn(router: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), handle)
}

/// Token endpoint accepting the code `abc` only.
pub async fn spawn_kick_id() -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/oauth/token",
        post(|Form(form): Form<HashMap<String, String>>| async move {
            if form.get("code").map(String::as_str) == Some("abc") {
                (
                    StatusCode::OK,
                    Json(json!({
                        "access_token": "access-abc",
                        "refresh_token": "refresh-abc",
                        "expires_in": 7200
                    })),
                )
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "invalid_grant"})),
                )
            }
        }),
    );
    spawn(app).await
}

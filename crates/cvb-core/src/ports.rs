//! Hexagonal ports implemented by the adapter crates.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    currency::CurrencyCode,
    domain::{Credential, CurrencySlot, Subscription, TokenGrant, UserId, UserProfile},
    Result,
};

/// Durable `user_id → Credential` mapping. No logic beyond read/write.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<Credential>>;

    async fn get(&self, user_id: &UserId) -> Result<Option<Credential>>;

    /// Insert or replace the token fields of a credential. Stored currency
    /// preferences are kept when the row already exists.
    async fn upsert(&self, credential: &Credential) -> Result<()>;

    /// Write the token pair and its expiry in one statement.
    async fn update_tokens(
        &self,
        user_id: &UserId,
        access_token: &str,
        refresh_token: &str,
        expires: DateTime<Utc>,
    ) -> Result<()>;

    async fn update_currency(
        &self,
        user_id: &UserId,
        slot: CurrencySlot,
        code: &CurrencyCode,
    ) -> Result<()>;
}

/// OAuth token endpoint (refresh grant).
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// Authenticated platform calls. Implementations must report a rejected token
/// as [`crate::Error::Unauthorized`] so the caller can refresh and retry.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list_subscriptions(&self, access_token: &str) -> Result<Vec<Subscription>>;

    async fn delete_subscription(&self, access_token: &str, subscription_id: &str) -> Result<()>;

    /// Subscribe to `chat.message.sent` (version 1) via webhook delivery.
    async fn create_subscription(&self, access_token: &str) -> Result<Subscription>;

    async fn current_user(&self, access_token: &str) -> Result<UserProfile>;

    async fn send_chat_message(
        &self,
        access_token: &str,
        broadcaster_user_id: &UserId,
        content: &str,
    ) -> Result<()>;
}

/// Latest exchange rates relative to `base`.
#[async_trait]
pub trait RateService: Send + Sync {
    async fn latest_rates(&self, base: &CurrencyCode) -> Result<HashMap<String, f64>>;
}

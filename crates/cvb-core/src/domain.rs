use chrono::{DateTime, Duration, Utc};

use crate::currency::CurrencyCode;

/// Platform user id of a broadcaster (stable, opaque).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stored OAuth credential plus per-broadcaster currency preferences.
#[derive(Clone, Debug, PartialEq)]
pub struct Credential {
    pub user_id: UserId,
    pub name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    /// Instant after which `access_token` is no longer valid.
    pub expires: DateTime<Utc>,
    pub home_currency: CurrencyCode,
    pub active_currency: CurrencyCode,
}

impl Credential {
    pub fn new(
        user_id: UserId,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            name: None,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires,
            home_currency: CurrencyCode::default_home(),
            active_currency: CurrencyCode::default_active(),
        }
    }

    /// Replace the token pair and expiry together.
    pub fn apply_grant(&mut self, grant: &TokenGrant, now: DateTime<Utc>) {
        self.access_token = grant.access_token.clone();
        if let Some(rt) = &grant.refresh_token {
            self.refresh_token = rt.clone();
        }
        self.expires = grant.expires_at(now);
    }

    pub fn currency(&self, slot: CurrencySlot) -> &CurrencyCode {
        match slot {
            CurrencySlot::Home => &self.home_currency,
            CurrencySlot::Active => &self.active_currency,
        }
    }

    pub fn set_currency(&mut self, slot: CurrencySlot, code: CurrencyCode) {
        match slot {
            CurrencySlot::Home => self.home_currency = code,
            CurrencySlot::Active => self.active_currency = code,
        }
    }
}

/// Which of the two per-user currency preferences a command targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CurrencySlot {
    Home,
    Active,
}

impl CurrencySlot {
    pub fn label(self) -> &'static str {
        match self {
            CurrencySlot::Home => "Home",
            CurrencySlot::Active => "Active",
        }
    }
}

/// Longest token lifetime taken at face value from a grant.
pub const MAX_GRANT_LIFETIME: std::time::Duration =
    std::time::Duration::from_secs(365 * 24 * 60 * 60);

/// Tokens returned by the authorization service (code exchange or refresh).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Some providers rotate the refresh token, others omit it.
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

impl TokenGrant {
    /// Expiry instant, capped at [`MAX_GRANT_LIFETIME`] from `now`.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.expires_in.min(MAX_GRANT_LIFETIME.as_secs());
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Remote webhook subscription as listed by the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub event: Option<String>,
}

/// Profile of the authenticated broadcaster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: UserId,
    pub name: Option<String>,
}

/// Outcome of a reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionResult {
    pub subscribed: bool,
    pub subscription_id: Option<String>,
    /// Existing subscriptions found and removed during the pass.
    pub removed: usize,
    /// Existing subscriptions that could not be removed.
    pub failed_removals: usize,
}

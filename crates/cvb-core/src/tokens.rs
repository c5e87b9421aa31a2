//! Access-token lifecycle: refresh-ahead, forced refresh on rejection, and the
//! bounded retry wrapper every authenticated platform call goes through.

use std::{future::Future, sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::{
    domain::{Credential, UserId},
    logging::mask_token,
    ports::{AuthService, CredentialStore},
    registry::UserRegistry,
    Error, Result,
};

/// Refresh when the token has less than this much lifetime left.
pub const DEFAULT_REFRESH_BUFFER: StdDuration = StdDuration::from_secs(60 * 60);

/// A rejected call is retried at most this many times, each after one forced refresh.
const MAX_AUTH_RETRIES: usize = 1;

/// `true` when a credential expiring at `expires` must be refreshed at `now`.
pub fn needs_refresh(
    expires: DateTime<Utc>,
    now: DateTime<Utc>,
    buffer: Duration,
    force: bool,
) -> bool {
    let will_expire_soon = expires - buffer <= now;
    force || will_expire_soon || expires < now
}

pub struct TokenLifecycleManager {
    registry: Arc<UserRegistry>,
    store: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthService>,
    refresh_buffer: Duration,
}

impl TokenLifecycleManager {
    pub fn new(
        registry: Arc<UserRegistry>,
        store: Arc<dyn CredentialStore>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            registry,
            store,
            auth,
            refresh_buffer: to_chrono(DEFAULT_REFRESH_BUFFER),
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: StdDuration) -> Self {
        self.refresh_buffer = to_chrono(buffer);
        self
    }

    /// Make sure a registered user's access token is usable.
    ///
    /// Returns `false` when the user is unknown or the refresh failed; callers
    /// must not use the credential this cycle.
    pub async fn ensure_fresh(&self, user_id: &UserId, force_refresh: bool) -> bool {
        match self.try_ensure_fresh(user_id, force_refresh).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%user_id, error = %e, "credential not usable");
                false
            }
        }
    }

    /// Same policy for a credential that is not registered yet (startup scan).
    pub async fn ensure_fresh_credential(
        &self,
        credential: &mut Credential,
        force_refresh: bool,
    ) -> bool {
        self.refresh_locked(credential, force_refresh, Utc::now())
            .await
    }

    /// Refresh pass over every registered user. Returns how many are usable.
    pub async fn refresh_all(&self) -> usize {
        info!("running scheduled token refresh check");
        let mut ok = 0usize;
        for user_id in self.registry.user_ids().await {
            if self.ensure_fresh(&user_id, false).await {
                ok += 1;
            } else {
                warn!(%user_id, "scheduled token refresh failed");
            }
        }
        info!(usable = ok, "scheduled token refresh completed");
        ok
    }

    /// Run an authenticated call with the user's current access token.
    ///
    /// The token is refreshed ahead of expiry first. If the platform still
    /// rejects it, one forced refresh is performed and the call is retried
    /// once; a second rejection becomes [`Error::RemoteAuthFailure`].
    pub async fn authorized<T, F, Fut>(&self, user_id: &UserId, op: &str, mut call: F) -> Result<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_ensure_fresh(user_id, false).await?;

        let mut attempts = 0usize;
        loop {
            let token = self.access_token(user_id).await?;
            match call(token.clone()).await {
                Err(Error::Unauthorized(reason)) if attempts < MAX_AUTH_RETRIES => {
                    attempts += 1;
                    warn!(%user_id, op, %reason, "access token rejected, forcing refresh");
                    self.refresh_rejected(user_id, &token).await?;
                }
                Err(Error::Unauthorized(reason)) => {
                    error!(%user_id, op, %reason, "still unauthorized after refresh");
                    return Err(Error::RemoteAuthFailure {
                        user_id: user_id.to_string(),
                        reason,
                    });
                }
                other => return other,
            }
        }
    }

    async fn access_token(&self, user_id: &UserId) -> Result<String> {
        self.registry
            .snapshot(user_id)
            .await
            .map(|c| c.access_token)
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))
    }

    async fn try_ensure_fresh(&self, user_id: &UserId, force_refresh: bool) -> Result<()> {
        let mut guard = self
            .registry
            .lock(user_id)
            .await
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;
        if self
            .refresh_locked(&mut guard, force_refresh, Utc::now())
            .await
        {
            Ok(())
        } else {
            Err(Error::RefreshFailed(user_id.to_string()))
        }
    }

    /// Forced refresh after `rejected` was refused by the platform.
    ///
    /// Skipped when another task already replaced that token, so concurrent
    /// rejections of one token cost a single refresh.
    async fn refresh_rejected(&self, user_id: &UserId, rejected: &str) -> Result<()> {
        let mut guard = self
            .registry
            .lock(user_id)
            .await
            .ok_or_else(|| Error::UnknownUser(user_id.to_string()))?;
        if guard.access_token != rejected {
            debug!(%user_id, "rejected token already replaced");
            return Ok(());
        }
        if self.refresh_locked(&mut guard, true, Utc::now()).await {
            Ok(())
        } else {
            Err(Error::RefreshFailed(user_id.to_string()))
        }
    }

    /// Caller holds the user's lock (or owns the credential outright).
    async fn refresh_locked(
        &self,
        credential: &mut Credential,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if !needs_refresh(credential.expires, now, self.refresh_buffer, force_refresh) {
            return true;
        }

        info!(
            user_id = %credential.user_id,
            force_refresh,
            expires = %credential.expires,
            "token will expire soon or has expired, refreshing"
        );

        let grant = match self.auth.refresh(&credential.refresh_token).await {
            Ok(g) => g,
            Err(e) => {
                error!(user_id = %credential.user_id, error = %e, "error refreshing token");
                return false;
            }
        };

        let mut updated = credential.clone();
        updated.apply_grant(&grant, now);

        // The old refresh token may already be spent, so memory keeps the new
        // pair even when the write fails.
        if let Err(e) = self
            .store
            .update_tokens(
                &updated.user_id,
                &updated.access_token,
                &updated.refresh_token,
                updated.expires,
            )
            .await
        {
            error!(user_id = %updated.user_id, error = %e, "refreshed token not persisted");
        }

        info!(
            user_id = %updated.user_id,
            token = %mask_token(&updated.access_token),
            expires = %updated.expires,
            "token refreshed"
        );
        *credential = updated;
        true
    }
}

fn to_chrono(d: StdDuration) -> Duration {
    Duration::from_std(d).unwrap_or_else(|_| Duration::hours(1))
}

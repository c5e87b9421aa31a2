//! Keeps exactly one `chat.message.sent` webhook subscription per broadcaster.
//!
//! The platform has no upsert and happily accumulates duplicate subscriptions,
//! so a pass lists everything, deletes it one by one, then creates a single
//! new subscription.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::{error, info, warn};

use crate::{
    domain::{SubscriptionResult, UserId},
    ports::PlatformApi,
    tokens::TokenLifecycleManager,
};

pub const CHAT_MESSAGE_EVENT: &str = "chat.message.sent";
pub const CHAT_MESSAGE_EVENT_VERSION: u32 = 1;

pub struct SubscriptionReconciler {
    tokens: Arc<TokenLifecycleManager>,
    platform: Arc<dyn PlatformApi>,
    last_known: Mutex<HashMap<UserId, String>>,
}

impl SubscriptionReconciler {
    pub fn new(tokens: Arc<TokenLifecycleManager>, platform: Arc<dyn PlatformApi>) -> Self {
        Self {
            tokens,
            platform,
            last_known: Mutex::new(HashMap::new()),
        }
    }

    /// Last subscription id created for the user by this process.
    pub fn subscription_id(&self, user_id: &UserId) -> Option<String> {
        self.last_known
            .lock()
            .ok()
            .and_then(|m| m.get(user_id).cloned())
    }

    /// Best-effort pass; never fails, the outcome is reported in the result.
    pub async fn reconcile(&self, user_id: &UserId) -> SubscriptionResult {
        let platform = &self.platform;
        let mut result = SubscriptionResult::default();

        let existing = match self
            .tokens
            .authorized(user_id, "list_subscriptions", |token| async move {
                platform.list_subscriptions(&token).await
            })
            .await
        {
            Ok(subs) => subs,
            Err(e) => {
                error!(%user_id, error = %e, "error getting subscriptions, assuming none");
                Vec::new()
            }
        };
        info!(%user_id, existing = existing.len(), "user has existing subscriptions");

        for sub in &existing {
            let id = sub.id.as_str();
            info!(%user_id, subscription_id = id, "removing existing subscription");
            match self
                .tokens
                .authorized(user_id, "delete_subscription", |token| async move {
                    platform.delete_subscription(&token, id).await
                })
                .await
            {
                Ok(()) => result.removed += 1,
                Err(e) => {
                    warn!(%user_id, subscription_id = id, error = %e, "failed to unsubscribe");
                    result.failed_removals += 1;
                }
            }
        }

        match self
            .tokens
            .authorized(user_id, "create_subscription", |token| async move {
                platform.create_subscription(&token).await
            })
            .await
        {
            Ok(sub) => {
                info!(%user_id, subscription_id = %sub.id, "subscribed to chat events");
                if let Ok(mut m) = self.last_known.lock() {
                    m.insert(user_id.clone(), sub.id.clone());
                }
                result.subscribed = true;
                result.subscription_id = Some(sub.id);
            }
            Err(e) => {
                error!(%user_id, error = %e, "error subscribing to events, user left unsubscribed");
                self.forget(user_id);
            }
        }

        result
    }

    fn forget(&self, user_id: &UserId) {
        if let Ok(mut m) = self.last_known.lock() {
            m.remove(user_id);
        }
    }
}

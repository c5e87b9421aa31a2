//! Application service wiring the registry, token manager, reconciler,
//! deduplicator and command interpreter behind the two inbound surfaces
//! (webhook deliveries and OAuth registrations).

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    commands::CommandInterpreter,
    conversion::ConversionEngine,
    dedup::{self, WebhookDeduplicator},
    domain::{Credential, SubscriptionResult, TokenGrant, UserId, UserProfile},
    ports::{AuthService, CredentialStore, PlatformApi, RateService},
    registry::UserRegistry,
    scheduler::ScheduledTask,
    subscriptions::SubscriptionReconciler,
    tokens::{self, TokenLifecycleManager},
    webhook::ChatMessageEvent,
    Result,
};

pub const READY_MESSAGE: &str = "Convert Bot Ready!";

#[derive(Clone, Debug)]
pub struct BotSettings {
    pub refresh_buffer: Duration,
    pub refresh_interval: Duration,
    pub dedup_ttl: Duration,
    pub dedup_sweep_interval: Duration,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: tokens::DEFAULT_REFRESH_BUFFER,
            refresh_interval: Duration::from_secs(60 * 60),
            dedup_ttl: dedup::DEFAULT_TTL,
            dedup_sweep_interval: dedup::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Adapter implementations the bot runs against.
#[derive(Clone)]
pub struct Ports {
    pub store: Arc<dyn CredentialStore>,
    pub auth: Arc<dyn AuthService>,
    pub platform: Arc<dyn PlatformApi>,
    pub rates: Arc<dyn RateService>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub loaded: usize,
    pub registered: usize,
    pub skipped: usize,
    pub subscribed: usize,
}

/// What happened to one webhook delivery. The HTTP answer is the same for all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Malformed,
    Duplicate,
    /// Not a command, or nothing to say back.
    Ignored,
    Replied,
    ReplyFailed,
}

pub struct ConvertBot {
    registry: Arc<UserRegistry>,
    store: Arc<dyn CredentialStore>,
    platform: Arc<dyn PlatformApi>,
    tokens: Arc<TokenLifecycleManager>,
    reconciler: SubscriptionReconciler,
    dedup: WebhookDeduplicator,
    interpreter: CommandInterpreter,
    settings: BotSettings,
}

impl ConvertBot {
    pub fn new(ports: Ports, settings: BotSettings) -> Self {
        let registry = Arc::new(UserRegistry::new());
        let tokens = Arc::new(
            TokenLifecycleManager::new(registry.clone(), ports.store.clone(), ports.auth)
                .with_refresh_buffer(settings.refresh_buffer),
        );
        let reconciler = SubscriptionReconciler::new(tokens.clone(), ports.platform.clone());
        let interpreter = CommandInterpreter::new(
            registry.clone(),
            ports.store.clone(),
            ConversionEngine::new(ports.rates),
        );

        Self {
            registry,
            store: ports.store,
            platform: ports.platform,
            tokens,
            reconciler,
            dedup: WebhookDeduplicator::new(settings.dedup_ttl),
            interpreter,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<UserRegistry> {
        &self.registry
    }

    /// Load stored credentials, refresh what is due and subscribe each user.
    ///
    /// A credential whose refresh fails is left out of the registry until
    /// the broadcaster authorizes again.
    pub async fn bootstrap(&self) -> Result<StartupReport> {
        let stored = self.store.load_all().await?;
        let mut report = StartupReport {
            loaded: stored.len(),
            ..StartupReport::default()
        };
        info!(count = report.loaded, "loaded stored credentials");

        for mut credential in stored {
            let user_id = credential.user_id.clone();
            if !self.tokens.ensure_fresh_credential(&mut credential, false).await {
                warn!(%user_id, "skipping user, token could not be refreshed");
                report.skipped += 1;
                continue;
            }

            self.registry.insert(credential).await;
            report.registered += 1;

            if self.reconciler.reconcile(&user_id).await.subscribed {
                report.subscribed += 1;
            }
        }

        info!(
            registered = report.registered,
            skipped = report.skipped,
            subscribed = report.subscribed,
            "startup complete"
        );
        Ok(report)
    }

    /// Profile of the account owning `access_token`.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile> {
        self.platform.current_user(access_token).await
    }

    /// Store and activate a freshly authorized broadcaster.
    ///
    /// Existing currency preferences survive re-authorization. The greeting
    /// and the subscription pass are best effort.
    pub async fn register(
        &self,
        profile: UserProfile,
        grant: TokenGrant,
    ) -> Result<SubscriptionResult> {
        let user_id = profile.user_id.clone();
        let mut credential = Credential::new(
            user_id.clone(),
            grant.access_token.clone(),
            grant.refresh_token.clone().unwrap_or_default(),
            grant.expires_at(Utc::now()),
        );
        credential.name = profile.name;

        self.store.upsert(&credential).await?;
        let credential = match self.store.get(&user_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => credential,
            Err(e) => {
                warn!(%user_id, error = %e, "could not read back stored credential");
                credential
            }
        };
        self.registry.insert(credential).await;
        info!(%user_id, "broadcaster registered");

        if let Err(e) = self.send_message(&user_id, READY_MESSAGE).await {
            warn!(%user_id, error = %e, "ready message not delivered");
        }

        Ok(self.reconciler.reconcile(&user_id).await)
    }

    /// Entry point for a raw webhook body.
    pub async fn handle_webhook(&self, body: &[u8]) -> WebhookOutcome {
        let event = match ChatMessageEvent::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "malformed webhook body");
                return WebhookOutcome::Malformed;
            }
        };

        if !self.dedup.check_and_mark(&event) {
            return WebhookOutcome::Duplicate;
        }

        self.handle_event(&event).await
    }

    /// Process an event that already passed deduplication.
    pub async fn handle_event(&self, event: &ChatMessageEvent) -> WebhookOutcome {
        let Some(user_id) = event.broadcaster_id() else {
            return WebhookOutcome::Ignored;
        };
        let Some(reply) = self.interpreter.interpret(&user_id, event.content()).await else {
            return WebhookOutcome::Ignored;
        };

        match self.send_message(&user_id, &reply).await {
            Ok(()) => WebhookOutcome::Replied,
            Err(e) => {
                error!(%user_id, error = %e, "failed to send reply");
                WebhookOutcome::ReplyFailed
            }
        }
    }

    /// Post to the broadcaster's own chat as the bot.
    pub async fn send_message(&self, user_id: &UserId, content: &str) -> Result<()> {
        let platform = &self.platform;
        self.tokens
            .authorized(user_id, "send_chat_message", |token| async move {
                platform.send_chat_message(&token, user_id, content).await
            })
            .await
    }

    /// Spawn the periodic token refresh and dedup sweep.
    pub fn start_background_tasks(self: &Arc<Self>) -> BackgroundTasks {
        let bot = self.clone();
        let token_refresh =
            ScheduledTask::spawn("token-refresh", self.settings.refresh_interval, move || {
                let bot = bot.clone();
                async move {
                    bot.tokens.refresh_all().await;
                }
            });

        let bot = self.clone();
        let dedup_sweep =
            ScheduledTask::spawn("dedup-sweep", self.settings.dedup_sweep_interval, move || {
                let bot = bot.clone();
                async move {
                    bot.dedup.sweep();
                }
            });

        BackgroundTasks {
            token_refresh,
            dedup_sweep,
        }
    }
}

pub struct BackgroundTasks {
    token_refresh: ScheduledTask,
    dedup_sweep: ScheduledTask,
}

impl BackgroundTasks {
    pub fn is_running(&self) -> bool {
        self.token_refresh.is_running() && self.dedup_sweep.is_running()
    }

    pub async fn stop(self) {
        self.token_refresh.stop().await;
        self.dedup_sweep.stop().await;
    }
}

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use cvb_core::bot::ConvertBot;
use cvb_kick::KickOAuth;

use crate::handlers;

/// Pending authorizations older than this are rejected at the callback.
pub const PENDING_AUTH_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct AppState {
    pub bot: Arc<ConvertBot>,
    pub oauth: Arc<KickOAuth>,
    pub pending: Arc<PendingAuthorizations>,
}

impl AppState {
    pub fn new(bot: Arc<ConvertBot>, oauth: Arc<KickOAuth>) -> Self {
        Self {
            bot,
            oauth,
            pending: Arc::new(PendingAuthorizations::default()),
        }
    }
}

/// PKCE verifiers keyed by OAuth `state`, each usable once.
pub struct PendingAuthorizations {
    ttl: Duration,
    inner: Mutex<HashMap<String, (String, Instant)>>,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new(PENDING_AUTH_TTL)
    }
}

impl PendingAuthorizations {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, state: String, verifier: String) {
        self.insert_at(state, verifier, Instant::now());
    }

    pub fn insert_at(&self, state: String, verifier: String, now: Instant) {
        let mut map = self.lock();
        let ttl = self.ttl;
        map.retain(|_, (_, created)| now.duration_since(*created) <= ttl);
        map.insert(state, (verifier, now));
    }

    /// Remove and return the verifier for `state` if it has not expired.
    pub fn take(&self, state: &str) -> Option<String> {
        self.take_at(state, Instant::now())
    }

    pub fn take_at(&self, state: &str, now: Instant) -> Option<String> {
        let (verifier, created) = self.lock().remove(state)?;
        if now.duration_since(created) > self.ttl {
            debug!("pending authorization expired");
            return None;
        }
        Some(verifier)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Listener Kick delivers `chat.message.sent` events to.
pub fn webhook_router(bot: Arc<ConvertBot>) -> Router {
    Router::new()
        .route("/webhook", post(handlers::webhook::receive))
        .with_state(bot)
        .layer(TraceLayer::new_for_http())
}

/// Broadcaster-facing app: OAuth start/callback, dashboard and health.
pub fn web_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/kick", get(handlers::auth::start))
        .route("/auth/callback", get(handlers::auth::callback))
        .route("/auth/dashboard", get(handlers::auth::dashboard))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` until `shutdown` resolves.
pub async fn serve<F>(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(server = name, %addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!(server = name, "stopped");
    Ok(())
}

use std::sync::Arc;

use axum::{body::Bytes, extract::State};
use tracing::debug;

use cvb_core::bot::ConvertBot;

/// Always answers 200 `ok`; the outcome is only logged.
pub async fn receive(State(bot): State<Arc<ConvertBot>>, body: Bytes) -> &'static str {
    let outcome = bot.handle_webhook(&body).await;
    debug!(?outcome, bytes = body.len(), "webhook handled");
    "ok"
}

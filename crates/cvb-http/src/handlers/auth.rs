//! OAuth authorization-code flow with PKCE.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use cvb_kick::{oauth::random_state, PkcePair};

use crate::router::AppState;

pub const DASHBOARD_PATH: &str = "/auth/dashboard";

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Redirect the broadcaster to Kick's consent page.
pub async fn start(State(app): State<AppState>) -> Response {
    let state = random_state();
    let pkce = PkcePair::generate();

    match app.oauth.authorization_url(&state, &pkce) {
        Ok(url) => {
            app.pending.insert(state, pkce.verifier);
            Redirect::to(&url).into_response()
        }
        Err(e) => {
            error!(error = %e, "cannot build authorization url");
            (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response()
        }
    }
}

pub async fn callback(State(app): State<AppState>, Query(q): Query<CallbackQuery>) -> Response {
    let Some(verifier) = q.state.as_deref().and_then(|s| app.pending.take(s)) else {
        warn!("callback with unknown or expired state");
        return (StatusCode::BAD_REQUEST, "Invalid state").into_response();
    };
    if let Some(err) = q.error.as_deref() {
        warn!(error = err, "authorization denied");
        return (StatusCode::BAD_REQUEST, "Authorization denied").into_response();
    }
    let Some(code) = q.code.as_deref().filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing code").into_response();
    };

    match complete(&app, code, &verifier).await {
        Ok(()) => Redirect::to(DASHBOARD_PATH).into_response(),
        Err(e) => {
            error!(error = %e, "authentication failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response()
        }
    }
}

async fn complete(app: &AppState, code: &str, verifier: &str) -> cvb_core::Result<()> {
    let grant = app.oauth.exchange_code(code, verifier).await?;
    let profile = app.bot.fetch_profile(&grant.access_token).await?;
    let user_id = profile.user_id.clone();

    let result = app.bot.register(profile, grant).await?;
    info!(
        %user_id,
        subscribed = result.subscribed,
        removed = result.removed,
        "broadcaster authorized"
    );
    Ok(())
}

/// Static landing page.
pub async fn dashboard() -> Html<&'static str> {
    Html(
        "<!doctype html><html><head><title>Convert Bot</title></head><body>\
         <h1>Convert Bot is connected</h1>\
         <p>Type <code>!c 100</code> in your chat to convert from your active to your home currency.</p>\
         <p>Set currencies with <code>!c active EUR</code> and <code>!c home USD</code>.</p>\
         </body></html>",
    )
}

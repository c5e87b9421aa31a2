//! Kick adapter: public API client and OAuth 2.1 (PKCE) client.

pub mod api;
pub mod oauth;

pub use api::KickClient;
pub use oauth::{KickOAuth, OAuthSettings, PkcePair};

use std::time::Duration;

use cvb_core::{errors::Error, Result};

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("http client build failed: {e}")))
}

/// Kick reports a rejected bearer token either as HTTP 401 or inside the JSON
/// body (`status: 401`, or an `error`/`message` mentioning "unauthorized").
pub(crate) fn unauthorized_reason(status: u16, body: &serde_json::Value) -> Option<String> {
    let text_field = |key: &str| {
        body.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| s.to_lowercase().contains("unauthorized"))
            .map(str::to_string)
    };

    if let Some(reason) = text_field("error").or_else(|| text_field("message")) {
        return Some(reason);
    }
    if status == 401 || body.get("status").and_then(|s| s.as_u64()) == Some(401) {
        return Some("Unauthorized".to_string());
    }
    None
}

pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

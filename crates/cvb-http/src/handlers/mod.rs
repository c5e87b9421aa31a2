pub mod auth;
pub mod webhook;

pub async fn health() -> &'static str {
    "ok"
}

//! HTTP surfaces: the Kick webhook listener and the OAuth web app.

pub mod handlers;
pub mod router;

#[cfg(test)]
mod test_support;

pub use router::{serve, web_router, webhook_router, AppState, PendingAuthorizations};

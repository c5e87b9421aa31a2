/// Core error type for the conversion bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// tell an expired token apart from a plain transport failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("external error: {0}")]
    External(String),

    /// The remote side rejected the bearer token (HTTP 401 or an "unauthorized" body).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Still unauthorized after a forced refresh and one retry.
    #[error("remote auth failure for user {user_id}: {reason}")]
    RemoteAuthFailure { user_id: String, reason: String },

    #[error("token refresh failed for user {0}")]
    RefreshFailed(String),

    #[error("user {0} is not registered")]
    UnknownUser(String),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

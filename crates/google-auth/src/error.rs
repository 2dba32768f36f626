//! Error types for OAuth flow and token storage operations

/// Errors from OAuth and credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid OAuth configuration: {0}")]
    InvalidConfig(String),

    #[error("corrupt credential: {0}")]
    CorruptCredential(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

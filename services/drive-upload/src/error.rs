use reqwest::StatusCode;

/// Drive API errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Drive request failed: {0}")]
    Http(String),

    #[error("Drive API returned {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("invalid Drive response: {0}")]
    InvalidResponse(String),

    #[error("reading upload file failed: {0}")]
    Io(String),

    #[error("invalid Drive base URL: {0}")]
    InvalidBaseUrl(String),
}

pub type Result<T> = std::result::Result<T, Error>;

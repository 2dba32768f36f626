//! Common error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while assembling configuration at startup
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("missing required setting `{field}` (set it in the config file or via {env})")]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

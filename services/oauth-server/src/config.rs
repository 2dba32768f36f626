//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The `[oauth]` table and its env overrides are shared with the upload
//! client (see `common::config`); this module adds the `[server]` table.

use common::OAuthConfig;
use common::config::{OAuthSection, load_file};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default config file name, used only if present in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "oauth-server.toml";

/// Env var overriding `server.listen_addr`.
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";

/// Root configuration
#[derive(Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

/// Config file as written on disk
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    oauth: OAuthSection,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from an optional TOML file, then overlay
    /// environment variables.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        let file: FileConfig = load_file(path)?;
        let mut server = file.server;

        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            server.listen_addr = addr.parse().map_err(|e| {
                common::Error::Config(format!(
                    "{ENV_LISTEN_ADDR}={addr:?} is not a socket address: {e}"
                ))
            })?;
        }

        if server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        let oauth = file.oauth.resolve()?;

        Ok(Self { server, oauth })
    }

    /// Resolve config file path from CLI arg, CONFIG_PATH env var, or the
    /// default file name if it exists.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        common::config::resolve_path(cli_path, DEFAULT_CONFIG_FILE)
    }
}

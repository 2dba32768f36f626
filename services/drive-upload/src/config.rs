//! Configuration for the upload client
//!
//! Reads the same file as the callback service. The `[server]` table is
//! ignored here; `[drive]` is optional and only needed to point at a
//! different Drive API host.

use common::OAuthConfig;
use common::config::{OAuthSection, load_file, require_http_url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Shared with the callback service so one file configures both.
pub const DEFAULT_CONFIG_FILE: &str = "oauth-server.toml";

pub const ENV_DRIVE_BASE_URL: &str = "DRIVE_BASE_URL";

pub const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com";

#[derive(Debug)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub drive_base_url: Url,
}

#[derive(Debug, Deserialize)]
struct DriveSection {
    #[serde(default = "default_drive_base_url")]
    base_url: String,
}

impl Default for DriveSection {
    fn default() -> Self {
        Self {
            base_url: default_drive_base_url(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    oauth: OAuthSection,
    #[serde(default)]
    drive: DriveSection,
}

fn default_drive_base_url() -> String {
    DEFAULT_DRIVE_BASE_URL.to_string()
}

impl Config {
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load from an optional file, overlaying variables from `lookup`.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> common::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = load_file(path)?;

        let base_url = lookup(ENV_DRIVE_BASE_URL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(file.drive.base_url);
        require_http_url("drive.base_url", &base_url)?;
        let drive_base_url = Url::parse(&base_url).map_err(|e| {
            common::Error::Config(format!("drive.base_url {base_url:?} is invalid: {e}"))
        })?;

        let oauth = file.oauth.resolve_with(&lookup)?;

        Ok(Self {
            oauth,
            drive_base_url,
        })
    }

    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        common::config::resolve_path(cli_path, DEFAULT_CONFIG_FILE)
    }
}

//! Provider configuration shared by the callback server and the upload client
//!
//! Config precedence: CLI `--config` > `CONFIG_PATH` env > default file name
//! in the working directory (only if it exists). Within a resolved config,
//! environment variables override values from the file.
//!
//! The client secret is read from `CLIENT_SECRET` or `client_secret_file`,
//! never from the TOML body, so config files can be committed safely.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::secret::Secret;

pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
pub const ENV_CLIENT_ID: &str = "CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "CLIENT_SECRET";
pub const ENV_REDIRECT_URL: &str = "REDIRECT_URL";
pub const ENV_SCOPES: &str = "SCOPES";
pub const ENV_TOKEN_FILE: &str = "TOKEN_FILE";

fn default_request_timeout() -> u64 {
    30
}

/// `[oauth]` table as written in a config file.
///
/// Every field is optional so a deployment can be driven entirely by
/// environment variables.
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Authorization endpoint override (defaults to Google)
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Token endpoint override (defaults to Google)
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Fully resolved, validated provider configuration.
///
/// Built once at startup and passed by reference into whatever needs it.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    pub token_file: PathBuf,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for OAuthSection {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret_file: None,
            redirect_url: None,
            scopes: None,
            token_file: None,
            auth_url: None,
            token_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl OAuthSection {
    /// Overlay process environment variables and validate.
    pub fn resolve(self) -> Result<OAuthConfig> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Overlay variables from `lookup` and validate.
    ///
    /// Blank variables are treated as unset.
    pub fn resolve_with<F>(self, lookup: F) -> Result<OAuthConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id = env(ENV_CLIENT_ID)
            .or(self.client_id)
            .filter(|v| !v.trim().is_empty())
            .ok_or(Error::Missing {
                field: "client_id",
                env: ENV_CLIENT_ID,
            })?;

        let client_secret = match env(ENV_CLIENT_SECRET) {
            Some(secret) => secret,
            None => match &self.client_secret_file {
                Some(path) => std::fs::read_to_string(path)
                    .map_err(|source| Error::Io {
                        path: path.clone(),
                        source,
                    })?
                    .trim()
                    .to_owned(),
                None => String::new(),
            },
        };
        if client_secret.is_empty() {
            return Err(Error::Missing {
                field: "client_secret_file",
                env: ENV_CLIENT_SECRET,
            });
        }

        let redirect_url = env(ENV_REDIRECT_URL)
            .or(self.redirect_url)
            .ok_or(Error::Missing {
                field: "redirect_url",
                env: ENV_REDIRECT_URL,
            })?;
        require_http_url("redirect_url", &redirect_url)?;

        let scopes = match env(ENV_SCOPES) {
            Some(raw) => parse_scopes(&raw),
            None => self
                .scopes
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect(),
        };
        if scopes.is_empty() {
            return Err(Error::Config(
                "at least one scope is required (scopes or SCOPES)".into(),
            ));
        }

        let token_file = env(ENV_TOKEN_FILE)
            .map(PathBuf::from)
            .or(self.token_file)
            .ok_or(Error::Missing {
                field: "token_file",
                env: ENV_TOKEN_FILE,
            })?;

        if let Some(url) = &self.auth_url {
            require_http_url("auth_url", url)?;
        }
        if let Some(url) = &self.token_url {
            require_http_url("token_url", url)?;
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(OAuthConfig {
            client_id,
            client_secret: Secret::new(client_secret),
            redirect_url,
            scopes,
            token_file,
            auth_url: self.auth_url,
            token_url: self.token_url,
            request_timeout_secs: self.request_timeout_secs,
        })
    }
}

/// Split a comma-separated scope list, dropping blank entries.
pub fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Reject values that are not absolute http(s) URLs with a host.
pub fn require_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{field} is not a valid URL ({e}): {value}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(()),
        _ => Err(Error::Config(format!(
            "{field} must be an http(s) URL with a host, got: {value}"
        ))),
    }
}

/// Resolve the config file path from a CLI arg, `CONFIG_PATH`, or a default
/// file name. The default is only used if the file exists, so a service can
/// run from environment variables alone.
pub fn resolve_path(cli_path: Option<&str>, default_name: &str) -> Option<PathBuf> {
    if let Some(p) = cli_path {
        return Some(PathBuf::from(p));
    }
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        return Some(PathBuf::from(p));
    }
    let default = PathBuf::from(default_name);
    default.exists().then_some(default)
}

/// Parse a TOML config file, or return `T::default()` when no file was given.
pub fn load_file<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(toml::from_str(&contents)?)
        }
        None => Ok(T::default()),
    }
}

//! OAuth client for the authorization-code grant
//!
//! Builds the authorization redirect and talks to the token endpoint for the
//! two grant types this workspace uses:
//! 1. Authorization code exchange (callback completion)
//! 2. Token refresh (upload client, when the stored access token expired)
//!
//! The client id and secret are sent as form parameters, which is what
//! Google's token endpoint expects.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use common::{OAuthConfig, Secret};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::constants::{ACCESS_TYPE_OFFLINE, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, PROMPT_CONSENT};
use crate::error::{Error, Result};
use crate::token::{Token, TokenResponse};

/// Exchanges an authorization code for a token.
///
/// The callback handler depends on this seam rather than on `OAuthClient`
/// directly. Uses a boxed future so it can be held as `Arc<dyn CodeExchanger>`.
pub trait CodeExchanger: Send + Sync {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + 'a>>;
}

/// Immutable provider client built once from configuration.
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: Secret<String>,
    redirect_url: String,
    scopes: Vec<String>,
    auth_url: Url,
    token_url: Url,
}

/// Error body returned by the token endpoint (RFC 6749 §5.2).
#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthClient {
    /// Build a client from resolved configuration, defaulting the endpoints
    /// to Google's.
    pub fn new(http: reqwest::Client, config: &OAuthConfig) -> Result<Self> {
        let auth_url = parse_endpoint(config.auth_url.as_deref().unwrap_or(GOOGLE_AUTH_URL))?;
        let token_url = parse_endpoint(config.token_url.as_deref().unwrap_or(GOOGLE_TOKEN_URL))?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            scopes: config.scopes.clone(),
            auth_url,
            token_url,
        })
    }

    /// Build the authorization URL for an already-encoded `state`.
    ///
    /// Requests offline access (refresh token) and forces the consent screen.
    /// Parameters are emitted in sorted key order.
    pub fn authorization_url(&self, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("access_type", ACCESS_TYPE_OFFLINE)
            .append_pair("client_id", &self.client_id)
            .append_pair("prompt", PROMPT_CONSENT)
            .append_pair("redirect_uri", &self.redirect_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<Token> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
            ])
            .await?;
        debug!(
            has_refresh_token = response.refresh_token.is_some(),
            expires_in = response.expires_in,
            "authorization code exchanged"
        );
        response.into_token(Utc::now())
    }

    /// Obtain a fresh access token with a refresh token.
    ///
    /// Google usually omits `refresh_token` from refresh responses; the
    /// existing one is carried forward in that case.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;
        let mut token = response.into_token(Utc::now())?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        debug!(expiry = ?token.expiry, "access token refreshed");
        Ok(token)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_secret", self.client_secret.expose().as_str()));

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Http(format!("token endpoint request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                // invalid_grant: code already used/expired, or refresh token revoked
                Ok(err) if err.error == "invalid_grant" => Error::InvalidCredentials(format!(
                    "{} ({status}): {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                )),
                Ok(err) => Error::TokenExchange(format!(
                    "token endpoint returned {status}: {} {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                )),
                Err(_) => {
                    Error::TokenExchange(format!("token endpoint returned {status}: {body}"))
                }
            });
        }

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(Error::TokenExchange(
                "token response has an empty access_token".into(),
            ));
        }
        Ok(token)
    }
}

impl CodeExchanger for OAuthClient {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Token>> + Send + 'a>> {
        Box::pin(self.exchange_code(code))
    }
}

fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidConfig(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidConfig(format!(
            "{raw}: unsupported scheme {other}"
        ))),
    }
}

//! OAuth token model
//!
//! `Token` is what the credential store persists. Its JSON shape matches the
//! token files written by Go's `golang.org/x/oauth2` (`access_token`,
//! `token_type`, `refresh_token`, `expiry`), so files are interchangeable
//! with other clients of the same provider.
//!
//! `TokenResponse` is the raw token endpoint payload; it carries a relative
//! `expires_in` that is converted to an absolute expiry on receipt.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TOKEN_TYPE, EXPIRY_SKEW};
use crate::error::{Error, Result};

/// Credentials obtained from the token endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry. `None` means the token does not expire.
    #[serde(default, with = "expiry")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// Token type normalized for the `Authorization` header.
    pub fn token_type(&self) -> &str {
        let t = self.token_type.as_str();
        if t.is_empty() || t.eq_ignore_ascii_case("bearer") {
            DEFAULT_TOKEN_TYPE
        } else if t.eq_ignore_ascii_case("mac") {
            "MAC"
        } else if t.eq_ignore_ascii_case("basic") {
            "Basic"
        } else {
            t
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type(), self.access_token)
    }

    /// Whether the access token is expired (or within `EXPIRY_SKEW` of it)
    /// at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => {
                let skew = chrono::Duration::from_std(EXPIRY_SKEW).unwrap_or_default();
                now + skew >= expiry
            }
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Response body from the token endpoint for both exchange and refresh.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Convert to a storable token, anchoring `expires_in` at `now`.
    ///
    /// Fails if `expires_in` puts the expiry outside the representable range.
    pub fn into_token(self, now: DateTime<Utc>) -> Result<Token> {
        let expiry = match self.expires_in.filter(|secs| *secs > 0) {
            Some(secs) => Some(
                chrono::Duration::try_seconds(secs)
                    .and_then(|delta| now.checked_add_signed(delta))
                    .ok_or_else(|| {
                        Error::TokenExchange(format!("expires_in out of range: {secs}"))
                    })?,
            ),
            None => None,
        };
        let token_type = if self.token_type.is_empty() {
            DEFAULT_TOKEN_TYPE.to_string()
        } else {
            self.token_type
        };

        Ok(Token {
            access_token: self.access_token,
            token_type,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expiry,
        })
    }
}

/// Serde adapter for `expiry`.
///
/// Writes RFC 3339; "no expiry" is written as the zero time
/// `0001-01-01T00:00:00Z`, and the zero time (or a null) reads back as
/// `None`.
mod expiry {
    use chrono::{DateTime, Datelike, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(t) => serializer.serialize_str(&t.to_rfc3339()),
            None => serializer.serialize_str(ZERO_TIME),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| serde::de::Error::custom(format!("invalid expiry {raw:?}: {e}")))?
            .with_timezone(&Utc);
        if parsed.year() <= 1 {
            Ok(None)
        } else {
            Ok(Some(parsed))
        }
    }
}

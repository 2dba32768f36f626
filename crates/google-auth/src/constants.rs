//! Google OAuth constants
//!
//! Endpoints are the defaults for `OAuthClient`; both can be overridden from
//! configuration (tests point them at an in-process mock).

use std::time::Duration;

/// Google's authorization endpoint (user consent page)
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google's token endpoint for code exchange and refresh
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// `access_type=offline` asks Google to issue a refresh token.
pub const ACCESS_TYPE_OFFLINE: &str = "offline";

/// `prompt=consent` forces the consent screen, so a refresh token is issued
/// even if the user approved this client before.
pub const PROMPT_CONSENT: &str = "consent";

/// Token type assumed when the token endpoint leaves it blank.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Access tokens are treated as expired this long before their real expiry,
/// so a token is never sent moments before the provider rejects it.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(10);

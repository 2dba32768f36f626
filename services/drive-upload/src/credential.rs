use chrono::{DateTime, Utc};
use google_auth::{Error, OAuthClient, Result, Token, TokenStore};
use tracing::info;

/// Load the stored token, refreshing it once if it has expired at `now`.
///
/// The refreshed token is kept in memory only; the token file stays as the
/// callback service wrote it.
pub async fn usable_token(
    store: &TokenStore,
    oauth: &OAuthClient,
    now: DateTime<Utc>,
) -> Result<Token> {
    let token = store.load().await?;
    if !token.is_expired_at(now) {
        return Ok(token);
    }

    let Some(refresh_token) = token.refresh_token.as_deref() else {
        return Err(Error::InvalidCredentials(format!(
            "token in {} expired and has no refresh token, re-run the consent flow",
            store.path().display()
        )));
    };

    info!(expired_at = ?token.expiry, "access token expired, refreshing");
    oauth.refresh(refresh_token).await
}

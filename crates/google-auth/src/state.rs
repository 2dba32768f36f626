//! Correlation state encoding
//!
//! The caller's correlation value travels through the provider as the OAuth
//! `state` parameter. It is wrapped in URL-safe base64 (RFC 4648 §5, padded)
//! so arbitrary text survives the round trip byte-for-byte.
//!
//! This is transport encoding only. The value is neither signed nor bound to
//! a server-side session, so anyone who can reach the callback can forge a
//! state that decodes cleanly.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;

use crate::error::{Error, Result};

/// Encode a correlation value for use as the OAuth `state` parameter.
pub fn encode_state(value: &str) -> String {
    URL_SAFE.encode(value.as_bytes())
}

/// Decode a `state` parameter back into the original correlation value.
///
/// Fails on malformed base64 (including missing padding) and on bytes that
/// are not valid UTF-8.
pub fn decode_state(encoded: &str) -> Result<String> {
    let bytes = URL_SAFE
        .decode(encoded.as_bytes())
        .map_err(|e| Error::InvalidState(format!("state is not url-safe base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidState(format!("state is not valid UTF-8: {e}")))
}

//! Google OAuth offline-access library
//!
//! Provides the pieces of the authorization-code flow that both binaries
//! share: correlation state encoding, authorization URL construction, code
//! exchange and refresh against the token endpoint, and the on-disk token
//! store.
//!
//! Credential flow:
//! 1. Caller supplies a correlation value, encoded with `state::encode_state()`
//! 2. User authorizes via `OAuthClient::authorization_url()`
//! 3. Callback decodes the state with `state::decode_state()`
//! 4. Service calls `OAuthClient::exchange_code()` (through `CodeExchanger`)
//! 5. Token persisted via `store::TokenStore::save()`
//! 6. A later process reads it back with `store::TokenStore::load()` and
//!    calls `OAuthClient::refresh()` if the access token has expired

pub mod client;
pub mod constants;
pub mod error;
pub mod state;
pub mod store;
pub mod token;

pub use client::{CodeExchanger, OAuthClient};
pub use constants::*;
pub use error::{Error, Result};
pub use state::{decode_state, encode_state};
pub use store::TokenStore;
pub use token::{Token, TokenResponse};

//! Common types shared by the OAuth bootstrap services

pub mod config;
mod error;
mod secret;

pub use config::OAuthConfig;
pub use error::{Error, Result};
pub use secret::Secret;

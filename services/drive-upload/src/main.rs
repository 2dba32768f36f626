//! Drive upload client
//!
//! Uses the credential left behind by `oauth-server` to upload one file into
//! a Drive folder, then prints the folder's contents as `name (id)`.
//!
//! Logs go to stderr so stdout carries only the listing.

mod config;
mod credential;
mod drive;
mod error;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use google_auth::{OAuthClient, TokenStore};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::drive::DriveClient;

#[derive(Parser)]
#[command(name = "drive-upload")]
#[command(about = "Upload a file to a Google Drive folder with the stored OAuth token")]
struct Cli {
    /// File to upload
    file: PathBuf,

    /// Target Drive folder ID
    #[arg(long)]
    folder: String,

    /// Config file (default: CONFIG_PATH or ./oauth-server.toml if present)
    #[arg(long)]
    config: Option<String>,

    /// Number of folder entries to list after the upload
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=1000))]
    page_size: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.oauth.request_timeout_secs))
        .build()
        .context("failed to build HTTP client")?;
    let oauth = OAuthClient::new(http.clone(), &config.oauth)
        .context("invalid OAuth endpoint configuration")?;
    let store = TokenStore::new(config.oauth.token_file.clone());

    let token = credential::usable_token(&store, &oauth, Utc::now())
        .await
        .with_context(|| {
            format!(
                "no usable token in {}, complete the consent flow first",
                store.path().display()
            )
        })?;

    let name = cli
        .file
        .file_name()
        .with_context(|| format!("{} has no file name", cli.file.display()))?
        .to_string_lossy()
        .into_owned();

    let drive = DriveClient::new(http, config.drive_base_url, &token);

    let uploaded = drive
        .upload(&cli.file, &name, &cli.folder)
        .await
        .context("upload failed")?;
    info!(id = %uploaded.id, name = %uploaded.name, folder = %cli.folder, "file uploaded");

    let listing = drive
        .list_folder(&cli.folder, cli.page_size)
        .await
        .context("listing folder failed")?;
    for file in &listing.files {
        println!("{} ({})", file.name, file.id);
    }
    if listing.next_page_token.is_some() {
        info!(shown = listing.files.len(), "folder has more entries than listed");
    }

    Ok(())
}

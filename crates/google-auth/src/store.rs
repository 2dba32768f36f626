//! Token file storage
//!
//! The store is a single JSON file holding exactly one `Token`. Every save
//! replaces the whole file with atomic temp-file + rename, so readers see
//! either the previous token or the new one, never a partial write. Each save
//! uses its own temp file, so concurrent savers don't clobber each other's
//! temp data; the last rename wins.
//!
//! There is no in-memory cache: `load()` always reads the file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::token::Token;

/// Handle to the on-disk token file. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored token.
    ///
    /// File permissions are 0600 (owner read/write only) on unix.
    pub async fn save(&self, token: &Token) -> Result<()> {
        let mut json = serde_json::to_vec(token)
            .map_err(|e| Error::CorruptCredential(format!("serializing token: {e}")))?;
        json.push(b'\n');
        write_atomic(&self.path, &json).await
    }

    /// Read the stored token.
    ///
    /// Returns `NotFound` if the file doesn't exist and `CorruptCredential`
    /// if it can't be parsed or has no access token.
    pub async fn load(&self) -> Result<Token> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "token file {}",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(Error::Io(format!(
                    "reading token file {}: {e}",
                    self.path.display()
                )));
            }
        };

        let token: Token = serde_json::from_slice(&contents).map_err(|e| {
            Error::CorruptCredential(format!("parsing {}: {e}", self.path.display()))
        })?;
        if token.access_token.is_empty() {
            return Err(Error::CorruptCredential(format!(
                "{} has an empty access_token",
                self.path.display()
            )));
        }

        debug!(path = %self.path.display(), expiry = ?token.expiry, "loaded token");
        Ok(token)
    }
}

/// Write `data` to `path` atomically.
///
/// Writes to a uniquely named temp file in the same directory, fsyncs it,
/// then renames it over the target. The temp file is created 0600 so the
/// token is never readable by others, even briefly.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Io(format!("token path {} has no file name", path.display())))?
        .to_string_lossy();
    let tmp_path = dir.join(format!(
        ".{file_name}.tmp.{}",
        uuid::Uuid::new_v4().as_simple()
    ));

    if let Err(e) = write_synced(&tmp_path, data).await {
        remove_quietly(&tmp_path).await;
        return Err(Error::Io(format!(
            "writing temp token file {}: {e}",
            tmp_path.display()
        )));
    }

    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        remove_quietly(&tmp_path).await;
        return Err(Error::Io(format!(
            "renaming temp token file over {}: {e}",
            path.display()
        )));
    }

    // Persist the rename itself. Failure here only weakens durability, the
    // file content is already complete.
    #[cfg(unix)]
    if let Err(e) = sync_dir(dir).await {
        warn!(dir = %dir.display(), error = %e, "failed to fsync token directory");
    }

    debug!(path = %path.display(), "persisted token");
    Ok(())
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove temp token file");
    }
}

//! Minimal Google Drive v3 client
//!
//! Two calls: a single-request `multipart/related` upload into a folder, and
//! a one-page listing of a folder's children.
//!
//! The upload body is streamed from disk, so memory use does not grow with
//! the file size.

use std::io;
use std::path::Path;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use google_auth::Token;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Fields requested from the list endpoint.
pub const LIST_FIELDS: &str = "nextPageToken, files(id, name)";

const MEDIA_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes read from disk per body chunk.
const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Progress is logged each time another this-many percent has been sent.
const PROGRESS_STEP_PERCENT: u64 = 10;

/// File resource, reduced to what we print.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

pub struct DriveClient {
    http: reqwest::Client,
    base: Url,
    authorization: String,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, base: Url, token: &Token) -> Self {
        Self {
            http,
            base,
            authorization: token.authorization_header(),
        }
    }

    /// Create `name` inside `folder` with the contents of `path` as its media.
    pub async fn upload(&self, path: &Path, name: &str, folder: &str) -> Result<DriveFile> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::Io(format!("opening {}: {e}", path.display())))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Error::Io(format!("reading metadata of {}: {e}", path.display())))?
            .len();

        let mut url = self.endpoint(&["upload", "drive", "v3", "files"])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let metadata = serde_json::json!({ "name": name, "parents": [folder] });
        let boundary = format!("upload_{}", uuid::Uuid::new_v4().as_simple());
        let (head, tail) = multipart_frame(&boundary, &metadata.to_string());
        let content_length = head.len() as u64 + size + tail.len() as u64;
        debug!(name, folder, bytes = size, "uploading file");

        let body = stream::once(async move { Ok::<_, io::Error>(head) })
            .chain(media_stream(file, size))
            .chain(stream::once(async move { Ok(tail) }));

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, &self.authorization)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .header(CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(|e| Error::Http(format!("upload request failed: {e}")))?;

        read_json(response).await
    }

    /// List up to `page_size` children of `folder`.
    pub async fn list_folder(&self, folder: &str, page_size: u32) -> Result<FileList> {
        let mut url = self.endpoint(&["drive", "v3", "files"])?;
        url.query_pairs_mut()
            .append_pair("q", &parents_query(folder))
            .append_pair("pageSize", &page_size.to_string())
            .append_pair("fields", LIST_FIELDS);

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| Error::Http(format!("list request failed: {e}")))?;

        read_json(response).await
    }

    /// Append path segments to the base URL, keeping any base path prefix.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// `q` expression selecting the children of `folder`.
///
/// Backslashes are escaped before quotes so the quote escapes stay intact.
fn parents_query(folder: &str) -> String {
    let escaped = folder.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents")
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Api { status, body });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| Error::InvalidResponse(e.to_string()))
}

/// Parts of a two-part `multipart/related` body around the media bytes:
/// boundary + JSON metadata + media headers, and the closing boundary.
fn multipart_frame(boundary: &str, metadata: &str) -> (Bytes, Bytes) {
    let head = format!(
        "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{boundary}\r\nContent-Type: {MEDIA_CONTENT_TYPE}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");
    (Bytes::from(head), Bytes::from(tail))
}

/// Read `file` in chunks, logging progress as it is consumed.
fn media_stream(
    file: tokio::fs::File,
    size: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some((file, Progress::new(size))), |state| async move {
        let (mut file, mut progress) = state?;
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                progress.advance(n as u64);
                Some((Ok(Bytes::from(buf)), Some((file, progress))))
            }
            // Ends the stream after surfacing the error
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Upload progress tracker.
struct Progress {
    sent: u64,
    total: u64,
    next_report: u64,
}

impl Progress {
    fn new(total: u64) -> Self {
        Self {
            sent: 0,
            total,
            next_report: PROGRESS_STEP_PERCENT,
        }
    }

    /// Count `n` more bytes sent. Logs and returns the percentage when a
    /// reporting step has been crossed.
    fn advance(&mut self, n: u64) -> Option<u64> {
        self.sent += n;
        let percent = if self.total == 0 {
            100
        } else {
            (self.sent.saturating_mul(100) / self.total).min(100)
        };
        if percent < self.next_report {
            return None;
        }
        self.next_report = (percent / PROGRESS_STEP_PERCENT + 1) * PROGRESS_STEP_PERCENT;
        info!(sent = self.sent, total = self.total, percent, "upload progress");
        Some(percent)
    }
}

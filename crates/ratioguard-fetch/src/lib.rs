#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

//! `.torrent` acquisition: HTTP fetch with retry, SHA-1 info-dict hashing,
//! title sanitisation, and the small bit of filesystem bookkeeping around
//! writing and later removing the acquired file.
//! Layout: `error.rs` (error types), `bencode.rs` (info-hash), `sanitize.rs`
//! (filename derivation).

pub mod bencode;
pub mod error;
pub mod sanitize;

pub use bencode::info_hash;
pub use error::{FetchError, FetchResult};
pub use sanitize::sanitize_title;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

/// Fetches `.torrent` payloads over HTTP with bounded retry.
pub struct FetchClient {
    http: reqwest::Client,
    max_retry: u32,
    retry_delay: Duration,
}

impl FetchClient {
    /// Construct a client around an existing `reqwest::Client` (so proxy and
    /// TLS settings stay centralised where the binary builds it).
    #[must_use]
    pub const fn new(http: reqwest::Client, max_retry: u32, retry_delay: Duration) -> Self {
        Self {
            http,
            max_retry,
            retry_delay,
        }
    }

    /// Download the bytes at `url`, retrying up to `max_retry` times with
    /// `retry_delay` between attempts. A non-success status or transport
    /// error counts as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::RetriesExhausted`] once every attempt fails.
    pub async fn fetch(&self, url: &str) -> FetchResult<Vec<u8>> {
        let attempts = self.max_retry.max(1);

        for attempt in 1..=attempts {
            match self.try_fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    warn!(url, attempt, error = %err, "torrent fetch attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts,
        })
    }

    async fn try_fetch_once(&self, url: &str) -> FetchResult<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })
    }
}

/// Write `bytes` as `<dir>/<sanitized title>.torrent`, creating `dir` if
/// absent, and return the path written.
///
/// # Errors
///
/// Returns [`FetchError::Io`] if the directory cannot be created or the
/// file cannot be written.
pub async fn write_torrent(dir: &Path, title: &str, bytes: &[u8]) -> FetchResult<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| FetchError::Io {
            operation: "create download directory",
            path: dir.to_path_buf(),
            source,
        })?;

    let path = dir.join(format!("{}.torrent", sanitize_title(title)));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| FetchError::Io {
            operation: "write torrent file",
            path: path.clone(),
            source,
        })?;

    info!(path = %path.display(), bytes = bytes.len(), "wrote torrent file");
    Ok(path)
}

/// Remove a previously written `.torrent` file after a successful push.
/// Removing an already-absent file is not an error — the pipeline may retry
/// this step after a crash between unlink and `is_pushed` being persisted.
///
/// # Errors
///
/// Returns [`FetchError::Io`] for any failure other than "not found".
pub async fn remove_torrent(path: &Path) -> FetchResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FetchError::Io {
            operation: "remove torrent file",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_torrent(dir.path(), "My Show: S01E01!", b"fake bytes")
            .await
            .unwrap();
        assert!(path.ends_with("My Show S01E01.torrent"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"fake bytes");

        remove_torrent(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn removing_an_absent_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.torrent");
        remove_torrent(&missing).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_retries_then_reports_exhaustion() {
        let client = FetchClient::new(
            reqwest::Client::new(),
            2,
            Duration::from_millis(1),
        );
        let err = client.fetch("http://127.0.0.1:0/unreachable").await.unwrap_err();
        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 2, .. }));
    }
}

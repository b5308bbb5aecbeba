//! # Design
//!
//! - Provide structured, constant-message errors for the fetch pipeline.
//! - Capture operation context (urls, paths) to make failures reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for `.torrent` acquisition.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors produced while acquiring, hashing or writing a `.torrent`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request itself failed (transport, TLS, timeout).
    #[error("fetch http transport failure")]
    Transport {
        /// URL being fetched.
        url: String,
        /// Underlying `reqwest` error.
        source: reqwest::Error,
    },
    /// The server responded with a non-success status.
    #[error("fetch http status failure")]
    Status {
        /// URL being fetched.
        url: String,
        /// Status code returned.
        status: u16,
    },
    /// All retry attempts were exhausted without success.
    #[error("fetch retries exhausted")]
    RetriesExhausted {
        /// URL being fetched.
        url: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// The downloaded bytes are not a well-formed bencoded torrent, or no
    /// top-level `info` key was found.
    #[error("fetch malformed torrent")]
    MalformedTorrent {
        /// Human-readable reason.
        reason: &'static str,
    },
    /// Writing the `.torrent` file to disk failed.
    #[error("fetch io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
}

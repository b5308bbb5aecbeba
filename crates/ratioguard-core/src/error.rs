//! Error taxonomy for site drivers and downloader adapters.

use thiserror::Error;

/// Errors surfaced while fetching a subscription's feed or a candidate's
/// detail page.
#[derive(Debug, Error)]
pub enum SiteError {
    /// The feed request failed or could not be parsed.
    #[error("feed fetch failed for {site}: {message}")]
    Feed {
        /// Site identifier.
        site: String,
        /// Human-readable failure detail.
        message: String,
    },
    /// The site rejected the request's credentials (401/403).
    #[error("authentication failed for {site}")]
    Auth {
        /// Site identifier.
        site: String,
    },
    /// The site returned a server error or rate-limited the request (5xx/429).
    #[error("site error for {site}: status {status}")]
    Site {
        /// Site identifier.
        site: String,
        /// HTTP status code returned.
        status: u16,
    },
    /// The detail page/response could not be parsed into a `TorrentCandidate`.
    #[error("failed to parse detail response for {site}: {message}")]
    Parse {
        /// Site identifier.
        site: String,
        /// Human-readable failure detail.
        message: String,
    },
    /// The request exceeded its per-stage timeout.
    #[error("request to {site} timed out")]
    Timeout {
        /// Site identifier.
        site: String,
    },
}

/// Convenience alias for `SiteDriver` results.
pub type SiteResult<T> = Result<T, SiteError>;

/// Errors surfaced by `Downloader` adapter implementations.
#[derive(Debug, Error)]
pub enum DownloaderError {
    /// The downloader rejected the request's credentials; a re-login was
    /// already attempted (for bodyless requests) or is not safe to retry
    /// (for bodied requests whose payload was already consumed).
    #[error("downloader authentication failed")]
    Auth,
    /// The downloader returned a non-2xx response.
    #[error("downloader request failed with status {status}: {message}")]
    Request {
        /// HTTP status code returned.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The underlying HTTP transport failed.
    #[error("downloader transport error: {0}")]
    Transport(String),
    /// The requested torrent was not found on the downloader.
    #[error("torrent {hash} not found on downloader")]
    NotFound {
        /// Torrent hash that was not found.
        hash: String,
    },
    /// No downloader could be resolved for the subscription.
    #[error("no downloader configured")]
    NoDownloader,
}

/// Convenience alias for `Downloader` results.
pub type DownloaderResult<T> = Result<T, DownloaderError>;

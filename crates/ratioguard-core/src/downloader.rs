//! `Downloader` capability: the external BitTorrent client this engine
//! remote-controls (qBittorrent, Transmission, ...).

use async_trait::async_trait;

use crate::error::DownloaderResult;

/// Request payload for admitting a `.torrent` file into a downloader.
#[derive(Debug, Clone)]
pub struct AddTorrentRequest {
    /// Raw bencoded `.torrent` file contents.
    pub torrent_bytes: Vec<u8>,
    /// Whether the torrent should be added in a paused state.
    pub paused: bool,
    /// Destination save path for the torrent's payload.
    pub save_path: String,
    /// Category label applied at the downloader.
    pub category: Option<String>,
    /// Tag labels applied at the downloader.
    pub tags: Vec<String>,
}

/// Snapshot of a torrent's properties as reported by the downloader.
#[derive(Debug, Clone)]
pub struct TorrentProperties {
    /// Save path reported by the downloader.
    pub save_path: String,
    /// Completion percentage in `[0.0, 100.0]`.
    pub progress_percent: f64,
    /// Whether the downloader considers the torrent fully complete.
    pub is_complete: bool,
}

/// A torrent as reported by `Downloader::list_torrents`.
#[derive(Debug, Clone)]
pub struct DownloaderTorrent {
    /// 40-character lowercase hex SHA-1 hash.
    pub hash: String,
    /// Display name reported by the downloader.
    pub name: String,
    /// Completion percentage in `[0.0, 100.0]`.
    pub progress_percent: f64,
    /// Upload/download ratio reported by the downloader.
    pub ratio: f64,
    /// Total time this torrent has spent seeding, in seconds.
    pub seeding_seconds: i64,
    /// Current combined transfer speed (down + up), bytes/sec.
    pub speed_bps: i64,
}

/// Capability set implemented per downloader backend.
///
/// Unsupported operations default to a `DownloaderError::Request` with a
/// descriptive status, matching the style of optional capability methods
/// elsewhere in the stack: every backend this engine ships with implements
/// every method, but third-party backends may not.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Log in / refresh session credentials. Called lazily on 403 and once
    /// at construction.
    async fn authenticate(&self) -> DownloaderResult<()>;

    /// Add a `.torrent` file to the downloader.
    async fn add_torrent(&self, request: AddTorrentRequest) -> DownloaderResult<()>;

    /// Report whether a torrent with the given hash is already known to the
    /// downloader.
    async fn exists(&self, hash: &str) -> DownloaderResult<bool>;

    /// List all torrents currently known to the downloader.
    async fn list_torrents(&self) -> DownloaderResult<Vec<DownloaderTorrent>>;

    /// Free disk space, in bytes, on the downloader's storage volume.
    async fn free_space(&self) -> DownloaderResult<u64>;

    /// Pause a torrent by hash.
    async fn pause(&self, hash: &str) -> DownloaderResult<()>;

    /// Delete a torrent by hash, optionally removing its on-disk data.
    async fn delete(&self, hash: &str, remove_data: bool) -> DownloaderResult<()>;

    /// Fetch a torrent's properties, or `None` if it is not known.
    async fn properties(&self, hash: &str) -> DownloaderResult<Option<TorrentProperties>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fake {
        known: AtomicBool,
    }

    #[async_trait]
    impl Downloader for Fake {
        async fn authenticate(&self) -> DownloaderResult<()> {
            Ok(())
        }

        async fn add_torrent(&self, _request: AddTorrentRequest) -> DownloaderResult<()> {
            self.known.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn exists(&self, _hash: &str) -> DownloaderResult<bool> {
            Ok(self.known.load(Ordering::SeqCst))
        }

        async fn list_torrents(&self) -> DownloaderResult<Vec<DownloaderTorrent>> {
            Ok(Vec::new())
        }

        async fn free_space(&self) -> DownloaderResult<u64> {
            Ok(u64::MAX)
        }

        async fn pause(&self, _hash: &str) -> DownloaderResult<()> {
            Ok(())
        }

        async fn delete(&self, _hash: &str, _remove_data: bool) -> DownloaderResult<()> {
            Ok(())
        }

        async fn properties(&self, _hash: &str) -> DownloaderResult<Option<TorrentProperties>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn add_then_exists_round_trips_through_trait_object() {
        let downloader: Box<dyn Downloader> = Box::new(Fake {
            known: AtomicBool::new(false),
        });
        assert!(!downloader.exists("abc").await.unwrap());
        downloader
            .add_torrent(AddTorrentRequest {
                torrent_bytes: vec![1, 2, 3],
                paused: true,
                save_path: "/downloads".into(),
                category: None,
                tags: Vec::new(),
            })
            .await
            .unwrap();
        assert!(downloader.exists("abc").await.unwrap());
    }
}

//! Recording fakes for the [`Downloader`] and [`SiteDriver`] capability
//! traits, used in place of a mocking framework by swapping in a fake trait
//! implementation — the same pattern used throughout this workspace's own
//! unit tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratioguard_core::{
    AddTorrentRequest, Decision, DownloaderError, DownloaderResult, DownloaderTorrent, FeedItem,
    SiteContext, SiteDriver, SiteError, SiteResult, TorrentCandidate, TorrentProperties,
};

/// A [`Downloader`](ratioguard_core::Downloader) fake that records every call
/// it receives and returns pre-programmed responses.
#[derive(Default)]
pub struct RecordingDownloader {
    /// Every `add_torrent` request received, in call order.
    pub add_torrent_calls: RwLock<Vec<AddTorrentRequest>>,
    /// Every `pause` call received, in call order.
    pub pause_calls: RwLock<Vec<String>>,
    /// Every `delete` call received, as `(hash, remove_data)`.
    pub delete_calls: RwLock<Vec<(String, bool)>>,
    /// Number of `authenticate` calls received.
    pub authenticate_calls: RwLock<u32>,
    /// Hashes this fake reports as already known via `exists`.
    pub known_hashes: RwLock<Vec<String>>,
    /// Free space reported by `free_space`, bytes.
    pub free_space_bytes: RwLock<u64>,
    /// Properties reported by `properties`, keyed by hash.
    pub properties: RwLock<HashMap<String, TorrentProperties>>,
    /// `(ratio, seeding_seconds, speed_bps)` reported by `list_torrents` for
    /// a given hash; defaults to `(0.0, 0, 0)` when unset.
    pub torrent_stats: RwLock<HashMap<String, (f64, i64, i64)>>,
    /// When set, `add_torrent` returns this error instead of succeeding.
    pub add_torrent_error: RwLock<Option<DownloaderErrorKind>>,
}

/// Cloneable stand-in for [`DownloaderError`], which does not implement
/// `Clone`, so a fake can hold a reusable programmed failure.
#[derive(Debug, Clone)]
pub enum DownloaderErrorKind {
    /// See [`DownloaderError::Request`].
    Request {
        /// HTTP status code to report.
        status: u16,
        /// Message to report.
        message: String,
    },
    /// See [`DownloaderError::Transport`].
    Transport(String),
}

impl From<DownloaderErrorKind> for DownloaderError {
    fn from(kind: DownloaderErrorKind) -> Self {
        match kind {
            DownloaderErrorKind::Request { status, message } => Self::Request { status, message },
            DownloaderErrorKind::Transport(message) => Self::Transport(message),
        }
    }
}

impl RecordingDownloader {
    /// Construct a fake with `free_space_bytes` worth of reported free space.
    #[must_use]
    pub fn with_free_space(free_space_bytes: u64) -> Self {
        Self {
            free_space_bytes: RwLock::new(free_space_bytes),
            ..Self::default()
        }
    }

    /// Program the next `add_torrent` call to fail with `kind`.
    pub fn fail_next_add_torrent(&self, kind: DownloaderErrorKind) {
        *self.add_torrent_error.write().expect("lock poisoned") = Some(kind);
    }

    /// Mark `hash` as already known to this fake, as if a prior push had
    /// succeeded or the downloader already had it.
    pub fn seed_known_hash(&self, hash: impl Into<String>) {
        self.known_hashes
            .write()
            .expect("lock poisoned")
            .push(hash.into());
    }

    /// Number of `add_torrent` calls received so far.
    #[must_use]
    pub fn add_torrent_call_count(&self) -> usize {
        self.add_torrent_calls.read().expect("lock poisoned").len()
    }

    /// Program the ratio/seed-time/speed `list_torrents` reports for `hash`.
    pub fn seed_torrent_stats(
        &self,
        hash: impl Into<String>,
        ratio: f64,
        seeding_seconds: i64,
        speed_bps: i64,
    ) {
        self.torrent_stats
            .write()
            .expect("lock poisoned")
            .insert(hash.into(), (ratio, seeding_seconds, speed_bps));
    }
}

#[async_trait]
impl ratioguard_core::Downloader for RecordingDownloader {
    async fn authenticate(&self) -> DownloaderResult<()> {
        *self.authenticate_calls.write().expect("lock poisoned") += 1;
        Ok(())
    }

    async fn add_torrent(&self, request: AddTorrentRequest) -> DownloaderResult<()> {
        if let Some(kind) = self.add_torrent_error.write().expect("lock poisoned").take() {
            return Err(kind.into());
        }
        let hash_seed = format!("{:x}", request.torrent_bytes.len());
        self.add_torrent_calls
            .write()
            .expect("lock poisoned")
            .push(request);
        self.known_hashes
            .write()
            .expect("lock poisoned")
            .push(hash_seed);
        Ok(())
    }

    async fn exists(&self, hash: &str) -> DownloaderResult<bool> {
        Ok(self
            .known_hashes
            .read()
            .expect("lock poisoned")
            .iter()
            .any(|known| known == hash))
    }

    async fn list_torrents(&self) -> DownloaderResult<Vec<DownloaderTorrent>> {
        let stats = self.torrent_stats.read().expect("lock poisoned");
        Ok(self
            .known_hashes
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|hash| {
                let (ratio, seeding_seconds, speed_bps) =
                    stats.get(hash).copied().unwrap_or((0.0, 0, 0));
                DownloaderTorrent {
                    hash: hash.clone(),
                    name: hash.clone(),
                    progress_percent: 100.0,
                    ratio,
                    seeding_seconds,
                    speed_bps,
                }
            })
            .collect())
    }

    async fn free_space(&self) -> DownloaderResult<u64> {
        Ok(*self.free_space_bytes.read().expect("lock poisoned"))
    }

    async fn pause(&self, hash: &str) -> DownloaderResult<()> {
        self.pause_calls
            .write()
            .expect("lock poisoned")
            .push(hash.to_string());
        Ok(())
    }

    async fn delete(&self, hash: &str, remove_data: bool) -> DownloaderResult<()> {
        self.delete_calls
            .write()
            .expect("lock poisoned")
            .push((hash.to_string(), remove_data));
        Ok(())
    }

    async fn properties(&self, hash: &str) -> DownloaderResult<Option<TorrentProperties>> {
        Ok(self
            .properties
            .read()
            .expect("lock poisoned")
            .get(hash)
            .cloned())
    }
}

/// A [`SiteDriver`] fake that serves a fixed feed and a map of pre-resolved
/// detail candidates, recording every call it receives.
#[derive(Default)]
pub struct RecordingSiteDriver {
    /// Feed items returned by `fetch_feed`.
    pub feed_items: RwLock<Vec<FeedItem>>,
    /// Detail candidates keyed by `FeedItem::guid`.
    pub details: RwLock<HashMap<String, TorrentCandidate>>,
    /// Every `fetch_detail` guid received, in call order.
    pub fetch_detail_calls: RwLock<Vec<String>>,
    /// Whether `is_enabled` reports the site as enabled.
    pub enabled: RwLock<bool>,
    /// When set, `fetch_feed` returns this error instead of the feed.
    pub feed_error: RwLock<Option<SiteErrorKind>>,
}

/// Cloneable stand-in for [`SiteError`], mirroring
/// [`DownloaderErrorKind`]'s purpose.
#[derive(Debug, Clone)]
pub enum SiteErrorKind {
    /// See [`SiteError::Feed`].
    Feed(String),
    /// See [`SiteError::Auth`].
    Auth,
    /// See [`SiteError::Site`].
    Site(u16),
}

impl RecordingSiteDriver {
    /// Construct an enabled fake with no feed items or details programmed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: RwLock::new(true),
            ..Self::default()
        }
    }

    /// Append a feed item and its resolved detail candidate.
    pub fn seed_item(&self, item: FeedItem, candidate: TorrentCandidate) {
        self.details
            .write()
            .expect("lock poisoned")
            .insert(item.guid.clone(), candidate);
        self.feed_items.write().expect("lock poisoned").push(item);
    }

    /// Program the next `fetch_feed` call to fail with `kind`.
    pub fn fail_feed(&self, kind: SiteErrorKind) {
        *self.feed_error.write().expect("lock poisoned") = Some(kind);
    }
}

#[async_trait]
impl SiteDriver for RecordingSiteDriver {
    async fn fetch_feed(&self, _ctx: &SiteContext, _url: &str) -> SiteResult<Vec<FeedItem>> {
        if let Some(kind) = self.feed_error.read().expect("lock poisoned").clone() {
            return Err(match kind {
                SiteErrorKind::Feed(message) => SiteError::Feed {
                    site: _ctx.site_id.clone(),
                    message,
                },
                SiteErrorKind::Auth => SiteError::Auth {
                    site: _ctx.site_id.clone(),
                },
                SiteErrorKind::Site(status) => SiteError::Site {
                    site: _ctx.site_id.clone(),
                    status,
                },
            });
        }
        Ok(self.feed_items.read().expect("lock poisoned").clone())
    }

    async fn fetch_detail(&self, ctx: &SiteContext, item: &FeedItem) -> SiteResult<TorrentCandidate> {
        self.fetch_detail_calls
            .write()
            .expect("lock poisoned")
            .push(item.guid.clone());
        self.details
            .read()
            .expect("lock poisoned")
            .get(&item.guid)
            .cloned()
            .ok_or_else(|| SiteError::Parse {
                site: ctx.site_id.clone(),
                message: format!("no detail fixture seeded for guid {}", item.guid),
            })
    }

    fn is_enabled(&self) -> bool {
        *self.enabled.read().expect("lock poisoned")
    }
}

/// Build a fully-free, feasible [`TorrentCandidate`] for quick test setup,
/// overridable via the returned struct's public fields.
#[must_use]
pub fn free_candidate(title: &str, torrent_id: &str, size_bytes: u64) -> TorrentCandidate {
    TorrentCandidate {
        title: title.to_string(),
        torrent_id: torrent_id.to_string(),
        size_bytes,
        free_level: ratioguard_core::DiscountLevel::Free,
        free_end_time: Some(Utc::now() + chrono::Duration::hours(24)),
        hr: false,
        sub_title: None,
        download_url: format!("https://example.test/dl/{torrent_id}"),
    }
}

/// Build a [`FeedItem`] whose `guid` and enclosure line up with
/// [`free_candidate`]'s `torrent_id`, for wiring a feed -> detail fixture pair.
#[must_use]
pub fn feed_item(guid: &str, title: &str) -> FeedItem {
    FeedItem {
        guid: guid.to_string(),
        title: title.to_string(),
        url: format!("https://example.test/detail/{guid}"),
        enclosure_url: None,
        categories: Vec::new(),
    }
}

/// A no-op [`Decision`] assertion helper: true when `decision` accepts.
#[must_use]
pub fn accepted(decision: &Decision) -> bool {
    decision.is_accept()
}

/// Reference timestamp used by fixtures that need a stable "now" without
/// calling `Utc::now()` from inside deterministic assertions.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .expect("valid fixed timestamp")
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratioguard_core::Downloader as _;

    #[tokio::test]
    async fn recording_downloader_tracks_add_torrent_calls() {
        let downloader = RecordingDownloader::with_free_space(100);
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
        assert_eq!(downloader.add_torrent_call_count(), 1);
        assert_eq!(downloader.free_space().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn recording_downloader_honours_programmed_failure() {
        let downloader = RecordingDownloader::default();
        downloader.fail_next_add_torrent(DownloaderErrorKind::Request {
            status: 503,
            message: "busy".into(),
        });
        let err = downloader
            .add_torrent(AddTorrentRequest {
                torrent_bytes: vec![1],
                paused: true,
                save_path: "/downloads".into(),
                category: None,
                tags: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DownloaderError::Request { status: 503, .. }));
        assert_eq!(downloader.add_torrent_call_count(), 0);
    }

    #[tokio::test]
    async fn recording_site_driver_serves_seeded_feed_and_detail() {
        let driver = RecordingSiteDriver::new();
        let item = feed_item("guid-1", "Demo.Title");
        let candidate = free_candidate("Demo Title", "1", 1_000_000);
        driver.seed_item(item.clone(), candidate);

        let ctx = SiteContext {
            site_id: "demo".into(),
            api_url: None,
            cookie: None,
            api_key: None,
            passkey: None,
        };
        let feed = driver.fetch_feed(&ctx, "https://example.test/rss").await.unwrap();
        assert_eq!(feed.len(), 1);

        let resolved = driver.fetch_detail(&ctx, &item).await.unwrap();
        assert_eq!(resolved.torrent_id, "1");
        assert_eq!(driver.fetch_detail_calls.read().unwrap().len(), 1);
    }
}

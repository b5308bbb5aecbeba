//! `TorrentPipeline`: the per-candidate state machine that turns a feed item
//! into a pushed (or skipped, or deferred) torrent.
//!
//! Every mutating step upserts `(site_name, torrent_id)` before any network
//! call that could fail, then performs the network call, then writes the
//! observed result — HTTP calls never happen inside a DB transaction.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use ratioguard_config::{Config, ConfigService, RssSubscription, Site};
use ratioguard_core::{
    AddTorrentRequest, Decision, DiscountLevel, FeedItem, FilterEngine, SiteContext, SiteDriver,
};
use ratioguard_data::torrents::DiscoveredTorrent;
use ratioguard_downloader::DownloaderManager;
use ratioguard_events::Event;
use ratioguard_fetch::{bencode, sanitize_title, FetchClient};
use ratioguard_ratelimit::RateLimiter;
use ratioguard_telemetry::Metrics;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Errors raised while processing a single candidate. Every variant is
/// non-fatal to the worker: the subscription simply moves on to the next
/// item and the row is revisited on a future tick.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The site driver failed to resolve the candidate's detail page.
    #[error("site error: {0}")]
    Site(#[from] ratioguard_core::SiteError),
    /// The candidate was rejected by the filter engine or the free-only gate.
    #[error("candidate rejected: {0}")]
    Rejected(String),
    /// The candidate cannot finish inside its remaining promo window.
    #[error("candidate cannot finish within its free window")]
    Infeasible,
    /// Acquiring a rate-limit slot failed.
    #[error("rate limiter error: {0}")]
    RateLimit(#[from] ratioguard_ratelimit::RateLimitError),
    /// Fetching or writing the `.torrent` file failed after all retries.
    #[error("download failed: {0}")]
    Download(#[from] ratioguard_fetch::FetchError),
    /// The downloader rejected the push.
    #[error("downloader error: {0}")]
    Downloader(#[from] ratioguard_core::DownloaderError),
    /// No downloader is configured for this subscription.
    #[error("no downloader configured for this subscription")]
    NoDownloader,
    /// Free disk space on the target downloader is below the configured
    /// floor; the push was skipped for this round.
    #[error("free disk space below configured floor")]
    DiskLow,
    /// A persistence operation against `ConfigStore` failed.
    #[error("persistence failed: {0}")]
    Data(#[from] ratioguard_config::ConfigError),
}

/// Terminal result of a single `Process` call, used by the worker for
/// logging and metrics; never surfaced as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The row was marked skipped this round, with a human-readable reason.
    Skipped(String),
    /// The row was pushed (or adopted) onto the downloader, with its hash.
    Pushed(String),
}

/// The torrent acquisition and push state machine.
pub struct TorrentPipeline {
    config: Arc<ConfigService>,
    fetch: Arc<FetchClient>,
    downloaders: Arc<DownloaderManager>,
    metrics: Arc<Metrics>,
}

impl TorrentPipeline {
    /// Build a pipeline over the given shared dependencies.
    #[must_use]
    pub const fn new(
        config: Arc<ConfigService>,
        fetch: Arc<FetchClient>,
        downloaders: Arc<DownloaderManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            fetch,
            downloaders,
            metrics,
        }
    }

    /// Process one feed item end to end: detail resolution, filtering,
    /// feasibility, download, and push.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] for any non-terminal failure; callers
    /// should log and continue rather than abort the worker loop.
    #[instrument(skip(self, driver, rate_limiter, snapshot, item, cancel), fields(site = %site.id, guid = %item.guid))]
    #[allow(clippy::too_many_arguments)]
    pub async fn process(
        &self,
        site: &Site,
        ctx: &SiteContext,
        subscription: &RssSubscription,
        driver: &dyn SiteDriver,
        rate_limiter: &RateLimiter,
        snapshot: &Config,
        item: FeedItem,
        cancel: &CancellationToken,
    ) -> Result<Outcome, PipelineError> {
        rate_limiter.acquire(&site.id, cancel).await?;
        let candidate = driver.fetch_detail(ctx, &item).await?;

        let rules: Vec<_> = snapshot
            .filter_rules_for_subscription(subscription.id)
            .into_iter()
            .map(|rule| ratioguard_core::FilterRule {
                id: rule.id,
                name: rule.name.clone(),
                enabled: rule.enabled,
                predicate: rule.predicate.clone(),
            })
            .collect();
        let tags: Vec<String> = subscription.tag.clone().into_iter().collect();
        let decision = FilterEngine::evaluate(
            &candidate,
            subscription.category.as_deref(),
            &tags,
            &rules,
        );

        let row_id = self
            .discover(site, subscription, &candidate, &item)
            .await?;

        let Decision::Accept = decision else {
            let reason = match decision {
                Decision::Reject { reason } => reason,
                Decision::Accept => unreachable!("handled above"),
            };
            self.config.mark_torrent_skipped(row_id, &reason).await?;
            self.metrics.inc_torrent_skipped(&site.id, &reason);
            self.publish_skipped(site, &candidate.torrent_id, &reason);
            return Ok(Outcome::Skipped(reason));
        };

        if !is_feasible(&candidate, &snapshot.global) {
            let reason = "free window too short for configured speed/size limits".to_string();
            self.config.mark_torrent_skipped(row_id, &reason).await?;
            self.metrics.inc_torrent_skipped(&site.id, &reason);
            self.publish_skipped(site, &candidate.torrent_id, &reason);
            return Ok(Outcome::Skipped(reason));
        }

        self.metrics.inc_torrent_discovered(&site.id);

        let save_dir = subscription_dir(&snapshot.global.download_dir, subscription);
        let bytes = match self.fetch.fetch(&candidate.download_url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.config
                    .record_torrent_download_failure(row_id, &err.to_string())
                    .await?;
                return Err(err.into());
            }
        };
        let path = ratioguard_fetch::write_torrent(&save_dir, &candidate.title, &bytes).await?;
        let hash = match bencode::info_hash(&bytes) {
            Ok(digest) => hex::encode(digest),
            Err(err) => {
                let _ = ratioguard_fetch::remove_torrent(&path).await;
                self.config
                    .record_torrent_download_failure(row_id, &err.to_string())
                    .await?;
                return Err(err.into());
            }
        };
        self.config.mark_torrent_downloaded(row_id, &hash).await?;
        self.metrics.inc_torrent_downloaded(&site.id);
        self.config.events().publish(Event::TorrentDownloaded {
            site: site.id.clone(),
            torrent_id: candidate.torrent_id.clone(),
            hash: hash.clone(),
        });

        self.push(
            site,
            subscription,
            snapshot,
            row_id,
            &candidate.torrent_id,
            &hash,
            &path,
            &bytes,
        )
        .await
    }

    async fn discover(
        &self,
        site: &Site,
        subscription: &RssSubscription,
        candidate: &ratioguard_core::TorrentCandidate,
        item: &FeedItem,
    ) -> Result<i64, PipelineError> {
        let free_level = serde_json::to_value(candidate.free_level)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "none".to_string());
        let category = subscription
            .category
            .as_deref()
            .or_else(|| item.categories.first().map(String::as_str));
        let discovered = DiscoveredTorrent {
            site_name: &site.id,
            torrent_id: &candidate.torrent_id,
            title: &candidate.title,
            category,
            tag: subscription.tag.as_deref(),
            free_level: &free_level,
            free_end_time: candidate.free_end_time,
            hr: candidate.hr,
            size_bytes: i64::try_from(candidate.size_bytes).unwrap_or(i64::MAX),
            download_source: &candidate.download_url,
        };
        let id = self.config.upsert_discovered_torrent(&discovered).await?;
        self.config
            .events()
            .publish(Event::TorrentDiscovered {
                site: site.id.clone(),
                torrent_id: candidate.torrent_id.clone(),
            });
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn push(
        &self,
        site: &Site,
        subscription: &RssSubscription,
        snapshot: &Config,
        row_id: i64,
        torrent_id: &str,
        hash: &str,
        path: &Path,
        bytes: &[u8],
    ) -> Result<Outcome, PipelineError> {
        let downloader_id = snapshot
            .effective_downloader_id(subscription)
            .ok_or(PipelineError::NoDownloader)?
            .to_string();
        let downloader = self
            .downloaders
            .resolve(&downloader_id)
            .ok_or(PipelineError::NoDownloader)?;

        if snapshot.global.cleanup_disk_protect {
            let free_bytes = downloader.free_space().await?;
            let min_floor_bytes = (snapshot.global.min_disk_space_gb * 1_073_741_824.0) as u64;
            if free_bytes < min_floor_bytes {
                self.config.events().publish(Event::DiskSpaceLow {
                    downloader_id: downloader_uuid(&downloader_id),
                    free_bytes,
                    threshold_bytes: min_floor_bytes,
                });
                return Err(PipelineError::DiskLow);
            }
        }

        if downloader.exists(hash).await? {
            let _ = ratioguard_fetch::remove_torrent(path).await;
            self.config.mark_torrent_pushed(row_id).await?;
            self.publish_pushed(site, &downloader_id, torrent_id, hash);
            return Ok(Outcome::Pushed(hash.to_string()));
        }

        let tag_dir = subscription
            .download_path
            .clone()
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| {
                subscription
                    .tag
                    .clone()
                    .unwrap_or_else(|| subscription.site_id.clone())
            });
        let request = AddTorrentRequest {
            torrent_bytes: bytes.to_vec(),
            paused: !downloader_auto_starts(snapshot, &downloader_id),
            save_path: tag_dir,
            category: subscription.category.clone(),
            tags: subscription.tag.clone().into_iter().collect(),
        };

        if let Err(err) = downloader.add_torrent(request).await {
            self.config
                .record_torrent_push_failure(row_id, &err.to_string())
                .await?;
            self.config.events().publish(Event::PushFailed {
                site: site.id.clone(),
                torrent_id: torrent_id.to_string(),
                message: err.to_string(),
            });
            return Err(err.into());
        }

        let _ = ratioguard_fetch::remove_torrent(path).await;
        self.config.mark_torrent_pushed(row_id).await?;
        self.publish_pushed(site, &downloader_id, torrent_id, hash);
        Ok(Outcome::Pushed(hash.to_string()))
    }

    fn publish_skipped(&self, site: &Site, torrent_id: &str, reason: &str) {
        self.config.events().publish(Event::TorrentSkipped {
            site: site.id.clone(),
            torrent_id: torrent_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn publish_pushed(&self, site: &Site, downloader_id: &str, torrent_id: &str, hash: &str) {
        self.metrics.inc_torrent_pushed(downloader_id, "ok");
        self.config.events().publish(Event::TorrentPushed {
            site: site.id.clone(),
            torrent_id: torrent_id.to_string(),
            hash: hash.to_string(),
        });
    }
}

fn downloader_auto_starts(snapshot: &Config, downloader_id: &str) -> bool {
    snapshot
        .downloaders
        .iter()
        .find(|d| d.id == downloader_id)
        .is_some_and(|d| d.auto_start)
}

/// Derive a deterministic UUID from a downloader's stable string id, since
/// [`Event::DiskSpaceLow`] is keyed on a UUID but downloader ids in this
/// store are human-chosen strings (`"qbit-1"`, not a UUID).
fn downloader_uuid(downloader_id: &str) -> uuid::Uuid {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, downloader_id.as_bytes())
}

/// `EffectiveSize(size, discount) / max(1, speed_limit_bps) <= remaining_free_time - min_free_minutes`.
/// Non-free levels always report feasible; the free-only gate in
/// `FilterEngine` is what actually blocks them absent a widening rule.
fn is_feasible(candidate: &ratioguard_core::TorrentCandidate, global: &ratioguard_config::GlobalSettings) -> bool {
    if !candidate.free_level.is_fully_free() && candidate.free_level != DiscountLevel::None {
        return true;
    }
    if global.torrent_size_gb_max > 0.0 {
        let size_gb = candidate.size_bytes as f64 / 1_073_741_824.0;
        if size_gb > global.torrent_size_gb_max {
            return false;
        }
    }
    let Some(end_time) = candidate.free_end_time else {
        return true;
    };
    let remaining_minutes = (end_time - Utc::now()).num_minutes();
    if remaining_minutes <= global.min_free_minutes {
        return false;
    }
    if !global.download_limit_enabled || global.download_speed_limit_bps <= 0 {
        return true;
    }
    let effective_size = candidate.size_bytes as f64 * candidate.free_level.ratio_cost_fraction().max(1.0);
    let eta_seconds = effective_size / global.download_speed_limit_bps as f64;
    let available_seconds = ((remaining_minutes - global.min_free_minutes) * 60) as f64;
    eta_seconds <= available_seconds
}

fn subscription_dir(base: &str, subscription: &RssSubscription) -> std::path::PathBuf {
    if let Some(path) = subscription
        .download_path
        .as_deref()
        .filter(|path| !path.is_empty())
    {
        return std::path::PathBuf::from(path);
    }
    let tag = subscription.tag.as_deref().unwrap_or(&subscription.site_id);
    std::path::Path::new(base).join(sanitize_title(tag))
}

mod hex {
    pub fn encode(bytes: [u8; 20]) -> String {
        let mut out = String::with_capacity(40);
        for byte in bytes {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratioguard_config::model::{Downloader, GlobalSettings};
    use ratioguard_core::DiscountLevel;
    use std::sync::Arc as StdArc;

    fn global(overrides: impl FnOnce(&mut GlobalSettings)) -> GlobalSettings {
        let mut settings = GlobalSettings {
            download_dir: "/tmp/ratioguard".to_string(),
            default_interval_minutes: 15,
            default_enabled: true,
            download_limit_enabled: false,
            download_speed_limit_bps: 0,
            torrent_size_gb_max: 0.0,
            min_free_minutes: 30,
            max_retry: 3,
            retain_hours: 24,
            cleanup_interval_min: 10,
            cleanup_protect_hr: true,
            cleanup_protect_tags: Vec::new(),
            cleanup_disk_protect: true,
            min_disk_space_gb: 5.0,
            cleanup_max_seed_time_h: 0.0,
            cleanup_min_ratio: 0.0,
            cleanup_max_inactive_h: 0.0,
            cleanup_slow_speed_bps: 0,
            cleanup_slow_hours: 0.0,
            cleanup_condition_mode: "any".to_string(),
            auto_delete_on_free_end: false,
            auto_start: true,
            revision: 1,
        };
        overrides(&mut settings);
        settings
    }

    fn free_candidate(size_bytes: u64, minutes_left: i64) -> ratioguard_core::TorrentCandidate {
        ratioguard_core::TorrentCandidate {
            title: "Demo".to_string(),
            torrent_id: "1".to_string(),
            size_bytes,
            free_level: DiscountLevel::Free,
            free_end_time: Some(Utc::now() + chrono::Duration::minutes(minutes_left)),
            hr: false,
            sub_title: None,
            download_url: "https://example.test/dl/1".to_string(),
        }
    }

    #[test]
    fn infeasible_when_remaining_time_below_floor() {
        let candidate = free_candidate(1_000_000, 10);
        let settings = global(|_| {});
        assert!(!is_feasible(&candidate, &settings));
    }

    #[test]
    fn feasible_when_size_and_time_fit_speed_budget() {
        let candidate = free_candidate(1_000_000, 120);
        let settings = global(|g| {
            g.download_limit_enabled = true;
            g.download_speed_limit_bps = 10_000_000;
        });
        assert!(is_feasible(&candidate, &settings));
    }

    #[test]
    fn oversize_candidate_is_infeasible_regardless_of_time() {
        let candidate = free_candidate(20 * 1_073_741_824, 600);
        let settings = global(|g| g.torrent_size_gb_max = 10.0);
        assert!(!is_feasible(&candidate, &settings));
    }

    #[test]
    fn non_free_levels_are_always_feasible() {
        let mut candidate = free_candidate(1_000_000, 1);
        candidate.free_level = DiscountLevel::Percent50;
        let settings = global(|_| {});
        assert!(is_feasible(&candidate, &settings));
    }

    #[test]
    fn downloader_auto_start_resolves_by_id() {
        let snapshot = Config {
            global: global(|_| {}),
            downloaders: vec![Downloader {
                id: "qbit-1".to_string(),
                name: "qbit".to_string(),
                kind: "qbittorrent".to_string(),
                url: "http://localhost:8080".to_string(),
                username: None,
                password: None,
                enabled: true,
                is_default: true,
                auto_start: true,
            }],
            sites: Vec::new(),
            subscriptions: Vec::new(),
            filter_rules: Vec::new(),
            loaded_at: Utc::now(),
        };
        assert!(downloader_auto_starts(&snapshot, "qbit-1"));
        assert!(!downloader_auto_starts(&snapshot, "missing"));
        let _ = StdArc::new(());
    }

    #[test]
    fn downloader_uuid_is_deterministic() {
        assert_eq!(downloader_uuid("qbit-1"), downloader_uuid("qbit-1"));
        assert_ne!(downloader_uuid("qbit-1"), downloader_uuid("qbit-2"));
    }
}

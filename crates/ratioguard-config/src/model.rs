//! Domain view of configuration, assembled from `ratioguard-data` row
//! projections into the shape the rest of the engine consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Singleton runtime policy, one row in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Root directory `.torrent` files and payloads are written under.
    pub download_dir: String,
    /// Default RSS poll interval for subscriptions that don't override it.
    pub default_interval_minutes: i64,
    /// Default `enabled` value applied to newly created subscriptions.
    pub default_enabled: bool,
    /// Whether a global download speed cap is enforced.
    pub download_limit_enabled: bool,
    /// Global download speed cap, bytes/sec.
    pub download_speed_limit_bps: i64,
    /// Maximum torrent size accepted, in GB (`0` = unlimited).
    pub torrent_size_gb_max: f64,
    /// Minimum remaining free-promo minutes required to accept a candidate.
    pub min_free_minutes: i64,
    /// Maximum download retry attempts before a candidate is abandoned.
    pub max_retry: i64,
    /// Hours a pushed torrent is retained before cleanup may purge it.
    pub retain_hours: i64,
    /// Interval between `CleanupMonitor` sweeps, minutes.
    pub cleanup_interval_min: i64,
    /// Hit-and-run protected torrents are never purged by cleanup.
    pub cleanup_protect_hr: bool,
    /// Tags exempt from cleanup purge regardless of other conditions.
    pub cleanup_protect_tags: Vec<String>,
    /// Whether disk-space pressure can trigger cleanup independent of age.
    pub cleanup_disk_protect: bool,
    /// Free disk space floor, GB, below which disk-pressure cleanup engages.
    pub min_disk_space_gb: f64,
    /// Maximum seed time before cleanup considers a torrent eligible, hours.
    pub cleanup_max_seed_time_h: f64,
    /// Minimum ratio a torrent must reach before cleanup considers it done.
    pub cleanup_min_ratio: f64,
    /// Maximum inactivity before cleanup considers a torrent stalled, hours.
    pub cleanup_max_inactive_h: f64,
    /// Speed, bytes/sec, below which a torrent is considered slow.
    pub cleanup_slow_speed_bps: i64,
    /// Hours a torrent must sustain slow speed before cleanup acts on it.
    pub cleanup_slow_hours: f64,
    /// How multiple cleanup conditions combine (`"any"` or `"all"`).
    pub cleanup_condition_mode: String,
    /// Whether a torrent is auto-deleted the moment its promo window ends.
    pub auto_delete_on_free_end: bool,
    /// Whether pushed torrents start immediately in the downloader.
    pub auto_start: bool,
    /// Monotonic revision bumped on every write, used for `ConfigChanged`.
    pub revision: i64,
}

/// A configured downloader backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Downloader {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Backend kind (`qbittorrent`, `transmission`).
    pub kind: String,
    /// Base URL of the backend's RPC endpoint.
    pub url: String,
    /// Username, if the backend requires one.
    pub username: Option<String>,
    /// Password, if the backend requires one.
    pub password: Option<String>,
    /// Whether this downloader currently participates in pushes.
    pub enabled: bool,
    /// Whether this is the default downloader for its `kind`.
    pub is_default: bool,
    /// Whether torrents pushed to this downloader start immediately.
    pub auto_start: bool,
}

/// A tracker a `SiteDriver` talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// Stable lowercase identifier, `[a-z][a-z0-9_-]*`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Schema variant (`NexusPHP`, `mTorrent`, `Unit3D`, ...).
    pub schema: String,
    /// Feed/detail page base URLs.
    pub urls: Vec<String>,
    /// Declared authentication method.
    pub auth_method: String,
    /// Cookie header value, when `auth_method` requires one.
    pub cookie: Option<String>,
    /// API key, when `auth_method` requires one.
    pub api_key: Option<String>,
    /// Passkey, when `auth_method` requires one.
    pub passkey: Option<String>,
    /// Detail/API base URL, required unless the schema has a known default.
    pub api_url: Option<String>,
    /// Whether this site currently participates in polling.
    pub enabled: bool,
    /// Requests/sec this site's `RateLimiter` enforces.
    pub rate_limit_per_sec: f64,
    /// Whether this site ships with the engine and cannot be deleted.
    pub is_builtin: bool,
    /// Downloader subscriptions on this site push to by default.
    pub downloader_id: Option<String>,
    /// Monotonic revision bumped on every write.
    pub revision: i64,
}

/// A polled RSS/Atom feed bound to a site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssSubscription {
    /// Stable identifier.
    pub id: i64,
    /// Owning site.
    pub site_id: String,
    /// Display name.
    pub name: String,
    /// Feed URL, unique within the site, case-insensitive.
    pub url: String,
    /// Category label applied to discovered candidates.
    pub category: Option<String>,
    /// Free-text tag; used as the download sub-directory when
    /// `download_path` is empty.
    pub tag: Option<String>,
    /// Poll interval, clamped to `[MIN_INTERVAL, 1440]`.
    pub interval_minutes: i64,
    /// Downloader override; `None` means "use the site/kind default".
    pub downloader_id: Option<String>,
    /// Absolute download path override; empty means `base/<tag>`.
    pub download_path: Option<String>,
    /// Whether this subscription pauses its pushed torrents once the
    /// promotional window ends.
    pub pause_on_free_end: bool,
    /// Whether this subscription currently polls.
    pub enabled: bool,
    /// Filter rules bound to this subscription.
    pub filter_rule_ids: Vec<i64>,
}

/// A named filter predicate, reused across subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    /// Stable identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Whether this rule currently participates in evaluation.
    pub enabled: bool,
    /// Predicate, as understood by `ratioguard_core::filter::FilterEngine`.
    pub predicate: ratioguard_core::FilterPredicate,
}

/// Immutable point-in-time view over the whole store, assembled by
/// [`crate::ConfigService::load_snapshot`].
///
/// Downstream consumers (the scheduler, pipeline) never read the live
/// database directly; they react to `ConfigChanged` and re-load a fresh
/// snapshot, keeping config reads out of the hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Singleton runtime policy.
    pub global: GlobalSettings,
    /// Configured downloader backends.
    pub downloaders: Vec<Downloader>,
    /// Configured tracker sites.
    pub sites: Vec<Site>,
    /// Configured RSS subscriptions across all sites.
    pub subscriptions: Vec<RssSubscription>,
    /// Configured filter rules.
    pub filter_rules: Vec<FilterRule>,
    /// Wall-clock instant the snapshot was assembled.
    pub loaded_at: DateTime<Utc>,
}

impl Config {
    /// Subscriptions belonging to `site_id`.
    #[must_use]
    pub fn subscriptions_for_site<'a>(
        &'a self,
        site_id: &'a str,
    ) -> impl Iterator<Item = &'a RssSubscription> {
        self.subscriptions
            .iter()
            .filter(move |sub| sub.site_id == site_id)
    }

    /// Filter rules bound to `subscription_id`.
    #[must_use]
    pub fn filter_rules_for_subscription(&self, subscription_id: i64) -> Vec<&FilterRule> {
        let Some(sub) = self.subscriptions.iter().find(|s| s.id == subscription_id) else {
            return Vec::new();
        };
        self.filter_rules
            .iter()
            .filter(|rule| sub.filter_rule_ids.contains(&rule.id))
            .collect()
    }

    /// Resolve the effective downloader id for a subscription: its own
    /// override, then its site's default, then the backend-kind default.
    #[must_use]
    pub fn effective_downloader_id(&self, subscription: &RssSubscription) -> Option<&str> {
        if let Some(id) = subscription.downloader_id.as_deref() {
            return Some(id);
        }
        let site = self.sites.iter().find(|s| s.id == subscription.site_id)?;
        if let Some(id) = site.downloader_id.as_deref() {
            return Some(id);
        }
        self.downloaders
            .iter()
            .find(|d| d.is_default && d.enabled)
            .map(|d| d.id.as_str())
    }
}

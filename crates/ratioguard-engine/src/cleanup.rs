//! `CleanupMonitor`: periodic and disk-pressure-triggered sweeps over pushed
//! torrents.
//!
//! Each pushed row is evaluated in a fixed priority order: hit-and-run
//! protection, tag protection, free-end auto-delete, pause-on-free-end,
//! retention, then ratio/seed-time/inactivity policy. Free-end auto-delete
//! and pause-on-free-end both additionally require the downloader to report
//! the torrent as not yet complete: deleting or pausing a finished download
//! at free-end is never correct. Retention is its own standalone purge
//! trigger keyed on `last_check_time`, independent of the ratio/seed policy.
//! After every row has been evaluated, a final disk-emergency pass walks
//! each downloader's still-eligible rows oldest-first, deleting greedily and
//! re-measuring free space after every delete until a buffer target above
//! `min_disk_space_gb` is reached. The first applicable action wins; later
//! steps are skipped for that row this sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ratioguard_config::{Config, ConfigService, GlobalSettings, RssSubscription};
use ratioguard_core::DownloaderTorrent;
use ratioguard_data::torrents::TorrentInfoRow;
use ratioguard_downloader::DownloaderManager;
use ratioguard_events::Event;
use ratioguard_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Sweep interval used before the first snapshot load succeeds.
const DEFAULT_INTERVAL_SECS: u64 = 600;

/// Bytes per gibibyte, used to convert `GlobalSettings`' GB-denominated
/// thresholds to the byte counts `Downloader::free_space` reports.
const GIB: f64 = 1_073_741_824.0;

/// Owns the periodic retention/ratio sweep and reacts to `DiskSpaceLow`
/// events with an immediate out-of-band pass.
pub struct CleanupMonitor {
    config: Arc<ConfigService>,
    downloaders: Arc<DownloaderManager>,
    metrics: Arc<Metrics>,
}

impl CleanupMonitor {
    /// Build a monitor over `config`'s persisted torrent state.
    #[must_use]
    pub const fn new(
        config: Arc<ConfigService>,
        downloaders: Arc<DownloaderManager>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            downloaders,
            metrics,
        }
    }

    /// Run the sweep loop until `cancel` fires.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: CancellationToken) {
        let mut stream = self.config.events().subscribe(None);
        let mut interval_secs = DEFAULT_INTERVAL_SECS;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => {
                    match next {
                        Some(envelope) if matches!(envelope.event, Event::DiskSpaceLow { .. }) => {
                            self.sweep_once().await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                () = tokio::time::sleep(Duration::from_secs(interval_secs)) => {
                    interval_secs = self.sweep_once().await;
                }
            }
        }
    }

    /// Load a fresh snapshot, sweep once, and return the interval to wait
    /// before the next routine sweep.
    async fn sweep_once(&self) -> u64 {
        let snapshot = match self.config.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "failed to load config snapshot for cleanup sweep");
                return DEFAULT_INTERVAL_SECS;
            }
        };
        let rows = match self.config.list_active_pushed_torrents().await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "failed to list pushed torrents for cleanup sweep");
                return interval_secs_from(&snapshot.global);
            }
        };
        self.sweep(&snapshot, rows).await;
        interval_secs_from(&snapshot.global)
    }

    async fn sweep(&self, snapshot: &Config, rows: Vec<TorrentInfoRow>) {
        let now = Utc::now();

        let mut candidates = rows;
        candidates.sort_by_key(|row| row.push_time);

        let mut purged = HashSet::new();
        for row in &candidates {
            if self.evaluate_row(snapshot, row, now).await {
                purged.insert(row.id);
            }
        }

        self.disk_emergency_sweep(snapshot, &candidates, &purged)
            .await;
    }

    /// Evaluate a single row against steps 1-6 of the priority order.
    /// Returns `true` if the row was purged.
    async fn evaluate_row(
        &self,
        snapshot: &Config,
        row: &TorrentInfoRow,
        now: chrono::DateTime<Utc>,
    ) -> bool {
        let Some(hash) = row.torrent_hash.as_deref() else {
            return false;
        };
        if is_protected(snapshot, row) {
            return false;
        }

        let Some(downloader_id) = resolve_downloader_for_row(snapshot, row) else {
            return false;
        };
        let Some(downloader) = self.downloaders.resolve(&downloader_id) else {
            return false;
        };

        let free_end_passed = row.free_end_time.is_some_and(|end| end <= now);
        if free_end_passed {
            let complete = self.torrent_is_complete(downloader.as_ref(), hash).await;
            if !complete {
                if snapshot.global.auto_delete_on_free_end {
                    self.purge(row, hash, downloader.as_ref(), "free_end_auto_delete")
                        .await;
                    return true;
                }
                if subscription_pauses_on_free_end(snapshot, row) {
                    match downloader.pause(hash).await {
                        Ok(()) => {
                            self.metrics.inc_cleanup_action("pause_on_free_end", "ok");
                            self.config.events().publish(Event::FreeEndReached {
                                site: row.site_name.clone(),
                                torrent_id: row.torrent_id.clone(),
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, hash, "failed to pause torrent at free-end");
                            self.metrics.inc_cleanup_action("pause_on_free_end", "error");
                        }
                    }
                    return false;
                }
            }
        }

        let retain_age_hours = (now - row.last_check_time).num_seconds() as f64 / 3600.0;
        if retain_age_hours > snapshot.global.retain_hours as f64 {
            self.purge(row, hash, downloader.as_ref(), "retention").await;
            return true;
        }

        if let Some(push_time) = row.push_time {
            let age_hours = (now - push_time).num_seconds() as f64 / 3600.0;
            let stats = match downloader.list_torrents().await {
                Ok(list) => list.into_iter().find(|t| t.hash.eq_ignore_ascii_case(hash)),
                Err(err) => {
                    warn!(error = %err, hash, "failed to list downloader torrents during cleanup sweep");
                    None
                }
            };
            if let Some(stats) = stats {
                if policy_satisfied(&snapshot.global, &stats, age_hours) {
                    self.purge(row, hash, downloader.as_ref(), "ratio_or_seed_policy")
                        .await;
                    return true;
                }
            }
        }

        false
    }

    /// Report whether the downloader considers `hash` fully downloaded.
    /// Unknown or unreachable torrents are treated as complete so a
    /// free-end action never deletes or pauses data we can't confirm is
    /// still in flight.
    async fn torrent_is_complete(
        &self,
        downloader: &dyn ratioguard_core::Downloader,
        hash: &str,
    ) -> bool {
        match downloader.properties(hash).await {
            Ok(Some(properties)) => properties.is_complete,
            Ok(None) => true,
            Err(err) => {
                warn!(error = %err, hash, "failed to fetch torrent properties during cleanup sweep");
                true
            }
        }
    }

    /// Step 7: for every downloader still below its disk-emergency buffer
    /// target, delete eligible rows oldest-push-time-first, re-measuring
    /// free space after every delete and stopping as soon as the target is
    /// reached.
    async fn disk_emergency_sweep(
        &self,
        snapshot: &Config,
        rows: &[TorrentInfoRow],
        purged: &HashSet<i64>,
    ) {
        if !snapshot.global.cleanup_disk_protect {
            return;
        }
        let target_bytes = disk_emergency_target_bytes(snapshot.global.min_disk_space_gb);

        for downloader_cfg in &snapshot.downloaders {
            let Some(downloader) = self.downloaders.resolve(&downloader_cfg.id) else {
                continue;
            };

            let mut candidates: Vec<&TorrentInfoRow> = rows
                .iter()
                .filter(|row| !purged.contains(&row.id))
                .filter(|row| row.torrent_hash.is_some())
                .filter(|row| !is_protected(snapshot, row))
                .filter(|row| {
                    resolve_downloader_for_row(snapshot, row).as_deref()
                        == Some(downloader_cfg.id.as_str())
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by_key(|row| row.push_time);

            for row in candidates {
                let free_bytes = match downloader.free_space().await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(error = %err, downloader = %downloader_cfg.id, "failed to read free space during disk-emergency sweep");
                        break;
                    }
                };
                if free_bytes >= target_bytes {
                    break;
                }
                let hash = row
                    .torrent_hash
                    .as_deref()
                    .expect("filtered to rows with a hash above");
                self.purge(row, hash, downloader.as_ref(), "disk_pressure")
                    .await;
            }
        }
    }

    async fn purge(
        &self,
        row: &TorrentInfoRow,
        hash: &str,
        downloader: &dyn ratioguard_core::Downloader,
        reason: &str,
    ) {
        if let Err(err) = downloader.delete(hash, true).await {
            warn!(error = %err, hash, reason, "failed to delete torrent from downloader");
            self.metrics.inc_cleanup_action(reason, "error");
            return;
        }
        if let Err(err) = self.config.mark_torrent_purged(row.id).await {
            warn!(error = %err, hash, "failed to mark torrent purged");
        }
        self.metrics.inc_cleanup_action(reason, "ok");
    }
}

fn interval_secs_from(global: &GlobalSettings) -> u64 {
    global.cleanup_interval_min.max(1) as u64 * 60
}

/// Free space a downloader must reach before disk-emergency cleanup stops:
/// the configured floor plus a buffer of 20% of the floor or 10 GB,
/// whichever is larger.
fn disk_emergency_target_bytes(min_disk_space_gb: f64) -> u64 {
    let buffer_gb = (min_disk_space_gb * 0.2).max(10.0);
    ((min_disk_space_gb + buffer_gb) * GIB).max(0.0) as u64
}

fn is_protected(snapshot: &Config, row: &TorrentInfoRow) -> bool {
    if snapshot.global.cleanup_protect_hr && row.hr {
        return true;
    }
    if let Some(tag) = row.tag.as_deref() {
        if snapshot
            .global
            .cleanup_protect_tags
            .iter()
            .any(|protected| protected == tag)
        {
            return true;
        }
    }
    false
}

fn matching_subscription<'a>(
    snapshot: &'a Config,
    row: &TorrentInfoRow,
) -> Option<&'a RssSubscription> {
    snapshot
        .subscriptions_for_site(&row.site_name)
        .find(|sub| sub.tag.as_deref() == row.tag.as_deref())
        .or_else(|| snapshot.subscriptions_for_site(&row.site_name).next())
}

fn resolve_downloader_for_row(snapshot: &Config, row: &TorrentInfoRow) -> Option<String> {
    if let Some(sub) = matching_subscription(snapshot, row) {
        if let Some(id) = snapshot.effective_downloader_id(sub) {
            return Some(id.to_string());
        }
    }
    snapshot
        .sites
        .iter()
        .find(|site| site.id == row.site_name)
        .and_then(|site| site.downloader_id.clone())
        .or_else(|| {
            snapshot
                .downloaders
                .iter()
                .find(|downloader| downloader.enabled)
                .map(|downloader| downloader.id.clone())
        })
}

fn subscription_pauses_on_free_end(snapshot: &Config, row: &TorrentInfoRow) -> bool {
    matching_subscription(snapshot, row).is_some_and(|sub| sub.pause_on_free_end)
}

/// Combine the ratio/seed-time/inactivity policies per
/// `cleanup_condition_mode`. Only thresholds configured with a positive
/// value participate; if none are configured, the row is never eligible via
/// this path. An unrecognised mode string defaults to `"any"`.
fn policy_satisfied(global: &GlobalSettings, stats: &DownloaderTorrent, age_hours: f64) -> bool {
    let mut configured = Vec::with_capacity(3);

    if global.cleanup_min_ratio > 0.0 {
        configured.push(stats.ratio >= global.cleanup_min_ratio);
    }
    if global.cleanup_max_seed_time_h > 0.0 {
        configured.push(stats.seeding_seconds as f64 / 3600.0 >= global.cleanup_max_seed_time_h);
    }
    if global.cleanup_max_inactive_h > 0.0 && global.cleanup_slow_hours > 0.0 {
        let slow = stats.speed_bps as f64 <= global.cleanup_slow_speed_bps as f64;
        configured.push(
            slow && age_hours >= global.cleanup_max_inactive_h
                && age_hours >= global.cleanup_slow_hours,
        );
    }

    if configured.is_empty() {
        return false;
    }
    if global.cleanup_condition_mode.eq_ignore_ascii_case("all") {
        configured.into_iter().all(|met| met)
    } else {
        configured.into_iter().any(|met| met)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ratioguard_config::model::Downloader as ModelDownloader;
    use ratioguard_core::{DownloaderResult, TorrentProperties};
    use ratioguard_events::EventBus;
    use ratioguard_test_support::RecordingDownloader;
    use std::collections::HashMap;
    use std::sync::Mutex;

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

    fn stats(ratio: f64, seeding_seconds: i64, speed_bps: i64) -> DownloaderTorrent {
        DownloaderTorrent {
            hash: "abc".to_string(),
            name: "demo".to_string(),
            progress_percent: 100.0,
            ratio,
            seeding_seconds,
            speed_bps,
        }
    }

    #[test]
    fn no_configured_thresholds_never_matches() {
        let global = global(|_| {});
        assert!(!policy_satisfied(&global, &stats(5.0, 999_999, 0), 999.0));
    }

    #[test]
    fn any_mode_matches_on_a_single_satisfied_condition() {
        let global = global(|g| {
            g.cleanup_min_ratio = 2.0;
            g.cleanup_max_seed_time_h = 1000.0;
        });
        assert!(policy_satisfied(&global, &stats(2.5, 10, 0), 48.0));
    }

    #[test]
    fn all_mode_requires_every_configured_condition() {
        let global = global(|g| {
            g.cleanup_condition_mode = "all".to_string();
            g.cleanup_min_ratio = 2.0;
            g.cleanup_max_seed_time_h = 10.0;
        });
        assert!(!policy_satisfied(&global, &stats(2.5, 1, 0), 48.0));
        assert!(policy_satisfied(&global, &stats(2.5, 36_000, 0), 48.0));
    }

    #[test]
    fn inactivity_requires_both_duration_thresholds_and_low_speed() {
        let global = global(|g| {
            g.cleanup_max_inactive_h = 24.0;
            g.cleanup_slow_hours = 12.0;
            g.cleanup_slow_speed_bps = 1_000;
        });
        assert!(!policy_satisfied(&global, &stats(0.0, 0, 2_000), 48.0));
        assert!(policy_satisfied(&global, &stats(0.0, 0, 500), 48.0));
    }

    fn downloader_config(id: &str) -> ModelDownloader {
        ModelDownloader {
            id: id.to_string(),
            name: id.to_string(),
            kind: "qbittorrent".to_string(),
            url: "http://localhost:8080".to_string(),
            username: None,
            password: None,
            enabled: true,
            is_default: true,
            auto_start: false,
        }
    }

    fn snapshot_with(
        global_overrides: impl FnOnce(&mut GlobalSettings),
        subscriptions: Vec<RssSubscription>,
    ) -> Config {
        Config {
            global: global(global_overrides),
            downloaders: vec![downloader_config("dl1")],
            sites: Vec::new(),
            subscriptions,
            filter_rules: Vec::new(),
            loaded_at: Utc::now(),
        }
    }

    fn base_row(id: i64, hash: &str) -> TorrentInfoRow {
        let now = Utc::now();
        TorrentInfoRow {
            id,
            site_name: "demo".to_string(),
            torrent_id: format!("t{id}"),
            torrent_hash: Some(hash.to_string()),
            title: "Demo".to_string(),
            category: None,
            tag: None,
            free_level: "free".to_string(),
            free_end_time: None,
            hr: false,
            size_bytes: 1_000_000,
            is_skipped: false,
            is_downloaded: true,
            is_pushed: true,
            is_purged: false,
            push_time: Some(now - chrono::Duration::hours(1)),
            retry_count: 0,
            last_error: None,
            last_check_time: now - chrono::Duration::hours(1),
            download_source: None,
            created_at: now - chrono::Duration::hours(1),
        }
    }

    async fn monitor_with(
        clients: HashMap<String, Arc<dyn ratioguard_core::Downloader>>,
    ) -> CleanupMonitor {
        let pool = ratioguard_data::open_in_memory_for_tests().await;
        let events = EventBus::with_capacity(16);
        let config = Arc::new(ConfigService::new(pool, "/tmp/ratioguard-cleanup-test", events));
        let downloaders = Arc::new(DownloaderManager::with_clients_for_tests(clients));
        let metrics = Arc::new(Metrics::new().unwrap());
        CleanupMonitor::new(config, downloaders, metrics)
    }

    fn clients_with(
        id: &str,
        downloader: Arc<dyn ratioguard_core::Downloader>,
    ) -> HashMap<String, Arc<dyn ratioguard_core::Downloader>> {
        let mut clients: HashMap<String, Arc<dyn ratioguard_core::Downloader>> = HashMap::new();
        clients.insert(id.to_string(), downloader);
        clients
    }

    #[tokio::test]
    async fn free_end_actions_are_skipped_once_the_downloader_reports_complete() {
        let fake = Arc::new(RecordingDownloader::default());
        fake.properties.write().unwrap().insert(
            "abc123".to_string(),
            TorrentProperties {
                save_path: "/downloads".to_string(),
                progress_percent: 100.0,
                is_complete: true,
            },
        );

        let monitor = monitor_with(clients_with("dl1", fake.clone())).await;
        let snapshot = snapshot_with(
            |g| g.auto_delete_on_free_end = true,
            vec![RssSubscription {
                id: 1,
                site_id: "demo".to_string(),
                name: "Demo Sub".to_string(),
                url: "https://tracker.example/rss".to_string(),
                category: None,
                tag: None,
                interval_minutes: 15,
                downloader_id: None,
                download_path: None,
                pause_on_free_end: true,
                enabled: true,
                filter_rule_ids: Vec::new(),
            }],
        );
        let mut row = base_row(1, "abc123");
        row.free_end_time = Some(Utc::now() - chrono::Duration::minutes(5));

        let purged = monitor.evaluate_row(&snapshot, &row, Utc::now()).await;

        assert!(!purged);
        assert!(fake.delete_calls.read().unwrap().is_empty());
        assert!(fake.pause_calls.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn free_end_auto_delete_purges_an_incomplete_torrent() {
        let fake = Arc::new(RecordingDownloader::default());
        fake.properties.write().unwrap().insert(
            "abc123".to_string(),
            TorrentProperties {
                save_path: "/downloads".to_string(),
                progress_percent: 80.0,
                is_complete: false,
            },
        );

        let monitor = monitor_with(clients_with("dl1", fake.clone())).await;
        let snapshot = snapshot_with(|g| g.auto_delete_on_free_end = true, Vec::new());
        let mut row = base_row(1, "abc123");
        row.free_end_time = Some(Utc::now() - chrono::Duration::minutes(5));

        let purged = monitor.evaluate_row(&snapshot, &row, Utc::now()).await;

        assert!(purged);
        assert_eq!(
            fake.delete_calls.read().unwrap().as_slice(),
            [("abc123".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn pause_on_free_end_pauses_an_incomplete_torrent() {
        let fake = Arc::new(RecordingDownloader::default());
        fake.properties.write().unwrap().insert(
            "abc123".to_string(),
            TorrentProperties {
                save_path: "/downloads".to_string(),
                progress_percent: 80.0,
                is_complete: false,
            },
        );

        let monitor = monitor_with(clients_with("dl1", fake.clone())).await;
        let snapshot = snapshot_with(
            |g| g.auto_delete_on_free_end = false,
            vec![RssSubscription {
                id: 1,
                site_id: "demo".to_string(),
                name: "Demo Sub".to_string(),
                url: "https://tracker.example/rss".to_string(),
                category: None,
                tag: None,
                interval_minutes: 15,
                downloader_id: None,
                download_path: None,
                pause_on_free_end: true,
                enabled: true,
                filter_rule_ids: Vec::new(),
            }],
        );
        let mut row = base_row(1, "abc123");
        row.free_end_time = Some(Utc::now() - chrono::Duration::minutes(5));

        let purged = monitor.evaluate_row(&snapshot, &row, Utc::now()).await;

        assert!(!purged);
        assert!(fake.delete_calls.read().unwrap().is_empty());
        assert_eq!(
            fake.pause_calls.read().unwrap().as_slice(),
            ["abc123".to_string()]
        );
    }

    #[tokio::test]
    async fn retention_purges_on_last_check_time_independent_of_push_time() {
        let fake = Arc::new(RecordingDownloader::default());
        let monitor = monitor_with(clients_with("dl1", fake.clone())).await;
        let snapshot = snapshot_with(|g| g.retain_hours = 24, Vec::new());

        let mut row = base_row(1, "abc123");
        // Pushed recently, so the ratio/seed path would never fire, but
        // last checked long enough ago to cross the retention threshold.
        row.push_time = Some(Utc::now() - chrono::Duration::hours(1));
        row.last_check_time = Utc::now() - chrono::Duration::hours(48);

        let purged = monitor.evaluate_row(&snapshot, &row, Utc::now()).await;

        assert!(purged);
        assert_eq!(
            fake.delete_calls.read().unwrap().as_slice(),
            [("abc123".to_string(), true)]
        );
    }

    struct ShrinkingDownloader {
        free_space_bytes: Mutex<u64>,
        reclaim_per_delete: u64,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ratioguard_core::Downloader for ShrinkingDownloader {
        async fn authenticate(&self) -> DownloaderResult<()> {
            Ok(())
        }

        async fn add_torrent(
            &self,
            _request: ratioguard_core::AddTorrentRequest,
        ) -> DownloaderResult<()> {
            Ok(())
        }

        async fn exists(&self, _hash: &str) -> DownloaderResult<bool> {
            Ok(true)
        }

        async fn list_torrents(&self) -> DownloaderResult<Vec<DownloaderTorrent>> {
            Ok(Vec::new())
        }

        async fn free_space(&self) -> DownloaderResult<u64> {
            Ok(*self.free_space_bytes.lock().unwrap())
        }

        async fn pause(&self, _hash: &str) -> DownloaderResult<()> {
            Ok(())
        }

        async fn delete(&self, hash: &str, _remove_data: bool) -> DownloaderResult<()> {
            self.deleted.lock().unwrap().push(hash.to_string());
            *self.free_space_bytes.lock().unwrap() += self.reclaim_per_delete;
            Ok(())
        }

        async fn properties(&self, _hash: &str) -> DownloaderResult<Option<TorrentProperties>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn disk_emergency_sweep_stops_once_the_buffer_target_is_reached() {
        let fake = Arc::new(ShrinkingDownloader {
            free_space_bytes: Mutex::new(10 * 1_073_741_824), // 10 GiB, below target
            reclaim_per_delete: 6 * 1_073_741_824,             // 6 GiB reclaimed per delete
            deleted: Mutex::new(Vec::new()),
        });
        let monitor = monitor_with(clients_with("dl1", fake.clone())).await;
        // Target = 5 GiB floor + max(5*0.2, 10) GiB buffer = 15 GiB.
        let snapshot = snapshot_with(
            |g| {
                g.cleanup_disk_protect = true;
                g.min_disk_space_gb = 5.0;
                g.retain_hours = 24 * 365; // keep retention out of the way
            },
            Vec::new(),
        );

        let now = Utc::now();
        let mut older = base_row(1, "older");
        older.push_time = Some(now - chrono::Duration::hours(10));
        older.last_check_time = now;
        let mut newer = base_row(2, "newer");
        newer.push_time = Some(now - chrono::Duration::hours(1));
        newer.last_check_time = now;

        monitor.sweep(&snapshot, vec![older, newer]).await;

        assert_eq!(
            fake.deleted.lock().unwrap().as_slice(),
            ["older".to_string()]
        );
    }
}

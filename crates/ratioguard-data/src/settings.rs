//! Repository functions for the singleton `global_settings` row.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::error::Result;

/// Raw projection of the `global_settings` row.
#[derive(Debug, Clone, FromRow)]
pub struct GlobalSettingsRow {
    /// Destination directory for `.torrent` downloads.
    pub download_dir: String,
    /// Default subscription polling interval, minutes.
    pub default_interval_minutes: i64,
    /// Whether newly created subscriptions default to enabled.
    pub default_enabled: bool,
    /// Whether a global download speed cap is enforced.
    pub download_limit_enabled: bool,
    /// Global download speed cap, bytes per second.
    pub download_speed_limit_bps: i64,
    /// Maximum torrent size, gigabytes (0 = unlimited).
    pub torrent_size_gb_max: f64,
    /// Minimum remaining free-window minutes required to admit a candidate.
    pub min_free_minutes: i64,
    /// Maximum download attempts before a row is left for purge.
    pub max_retry: i64,
    /// Retention window before an untouched row is purged, hours (0 = unlimited).
    pub retain_hours: i64,
    /// `CleanupMonitor` sweep interval, minutes.
    pub cleanup_interval_min: i64,
    /// Whether hit-and-run flagged torrents are protected from cleanup.
    pub cleanup_protect_hr: bool,
    /// JSON array of tags protected from cleanup.
    pub cleanup_protect_tags: String,
    /// Whether low-disk-space triggers an emergency cleanup sweep.
    pub cleanup_disk_protect: bool,
    /// Minimum free disk space, gigabytes, before `DiskSpaceLow` fires.
    pub min_disk_space_gb: f64,
    /// Maximum seed time before cleanup, hours.
    pub cleanup_max_seed_time_h: Option<f64>,
    /// Minimum ratio below which cleanup may purge.
    pub cleanup_min_ratio: Option<f64>,
    /// Maximum inactivity before cleanup, hours.
    pub cleanup_max_inactive_h: Option<f64>,
    /// Slow-speed threshold for cleanup, bytes per second.
    pub cleanup_slow_speed_bps: Option<i64>,
    /// Duration a torrent must sit below the slow-speed threshold, hours.
    pub cleanup_slow_hours: Option<f64>,
    /// How the ratio/seed-time/inactivity/slow-speed conditions combine (`any` or `all`).
    pub cleanup_condition_mode: String,
    /// Whether torrents are auto-deleted once their free window ends.
    pub auto_delete_on_free_end: bool,
    /// Whether pushed torrents start immediately or paused.
    pub auto_start: bool,
    /// Monotonic revision, bumped on every write.
    pub revision: i64,
    /// Last write timestamp.
    pub updated_at: DateTime<Utc>,
}

const DEFAULT_INTERVAL_MINUTES: i64 = 15;
const DEFAULT_MAX_RETRY: i64 = 3;
const DEFAULT_MIN_FREE_MINUTES: i64 = 30;
const DEFAULT_CLEANUP_INTERVAL_MIN: i64 = 15;
const DEFAULT_MIN_DISK_SPACE_GB: f64 = 10.0;

/// Load the singleton settings row, seeding it with defaults if absent.
///
/// # Errors
///
/// Returns an error if the query or seed insert fails.
pub async fn load_or_seed(pool: &SqlitePool, workdir: &str) -> Result<GlobalSettingsRow> {
    let mut tx = pool.begin().await?;
    let existing = fetch(&mut tx).await?;
    if let Some(row) = existing {
        tx.commit().await?;
        return Ok(row);
    }

    sqlx::query(
        "INSERT INTO global_settings (id, download_dir, default_interval_minutes, max_retry, \
         min_free_minutes, cleanup_interval_min, min_disk_space_gb) \
         VALUES (1, ?, ?, ?, ?, ?, ?)",
    )
    .bind(workdir)
    .bind(DEFAULT_INTERVAL_MINUTES)
    .bind(DEFAULT_MAX_RETRY)
    .bind(DEFAULT_MIN_FREE_MINUTES)
    .bind(DEFAULT_CLEANUP_INTERVAL_MIN)
    .bind(DEFAULT_MIN_DISK_SPACE_GB)
    .execute(&mut *tx)
    .await?;

    let seeded = fetch(&mut tx)
        .await?
        .expect("row was just inserted inside this transaction");
    tx.commit().await?;
    Ok(seeded)
}

async fn fetch(tx: &mut Transaction<'_, Sqlite>) -> Result<Option<GlobalSettingsRow>> {
    let row = sqlx::query_as::<_, GlobalSettingsRow>(
        "SELECT download_dir, default_interval_minutes, default_enabled, \
                download_limit_enabled, download_speed_limit_bps, torrent_size_gb_max, \
                min_free_minutes, max_retry, retain_hours, cleanup_interval_min, \
                cleanup_protect_hr, cleanup_protect_tags, cleanup_disk_protect, \
                min_disk_space_gb, cleanup_max_seed_time_h, cleanup_min_ratio, \
                cleanup_max_inactive_h, cleanup_slow_speed_bps, cleanup_slow_hours, \
                cleanup_condition_mode, auto_delete_on_free_end, auto_start, revision, \
                updated_at \
         FROM global_settings WHERE id = 1",
    )
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row)
}

/// Fields accepted by [`save`]; validation happens in `ratioguard-config`, not here.
#[derive(Debug, Clone)]
pub struct GlobalSettingsUpdate<'a> {
    /// See [`GlobalSettingsRow::download_dir`].
    pub download_dir: &'a str,
    /// See [`GlobalSettingsRow::default_interval_minutes`].
    pub default_interval_minutes: i64,
    /// See [`GlobalSettingsRow::default_enabled`].
    pub default_enabled: bool,
    /// See [`GlobalSettingsRow::download_limit_enabled`].
    pub download_limit_enabled: bool,
    /// See [`GlobalSettingsRow::download_speed_limit_bps`].
    pub download_speed_limit_bps: i64,
    /// See [`GlobalSettingsRow::torrent_size_gb_max`].
    pub torrent_size_gb_max: f64,
    /// See [`GlobalSettingsRow::min_free_minutes`].
    pub min_free_minutes: i64,
    /// See [`GlobalSettingsRow::max_retry`].
    pub max_retry: i64,
    /// See [`GlobalSettingsRow::retain_hours`].
    pub retain_hours: i64,
    /// See [`GlobalSettingsRow::cleanup_interval_min`].
    pub cleanup_interval_min: i64,
    /// See [`GlobalSettingsRow::cleanup_protect_hr`].
    pub cleanup_protect_hr: bool,
    /// See [`GlobalSettingsRow::cleanup_protect_tags`] (JSON-encoded array).
    pub cleanup_protect_tags: &'a str,
    /// See [`GlobalSettingsRow::cleanup_disk_protect`].
    pub cleanup_disk_protect: bool,
    /// See [`GlobalSettingsRow::min_disk_space_gb`].
    pub min_disk_space_gb: f64,
    /// See [`GlobalSettingsRow::cleanup_max_seed_time_h`].
    pub cleanup_max_seed_time_h: Option<f64>,
    /// See [`GlobalSettingsRow::cleanup_min_ratio`].
    pub cleanup_min_ratio: Option<f64>,
    /// See [`GlobalSettingsRow::cleanup_max_inactive_h`].
    pub cleanup_max_inactive_h: Option<f64>,
    /// See [`GlobalSettingsRow::cleanup_slow_speed_bps`].
    pub cleanup_slow_speed_bps: Option<i64>,
    /// See [`GlobalSettingsRow::cleanup_slow_hours`].
    pub cleanup_slow_hours: Option<f64>,
    /// See [`GlobalSettingsRow::cleanup_condition_mode`].
    pub cleanup_condition_mode: &'a str,
    /// See [`GlobalSettingsRow::auto_delete_on_free_end`].
    pub auto_delete_on_free_end: bool,
    /// See [`GlobalSettingsRow::auto_start`].
    pub auto_start: bool,
}

/// Overwrite the singleton settings row and return the new revision.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn save(pool: &SqlitePool, update: &GlobalSettingsUpdate<'_>) -> Result<i64> {
    sqlx::query(
        "UPDATE global_settings SET \
            download_dir = ?, default_interval_minutes = ?, default_enabled = ?, \
            download_limit_enabled = ?, download_speed_limit_bps = ?, torrent_size_gb_max = ?, \
            min_free_minutes = ?, max_retry = ?, retain_hours = ?, \
            cleanup_interval_min = ?, cleanup_protect_hr = ?, cleanup_protect_tags = ?, \
            cleanup_disk_protect = ?, min_disk_space_gb = ?, cleanup_max_seed_time_h = ?, \
            cleanup_min_ratio = ?, cleanup_max_inactive_h = ?, cleanup_slow_speed_bps = ?, \
            cleanup_slow_hours = ?, cleanup_condition_mode = ?, \
            auto_delete_on_free_end = ?, auto_start = ?, \
            revision = revision + 1, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = 1",
    )
    .bind(update.download_dir)
    .bind(update.default_interval_minutes)
    .bind(update.default_enabled)
    .bind(update.download_limit_enabled)
    .bind(update.download_speed_limit_bps)
    .bind(update.torrent_size_gb_max)
    .bind(update.min_free_minutes)
    .bind(update.max_retry)
    .bind(update.retain_hours)
    .bind(update.cleanup_interval_min)
    .bind(update.cleanup_protect_hr)
    .bind(update.cleanup_protect_tags)
    .bind(update.cleanup_disk_protect)
    .bind(update.min_disk_space_gb)
    .bind(update.cleanup_max_seed_time_h)
    .bind(update.cleanup_min_ratio)
    .bind(update.cleanup_max_inactive_h)
    .bind(update.cleanup_slow_speed_bps)
    .bind(update.cleanup_slow_hours)
    .bind(update.cleanup_condition_mode)
    .bind(update.auto_delete_on_free_end)
    .bind(update.auto_start)
    .execute(pool)
    .await?;

    let revision: i64 = sqlx::query_scalar("SELECT revision FROM global_settings WHERE id = 1")
        .fetch_one(pool)
        .await?;
    Ok(revision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory_for_tests;

    #[tokio::test]
    async fn seeds_defaults_on_first_load() {
        let pool = open_in_memory_for_tests().await;
        let row = load_or_seed(&pool, "/data/downloads").await.unwrap();
        assert_eq!(row.download_dir, "/data/downloads");
        assert_eq!(row.default_interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert_eq!(row.revision, 0);
    }

    #[tokio::test]
    async fn second_load_is_idempotent() {
        let pool = open_in_memory_for_tests().await;
        load_or_seed(&pool, "/data/downloads").await.unwrap();
        let again = load_or_seed(&pool, "/other/path").await.unwrap();
        assert_eq!(again.download_dir, "/data/downloads");
    }

    #[tokio::test]
    async fn save_bumps_revision() {
        let pool = open_in_memory_for_tests().await;
        load_or_seed(&pool, "/data/downloads").await.unwrap();
        let revision = save(
            &pool,
            &GlobalSettingsUpdate {
                download_dir: "/data/downloads",
                default_interval_minutes: 30,
                default_enabled: true,
                download_limit_enabled: false,
                download_speed_limit_bps: 0,
                torrent_size_gb_max: 0.0,
                min_free_minutes: 30,
                max_retry: 3,
                retain_hours: 0,
                cleanup_interval_min: DEFAULT_CLEANUP_INTERVAL_MIN,
                cleanup_protect_hr: true,
                cleanup_protect_tags: "[]",
                cleanup_disk_protect: false,
                min_disk_space_gb: DEFAULT_MIN_DISK_SPACE_GB,
                cleanup_max_seed_time_h: None,
                cleanup_min_ratio: None,
                cleanup_max_inactive_h: None,
                cleanup_slow_speed_bps: None,
                cleanup_slow_hours: None,
                cleanup_condition_mode: "any",
                auto_delete_on_free_end: false,
                auto_start: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(revision, 1);
    }
}

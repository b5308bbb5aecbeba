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
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! `ConfigStore`: the single source of truth for all persisted configuration.
//!
//! Every mutating operation validates, writes inside one transaction, and
//! publishes a `ConfigChanged` event on the shared [`ratioguard_events::EventBus`]
//! so the scheduler can pick up a fresh [`Config`] snapshot without polling.

pub mod error;
pub mod model;
pub mod validate;

use std::path::PathBuf;

use ratioguard_data::{downloaders, ratelimit, sites, settings, torrents, DataError};
use ratioguard_events::{ConfigSource, Event, EventBus};
use sqlx::SqlitePool;
use tracing::instrument;

pub use error::{ConfigError, ConfigResult};
pub use model::{Config, Downloader, FilterRule, GlobalSettings, RssSubscription, Site};

/// Fields accepted by [`ConfigService::save_global`].
#[derive(Debug, Clone)]
pub struct GlobalSettingsInput {
    /// See [`GlobalSettings::download_dir`].
    pub download_dir: String,
    /// See [`GlobalSettings::default_interval_minutes`].
    pub default_interval_minutes: i64,
    /// See [`GlobalSettings::default_enabled`].
    pub default_enabled: bool,
    /// See [`GlobalSettings::download_limit_enabled`].
    pub download_limit_enabled: bool,
    /// See [`GlobalSettings::download_speed_limit_bps`].
    pub download_speed_limit_bps: i64,
    /// See [`GlobalSettings::torrent_size_gb_max`].
    pub torrent_size_gb_max: f64,
    /// See [`GlobalSettings::min_free_minutes`].
    pub min_free_minutes: i64,
    /// See [`GlobalSettings::max_retry`].
    pub max_retry: i64,
    /// See [`GlobalSettings::retain_hours`].
    pub retain_hours: i64,
    /// See [`GlobalSettings::cleanup_interval_min`].
    pub cleanup_interval_min: i64,
    /// See [`GlobalSettings::cleanup_protect_hr`].
    pub cleanup_protect_hr: bool,
    /// See [`GlobalSettings::cleanup_protect_tags`].
    pub cleanup_protect_tags: Vec<String>,
    /// See [`GlobalSettings::cleanup_disk_protect`].
    pub cleanup_disk_protect: bool,
    /// See [`GlobalSettings::min_disk_space_gb`].
    pub min_disk_space_gb: f64,
    /// See [`GlobalSettings::cleanup_max_seed_time_h`].
    pub cleanup_max_seed_time_h: Option<f64>,
    /// See [`GlobalSettings::cleanup_min_ratio`].
    pub cleanup_min_ratio: Option<f64>,
    /// See [`GlobalSettings::cleanup_max_inactive_h`].
    pub cleanup_max_inactive_h: Option<f64>,
    /// See [`GlobalSettings::cleanup_slow_speed_bps`].
    pub cleanup_slow_speed_bps: Option<i64>,
    /// See [`GlobalSettings::cleanup_slow_hours`].
    pub cleanup_slow_hours: Option<f64>,
    /// See [`GlobalSettings::cleanup_condition_mode`].
    pub cleanup_condition_mode: String,
    /// See [`GlobalSettings::auto_delete_on_free_end`].
    pub auto_delete_on_free_end: bool,
    /// See [`GlobalSettings::auto_start`].
    pub auto_start: bool,
}

/// Fields accepted by [`ConfigService::save_downloader`].
#[derive(Debug, Clone)]
pub struct DownloaderInput {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Backend kind.
    pub kind: String,
    /// Base URL.
    pub url: String,
    /// Username, if relevant.
    pub username: Option<String>,
    /// Password, if relevant.
    pub password: Option<String>,
    /// Whether the downloader is enabled.
    pub enabled: bool,
    /// Whether pushed torrents start immediately.
    pub auto_start: bool,
}

/// Fields accepted by [`ConfigService::upsert_site_with_rss`].
#[derive(Debug, Clone)]
pub struct SiteInput {
    /// Stable lowercase identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Schema family.
    pub schema: String,
    /// Feed/detail base URLs.
    pub urls: Vec<String>,
    /// Declared authentication method.
    pub auth_method: String,
    /// Cookie credential, when relevant.
    pub cookie: Option<String>,
    /// API key credential, when relevant.
    pub api_key: Option<String>,
    /// Passkey credential, when relevant.
    pub passkey: Option<String>,
    /// Base API URL; required unless the schema has a known default.
    pub api_url: Option<String>,
    /// Whether the site is enabled.
    pub enabled: bool,
    /// Requests/sec budget.
    pub rate_limit_per_sec: f64,
    /// Full replacement set of this site's subscriptions.
    pub subscriptions: Vec<SubscriptionInput>,
}

/// A single subscription inside a [`SiteInput`].
#[derive(Debug, Clone)]
pub struct SubscriptionInput {
    /// Existing row id, when updating; `None` inserts a new row.
    pub id: Option<i64>,
    /// Display name.
    pub name: String,
    /// Feed URL.
    pub url: String,
    /// Category applied to downloads.
    pub category: Option<String>,
    /// Tag applied to downloads.
    pub tag: Option<String>,
    /// Polling interval, minutes (clamped by this service before writing).
    pub interval_minutes: i64,
    /// Downloader override.
    pub downloader_id: Option<String>,
    /// Absolute save path override.
    pub download_path: Option<String>,
    /// Whether pushed torrents pause at free-end.
    pub pause_on_free_end: bool,
    /// Filter rule ids bound to this subscription.
    pub filter_rule_ids: Vec<i64>,
}

/// Facade over the persisted configuration tables: validates, writes inside a
/// transaction, and publishes `ConfigChanged` on every mutating call.
#[derive(Clone)]
pub struct ConfigService {
    pool: SqlitePool,
    workdir: PathBuf,
    events: EventBus,
}

impl ConfigService {
    /// Construct a service bound to `pool`, resolving relative paths (like
    /// `download_dir`) under `workdir`, and publishing to `events`.
    #[must_use]
    pub fn new(pool: SqlitePool, workdir: impl Into<PathBuf>, events: EventBus) -> Self {
        Self {
            pool,
            workdir: workdir.into(),
            events,
        }
    }

    /// Read all tables inside one transaction and return an immutable
    /// snapshot, seeding `GlobalSettings` with defaults if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if any underlying query fails.
    #[instrument(skip(self))]
    pub async fn load_snapshot(&self) -> ConfigResult<Config> {
        let workdir = self.workdir.to_string_lossy().into_owned();
        let global = settings::load_or_seed(&self.pool, &workdir).await?;
        let downloader_rows = downloaders::list(&self.pool).await?;
        let site_rows = sites::list_sites(&self.pool).await?;
        let subscription_rows = sites::list_enabled_subscriptions(&self.pool).await?;

        let mut subscriptions = Vec::with_capacity(subscription_rows.len());
        for row in subscription_rows {
            let filter_rule_ids = sites::filter_rules_for_subscription(&self.pool, row.id)
                .await?
                .into_iter()
                .map(|rule| rule.id)
                .collect();
            subscriptions.push(RssSubscription {
                id: row.id,
                site_id: row.site_id,
                name: row.name,
                url: row.url,
                category: row.category,
                tag: row.tag,
                interval_minutes: row.interval_minutes,
                downloader_id: row.downloader_id,
                download_path: row.download_path,
                pause_on_free_end: row.pause_on_free_end,
                enabled: row.enabled,
                filter_rule_ids,
            });
        }

        let mut filter_rules: Vec<FilterRule> = Vec::new();
        for sub in &subscriptions {
            for rule in sites::filter_rules_for_subscription(&self.pool, sub.id).await? {
                if filter_rules.iter().any(|r| r.id == rule.id) {
                    continue;
                }
                let predicate = serde_json::from_str(&rule.predicate).unwrap_or_default();
                filter_rules.push(FilterRule {
                    id: rule.id,
                    name: rule.name,
                    enabled: rule.enabled,
                    predicate,
                });
            }
        }

        Ok(Config {
            global: GlobalSettings {
                download_dir: global.download_dir,
                default_interval_minutes: global.default_interval_minutes,
                default_enabled: global.default_enabled,
                download_limit_enabled: global.download_limit_enabled,
                download_speed_limit_bps: global.download_speed_limit_bps,
                torrent_size_gb_max: global.torrent_size_gb_max,
                min_free_minutes: global.min_free_minutes,
                max_retry: global.max_retry,
                retain_hours: global.retain_hours,
                cleanup_interval_min: global.cleanup_interval_min,
                cleanup_protect_hr: global.cleanup_protect_hr,
                cleanup_protect_tags: serde_json::from_str(&global.cleanup_protect_tags)
                    .unwrap_or_default(),
                cleanup_disk_protect: global.cleanup_disk_protect,
                min_disk_space_gb: global.min_disk_space_gb,
                cleanup_max_seed_time_h: global.cleanup_max_seed_time_h.unwrap_or_default(),
                cleanup_min_ratio: global.cleanup_min_ratio.unwrap_or_default(),
                cleanup_max_inactive_h: global.cleanup_max_inactive_h.unwrap_or_default(),
                cleanup_slow_speed_bps: global.cleanup_slow_speed_bps.unwrap_or_default(),
                cleanup_slow_hours: global.cleanup_slow_hours.unwrap_or_default(),
                cleanup_condition_mode: global.cleanup_condition_mode,
                auto_delete_on_free_end: global.auto_delete_on_free_end,
                auto_start: global.auto_start,
                revision: global.revision,
            },
            downloaders: downloader_rows
                .into_iter()
                .map(|row| Downloader {
                    id: row.id,
                    name: row.name,
                    kind: row.kind,
                    url: row.url,
                    username: row.username,
                    password: row.password,
                    enabled: row.enabled,
                    is_default: row.is_default,
                    auto_start: row.auto_start,
                })
                .collect(),
            sites: site_rows
                .into_iter()
                .map(|row| Site {
                    id: row.id,
                    name: row.name,
                    schema: row.schema,
                    urls: serde_json::from_str(&row.urls).unwrap_or_default(),
                    auth_method: row.auth_method,
                    cookie: row.cookie,
                    api_key: row.api_key,
                    passkey: row.passkey,
                    api_url: row.api_url,
                    enabled: row.enabled,
                    rate_limit_per_sec: row.rate_limit_per_sec,
                    is_builtin: row.is_builtin,
                    downloader_id: row.downloader_id,
                    revision: row.revision,
                })
                .collect(),
            subscriptions,
            filter_rules,
            loaded_at: chrono::Utc::now(),
        })
    }

    /// Validate and persist `GlobalSettings`, publishing `ConfigChanged`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `download_dir` is empty or
    /// escapes the workdir base, or [`ConfigError::DataAccess`] on write
    /// failure.
    #[instrument(skip(self, input))]
    pub async fn save_global(&self, input: GlobalSettingsInput) -> ConfigResult<i64> {
        let resolved_dir = validate::resolve_download_dir(&self.workdir, &input.download_dir)?;
        let interval = validate::clamp_interval_minutes(input.default_interval_minutes);
        let tags_json =
            serde_json::to_string(&input.cleanup_protect_tags).unwrap_or_else(|_| "[]".to_string());

        let revision = settings::save(
            &self.pool,
            &settings::GlobalSettingsUpdate {
                download_dir: &resolved_dir.to_string_lossy(),
                default_interval_minutes: interval,
                default_enabled: input.default_enabled,
                download_limit_enabled: input.download_limit_enabled,
                download_speed_limit_bps: input.download_speed_limit_bps,
                torrent_size_gb_max: input.torrent_size_gb_max,
                min_free_minutes: input.min_free_minutes,
                max_retry: input.max_retry,
                retain_hours: input.retain_hours,
                cleanup_interval_min: input.cleanup_interval_min,
                cleanup_protect_hr: input.cleanup_protect_hr,
                cleanup_protect_tags: &tags_json,
                cleanup_disk_protect: input.cleanup_disk_protect,
                min_disk_space_gb: input.min_disk_space_gb,
                cleanup_max_seed_time_h: input.cleanup_max_seed_time_h,
                cleanup_min_ratio: input.cleanup_min_ratio,
                cleanup_max_inactive_h: input.cleanup_max_inactive_h,
                cleanup_slow_speed_bps: input.cleanup_slow_speed_bps,
                cleanup_slow_hours: input.cleanup_slow_hours,
                cleanup_condition_mode: &input.cleanup_condition_mode,
                auto_delete_on_free_end: input.auto_delete_on_free_end,
                auto_start: input.auto_start,
            },
        )
        .await?;

        self.publish(ConfigSource::Global, revision);
        Ok(revision)
    }

    /// Upsert a downloader row, preserving its `is_default` flag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    #[instrument(skip(self, input))]
    pub async fn save_downloader(&self, input: DownloaderInput) -> ConfigResult<()> {
        downloaders::save(
            &self.pool,
            &downloaders::DownloaderUpsert {
                id: &input.id,
                name: &input.name,
                kind: &input.kind,
                url: &input.url,
                username: input.username.as_deref(),
                password: input.password.as_deref(),
                enabled: input.enabled,
                auto_start: input.auto_start,
            },
        )
        .await?;
        self.publish(ConfigSource::Downloaders, now_nanos());
        Ok(())
    }

    /// Mark `id` the default downloader for its kind, enabling it atomically.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `id` does not exist, or
    /// [`ConfigError::DataAccess`] on write failure.
    #[instrument(skip(self))]
    pub async fn set_default_downloader(&self, id: &str) -> ConfigResult<()> {
        match downloaders::set_default(&self.pool, id).await {
            Ok(()) => {
                self.publish(ConfigSource::Downloaders, now_nanos());
                Ok(())
            }
            Err(DataError::QueryFailed {
                source: sqlx::Error::RowNotFound,
                ..
            }) => Err(ConfigError::NotFound {
                entity: "downloader",
                id: id.to_string(),
            }),
            Err(other) => Err(other.into()),
        }
    }

    /// Validate and upsert a site plus its full RSS + filter association
    /// set, in one transaction, publishing `ConfigChanged`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the site id, auth method, or
    /// credentials are invalid, [`ConfigError::Conflict`] if two
    /// subscriptions in the same site share a URL case-insensitively, or
    /// [`ConfigError::DataAccess`] on write failure.
    #[instrument(skip(self, input))]
    pub async fn upsert_site_with_rss(&self, input: SiteInput) -> ConfigResult<i64> {
        validate::validate_site_id(&input.id)?;
        validate::validate_site_auth(
            &input.auth_method,
            input.cookie.as_deref(),
            input.api_key.as_deref(),
            input.passkey.as_deref(),
        )?;
        if input.api_url.as_deref().is_none_or(str::is_empty) && !is_known_default_schema(&input.schema) {
            return Err(ConfigError::Validation {
                field: "api_url",
                reason: format!("required for schema `{}`", input.schema),
            });
        }
        if input.urls.is_empty() {
            return Err(ConfigError::Validation {
                field: "urls",
                reason: "at least one feed URL is required".to_string(),
            });
        }

        let mut seen_urls = std::collections::HashSet::new();
        for sub in &input.subscriptions {
            if !seen_urls.insert(sub.url.to_lowercase()) {
                return Err(ConfigError::Conflict(format!(
                    "duplicate RSS URL `{}` within site `{}`",
                    sub.url, input.id
                )));
            }
        }

        let urls_json = serde_json::to_string(&input.urls).unwrap_or_else(|_| "[]".to_string());
        let subscriptions = input
            .subscriptions
            .iter()
            .map(|sub| sites::SubscriptionUpsert {
                id: sub.id,
                name: &sub.name,
                url: &sub.url,
                category: sub.category.as_deref(),
                tag: sub.tag.as_deref(),
                interval_minutes: validate::clamp_interval_minutes(sub.interval_minutes),
                downloader_id: sub.downloader_id.as_deref(),
                download_path: sub.download_path.as_deref(),
                pause_on_free_end: sub.pause_on_free_end,
                filter_rule_ids: sub.filter_rule_ids.clone(),
            })
            .collect();

        let revision = sites::upsert_site_with_rss(
            &self.pool,
            &sites::SiteUpsert {
                id: &input.id,
                name: &input.name,
                schema: &input.schema,
                urls_json: &urls_json,
                auth_method: &input.auth_method,
                cookie: input.cookie.as_deref(),
                api_key: input.api_key.as_deref(),
                passkey: input.passkey.as_deref(),
                api_url: input.api_url.as_deref(),
                enabled: input.enabled,
                rate_limit_per_sec: input.rate_limit_per_sec,
                subscriptions,
            },
        )
        .await?;

        self.publish(ConfigSource::Sites, revision);
        Ok(revision)
    }

    /// Update `downloader_id` on every site in `site_ids` and every RSS
    /// subscription bound to them, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    #[instrument(skip(self))]
    pub async fn batch_update_site_downloader(
        &self,
        site_ids: &[String],
        downloader_id: &str,
    ) -> ConfigResult<()> {
        sites::batch_update_site_downloader(&self.pool, site_ids, downloader_id).await?;
        self.publish(ConfigSource::Sites, now_nanos());
        Ok(())
    }

    /// Delete a site and cascade to its subscriptions. Rejects built-in
    /// sites.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Conflict`] if `site_id` is a built-in site, or
    /// [`ConfigError::DataAccess`] on write failure.
    #[instrument(skip(self))]
    pub async fn delete_site(&self, site_id: &str) -> ConfigResult<bool> {
        match sites::delete_site(&self.pool, site_id).await {
            Ok(deleted) => {
                if deleted {
                    self.publish(ConfigSource::Sites, now_nanos());
                }
                Ok(deleted)
            }
            Err(DataError::QueryFailed {
                operation: "delete built-in site",
                ..
            }) => Err(ConfigError::Conflict(format!(
                "site `{site_id}` is built-in and cannot be deleted"
            ))),
            Err(other) => Err(other.into()),
        }
    }

    /// Load a `TorrentInfo` row by its natural key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the query fails.
    pub async fn find_torrent(
        &self,
        site_name: &str,
        torrent_id: &str,
    ) -> ConfigResult<Option<torrents::TorrentInfoRow>> {
        Ok(torrents::find(&self.pool, site_name, torrent_id).await?)
    }

    /// Upsert a freshly discovered/evaluated candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn upsert_discovered_torrent(
        &self,
        candidate: &torrents::DiscoveredTorrent<'_>,
    ) -> ConfigResult<i64> {
        Ok(torrents::upsert_discovered(&self.pool, candidate).await?)
    }

    /// Mark a `TorrentInfo` row skipped for this round.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn mark_torrent_skipped(&self, id: i64, reason: &str) -> ConfigResult<()> {
        Ok(torrents::mark_skipped(&self.pool, id, reason).await?)
    }

    /// Record that a `.torrent` file was downloaded and hashed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn mark_torrent_downloaded(&self, id: i64, torrent_hash: &str) -> ConfigResult<()> {
        Ok(torrents::mark_downloaded(&self.pool, id, torrent_hash).await?)
    }

    /// Record a failed download attempt, returning the new retry count.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn record_torrent_download_failure(&self, id: i64, error: &str) -> ConfigResult<i64> {
        Ok(torrents::record_download_failure(&self.pool, id, error).await?)
    }

    /// Record that the torrent was accepted by the downloader.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn mark_torrent_pushed(&self, id: i64) -> ConfigResult<()> {
        torrents::mark_pushed(&self.pool, id).await?;
        Ok(())
    }

    /// Record a non-fatal push failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn record_torrent_push_failure(&self, id: i64, error: &str) -> ConfigResult<()> {
        Ok(torrents::record_push_failure(&self.pool, id, error).await?)
    }

    /// Mark a `TorrentInfo` row purged by the cleanup monitor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn mark_torrent_purged(&self, id: i64) -> ConfigResult<()> {
        Ok(torrents::mark_purged(&self.pool, id).await?)
    }

    /// List every `TorrentInfo` row currently pushed and not purged.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the query fails.
    pub async fn list_active_pushed_torrents(&self) -> ConfigResult<Vec<torrents::TorrentInfoRow>> {
        Ok(torrents::list_active_pushed(&self.pool).await?)
    }

    /// Record a rate-limiter admission for crash-safe window reconstruction.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the write fails.
    pub async fn record_rate_limit_admission(
        &self,
        site_id: &str,
        window_start: chrono::DateTime<chrono::Utc>,
    ) -> ConfigResult<()> {
        Ok(ratelimit::record_admission(&self.pool, site_id, window_start).await?)
    }

    /// Sum admissions recorded for `site_id` at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DataAccess`] if the query fails.
    pub async fn rate_limit_count_since(
        &self,
        site_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> ConfigResult<i64> {
        Ok(ratelimit::count_since(&self.pool, site_id, since).await?)
    }

    /// Access to the underlying pool, for callers that need a direct
    /// transaction (the `CleanupMonitor`'s multi-row sweep, for example).
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Access to the shared event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    fn publish(&self, source: ConfigSource, version: i64) {
        self.events.publish(Event::ConfigChanged { source, version });
    }
}

/// Fallback version stamp for writes whose table has no monotonic revision
/// column of its own (downloaders, batch site updates); still monotonic
/// enough for subscribers that only care about "something changed".
fn now_nanos() -> i64 {
    i64::try_from(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()).unwrap_or_default()
}

/// Schema families whose detail/API endpoint can be derived without an
/// explicit `api_url` (cookie-authenticated, scraped-HTML schemas).
fn is_known_default_schema(schema: &str) -> bool {
    matches!(schema, "nexus_php" | "unit3d" | "gazelle")
}

/// Test helpers: an in-memory `ConfigService` wired to a throwaway event bus.
#[cfg(test)]
pub(crate) async fn test_service() -> ConfigService {
    let pool = ratioguard_data::open_in_memory_for_tests().await;
    ConfigService::new(pool, PathBuf::from("/data/work"), EventBus::new())
}

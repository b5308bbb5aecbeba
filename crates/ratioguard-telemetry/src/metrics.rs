//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters/gauges the pipeline needs for throughput and
//!   health reporting; there is no HTTP endpoint in this crate that serves
//!   them, callers decide how `render`'s output reaches a scraper.

use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_emitted_total: IntCounterVec,
    torrents_discovered_total: IntCounterVec,
    torrents_skipped_total: IntCounterVec,
    torrents_downloaded_total: IntCounterVec,
    torrents_pushed_total: IntCounterVec,
    torrents_purged_total: IntCounterVec,
    cleanup_actions_total: IntCounterVec,
    active_torrents: IntGauge,
    queue_depth: IntGauge,
    rate_limiter_wait_ms: IntGauge,
    config_watch_latency_ms: IntGauge,
    config_apply_latency_ms: IntGauge,
    config_update_failures_total: IntCounter,
    config_watch_slow_total: IntCounter,
    guardrail_violations_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Current number of active torrents.
    pub active_torrents: i64,
    /// Current queue depth for pending torrents.
    pub queue_depth: i64,
    /// Latest observed time (ms) a site spent waiting on the rate limiter.
    pub rate_limiter_wait_ms: i64,
    /// Latest latency (ms) when watching for configuration changes.
    pub config_watch_latency_ms: i64,
    /// Latest latency (ms) when applying configuration changes.
    pub config_apply_latency_ms: i64,
    /// Total count of configuration update failures observed.
    pub config_update_failures_total: u64,
    /// Total count of slow configuration watch intervals observed.
    pub config_watch_slow_total: u64,
    /// Total guardrail violations recorded.
    pub guardrail_violations_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_emitted_total = IntCounterVec::new(
            Opts::new("events_emitted_total", "Domain events emitted by type"),
            &["type"],
        )?;
        let torrents_discovered_total = IntCounterVec::new(
            Opts::new(
                "torrents_discovered_total",
                "RSS items discovered per site",
            ),
            &["site"],
        )?;
        let torrents_skipped_total = IntCounterVec::new(
            Opts::new(
                "torrents_skipped_total",
                "Discovered torrents skipped before download, by reason",
            ),
            &["site", "reason"],
        )?;
        let torrents_downloaded_total = IntCounterVec::new(
            Opts::new(
                "torrents_downloaded_total",
                "Torrent files successfully fetched per site",
            ),
            &["site"],
        )?;
        let torrents_pushed_total = IntCounterVec::new(
            Opts::new(
                "torrents_pushed_total",
                "Torrents handed off to a downloader, by outcome",
            ),
            &["downloader", "outcome"],
        )?;
        let torrents_purged_total = IntCounterVec::new(
            Opts::new(
                "torrents_purged_total",
                "Torrents removed by the cleanup monitor, by reason",
            ),
            &["reason"],
        )?;
        let cleanup_actions_total = IntCounterVec::new(
            Opts::new(
                "cleanup_actions_total",
                "Cleanup monitor checks executed, by action and outcome",
            ),
            &["action", "outcome"],
        )?;
        let active_torrents =
            IntGauge::with_opts(Opts::new("active_torrents", "Number of active torrents"))?;
        let queue_depth =
            IntGauge::with_opts(Opts::new("queue_depth", "Queued torrent operations"))?;
        let rate_limiter_wait_ms = IntGauge::with_opts(Opts::new(
            "rate_limiter_wait_ms",
            "Latest time a site spent waiting to acquire the rate limiter (ms)",
        ))?;
        let config_watch_latency_ms = IntGauge::with_opts(Opts::new(
            "config_watch_latency_ms",
            "Time spent waiting for configuration updates (ms)",
        ))?;
        let config_apply_latency_ms = IntGauge::with_opts(Opts::new(
            "config_apply_latency_ms",
            "Time taken to apply configuration updates (ms)",
        ))?;
        let config_update_failures_total = IntCounter::with_opts(Opts::new(
            "config_update_failures_total",
            "Configuration update failures",
        ))?;
        let config_watch_slow_total = IntCounter::with_opts(Opts::new(
            "config_watch_slow_total",
            "Configuration updates exceeding the latency guard rail",
        ))?;
        let guardrail_violations_total = IntCounter::with_opts(Opts::new(
            "config_guardrail_violations_total",
            "Configuration and setup guardrail violations",
        ))?;

        registry.register(Box::new(events_emitted_total.clone()))?;
        registry.register(Box::new(torrents_discovered_total.clone()))?;
        registry.register(Box::new(torrents_skipped_total.clone()))?;
        registry.register(Box::new(torrents_downloaded_total.clone()))?;
        registry.register(Box::new(torrents_pushed_total.clone()))?;
        registry.register(Box::new(torrents_purged_total.clone()))?;
        registry.register(Box::new(cleanup_actions_total.clone()))?;
        registry.register(Box::new(active_torrents.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(rate_limiter_wait_ms.clone()))?;
        registry.register(Box::new(config_watch_latency_ms.clone()))?;
        registry.register(Box::new(config_apply_latency_ms.clone()))?;
        registry.register(Box::new(config_update_failures_total.clone()))?;
        registry.register(Box::new(config_watch_slow_total.clone()))?;
        registry.register(Box::new(guardrail_violations_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                events_emitted_total,
                torrents_discovered_total,
                torrents_skipped_total,
                torrents_downloaded_total,
                torrents_pushed_total,
                torrents_purged_total,
                cleanup_actions_total,
                active_torrents,
                queue_depth,
                rate_limiter_wait_ms,
                config_watch_latency_ms,
                config_apply_latency_ms,
                config_update_failures_total,
                config_watch_slow_total,
                guardrail_violations_total,
            }),
        })
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the discovered-torrent counter for a site's RSS feed.
    pub fn inc_torrent_discovered(&self, site: &str) {
        self.inner
            .torrents_discovered_total
            .with_label_values(&[site])
            .inc();
    }

    /// Increment the skipped-torrent counter for a site, tagged by the
    /// reason the pipeline dropped it (filter mismatch, duplicate, etc).
    pub fn inc_torrent_skipped(&self, site: &str, reason: &str) {
        self.inner
            .torrents_skipped_total
            .with_label_values(&[site, reason])
            .inc();
    }

    /// Increment the downloaded-torrent counter for a site.
    pub fn inc_torrent_downloaded(&self, site: &str) {
        self.inner
            .torrents_downloaded_total
            .with_label_values(&[site])
            .inc();
    }

    /// Increment the push counter for a downloader, tagged by outcome
    /// (`ok`, `rejected`, `error`).
    pub fn inc_torrent_pushed(&self, downloader: &str, outcome: &str) {
        self.inner
            .torrents_pushed_total
            .with_label_values(&[downloader, outcome])
            .inc();
    }

    /// Increment the purge counter, tagged by the reason the cleanup
    /// monitor removed the torrent (ratio met, seed time met, disk space).
    pub fn inc_torrent_purged(&self, reason: &str) {
        self.inner
            .torrents_purged_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Increment the cleanup action counter for an action/outcome pair.
    pub fn inc_cleanup_action(&self, action: &str, outcome: &str) {
        self.inner
            .cleanup_actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    /// Set the active torrent gauge.
    pub fn set_active_torrents(&self, count: i64) {
        self.inner.active_torrents.set(count);
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Record how long a site waited to acquire the rate limiter.
    pub fn observe_rate_limiter_wait(&self, duration: Duration) {
        self.inner
            .rate_limiter_wait_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Record the observed latency while waiting for configuration updates.
    pub fn observe_config_watch_latency(&self, duration: Duration) {
        self.inner
            .config_watch_latency_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Record the observed latency for applying configuration updates.
    pub fn observe_config_apply_latency(&self, duration: Duration) {
        self.inner
            .config_apply_latency_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Increment the configuration update failure counter.
    pub fn inc_config_update_failure(&self) {
        self.inner.config_update_failures_total.inc();
    }

    /// Increment the counter tracking slow configuration applications.
    pub fn inc_config_watch_slow(&self) {
        self.inner.config_watch_slow_total.inc();
    }

    /// Increment the guardrail violation counter (e.g. setup loopback enforcement).
    pub fn inc_guardrail_violation(&self) {
        self.inner.guardrail_violations_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_torrents: self.inner.active_torrents.get(),
            queue_depth: self.inner.queue_depth.get(),
            rate_limiter_wait_ms: self.inner.rate_limiter_wait_ms.get(),
            config_watch_latency_ms: self.inner.config_watch_latency_ms.get(),
            config_apply_latency_ms: self.inner.config_apply_latency_ms.get(),
            config_update_failures_total: self.inner.config_update_failures_total.get(),
            config_watch_slow_total: self.inner.config_watch_slow_total.get(),
            guardrail_violations_total: self.inner.guardrail_violations_total.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn duration_to_ms_saturates_on_large_values() {
        let duration = Duration::from_secs(u64::MAX / 2);
        assert_eq!(Metrics::duration_to_ms(duration), i64::MAX);
    }

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_event("torrent_added");
        metrics.inc_torrent_discovered("site-a");
        metrics.inc_torrent_skipped("site-a", "duplicate");
        metrics.inc_torrent_downloaded("site-a");
        metrics.inc_torrent_pushed("qb1", "ok");
        metrics.inc_torrent_purged("ratio_met");
        metrics.inc_cleanup_action("seed_time_check", "purged");
        metrics.set_active_torrents(5);
        metrics.set_queue_depth(2);
        metrics.observe_rate_limiter_wait(Duration::from_millis(30));
        metrics.observe_config_watch_latency(Duration::from_millis(120));
        metrics.observe_config_apply_latency(Duration::from_millis(45));
        metrics.inc_config_update_failure();
        metrics.inc_config_watch_slow();
        metrics.inc_guardrail_violation();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_torrents, 5);
        assert_eq!(snapshot.queue_depth, 2);
        assert_eq!(snapshot.rate_limiter_wait_ms, 30);
        assert_eq!(snapshot.config_watch_latency_ms, 120);
        assert_eq!(snapshot.config_apply_latency_ms, 45);
        assert_eq!(snapshot.config_update_failures_total, 1);
        assert_eq!(snapshot.config_watch_slow_total, 1);
        assert_eq!(snapshot.guardrail_violations_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("torrents_discovered_total"));
        assert!(rendered.contains("torrents_pushed_total"));
        assert!(rendered.contains("cleanup_actions_total"));
        assert!(rendered.contains("config_guardrail_violations_total"));
        Ok(())
    }
}

//! `RSSWorkerPool`: one background task per enabled `RssSubscription`.
//!
//! Each [`Worker`] owns a ticker on its subscription's poll interval. Every
//! tick it fetches the feed, then fans out [`TorrentPipeline::process`] over
//! the returned items with bounded concurrency so one slow detail page never
//! serialises an entire feed.

use std::sync::Arc;
use std::time::Duration;

use ratioguard_config::{ConfigService, RssSubscription, Site};
use ratioguard_core::{SiteContext, SiteDriver};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::pipeline::TorrentPipeline;
use ratioguard_ratelimit::RateLimiter;

/// Concurrent detail-fetch/push tasks a single worker runs per feed tick,
/// absent any future per-subscription override.
const DEFAULT_FAN_OUT: usize = 3;

/// Shared dependencies every worker needs, cloned cheaply (all `Arc`-backed)
/// into each spawned task.
#[derive(Clone)]
pub struct WorkerDeps {
    /// Facade over persisted configuration and torrent state.
    pub config: Arc<ConfigService>,
    /// Shared per-candidate state machine.
    pub pipeline: Arc<TorrentPipeline>,
    /// Shared sliding-window limiter all sites draw from.
    pub rate_limiter: Arc<RateLimiter>,
}

/// A running poll loop for one subscription. Dropping a `Worker` does not
/// stop it; callers must call [`Worker::stop`] and optionally
/// [`Worker::join`].
pub struct Worker {
    subscription_id: i64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a poll loop for `subscription` against `site`, using `driver`
    /// for feed/detail fetches. `cancel` is a child of the engine's root
    /// token so a global shutdown stops every worker at once.
    #[must_use]
    pub fn spawn(
        deps: WorkerDeps,
        site: Site,
        subscription: RssSubscription,
        driver: Arc<dyn SiteDriver>,
        cancel: CancellationToken,
    ) -> Self {
        let subscription_id = subscription.id;
        let worker_cancel = cancel.child_token();
        let handle = tokio::spawn(run(
            deps,
            site,
            subscription,
            driver,
            worker_cancel.clone(),
            DEFAULT_FAN_OUT,
        ));
        Self {
            subscription_id,
            cancel: worker_cancel,
            handle,
        }
    }

    /// The subscription this worker polls.
    #[must_use]
    pub const fn subscription_id(&self) -> i64 {
        self.subscription_id
    }

    /// Signal the poll loop to stop after its current tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the poll loop to exit. Callers should call [`Worker::stop`]
    /// first; otherwise this waits for the subscription's natural lifetime.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

#[instrument(skip(deps, site, subscription, driver, cancel), fields(subscription_id = subscription.id, site = %site.id))]
async fn run(
    deps: WorkerDeps,
    site: Site,
    subscription: RssSubscription,
    driver: Arc<dyn SiteDriver>,
    cancel: CancellationToken,
    fan_out: usize,
) {
    let period = Duration::from_secs(subscription.interval_minutes.max(1) as u64 * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick; wait a full period before polling

    let ctx = SiteContext {
        site_id: site.id.clone(),
        api_url: site.api_url.clone(),
        cookie: site.cookie.clone(),
        api_key: site.api_key.clone(),
        passkey: site.passkey.clone(),
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = match deps.config.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "failed to load config snapshot, skipping this tick");
                continue;
            }
        };
        let Some(current_site) = snapshot.sites.iter().find(|s| s.id == site.id) else {
            warn!("site no longer configured, stopping worker");
            break;
        };
        let Some(current_subscription) = snapshot
            .subscriptions
            .iter()
            .find(|s| s.id == subscription.id)
        else {
            warn!("subscription no longer configured, stopping worker");
            break;
        };
        if !current_site.enabled || !current_subscription.enabled {
            debug!("site or subscription disabled, skipping this tick");
            continue;
        }

        let items = match driver.fetch_feed(&ctx, &current_subscription.url).await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "feed fetch failed, backing off one period");
                continue;
            }
        };

        process_items(&deps, &driver, current_site, current_subscription, &ctx, &snapshot, items, fan_out, &cancel).await;

        if let Err(err) =
            ratioguard_data::sites::touch_subscription_checked(deps.config.pool(), subscription.id)
                .await
        {
            warn!(error = %err, "failed to stamp last_check_time");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_items(
    deps: &WorkerDeps,
    driver: &Arc<dyn SiteDriver>,
    site: &Site,
    subscription: &RssSubscription,
    ctx: &SiteContext,
    snapshot: &ratioguard_config::Config,
    items: Vec<ratioguard_core::FeedItem>,
    fan_out: usize,
    cancel: &CancellationToken,
) {
    let site = Arc::new(site.clone());
    let subscription = Arc::new(subscription.clone());
    let ctx = Arc::new(ctx.clone());
    let snapshot = Arc::new(snapshot.clone());
    let semaphore = Arc::new(Semaphore::new(fan_out.max(1)));
    let mut set = JoinSet::new();

    for item in items {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let deps = deps.clone();
        let driver = Arc::clone(driver);
        let site = Arc::clone(&site);
        let subscription = Arc::clone(&subscription);
        let ctx = Arc::clone(&ctx);
        let snapshot = Arc::clone(&snapshot);
        let cancel = cancel.clone();
        let guid = item.guid.clone();

        set.spawn(async move {
            let _permit = permit;
            let outcome = deps
                .pipeline
                .process(
                    &site,
                    &ctx,
                    &subscription,
                    driver.as_ref(),
                    &deps.rate_limiter,
                    &snapshot,
                    item,
                    &cancel,
                )
                .await;
            match outcome {
                Ok(outcome) => debug!(guid, ?outcome, "candidate processed"),
                Err(err) => warn!(guid, error = %err, "candidate processing failed"),
            }
        });
    }

    while set.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use ratioguard_config::ConfigService;
    use ratioguard_core::{DetailParser, FeedItem, SiteContext, SiteError, SiteResult};
    use ratioguard_test_support::feed_item;

    use super::*;

    struct CountingDriver {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SiteDriver for CountingDriver {
        async fn fetch_feed(
            &self,
            _ctx: &SiteContext,
            _url: &str,
        ) -> SiteResult<Vec<FeedItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![feed_item("1", "demo-item")])
        }

        async fn fetch_detail(
            &self,
            ctx: &SiteContext,
            item: &FeedItem,
        ) -> SiteResult<ratioguard_core::TorrentCandidate> {
            Err(SiteError::Parse {
                site: ctx.site_id.clone(),
                message: format!("test driver cannot fetch detail for {}", item.guid),
            })
        }

        fn is_enabled(&self) -> bool {
            true
        }
    }

    fn sample_site() -> Site {
        Site {
            id: "demo".to_string(),
            name: "Demo".to_string(),
            schema: "nexus_php".to_string(),
            urls: vec!["https://tracker.example".to_string()],
            auth_method: "cookie".to_string(),
            cookie: Some("uid=1".to_string()),
            api_key: None,
            passkey: None,
            api_url: None,
            enabled: true,
            rate_limit_per_sec: 1.0,
            is_builtin: false,
            downloader_id: None,
            revision: 1,
        }
    }

    fn sample_subscription() -> RssSubscription {
        RssSubscription {
            id: 1,
            site_id: "demo".to_string(),
            name: "Movies".to_string(),
            url: "https://tracker.example/rss".to_string(),
            category: None,
            tag: None,
            interval_minutes: 1,
            downloader_id: None,
            download_path: None,
            pause_on_free_end: false,
            enabled: true,
            filter_rule_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn worker_stop_ends_the_poll_loop_promptly() {
        let pool = ratioguard_data::open_in_memory_for_tests().await;
        let events = ratioguard_events::EventBus::with_capacity(16);
        let config = Arc::new(ConfigService::new(pool, "/tmp/ratioguard-worker-test", events));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.pool().clone(),
            chrono::Duration::seconds(60),
            100,
        ));
        let http = reqwest::Client::new();
        let fetch = Arc::new(ratioguard_fetch::FetchClient::new(http.clone(), 1, StdDuration::from_millis(1)));
        let downloaders = Arc::new(ratioguard_downloader::DownloaderManager::build(&http, &[]));
        let metrics = Arc::new(ratioguard_telemetry::Metrics::new().unwrap());
        let pipeline = Arc::new(TorrentPipeline::new(
            Arc::clone(&config),
            fetch,
            downloaders,
            metrics,
        ));
        let deps = WorkerDeps {
            config,
            pipeline,
            rate_limiter,
        };

        let calls = Arc::new(AtomicUsize::new(0));
        let driver: Arc<dyn SiteDriver> = Arc::new(CountingDriver {
            calls: Arc::clone(&calls),
        });

        let cancel = CancellationToken::new();
        let worker = Worker::spawn(deps, sample_site(), sample_subscription(), driver, cancel);
        worker.stop();
        tokio::time::timeout(StdDuration::from_secs(1), worker.join())
            .await
            .expect("worker should stop promptly once cancelled");
    }
}

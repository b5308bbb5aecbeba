//! Worker-pool lifecycle: maps enabled subscriptions onto running
//! [`Worker`]s and reconciles that map whenever configuration changes.
//!
//! Reconfiguration is debounced: a burst of `ConfigChanged` events (e.g. a
//! user editing several subscriptions in a row) coalesces into one
//! reconcile pass three seconds after the last one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ratioguard_config::{Site, RssSubscription};
use ratioguard_events::{ConfigSource, Event};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::sites;
use crate::worker::{Worker, WorkerDeps};

/// How long to wait after the last relevant `ConfigChanged` event before
/// reconciling the worker map.
const DEBOUNCE: Duration = Duration::from_secs(3);

struct RunningWorker {
    worker: Worker,
    schema: String,
    interval_minutes: i64,
}

/// Owns the full set of [`Worker`]s and keeps it in sync with persisted
/// configuration.
pub struct Scheduler {
    deps: WorkerDeps,
    http: reqwest::Client,
    workers: Mutex<HashMap<i64, RunningWorker>>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl Scheduler {
    /// Build a scheduler that spawns workers as children of `cancel`, so a
    /// single root cancellation stops every worker along with the
    /// scheduler's own reconcile loop.
    #[must_use]
    pub fn new(deps: WorkerDeps, http: reqwest::Client, cancel: CancellationToken) -> Self {
        Self {
            deps,
            http,
            workers: Mutex::new(HashMap::new()),
            cancel,
            stopped: AtomicBool::new(false),
        }
    }

    /// Run the reconcile loop until cancelled. Performs an initial
    /// reconcile immediately, then again on every debounced burst of
    /// `Sites`/`RssSubscriptions` changes.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        self.reconcile().await;

        let mut stream = self.deps.config.events().subscribe(None);
        let mut pending = false;
        let debounce = tokio::time::sleep(DEBOUNCE);
        tokio::pin!(debounce);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                next = stream.next() => {
                    match next {
                        Some(envelope) if is_reconcile_trigger(&envelope.event) => {
                            pending = true;
                            debounce.as_mut().reset(tokio::time::Instant::now() + DEBOUNCE);
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                () = &mut debounce, if pending => {
                    pending = false;
                    self.reconcile().await;
                }
            }
        }
    }

    /// Stop the scheduler and every worker it manages. Safe to call more
    /// than once; only the first call has any effect.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let mut workers = self.workers.lock().await;
        for (_, running) in workers.drain() {
            running.worker.stop();
            running.worker.join().await;
        }
    }

    /// Recompute the desired worker set from the latest configuration
    /// snapshot and reconcile running workers to match it.
    async fn reconcile(&self) {
        let snapshot = match self.deps.config.load_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "failed to load config snapshot during reconcile");
                return;
            }
        };

        let mut desired: HashMap<i64, (Site, RssSubscription)> = HashMap::new();
        for site in snapshot.sites.iter().filter(|site| site.enabled) {
            for subscription in snapshot
                .subscriptions_for_site(&site.id)
                .filter(|subscription| subscription.enabled)
            {
                desired.insert(subscription.id, (site.clone(), subscription.clone()));
            }
        }

        let mut workers = self.workers.lock().await;

        let stale: Vec<i64> = workers
            .iter()
            .filter(|(id, running)| match desired.get(id) {
                None => true,
                Some((site, subscription)) => {
                    running.schema != site.schema
                        || running.interval_minutes != subscription.interval_minutes
                }
            })
            .map(|(id, _)| *id)
            .collect();

        for id in stale {
            if let Some(running) = workers.remove(&id) {
                running.worker.stop();
                running.worker.join().await;
            }
        }

        for (id, (site, subscription)) in desired {
            if workers.contains_key(&id) {
                continue;
            }
            let Some(schema) = sites::parse_schema(&site.schema) else {
                warn!(site = %site.id, schema = %site.schema, "unknown site schema, skipping");
                continue;
            };
            let Some(driver) = sites::driver_for(schema, self.http.clone()) else {
                warn!(site = %site.id, schema = %site.schema, "no driver implementation for schema, skipping");
                continue;
            };
            info!(subscription_id = id, site = %site.id, "starting worker");
            let schema_label = site.schema.clone();
            let interval_minutes = subscription.interval_minutes;
            let worker = Worker::spawn(
                self.deps.clone(),
                site,
                subscription,
                driver,
                self.cancel.child_token(),
            );
            workers.insert(
                id,
                RunningWorker {
                    worker,
                    schema: schema_label,
                    interval_minutes,
                },
            );
        }
    }
}

fn is_reconcile_trigger(event: &Event) -> bool {
    matches!(
        event,
        Event::ConfigChanged {
            source: ConfigSource::Sites | ConfigSource::RssSubscriptions,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use ratioguard_config::ConfigService;

    use super::*;
    use crate::pipeline::TorrentPipeline;
    use std::sync::Arc;

    async fn deps() -> (WorkerDeps, Arc<ConfigService>) {
        let pool = ratioguard_data::open_in_memory_for_tests().await;
        let events = ratioguard_events::EventBus::with_capacity(32);
        let config = Arc::new(ConfigService::new(pool, "/tmp/ratioguard-scheduler-test", events));
        let rate_limiter = Arc::new(ratioguard_ratelimit::RateLimiter::new(
            config.pool().clone(),
            chrono::Duration::seconds(60),
            100,
        ));
        let http = reqwest::Client::new();
        let fetch = Arc::new(ratioguard_fetch::FetchClient::new(
            http.clone(),
            1,
            StdDuration::from_millis(1),
        ));
        let downloaders = Arc::new(ratioguard_downloader::DownloaderManager::build(&http, &[]));
        let metrics = Arc::new(ratioguard_telemetry::Metrics::new().unwrap());
        let pipeline = Arc::new(TorrentPipeline::new(
            Arc::clone(&config),
            fetch,
            downloaders,
            metrics,
        ));
        (
            WorkerDeps {
                config: Arc::clone(&config),
                pipeline,
                rate_limiter,
            },
            config,
        )
    }

    #[tokio::test]
    async fn reconcile_with_no_sites_spawns_no_workers() {
        let (deps, _config) = deps().await;
        let http = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(deps, http, cancel);
        scheduler.reconcile().await;
        assert!(scheduler.workers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (deps, _config) = deps().await;
        let http = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let scheduler = Scheduler::new(deps, http, cancel);
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(scheduler.cancel.is_cancelled());
    }
}

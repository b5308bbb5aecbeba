//! Process bootstrap: environment loading, service construction, and the
//! top-level run loop.
//!
//! Layout mirrors the binary's shape rather than the admin-surface style the
//! teacher's bootstrap once had: there is no HTTP listener here, only a
//! [`Scheduler`] and a [`CleanupMonitor`] running under one root
//! [`CancellationToken`] until a shutdown signal arrives.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use ratioguard_config::ConfigService;
use ratioguard_downloader::DownloaderManager;
use ratioguard_events::EventBus;
use ratioguard_fetch::FetchClient;
use ratioguard_ratelimit::RateLimiter;
use ratioguard_telemetry::{GlobalContextGuard, LoggingConfig, Metrics, OpenTelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cleanup::CleanupMonitor;
use crate::error::{AppError, AppResult};
use crate::pipeline::TorrentPipeline;
use crate::scheduler::Scheduler;
use crate::worker::WorkerDeps;

/// Capacity of the process-wide event replay ring.
const EVENT_BUS_CAPACITY: usize = 1024;
/// `.torrent` fetch retry budget.
const FETCH_MAX_RETRY: u32 = 3;
/// Delay between `.torrent` fetch retries.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Fallback admissions-per-window used until per-site limits are supported
/// (see `DESIGN.md`'s `ratioguard-ratelimit` entry).
const DEFAULT_RATE_LIMIT_MAX_PER_WINDOW: u32 = 30;

/// Dependencies required to bootstrap the application, built once from the
/// environment and consumed by [`run_app_with`].
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    otel_config: Option<OpenTelemetryConfig<'static>>,
    config: Arc<ConfigService>,
    downloaders: Arc<DownloaderManager>,
    rate_limiter: Arc<RateLimiter>,
    pipeline: Arc<TorrentPipeline>,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
    _lock: std::fs::File,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the
    /// binary entrypoint.
    pub(crate) async fn from_env() -> AppResult<Self> {
        let logging = LoggingConfig::default();
        let otel_config = load_otel_config_from_env();

        let workdir = env_path("RATIOGUARD_WORKDIR", ".");
        std::fs::create_dir_all(&workdir).map_err(|source| AppError::Io {
            operation: "create_dir_all(workdir)",
            path: Some(workdir.clone()),
            source,
        })?;
        let lock = acquire_instance_lock(&workdir)?;

        let database_path = env_path(
            "RATIOGUARD_DATABASE_PATH",
            workdir.join("ratioguard.db").to_string_lossy().as_ref(),
        );
        let pool = ratioguard_data::connect(&database_path)
            .await
            .map_err(|err| AppError::data("ratioguard_data::connect", err))?;

        let events = EventBus::with_capacity(EVENT_BUS_CAPACITY);
        let config = Arc::new(ConfigService::new(pool.clone(), workdir.clone(), events));
        let metrics =
            Arc::new(Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?);

        // `reqwest::Client` honours `ALL_PROXY`/`HTTP_PROXY`/`HTTPS_PROXY`
        // from the environment by default; no explicit wiring is needed.
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|source| AppError::Io {
                operation: "reqwest::Client::build",
                path: None,
                source: std::io::Error::other(source.to_string()),
            })?;

        let snapshot = config
            .load_snapshot()
            .await
            .map_err(|err| AppError::config("config_service.load_snapshot", err))?;

        let downloaders = Arc::new(DownloaderManager::build(&http, &snapshot.downloaders));
        let rate_limiter = Arc::new(RateLimiter::with_default_window(
            pool,
            DEFAULT_RATE_LIMIT_MAX_PER_WINDOW,
        ));
        let fetch = Arc::new(FetchClient::new(
            http.clone(),
            FETCH_MAX_RETRY,
            FETCH_RETRY_DELAY,
        ));
        let pipeline = Arc::new(TorrentPipeline::new(
            Arc::clone(&config),
            fetch,
            Arc::clone(&downloaders),
            Arc::clone(&metrics),
        ));

        Ok(Self {
            logging,
            otel_config,
            config,
            downloaders,
            rate_limiter,
            pipeline,
            metrics,
            http,
            _lock: lock,
        })
    }
}

/// Entry point for the application boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or the run loop fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env().await?;
    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies, so tests can
/// construct a [`BootstrapDependencies`] against an in-memory database.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let otel_ref = dependencies
        .otel_config
        .as_ref()
        .map(|cfg| cfg as &OpenTelemetryConfig);
    let _otel_guard = ratioguard_telemetry::init_logging_with_otel(&dependencies.logging, otel_ref)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("bootstrap");

    info!("ratioguard bootstrap starting");

    let BootstrapDependencies {
        logging: _,
        otel_config: _,
        config,
        downloaders,
        rate_limiter,
        pipeline,
        metrics,
        http,
        _lock,
    } = dependencies;

    let cancel = CancellationToken::new();
    let deps = WorkerDeps {
        config: Arc::clone(&config),
        pipeline,
        rate_limiter,
    };

    let scheduler = Arc::new(Scheduler::new(deps, http, cancel.child_token()));
    let cleanup = Arc::new(CleanupMonitor::new(config, downloaders, metrics));

    let scheduler_task = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });
    let cleanup_cancel = cancel.child_token();
    let cleanup_task = tokio::spawn(async move { cleanup.run(cleanup_cancel).await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to install shutdown signal handler");
            }
            info!("shutdown signal received");
        }
        () = cancel.cancelled() => {}
    }

    scheduler.stop().await;
    cancel.cancel();

    if let Err(err) = scheduler_task.await {
        tracing::warn!(error = %err, "scheduler task join failed");
    }
    if let Err(err) = cleanup_task.await {
        tracing::warn!(error = %err, "cleanup task join failed");
    }

    info!("ratioguard shutdown complete");
    Ok(())
}

/// Acquire an exclusive advisory lock on `<workdir>/.ratioguard.lock`,
/// refusing to start a second instance against the same work directory.
fn acquire_instance_lock(workdir: &Path) -> AppResult<std::fs::File> {
    let path = workdir.join(".ratioguard.lock");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&path)
        .map_err(|source| AppError::Io {
            operation: "open lock file",
            path: Some(path.clone()),
            source,
        })?;
    file.try_lock_exclusive()
        .map_err(|_| AppError::AlreadyRunning { path: path.clone() })?;
    Ok(file)
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn load_otel_config_from_env() -> Option<OpenTelemetryConfig<'static>> {
    let enabled = env_flag("RATIOGUARD_ENABLE_OTEL");
    let service_name = std::env::var("RATIOGUARD_OTEL_SERVICE_NAME")
        .unwrap_or_else(|_| "ratioguard-engine".to_string());
    let endpoint = std::env::var("RATIOGUARD_OTEL_EXPORTER").ok();
    otel_config_from_values(enabled, service_name, endpoint)
}

fn env_flag(name: &str) -> bool {
    env_flag_value(std::env::var(name).ok().as_deref())
}

fn env_flag_value(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn otel_config_from_values(
    enabled: bool,
    service_name: String,
    endpoint: Option<String>,
) -> Option<OpenTelemetryConfig<'static>> {
    if !enabled {
        return None;
    }
    Some(OpenTelemetryConfig {
        enabled: true,
        service_name: Cow::Owned(service_name),
        endpoint: endpoint.map(Cow::Owned),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_handles_truthy_and_falsey() {
        assert!(env_flag_value(Some("TrUe")));
        assert!(!env_flag_value(Some("no")));
        assert!(!env_flag_value(None));
    }

    #[test]
    fn load_otel_config_reads_values() {
        let cfg = otel_config_from_values(true, "svc".into(), Some("http://collector".into()))
            .expect("otel config");
        assert_eq!(cfg.service_name.as_ref(), "svc");
        assert_eq!(cfg.endpoint.as_deref(), Some("http://collector"));
        assert!(otel_config_from_values(false, "svc".into(), None).is_none());
    }

    #[test]
    fn acquire_instance_lock_rejects_a_second_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _first = acquire_instance_lock(dir.path()).expect("first lock");
        let second = acquire_instance_lock(dir.path());
        assert!(matches!(second, Err(AppError::AlreadyRunning { .. })));
    }

    #[test]
    fn env_path_falls_back_to_default_when_unset() {
        let resolved = env_path("RATIOGUARD_DOES_NOT_EXIST_IN_TESTS", "/tmp/default");
        assert_eq!(resolved, PathBuf::from("/tmp/default"));
    }
}

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
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Per-site sliding-window rate limiter. Admissions are persisted so a
//! restarted engine reconstructs the in-flight window instead of
//! burst-flooding a site it was already near the limit with.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Errors raised while acquiring a rate-limit slot.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The caller's context was cancelled while waiting for a slot.
    #[error("rate limiter wait cancelled for site {site_id}")]
    ContextCancelled {
        /// Site the caller was waiting on.
        site_id: String,
    },
    /// The limiter has been shut down and accepts no further admissions.
    #[error("rate limiter is shutting down")]
    RateLimitShutdown,
    /// Persisting or reloading admission state failed.
    #[error("rate limiter persistence failed")]
    Data(#[from] ratioguard_data::DataError),
}

/// Result alias for [`RateLimiter`] operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

struct SiteWindow {
    admissions: VecDeque<DateTime<Utc>>,
}

/// Persistent per-site sliding-window limiter.
///
/// Each site gets an independent window of length `window` holding at most
/// `max_per_window` admissions. [`RateLimiter::acquire`] blocks the caller
/// until either a slot frees up or the supplied [`CancellationToken`] fires.
pub struct RateLimiter {
    pool: SqlitePool,
    window: Duration,
    max_per_window: u32,
    sites: Mutex<HashMap<String, SiteWindow>>,
    shutting_down: AtomicBool,
}

impl RateLimiter {
    /// Construct a limiter with no in-memory state loaded yet; each site's
    /// window is reconstructed lazily from `rate_limit_state` the first time
    /// [`RateLimiter::acquire`] is called for it.
    #[must_use]
    pub fn new(pool: SqlitePool, window: Duration, max_per_window: u32) -> Self {
        Self {
            pool,
            window,
            max_per_window,
            sites: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Construct a limiter using the default 60 second admission window.
    #[must_use]
    pub fn with_default_window(pool: SqlitePool, max_per_window: u32) -> Self {
        Self::new(pool, Duration::seconds(60), max_per_window)
    }

    /// Stop admitting new requests; any caller currently blocked in
    /// [`RateLimiter::acquire`] will observe [`RateLimitError::RateLimitShutdown`]
    /// the next time it wakes.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Block until a slot opens in `site_id`'s window, the `cancel` token
    /// fires, or the limiter is shut down.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::ContextCancelled`] if `cancel` fires first,
    /// [`RateLimitError::RateLimitShutdown`] if [`RateLimiter::shutdown`] was
    /// called, or [`RateLimitError::Data`] if persisting the admission or
    /// reloading window state fails.
    pub async fn acquire(&self, site_id: &str, cancel: &CancellationToken) -> Result<()> {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(RateLimitError::RateLimitShutdown);
            }
            if cancel.is_cancelled() {
                return Err(RateLimitError::ContextCancelled {
                    site_id: site_id.to_string(),
                });
            }

            let now = Utc::now();
            let wait = {
                let mut sites = self.sites.lock().await;
                let window = self.load_window(&mut sites, site_id).await?;
                prune(window, now - self.window);

                if window.admissions.len() < self.max_per_window as usize {
                    window.admissions.push_back(now);
                    None
                } else {
                    let oldest = *window.admissions.front().expect("window at capacity is non-empty");
                    Some(oldest + self.window - now)
                }
            };

            let Some(wait) = wait else {
                ratioguard_data::ratelimit::record_admission(&self.pool, site_id, now).await?;
                return Ok(());
            };

            let wait = wait.to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = cancel.cancelled() => {
                    return Err(RateLimitError::ContextCancelled {
                        site_id: site_id.to_string(),
                    });
                }
            }
        }
    }

    /// Load (if absent from the in-memory map) and return the window for
    /// `site_id`, seeding it from persisted admissions on first touch.
    async fn load_window<'a>(
        &self,
        sites: &'a mut HashMap<String, SiteWindow>,
        site_id: &str,
    ) -> Result<&'a mut SiteWindow> {
        if !sites.contains_key(site_id) {
            let since = Utc::now() - self.window;
            let rows = ratioguard_data::ratelimit::list_since(&self.pool, site_id, since).await?;
            let mut admissions = VecDeque::with_capacity(rows.len());
            for (window_start, count) in rows {
                for _ in 0..count.max(0) {
                    admissions.push_back(window_start);
                }
            }
            sites.insert(site_id.to_string(), SiteWindow { admissions });
        }
        Ok(sites.get_mut(site_id).expect("just inserted"))
    }

    /// Drop state for sites no longer configured, bounding memory use across
    /// reconfiguration events.
    pub async fn retain_sites<'a>(&self, keep: impl Iterator<Item = &'a str>) {
        let keep: std::collections::HashSet<&str> = keep.collect();
        let mut sites = self.sites.lock().await;
        sites.retain(|id, _| keep.contains(id.as_str()));
    }
}

fn prune(window: &mut SiteWindow, before: DateTime<Utc>) {
    while let Some(front) = window.admissions.front() {
        if *front < before {
            window.admissions.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn limiter(max_per_window: u32) -> RateLimiter {
        let pool = ratioguard_data::open_in_memory_for_tests().await;
        RateLimiter::new(pool, Duration::milliseconds(200), max_per_window)
    }

    #[tokio::test]
    async fn admits_up_to_the_window_capacity_immediately() {
        let limiter = limiter(2).await;
        let cancel = CancellationToken::new();
        limiter.acquire("site-a", &cancel).await.unwrap();
        limiter.acquire("site-a", &cancel).await.unwrap();

        let count = ratioguard_data::ratelimit::count_since(
            &limiter.pool,
            "site-a",
            Utc::now() - Duration::seconds(1),
        )
        .await
        .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn blocks_until_the_window_advances() {
        let limiter = limiter(1).await;
        let cancel = CancellationToken::new();
        limiter.acquire("site-b", &cancel).await.unwrap();

        let started = tokio::time::Instant::now();
        limiter.acquire("site-b", &cancel).await.unwrap();
        assert!(started.elapsed() >= StdDuration::from_millis(150));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_blocked_wait() {
        let limiter = limiter(1).await;
        let cancel = CancellationToken::new();
        limiter.acquire("site-c", &cancel).await.unwrap();

        let child = cancel.child_token();
        child.cancel();
        let err = limiter.acquire("site-c", &child).await.unwrap_err();
        assert!(matches!(err, RateLimitError::ContextCancelled { .. }));
    }

    #[tokio::test]
    async fn shutdown_rejects_further_admissions() {
        let limiter = limiter(10).await;
        limiter.shutdown();
        let cancel = CancellationToken::new();
        let err = limiter.acquire("site-d", &cancel).await.unwrap_err();
        assert!(matches!(err, RateLimitError::RateLimitShutdown));
    }

    #[tokio::test]
    async fn reloads_persisted_admissions_on_first_touch() {
        let pool = ratioguard_data::open_in_memory_for_tests().await;
        let now = Utc::now();
        ratioguard_data::ratelimit::record_admission(&pool, "site-e", now)
            .await
            .unwrap();

        let limiter = RateLimiter::new(pool, Duration::seconds(60), 1);
        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(
            StdDuration::from_millis(50),
            limiter.acquire("site-e", &cancel),
        )
        .await;
        assert!(
            result.is_err(),
            "single-slot window should still be occupied by the reloaded admission"
        );
    }
}

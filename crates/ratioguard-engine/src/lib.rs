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
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! RatioGuard application bootstrap and orchestration.
//!
//! Layout: `bootstrap.rs` (service wiring), `sites` (`SiteDriver`
//! implementations and schema registry), `pipeline.rs` (per-candidate state
//! machine), `worker.rs` (per-subscription poll loop), `scheduler.rs`
//! (worker lifecycle, reacting to `ConfigChanged`), `cleanup.rs`
//! (retention/ratio/disk-pressure sweeps).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Periodic retention, ratio and disk-pressure sweeps over pushed torrents.
pub mod cleanup;
/// Application-level error types.
pub mod error;
/// Per-candidate download/push state machine.
pub mod pipeline;
/// Worker-pool lifecycle: maps subscriptions to running workers.
pub mod scheduler;
/// `SiteDriver` implementations and the schema registry.
pub mod sites;
/// Per-subscription RSS poll loop.
pub mod worker;

pub use bootstrap::run_app;

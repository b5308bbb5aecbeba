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
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]
#![allow(unexpected_cfgs)]

//! In-process fakes for the [`ratioguard_core::Downloader`] and
//! [`ratioguard_core::SiteDriver`] capability traits, shared by
//! `ratioguard-engine`'s pipeline and worker-pool tests so those suites never
//! need a real downloader or tracker to exercise their state machines.

mod fixtures;

pub use fixtures::{
    accepted, feed_item, fixed_now, free_candidate, DownloaderErrorKind, RecordingDownloader,
    RecordingSiteDriver, SiteErrorKind,
};

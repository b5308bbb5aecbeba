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

//! Domain model, capability traits and filter engine shared across the
//! workspace: the types every site driver, downloader adapter and pipeline
//! stage agree on.

pub mod downloader;
pub mod error;
pub mod filter;
pub mod model;
pub mod site;

pub use downloader::{AddTorrentRequest, Downloader, DownloaderTorrent, TorrentProperties};
pub use error::{DownloaderError, DownloaderResult, SiteError, SiteResult};
pub use filter::{Decision, FilterEngine, FilterPredicate, FilterRule};
pub use model::{DiscountLevel, FeedItem, TorrentCandidate};
pub use site::{DetailParser, SiteContext, SiteDriver, SiteSchema};

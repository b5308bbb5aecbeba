//! Site driver implementations and the schema registry that selects among
//! them. The pipeline and worker pool depend only on
//! [`ratioguard_core::SiteDriver`]; this module is the only place that knows
//! concrete schemas exist.

mod feed;
mod mtorrent;
mod nexusphp;

use std::sync::Arc;

use ratioguard_core::{SiteDriver, SiteSchema};

pub use mtorrent::MTorrentDriver;
pub use nexusphp::{NexusPhpDriver, NexusPhpParser};

/// Build the [`SiteDriver`] for `schema`, or `None` for schemas this build
/// recognises but does not implement (`Unit3D`, `Gazelle`).
#[must_use]
pub fn driver_for(schema: SiteSchema, http: reqwest::Client) -> Option<Arc<dyn SiteDriver>> {
    match schema {
        SiteSchema::NexusPhp => Some(Arc::new(NexusPhpDriver::new(http))),
        SiteSchema::MTorrent => Some(Arc::new(MTorrentDriver::new(http))),
        SiteSchema::Unit3D | SiteSchema::Gazelle => None,
    }
}

/// Parse a [`ratioguard_config::Site::schema`] string (the raw, persisted
/// value) into the typed [`SiteSchema`] the driver registry keys on.
#[must_use]
pub fn parse_schema(raw: &str) -> Option<SiteSchema> {
    match raw {
        "nexus_php" => Some(SiteSchema::NexusPhp),
        "mtorrent" => Some(SiteSchema::MTorrent),
        "unit3d" => Some(SiteSchema::Unit3D),
        "gazelle" => Some(SiteSchema::Gazelle),
        _ => None,
    }
}

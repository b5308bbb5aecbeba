//! `SiteDriver` capability: polymorphic access to a tracker's feed and
//! detail-page surface, independent of the specific site schema.

use async_trait::async_trait;

use crate::error::SiteResult;
use crate::model::{FeedItem, TorrentCandidate};

/// Tracker schema family. New trackers are onboarded by adding a variant and
/// a `SiteDriver` implementation; the pipeline never matches on this beyond
/// selecting the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteSchema {
    /// Scraped HTML, cookie-authenticated `NexusPHP`-family trackers.
    NexusPhp,
    /// JSON API, `x-api-key`-authenticated `mTorrent`-family trackers.
    MTorrent,
    /// `Unit3D`-family trackers (recognised, not implemented by this build).
    Unit3D,
    /// `Gazelle`-family trackers (recognised, not implemented by this build).
    Gazelle,
}

/// Authentication material and endpoint configuration resolved for a single
/// site, handed to the driver on every call so the driver itself stays
/// stateless with respect to credentials.
#[derive(Debug, Clone)]
pub struct SiteContext {
    /// Stable site identifier (used in error messages and metrics).
    pub site_id: String,
    /// Base API URL for schemas that use a JSON API.
    pub api_url: Option<String>,
    /// Cookie header value for cookie-authenticated schemas.
    pub cookie: Option<String>,
    /// `x-api-key` header value for API-key-authenticated schemas.
    pub api_key: Option<String>,
    /// Passkey embedded into download URLs for passkey-authenticated schemas.
    pub passkey: Option<String>,
}

/// Capability set implemented per tracker schema: fetch the subscription
/// feed, resolve a feed item into a [`TorrentCandidate`], and report whether
/// the site is currently enabled.
#[async_trait]
pub trait SiteDriver: Send + Sync {
    /// Fetch and parse the RSS/Atom feed at `url`, returning items in feed
    /// order.
    async fn fetch_feed(&self, ctx: &SiteContext, url: &str) -> SiteResult<Vec<FeedItem>>;

    /// Resolve a feed item into a normalised [`TorrentCandidate`] via the
    /// site's detail page or API, applying the supplied authentication
    /// context.
    async fn fetch_detail(
        &self,
        ctx: &SiteContext,
        item: &FeedItem,
    ) -> SiteResult<TorrentCandidate>;

    /// Cheap, non-blocking check of whether this site is currently enabled.
    fn is_enabled(&self) -> bool;
}

/// Sub-capability injected into a [`SiteDriver`] to translate a raw detail
/// response (HTML document or JSON payload) into a [`TorrentCandidate`].
pub trait DetailParser: Send + Sync {
    /// Parse `body` (HTML or JSON, depending on schema) into a candidate.
    fn parse(&self, site_id: &str, body: &str) -> SiteResult<TorrentCandidate>;
}

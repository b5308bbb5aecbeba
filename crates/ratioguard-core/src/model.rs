//! Canonical torrent candidate model shared across `SiteDriver` implementations.
//!
//! Two site schemas (`NexusPHP`'s scraped HTML and `mTorrent`'s JSON API)
//! expose different response shapes; every `SiteDriver` implementation
//! normalises into the single [`TorrentCandidate`] struct here so the
//! pipeline never sees per-schema types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Promotional discount level reported by a tracker for a given torrent.
///
/// Ordering here is semantic, not numeric: `NONE` sorts below every
/// promotional level, matching the "free-only by default" gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiscountLevel {
    /// No promotional discount; downloaded bytes count fully against ratio.
    None,
    /// Standard 100% free download.
    Free,
    /// Free download with doubled upload credit.
    TwoXFree,
    /// Doubled upload credit only (download still counts against ratio).
    TwoXUp,
    /// 30% of downloaded bytes count against ratio.
    Percent30,
    /// 50% of downloaded bytes count against ratio.
    Percent50,
    /// 70% of downloaded bytes count against ratio.
    Percent70,
    /// Doubled upload credit plus 50% download discount.
    TwoXPercent50,
}

impl DiscountLevel {
    /// Whether this level satisfies the product's free-only default gate
    /// (`discount ∈ {FREE, 2XFREE}`), i.e. downloaded bytes cost nothing.
    #[must_use]
    pub const fn is_fully_free(self) -> bool {
        matches!(self, Self::Free | Self::TwoXFree)
    }

    /// Fraction of downloaded bytes that count against ratio, used by
    /// feasibility accounting. Fully-free levels cost nothing; non-free
    /// levels are irrelevant to feasibility since they never reach the
    /// download stage under the default policy, but the value is defined
    /// for completeness and for filter-widened configurations.
    #[must_use]
    pub const fn ratio_cost_fraction(self) -> f64 {
        match self {
            Self::Free | Self::TwoXFree => 0.0,
            Self::Percent30 => 0.30,
            Self::Percent50 | Self::TwoXPercent50 => 0.50,
            Self::Percent70 => 0.70,
            Self::TwoXUp | Self::None => 1.0,
        }
    }
}

/// A single item pulled from a subscription's RSS/Atom feed, prior to detail
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    /// Tracker-assigned globally unique identifier for this item.
    pub guid: String,
    /// Display title as it appears in the feed.
    pub title: String,
    /// Canonical detail page URL for this item (`<item><link>`).
    pub url: String,
    /// Direct `.torrent` enclosure URL, when the feed provides one.
    pub enclosure_url: Option<String>,
    /// Feed-provided category labels.
    pub categories: Vec<String>,
}

/// Normalised detail-page result produced by `SiteDriver::fetch_detail`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentCandidate {
    /// Resolved display title (may differ from the feed title).
    pub title: String,
    /// Site-local torrent identifier.
    pub torrent_id: String,
    /// Torrent payload size in bytes.
    pub size_bytes: u64,
    /// Current promotional discount level.
    pub free_level: DiscountLevel,
    /// When the promotional window ends, if any.
    pub free_end_time: Option<DateTime<Utc>>,
    /// Whether the tracker flags this torrent as hit-and-run protected.
    pub hr: bool,
    /// Optional secondary title/subtitle exposed by some schemas.
    pub sub_title: Option<String>,
    /// Direct `.torrent` download URL, resolved from the detail page if the
    /// feed enclosure was absent.
    pub download_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_free_and_two_x_free_are_fully_free() {
        assert!(DiscountLevel::Free.is_fully_free());
        assert!(DiscountLevel::TwoXFree.is_fully_free());
        assert!(!DiscountLevel::TwoXUp.is_fully_free());
        assert!(!DiscountLevel::Percent50.is_fully_free());
        assert!(!DiscountLevel::None.is_fully_free());
    }

    #[test]
    fn ratio_cost_fraction_matches_discount_semantics() {
        assert!((DiscountLevel::Free.ratio_cost_fraction() - 0.0).abs() < f64::EPSILON);
        assert!((DiscountLevel::Percent30.ratio_cost_fraction() - 0.30).abs() < f64::EPSILON);
        assert!((DiscountLevel::TwoXPercent50.ratio_cost_fraction() - 0.50).abs() < f64::EPSILON);
        assert!((DiscountLevel::None.ratio_cost_fraction() - 1.0).abs() < f64::EPSILON);
    }
}

//! `NexusPHP`-family site driver: RSS feed plus a cookie-authenticated,
//! scraped HTML detail page.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use ratioguard_core::{
    DetailParser, DiscountLevel, FeedItem, SiteContext, SiteDriver, SiteError, SiteResult,
    TorrentCandidate,
};

use super::feed::parse_rss_feed;

/// [`SiteDriver`] for trackers running the `NexusPHP` codebase: cookie
/// authentication, an RSS feed, and a detail page scraped with the class
/// names listed in the site's discount legend.
pub struct NexusPhpDriver {
    http: reqwest::Client,
    parser: NexusPhpParser,
}

impl NexusPhpDriver {
    /// Build a driver that issues feed and detail requests over `http`.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            parser: NexusPhpParser,
        }
    }
}

#[async_trait]
impl SiteDriver for NexusPhpDriver {
    async fn fetch_feed(&self, ctx: &SiteContext, url: &str) -> SiteResult<Vec<FeedItem>> {
        let mut request = self.http.get(url);
        if let Some(cookie) = ctx.cookie.as_deref() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let response = request.send().await.map_err(|source| SiteError::Feed {
            site: ctx.site_id.clone(),
            message: source.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(SiteError::Site {
                site: ctx.site_id.clone(),
                status: response.status().as_u16(),
            });
        }
        let body = response.text().await.map_err(|source| SiteError::Feed {
            site: ctx.site_id.clone(),
            message: source.to_string(),
        })?;
        parse_rss_feed(&ctx.site_id, &body)
    }

    async fn fetch_detail(
        &self,
        ctx: &SiteContext,
        item: &FeedItem,
    ) -> SiteResult<TorrentCandidate> {
        let mut request = self
            .http
            .get(&item.url)
            .header(reqwest::header::REFERER, item.url.clone());
        if let Some(cookie) = ctx.cookie.as_deref() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        let response = request.send().await.map_err(|_source| SiteError::Auth {
            site: ctx.site_id.clone(),
        })?;
        if response.status() == reqwest::StatusCode::FORBIDDEN
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(SiteError::Auth {
                site: ctx.site_id.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(SiteError::Site {
                site: ctx.site_id.clone(),
                status: response.status().as_u16(),
            });
        }
        let body = response.text().await.map_err(|source| SiteError::Parse {
            site: ctx.site_id.clone(),
            message: source.to_string(),
        })?;
        let mut candidate = self.parser.parse(&ctx.site_id, &body)?;
        if candidate.title.is_empty() {
            candidate.title.clone_from(&item.title);
        }
        Ok(candidate)
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Translates a `NexusPHP` detail page into a [`TorrentCandidate`] using the
/// discount legend's class names rather than a full HTML parser, since the
/// fields of interest always sit inside a small, predictable set of markers.
pub struct NexusPhpParser;

static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<h1[^>]*>(.*?)</h1>").unwrap());
static TORRENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"download\.php\?id=(\d+)[^"'\s]*"#).unwrap());
static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(TB|GB|MB|KB|B)\b").unwrap());
static HR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)class=.hr.|Hit\s*(?:and|&amp;|&)\s*Run").unwrap());
static END_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2})").unwrap());
/// Discount class legend per the site's promo markup, checked most-specific
/// first so `twoupfree` is never misread as a bare `free`.
const DISCOUNT_CLASSES: &[(&str, DiscountLevel)] = &[
    ("twoupfree", DiscountLevel::TwoXFree),
    ("twouphalfdown", DiscountLevel::TwoXPercent50),
    ("thirtypercent", DiscountLevel::Percent30),
    ("halfdown", DiscountLevel::Percent50),
    ("twoup", DiscountLevel::TwoXUp),
    ("free", DiscountLevel::Free),
];

impl DetailParser for NexusPhpParser {
    fn parse(&self, site_id: &str, body: &str) -> SiteResult<TorrentCandidate> {
        let torrent_id = TORRENT_ID_RE
            .captures(body)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| SiteError::Parse {
                site: site_id.to_string(),
                message: "detail page has no download link".to_string(),
            })?;

        let download_url = TORRENT_ID_RE
            .find(body)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let title = TITLE_RE
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| strip_tags(m.as_str()))
            .unwrap_or_default();

        let size_bytes = SIZE_RE
            .captures(body)
            .map(|caps| parse_size(&caps[1], &caps[2]))
            .ok_or_else(|| SiteError::Parse {
                site: site_id.to_string(),
                message: "detail page has no size field".to_string(),
            })?;

        let free_level = DISCOUNT_CLASSES
            .iter()
            .find(|(class, _)| body.contains(class))
            .map_or(DiscountLevel::None, |(_, level)| *level);

        let hr = HR_RE.is_match(body);
        let free_end_time = END_TIME_RE
            .captures(body)
            .and_then(|caps| parse_site_timestamp(&caps[1]));

        Ok(TorrentCandidate {
            title,
            torrent_id,
            size_bytes,
            free_level,
            free_end_time,
            hr,
            sub_title: None,
            download_url,
        })
    }
}

fn strip_tags(fragment: &str) -> String {
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
    TAG_RE.replace_all(fragment, "").trim().to_string()
}

fn parse_size(amount: &str, unit: &str) -> u64 {
    let value: f64 = amount.parse().unwrap_or(0.0);
    let multiplier: f64 = match unit.to_ascii_uppercase().as_str() {
        "TB" => 1_099_511_627_776.0,
        "GB" => 1_073_741_824.0,
        "MB" => 1_048_576.0,
        "KB" => 1_024.0,
        _ => 1.0,
    };
    (value * multiplier).round() as u64
}

fn parse_site_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

//! `mTorrent`-family site driver: RSS feed plus an `x-api-key`-authenticated
//! JSON detail API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratioguard_core::{
    DiscountLevel, FeedItem, SiteContext, SiteDriver, SiteError, SiteResult, TorrentCandidate,
};
use serde::Deserialize;

use super::feed::parse_rss_feed;

/// [`SiteDriver`] for `mTorrent`-family trackers, whose detail surface is a
/// JSON API rather than scraped HTML.
pub struct MTorrentDriver {
    http: reqwest::Client,
}

impl MTorrentDriver {
    /// Build a driver that issues feed and detail requests over `http`.
    #[must_use]
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SiteDriver for MTorrentDriver {
    async fn fetch_feed(&self, ctx: &SiteContext, url: &str) -> SiteResult<Vec<FeedItem>> {
        let mut request = self.http.get(url);
        if let Some(key) = ctx.api_key.as_deref() {
            request = request.header("x-api-key", key);
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
        let api_url = ctx.api_url.as_deref().ok_or_else(|| SiteError::Parse {
            site: ctx.site_id.clone(),
            message: "site has no configured api_url".to_string(),
        })?;
        let key = ctx.api_key.as_deref().ok_or_else(|| SiteError::Auth {
            site: ctx.site_id.clone(),
        })?;

        let response = self
            .http
            .post(format!("{api_url}/api/torrent/detail"))
            .header("x-api-key", key)
            .form(&[("id", item.guid.as_str())])
            .send()
            .await
            .map_err(|source| SiteError::Feed {
                site: ctx.site_id.clone(),
                message: source.to_string(),
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

        let envelope: DetailEnvelope = response.json().await.map_err(|source| SiteError::Parse {
            site: ctx.site_id.clone(),
            message: source.to_string(),
        })?;
        if envelope.code != 0 {
            return Err(SiteError::Parse {
                site: ctx.site_id.clone(),
                message: format!("api returned code {} ({})", envelope.code, envelope.message),
            });
        }
        let data = envelope.data.ok_or_else(|| SiteError::Parse {
            site: ctx.site_id.clone(),
            message: "api response has no data field".to_string(),
        })?;

        Ok(TorrentCandidate {
            title: data.name,
            torrent_id: data.id,
            size_bytes: data.size,
            free_level: data.status.discount.into(),
            free_end_time: data.status.discount_end_time,
            hr: false,
            sub_title: data.small_descr,
            download_url: item
                .enclosure_url
                .clone()
                .unwrap_or_else(|| item.url.clone()),
        })
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<DetailData>,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    id: String,
    name: String,
    size: u64,
    #[serde(rename = "smallDescr")]
    small_descr: Option<String>,
    status: DetailStatus,
}

#[derive(Debug, Deserialize)]
struct DetailStatus {
    discount: MtDiscount,
    #[serde(rename = "discountEndTime")]
    discount_end_time: Option<DateTime<Utc>>,
}

/// `mTorrent`'s own discount enum, mapped 1:1 onto the canonical
/// [`DiscountLevel`].
#[derive(Debug, Clone, Copy, Deserialize)]
enum MtDiscount {
    FREE,
    #[serde(rename = "_2X_FREE")]
    TwoXFree,
    #[serde(rename = "PERCENT_50")]
    Percent50,
    #[serde(rename = "PERCENT_30")]
    Percent30,
    #[serde(rename = "PERCENT_70")]
    Percent70,
    #[serde(rename = "_2X_UP")]
    TwoXUp,
    #[serde(rename = "_2X_PERCENT_50")]
    TwoXPercent50,
    NONE,
}

impl From<MtDiscount> for DiscountLevel {
    fn from(value: MtDiscount) -> Self {
        match value {
            MtDiscount::FREE => Self::Free,
            MtDiscount::TwoXFree => Self::TwoXFree,
            MtDiscount::Percent50 => Self::Percent50,
            MtDiscount::Percent30 => Self::Percent30,
            MtDiscount::Percent70 => Self::Percent70,
            MtDiscount::TwoXUp => Self::TwoXUp,
            MtDiscount::TwoXPercent50 => Self::TwoXPercent50,
            MtDiscount::NONE => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mt_discount_maps_onto_canonical_levels() {
        assert_eq!(DiscountLevel::from(MtDiscount::FREE), DiscountLevel::Free);
        assert_eq!(
            DiscountLevel::from(MtDiscount::TwoXFree),
            DiscountLevel::TwoXFree
        );
        assert_eq!(DiscountLevel::from(MtDiscount::NONE), DiscountLevel::None);
    }

    #[test]
    fn detail_envelope_parses_reference_shape() {
        let body = r#"{
            "code": 0,
            "message": "ok",
            "data": {
                "id": "42",
                "name": "Demo",
                "size": 1073741824,
                "smallDescr": "desc",
                "status": { "discount": "_2X_FREE", "discountEndTime": "2026-08-01T00:00:00Z" }
            }
        }"#;
        let envelope: DetailEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.code, 0);
        let data = envelope.data.unwrap();
        assert_eq!(data.id, "42");
        assert_eq!(data.size, 1_073_741_824);
    }
}

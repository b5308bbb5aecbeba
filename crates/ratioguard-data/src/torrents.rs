//! Repository functions for `torrent_info`, the pipeline's durable per-torrent
//! state, keyed `(site_name, torrent_id)`.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

/// Raw projection of a `torrent_info` row.
#[derive(Debug, Clone, FromRow)]
pub struct TorrentInfoRow {
    /// Primary key.
    pub id: i64,
    /// Owning site identifier.
    pub site_name: String,
    /// Site-local torrent identifier.
    pub torrent_id: String,
    /// SHA-1 hash of the bencoded `info` dict, once computed.
    pub torrent_hash: Option<String>,
    /// Resolved display title.
    pub title: String,
    /// Category, if resolved from the subscription or feed item.
    pub category: Option<String>,
    /// Tag, if resolved from the subscription.
    pub tag: Option<String>,
    /// Serialised [`ratioguard_core::DiscountLevel`].
    pub free_level: String,
    /// When the promotional window ends, if any.
    pub free_end_time: Option<DateTime<Utc>>,
    /// Hit-and-run protection flag.
    pub hr: bool,
    /// Torrent payload size in bytes.
    pub size_bytes: i64,
    /// Terminal-for-this-round flag.
    pub is_skipped: bool,
    /// Whether the `.torrent` file has been downloaded locally.
    pub is_downloaded: bool,
    /// Whether the downloader has accepted the torrent.
    pub is_pushed: bool,
    /// Whether `CleanupMonitor` has purged this row.
    pub is_purged: bool,
    /// When the torrent was pushed to the downloader.
    pub push_time: Option<DateTime<Utc>>,
    /// Download attempt counter.
    pub retry_count: i64,
    /// Last error message recorded against this row.
    pub last_error: Option<String>,
    /// Last time this row was touched by a worker tick.
    pub last_check_time: DateTime<Utc>,
    /// Resolved `.torrent` download URL.
    pub download_source: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Load a row by its natural key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn find(pool: &SqlitePool, site_name: &str, torrent_id: &str) -> Result<Option<TorrentInfoRow>> {
    let row = sqlx::query_as::<_, TorrentInfoRow>(
        "SELECT id, site_name, torrent_id, torrent_hash, title, category, tag, free_level, \
                free_end_time, hr, size_bytes, is_skipped, is_downloaded, is_pushed, is_purged, \
                push_time, retry_count, last_error, last_check_time, download_source, created_at \
         FROM torrent_info WHERE site_name = ? AND torrent_id = ?",
    )
    .bind(site_name)
    .bind(torrent_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fields used when a candidate is first discovered and classified.
#[derive(Debug, Clone)]
pub struct DiscoveredTorrent<'a> {
    /// Owning site identifier.
    pub site_name: &'a str,
    /// Site-local torrent identifier.
    pub torrent_id: &'a str,
    /// Resolved display title.
    pub title: &'a str,
    /// Category resolved for this item.
    pub category: Option<&'a str>,
    /// Tag resolved for this item.
    pub tag: Option<&'a str>,
    /// Serialised discount level.
    pub free_level: &'a str,
    /// Promotional window end, if any.
    pub free_end_time: Option<DateTime<Utc>>,
    /// Hit-and-run protection flag.
    pub hr: bool,
    /// Torrent payload size in bytes.
    pub size_bytes: i64,
    /// Resolved `.torrent` download URL.
    pub download_source: &'a str,
}

/// Upsert a freshly discovered/evaluated candidate.
///
/// Per the pipeline's atomicity contract, this upsert is the only write path
/// for a `(site_name, torrent_id)` pair at the discovery stage; it never
/// regresses `is_pushed` or `is_downloaded` because those flags are not
/// touched here.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub async fn upsert_discovered(pool: &SqlitePool, candidate: &DiscoveredTorrent<'_>) -> Result<i64> {
    sqlx::query(
        "INSERT INTO torrent_info (site_name, torrent_id, title, category, tag, free_level, \
            free_end_time, hr, size_bytes, download_source, last_check_time) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')) \
         ON CONFLICT (site_name, torrent_id) DO UPDATE SET \
            title = excluded.title, \
            category = excluded.category, \
            tag = excluded.tag, \
            free_level = excluded.free_level, \
            free_end_time = excluded.free_end_time, \
            hr = excluded.hr, \
            size_bytes = excluded.size_bytes, \
            download_source = excluded.download_source, \
            last_check_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
    )
    .bind(candidate.site_name)
    .bind(candidate.torrent_id)
    .bind(candidate.title)
    .bind(candidate.category)
    .bind(candidate.tag)
    .bind(candidate.free_level)
    .bind(candidate.free_end_time)
    .bind(candidate.hr)
    .bind(candidate.size_bytes)
    .bind(candidate.download_source)
    .execute(pool)
    .await?;

    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM torrent_info WHERE site_name = ? AND torrent_id = ?",
    )
    .bind(candidate.site_name)
    .bind(candidate.torrent_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Mark a row skipped for this round (terminal unless it gets re-evaluated in
/// a future round, which only happens for rows that were never pushed).
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn mark_skipped(pool: &SqlitePool, id: i64, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE torrent_info SET is_skipped = 1, last_error = ?, \
         last_check_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ? AND is_pushed = 0",
    )
    .bind(reason)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record that the `.torrent` file was downloaded and hashed.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn mark_downloaded(pool: &SqlitePool, id: i64, torrent_hash: &str) -> Result<()> {
    sqlx::query(
        "UPDATE torrent_info SET is_downloaded = 1, torrent_hash = ?, is_skipped = 0, \
         last_check_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
    )
    .bind(torrent_hash)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failed download attempt.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn record_download_failure(pool: &SqlitePool, id: i64, error: &str) -> Result<i64> {
    sqlx::query(
        "UPDATE torrent_info SET retry_count = retry_count + 1, last_error = ?, \
         last_check_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    let retry_count: i64 = sqlx::query_scalar("SELECT retry_count FROM torrent_info WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(retry_count)
}

/// Record that the torrent was accepted by the downloader.
///
/// Never regresses a pushed row: callers must not invoke this twice for the
/// same id expecting different effects, but doing so is idempotent.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn mark_pushed(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE torrent_info SET is_pushed = 1, \
         push_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), last_error = NULL \
         WHERE id = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a non-fatal push failure (retried at a later sweep).
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn record_push_failure(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE torrent_info SET last_error = ?, \
         last_check_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
    )
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a row purged by `CleanupMonitor`, clearing the hash so the pipeline
/// never attempts to re-push it.
///
/// # Errors
///
/// Returns an error if the update fails.
pub async fn mark_purged(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE torrent_info SET is_purged = 1, torrent_hash = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// List every row currently marked pushed and not yet purged, the working
/// set for `CleanupMonitor`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn list_active_pushed(pool: &SqlitePool) -> Result<Vec<TorrentInfoRow>> {
    let rows = sqlx::query_as::<_, TorrentInfoRow>(
        "SELECT id, site_name, torrent_id, torrent_hash, title, category, tag, free_level, \
                free_end_time, hr, size_bytes, is_skipped, is_downloaded, is_pushed, is_purged, \
                push_time, retry_count, last_error, last_check_time, download_source, created_at \
         FROM torrent_info WHERE is_pushed = 1 AND is_purged = 0",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory_for_tests;

    fn sample() -> DiscoveredTorrent<'static> {
        DiscoveredTorrent {
            site_name: "demo",
            torrent_id: "42",
            title: "Demo.Title",
            category: Some("movies"),
            tag: None,
            free_level: "free",
            free_end_time: None,
            hr: false,
            size_bytes: 1_000_000,
            download_source: "https://example.test/dl/42",
        }
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let pool = open_in_memory_for_tests().await;
        let id = upsert_discovered(&pool, &sample()).await.unwrap();
        let row = find(&pool, "demo", "42").await.unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.title, "Demo.Title");
        assert!(!row.is_pushed);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_natural_key() {
        let pool = open_in_memory_for_tests().await;
        let first = upsert_discovered(&pool, &sample()).await.unwrap();
        let second = upsert_discovered(&pool, &sample()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn push_lifecycle_clears_skip_and_sets_push_time() {
        let pool = open_in_memory_for_tests().await;
        let id = upsert_discovered(&pool, &sample()).await.unwrap();
        mark_skipped(&pool, id, "discount not eligible").await.unwrap();
        mark_downloaded(&pool, id, "aaaa").await.unwrap();
        mark_pushed(&pool, id).await.unwrap();

        let row = find(&pool, "demo", "42").await.unwrap().unwrap();
        assert!(!row.is_skipped);
        assert!(row.is_downloaded);
        assert!(row.is_pushed);
        assert!(row.push_time.is_some());
    }

    #[tokio::test]
    async fn purge_clears_hash() {
        let pool = open_in_memory_for_tests().await;
        let id = upsert_discovered(&pool, &sample()).await.unwrap();
        mark_downloaded(&pool, id, "aaaa").await.unwrap();
        mark_pushed(&pool, id).await.unwrap();
        mark_purged(&pool, id).await.unwrap();

        let row = find(&pool, "demo", "42").await.unwrap().unwrap();
        assert!(row.torrent_hash.is_none());
        assert!(row.is_purged);
    }
}

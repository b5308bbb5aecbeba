//! Repository functions for `rate_limit_state`, the persisted sliding window
//! that lets `ratioguard-ratelimit` survive a process restart without
//! burst-flooding a site.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// Record an admission at `window_start` for `site_id`, incrementing the
/// count if a row for that window already exists.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub async fn record_admission(
    pool: &SqlitePool,
    site_id: &str,
    window_start: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO rate_limit_state (site_id, window_start, count) VALUES (?, ?, 1) \
         ON CONFLICT (site_id, window_start) DO UPDATE SET count = count + 1",
    )
    .bind(site_id)
    .bind(window_start)
    .execute(pool)
    .await?;
    Ok(())
}

/// Sum of admissions recorded for `site_id` at or after `since`, used to
/// reconstruct the in-flight window on process start.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn count_since(pool: &SqlitePool, site_id: &str, since: DateTime<Utc>) -> Result<i64> {
    let count: Option<i64> = sqlx::query_scalar(
        "SELECT SUM(count) FROM rate_limit_state WHERE site_id = ? AND window_start >= ?",
    )
    .bind(site_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count.unwrap_or(0))
}

/// Individual `(window_start, count)` rows recorded for `site_id` at or
/// after `since`, ordered oldest first, used to rebuild the exact admission
/// timeline a sliding window needs on process start.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn list_since(
    pool: &SqlitePool,
    site_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<(DateTime<Utc>, i64)>> {
    let rows: Vec<(DateTime<Utc>, i64)> = sqlx::query_as(
        "SELECT window_start, count FROM rate_limit_state \
         WHERE site_id = ? AND window_start >= ? ORDER BY window_start ASC",
    )
    .bind(site_id)
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Delete window rows older than `before`, run periodically so the table
/// does not grow unbounded.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub async fn prune_before(pool: &SqlitePool, before: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM rate_limit_state WHERE window_start < ?")
        .bind(before)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory_for_tests;
    use chrono::Duration;

    #[tokio::test]
    async fn record_admission_accumulates_within_a_window() {
        let pool = open_in_memory_for_tests().await;
        let window = Utc::now();
        record_admission(&pool, "demo", window).await.unwrap();
        record_admission(&pool, "demo", window).await.unwrap();

        let count = count_since(&pool, "demo", window - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn count_since_ignores_older_windows() {
        let pool = open_in_memory_for_tests().await;
        let now = Utc::now();
        record_admission(&pool, "demo", now - Duration::minutes(5)).await.unwrap();
        record_admission(&pool, "demo", now).await.unwrap();

        let count = count_since(&pool, "demo", now - Duration::seconds(30)).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn prune_removes_old_rows() {
        let pool = open_in_memory_for_tests().await;
        let now = Utc::now();
        record_admission(&pool, "demo", now - Duration::hours(2)).await.unwrap();
        record_admission(&pool, "demo", now).await.unwrap();

        let removed = prune_before(&pool, now - Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn list_since_expands_each_window_start_with_its_count() {
        let pool = open_in_memory_for_tests().await;
        let now = Utc::now();
        record_admission(&pool, "demo", now).await.unwrap();
        record_admission(&pool, "demo", now).await.unwrap();
        record_admission(&pool, "demo", now - Duration::seconds(1)).await.unwrap();

        let rows = list_since(&pool, "demo", now - Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(rows, vec![(now - Duration::seconds(1), 1), (now, 2)]);
    }
}

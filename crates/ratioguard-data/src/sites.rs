//! Repository functions for `sites`, `rss_subscriptions`, `filter_rules` and
//! their many-to-many association table.

use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};

use crate::error::Result;

/// Raw projection of a `sites` row.
#[derive(Debug, Clone, FromRow)]
pub struct SiteRow {
    /// Stable lowercase identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Schema family, serialised lowercase (`nexus_php`, `m_torrent`, ...).
    pub schema: String,
    /// JSON array of feed base URLs.
    pub urls: String,
    /// Authentication method (`cookie`, `api_key`, `cookie_and_api_key`, `passkey`).
    pub auth_method: String,
    /// Cookie header value, when relevant to `auth_method`.
    pub cookie: Option<String>,
    /// `x-api-key` value, when relevant to `auth_method`.
    pub api_key: Option<String>,
    /// Passkey, when relevant to `auth_method`.
    pub passkey: Option<String>,
    /// Base API URL for JSON-API schemas.
    pub api_url: Option<String>,
    /// Whether the site currently participates in polling.
    pub enabled: bool,
    /// Requests-per-second budget enforced by the `RateLimiter`.
    pub rate_limit_per_sec: f64,
    /// Whether this site ships with the engine (cannot be deleted).
    pub is_builtin: bool,
    /// Default downloader for subscriptions on this site that don't override it.
    pub downloader_id: Option<String>,
    /// Monotonic revision.
    pub revision: i64,
}

/// Raw projection of an `rss_subscriptions` row.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    /// Primary key.
    pub id: i64,
    /// Owning site identifier.
    pub site_id: String,
    /// Display name.
    pub name: String,
    /// Feed URL.
    pub url: String,
    /// Category applied to downloaded torrents.
    pub category: Option<String>,
    /// Tag applied to downloaded torrents; also used as the save sub-directory.
    pub tag: Option<String>,
    /// Polling interval, minutes.
    pub interval_minutes: i64,
    /// Downloader override for this subscription.
    pub downloader_id: Option<String>,
    /// Absolute save path override.
    pub download_path: Option<String>,
    /// Whether pushed torrents from this subscription pause at free-end.
    pub pause_on_free_end: bool,
    /// Whether the worker pool materialises a worker for this row.
    pub enabled: bool,
    /// Last time this subscription's feed was polled.
    pub last_check_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// List all enabled subscriptions, joined with nothing — callers resolve the
/// owning site and bound filter rules separately.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn list_enabled_subscriptions(pool: &SqlitePool) -> Result<Vec<SubscriptionRow>> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(
        "SELECT id, site_id, name, url, category, tag, interval_minutes, downloader_id, \
                download_path, pause_on_free_end, enabled, last_check_time \
         FROM rss_subscriptions WHERE enabled = 1",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Load a site by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn find_site(pool: &SqlitePool, site_id: &str) -> Result<Option<SiteRow>> {
    let row = sqlx::query_as::<_, SiteRow>(
        "SELECT id, name, schema, urls, auth_method, cookie, api_key, passkey, api_url, \
                enabled, rate_limit_per_sec, is_builtin, downloader_id, revision \
         FROM sites WHERE id = ?",
    )
    .bind(site_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// List every configured site.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn list_sites(pool: &SqlitePool) -> Result<Vec<SiteRow>> {
    let rows = sqlx::query_as::<_, SiteRow>(
        "SELECT id, name, schema, urls, auth_method, cookie, api_key, passkey, api_url, \
                enabled, rate_limit_per_sec, is_builtin, downloader_id, revision \
         FROM sites",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Input for [`upsert_site_with_rss`]: a site plus the full replacement set of
/// its RSS subscriptions and their bound filter rule ids.
#[derive(Debug, Clone)]
pub struct SiteUpsert<'a> {
    /// Site identifier.
    pub id: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Schema family.
    pub schema: &'a str,
    /// JSON-encoded array of feed base URLs.
    pub urls_json: &'a str,
    /// Authentication method.
    pub auth_method: &'a str,
    /// Cookie credential, if applicable.
    pub cookie: Option<&'a str>,
    /// API key credential, if applicable.
    pub api_key: Option<&'a str>,
    /// Passkey credential, if applicable.
    pub passkey: Option<&'a str>,
    /// Base API URL.
    pub api_url: Option<&'a str>,
    /// Whether the site is enabled.
    pub enabled: bool,
    /// Requests-per-second budget.
    pub rate_limit_per_sec: f64,
    /// Replacement subscription set.
    pub subscriptions: Vec<SubscriptionUpsert<'a>>,
}

/// A single subscription inside a [`SiteUpsert`].
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert<'a> {
    /// Existing row id, when updating; `None` inserts a new row.
    pub id: Option<i64>,
    /// Display name.
    pub name: &'a str,
    /// Feed URL.
    pub url: &'a str,
    /// Category applied to downloads.
    pub category: Option<&'a str>,
    /// Tag applied to downloads.
    pub tag: Option<&'a str>,
    /// Polling interval, minutes (already clamped by the caller).
    pub interval_minutes: i64,
    /// Downloader override.
    pub downloader_id: Option<&'a str>,
    /// Absolute save path override.
    pub download_path: Option<&'a str>,
    /// Whether pushed torrents pause at free-end.
    pub pause_on_free_end: bool,
    /// Filter rule ids bound to this subscription.
    pub filter_rule_ids: Vec<i64>,
}

/// Upsert a site and replace its RSS subscription + filter-association set in
/// one transaction.
///
/// # Errors
///
/// Returns an error if any statement in the transaction fails.
pub async fn upsert_site_with_rss(pool: &SqlitePool, input: &SiteUpsert<'_>) -> Result<i64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO sites (id, name, schema, urls, auth_method, cookie, api_key, passkey, \
            api_url, enabled, rate_limit_per_sec) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET \
            name = excluded.name, \
            schema = excluded.schema, \
            urls = excluded.urls, \
            auth_method = excluded.auth_method, \
            cookie = excluded.cookie, \
            api_key = excluded.api_key, \
            passkey = excluded.passkey, \
            api_url = excluded.api_url, \
            enabled = excluded.enabled, \
            rate_limit_per_sec = excluded.rate_limit_per_sec, \
            revision = revision + 1, \
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
    )
    .bind(input.id)
    .bind(input.name)
    .bind(input.schema)
    .bind(input.urls_json)
    .bind(input.auth_method)
    .bind(input.cookie)
    .bind(input.api_key)
    .bind(input.passkey)
    .bind(input.api_url)
    .bind(input.enabled)
    .bind(input.rate_limit_per_sec)
    .execute(&mut *tx)
    .await?;

    replace_subscriptions(&mut tx, input.id, &input.subscriptions).await?;

    let revision: i64 = sqlx::query_scalar("SELECT revision FROM sites WHERE id = ?")
        .bind(input.id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(revision)
}

async fn replace_subscriptions(
    tx: &mut Transaction<'_, Sqlite>,
    site_id: &str,
    subscriptions: &[SubscriptionUpsert<'_>],
) -> Result<()> {
    let keep_ids: Vec<i64> = subscriptions.iter().filter_map(|s| s.id).collect();

    if keep_ids.is_empty() {
        sqlx::query("DELETE FROM rss_subscriptions WHERE site_id = ?")
            .bind(site_id)
            .execute(&mut **tx)
            .await?;
    } else {
        let placeholders = keep_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "DELETE FROM rss_subscriptions WHERE site_id = ? AND id NOT IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(site_id);
        for id in &keep_ids {
            query = query.bind(id);
        }
        query.execute(&mut **tx).await?;
    }

    for sub in subscriptions {
        let sub_id: i64 = if let Some(id) = sub.id {
            sqlx::query(
                "UPDATE rss_subscriptions SET name = ?, url = ?, category = ?, tag = ?, \
                    interval_minutes = ?, downloader_id = ?, download_path = ?, \
                    pause_on_free_end = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
                 WHERE id = ?",
            )
            .bind(sub.name)
            .bind(sub.url)
            .bind(sub.category)
            .bind(sub.tag)
            .bind(sub.interval_minutes)
            .bind(sub.downloader_id)
            .bind(sub.download_path)
            .bind(sub.pause_on_free_end)
            .bind(id)
            .execute(&mut **tx)
            .await?;
            id
        } else {
            sqlx::query(
                "INSERT INTO rss_subscriptions \
                    (site_id, name, url, category, tag, interval_minutes, downloader_id, \
                     download_path, pause_on_free_end) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(site_id)
            .bind(sub.name)
            .bind(sub.url)
            .bind(sub.category)
            .bind(sub.tag)
            .bind(sub.interval_minutes)
            .bind(sub.downloader_id)
            .bind(sub.download_path)
            .bind(sub.pause_on_free_end)
            .execute(&mut **tx)
            .await?;
            sqlx::query_scalar("SELECT id FROM rss_subscriptions WHERE site_id = ? AND url = ?")
                .bind(site_id)
                .bind(sub.url)
                .fetch_one(&mut **tx)
                .await?
        };

        sqlx::query("DELETE FROM rss_filter_associations WHERE rss_subscription_id = ?")
            .bind(sub_id)
            .execute(&mut **tx)
            .await?;

        for rule_id in &sub.filter_rule_ids {
            sqlx::query(
                "INSERT INTO rss_filter_associations (rss_subscription_id, filter_rule_id) \
                 VALUES (?, ?)",
            )
            .bind(sub_id)
            .bind(rule_id)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Update the `downloader_id` on a set of sites and every RSS subscription
/// bound to them, atomically.
///
/// # Errors
///
/// Returns an error if any statement in the transaction fails.
pub async fn batch_update_site_downloader(
    pool: &SqlitePool,
    site_ids: &[String],
    downloader_id: &str,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for site_id in site_ids {
        sqlx::query("UPDATE sites SET downloader_id = ? WHERE id = ?")
            .bind(downloader_id)
            .bind(site_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE rss_subscriptions SET downloader_id = ? WHERE site_id = ?")
            .bind(downloader_id)
            .bind(site_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Stamp `last_check_time` on a subscription to the current time, once its
/// worker has finished a polling round.
///
/// # Errors
///
/// Returns an error if the update statement fails.
pub async fn touch_subscription_checked(pool: &SqlitePool, subscription_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE rss_subscriptions SET last_check_time = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') \
         WHERE id = ?",
    )
    .bind(subscription_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a site and cascade to its subscriptions. Rejects built-in sites.
///
/// # Errors
///
/// Returns [`crate::DataError::QueryFailed`] if the site is built-in or the
/// delete statement fails.
pub async fn delete_site(pool: &SqlitePool, site_id: &str) -> Result<bool> {
    let is_builtin: Option<bool> =
        sqlx::query_scalar("SELECT is_builtin FROM sites WHERE id = ?")
            .bind(site_id)
            .fetch_optional(pool)
            .await?;

    match is_builtin {
        None => Ok(false),
        Some(true) => Err(crate::error::DataError::QueryFailed {
            operation: "delete built-in site",
            source: sqlx::Error::RowNotFound,
        }),
        Some(false) => {
            sqlx::query("DELETE FROM sites WHERE id = ?")
                .bind(site_id)
                .execute(pool)
                .await?;
            Ok(true)
        }
    }
}

/// Raw projection of a `filter_rules` row.
#[derive(Debug, Clone, FromRow)]
pub struct FilterRuleRow {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Whether this rule participates in evaluation.
    pub enabled: bool,
    /// JSON-encoded [`ratioguard_core::FilterPredicate`].
    pub predicate: String,
}

/// Load every filter rule bound to a subscription.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn filter_rules_for_subscription(
    pool: &SqlitePool,
    subscription_id: i64,
) -> Result<Vec<FilterRuleRow>> {
    let rows = sqlx::query_as::<_, FilterRuleRow>(
        "SELECT fr.id, fr.name, fr.enabled, fr.predicate \
         FROM filter_rules fr \
         JOIN rss_filter_associations a ON a.filter_rule_id = fr.id \
         WHERE a.rss_subscription_id = ?",
    )
    .bind(subscription_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory_for_tests;

    fn site(id: &str) -> SiteUpsert<'static> {
        SiteUpsert {
            id: Box::leak(id.to_string().into_boxed_str()),
            name: "Demo Tracker",
            schema: "nexus_php",
            urls_json: r#"["https://demo.test/rss"]"#,
            auth_method: "cookie",
            cookie: Some("session=abc"),
            api_key: None,
            passkey: None,
            api_url: None,
            enabled: true,
            rate_limit_per_sec: 1.0,
            subscriptions: vec![SubscriptionUpsert {
                id: None,
                name: "Movies",
                url: "https://demo.test/rss?cat=movies",
                category: Some("movies"),
                tag: None,
                interval_minutes: 15,
                downloader_id: None,
                download_path: None,
                pause_on_free_end: false,
                filter_rule_ids: vec![],
            }],
        }
    }

    #[tokio::test]
    async fn upsert_site_creates_subscription() {
        let pool = open_in_memory_for_tests().await;
        upsert_site_with_rss(&pool, &site("demo")).await.unwrap();

        let subs = list_enabled_subscriptions(&pool).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].site_id, "demo");
    }

    #[tokio::test]
    async fn reupsert_replaces_subscription_set() {
        let pool = open_in_memory_for_tests().await;
        upsert_site_with_rss(&pool, &site("demo")).await.unwrap();

        let mut second = site("demo");
        second.subscriptions = vec![];
        upsert_site_with_rss(&pool, &second).await.unwrap();

        let subs = list_enabled_subscriptions(&pool).await.unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn built_in_site_cannot_be_deleted() {
        let pool = open_in_memory_for_tests().await;
        upsert_site_with_rss(&pool, &site("demo")).await.unwrap();
        sqlx::query("UPDATE sites SET is_builtin = 1 WHERE id = 'demo'")
            .execute(&pool)
            .await
            .unwrap();

        let result = delete_site(&pool, "demo").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn batch_update_touches_site_and_subscriptions() {
        let pool = open_in_memory_for_tests().await;
        upsert_site_with_rss(&pool, &site("demo")).await.unwrap();

        batch_update_site_downloader(&pool, &["demo".to_string()], "qbit-1")
            .await
            .unwrap();

        let subs = list_enabled_subscriptions(&pool).await.unwrap();
        assert_eq!(subs[0].downloader_id.as_deref(), Some("qbit-1"));
        let row = find_site(&pool, "demo").await.unwrap().unwrap();
        assert_eq!(row.downloader_id.as_deref(), Some("qbit-1"));
    }
}

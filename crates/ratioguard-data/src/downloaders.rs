//! Repository functions for configured downloader backends.

use sqlx::{FromRow, SqlitePool};

use crate::error::Result;

/// Raw projection of a `downloaders` row.
#[derive(Debug, Clone, FromRow)]
pub struct DownloaderRow {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Backend kind (`qbittorrent`, `transmission`).
    pub kind: String,
    /// Base URL of the downloader's RPC endpoint.
    pub url: String,
    /// Username, if the backend requires one.
    pub username: Option<String>,
    /// Password, if the backend requires one.
    pub password: Option<String>,
    /// Whether this downloader currently participates in pushes.
    pub enabled: bool,
    /// Whether this is the default downloader for its `kind`.
    pub is_default: bool,
    /// Whether torrents pushed to this downloader start immediately.
    pub auto_start: bool,
}

/// List all configured downloaders.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn list(pool: &SqlitePool) -> Result<Vec<DownloaderRow>> {
    let rows = sqlx::query_as::<_, DownloaderRow>(
        "SELECT id, name, kind, url, username, password, enabled, is_default, auto_start \
         FROM downloaders",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Load the enabled default downloader, if one is configured.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn find_default(pool: &SqlitePool) -> Result<Option<DownloaderRow>> {
    let row = sqlx::query_as::<_, DownloaderRow>(
        "SELECT id, name, kind, url, username, password, enabled, is_default, auto_start \
         FROM downloaders WHERE is_default = 1 AND enabled = 1 LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Load a downloader by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn find(pool: &SqlitePool, id: &str) -> Result<Option<DownloaderRow>> {
    let row = sqlx::query_as::<_, DownloaderRow>(
        "SELECT id, name, kind, url, username, password, enabled, is_default, auto_start \
         FROM downloaders WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fields accepted by [`save`].
#[derive(Debug, Clone)]
pub struct DownloaderUpsert<'a> {
    /// Stable identifier.
    pub id: &'a str,
    /// Display name.
    pub name: &'a str,
    /// Backend kind.
    pub kind: &'a str,
    /// Base URL.
    pub url: &'a str,
    /// Username, if relevant.
    pub username: Option<&'a str>,
    /// Password, if relevant.
    pub password: Option<&'a str>,
    /// Whether the downloader is enabled.
    pub enabled: bool,
    /// Whether pushed torrents start immediately.
    pub auto_start: bool,
}

/// Upsert a downloader row, preserving its `is_default` flag.
///
/// # Errors
///
/// Returns an error if the statement fails.
pub async fn save(pool: &SqlitePool, input: &DownloaderUpsert<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO downloaders (id, name, kind, url, username, password, enabled, auto_start) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (id) DO UPDATE SET \
            name = excluded.name, \
            kind = excluded.kind, \
            url = excluded.url, \
            username = excluded.username, \
            password = excluded.password, \
            enabled = excluded.enabled, \
            auto_start = excluded.auto_start, \
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
    )
    .bind(input.id)
    .bind(input.name)
    .bind(input.kind)
    .bind(input.url)
    .bind(input.username)
    .bind(input.password)
    .bind(input.enabled)
    .bind(input.auto_start)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark `id` the default downloader for its `kind`, clearing any prior
/// default of the same kind, and force it enabled, atomically.
///
/// # Errors
///
/// Returns an error if the statement fails or `id` does not exist.
pub async fn set_default(pool: &SqlitePool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let kind: String = sqlx::query_scalar("SELECT kind FROM downloaders WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("UPDATE downloaders SET is_default = 0 WHERE kind = ?")
        .bind(&kind)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE downloaders SET is_default = 1, enabled = 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_in_memory_for_tests;

    fn upsert(id: &'static str, kind: &'static str) -> DownloaderUpsert<'static> {
        DownloaderUpsert {
            id,
            name: "Primary qBit",
            kind,
            url: "http://localhost:8080",
            username: Some("admin"),
            password: Some("hunter2"),
            enabled: true,
            auto_start: true,
        }
    }

    #[tokio::test]
    async fn set_default_clears_prior_default_of_same_kind() {
        let pool = open_in_memory_for_tests().await;
        save(&pool, &upsert("qbit-a", "qbittorrent")).await.unwrap();
        save(&pool, &upsert("qbit-b", "qbittorrent")).await.unwrap();

        set_default(&pool, "qbit-a").await.unwrap();
        set_default(&pool, "qbit-b").await.unwrap();

        let a = find(&pool, "qbit-a").await.unwrap().unwrap();
        let b = find(&pool, "qbit-b").await.unwrap().unwrap();
        assert!(!a.is_default);
        assert!(b.is_default);
    }

    #[tokio::test]
    async fn set_default_does_not_affect_other_kinds() {
        let pool = open_in_memory_for_tests().await;
        save(&pool, &upsert("qbit-a", "qbittorrent")).await.unwrap();
        save(&pool, &upsert("trans-a", "transmission")).await.unwrap();

        set_default(&pool, "qbit-a").await.unwrap();
        set_default(&pool, "trans-a").await.unwrap();

        let a = find(&pool, "qbit-a").await.unwrap().unwrap();
        let b = find(&pool, "trans-a").await.unwrap().unwrap();
        assert!(a.is_default);
        assert!(b.is_default);
    }

    #[tokio::test]
    async fn find_default_only_returns_enabled_default() {
        let pool = open_in_memory_for_tests().await;
        save(&pool, &upsert("qbit-a", "qbittorrent")).await.unwrap();
        assert!(find_default(&pool).await.unwrap().is_none());

        set_default(&pool, "qbit-a").await.unwrap();
        assert!(find_default(&pool).await.unwrap().is_some());
    }
}

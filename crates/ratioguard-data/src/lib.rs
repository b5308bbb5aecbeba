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

//! Low-level SQL repositories and migrations backing the engine's embedded
//! store: one SQLite database file, WAL mode, no long-lived transactions
//! across network calls.

pub mod downloaders;
pub mod error;
pub mod ratelimit;
pub mod settings;
pub mod sites;
pub mod torrents;

pub use error::{DataError, Result as DataResult};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Open (creating if absent) the SQLite database at `path`, enable WAL mode,
/// and run pending migrations.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrations fail.
pub async fn connect(path: &Path) -> DataResult<SqlitePool> {
    let url = format!("sqlite://{}", path.display());
    let options = SqliteConnectOptions::from_str(&url)
        .map_err(|source| DataError::QueryFailed {
            operation: "parse sqlite connection string",
            source,
        })?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .map_err(|source| DataError::QueryFailed {
            operation: "open sqlite pool",
            source,
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|source| DataError::MigrationFailed { source })?;

    Ok(pool)
}

/// Open a throwaway in-memory database with migrations applied, for tests in
/// this crate and in downstream crates that exercise the store directly.
///
/// # Panics
///
/// Panics if the in-memory pool cannot be opened or migrated; acceptable
/// only because this helper is test-only.
pub async fn open_in_memory_for_tests() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations against in-memory pool");
    pool
}

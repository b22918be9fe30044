//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and makes sure every table
//! the ledger reads or writes exists. All statements are idempotent, so this
//! runs on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Busy timeout applied to every connection (milliseconds)
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets readers (aggregator queries) proceed while a recorder writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_viewers_table(pool).await?;
    create_contents_table(pool).await?;
    create_entitlements_table(pool).await?;
    create_content_views_table(pool).await?;
    Ok(())
}

pub async fn create_viewers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS viewers (
            guid TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_contents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contents (
            guid TEXT PRIMARY KEY,
            creator_guid TEXT NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('image', 'media')),
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_entitlements_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entitlements (
            viewer_guid TEXT NOT NULL,
            content_guid TEXT NOT NULL,
            granted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (viewer_guid, content_guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Recorded views
///
/// The UNIQUE constraint is what makes recording race-safe: two recorders
/// that both pass the existence check cannot both insert.
pub async fn create_content_views_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_views (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            viewer_guid TEXT NOT NULL,
            content_guid TEXT NOT NULL,
            viewed_at TIMESTAMP NOT NULL,
            UNIQUE (viewer_guid, content_guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_views_content ON content_views (content_guid)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_views_viewer_time ON content_views (viewer_guid, viewed_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

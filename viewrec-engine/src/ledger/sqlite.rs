//! SQLite view ledger
//!
//! Backed by the `content_views` table created in
//! `viewrec_common::db::init`. Uniqueness comes from its
//! `UNIQUE (viewer_guid, content_guid)` constraint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use viewrec_common::models::{ContentSummary, CreatorSummary, ViewHistoryEntry, ViewRecord};
use viewrec_common::{ContentId, ViewerId};

use super::{LedgerError, ViewLedger};

/// Ledger over a SQLite pool
#[derive(Clone)]
pub struct SqliteLedger {
    db: Pool<Sqlite>,
}

impl SqliteLedger {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db
    }
}

type HistoryRow = (
    String,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn parse_id<T: std::str::FromStr<Err = uuid::Error>>(value: &str) -> Result<T, LedgerError> {
    value
        .parse()
        .map_err(|e| LedgerError::Backend(format!("Invalid UUID in database: {}", e)))
}

fn history_entry(viewer_id: ViewerId, row: HistoryRow) -> Result<ViewHistoryEntry, LedgerError> {
    let (content_guid, viewed_at, creator_guid, title, kind, display_name) = row;
    let content_id: ContentId = parse_id(&content_guid)?;

    let content = match (creator_guid.as_deref(), title, kind) {
        (Some(creator), Some(title), Some(kind)) => Some(ContentSummary {
            id: content_id,
            creator_id: parse_id(creator)?,
            title,
            kind: kind.parse().map_err(|e: viewrec_common::Error| LedgerError::Backend(e.to_string()))?,
        }),
        _ => None,
    };

    let creator = match (&content, display_name) {
        (Some(content), Some(display_name)) => Some(CreatorSummary {
            id: content.creator_id,
            display_name,
        }),
        _ => None,
    };

    Ok(ViewHistoryEntry {
        record: ViewRecord {
            viewer_id,
            content_id,
            viewed_at,
        },
        content,
        creator,
    })
}

#[async_trait]
impl ViewLedger for SqliteLedger {
    async fn exists(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM content_views WHERE viewer_guid = ? AND content_guid = ? LIMIT 1",
        )
        .bind(viewer_id.to_string())
        .bind(content_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        Ok(found.is_some())
    }

    async fn insert(
        &self,
        viewer_id: ViewerId,
        content_id: ContentId,
        viewed_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO content_views (viewer_guid, content_guid, viewed_at) VALUES (?, ?, ?)",
        )
        .bind(viewer_id.to_string())
        .bind(content_id.to_string())
        .bind(viewed_at)
        .execute(&self.db)
        .await?;

        tracing::debug!(viewer_id = %viewer_id, content_id = %content_id, "View row inserted");

        Ok(())
    }

    async fn count(&self, content_id: ContentId) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_views WHERE content_guid = ?")
            .bind(content_id.to_string())
            .fetch_one(&self.db)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_for_viewer(
        &self,
        viewer_id: ViewerId,
        limit: usize,
    ) -> Result<Vec<ViewHistoryEntry>, LedgerError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT v.content_guid, v.viewed_at, c.creator_guid, c.title, c.kind, u.display_name
            FROM content_views v
            LEFT JOIN contents c ON c.guid = v.content_guid
            LEFT JOIN viewers u ON u.guid = c.creator_guid
            WHERE v.viewer_guid = ?
            ORDER BY v.viewed_at DESC, v.id DESC
            LIMIT ?
            "#,
        )
        .bind(viewer_id.to_string())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| history_entry(viewer_id, row))
            .collect()
    }
}

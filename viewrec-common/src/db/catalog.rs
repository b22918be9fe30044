//! Viewer, content and entitlement rows
//!
//! The view ledger only joins against these tables; they are owned by the
//! host application. These helpers exist for seeding and lookups.

use crate::models::{ContentKind, ContentSummary, CreatorSummary};
use crate::{ContentId, Error, Result, ViewerId};
use sqlx::{Pool, Sqlite};

/// Insert or rename a viewer
pub async fn upsert_viewer(db: &Pool<Sqlite>, viewer: &CreatorSummary) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO viewers (guid, display_name) VALUES (?, ?)
        ON CONFLICT(guid) DO UPDATE SET display_name = excluded.display_name
        "#,
    )
    .bind(viewer.id.to_string())
    .bind(&viewer.display_name)
    .execute(db)
    .await?;

    Ok(())
}

/// Insert or update a content row
pub async fn upsert_content(db: &Pool<Sqlite>, content: &ContentSummary) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contents (guid, creator_guid, title, kind) VALUES (?, ?, ?, ?)
        ON CONFLICT(guid) DO UPDATE SET
            creator_guid = excluded.creator_guid,
            title = excluded.title,
            kind = excluded.kind
        "#,
    )
    .bind(content.id.to_string())
    .bind(content.creator_id.to_string())
    .bind(&content.title)
    .bind(content.kind.as_str())
    .execute(db)
    .await?;

    Ok(())
}

/// Load a content row
pub async fn get_content(db: &Pool<Sqlite>, content_id: ContentId) -> Result<Option<ContentSummary>> {
    let row: Option<(String, String, String)> = sqlx::query_as(
        "SELECT creator_guid, title, kind FROM contents WHERE guid = ?",
    )
    .bind(content_id.to_string())
    .fetch_optional(db)
    .await?;

    row.map(|(creator, title, kind)| {
        Ok(ContentSummary {
            id: content_id,
            creator_id: creator
                .parse()
                .map_err(|e| Error::CorruptRow(format!("invalid UUID: {}", e)))?,
            title,
            kind: kind.parse::<ContentKind>()?,
        })
    })
    .transpose()
}

/// Record that a viewer may access a piece of content (idempotent)
pub async fn grant_entitlement(db: &Pool<Sqlite>, viewer_id: ViewerId, content_id: ContentId) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO entitlements (viewer_guid, content_guid) VALUES (?, ?)",
    )
    .bind(viewer_id.to_string())
    .bind(content_id.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Whether a viewer may access a piece of content
pub async fn has_entitlement(db: &Pool<Sqlite>, viewer_id: ViewerId, content_id: ContentId) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM entitlements WHERE viewer_guid = ? AND content_guid = ? LIMIT 1",
    )
    .bind(viewer_id.to_string())
    .bind(content_id.to_string())
    .fetch_optional(db)
    .await?;

    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_upsert_content_then_get() {
        let pool = setup_test_db().await;
        let content = ContentSummary {
            id: ContentId::new(),
            creator_id: ViewerId::new(),
            title: "Harbour at dusk".to_string(),
            kind: ContentKind::Image,
        };

        upsert_content(&pool, &content).await.unwrap();
        assert_eq!(get_content(&pool, content.id).await.unwrap(), Some(content.clone()));

        let renamed = ContentSummary {
            title: "Harbour at night".to_string(),
            ..content.clone()
        };
        upsert_content(&pool, &renamed).await.unwrap();
        assert_eq!(get_content(&pool, content.id).await.unwrap(), Some(renamed));
    }

    #[tokio::test]
    async fn test_get_missing_content() {
        let pool = setup_test_db().await;
        assert_eq!(get_content(&pool, ContentId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entitlements_are_per_pair() {
        let pool = setup_test_db().await;
        let viewer = ViewerId::new();
        let content = ContentId::new();

        assert!(!has_entitlement(&pool, viewer, content).await.unwrap());
        grant_entitlement(&pool, viewer, content).await.unwrap();
        grant_entitlement(&pool, viewer, content).await.unwrap();
        assert!(has_entitlement(&pool, viewer, content).await.unwrap());
        assert!(!has_entitlement(&pool, ViewerId::new(), content).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_viewer_renames() {
        let pool = setup_test_db().await;
        let id = ViewerId::new();
        upsert_viewer(&pool, &CreatorSummary { id, display_name: "ada".into() }).await.unwrap();
        upsert_viewer(&pool, &CreatorSummary { id, display_name: "Ada L.".into() }).await.unwrap();

        let name: String = sqlx::query_scalar("SELECT display_name FROM viewers WHERE guid = ?")
            .bind(id.to_string())
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name, "Ada L.");
    }
}

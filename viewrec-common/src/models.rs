//! Ledger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ContentId, Error, ViewerId};

/// One recorded view
///
/// At most one exists per `(viewer_id, content_id)` pair. Records are never
/// mutated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub viewer_id: ViewerId,
    pub content_id: ContentId,
    pub viewed_at: DateTime<Utc>,
}

/// Kind of content being tracked
///
/// Selects the default dwell threshold, and whether the entitlement gate
/// applies (images only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Still image content (short dwell, entitlement gated)
    Image,
    /// Playback-style content: video or audio (long dwell)
    Media,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Image => "image",
            ContentKind::Media => "media",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(ContentKind::Image),
            "media" | "video" | "audio" => Ok(ContentKind::Media),
            other => Err(Error::InvalidInput(format!("unknown content kind: {}", other))),
        }
    }
}

/// Content metadata joined into view history entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub id: ContentId,
    pub creator_id: ViewerId,
    pub title: String,
    pub kind: ContentKind,
}

/// Creator metadata joined into view history entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorSummary {
    pub id: ViewerId,
    pub display_name: String,
}

/// One row of a viewer's history: the record plus what was viewed and who made it
///
/// Metadata is optional because a view may outlive its content row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewHistoryEntry {
    pub record: ViewRecord,
    pub content: Option<ContentSummary>,
    pub creator: Option<CreatorSummary>,
}

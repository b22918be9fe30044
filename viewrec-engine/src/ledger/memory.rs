//! In-process view ledger
//!
//! Same contract as [`super::SqliteLedger`], kept in a mutex-guarded map.
//! Used by tests and by hosts that do not need durability. Also carries a
//! small content catalog and entitlement set so history joins and the
//! entitlement gate behave like the SQLite adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use viewrec_common::models::{ContentSummary, CreatorSummary, ViewHistoryEntry, ViewRecord};
use viewrec_common::{ContentId, ViewerId};

use super::{LedgerError, ViewLedger};

/// Per-operation call counters
#[derive(Debug, Default)]
pub struct LedgerCalls {
    exists: AtomicUsize,
    insert: AtomicUsize,
    count: AtomicUsize,
    list: AtomicUsize,
}

impl LedgerCalls {
    pub fn exists(&self) -> usize {
        self.exists.load(Ordering::SeqCst)
    }

    pub fn insert(&self) -> usize {
        self.insert.load(Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn list(&self) -> usize {
        self.list.load(Ordering::SeqCst)
    }

    /// `exists` + `insert`: calls that touch a (viewer, content) pair
    pub fn writes_path(&self) -> usize {
        self.exists() + self.insert()
    }
}

#[derive(Default)]
struct Tables {
    next_seq: u64,
    views: HashMap<(ViewerId, ContentId), (u64, ViewRecord)>,
    contents: HashMap<ContentId, ContentSummary>,
    creators: HashMap<ViewerId, CreatorSummary>,
    entitlements: HashSet<(ViewerId, ContentId)>,
}

/// Mutex-backed ledger
#[derive(Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
    calls: LedgerCalls,
    unavailable: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &LedgerCalls {
        &self.calls
    }

    /// While set, every ledger call fails with a backend error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sleep this long inside every ledger call
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn register_content(&self, content: ContentSummary) {
        self.lock().contents.insert(content.id, content);
    }

    pub fn register_creator(&self, creator: CreatorSummary) {
        self.lock().creators.insert(creator.id, creator);
    }

    pub fn grant_entitlement(&self, viewer_id: ViewerId, content_id: ContentId) {
        self.lock().entitlements.insert((viewer_id, content_id));
    }

    pub(crate) async fn entitled(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError> {
        self.pause_and_check().await?;
        Ok(self.lock().entitlements.contains(&(viewer_id, content_id)))
    }

    /// Every stored record, in insertion order
    pub fn records(&self) -> Vec<ViewRecord> {
        let tables = self.lock();
        let mut rows: Vec<_> = tables.views.values().cloned().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, record)| record).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<(), LedgerError> {
        counter.fetch_add(1, Ordering::SeqCst);
        self.pause_and_check().await
    }

    async fn pause_and_check(&self) -> Result<(), LedgerError> {
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Backend("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ViewLedger for MemoryLedger {
    async fn exists(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError> {
        self.enter(&self.calls.exists).await?;
        Ok(self.lock().views.contains_key(&(viewer_id, content_id)))
    }

    async fn insert(
        &self,
        viewer_id: ViewerId,
        content_id: ContentId,
        viewed_at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.enter(&self.calls.insert).await?;

        let mut tables = self.lock();
        if tables.views.contains_key(&(viewer_id, content_id)) {
            return Err(LedgerError::UniqueViolation);
        }
        let seq = tables.next_seq;
        tables.next_seq += 1;
        tables.views.insert(
            (viewer_id, content_id),
            (
                seq,
                ViewRecord {
                    viewer_id,
                    content_id,
                    viewed_at,
                },
            ),
        );
        Ok(())
    }

    async fn count(&self, content_id: ContentId) -> Result<u64, LedgerError> {
        self.enter(&self.calls.count).await?;
        let tables = self.lock();
        Ok(tables.views.keys().filter(|(_, c)| *c == content_id).count() as u64)
    }

    async fn list_for_viewer(
        &self,
        viewer_id: ViewerId,
        limit: usize,
    ) -> Result<Vec<ViewHistoryEntry>, LedgerError> {
        self.enter(&self.calls.list).await?;
        let tables = self.lock();

        let mut rows: Vec<_> = tables
            .views
            .values()
            .filter(|(_, record)| record.viewer_id == viewer_id)
            .collect();
        rows.sort_by(|(a_seq, a), (b_seq, b)| {
            b.viewed_at.cmp(&a.viewed_at).then(b_seq.cmp(a_seq))
        });

        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, record)| {
                let content = tables.contents.get(&record.content_id).cloned();
                let creator = content
                    .as_ref()
                    .and_then(|c| tables.creators.get(&c.creator_id).cloned());
                ViewHistoryEntry {
                    record: record.clone(),
                    content,
                    creator,
                }
            })
            .collect())
    }
}

//! Entitlement collaborator
//!
//! Paid images are only tracked for viewers who hold an entitlement. The
//! check is consulted once, when tracking starts.

use async_trait::async_trait;
use viewrec_common::{ContentId, ViewerId};

use crate::ledger::{LedgerError, MemoryLedger, SqliteLedger};

/// Answers "may this viewer see this content?"
#[async_trait]
pub trait EntitlementCheck: Send + Sync {
    async fn is_entitled(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError>;
}

/// Every viewer is entitled to everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl EntitlementCheck for AllowAll {
    async fn is_entitled(&self, _viewer_id: ViewerId, _content_id: ContentId) -> Result<bool, LedgerError> {
        Ok(true)
    }
}

#[async_trait]
impl EntitlementCheck for SqliteLedger {
    async fn is_entitled(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError> {
        Ok(viewrec_common::db::has_entitlement(self.pool(), viewer_id, content_id).await?)
    }
}

#[async_trait]
impl EntitlementCheck for MemoryLedger {
    async fn is_entitled(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError> {
        self.entitled(viewer_id, content_id).await
    }
}

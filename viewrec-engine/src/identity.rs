//! Viewer identity collaborator
//!
//! The engine never authenticates anyone itself. Hosts hand in whatever
//! knows the current viewer (session, request header, test fixture).

use viewrec_common::ViewerId;

/// Resolves the viewer on whose behalf engagement is being tracked
pub trait IdentityProvider: Send + Sync {
    /// `None` for anonymous viewers; they are never tracked
    fn current_viewer(&self) -> Option<ViewerId>;

    fn is_creator(&self, creator_id: ViewerId) -> bool {
        self.current_viewer() == Some(creator_id)
    }
}

/// Fixed identity, resolved once per request or test
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticIdentity {
    viewer: Option<ViewerId>,
}

impl StaticIdentity {
    pub fn anonymous() -> Self {
        Self { viewer: None }
    }

    pub fn viewer(viewer_id: ViewerId) -> Self {
        Self {
            viewer: Some(viewer_id),
        }
    }
}

impl From<Option<ViewerId>> for StaticIdentity {
    fn from(viewer: Option<ViewerId>) -> Self {
        Self { viewer }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_viewer(&self) -> Option<ViewerId> {
        self.viewer
    }
}

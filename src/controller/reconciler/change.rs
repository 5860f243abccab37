//! # Change Detector
//!
//! Compares the revision the source currently resolves to with the revision
//! last synced for the target.

use crate::adapter::{SourceAdapter, SourceError};
use crate::controller::reconciler::types::{ReconcilerError, Target};
use tracing::debug;

/// Result of a change check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Unchanged { revision: String },
    Changed { revision: String },
}

impl Change {
    pub fn revision(&self) -> &str {
        match self {
            Change::Unchanged { revision } | Change::Changed { revision } => revision,
        }
    }
}

/// Resolve the target's reference and compare it with `tracked_revision`
///
/// An empty tracked revision means the target was never synced, so any
/// resolved revision counts as a change.
pub async fn detect(
    source: &dyn SourceAdapter,
    target: &Target,
    tracked_revision: &str,
) -> Result<Change, ReconcilerError> {
    let revision = source
        .resolve_revision(target)
        .await
        .map_err(|e| match e {
            SourceError::Unreachable(msg) => ReconcilerError::SourceUnreachable(msg),
            SourceError::PathNotFound(path) => {
                ReconcilerError::SourceUnreachable(format!("reference lookup failed for {path}"))
            }
            SourceError::Render(msg) => ReconcilerError::SourceUnreachable(msg),
        })?;

    debug!(
        "Resolved {} to {} (tracked: {})",
        target.reference,
        revision,
        if tracked_revision.is_empty() {
            "<none>"
        } else {
            tracked_revision
        }
    );

    if !tracked_revision.is_empty() && revision == tracked_revision {
        Ok(Change::Unchanged { revision })
    } else {
        Ok(Change::Changed { revision })
    }
}

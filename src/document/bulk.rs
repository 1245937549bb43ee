//! Multi-document writes

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::Identifiable;

/// Container for bulk operations
#[derive(Debug, Clone, Default)]
pub struct DocBulk<D> {
    docs: Vec<D>,
}

impl<D> DocBulk<D> {
    pub fn new() -> Self {
        Self { docs: Vec::new() }
    }

    pub fn add(&mut self, doc: D) {
        self.docs.push(doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn docs(&self) -> &[D] {
        &self.docs
    }

    pub(crate) fn docs_mut(&mut self) -> &mut [D] {
        &mut self.docs
    }

    pub fn into_docs(self) -> Vec<D> {
        self.docs
    }
}

impl<D: Identifiable> DocBulk<D> {
    /// Find a document by key and revision
    pub fn find(&self, id: &str, rev: &str) -> Option<&D> {
        self.docs.iter().find(|doc| doc.id_rev() == (id, rev))
    }
}

impl<D> FromIterator<D> for DocBulk<D> {
    fn from_iter<I: IntoIterator<Item = D>>(iter: I) -> Self {
        Self {
            docs: iter.into_iter().collect(),
        }
    }
}

/// Per-document outcome reported by `_bulk_docs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkItemResult {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.rev.is_some()
    }
}

/// A document the store refused to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDoc {
    pub id: String,
    /// Revision the document carried when it was submitted
    pub rev: String,
    pub error: String,
    pub reason: String,
}

/// Aggregate failure of a multi-document write.
///
/// Carries every document that was not written; the others were written and
/// already carry their new revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    pub failed: Vec<FailedDoc>,
    pub submitted: usize,
}

impl BulkFailure {
    /// True if any document was rejected by the revision precondition
    pub fn is_lost_update(&self) -> bool {
        self.failed.iter().any(|doc| doc.error == "conflict")
    }

    pub fn written(&self) -> usize {
        self.submitted.saturating_sub(self.failed.len())
    }
}

impl fmt::Display for BulkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bulk write incomplete: {} of {} documents failed",
            self.failed.len(),
            self.submitted
        )?;
        if let Some(first) = self.failed.first() {
            write!(f, " (first: {} {})", first.id, first.error)?;
        }
        Ok(())
    }
}

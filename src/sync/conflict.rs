//! Conflict detection and resolution
//!
//! Replication or concurrent edits can leave several open leaf revisions for
//! one key. A [`Conflict`] is a snapshot of those leaves; resolving it makes a
//! caller-chosen document the child of the first leaf and closes every other
//! branch, all in one all-or-nothing bulk write.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::document::{BulkFailure, DynamicDoc, FailedDoc, Identifiable};
use crate::error::{CouchError, ErrorEnvelope, Result};
use crate::store::{write_back, Database, QueryOptions};
use crate::view::ViewDefinition;

const CONFLICT_MAP: &str = "function(doc) { if (doc._conflicts) { emit(null, null); } }";
const CONFLICT_REDUCE: &str = "_count";

/// Competing open revisions of one document.
///
/// Obtained from [`Database::conflict_for`] and consumed by
/// [`Conflict::resolve`]. After a successful resolution the handle holds no
/// revisions and further resolutions are no-ops; detect again to observe the
/// current state.
#[derive(Debug, Clone)]
pub struct Conflict {
    db: Database,
    key: String,
    revisions: Vec<DynamicDoc>,
}

impl Conflict {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    /// Open leaves in the order the store reported them
    pub fn revisions_raw(&self) -> &[DynamicDoc] {
        &self.revisions
    }

    /// Open leaves decoded into a caller type
    pub fn revisions<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.revisions
            .iter()
            .cloned()
            .map(DynamicDoc::into_typed)
            .collect::<serde_json::Result<Vec<T>>>()
            .map_err(CouchError::from)
    }

    /// Two or more open leaves make a conflict that needs resolving
    pub fn is_real(&self) -> bool {
        self.revisions.len() > 1
    }

    /// Resolve the conflict with `final_doc`.
    ///
    /// `final_doc` takes the key and revision of the first open leaf, all
    /// other leaves are written as deleted. On success `final_doc` carries the
    /// revision assigned by the store. If another client changed any of the
    /// leaves in the meantime nothing is written and [`CouchError::LostUpdate`]
    /// is returned; the handle is left untouched so it can be inspected, but
    /// the conflict has to be detected again before retrying.
    ///
    /// A store that applies only part of the write reports
    /// [`CouchError::PartialFailure`] listing the rejected documents; the
    /// written ones, `final_doc` included, already carry their new revisions.
    pub async fn resolve<D: Identifiable + Serialize>(&mut self, final_doc: &mut D) -> Result<()> {
        if !self.is_real() {
            return Ok(());
        }

        let (id, rev) = {
            let first = &self.revisions[0];
            (first.id().to_string(), first.rev().to_string())
        };
        final_doc.set_id_rev(&id, &rev);

        let mut closed: Vec<DynamicDoc> = self.revisions[1..].to_vec();
        for leaf in &mut closed {
            leaf.mark_deleted();
        }

        let mut bodies = Vec::with_capacity(self.revisions.len());
        bodies.push(serde_json::to_value(&*final_doc)?);
        for leaf in &closed {
            bodies.push(serde_json::to_value(leaf)?);
        }
        let submitted = bodies.len();

        let results = self.db.bulk_docs(bodies, true).await?;
        let (first, rest) = results.split_at(results.len().min(1));
        let mut failed = write_back(std::slice::from_mut(final_doc), first);
        failed.extend(write_back(&mut closed, rest));

        if !failed.is_empty() {
            tracing::warn!(
                db = %self.db.name(),
                key = %self.key,
                failed = failed.len(),
                "Conflict resolution rejected"
            );
            return Err(resolution_error(failed, submitted));
        }

        tracing::info!(
            db = %self.db.name(),
            key = %self.key,
            closed = closed.len(),
            rev = %final_doc.rev(),
            "Resolved conflict"
        );
        self.revisions.clear();
        Ok(())
    }
}

/// A rejected revision means someone else touched the conflict first.
///
/// Once anything was written the caller needs the per-document outcome, so
/// only an untouched conflict is reported as a plain lost update.
fn resolution_error(failed: Vec<FailedDoc>, submitted: usize) -> CouchError {
    let failure = BulkFailure { failed, submitted };
    if failure.written() == 0 {
        if let Some(doc) = failure.failed.iter().find(|doc| doc.error == "conflict") {
            return CouchError::LostUpdate(ErrorEnvelope::new(
                doc.error.clone(),
                format!("revision {} of {} is no longer a leaf", doc.rev, doc.id),
            ));
        }
    }
    CouchError::PartialFailure(failure)
}

impl Database {
    /// Competing open revisions for `key`, or `None` when the document has a
    /// single open leaf (or none at all)
    pub async fn conflict_for(&self, key: &str) -> Result<Option<Conflict>> {
        let leaves = match self.open_revisions(key).await {
            Ok(leaves) => leaves,
            // The key was never written, a missing database stays an error
            Err(CouchError::NotFound(envelope))
                if matches!(envelope.reason.as_str(), "missing" | "deleted") =>
            {
                return Ok(None)
            }
            Err(err) => return Err(err),
        };

        let open: Vec<DynamicDoc> = leaves
            .into_iter()
            .filter(|leaf| !leaf.is_deleted())
            .collect();

        if open.len() < 2 {
            return Ok(None);
        }

        tracing::debug!(db = %self.name(), key = %key, leaves = open.len(), "Detected conflict");
        Ok(Some(Conflict {
            db: self.clone(),
            key: key.to_string(),
            revisions: open,
        }))
    }

    /// Keys of all conflicted documents.
    ///
    /// Needs the conflict index; with `force_index` it is created when
    /// missing, which can take long on a large database.
    pub async fn conflicts(&self, force_index: bool) -> Result<Vec<String>> {
        self.ensure_conflict_index(force_index).await?;

        let index = self.server().conflict_index();
        let result = self
            .query(&index.design, &index.view, &QueryOptions::new().reduce(false))
            .await?;

        Ok(result.rows.into_iter().filter_map(|row| row.id).collect())
    }

    /// Number of conflicted documents, see [`Database::conflicts`]
    pub async fn conflicts_count(&self, force_index: bool) -> Result<u64> {
        self.ensure_conflict_index(force_index).await?;

        let index = self.server().conflict_index();
        let result = self
            .query(&index.design, &index.view, &QueryOptions::new().reduce(true))
            .await?;

        Ok(result
            .rows
            .first()
            .and_then(|row| row.value_u64())
            .unwrap_or(0))
    }

    /// Make sure the conflict index exists, creating it if `force` is set.
    ///
    /// Best called right after creating a database, while indexing is cheap.
    pub async fn ensure_conflict_index(&self, force: bool) -> Result<()> {
        let index = self.server().conflict_index().clone();
        if self.has_view(&index.design, &index.view).await? {
            return Ok(());
        }

        if !force {
            return Err(CouchError::NotFound(ErrorEnvelope::new(
                "not_found",
                format!(
                    "conflict index _design/{}/_view/{} is missing",
                    index.design, index.view
                ),
            )));
        }

        let definition = ViewDefinition::new(CONFLICT_MAP).with_reduce(CONFLICT_REDUCE);
        if let Err(err) = self.create_view(&index.design, &index.view, definition).await {
            // Lost the race against another client creating the same index
            if !(err.is_lost_update() && self.has_view(&index.design, &index.view).await?) {
                return Err(err);
            }
        }

        Ok(())
    }
}

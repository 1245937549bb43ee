//! Bidirectional sync built from two replications

use crate::error::{CouchError, Result};
use crate::store::Database;

use super::replication::Replication;

/// Two opposite replications `a -> b` and `b -> a` treated as one link.
///
/// Starting is not atomic: `a -> b` runs before `b -> a` is requested. If the
/// second leg cannot be started the first one is cancelled again.
#[derive(Debug, Clone)]
pub struct SyncLink {
    a_to_b: Replication,
    b_to_a: Replication,
}

impl SyncLink {
    /// Link description without starting anything, e.g. to cancel a sync
    /// started by an earlier process
    pub fn new(a: &Database, b: &Database, continuous: bool) -> Self {
        Self {
            a_to_b: Replication::new(a.clone(), b.clone(), continuous),
            b_to_a: Replication::new(b.clone(), a.clone(), continuous),
        }
    }

    pub async fn start(a: &Database, b: &Database, continuous: bool) -> Result<Self> {
        let mut link = Self::new(a, b, continuous);
        link.a_to_b.start().await?;

        if let Err(err) = link.b_to_a.start().await {
            if let Err(cancel_err) = link.a_to_b.cancel().await {
                tracing::warn!(
                    source = %a.name(),
                    target = %b.name(),
                    error = %cancel_err,
                    "Failed to roll back replication after sync start failed"
                );
            }
            return Err(err);
        }

        Ok(link)
    }

    pub fn a_to_b(&self) -> &Replication {
        &self.a_to_b
    }

    pub fn b_to_a(&self) -> &Replication {
        &self.b_to_a
    }

    /// True if both legs are running, false if neither is.
    ///
    /// Fails with [`CouchError::Inconsistent`] if only one leg is running.
    pub async fn is_active(&self) -> Result<bool> {
        let a_to_b = self.a_to_b.is_active().await?;
        let b_to_a = self.b_to_a.is_active().await?;

        if a_to_b != b_to_a {
            return Err(CouchError::Inconsistent { a_to_b, b_to_a });
        }
        Ok(a_to_b)
    }

    /// Cancel both legs; a failure on the first leg does not stop the
    /// attempt on the second
    pub async fn cancel(&mut self) -> Result<()> {
        let a_to_b = self.a_to_b.cancel().await.err();
        let b_to_a = self.b_to_a.cancel().await.err();

        if a_to_b.is_none() && b_to_a.is_none() {
            return Ok(());
        }

        Err(CouchError::CancelFailed {
            a_to_b: a_to_b.map(Box::new),
            b_to_a: b_to_a.map(Box::new),
        })
    }
}

impl Database {
    /// Replicate in both directions between this database and `other`,
    /// see [`SyncLink`]
    pub async fn sync_with(&self, other: &Database, continuous: bool) -> Result<SyncLink> {
        SyncLink::start(self, other, continuous).await
    }
}

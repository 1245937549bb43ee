//! Conflict handling and replication coordination
//!
//! - [`Conflict`]: detect and resolve competing open revisions of a document
//! - [`Replication`]: one-directional replication session between two databases
//! - [`SyncLink`]: two opposite replications forming one bidirectional link
//!
//! Every operation awaits one store request at a time. Handles are owned by
//! their caller; share them across tasks only behind external synchronization.

mod conflict;
mod link;
mod replication;

pub use conflict::Conflict;
pub use link::SyncLink;
pub use replication::{Replication, ReplicationState};

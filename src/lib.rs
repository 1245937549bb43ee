//! Couchlink
//!
//! Client-side coordinator for CouchDB-style multi-master document stores:
//! conflict detection and resolution, replication sessions and bidirectional
//! sync, on top of a small store client.
//!
//! # Modules
//!
//! - `document`: document identity (`Identifiable`, `Doc`, `DynamicDoc`) and bulk writes
//! - `store`: request transport, server and database handles
//! - `view`: map/reduce view queries and design documents
//! - `sync`: conflicts, replications and sync links
//! - `config`: configuration loaded from the environment
//! - `error`: error taxonomy

pub mod config;
pub mod document;
pub mod error;
pub mod store;
pub mod sync;
pub mod view;

pub use config::Config;
pub use document::{Doc, DocBulk, DynamicDoc, Identifiable};
pub use error::{CouchError, Result};
pub use store::{Credentials, Database, Server};
pub use sync::{Conflict, Replication, ReplicationState, SyncLink};

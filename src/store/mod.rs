//! Store client
//!
//! Request/response plumbing against a CouchDB-compatible document store:
//! - [`Transport`]: the seam every network-visible operation goes through
//! - [`HttpTransport`]: reqwest-backed implementation
//! - [`Server`] / [`Database`]: handles addressing an instance and one of its databases

mod database;
mod query;
mod server;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod memory;

pub use database::Database;
pub use query::QueryOptions;
pub use server::{Credentials, Server};
pub use transport::{HttpTransport, StoreRequest, StoreResponse, Transport};
pub use types::{ActiveTask, WriteResult};

pub(crate) use database::write_back;

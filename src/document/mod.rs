//! Document identity and representations
//!
//! Every document handled by the store carries a key (`_id`) and a revision
//! token (`_rev`). Two representations implement [`Identifiable`]:
//! - [`Doc`], embedded with `#[serde(flatten)]` into caller structs
//! - [`DynamicDoc`], a fully dynamic JSON object
//!
//! Core logic only ever depends on the [`Identifiable`] capability.

mod bulk;
mod types;

pub use bulk::{BulkFailure, BulkItemResult, DocBulk, FailedDoc};
pub use types::{Doc, DynamicDoc, Identifiable};

//! Error types for couchlink

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::BulkFailure;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, CouchError>;

/// Error body reported by the store, e.g. `{"error":"conflict","reason":"Document update conflict."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Short error kind such as `not_found` or `conflict`
    pub error: String,
    /// Human readable detail
    #[serde(default)]
    pub reason: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.reason)
    }
}

/// Client error type
#[derive(Error, Debug)]
pub enum CouchError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Bad request: {0}")]
    BadRequest(ErrorEnvelope),

    #[error("Permission denied: {0}")]
    PermissionDenied(ErrorEnvelope),

    #[error("Not found: {0}")]
    NotFound(ErrorEnvelope),

    /// Replication source or target could not be reached by the store
    #[error("Database unknown: {0}")]
    DatabaseUnknown(String),

    /// Optimistic-concurrency precondition failed, the caller should re-read and retry
    #[error("Lost update: {0}")]
    LostUpdate(ErrorEnvelope),

    #[error("{0}")]
    PartialFailure(BulkFailure),

    /// The two legs of a sync disagree on whether they are running
    #[error("Inconsistent sync: a->b active: {a_to_b}, b->a active: {b_to_a}")]
    Inconsistent { a_to_b: bool, b_to_a: bool },

    #[error(
        "Error cancelling sync, a->b: {}, b->a: {}",
        outcome(.a_to_b),
        outcome(.b_to_a)
    )]
    CancelFailed {
        a_to_b: Option<Box<CouchError>>,
        b_to_a: Option<Box<CouchError>>,
    },

    #[error("Store error {status}: {envelope}")]
    Store { status: u16, envelope: ErrorEnvelope },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

fn outcome(err: &Option<Box<CouchError>>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => "ok".to_string(),
    }
}

impl From<reqwest::Error> for CouchError {
    fn from(err: reqwest::Error) -> Self {
        CouchError::Transport(err.to_string())
    }
}

impl CouchError {
    /// Map a store error envelope and its HTTP status onto the taxonomy
    pub fn from_envelope(status: u16, envelope: ErrorEnvelope) -> Self {
        match (envelope.error.as_str(), status) {
            ("conflict", _) | (_, 409) => CouchError::LostUpdate(envelope),
            ("not_found", _) | (_, 404) => CouchError::NotFound(envelope),
            ("unauthorized" | "forbidden", _) | (_, 401 | 403) => {
                CouchError::PermissionDenied(envelope)
            }
            ("bad_request", _) | (_, 400) => CouchError::BadRequest(envelope),
            _ => CouchError::Store { status, envelope },
        }
    }

    /// Short error kind reported by the store (e.g. `bad_request`).
    ///
    /// Returns `None` if the error did not originate from the store.
    pub fn error_type(&self) -> Option<&str> {
        match self {
            CouchError::BadRequest(e)
            | CouchError::PermissionDenied(e)
            | CouchError::NotFound(e)
            | CouchError::LostUpdate(e) => Some(&e.error),
            CouchError::Store { envelope, .. } => Some(&envelope.error),
            CouchError::PartialFailure(failure) if failure.is_lost_update() => Some("conflict"),
            _ => None,
        }
    }

    /// Whether the caller lost a race and should re-read before retrying
    pub fn is_lost_update(&self) -> bool {
        match self {
            CouchError::LostUpdate(_) => true,
            CouchError::PartialFailure(failure) => failure.is_lost_update(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CouchError::NotFound(_) | CouchError::DatabaseUnknown(_))
    }
}

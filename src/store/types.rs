//! Store wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::DynamicDoc;

/// Store answer to a single document write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResult {
    pub id: String,
    pub rev: String,
    #[serde(default)]
    pub ok: bool,
}

/// One entry of an `open_revs=all` answer; `ok` holds an available leaf
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenRevision {
    #[serde(default)]
    pub ok: Option<DynamicDoc>,
}

/// A background task on a store instance, e.g. a continuous replication.
///
/// Loosely typed, different store versions report different fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveTask(Map<String, Value>);

impl ActiveTask {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn task_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn is_replication(&self) -> bool {
        self.task_type() == Some("replication")
    }

    /// Replication id, the session id with store-specific suffixes like `+continuous`
    pub fn replication_id(&self) -> Option<&str> {
        self.str_field("replication_id")
    }

    pub fn source(&self) -> Option<&str> {
        self.str_field("source")
    }

    pub fn target(&self) -> Option<&str> {
        self.str_field("target")
    }

    pub fn started_on(&self) -> Option<DateTime<Utc>> {
        self.0
            .get("started_on")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

impl From<Map<String, Value>> for ActiveTask {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::{Doc, Identifiable};

/// Map/reduce source of one view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub map: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<String>,
}

impl ViewDefinition {
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            reduce: None,
        }
    }

    pub fn with_reduce(mut self, reduce: impl Into<String>) -> Self {
        self.reduce = Some(reduce.into());
        self
    }
}

/// Design document holding view definitions.
///
/// Members the client does not know about (`language`, `filters`, ...) are
/// kept in `extra` so rewriting a design document never drops them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignDoc {
    #[serde(flatten)]
    pub doc: Doc,
    #[serde(default)]
    pub views: BTreeMap<String, ViewDefinition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DesignDoc {
    /// Empty design document stored at `_design/{name}`
    pub fn new(name: &str) -> Self {
        Self {
            doc: Doc::new(format!("_design/{name}")),
            ..Default::default()
        }
    }
}

impl Identifiable for DesignDoc {
    fn id(&self) -> &str {
        self.doc.id()
    }

    fn rev(&self) -> &str {
        self.doc.rev()
    }

    fn set_id_rev(&mut self, id: &str, rev: &str) {
        self.doc.set_id_rev(id, rev)
    }
}

/// Rows of a view query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewResult {
    #[serde(default)]
    pub offset: u64,
    /// Absent for reduced results
    #[serde(default)]
    pub total_rows: Option<u64>,
    #[serde(default)]
    pub rows: Vec<ViewRow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewRow {
    /// Emitting document; reduced rows have none
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

impl ViewRow {
    /// Numeric value of the row, e.g. the result of a `_count` reduce
    pub fn value_u64(&self) -> Option<u64> {
        self.value
            .as_u64()
            .or_else(|| self.value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
    }
}

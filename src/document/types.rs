//! Document types

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Anything that can be stored must expose its key and revision token.
///
/// After a successful write the store's new revision is written back through
/// [`Identifiable::set_id_rev`], so callers never track revisions by hand.
pub trait Identifiable {
    fn id(&self) -> &str;

    fn rev(&self) -> &str;

    fn set_id_rev(&mut self, id: &str, rev: &str);

    fn id_rev(&self) -> (&str, &str) {
        (self.id(), self.rev())
    }

    /// A document with an empty key has never been persisted
    fn is_new(&self) -> bool {
        self.id().is_empty()
    }
}

/// Static-shape identity, embed into your own struct:
///
/// ```
/// use couchlink::document::{Doc, Identifiable};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Person {
///     #[serde(flatten)]
///     doc: Doc,
///     name: String,
/// }
///
/// impl Identifiable for Person {
///     fn id(&self) -> &str { self.doc.id() }
///     fn rev(&self) -> &str { self.doc.rev() }
///     fn set_id_rev(&mut self, id: &str, rev: &str) { self.doc.set_id_rev(id, rev) }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doc {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub rev: String,
}

impl Doc {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: String::new(),
        }
    }
}

impl Identifiable for Doc {
    fn id(&self) -> &str {
        &self.id
    }

    fn rev(&self) -> &str {
        &self.rev
    }

    fn set_id_rev(&mut self, id: &str, rev: &str) {
        self.id = id.to_string();
        self.rev = rev.to_string();
    }
}

/// Fully dynamic document for data without a fixed schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicDoc(Map<String, Value>);

impl DynamicDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Deleted leaves carry `_deleted: true`
    pub fn is_deleted(&self) -> bool {
        self.0
            .get("_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_deleted(&mut self) {
        self.0.insert("_deleted".to_string(), Value::Bool(true));
    }

    /// Decode into a caller-defined type
    pub fn into_typed<T: DeserializeOwned>(self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.0))
    }
}

impl From<Map<String, Value>> for DynamicDoc {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Identifiable for DynamicDoc {
    fn id(&self) -> &str {
        self.0.get("_id").and_then(Value::as_str).unwrap_or("")
    }

    fn rev(&self) -> &str {
        self.0.get("_rev").and_then(Value::as_str).unwrap_or("")
    }

    fn set_id_rev(&mut self, id: &str, rev: &str) {
        self.0.insert("_id".to_string(), Value::String(id.to_string()));
        if rev.is_empty() {
            self.0.remove("_rev");
        } else {
            self.0.insert("_rev".to_string(), Value::String(rev.to_string()));
        }
    }
}

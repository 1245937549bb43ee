//! Query parameters

use std::collections::BTreeMap;

use serde_json::Value;
use url::Url;

/// Options serialized as URL query parameters.
///
/// Strings are passed through as-is (e.g. `open_revs=all`), every other
/// value is JSON-encoded (`reduce=false`, `startkey=["a",1]`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    params: BTreeMap<String, Value>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn reduce(self, reduce: bool) -> Self {
        self.with("reduce", reduce)
    }

    pub fn limit(self, limit: u64) -> Self {
        self.with("limit", limit)
    }

    pub fn include_docs(self, include_docs: bool) -> Self {
        self.with("include_docs", include_docs)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Append the options to the query string of `url`
    pub fn apply(&self, url: &mut Url) {
        if self.params.is_empty() {
            return;
        }

        let mut pairs = url.query_pairs_mut();
        for (key, value) in &self.params {
            match value {
                Value::String(s) => pairs.append_pair(key, s),
                other => pairs.append_pair(key, &other.to_string()),
            };
        }
    }
}

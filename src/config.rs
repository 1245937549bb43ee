//! Configuration management for couchlink

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub conflict_index: ConflictIndex,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

/// Names of the aggregate index used to find conflicted documents.
///
/// The design document is stored as `_design/{design}` and the view is
/// queried at `_design/{design}/_view/{view}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConflictIndex {
    pub design: String,
    pub view: String,
}

impl Default for ConflictIndex {
    fn default() -> Self {
        ConflictIndex {
            design: "conflicts".to_string(),
            view: "all".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig {
                url: "http://127.0.0.1:5984".to_string(),
                username: None,
                password: None,
                timeout_secs: 30,
            },
            conflict_index: ConflictIndex::default(),
        }
    }
}

impl Config {
    /// Load from `COUCH_*` variables; each unset variable keeps its default
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        Config {
            store: StoreConfig {
                url: var("COUCH_URL").unwrap_or(defaults.store.url),
                username: var("COUCH_USER"),
                password: var("COUCH_PASSWORD"),
                timeout_secs: var("COUCH_TIMEOUT_SECS")
                    .and_then(|secs| secs.parse().ok())
                    .unwrap_or(defaults.store.timeout_secs),
            },
            conflict_index: ConflictIndex {
                design: var("COUCH_CONFLICT_DESIGN").unwrap_or(defaults.conflict_index.design),
                view: var("COUCH_CONFLICT_VIEW").unwrap_or(defaults.conflict_index.view),
            },
        }
    }
}

impl StoreConfig {
    /// Credentials are only used when a user name is configured
    pub fn credentials(&self) -> Option<crate::store::Credentials> {
        self.username.as_ref().map(|user| {
            crate::store::Credentials::new(user, self.password.as_deref().unwrap_or_default())
        })
    }
}

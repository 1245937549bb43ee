//! One-directional replication sessions

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CouchError, ErrorEnvelope, Result};
use crate::store::Database;

/// Client-side view of a replication's lifecycle.
///
/// Completion of one-shot replications is not tracked, poll
/// [`Replication::is_active`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationState {
    /// Not started yet, there is no session id
    Created,
    Active,
    Cancelled,
}

/// Body of a `_replicate` request
#[derive(Debug, Clone, Serialize)]
struct ReplicationRequest {
    create_target: bool,
    source: String,
    target: String,
    continuous: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    cancel: bool,
}

#[derive(Debug, Deserialize)]
struct ReplicationResponse {
    #[serde(default)]
    session_id: Option<String>,
    /// Continuous replications are identified by their local id on some versions
    #[serde(default, rename = "_local_id")]
    local_id: Option<String>,
    #[serde(default)]
    source_last_seq: Option<Value>,
}

/// A replication from a source database to a target database.
///
/// The request is executed by the source's store instance, so the target
/// address carries the target's credentials.
#[derive(Debug, Clone)]
pub struct Replication {
    source: Database,
    target: Database,
    continuous: bool,
    session_id: String,
    source_last_seq: Option<Value>,
    state: ReplicationState,
}

impl Replication {
    pub fn new(source: Database, target: Database, continuous: bool) -> Self {
        Self {
            source,
            target,
            continuous,
            session_id: String::new(),
            source_last_seq: None,
            state: ReplicationState::Created,
        }
    }

    pub fn source(&self) -> &Database {
        &self.source
    }

    pub fn target(&self) -> &Database {
        &self.target
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    /// Store-assigned session id, empty until the replication was started
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Source sequence reported when the session was created
    pub fn source_last_seq(&self) -> Option<&Value> {
        self.source_last_seq.as_ref()
    }

    pub fn state(&self) -> ReplicationState {
        self.state
    }

    fn request(&self, cancel: bool) -> ReplicationRequest {
        ReplicationRequest {
            create_target: true,
            source: self.source.url().to_string(),
            target: self.target.url_with_credentials().to_string(),
            continuous: self.continuous,
            cancel,
        }
    }

    async fn post(&self, request: &ReplicationRequest) -> Result<crate::store::StoreResponse> {
        let server = self.source.server();
        server
            .execute(
                Method::POST,
                server.endpoint(&["_replicate"]),
                self.source.credentials(),
                Some(serde_json::to_value(request)?),
            )
            .await
    }

    /// Ask the source store to start replicating. Returns once the store
    /// accepted the session, not when replication is done.
    ///
    /// A handle starts at most once; build a new one to replicate again.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ReplicationState::Created {
            return Err(CouchError::BadRequest(ErrorEnvelope::new(
                "already_started",
                format!(
                    "replication {} -> {} is {:?}",
                    self.source.name(),
                    self.target.name(),
                    self.state
                ),
            )));
        }

        let response = self.post(&self.request(false)).await.map_err(|err| match err {
            CouchError::NotFound(envelope) => CouchError::DatabaseUnknown(envelope.to_string()),
            other => other,
        })?;

        let status = response.status;
        let response: ReplicationResponse = response.json()?;
        let session_id = response
            .session_id
            .or(response.local_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CouchError::Store {
                status,
                envelope: ErrorEnvelope::new("missing_session_id", "replication accepted without a session id"),
            })?;

        tracing::info!(
            source = %self.source.name(),
            target = %self.target.name(),
            continuous = self.continuous,
            session_id = %session_id,
            "Started replication"
        );

        self.session_id = session_id;
        self.source_last_seq = response.source_last_seq;
        self.state = ReplicationState::Active;
        Ok(())
    }

    /// Ask the source store to stop this replication.
    ///
    /// Cancelling a replication that already stopped fails with
    /// [`CouchError::NotFound`].
    pub async fn cancel(&mut self) -> Result<()> {
        self.post(&self.request(true)).await?;

        tracing::info!(
            source = %self.source.name(),
            target = %self.target.name(),
            session_id = %self.session_id,
            "Cancelled replication"
        );

        self.state = ReplicationState::Cancelled;
        Ok(())
    }

    /// Whether the source store lists this session among its active tasks
    pub async fn is_active(&self) -> Result<bool> {
        // An empty prefix would match every task
        if self.session_id.is_empty() {
            return Ok(false);
        }

        let tasks = self.source.server().replications().await?;
        Ok(tasks.iter().any(|task| {
            task.replication_id()
                .map(|id| id.starts_with(&self.session_id))
                .unwrap_or(false)
        }))
    }
}

impl Database {
    /// Replicate this database to `target`, creating the target if needed.
    /// The target may live on another store instance.
    pub async fn replicate_to(&self, target: &Database, continuous: bool) -> Result<Replication> {
        let mut replication = Replication::new(self.clone(), target.clone(), continuous);
        replication.start().await?;
        Ok(replication)
    }
}

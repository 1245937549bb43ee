//! Store instance handle

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::config::{Config, ConflictIndex};
use crate::error::{CouchError, Result};

use super::database::{split_database_url, Database};
use super::transport::{HttpTransport, StoreRequest, StoreResponse, Transport};
use super::types::ActiveTask;

/// Access credentials for basic auth
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// A store instance, cheap to clone
#[derive(Clone)]
pub struct Server {
    url: Url,
    credentials: Option<Credentials>,
    conflict_index: ConflictIndex,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("url", &self.url.as_str())
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl Server {
    /// Server handle using the default HTTP transport
    pub fn new(url: &str, credentials: Option<Credentials>) -> Result<Self> {
        Self::with_transport(url, credentials, Arc::new(HttpTransport::default()))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(Duration::from_secs(config.store.timeout_secs))?;
        Ok(
            Self::with_transport(&config.store.url, config.store.credentials(), Arc::new(transport))?
                .with_conflict_index(config.conflict_index.clone()),
        )
    }

    pub fn with_transport(
        url: &str,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let url = Url::parse(url)?;
        if url.cannot_be_a_base() {
            return Err(CouchError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        Ok(Self {
            url,
            credentials,
            conflict_index: ConflictIndex::default(),
            transport,
        })
    }

    pub fn with_conflict_index(mut self, conflict_index: ConflictIndex) -> Self {
        self.conflict_index = conflict_index;
        self
    }

    /// Base URL of the instance (host, port and any path prefix)
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn conflict_index(&self) -> &ConflictIndex {
        &self.conflict_index
    }

    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name)
    }

    /// Database addressed by a full URL, possibly on another host.
    ///
    /// The handle shares this server's transport and conflict index. Userinfo
    /// in the URL overrides this server's credentials.
    pub fn database_from_url(&self, url: &str) -> Result<Database> {
        let (base, name, credentials) = split_database_url(url)?;
        if base.cannot_be_a_base() {
            return Err(CouchError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        let server = Server {
            url: base,
            credentials: credentials.or_else(|| self.credentials.clone()),
            conflict_index: self.conflict_index.clone(),
            transport: self.transport.clone(),
        };
        Ok(server.database(&name))
    }

    /// URL below the base; each segment is percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Generic store request.
    ///
    /// Store-reported errors are returned as typed errors instead of being
    /// decoded into the response.
    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        credentials: Option<&Credentials>,
        body: Option<Value>,
    ) -> Result<StoreResponse> {
        self.execute_raw(method, url, credentials, body)
            .await?
            .error_for_status()
    }

    pub(crate) async fn execute_raw(
        &self,
        method: Method,
        url: Url,
        credentials: Option<&Credentials>,
        body: Option<Value>,
    ) -> Result<StoreResponse> {
        tracing::debug!(method = %method, url = %url, "Store request");

        let mut request = StoreRequest::new(method, url).with_credentials(credentials);
        if let Some(body) = body {
            request = request.with_body(body);
        }

        let response = self.transport.execute(request).await?;
        tracing::debug!(status = response.status, "Store response");
        Ok(response)
    }

    pub async fn head(&self, url: &Url, credentials: Option<&Credentials>) -> Result<bool> {
        self.transport.head(url, credentials).await
    }

    /// All background tasks currently running on the instance
    pub async fn active_tasks(&self) -> Result<Vec<ActiveTask>> {
        let url = self.endpoint(&["_active_tasks"]);
        self.execute(Method::GET, url, self.credentials(), None)
            .await?
            .json()
    }

    /// Active tasks that are replications
    pub async fn replications(&self) -> Result<Vec<ActiveTask>> {
        let tasks = self.active_tasks().await?;
        Ok(tasks.into_iter().filter(ActiveTask::is_replication).collect())
    }
}

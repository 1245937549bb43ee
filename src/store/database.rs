//! Database handle and single-document operations

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

use crate::document::{BulkFailure, BulkItemResult, DocBulk, DynamicDoc, FailedDoc, Identifiable};
use crate::error::{CouchError, Result};

use super::query::QueryOptions;
use super::server::{Credentials, Server};
use super::types::{OpenRevision, WriteResult};

/// A database of a store instance
#[derive(Debug, Clone)]
pub struct Database {
    server: Server,
    name: String,
    credentials: Option<Credentials>,
}

impl Database {
    pub fn new(server: Server, name: &str) -> Self {
        Self {
            server,
            name: name.to_string(),
            credentials: None,
        }
    }

    /// Database addressed by a full URL such as `http://user:pw@host:5984/mydb`.
    ///
    /// The last path segment names the database, userinfo becomes credentials.
    /// The handle uses a default HTTP transport and conflict index, see
    /// [`Server::database_from_url`] to inherit them from a configured server.
    pub fn from_url(url: &str) -> Result<Self> {
        let (base, name, credentials) = split_database_url(url)?;
        let server = Server::new(base.as_str(), credentials)?;
        Ok(server.database(&name))
    }

    /// Use credentials for this database instead of the server's
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Database credentials, falling back to the server's
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials
            .as_ref()
            .or_else(|| self.server.credentials())
    }

    pub fn url(&self) -> Url {
        self.server.endpoint(&[&self.name])
    }

    /// Database URL carrying the credentials in its userinfo, as needed
    /// when another instance has to reach this database
    pub fn url_with_credentials(&self) -> Url {
        let mut url = self.url();
        if let Some(cred) = self.credentials() {
            let _ = url.set_username(cred.user());
            let _ = url.set_password(Some(cred.password()));
        }
        url
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut all = Vec::with_capacity(segments.len() + 1);
        all.push(self.name.as_str());
        all.extend_from_slice(segments);
        self.server.endpoint(&all)
    }

    /// Design and local documents keep their prefix as a path segment
    pub(crate) fn doc_url(&self, id: &str) -> Url {
        for prefix in ["_design/", "_local/"] {
            if let Some(rest) = id.strip_prefix(prefix) {
                return self.endpoint(&[prefix.trim_end_matches('/'), rest]);
            }
        }
        self.endpoint(&[id])
    }

    pub(crate) async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<super::StoreResponse> {
        self.server
            .execute(method, url, self.credentials(), body)
            .await
    }

    // ========================================================================
    // Database lifecycle
    // ========================================================================

    pub async fn create(&self) -> Result<()> {
        self.execute(Method::PUT, self.url(), None).await?;
        tracing::info!(db = %self.name, "Created database");
        Ok(())
    }

    pub async fn drop_database(&self) -> Result<()> {
        self.execute(Method::DELETE, self.url(), None).await?;
        tracing::info!(db = %self.name, "Dropped database");
        Ok(())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.server.head(&self.url(), self.credentials()).await
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Create `doc` if it has no key yet, otherwise write a new revision of it.
    ///
    /// On success `doc` carries the key and revision assigned by the store.
    pub async fn insert<D: Identifiable + Serialize>(&self, doc: &mut D) -> Result<()> {
        let body = serde_json::to_value(&*doc)?;

        let response = if doc.is_new() {
            self.execute(Method::POST, self.url(), Some(body)).await?
        } else {
            self.execute(Method::PUT, self.doc_url(doc.id()), Some(body))
                .await?
        };

        let result: WriteResult = response.json()?;
        doc.set_id_rev(&result.id, &result.rev);
        Ok(())
    }

    /// Write many documents in one request.
    ///
    /// With `all_or_nothing` the store applies either every document or none.
    /// Documents that were written carry their new revisions afterwards; the
    /// others are listed in the returned [`CouchError::PartialFailure`].
    pub async fn insert_bulk<D: Identifiable + Serialize>(
        &self,
        bulk: &mut DocBulk<D>,
        all_or_nothing: bool,
    ) -> Result<()> {
        let bodies = bulk
            .docs()
            .iter()
            .map(serde_json::to_value)
            .collect::<serde_json::Result<Vec<_>>>()?;

        let results = self.bulk_docs(bodies, all_or_nothing).await?;
        let failed = write_back(bulk.docs_mut(), &results);

        if failed.is_empty() {
            Ok(())
        } else {
            Err(CouchError::PartialFailure(BulkFailure {
                failed,
                submitted: bulk.len(),
            }))
        }
    }

    pub(crate) async fn bulk_docs(
        &self,
        docs: Vec<Value>,
        all_or_nothing: bool,
    ) -> Result<Vec<BulkItemResult>> {
        let body = json!({ "docs": docs, "all_or_nothing": all_or_nothing });
        let response = self
            .server
            .execute_raw(
                Method::POST,
                self.endpoint(&["_bulk_docs"]),
                self.credentials(),
                Some(body),
            )
            .await?;

        // Rejected all-or-nothing writes report per-document results with 417
        if response.status == 417 && matches!(response.body, Some(Value::Array(_))) {
            return response.json();
        }

        response.error_for_status()?.json()
    }

    /// Latest revision of a document
    pub async fn retrieve<D: DeserializeOwned>(&self, id: &str) -> Result<D> {
        self.fetch(id, &QueryOptions::new()).await
    }

    /// A specific revision of a document
    pub async fn retrieve_revision<D: DeserializeOwned>(&self, id: &str, rev: &str) -> Result<D> {
        self.fetch(id, &QueryOptions::new().with("rev", rev)).await
    }

    /// Every leaf revision of a document, deleted ones included
    pub(crate) async fn open_revisions(&self, id: &str) -> Result<Vec<DynamicDoc>> {
        let revs: Vec<OpenRevision> = self
            .fetch(id, &QueryOptions::new().with("open_revs", "all"))
            .await?;
        Ok(revs.into_iter().filter_map(|rev| rev.ok).collect())
    }

    async fn fetch<D: DeserializeOwned>(&self, id: &str, options: &QueryOptions) -> Result<D> {
        let mut url = self.doc_url(id);
        options.apply(&mut url);
        self.execute(Method::GET, url, None).await?.json()
    }

    pub async fn delete(&self, id: &str, rev: &str) -> Result<()> {
        let mut url = self.doc_url(id);
        QueryOptions::new().with("rev", rev).apply(&mut url);
        self.execute(Method::DELETE, url, None).await?;
        Ok(())
    }
}

/// Split a database URL into the server base URL, the decoded database name
/// and the credentials carried in its userinfo
pub(crate) fn split_database_url(url: &str) -> Result<(Url, String, Option<Credentials>)> {
    let mut url = Url::parse(url)?;

    let name = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|name| name.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .ok_or_else(|| CouchError::DatabaseUnknown(format!("no database name in {url}")))?;

    let credentials = if url.username().is_empty() {
        None
    } else {
        let user = urlencoding::decode(url.username())
            .map(|u| u.into_owned())
            .unwrap_or_else(|_| url.username().to_string());
        let password = url
            .password()
            .map(|p| {
                urlencoding::decode(p)
                    .map(|p| p.into_owned())
                    .unwrap_or_else(|_| p.to_string())
            })
            .unwrap_or_default();
        Some(Credentials::new(user, password))
    };
    let _ = url.set_username("");
    let _ = url.set_password(None);

    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().pop();
    }

    Ok((url, name, credentials))
}

/// Write new revisions from bulk results back into `docs`, returning the
/// documents that were not written
pub(crate) fn write_back<D: Identifiable>(
    docs: &mut [D],
    results: &[BulkItemResult],
) -> Vec<FailedDoc> {
    let mut failed = Vec::new();

    for (i, doc) in docs.iter_mut().enumerate() {
        match results.get(i) {
            Some(result) if result.is_ok() => {
                let id = if result.id.is_empty() {
                    doc.id().to_string()
                } else {
                    result.id.clone()
                };
                doc.set_id_rev(&id, result.rev.as_deref().unwrap_or_default());
            }
            Some(result) => failed.push(FailedDoc {
                id: doc.id().to_string(),
                rev: doc.rev().to_string(),
                error: result.error.clone().unwrap_or_default(),
                reason: result.reason.clone().unwrap_or_default(),
            }),
            None => failed.push(FailedDoc {
                id: doc.id().to_string(),
                rev: doc.rev().to_string(),
                error: "missing_result".to_string(),
                reason: "store returned no result for this document".to_string(),
            }),
        }
    }

    failed
}

//! Request transport
//!
//! [`Transport`] executes exactly one request and reports the raw outcome.
//! Store-reported error bodies are turned into typed errors by
//! [`StoreResponse::error_for_status`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::{CouchError, ErrorEnvelope, Result};

use super::server::Credentials;

/// A single request against the store
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub method: Method,
    pub url: Url,
    pub credentials: Option<Credentials>,
    pub body: Option<Value>,
}

impl StoreRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            credentials: None,
            body: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<&Credentials>) -> Self {
        self.credentials = credentials.cloned();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status and decoded JSON body of a store response
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl StoreResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into a typed error, decoding the
    /// `{error, reason}` body when the store sent one
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }

        let envelope = self
            .body
            .and_then(|body| serde_json::from_value::<ErrorEnvelope>(body).ok())
            .unwrap_or_else(|| {
                ErrorEnvelope::new(format!("http_{}", self.status), "no error body")
            });

        Err(CouchError::from_envelope(self.status, envelope))
    }

    /// Decode the body into `T`, an empty body decodes as JSON `null`
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.body.unwrap_or(Value::Null))?)
    }
}

/// Executes single requests against the store
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request. Fails only for transport-level problems; store
    /// errors come back as non-2xx responses.
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse>;

    /// Existence check via a header-only request.
    ///
    /// A non-2xx status yields `false`, a network failure yields an error.
    async fn head(&self, url: &Url, credentials: Option<&Credentials>) -> Result<bool>;
}

/// reqwest-backed transport speaking JSON with optional basic auth
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: StoreRequest) -> Result<StoreResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .header(header::ACCEPT, "application/json");

        if let Some(cred) = &request.credentials {
            builder = builder.basic_auth(cred.user(), Some(cred.password()));
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        let body = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) if (200..300).contains(&status) => return Err(e.into()),
                // Error pages from proxies are not JSON, the status still classifies them
                Err(_) => None,
            }
        };

        Ok(StoreResponse { status, body })
    }

    async fn head(&self, url: &Url, credentials: Option<&Credentials>) -> Result<bool> {
        let mut builder = self.client.head(url.clone());

        if let Some(cred) = credentials {
            builder = builder.basic_auth(cred.user(), Some(cred.password()));
        }

        let response = builder.send().await?;
        Ok(response.status().is_success())
    }
}

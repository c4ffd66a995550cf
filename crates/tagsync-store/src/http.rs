//! HTTP document store backend.
//!
//! Talks to a query/mutate HTTP API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch | `POST {base}/v{version}/data/query/{dataset}` with `{query, params}` |
//! | create / commit | `POST {base}/v{version}/data/mutate/{dataset}?returnDocuments=true` with `{mutations}` |
//!
//! Writes made through this store are published on its own event bus, so
//! feeds in the same process see sweeps and creations without a listener.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use tagsync_core::defaults;
use tagsync_core::logging::{component, subsystem};
use tagsync_core::{
    document_id, document_type, Document, DocumentQuery, DocumentStore, Error, EventBus, Result,
    StoreEvent, Transaction,
};

use crate::groq;

/// Configuration for [`HttpStore`].
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    /// Base URL of the API (e.g. `https://abc123.api.example.io`).
    pub base_url: String,
    pub dataset: String,
    /// API version date, without the leading `v`.
    pub api_version: String,
    /// Bearer token (optional for public datasets).
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            dataset: defaults::STORE_DATASET.to_string(),
            api_version: defaults::STORE_API_VERSION.to_string(),
            token: None,
            timeout_secs: defaults::STORE_TIMEOUT_SECS,
        }
    }
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TAGSYNC_STORE_URL` | (required) |
    /// | `TAGSYNC_DATASET` | `production` |
    /// | `TAGSYNC_API_VERSION` | `2021-10-21` |
    /// | `TAGSYNC_TOKEN` | (none) |
    /// | `TAGSYNC_HTTP_TIMEOUT_SECS` | 30 |
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("TAGSYNC_STORE_URL")
            .map_err(|_| Error::Config("TAGSYNC_STORE_URL is not set".to_string()))?;

        let config = Self {
            base_url,
            dataset: std::env::var("TAGSYNC_DATASET")
                .unwrap_or_else(|_| defaults::STORE_DATASET.to_string()),
            api_version: std::env::var("TAGSYNC_API_VERSION")
                .unwrap_or_else(|_| defaults::STORE_API_VERSION.to_string()),
            token: std::env::var("TAGSYNC_TOKEN").ok().filter(|t| !t.is_empty()),
            timeout_secs: std::env::var("TAGSYNC_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::STORE_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = dataset.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "store URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.dataset.trim().is_empty() {
            return Err(Error::Config("dataset must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("HTTP timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/v{}/data/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version.trim_start_matches('v'),
            action,
            self.dataset
        )
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct MutateResponse {
    #[serde(default)]
    results: Vec<MutateResult>,
}

#[derive(Debug, Deserialize)]
struct MutateResult {
    #[serde(default)]
    document: Option<Document>,
}

/// [`DocumentStore`] over the query/mutate HTTP API.
pub struct HttpStore {
    client: Client,
    config: HttpStoreConfig,
    events: EventBus,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = subsystem::STORE,
            component = component::HTTP_STORE,
            base_url = %config.base_url,
            dataset = %config.dataset,
            "Initializing HTTP store"
        );

        Ok(Self {
            client,
            config,
            events: EventBus::default(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpStoreConfig::from_env()?)
    }

    pub fn config(&self) -> &HttpStoreConfig {
        &self.config
    }

    fn build_request(&self, url: String) -> RequestBuilder {
        let request = self.client.post(url);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("store returned {}: {}", status, body)));
        }
        Err(Error::Store(format!("store returned {}: {}", status, body)))
    }

    async fn mutate(&self, mutations: Vec<Value>) -> Result<MutateResponse> {
        let url = format!(
            "{}?returnDocuments=true",
            self.config.endpoint("mutate")
        );
        let response = self
            .build_request(url)
            .json(&json!({ "mutations": mutations }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse mutate response: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    #[instrument(skip(self), fields(subsystem = subsystem::STORE, component = component::HTTP_STORE))]
    async fn fetch(&self, query: DocumentQuery) -> Result<Vec<Document>> {
        let start = Instant::now();
        let rendered = groq::render(&query);

        let response = self
            .build_request(self.config.endpoint("query"))
            .json(&json!({ "query": rendered.query, "params": rendered.params }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse query response: {}", e)))?;

        let docs: Vec<Document> = match body.result {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            Value::Object(map) => vec![map],
            _ => Vec::new(),
        };

        debug!(
            result_count = docs.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Query complete"
        );
        Ok(docs)
    }

    #[instrument(skip(self, document), fields(subsystem = subsystem::STORE, component = component::HTTP_STORE))]
    async fn create(&self, document: Document) -> Result<Document> {
        let sent = document.clone();
        let body = self.mutate(vec![json!({ "create": document })]).await?;
        let stored = body
            .results
            .into_iter()
            .find_map(|r| r.document)
            .unwrap_or(sent);

        if let Some(id) = document_id(&stored) {
            self.events.emit(StoreEvent::Created {
                document_id: id.to_string(),
                document_type: document_type(&stored).map(String::from),
            });
        }
        Ok(stored)
    }

    #[instrument(skip(self, transaction), fields(subsystem = subsystem::STORE, component = component::HTTP_STORE, operations = transaction.len()))]
    async fn commit(&self, transaction: Transaction) -> Result<()> {
        if transaction.is_empty() {
            return Ok(());
        }
        let operations = transaction.into_operations();
        let mutations = operations
            .iter()
            .map(|op| json!({ "patch": op }))
            .collect();
        let body = self.mutate(mutations).await?;

        let types: std::collections::HashMap<String, Option<String>> = body
            .results
            .into_iter()
            .filter_map(|r| r.document)
            .filter_map(|doc| {
                document_id(&doc).map(|id| (id.to_string(), document_type(&doc).map(String::from)))
            })
            .collect();
        for op in operations {
            let document_type = types.get(&op.id).cloned().flatten();
            self.events.emit(StoreEvent::Patched {
                document_id: op.id,
                document_type,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        Some(self.events.subscribe())
    }
}

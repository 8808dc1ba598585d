use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;

use crate::{
    embedding::{truncate, Embedder},
    item::{MemoryItem, MemoryMetadata},
    store::{memory_id, stamp_metadata, MemoryError, MemoryStore},
};

const CONTROL_PLANE_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

/// Connection settings for a Pinecone serverless index.
#[derive(Debug, Clone)]
pub struct PineconeSettings {
    /// Pinecone API key.
    pub api_key: String,
    /// Index name (created on first use when missing).
    pub index_name: String,
    /// Cloud used when creating the index.
    pub cloud: String,
    /// Region used when creating the index.
    pub region: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl PineconeSettings {
    /// Settings with the defaults used by the assistant.
    #[must_use]
    pub fn new(api_key: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            index_name: index_name.into(),
            cloud: "aws".into(),
            region: "us-east-1".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Pinecone REST backend with embeddings from an [`Embedder`].
///
/// The data-plane host is resolved lazily from the control plane and cached;
/// a failed resolution is retried on the next call.
pub struct PineconeStore {
    client: Client,
    settings: PineconeSettings,
    control_plane: String,
    embedder: Arc<dyn Embedder>,
    host: OnceCell<String>,
}

impl std::fmt::Debug for PineconeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeStore")
            .field("index", &self.settings.index_name)
            .field("host", &self.host.get())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct IndexDescription {
    host: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: MemoryMetadata,
}

impl PineconeStore {
    /// Creates a store; no network traffic happens until first use.
    pub fn new(settings: PineconeSettings, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        if settings.api_key.is_empty() {
            return Err(MemoryError::NotConfigured("PINECONE_API_KEY is not set".into()));
        }
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            settings,
            control_plane: CONTROL_PLANE_URL.into(),
            embedder,
            host: OnceCell::new(),
        })
    }

    /// Overrides the control plane URL (tests, private deployments).
    #[must_use]
    pub fn with_control_plane(mut self, url: impl Into<String>) -> Self {
        self.control_plane = url.into();
        self
    }

    /// Resolves the index host, creating the index when it does not exist.
    pub async fn ensure_index(&self) -> Result<&str, MemoryError> {
        self.host
            .get_or_try_init(|| self.describe_or_create())
            .await
            .map(String::as_str)
    }

    async fn describe_or_create(&self) -> Result<String, MemoryError> {
        let url = format!("{}/indexes/{}", self.control_plane, self.settings.index_name);
        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(index = %self.settings.index_name, "creating pinecone index");
            let body = json!({
                "name": self.settings.index_name,
                "dimension": self.embedder.dimension(),
                "metric": "cosine",
                "spec": {
                    "serverless": {
                        "cloud": self.settings.cloud,
                        "region": self.settings.region,
                    }
                }
            });
            let created = self
                .authorized(self.client.post(format!("{}/indexes", self.control_plane)))
                .json(&body)
                .send()
                .await?;
            let description: IndexDescription = check(created).await?.json().await?;
            return Ok(normalize_host(&description.host));
        }
        let description: IndexDescription = check(response).await?.json().await?;
        Ok(normalize_host(&description.host))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.settings.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }
}

#[async_trait]
impl MemoryStore for PineconeStore {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        let host = self.ensure_index().await?;
        let vector = self.embedder.embed(query).await?;
        let payload = QueryRequest {
            vector: &vector,
            top_k,
            include_metadata: true,
        };
        let response = self
            .authorized(self.client.post(format!("{host}/query")))
            .json(&payload)
            .send()
            .await?;
        let body: QueryResponse = check(response).await?.json().await?;
        Ok(body
            .matches
            .into_iter()
            .map(|m| MemoryItem {
                content: m
                    .metadata
                    .get("content")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                id: Some(m.id),
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }

    async fn upsert(&self, text: &str, metadata: MemoryMetadata) -> Result<String, MemoryError> {
        let host = self.ensure_index().await?;
        let values = self.embedder.embed(text).await?;
        let id = memory_id();
        let payload = json!({
            "vectors": [{
                "id": id,
                "values": values,
                "metadata": stamp_metadata(text, metadata),
            }]
        });
        let response = self
            .authorized(self.client.post(format!("{host}/vectors/upsert")))
            .json(&payload)
            .send()
            .await?;
        check(response).await?;
        tracing::debug!(memory_id = %id, "memory saved");
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        let host = self.ensure_index().await?;
        let response = self
            .authorized(self.client.post(format!("{host}/vectors/delete")))
            .json(&json!({ "ids": [id] }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "pinecone"
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, MemoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MemoryError::Backend {
        status: status.as_u16(),
        body: truncate(&body, 300),
    })
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::store::MemoryError;

/// Dimension of Google's `text-embedding-004` vectors.
pub const GEMINI_EMBEDDING_DIMENSION: usize = 768;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Turns text into dense vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    /// Vector dimension produced by this embedder.
    fn dimension(&self) -> usize;
}

/// Gemini `embedContent` client.
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiEmbedder {
    /// Creates an embedder using the public Gemini endpoint.
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, MemoryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.into(),
        })
    }

    /// Points the embedder at another base URL (proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        if self.api_key.is_empty() {
            return Err(MemoryError::NotConfigured("GOOGLE_API_KEY is not set".into()));
        }
        let url = format!(
            "{}/models/{GEMINI_EMBEDDING_MODEL}:embedContent",
            self.base_url
        );
        let payload = EmbedRequest {
            model: format!("models/{GEMINI_EMBEDDING_MODEL}"),
            content: EmbedContent {
                parts: [EmbedPart { text }],
            },
            task_type: "RETRIEVAL_DOCUMENT",
        };
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|err| MemoryError::Embedding(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "status {status}: {}",
                truncate(&body, 200)
            )));
        }
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|err| MemoryError::Embedding(err.to_string()))?;
        Ok(body.embedding.values)
    }

    fn dimension(&self) -> usize {
        GEMINI_EMBEDDING_DIMENSION
    }
}

/// Deterministic bag-of-words embedder used by the in-memory backend.
///
/// Each lowercase alphanumeric token is hashed (FNV-1a) into one of
/// `dimension` buckets and the resulting vector is L2-normalised, so identical
/// inputs always produce identical vectors.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Creates an embedder with the given bucket count.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    /// Synchronous embedding used directly by the in-memory store.
    #[must_use]
    pub fn embed_now(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokens(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_now(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity of two vectors; zero when either is empty or zero.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

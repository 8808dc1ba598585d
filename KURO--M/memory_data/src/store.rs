use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::item::{MemoryItem, MemoryMetadata};

/// Errors surfaced by memory backends and embedders.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Backend is missing credentials or configuration.
    #[error("memory store not configured: {0}")]
    NotConfigured(String),
    /// Embedding generation failed.
    #[error("embedding failed: {0}")]
    Embedding(String),
    /// Transport failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),
    /// Backend answered with an error status.
    #[error("backend rejected request ({status}): {body}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Response could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
    /// No memory exists with the given id.
    #[error("memory {0} not found")]
    NotFound(String),
}

impl From<reqwest::Error> for MemoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Vector memory used for context retrieval and the memory capabilities.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Returns up to `top_k` memories ranked by similarity to `query`.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<MemoryItem>, MemoryError>;

    /// Stores `text` with `metadata` and returns the assigned id.
    async fn upsert(&self, text: &str, metadata: MemoryMetadata) -> Result<String, MemoryError>;

    /// Removes a memory by id.
    async fn delete(&self, id: &str) -> Result<(), MemoryError>;

    /// Short backend label for logs.
    fn backend(&self) -> &'static str;
}

/// Identifier scheme shared by the backends: `mem_<unix millis>_<uuid>`.
///
/// The random suffix keeps ids unique when several memories are saved within
/// the same millisecond.
#[must_use]
pub fn memory_id() -> String {
    format!("mem_{}_{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
}

/// Adds the bookkeeping fields every stored memory carries.
pub(crate) fn stamp_metadata(text: &str, mut metadata: MemoryMetadata) -> MemoryMetadata {
    metadata.insert("timestamp".into(), Utc::now().to_rfc3339().into());
    metadata.insert("content".into(), text.into());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamped_metadata_keeps_caller_fields() {
        let mut metadata = MemoryMetadata::new();
        metadata.insert("type".into(), "preference".into());
        let stamped = stamp_metadata("likes coffee", metadata);
        assert_eq!(stamped["type"], "preference");
        assert_eq!(stamped["content"], "likes coffee");
        assert!(stamped.contains_key("timestamp"));
    }

    #[test]
    fn ids_use_mem_prefix() {
        assert!(memory_id().starts_with("mem_"));
    }

    #[test]
    fn back_to_back_ids_differ() {
        let ids: std::collections::HashSet<_> = (0..64).map(|_| memory_id()).collect();
        assert_eq!(ids.len(), 64);
    }
}

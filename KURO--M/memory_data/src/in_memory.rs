use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    embedding::{cosine_similarity, HashingEmbedder},
    item::{MemoryItem, MemoryMetadata},
    store::{memory_id, stamp_metadata, MemoryError, MemoryStore},
};

#[derive(Debug, Clone)]
struct StoredMemory {
    id: String,
    content: String,
    vector: Vec<f32>,
    metadata: MemoryMetadata,
}

/// Process-local vector store backed by a rolling buffer.
///
/// Used when no Pinecone credentials are configured and by tests. Retrieval
/// ranks by cosine similarity over [`HashingEmbedder`] vectors; ties keep
/// insertion order, so repeated queries against an unchanged store return the
/// same ranking.
#[derive(Debug)]
pub struct InMemoryStore {
    capacity: usize,
    embedder: HashingEmbedder,
    entries: RwLock<VecDeque<StoredMemory>>,
}

impl InMemoryStore {
    /// Creates a store retaining at most `capacity` memories.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            embedder: HashingEmbedder::default(),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    /// Number of stored memories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Stored contents, oldest first.
    #[must_use]
    pub fn contents(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|entry| entry.content.clone())
            .collect()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<MemoryItem>, MemoryError> {
        let query_vector = self.embedder.embed_now(query);
        let entries = self.entries.read();
        let mut scored: Vec<(f32, &StoredMemory)> = entries
            .iter()
            .map(|entry| (cosine_similarity(&query_vector, &entry.vector), entry))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, entry)| MemoryItem {
                id: Some(entry.id.clone()),
                content: entry.content.clone(),
                score,
                metadata: entry.metadata.clone(),
            })
            .collect())
    }

    async fn upsert(&self, text: &str, metadata: MemoryMetadata) -> Result<String, MemoryError> {
        let id = memory_id();
        let stored = StoredMemory {
            id: id.clone(),
            content: text.to_string(),
            vector: self.embedder.embed_now(text),
            metadata: stamp_metadata(text, metadata),
        };
        let mut entries = self.entries.write();
        entries.push_back(stored);
        if entries.len() > self.capacity {
            entries.pop_front();
        }
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<(), MemoryError> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

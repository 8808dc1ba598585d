#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc
)]

//! Vector memory for the Kuro assistant.
//!
//! [`MemoryStore`] is the seam the action pipeline talks to. Two backends are
//! provided: [`PineconeStore`] (Gemini embeddings over the Pinecone REST API)
//! and [`InMemoryStore`] (a process-local store for development and tests).

/// Embedding providers and vector helpers.
pub mod embedding;
/// Process-local backend.
pub mod in_memory;
/// Memory items and importance levels.
pub mod item;
/// Pinecone REST backend.
pub mod pinecone;
/// The store trait and its error type.
pub mod store;

pub use embedding::{cosine_similarity, Embedder, GeminiEmbedder, HashingEmbedder, GEMINI_EMBEDDING_DIMENSION};
pub use in_memory::InMemoryStore;
pub use item::{MemoryImportance, MemoryItem, MemoryMetadata};
pub use pinecone::{PineconeSettings, PineconeStore};
pub use store::{memory_id, MemoryError, MemoryStore};

use std::sync::Arc;

use async_trait::async_trait;
use kuro_memory::{MemoryImportance, MemoryMetadata, MemoryStore};
use serde_json::json;

use crate::{
    actions::{Arguments, ToolResult},
    arguments::{optional_text, required_text},
    capabilities::{CapabilityHandler, HandlerError},
};

/// Memories returned by `recall_memory`.
pub const RECALL_TOP_K: usize = 5;

/// `save_memory`: stores a fact with importance and category metadata.
pub struct SaveMemoryHandler {
    store: Arc<dyn MemoryStore>,
}

impl SaveMemoryHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CapabilityHandler for SaveMemoryHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let text = required_text(&arguments, "text")?;
        let importance = optional_text(&arguments, "importance")
            .and_then(|raw| raw.parse::<MemoryImportance>().ok())
            .unwrap_or_default();
        let category = optional_text(&arguments, "category").unwrap_or_else(|| "fact".into());

        let mut metadata = MemoryMetadata::new();
        metadata.insert("type".into(), category.into());
        metadata.insert("priority".into(), importance.label().into());
        metadata.insert("source".into(), "user".into());

        Ok(match self.store.upsert(&text, metadata).await {
            Ok(id) => ToolResult::success("Saved.")
                .with_data(json!({ "id": id }))
                .with_natural_response("Got it. I'll remember that."),
            Err(err) => {
                tracing::warn!(error = %err, backend = self.store.backend(), "memory upsert failed");
                ToolResult::failure(format!("Failed to save memory: {err}"))
                    .with_natural_response("Sorry, I couldn't save that.")
            }
        })
    }
}

/// `recall_memory`: explicit memory search.
pub struct RecallMemoryHandler {
    store: Arc<dyn MemoryStore>,
}

impl RecallMemoryHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CapabilityHandler for RecallMemoryHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let query = required_text(&arguments, "query")?;
        let memories = match self.store.retrieve(&query, RECALL_TOP_K).await {
            Ok(memories) => memories,
            Err(err) => {
                tracing::warn!(error = %err, backend = self.store.backend(), "memory recall failed");
                return Ok(ToolResult::failure(format!("Memory search failed: {err}"))
                    .with_natural_response("I couldn't search my memory right now."));
            }
        };
        let Some(first) = memories.first() else {
            return Ok(ToolResult::failure("No memories found")
                .with_natural_response("I don't remember anything about that."));
        };
        let reply = format!("I found this: {}", first.content);
        let contents: Vec<&str> = memories.iter().map(|item| item.content.as_str()).collect();
        Ok(ToolResult::success(format!("Found {} memories", memories.len()))
            .with_data(json!(contents))
            .with_natural_response(reply))
    }
}

/// `forget_memory`: deletes a memory by id.
pub struct ForgetMemoryHandler {
    store: Arc<dyn MemoryStore>,
}

impl ForgetMemoryHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CapabilityHandler for ForgetMemoryHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let id = required_text(&arguments, "memory_id")?;
        Ok(match self.store.delete(&id).await {
            Ok(()) => ToolResult::success(format!("Deleted {id}"))
                .with_natural_response("Done. I've forgotten that."),
            Err(err) => ToolResult::failure(format!("Failed to delete memory: {err}"))
                .with_natural_response("I couldn't forget that."),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuro_memory::InMemoryStore;

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn save_then_recall_round_trip() {
        let store = Arc::new(InMemoryStore::default());
        let saved = SaveMemoryHandler::new(store.clone())
            .invoke(args(json!({ "text": "User likes coffee", "importance": "high", "category": "preference" })))
            .await
            .unwrap();
        assert_eq!(saved.reply_text(), "Got it. I'll remember that.");

        let recalled = RecallMemoryHandler::new(store.clone())
            .invoke(args(json!({ "query": "coffee" })))
            .await
            .unwrap();
        assert!(recalled.success);
        assert_eq!(recalled.reply_text(), "I found this: User likes coffee");

        let stored = store.retrieve("coffee", 1).await.unwrap();
        assert_eq!(stored[0].metadata["priority"], "high");
        assert_eq!(stored[0].metadata["type"], "preference");
        assert_eq!(stored[0].metadata["source"], "user");
    }

    #[tokio::test]
    async fn recall_with_nothing_stored_fails_softly() {
        let store = Arc::new(InMemoryStore::default());
        let result = RecallMemoryHandler::new(store)
            .invoke(args(json!({ "query": "anything" })))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.reply_text(), "I don't remember anything about that.");
    }

    #[tokio::test]
    async fn forget_reports_missing_ids() {
        let store = Arc::new(InMemoryStore::default());
        let saved = SaveMemoryHandler::new(store.clone())
            .invoke(args(json!({ "text": "temporary" })))
            .await
            .unwrap();
        let id = saved.data.unwrap()["id"].as_str().unwrap().to_string();
        let handler = ForgetMemoryHandler::new(store);
        let first = handler.invoke(args(json!({ "memory_id": id.clone() }))).await.unwrap();
        let second = handler.invoke(args(json!({ "memory_id": id }))).await.unwrap();
        assert_eq!(first.reply_text(), "Done. I've forgotten that.");
        assert_eq!(second.reply_text(), "I couldn't forget that.");
    }

    #[tokio::test]
    async fn save_requires_text() {
        let store = Arc::new(InMemoryStore::default());
        let err = SaveMemoryHandler::new(store).invoke(Arguments::new()).await.unwrap_err();
        assert!(matches!(err, HandlerError::MissingArgument(name) if name == "text"));
    }
}

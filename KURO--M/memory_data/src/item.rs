use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Free-form metadata attached to a stored memory.
pub type MemoryMetadata = serde_json::Map<String, serde_json::Value>;

/// A memory returned by a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryItem {
    /// Store-assigned identifier, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Remembered text.
    pub content: String,
    /// Similarity score for the query that produced this item.
    pub score: f32,
    /// Metadata stored alongside the text.
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl MemoryItem {
    /// Renders the item as a context line for the decision prompt.
    #[must_use]
    pub fn context_line(&self) -> String {
        format!("- {} (relevance: {:.2})", self.content, self.score)
    }
}

/// Importance attached to a saved memory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryImportance {
    /// Routine observations.
    Low,
    /// Default level for contextual facts.
    #[default]
    Medium,
    /// Facts the user explicitly flagged as important.
    High,
}

impl MemoryImportance {
    /// Label persisted in metadata.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for MemoryImportance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MemoryImportance {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" | "critical" => Ok(Self::High),
            other => Err(format!("unknown importance '{other}'")),
        }
    }
}

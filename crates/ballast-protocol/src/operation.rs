//! Operation records ingested into working memory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::estimate::estimate_value_tokens;

/// A single unit of agent work (task, validation, artifact, ...) as tracked
/// by working memory. `kind` and `operation` are the identity fields;
/// `tokens` is the serialized cost charged against the context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: String,
    pub operation: String,
    #[serde(default)]
    pub data: Value,
    pub tokens: u64,
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    /// Create an operation stamped now, with tokens estimated from `data`.
    pub fn new(kind: impl Into<String>, operation: impl Into<String>, data: Value) -> Self {
        let tokens = estimate_value_tokens(&data);
        Self {
            kind: kind.into(),
            operation: operation.into(),
            data,
            tokens,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Synthesized text used for case-insensitive substring search.
    pub fn search_text(&self) -> String {
        format!("{} {} {}", self.kind, self.operation, self.data)
    }
}

/// Caller-facing ingestion shape. Only `kind` is mandatory; the manager
/// normalizes the rest (operation name, token estimate, timestamp) before
/// the record enters working memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationDraft {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OperationDraft {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl From<Operation> for OperationDraft {
    fn from(op: Operation) -> Self {
        Self {
            kind: op.kind,
            operation: Some(op.operation),
            data: op.data,
            tokens: Some(op.tokens),
            timestamp: Some(op.timestamp),
        }
    }
}

/// Short search-result view of an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    #[serde(rename = "type")]
    pub kind: String,
    pub operation: String,
    pub preview: String,
    pub tokens: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_estimates_tokens_from_data() {
        let op = Operation::new("task", "implement", json!({"detail": "x".repeat(100)}));
        assert!(op.tokens > 1);
        assert_eq!(op.tokens, estimate_value_tokens(&op.data));
    }

    #[test]
    fn test_kind_serializes_as_type() {
        let op = Operation::new("task", "implement", json!({}));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "task");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_roundtrip() {
        let op = Operation::new("validation", "lint", json!({"ok": true})).with_tokens(42);
        let text = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&text).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_search_text_contains_identity() {
        let op = Operation::new("task", "refactor", json!({"file": "main.rs"}));
        let text = op.search_text();
        assert!(text.contains("task"));
        assert!(text.contains("refactor"));
        assert!(text.contains("main.rs"));
    }
}

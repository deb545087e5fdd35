//! Durable checkpoint schema
//!
//! A checkpoint is a UTF-8 JSON snapshot of the full session state. The
//! top-level keys are part of the on-disk contract and must round-trip
//! exactly: `restore(checkpoint(path))` reproduces the same `used_tokens`
//! and the same (possibly eviction-truncated) operation set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// Current checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub context_window_size: u64,
    pub model_name: String,
    pub optimization_profile: String,
    pub working_memory: WorkingMemorySnapshot,
    pub window_manager: WindowSnapshot,
    pub metadata: CheckpointMetadata,
}

/// Persisted view of the working-memory ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemorySnapshot {
    /// Oldest-first, exactly as held in the ledger at checkpoint time.
    pub operations: Vec<Operation>,
    pub current_tokens: u64,
    pub max_operations: usize,
    pub max_tokens: u64,
}

/// Persisted view of the usage counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub effective_max_tokens: u64,
    pub utilization_limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub operation_count: u64,
    #[serde(default)]
    pub last_checkpoint_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            timestamp: Utc::now(),
            context_window_size: 128_000,
            model_name: "claude-sonnet".to_string(),
            optimization_profile: "Balanced".to_string(),
            working_memory: WorkingMemorySnapshot {
                operations: vec![Operation::new("task", "implement", json!({"n": 1}))],
                current_tokens: 7,
                max_operations: 100,
                max_tokens: 44_800,
            },
            window_manager: WindowSnapshot {
                used_tokens: 7,
                max_tokens: 128_000,
                effective_max_tokens: 115_200,
                utilization_limit: 0.9,
            },
            metadata: CheckpointMetadata {
                operation_count: 1,
                last_checkpoint_time: None,
            },
        }
    }

    #[test]
    fn test_top_level_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "context_window_size",
                "metadata",
                "model_name",
                "optimization_profile",
                "timestamp",
                "version",
                "window_manager",
                "working_memory",
            ]
        );
    }

    #[test]
    fn test_roundtrip() {
        let checkpoint = sample();
        let text = serde_json::to_string_pretty(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&text).unwrap();
        assert_eq!(back.window_manager.used_tokens, 7);
        assert_eq!(back.working_memory.operations, checkpoint.working_memory.operations);
    }
}

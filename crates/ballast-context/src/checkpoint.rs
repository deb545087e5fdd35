//! Checkpoint file I/O
//!
//! Checkpoints are pretty-printed UTF-8 JSON. Writes create parent
//! directories as needed; reads map a missing file to
//! `CheckpointNotFound` and surface every other failure as-is.

use std::path::Path;

use ballast_protocol::Checkpoint;

use crate::error::ContextError;

pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<(), ContextError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| ContextError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    let text = serde_json::to_string_pretty(checkpoint).map_err(|e| ContextError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, text).map_err(|source| ContextError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_checkpoint(path: &Path) -> Result<Checkpoint, ContextError> {
    if !path.exists() {
        return Err(ContextError::CheckpointNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|source| ContextError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| ContextError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_protocol::{
        CheckpointMetadata, WindowSnapshot, WorkingMemorySnapshot, CHECKPOINT_VERSION,
    };
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample() -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            timestamp: Utc::now(),
            context_window_size: 32_000,
            model_name: "test-model".to_string(),
            optimization_profile: "Aggressive".to_string(),
            working_memory: WorkingMemorySnapshot {
                operations: vec![],
                current_tokens: 0,
                max_operations: 50,
                max_tokens: 9_600,
            },
            window_manager: WindowSnapshot {
                used_tokens: 123,
                max_tokens: 32_000,
                effective_max_tokens: 28_800,
                utilization_limit: 0.9,
            },
            metadata: CheckpointMetadata {
                operation_count: 4,
                last_checkpoint_time: None,
            },
        }
    }

    #[test]
    fn test_write_creates_directories_and_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("ckpt.json");
        write_checkpoint(&path, &sample()).unwrap();
        let back = read_checkpoint(&path).unwrap();
        assert_eq!(back.window_manager.used_tokens, 123);
        assert_eq!(back.metadata.operation_count, 4);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            read_checkpoint(&missing),
            Err(ContextError::CheckpointNotFound { .. })
        ));
    }

    #[test]
    fn test_garbage_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            read_checkpoint(&path),
            Err(ContextError::Parse { .. })
        ));
    }
}

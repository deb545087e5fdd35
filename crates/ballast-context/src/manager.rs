//! Memory manager façade
//!
//! `MemoryManager` composes the window manager, the working-memory ledger,
//! the profile policy, and the context optimizer into one session-lifecycle
//! owner: operation ingestion, context assembly for outbound prompts,
//! checkpoint-timing decisions, and durable checkpoint/restore.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use ballast_protocol::{
    estimate_value_tokens, Checkpoint, CheckpointMetadata, Operation, OperationDraft,
    OperationSummary, WindowSnapshot, CHECKPOINT_VERSION,
};

use crate::checkpoint::{read_checkpoint, write_checkpoint};
use crate::detect::{resolve_context_window, ContextSizeDetector};
use crate::error::ContextError;
use crate::optimizer::{ContextOptimizer, OptimizerConfig, Summarizer};
use crate::profile::{AdaptiveOptimizer, ProfileTable};
use crate::window::{ContextWindowManager, WindowStatus, ZoneThresholds};
use crate::working_memory::{MemoryStatus, WorkingMemory};

const DEFAULT_UTILIZATION_LIMIT: f64 = 0.9;
const DEFAULT_FALLBACK_WINDOW: u64 = 128_000;
const DEFAULT_TARGET_REDUCTION: f64 = 0.30;

/// Mutable session state, serialized behind one mutex so the façade is
/// `Send + Sync` and every public method takes `&self`.
struct ManagerState {
    memory: WorkingMemory,
    window: ContextWindowManager,
    operation_count: u64,
    last_checkpoint_time: Option<DateTime<Utc>>,
}

/// Merged status view across all sub-components.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub context_window_size: u64,
    pub model_name: String,
    pub active_profile: String,
    pub operation_count: u64,
    pub should_checkpoint: bool,
    pub last_checkpoint_time: Option<DateTime<Utc>>,
    pub window: WindowStatus,
    pub memory: MemoryStatus,
}

pub struct MemoryManager {
    context_window_size: u64,
    model_name: String,
    policy: AdaptiveOptimizer,
    compressor: ContextOptimizer,
    checkpoint_dir: PathBuf,
    state: Mutex<ManagerState>,
}

impl MemoryManager {
    pub fn builder() -> MemoryManagerBuilder {
        MemoryManagerBuilder::new()
    }

    /// Normalize a draft (timestamp, operation name, token estimate), admit
    /// it into working memory, and charge its cost to the window. A failed
    /// admission leaves all state unchanged.
    pub fn add_operation(&self, draft: OperationDraft) -> Result<(), ContextError> {
        let tokens = draft
            .tokens
            .unwrap_or_else(|| estimate_value_tokens(&draft.data));
        let operation = Operation {
            kind: draft.kind,
            operation: draft.operation.unwrap_or_else(|| "unnamed".to_string()),
            data: draft.data,
            tokens,
            timestamp: draft.timestamp.unwrap_or_else(Utc::now),
        };

        let mut state = self.state.lock().unwrap();
        state.memory.add_operation(operation)?;
        state.window.add_usage(tokens);
        state.operation_count += 1;
        Ok(())
    }

    /// Assemble the context snapshot for an outbound prompt: recent
    /// operations plus usage metadata over the caller's base object. With
    /// `optimize` set and a non-empty ledger, the snapshot is compressed
    /// toward the default 30% reduction target and the report lands under
    /// `metadata.optimization`.
    pub fn build_context(&self, base: Option<Value>, optimize: bool) -> Value {
        let (operations, metadata) = {
            let state = self.state.lock().unwrap();
            let operations: Vec<Operation> = state
                .memory
                .recent_operations(None)
                .into_iter()
                .cloned()
                .collect();
            let metadata = serde_json::json!({
                "context_window_size": self.context_window_size,
                "active_profile": self.policy.active_profile().name,
                "usage_percentage": state.window.usage_percentage(),
                "zone": state.window.zone(),
                "operation_count": state.operation_count,
                "timestamp": Utc::now().to_rfc3339(),
            });
            (operations, metadata)
        };

        let mut context = match base {
            Some(Value::Object(map)) => Value::Object(map),
            Some(other) => other,
            None => Value::Object(Map::new()),
        };
        let run_optimizer = optimize && !operations.is_empty();
        if let Some(obj) = context.as_object_mut() {
            obj.insert(
                "operations".to_string(),
                serde_json::to_value(&operations).unwrap_or(Value::Null),
            );
            obj.insert("metadata".to_string(), metadata);
        }

        if run_optimizer {
            let report = self.compressor.optimize(&mut context, DEFAULT_TARGET_REDUCTION);
            if let Some(metadata) = context
                .get_mut("metadata")
                .and_then(Value::as_object_mut)
            {
                metadata.insert(
                    "optimization".to_string(),
                    serde_json::to_value(&report).unwrap_or(Value::Null),
                );
            }
        }
        context
    }

    /// Checkpoint is due when the operation counter reaches the profile's
    /// count, or usage reaches the profile's share of the *raw* context
    /// window (deliberately raw, not the effective maximum).
    pub fn should_checkpoint(&self) -> bool {
        let state = self.state.lock().unwrap();
        self.should_checkpoint_locked(&state)
    }

    fn should_checkpoint_locked(&self, state: &ManagerState) -> bool {
        let config = self.policy.checkpoint_config();
        state.operation_count >= config.operation_count
            || state.window.used_tokens() as f64
                >= config.threshold_pct * self.context_window_size as f64
    }

    /// Serialize the full durable snapshot. Without an explicit path a
    /// timestamped filename is generated under the checkpoint directory.
    pub fn checkpoint(&self, path: Option<&Path>) -> Result<PathBuf, ContextError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            timestamp: now,
            context_window_size: self.context_window_size,
            model_name: self.model_name.clone(),
            optimization_profile: self.policy.active_profile().name.clone(),
            working_memory: state.memory.snapshot(),
            window_manager: WindowSnapshot {
                used_tokens: state.window.used_tokens(),
                max_tokens: state.window.max_tokens(),
                effective_max_tokens: state.window.effective_max_tokens(),
                utilization_limit: state.window.utilization_limit(),
            },
            metadata: CheckpointMetadata {
                operation_count: state.operation_count,
                last_checkpoint_time: state.last_checkpoint_time,
            },
        };

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .checkpoint_dir
                .join(format!("checkpoint_{}.json", now.format("%Y%m%dT%H%M%S%3fZ"))),
        };
        write_checkpoint(&path, &checkpoint)?;
        state.last_checkpoint_time = Some(now);
        tracing::info!(
            path = %path.display(),
            operations = checkpoint.working_memory.operations.len(),
            used_tokens = checkpoint.window_manager.used_tokens,
            "wrote checkpoint"
        );
        Ok(path)
    }

    /// Restore session state from a checkpoint file. Operations are
    /// replayed through working memory, re-incurring eviction as if live;
    /// afterwards the window's `used_tokens` is overwritten with the
    /// checkpoint's authoritative total. That total reflects everything
    /// ever consumed, so it can legitimately exceed what remains visible in
    /// the ledger. A failed restore leaves prior state unchanged.
    pub fn restore(&self, path: &Path) -> Result<(), ContextError> {
        let checkpoint = read_checkpoint(path)?;

        let mut state = self.state.lock().unwrap();
        let mut staged = WorkingMemory::new(
            self.context_window_size,
            Some(state.memory.max_operations()),
            Some(state.memory.max_tokens()),
            None,
        )?;
        for operation in checkpoint.working_memory.operations {
            staged.add_operation(operation)?;
        }

        state.memory = staged;
        state.window.reset();
        state
            .window
            .restore_used_tokens(checkpoint.window_manager.used_tokens);
        state.operation_count = checkpoint.metadata.operation_count;
        state.last_checkpoint_time = checkpoint.metadata.last_checkpoint_time;
        tracing::info!(
            path = %path.display(),
            operations = state.memory.len(),
            used_tokens = state.window.used_tokens(),
            "restored checkpoint"
        );
        Ok(())
    }

    /// Empty working memory and reset usage and the operation counter.
    /// Profile selection is untouched.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.memory.clear();
        state.window.reset();
        state.operation_count = 0;
    }

    pub fn status(&self) -> ManagerStatus {
        let state = self.state.lock().unwrap();
        ManagerStatus {
            context_window_size: self.context_window_size,
            model_name: self.model_name.clone(),
            active_profile: self.policy.active_profile().name.clone(),
            operation_count: state.operation_count,
            should_checkpoint: self.should_checkpoint_locked(&state),
            last_checkpoint_time: state.last_checkpoint_time,
            window: state.window.status(),
            memory: state.memory.status(),
        }
    }

    /// Search recent operations, newest first.
    pub fn search(&self, query: &str, max_results: usize) -> Vec<OperationSummary> {
        self.state.lock().unwrap().memory.search(query, max_results)
    }

    /// Most recent operations, newest first, cloned out of the ledger.
    pub fn recent_operations(&self, limit: Option<usize>) -> Vec<Operation> {
        self.state
            .lock()
            .unwrap()
            .memory
            .recent_operations(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Whether `tokens` more fit while staying below the yellow threshold.
    pub fn can_accommodate(&self, tokens: u64) -> bool {
        self.state.lock().unwrap().window.can_accommodate(tokens)
    }

    pub fn context_window_size(&self) -> u64 {
        self.context_window_size
    }

    pub fn policy(&self) -> &AdaptiveOptimizer {
        &self.policy
    }
}

pub struct MemoryManagerBuilder {
    context_window: Option<u64>,
    provider: String,
    model: String,
    detector: Option<Box<dyn ContextSizeDetector>>,
    fallback_window: u64,
    table: ProfileTable,
    profile_override: Option<String>,
    custom_thresholds: Option<Map<String, Value>>,
    utilization_limit: f64,
    zone_thresholds: Option<ZoneThresholds>,
    checkpoint_dir: PathBuf,
    artifact_dir: PathBuf,
    archive_dir: PathBuf,
    summarizer: Option<Box<dyn Summarizer>>,
    restore_from: Option<PathBuf>,
}

impl Default for MemoryManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManagerBuilder {
    pub fn new() -> Self {
        Self {
            context_window: None,
            provider: "unknown".to_string(),
            model: "unknown".to_string(),
            detector: None,
            fallback_window: DEFAULT_FALLBACK_WINDOW,
            table: ProfileTable::builtin(),
            profile_override: None,
            custom_thresholds: None,
            utilization_limit: DEFAULT_UTILIZATION_LIMIT,
            zone_thresholds: None,
            checkpoint_dir: PathBuf::from(".ballast/checkpoints"),
            artifact_dir: PathBuf::from(".ballast/artifacts"),
            archive_dir: PathBuf::from(".ballast/archive"),
            summarizer: None,
            restore_from: None,
        }
    }

    /// Explicit raw context window; skips detection entirely.
    pub fn context_window(mut self, tokens: u64) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    pub fn detector(mut self, detector: Box<dyn ContextSizeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Used when neither an explicit window nor detection yields a size.
    pub fn fallback_window(mut self, tokens: u64) -> Self {
        self.fallback_window = tokens;
        self
    }

    pub fn profile_table(mut self, table: ProfileTable) -> Self {
        self.table = table;
        self
    }

    /// Select a profile by name instead of by size band.
    pub fn profile_override(mut self, name: impl Into<String>) -> Self {
        self.profile_override = Some(name.into());
        self
    }

    /// Field-level overrides applied to the selected profile.
    pub fn custom_thresholds(mut self, overrides: Map<String, Value>) -> Self {
        self.custom_thresholds = Some(overrides);
        self
    }

    pub fn utilization_limit(mut self, limit: f64) -> Self {
        self.utilization_limit = limit;
        self
    }

    pub fn zone_thresholds(mut self, thresholds: ZoneThresholds) -> Self {
        self.zone_thresholds = Some(thresholds);
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    pub fn archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = dir.into();
        self
    }

    pub fn summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Restore from this checkpoint before the manager is handed out.
    pub fn restore_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.restore_from = Some(path.into());
        self
    }

    pub fn build(self) -> Result<MemoryManager, ContextError> {
        let context_window_size = resolve_context_window(
            self.context_window,
            self.detector.as_deref(),
            &self.provider,
            &self.model,
            self.fallback_window,
        );

        let policy = AdaptiveOptimizer::new(
            context_window_size,
            &self.table,
            self.profile_override.as_deref(),
            self.custom_thresholds.as_ref(),
        )?;

        let memory_config = policy.working_memory_config();
        let memory = WorkingMemory::new(
            context_window_size,
            Some(memory_config.max_operations),
            Some(memory_config.max_tokens),
            None,
        )?;

        let mut compressor = ContextOptimizer::new(OptimizerConfig {
            summarization_threshold: policy.active_profile().summarization_threshold,
            externalization_threshold: policy.active_profile().externalization_threshold,
            artifact_registry_enabled: policy.use_artifact_registry(),
            differential_state_enabled: policy.use_differential_state(),
            pruning: policy.pruning_config(),
            artifact_dir: self.artifact_dir,
            archive_dir: self.archive_dir,
        });
        if let Some(summarizer) = self.summarizer {
            compressor = compressor.with_summarizer(summarizer);
        }

        let window = ContextWindowManager::new(
            context_window_size,
            self.utilization_limit,
            self.zone_thresholds,
        )?;

        let manager = MemoryManager {
            context_window_size,
            model_name: self.model,
            policy,
            compressor,
            checkpoint_dir: self.checkpoint_dir,
            state: Mutex::new(ManagerState {
                memory,
                window,
                operation_count: 0,
                last_checkpoint_time: None,
            }),
        };

        if let Some(path) = self.restore_from {
            manager.restore(&path)?;
        }
        Ok(manager)
    }
}

//! Ballast Context - Adaptive context-budget management
//!
//! This crate keeps long agent sessions inside a model's context window:
//! - Token usage tracking with green/yellow/orange/red urgency zones
//! - Profile selection from context-size bands
//! - Bounded FIFO working memory with token-aware eviction
//! - Five-technique context compression
//! - Durable checkpoint/restore of full session state

mod checkpoint;
mod detect;
mod error;
mod manager;
mod optimizer;
mod profile;
mod window;
mod working_memory;

pub use checkpoint::{read_checkpoint, write_checkpoint};
pub use detect::{resolve_context_window, ContextSizeDetector, StaticContextTable};
pub use error::ContextError;
pub use manager::{ManagerStatus, MemoryManager, MemoryManagerBuilder};
pub use optimizer::{
    plan_externalization, ContextOptimizer, OptimizationReport, OptimizerConfig, Summarizer,
};
pub use profile::{
    AdaptiveOptimizer, CheckpointConfig, ItemKind, OptimizationProfile, ProfileTable,
    PruningConfig, WorkingMemoryConfig,
};
pub use window::{
    ContextWindowManager, RecommendedAction, UsageZone, WindowStatus, ZoneThresholds,
};
pub use working_memory::{MemoryStatus, WorkingMemory};

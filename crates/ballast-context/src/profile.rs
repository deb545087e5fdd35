//! Optimization profiles and size-based policy selection
//!
//! A profile is a named bundle of thresholds and limits covering one band of
//! context-window sizes. The bands of a table partition the positive
//! integers with no gaps or overlaps; `AdaptiveOptimizer` picks the band
//! containing the active window (or a manually named profile) and exposes
//! the derived resource policy.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ContextError;

/// Named bundle of thresholds and limits for one context-size band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub context_min: u64,
    /// Inclusive upper bound; `None` means unbounded.
    #[serde(default)]
    pub context_max: Option<u64>,
    pub summarization_threshold: u64,
    pub externalization_threshold: u64,
    pub artifact_registry_enabled: bool,
    pub differential_state_enabled: bool,
    pub pruning_age_hours: u64,
    pub max_validation_results: usize,
    pub max_resolved_errors: usize,
    pub checkpoint_interval_hours: u64,
    pub checkpoint_threshold_pct: f64,
    pub checkpoint_operation_count: u64,
    pub max_operations: usize,
    pub max_tokens_pct: f64,
}

impl OptimizationProfile {
    pub fn contains(&self, context_window_size: u64) -> bool {
        context_window_size >= self.context_min
            && self.context_max.is_none_or(|max| context_window_size <= max)
    }
}

/// Ordered collection of profiles keyed by context-size band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: Vec<OptimizationProfile>,
}

impl ProfileTable {
    pub fn new(profiles: Vec<OptimizationProfile>) -> Result<Self, ContextError> {
        let table = Self { profiles };
        table.validate()?;
        Ok(table)
    }

    /// The five canonical bands, Ultra-Aggressive through Minimal. Every
    /// threshold widens monotonically with context size and the bands cover
    /// all positive integers exactly.
    pub fn builtin() -> Self {
        Self {
            profiles: vec![
                OptimizationProfile {
                    name: "Ultra-Aggressive".to_string(),
                    description: "Tiny local-model windows; compress everything early".to_string(),
                    context_min: 1,
                    context_max: Some(8_000),
                    summarization_threshold: 256,
                    externalization_threshold: 512,
                    artifact_registry_enabled: true,
                    differential_state_enabled: true,
                    pruning_age_hours: 1,
                    max_validation_results: 3,
                    max_resolved_errors: 5,
                    checkpoint_interval_hours: 1,
                    checkpoint_threshold_pct: 0.60,
                    checkpoint_operation_count: 10,
                    max_operations: 25,
                    max_tokens_pct: 0.25,
                },
                OptimizationProfile {
                    name: "Aggressive".to_string(),
                    description: "Small windows; keep working memory lean".to_string(),
                    context_min: 8_001,
                    context_max: Some(32_000),
                    summarization_threshold: 512,
                    externalization_threshold: 1_024,
                    artifact_registry_enabled: true,
                    differential_state_enabled: true,
                    pruning_age_hours: 2,
                    max_validation_results: 4,
                    max_resolved_errors: 8,
                    checkpoint_interval_hours: 2,
                    checkpoint_threshold_pct: 0.65,
                    checkpoint_operation_count: 20,
                    max_operations: 50,
                    max_tokens_pct: 0.30,
                },
                OptimizationProfile {
                    name: "Balanced".to_string(),
                    description: "Mainstream 32K-128K windows".to_string(),
                    context_min: 32_001,
                    context_max: Some(128_000),
                    summarization_threshold: 1_024,
                    externalization_threshold: 2_048,
                    artifact_registry_enabled: true,
                    differential_state_enabled: true,
                    pruning_age_hours: 6,
                    max_validation_results: 5,
                    max_resolved_errors: 10,
                    checkpoint_interval_hours: 4,
                    checkpoint_threshold_pct: 0.70,
                    checkpoint_operation_count: 50,
                    max_operations: 100,
                    max_tokens_pct: 0.35,
                },
                OptimizationProfile {
                    name: "Conservative".to_string(),
                    description: "Large windows; optimize only sizeable items".to_string(),
                    context_min: 128_001,
                    context_max: Some(400_000),
                    summarization_threshold: 2_048,
                    externalization_threshold: 4_096,
                    artifact_registry_enabled: true,
                    differential_state_enabled: false,
                    pruning_age_hours: 12,
                    max_validation_results: 8,
                    max_resolved_errors: 15,
                    checkpoint_interval_hours: 8,
                    checkpoint_threshold_pct: 0.75,
                    checkpoint_operation_count: 100,
                    max_operations: 200,
                    max_tokens_pct: 0.40,
                },
                OptimizationProfile {
                    name: "Minimal".to_string(),
                    description: "Very large windows (1M+); mostly hands-off".to_string(),
                    context_min: 400_001,
                    context_max: None,
                    summarization_threshold: 4_096,
                    externalization_threshold: 8_192,
                    artifact_registry_enabled: false,
                    differential_state_enabled: false,
                    pruning_age_hours: 24,
                    max_validation_results: 10,
                    max_resolved_errors: 20,
                    checkpoint_interval_hours: 24,
                    checkpoint_threshold_pct: 0.85,
                    checkpoint_operation_count: 200,
                    max_operations: 500,
                    max_tokens_pct: 0.50,
                },
            ],
        }
    }

    /// Load a table from a `.json` or `.jsonc` file and validate it.
    pub fn from_path(path: &Path) -> Result<Self, ContextError> {
        let content = std::fs::read_to_string(path).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let profiles: Vec<OptimizationProfile> = match path.extension().and_then(|e| e.to_str()) {
            Some("jsonc") => json5::from_str(&content).map_err(|e| ContextError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?,
            Some("json") => serde_json::from_str(&content).map_err(|e| ContextError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?,
            other => {
                return Err(ContextError::Configuration {
                    field: "profile_table",
                    reason: format!("unsupported profile table format: {other:?}"),
                })
            }
        };
        Self::new(profiles)
    }

    /// Bands must be contiguous (each starts where the previous ended, plus
    /// one) with no overlap. Percentage fields must lie within (0, 1].
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.profiles.is_empty() {
            return Err(ContextError::Configuration {
                field: "profile_table",
                reason: "table has no profiles".to_string(),
            });
        }
        for pair in self.profiles.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            match prev.context_max {
                None => {
                    return Err(ContextError::Configuration {
                        field: "profile_table",
                        reason: format!(
                            "profile `{}` is unbounded but not last in the table",
                            prev.name
                        ),
                    })
                }
                Some(max) if next.context_min != max + 1 => {
                    return Err(ContextError::Configuration {
                        field: "profile_table",
                        reason: format!(
                            "gap or overlap between `{}` (max {max}) and `{}` (min {})",
                            prev.name, next.name, next.context_min
                        ),
                    })
                }
                Some(_) => {}
            }
        }
        for profile in &self.profiles {
            if let Some(max) = profile.context_max {
                if max < profile.context_min {
                    return Err(ContextError::Configuration {
                        field: "profile_table",
                        reason: format!(
                            "profile `{}` has context_max {max} below context_min {}",
                            profile.name, profile.context_min
                        ),
                    });
                }
            }
            for (field, value) in [
                ("checkpoint_threshold_pct", profile.checkpoint_threshold_pct),
                ("max_tokens_pct", profile.max_tokens_pct),
            ] {
                if value <= 0.0 || value > 1.0 {
                    return Err(ContextError::Configuration {
                        field: "profile_table",
                        reason: format!(
                            "profile `{}` field `{field}` must be within (0, 1], got {value}",
                            profile.name
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn profiles(&self) -> &[OptimizationProfile] {
        &self.profiles
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }

    fn by_name(&self, name: &str) -> Option<&OptimizationProfile> {
        self.profiles.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn by_size(&self, context_window_size: u64) -> Option<&OptimizationProfile> {
        self.profiles.iter().find(|p| p.contains(context_window_size))
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// What an item is, for threshold selection in `should_optimize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Phase,
    Summary,
    Artifact,
    File,
    Other,
}

/// Checkpoint timing knobs derived from the active profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub interval_hours: u64,
    pub threshold_pct: f64,
    pub operation_count: u64,
}

/// Working-memory sizing derived from the active profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkingMemoryConfig {
    pub max_operations: usize,
    pub max_tokens: u64,
    pub max_tokens_pct: f64,
}

/// Pruning knobs derived from the active profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PruningConfig {
    pub age_hours: u64,
    pub max_validation_results: usize,
    pub max_resolved_errors: usize,
}

/// Selects an optimization profile for a context-window size and answers
/// policy questions from it.
#[derive(Debug, Clone)]
pub struct AdaptiveOptimizer {
    context_window_size: u64,
    profile: OptimizationProfile,
}

impl AdaptiveOptimizer {
    pub fn new(
        context_window_size: u64,
        table: &ProfileTable,
        manual_override: Option<&str>,
        custom_thresholds: Option<&serde_json::Map<String, Value>>,
    ) -> Result<Self, ContextError> {
        if context_window_size == 0 {
            return Err(ContextError::Configuration {
                field: "context_window_size",
                reason: "must be positive".to_string(),
            });
        }
        table.validate()?;

        let mut profile = match manual_override {
            Some(name) => table
                .by_name(name)
                .ok_or_else(|| ContextError::ProfileNotFound {
                    name: name.to_string(),
                    available: table.names(),
                })?
                .clone(),
            None => table
                .by_size(context_window_size)
                .ok_or_else(|| ContextError::Configuration {
                    field: "context_window_size",
                    reason: format!("no profile band covers {context_window_size} tokens"),
                })?
                .clone(),
        };

        if let Some(overrides) = custom_thresholds {
            for (key, value) in overrides {
                apply_override(&mut profile, key, value)?;
            }
        }

        tracing::debug!(
            profile = %profile.name,
            context_window_size,
            "selected optimization profile"
        );

        Ok(Self {
            context_window_size,
            profile,
        })
    }

    /// Whether an item of this size and kind should be compressed.
    /// Phases and summaries compare against the summarization threshold,
    /// artifacts and files against the externalization threshold.
    pub fn should_optimize(&self, item_tokens: u64, kind: ItemKind) -> bool {
        let threshold = match kind {
            ItemKind::Phase | ItemKind::Summary | ItemKind::Other => {
                self.profile.summarization_threshold
            }
            ItemKind::Artifact | ItemKind::File => self.profile.externalization_threshold,
        };
        item_tokens > threshold
    }

    pub fn active_profile(&self) -> &OptimizationProfile {
        &self.profile
    }

    pub fn context_window_size(&self) -> u64 {
        self.context_window_size
    }

    pub fn checkpoint_config(&self) -> CheckpointConfig {
        CheckpointConfig {
            interval_hours: self.profile.checkpoint_interval_hours,
            threshold_pct: self.profile.checkpoint_threshold_pct,
            operation_count: self.profile.checkpoint_operation_count,
        }
    }

    pub fn working_memory_config(&self) -> WorkingMemoryConfig {
        WorkingMemoryConfig {
            max_operations: self.profile.max_operations,
            max_tokens: (self.context_window_size as f64 * self.profile.max_tokens_pct).floor()
                as u64,
            max_tokens_pct: self.profile.max_tokens_pct,
        }
    }

    pub fn pruning_config(&self) -> PruningConfig {
        PruningConfig {
            age_hours: self.profile.pruning_age_hours,
            max_validation_results: self.profile.max_validation_results,
            max_resolved_errors: self.profile.max_resolved_errors,
        }
    }

    pub fn use_artifact_registry(&self) -> bool {
        self.profile.artifact_registry_enabled
    }

    pub fn use_differential_state(&self) -> bool {
        self.profile.differential_state_enabled
    }
}

/// Overwrite one profile field from an override map. Unknown keys are
/// logged and skipped; a known key with the wrong value type is fatal.
fn apply_override(
    profile: &mut OptimizationProfile,
    key: &str,
    value: &Value,
) -> Result<(), ContextError> {
    fn as_u64(key: &'static str, value: &Value) -> Result<u64, ContextError> {
        value.as_u64().ok_or_else(|| ContextError::Configuration {
            field: key,
            reason: format!("override must be a non-negative integer, got {value}"),
        })
    }
    fn as_f64(key: &'static str, value: &Value) -> Result<f64, ContextError> {
        value.as_f64().ok_or_else(|| ContextError::Configuration {
            field: key,
            reason: format!("override must be a number, got {value}"),
        })
    }
    fn as_bool(key: &'static str, value: &Value) -> Result<bool, ContextError> {
        value.as_bool().ok_or_else(|| ContextError::Configuration {
            field: key,
            reason: format!("override must be a boolean, got {value}"),
        })
    }

    match key {
        "summarization_threshold" => {
            profile.summarization_threshold = as_u64("summarization_threshold", value)?
        }
        "externalization_threshold" => {
            profile.externalization_threshold = as_u64("externalization_threshold", value)?
        }
        "artifact_registry_enabled" => {
            profile.artifact_registry_enabled = as_bool("artifact_registry_enabled", value)?
        }
        "differential_state_enabled" => {
            profile.differential_state_enabled = as_bool("differential_state_enabled", value)?
        }
        "pruning_age_hours" => profile.pruning_age_hours = as_u64("pruning_age_hours", value)?,
        "max_validation_results" => {
            profile.max_validation_results = as_u64("max_validation_results", value)? as usize
        }
        "max_resolved_errors" => {
            profile.max_resolved_errors = as_u64("max_resolved_errors", value)? as usize
        }
        "checkpoint_interval_hours" => {
            profile.checkpoint_interval_hours = as_u64("checkpoint_interval_hours", value)?
        }
        "checkpoint_threshold_pct" => {
            profile.checkpoint_threshold_pct = as_f64("checkpoint_threshold_pct", value)?
        }
        "checkpoint_operation_count" => {
            profile.checkpoint_operation_count = as_u64("checkpoint_operation_count", value)?
        }
        "max_operations" => profile.max_operations = as_u64("max_operations", value)? as usize,
        "max_tokens_pct" => profile.max_tokens_pct = as_f64("max_tokens_pct", value)?,
        unknown => {
            tracing::warn!(key = unknown, "ignoring unknown profile override");
        }
    }
    Ok(())
}

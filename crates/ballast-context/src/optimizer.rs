//! Five-technique context compression
//!
//! `ContextOptimizer` shrinks a context snapshot (a JSON object) by, in
//! fixed order: pruning stale entries, replacing file contents with a
//! metadata registry, externalizing oversized artifacts to disk, collapsing
//! full state into a delta, and (when a summarizer is available and the
//! structural passes fell short of the target) archiving completed phases
//! behind summaries. Each technique is independently fault-tolerant: a
//! failure lands in the report's `errors` list and the remaining techniques
//! still run.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use ballast_protocol::estimate_value_tokens;

use crate::profile::PruningConfig;

const SUMMARY_CHARS: usize = 80;

/// Optional collaborator that turns a completed phase into a short summary.
/// The optimizer only needs presence or absence; `None` from `summarize`
/// falls back to a head-of-content summary.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, phase: &Value) -> Option<String>;
}

/// Compression policy, normally derived from the active optimization
/// profile plus the storage directories.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub summarization_threshold: u64,
    pub externalization_threshold: u64,
    pub artifact_registry_enabled: bool,
    pub differential_state_enabled: bool,
    pub pruning: PruningConfig,
    /// Where externalized artifacts are written.
    pub artifact_dir: PathBuf,
    /// Where archived phases are written.
    pub archive_dir: PathBuf,
}

/// Outcome of one `optimize` call. Partial failures are reported, never
/// raised.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub compression_ratio: f64,
    pub techniques_applied: Vec<String>,
    pub items_externalized: usize,
    pub errors: Vec<String>,
}

pub struct ContextOptimizer {
    config: OptimizerConfig,
    summarizer: Option<Box<dyn Summarizer>>,
}

impl ContextOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            summarizer: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn has_summarizer(&self) -> bool {
        self.summarizer.is_some()
    }

    /// Apply the techniques in order and report the result. Never fails:
    /// a technique error is recorded and the rest continue.
    pub fn optimize(&self, context: &mut Value, target_reduction: f64) -> OptimizationReport {
        let tokens_before = estimate_value_tokens(context);
        let mut techniques_applied = Vec::new();
        let mut errors = Vec::new();
        let mut items_externalized = 0;

        match self.prune(context) {
            Ok(()) => techniques_applied.push("pruning".to_string()),
            Err(reason) => record_failure("pruning", reason, &mut errors),
        }

        if self.config.artifact_registry_enabled {
            match self.build_artifact_registry(context) {
                Ok(()) => techniques_applied.push("artifact_registry".to_string()),
                Err(reason) => record_failure("artifact_registry", reason, &mut errors),
            }
        }

        match self.externalize(context) {
            Ok(count) => {
                items_externalized = count;
                techniques_applied.push("external_storage".to_string());
            }
            Err(reason) => record_failure("external_storage", reason, &mut errors),
        }

        if self.config.differential_state_enabled {
            match self.differential_state(context) {
                Ok(()) => techniques_applied.push("differential_state".to_string()),
                Err(reason) => record_failure("differential_state", reason, &mut errors),
            }
        }

        // Summarization is the expensive last resort: only when a
        // summarizer exists and the structural passes missed the target.
        let structural_tokens = estimate_value_tokens(context);
        let reduction = 1.0 - structural_tokens as f64 / tokens_before as f64;
        if self.summarizer.is_some() && reduction < target_reduction {
            match self.summarize_phases(context) {
                Ok(()) => techniques_applied.push("summarization".to_string()),
                Err(reason) => record_failure("summarization", reason, &mut errors),
            }
        }

        let tokens_after = estimate_value_tokens(context);
        OptimizationReport {
            tokens_before,
            tokens_after,
            compression_ratio: tokens_after as f64 / tokens_before as f64,
            techniques_applied,
            items_externalized,
            errors,
        }
    }

    /// Technique 1: drop debug traces older than the configured age, keep
    /// only the newest validation results, keep all unresolved errors plus
    /// the newest resolved ones.
    fn prune(&self, context: &mut Value) -> Result<(), String> {
        let Some(obj) = context.as_object_mut() else {
            return Ok(());
        };

        if let Some(Value::Array(entries)) = obj.get_mut("debug_log") {
            let cutoff = Utc::now() - Duration::hours(self.config.pruning.age_hours as i64);
            entries.retain(|entry| {
                match entry.get("timestamp").and_then(Value::as_str) {
                    Some(ts) => match chrono::DateTime::parse_from_rfc3339(ts) {
                        Ok(t) => t.with_timezone(&Utc) >= cutoff,
                        // Unparseable timestamps are kept rather than guessed at.
                        Err(_) => true,
                    },
                    None => true,
                }
            });
        }

        if let Some(Value::Array(entries)) = obj.get_mut("validation_results") {
            let keep = self.config.pruning.max_validation_results;
            let drop = entries.len().saturating_sub(keep);
            entries.drain(..drop);
        }

        if let Some(Value::Array(entries)) = obj.get_mut("errors") {
            let resolved_total = entries.iter().filter(|e| is_resolved(e)).count();
            let drop = resolved_total.saturating_sub(self.config.pruning.max_resolved_errors);
            let mut resolved_seen = 0;
            entries.retain(|entry| {
                if is_resolved(entry) {
                    resolved_seen += 1;
                    resolved_seen > drop
                } else {
                    true
                }
            });
        }

        Ok(())
    }

    /// Technique 2: replace the `files` map (path -> full content) with a
    /// metadata-only `artifact_registry`. Entries without content pass
    /// through into the registry untouched.
    fn build_artifact_registry(&self, context: &mut Value) -> Result<(), String> {
        let Some(obj) = context.as_object_mut() else {
            return Ok(());
        };
        match obj.get("files") {
            None => return Ok(()),
            Some(Value::Object(_)) => {}
            Some(other) => return Err(format!("`files` must be an object, got {other}")),
        }
        let Some(Value::Object(files)) = obj.remove("files") else {
            unreachable!("checked above");
        };

        let mut registry = match obj.remove("artifact_registry") {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        for (path, entry) in files {
            let replacement = match entry.get("content") {
                Some(content) => json!({
                    "summary": head_summary(content),
                    "last_modified": entry.get("last_modified").cloned().unwrap_or(Value::Null),
                    "size_tokens": estimate_value_tokens(content),
                    "type": entry.get("type").cloned().unwrap_or_else(|| json!("file")),
                }),
                None => entry,
            };
            registry.insert(path, replacement);
        }
        obj.insert("artifact_registry".to_string(), Value::Object(registry));
        Ok(())
    }

    /// Technique 3: write each oversized `artifacts` entry to disk and
    /// replace it with a small reference. Returns how many were moved.
    fn externalize(&self, context: &mut Value) -> Result<usize, String> {
        let Some(obj) = context.as_object_mut() else {
            return Ok(0);
        };
        let map = match obj.get_mut("artifacts") {
            None => return Ok(0),
            Some(Value::Object(map)) => map,
            Some(other) => return Err(format!("`artifacts` must be an object, got {other}")),
        };

        let plan = plan_externalization(map, self.config.externalization_threshold);
        if plan.is_empty() {
            return Ok(0);
        }

        std::fs::create_dir_all(&self.config.artifact_dir)
            .map_err(|e| format!("create {}: {e}", self.config.artifact_dir.display()))?;

        let mut count = 0;
        for (id, tokens) in plan {
            let file = self.config.artifact_dir.join(format!("{}.json", sanitize(&id)));
            // map keys are stable between planning and this loop.
            let entry = map.get(&id).cloned().unwrap_or(Value::Null);
            let text = serde_json::to_string_pretty(&entry)
                .map_err(|e| format!("serialize artifact `{id}`: {e}"))?;
            std::fs::write(&file, text).map_err(|e| format!("write {}: {e}", file.display()))?;
            tracing::debug!(artifact = %id, tokens, path = %file.display(), "externalized artifact");
            map.insert(
                id.clone(),
                json!({
                    "id": id,
                    "external_ref": file.to_string_lossy(),
                    "summary": head_summary(&entry),
                    "tokens": tokens,
                }),
            );
            count += 1;
        }
        Ok(count)
    }

    /// Technique 4: pop `full_state` and leave a delta marker in its place.
    fn differential_state(&self, context: &mut Value) -> Result<(), String> {
        let Some(obj) = context.as_object_mut() else {
            return Ok(());
        };
        let Some(full_state) = obj.remove("full_state") else {
            return Ok(());
        };
        let original_tokens = estimate_value_tokens(&full_state);
        obj.insert(
            "state_delta".to_string(),
            json!({
                "checkpoint_id": format!("delta-{}", Utc::now().format("%Y%m%dT%H%M%S%3f")),
                "changes": {},
                "original_tokens": original_tokens,
            }),
        );
        Ok(())
    }

    /// Technique 5: archive completed phases exceeding the summarization
    /// threshold to disk, leaving a summary stub behind.
    fn summarize_phases(&self, context: &mut Value) -> Result<(), String> {
        let Some(summarizer) = self.summarizer.as_ref() else {
            return Ok(());
        };
        let Some(obj) = context.as_object_mut() else {
            return Ok(());
        };
        let phases = match obj.get_mut("phases") {
            None => return Ok(()),
            Some(Value::Object(map)) => map,
            Some(other) => return Err(format!("`phases` must be an object, got {other}")),
        };

        let candidates: Vec<String> = phases
            .iter()
            .filter(|(_, phase)| {
                phase.get("status").and_then(Value::as_str) == Some("completed")
                    && estimate_value_tokens(phase) > self.config.summarization_threshold
            })
            .map(|(id, _)| id.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.config.archive_dir)
            .map_err(|e| format!("create {}: {e}", self.config.archive_dir.display()))?;

        for id in candidates {
            let Some(phase) = phases.get(&id).cloned() else {
                continue;
            };
            let original_tokens = estimate_value_tokens(&phase);
            let file = self.config.archive_dir.join(format!("{}.json", sanitize(&id)));
            let text = serde_json::to_string_pretty(&phase)
                .map_err(|e| format!("serialize phase `{id}`: {e}"))?;
            std::fs::write(&file, text).map_err(|e| format!("write {}: {e}", file.display()))?;

            let summary = summarizer
                .summarize(&phase)
                .unwrap_or_else(|| head_summary(&phase));
            tracing::debug!(phase = %id, original_tokens, path = %file.display(), "archived phase");
            phases.insert(
                id.clone(),
                json!({
                    "phase_id": id,
                    "status": "completed",
                    "summary": summary,
                    "archived_at": Utc::now().to_rfc3339(),
                    "original_tokens": original_tokens,
                }),
            );
        }
        Ok(())
    }
}

/// Pure selection half of externalization: which artifact entries exceed
/// the threshold, and at what size. Testable without a filesystem.
pub fn plan_externalization(
    artifacts: &Map<String, Value>,
    threshold: u64,
) -> Vec<(String, u64)> {
    artifacts
        .iter()
        .filter_map(|(id, entry)| {
            let tokens = estimate_value_tokens(entry);
            (tokens > threshold).then(|| (id.clone(), tokens))
        })
        .collect()
}

fn record_failure(technique: &str, reason: String, errors: &mut Vec<String>) {
    tracing::warn!(technique, %reason, "optimization technique failed");
    errors.push(format!("{technique}: {reason}"));
}

fn is_resolved(entry: &Value) -> bool {
    entry.get("resolved").and_then(Value::as_bool).unwrap_or(false)
}

/// First line of a value's content, truncated for use as a summary.
fn head_summary(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let line = text.lines().next().unwrap_or("");
    if line.len() > SUMMARY_CHARS {
        let cut = line
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= SUMMARY_CHARS)
            .last()
            .unwrap_or(0);
        format!("{}...", &line[..cut])
    } else {
        line.to_string()
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::PruningConfig;
    use std::path::Path;
    use tempfile::tempdir;

    struct StubSummarizer;

    impl Summarizer for StubSummarizer {
        fn summarize(&self, _phase: &Value) -> Option<String> {
            Some("phase summary".to_string())
        }
    }

    fn config(dir: &Path) -> OptimizerConfig {
        OptimizerConfig {
            summarization_threshold: 50,
            externalization_threshold: 50,
            artifact_registry_enabled: true,
            differential_state_enabled: true,
            pruning: PruningConfig {
                age_hours: 6,
                max_validation_results: 5,
                max_resolved_errors: 10,
            },
            artifact_dir: dir.join("artifacts"),
            archive_dir: dir.join("archive"),
        }
    }

    #[test]
    fn test_empty_snapshot_is_identity() {
        let dir = tempdir().unwrap();
        let optimizer = ContextOptimizer::new(config(dir.path()));
        let mut context = json!({});
        let report = optimizer.optimize(&mut context, 0.3);

        assert_eq!(report.tokens_before, 1);
        assert_eq!(report.tokens_after, 1);
        assert!((report.compression_ratio - 1.0).abs() < f64::EPSILON);
        for technique in ["pruning", "artifact_registry", "external_storage", "differential_state"]
        {
            assert!(report.techniques_applied.iter().any(|t| t == technique));
        }
        assert!(report.errors.is_empty());
        assert_eq!(report.items_externalized, 0);
    }

    #[test]
    fn test_pruning_keeps_recent_and_unresolved() {
        let dir = tempdir().unwrap();
        let optimizer = ContextOptimizer::new(OptimizerConfig {
            pruning: PruningConfig {
                age_hours: 1,
                max_validation_results: 2,
                max_resolved_errors: 1,
            },
            ..config(dir.path())
        });

        let stale = (Utc::now() - Duration::hours(3)).to_rfc3339();
        let fresh = Utc::now().to_rfc3339();
        let mut context = json!({
            "debug_log": [
                {"timestamp": stale, "msg": "old"},
                {"timestamp": fresh, "msg": "new"},
                {"msg": "undated"},
            ],
            "validation_results": [1, 2, 3, 4],
            "errors": [
                {"id": "a", "resolved": true},
                {"id": "b", "resolved": false},
                {"id": "c", "resolved": true},
            ],
        });
        let report = optimizer.optimize(&mut context, 0.3);
        assert!(report.errors.is_empty());

        let log = context["debug_log"].as_array().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0]["msg"], "new");

        assert_eq!(context["validation_results"], json!([3, 4]));

        let errors = context["errors"].as_array().unwrap();
        // Unresolved "b" survives; only the newest resolved ("c") is kept.
        let ids: Vec<_> = errors.iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_artifact_registry_replaces_file_contents() {
        let dir = tempdir().unwrap();
        let optimizer = ContextOptimizer::new(config(dir.path()));
        let mut context = json!({
            "files": {
                "src/main.rs": {
                    "content": "fn main() {}\nmore lines",
                    "last_modified": "2026-08-01T00:00:00Z",
                },
                "src/empty.rs": {"size": 0},
            },
        });
        let report = optimizer.optimize(&mut context, 0.3);
        assert!(report.errors.is_empty());

        assert!(context.get("files").is_none());
        let registry = context["artifact_registry"].as_object().unwrap();
        let main = &registry["src/main.rs"];
        assert_eq!(main["summary"], "fn main() {}");
        assert_eq!(main["last_modified"], "2026-08-01T00:00:00Z");
        assert_eq!(main["type"], "file");
        assert!(main["size_tokens"].as_u64().unwrap() >= 1);
        assert!(main.get("content").is_none());
        // No content: passes through untouched.
        assert_eq!(registry["src/empty.rs"], json!({"size": 0}));
    }

    #[test]
    fn test_externalization_moves_large_artifacts_to_disk() {
        let dir = tempdir().unwrap();
        let optimizer = ContextOptimizer::new(config(dir.path()));
        let big = "x".repeat(500);
        let mut context = json!({
            "artifacts": {
                "build-log": {"content": big},
                "tiny": {"content": "ok"},
            },
        });
        let report = optimizer.optimize(&mut context, 0.3);
        assert!(report.errors.is_empty());
        assert_eq!(report.items_externalized, 1);
        assert!(report.tokens_after < report.tokens_before);

        let replaced = &context["artifacts"]["build-log"];
        assert_eq!(replaced["id"], "build-log");
        let external_ref = replaced["external_ref"].as_str().unwrap();
        let stored = std::fs::read_to_string(external_ref).unwrap();
        let stored: Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(stored["content"].as_str().unwrap().len(), 500);

        assert_eq!(context["artifacts"]["tiny"], json!({"content": "ok"}));
    }

    #[test]
    fn test_plan_externalization_is_pure_selection() {
        let mut artifacts = Map::new();
        artifacts.insert("big".to_string(), json!({"content": "y".repeat(400)}));
        artifacts.insert("small".to_string(), json!({"content": "z"}));
        let plan = plan_externalization(&artifacts, 50);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].0, "big");
        assert!(plan[0].1 > 50);
    }

    #[test]
    fn test_differential_state_replaces_full_state() {
        let dir = tempdir().unwrap();
        let optimizer = ContextOptimizer::new(config(dir.path()));
        let mut context = json!({
            "full_state": {"everything": "x".repeat(200)},
        });
        let report = optimizer.optimize(&mut context, 0.3);
        assert!(report.errors.is_empty());

        assert!(context.get("full_state").is_none());
        let delta = &context["state_delta"];
        assert!(delta["checkpoint_id"].as_str().unwrap().starts_with("delta-"));
        assert_eq!(delta["changes"], json!({}));
        assert!(delta["original_tokens"].as_u64().unwrap() > 50);
    }

    #[test]
    fn test_summarization_needs_summarizer_and_missed_target() {
        let dir = tempdir().unwrap();
        let phase_body = json!({
            "status": "completed",
            "log": "x".repeat(400),
        });

        // No summarizer: phases untouched even though the target is missed.
        let optimizer = ContextOptimizer::new(config(dir.path()));
        let mut context = json!({"phases": {"phase-1": phase_body.clone()}});
        let report = optimizer.optimize(&mut context, 0.9);
        assert!(!report.techniques_applied.iter().any(|t| t == "summarization"));
        assert!(context["phases"]["phase-1"].get("log").is_some());

        // With a summarizer the completed oversized phase is archived.
        let optimizer =
            ContextOptimizer::new(config(dir.path())).with_summarizer(Box::new(StubSummarizer));
        let mut context = json!({
            "phases": {
                "phase-1": phase_body,
                "phase-2": {"status": "in_progress", "log": "y".repeat(400)},
            },
        });
        let report = optimizer.optimize(&mut context, 0.9);
        assert!(report.techniques_applied.iter().any(|t| t == "summarization"));
        assert!(report.tokens_after < report.tokens_before);

        let archived = &context["phases"]["phase-1"];
        assert_eq!(archived["summary"], "phase summary");
        assert_eq!(archived["status"], "completed");
        assert!(archived.get("log").is_none());
        assert!(dir.path().join("archive").join("phase-1.json").exists());
        // In-progress phases are never archived.
        assert!(context["phases"]["phase-2"].get("log").is_some());
    }

    #[test]
    fn test_technique_failure_is_recorded_not_fatal() {
        let dir = tempdir().unwrap();
        let optimizer = ContextOptimizer::new(config(dir.path()));
        // `files` has the wrong shape; the registry technique fails but
        // the others still run.
        let mut context = json!({
            "files": "not an object",
            "full_state": {"a": 1},
        });
        let report = optimizer.optimize(&mut context, 0.3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("artifact_registry:"));
        assert!(report.techniques_applied.iter().any(|t| t == "differential_state"));
        assert!(context.get("state_delta").is_some());
    }
}

//! Context-size detection seam
//!
//! The manager treats detection as a black box: something that may know
//! the raw context window for a provider/model pair. Detection never
//! propagates failure; resolution falls back to a configured value.

use std::collections::HashMap;

/// Answers "how many tokens does this model's context window hold".
/// Implementations may query a local serving endpoint or a static table;
/// `None` means the model is unknown.
pub trait ContextSizeDetector: Send + Sync {
    fn detect(&self, provider: &str, model: &str) -> Option<u64>;
}

/// Static model-name table with substring matching, longest pattern first.
pub struct StaticContextTable {
    entries: Vec<(String, u64)>,
}

impl StaticContextTable {
    pub fn new() -> Self {
        let entries = [
            ("claude-3-5", 200_000),
            ("claude-sonnet", 200_000),
            ("claude-opus", 200_000),
            ("claude-haiku", 200_000),
            ("gpt-4o-mini", 128_000),
            ("gpt-4o", 128_000),
            ("gpt-4-turbo", 128_000),
            ("gpt-4", 8_192),
            ("gpt-3.5-turbo", 16_385),
            ("gemini-1.5-pro", 2_000_000),
            ("gemini-1.5-flash", 1_000_000),
            ("gemini-2.0-flash", 1_000_000),
            ("llama-3.1", 128_000),
            ("llama-3", 8_192),
            ("qwen2.5", 32_768),
            ("mistral-large", 128_000),
        ];
        Self {
            entries: entries
                .into_iter()
                .map(|(name, size)| (name.to_string(), size))
                .collect(),
        }
    }

    pub fn with_entry(mut self, model: impl Into<String>, context_window: u64) -> Self {
        self.entries.push((model.into(), context_window));
        self
    }

    pub fn from_map(map: HashMap<String, u64>) -> Self {
        Self {
            entries: map.into_iter().collect(),
        }
    }
}

impl Default for StaticContextTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSizeDetector for StaticContextTable {
    fn detect(&self, _provider: &str, model: &str) -> Option<u64> {
        let model = model.to_lowercase();
        self.entries
            .iter()
            .filter(|(pattern, _)| model.contains(&pattern.to_lowercase()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, size)| *size)
    }
}

/// Resolve the raw context window: explicit value wins, then the detector,
/// then the fallback (with a warning).
pub fn resolve_context_window(
    explicit: Option<u64>,
    detector: Option<&dyn ContextSizeDetector>,
    provider: &str,
    model: &str,
    fallback: u64,
) -> u64 {
    if let Some(size) = explicit {
        return size;
    }
    if let Some(detector) = detector {
        if let Some(size) = detector.detect(provider, model) {
            tracing::debug!(provider, model, context_window = size, "detected context window");
            return size;
        }
    }
    tracing::warn!(
        provider,
        model,
        fallback,
        "context window detection failed, using fallback"
    );
    fallback
}

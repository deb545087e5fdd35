//! Bounded FIFO ledger of recent operations
//!
//! Working memory holds the most recent operations under two independent
//! caps: an entry count and a token budget. Eviction is strictly FIFO and
//! governs which old entries are dropped, never whether a new entry is
//! admitted: an operation larger than the whole token budget still lands
//! after everything else has been evicted.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use ballast_protocol::{Operation, OperationSummary, WorkingMemorySnapshot};

use crate::error::ContextError;

const PREVIEW_CHARS: usize = 120;

/// Point-in-time view of the ledger, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub operation_count: usize,
    pub max_operations: usize,
    pub current_tokens: u64,
    pub max_tokens: u64,
    pub token_utilization: f64,
    pub eviction_count: u64,
    pub context_window: u64,
}

#[derive(Debug, Clone)]
pub struct WorkingMemory {
    operations: VecDeque<Operation>,
    max_operations: usize,
    max_tokens: u64,
    current_tokens: u64,
    eviction_count: u64,
    context_window: u64,
}

impl WorkingMemory {
    /// Build a ledger for the given context window. Limits not supplied
    /// explicitly are derived from an internal size-band table;
    /// `max_tokens` defaults to `floor(context_window * max_tokens_pct)`.
    pub fn new(
        context_window: u64,
        max_operations: Option<usize>,
        max_tokens: Option<u64>,
        max_tokens_pct: Option<f64>,
    ) -> Result<Self, ContextError> {
        if context_window == 0 {
            return Err(ContextError::Configuration {
                field: "context_window",
                reason: "must be positive".to_string(),
            });
        }
        let (default_ops, default_pct) = default_limits(context_window);
        let pct = max_tokens_pct.unwrap_or(default_pct);
        if pct <= 0.0 || pct > 1.0 {
            return Err(ContextError::Configuration {
                field: "max_tokens_pct",
                reason: format!("must be within (0, 1], got {pct}"),
            });
        }
        let max_operations = max_operations.unwrap_or(default_ops);
        if max_operations == 0 {
            return Err(ContextError::Configuration {
                field: "max_operations",
                reason: "must be positive".to_string(),
            });
        }
        let max_tokens = max_tokens.unwrap_or((context_window as f64 * pct).floor() as u64);
        if max_tokens == 0 {
            return Err(ContextError::Configuration {
                field: "max_tokens",
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self {
            operations: VecDeque::with_capacity(max_operations.min(1024)),
            max_operations,
            max_tokens,
            current_tokens: 0,
            eviction_count: 0,
            context_window,
        })
    }

    /// Admit an operation, evicting oldest entries as needed to honor the
    /// token cap and the count cap.
    pub fn add_operation(&mut self, operation: Operation) -> Result<(), ContextError> {
        if operation.kind.is_empty() {
            return Err(ContextError::InvalidOperation {
                field: "type",
                reason: "must be a non-empty string".to_string(),
            });
        }
        if operation.operation.is_empty() {
            return Err(ContextError::InvalidOperation {
                field: "operation",
                reason: "must be a non-empty string".to_string(),
            });
        }

        while self.current_tokens + operation.tokens > self.max_tokens
            && !self.operations.is_empty()
        {
            self.evict_oldest();
        }
        if self.operations.len() >= self.max_operations {
            self.evict_oldest();
        }

        self.current_tokens += operation.tokens;
        self.operations.push_back(operation);
        Ok(())
    }

    fn evict_oldest(&mut self) {
        if let Some(evicted) = self.operations.pop_front() {
            self.current_tokens = self.current_tokens.saturating_sub(evicted.tokens);
            self.eviction_count += 1;
            tracing::debug!(
                kind = %evicted.kind,
                operation = %evicted.operation,
                tokens = evicted.tokens,
                eviction_count = self.eviction_count,
                "evicted oldest operation"
            );
        }
    }

    /// All operations, oldest first.
    pub fn all_operations(&self) -> Vec<&Operation> {
        self.operations.iter().collect()
    }

    /// Most recent operations, newest first. `None` returns everything.
    pub fn recent_operations(&self, limit: Option<usize>) -> Vec<&Operation> {
        let limit = limit.unwrap_or(self.operations.len());
        self.operations.iter().rev().take(limit).collect()
    }

    /// Operations filtered by kind, newest first.
    pub fn operations_by_kind(&self, kind: Option<&str>, limit: usize) -> Vec<&Operation> {
        self.operations
            .iter()
            .rev()
            .filter(|op| kind.is_none_or(|k| op.kind == k))
            .take(limit)
            .collect()
    }

    /// Case-insensitive substring search over the synthesized operation
    /// text, newest first.
    pub fn search(&self, query: &str, max_results: usize) -> Vec<OperationSummary> {
        let needle = query.to_lowercase();
        self.operations
            .iter()
            .rev()
            .filter(|op| op.search_text().to_lowercase().contains(&needle))
            .take(max_results)
            .map(|op| {
                let data = op.data.to_string();
                let preview = if data.len() > PREVIEW_CHARS {
                    let cut = data
                        .char_indices()
                        .map(|(i, _)| i)
                        .take_while(|i| *i <= PREVIEW_CHARS)
                        .last()
                        .unwrap_or(0);
                    format!("{}...", &data[..cut])
                } else {
                    data
                };
                OperationSummary {
                    kind: op.kind.clone(),
                    operation: op.operation.clone(),
                    preview,
                    tokens: op.tokens,
                    timestamp: op.timestamp,
                }
            })
            .collect()
    }

    /// Empty the ledger. The eviction counter is a session-lifetime
    /// statistic and is deliberately not reset.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.current_tokens = 0;
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn current_tokens(&self) -> u64 {
        self.current_tokens
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    pub fn status(&self) -> MemoryStatus {
        MemoryStatus {
            operation_count: self.operations.len(),
            max_operations: self.max_operations,
            current_tokens: self.current_tokens,
            max_tokens: self.max_tokens,
            token_utilization: self.current_tokens as f64 / self.max_tokens as f64,
            eviction_count: self.eviction_count,
            context_window: self.context_window,
        }
    }

    /// Owned snapshot of the ledger for checkpointing, oldest first.
    pub fn snapshot(&self) -> WorkingMemorySnapshot {
        WorkingMemorySnapshot {
            operations: self.operations.iter().cloned().collect(),
            current_tokens: self.current_tokens,
            max_operations: self.max_operations,
            max_tokens: self.max_tokens,
        }
    }
}

/// Default (max_operations, max_tokens_pct) per context-window size band.
fn default_limits(context_window: u64) -> (usize, f64) {
    match context_window {
        0..=16_000 => (50, 0.25),
        16_001..=64_000 => (100, 0.30),
        64_001..=200_000 => (200, 0.35),
        200_001..=500_000 => (500, 0.40),
        _ => (1000, 0.50),
    }
}

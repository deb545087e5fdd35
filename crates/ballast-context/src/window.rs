//! Context window usage tracking
//!
//! `ContextWindowManager` is the single source of truth for budget
//! consumption and urgency. It tracks cumulative token usage against an
//! effective capacity (the raw window scaled by a utilization limit) and
//! derives a usage zone plus a recommended maintenance action.

use serde::{Deserialize, Serialize};

use crate::error::ContextError;

/// Usage band indicating maintenance urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageZone {
    Green,
    Yellow,
    Orange,
    Red,
}

impl std::fmt::Display for UsageZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
            Self::Orange => write!(f, "orange"),
            Self::Red => write!(f, "red"),
        }
    }
}

/// Action recommended for the current zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ProceedNormally,
    MonitorAndPlanCheckpoint,
    OptimizeThenCheckpoint,
    EmergencyCheckpointAndRefresh,
}

/// Zone boundaries as fractions of the effective maximum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneThresholds {
    pub green_upper: f64,
    pub yellow_upper: f64,
    pub orange_upper: f64,
    pub red: f64,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            green_upper: 0.50,
            yellow_upper: 0.70,
            orange_upper: 0.85,
            red: 0.95,
        }
    }
}

impl ZoneThresholds {
    fn validate(&self) -> Result<(), ContextError> {
        let values = [self.green_upper, self.yellow_upper, self.orange_upper, self.red];
        let ascending = values.windows(2).all(|w| w[0] < w[1]);
        let in_range = values.iter().all(|v| *v > 0.0 && *v <= 1.0);
        if !ascending || !in_range {
            return Err(ContextError::Configuration {
                field: "thresholds",
                reason: format!(
                    "zone thresholds must be strictly ascending within (0, 1], got {values:?}"
                ),
            });
        }
        Ok(())
    }
}

/// Point-in-time view of the usage counter, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowStatus {
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub effective_max_tokens: u64,
    pub available_tokens: u64,
    pub utilization_limit: f64,
    pub usage_percentage: f64,
    pub zone: UsageZone,
    pub recommended_action: RecommendedAction,
}

#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    used_tokens: u64,
    max_tokens: u64,
    utilization_limit: f64,
    effective_max_tokens: u64,
    // Absolute thresholds, precomputed against the effective maximum.
    green_threshold: f64,
    yellow_threshold: f64,
    orange_threshold: f64,
    red_threshold: f64,
}

impl ContextWindowManager {
    pub fn new(
        context_window: u64,
        utilization_limit: f64,
        thresholds: Option<ZoneThresholds>,
    ) -> Result<Self, ContextError> {
        if context_window == 0 {
            return Err(ContextError::Configuration {
                field: "context_window",
                reason: "must be positive".to_string(),
            });
        }
        if utilization_limit <= 0.0 || utilization_limit > 1.0 {
            return Err(ContextError::Configuration {
                field: "utilization_limit",
                reason: format!("must be within (0, 1], got {utilization_limit}"),
            });
        }
        let thresholds = thresholds.unwrap_or_default();
        thresholds.validate()?;

        let effective_max_tokens = (context_window as f64 * utilization_limit).floor() as u64;
        if effective_max_tokens == 0 {
            return Err(ContextError::Configuration {
                field: "utilization_limit",
                reason: format!(
                    "effective maximum is zero for window {context_window} at limit {utilization_limit}"
                ),
            });
        }

        let effective = effective_max_tokens as f64;
        Ok(Self {
            used_tokens: 0,
            max_tokens: context_window,
            utilization_limit,
            effective_max_tokens,
            green_threshold: thresholds.green_upper * effective,
            yellow_threshold: thresholds.yellow_upper * effective,
            orange_threshold: thresholds.orange_upper * effective,
            red_threshold: thresholds.red * effective,
        })
    }

    /// Record consumed tokens. Usage is not clamped and may exceed the
    /// effective maximum; zone transitions are logged as they happen.
    pub fn add_usage(&mut self, tokens: u64) -> UsageZone {
        let before = self.zone();
        self.used_tokens += tokens;
        let after = self.zone();
        if after != before {
            tracing::info!(
                from = %before,
                to = %after,
                used_tokens = self.used_tokens,
                effective_max_tokens = self.effective_max_tokens,
                "usage zone transition"
            );
        }
        after
    }

    pub fn used_tokens(&self) -> u64 {
        self.used_tokens
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    pub fn effective_max_tokens(&self) -> u64 {
        self.effective_max_tokens
    }

    pub fn utilization_limit(&self) -> f64 {
        self.utilization_limit
    }

    /// Tokens left under the effective maximum, floored at zero.
    pub fn available_tokens(&self) -> u64 {
        self.effective_max_tokens.saturating_sub(self.used_tokens)
    }

    pub fn usage_percentage(&self) -> f64 {
        self.used_tokens as f64 / self.effective_max_tokens as f64 * 100.0
    }

    /// First threshold (ascending) that usage is strictly below wins;
    /// red is the catch-all.
    pub fn zone(&self) -> UsageZone {
        let used = self.used_tokens as f64;
        if used < self.green_threshold {
            UsageZone::Green
        } else if used < self.yellow_threshold {
            UsageZone::Yellow
        } else if used < self.orange_threshold {
            UsageZone::Orange
        } else {
            UsageZone::Red
        }
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        match self.zone() {
            UsageZone::Green => RecommendedAction::ProceedNormally,
            UsageZone::Yellow => RecommendedAction::MonitorAndPlanCheckpoint,
            UsageZone::Orange => RecommendedAction::OptimizeThenCheckpoint,
            UsageZone::Red => RecommendedAction::EmergencyCheckpointAndRefresh,
        }
    }

    /// Admission control with headroom: true iff adding `tokens` keeps
    /// usage strictly below the yellow threshold.
    pub fn can_accommodate(&self, tokens: u64) -> bool {
        ((self.used_tokens + tokens) as f64) < self.yellow_threshold
    }

    /// Boundary of the red zone, in absolute tokens. Past this point the
    /// session should checkpoint and refresh immediately.
    pub fn red_threshold(&self) -> f64 {
        self.red_threshold
    }

    pub fn reset(&mut self) {
        self.used_tokens = 0;
    }

    /// Overwrite the counter with a checkpoint's authoritative total. Used
    /// only by restore; usage may exceed what the ledger still holds.
    pub fn restore_used_tokens(&mut self, total: u64) {
        self.used_tokens = total;
    }

    pub fn status(&self) -> WindowStatus {
        WindowStatus {
            used_tokens: self.used_tokens,
            max_tokens: self.max_tokens,
            effective_max_tokens: self.effective_max_tokens,
            available_tokens: self.available_tokens(),
            utilization_limit: self.utilization_limit,
            usage_percentage: self.usage_percentage(),
            zone: self.zone(),
            recommended_action: self.recommended_action(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_construction() {
        assert!(ContextWindowManager::new(0, 0.9, None).is_err());
        assert!(ContextWindowManager::new(4096, 0.0, None).is_err());
        assert!(ContextWindowManager::new(4096, 1.5, None).is_err());
        assert!(ContextWindowManager::new(4096, 0.9, None).is_ok());
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let thresholds = ZoneThresholds {
            green_upper: 0.8,
            yellow_upper: 0.7,
            orange_upper: 0.85,
            red: 0.95,
        };
        assert!(ContextWindowManager::new(4096, 0.9, Some(thresholds)).is_err());
    }

    #[test]
    fn test_effective_max_and_yellow_zone() {
        // 4096 * 0.85 = 3481.6 -> 3481
        let mut window = ContextWindowManager::new(4096, 0.85, None).unwrap();
        assert_eq!(window.effective_max_tokens(), 3481);

        // 1800 >= 0.50 * 3481 = 1740.5 and < 0.70 * 3481 = 2436.7
        window.add_usage(1800);
        assert_eq!(window.zone(), UsageZone::Yellow);
        assert_eq!(
            window.recommended_action(),
            RecommendedAction::MonitorAndPlanCheckpoint
        );
    }

    #[test]
    fn test_zone_is_monotonic_in_usage() {
        let mut window = ContextWindowManager::new(10_000, 1.0, None).unwrap();
        let mut last = window.zone();
        for _ in 0..120 {
            let zone = window.add_usage(100);
            assert!(zone >= last);
            last = zone;
        }
        assert_eq!(last, UsageZone::Red);
    }

    #[test]
    fn test_usage_not_clamped() {
        let mut window = ContextWindowManager::new(1000, 1.0, None).unwrap();
        window.add_usage(5000);
        assert_eq!(window.used_tokens(), 5000);
        assert_eq!(window.available_tokens(), 0);
        assert_eq!(window.zone(), UsageZone::Red);
    }

    #[test]
    fn test_can_accommodate_uses_yellow_threshold() {
        let window = ContextWindowManager::new(1000, 1.0, None).unwrap();
        // Yellow threshold is 700 absolute.
        assert!(window.can_accommodate(699));
        assert!(!window.can_accommodate(700));
    }

    #[test]
    fn test_reset_and_restore() {
        let mut window = ContextWindowManager::new(1000, 1.0, None).unwrap();
        window.add_usage(400);
        window.reset();
        assert_eq!(window.used_tokens(), 0);
        window.restore_used_tokens(950);
        assert_eq!(window.used_tokens(), 950);
        assert_eq!(window.zone(), UsageZone::Red);
    }
}

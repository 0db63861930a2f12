//! Rotation schedule arithmetic.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Floor for the rotation interval: 30 minutes.
pub const DEFAULT_MIN_ROTATION_INTERVAL_MS: u64 = 1_800_000;

/// Default rotation interval: 7 days.
pub const DEFAULT_ROTATION_INTERVAL_MS: u64 = 7 * 24 * 3600 * 1000;

pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 60_000;

/// Process-wide rotation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RotationConfig {
    pub requested_interval_ms: u64,
    /// Hard floor; a lower requested interval is raised to this value.
    pub min_interval_ms: u64,
    #[validate(range(min = 1, message = "retry interval must be positive"))]
    pub retry_interval_ms: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            requested_interval_ms: DEFAULT_ROTATION_INTERVAL_MS,
            min_interval_ms: DEFAULT_MIN_ROTATION_INTERVAL_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
        }
    }
}

impl RotationConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn rotates_at(&self, created_at_secs: i64) -> i64 {
        compute_rotates_at(created_at_secs, self.requested_interval_ms, self.min_interval_ms)
    }
}

/// Next-due timestamp in unix milliseconds for a credential created at `created_at_secs`.
///
/// A requested interval below `min_ms` is replaced by `min_ms` with a warning.
pub fn compute_rotates_at(created_at_secs: i64, requested_ms: u64, min_ms: u64) -> i64 {
    let interval = if requested_ms < min_ms {
        tracing::warn!(
            requested_ms,
            min_ms,
            "Rotation interval ({}) too low, using minimum ({})",
            requested_ms,
            min_ms
        );
        min_ms
    } else {
        requested_ms
    };
    let interval = i64::try_from(interval).unwrap_or(i64::MAX);
    created_at_secs.saturating_mul(1000).saturating_add(interval)
}

/// Time left until `rotates_at_ms`, zero once it has passed.
pub fn compute_idle_delay(rotates_at_ms: i64, now_ms: i64) -> Duration {
    let remaining = rotates_at_ms.saturating_sub(now_ms).max(0);
    Duration::from_millis(remaining as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[test]
    fn test_requested_interval_above_floor_is_used() {
        assert_eq!(compute_rotates_at(1_700_000_000, 3_600_000, 1_800_000), 1_700_003_600_000);
    }

    #[test]
    #[traced_test]
    fn test_low_interval_clamped_with_warning() {
        let rotates_at = compute_rotates_at(1_700_000_000, 1000, DEFAULT_MIN_ROTATION_INTERVAL_MS);
        assert_eq!(rotates_at, 1_700_000_000 * 1000 + 1_800_000);
        assert!(logs_contain("Rotation interval (1000) too low, using minimum (1800000)"));
    }

    #[test]
    #[traced_test]
    fn test_disabled_floor_does_not_warn() {
        assert_eq!(compute_rotates_at(10, 100, 0), 10_100);
        assert!(!logs_contain("too low"));
    }

    #[test]
    fn test_idle_delay() {
        assert_eq!(compute_idle_delay(5_000, 2_000), Duration::from_millis(3_000));
        assert_eq!(compute_idle_delay(2_000, 2_000), Duration::ZERO);
        assert_eq!(compute_idle_delay(1_000, 2_000), Duration::ZERO);
    }

    #[test]
    fn test_rotation_config_defaults() {
        let config = RotationConfig::default();
        assert_eq!(config.requested_interval_ms, 604_800_000);
        assert_eq!(config.retry_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());

        let config = RotationConfig { retry_interval_ms: 0, ..config };
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_rotates_at_respects_floor(
            created in 0i64..4_000_000_000,
            requested in 0u64..10_000_000_000,
            min in 0u64..10_000_000_000,
        ) {
            let rotates_at = compute_rotates_at(created, requested, min);
            prop_assert!(rotates_at >= created * 1000 + min as i64);
            if requested < min {
                prop_assert_eq!(rotates_at, created * 1000 + min as i64);
            } else {
                prop_assert_eq!(rotates_at, created * 1000 + requested as i64);
            }
        }

        #[test]
        fn prop_idle_delay_zero_when_due(rotates_at in any::<i32>(), lag in 0i64..1_000_000) {
            let rotates_at = rotates_at as i64;
            prop_assert_eq!(compute_idle_delay(rotates_at, rotates_at + lag), Duration::ZERO);
        }
    }
}

//! Delivery policy: pacing and retry parameters for one dispatch.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::DispatchError;

/// Lowest accepted `max_retries`.
pub const MIN_RETRIES: u32 = 1;

/// Highest accepted `max_retries`.
pub const MAX_RETRIES: u32 = 5;

/// Pacing and retry behaviour for a dispatch. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPolicy {
    pub delay_ms: u64,
    pub retry_enabled: bool,
    pub max_retries: u32,
}

impl DeliveryPolicy {
    /// Build a policy, rejecting `max_retries` outside `1..=5`.
    pub fn new(delay_ms: u64, retry_enabled: bool, max_retries: u32) -> Result<Self, DispatchError> {
        if !(MIN_RETRIES..=MAX_RETRIES).contains(&max_retries) {
            return Err(DispatchError::Validation(format!(
                "maxRetries must be between {MIN_RETRIES} and {MAX_RETRIES}, got {max_retries}"
            )));
        }
        Ok(Self {
            delay_ms,
            retry_enabled,
            max_retries,
        })
    }

    /// Pause between consecutive lines sent to one target.
    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Pause between consecutive targets: twice the line delay.
    pub fn target_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.saturating_mul(2))
    }

    /// Upper bound on send attempts for a single (target, line) pair.
    pub fn max_attempts(&self) -> u32 {
        if self.retry_enabled {
            self.max_retries + 1
        } else {
            1
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            retry_enabled: false,
            max_retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = DeliveryPolicy::default();
        assert_eq!(policy.line_delay(), Duration::from_millis(1000));
        assert_eq!(policy.target_delay(), Duration::from_millis(2000));
        assert!(!policy.retry_enabled);
        assert_eq!(policy.max_retries, 3);
    }

    #[test]
    fn test_retry_disabled_is_single_attempt() {
        let policy = DeliveryPolicy::new(500, false, 5).unwrap();
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_retry_enabled_attempts() {
        let policy = DeliveryPolicy::new(500, true, 3).unwrap();
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_max_retries_bounds() {
        assert!(DeliveryPolicy::new(1000, true, 0).is_err());
        assert!(DeliveryPolicy::new(1000, true, 6).is_err());
        assert!(DeliveryPolicy::new(1000, true, 1).is_ok());
        assert!(DeliveryPolicy::new(1000, true, 5).is_ok());
    }
}

//! Site policy knobs consumed by the session controller.

use std::time::Duration;

/// Default acceptance threshold: engine confidence at or above this grants.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: u8 = 80;

/// Default hard deadline for one engine verification call.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Access policy for one controller instance. Plain data, fixed for the
/// controller's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Minimum engine confidence (0..=100) that yields a grant.
    pub acceptance_threshold: u8,
    /// Hard deadline for one verification call. Expiry denies with
    /// `verification_timeout`.
    pub verify_timeout: Duration,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }
}

impl AccessPolicy {
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.acceptance_threshold = threshold.min(100);
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let policy = AccessPolicy::default();
        assert_eq!(policy.acceptance_threshold, 80);
        assert_eq!(policy.verify_timeout, Duration::from_secs(5));
    }

    #[test]
    fn threshold_clamped_to_scale() {
        let policy = AccessPolicy::default().with_threshold(200);
        assert_eq!(policy.acceptance_threshold, 100);
    }
}

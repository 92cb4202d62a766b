//! Retry delays for failed bulk dispatches

use std::time::Duration;

use crate::config::{BackoffPolicyKind, TableConfig};

/// Delay schedule between dispatch attempts of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Never retry
    None,
    /// Same delay before every retry
    Constant {
        delay: Duration,
        max_retries: u32,
    },
    /// `initial_delay * 2^attempt` before retry `attempt`
    Exponential {
        initial_delay: Duration,
        max_retries: u32,
    },
}

impl BackoffPolicy {
    pub fn from_config(config: &TableConfig) -> Self {
        let wait = Duration::from_secs(config.backoff_wait_time_secs);
        match config.backoff_policy {
            BackoffPolicyKind::ConstantBackoff => BackoffPolicy::Constant {
                delay: wait,
                max_retries: config.backoff_retry_no,
            },
            BackoffPolicyKind::ExponentialBackoff => BackoffPolicy::Exponential {
                initial_delay: wait,
                max_retries: config.backoff_retry_no,
            },
            BackoffPolicyKind::Disable => BackoffPolicy::None,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            BackoffPolicy::None => 0,
            BackoffPolicy::Constant { max_retries, .. }
            | BackoffPolicy::Exponential { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based), `None` once exhausted
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries() {
            return None;
        }
        match self {
            BackoffPolicy::None => None,
            BackoffPolicy::Constant { delay, .. } => Some(*delay),
            BackoffPolicy::Exponential { initial_delay, .. } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                Some(initial_delay.saturating_mul(factor))
            }
        }
    }

    /// Full schedule, one entry per retry
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..).map_while(move |attempt| self.next_delay(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_retries() {
        assert_eq!(BackoffPolicy::None.next_delay(0), None);
        assert_eq!(BackoffPolicy::None.delays().count(), 0);
    }

    #[test]
    fn test_constant_schedule() {
        let policy = BackoffPolicy::Constant {
            delay: Duration::from_secs(1),
            max_retries: 3,
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays, vec![Duration::from_secs(1); 3]);
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_exponential_doubles() {
        let policy = BackoffPolicy::Exponential {
            initial_delay: Duration::from_millis(100),
            max_retries: 4,
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[test]
    fn test_exponential_saturates() {
        let policy = BackoffPolicy::Exponential {
            initial_delay: Duration::from_secs(1),
            max_retries: 100,
        };
        assert!(policy.next_delay(99).is_some());
    }

    #[test]
    fn test_zero_retries() {
        let policy = BackoffPolicy::Constant {
            delay: Duration::from_secs(1),
            max_retries: 0,
        };
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn test_from_config() {
        let config = TableConfig::default();
        assert_eq!(
            BackoffPolicy::from_config(&config),
            BackoffPolicy::Constant {
                delay: Duration::from_secs(1),
                max_retries: 3
            }
        );

        let config = TableConfig::default().backoff(BackoffPolicyKind::ExponentialBackoff, 2, 5);
        assert_eq!(
            BackoffPolicy::from_config(&config),
            BackoffPolicy::Exponential {
                initial_delay: Duration::from_secs(5),
                max_retries: 2
            }
        );

        let config = TableConfig::default().backoff(BackoffPolicyKind::Disable, 3, 1);
        assert_eq!(BackoffPolicy::from_config(&config), BackoffPolicy::None);
    }
}

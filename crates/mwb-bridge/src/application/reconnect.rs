//! Fixed-delay, capped reconnection policy for outbound message sessions.

use std::collections::HashMap;
use std::time::Duration;

/// Default number of redials before giving up on a host.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before each redial.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What to do after an eligible session loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Redial after `delay`; this will be attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// The cap is reached.
    GiveUp { attempts: u32 },
}

/// Per-host attempt counters.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    delay: Duration,
    attempts: HashMap<String, u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            attempts: HashMap::new(),
        }
    }

    /// Records a loss for `host` and decides whether to redial.
    ///
    /// Giving up clears the counter so a later manual connect starts fresh.
    pub fn on_loss(&mut self, host: &str) -> ReconnectDecision {
        let count = self.attempts.entry(host.to_string()).or_insert(0);
        if *count >= self.max_attempts {
            let attempts = *count;
            self.attempts.remove(host);
            return ReconnectDecision::GiveUp { attempts };
        }
        *count += 1;
        ReconnectDecision::Retry {
            attempt: *count,
            delay: self.delay,
        }
    }

    /// Forgets the count for `host`, e.g. after a successful handshake.
    pub fn reset(&mut self, host: &str) {
        self.attempts.remove(host);
    }

    pub fn reset_all(&mut self) {
        self.attempts.clear();
    }

    pub fn attempts(&self, host: &str) -> u32 {
        self.attempts.get(host).copied().unwrap_or(0)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cap_of_three_allows_three_retries_then_gives_up() {
        // Arrange
        let mut policy = ReconnectPolicy::new(3, Duration::from_secs(5));

        // Act
        let decisions: Vec<_> = (0..4).map(|_| policy.on_loss("10.0.0.2")).collect();

        // Assert
        let delay = Duration::from_secs(5);
        assert_eq!(
            decisions,
            vec![
                ReconnectDecision::Retry { attempt: 1, delay },
                ReconnectDecision::Retry { attempt: 2, delay },
                ReconnectDecision::Retry { attempt: 3, delay },
                ReconnectDecision::GiveUp { attempts: 3 },
            ]
        );
        assert_eq!(policy.attempts("10.0.0.2"), 0);
    }

    #[test]
    fn test_hosts_are_counted_independently() {
        let mut policy = ReconnectPolicy::default();
        policy.on_loss("a");
        policy.on_loss("a");
        policy.on_loss("b");
        assert_eq!(policy.attempts("a"), 2);
        assert_eq!(policy.attempts("b"), 1);
    }

    #[test]
    fn test_reset_restarts_the_count() {
        let mut policy = ReconnectPolicy::default();
        policy.on_loss("a");
        policy.on_loss("a");
        policy.reset("a");
        assert!(matches!(
            policy.on_loss("a"),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_zero_cap_never_retries() {
        let mut policy = ReconnectPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.on_loss("a"), ReconnectDecision::GiveUp { attempts: 0 });
    }
}

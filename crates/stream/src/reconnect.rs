//! Bounded linear-backoff reconnection policy for job event streams.
//!
//! When a stream session fails, the connection asks the
//! [`ReconnectPolicy`] what to do next. While fewer than
//! `max_attempts` reconnects have been made it answers
//! [`ReconnectDecision::Retry`] with `delay = base_delay * attempt`;
//! after that it answers [`ReconnectDecision::Exhausted`] and the
//! connection surfaces a terminal error. A successful connect resets the
//! counter.

use std::time::Duration;

/// Tunable parameters for the reconnect policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay unit; attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
    /// Reconnects allowed per failure episode.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 3,
        }
    }
}

/// What to do after a failed or dropped session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make reconnect attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Stop; `attempts` reconnects were already made.
    Exhausted { attempts: u32 },
}

/// Delay before reconnect attempt `attempt` (1-based).
pub fn delay_for_attempt(config: &ReconnectConfig, attempt: u32) -> Duration {
    config.base_delay.saturating_mul(attempt)
}

/// Attempt counter for one subscription.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Reconnects made since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// A session was established.
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    /// A connect failed or a session dropped.
    pub fn record_failure(&mut self) -> ReconnectDecision {
        if self.attempts >= self.config.max_attempts {
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: delay_for_attempt(&self.config, self.attempts),
        }
    }

    /// Clear the counter for a manual reconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

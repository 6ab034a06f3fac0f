//! Restart Policy Engine: exponential backoff with a rolling restart-window
//! budget, so a crash-looping child server is throttled and eventually
//! parked instead of hot-looping the supervisor.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Per-server restart policy. Defaults mirror a conservative "a few retries,
/// then give up" posture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RestartPolicy {
    /// Restarts allowed before the server is parked in `Failed`.
    pub max_restarts: u32,
    /// Width of the rolling window (seconds) used to bound restart rate.
    pub restart_window_sec: u64,
    /// Delay before the first restart attempt, in seconds.
    pub initial_delay_sec: f64,
    /// Multiplier applied to the delay on each subsequent attempt.
    pub backoff_multiplier: f64,
    /// Ceiling on the computed delay, in seconds.
    pub max_delay_sec: f64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            restart_window_sec: 60,
            initial_delay_sec: 1.0,
            backoff_multiplier: 2.0,
            max_delay_sec: 60.0,
        }
    }
}

/// The exponent is capped so a pathological policy can't overflow `f64` or
/// produce a practically infinite delay.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Reason a restart was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartRefusal {
    /// `restart_count` has reached `policy.max_restarts`.
    BudgetExhausted,
    /// Too many restarts have landed inside `policy.restart_window_sec`.
    WindowExceeded,
}

impl std::fmt::Display for RestartRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExhausted => write!(f, "restart budget exhausted"),
            Self::WindowExceeded => write!(f, "restart rate exceeds the configured window"),
        }
    }
}

/// Tracks restart history for a single server instance. One tracker per
/// running server id; the manager owns it for the instance's lifetime and
/// resets it after an explicit (non-crash) restart or a long idle period.
#[derive(Debug, Default, Clone)]
pub struct RestartTracker {
    history: Vec<Instant>,
}

impl RestartTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another restart is currently permitted.
    #[must_use]
    pub fn can_restart(
        &self,
        policy: &RestartPolicy,
        restart_count: u32,
    ) -> Result<(), RestartRefusal> {
        if restart_count >= policy.max_restarts {
            return Err(RestartRefusal::BudgetExhausted);
        }

        let window = Duration::from_secs(policy.restart_window_sec);
        let now = Instant::now();
        let recent = self
            .history
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < window)
            .count();

        if recent as u32 >= policy.max_restarts {
            return Err(RestartRefusal::WindowExceeded);
        }

        Ok(())
    }

    /// Computes the delay to wait before the next restart attempt.
    /// `exponent = min(restart_count, 10)`; the caller awaits the returned
    /// duration itself (this never sleeps internally).
    #[must_use]
    pub fn backoff_delay(policy: &RestartPolicy, restart_count: u32) -> Duration {
        let exponent = restart_count.min(MAX_BACKOFF_EXPONENT);
        let delay = policy.initial_delay_sec * policy.backoff_multiplier.powi(exponent as i32);
        let delay = delay.min(policy.max_delay_sec).max(0.0);
        Duration::from_secs_f64(delay)
    }

    /// Records that a restart attempt was made right now.
    pub fn record_restart(&mut self) {
        self.history.push(Instant::now());
    }

    /// Clears all restart history and counters, e.g. after a user-initiated
    /// restart or once a server has run stably for a while.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Drops history entries older than `max_age`, bounding memory use for
    /// long-lived servers that restart occasionally over days.
    pub fn cleanup_older_than(&mut self, max_age: Duration) {
        let now = Instant::now();
        self.history
            .retain(|t| now.saturating_duration_since(*t) < max_age);
    }

    #[must_use]
    pub fn restart_count_in_window(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.history
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        let policy = RestartPolicy {
            max_restarts: 100,
            restart_window_sec: 3600,
            initial_delay_sec: 1.0,
            backoff_multiplier: 2.0,
            max_delay_sec: 30.0,
        };
        assert_eq!(
            RestartTracker::backoff_delay(&policy, 0),
            Duration::from_secs_f64(1.0)
        );
        assert_eq!(
            RestartTracker::backoff_delay(&policy, 3),
            Duration::from_secs_f64(8.0)
        );
        // Exceeds max_delay_sec, gets capped.
        assert_eq!(
            RestartTracker::backoff_delay(&policy, 10),
            Duration::from_secs_f64(30.0)
        );
        // Exponent caps at 10 regardless of how large restart_count gets.
        assert_eq!(
            RestartTracker::backoff_delay(&policy, 50),
            RestartTracker::backoff_delay(&policy, 10)
        );
    }

    #[test]
    fn budget_exhausted_refuses_restart() {
        let policy = RestartPolicy::default();
        let tracker = RestartTracker::new();
        assert_eq!(
            tracker.can_restart(&policy, policy.max_restarts),
            Err(RestartRefusal::BudgetExhausted)
        );
    }

    #[test]
    fn window_exceeded_refuses_restart() {
        let policy = RestartPolicy {
            max_restarts: 2,
            restart_window_sec: 3600,
            ..RestartPolicy::default()
        };
        let mut tracker = RestartTracker::new();
        tracker.record_restart();
        tracker.record_restart();
        // restart_count is still below max_restarts (caller hasn't bumped
        // it yet) but the rolling window already saw 2 restarts.
        assert_eq!(
            tracker.can_restart(&policy, 0),
            Err(RestartRefusal::WindowExceeded)
        );
    }

    #[test]
    fn reset_clears_history() {
        let policy = RestartPolicy::default();
        let mut tracker = RestartTracker::new();
        tracker.record_restart();
        tracker.record_restart();
        tracker.reset();
        assert!(tracker.can_restart(&policy, 0).is_ok());
        assert_eq!(tracker.restart_count_in_window(Duration::from_secs(3600)), 0);
    }

    #[test]
    fn cleanup_drops_stale_entries() {
        let mut tracker = RestartTracker::new();
        tracker.record_restart();
        std::thread::sleep(Duration::from_millis(5));
        tracker.cleanup_older_than(Duration::from_millis(1));
        assert_eq!(tracker.restart_count_in_window(Duration::from_secs(3600)), 0);
    }
}

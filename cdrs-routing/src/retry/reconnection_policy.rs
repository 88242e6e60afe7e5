#[cfg(test)]
use mockall::automock;
use rand::{rng, Rng};
use std::convert::TryFrom;
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

// delays are randomized by up to 15% in both directions
const JITTER_PERCENT: u32 = 15;

/// Determines the time for the next reconnection attempt when trying to reconnect to a node.
pub trait ReconnectionSchedule {
    /// Returns next reconnect delay or `None` if the node should be given up on.
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Creates reconnection schedules when a node pool loses connections.
#[cfg_attr(test, automock)]
pub trait ReconnectionPolicy {
    /// Creates new schedule when connections to a node need to be re-established.
    fn new_node_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync>;
}

/// Schedules reconnection at constant interval, optionally giving up after a number of attempts.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConstantReconnectionPolicy {
    delay: Duration,
    max_attempts: Option<usize>,
}

impl Default for ConstantReconnectionPolicy {
    fn default() -> Self {
        ConstantReconnectionPolicy::new(DEFAULT_BASE_DELAY)
    }
}

impl ConstantReconnectionPolicy {
    pub fn new(delay: Duration) -> Self {
        ConstantReconnectionPolicy {
            delay,
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionPolicy for ConstantReconnectionPolicy {
    fn new_node_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(ConstantReconnectionSchedule {
            delay: self.delay,
            remaining_attempts: self.max_attempts,
        })
    }
}

struct ConstantReconnectionSchedule {
    delay: Duration,
    remaining_attempts: Option<usize>,
}

impl ReconnectionSchedule for ConstantReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        if let Some(remaining_attempts) = &mut self.remaining_attempts {
            *remaining_attempts = remaining_attempts.checked_sub(1)?;
        }

        Some(self.delay)
    }
}

/// Never schedules reconnections. A node which loses all connections stays down until the
/// topology marks it up again.
#[derive(Default, Copy, Clone, Debug, PartialEq, Ord, PartialOrd, Eq, Hash)]
pub struct NeverReconnectionPolicy;

impl ReconnectionPolicy for NeverReconnectionPolicy {
    fn new_node_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(NeverReconnectionSchedule)
    }
}

struct NeverReconnectionSchedule;

impl ReconnectionSchedule for NeverReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        None
    }
}

/// Doubles the delay after every attempt, starting from `base_delay` and capped at `max_delay`.
/// Every delay gets a random jitter, but never leaves the `[base_delay, max_delay]` range. By
/// default, reconnection is attempted for as long as the pool exists.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExponentialReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<usize>,
}

impl Default for ExponentialReconnectionPolicy {
    fn default() -> Self {
        ExponentialReconnectionPolicy::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ExponentialReconnectionPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        ExponentialReconnectionPolicy {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionPolicy for ExponentialReconnectionPolicy {
    fn new_node_schedule(&self) -> Box<dyn ReconnectionSchedule + Send + Sync> {
        Box::new(ExponentialReconnectionSchedule {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            max_attempts: self.max_attempts,
            attempt: 0,
        })
    }
}

pub(crate) struct ExponentialReconnectionSchedule {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<usize>,
    attempt: usize,
}

impl ReconnectionSchedule for ExponentialReconnectionSchedule {
    fn next_delay(&mut self) -> Option<Duration> {
        if Some(self.attempt) == self.max_attempts {
            return None;
        }

        let exponent = u32::try_from(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);

        let delay = self
            .base_delay
            .saturating_mul(2u32.checked_pow(exponent).unwrap_or(u32::MAX))
            .min(self.max_delay);

        let jitter = rng().random_range(100 - JITTER_PERCENT..=100 + JITTER_PERCENT);

        Some(
            (delay / 100)
                .saturating_mul(jitter)
                .clamp(self.base_delay, self.max_delay),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::retry::reconnection_policy::ExponentialReconnectionSchedule;
    use crate::retry::{
        ConstantReconnectionPolicy, ExponentialReconnectionPolicy, NeverReconnectionPolicy,
        ReconnectionPolicy, ReconnectionSchedule,
    };

    #[test]
    fn should_not_overflow_late_attempts() {
        let mut schedule = ExponentialReconnectionSchedule {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
            attempt: usize::MAX - 1,
        };

        for _ in 0..2 {
            let delay = schedule.next_delay().unwrap();
            assert!(delay >= Duration::from_secs(51) && delay <= Duration::from_secs(60));
        }
    }

    #[test]
    fn should_grow_exponential_delay_within_bounds() {
        let base_delay = Duration::from_millis(100);
        let max_delay = Duration::from_secs(2);
        let mut schedule =
            ExponentialReconnectionPolicy::new(base_delay, max_delay).new_node_schedule();

        let delays: Vec<_> = (0..12).filter_map(|_| schedule.next_delay()).collect();

        assert_eq!(delays.len(), 12);
        assert!(delays
            .iter()
            .all(|delay| *delay >= base_delay && *delay <= max_delay));
        assert!(delays[3] > delays[0]);
        assert!(delays[11] >= Duration::from_millis(1700));
    }

    #[test]
    fn should_give_up_after_max_attempts() {
        let mut schedule =
            ExponentialReconnectionPolicy::new(Duration::from_millis(10), Duration::from_secs(1))
                .with_max_attempts(2)
                .new_node_schedule();

        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_none());
    }

    #[test]
    fn should_schedule_constant_delays() {
        let mut schedule = ConstantReconnectionPolicy::new(Duration::from_secs(3))
            .with_max_attempts(2)
            .new_node_schedule();

        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn should_never_schedule_reconnection() {
        assert!(NeverReconnectionPolicy
            .new_node_schedule()
            .next_delay()
            .is_none());
    }
}

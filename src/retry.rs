//! Bounded retry and polling schedules.
//!
//! Both types are plain state machines: callers pass in the current instant
//! and get back how long to wait, so they can be driven by a simulated clock
//! in tests and by `tokio::time` in production.

use std::time::Duration;

use tokio::time::Instant;

/// Default number of attempts for a single provider request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default first retry delay.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Default upper bound on a single retry delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Default initial interval between action polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default upper bound on the interval between action polls.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default bound on a whole engine operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);
/// Shortest interval a schedule hands out between polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Deadline used when a timeout does not fit the clock, roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Exponential backoff applied to transient provider failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay, including provider hints.
    pub cap: Duration,
}

impl RetryPolicy {
    /// Returns the attempt budget, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }

    /// Delay before retrying after `attempt` (1-based) failed.
    ///
    /// A provider `Retry-After` hint wins over the computed backoff; both
    /// are clamped to [`RetryPolicy::cap`].
    #[must_use]
    pub fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hinted) = hint {
            return hinted.min(self.cap);
        }
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Interval and deadline settings for waiting on provider actions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// First interval between polls.
    pub interval: Duration,
    /// Largest interval the schedule backs off to.
    pub max_interval: Duration,
    /// Total time an operation may spend waiting.
    pub timeout: Duration,
}

impl PollSettings {
    /// Starts a schedule whose deadline is `timeout` after `now`.
    ///
    /// Intervals are raised to [`MIN_POLL_INTERVAL`]. A timeout too large
    /// for the clock is capped at a deadline decades away.
    #[must_use]
    pub fn start(&self, now: Instant) -> PollSchedule {
        let interval = self.interval.max(MIN_POLL_INTERVAL);
        let deadline = now
            .checked_add(self.timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        PollSchedule {
            deadline,
            next_interval: interval,
            max_interval: self.max_interval.max(interval),
            polls: 0,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_interval: DEFAULT_MAX_POLL_INTERVAL,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Deadline-bounded polling schedule with light backoff.
///
/// Each call to [`PollSchedule::next_wait`] consumes one poll. The interval
/// grows by half each time up to the configured maximum and is truncated so
/// the last wait ends exactly at the deadline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollSchedule {
    deadline: Instant,
    next_interval: Duration,
    max_interval: Duration,
    polls: u32,
}

impl PollSchedule {
    /// Returns how long to sleep before the next poll, or `None` once the
    /// deadline has passed.
    pub fn next_wait(&mut self, now: Instant) -> Option<Duration> {
        if now >= self.deadline {
            return None;
        }
        let wait = self.next_interval.min(self.deadline - now);
        self.polls = self.polls.saturating_add(1);
        self.next_interval = (self.next_interval + self.next_interval / 2).min(self.max_interval);
        Some(wait)
    }

    /// Number of polls handed out so far.
    #[must_use]
    pub const fn polls(&self) -> u32 {
        self.polls
    }

    /// Instant after which no further polls are scheduled.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }
}

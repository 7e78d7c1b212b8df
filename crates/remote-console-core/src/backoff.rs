//! Reconnect delay schedule.

use std::time::Duration;

use crate::ConnectionConfig;

/// Exponential backoff controller.
///
/// The current delay starts at the configured initial value, grows by the
/// multiplier after every wait, is clamped to the maximum, and snaps back to
/// the initial value on [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    /// Create a controller starting at `initial`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            current: initial,
        }
    }

    /// Create a controller from the retry settings of `config`.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(
            config.initial_retry_delay,
            config.max_retry_delay,
            config.backoff_multiplier,
        )
    }

    /// Delay to wait before the next connect attempt.
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to wait now and grow it for the following failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // Products too large for a Duration saturate at the max.
        self.current =
            Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
                .map_or(self.max, |next| next.min(self.max));
        delay
    }

    /// Restore the initial delay after a successful connect.
    pub const fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Remaining-time ticks for a wait of `total`, one per second.
///
/// `4.5s` yields `4.5, 3.5, 2.5, 1.5, 0.5`; each tick is followed by a sleep of
/// at most one second.
pub fn countdown(total: Duration) -> impl Iterator<Item = Duration> {
    std::iter::successors(Some(total), |remaining| {
        remaining
            .checked_sub(Duration::from_secs(1))
            .filter(|r| !r.is_zero())
    })
    .filter(|r| !r.is_zero())
}

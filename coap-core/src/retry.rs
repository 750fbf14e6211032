//! Jittered retry timing for CON retransmission and Observe CON refresh.
//!
//! Timestamps are plain [`Millis`](crate::time::Millis) rather than some
//! generic `Instant`, since the host is the sole owner of the clock (see
//! [`crate::time`]).

use rand::{Rng, SeedableRng};

use crate::time::Millis;

/// A number of attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

impl core::ops::Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Attempts) -> Attempts {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted; the retried operation should be
  /// considered failed.
  Cry,
  /// Not yet time to retry.
  Wait,
  /// A retry should be performed now.
  Retry,
}

/// Strategy to employ when retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Generate a random delay between `init_min` and `init_max` for the
  /// first retry, doubling on each subsequent attempt.
  ///
  /// This is RFC7252's retransmission contract: jittered initial timeout,
  /// exponential backoff.
  Exponential {
    /// Minimum (inclusive) delay before the first retry.
    init_min: Millis,
    /// Maximum (inclusive) delay before the first retry.
    init_max: Millis,
  },
  /// Generate a random delay between `min` and `max` and use it,
  /// unchanged, for every retry.
  Delay {
    /// Minimum (inclusive) delay between attempts.
    min: Millis,
    /// Maximum (inclusive) delay between attempts.
    max: Millis,
  },
}

impl Strategy {
  /// Are `min` and `max` equal? If so, the random draw can be skipped.
  pub fn has_jitter(&self) -> bool {
    let (min, max) = self.range();
    min != max
  }

  /// The min/max delay, inclusive.
  pub fn range(&self) -> (Millis, Millis) {
    match *self {
      | Self::Delay { min, max } => (min, max),
      | Self::Exponential { init_min, init_max } => (init_min, init_max),
    }
  }

  /// Total elapsed time if every attempt up to `max_attempts` fails.
  pub fn max_time(&self, max_attempts: Attempts) -> Millis {
    match self {
      | Self::Exponential { init_max, .. } => Self::total_delay_exp(*init_max, max_attempts.0),
      | Self::Delay { max, .. } => max.saturating_mul(max_attempts.0 as u64),
    }
  }

  /// Cumulative elapsed time, from the first retransmission's clock
  /// start, by which the `n`th retransmission should have fired. The
  /// interval *between* consecutive retransmissions doubles (`init,
  /// 2·init, 4·init, ...`), so the cumulative total is a geometric
  /// sum: attempt 1 -> `init`, attempt 2 -> `3·init`, attempt n ->
  /// `init*(2^n - 1)`.
  const fn total_delay_exp(init: Millis, attempt: u16) -> Millis {
    if attempt == 0 {
      0
    } else {
      init * (2u64.pow(attempt as u32) - 1)
    }
  }
}

/// A non-blocking timer implementing a fixed-delay or exponential-backoff
/// retry schedule, polled by the engine on every [`advance`](crate::engine::Engine::advance).
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  start: Millis,
  init: Millis,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl RetryTimer {
  /// Start a retry timer at `now`, seeding jitter from `now` itself so
  /// retries of concurrently-started operations don't lock step. The
  /// initial transmission is assumed to have already happened outside
  /// this timer; `attempts` counts only the retransmissions it arms,
  /// so `max_attempts` retransmissions happen before it gives up —
  /// matching RFC7252's `MAX_RETRANSMIT` (1 initial send + `MAX_RETRANSMIT`
  /// retries).
  pub fn new(now: Millis, strategy: Strategy, max_attempts: Attempts) -> Self {
    let init = if strategy.has_jitter() {
      let (min, max) = strategy.range();
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(now ^ (min << 32) ^ max);
      rng.gen_range(min..=max)
    } else {
      strategy.range().0
    };

    Self { start: now, init, strategy, attempts: Attempts(0), max_attempts }
  }

  /// Tell the timer an attempt just failed (or hasn't happened yet);
  /// it answers whether to retry now, wait, or give up.
  pub fn what_should_i_do(&mut self, now: Millis) -> YouShould {
    if self.attempts >= self.max_attempts {
      return YouShould::Cry;
    }

    if self.is_ready(now.saturating_sub(self.start), self.attempts.0 + 1) {
      self.attempts.0 += 1;
      YouShould::Retry
    } else {
      YouShould::Wait
    }
  }

  /// Has enough time passed for the given retransmission number
  /// (1-based: the first retry is retransmission 1)?
  pub fn is_ready(&self, elapsed: Millis, retransmission: u16) -> bool {
    if retransmission == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => elapsed >= self.init * retransmission as u64,
      | Strategy::Exponential { .. } => elapsed >= Strategy::total_delay_exp(self.init, retransmission),
    }
  }

  /// How many retransmissions have been sent so far.
  pub fn attempts(&self) -> Attempts {
    self.attempts
  }
}

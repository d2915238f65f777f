use std::{thread, time::Duration};

const FIRST_DELAY: Duration = Duration::from_micros(1);

/// Exponential sleep used when every shard is locked by another thread.
/// Starts at 1µs and doubles up to `max`.
#[derive(Debug)]
pub(crate) struct Backoff {
  attempts: u32,
  delay: Duration,
  max: Duration,
}

impl Backoff {
  pub(crate) fn new(max: Duration) -> Self {
    Self {
      attempts: 0,
      delay: FIRST_DELAY.min(max),
      max,
    }
  }

  /// Delay for the current attempt; moves to the next one.
  pub(crate) fn advance(&mut self) -> Duration {
    let delay = self.delay;
    self.attempts = self.attempts.saturating_add(1);
    self.delay = self.delay.saturating_mul(2).min(self.max);
    delay
  }

  pub(crate) fn snooze(&mut self) {
    let delay = self.advance();
    log::trace!("all shards contended, attempt {} sleeps {:?}", self.attempts, delay);
    thread::sleep(delay);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn doubles_then_caps() {
    let mut backoff = Backoff::new(Duration::from_micros(10));
    let delays: Vec<u128> = (0..6).map(|_| backoff.advance().as_micros()).collect();
    assert_eq!(delays, [1, 2, 4, 8, 10, 10]);
    assert_eq!(backoff.attempts, 6);
  }

  #[test]
  fn zero_cap_never_sleeps() {
    let mut backoff = Backoff::new(Duration::ZERO);
    assert_eq!(backoff.advance(), Duration::ZERO);
    assert_eq!(backoff.advance(), Duration::ZERO);
  }
}

//! [`DispatchPacer`] – minimum spacing between dispatch attempts.
//!
//! The downstream cloud API throttles bursty traffic with undocumented
//! limits and starts returning errors when writes arrive too close together.
//! The pacer converts that external failure mode into predictable local
//! backpressure: it tracks the timestamp of the most recent dispatch attempt
//! (success or failure alike) and refuses the next one until a fixed minimum
//! interval has elapsed.
//!
//! State is a single timestamp, not per-request: the spacing applies to the
//! dispatch loop as a whole, however deep the backlog.
//!
//! The API takes explicit [`Instant`]s so tests can drive the clock; the
//! async [`DispatchPacer::acquire`] helper sleeps on the Tokio clock and is
//! therefore exact under `tokio::time::pause`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Default minimum interval between the starts of consecutive dispatch
/// attempts.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(2);

/// Single-slot rate limiter for the dispatch loop.
#[derive(Debug)]
pub struct DispatchPacer {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
}

impl DispatchPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_dispatch: None,
        }
    }

    /// `true` when a dispatch attempt may start at `now`.
    pub fn may_dispatch(&self, now: Instant) -> bool {
        match self.last_dispatch {
            None => true,
            Some(last) => now.duration_since(last) >= self.min_interval,
        }
    }

    /// Time remaining at `now` until the next attempt is allowed, or `None`
    /// when dispatch is already permitted.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch?;
        let elapsed = now.duration_since(last);
        if elapsed >= self.min_interval {
            None
        } else {
            Some(self.min_interval - elapsed)
        }
    }

    /// Record that a dispatch attempt started at `now`, regardless of its
    /// eventual outcome.
    pub fn record_dispatch(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }

    /// Sleep until the limiter clears, then record the new attempt.
    pub async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            match self.remaining(now) {
                None => {
                    self.record_dispatch(now);
                    return;
                }
                Some(wait) => {
                    trace!(wait_ms = wait.as_millis() as u64, "pacing dispatch");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl Default for DispatchPacer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

use std::time::Duration;

use tracing::trace;

use crate::monitor::State;
use crate::{Clock, Monitor, RateLimited};

/// Shortest time a limiter waits for the next sample, so that scheduling
/// jitter around a sample boundary does not turn into a busy loop.
pub const MIN_WAIT: Duration = Duration::from_millis(5);

impl<C: Clock> Monitor<C> {
    /// Restricts the instantaneous (per-sample) flow to `rate` bytes per
    /// second.
    ///
    /// Returns how many bytes (`0 <= n <= want`) may be transferred right now
    /// without exceeding the limit. With `block == true` the call waits for
    /// the next sample until `n > 0`. `want` is returned unmodified if
    /// `want == 0`, `rate == 0` (unlimited), or the monitor is finalized,
    /// including when it gets finalized while this call is waiting.
    ///
    /// At least one byte is allowed in every sampling period. With the
    /// default 100ms period the lowest achievable rate is therefore 10 bytes
    /// per second, whatever `rate` says.
    ///
    /// The caller must report the bytes actually transferred through
    /// [`update`](Self::update).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flowmeter::Monitor;
    ///
    /// let monitor = Monitor::new();
    /// // 10kB/s over a 100ms sample is a 1000 byte budget
    /// let n = monitor.limit(4096, 10_000, false);
    /// assert_eq!(1000, n);
    /// monitor.update(n);
    /// assert_eq!(0, monitor.limit(4096, 10_000, false));
    /// ```
    pub fn limit(&self, want: usize, rate: u64, block: bool) -> usize {
        if want < 1 || rate < 1 {
            return want;
        }
        let budget = self.budget(rate);
        let mut state = self.lock();
        let mut now = self.record(&mut state, 0);
        if block {
            while state.active && state.pending >= budget {
                let boundary = state.last_boundary;
                // wait until the sample in progress is closed
                while state.active && state.last_boundary == boundary {
                    let nap = self.time_to_next_sample(&state, now);
                    trace!(?nap, "waiting for the next sample");
                    state = self
                        .next_sample
                        .wait_timeout(state, nap)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0;
                    now = self.record(&mut state, 0);
                }
            }
        }
        if !state.active {
            return want;
        }
        Self::remaining(&state, budget, want)
    }

    /// Non-blocking variant of [`limit`](Self::limit).
    ///
    /// Returns `Ok(n)` with `n > 0` when `want > 0` and some quota is left
    /// (or no limit applies), and [`RateLimited`] with the time left in the
    /// current sample otherwise.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flowmeter::Monitor;
    ///
    /// let monitor = Monitor::new();
    /// monitor.update(monitor.limit(100, 10, false));
    /// let limited = monitor.try_limit(100, 10).unwrap_err();
    /// assert!(limited.retry_after() <= monitor.sample_period());
    /// ```
    pub fn try_limit(&self, want: usize, rate: u64) -> Result<usize, RateLimited> {
        if want < 1 || rate < 1 {
            return Ok(want);
        }
        let budget = self.budget(rate);
        let mut state = self.lock();
        let now = self.record(&mut state, 0);
        if !state.active {
            return Ok(want);
        }
        match Self::remaining(&state, budget, want) {
            0 => Err(RateLimited {
                retry_after: self.time_to_next_sample(&state, now),
            }),
            n => Ok(n),
        }
    }

    /// Bytes allowed per sample at `rate`, never less than one.
    fn budget(&self, rate: u64) -> u64 {
        let budget = (rate as f64 * self.sample_period.as_secs_f64()).round() as u64;
        budget.max(1)
    }

    fn remaining(state: &State, budget: u64, want: usize) -> usize {
        let left = budget.saturating_sub(state.pending);
        usize::try_from(left).map_or(want, |left| left.min(want))
    }

    fn time_to_next_sample(&self, state: &State, now: Duration) -> Duration {
        (state.last_boundary + self.sample_period)
            .saturating_sub(now)
            .max(MIN_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::{Config, ManualClock};

    const PERIOD: Duration = Duration::from_millis(100);

    fn manual() -> (Arc<ManualClock>, Monitor<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::default());
        let monitor = Monitor::with_clock(
            Config::new(PERIOD, Duration::from_secs(1)),
            Arc::clone(&clock),
        );
        (clock, monitor)
    }

    #[test]
    fn passthrough() {
        let (_clock, monitor) = manual();
        assert_eq!(0, monitor.limit(0, 1000, true));
        assert_eq!(5000, monitor.limit(5000, 0, true));
        assert_eq!(Ok(5000), monitor.try_limit(5000, 0));
        assert_eq!(Ok(0), monitor.try_limit(0, 10));

        monitor.update(10_000);
        monitor.finalize();
        // never blocks a finished transfer
        assert_eq!(5000, monitor.limit(5000, 1, true));
        assert_eq!(Ok(5000), monitor.try_limit(5000, 1));
    }

    #[test]
    fn never_exceeds_want() {
        let (clock, monitor) = manual();
        for want in [1usize, 7, 99, 100, 101, 4096] {
            for rate in [1u64, 10, 1000, 1_000_000] {
                let n = monitor.limit(want, rate, false);
                assert!(n <= want, "limit({want}, {rate}) = {n}");
            }
            clock.advance(PERIOD);
        }
    }

    #[test]
    fn allowances_within_one_period_respect_budget() {
        let (clock, monitor) = manual();
        // 2500B/s over 100ms is a 250 byte budget
        let mut allowed = 0;
        for _ in 0..20 {
            let n = monitor.limit(64, 2500, false);
            monitor.update(n);
            allowed += n;
        }
        assert_eq!(250, allowed);
        assert_eq!(0, monitor.limit(64, 2500, false));

        // the next sample frees the whole budget again
        clock.advance(PERIOD);
        assert_eq!(64, monitor.limit(64, 2500, false));
        assert_eq!(250, monitor.limit(1000, 2500, false));
    }

    #[test]
    fn one_byte_floor() {
        let (clock, monitor) = manual();
        // 10B/s * 100ms rounds to a single byte per sample
        for _ in 0..5 {
            let n = monitor.limit(1000, 10, false);
            assert_eq!(1, n);
            monitor.update(n);
            assert_eq!(0, monitor.limit(1000, 10, false));
            assert_eq!(0, monitor.limit(1000, 10, false));
            clock.advance(PERIOD);
        }
        // even 1B/s gets one byte per sample
        assert_eq!(1, monitor.limit(1000, 1, false));
    }

    #[test]
    fn try_limit_reports_retry_delay() {
        let (clock, monitor) = manual();
        monitor.update(monitor.limit(10, 10, false));
        let limited = monitor.try_limit(10, 10).unwrap_err();
        assert_eq!(PERIOD, limited.retry_after());

        clock.advance(Duration::from_millis(60));
        let limited = monitor.try_limit(10, 10).unwrap_err();
        assert_eq!(Duration::from_millis(40), limited.retry_after());

        // right at the boundary the sample rolls over instead
        clock.advance(Duration::from_millis(40));
        assert_eq!(Ok(1), monitor.try_limit(10, 10));
    }

    #[test]
    fn retry_delay_has_a_floor() {
        let (clock, monitor) = manual();
        monitor.update(1);
        clock.advance(Duration::from_millis(99));
        // the ticker reads 80ms, 20ms left
        assert_eq!(
            Duration::from_millis(20),
            monitor.try_limit(1, 1).unwrap_err().retry_after()
        );
        let state = monitor.lock();
        let past_boundary = state.last_boundary + PERIOD + Duration::from_millis(1);
        assert_eq!(MIN_WAIT, monitor.time_to_next_sample(&state, past_boundary));
    }

    #[test]
    fn blocking_waits_for_next_sample() {
        let (clock, monitor) = manual();
        monitor.update(monitor.limit(10, 10, false));
        let done = AtomicBool::new(false);
        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let n = monitor.limit(10, 10, true);
                done.store(true, Ordering::SeqCst);
                n
            });
            std::thread::sleep(Duration::from_millis(30));
            assert!(!done.load(Ordering::SeqCst));
            clock.advance(PERIOD);
            assert_eq!(1, waiter.join().unwrap());
        });
        assert_eq!(1, monitor.snapshot().samples);
    }

    #[test]
    fn finalize_releases_blocked_callers() {
        let (_clock, monitor) = manual();
        monitor.update(monitor.limit(10, 10, false));
        std::thread::scope(|s| {
            let waiters: Vec<_> = (0..3)
                .map(|_| s.spawn(|| monitor.limit(10, 10, true)))
                .collect();
            std::thread::sleep(Duration::from_millis(30));
            // the clock never moves, only finalize can release them
            monitor.finalize();
            for waiter in waiters {
                assert_eq!(10, waiter.join().unwrap());
            }
        });
    }

    #[test]
    fn blocked_caller_does_not_starve_others() {
        let (clock, monitor) = manual();
        monitor.update(monitor.limit(10, 10, false));
        std::thread::scope(|s| {
            let waiter = s.spawn(|| monitor.limit(10, 10, true));
            std::thread::sleep(Duration::from_millis(20));
            // the lock is free while the waiter sleeps
            assert!(monitor.snapshot().active);
            monitor.update(0);
            clock.advance(PERIOD);
            monitor.update(0);
            assert_eq!(1, waiter.join().unwrap());
        });
    }

    #[test]
    fn blocking_with_real_clock() {
        let monitor = Monitor::new();
        let start = std::time::Instant::now();
        let mut moved = 0;
        // 200B/s, 20 bytes per 100ms sample
        while moved < 50 {
            moved += monitor.update(monitor.limit(50 - moved, 200, true));
        }
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(50, monitor.finalize());
    }
}

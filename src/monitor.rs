use std::io;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use likely_stable::unlikely;
use tracing::{debug, trace};

use crate::clock::Ticker;
use crate::status::round_rate;
use crate::{Clock, Config, Status, StdClock};

/// Monitors and limits the transfer rate of a data stream.
///
/// Bytes reported through [`update`](Self::update) accumulate in the current
/// sample. Once a whole sampling period has elapsed the sample is closed
/// ("rolled over"): its byte count becomes the instantaneous rate, which also
/// feeds an exponential moving average and the peak rate.
///
/// Rollovers only happen while the monitor is being called, so `update` must
/// be invoked after every I/O attempt, including the ones that moved zero
/// bytes.
///
/// All state sits behind a single lock, so a monitor can be shared between
/// threads (usually in an [`Arc`](std::sync::Arc)) and queried while a
/// transfer is running.
///
/// # Examples
///
/// ```rust
/// use flowmeter::Monitor;
///
/// let monitor = Monitor::new();
/// for chunk in [b"hello".as_slice(), b" world".as_slice()] {
///     // ... send the chunk somewhere ...
///     monitor.update(chunk.len());
/// }
/// assert_eq!(11, monitor.finalize());
/// assert!(!monitor.snapshot().active);
/// ```
pub struct Monitor<C = StdClock> {
    state: Mutex<State>,
    /// Signalled on every rollover and on finalize.
    pub(crate) next_sample: Condvar,
    pub(crate) ticker: Ticker<C>,
    pub(crate) sample_period: Duration,
    window: f64,
}

pub(crate) struct State {
    pub active: bool,
    start: Duration,
    bytes: u64,
    samples: u64,

    inst_rate: f64,
    ema_rate: f64,
    peak_rate: f64,

    /// Bytes transferred since `last_boundary`.
    pub pending: u64,
    /// Start of the current sample (finalize time once inactive).
    pub last_boundary: Duration,
}

impl Monitor<StdClock> {
    /// Creates a monitor with the default 100ms sampling period and 1s
    /// averaging window.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a monitor with the given sampling configuration.
    pub fn with_config(config: Config) -> Self {
        Self::with_clock(config, StdClock::default())
    }
}

impl Default for Monitor<StdClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Monitor<C> {
    /// Creates a monitor driven by a custom clock.
    ///
    /// Use this with [`ManualClock`](crate::ManualClock) for deterministic
    /// tests, or with one of the quanta clocks on hot paths.
    pub fn with_clock(config: Config, clock: C) -> Self {
        let sample_period = config.effective_sample_period();
        let window = config.effective_window();
        let ticker = Ticker::new(clock);
        let now = ticker.now();
        debug!(?sample_period, ?window, "creating transfer monitor");
        Self {
            state: Mutex::new(State {
                active: true,
                start: now,
                bytes: 0,
                samples: 0,
                inst_rate: 0.0,
                ema_rate: 0.0,
                peak_rate: 0.0,
                pending: 0,
                last_boundary: now,
            }),
            next_sample: Condvar::new(),
            ticker,
            sample_period,
            window: window.as_secs_f64(),
        }
    }

    /// Records the transfer of `n` bytes and returns `n`.
    ///
    /// Call it after each read or write, even if `n` is 0. Does nothing once
    /// the monitor is finalized.
    pub fn update(&self, n: usize) -> usize {
        let mut state = self.lock();
        self.record(&mut state, n as u64);
        n
    }

    /// Records the outcome of a read or write and returns it unmodified.
    ///
    /// Errors count as a zero-byte transfer so that sampling keeps going.
    pub fn io(&self, result: io::Result<usize>) -> io::Result<usize> {
        self.update(*result.as_ref().unwrap_or(&0));
        result
    }

    /// Marks the transfer as finished and returns the total number of bytes
    /// transferred.
    ///
    /// Bytes still pending in the current sample are folded in first. After
    /// this call instantaneous and current rates read as zero, `update` does
    /// nothing and every limiter call passes through, which also releases
    /// callers blocked in [`limit`](Self::limit). Calling it again returns
    /// the same total and changes nothing.
    pub fn finalize(&self) -> u64 {
        let mut state = self.lock();
        if !state.active {
            return state.bytes;
        }
        let now = self.record(&mut state, 0);
        if state.pending > 0 {
            self.rollover(&mut state, now);
        }
        state.active = false;
        state.last_boundary = now;
        debug!(
            bytes = state.bytes,
            samples = state.samples,
            "transfer finished"
        );
        let bytes = state.bytes;
        drop(state);
        self.next_sample.notify_all();
        bytes
    }

    /// Returns the current transfer status.
    ///
    /// Completes the current sample first if its period has elapsed, so the
    /// rates are as fresh as the sampling allows. The values stay fixed once
    /// the monitor is finalized.
    pub fn snapshot(&self) -> Status {
        let mut state = self.lock();
        self.record(&mut state, 0);
        let duration = state.last_boundary.saturating_sub(state.start);
        let mut status = Status {
            active: state.active,
            start: self.ticker.to_system_time(state.start),
            duration,
            bytes: state.bytes,
            samples: state.samples,
            inst_rate: 0,
            cur_rate: 0,
            avg_rate: 0,
            peak_rate: round_rate(state.peak_rate),
        };
        if state.active {
            status.inst_rate = round_rate(state.inst_rate);
            status.cur_rate = round_rate(state.ema_rate);
        }
        drop(state);
        if !duration.is_zero() {
            status.avg_rate = round_rate(status.bytes as f64 / duration.as_secs_f64());
        }
        status
    }

    /// Whether [`finalize`](Self::finalize) has not been called yet.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// The sampling period, a whole number of [`TICK`](crate::TICK)s.
    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// The averaging window of the current rate.
    pub fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        // the state is a handful of counters, a panic elsewhere cannot leave
        // it half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `n` bytes to the current sample and closes the sample if its
    /// period has elapsed. Returns the current time, or the frozen stop time
    /// of an inactive monitor.
    pub(crate) fn record(&self, state: &mut State, n: u64) -> Duration {
        if unlikely(!state.active) {
            return state.last_boundary;
        }
        let now = self.ticker.now();
        state.pending = state.pending.saturating_add(n);
        if now.saturating_sub(state.last_boundary) >= self.sample_period {
            self.rollover(state, now);
        }
        now
    }

    fn rollover(&self, state: &mut State, now: Duration) {
        let elapsed = now.saturating_sub(state.last_boundary);
        if !elapsed.is_zero() {
            let t = elapsed.as_secs_f64();
            state.inst_rate = state.pending as f64 / t;
            state.peak_rate = state.peak_rate.max(state.inst_rate);
            // Same decay as the *nix load average: the longer the sample,
            // the less the previous estimate counts.
            if state.samples > 0 {
                let w = (-t / self.window).exp();
                state.ema_rate = state.inst_rate * (1.0 - w) + state.ema_rate * w;
            } else {
                state.ema_rate = state.inst_rate;
            }
            trace!(
                bytes = state.pending,
                seconds = t,
                inst_rate = state.inst_rate,
                ema_rate = state.ema_rate,
                "sample complete"
            );
        }
        state.bytes = state.bytes.saturating_add(state.pending);
        state.samples += 1;
        state.pending = 0;
        state.last_boundary = now;
        self.next_sample.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ManualClock;

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
    fn defaults() {
        let monitor = Monitor::new();
        assert_eq!(Duration::from_millis(100), monitor.sample_period());
        assert_eq!(Duration::from_secs(1), monitor.window());
        assert!(monitor.is_active());
        let status = monitor.snapshot();
        assert!(status.active);
        assert_eq!(0, status.bytes);
        assert_eq!(0, status.samples);
        assert_eq!(0, status.inst_rate);
        assert_eq!(0, status.cur_rate);
    }

    #[test]
    fn totals_change_only_at_rollover() {
        let (clock, monitor) = manual();
        assert_eq!(300, monitor.update(300));
        assert_eq!(0, monitor.update(0));
        clock.advance(Duration::from_millis(60));
        monitor.update(200);
        // still inside the first sample
        let status = monitor.snapshot();
        assert_eq!(0, status.bytes);
        assert_eq!(0, status.samples);
        assert_eq!(0, status.inst_rate);

        clock.advance(Duration::from_millis(40));
        let status = monitor.snapshot();
        assert_eq!(500, status.bytes);
        assert_eq!(1, status.samples);
        assert_eq!(5000, status.inst_rate);
        assert_eq!(PERIOD, status.duration);
        assert_eq!(5000, status.avg_rate);
    }

    #[test]
    fn ema_seeding_and_decay() {
        let (clock, monitor) = manual();
        monitor.update(1000);
        clock.advance(PERIOD);
        let status = monitor.snapshot();
        assert_eq!(10_000, status.inst_rate);
        assert_eq!(10_000, status.cur_rate);

        monitor.update(500);
        clock.advance(PERIOD);
        let status = monitor.snapshot();
        assert_eq!(5000, status.inst_rate);
        let w = (-0.1f64).exp();
        let expected = 5000.0 * (1.0 - w) + 10_000.0 * w;
        assert_eq!(expected.round() as u64, status.cur_rate);
        assert_eq!(9524, status.cur_rate);
        assert_eq!(10_000, status.peak_rate);
        assert_eq!(1500, status.bytes);
        assert_eq!(7500, status.avg_rate);
    }

    #[test]
    fn long_gap_lets_new_sample_dominate() {
        let (clock, monitor) = manual();
        monitor.update(1000);
        clock.advance(PERIOD);
        monitor.update(0);
        // nothing for ten seconds, then one quiet sample
        clock.advance(Duration::from_secs(10));
        monitor.update(100);
        let status = monitor.snapshot();
        assert_eq!(2, status.samples);
        assert_eq!(10, status.inst_rate);
        // exp(-10) of the old 10kB/s estimate is ~0.45B/s
        assert_eq!(10, status.cur_rate);
    }

    #[test]
    fn peak_is_non_decreasing() {
        let (clock, monitor) = manual();
        let mut last_peak = 0;
        for n in [100, 800, 50, 0, 400, 900, 10] {
            monitor.update(n);
            clock.advance(PERIOD);
            let status = monitor.snapshot();
            assert!(status.peak_rate >= last_peak);
            assert!(status.peak_rate >= status.inst_rate);
            last_peak = status.peak_rate;
        }
        assert_eq!(9000, last_peak);
    }

    #[test]
    fn finalize_folds_pending_bytes() {
        let (clock, monitor) = manual();
        monitor.update(1000);
        clock.advance(PERIOD);
        monitor.update(0);
        monitor.update(250);
        clock.advance(Duration::from_millis(50));
        assert_eq!(1250, monitor.finalize());

        let status = monitor.snapshot();
        assert!(!status.active);
        assert_eq!(1250, status.bytes);
        assert_eq!(2, status.samples);
        assert_eq!(0, status.inst_rate);
        assert_eq!(0, status.cur_rate);
        assert_eq!(Duration::from_millis(140), status.duration);
        // the ticker truncated 150ms to 140ms, so the final sample covered
        // 40ms at 6250B/s, below the first sample's rate
        assert_eq!(10_000, status.peak_rate);
    }

    #[test]
    fn finalize_in_same_tick_keeps_bytes() {
        let (_clock, monitor) = manual();
        monitor.update(42);
        assert_eq!(42, monitor.finalize());
        let status = monitor.snapshot();
        assert_eq!(42, status.bytes);
        assert_eq!(1, status.samples);
        assert_eq!(0, status.peak_rate);
        assert_eq!(Duration::ZERO, status.duration);
        assert_eq!(0, status.avg_rate);
    }

    #[test]
    fn finalize_is_idempotent() {
        let (clock, monitor) = manual();
        monitor.update(700);
        clock.advance(PERIOD);
        let total = monitor.finalize();
        let first = monitor.snapshot();

        clock.advance(Duration::from_secs(5));
        assert_eq!(total, monitor.finalize());
        assert_eq!(0, monitor.update(0));
        assert_eq!(100, monitor.update(100));
        assert_eq!(first, monitor.snapshot());
        assert!(!monitor.is_active());
    }

    #[test]
    fn snapshot_is_detached() {
        let (clock, monitor) = manual();
        monitor.update(100);
        clock.advance(PERIOD);
        let before = monitor.snapshot();
        monitor.update(100);
        clock.advance(PERIOD);
        monitor.finalize();
        assert!(before.active);
        assert_eq!(100, before.bytes);
        assert_eq!(1000, before.inst_rate);
    }

    #[test]
    fn io_records_results() {
        let (clock, monitor) = manual();
        assert_eq!(10, monitor.io(Ok(10)).unwrap());
        let err = monitor
            .io(Err(io::Error::from(io::ErrorKind::TimedOut)))
            .unwrap_err();
        assert_eq!(io::ErrorKind::TimedOut, err.kind());
        clock.advance(PERIOD);
        assert_eq!(10, monitor.snapshot().bytes);
    }

    #[test]
    fn concurrent_updates() {
        let (clock, monitor) = manual();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for i in 0..2000 {
                        monitor.update(3);
                        if i % 500 == 0 {
                            let _ = monitor.snapshot();
                        }
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..20 {
                    clock.advance(Duration::from_millis(30));
                    monitor.update(0);
                }
            });
        });
        assert_eq!(4 * 2000 * 3, monitor.finalize());
    }
}

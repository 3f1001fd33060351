use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

/// Resolution of the [`Ticker`]. Every timestamp the monitor works with is a
/// whole multiple of this value.
pub const TICK: Duration = Duration::from_millis(20);

const TICK_NANOS: u128 = TICK.as_nanos();

/// Trait for monotonic clock implementations used by a [`Monitor`](crate::Monitor).
///
/// Implementations must provide monotonic time that never goes backwards.
pub trait Clock {
    /// Returns the time elapsed since an arbitrary, fixed origin.
    ///
    /// The returned value must be monotonic (never decrease).
    fn now(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Standard clock implementation using [`std::time::Instant`].
///
/// # Examples
///
/// ```rust
/// use flowmeter::{Config, Monitor, StdClock};
///
/// let monitor = Monitor::with_clock(Config::default(), StdClock::default());
/// assert!(monitor.is_active());
/// ```
#[derive(Clone)]
pub struct StdClock {
    origin: std::time::Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock implementation backed by the `quanta` crate.
///
/// Requires the "quanta" feature to be enabled.
#[cfg(feature = "quanta")]
#[derive(Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    origin: quanta::Instant,
}

#[cfg(feature = "quanta")]
impl Default for QuantaClock {
    fn default() -> Self {
        Self::new(quanta::Clock::new())
    }
}

#[cfg(feature = "quanta")]
impl QuantaClock {
    /// Creates a new `QuantaClock` from a `quanta::Clock` instance.
    pub fn new(clock: quanta::Clock) -> Self {
        let origin = clock.now();
        Self { clock, origin }
    }
}

#[cfg(feature = "quanta")]
impl Clock for QuantaClock {
    fn now(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.origin)
    }
}

/// Low overhead clock using quanta's coarse (recent) time.
///
/// The monitor truncates time to [`TICK`] anyway, so an upkeep thread running
/// at a fraction of the tick is precise enough while making every query on
/// the I/O path a single atomic load. Requires the "quanta" feature.
///
/// # Examples
///
/// ```rust
/// # #[cfg(feature = "quanta")]
/// # {
/// use std::time::Duration;
/// use flowmeter::{Config, FastClock, Monitor};
///
/// let clock = quanta::Clock::new();
/// let _upkeep = quanta::Upkeep::new_with_clock(Duration::from_millis(1), clock.clone())
///     .start()
///     .unwrap();
/// let monitor = Monitor::with_clock(Config::default(), FastClock::new(clock));
/// # }
/// ```
#[cfg(feature = "quanta")]
#[derive(Clone)]
pub struct FastClock {
    clock: quanta::Clock,
    origin: quanta::Instant,
}

#[cfg(feature = "quanta")]
impl Default for FastClock {
    fn default() -> Self {
        Self::new(quanta::Clock::new())
    }
}

#[cfg(feature = "quanta")]
impl FastClock {
    /// Creates a new `FastClock` from a `quanta::Clock` instance.
    ///
    /// **Important**: Ensure the clock's upkeep thread is running, otherwise
    /// the monitor will never observe time passing and no sample will ever
    /// complete.
    pub fn new(clock: quanta::Clock) -> Self {
        let origin = clock.recent();
        Self { clock, origin }
    }
}

#[cfg(feature = "quanta")]
impl Clock for FastClock {
    fn now(&self) -> Duration {
        self.clock.recent().saturating_duration_since(self.origin)
    }
}

/// Clock following [`tokio::time::Instant`], including paused and
/// auto-advanced test time. Requires the "tokio" feature.
#[cfg(feature = "tokio")]
#[derive(Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

#[cfg(feature = "tokio")]
impl Default for TokioClock {
    fn default() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

#[cfg(feature = "tokio")]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manual clock implementation for testing and simulation.
///
/// Allows precise control over time progression. The clock is thread-safe
/// and can be shared with a monitor through an [`Arc`] or a reference.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use flowmeter::{Config, ManualClock, Monitor};
///
/// let clock = Arc::new(ManualClock::default());
/// let monitor = Monitor::with_clock(Config::default(), Arc::clone(&clock));
///
/// monitor.update(1000);
/// clock.advance(Duration::from_millis(100));
/// assert_eq!(10_000, monitor.snapshot().inst_rate);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a new manual clock starting at the specified time.
    pub fn new(now: Duration) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Sets the current time to the specified value.
    pub fn set(&self, now: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Advances the current time by the specified duration.
    pub fn advance(&self, delta: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A [`Clock`] viewed at [`TICK`] resolution.
///
/// Truncating every reading keeps sample boundaries exactly comparable across
/// calls and lets cheap coarse clocks drive the monitor.
#[derive(Clone)]
pub(crate) struct Ticker<C> {
    clock: C,
    wall_origin: SystemTime,
}

impl<C: Clock> Ticker<C> {
    pub fn new(clock: C) -> Self {
        let wall_now = SystemTime::now();
        let wall_origin = wall_now.checked_sub(clock.now()).unwrap_or(wall_now);
        Self { clock, wall_origin }
    }

    /// Current time, truncated to a whole tick.
    pub fn now(&self) -> Duration {
        truncate(self.clock.now())
    }

    /// Converts a ticker timestamp to wall-clock time.
    pub fn to_system_time(&self, at: Duration) -> SystemTime {
        self.wall_origin + at
    }
}

fn truncate(d: Duration) -> Duration {
    from_ticks(d.as_nanos() / TICK_NANOS)
}

fn from_ticks(ticks: u128) -> Duration {
    let nanos = ticks.saturating_mul(TICK_NANOS);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Rounds `d` to the nearest multiple of [`TICK`]. Any non-zero duration maps
/// to at least one tick; zero stays zero.
pub(crate) fn round_to_tick(d: Duration) -> Duration {
    if d.is_zero() {
        return Duration::ZERO;
    }
    let ticks = (d.as_nanos() + TICK_NANOS / 2) / TICK_NANOS;
    from_ticks(ticks.max(1))
}

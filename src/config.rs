use std::time::Duration;

use crate::clock::round_to_tick;

/// Sampling period used when none (or zero) is configured.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_millis(100);
/// EMA window used when none (or zero) is configured.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Sampling configuration of a [`Monitor`](crate::Monitor).
///
/// The instantaneous rate is measured once per `sample_period`. `window` is
/// the time constant of the exponential moving average: a sample covering
/// `t` seconds keeps `exp(-t / window)` of the previous estimate.
///
/// Zero values select the defaults (100ms and 1s). Non-zero sample periods
/// are rounded to the nearest [`TICK`](crate::TICK) when the monitor is
/// built.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use flowmeter::Config;
///
/// let config = Config::default()
///     .with_sample_period(Duration::from_millis(250))
///     .with_window(Duration::from_secs(5));
/// assert_eq!(Duration::from_millis(260), config.effective_sample_period());
/// assert_eq!(Duration::from_secs(5), config.effective_window());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    pub sample_period: Duration,
    pub window: Duration,
}

impl Config {
    pub const fn new(sample_period: Duration, window: Duration) -> Self {
        Self {
            sample_period,
            window,
        }
    }

    pub const fn with_sample_period(mut self, sample_period: Duration) -> Self {
        self.sample_period = sample_period;
        self
    }

    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// The sampling period a monitor built from this config will use.
    pub fn effective_sample_period(&self) -> Duration {
        if self.sample_period.is_zero() {
            DEFAULT_SAMPLE_PERIOD
        } else {
            round_to_tick(self.sample_period)
        }
    }

    /// The EMA window a monitor built from this config will use.
    pub fn effective_window(&self) -> Duration {
        if self.window.is_zero() {
            DEFAULT_WINDOW
        } else {
            self.window
        }
    }
}

use std::time::{Duration, SystemTime};

/// Point-in-time status of a [`Monitor`](crate::Monitor).
///
/// All transfer rates are in bytes per second, rounded to the nearest byte.
/// A `Status` is a copy: it stays valid and unchanged after the monitor is
/// updated or finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Status {
    /// Whether the transfer is still in progress.
    pub active: bool,
    /// Wall-clock time the transfer started.
    pub start: SystemTime,
    /// Time period covered by the statistics.
    pub duration: Duration,
    /// Total number of bytes transferred in completed samples.
    pub bytes: u64,
    /// Total number of completed samples.
    pub samples: u64,
    /// Rate of the most recent sample. Zero once inactive.
    pub inst_rate: u64,
    /// Exponential moving average of `inst_rate`. Zero once inactive.
    pub cur_rate: u64,
    /// `bytes / duration`.
    pub avg_rate: u64,
    /// Highest `inst_rate` observed.
    pub peak_rate: u64,
}

/// Rounds a non-negative rate half away from zero.
pub(crate) fn round_rate(rate: f64) -> u64 {
    // `as` saturates, NaN maps to zero
    rate.round() as u64
}

#![doc = include_str!("../README.md")]
//!
//! # Core Components
//!
//! - [`Monitor`] - Measures a transfer's instantaneous, current (EMA), average and peak rates
//! - [`Monitor::limit`] - Caps the per-sample transfer rate, optionally blocking the caller
//! - [`Status`] - Point-in-time snapshot of a monitor
//! - [`Clock`] trait and implementations for time sources
//! - [`io`] - Rate-limited `std::io` readers and writers
//! - `futures` - Rate-limited tokio readers and writers (feature "async")
//!
//! # Quick Start
//!
//! ```rust
//! use std::io::Write;
//!
//! use flowmeter::io::Writer;
//!
//! // 1 MB/s ceiling on top of any `Write`
//! let mut writer = Writer::new(Vec::<u8>::new(), 1_000_000);
//! writer.write_all(b"some payload").unwrap();
//!
//! let status = writer.monitor().snapshot();
//! println!("{} bytes at {} B/s", status.bytes, status.cur_rate);
//! assert_eq!(12, writer.finish().len());
//! ```

mod clock;
mod config;
mod error;
#[cfg(feature = "async")]
pub mod futures;
pub mod io;
mod limiter;
mod monitor;
mod status;

#[cfg(feature = "tokio")]
pub use clock::TokioClock;
pub use clock::{Clock, ManualClock, StdClock, TICK};
#[cfg(feature = "quanta")]
pub use clock::{FastClock, QuantaClock};
pub use config::{Config, DEFAULT_SAMPLE_PERIOD, DEFAULT_WINDOW};
pub use error::*;
#[cfg(feature = "async")]
pub use futures::RateLimitedIoExt;
pub use limiter::MIN_WAIT;
pub use monitor::Monitor;
pub use status::Status;

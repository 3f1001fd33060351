//! Async counterparts of the limiter and the stream adapters, driven by
//! tokio timers instead of blocked threads.

mod io;
mod timer;

pub use io::{AsyncReader, AsyncWriter};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Clock, Monitor};

impl<C: Clock> Monitor<C> {
    /// Async variant of [`limit`](Monitor::limit) with `block == true`.
    ///
    /// Sleeps on a tokio timer until the next sample whenever the quota is
    /// used up. A monitor finalized while this future sleeps is noticed at
    /// the next wake-up, at most one sampling period later, and `want` is
    /// returned.
    pub async fn limit_async(&self, want: usize, rate: u64) -> usize {
        loop {
            match self.try_limit(want, rate) {
                Ok(n) => return n,
                Err(limited) => timer::sleep(limited.retry_after()).await,
            }
        }
    }
}

/// Wraps any tokio reader or writer in a rate-limited adapter.
pub trait RateLimitedIoExt: Sized {
    fn rate_limited_reader(self, rate: u64) -> AsyncReader<Self>
    where
        Self: AsyncRead,
    {
        AsyncReader::new(self, rate)
    }

    fn rate_limited_writer(self, rate: u64) -> AsyncWriter<Self>
    where
        Self: AsyncWrite,
    {
        AsyncWriter::new(self, rate)
    }
}

impl<T> RateLimitedIoExt for T {}

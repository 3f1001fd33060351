use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use super::timer::{Sleep, sleep};
use crate::{Clock, Monitor, StdClock};

pin_project! {
    /// An [`AsyncRead`] adapter that limits how fast data is read from `R`.
    ///
    /// When the current sample has no quota left, the reader arms a timer for
    /// the start of the next sample and returns `Pending`; no thread is
    /// blocked.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> std::io::Result<()> {
    /// use flowmeter::futures::AsyncReader;
    /// use tokio::io::AsyncReadExt;
    ///
    /// let data = vec![0u8; 150];
    /// let mut reader = AsyncReader::new(data.as_slice(), 1000);
    /// let mut out = Vec::new();
    /// reader.read_to_end(&mut out).await?;
    /// assert_eq!(150, out.len());
    /// # Ok(())
    /// # }
    /// ```
    pub struct AsyncReader<R, C = StdClock> {
        #[pin]
        inner: R,
        monitor: Arc<Monitor<C>>,
        rate: u64,
        delay: Option<Pin<Box<Sleep>>>,
    }
}

impl<R: AsyncRead> AsyncReader<R> {
    /// Restricts reads from `inner` to `rate` bytes per second (`0` for no
    /// limit) with a fresh default monitor.
    pub fn new(inner: R, rate: u64) -> Self {
        Self::with_monitor(inner, rate, Arc::new(Monitor::new()))
    }
}

impl<R, C: Clock> AsyncReader<R, C> {
    /// Uses an existing, possibly shared, monitor.
    pub fn with_monitor(inner: R, rate: u64, monitor: Arc<Monitor<C>>) -> Self {
        Self {
            inner,
            monitor,
            rate,
            delay: None,
        }
    }

    /// The monitor measuring this stream.
    pub fn monitor(&self) -> &Arc<Monitor<C>> {
        &self.monitor
    }

    /// Current rate limit in bytes per second, `0` when unlimited.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Changes the rate limit in bytes per second. `0` disables it.
    pub fn set_rate(&mut self, rate: u64) {
        self.rate = rate;
    }

    /// Gets a reference to the wrapped stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stream.
    ///
    /// Data moved through it directly bypasses the monitor.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Finalizes the monitor and returns the wrapped reader.
    pub fn finish(self) -> R {
        let bytes = self.monitor.finalize();
        debug!(bytes, "rate-limited reader finished");
        self.inner
    }
}

impl<R: AsyncRead, C: Clock> AsyncRead for AsyncReader<R, C> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();
        loop {
            if let Some(delay) = this.delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                *this.delay = None;
            }
            match this.monitor.try_limit(buf.remaining(), *this.rate) {
                Ok(0) => return Poll::Ready(Ok(())),
                Ok(allowed) => {
                    let mut limited = ReadBuf::new(buf.initialize_unfilled_to(allowed));
                    let res = ready!(this.inner.as_mut().poll_read(cx, &mut limited));
                    let n = this.monitor.update(limited.filled().len());
                    buf.advance(n);
                    return Poll::Ready(res);
                }
                Err(limited) => *this.delay = Some(Box::pin(sleep(limited.retry_after()))),
            }
        }
    }
}

pin_project! {
    /// An [`AsyncWrite`] adapter that limits how fast data is written to `W`.
    ///
    /// Each `poll_write` forwards at most the quota left in the current
    /// sample, so callers see short writes; `write_all` paces itself
    /// accordingly. Shutting the writer down finalizes its monitor.
    pub struct AsyncWriter<W, C = StdClock> {
        #[pin]
        inner: W,
        monitor: Arc<Monitor<C>>,
        rate: u64,
        delay: Option<Pin<Box<Sleep>>>,
    }
}

impl<W: AsyncWrite> AsyncWriter<W> {
    /// Restricts writes to `inner` to `rate` bytes per second (`0` for no
    /// limit) with a fresh default monitor.
    pub fn new(inner: W, rate: u64) -> Self {
        Self::with_monitor(inner, rate, Arc::new(Monitor::new()))
    }
}

impl<W, C: Clock> AsyncWriter<W, C> {
    /// Uses an existing, possibly shared, monitor.
    pub fn with_monitor(inner: W, rate: u64, monitor: Arc<Monitor<C>>) -> Self {
        Self {
            inner,
            monitor,
            rate,
            delay: None,
        }
    }

    /// The monitor measuring this stream.
    pub fn monitor(&self) -> &Arc<Monitor<C>> {
        &self.monitor
    }

    /// Current rate limit in bytes per second, `0` when unlimited.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Changes the rate limit in bytes per second. `0` disables it.
    pub fn set_rate(&mut self, rate: u64) {
        self.rate = rate;
    }

    /// Gets a reference to the wrapped stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped stream.
    ///
    /// Data moved through it directly bypasses the monitor.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Finalizes the monitor and returns the wrapped writer.
    pub fn finish(self) -> W {
        let bytes = self.monitor.finalize();
        debug!(bytes, "rate-limited writer finished");
        self.inner
    }
}

impl<W: AsyncWrite, C: Clock> AsyncWrite for AsyncWriter<W, C> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        loop {
            if let Some(delay) = this.delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                *this.delay = None;
            }
            match this.monitor.try_limit(buf.len(), *this.rate) {
                Ok(0) => return Poll::Ready(Ok(0)),
                Ok(allowed) => {
                    let res = ready!(this.inner.as_mut().poll_write(cx, &buf[..allowed]));
                    return Poll::Ready(this.monitor.io(res));
                }
                Err(limited) => *this.delay = Some(Box::pin(sleep(limited.retry_after()))),
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.monitor.is_active() {
            let bytes = this.monitor.finalize();
            debug!(bytes, "shutting down rate-limited writer");
        }
        this.inner.poll_shutdown(cx)
    }
}

//! Rate-limited [`Read`] and [`Write`] adapters.
//!
//! Both adapters consult their [`Monitor`] before every transfer, hand the
//! wrapped primitive at most the allowed number of bytes, and report what it
//! actually moved. Blocking mode (the default) parks the calling thread until
//! the next sample frees more quota.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use tracing::debug;

use crate::{Clock, Error, Monitor, StdClock};

/// Streams that can be closed explicitly.
///
/// The adapters forward [`close`](Reader::close) to the wrapped primitive
/// only when it implements this trait; otherwise use
/// [`finish`](Reader::finish) to get the primitive back.
pub trait Close {
    fn close(&mut self) -> io::Result<()>;
}

impl Close for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(std::net::Shutdown::Both) {
            // the peer may already be gone
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
impl Close for std::os::unix::net::UnixStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(std::net::Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl<T: Close + ?Sized> Close for &mut T {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// A [`Read`] implementation that limits how fast data is read from `R`.
///
/// # Examples
///
/// ```rust
/// use std::io::Read;
/// use flowmeter::io::Reader;
///
/// let data = vec![7u8; 300];
/// // the first sample at 1kB/s allows 100 bytes
/// let mut reader = Reader::new(data.as_slice(), 1000);
/// reader.set_blocking(false);
/// let mut buf = [0u8; 256];
/// assert_eq!(100, reader.read(&mut buf).unwrap());
/// assert_eq!(0, reader.read(&mut buf).unwrap());
/// ```
pub struct Reader<R, C = StdClock> {
    inner: R,
    monitor: Arc<Monitor<C>>,
    rate: u64,
    block: bool,
}

impl<R: Read> Reader<R> {
    /// Restricts reads from `inner` to `rate` bytes per second (`0` for no
    /// limit), blocking by default, with a fresh default monitor.
    pub fn new(inner: R, rate: u64) -> Self {
        Self::with_monitor(inner, rate, Arc::new(Monitor::new()))
    }
}

impl<R, C: Clock> Reader<R, C> {
    /// Uses an existing, possibly shared, monitor.
    pub fn with_monitor(inner: R, rate: u64, monitor: Arc<Monitor<C>>) -> Self {
        Self {
            inner,
            monitor,
            rate,
            block: true,
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

    /// Whether running out of quota waits for the next sample.
    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// With blocking disabled, a read that finds no quota returns `Ok(0)`
    /// immediately; the caller should retry later rather than treat it as
    /// end of stream.
    pub fn set_blocking(&mut self, block: bool) {
        self.block = block;
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
        self.monitor.finalize();
        self.inner
    }
}

impl<R: Close, C: Clock> Reader<R, C> {
    /// Finalizes the monitor, then closes the wrapped reader.
    pub fn close(&mut self) -> io::Result<()> {
        let bytes = self.monitor.finalize();
        debug!(bytes, "closing rate-limited reader");
        self.inner.close()
    }
}

impl<R: Close, C: Clock> Close for Reader<R, C> {
    fn close(&mut self) -> io::Result<()> {
        Reader::close(self)
    }
}

impl<R: Read, C: Clock> Read for Reader<R, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let allowed = self.monitor.limit(buf.len(), self.rate, self.block);
        if allowed == 0 {
            return Ok(0);
        }
        let res = self.inner.read(&mut buf[..allowed]);
        self.monitor.io(res)
    }
}

/// A [`Write`] implementation that limits how fast data is written to `W`.
///
/// [`write_limited`](Self::write_limited) keeps writing until the whole
/// buffer is out, pacing itself to the rate. In non-blocking mode it stops
/// with [`Error::LimitExceeded`] once the quota of the current sample is
/// used up.
///
/// Through [`Write::write`], a call that stopped after writing some bytes
/// reports a short write `Ok(n)`, whether it ran out of quota or the wrapped
/// writer failed. A failure then surfaces on the next call, if it persists.
/// Only a call that wrote nothing returns the error: `WouldBlock` for a
/// limit stop (see [`is_limit_exceeded`](crate::is_limit_exceeded)), the
/// writer's own error otherwise.
///
/// # Examples
///
/// ```rust
/// use flowmeter::io::Writer;
///
/// let mut writer = Writer::new(Vec::<u8>::new(), 500);
/// writer.set_blocking(false);
/// // 500B/s allows 50 bytes per 100ms sample
/// let err = writer.write_limited(&[1u8; 80]).unwrap_err();
/// assert!(err.is_limit_exceeded());
/// assert_eq!(50, err.written());
/// assert_eq!(50, writer.get_ref().len());
/// ```
pub struct Writer<W, C = StdClock> {
    inner: W,
    monitor: Arc<Monitor<C>>,
    rate: u64,
    block: bool,
}

impl<W: Write> Writer<W> {
    /// Restricts writes to `inner` to `rate` bytes per second (`0` for no
    /// limit), blocking by default, with a fresh default monitor.
    pub fn new(inner: W, rate: u64) -> Self {
        Self::with_monitor(inner, rate, Arc::new(Monitor::new()))
    }
}

impl<W, C: Clock> Writer<W, C> {
    /// Uses an existing, possibly shared, monitor.
    pub fn with_monitor(inner: W, rate: u64, monitor: Arc<Monitor<C>>) -> Self {
        Self {
            inner,
            monitor,
            rate,
            block: true,
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

    /// Whether running out of quota waits for the next sample.
    pub fn is_blocking(&self) -> bool {
        self.block
    }

    pub fn set_blocking(&mut self, block: bool) {
        self.block = block;
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
        self.monitor.finalize();
        self.inner
    }
}

impl<W: Write, C: Clock> Writer<W, C> {
    /// Writes all of `buf` without exceeding the rate limit and returns the
    /// number of bytes written.
    ///
    /// On failure the error carries how many bytes went out before the call
    /// stopped.
    pub fn write_limited(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let mut written = 0;
        while written < buf.len() {
            let rest = &buf[written..];
            let allowed = self.monitor.limit(rest.len(), self.rate, self.block);
            if allowed == 0 {
                return Err(Error::LimitExceeded { written });
            }
            match self.monitor.io(self.inner.write(&rest[..allowed])) {
                Ok(0) => {
                    return Err(Error::Io {
                        written,
                        source: io::ErrorKind::WriteZero.into(),
                    });
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(Error::Io { written, source }),
            }
        }
        Ok(written)
    }
}

impl<W: Write + Close, C: Clock> Writer<W, C> {
    /// Finalizes the monitor, then closes the wrapped writer.
    pub fn close(&mut self) -> io::Result<()> {
        let bytes = self.monitor.finalize();
        debug!(bytes, "closing rate-limited writer");
        self.inner.close()
    }
}

impl<W: Write + Close, C: Clock> Close for Writer<W, C> {
    fn close(&mut self) -> io::Result<()> {
        Writer::close(self)
    }
}

impl<W: Write, C: Clock> Write for Writer<W, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.write_limited(buf) {
            Ok(n) => Ok(n),
            // a short write is not an error for `Write`
            Err(err) if err.written() > 0 => Ok(err.written()),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

use std::io;
use std::time::Duration;

/// No quota is left in the current sampling period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limited; suggested nap duration is {retry_after:?}")]
pub struct RateLimited {
    pub(crate) retry_after: Duration,
}

impl RateLimited {
    /// The suggested duration to wait before asking for quota again.
    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// Errors surfaced by the rate-limited [`Writer`](crate::io::Writer).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Non-blocking write ran out of quota with data still pending.
    #[error("transfer rate limit exceeded after writing {written} bytes")]
    LimitExceeded { written: usize },
    /// The wrapped writer failed.
    #[error("write failed after {written} bytes: {source}")]
    Io {
        written: usize,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Bytes written by the call before it stopped.
    pub fn written(&self) -> usize {
        match self {
            Error::LimitExceeded { written } | Error::Io { written, .. } => *written,
        }
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Error::LimitExceeded { .. })
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io { source, .. } => source,
            limited @ Error::LimitExceeded { .. } => {
                io::Error::new(io::ErrorKind::WouldBlock, limited)
            }
        }
    }
}

/// Whether an [`io::Error`] came from a non-blocking writer running out of
/// quota rather than from the underlying stream.
pub fn is_limit_exceeded(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<Error>())
        .is_some_and(Error::is_limit_exceeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_rate_limited() {
        let rl = RateLimited {
            retry_after: Duration::from_millis(40),
        };
        assert_eq!("rate limited; suggested nap duration is 40ms", rl.to_string());
    }

    #[test]
    fn display_limit_exceeded() {
        let err = Error::LimitExceeded { written: 7 };
        assert_eq!(
            "transfer rate limit exceeded after writing 7 bytes",
            err.to_string()
        );
        assert_eq!(7, err.written());
    }

    #[test]
    fn into_io_error() {
        let err: io::Error = Error::LimitExceeded { written: 0 }.into();
        assert_eq!(io::ErrorKind::WouldBlock, err.kind());
        assert!(is_limit_exceeded(&err));

        let err: io::Error = Error::Io {
            written: 3,
            source: io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"),
        }
        .into();
        assert_eq!(io::ErrorKind::TimedOut, err.kind());
        assert!(!is_limit_exceeded(&err));

        let plain = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(!is_limit_exceeded(&plain));
    }
}

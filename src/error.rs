//! Crate-wide error taxonomy.
//!
//! Four failure classes, kept distinct because callers react differently
//! to each:
//!
//! 1. Transient: [`Error::WouldBlock`] / [`Error::Timeout`]. Not fatal;
//!    the caller retries or polls.
//! 2. Backend I/O: [`Error::Io`]. Fatal for the channel; the channel's
//!    sticky error flag is set and later calls return [`Error::Faulted`].
//! 3. Protocol / format: bad tags, truncated structures, unknown stream
//!    ids, padding mismatches. Fatal for the current operation.
//! 4. Capacity: a fixed-size structure (static buffer, file index) is
//!    full. Reported, never silently dropped.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No data available right now on a non-blocking channel. Retry.
    #[error("operation would block")]
    WouldBlock,

    /// A blocking operation waited past the configured poll timeout.
    #[error("timed out waiting for channel readiness")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(io::Error),

    /// The channel was closed by its owner.
    #[error("channel is closed")]
    Closed,

    /// The channel carries a sticky error from an earlier failure.
    #[error("channel has a sticky error condition")]
    Faulted,

    /// End of stream where more data was required.
    #[error("end of stream")]
    Eof,

    #[error("channel does not support {0}")]
    Unsupported(&'static str),

    #[error("bad section tag: expected {}, found {}", display_tag(.expected), display_tag(.found))]
    BadTag { expected: [u8; 8], found: [u8; 8] },

    /// An on-disk count failed its sanity bound; reading it would have
    /// attempted an unbounded allocation.
    #[error("corrupt entry count {count} (limit {limit})")]
    CorruptCount { count: u64, limit: u64 },

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("unknown stream id {0} in packet header")]
    UnknownStream(u32),

    #[error("malformed {what}: {detail}")]
    BadRecord { what: &'static str, detail: String },

    /// PKCS#7 padding validation failed on the final cipher block.
    #[error("invalid block cipher padding")]
    BadPadding,

    /// A fixed-capacity structure cannot accept another entry.
    #[error("{0} is full")]
    Capacity(&'static str),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The separate-stream handshake received an unexpected message id.
    #[error("unexpected control message {0}")]
    BadHandshake(u64),
}

impl Error {
    /// True for conditions the caller is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Timeout)
    }

}

/// `?` on an `io::Result` classifies the error: `WouldBlock` and `TimedOut`
/// become transient variants, everything else is a backend I/O failure.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Io(inner) => inner,
            Error::WouldBlock => io::ErrorKind::WouldBlock.into(),
            Error::Timeout => io::ErrorKind::TimedOut.into(),
            Error::Eof => io::ErrorKind::UnexpectedEof.into(),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

fn display_tag(tag: &[u8; 8]) -> String {
    match std::str::from_utf8(tag) {
        Ok(s) => format!("{s:?}"),
        Err(_) => format!("{tag:02x?}"),
    }
}

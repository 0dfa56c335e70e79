//! Byte transport abstraction for container I/O.
//!
//! A [`Channel`] pairs a pluggable [`ChannelBackend`] (file, memory,
//! socket, block cipher) with uniform position tracking and sticky
//! condition flags. All container serialization runs through channels,
//! so format code never touches the concrete transport.
//!
//! # Conditions
//!
//! End-of-data and error are sticky: once raised they persist until
//! [`Channel::clear_conditions`] resets them or a successful seek
//! clears end-of-data. A closed channel stays closed.
//!
//! # Blocking
//!
//! A blocking channel waits (via backend poll with an optional
//! timeout) when no data is available; a non-blocking channel returns
//! a zero-length read with no conditions raised, and callers retry.

use std::fmt;
use std::io::{self, SeekFrom};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use bitflags::bitflags;

use crate::crypto::BlockCrypt;
use crate::error::{Error, Result};

mod cipher;
mod file;
mod memory;
mod socket;

pub use cipher::PadMode;

use cipher::CipherBackend;
use file::FileBackend;
use memory::MemoryBackend;
use socket::SocketBackend;

bitflags! {
    /// Capabilities and nature of a channel's backing transport.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Caps: u32 {
        const READ         = 1 << 0;
        const WRITE        = 1 << 1;
        const SEEK         = 1 << 2;
        const DUPLEX       = 1 << 3;
        const REGULAR_FILE = 1 << 4;
        const SOCKET       = 1 << 5;
        const PIPE         = 1 << 6;
        const TTY          = 1 << 7;
    }
}

/// Transport behind a [`Channel`].
///
/// `read` returning `Ok(0)` means end of data; "no bytes right now"
/// is reported as `Err(Error::WouldBlock)`. Backends never block on
/// their own; waiting is the channel's job via `poll`.
pub trait ChannelBackend: Send {
    fn caps(&self) -> Caps;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    fn flush(&mut self) -> Result<()>;

    /// Wait until the backend is readable or `timeout` elapses.
    /// Returns `Ok(false)` on timeout.
    fn poll(&mut self, timeout: Option<Duration>) -> Result<bool>;

    fn close(&mut self) -> Result<()>;
}

/// Default wait bound for blocking reads on transports that can stall.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Channel {
    backend: Box<dyn ChannelBackend>,
    caps: Caps,
    position: u64,
    eof: bool,
    error: bool,
    closed: bool,
    blocking: bool,
    poll_timeout: Option<Duration>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("caps", &self.caps)
            .field("position", &self.position)
            .field("eof", &self.eof)
            .field("error", &self.error)
            .field("closed", &self.closed)
            .field("blocking", &self.blocking)
            .finish()
    }
}

impl Channel {
    /// Mount a caller-supplied backend. The channel starts blocking
    /// with the default poll timeout.
    pub fn from_backend(backend: Box<dyn ChannelBackend>) -> Self {
        let caps = backend.caps();
        Channel {
            backend,
            caps,
            position: 0,
            eof: false,
            error: false,
            closed: false,
            blocking: true,
            poll_timeout: Some(DEFAULT_POLL_TIMEOUT),
        }
    }

    // ── Constructors ─────────────────────────────────────────────────

    /// Open an existing file for reading.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_backend(Box::new(FileBackend::open(
            path.as_ref(),
        )?)))
    }

    /// Create (or truncate) a file for writing.
    pub fn create_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_backend(Box::new(FileBackend::create(
            path.as_ref(),
        )?)))
    }

    /// Wrap an already-open file handle (stdin/stdout included).
    pub fn from_file(file: std::fs::File, caps: Caps) -> Self {
        Self::from_backend(Box::new(FileBackend::from_file(file, caps)))
    }

    /// Growable in-memory channel, initially empty.
    pub fn memory() -> Self {
        Self::from_backend(Box::new(MemoryBackend::growable()))
    }

    /// In-memory channel over existing content. The backing store is
    /// fixed; writes past the end fail with [`Error::Capacity`].
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::from_backend(Box::new(MemoryBackend::from_vec(data)))
    }

    /// Fixed-size in-memory channel; writes past `capacity` fail with
    /// [`Error::Capacity`].
    pub fn fixed(capacity: usize) -> Self {
        Self::from_backend(Box::new(MemoryBackend::fixed(capacity)))
    }

    /// Connect to a TCP peer.
    pub fn connect(addr: &str) -> Result<Self> {
        Ok(Self::from_backend(Box::new(SocketBackend::connect(addr)?)))
    }

    /// Wrap an accepted TCP stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        Ok(Self::from_backend(Box::new(SocketBackend::from_stream(
            stream,
        )?)))
    }

    /// Layer a block cipher over an existing channel. All bytes
    /// written are encrypted, all bytes read are decrypted. The
    /// resulting channel is not seekable.
    pub fn encrypted(inner: Channel, crypt: Box<dyn BlockCrypt>, pad: PadMode) -> Self {
        Self::from_backend(Box::new(CipherBackend::new(inner, crypt, pad)))
    }

    // ── State ────────────────────────────────────────────────────────

    pub fn caps(&self) -> Caps {
        self.caps
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_seekable(&self) -> bool {
        self.caps.contains(Caps::SEEK)
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Bound on how long a blocking read waits for data. `None` waits
    /// forever.
    pub fn set_poll_timeout(&mut self, timeout: Option<Duration>) {
        self.poll_timeout = timeout;
    }

    /// Reset the end-of-data and error conditions so I/O can resume,
    /// e.g. after the underlying transport gained more data.
    pub fn clear_conditions(&mut self) {
        self.eof = false;
        self.error = false;
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.error {
            return Err(Error::Faulted);
        }
        Ok(())
    }

    // ── I/O ──────────────────────────────────────────────────────────

    /// Read up to `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` at end of data (with the end-of-data condition
    /// raised) or, on a non-blocking channel, when no data is
    /// currently available (no condition raised).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.backend.read(buf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.position += n as u64;
                    return Ok(n);
                }
                Err(Error::WouldBlock) => {
                    if !self.blocking {
                        return Ok(0);
                    }
                    if !self.backend.poll(self.poll_timeout)? {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => {
                    self.error = true;
                    return Err(e);
                }
            }
        }
    }

    /// Read exactly `buf.len()` bytes, waiting as needed. Fails with
    /// [`Error::Eof`] if the data ends first.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 if self.eof => return Err(Error::Eof),
                0 => return Err(Error::WouldBlock),
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Write the whole buffer. [`Error::WouldBlock`] from the backend
    /// is retried on a blocking channel and surfaced as-is on a
    /// non-blocking one (the write is then partially applied at the
    /// transport level only, never at the channel level: position
    /// reflects accepted bytes).
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        let mut written = 0;
        while written < buf.len() {
            match self.backend.write(&buf[written..]) {
                Ok(0) => {
                    self.error = true;
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    )));
                }
                Ok(n) => {
                    written += n;
                    self.position += n as u64;
                }
                Err(Error::WouldBlock) if self.blocking => {
                    if !self.backend.poll(self.poll_timeout)? {
                        return Err(Error::Timeout);
                    }
                }
                Err(e @ Error::WouldBlock) => return Err(e),
                Err(e @ Error::Capacity(_)) => return Err(e),
                Err(e) => {
                    self.error = true;
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    /// Reposition the channel. Requires the SEEK capability. A
    /// successful seek clears the end-of-data condition.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        if !self.caps.contains(Caps::SEEK) {
            return Err(Error::Unsupported("seek on non-seekable channel"));
        }
        let new_pos = self.backend.seek(pos)?;
        self.position = new_pos;
        self.eof = false;
        Ok(new_pos)
    }

    /// Skip `count` bytes forward, by seeking when possible and by
    /// reading into a scratch buffer otherwise.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.caps.contains(Caps::SEEK) {
            self.seek(SeekFrom::Current(count as i64))?;
            return Ok(());
        }
        let mut remaining = count;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let want = scratch.len().min(remaining as usize);
            match self.read(&mut scratch[..want])? {
                0 if self.eof => return Err(Error::Eof),
                0 => return Err(Error::WouldBlock),
                n => remaining -= n as u64,
            }
        }
        Ok(())
    }

    /// Wait until the channel is readable or `timeout` elapses.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        self.check_open()?;
        if self.eof {
            return Ok(true);
        }
        self.backend.poll(timeout)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        self.backend.flush()
    }

    /// Flush and release the transport. Idempotent; also runs on drop.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.backend.close()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// std::io adapters, so byteorder-driven serialization can run directly
// on a channel. End of data maps to Ok(0); a non-blocking empty read
// maps to ErrorKind::WouldBlock so io callers can tell the two apart.
impl io::Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Channel::read(self, buf) {
            Ok(0) if !self.eof && !buf.is_empty() => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }
}

impl io::Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Channel::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Channel::flush(self).map_err(Into::into)
    }
}

impl io::Seek for Channel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Channel::seek(self, pos).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::SeekFrom;

    #[test]
    fn memory_write_read_round_trip() {
        let mut ch = Channel::memory();
        assert!(ch.is_seekable());
        ch.write(b"hello weave").unwrap();
        assert_eq!(ch.position(), 11);

        ch.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 11];
        ch.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello weave");
    }

    #[test]
    fn eof_is_sticky_until_seek() {
        let mut ch = Channel::from_bytes(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(ch.read(&mut buf).unwrap(), 3);
        assert_eq!(ch.read(&mut buf).unwrap(), 0);
        assert!(ch.is_eof());
        // eof short-circuits further reads
        assert_eq!(ch.read(&mut buf).unwrap(), 0);

        ch.seek(SeekFrom::Start(1)).unwrap();
        assert!(!ch.is_eof());
        assert_eq!(ch.read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn fixed_memory_rejects_overflow() {
        let mut ch = Channel::fixed(4);
        ch.write(b"abcd").unwrap();
        match ch.write(b"e") {
            Err(Error::Capacity(_)) => {}
            other => panic!("expected capacity error, got {other:?}"),
        }
        // Capacity failures are not sticky faults.
        assert!(!ch.is_error());
        ch.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 4];
        ch.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn closed_channel_refuses_io() {
        let mut ch = Channel::memory();
        ch.close().unwrap();
        ch.close().unwrap();
        assert!(matches!(ch.write(b"x"), Err(Error::Closed)));
        let mut buf = [0u8; 1];
        assert!(matches!(ch.read(&mut buf), Err(Error::Closed)));
    }

    #[test]
    fn skip_without_seek_discards_bytes() {
        let mut ch = Channel::from_bytes((0u8..32).collect());
        ch.skip(10).unwrap();
        let mut buf = [0u8; 1];
        ch.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], 10);
    }

    #[test]
    fn byteorder_over_channel() {
        use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
        let mut ch = Channel::memory();
        ch.write_u32::<LittleEndian>(0xdead_beef).unwrap();
        ch.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(ch.read_u32::<LittleEndian>().unwrap(), 0xdead_beef);
    }
}

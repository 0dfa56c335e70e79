//! TCP socket channel backend.
//!
//! The stream runs in non-blocking mode; waiting happens in `poll`
//! with a bounded deadline, so a stalled peer surfaces as a timeout
//! instead of hanging the caller.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

use super::{Caps, ChannelBackend};

const POLL_STEP: Duration = Duration::from_millis(1);

pub(super) struct SocketBackend {
    stream: TcpStream,
    readahead: VecDeque<u8>,
    peer_closed: bool,
}

impl SocketBackend {
    pub(super) fn connect(addr: &str) -> Result<Self> {
        Self::from_stream(TcpStream::connect(addr)?)
    }

    pub(super) fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(SocketBackend {
            stream,
            readahead: VecDeque::new(),
            peer_closed: false,
        })
    }

    /// Pull whatever the kernel has ready into the readahead queue.
    fn fill(&mut self) -> Result<()> {
        if self.peer_closed {
            return Ok(());
        }
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(n) => self.readahead.extend(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl ChannelBackend for SocketBackend {
    fn caps(&self) -> Caps {
        Caps::READ | Caps::WRITE | Caps::DUPLEX | Caps::SOCKET
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.readahead.is_empty() {
            self.fill()?;
        }
        if !self.readahead.is_empty() {
            let n = buf.len().min(self.readahead.len());
            for (slot, byte) in buf[..n].iter_mut().zip(self.readahead.drain(..n)) {
                *slot = byte;
            }
            return Ok(n);
        }
        if self.peer_closed {
            return Ok(0);
        }
        Err(Error::WouldBlock)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(Error::WouldBlock),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn seek(&mut self, _pos: std::io::SeekFrom) -> Result<u64> {
        Err(Error::Unsupported("seek on socket"))
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.stream.flush()?)
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if !self.readahead.is_empty() || self.peer_closed {
                return Ok(true);
            }
            self.fill()?;
            if !self.readahead.is_empty() || self.peer_closed {
                return Ok(true);
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    return Ok(false);
                }
            }
            std::thread::sleep(POLL_STEP);
        }
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown(Shutdown::Both);
        Ok(())
    }
}

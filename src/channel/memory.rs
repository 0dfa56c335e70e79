//! In-memory channel over a [`Buffer`].
//!
//! Growable by default; a fixed backend serves bounded scratch space
//! and refuses to grow past its capacity.

use std::io::SeekFrom;
use std::time::Duration;

use crate::buffer::Buffer;
use crate::error::{Error, Result};

use super::{Caps, ChannelBackend};

pub(super) struct MemoryBackend {
    buffer: Buffer,
}

impl MemoryBackend {
    pub(super) fn growable() -> Self {
        MemoryBackend {
            buffer: Buffer::new(),
        }
    }

    /// Fixed backend over existing content, for reading it back.
    /// In-place rewrites are allowed; growing past the content fails.
    pub(super) fn from_vec(data: Vec<u8>) -> Self {
        MemoryBackend {
            buffer: Buffer::fixed_filled(data),
        }
    }

    pub(super) fn fixed(capacity: usize) -> Self {
        MemoryBackend {
            buffer: Buffer::fixed(vec![0u8; capacity]),
        }
    }
}

impl ChannelBackend for MemoryBackend {
    fn caps(&self) -> Caps {
        Caps::READ | Caps::WRITE | Caps::SEEK
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.buffer.read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.buffer.write(buf)?;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.buffer.len() as i64;
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.buffer.position() as i64 + delta,
        };
        if target < 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start",
            )));
        }
        let clamped = (target as u64).min(len as u64);
        self.buffer.set_position(clamped as usize);
        Ok(clamped)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> Result<bool> {
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

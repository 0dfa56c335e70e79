//! Growable byte container with explicit length, position and capacity.
//!
//! Two modes:
//! - growable (default): capacity is rounded up to [`ALLOC_BLOCK`]
//!   multiples on growth, and one zero byte is always reserved past
//!   `len` so the backing store can be handed to terminator-expecting
//!   consumers without a copy.
//! - fixed: the backing store has a fixed capacity and never grows.
//!   Writes past capacity fail with [`Error::Capacity`] instead of
//!   being dropped.

use crate::error::{Error, Result};

/// Capacity growth granularity.
pub const ALLOC_BLOCK: usize = 1024;

#[derive(Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    len: usize,
    pos: usize,
    fixed: bool,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        let mut b = Buffer::new();
        // Growth cannot fail on a growable buffer.
        b.ensure(cap).ok();
        b
    }

    /// Wrap an owned backing store as a fixed-capacity write target.
    /// The buffer starts empty; its capacity is the store's length.
    pub fn fixed(backing: Vec<u8>) -> Self {
        Buffer {
            len: 0,
            pos: 0,
            data: backing,
            fixed: true,
        }
    }

    /// Wrap existing bytes as a fixed, fully-populated read source.
    pub fn fixed_filled(backing: Vec<u8>) -> Self {
        let len = backing.len();
        Buffer {
            data: backing,
            len,
            pos: 0,
            fixed: true,
        }
    }

    /// Take ownership of bytes as a growable buffer containing them.
    pub fn from_vec(v: Vec<u8>) -> Self {
        let mut b = Buffer {
            len: v.len(),
            pos: 0,
            data: v,
            fixed: false,
        };
        b.ensure(0).ok(); // restore the reserved terminator byte
        b
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the read/write cursor, clamped to `[0, len]`.
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.len);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Guarantee room for `self.len + extra` bytes plus the reserved
    /// terminator. Fixed buffers fail rather than grow.
    fn ensure(&mut self, extra: usize) -> Result<()> {
        let needed = self.len + extra + 1;
        if needed <= self.data.len() {
            return Ok(());
        }
        if self.fixed {
            // A fixed buffer may legitimately lack the terminator slot;
            // only exact payload overflow is an error.
            if self.len + extra <= self.data.len() {
                return Ok(());
            }
            return Err(Error::Capacity("fixed buffer"));
        }
        let rounded = needed.div_ceil(ALLOC_BLOCK) * ALLOC_BLOCK;
        self.data.resize(rounded, 0);
        Ok(())
    }

    /// Copy `bytes` in at the cursor, extending `len` as needed.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let end = self.pos + bytes.len();
        if end > self.len {
            self.ensure(end - self.len)?;
        }
        self.data[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        if end > self.len {
            self.len = end;
            if !self.fixed {
                self.data[self.len] = 0;
            }
        }
        Ok(bytes.len())
    }

    /// Copy out up to `out.len()` bytes from the cursor. Returns the
    /// number copied; 0 means the cursor is at `len`.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len - self.pos);
        out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Reset to empty without releasing the backing store.
    pub fn clear(&mut self) {
        self.len = 0;
        self.pos = 0;
    }

    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
            self.pos = self.pos.min(len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_rounds_to_block() {
        let mut b = Buffer::new();
        b.write(&[1u8; 10]).unwrap();
        assert_eq!(b.capacity(), ALLOC_BLOCK);
        b.write(&vec![2u8; ALLOC_BLOCK]).unwrap();
        assert_eq!(b.capacity(), 2 * ALLOC_BLOCK);
        assert_eq!(b.len(), ALLOC_BLOCK + 10);
    }

    #[test]
    fn terminator_reserved_past_len() {
        let mut b = Buffer::new();
        b.write(b"abc").unwrap();
        assert!(b.capacity() > b.len());
        assert_eq!(b.as_slice(), b"abc");
    }

    #[test]
    fn fixed_buffer_never_grows() {
        let mut b = Buffer::fixed(vec![0u8; 8]);
        assert_eq!(b.write(&[1u8; 8]).unwrap(), 8);
        assert!(matches!(b.write(&[2u8]), Err(Error::Capacity(_))));
        assert_eq!(b.capacity(), 8);
    }

    #[test]
    fn read_bounded_by_len() {
        let mut b = Buffer::from_vec(b"hello".to_vec());
        let mut out = [0u8; 16];
        assert_eq!(b.read(&mut out), 5);
        assert_eq!(&out[..5], b"hello");
        assert_eq!(b.read(&mut out), 0);
    }

    #[test]
    fn position_clamps_to_len() {
        let mut b = Buffer::from_vec(b"xyz".to_vec());
        b.set_position(100);
        assert_eq!(b.position(), 3);
        b.set_position(1);
        let mut out = [0u8; 2];
        assert_eq!(b.read(&mut out), 2);
        assert_eq!(&out, b"yz");
    }

    #[test]
    fn overwrite_within_len_keeps_len() {
        let mut b = Buffer::from_vec(b"abcdef".to_vec());
        b.set_position(1);
        b.write(b"XY").unwrap();
        assert_eq!(b.as_slice(), b"aXYdef");
        assert_eq!(b.len(), 6);
    }
}

//! Block-cipher channel backend.
//!
//! Wraps an inner channel and a [`BlockCrypt`] transform. Writes are
//! buffered to whole cipher blocks, encrypted, and forwarded; reads
//! decrypt block by block with a one-block ciphertext lookahead so the
//! final block can be recognized and its padding stripped before any
//! of its bytes are handed out.
//!
//! With [`PadMode::Pkcs7`] the write side always emits a final padding
//! block on `finish` (a full block of `bs` when the plaintext is
//! block-aligned), and the read side validates and strips it. With
//! [`PadMode::None`] the plaintext must be block-aligned; a partial
//! remainder at `finish` is an error.

use std::io::SeekFrom;
use std::time::Duration;

use crate::crypto::BlockCrypt;
use crate::error::{Error, Result};

use super::{Caps, Channel, ChannelBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    /// PKCS#7: final block carries 1..=block_size pad bytes, each
    /// equal to the pad length.
    Pkcs7,
    /// No padding; total plaintext length must be a block multiple.
    None,
}

pub(super) struct CipherBackend {
    inner: Channel,
    crypt: Box<dyn BlockCrypt>,
    pad: PadMode,
    // write side: plaintext not yet forming a full block
    partial: Vec<u8>,
    finished: bool,
    // read side: decrypted bytes being served, and the next ciphertext
    // block (undecrypted) held back until we know it is not the last
    cur: Vec<u8>,
    cur_off: usize,
    next_ct: Option<Vec<u8>>,
    primed: bool,
    source_eof: bool,
    // ciphertext block being assembled; survives a WouldBlock return
    // so a retry resumes mid-block instead of desynchronizing the
    // chain
    ct_partial: Vec<u8>,
    ct_filled: usize,
}

impl CipherBackend {
    pub(super) fn new(inner: Channel, crypt: Box<dyn BlockCrypt>, pad: PadMode) -> Self {
        CipherBackend {
            inner,
            crypt,
            pad,
            partial: Vec::new(),
            finished: false,
            cur: Vec::new(),
            cur_off: 0,
            next_ct: None,
            primed: false,
            source_eof: false,
            ct_partial: Vec::new(),
            ct_filled: 0,
        }
    }

    /// Read exactly one ciphertext block from the inner channel.
    /// `Ok(None)` means clean end of data at a block boundary. A block
    /// split across arrivals stays in `ct_partial` over a WouldBlock
    /// return and is completed on the next call.
    fn read_ct_block(&mut self) -> Result<Option<Vec<u8>>> {
        let bs = self.crypt.block_size();
        if self.ct_partial.len() < bs {
            self.ct_partial.resize(bs, 0);
        }
        while self.ct_filled < bs {
            let n = self.inner.read(&mut self.ct_partial[self.ct_filled..bs])?;
            if n == 0 {
                if self.inner.is_eof() {
                    if self.ct_filled == 0 {
                        self.ct_partial.clear();
                        return Ok(None);
                    }
                    return Err(Error::Truncated("cipher block"));
                }
                return Err(Error::WouldBlock);
            }
            self.ct_filled += n;
        }
        self.ct_filled = 0;
        Ok(Some(std::mem::take(&mut self.ct_partial)))
    }

    /// Decrypt `next_ct` into `cur`, fetching its successor first so a
    /// final block can be unpadded. Returns false at end of data.
    fn advance(&mut self) -> Result<bool> {
        if !self.primed {
            self.next_ct = self.read_ct_block()?;
            self.primed = true;
        }
        let Some(ct) = self.next_ct.take() else {
            self.source_eof = true;
            return Ok(false);
        };
        match self.read_ct_block() {
            Ok(successor) => self.next_ct = successor,
            Err(e) => {
                // put the unconsumed block back before surfacing a
                // retryable condition
                self.next_ct = Some(ct);
                return Err(e);
            }
        }

        self.cur = ct;
        self.crypt.decrypt_block(&mut self.cur);
        self.cur_off = 0;

        if self.next_ct.is_none() {
            self.source_eof = true;
            if self.pad == PadMode::Pkcs7 {
                self.strip_padding()?;
            }
        }
        Ok(true)
    }

    fn strip_padding(&mut self) -> Result<()> {
        let bs = self.crypt.block_size();
        let pad = *self.cur.last().unwrap_or(&0) as usize;
        if pad == 0 || pad > bs {
            return Err(Error::BadPadding);
        }
        if self.cur[bs - pad..].iter().any(|&b| b != pad as u8) {
            return Err(Error::BadPadding);
        }
        self.cur.truncate(bs - pad);
        Ok(())
    }

    /// Encrypt and forward all complete blocks in `partial`.
    fn drain_partial(&mut self) -> Result<()> {
        let bs = self.crypt.block_size();
        while self.partial.len() >= bs {
            let mut block: Vec<u8> = self.partial.drain(..bs).collect();
            self.crypt.encrypt_block(&mut block);
            self.inner.write(&block)?;
        }
        Ok(())
    }

    /// Emit the final (padded) block. Called once, from `close`.
    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.drain_partial()?;
        let bs = self.crypt.block_size();
        match self.pad {
            PadMode::Pkcs7 => {
                let pad = bs - self.partial.len();
                let mut block = std::mem::take(&mut self.partial);
                block.resize(bs, pad as u8);
                self.crypt.encrypt_block(&mut block);
                self.inner.write(&block)?;
            }
            PadMode::None => {
                if !self.partial.is_empty() {
                    return Err(Error::Truncated("unpadded plaintext not block-aligned"));
                }
            }
        }
        self.inner.flush()
    }
}

impl ChannelBackend for CipherBackend {
    fn caps(&self) -> Caps {
        // seeking would desynchronize the chaining state
        self.inner.caps() & (Caps::READ | Caps::WRITE | Caps::DUPLEX)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.cur_off >= self.cur.len() {
            if self.source_eof {
                return Ok(0);
            }
            if !self.advance()? {
                return Ok(0);
            }
            // a bare padding block decrypts to zero plaintext bytes
            if self.cur.is_empty() {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.cur.len() - self.cur_off);
        buf[..n].copy_from_slice(&self.cur[self.cur_off..self.cur_off + n]);
        self.cur_off += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.finished {
            return Err(Error::Closed);
        }
        self.partial.extend_from_slice(buf);
        self.drain_partial()?;
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(Error::Unsupported("seek on cipher channel"))
    }

    fn flush(&mut self) -> Result<()> {
        // partial plaintext stays buffered until finish; only pass the
        // flush down
        self.inner.flush()
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.cur_off < self.cur.len() || self.source_eof {
            return Ok(true);
        }
        self.inner.poll(timeout)
    }

    fn close(&mut self) -> Result<()> {
        self.finish()?;
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::crypto::{Aes256Cbc, AES_BLOCK};

    fn cbc() -> Box<dyn BlockCrypt> {
        Box::new(Aes256Cbc::new(&[3u8; 32], [7u8; AES_BLOCK]))
    }

    fn encrypt_to_vec(plain: &[u8], pad: PadMode) -> Vec<u8> {
        let mut be = CipherBackend::new(Channel::memory(), cbc(), pad);
        ChannelBackend::write(&mut be, plain).unwrap();
        be.finish().unwrap();
        be.inner.seek(SeekFrom::Start(0)).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = be.inner.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    fn decrypt_all(ct: Vec<u8>, pad: PadMode) -> Result<Vec<u8>> {
        let mut r = Channel::encrypted(Channel::from_bytes(ct), cbc(), pad);
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    #[test]
    fn pkcs7_round_trip_unaligned() {
        let plain = b"seventeen bytes!!".to_vec(); // 17, forces padding
        let ct = encrypt_to_vec(&plain, PadMode::Pkcs7);
        assert_eq!(ct.len() % AES_BLOCK, 0);
        assert_eq!(ct.len(), 2 * AES_BLOCK);
        assert_eq!(decrypt_all(ct, PadMode::Pkcs7).unwrap(), plain);
    }

    #[test]
    fn pkcs7_aligned_input_gets_full_pad_block() {
        let plain = vec![0xAAu8; AES_BLOCK * 2];
        let ct = encrypt_to_vec(&plain, PadMode::Pkcs7);
        assert_eq!(ct.len(), 3 * AES_BLOCK);
        assert_eq!(decrypt_all(ct, PadMode::Pkcs7).unwrap(), plain);
    }

    #[test]
    fn corrupted_padding_detected() {
        let plain = b"some payload bytes".to_vec();
        let mut ct = encrypt_to_vec(&plain, PadMode::Pkcs7);
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        match decrypt_all(ct, PadMode::Pkcs7) {
            Err(Error::BadPadding) => {}
            other => panic!("expected padding error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_ciphertext_detected() {
        let plain = vec![1u8; AES_BLOCK];
        let mut ct = encrypt_to_vec(&plain, PadMode::Pkcs7);
        ct.pop();
        match decrypt_all(ct, PadMode::Pkcs7) {
            Err(Error::Truncated(_)) => {}
            other => panic!("expected truncation error, got {other:?}"),
        }
    }

    #[test]
    fn no_padding_requires_alignment() {
        let mut w = Channel::encrypted(Channel::memory(), cbc(), PadMode::None);
        w.write(&[0u8; 5]).unwrap();
        assert!(w.close().is_err());
    }

    #[test]
    fn empty_stream_reads_eof() {
        let mut r = Channel::encrypted(Channel::from_bytes(Vec::new()), cbc(), PadMode::Pkcs7);
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    /// Read side that delivers one scripted chunk per call with a
    /// stall before each, like ciphertext trickling in over a socket.
    struct SplitSource {
        chunks: std::collections::VecDeque<Vec<u8>>,
        stalled: bool,
    }

    impl ChannelBackend for SplitSource {
        fn caps(&self) -> Caps {
            Caps::READ
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let Some(chunk) = self.chunks.front_mut() else {
                return Ok(0);
            };
            if !self.stalled {
                self.stalled = true;
                return Err(Error::WouldBlock);
            }
            self.stalled = false;
            let n = buf.len().min(chunk.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
            Ok(n)
        }

        fn write(&mut self, _buf: &[u8]) -> Result<usize> {
            Err(Error::Unsupported("write on split source"))
        }

        fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
            Err(Error::Unsupported("seek on split source"))
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

    #[test]
    fn ciphertext_split_across_arrivals_decrypts_intact() {
        let plain = [0x5au8; AES_BLOCK];
        let ct = encrypt_to_vec(&plain, PadMode::Pkcs7);
        assert_eq!(ct.len(), 2 * AES_BLOCK);

        // cuts land inside both cipher blocks
        let chunks = vec![ct[..8].to_vec(), ct[8..20].to_vec(), ct[20..].to_vec()];
        let mut inner = Channel::from_backend(Box::new(SplitSource {
            chunks: chunks.into(),
            stalled: false,
        }));
        inner.set_blocking(false);

        let mut r = Channel::encrypted(inner, cbc(), PadMode::Pkcs7);
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, plain);
    }
}

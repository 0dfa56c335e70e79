//! Wire primitives: 8-byte section tags, variable-length integers, and
//! chunk framing.
//!
//! # Encoding rules
//! Two integer encodings exist and the distinction is load-bearing:
//! - fixed-width fields are little-endian (via `byteorder`) and are used
//!   for every value parsed during random access, so entry sizes stay
//!   predictable;
//! - `v`-coded integers (7-bit groups, most significant first, high bit
//!   set on every byte but the last) are used for counts, lengths, ids
//!   and other append-only values.
//!
//! # Chunk framing
//! `[tag][v(payload_len)][payload][tag]` with the same tag opening and
//! closing the chunk. The closing tag lets a sequential reader confirm
//! it consumed exactly the declared payload.

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub const TAG_LEN: usize = 8;
pub type Tag = [u8; TAG_LEN];

pub const TAG_MAIN_HEADER: Tag = *b"WVMAINHD";
pub const TAG_STREAM_HEADER: Tag = *b"WVSTREAM";
pub const TAG_PACKET_INDEX: Tag = *b"WVPACKIX";
pub const TAG_SYNC_INDEX: Tag = *b"WVSYNCIX";
pub const TAG_FILE_INDEX: Tag = *b"WVFILEIX";
pub const TAG_FOOTER: Tag = *b"WVFOOTER";
pub const TAG_TAIL: Tag = *b"WVTRAILR";

/// Upper bound for any v-coded length or count read from the wire.
/// Large enough for real containers, small enough that a corrupt count
/// cannot drive an unbounded allocation.
pub const MAX_WIRE_LEN: u64 = 1 << 30;

// ── Variable-length integers ─────────────────────────────────────────────────

/// Number of bytes `write_v` will emit for `value`.
pub fn v_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn write_v<W: Write>(w: &mut W, value: u64) -> Result<usize> {
    let n = v_len(value);
    let mut out = [0u8; 10];
    for (i, byte) in out[..n].iter_mut().enumerate() {
        let shift = 7 * (n - 1 - i);
        *byte = ((value >> shift) & 0x7f) as u8;
        if i != n - 1 {
            *byte |= 0x80;
        }
    }
    w.write_all(&out[..n])?;
    Ok(n)
}

pub fn read_v<R: Read>(r: &mut R) -> Result<u64> {
    let mut byte = [0u8; 1];
    r.read_exact(&mut byte)?;
    read_v_rest(byte[0], r)
}

/// Continue a v-coded read whose first byte was already consumed (used
/// where the first byte doubles as an EOF probe).
pub fn read_v_rest<R: Read>(first: u8, r: &mut R) -> Result<u64> {
    let mut value = (first & 0x7f) as u64;
    let mut more = first & 0x80 != 0;
    let mut seen = 1;
    while more {
        if seen == 10 {
            return Err(Error::BadRecord {
                what: "v-coded integer",
                detail: "over 10 bytes".into(),
            });
        }
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        if value >> 57 != 0 {
            return Err(Error::BadRecord {
                what: "v-coded integer",
                detail: "overflows 64 bits".into(),
            });
        }
        value = (value << 7) | (byte[0] & 0x7f) as u64;
        more = byte[0] & 0x80 != 0;
        seen += 1;
    }
    Ok(value)
}

/// Signed variant: zig-zag mapped onto the unsigned encoding.
pub fn write_sv<W: Write>(w: &mut W, value: i64) -> Result<usize> {
    write_v(w, ((value << 1) ^ (value >> 63)) as u64)
}

pub fn read_sv<R: Read>(r: &mut R) -> Result<i64> {
    let raw = read_v(r)?;
    Ok((raw >> 1) as i64 ^ -((raw & 1) as i64))
}

/// Read a v-coded length or count and apply the global sanity bound.
pub fn read_v_bounded<R: Read>(r: &mut R, limit: u64) -> Result<u64> {
    let value = read_v(r)?;
    if value > limit {
        return Err(Error::CorruptCount {
            count: value,
            limit,
        });
    }
    Ok(value)
}

// ── Tags ─────────────────────────────────────────────────────────────────────

pub fn write_tag<W: Write>(w: &mut W, tag: Tag) -> Result<()> {
    w.write_all(&tag)?;
    Ok(())
}

pub fn read_tag<R: Read>(r: &mut R) -> Result<Tag> {
    let mut tag = [0u8; TAG_LEN];
    r.read_exact(&mut tag)?;
    Ok(tag)
}

pub fn expect_tag<R: Read>(r: &mut R, expected: Tag) -> Result<()> {
    let found = read_tag(r)?;
    if found != expected {
        return Err(Error::BadTag { expected, found });
    }
    Ok(())
}

// ── Chunk framing ────────────────────────────────────────────────────────────

pub fn write_chunk<W: Write>(w: &mut W, tag: Tag, payload: &[u8]) -> Result<()> {
    write_tag(w, tag)?;
    write_v(w, payload.len() as u64)?;
    w.write_all(payload)?;
    write_tag(w, tag)?;
    Ok(())
}

/// Read a whole chunk: validates both tags and the payload length bound.
pub fn read_chunk<R: Read>(r: &mut R, tag: Tag) -> Result<Vec<u8>> {
    expect_tag(r, tag)?;
    let len = read_v_bounded(r, MAX_WIRE_LEN)? as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    expect_tag(r, tag)?;
    Ok(payload)
}

/// Total encoded size of a chunk with the given payload length.
pub fn chunk_len(payload_len: usize) -> u64 {
    (2 * TAG_LEN + v_len(payload_len as u64) + payload_len) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn v_round_trip_boundaries() {
        for value in [0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            let n = write_v(&mut buf, value).unwrap();
            assert_eq!(n, buf.len());
            assert_eq!(n, v_len(value));
            assert_eq!(read_v(&mut Cursor::new(&buf)).unwrap(), value);
        }
    }

    #[test]
    fn v_overflow_rejected() {
        // ten 7-bit groups carrying 70 significant bits
        let mut bytes = vec![0xffu8; 9];
        bytes.push(0x7f);
        assert!(matches!(
            read_v(&mut Cursor::new(&bytes)),
            Err(Error::BadRecord { .. })
        ));
    }

    #[test]
    fn sv_round_trip() {
        for value in [0i64, -1, 1, -64, 64, i64::MIN, i64::MAX] {
            let mut buf = Vec::new();
            write_sv(&mut buf, value).unwrap();
            assert_eq!(read_sv(&mut Cursor::new(&buf)).unwrap(), value);
        }
    }

    #[test]
    fn small_values_encode_in_one_byte() {
        let mut buf = Vec::new();
        write_v(&mut buf, 0x7f).unwrap();
        assert_eq!(buf, [0x7f]);
        buf.clear();
        write_v(&mut buf, 0x80).unwrap();
        assert_eq!(buf, [0x81, 0x00]);
    }

    #[test]
    fn chunk_round_trip_and_tag_mismatch() {
        let mut buf = Vec::new();
        write_chunk(&mut buf, TAG_FOOTER, b"payload").unwrap();
        assert_eq!(buf.len() as u64, chunk_len(7));
        let back = read_chunk(&mut Cursor::new(&buf), TAG_FOOTER).unwrap();
        assert_eq!(back, b"payload");

        let err = read_chunk(&mut Cursor::new(&buf), TAG_TAIL).unwrap_err();
        assert!(matches!(err, Error::BadTag { .. }));
    }

    #[test]
    fn bounded_count_rejected() {
        let mut buf = Vec::new();
        write_v(&mut buf, MAX_WIRE_LEN + 1).unwrap();
        let err = read_v_bounded(&mut Cursor::new(&buf), MAX_WIRE_LEN).unwrap_err();
        assert!(matches!(err, Error::CorruptCount { .. }));
    }
}

//! Timestamped media packets and their multiplexed wire header.

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::timestamp::Pts;
use crate::wire::{self, MAX_WIRE_LEN};

/// Reserved stream id carried by the terminator header a writer emits
/// after the last real packet. Lets a reader without a section
/// directory (non-seekable source) find the end of the packet region.
pub const END_STREAM_ID: u32 = u32::MAX;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// Decodable without reference to prior packets; a seek target.
        const KEYFRAME = 0x0001;
        /// Payload is known to be damaged.
        const CORRUPT = 0x0002;
        /// Consumer should drop this packet.
        const DISCARD = 0x0004;
    }
}

/// One encoded media packet.
///
/// `pos` is the byte offset of the packet header within the container,
/// when known. The payload `Vec` is deliberately reused by
/// [`crate::pbuffer::PacketBuffer`]; `reset` clears fields without
/// releasing its allocation.
#[derive(Debug, Clone, Default)]
pub struct Packet {
    pub stream_id: u32,
    pub flags: PacketFlags,
    pub pts: Pts,
    pub duration: u64,
    pub pos: Option<u64>,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(stream_id: u32, pts: Pts, data: Vec<u8>) -> Self {
        Packet {
            stream_id,
            pts,
            data,
            ..Packet::default()
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    pub fn set_keyframe(&mut self, keyframe: bool) {
        self.flags.set(PacketFlags::KEYFRAME, keyframe);
    }

    /// Clear all fields for slot reuse; the payload allocation survives.
    pub fn reset(&mut self) {
        self.stream_id = 0;
        self.flags = PacketFlags::empty();
        self.pts = Pts::NONE;
        self.duration = 0;
        self.pos = None;
        self.data.clear();
    }
}

/// The per-packet header preceding each payload in multiplexed mode.
///
/// Wire form: `v(stream_id) v(flags) fix_i64(pts) v(duration) v(size)`.
/// The pts is fixed-width because index repair tools parse packet
/// headers at arbitrary offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub stream_id: u32,
    pub flags: PacketFlags,
    pub pts: Pts,
    pub duration: u64,
    pub size: u64,
}

impl PacketHeader {
    pub fn of(packet: &Packet) -> Self {
        PacketHeader {
            stream_id: packet.stream_id,
            flags: packet.flags,
            pts: packet.pts,
            duration: packet.duration,
            size: packet.data.len() as u64,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_v(w, self.stream_id as u64)?;
        wire::write_v(w, self.flags.bits() as u64)?;
        w.write_i64::<LittleEndian>(self.pts.to_wire())?;
        wire::write_v(w, self.duration)?;
        wire::write_v(w, self.size)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let first = r.read_u8()?;
        Self::read_rest(first, r)
    }

    /// Finish parsing a header whose first byte was consumed as an EOF
    /// probe by the demultiplexer.
    pub fn read_rest<R: Read>(first: u8, r: &mut R) -> Result<Self> {
        let id = wire::read_v_rest(first, r)?;
        let stream_id = u32::try_from(id).map_err(|_| Error::BadRecord {
            what: "stream id",
            detail: format!("{id} exceeds 32 bits"),
        })?;
        let flags = PacketFlags::from_bits_truncate(wire::read_v(r)? as u32);
        let pts = Pts::from_wire(r.read_i64::<LittleEndian>()?);
        let duration = wire::read_v(r)?;
        let size = wire::read_v_bounded(r, MAX_WIRE_LEN)?;
        Ok(PacketHeader {
            stream_id,
            flags,
            pts,
            duration,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip() {
        let mut p = Packet::with_data(3, Pts::new(1234), vec![9; 17]);
        p.set_keyframe(true);
        p.duration = 40;

        let hdr = PacketHeader::of(&p);
        let mut buf = Vec::new();
        hdr.write(&mut buf).unwrap();
        assert_eq!(PacketHeader::read(&mut Cursor::new(&buf)).unwrap(), hdr);
    }

    #[test]
    fn unset_pts_survives_header() {
        let p = Packet::with_data(0, Pts::NONE, vec![]);
        let mut buf = Vec::new();
        PacketHeader::of(&p).write(&mut buf).unwrap();
        let back = PacketHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert!(!back.pts.is_set());
    }

    #[test]
    fn oversized_stream_id_rejected() {
        let mut buf = Vec::new();
        wire::write_v(&mut buf, u64::from(u32::MAX) + 1).unwrap();
        assert!(matches!(
            PacketHeader::read(&mut Cursor::new(&buf)),
            Err(Error::BadRecord { .. })
        ));
    }

    #[test]
    fn reset_keeps_payload_capacity() {
        let mut p = Packet::with_data(1, Pts::new(0), Vec::with_capacity(4096));
        p.data.extend_from_slice(&[1, 2, 3]);
        let cap = p.data.capacity();
        p.reset();
        assert!(p.data.is_empty());
        assert_eq!(p.data.capacity(), cap);
        assert!(!p.pts.is_set());
    }
}

//! The packet index: an append-only directory of every indexed packet.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::packet::PacketFlags;
use crate::timestamp::Pts;
use crate::wire::{self, TAG_PACKET_INDEX};

/// Entry count sanity bound; a corrupt count must fail, not allocate.
const MAX_ENTRIES: u64 = 1 << 26;

/// Fixed on-wire entry size: pos + size + stream_id + flags + pts + duration.
const ENTRY_LEN: usize = 8 + 4 + 4 + 4 + 8 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIndexEntry {
    pub pos: u64,
    pub size: u32,
    pub stream_id: u32,
    pub flags: PacketFlags,
    pub pts: Pts,
    pub duration: u64,
}

impl PacketIndexEntry {
    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }
}

/// Entries are kept in insertion order unless a caller explicitly
/// re-sorts; the write side appends in file order, so insertion order
/// and position order normally coincide.
#[derive(Debug, Clone, Default)]
pub struct PacketIndex {
    entries: Vec<PacketIndexEntry>,
}

impl PacketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        pos: u64,
        size: u32,
        stream_id: u32,
        pts: Pts,
        flags: PacketFlags,
        duration: u64,
    ) {
        self.entries.push(PacketIndexEntry {
            pos,
            size,
            stream_id,
            flags,
            pts,
            duration,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&PacketIndexEntry> {
        self.entries.get(idx)
    }

    pub fn entries(&self) -> &[PacketIndexEntry] {
        &self.entries
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Latest entry for `stream_id` with a set pts `<= target`, ties
    /// breaking toward the most recent qualifying entry. Returns the
    /// entry's index.
    pub fn seek(&self, stream_id: u32, target: i64) -> Option<usize> {
        let mut best = None;
        for (i, e) in self.entries.iter().enumerate() {
            if e.stream_id != stream_id {
                continue;
            }
            if let Some(pts) = e.pts.get() {
                if pts <= target {
                    best = Some(i);
                }
            }
        }
        best
    }

    /// Nearest keyframe entry for `stream_id` at or before byte `pos`.
    pub fn keyframe_before(&self, stream_id: u32, pos: u64) -> Option<usize> {
        let mut best = None;
        for (i, e) in self.entries.iter().enumerate() {
            if e.stream_id == stream_id && e.is_keyframe() && e.pos <= pos {
                best = Some(i);
            }
        }
        best
    }

    /// First entry for `stream_id` strictly after index `from`.
    pub fn next_packet(&self, stream_id: u32, from: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(from + 1)
            .find(|(_, e)| e.stream_id == stream_id)
            .map(|(i, _)| i)
    }

    /// First keyframe entry for `stream_id` strictly after index `from`.
    pub fn next_keyframe(&self, stream_id: u32, from: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .skip(from + 1)
            .find(|(_, e)| e.stream_id == stream_id && e.is_keyframe())
            .map(|(i, _)| i)
    }

    pub fn sort_by_pos(&mut self) {
        self.entries.sort_by_key(|e| e.pos);
    }

    pub fn sort_by_pts(&mut self) {
        self.entries.sort_by_key(|e| e.pts);
    }

    // ── Wire form ────────────────────────────────────────────────────────────

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_tag(w, TAG_PACKET_INDEX)?;
        wire::write_v(w, self.entries.len() as u64)?;
        for e in &self.entries {
            w.write_u64::<LittleEndian>(e.pos)?;
            w.write_u32::<LittleEndian>(e.size)?;
            w.write_u32::<LittleEndian>(e.stream_id)?;
            w.write_u32::<LittleEndian>(e.flags.bits())?;
            w.write_i64::<LittleEndian>(e.pts.to_wire())?;
            w.write_u64::<LittleEndian>(e.duration)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<PacketIndex> {
        wire::expect_tag(r, TAG_PACKET_INDEX)?;
        let count = wire::read_v_bounded(r, MAX_ENTRIES)?;
        // Reserve incrementally; the count alone must not drive
        // allocation before the bytes actually arrive.
        let mut entries = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let entry = Self::read_entry(r).map_err(|e| match e {
                Error::Io(inner) if inner.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Error::Truncated("packet index")
                }
                other => other,
            })?;
            entries.push(entry);
        }
        Ok(PacketIndex { entries })
    }

    fn read_entry<R: Read>(r: &mut R) -> Result<PacketIndexEntry> {
        Ok(PacketIndexEntry {
            pos: r.read_u64::<LittleEndian>()?,
            size: r.read_u32::<LittleEndian>()?,
            stream_id: r.read_u32::<LittleEndian>()?,
            flags: PacketFlags::from_bits_truncate(r.read_u32::<LittleEndian>()?),
            pts: Pts::from_wire(r.read_i64::<LittleEndian>()?),
            duration: r.read_u64::<LittleEndian>()?,
        })
    }

    /// Exact serialized size, used when reserving footer space.
    pub fn wire_len(&self) -> u64 {
        (wire::TAG_LEN + wire::v_len(self.entries.len() as u64)) as u64
            + (self.entries.len() * ENTRY_LEN) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> PacketIndex {
        let mut ix = PacketIndex::new();
        ix.add(100, 10, 0, Pts::new(0), PacketFlags::KEYFRAME, 10);
        ix.add(150, 20, 1, Pts::new(5), PacketFlags::KEYFRAME, 40);
        ix.add(200, 10, 0, Pts::new(10), PacketFlags::empty(), 10);
        ix.add(250, 30, 1, Pts::new(45), PacketFlags::empty(), 40);
        ix.add(300, 10, 0, Pts::new(20), PacketFlags::KEYFRAME, 10);
        ix
    }

    #[test]
    fn seek_latest_at_or_before() {
        let ix = sample();
        assert_eq!(ix.seek(0, 10), Some(2));
        assert_eq!(ix.seek(0, 15), Some(2));
        assert_eq!(ix.seek(0, 99), Some(4));
        // Smaller than every entry for the stream.
        assert_eq!(ix.seek(0, -1), None);
        assert_eq!(ix.seek(1, 45), Some(3));
    }

    #[test]
    fn keyframe_navigation() {
        let ix = sample();
        assert_eq!(ix.keyframe_before(0, 250), Some(0));
        assert_eq!(ix.keyframe_before(0, 300), Some(4));
        assert_eq!(ix.next_keyframe(0, 0), Some(4));
        assert_eq!(ix.next_packet(1, 1), Some(3));
        assert_eq!(ix.next_packet(1, 3), None);
    }

    #[test]
    fn unset_pts_entries_never_match_seek() {
        let mut ix = PacketIndex::new();
        ix.add(0, 1, 0, Pts::NONE, PacketFlags::empty(), 0);
        assert_eq!(ix.seek(0, i64::MAX), None);
    }

    #[test]
    fn wire_round_trip_preserves_seek() {
        let ix = sample();
        let mut buf = Vec::new();
        ix.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, ix.wire_len());

        let back = PacketIndex::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.len(), ix.len());
        for target in [-1, 0, 5, 10, 45, 1000] {
            for stream in [0, 1] {
                assert_eq!(back.seek(stream, target), ix.seek(stream, target));
            }
        }
    }

    #[test]
    fn truncated_index_rejected() {
        let ix = sample();
        let mut buf = Vec::new();
        ix.write(&mut buf).unwrap();
        buf.truncate(buf.len() - 5);
        assert!(matches!(
            PacketIndex::read(&mut Cursor::new(&buf)),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn corrupt_count_rejected() {
        let mut buf = Vec::new();
        wire::write_tag(&mut buf, TAG_PACKET_INDEX).unwrap();
        wire::write_v(&mut buf, MAX_ENTRIES + 1).unwrap();
        assert!(matches!(
            PacketIndex::read(&mut Cursor::new(&buf)),
            Err(Error::CorruptCount { .. })
        ));
    }

    #[test]
    fn explicit_resort_by_pts() {
        let mut ix = PacketIndex::new();
        ix.add(10, 1, 0, Pts::new(30), PacketFlags::empty(), 0);
        ix.add(20, 1, 0, Pts::new(10), PacketFlags::empty(), 0);
        ix.sort_by_pts();
        assert_eq!(ix.get(0).unwrap().pts, Pts::new(10));
        ix.sort_by_pos();
        assert_eq!(ix.get(0).unwrap().pos, 10);
    }
}

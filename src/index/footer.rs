//! The container footer and tail.
//!
//! The footer is one length-delimited chunk: a per-stream statistics
//! record array followed by the packet index. The tail is the last 24
//! bytes of the file: the tail tag, the footer's starting offset, and
//! the total file size. A reader seeks to the end, reads the tail, and
//! jumps straight to the footer without scanning packets.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::record::Record;
use crate::wire::{self, TAG_FOOTER, TAG_TAIL};

use super::packet::PacketIndex;

/// Tail size on disk: tag + footer offset + file size.
pub const TAIL_LEN: u64 = (wire::TAG_LEN + 8 + 8) as u64;

const MAX_STREAMS: u64 = 1 << 16;

#[derive(Debug, Clone, Default)]
pub struct Footer {
    /// One statistics record per stream (see
    /// [`crate::stream::StreamStats::to_record`]).
    pub stats: Vec<Record>,
    pub index: PacketIndex,
}

impl Footer {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let mut payload = Vec::new();
        wire::write_v(&mut payload, self.stats.len() as u64)?;
        for rec in &self.stats {
            rec.write(&mut payload)?;
        }
        self.index.write(&mut payload)?;
        wire::write_chunk(w, TAG_FOOTER, &payload)
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Footer> {
        let payload = wire::read_chunk(r, TAG_FOOTER)?;
        let mut cursor = &payload[..];
        let count = wire::read_v_bounded(&mut cursor, MAX_STREAMS)?;
        let mut stats = Vec::with_capacity(count as usize);
        for _ in 0..count {
            stats.push(Record::read(&mut cursor)?);
        }
        let index = PacketIndex::read(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(Error::BadRecord {
                what: "footer",
                detail: format!("{} trailing bytes", cursor.len()),
            });
        }
        Ok(Footer { stats, index })
    }
}

/// The fixed trailer at the very end of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    pub footer_offset: u64,
    pub file_size: u64,
}

impl Tail {
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_tag(w, TAG_TAIL)?;
        w.write_u64::<LittleEndian>(self.footer_offset)?;
        w.write_u64::<LittleEndian>(self.file_size)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Tail> {
        wire::expect_tag(r, TAG_TAIL)?;
        Ok(Tail {
            footer_offset: r.read_u64::<LittleEndian>()?,
            file_size: r.read_u64::<LittleEndian>()?,
        })
    }
}

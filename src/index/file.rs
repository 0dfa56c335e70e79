//! The file index: a small fixed-capacity directory of named section
//! offsets, written at a known location and patched in place once the
//! section offsets are known.
//!
//! Offsets are never legitimately zero (the main header occupies offset
//! 0), so on read the entry list is truncated at the first zero offset;
//! that recovers the live entry count even though the on-disk slot
//! count is fixed. Adding to a full index fails loudly with
//! [`Error::Capacity`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::wire::{self, Tag, TAG_FILE_INDEX, TAG_LEN};

/// Default on-disk slot count.
pub const FILE_INDEX_SLOTS: usize = 16;

const MAX_SLOTS: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIndexEntry {
    pub tag: Tag,
    pub offset: u64,
}

#[derive(Debug, Clone)]
pub struct FileIndex {
    entries: Vec<FileIndexEntry>,
    slots: usize,
}

impl Default for FileIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FileIndex {
    pub fn new() -> Self {
        Self::with_slots(FILE_INDEX_SLOTS)
    }

    pub fn with_slots(slots: usize) -> Self {
        FileIndex {
            entries: Vec::new(),
            slots,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[FileIndexEntry] {
        &self.entries
    }

    pub fn get(&self, tag: Tag) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.tag == tag)
            .map(|e| e.offset)
    }

    pub fn add(&mut self, tag: Tag, offset: u64) -> Result<()> {
        if offset == 0 {
            // Zero is the on-disk terminator and can never name a section.
            return Err(Error::BadRecord {
                what: "file index entry",
                detail: "zero offset".into(),
            });
        }
        if self.entries.len() >= self.slots {
            return Err(Error::Capacity("file index"));
        }
        self.entries.push(FileIndexEntry { tag, offset });
        Ok(())
    }

    /// On-disk size for a given slot count; fixed so the directory can
    /// be rewritten in place.
    pub fn wire_len(slots: usize) -> u64 {
        (TAG_LEN + 2 + slots * (TAG_LEN + 8)) as u64
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_tag(w, TAG_FILE_INDEX)?;
        w.write_u16::<LittleEndian>(self.slots as u16)?;
        for entry in &self.entries {
            w.write_all(&entry.tag)?;
            w.write_u64::<LittleEndian>(entry.offset)?;
        }
        for _ in self.entries.len()..self.slots {
            w.write_all(&[0u8; TAG_LEN])?;
            w.write_u64::<LittleEndian>(0)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<FileIndex> {
        wire::expect_tag(r, TAG_FILE_INDEX)?;
        let slots = r.read_u16::<LittleEndian>()? as u64;
        if slots > MAX_SLOTS {
            return Err(Error::CorruptCount {
                count: slots,
                limit: MAX_SLOTS,
            });
        }
        let slots = slots as usize;
        let mut entries = Vec::new();
        let mut live = true;
        for _ in 0..slots {
            let tag = wire::read_tag(r)?;
            let offset = r.read_u64::<LittleEndian>()?;
            // First zero offset terminates the live entries; remaining
            // slots are padding and still need to be consumed.
            if offset == 0 {
                live = false;
            }
            if live {
                entries.push(FileIndexEntry { tag, offset });
            }
        }
        Ok(FileIndex { entries, slots })
    }
}

//! Timestamp-ordered reordering and seek-by-time lookup.
//!
//! [`PtsCache`] holds packets awaiting release in presentation order;
//! decoders emit frames in decode order and pull them back out lowest
//! timestamp first. [`SeekIndex`] is the container-level directory of
//! `(pts, byte offset)` pairs used to resolve a seek target to a file
//! position.

use crate::packet::Packet;
use crate::timestamp::Pts;

/// A cache of packets awaiting timestamp-ordered release.
///
/// Fixed mode bounds the reorder depth: inserting into a full cache
/// evicts and returns the current minimum. Growing mode never evicts on
/// insert; the caller drains with [`pop_min`](Self::pop_min).
///
/// Entries are moved, never copied; the caller owns each packet's
/// payload before insertion and after extraction.
#[derive(Debug, Default)]
pub struct PtsCache {
    entries: Vec<Packet>,
    capacity: Option<usize>,
}

impl PtsCache {
    /// Reorder ring with a fixed depth (at least 1).
    pub fn fixed(depth: usize) -> Self {
        PtsCache {
            entries: Vec::with_capacity(depth.max(1)),
            capacity: Some(depth.max(1)),
        }
    }

    pub fn growing() -> Self {
        PtsCache::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn min_index(&self) -> Option<usize> {
        // Unset timestamps sort first and so are released first; a
        // packet with no pts cannot wait out reordering.
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, p)| p.pts)
            .map(|(i, _)| i)
    }

    /// Insert a packet. In fixed mode, a full cache first releases its
    /// minimum-timestamp packet and returns it.
    pub fn put(&mut self, packet: Packet) -> Option<Packet> {
        let evicted = match self.capacity {
            Some(cap) if self.entries.len() >= cap => self.pop_min(),
            _ => None,
        };
        self.entries.push(packet);
        evicted
    }

    /// Remove and return the packet with the smallest timestamp.
    pub fn pop_min(&mut self) -> Option<Packet> {
        let idx = self.min_index()?;
        Some(self.entries.swap_remove(idx))
    }

    /// Smallest timestamp currently held, without removing.
    pub fn min_pts(&self) -> Pts {
        self.min_index()
            .map(|i| self.entries[i].pts)
            .unwrap_or(Pts::NONE)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekIndexEntry {
    pub pts: i64,
    pub pos: u64,
}

/// Container-level seek-by-time directory. Entries are appended in
/// nondecreasing pts order as the file is written.
#[derive(Debug, Clone, Default)]
pub struct SeekIndex {
    entries: Vec<SeekIndexEntry>,
}

impl SeekIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pts: i64, pos: u64) {
        debug_assert!(self.entries.last().map_or(true, |e| e.pts <= pts));
        self.entries.push(SeekIndexEntry { pts, pos });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SeekIndexEntry> {
        self.entries.get(idx)
    }

    /// Index of the latest entry with `pts <= target`, clamped: a
    /// target below every entry yields 0, a target at or past the last
    /// entry yields the last index. Empty index: `None`.
    pub fn seek(&self, target: i64) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.entries[mid].pts <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Some(lo.saturating_sub(1))
    }
}

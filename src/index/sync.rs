//! The sync index: per-offset snapshots of every stream's last-known
//! timestamp.
//!
//! Coarser than the packet index but cheap to scan for multi-stream
//! seeking: jumping to a sync point's byte offset guarantees that, for
//! every stream, the first packet at or after that offset has a
//! timestamp at or past the snapshot value. Snapshots are stored in the
//! global time unit so a single target compares against all streams.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::timestamp::Pts;
use crate::wire::{self, TAG_SYNC_INDEX};

const MAX_POINTS: u64 = 1 << 24;
const MAX_STREAMS: u64 = 1 << 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPoint {
    pub pos: u64,
    /// One snapshot per stream, in stream declaration order, in the
    /// global time unit. Unset for streams that have not yet produced a
    /// timestamped packet at this offset.
    pub pts: Vec<Pts>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncIndex {
    streams: usize,
    points: Vec<SyncPoint>,
}

impl SyncIndex {
    pub fn new(streams: usize) -> Self {
        SyncIndex {
            streams,
            points: Vec::new(),
        }
    }

    pub fn num_streams(&self) -> usize {
        self.streams
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&SyncPoint> {
        self.points.get(idx)
    }

    pub fn points(&self) -> &[SyncPoint] {
        &self.points
    }

    /// Record a snapshot of every stream's current timestamp at `pos`.
    pub fn add(&mut self, pos: u64, snapshot: Vec<Pts>) {
        debug_assert_eq!(snapshot.len(), self.streams);
        self.points.push(SyncPoint { pos, pts: snapshot });
    }

    /// Index of the latest sync point at which every stream with a set
    /// snapshot is still at or before `target` (global time unit).
    /// Clamps: a target before every point yields 0, a target at or
    /// past the last point yields the last index. Empty index: `None`.
    pub fn seek(&self, target: i64) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, point) in self.points.iter().enumerate() {
            let all_at_or_before = point
                .pts
                .iter()
                .filter_map(|p| p.get())
                .all(|pts| pts <= target);
            if all_at_or_before {
                best = i;
            }
        }
        Some(best)
    }

    // ── Wire form ────────────────────────────────────────────────────────────

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_tag(w, TAG_SYNC_INDEX)?;
        wire::write_v(w, self.streams as u64)?;
        wire::write_v(w, self.points.len() as u64)?;
        for point in &self.points {
            w.write_u64::<LittleEndian>(point.pos)?;
            for pts in &point.pts {
                w.write_i64::<LittleEndian>(pts.to_wire())?;
            }
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<SyncIndex> {
        wire::expect_tag(r, TAG_SYNC_INDEX)?;
        let streams = wire::read_v_bounded(r, MAX_STREAMS)? as usize;
        let count = wire::read_v_bounded(r, MAX_POINTS)?;
        let mut points = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let pos = read_fixed(r, "sync index")?;
            let mut pts = Vec::with_capacity(streams);
            for _ in 0..streams {
                pts.push(Pts::from_wire(read_fixed_i64(r, "sync index")?));
            }
            points.push(SyncPoint { pos, pts });
        }
        Ok(SyncIndex { streams, points })
    }
}

fn read_fixed<R: Read>(r: &mut R, what: &'static str) -> Result<u64> {
    r.read_u64::<LittleEndian>().map_err(|e| truncation(e, what))
}

fn read_fixed_i64<R: Read>(r: &mut R, what: &'static str) -> Result<i64> {
    r.read_i64::<LittleEndian>().map_err(|e| truncation(e, what))
}

fn truncation(e: std::io::Error, what: &'static str) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Truncated(what)
    } else {
        Error::Io(e)
    }
}

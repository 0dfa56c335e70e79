//! Reusable per-stream packet queue.
//!
//! Slots cycle between a FIFO of committed packets and a free pool;
//! payload allocations are cleared on reuse, never dropped, so steady
//! demultiplexing settles into zero-allocation operation. This pooling
//! is deliberate, not a leak: see `free` and [`Packet::reset`].
//!
//! A packet returned by [`get_read`](PacketBuffer::get_read) or
//! [`peek_read`](PacketBuffer::peek_read) is borrowed until the next
//! mutating call on the buffer; callers copy the payload if it must
//! outlive that.

use std::collections::VecDeque;

use crate::packet::Packet;
use crate::timestamp::{Pts, TimeBase, GLOBAL_TIMEBASE};

/// Free slots retained beyond this are dropped.
const MAX_FREE_SLOTS: usize = 64;

type LockHook = Box<dyn Fn() + Send>;

pub struct PacketBuffer {
    queue: VecDeque<Packet>,
    free: Vec<Packet>,
    /// A write slot handed out but not yet committed.
    pending: Option<Packet>,
    /// The packet most recently popped by `get_read`; recycled on the
    /// next mutating call.
    last_read: Option<Packet>,
    timebase: TimeBase,
    hooks: Option<(LockHook, LockHook)>,
}

impl std::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("queued", &self.queue.len())
            .field("free", &self.free.len())
            .field("timebase", &self.timebase)
            .finish()
    }
}

impl PacketBuffer {
    /// `timebase` is the stream's native unit, used by
    /// [`min_pts`](Self::min_pts) to scale into the global unit.
    pub fn new(timebase: TimeBase) -> Self {
        PacketBuffer {
            queue: VecDeque::new(),
            free: Vec::new(),
            pending: None,
            last_read: None,
            timebase,
            hooks: None,
        }
    }

    /// Install lock/unlock hooks called around the write accessor pair
    /// (`get_write_slot` .. `commit_write`), making the sink safe for
    /// one producer driven from multiple external threads. The engine
    /// itself performs no locking.
    pub fn set_lock_hooks(&mut self, lock: LockHook, unlock: LockHook) {
        self.hooks = Some((lock, unlock));
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn recycle(&mut self, mut packet: Packet) {
        packet.reset();
        if self.free.len() < MAX_FREE_SLOTS {
            self.free.push(packet);
        }
    }

    fn retire_last_read(&mut self) {
        if let Some(p) = self.last_read.take() {
            self.recycle(p);
        }
    }

    // ── Write side ───────────────────────────────────────────────────────────

    /// Hand out a cleared, reusable slot. The slot becomes visible to
    /// readers only on [`commit_write`](Self::commit_write); a second
    /// call before commit discards the previous uncommitted slot.
    pub fn get_write_slot(&mut self) -> &mut Packet {
        if let Some((lock, _)) = &self.hooks {
            lock();
        }
        self.retire_last_read();
        if let Some(p) = self.pending.take() {
            self.recycle(p);
        }
        let mut slot = self.free.pop().unwrap_or_default();
        slot.reset();
        self.pending.insert(slot)
    }

    /// The slot handed out by [`get_write_slot`](Self::get_write_slot)
    /// and not yet committed, if any. Lets a writer resume filling a
    /// slot after a retryable transport stall.
    pub fn pending_slot(&mut self) -> Option<&mut Packet> {
        self.pending.as_mut()
    }

    /// Publish the pending slot at the back of the FIFO.
    pub fn commit_write(&mut self) {
        if let Some(p) = self.pending.take() {
            self.queue.push_back(p);
        }
        if let Some((_, unlock)) = &self.hooks {
            unlock();
        }
    }

    /// Discard the pending slot without publishing it. Releases the
    /// lock taken at [`get_write_slot`](Self::get_write_slot).
    pub fn abort_write(&mut self) {
        if let Some(p) = self.pending.take() {
            self.recycle(p);
        }
        if let Some((_, unlock)) = &self.hooks {
            unlock();
        }
    }

    /// Roll back a speculative append: drop the newest committed
    /// packet. Returns false when the queue is empty.
    pub fn remove_last(&mut self) -> bool {
        self.retire_last_read();
        match self.queue.pop_back() {
            Some(p) => {
                self.recycle(p);
                true
            }
            None => false,
        }
    }

    // ── Read side ────────────────────────────────────────────────────────────

    /// Pop the oldest visible packet. The returned borrow is valid
    /// until the next mutating call; the slot is then requeued for
    /// reuse, not freed.
    pub fn get_read(&mut self) -> Option<&Packet> {
        self.retire_last_read();
        let p = self.queue.pop_front()?;
        Some(self.last_read.insert(p))
    }

    /// Inspect the oldest visible packet without removing it.
    pub fn peek_read(&self) -> Option<&Packet> {
        self.queue.front()
    }

    /// Smallest set timestamp over the currently buffered packets,
    /// scaled to the global time unit. Order-independent; unset
    /// timestamps are skipped. Unset when no buffered packet carries a
    /// timestamp.
    pub fn min_pts(&self) -> Pts {
        self.queue
            .iter()
            .filter(|p| p.pts.is_set())
            .map(|p| p.pts.rescale(self.timebase, GLOBAL_TIMEBASE))
            .min()
            .unwrap_or(Pts::NONE)
    }

    /// Drop all buffered packets (their slots go to the free pool).
    /// Used after a seek.
    pub fn clear(&mut self) {
        self.retire_last_read();
        if let Some(p) = self.pending.take() {
            self.recycle(p);
        }
        while let Some(p) = self.queue.pop_front() {
            self.recycle(p);
        }
    }
}

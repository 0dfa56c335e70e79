//! Packet demultiplexing over one shared channel or one channel per
//! stream.
//!
//! In [`Transport::Multiplexed`] mode every packet arrives on a single
//! channel as a wire header plus payload; `demux_iteration` pulls the
//! next packet and routes it into the owning stream's
//! [`PacketBuffer`]. In [`Transport::Separate`] mode each stream has
//! its own duplex channel and packets are fetched on demand with a
//! READY/PACKET/EOS handshake (see [`SeparateSink`] for the producer
//! side). The consumer waits on the reply with a bounded poll, so a
//! dead producer surfaces as [`Error::Timeout`] rather than a spin.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use tracing::{debug, trace};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketHeader, END_STREAM_ID};
use crate::pbuffer::PacketBuffer;
use crate::stream::{StreamHeader, StreamKind};
use crate::timestamp::Pts;
use crate::wire;

mod sink;

pub use sink::SeparateSink;

/// Control message ids for the separate-stream handshake.
pub(crate) const MSG_READY: u64 = 1;
pub(crate) const MSG_EOS: u64 = 2;
pub(crate) const MSG_PACKET: u64 = 3;

/// How long a separate-stream fetch waits for the producer's reply.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// All streams share one channel; packets carry wire headers.
    Multiplexed,
    /// One duplex channel per stream, fetch-on-demand.
    Separate,
}

/// Outcome of one multiplexed demux iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A packet was delivered into the given stream's buffer.
    Delivered(usize),
    /// A packet for a discarded stream was skipped.
    Skipped(usize),
    /// The source is exhausted (end of data or end-of-streams marker).
    Finished,
}

/// Result of asking a stream for its next packet.
#[derive(Debug)]
pub enum NextPacket<'a> {
    Packet(&'a Packet),
    /// Nothing buffered yet on a discontinuous stream; ask again.
    Again,
    Eof,
}

/// Per-stream demux state.
pub struct DemuxStream {
    pub header: StreamHeader,
    buffer: PacketBuffer,
    /// Continuous streams block until a packet is available;
    /// discontinuous streams report [`NextPacket::Again`] instead.
    continuous: bool,
    /// Discarded streams have their packets skipped at the source.
    discard: bool,
    /// Transport channel in separate mode, `None` when multiplexed.
    channel: Option<Channel>,
}

impl DemuxStream {
    fn new(header: StreamHeader, channel: Option<Channel>) -> Self {
        let buffer = PacketBuffer::new(header.timebase);
        DemuxStream {
            header,
            buffer,
            continuous: true,
            discard: false,
            channel,
        }
    }

    pub fn set_continuous(&mut self, continuous: bool) {
        self.continuous = continuous;
    }

    pub fn set_discard(&mut self, discard: bool) {
        self.discard = discard;
        if discard {
            self.buffer.clear();
        }
    }

    pub fn is_discarded(&self) -> bool {
        self.discard
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Earliest buffered presentation time, in the global timebase.
    pub fn min_buffered_pts(&self) -> Pts {
        self.buffer.min_pts()
    }
}

pub struct Demuxer {
    transport: Transport,
    /// The shared source in multiplexed mode.
    shared: Option<Channel>,
    streams: Vec<DemuxStream>,
    by_id: HashMap<u32, usize>,
    /// Byte offset where multiplexed packet data ends, when known.
    /// Index sections follow the packets in a finalized container and
    /// must not be parsed as packet headers.
    data_end: Option<u64>,
    /// Wire header bytes consumed before a retryable stall; replayed
    /// at the front of the next iteration so the packet boundary
    /// survives a WouldBlock return.
    hdr_stash: Vec<u8>,
    /// Payload fill carried over a retryable stall.
    resume: Option<PayloadResume>,
    finished: bool,
}

struct PayloadResume {
    index: usize,
    filled: usize,
    total: usize,
}

/// Serves previously stashed bytes first, then reads from the channel
/// while recording every new byte into the stash. The caller clears
/// the stash once a parse completes; on a retryable failure the stash
/// keeps the consumed bytes for the next attempt.
struct StashedRead<'a> {
    channel: &'a mut Channel,
    stash: &'a mut Vec<u8>,
    off: usize,
}

impl io::Read for StashedRead<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.off < self.stash.len() {
            let n = buf.len().min(self.stash.len() - self.off);
            buf[..n].copy_from_slice(&self.stash[self.off..self.off + n]);
            self.off += n;
            return Ok(n);
        }
        let n = self.channel.read(buf).map_err(io::Error::from)?;
        if n == 0 && !self.channel.is_eof() {
            return Err(io::Error::from(Error::WouldBlock));
        }
        self.stash.extend_from_slice(&buf[..n]);
        self.off += n;
        Ok(n)
    }
}

impl Demuxer {
    /// Demultiplexer over one shared channel carrying wire headers.
    pub fn multiplexed(channel: Channel, headers: Vec<StreamHeader>) -> Self {
        let mut streams = Vec::with_capacity(headers.len());
        let mut by_id = HashMap::new();
        for header in headers {
            by_id.insert(header.id, streams.len());
            streams.push(DemuxStream::new(header, None));
        }
        Demuxer {
            transport: Transport::Multiplexed,
            shared: Some(channel),
            streams,
            by_id,
            data_end: None,
            hdr_stash: Vec::new(),
            resume: None,
            finished: false,
        }
    }

    /// Demultiplexer with one duplex channel per stream.
    pub fn separate(streams: Vec<(StreamHeader, Channel)>) -> Self {
        let mut out = Vec::with_capacity(streams.len());
        let mut by_id = HashMap::new();
        for (header, channel) in streams {
            by_id.insert(header.id, out.len());
            out.push(DemuxStream::new(header, Some(channel)));
        }
        Demuxer {
            transport: Transport::Separate,
            shared: None,
            streams: out,
            by_id,
            data_end: None,
            hdr_stash: Vec::new(),
            resume: None,
            finished: false,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, index: usize) -> Option<&DemuxStream> {
        self.streams.get(index)
    }

    pub fn stream_mut(&mut self, index: usize) -> Option<&mut DemuxStream> {
        self.streams.get_mut(index)
    }

    pub fn stream_by_id(&self, id: u32) -> Option<&DemuxStream> {
        self.by_id.get(&id).map(|&i| &self.streams[i])
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bound the multiplexed packet region; demultiplexing finishes
    /// when the shared channel reaches `offset`.
    pub fn set_data_end(&mut self, offset: Option<u64>) {
        self.data_end = offset;
    }

    /// Pull one packet off the shared channel and route it.
    ///
    /// Multiplexed mode only. A packet addressed to a message-kind
    /// stream marks the end of all streams. A clean end of data at a
    /// packet boundary also finishes the demuxer; end of data inside a
    /// header or payload is a truncation error. A WouldBlock from a
    /// non-blocking source leaves the iteration restartable: header
    /// bytes and payload progress already consumed are kept and the
    /// next call resumes where the source stalled.
    pub fn demux_iteration(&mut self) -> Result<Progress> {
        if self.finished {
            return Ok(Progress::Finished);
        }
        if let Some(rs) = self.resume.take() {
            return self.continue_payload(rs);
        }
        let stashed = self.hdr_stash.len() as u64;
        let channel = self
            .shared
            .as_mut()
            .ok_or(Error::Unsupported("demux iteration on separate transport"))?;

        let pos = channel.position() - stashed;
        if let Some(end) = self.data_end {
            if pos >= end {
                self.finished = true;
                return Ok(Progress::Finished);
            }
        }
        if self.hdr_stash.is_empty() {
            // One-byte probe: clean EOF here is a legal end of packets.
            let mut probe = [0u8; 1];
            loop {
                match channel.read(&mut probe)? {
                    0 if channel.is_eof() => {
                        debug!("packet source exhausted at offset {pos}");
                        self.finished = true;
                        return Ok(Progress::Finished);
                    }
                    0 => return Err(Error::WouldBlock),
                    _ => break,
                }
            }
            self.hdr_stash.push(probe[0]);
        }

        let header = {
            let mut src = StashedRead {
                channel: &mut *channel,
                stash: &mut self.hdr_stash,
                off: 0,
            };
            match PacketHeader::read(&mut src) {
                Ok(h) => h,
                Err(Error::Eof) => return Err(Error::Truncated("packet header")),
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Error::Truncated("packet header"))
                }
                Err(e) => return Err(e),
            }
        };
        self.hdr_stash.clear();

        if header.stream_id == END_STREAM_ID {
            trace!("packet region terminator at offset {pos}");
            channel.skip(header.size)?;
            self.finished = true;
            return Ok(Progress::Finished);
        }
        let index = match self.by_id.get(&header.stream_id) {
            Some(&i) => i,
            None => return Err(Error::UnknownStream(header.stream_id)),
        };

        if self.streams[index].header.kind == StreamKind::Message {
            trace!("end-of-streams marker on stream {}", header.stream_id);
            channel.skip(header.size)?;
            self.finished = true;
            return Ok(Progress::Finished);
        }

        if self.streams[index].discard {
            channel.skip(header.size)?;
            return Ok(Progress::Skipped(index));
        }

        let stream = &mut self.streams[index];
        let slot = stream.buffer.get_write_slot();
        slot.stream_id = header.stream_id;
        slot.flags = header.flags;
        slot.pts = header.pts;
        slot.duration = header.duration;
        slot.pos = Some(pos);
        slot.data.resize(header.size as usize, 0);
        self.continue_payload(PayloadResume {
            index,
            filled: 0,
            total: header.size as usize,
        })
    }

    /// Fill the pending write slot from the shared channel. On a
    /// retryable stall the progress is parked in `resume` and the next
    /// `demux_iteration` call picks it back up.
    fn continue_payload(&mut self, mut rs: PayloadResume) -> Result<Progress> {
        let channel = self
            .shared
            .as_mut()
            .ok_or(Error::Unsupported("demux iteration on separate transport"))?;
        let stream = &mut self.streams[rs.index];
        let outcome = match stream.buffer.pending_slot() {
            Some(slot) => loop {
                if rs.filled >= rs.total {
                    break Ok(());
                }
                match channel.read(&mut slot.data[rs.filled..rs.total]) {
                    Ok(0) if channel.is_eof() => break Err(Error::Truncated("packet payload")),
                    Ok(0) => break Err(Error::WouldBlock),
                    Ok(n) => rs.filled += n,
                    Err(e) => break Err(e),
                }
            },
            // The slot was dropped out from under the fill (the stream
            // was discarded mid-packet); keep the channel aligned by
            // skipping the rest of the payload.
            None => {
                channel.skip((rs.total - rs.filled) as u64)?;
                return Ok(Progress::Skipped(rs.index));
            }
        };
        match outcome {
            Ok(()) => {
                stream.buffer.commit_write();
                trace!(
                    stream = stream.header.id,
                    size = rs.total,
                    "packet delivered"
                );
                Ok(Progress::Delivered(rs.index))
            }
            Err(e @ (Error::WouldBlock | Error::Timeout)) => {
                self.resume = Some(rs);
                Err(e)
            }
            Err(e) => {
                stream.buffer.abort_write();
                Err(e)
            }
        }
    }

    /// Next packet for the stream at `index`. The returned reference
    /// stays valid until the next call touching that stream's buffer.
    pub fn read_packet(&mut self, index: usize) -> Result<NextPacket<'_>> {
        if index >= self.streams.len() {
            return Err(Error::UnknownStream(index as u32));
        }
        match self.transport {
            Transport::Multiplexed => self.read_multiplexed(index),
            Transport::Separate => self.read_separate(index),
        }
    }

    fn read_multiplexed(&mut self, index: usize) -> Result<NextPacket<'_>> {
        while self.streams[index].buffer.is_empty() {
            if self.finished {
                return Ok(NextPacket::Eof);
            }
            if !self.streams[index].continuous {
                // fill opportunistically, then report state
                match self.demux_iteration()? {
                    Progress::Finished if self.streams[index].buffer.is_empty() => {
                        return Ok(NextPacket::Eof)
                    }
                    _ => {}
                }
                if self.streams[index].buffer.is_empty() && !self.finished {
                    return Ok(NextPacket::Again);
                }
                continue;
            }
            self.demux_iteration()?;
        }
        match self.streams[index].buffer.get_read() {
            Some(p) => Ok(NextPacket::Packet(p)),
            None => Ok(NextPacket::Eof),
        }
    }

    /// Fetch-on-demand over the stream's own channel: send READY, then
    /// wait (bounded) for PACKET + header + payload, or EOS.
    fn read_separate(&mut self, index: usize) -> Result<NextPacket<'_>> {
        let stream = &mut self.streams[index];
        if !stream.buffer.is_empty() {
            match stream.buffer.get_read() {
                Some(p) => return Ok(NextPacket::Packet(p)),
                None => return Ok(NextPacket::Eof),
            }
        }
        let channel = stream
            .channel
            .as_mut()
            .ok_or(Error::Unsupported("stream has no transport channel"))?;

        wire::write_v(channel, MSG_READY)?;
        channel.flush()?;
        if !channel.poll(Some(HANDSHAKE_TIMEOUT))? {
            return Err(Error::Timeout);
        }
        match wire::read_v(channel)? {
            MSG_EOS => {
                debug!(stream = stream.header.id, "end of separate stream");
                Ok(NextPacket::Eof)
            }
            MSG_PACKET => {
                let header = PacketHeader::read(channel)?;
                let slot = stream.buffer.get_write_slot();
                slot.stream_id = header.stream_id;
                slot.flags = header.flags;
                slot.pts = header.pts;
                slot.duration = header.duration;
                slot.data.resize(header.size as usize, 0);
                match channel.read_exact(&mut slot.data) {
                    Ok(()) => {}
                    Err(Error::Eof) => {
                        stream.buffer.abort_write();
                        return Err(Error::Truncated("packet payload"));
                    }
                    Err(e) => {
                        stream.buffer.abort_write();
                        return Err(e);
                    }
                }
                stream.buffer.commit_write();
                match stream.buffer.get_read() {
                    Some(p) => Ok(NextPacket::Packet(p)),
                    None => Ok(NextPacket::Eof),
                }
            }
            other => Err(Error::BadHandshake(other)),
        }
    }

    /// Reposition the shared channel and drop all buffered packets.
    /// Used by container-level seeking.
    pub(crate) fn reposition(&mut self, offset: u64) -> Result<()> {
        let channel = self
            .shared
            .as_mut()
            .ok_or(Error::Unsupported("seek on separate transport"))?;
        channel.seek(std::io::SeekFrom::Start(offset))?;
        for stream in &mut self.streams {
            stream.buffer.clear();
        }
        self.hdr_stash.clear();
        self.resume = None;
        self.finished = false;
        Ok(())
    }
}

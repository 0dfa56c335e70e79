//! Container writing and reading.
//!
//! On-disk layout, in order:
//!
//! ```text
//! WVMAINHD chunk      main header record (version, uuid, creation time)
//! WVFILEIX directory  fixed-size section directory, patched on finalize
//! WVSTREAM chunk xN   one stream header record per stream
//! packets             wire header + payload, interleaved
//! WVSYNCIX            sync index
//! WVFOOTER chunk      per-stream statistics records + packet index
//! WVTRAILR            footer offset + file size
//! ```
//!
//! [`ContainerWriter`] produces this layout on any writable channel;
//! the section directory and trailer are only useful when the channel
//! is seekable, but the stream stays parseable front to back without
//! them. [`ContainerReader`] consumes it, folding footer statistics
//! back into the stream headers when the channel can seek.

use std::collections::HashMap;
use std::io::SeekFrom;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::Channel;
use crate::demux::{Demuxer, NextPacket};
use crate::error::{Error, Result};
use crate::index::{FileIndex, Footer, PacketIndex, SyncIndex, Tail, TAIL_LEN};
use crate::packet::{Packet, PacketFlags, PacketHeader, END_STREAM_ID};
use crate::record::{Record, Value};
use crate::stream::{StreamHeader, StreamStats};
use crate::timestamp::{Pts, GLOBAL_TIMEBASE};
use crate::wire::{self, TAG_FOOTER, TAG_MAIN_HEADER, TAG_STREAM_HEADER, TAG_SYNC_INDEX};

/// Container format version, bumped on incompatible layout changes.
pub const FORMAT_VERSION: u64 = 1;

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Record every packet in the footer's packet index.
    pub index_packets: bool,
    /// Add a sync point automatically at every keyframe.
    pub auto_sync_points: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            index_packets: true,
            auto_sync_points: true,
        }
    }
}

pub struct ContainerWriter {
    channel: Channel,
    uuid: Uuid,
    info: Record,
    streams: Vec<StreamHeader>,
    by_id: HashMap<u32, usize>,
    index: PacketIndex,
    sync: SyncIndex,
    /// Latest written pts per stream, in the global timebase; the
    /// snapshot stored with each sync point.
    sync_pts: Vec<Pts>,
    file_index: FileIndex,
    file_index_pos: u64,
    header_written: bool,
    finalized: bool,
    opts: WriterOptions,
}

impl ContainerWriter {
    pub fn new(channel: Channel) -> Self {
        Self::with_options(channel, WriterOptions::default())
    }

    pub fn with_options(channel: Channel, opts: WriterOptions) -> Self {
        ContainerWriter {
            channel,
            uuid: Uuid::new_v4(),
            info: Record::new(),
            streams: Vec::new(),
            by_id: HashMap::new(),
            index: PacketIndex::new(),
            sync: SyncIndex::new(0),
            sync_pts: Vec::new(),
            file_index: FileIndex::new(),
            file_index_pos: 0,
            header_written: false,
            finalized: false,
            opts,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Free-form container metadata, stored in the main header record.
    pub fn info_mut(&mut self) -> &mut Record {
        &mut self.info
    }

    /// Register a stream. All streams must be added before
    /// [`write_header`](Self::write_header); ids must be unique.
    pub fn add_stream(&mut self, header: StreamHeader) -> Result<()> {
        if self.header_written {
            return Err(Error::Unsupported("adding streams after the header"));
        }
        if header.id == END_STREAM_ID {
            return Err(Error::BadRecord {
                what: "stream header",
                detail: "reserved stream id".into(),
            });
        }
        if self.by_id.contains_key(&header.id) {
            return Err(Error::BadRecord {
                what: "stream header",
                detail: format!("duplicate stream id {}", header.id),
            });
        }
        self.by_id.insert(header.id, self.streams.len());
        self.streams.push(header);
        Ok(())
    }

    /// Write the main header, the (empty) section directory and the
    /// stream headers. Packets may be written afterwards.
    pub fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Err(Error::Unsupported("writing the header twice"));
        }

        let mut main = Record::new();
        main.set("version", Value::UInt(FORMAT_VERSION));
        main.set("uuid", Value::Bin(self.uuid.as_bytes().to_vec()));
        main.set("created", Value::Str(Utc::now().to_rfc3339()));
        main.set("streams", Value::UInt(self.streams.len() as u64));
        let mut tb = Record::new();
        tb.set("num", Value::UInt(GLOBAL_TIMEBASE.num as u64));
        tb.set("den", Value::UInt(GLOBAL_TIMEBASE.den as u64));
        main.set("timebase", Value::Rec(tb));
        for (key, value) in self.info.iter() {
            main.set(key, value.clone());
        }
        wire::write_chunk(&mut self.channel, TAG_MAIN_HEADER, &main.to_bytes())?;

        // Directory goes out zero-filled now and is patched in place
        // on finalize; its on-disk size never changes.
        self.file_index_pos = self.channel.position();
        self.file_index.write(&mut self.channel)?;

        for header in &self.streams {
            wire::write_chunk(
                &mut self.channel,
                TAG_STREAM_HEADER,
                &header.to_record().to_bytes(),
            )?;
        }

        self.sync = SyncIndex::new(self.streams.len());
        self.sync_pts = vec![Pts::NONE; self.streams.len()];
        self.header_written = true;
        info!(
            uuid = %self.uuid,
            streams = self.streams.len(),
            "container header written"
        );
        Ok(())
    }

    /// Append one packet: wire header, then payload. Updates stream
    /// statistics, the packet index and the sync state.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.header_written {
            return Err(Error::Unsupported("writing packets before the header"));
        }
        if self.finalized {
            return Err(Error::Closed);
        }
        let slot = match self.by_id.get(&packet.stream_id) {
            Some(&i) => i,
            None => return Err(Error::UnknownStream(packet.stream_id)),
        };

        let pos = self.channel.position();
        PacketHeader::of(packet).write(&mut self.channel)?;
        self.channel.write(&packet.data)?;

        let stream = &mut self.streams[slot];
        stream
            .stats
            .add_packet(packet.data.len() as u32, packet.pts, packet.duration);
        if packet.pts.is_set() {
            self.sync_pts[slot] = packet.pts.rescale(stream.timebase, GLOBAL_TIMEBASE);
        }
        if self.opts.index_packets {
            self.index.add(
                pos,
                packet.data.len() as u32,
                packet.stream_id,
                packet.pts,
                packet.flags,
                packet.duration,
            );
        }
        if self.opts.auto_sync_points && packet.is_keyframe() {
            self.sync.add(pos, self.sync_pts.clone());
        }
        Ok(())
    }

    /// Record a seekable position covering all streams at their
    /// current presentation times.
    pub fn add_sync_point(&mut self) -> Result<()> {
        if !self.header_written {
            return Err(Error::Unsupported("sync point before the header"));
        }
        self.sync.add(self.channel.position(), self.sync_pts.clone());
        Ok(())
    }

    /// Write the sync index, footer and trailer, then patch the
    /// section directory. Idempotent per writer; returns an error if
    /// called twice.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(Error::Closed);
        }
        if !self.header_written {
            return Err(Error::Unsupported("finalizing before the header"));
        }
        self.finalized = true;

        // Terminator header: a reader without the section directory
        // (non-seekable source) stops demultiplexing here instead of
        // parsing the index sections as packets.
        let terminator = PacketHeader {
            stream_id: END_STREAM_ID,
            flags: PacketFlags::empty(),
            pts: Pts::NONE,
            duration: 0,
            size: 0,
        };
        terminator.write(&mut self.channel)?;

        let sync_pos = self.channel.position();
        self.sync.write(&mut self.channel)?;
        self.file_index.add(TAG_SYNC_INDEX, sync_pos)?;

        let footer_pos = self.channel.position();
        let footer = Footer {
            stats: self
                .streams
                .iter()
                .map(|s| s.stats.to_record(s.id))
                .collect(),
            index: std::mem::take(&mut self.index),
        };
        footer.write(&mut self.channel)?;
        self.file_index.add(TAG_FOOTER, footer_pos)?;

        let tail = Tail {
            footer_offset: footer_pos,
            file_size: self.channel.position() + TAIL_LEN,
        };
        tail.write(&mut self.channel)?;

        if self.channel.is_seekable() {
            let end = self.channel.position();
            self.channel.seek(SeekFrom::Start(self.file_index_pos))?;
            self.file_index.write(&mut self.channel)?;
            self.channel.seek(SeekFrom::Start(end))?;
        } else {
            debug!("channel not seekable; section directory left empty");
        }
        self.channel.flush()?;
        info!(
            uuid = %self.uuid,
            packets = footer.index.len(),
            size = tail.file_size,
            "container finalized"
        );
        Ok(())
    }

    /// Give the underlying channel back, e.g. to rewind an in-memory
    /// container for reading.
    pub fn into_channel(self) -> Channel {
        self.channel
    }
}

pub struct ContainerReader {
    info: Record,
    uuid: Uuid,
    demuxer: Demuxer,
    file_index: FileIndex,
    packet_index: Option<PacketIndex>,
    sync_index: Option<SyncIndex>,
    data_start: u64,
}

impl ContainerReader {
    /// Parse the container headers from `channel` and prepare for
    /// demultiplexing. On a seekable channel the footer and indices
    /// are loaded up front and final statistics folded into the
    /// stream headers.
    pub fn open(mut channel: Channel) -> Result<Self> {
        let main = Record::from_bytes(&wire::read_chunk(&mut channel, TAG_MAIN_HEADER)?)?;
        let bad = |detail: &str| Error::BadRecord {
            what: "main header",
            detail: detail.into(),
        };
        let version = main.get_uint("version").ok_or_else(|| bad("missing version"))?;
        if version > FORMAT_VERSION {
            return Err(Error::BadRecord {
                what: "main header",
                detail: format!("unsupported version {version}"),
            });
        }
        let uuid_bytes = main.get_bin("uuid").ok_or_else(|| bad("missing uuid"))?;
        let uuid = Uuid::from_slice(uuid_bytes).map_err(|_| bad("malformed uuid"))?;
        let stream_count = main.get_uint("streams").ok_or_else(|| bad("missing stream count"))?;

        let file_index = FileIndex::read(&mut channel)?;

        let mut headers = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            let payload = wire::read_chunk(&mut channel, TAG_STREAM_HEADER)?;
            headers.push(StreamHeader::from_record(&Record::from_bytes(&payload)?)?);
        }
        let data_start = channel.position();

        let mut packet_index = None;
        let mut sync_index = None;
        if channel.is_seekable() {
            match Self::load_tail_sections(&mut channel, &file_index, &mut headers) {
                Ok((pidx, sidx)) => {
                    packet_index = pidx;
                    sync_index = sidx;
                }
                // An unfinalized or damaged tail leaves the container
                // readable front to back.
                Err(e) => warn!("container tail unusable: {e}"),
            }
            channel.seek(SeekFrom::Start(data_start))?;
        }

        debug!(%uuid, streams = headers.len(), indexed = packet_index.is_some(), "container opened");
        let mut demuxer = Demuxer::multiplexed(channel, headers);
        demuxer.set_data_end(
            file_index
                .get(TAG_SYNC_INDEX)
                .or_else(|| file_index.get(TAG_FOOTER)),
        );
        Ok(ContainerReader {
            info: main,
            uuid,
            demuxer,
            file_index,
            packet_index,
            sync_index,
            data_start,
        })
    }

    fn load_tail_sections(
        channel: &mut Channel,
        file_index: &FileIndex,
        headers: &mut [StreamHeader],
    ) -> Result<(Option<PacketIndex>, Option<SyncIndex>)> {
        channel.seek(SeekFrom::End(-(TAIL_LEN as i64)))?;
        let tail = Tail::read(channel)?;
        channel.seek(SeekFrom::Start(tail.footer_offset))?;
        let footer = Footer::read(channel)?;

        for rec in &footer.stats {
            let (id, stats) = StreamStats::from_record(rec)?;
            match headers.iter_mut().find(|h| h.id == id) {
                Some(header) => header.apply_footer_stats(stats),
                None => warn!(stream = id, "footer statistics for unknown stream"),
            }
        }

        let sync_index = match file_index.get(TAG_SYNC_INDEX) {
            Some(offset) => {
                channel.seek(SeekFrom::Start(offset))?;
                Some(SyncIndex::read(channel)?)
            }
            None => None,
        };
        Ok((Some(footer.index), sync_index))
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The main header record, container metadata included.
    pub fn info(&self) -> &Record {
        &self.info
    }

    pub fn file_index(&self) -> &FileIndex {
        &self.file_index
    }

    pub fn packet_index(&self) -> Option<&PacketIndex> {
        self.packet_index.as_ref()
    }

    pub fn sync_index(&self) -> Option<&SyncIndex> {
        self.sync_index.as_ref()
    }

    pub fn stream_count(&self) -> usize {
        self.demuxer.stream_count()
    }

    pub fn stream_header(&self, index: usize) -> Option<&StreamHeader> {
        self.demuxer.stream(index).map(|s| &s.header)
    }

    pub fn demuxer(&mut self) -> &mut Demuxer {
        &mut self.demuxer
    }

    /// Next packet for the stream at `index`.
    pub fn read_packet(&mut self, index: usize) -> Result<NextPacket<'_>> {
        self.demuxer.read_packet(index)
    }

    /// Position the reader so the next packet delivered for
    /// `stream_id` is the latest one at or before `target` (in the
    /// stream's own timebase). All buffered packets are dropped.
    ///
    /// Falls back to the sync index, then to the start of the packet
    /// data, when no packet index was loaded.
    pub fn seek(&mut self, stream_id: u32, target: Pts) -> Result<()> {
        let Some(target_pts) = target.get() else {
            return Err(Error::Unsupported("seeking to an unset pts"));
        };
        let offset = if let Some(index) = &self.packet_index {
            index
                .seek(stream_id, target_pts)
                .and_then(|i| index.get(i))
                .map(|e| e.pos)
        } else if let Some(sync) = &self.sync_index {
            // sync points store global-timebase snapshots
            let header = self
                .demuxer
                .stream_by_id(stream_id)
                .ok_or(Error::UnknownStream(stream_id))?;
            let global = header.header.timebase.rescale(target_pts, GLOBAL_TIMEBASE);
            sync.seek(global).and_then(|i| sync.get(i)).map(|p| p.pos)
        } else {
            None
        };
        let offset = offset.unwrap_or(self.data_start);
        debug!(stream = stream_id, target = target_pts, offset, "seek");
        self.demuxer.reposition(offset)
    }

    /// Rewind to the first packet.
    pub fn rewind(&mut self) -> Result<()> {
        self.demuxer.reposition(self.data_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_packet(stream_id: u32, pts: i64, keyframe: bool, payload: &[u8]) -> Packet {
        let mut p = Packet::with_data(stream_id, Pts::new(pts), payload.to_vec());
        p.set_keyframe(keyframe);
        p.duration = 1;
        p
    }

    fn build_container() -> Channel {
        let mut w = ContainerWriter::new(Channel::memory());
        w.info_mut()
            .set("title", Value::Str("demo".into()));
        w.add_stream(StreamHeader::audio(0, 48_000, 2)).unwrap();
        w.add_stream(StreamHeader::video(1, 640, 480, 25, 1)).unwrap();
        w.write_header().unwrap();
        for i in 0..5i64 {
            w.write_packet(&demo_packet(1, i, i % 2 == 0, b"video-payload"))
                .unwrap();
            w.write_packet(&demo_packet(0, i * 1920, false, b"audio"))
                .unwrap();
        }
        w.finalize().unwrap();
        let mut ch = w.into_channel();
        ch.seek(SeekFrom::Start(0)).unwrap();
        ch
    }

    #[test]
    fn write_then_read_back() {
        let mut r = ContainerReader::open(build_container()).unwrap();
        assert_eq!(r.stream_count(), 2);
        assert_eq!(r.info().get_str("title"), Some("demo"));

        // footer stats folded back into the headers
        let audio = r.stream_header(0).unwrap();
        assert_eq!(audio.stats.packets, 5);
        assert_eq!(audio.stats.bytes, 25);

        let index = r.packet_index().unwrap();
        assert_eq!(index.len(), 10);

        let mut video = 0;
        loop {
            match r.read_packet(1).unwrap() {
                NextPacket::Packet(p) => {
                    assert_eq!(p.data, b"video-payload");
                    video += 1;
                }
                NextPacket::Eof => break,
                NextPacket::Again => unreachable!(),
            }
        }
        assert_eq!(video, 5);
    }

    #[test]
    fn duplicate_stream_id_rejected() {
        let mut w = ContainerWriter::new(Channel::memory());
        w.add_stream(StreamHeader::audio(0, 44_100, 1)).unwrap();
        assert!(w.add_stream(StreamHeader::audio(0, 48_000, 2)).is_err());
    }

    #[test]
    fn packet_for_unknown_stream_rejected() {
        let mut w = ContainerWriter::new(Channel::memory());
        w.add_stream(StreamHeader::audio(0, 48_000, 2)).unwrap();
        w.write_header().unwrap();
        assert!(matches!(
            w.write_packet(&demo_packet(7, 0, false, b"x")),
            Err(Error::UnknownStream(7))
        ));
    }

    #[test]
    fn seek_by_packet_index() {
        let mut r = ContainerReader::open(build_container()).unwrap();
        r.seek(1, Pts::new(3)).unwrap();
        match r.read_packet(1).unwrap() {
            NextPacket::Packet(p) => assert_eq!(p.pts, Pts::new(3)),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn rewind_replays_from_start() {
        let mut r = ContainerReader::open(build_container()).unwrap();
        while let NextPacket::Packet(_) = r.read_packet(0).unwrap() {}
        r.rewind().unwrap();
        match r.read_packet(0).unwrap() {
            NextPacket::Packet(p) => assert_eq!(p.pts, Pts::new(0)),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn sync_points_recorded_for_keyframes() {
        let mut r = ContainerReader::open(build_container()).unwrap();
        let sync = r.sync_index().unwrap();
        assert_eq!(sync.len(), 3); // keyframes at pts 0, 2, 4
        assert_eq!(sync.num_streams(), 2);
    }

    #[test]
    fn unfinalized_container_still_opens() {
        let mut w = ContainerWriter::new(Channel::memory());
        w.add_stream(StreamHeader::audio(0, 48_000, 2)).unwrap();
        w.write_header().unwrap();
        w.write_packet(&demo_packet(0, 0, false, b"pcm")).unwrap();
        let mut ch = w.into_channel();
        ch.seek(SeekFrom::Start(0)).unwrap();

        let mut r = ContainerReader::open(ch).unwrap();
        assert!(r.packet_index().is_none());
        match r.read_packet(0).unwrap() {
            NextPacket::Packet(p) => assert_eq!(p.data, b"pcm"),
            other => panic!("expected packet, got {other:?}"),
        }
    }
}

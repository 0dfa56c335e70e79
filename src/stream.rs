//! Per-stream headers: type, format descriptors, metadata and running
//! statistics.
//!
//! Headers travel on the wire as generic [`Record`]s; `to_record` and
//! `from_record` are exact inverses for every field a header carries.
//! Statistics accumulate incrementally while packets are written and are
//! finalized exactly once, into the footer, so a reader that only parses
//! the footer still learns each stream's characteristics.

use crate::error::{Error, Result};
use crate::record::{Record, Value};
use crate::timestamp::{Pts, TimeBase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
    Overlay,
    Text,
    Message,
    None,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Overlay => "overlay",
            StreamKind::Text => "text",
            StreamKind::Message => "message",
            StreamKind::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "audio" => StreamKind::Audio,
            "video" => StreamKind::Video,
            "overlay" => StreamKind::Overlay,
            "text" => StreamKind::Text,
            "message" => StreamKind::Message,
            "none" => StreamKind::None,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

/// Compression descriptor: which codec produced the payloads, plus its
/// out-of-band configuration. The engine never interprets `extradata`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Compression {
    pub codec: String,
    pub bitrate: u64,
    pub extradata: Vec<u8>,
}

/// Running per-stream statistics, accumulated on the write side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamStats {
    pub packets: u64,
    pub bytes: u64,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    pub min_duration: Option<u64>,
    pub max_duration: Option<u64>,
    pub first_pts: Pts,
    pub last_pts: Pts,
}

impl StreamStats {
    pub fn add_packet(&mut self, size: u32, pts: Pts, duration: u64) {
        self.packets += 1;
        self.bytes += size as u64;
        self.min_size = Some(self.min_size.map_or(size, |m| m.min(size)));
        self.max_size = Some(self.max_size.map_or(size, |m| m.max(size)));
        if duration != 0 {
            self.min_duration = Some(self.min_duration.map_or(duration, |m| m.min(duration)));
            self.max_duration = Some(self.max_duration.map_or(duration, |m| m.max(duration)));
        }
        if pts.is_set() {
            if !self.first_pts.is_set() {
                self.first_pts = pts;
            }
            self.last_pts = pts;
        }
    }

    /// Footer form. Unset statistics are carried as the unset-pts wire
    /// sentinel or omitted, never as zero.
    pub fn to_record(&self, stream_id: u32) -> Record {
        let mut rec = Record::new();
        rec.set("id", Value::UInt(stream_id as u64));
        rec.set("packets", Value::UInt(self.packets));
        rec.set("bytes", Value::UInt(self.bytes));
        if let Some(v) = self.min_size {
            rec.set("min_size", Value::UInt(v as u64));
        }
        if let Some(v) = self.max_size {
            rec.set("max_size", Value::UInt(v as u64));
        }
        if let Some(v) = self.min_duration {
            rec.set("min_duration", Value::UInt(v));
        }
        if let Some(v) = self.max_duration {
            rec.set("max_duration", Value::UInt(v));
        }
        rec.set("first_pts", Value::Int(self.first_pts.to_wire()));
        rec.set("last_pts", Value::Int(self.last_pts.to_wire()));
        rec
    }

    pub fn from_record(rec: &Record) -> Result<(u32, StreamStats)> {
        let id = rec.get_uint("id").ok_or(Error::BadRecord {
            what: "stream stats",
            detail: "missing id".into(),
        })? as u32;
        let stats = StreamStats {
            packets: rec.get_uint("packets").unwrap_or(0),
            bytes: rec.get_uint("bytes").unwrap_or(0),
            min_size: rec.get_uint("min_size").map(|v| v as u32),
            max_size: rec.get_uint("max_size").map(|v| v as u32),
            min_duration: rec.get_uint("min_duration"),
            max_duration: rec.get_uint("max_duration"),
            first_pts: Pts::from_wire(rec.get_int("first_pts").unwrap_or(i64::MIN)),
            last_pts: Pts::from_wire(rec.get_int("last_pts").unwrap_or(i64::MIN)),
        };
        Ok((id, stats))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    pub kind: StreamKind,
    pub id: u32,
    /// The unit packet timestamps and durations are expressed in.
    pub timebase: TimeBase,
    pub video: Option<VideoFormat>,
    pub audio: Option<AudioFormat>,
    pub compression: Compression,
    pub metadata: Record,
    pub stats: StreamStats,
}

impl StreamHeader {
    pub fn new(kind: StreamKind, id: u32, timebase: TimeBase) -> Self {
        StreamHeader {
            kind,
            id,
            timebase,
            video: None,
            audio: None,
            compression: Compression::default(),
            metadata: Record::new(),
            stats: StreamStats::default(),
        }
    }

    pub fn audio(id: u32, sample_rate: u32, channels: u16) -> Self {
        let mut h = Self::new(StreamKind::Audio, id, TimeBase::new(1, sample_rate));
        h.audio = Some(AudioFormat {
            sample_rate,
            channels,
            bits_per_sample: 16,
        });
        h
    }

    pub fn video(id: u32, width: u32, height: u32, fps_num: u32, fps_den: u32) -> Self {
        let mut h = Self::new(StreamKind::Video, id, TimeBase::new(fps_den, fps_num));
        h.video = Some(VideoFormat {
            width,
            height,
            fps_num,
            fps_den,
        });
        h
    }

    /// A control stream; packets addressed to it stop demultiplexing.
    pub fn message(id: u32) -> Self {
        Self::new(StreamKind::Message, id, TimeBase::MILLIS)
    }

    // ── Record projection ────────────────────────────────────────────────────

    pub fn to_record(&self) -> Record {
        let mut rec = Record::new();
        rec.set("type", Value::Str(self.kind.as_str().into()));
        rec.set("id", Value::UInt(self.id as u64));

        let mut tb = Record::new();
        tb.set("num", Value::UInt(self.timebase.num as u64));
        tb.set("den", Value::UInt(self.timebase.den as u64));
        rec.set("timebase", Value::Rec(tb));

        if let Some(v) = &self.video {
            let mut f = Record::new();
            f.set("width", Value::UInt(v.width as u64));
            f.set("height", Value::UInt(v.height as u64));
            f.set("fps_num", Value::UInt(v.fps_num as u64));
            f.set("fps_den", Value::UInt(v.fps_den as u64));
            rec.set("video", Value::Rec(f));
            if v.fps_num != 0 {
                // Derived: nominal packet interval in stream ticks.
                let interval = TimeBase::new(v.fps_den, v.fps_num);
                rec.set(
                    "packet_duration",
                    Value::UInt(interval.rescale(1, self.timebase).max(1) as u64),
                );
            }
        }
        if let Some(a) = &self.audio {
            let mut f = Record::new();
            f.set("sample_rate", Value::UInt(a.sample_rate as u64));
            f.set("channels", Value::UInt(a.channels as u64));
            f.set("bits_per_sample", Value::UInt(a.bits_per_sample as u64));
            rec.set("audio", Value::Rec(f));
            if a.sample_rate != 0 {
                // Derived: stream ticks per audio sample.
                rec.set(
                    "sample_duration",
                    Value::UInt(
                        TimeBase::new(1, a.sample_rate).rescale(1, self.timebase).max(1) as u64,
                    ),
                );
            }
        }

        let mut comp = Record::new();
        comp.set("codec", Value::Str(self.compression.codec.clone()));
        comp.set("bitrate", Value::UInt(self.compression.bitrate));
        if !self.compression.extradata.is_empty() {
            comp.set("extradata", Value::Bin(self.compression.extradata.clone()));
        }
        rec.set("compression", Value::Rec(comp));

        if !self.metadata.is_empty() {
            rec.set("metadata", Value::Rec(self.metadata.clone()));
        }
        rec
    }

    pub fn from_record(rec: &Record) -> Result<StreamHeader> {
        let bad = |detail: &str| Error::BadRecord {
            what: "stream header",
            detail: detail.into(),
        };
        let kind = StreamKind::from_str(rec.get_str("type").ok_or_else(|| bad("missing type"))?)
            .ok_or_else(|| bad("unknown stream type"))?;
        let id = rec.get_uint("id").ok_or_else(|| bad("missing id"))? as u32;
        let tb = rec.get_rec("timebase").ok_or_else(|| bad("missing timebase"))?;
        let timebase = TimeBase::new(
            tb.get_uint("num").ok_or_else(|| bad("timebase num"))? as u32,
            tb.get_uint("den").ok_or_else(|| bad("timebase den"))? as u32,
        );

        let mut header = StreamHeader::new(kind, id, timebase);
        if let Some(f) = rec.get_rec("video") {
            header.video = Some(VideoFormat {
                width: f.get_uint("width").unwrap_or(0) as u32,
                height: f.get_uint("height").unwrap_or(0) as u32,
                fps_num: f.get_uint("fps_num").unwrap_or(0) as u32,
                fps_den: f.get_uint("fps_den").unwrap_or(1) as u32,
            });
        }
        if let Some(f) = rec.get_rec("audio") {
            header.audio = Some(AudioFormat {
                sample_rate: f.get_uint("sample_rate").unwrap_or(0) as u32,
                channels: f.get_uint("channels").unwrap_or(0) as u16,
                bits_per_sample: f.get_uint("bits_per_sample").unwrap_or(0) as u16,
            });
        }
        if let Some(c) = rec.get_rec("compression") {
            header.compression = Compression {
                codec: c.get_str("codec").unwrap_or("").to_string(),
                bitrate: c.get_uint("bitrate").unwrap_or(0),
                extradata: c.get_bin("extradata").map(<[u8]>::to_vec).unwrap_or_default(),
            };
        }
        if let Some(m) = rec.get_rec("metadata") {
            header.metadata = m.clone();
        }
        Ok(header)
    }

    /// Merge finalized footer statistics into this header. Called once
    /// on the read side after the footer is parsed; also derives an
    /// average bitrate for the compression descriptor when the writer
    /// did not declare one.
    pub fn apply_footer_stats(&mut self, stats: StreamStats) {
        if self.compression.bitrate == 0 {
            if let (Some(first), Some(last)) = (stats.first_pts.get(), stats.last_pts.get()) {
                let span_us = self
                    .timebase
                    .rescale(last - first, crate::timestamp::GLOBAL_TIMEBASE);
                if span_us > 0 {
                    self.compression.bitrate = stats.bytes * 8 * 1_000_000 / span_us as u64;
                }
            }
        }
        self.stats = stats;
    }
}

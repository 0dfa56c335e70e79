//! Producer side of the separate-stream handshake.
//!
//! Mirrors [`Demuxer`](super::Demuxer) in separate mode: the consumer
//! announces readiness with a READY message, the producer answers with
//! PACKET + header + payload, and closes the stream with EOS.

use std::time::Duration;

use tracing::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketHeader};
use crate::wire;

use super::{HANDSHAKE_TIMEOUT, MSG_EOS, MSG_PACKET, MSG_READY};

pub struct SeparateSink {
    channel: Channel,
    stream_id: u32,
    finished: bool,
}

impl SeparateSink {
    pub fn new(channel: Channel, stream_id: u32) -> Self {
        SeparateSink {
            channel,
            stream_id,
            finished: false,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Block (bounded) until the consumer sends READY.
    pub fn wait_ready(&mut self) -> Result<()> {
        self.wait_ready_for(Some(HANDSHAKE_TIMEOUT))
    }

    pub fn wait_ready_for(&mut self, timeout: Option<Duration>) -> Result<()> {
        if !self.channel.poll(timeout)? {
            return Err(Error::Timeout);
        }
        match wire::read_v(&mut self.channel)? {
            MSG_READY => Ok(()),
            other => Err(Error::BadHandshake(other)),
        }
    }

    /// Answer one READY with the given packet.
    pub fn put(&mut self, packet: &Packet) -> Result<()> {
        if self.finished {
            return Err(Error::Closed);
        }
        wire::write_v(&mut self.channel, MSG_PACKET)?;
        PacketHeader::of(packet).write(&mut self.channel)?;
        self.channel.write(&packet.data)?;
        self.channel.flush()?;
        Ok(())
    }

    /// Answer one READY with end-of-stream and close the channel.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        debug!(stream = self.stream_id, "separate stream finished");
        wire::write_v(&mut self.channel, MSG_EOS)?;
        self.channel.flush()?;
        self.channel.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::{Demuxer, NextPacket};
    use crate::stream::StreamHeader;
    use crate::timestamp::Pts;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn separate_stream_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let producer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut sink = SeparateSink::new(Channel::from_stream(stream).unwrap(), 0);
            for i in 0..3i64 {
                sink.wait_ready().unwrap();
                let pkt =
                    Packet::with_data(0, Pts::new(i * 10), format!("pkt-{i}").into_bytes());
                sink.put(&pkt).unwrap();
            }
            sink.wait_ready().unwrap();
            sink.finish().unwrap();
        });

        let channel = Channel::connect(&addr.to_string()).unwrap();
        let mut d = Demuxer::separate(vec![(StreamHeader::audio(0, 48_000, 2), channel)]);

        let mut seen = Vec::new();
        loop {
            match d.read_packet(0).unwrap() {
                NextPacket::Packet(p) => {
                    seen.push(String::from_utf8(p.data.clone()).unwrap())
                }
                NextPacket::Eof => break,
                NextPacket::Again => {}
            }
        }
        assert_eq!(seen, vec!["pkt-0", "pkt-1", "pkt-2"]);
        producer.join().unwrap();
    }
}

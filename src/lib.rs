pub mod buffer;
pub mod channel;
pub mod container;
pub mod crypto;
pub mod demux;
pub mod error;
pub mod index;
pub mod packet;
pub mod pbuffer;
pub mod ptscache;
pub mod record;
pub mod stream;
pub mod timestamp;
pub mod wire;

pub use channel::{Caps, Channel, ChannelBackend, PadMode};
pub use container::{ContainerReader, ContainerWriter, WriterOptions};
pub use demux::{Demuxer, NextPacket, Progress, SeparateSink, Transport};
pub use error::{Error, Result};
pub use packet::{Packet, PacketFlags, PacketHeader};
pub use record::{Record, Value};
pub use stream::{StreamHeader, StreamKind};
pub use timestamp::{Pts, TimeBase, GLOBAL_TIMEBASE};

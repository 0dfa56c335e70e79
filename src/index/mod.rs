//! Serializable directories enabling random access: the packet index,
//! the sync index, the fixed-size file index and the container footer.
//!
//! All four share the wire conventions from [`crate::wire`]: an 8-byte
//! ASCII tag, v-coded counts, and fixed-width little-endian per-entry
//! fields so entry sizes stay predictable during random-access parsing.

mod file;
mod footer;
mod packet;
mod sync;

pub use file::{FileIndex, FileIndexEntry, FILE_INDEX_SLOTS};
pub use footer::{Footer, Tail, TAIL_LEN};
pub use packet::{PacketIndex, PacketIndexEntry};
pub use sync::{SyncIndex, SyncPoint};

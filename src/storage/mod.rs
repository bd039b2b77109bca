//! The storage engine: per-topic append-only logs and the topic registry.
//!
//! Each topic owns three files in its own directory under the broker's base
//! directory:
//!
//! - `data.log` — `[u64 offset][u32 payload_len][payload]*`
//! - `index.idx` — `[u64 offset][u64 byte_position]*`
//! - `metadata.meta` — a single `u64` next offset
//!
//! All persisted integers are little-endian. The write order on append is
//! data, then index, then metadata; recovery relies on that order to rebuild
//! a consistent view after an unclean shutdown with at most last-record loss.

pub mod codec;
pub mod registry;
pub mod topic;

pub use registry::TopicRegistry;
pub use topic::Topic;

//! Centralized protocol, storage, and configuration constants.
//!
//! # Categories
//!
//! - **Payload and consume limits**: bounds enforced by the broker façade
//!   and the front-ends
//! - **Storage constants**: per-topic file names and fixed record sizes
//! - **Network constants**: frame sizes, connection limits, timeouts

// =============================================================================
// Payload and Consume Limits
// =============================================================================

/// Maximum accepted message payload (64 MiB).
///
/// Enforced by the broker on produce and used as a sanity bound when reading
/// record headers back during recovery: a claimed payload length above this
/// value means the data log is corrupt at that position.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Default number of messages returned by a consume when the caller does not
/// specify `max_messages`.
pub const DEFAULT_CONSUME_MAX: u32 = 100;

/// Upper bound applied to `max_messages` by the REST front-end.
pub const CONSUME_MAX_CAP: u32 = 1000;

// =============================================================================
// Storage Constants
// =============================================================================

/// Append-only record log inside a topic directory.
pub const DATA_FILE_NAME: &str = "data.log";

/// Offset index file inside a topic directory.
pub const INDEX_FILE_NAME: &str = "index.idx";

/// Temporary file used when recovery rewrites the index atomically.
pub const INDEX_REWRITE_FILE_NAME: &str = "index.idx.rebuild";

/// Topic metadata file; holds exactly the next offset as a `u64`.
pub const METADATA_FILE_NAME: &str = "metadata.meta";

/// Size of a record header in `data.log`: `u64` offset + `u32` payload length.
pub const RECORD_HEADER_SIZE: usize = 12;

/// Size of one `index.idx` entry: `u64` offset + `u64` byte position.
pub const INDEX_ENTRY_SIZE: usize = 16;

/// Size of `metadata.meta`: a single `u64` next offset.
pub const METADATA_SIZE: usize = 8;

/// Maximum length in bytes of a topic name.
///
/// Topic names double as directory names, so they are bounded by what common
/// filesystems accept for a single path component.
pub const MAX_TOPIC_NAME_LEN: usize = 255;

// =============================================================================
// Network Constants
// =============================================================================

/// Maximum size of a single binary protocol frame payload.
///
/// A produce frame carries a topic name and a message payload, so the frame
/// bound leaves headroom above [`MAX_PAYLOAD`] for the framing fields.
pub const MAX_FRAME_SIZE: usize = MAX_PAYLOAD + 4 * 1024;

/// Default maximum connections accepted from a single IP address.
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: usize = 100;

/// Default maximum total connections across all clients.
///
/// Set to 0 for unlimited (not recommended in production).
pub const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 10_000;

/// Default timeout for reading a complete request frame from a client.
///
/// Prevents slowloris-style clients from tying up connection tasks.
pub const DEFAULT_REQUEST_READ_TIMEOUT_SECS: u64 = 30;

/// Default timeout for processing a single request.
pub const DEFAULT_REQUEST_HANDLER_TIMEOUT_SECS: u64 = 60;

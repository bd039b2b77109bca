//! A single topic: one append-only data log, its offset index, and its
//! metadata, all owned exclusively by one [`Topic`] instance.
//!
//! Every operation that touches the files or `next_offset` runs under the
//! topic's own mutex, so appends and reads on one topic are serialized while
//! different topics proceed fully in parallel.
//!
//! The append write order is data log, then index, then metadata. Recovery
//! depends on it: a record that reached `data.log` without its index entry or
//! metadata update is rebuilt from a scan, whereas metadata written ahead of
//! data could invent offsets that were never stored.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::{
    DATA_FILE_NAME, INDEX_ENTRY_SIZE, INDEX_FILE_NAME, INDEX_REWRITE_FILE_NAME, MAX_PAYLOAD,
    METADATA_FILE_NAME, METADATA_SIZE, RECORD_HEADER_SIZE,
};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::storage::codec;

/// A named, persistent, append-only message log.
pub struct Topic {
    name: String,
    dir_path: PathBuf,
    data_path: PathBuf,
    index_path: PathBuf,
    metadata_path: PathBuf,
    inner: Mutex<TopicInner>,
}

/// Mutable state guarded by the topic mutex.
struct TopicInner {
    data_writer: File,
    index_writer: File,
    /// Byte length of `data.log`; the position the next record starts at.
    data_len: u64,
    /// In-memory offset → byte-position index, ordered for range scans.
    index: BTreeMap<u64, u64>,
    /// Offset the next appended message will receive.
    next_offset: u64,
}

impl Topic {
    /// Open a topic rooted at `dir_path`, creating the directory if allowed.
    ///
    /// Loads metadata and the index, runs crash recovery, and opens the
    /// append writers. With `create_if_missing == false` a missing directory
    /// is [`Error::TopicNotFound`].
    pub async fn open(
        name: impl Into<String>,
        dir_path: impl Into<PathBuf>,
        create_if_missing: bool,
    ) -> Result<Self> {
        let name = name.into();
        let dir_path = dir_path.into();

        match fs::metadata(&dir_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::InvalidArgument(format!(
                    "topic path {} exists but is not a directory",
                    dir_path.display()
                )));
            }
            Err(_) if create_if_missing => fs::create_dir_all(&dir_path).await?,
            Err(_) => return Err(Error::TopicNotFound(name)),
        }

        let data_path = dir_path.join(DATA_FILE_NAME);
        let index_path = dir_path.join(INDEX_FILE_NAME);
        let metadata_path = dir_path.join(METADATA_FILE_NAME);

        let mut next_offset = match load_metadata(&metadata_path).await {
            Some(value) => value,
            None => {
                fs::write(&metadata_path, codec::encode_metadata(0)).await?;
                0
            }
        };

        let mut index = load_index(&name, &index_path).await;
        let data_len = fs::metadata(&data_path).await.map(|m| m.len()).unwrap_or(0);

        if needs_rebuild(&name, &data_path, data_len, &index, next_offset).await {
            let rebuilt = scan_data_log(&name, &data_path, data_len).await?;
            let recovered_next = match rebuilt.last_key_value() {
                Some((&highest, _)) => highest + 1,
                // Nothing readable: an empty log means a fresh topic, a
                // non-empty one keeps the conservative metadata value.
                None if data_len == 0 => 0,
                None => next_offset,
            };

            if rebuilt != index {
                info!(
                    topic = %name,
                    entries = rebuilt.len(),
                    "index inconsistent with data log; rewriting"
                );
                rewrite_index(&dir_path, &index_path, &rebuilt).await?;
                index = rebuilt;
            }

            if recovered_next != next_offset {
                info!(
                    topic = %name,
                    from = next_offset,
                    to = recovered_next,
                    "adjusting next offset after data log scan"
                );
                next_offset = recovered_next;
                fs::write(&metadata_path, codec::encode_metadata(next_offset)).await?;
            }
        }

        let data_writer = open_append(&data_path).await?;
        let index_writer = open_append(&index_path).await?;

        debug!(
            topic = %name,
            next_offset,
            indexed = index.len(),
            data_len,
            "topic ready"
        );

        Ok(Self {
            name,
            dir_path,
            data_path,
            index_path,
            metadata_path,
            inner: Mutex::new(TopicInner {
                data_writer,
                index_writer,
                data_len,
                index,
                next_offset,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    /// Append a payload, returning the offset it was assigned.
    pub async fn append(&self, payload: Bytes) -> Result<u64> {
        self.append_with(payload, |_| {}).await
    }

    /// Append a payload and run `committed` with the assigned offset while
    /// the topic guard is still held.
    ///
    /// The hook runs after data, index, and metadata writes have completed,
    /// so per-topic hook invocation order always matches offset order. It
    /// must not block: the broker uses it to enqueue subscriber
    /// notifications.
    ///
    /// On any I/O error the in-memory state is unchanged, no offset is
    /// assigned, and the hook does not run.
    pub async fn append_with<F>(&self, payload: Bytes, committed: F) -> Result<u64>
    where
        F: FnOnce(u64),
    {
        let mut inner = self.inner.lock().await;
        let offset = inner.next_offset;
        let byte_pos = inner.data_len;

        match write_record(&mut inner, &self.metadata_path, offset, byte_pos, &payload).await {
            Ok(()) => {
                inner.data_len = byte_pos + (RECORD_HEADER_SIZE + payload.len()) as u64;
                inner.index.insert(offset, byte_pos);
                inner.next_offset = offset + 1;
                committed(offset);
                Ok(offset)
            }
            Err(e) => {
                // A partial write may still have advanced the physical end of
                // the log; resync so a later append indexes the true end.
                if let Ok(meta) = fs::metadata(&self.data_path).await {
                    inner.data_len = meta.len();
                }
                Err(e)
            }
        }
    }

    /// Read up to `max_messages` messages starting at `start_offset`.
    ///
    /// Corruption or an index/data mismatch stops the read at that boundary
    /// and returns what was collected so far; it never fails the call.
    pub async fn read_range(&self, start_offset: u64, max_messages: u32) -> Result<Vec<Message>> {
        let inner = self.inner.lock().await;
        let mut messages = Vec::new();

        if start_offset >= inner.next_offset || max_messages == 0 {
            return Ok(messages);
        }

        let Some((&first_offset, &first_pos)) = inner.index.range(start_offset..).next() else {
            return Ok(messages);
        };

        let file = File::open(&self.data_path).await?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(first_pos)).await?;

        let mut cursor_offset = first_offset;
        let mut pos = first_pos;

        while (messages.len() as u32) < max_messages && cursor_offset < inner.next_offset {
            let mut header = [0u8; RECORD_HEADER_SIZE];
            match reader.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    warn!(topic = %self.name, byte_pos = pos, error = %e, "read failed; stopping");
                    break;
                }
            }

            let (file_offset, payload_len) = codec::decode_record_header(&header);
            if file_offset != cursor_offset {
                warn!(
                    topic = %self.name,
                    expected = cursor_offset,
                    found = file_offset,
                    byte_pos = pos,
                    "index/data mismatch; stopping read"
                );
                break;
            }
            if payload_len as usize > MAX_PAYLOAD {
                warn!(
                    topic = %self.name,
                    byte_pos = pos,
                    payload_len,
                    "implausible payload length; stopping read"
                );
                break;
            }

            let mut payload = vec![0u8; payload_len as usize];
            if let Err(e) = reader.read_exact(&mut payload).await {
                warn!(topic = %self.name, byte_pos = pos, error = %e, "truncated record; stopping read");
                break;
            }

            messages.push(Message::new(file_offset, self.name.clone(), Bytes::from(payload)));
            pos += (RECORD_HEADER_SIZE + payload_len as usize) as u64;
            cursor_offset += 1;

            // Records are normally contiguous, but after recovery the index
            // can jump over unreadable bytes; follow it.
            if let Some(&next_pos) = inner.index.get(&cursor_offset) {
                if next_pos != pos {
                    reader.seek(SeekFrom::Start(next_pos)).await?;
                    pos = next_pos;
                }
            }
        }

        Ok(messages)
    }

    /// The offset the next appended message will receive.
    pub async fn next_offset(&self) -> u64 {
        self.inner.lock().await.next_offset
    }

    /// Flush both writers to durable storage.
    pub async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.data_writer.flush().await?;
        inner.data_writer.sync_all().await?;
        inner.index_writer.flush().await?;
        inner.index_writer.sync_all().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("dir_path", &self.dir_path)
            .finish_non_exhaustive()
    }
}

async fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?)
}

/// Write one record: data log, then index, then metadata, flushing each.
async fn write_record(
    inner: &mut TopicInner,
    metadata_path: &Path,
    offset: u64,
    byte_pos: u64,
    payload: &Bytes,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len());
    codec::encode_record(&mut buf, offset, payload);
    inner.data_writer.write_all(&buf).await?;
    inner.data_writer.flush().await?;

    let entry = codec::encode_index_entry(offset, byte_pos);
    inner.index_writer.write_all(&entry).await?;
    inner.index_writer.flush().await?;

    fs::write(metadata_path, codec::encode_metadata(offset + 1)).await?;
    Ok(())
}

/// Read `next_offset` from the metadata file, `None` if missing or short.
async fn load_metadata(metadata_path: &Path) -> Option<u64> {
    match fs::read(metadata_path).await {
        Ok(bytes) if bytes.len() >= METADATA_SIZE => {
            let raw: [u8; METADATA_SIZE] = bytes[..METADATA_SIZE].try_into().ok()?;
            Some(codec::decode_metadata(&raw))
        }
        Ok(bytes) => {
            warn!(
                path = %metadata_path.display(),
                len = bytes.len(),
                "metadata file too short; treating topic as new"
            );
            None
        }
        Err(_) => None,
    }
}

/// Stream index entries into memory, stopping at a trailing partial entry.
async fn load_index(name: &str, index_path: &Path) -> BTreeMap<u64, u64> {
    let mut index = BTreeMap::new();
    let Ok(bytes) = fs::read(index_path).await else {
        return index;
    };

    let mut chunks = bytes.chunks_exact(INDEX_ENTRY_SIZE);
    for chunk in &mut chunks {
        let raw: [u8; INDEX_ENTRY_SIZE] = match chunk.try_into() {
            Ok(raw) => raw,
            Err(_) => break,
        };
        let (offset, byte_pos) = codec::decode_index_entry(&raw);
        index.insert(offset, byte_pos);
    }
    if !chunks.remainder().is_empty() {
        warn!(
            topic = %name,
            byte_pos = bytes.len() - chunks.remainder().len(),
            "index file ends in a partial entry; ignoring the tail"
        );
    }
    index
}

/// Decide whether the index and metadata are consistent with the data log.
async fn needs_rebuild(
    name: &str,
    data_path: &Path,
    data_len: u64,
    index: &BTreeMap<u64, u64>,
    next_offset: u64,
) -> bool {
    let Some((&max_offset, &max_pos)) = index.last_key_value() else {
        if data_len > 0 {
            warn!(topic = %name, data_len, "data log is non-empty but the index is empty");
            return true;
        }
        // No data, no index: a metadata value of zero is consistent and any
        // other value is conservative; neither warrants a scan.
        return false;
    };

    if data_len == 0 {
        warn!(topic = %name, "index is non-empty but the data log is empty");
        return true;
    }

    if max_offset + 1 != next_offset {
        warn!(
            topic = %name,
            next_offset,
            max_index_offset = max_offset,
            "index out of sync with metadata; scanning data log"
        );
        return true;
    }

    // Verify the last indexed record is fully present, catching a data log
    // truncated after its index entry and metadata were written.
    if !last_record_intact(data_path, data_len, max_offset, max_pos).await {
        warn!(
            topic = %name,
            offset = max_offset,
            byte_pos = max_pos,
            "last indexed record incomplete; scanning data log"
        );
        return true;
    }

    false
}

async fn last_record_intact(data_path: &Path, data_len: u64, offset: u64, byte_pos: u64) -> bool {
    if byte_pos + RECORD_HEADER_SIZE as u64 > data_len {
        return false;
    }
    let Ok(mut file) = File::open(data_path).await else {
        return false;
    };
    if file.seek(SeekFrom::Start(byte_pos)).await.is_err() {
        return false;
    }
    let mut header = [0u8; RECORD_HEADER_SIZE];
    if file.read_exact(&mut header).await.is_err() {
        return false;
    }
    let (file_offset, payload_len) = codec::decode_record_header(&header);
    file_offset == offset
        && payload_len as usize <= MAX_PAYLOAD
        && byte_pos + (RECORD_HEADER_SIZE + payload_len as usize) as u64 <= data_len
}

/// Scan the data log from the start, collecting every fully readable record.
///
/// Stops at the first truncated or implausible record and logs the byte
/// position. The file is never truncated here; unreadable tail bytes are
/// simply not indexed.
async fn scan_data_log(name: &str, data_path: &Path, data_len: u64) -> Result<BTreeMap<u64, u64>> {
    let mut rebuilt = BTreeMap::new();
    let file = match File::open(data_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(rebuilt),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);
    let mut pos: u64 = 0;

    loop {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        match reader.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!(topic = %name, byte_pos = pos, error = %e, "scan stopped on read error");
                break;
            }
        }

        let (offset, payload_len) = codec::decode_record_header(&header);
        if payload_len as usize > MAX_PAYLOAD {
            warn!(
                topic = %name,
                byte_pos = pos,
                offset,
                payload_len,
                "scan stopped: implausible payload length"
            );
            break;
        }

        let end = pos + (RECORD_HEADER_SIZE + payload_len as usize) as u64;
        if end > data_len {
            warn!(
                topic = %name,
                byte_pos = pos,
                offset,
                "scan stopped: record truncated at end of data log"
            );
            break;
        }

        rebuilt.entry(offset).or_insert(pos);
        reader.seek(SeekFrom::Start(end)).await?;
        pos = end;
    }

    Ok(rebuilt)
}

/// Atomically replace the index file with the rebuilt entries.
async fn rewrite_index(
    dir_path: &Path,
    index_path: &Path,
    entries: &BTreeMap<u64, u64>,
) -> Result<()> {
    let tmp_path = dir_path.join(INDEX_REWRITE_FILE_NAME);
    let mut buf = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
    for (&offset, &byte_pos) in entries {
        buf.extend_from_slice(&codec::encode_index_entry(offset, byte_pos));
    }

    let mut tmp = File::create(&tmp_path).await?;
    tmp.write_all(&buf).await?;
    tmp.flush().await?;
    tmp.sync_all().await?;
    drop(tmp);

    fs::rename(&tmp_path, index_path).await?;
    Ok(())
}

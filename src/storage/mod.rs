//! Storage backend implementations for bag containers
//!
//! Every backend exposes the same capability set through [`StorageReader`]: the
//! container format it read, the topics it holds, and lazy time-sorted message
//! cursors over its contents. Callers never branch on the concrete format.

use crate::error::{ReadError, ReadResult};
use crate::types::{ContainerFormat, TopicInfo};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mcap")]
pub mod mcap;

#[cfg(feature = "ros1")]
pub mod ros1;

/// File signature of SQLite3 databases
pub const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

/// File signature of MCAP files
pub const MCAP_MAGIC: &[u8] = b"\x89MCAP0\r\n";

/// File signature of zstd frames
pub const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];

/// File signature of ROS1 bags
pub const ROS1_MAGIC: &[u8] = b"#ROSBAG V2.0";

/// Messages buffered at most by a [`ReorderWindow`]
pub const REORDER_WINDOW: usize = 64;

/// Timestamp lead after which a buffered message is released regardless of count
pub const REORDER_SPAN_NS: u64 = 500_000_000;

/// A message as held in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Index into [`StorageReader::topics`]
    pub topic: usize,
    /// Receive timestamp in nanoseconds since epoch
    pub timestamp: u64,
    /// Serialized message bytes
    pub data: Vec<u8>,
}

/// Lazy message sequence of one storage file, sorted by timestamp
///
/// A cursor ends after yielding its first error. Errors are
/// [`ReadError::Truncated`]; messages before them remain valid.
pub type MessageCursor<'a> = Box<dyn Iterator<Item = ReadResult<StoredMessage>> + 'a>;

/// Trait for storage backend implementations
pub trait StorageReader: Send {
    /// Container format of the underlying file
    fn format(&self) -> ContainerFormat;

    /// Topics stored in this file
    fn topics(&self) -> &[TopicInfo];

    /// Cursors over every message in the file
    ///
    /// Each cursor is sorted by timestamp on its own; together they cover every
    /// topic. Payloads are read as the cursors advance.
    fn streams(&self) -> ReadResult<Vec<MessageCursor<'_>>>;
}

struct Pending {
    timestamp: u64,
    sequence: u64,
    message: StoredMessage,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, self.sequence).cmp(&(other.timestamp, other.sequence))
    }
}

/// Sorts a nearly-ordered message sequence within a bounded buffer
///
/// Containers that store messages in write order (MCAP chunks, ROS1 chunks) are
/// close to log-time order. A message is released once [`REORDER_WINDOW`]
/// messages are buffered behind it or a buffered message is [`REORDER_SPAN_NS`]
/// newer. Messages arriving older than one already released are dropped.
pub struct ReorderWindow<I> {
    source: I,
    path: PathBuf,
    heap: BinaryHeap<Reverse<Pending>>,
    sequence: u64,
    newest: u64,
    released: Option<u64>,
    pending_error: Option<ReadError>,
    exhausted: bool,
}

impl<I> ReorderWindow<I>
where
    I: Iterator<Item = ReadResult<StoredMessage>>,
{
    pub fn new(source: I, path: &Path) -> Self {
        Self {
            source,
            path: path.to_path_buf(),
            heap: BinaryHeap::new(),
            sequence: 0,
            newest: 0,
            released: None,
            pending_error: None,
            exhausted: false,
        }
    }

    fn ready(&self) -> bool {
        match self.heap.peek() {
            Some(Reverse(oldest)) => {
                self.exhausted
                    || self.heap.len() >= REORDER_WINDOW
                    || self.newest.saturating_sub(oldest.timestamp) >= REORDER_SPAN_NS
            }
            None => false,
        }
    }

    fn release(&mut self) -> Option<StoredMessage> {
        let Reverse(pending) = self.heap.pop()?;
        self.released = Some(pending.timestamp);
        Some(pending.message)
    }
}

impl<I> Iterator for ReorderWindow<I>
where
    I: Iterator<Item = ReadResult<StoredMessage>>,
{
    type Item = ReadResult<StoredMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.ready() {
                return self.release().map(Ok);
            }
            if self.exhausted {
                return self.pending_error.take().map(Err);
            }

            match self.source.next() {
                Some(Ok(message)) => {
                    if self.released.is_some_and(|released| message.timestamp < released) {
                        tracing::warn!(
                            path = %self.path.display(),
                            timestamp = message.timestamp,
                            "dropping message older than the reorder window"
                        );
                        continue;
                    }
                    self.newest = self.newest.max(message.timestamp);
                    self.heap.push(Reverse(Pending {
                        timestamp: message.timestamp,
                        sequence: self.sequence,
                        message,
                    }));
                    self.sequence += 1;
                }
                Some(Err(e)) => {
                    self.pending_error = Some(e);
                    self.exhausted = true;
                }
                None => self.exhausted = true,
            }
        }
    }
}

/// What a file's leading bytes identify it as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Container(ContainerFormat),
    Zstd,
    Ros1,
}

/// Identify a storage file from its leading bytes
pub fn detect_signature(path: &Path) -> ReadResult<Signature> {
    let mut file = File::open(path).map_err(|e| ReadError::io(path, e))?;
    let mut head = [0u8; 16];
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(ReadError::io(path, e)),
        }
    }

    signature_of(&head[..filled]).ok_or_else(|| {
        ReadError::not_a_bag(
            path,
            if filled == 0 {
                "file is empty".to_string()
            } else {
                "unrecognised file signature".to_string()
            },
        )
    })
}

/// Match leading bytes against the known signatures
pub fn signature_of(head: &[u8]) -> Option<Signature> {
    if head.starts_with(SQLITE_MAGIC) {
        Some(Signature::Container(ContainerFormat::Sqlite3))
    } else if head.starts_with(MCAP_MAGIC) {
        Some(Signature::Container(ContainerFormat::Mcap))
    } else if head.starts_with(ZSTD_MAGIC) {
        Some(Signature::Zstd)
    } else if head.starts_with(ROS1_MAGIC) {
        Some(Signature::Ros1)
    } else {
        None
    }
}

/// Open a storage file, choosing the backend from its signature
pub fn open_storage(path: &Path) -> ReadResult<Box<dyn StorageReader>> {
    match detect_signature(path)? {
        Signature::Container(format) => open_container(path, format),
        Signature::Zstd => open_compressed(path),
        Signature::Ros1 => open_ros1(path),
    }
}

#[cfg(feature = "ros1")]
fn open_ros1(path: &Path) -> ReadResult<Box<dyn StorageReader>> {
    Ok(Box::new(ros1::Ros1Reader::open(path)?))
}

#[cfg(not(feature = "ros1"))]
fn open_ros1(path: &Path) -> ReadResult<Box<dyn StorageReader>> {
    Err(ReadError::UnsupportedFormat {
        path: path.to_path_buf(),
        format: "ROS1 bag v2.0 (feature not enabled)".to_string(),
    })
}

fn open_container(path: &Path, format: ContainerFormat) -> ReadResult<Box<dyn StorageReader>> {
    match format {
        #[cfg(feature = "sqlite")]
        ContainerFormat::Sqlite3 => Ok(Box::new(sqlite::SqliteReader::open(path)?)),
        #[cfg(not(feature = "sqlite"))]
        ContainerFormat::Sqlite3 => Err(ReadError::UnsupportedFormat {
            path: path.to_path_buf(),
            format: "sqlite3 (feature not enabled)".to_string(),
        }),
        #[cfg(feature = "mcap")]
        ContainerFormat::Mcap => Ok(Box::new(mcap::McapStorageReader::open(path)?)),
        #[cfg(not(feature = "mcap"))]
        ContainerFormat::Mcap => Err(ReadError::UnsupportedFormat {
            path: path.to_path_buf(),
            format: "mcap (feature not enabled)".to_string(),
        }),
        ContainerFormat::Ros1 => open_ros1(path),
    }
}

#[cfg(feature = "compression")]
fn open_compressed(path: &Path) -> ReadResult<Box<dyn StorageReader>> {
    let source = File::open(path).map_err(|e| ReadError::io(path, e))?;
    let mut decompressed = tempfile::NamedTempFile::new().map_err(|e| ReadError::io(path, e))?;
    zstd::stream::copy_decode(source, decompressed.as_file_mut())
        .map_err(|e| ReadError::compression(format!("{}: {e}", path.display())))?;

    tracing::debug!(
        path = %path.display(),
        scratch = %decompressed.path().display(),
        "decompressed zstd storage file"
    );

    let inner = match detect_signature(decompressed.path()) {
        Ok(Signature::Container(format)) => open_container(decompressed.path(), format)?,
        _ => {
            return Err(ReadError::not_a_bag(
                path,
                "zstd payload is not a SQLite3 or MCAP storage file",
            ))
        }
    };

    Ok(Box::new(Decompressed {
        inner,
        _scratch: decompressed,
    }))
}

#[cfg(not(feature = "compression"))]
fn open_compressed(path: &Path) -> ReadResult<Box<dyn StorageReader>> {
    Err(ReadError::UnsupportedFormat {
        path: path.to_path_buf(),
        format: "zstd (feature not enabled)".to_string(),
    })
}

/// Backend reading from a decompressed scratch copy that lives as long as it does
#[cfg(feature = "compression")]
struct Decompressed {
    inner: Box<dyn StorageReader>,
    _scratch: tempfile::NamedTempFile,
}

#[cfg(feature = "compression")]
impl StorageReader for Decompressed {
    fn format(&self) -> ContainerFormat {
        self.inner.format()
    }

    fn topics(&self) -> &[TopicInfo] {
        self.inner.topics()
    }

    fn streams(&self) -> ReadResult<Vec<MessageCursor<'_>>> {
        self.inner.streams()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_signature_matching() {
        assert_eq!(
            signature_of(b"SQLite format 3\0rest"),
            Some(Signature::Container(ContainerFormat::Sqlite3))
        );
        assert_eq!(
            signature_of(b"\x89MCAP0\r\n\x01"),
            Some(Signature::Container(ContainerFormat::Mcap))
        );
        assert_eq!(signature_of(&[0x28, 0xB5, 0x2F, 0xFD, 0x00]), Some(Signature::Zstd));
        assert_eq!(signature_of(b"#ROSBAG V2.0\n"), Some(Signature::Ros1));
        assert_eq!(signature_of(b"PK\x03\x04"), None);
        assert_eq!(signature_of(b""), None);
    }

    #[test]
    fn test_extension_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drive.mcap");
        std::fs::write(&path, b"definitely not a bag").unwrap();

        let result = open_storage(&path);
        assert!(matches!(result, Err(ReadError::NotABag { .. })));
    }

    #[test]
    fn test_empty_file_is_not_a_bag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.db3");
        std::fs::write(&path, b"").unwrap();

        match detect_signature(&path) {
            Err(ReadError::NotABag { reason, .. }) => assert_eq!(reason, "file is empty"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    fn stored(timestamp: u64) -> ReadResult<StoredMessage> {
        Ok(StoredMessage {
            topic: 0,
            timestamp,
            data: vec![timestamp as u8],
        })
    }

    fn timestamps(window: impl Iterator<Item = ReadResult<StoredMessage>>) -> Vec<u64> {
        window.map(|m| m.unwrap().timestamp).collect()
    }

    #[test]
    fn test_reorder_window_sorts_nearby_messages() {
        let source = [30, 10, 20, 50, 40].map(stored);
        let window = ReorderWindow::new(source.into_iter(), Path::new("x.mcap"));
        assert_eq!(timestamps(window), vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_reorder_window_releases_by_span() {
        // The first message is released once a message arrives a full span later
        let late = REORDER_SPAN_NS + 10;
        let source = vec![stored(10), stored(late), stored(5)];
        let window = ReorderWindow::new(source.into_iter(), Path::new("x.mcap"));
        assert_eq!(timestamps(window), vec![10, late]);
    }

    #[test]
    fn test_reorder_window_is_bounded() {
        let count = REORDER_WINDOW as u64 * 3;
        let source = (0..count).rev().map(stored);
        let window = ReorderWindow::new(source, Path::new("x.mcap"));
        // A fully reversed input keeps only what fits in one window
        let kept = timestamps(window);
        assert_eq!(kept.len(), REORDER_WINDOW);
        assert!(kept.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_reorder_window_flushes_before_error() {
        let source = vec![
            stored(20),
            stored(10),
            Err(ReadError::truncated("x.mcap", "cut")),
            stored(30),
        ];
        let mut window = ReorderWindow::new(source.into_iter(), Path::new("x.mcap"));
        assert_eq!(window.next().unwrap().unwrap().timestamp, 10);
        assert_eq!(window.next().unwrap().unwrap().timestamp, 20);
        assert!(matches!(window.next(), Some(Err(ReadError::Truncated { .. }))));
        assert!(window.next().is_none());
    }

    #[cfg(not(feature = "ros1"))]
    #[test]
    fn test_ros1_needs_feature() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.bag");
        std::fs::write(&path, b"#ROSBAG V2.0\n\x00\x00\x00\x00").unwrap();

        let result = open_storage(&path);
        assert!(matches!(result, Err(ReadError::UnsupportedFormat { .. })));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_wrapping_garbage_is_not_a_bag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drive.db3.zstd");
        let compressed = zstd::encode_all(&b"plain text inside"[..], 3).unwrap();
        std::fs::write(&path, compressed).unwrap();

        let result = open_storage(&path);
        assert!(matches!(result, Err(ReadError::NotABag { .. })));
    }
}

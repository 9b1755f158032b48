//! Main reader implementation for bag files
//!
//! A [`Reader`] accepts a single storage file (`.db3`, `.mcap`, a ROS1 `.bag`,
//! or a zstd-compressed `.db3`/`.mcap`) or a rosbag2 directory holding
//! `metadata.yaml`. The storage backend is picked from each file's signature.

use crate::error::{ReadError, ReadResult};
use crate::merge::{MergedRecords, MergedTopic, Substream};
use crate::metadata::{BagMetadata, METADATA_FILE};
use crate::storage::{open_storage, StorageReader};
use crate::types::{ContainerFormat, TopicInfo};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reader over one logical bag
pub struct Reader {
    /// Path the bag was opened from
    bag_path: PathBuf,
    /// Parsed metadata, for bag directories
    metadata: Option<BagMetadata>,
    /// Storage backends, one per storage file
    storages: Vec<Box<dyn StorageReader>>,
    /// Topics of all storage files, sorted by name
    topics: Vec<TopicInfo>,
    /// Cause of an early stop, set once records have been read
    truncation: Option<ReadError>,
}

impl Reader {
    /// Open a bag file or bag directory
    pub fn open<P: AsRef<Path>>(bag_path: P) -> ReadResult<Self> {
        let bag_path = bag_path.as_ref().to_path_buf();

        if !bag_path.exists() {
            return Err(ReadError::io(
                &bag_path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "bag not found"),
            ));
        }

        let (metadata, storage_paths) = if bag_path.is_dir() {
            let metadata = BagMetadata::from_file(bag_path.join(METADATA_FILE))?;
            let paths = metadata.storage_paths(&bag_path);
            for path in &paths {
                if !path.is_file() {
                    return Err(ReadError::metadata(
                        &bag_path,
                        format!("storage file {} not found", path.display()),
                    ));
                }
            }
            (Some(metadata), paths)
        } else {
            (None, vec![bag_path.clone()])
        };

        let storages = storage_paths
            .iter()
            .map(|path| open_storage(path))
            .collect::<ReadResult<Vec<_>>>()?;

        let topics = merge_topic_tables(&storages);

        tracing::debug!(
            bag = %bag_path.display(),
            files = storages.len(),
            topics = topics.len(),
            "opened bag"
        );

        Ok(Self {
            bag_path,
            metadata,
            storages,
            topics,
            truncation: None,
        })
    }

    /// Path the bag was opened from
    pub fn path(&self) -> &Path {
        &self.bag_path
    }

    /// Container format of the first storage file
    pub fn format(&self) -> Option<ContainerFormat> {
        self.storages.first().map(|storage| storage.format())
    }

    /// Get the metadata, for bag directories
    pub fn metadata(&self) -> Option<&BagMetadata> {
        self.metadata.as_ref()
    }

    /// Get information about all topics in the bag, sorted by name
    pub fn topics(&self) -> &[TopicInfo] {
        &self.topics
    }

    /// Cause of an early stop, if reading hit a truncated or corrupt section
    pub fn truncation(&self) -> Option<&ReadError> {
        self.truncation.as_ref()
    }

    /// Time-ordered record sequence
    ///
    /// Every call reads the bag from the start. Payloads are pulled from the
    /// storage cursors as the sequence advances, so memory stays bounded by one
    /// page or reorder window per cursor. If reading stops early, every recovered
    /// record is yielded first, followed by one [`ReadError::Truncated`], which is
    /// then also available from [`Reader::truncation`].
    pub fn records(&mut self) -> MergedRecords<'_> {
        let topics: Vec<MergedTopic> = self
            .topics
            .iter()
            .map(|topic| MergedTopic {
                name: Arc::from(topic.name.as_str()),
                schema: Arc::from(topic.schema.as_str()),
            })
            .collect();

        let mut substreams = Vec::new();
        let mut failure = None;
        for storage in &self.storages {
            let topic_map: Vec<Option<usize>> = storage
                .topics()
                .iter()
                .map(|topic| self.topic_index(&topic.name))
                .collect();
            match storage.streams() {
                Ok(cursors) => substreams.extend(cursors.into_iter().map(|cursor| Substream {
                    cursor,
                    topic_map: topic_map.clone(),
                })),
                Err(e) => {
                    tracing::warn!(bag = %self.bag_path.display(), error = %e, "storage unreadable");
                    failure.get_or_insert_with(|| ReadError::truncated(&self.bag_path, e.to_string()));
                }
            }
        }

        self.truncation = None;
        let merged = MergedRecords::new(substreams, topics);
        let merged = match failure {
            Some(e) => merged.with_pending_error(e),
            None => merged,
        };
        merged.report_truncation_to(&mut self.truncation)
    }

    /// Position of a topic in [`Reader::topics`]
    pub fn topic_index(&self, name: &str) -> Option<usize> {
        self.topics
            .binary_search_by(|topic| topic.name.as_str().cmp(name))
            .ok()
    }
}

/// Union of per-file topic tables, keyed by name
fn merge_topic_tables(storages: &[Box<dyn StorageReader>]) -> Vec<TopicInfo> {
    let mut by_name: BTreeMap<String, TopicInfo> = BTreeMap::new();
    for storage in storages {
        for topic in storage.topics() {
            match by_name.get_mut(&topic.name) {
                Some(existing) => {
                    if existing.schema != topic.schema {
                        tracing::warn!(
                            topic = %topic.name,
                            kept = %existing.schema,
                            ignored = %topic.schema,
                            "topic schema differs between storage files"
                        );
                    }
                    existing.message_count += topic.message_count;
                }
                None => {
                    by_name.insert(topic.name.clone(), topic.clone());
                }
            }
        }
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_reader_with_missing_bag() {
        let result = Reader::open("/nonexistent/path/bag.db3");
        assert!(matches!(result, Err(ReadError::Io { .. })));
    }

    #[test]
    fn test_reader_directory_without_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let result = Reader::open(temp_dir.path());
        assert!(matches!(result, Err(ReadError::Io { .. })));
    }

    #[test]
    fn test_reader_directory_with_missing_storage() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(METADATA_FILE),
            r#"
rosbag2_bagfile_information:
  version: 5
  storage_identifier: sqlite3
  relative_file_paths:
    - missing_0.db3
  message_count: 0
"#,
        )
        .unwrap();

        let result = Reader::open(temp_dir.path());
        assert!(matches!(result, Err(ReadError::Metadata { .. })));
    }

    #[test]
    fn test_reader_rejects_unknown_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db3");
        fs::write(&path, b"hello").unwrap();

        assert!(matches!(
            Reader::open(&path),
            Err(ReadError::NotABag { .. })
        ));
    }
}

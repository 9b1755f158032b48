//! ROS1 bag (format 2.0) storage backend
//!
//! Built on the `rosbag` crate. Messages live in chunks, each holding the
//! connection records its messages refer to. Chunks are decompressed one at a
//! time, and payloads keep their ROS1 serialization; the schema names
//! (`sensor_msgs/PointCloud2`) tell the decoder which wire format to read.

use crate::error::{ReadError, ReadResult};
use crate::storage::{MessageCursor, ReorderWindow, StorageReader, StoredMessage};
use crate::types::{ContainerFormat, TopicInfo, WireFormat};
use rosbag::{ChunkRecord, MessageRecord, RosBag};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// ROS1 bag reader implementation
pub struct Ros1Reader {
    path: PathBuf,
    bag: RosBag,
    /// Topics sorted by name
    topics: Vec<TopicInfo>,
    /// Topic index for each connection id
    connections: HashMap<u32, usize>,
}

impl Ros1Reader {
    /// Open a bag and collect its connections from the chunk section
    pub fn open(path: &Path) -> ReadResult<Self> {
        let bag = RosBag::new(path).map_err(|e| ReadError::not_a_bag(path, e.to_string()))?;

        let mut connection_topics: BTreeMap<u32, (String, String)> = BTreeMap::new();
        let mut counts: HashMap<u32, u64> = HashMap::new();
        'chunks: for record in bag.chunk_records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ROS1 chunk scan stopped early");
                    break;
                }
            };
            let ChunkRecord::Chunk(chunk) = record else {
                continue;
            };
            for message in chunk.messages() {
                match message {
                    Ok(MessageRecord::Connection(conn)) => {
                        connection_topics
                            .entry(conn.id)
                            .or_insert_with(|| (conn.topic.to_string(), conn.tp.to_string()));
                    }
                    Ok(MessageRecord::MessageData(data)) => {
                        *counts.entry(data.conn_id).or_default() += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ROS1 chunk scan stopped early");
                        break 'chunks;
                    }
                }
            }
        }

        let mut by_name: BTreeMap<String, TopicInfo> = BTreeMap::new();
        for (id, (topic, schema)) in &connection_topics {
            let count = counts.get(id).copied().unwrap_or(0);
            by_name
                .entry(topic.clone())
                .and_modify(|existing| existing.message_count += count)
                .or_insert_with(|| TopicInfo {
                    name: topic.clone(),
                    schema: schema.clone(),
                    serialization_format: WireFormat::Ros1.as_str().to_string(),
                    message_count: count,
                });
        }
        let topics: Vec<TopicInfo> = by_name.into_values().collect();

        // Several connections may publish on one topic
        let connections = connection_topics
            .iter()
            .filter_map(|(id, (topic, _))| {
                let index = topics.binary_search_by(|t| t.name.cmp(topic)).ok()?;
                Some((*id, index))
            })
            .collect();

        tracing::debug!(
            path = %path.display(),
            connections = connection_topics.len(),
            topics = topics.len(),
            "opened ROS1 bag"
        );

        Ok(Self {
            path: path.to_path_buf(),
            bag,
            topics,
            connections,
        })
    }
}

impl StorageReader for Ros1Reader {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Ros1
    }

    fn topics(&self) -> &[TopicInfo] {
        &self.topics
    }

    fn streams(&self) -> ReadResult<Vec<MessageCursor<'_>>> {
        let path = self.path.as_path();
        let mut records = self.bag.chunk_records();
        let mut buffered: VecDeque<StoredMessage> = VecDeque::new();
        let mut pending_error: Option<ReadError> = None;
        let mut finished = false;

        let messages = std::iter::from_fn(move || loop {
            if let Some(message) = buffered.pop_front() {
                return Some(Ok(message));
            }
            if finished {
                return pending_error.take().map(Err);
            }

            match records.next() {
                Some(Ok(ChunkRecord::Chunk(chunk))) => {
                    for message in chunk.messages() {
                        match message {
                            Ok(MessageRecord::MessageData(data)) => {
                                let Some(&topic) = self.connections.get(&data.conn_id) else {
                                    continue;
                                };
                                buffered.push_back(StoredMessage {
                                    topic,
                                    timestamp: data.time,
                                    data: data.data.to_vec(),
                                });
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "ROS1 read stopped early");
                                pending_error = Some(ReadError::truncated(path, e.to_string()));
                                finished = true;
                                break;
                            }
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "ROS1 read stopped early");
                    pending_error = Some(ReadError::truncated(path, e.to_string()));
                    finished = true;
                }
                None => finished = true,
            }
        });

        // Chunks follow record order, which may run slightly ahead of receive time
        let cursor: MessageCursor<'_> = Box::new(ReorderWindow::new(messages, path));
        Ok(vec![cursor])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ros1_header_without_records_is_not_a_bag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.bag");
        std::fs::write(&path, b"#ROSBAG V2.0\n\x00\x00").unwrap();

        assert!(matches!(
            Ros1Reader::open(&path),
            Err(ReadError::NotABag { .. })
        ));
    }
}

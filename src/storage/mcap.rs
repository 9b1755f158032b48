//! MCAP storage backend for reading ROS2 bag files
//!
//! The file is memory-mapped and walked once with [`mcap::MessageStream`], so
//! payloads are copied out one message at a time. Topics come from the summary
//! section when the file has one; a file cut short loses its summary, so in that
//! case the channels are discovered by scanning the data.

use crate::error::{ReadError, ReadResult};
use crate::storage::{MessageCursor, ReorderWindow, StorageReader, StoredMessage, MCAP_MAGIC};
use crate::types::{ContainerFormat, TopicInfo};
use mcap::read::Options;
use mcap::{Channel, MessageStream};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

/// MCAP storage reader implementation
pub struct McapStorageReader {
    /// Path to the MCAP file
    path: PathBuf,
    /// Memory-mapped file contents
    mapped: memmap2::Mmap,
    /// Topics sorted by name
    topics: Vec<TopicInfo>,
}

impl McapStorageReader {
    /// Open and index an MCAP file
    pub fn open(path: &Path) -> ReadResult<Self> {
        let file = File::open(path).map_err(|e| ReadError::io(path, e))?;
        // SAFETY: the map is read-only and the file is not modified while the reader lives
        let mapped = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| ReadError::io(path, e))?;

        let topics = match mcap::Summary::read(&mapped) {
            Ok(Some(summary)) if !summary.channels.is_empty() => {
                let counts = summary
                    .stats
                    .as_ref()
                    .map(|stats| stats.channel_message_counts.clone())
                    .unwrap_or_default();
                collect_topics(summary.channels.values().map(|channel| {
                    let count = counts.get(&channel.id).copied().unwrap_or(0);
                    (channel.as_ref(), count)
                }))
            }
            _ => Self::scan_topics(path, &mapped)?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            mapped,
            topics,
        })
    }

    /// Discover channels by walking the data section
    fn scan_topics(path: &Path, mapped: &[u8]) -> ReadResult<Vec<TopicInfo>> {
        tracing::debug!(path = %path.display(), "MCAP summary unavailable, scanning channels");

        let stream = open_stream(path, mapped)?;
        let mut seen: HashMap<u16, (TopicInfo, u64)> = HashMap::new();
        for message in stream {
            let Ok(message) = message else { break };
            seen.entry(message.channel.id)
                .or_insert_with(|| (topic_of(&message.channel, 0), 0))
                .1 += 1;
        }

        let mut by_name: BTreeMap<String, TopicInfo> = BTreeMap::new();
        for (mut topic, count) in seen.into_values() {
            topic.message_count = count;
            merge_topic(&mut by_name, topic);
        }
        Ok(by_name.into_values().collect())
    }
}

fn open_stream<'a>(path: &Path, mapped: &'a [u8]) -> ReadResult<MessageStream<'a>> {
    MessageStream::new_with_options(mapped, Options::IgnoreEndMagic.into())
        .map_err(|e| ReadError::not_a_bag(path, e.to_string()))
}

fn topic_of(channel: &Channel, message_count: u64) -> TopicInfo {
    TopicInfo {
        name: channel.topic.clone(),
        schema: channel
            .schema
            .as_ref()
            .map(|schema| schema.name.clone())
            .unwrap_or_default(),
        serialization_format: channel.message_encoding.clone(),
        message_count,
    }
}

fn merge_topic(by_name: &mut BTreeMap<String, TopicInfo>, topic: TopicInfo) {
    match by_name.get_mut(&topic.name) {
        Some(existing) => existing.message_count += topic.message_count,
        None => {
            by_name.insert(topic.name.clone(), topic);
        }
    }
}

fn collect_topics<'c>(channels: impl Iterator<Item = (&'c Channel<'c>, u64)>) -> Vec<TopicInfo> {
    let mut by_name = BTreeMap::new();
    for (channel, count) in channels {
        merge_topic(&mut by_name, topic_of(channel, count));
    }
    by_name.into_values().collect()
}

impl StorageReader for McapStorageReader {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Mcap
    }

    fn topics(&self) -> &[TopicInfo] {
        &self.topics
    }

    fn streams(&self) -> ReadResult<Vec<MessageCursor<'_>>> {
        let index: HashMap<&str, usize> = self
            .topics
            .iter()
            .enumerate()
            .map(|(idx, topic)| (topic.name.as_str(), idx))
            .collect();

        let path = self.path.as_path();
        let mut stream = open_stream(path, &self.mapped)?;
        let mut finished = false;
        let messages = std::iter::from_fn(move || {
            if finished {
                return None;
            }
            loop {
                match stream.next() {
                    Some(Ok(message)) => {
                        let Some(&topic) = index.get(message.channel.topic.as_str()) else {
                            tracing::debug!(
                                topic = %message.channel.topic,
                                "skipping message on channel missing from the summary"
                            );
                            continue;
                        };
                        return Some(Ok(StoredMessage {
                            topic,
                            timestamp: message.log_time,
                            data: message.data.into_owned(),
                        }));
                    }
                    Some(Err(e)) => {
                        tracing::warn!(path = %path.display(), error = %e, "MCAP read stopped early");
                        finished = true;
                        return Some(Err(ReadError::truncated(path, e.to_string())));
                    }
                    None => {
                        finished = true;
                        // A complete file ends with the magic after its footer
                        if self.mapped.ends_with(MCAP_MAGIC) {
                            return None;
                        }
                        tracing::warn!(path = %path.display(), "MCAP file ends before its footer");
                        return Some(Err(ReadError::truncated(
                            path,
                            "file ends before the MCAP footer",
                        )));
                    }
                }
            }
        });

        // Chunks may interleave out of log-time order
        let cursor: MessageCursor<'_> = Box::new(ReorderWindow::new(messages, path));
        Ok(vec![cursor])
    }
}

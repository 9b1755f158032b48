//! K-way merge of storage cursors into one time-ordered sequence

use crate::error::ReadError;
use crate::storage::MessageCursor;
use crate::types::RawRecord;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A topic as seen by the merged sequence
#[derive(Debug, Clone)]
pub struct MergedTopic {
    pub name: Arc<str>,
    pub schema: Arc<str>,
}

/// One storage cursor and how its topics map onto the merged topic table
pub struct Substream<'a> {
    pub cursor: MessageCursor<'a>,
    /// Merged topic index for each storage-local topic index
    pub topic_map: Vec<Option<usize>>,
}

struct Head {
    timestamp: u64,
    topic_index: usize,
    sequence: u64,
    stream: usize,
    data: Vec<u8>,
}

impl Head {
    fn key(&self) -> (u64, usize, u64) {
        (self.timestamp, self.topic_index, self.sequence)
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Lazy merge ordered by `(timestamp, topic_index, per-topic sequence)`
///
/// The heap holds one message per cursor. After the last record, the first
/// cursor error (typically [`ReadError::Truncated`]) is yielded once, so callers
/// see every recovered record before the failure.
pub struct MergedRecords<'a> {
    streams: Vec<Substream<'a>>,
    topics: Vec<MergedTopic>,
    sequences: Vec<u64>,
    heap: BinaryHeap<Reverse<Head>>,
    trailing_error: Option<ReadError>,
    truncation_slot: Option<&'a mut Option<ReadError>>,
}

impl<'a> MergedRecords<'a> {
    /// Build a merge over the given cursors
    pub fn new(streams: Vec<Substream<'a>>, topics: Vec<MergedTopic>) -> Self {
        let mut merged = Self {
            heap: BinaryHeap::with_capacity(streams.len()),
            sequences: vec![0; topics.len()],
            topics,
            streams,
            trailing_error: None,
            truncation_slot: None,
        };
        for stream in 0..merged.streams.len() {
            merged.refill(stream);
        }
        merged
    }

    /// Yield `error` after the last record unless a cursor fails first
    pub fn with_pending_error(mut self, error: ReadError) -> Self {
        self.trailing_error.get_or_insert(error);
        self
    }

    /// Store a copy of the trailing truncation in `slot` once it is yielded
    pub fn report_truncation_to(mut self, slot: &'a mut Option<ReadError>) -> Self {
        self.truncation_slot = Some(slot);
        self
    }

    fn refill(&mut self, stream: usize) {
        let substream = &mut self.streams[stream];
        loop {
            match substream.cursor.next() {
                Some(Ok(message)) => {
                    let Some(topic_index) = substream.topic_map.get(message.topic).copied().flatten()
                    else {
                        continue;
                    };
                    let sequence = &mut self.sequences[topic_index];
                    self.heap.push(Reverse(Head {
                        timestamp: message.timestamp,
                        topic_index,
                        sequence: *sequence,
                        stream,
                        data: message.data,
                    }));
                    *sequence += 1;
                    return;
                }
                Some(Err(e)) => {
                    self.trailing_error.get_or_insert(e);
                    return;
                }
                None => return,
            }
        }
    }

    fn finish(&mut self) -> Option<ReadError> {
        let error = self.trailing_error.take()?;
        if let (Some(slot), ReadError::Truncated { path, reason }) =
            (self.truncation_slot.as_mut(), &error)
        {
            **slot = Some(ReadError::truncated(path.clone(), reason.clone()));
        }
        Some(error)
    }
}

impl Iterator for MergedRecords<'_> {
    type Item = Result<RawRecord, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.heap.pop() {
            Some(Reverse(head)) => {
                self.refill(head.stream);
                let topic = &self.topics[head.topic_index];
                Some(Ok(RawRecord {
                    topic: topic.name.to_string(),
                    topic_index: head.topic_index,
                    timestamp: head.timestamp,
                    schema: topic.schema.to_string(),
                    payload: head.data,
                }))
            }
            None => self.finish().map(Err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReadResult;
    use crate::storage::StoredMessage;

    fn topics(names: &[&str]) -> Vec<MergedTopic> {
        names
            .iter()
            .map(|name| MergedTopic {
                name: Arc::from(*name),
                schema: Arc::from("test/msg/Blob"),
            })
            .collect()
    }

    fn cursor(items: Vec<ReadResult<StoredMessage>>) -> MessageCursor<'static> {
        Box::new(items.into_iter())
    }

    fn message(topic: usize, timestamp: u64, byte: u8) -> ReadResult<StoredMessage> {
        Ok(StoredMessage {
            topic,
            timestamp,
            data: vec![byte],
        })
    }

    /// A single-topic cursor whose local topic 0 is merged topic `topic_index`
    fn substream(topic_index: usize, stamps: &[u64]) -> Substream<'static> {
        Substream {
            cursor: cursor(
                stamps
                    .iter()
                    .map(|&ts| message(0, ts, topic_index as u8))
                    .collect(),
            ),
            topic_map: vec![Some(topic_index)],
        }
    }

    #[test]
    fn test_merge_orders_by_timestamp_then_topic() {
        let merged = MergedRecords::new(
            vec![substream(1, &[5, 10, 20]), substream(0, &[0, 10, 30])],
            topics(&["/lidar", "/camera"]),
        );

        let order: Vec<(u64, String)> = merged
            .map(|r| r.unwrap())
            .map(|r| (r.timestamp, r.topic))
            .collect();
        assert_eq!(
            order,
            vec![
                (0, "/lidar".to_string()),
                (5, "/camera".to_string()),
                (10, "/lidar".to_string()),
                (10, "/camera".to_string()),
                (20, "/camera".to_string()),
                (30, "/lidar".to_string()),
            ]
        );
    }

    #[test]
    fn test_multi_topic_cursor_is_remapped() {
        // One file-order cursor carrying two local topics in swapped order
        let stream = Substream {
            cursor: cursor(vec![message(0, 1, 10), message(1, 2, 20), message(2, 3, 30)]),
            topic_map: vec![Some(1), Some(0), None],
        };
        let records: Vec<RawRecord> = MergedRecords::new(vec![stream], topics(&["/a", "/b"]))
            .map(|r| r.unwrap())
            .collect();

        let seen: Vec<(&str, usize, u8)> = records
            .iter()
            .map(|r| (r.topic.as_str(), r.topic_index, r.payload[0]))
            .collect();
        assert_eq!(seen, vec![("/b", 1, 10), ("/a", 0, 20)]);
    }

    #[test]
    fn test_same_topic_equal_stamps_keep_stream_order() {
        // Two files holding the same topic, e.g. a split bag
        let first = Substream {
            cursor: cursor(vec![message(0, 7, 1)]),
            topic_map: vec![Some(0)],
        };
        let second = Substream {
            cursor: cursor(vec![message(0, 7, 2)]),
            topic_map: vec![Some(0)],
        };

        let payloads: Vec<Vec<u8>> = MergedRecords::new(vec![first, second], topics(&["/lidar"]))
            .map(|r| r.unwrap().payload)
            .collect();
        assert_eq!(payloads, vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_cursor_error_comes_after_every_record() {
        let broken = Substream {
            cursor: cursor(vec![
                message(0, 1, 1),
                Err(ReadError::truncated("bag.mcap", "chunk cut")),
            ]),
            topic_map: vec![Some(0)],
        };
        let mut slot = None;
        let mut merged = MergedRecords::new(
            vec![broken, substream(1, &[2, 3])],
            topics(&["/lidar", "/camera"]),
        )
        .report_truncation_to(&mut slot);

        let stamps: Vec<u64> = merged
            .by_ref()
            .take(3)
            .map(|r| r.unwrap().timestamp)
            .collect();
        assert_eq!(stamps, vec![1, 2, 3]);
        assert!(matches!(merged.next(), Some(Err(ReadError::Truncated { .. }))));
        assert!(merged.next().is_none());
        drop(merged);
        assert!(matches!(slot, Some(ReadError::Truncated { .. })));
    }

    #[test]
    fn test_pending_error_yields_once() {
        let mut merged = MergedRecords::new(vec![substream(0, &[1])], topics(&["/lidar"]))
            .with_pending_error(ReadError::truncated("bag.db3", "unreadable"));

        assert!(merged.next().unwrap().is_ok());
        assert!(matches!(merged.next(), Some(Err(ReadError::Truncated { .. }))));
        assert!(merged.next().is_none());
    }

    #[test]
    fn test_empty_merge() {
        let mut merged = MergedRecords::new(Vec::new(), Vec::new());
        assert!(merged.next().is_none());
    }
}

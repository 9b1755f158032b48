//! SQLite3 storage backend implementation

use crate::error::{ReadError, ReadResult};
use crate::storage::{MessageCursor, StorageReader, StoredMessage};
use crate::types::{ContainerFormat, TopicInfo};
use rusqlite::{params, Connection as SqliteConnection, OpenFlags};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// SQLite3 storage reader implementation
pub struct SqliteReader {
    /// Database file path
    path: PathBuf,
    /// Read-only database connection
    conn: SqliteConnection,
    /// Topics in `topics` table order
    topics: Vec<TopicInfo>,
    /// Row id of each entry in `topics`
    topic_ids: Vec<i64>,
}

impl SqliteReader {
    /// Open a rosbag2 SQLite3 database for reading
    pub fn open(path: &Path) -> ReadResult<Self> {
        let conn = SqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ReadError::not_a_bag(path, e.to_string()))?;

        // Verify the database has required tables
        let table_count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('messages', 'topics')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| ReadError::not_a_bag(path, e.to_string()))?;

        if table_count != 2 {
            return Err(ReadError::not_a_bag(
                path,
                "database is missing the messages or topics table",
            ));
        }

        let mut reader = Self {
            path: path.to_path_buf(),
            conn,
            topics: Vec::new(),
            topic_ids: Vec::new(),
        };
        reader.load_topics()?;
        Ok(reader)
    }

    /// Load topics and their message counts from the database
    fn load_topics(&mut self) -> ReadResult<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, type, serialization_format FROM topics ORDER BY id")
            .map_err(|e| ReadError::not_a_bag(&self.path, e.to_string()))?;

        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let schema: String = row.get(2)?;
            let serialization_format: String = row.get(3)?;
            Ok((id, name, schema, serialization_format))
        })?;

        let mut topics = Vec::new();
        let mut topic_ids = Vec::new();
        for row in rows {
            let (id, name, schema, serialization_format) = row?;
            topic_ids.push(id);
            topics.push(TopicInfo {
                name,
                schema,
                serialization_format,
                message_count: 0,
            });
        }
        drop(stmt);

        // Counts are informational; a damaged messages table must not hide the topics
        let mut count_stmt = self
            .conn
            .prepare("SELECT COUNT(*) FROM messages WHERE topic_id = ?1")?;
        for (topic, id) in topics.iter_mut().zip(&topic_ids) {
            match count_stmt.query_row([id], |row| row.get::<_, i64>(0)) {
                Ok(count) => topic.message_count = count.max(0) as u64,
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    topic = %topic.name,
                    error = %e,
                    "failed to count messages"
                ),
            }
        }

        self.topics = topics;
        self.topic_ids = topic_ids;
        Ok(())
    }
}

/// Rows fetched per query by a [`TopicCursor`]
const PAGE_SIZE: i64 = 256;

/// Keyset-paged query for one topic, resuming after `(timestamp, id)`
const PAGE_QUERY: &str = "SELECT id, timestamp, data FROM messages \
     WHERE topic_id = ?1 AND (timestamp > ?2 OR (timestamp = ?2 AND id > ?3)) \
     ORDER BY timestamp, id LIMIT ?4";

/// Lazy per-topic cursor holding at most one page of payloads
struct TopicCursor<'a> {
    reader: &'a SqliteReader,
    topic: usize,
    topic_id: i64,
    /// `(timestamp, id)` of the last row fetched
    after: (i64, i64),
    page: VecDeque<StoredMessage>,
    error: Option<ReadError>,
    exhausted: bool,
}

impl<'a> TopicCursor<'a> {
    fn new(reader: &'a SqliteReader, topic: usize) -> Self {
        Self {
            reader,
            topic,
            topic_id: reader.topic_ids[topic],
            after: (i64::MIN, i64::MIN),
            page: VecDeque::new(),
            error: None,
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> rusqlite::Result<()> {
        let mut stmt = self.reader.conn.prepare_cached(PAGE_QUERY)?;
        let mut rows = stmt.query(params![self.topic_id, self.after.0, self.after.1, PAGE_SIZE])?;

        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let timestamp: i64 = row.get(1)?;
            let data: Vec<u8> = row.get(2)?;
            self.after = (timestamp, id);
            self.page.push_back(StoredMessage {
                topic: self.topic,
                timestamp: timestamp.max(0) as u64,
                data,
            });
            fetched += 1;
        }
        if fetched < PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for TopicCursor<'_> {
    type Item = ReadResult<StoredMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                let topic = &self.reader.topics[self.topic].name;
                tracing::warn!(
                    path = %self.reader.path.display(),
                    topic = %topic,
                    error = %e,
                    "SQLite read stopped early"
                );
                self.exhausted = true;
                self.error = Some(ReadError::truncated(
                    &self.reader.path,
                    format!("topic {topic}: {e}"),
                ));
            }
        }
        match self.page.pop_front() {
            Some(message) => Some(Ok(message)),
            None => self.error.take().map(Err),
        }
    }
}

impl StorageReader for SqliteReader {
    fn format(&self) -> ContainerFormat {
        ContainerFormat::Sqlite3
    }

    fn topics(&self) -> &[TopicInfo] {
        &self.topics
    }

    fn streams(&self) -> ReadResult<Vec<MessageCursor<'_>>> {
        Ok((0..self.topics.len())
            .map(|topic| Box::new(TopicCursor::new(self, topic)) as MessageCursor<'_>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_bag(path: &Path) -> SqliteConnection {
        let conn = SqliteConnection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE topics(id INTEGER PRIMARY KEY, name TEXT NOT NULL, type TEXT NOT NULL,
                 serialization_format TEXT NOT NULL, offered_qos_profiles TEXT NOT NULL);
             CREATE TABLE messages(id INTEGER PRIMARY KEY, topic_id INTEGER NOT NULL,
                 timestamp INTEGER NOT NULL, data BLOB NOT NULL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_sqlite_reader_streams_sorted_per_topic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bag.db3");
        {
            let conn = create_bag(&path);
            conn.execute(
                "INSERT INTO topics VALUES (1, '/points', 'sensor_msgs/msg/PointCloud2', 'cdr', '')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO topics VALUES (2, '/imu', 'sensor_msgs/msg/Imu', 'cdr', '')",
                [],
            )
            .unwrap();
            for (topic_id, ts, byte) in [(1, 30, 3u8), (2, 10, 9), (1, 10, 1), (1, 20, 2)] {
                conn.execute(
                    "INSERT INTO messages(topic_id, timestamp, data) VALUES (?1, ?2, ?3)",
                    rusqlite::params![topic_id, ts, vec![byte]],
                )
                .unwrap();
            }
        }

        let reader = SqliteReader::open(&path).unwrap();
        assert_eq!(reader.format(), ContainerFormat::Sqlite3);
        assert_eq!(reader.topics().len(), 2);
        assert_eq!(reader.topics()[0].name, "/points");
        assert_eq!(reader.topics()[0].message_count, 3);

        let mut streams = reader.streams().unwrap();
        assert_eq!(streams.len(), 2);
        let points: Vec<StoredMessage> = streams.remove(0).map(|m| m.unwrap()).collect();
        let stamps: Vec<u64> = points.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        assert_eq!(points[0].data, vec![1]);
        assert!(points.iter().all(|m| m.topic == 0));
        let imu: Vec<StoredMessage> = streams.remove(0).map(|m| m.unwrap()).collect();
        assert_eq!(imu.len(), 1);
        assert_eq!(imu[0].topic, 1);
    }

    #[test]
    fn test_cursor_pages_through_equal_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bag.db3");
        let total = PAGE_SIZE as usize * 2 + 7;
        {
            let conn = create_bag(&path);
            conn.execute(
                "INSERT INTO topics VALUES (1, '/points', 'sensor_msgs/msg/PointCloud2', 'cdr', '')",
                [],
            )
            .unwrap();
            // Every row shares a timestamp, so paging must resume on the row id
            for i in 0..total {
                conn.execute(
                    "INSERT INTO messages(topic_id, timestamp, data) VALUES (1, ?1, ?2)",
                    rusqlite::params![if i < 10 { 5 } else { 9 }, (i as u32).to_le_bytes().to_vec()],
                )
                .unwrap();
            }
        }

        let reader = SqliteReader::open(&path).unwrap();
        let mut cursor = TopicCursor::new(&reader, 0);
        let first = cursor.next().unwrap().unwrap();
        assert_eq!(first.timestamp, 5);
        // Only one page of payloads is held at a time
        assert_eq!(cursor.page.len(), PAGE_SIZE as usize - 1);

        let rest: Vec<StoredMessage> = cursor.map(|m| m.unwrap()).collect();
        assert_eq!(rest.len(), total - 1);
        let order: Vec<u32> = std::iter::once(&first)
            .chain(&rest)
            .map(|m| u32::from_le_bytes(m.data[..4].try_into().unwrap()))
            .collect();
        assert_eq!(order, (0..total as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_sqlite_without_bag_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.db3");
        {
            let conn = SqliteConnection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE notes(id INTEGER PRIMARY KEY);")
                .unwrap();
        }

        assert!(matches!(
            SqliteReader::open(&path),
            Err(ReadError::NotABag { .. })
        ));
    }
}

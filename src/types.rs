//! Core data types shared by the reader, decoder and pipeline

use serde::{Deserialize, Serialize};

/// Storage container variant, identified by file signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// rosbag2 SQLite3 storage (`.db3`)
    Sqlite3,
    /// MCAP storage (`.mcap`)
    Mcap,
    /// ROS1 bag format 2.0 (`.bag`)
    Ros1,
}

impl ContainerFormat {
    /// Storage identifier as written in rosbag2 metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerFormat::Sqlite3 => "sqlite3",
            ContainerFormat::Mcap => "mcap",
            ContainerFormat::Ros1 => "ros1",
        }
    }

    /// Parse a rosbag2 storage identifier; ROS1 bags carry no metadata file
    pub fn from_storage_id(id: &str) -> Option<Self> {
        match id {
            "sqlite3" => Some(ContainerFormat::Sqlite3),
            "mcap" => Some(ContainerFormat::Mcap),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialization of message payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// ROS2 CDR with an encapsulation header
    Cdr,
    /// ROS1 packed little-endian serialization
    Ros1,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Cdr => "cdr",
            WireFormat::Ros1 => "ros1",
        }
    }

    /// Parse a serialization format as recorded per topic
    pub fn of_serialization(format: &str) -> Option<Self> {
        if format.eq_ignore_ascii_case("cdr") {
            Some(WireFormat::Cdr)
        } else if format.eq_ignore_ascii_case("ros1") {
            Some(WireFormat::Ros1)
        } else {
            None
        }
    }
}

/// A topic and the schema its messages are serialized with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Topic name (e.g., "/camera/image_raw")
    pub name: String,
    /// Schema identifier (e.g., "sensor_msgs/msg/Image")
    pub schema: String,
    /// Serialization format ("cdr" for ROS2 bags, "ros1" for ROS1 bags)
    pub serialization_format: String,
    /// Number of messages on this topic
    pub message_count: u64,
}

impl TopicInfo {
    /// Wire format of payloads on this topic, if one the decoder reads
    pub fn wire_format(&self) -> Option<WireFormat> {
        WireFormat::of_serialization(&self.serialization_format)
    }
}

/// One undecoded message as stored in the bag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Topic name
    pub topic: String,
    /// Position of the topic in the reader's topic table
    pub topic_index: usize,
    /// Receive timestamp in nanoseconds since epoch
    pub timestamp: u64,
    /// Schema identifier of the payload
    pub schema: String,
    /// Serialized message bytes
    pub payload: Vec<u8>,
}

/// Nanoseconds per millisecond
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Nanoseconds per second
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_format_round_trip() {
        for format in [ContainerFormat::Sqlite3, ContainerFormat::Mcap] {
            assert_eq!(ContainerFormat::from_storage_id(format.as_str()), Some(format));
        }
        assert_eq!(ContainerFormat::from_storage_id("rosbag_v2"), None);
        assert_eq!(ContainerFormat::from_storage_id("ros1"), None);
    }

    #[test]
    fn test_topic_info_wire_format() {
        let mut topic = TopicInfo {
            name: "/points".to_string(),
            schema: "sensor_msgs/msg/PointCloud2".to_string(),
            serialization_format: "CDR".to_string(),
            message_count: 3,
        };
        assert_eq!(topic.wire_format(), Some(WireFormat::Cdr));
        topic.serialization_format = "ros1".to_string();
        assert_eq!(topic.wire_format(), Some(WireFormat::Ros1));
        topic.serialization_format = "json".to_string();
        assert_eq!(topic.wire_format(), None);
    }
}

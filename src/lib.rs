//! # bagscene
//!
//! Convert recorded ROS bags into index-aligned scenes for point-cloud annotation.
//!
//! Each bag becomes one scene directory. Every lidar frame gets the next index and
//! is written as a PCD file; the camera frame closest to it on each camera topic,
//! if close enough, is written as a JPEG under the same index.
//!
//! ## Features
//!
//! - **SQLite3 and MCAP** storage files, optionally zstd-compressed, or whole
//!   rosbag2 directories; the container is identified by its signature
//! - **ROS1 bags** (format 2.0), decoded through the same frame decoders
//! - **Lazy reading**: payloads are pulled from storage as records are consumed
//! - **Truncated bags** are read up to the damaged section and flagged
//! - **PointCloud2** with any field order, datatype and byte order
//! - **Raw and compressed images**, padded rows and OpenCV encoding aliases
//! - **Streaming synchronization** with bounded memory
//! - **Parallel** per-bag processing
//!
//! ## Quick Start
//!
//! ### Converting a directory of bags
//! ```no_run
//! use bagscene::{pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig {
//!     sync_tolerance_ms: 30,
//!     ..PipelineConfig::default()
//! };
//! let summary = pipeline::run(Path::new("recordings"), Path::new("scenes"), &config)?;
//! print!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading records
//! ```no_run
//! use bagscene::{MessageDecoder, Reader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = Reader::open("path/to/bag.mcap")?;
//! for topic in reader.topics() {
//!     println!("{} [{}] {} messages", topic.name, topic.schema, topic.message_count);
//! }
//!
//! let decoder = MessageDecoder::default();
//! for record in reader.records() {
//!     let record = record?;
//!     if let Some(frame) = decoder.decode(&record.schema, record.timestamp, &record.payload)? {
//!         println!("{} at {}", record.topic, frame.timestamp());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Output
//!
//! ```text
//! <scene>/lidar/000000.pcd
//! <scene>/camera/image/000000.jpg
//! <scene>/label/
//! <scene>/desc.json
//! ```

/// Little-endian and big-endian CDR wire format.
pub mod cdr;

/// ROS1 packed wire format.
pub mod ros1;

/// Pipeline configuration loaded from YAML.
pub mod config;

/// Message decoding into point cloud and image frames.
pub mod decode;

/// PCD and JPEG encoders.
pub mod encode;

/// Error types and the coarse error taxonomy.
pub mod error;

/// Decoded frame types.
pub mod frame;

/// Scene directory layout and `desc.json`.
pub mod layout;

/// Time-ordered merge of storage cursors.
pub mod merge;

/// Sensor message definitions.
pub mod messages;

/// `metadata.yaml` parsing for bag directories.
pub mod metadata;

/// Per-bag conversion and parallel runs.
pub mod pipeline;

/// Main reader interface.
///
/// The [`Reader`] struct opens a bag and yields its records in time order.
pub mod reader;

/// Storage backend implementations.
pub mod storage;

/// Lidar-referenced synchronization of camera streams.
pub mod sync;

/// Core data types and structures.
pub mod types;

// Re-export main types for convenience
pub use config::PipelineConfig;
pub use decode::MessageDecoder;
pub use error::{DecodeError, EncodeError, ErrorKind, ReadError, SceneError};
pub use frame::{DecodedFrame, ImageFrame, PixelFormat, Point, PointCloudFrame};
pub use layout::{SceneDescriptor, SceneLayout};
pub use pipeline::{BagOutcome, BagReport, RunSummary};
pub use reader::Reader;
pub use sync::{synchronize, SyncedPair, Synchronizer};
pub use types::{ContainerFormat, RawRecord, TopicInfo, WireFormat};

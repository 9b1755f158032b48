//! Error types for bagscene
//!
//! Errors are split by pipeline stage. Reading a container, decoding a single
//! message, encoding a single frame and writing a scene each have their own enum,
//! and [`ErrorKind`] folds them into the coarse categories used in run reports.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for container reading
pub type ReadResult<T> = std::result::Result<T, ReadError>;

/// Result type alias for message decoding
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Result type alias for frame encoding
pub type EncodeResult<T> = std::result::Result<T, EncodeError>;

/// Result type alias for scene-level operations
pub type SceneResult<T> = std::result::Result<T, SceneError>;

/// Errors raised while opening or reading a bag container
#[derive(Error, Debug)]
pub enum ReadError {
    /// IO error when accessing files
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input does not carry a recognised bag signature, or its header is unreadable
    #[error("{} is not a bag: {reason}", path.display())]
    NotABag { path: PathBuf, reason: String },

    /// Input is a known container that this crate does not read
    #[error("{} uses unsupported container format {format}", path.display())]
    UnsupportedFormat { path: PathBuf, format: String },

    /// Bag directory metadata is missing or malformed
    #[error("Invalid bag metadata in {}: {reason}", path.display())]
    Metadata { path: PathBuf, reason: String },

    /// Stream ended early; records before this point were delivered
    #[error("Truncated stream in {}: {reason}", path.display())]
    Truncated { path: PathBuf, reason: String },

    /// Database error when reading SQLite files
    #[error("Database error: {0}")]
    #[cfg(feature = "sqlite")]
    Database(#[from] rusqlite::Error),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),
}

impl ReadError {
    /// Create an IO error tied to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a not-a-bag error
    pub fn not_a_bag(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::NotABag {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a metadata error
    pub fn metadata(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a truncation error
    pub fn truncated(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Truncated {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a compression error
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression(message.into())
    }

    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Truncated { .. } => ErrorKind::TruncatedStream,
            Self::Io { .. } => ErrorKind::Filesystem,
            _ => ErrorKind::ContainerFormat,
        }
    }
}

/// Errors raised while decoding one message into a frame
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Wire-level deserialization failed
    #[error("Deserialization error at position {position}/{data_length}: {message}")]
    Wire {
        message: String,
        position: usize,
        data_length: usize,
    },

    /// Point-cloud field table is inconsistent with the data buffer
    #[error("Invalid point field layout: {reason}")]
    FieldLayout { reason: String },

    /// Raw image encoding is not one we can convert
    #[error("Unknown image encoding: {encoding}")]
    UnknownEncoding { encoding: String },

    /// Image payload could not be interpreted
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },
}

impl DecodeError {
    /// Create a wire deserialization error
    pub fn wire(message: impl Into<String>, position: usize, data_length: usize) -> Self {
        Self::Wire {
            message: message.into(),
            position,
            data_length,
        }
    }

    /// Create a field layout error
    pub fn field_layout(reason: impl Into<String>) -> Self {
        Self::FieldLayout {
            reason: reason.into(),
        }
    }

    /// Create an invalid image error
    pub fn invalid_image(reason: impl Into<String>) -> Self {
        Self::InvalidImage {
            reason: reason.into(),
        }
    }

    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Wire { .. } | Self::FieldLayout { .. } => ErrorKind::FieldLayout,
            Self::UnknownEncoding { .. } | Self::InvalidImage { .. } => ErrorKind::Encoding,
        }
    }
}

/// Errors raised while encoding one frame for output
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Image codec failure
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Writing into the output buffer failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PCD writer or parser failure
    #[error("PCD error: {0}")]
    Pcd(String),

    /// Frame content does not match its declared shape
    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },
}

impl EncodeError {
    /// Create an invalid frame error
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Filesystem,
            Self::Image(_) | Self::Pcd(_) | Self::InvalidFrame { .. } => ErrorKind::Encoding,
        }
    }
}

/// Errors that abort the processing of one bag
#[derive(Error, Debug)]
pub enum SceneError {
    /// The bag could not be opened
    #[error(transparent)]
    Read(#[from] ReadError),

    /// A file or directory in the output tree could not be written
    #[error("Filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Scene descriptor serialization failed
    #[error("Failed to serialize scene descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),

    /// Requested topic selection does not exist in the bag
    #[error("Topic {topic} not found in bag")]
    TopicNotFound { topic: String },
}

impl SceneError {
    /// Create a filesystem error
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Read(e) => e.kind(),
            Self::Filesystem { .. } | Self::Descriptor(_) => ErrorKind::Filesystem,
            Self::TopicNotFound { .. } => ErrorKind::Config,
        }
    }
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML config
    #[error("Failed to parse config YAML: {0}")]
    YamlParse(#[from] serde_yml::Error),

    /// Config value out of range
    #[error("Invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Coarse error categories used in reports and summaries
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContainerFormat,
    TruncatedStream,
    FieldLayout,
    Encoding,
    Filesystem,
    Config,
}

impl ErrorKind {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerFormat => "container_format",
            Self::TruncatedStream => "truncated_stream",
            Self::FieldLayout => "field_layout",
            Self::Encoding => "encoding",
            Self::Filesystem => "filesystem",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_kinds() {
        assert_eq!(
            ReadError::not_a_bag("a.bin", "bad signature").kind(),
            ErrorKind::ContainerFormat
        );
        assert_eq!(
            ReadError::truncated("a.db3", "eof").kind(),
            ErrorKind::TruncatedStream
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ReadError::io("a.mcap", io).kind(), ErrorKind::Filesystem);
    }

    #[test]
    fn test_decode_error_kinds() {
        assert_eq!(DecodeError::wire("short", 4, 8).kind(), ErrorKind::FieldLayout);
        assert_eq!(
            DecodeError::UnknownEncoding {
                encoding: "yuv422".to_string()
            }
            .kind(),
            ErrorKind::Encoding
        );
    }

    #[test]
    fn test_scene_error_wraps_read_kind() {
        let err: SceneError = ReadError::truncated("x", "cut").into();
        assert_eq!(err.kind(), ErrorKind::TruncatedStream);
        assert!(err.to_string().contains("Truncated"));
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::FieldLayout.to_string(), "field_layout");
    }
}

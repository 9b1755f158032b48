//! `metadata.yaml` handling for rosbag2 directories
//!
//! Only the fields needed to locate and open the storage files are kept; the
//! per-topic counts and time span are recomputed from the storage itself.

use crate::error::{ReadError, ReadResult};
use crate::types::ContainerFormat;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the metadata file inside a bag directory
pub const METADATA_FILE: &str = "metadata.yaml";

/// Newest rosbag2 metadata version understood here
const MAX_VERSION: u32 = 9;

#[derive(Debug, Clone, Deserialize)]
pub struct BagMetadata {
    #[serde(rename = "rosbag2_bagfile_information")]
    info: StorageInfo,
}

/// Storage section of `metadata.yaml`
#[derive(Debug, Clone, Deserialize)]
pub struct StorageInfo {
    pub version: u32,
    /// Storage plugin, e.g. "sqlite3" or "mcap"; empty in some older bags
    #[serde(default)]
    pub storage_identifier: String,
    /// Storage files, relative to the bag directory
    pub relative_file_paths: Vec<String>,
    /// "zstd" or empty
    #[serde(default)]
    pub compression_format: String,
    /// "FILE", "MESSAGE" or empty
    #[serde(default)]
    pub compression_mode: String,
}

impl BagMetadata {
    /// Parse and check a `metadata.yaml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ReadResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ReadError::io(path, e))?;
        let metadata: BagMetadata = serde_yml::from_str(&text)
            .map_err(|e| ReadError::metadata(path, format!("YAML parse failed: {e}")))?;
        metadata.check(path)?;
        Ok(metadata)
    }

    fn check(&self, path: &Path) -> ReadResult<()> {
        let info = &self.info;
        if info.version > MAX_VERSION {
            return Err(ReadError::metadata(
                path,
                format!("unsupported bag version {}", info.version),
            ));
        }
        if !info.storage_identifier.is_empty()
            && ContainerFormat::from_storage_id(&info.storage_identifier).is_none()
        {
            return Err(ReadError::UnsupportedFormat {
                path: path.to_path_buf(),
                format: info.storage_identifier.clone(),
            });
        }
        if info.relative_file_paths.is_empty() {
            return Err(ReadError::metadata(path, "no storage files listed"));
        }
        match info.compression_format.as_str() {
            "" | "zstd" => {}
            other => {
                return Err(ReadError::compression(format!(
                    "unsupported compression format {other}"
                )))
            }
        }
        if info.compression_mode.eq_ignore_ascii_case("message") {
            return Err(ReadError::compression(
                "per-message compression is not supported",
            ));
        }
        Ok(())
    }

    pub fn info(&self) -> &StorageInfo {
        &self.info
    }

    /// Storage files resolved against the bag directory
    pub fn storage_paths(&self, bag_dir: &Path) -> Vec<PathBuf> {
        self.info
            .relative_file_paths
            .iter()
            .map(|relative| bag_dir.join(relative))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata_yaml(storage: &str, compression: &str) -> String {
        format!(
            r#"
rosbag2_bagfile_information:
  version: 5
  storage_identifier: {storage}
  relative_file_paths:
    - drive_0.db3
  duration:
    nanoseconds: 1000000000
  starting_time:
    nanoseconds_since_epoch: 1234567890000000000
  message_count: 10
  compression_format: "{compression}"
  compression_mode: ""
  topics_with_message_count:
    - topic_metadata:
        name: /points
        type: sensor_msgs/msg/PointCloud2
        serialization_format: cdr
        offered_qos_profiles: ""
      message_count: 10
"#
        )
    }

    #[test]
    fn test_metadata_parsing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        std::fs::write(&path, metadata_yaml("sqlite3", "")).unwrap();

        let metadata = BagMetadata::from_file(&path).unwrap();
        assert_eq!(metadata.info().version, 5);
        assert_eq!(metadata.info().storage_identifier, "sqlite3");
        assert_eq!(
            metadata.storage_paths(dir.path()),
            vec![dir.path().join("drive_0.db3")]
        );
    }

    #[test]
    fn test_unknown_storage_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        std::fs::write(&path, metadata_yaml("rosbag_v2", "")).unwrap();

        let result = BagMetadata::from_file(&path);
        assert!(matches!(result, Err(ReadError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_unknown_compression_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        std::fs::write(&path, metadata_yaml("mcap", "lz4")).unwrap();

        assert!(matches!(
            BagMetadata::from_file(&path),
            Err(ReadError::Compression(_))
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(METADATA_FILE);
        std::fs::write(&path, "rosbag2_bagfile_information: [").unwrap();

        assert!(matches!(
            BagMetadata::from_file(&path),
            Err(ReadError::Metadata { .. })
        ));
    }
}

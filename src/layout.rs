//! Scene directory layout
//!
//! ```text
//! <scene>/lidar/000000.pcd
//! <scene>/camera/image/000000.jpg       single camera topic
//! <scene>/camera/<topic_dir>/000000.jpg one directory per topic otherwise
//! <scene>/label/
//! <scene>/desc.json
//! ```
//!
//! Every file is written under a `.tmp` name first and renamed into place, so a
//! final name always holds a complete file.

use crate::error::{ErrorKind, SceneError, SceneResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const LIDAR_DIR: &str = "lidar";
pub const CAMERA_DIR: &str = "camera";
pub const LABEL_DIR: &str = "label";
pub const DESCRIPTOR_FILE: &str = "desc.json";

/// Camera directory used when a scene has at most one camera topic
pub const SINGLE_CAMERA_DIR: &str = "image";

/// Per-scene summary written as `desc.json`
///
/// Holds nothing that depends on when the scene was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub scene_name: String,
    pub bag_file: String,
    pub frame_count: usize,
    pub lidar_topic: Option<String>,
    pub cameras: Vec<CameraDescriptor>,
    pub sync_tolerance_ms: u64,
    pub truncated: bool,
    pub dropped_frames: BTreeMap<ErrorKind, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub topic: String,
    /// Directory relative to the scene root
    pub directory: String,
    /// Dimensions and source encoding of the first written frame
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub encoding: Option<String>,
}

/// Directory name for a camera topic: leading `/` dropped, `/` turned into `_`
pub fn sanitize_topic(topic: &str) -> String {
    let name = topic.trim_start_matches('/').replace('/', "_");
    if name.is_empty() {
        "root".to_string()
    } else {
        name
    }
}

/// Camera directory per topic, relative to the scene root
///
/// Topics whose sanitized names collide get `_1`, `_2`, ... in topic order.
fn camera_directories<S: AsRef<str>>(camera_topics: &[S]) -> BTreeMap<String, String> {
    let mut dirs = BTreeMap::new();
    if let [topic] = camera_topics {
        dirs.insert(
            topic.as_ref().to_string(),
            format!("{CAMERA_DIR}/{SINGLE_CAMERA_DIR}"),
        );
        return dirs;
    }

    let mut taken = HashSet::new();
    for topic in camera_topics.iter().map(AsRef::as_ref) {
        if dirs.contains_key(topic) {
            continue;
        }
        let base = sanitize_topic(topic);
        let mut name = base.clone();
        let mut suffix = 0;
        while !taken.insert(name.clone()) {
            suffix += 1;
            name = format!("{base}_{suffix}");
        }
        dirs.insert(topic.to_string(), format!("{CAMERA_DIR}/{name}"));
    }
    dirs
}

/// Shared file stem of every file at `index`
pub fn frame_stem(index: usize) -> String {
    format!("{index:06}")
}

/// Scene name for a bag: its file stem, optionally prefixed with the local time
pub fn scene_name(bag_path: &Path, timestamped: bool) -> String {
    let file_name = bag_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string());

    let stem = if bag_path.is_dir() {
        file_name
    } else {
        let inner = file_name
            .strip_suffix(".zstd")
            .or_else(|| file_name.strip_suffix(".zst"))
            .unwrap_or(&file_name);
        Path::new(inner)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| inner.to_string())
    };

    if timestamped {
        format!("{}_{stem}", chrono::Local::now().format("%Y-%m-%d-%H-%M-%S"))
    } else {
        stem
    }
}

/// Write `bytes` to `path` through a sibling `.tmp` file
pub fn write_atomic(path: &Path, bytes: &[u8]) -> SceneResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).map_err(|e| SceneError::filesystem(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| SceneError::filesystem(path, e))
}

/// Directory tree of one scene
#[derive(Debug, Clone)]
pub struct SceneLayout {
    name: String,
    root: PathBuf,
    /// Camera directory per topic, relative to `root`
    camera_dirs: BTreeMap<String, String>,
}

impl SceneLayout {
    /// Create the scene tree under `output_root`
    pub fn create<S: AsRef<str>>(
        output_root: &Path,
        scene_name: &str,
        camera_topics: &[S],
    ) -> SceneResult<Self> {
        let root = output_root.join(scene_name);

        let camera_dirs = camera_directories(camera_topics);

        let mut dirs = vec![
            root.join(LIDAR_DIR),
            root.join(LABEL_DIR),
            root.join(CAMERA_DIR),
        ];
        if camera_dirs.is_empty() {
            dirs.push(root.join(CAMERA_DIR).join(SINGLE_CAMERA_DIR));
        }
        dirs.extend(camera_dirs.values().map(|dir| root.join(dir)));
        for dir in &dirs {
            fs::create_dir_all(dir).map_err(|e| SceneError::filesystem(dir, e))?;
        }

        tracing::debug!(
            scene = %scene_name,
            root = %root.display(),
            cameras = camera_dirs.len(),
            "created scene layout"
        );

        Ok(Self {
            name: scene_name.to_string(),
            root,
            camera_dirs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Camera directory of `topic`, relative to the scene root
    pub fn camera_directory(&self, topic: &str) -> Option<&str> {
        self.camera_dirs.get(topic).map(String::as_str)
    }

    pub fn lidar_path(&self, index: usize) -> PathBuf {
        self.root
            .join(LIDAR_DIR)
            .join(format!("{}.pcd", frame_stem(index)))
    }

    pub fn camera_path(&self, topic: &str, index: usize) -> Option<PathBuf> {
        self.camera_directory(topic)
            .map(|dir| self.root.join(dir).join(format!("{}.jpg", frame_stem(index))))
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }

    /// Write the point cloud file for `index`
    pub fn write_lidar(&self, index: usize, bytes: &[u8]) -> SceneResult<PathBuf> {
        let path = self.lidar_path(index);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Write the image file of `topic` for `index`
    pub fn write_camera(&self, topic: &str, index: usize, bytes: &[u8]) -> SceneResult<PathBuf> {
        let path = self
            .camera_path(topic, index)
            .ok_or_else(|| SceneError::TopicNotFound {
                topic: topic.to_string(),
            })?;
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Write `desc.json`
    pub fn write_descriptor(&self, descriptor: &SceneDescriptor) -> SceneResult<()> {
        let mut json = serde_json::to_vec_pretty(descriptor)?;
        json.push(b'\n');
        write_atomic(&self.descriptor_path(), &json)
    }
}

/// Load a `desc.json`
pub fn read_descriptor(path: &Path) -> SceneResult<SceneDescriptor> {
    let bytes = fs::read(path).map_err(|e| SceneError::filesystem(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_topic() {
        assert_eq!(sanitize_topic("/camera/front/image_raw"), "camera_front_image_raw");
        assert_eq!(sanitize_topic("cam"), "cam");
        assert_eq!(sanitize_topic("/"), "root");
    }

    #[test]
    fn test_frame_stem() {
        assert_eq!(frame_stem(0), "000000");
        assert_eq!(frame_stem(1234567), "1234567");
    }

    #[test]
    fn test_scene_name_strips_extensions() {
        assert_eq!(scene_name(Path::new("/data/run_01.db3"), false), "run_01");
        assert_eq!(scene_name(Path::new("/data/run_02.mcap.zstd"), false), "run_02");
        assert!(scene_name(Path::new("/data/run_03.mcap"), true).ends_with("_run_03"));
    }

    #[test]
    fn test_single_camera_layout() {
        let temp = TempDir::new().unwrap();
        let layout = SceneLayout::create(temp.path(), "scene", &["/cam/front"]).unwrap();

        for dir in ["lidar", "label", "camera/image"] {
            assert!(temp.path().join("scene").join(dir).is_dir(), "{dir}");
        }
        assert_eq!(layout.camera_directory("/cam/front"), Some("camera/image"));

        let path = layout.write_camera("/cam/front", 3, b"jpg").unwrap();
        assert_eq!(path, temp.path().join("scene/camera/image/000003.jpg"));
        assert_eq!(fs::read(&path).unwrap(), b"jpg");
        assert!(!temp.path().join("scene/camera/image/000003.jpg.tmp").exists());
    }

    #[test]
    fn test_multi_camera_layout() {
        let temp = TempDir::new().unwrap();
        let layout =
            SceneLayout::create(temp.path(), "scene", &["/cam/left", "/cam/right"]).unwrap();

        assert!(temp.path().join("scene/camera/cam_left").is_dir());
        assert!(temp.path().join("scene/camera/cam_right").is_dir());
        assert!(!temp.path().join("scene/camera/image").exists());
        assert!(layout.write_camera("/cam/other", 0, b"x").is_err());
    }

    #[test]
    fn test_colliding_topic_directories_are_disambiguated() {
        let temp = TempDir::new().unwrap();
        let topics = ["/cam/left", "/cam_left", "/cam/right"];
        let layout = SceneLayout::create(temp.path(), "scene", &topics).unwrap();

        assert_eq!(layout.camera_directory("/cam/left"), Some("camera/cam_left"));
        assert_eq!(layout.camera_directory("/cam_left"), Some("camera/cam_left_1"));
        assert_eq!(layout.camera_directory("/cam/right"), Some("camera/cam_right"));

        let a = layout.write_camera("/cam/left", 0, b"left").unwrap();
        let b = layout.write_camera("/cam_left", 0, b"other").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read(a).unwrap(), b"left");
        assert_eq!(fs::read(b).unwrap(), b"other");
    }

    #[test]
    fn test_rewrite_overwrites() {
        let temp = TempDir::new().unwrap();
        let layout = SceneLayout::create(temp.path(), "scene", &[] as &[&str]).unwrap();
        layout.write_lidar(0, b"first").unwrap();
        let path = layout.write_lidar(0, b"second").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn test_descriptor_round_trip() {
        let temp = TempDir::new().unwrap();
        let layout = SceneLayout::create(temp.path(), "scene", &["/cam"]).unwrap();
        let descriptor = SceneDescriptor {
            scene_name: "scene".to_string(),
            bag_file: "scene.db3".to_string(),
            frame_count: 2,
            lidar_topic: Some("/points".to_string()),
            cameras: vec![CameraDescriptor {
                topic: "/cam".to_string(),
                directory: "camera/image".to_string(),
                width: Some(640),
                height: Some(480),
                encoding: Some("bgr8".to_string()),
            }],
            sync_tolerance_ms: 50,
            truncated: false,
            dropped_frames: BTreeMap::from([(ErrorKind::Encoding, 1)]),
        };
        layout.write_descriptor(&descriptor).unwrap();

        let text = fs::read_to_string(layout.descriptor_path()).unwrap();
        assert!(text.contains("\"encoding\": 1"));
        assert_eq!(read_descriptor(&layout.descriptor_path()).unwrap(), descriptor);
    }
}

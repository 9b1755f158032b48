//! Bag to scene conversion
//!
//! One bag is converted in a single forward pass: records are decoded as they
//! are read, the synchronizer releases each pair once no later camera frame can
//! change it, and the pair's files are written immediately. Bags are independent
//! and run in parallel on a rayon pool.

use crate::config::PipelineConfig;
use crate::decode::{FrameKind, MessageDecoder};
use crate::encode::{encode_jpeg, encode_pcd};
use crate::error::{ErrorKind, SceneError, SceneResult};
use crate::frame::DecodedFrame;
use crate::layout::{self, CameraDescriptor, SceneDescriptor, SceneLayout};
use crate::metadata::METADATA_FILE;
use crate::reader::Reader;
use crate::sync::{SyncedPair, Synchronizer};
use crate::types::TopicInfo;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions considered when scanning an input directory
pub const BAG_EXTENSIONS: &[&str] = &["bag", "db3", "mcap", "zstd", "zst"];

/// Result of converting one bag
#[derive(Debug, Clone, PartialEq)]
pub struct SceneReport {
    pub scene_dir: PathBuf,
    pub descriptor: SceneDescriptor,
}

impl SceneReport {
    pub fn dropped_total(&self) -> usize {
        self.descriptor.dropped_frames.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BagOutcome {
    Completed(SceneReport),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BagReport {
    pub bag: PathBuf,
    pub outcome: BagOutcome,
}

impl BagReport {
    fn new(bag: &Path, result: SceneResult<SceneReport>) -> Self {
        let outcome = match result {
            Ok(report) => BagOutcome::Completed(report),
            Err(e) => {
                tracing::error!(bag = %bag.display(), kind = %e.kind(), error = %e, "bag failed");
                BagOutcome::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                }
            }
        };
        Self {
            bag: bag.to_path_buf(),
            outcome,
        }
    }

    pub fn scene(&self) -> Option<&SceneReport> {
        match &self.outcome {
            BagOutcome::Completed(report) => Some(report),
            BagOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, BagOutcome::Failed { .. })
    }

    pub fn is_truncated(&self) -> bool {
        self.scene().is_some_and(|scene| scene.descriptor.truncated)
    }
}

/// Reports of a whole run, sorted by bag path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub reports: Vec<BagReport>,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.reports.iter().filter(|r| !r.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    pub fn truncated(&self) -> usize {
        self.reports.iter().filter(|r| r.is_truncated()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(BagReport::is_failed)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Processed {} bag(s): {} completed, {} failed, {} truncated",
            self.reports.len(),
            self.completed(),
            self.failed(),
            self.truncated()
        )?;
        for report in &self.reports {
            let bag = report.bag.display();
            match &report.outcome {
                BagOutcome::Completed(scene) => {
                    let desc = &scene.descriptor;
                    write!(
                        f,
                        "  {bag} -> {} ({} frames",
                        desc.scene_name, desc.frame_count
                    )?;
                    if scene.dropped_total() > 0 {
                        let kinds = desc
                            .dropped_frames
                            .iter()
                            .map(|(kind, count)| format!("{kind}={count}"))
                            .collect::<Vec<_>>()
                            .join(", ");
                        write!(f, ", {} dropped: {kinds}", scene.dropped_total())?;
                    }
                    if desc.truncated {
                        write!(f, ", truncated")?;
                    }
                    writeln!(f, ")")?;
                }
                BagOutcome::Failed { kind, message } => {
                    writeln!(f, "  {bag} FAILED [{kind}]: {message}")?;
                }
            }
        }
        Ok(())
    }
}

/// Bags under `input`, sorted by path
///
/// A file or a bag directory is returned as is. Otherwise the directory's
/// entries with a bag extension, and its subdirectories holding
/// `metadata.yaml`, are returned.
pub fn discover_inputs(input: &Path) -> SceneResult<Vec<PathBuf>> {
    if input.is_file() || input.join(METADATA_FILE).is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let entries = fs::read_dir(input).map_err(|e| SceneError::filesystem(input, e))?;
    let mut bags = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| SceneError::filesystem(input, e))?.path();
        let is_bag_file = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| BAG_EXTENSIONS.contains(&ext));
        let is_bag_dir = path.is_dir() && path.join(METADATA_FILE).is_file();
        if is_bag_file || is_bag_dir {
            bags.push(path);
        }
    }
    bags.sort();
    Ok(bags)
}

/// Scene names for `bags`, made unique by suffixing repeats with `_1`, `_2`, ...
pub fn assign_scene_names(bags: &[PathBuf], timestamped: bool) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    bags.iter()
        .map(|bag| {
            let name = layout::scene_name(bag, timestamped);
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name}_{}", *count - 1)
            }
        })
        .collect()
}

/// Convert every bag found under `input` into scenes under `output_root`
pub fn run(input: &Path, output_root: &Path, config: &PipelineConfig) -> SceneResult<RunSummary> {
    let bags = discover_inputs(input)?;
    fs::create_dir_all(output_root).map_err(|e| SceneError::filesystem(output_root, e))?;
    tracing::info!(
        input = %input.display(),
        output = %output_root.display(),
        bags = bags.len(),
        "starting run"
    );
    Ok(process_inputs(&bags, output_root, config))
}

/// Convert `bags` in parallel; one failed bag never stops the others
pub fn process_inputs(bags: &[PathBuf], output_root: &Path, config: &PipelineConfig) -> RunSummary {
    let names = assign_scene_names(bags, config.timestamped_scene_names);
    let convert = || {
        bags.par_iter()
            .zip(names.par_iter())
            .map(|(bag, name)| BagReport::new(bag, process_bag_as(bag, name, output_root, config)))
            .collect::<Vec<_>>()
    };

    let mut reports = if config.workers > 0 {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
        {
            Ok(pool) => pool.install(convert),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build worker pool, using the global pool");
                convert()
            }
        }
    } else {
        convert()
    };

    reports.sort_by(|a, b| a.bag.cmp(&b.bag));
    RunSummary { reports }
}

/// Convert one bag into a scene named after its file stem
pub fn process_bag(bag: &Path, output_root: &Path, config: &PipelineConfig) -> SceneResult<SceneReport> {
    let name = layout::scene_name(bag, config.timestamped_scene_names);
    process_bag_as(bag, &name, output_root, config)
}

/// What a topic contributes to the scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Lidar,
    Camera,
    Ignored,
}

/// Convert one bag into the scene `scene_name`
pub fn process_bag_as(
    bag: &Path,
    scene_name: &str,
    output_root: &Path,
    config: &PipelineConfig,
) -> SceneResult<SceneReport> {
    let mut reader = Reader::open(bag)?;
    let topics = reader.topics().to_vec();

    for topic in topics.iter().filter(|t| FrameKind::of_schema(&t.schema).is_some()) {
        if FrameKind::of_topic(topic).is_none() {
            tracing::warn!(
                bag = %bag.display(),
                topic = %topic.name,
                schema = %topic.schema,
                serialization = %topic.serialization_format,
                "skipping topic whose serialization does not match its schema"
            );
        }
    }

    let lidar_topic = select_lidar_topic(&topics, config)?;
    let camera_topics = select_camera_topics(&topics, config)?;
    let roles: Vec<Role> = topics
        .iter()
        .map(|topic| {
            if lidar_topic.as_deref() == Some(topic.name.as_str()) {
                Role::Lidar
            } else if camera_topics.contains(&topic.name) {
                Role::Camera
            } else {
                Role::Ignored
            }
        })
        .collect();

    tracing::info!(
        bag = %bag.display(),
        scene = %scene_name,
        lidar = lidar_topic.as_deref().unwrap_or("<none>"),
        cameras = camera_topics.len(),
        "converting bag"
    );

    let layout = SceneLayout::create(output_root, scene_name, &camera_topics)?;
    let mut writer = SceneWriter::new(layout, config, bag);
    let mut synchronizer = Synchronizer::new(config.tolerance_ns(), camera_topics.iter().cloned());
    let decoder: MessageDecoder = config.decoder();
    let mut truncated = false;

    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) if e.kind() == ErrorKind::TruncatedStream => {
                tracing::warn!(bag = %bag.display(), error = %e, "keeping records read before truncation");
                truncated = true;
                break;
            }
            Err(e) => return Err(e.into()),
        };

        for pair in synchronizer.advance(record.timestamp) {
            writer.write_pair(pair)?;
        }

        let role = roles.get(record.topic_index).copied().unwrap_or(Role::Ignored);
        if role == Role::Ignored {
            continue;
        }

        match decoder.decode(&record.schema, record.timestamp, &record.payload) {
            Ok(Some(DecodedFrame::PointCloud(cloud))) if role == Role::Lidar => {
                if config.skip_empty_clouds && cloud.points.is_empty() {
                    tracing::debug!(timestamp = record.timestamp, "skipping empty cloud");
                    continue;
                }
                synchronizer.push_lidar(cloud);
            }
            Ok(Some(DecodedFrame::Image(image))) if role == Role::Camera => {
                synchronizer.push_camera(&record.topic, image);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    bag = %bag.display(),
                    topic = %record.topic,
                    timestamp = record.timestamp,
                    error = %e,
                    "dropping undecodable frame"
                );
                writer.count_dropped(e.kind());
            }
        }
    }

    for pair in synchronizer.finish() {
        writer.write_pair(pair)?;
    }

    let report = writer.finish(lidar_topic, &camera_topics, truncated)?;
    tracing::info!(
        bag = %bag.display(),
        scene = %report.descriptor.scene_name,
        frames = report.descriptor.frame_count,
        dropped = report.dropped_total(),
        truncated,
        "scene written"
    );
    Ok(report)
}

/// The configured lidar topic, or the point cloud topic with the most messages
///
/// Ties go to the smaller topic name. `None` when the bag has no point clouds.
fn select_lidar_topic(topics: &[TopicInfo], config: &PipelineConfig) -> SceneResult<Option<String>> {
    let is_cloud = |t: &TopicInfo| FrameKind::of_topic(t) == Some(FrameKind::PointCloud);

    if let Some(name) = &config.lidar_topic {
        return match topics.iter().find(|t| &t.name == name) {
            Some(topic) if is_cloud(topic) => Ok(Some(name.clone())),
            _ => Err(SceneError::TopicNotFound {
                topic: name.clone(),
            }),
        };
    }

    Ok(topics
        .iter()
        .filter(|t| is_cloud(t))
        .max_by(|a, b| {
            a.message_count
                .cmp(&b.message_count)
                .then_with(|| b.name.cmp(&a.name))
        })
        .map(|t| t.name.clone()))
}

/// The configured camera topics, or every image topic; sorted by name
fn select_camera_topics(topics: &[TopicInfo], config: &PipelineConfig) -> SceneResult<Vec<String>> {
    let is_image = |t: &TopicInfo| FrameKind::of_topic(t) == Some(FrameKind::Image);

    if config.camera_topics.is_empty() {
        return Ok(topics
            .iter()
            .filter(|t| is_image(t))
            .map(|t| t.name.clone())
            .collect());
    }

    let mut selected = Vec::with_capacity(config.camera_topics.len());
    for name in &config.camera_topics {
        if !topics.iter().any(|t| &t.name == name && is_image(t)) {
            return Err(SceneError::TopicNotFound {
                topic: name.clone(),
            });
        }
        selected.push(name.clone());
    }
    selected.sort();
    selected.dedup();
    Ok(selected)
}

/// Encodes pairs into the scene tree and tracks what goes into `desc.json`
struct SceneWriter<'a> {
    layout: SceneLayout,
    config: &'a PipelineConfig,
    bag: &'a Path,
    /// Source dimensions and encoding of the first frame written per camera
    first_frames: BTreeMap<String, (u32, u32, &'static str)>,
    dropped: BTreeMap<ErrorKind, usize>,
    frame_count: usize,
}

impl<'a> SceneWriter<'a> {
    fn new(layout: SceneLayout, config: &'a PipelineConfig, bag: &'a Path) -> Self {
        Self {
            layout,
            config,
            bag,
            first_frames: BTreeMap::new(),
            dropped: BTreeMap::new(),
            frame_count: 0,
        }
    }

    fn count_dropped(&mut self, kind: ErrorKind) {
        *self.dropped.entry(kind).or_default() += 1;
    }

    fn write_pair(&mut self, pair: SyncedPair) -> SceneResult<()> {
        let index = pair.index;
        self.frame_count = self.frame_count.max(index + 1);

        match encode_pcd(&pair.lidar, self.config.pcd_format) {
            Ok(bytes) => {
                self.layout.write_lidar(index, &bytes)?;
            }
            Err(e) => {
                tracing::warn!(bag = %self.bag.display(), index, error = %e, "failed to encode point cloud");
                self.count_dropped(e.kind());
            }
        }

        for (topic, image) in pair.cameras {
            match encode_jpeg(&image, self.config.jpeg_quality) {
                Ok(bytes) => {
                    self.layout.write_camera(&topic, index, &bytes)?;
                    self.first_frames.entry(topic).or_insert((
                        image.width,
                        image.height,
                        image.pixel_format.as_str(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        bag = %self.bag.display(),
                        topic = %topic,
                        index,
                        error = %e,
                        "failed to encode image"
                    );
                    self.count_dropped(e.kind());
                }
            }
        }

        tracing::debug!(index, "wrote frame");
        Ok(())
    }

    fn finish(
        self,
        lidar_topic: Option<String>,
        camera_topics: &[String],
        truncated: bool,
    ) -> SceneResult<SceneReport> {
        let cameras = camera_topics
            .iter()
            .map(|topic| {
                let first = self.first_frames.get(topic);
                CameraDescriptor {
                    topic: topic.clone(),
                    directory: self
                        .layout
                        .camera_directory(topic)
                        .unwrap_or_default()
                        .to_string(),
                    width: first.map(|f| f.0),
                    height: first.map(|f| f.1),
                    encoding: first.map(|f| f.2.to_string()),
                }
            })
            .collect();

        let descriptor = SceneDescriptor {
            scene_name: self.layout.name().to_string(),
            bag_file: self
                .bag
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            frame_count: self.frame_count,
            lidar_topic,
            cameras,
            sync_tolerance_ms: self.config.sync_tolerance_ms,
            truncated,
            dropped_frames: self.dropped,
        };
        self.layout.write_descriptor(&descriptor)?;

        Ok(SceneReport {
            scene_dir: self.layout.root().to_path_buf(),
            descriptor,
        })
    }
}

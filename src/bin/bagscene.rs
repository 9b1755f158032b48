//! Convert a directory of bags (or a single bag) into annotation scenes
//!
//! Usage: bagscene <input> <output> [options]

use anyhow::{bail, Context, Result};
use bagscene::encode::PcdFormat;
use bagscene::{pipeline, PipelineConfig};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "bagscene",
    about = "Convert ROS2 bags into index-aligned point cloud annotation scenes",
    version
)]
struct Cli {
    /// Bag file, bag directory, or a directory of bags
    input: PathBuf,
    /// Directory that receives one scene per bag
    output: PathBuf,
    /// YAML config file; command line flags override its values
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Largest lidar-to-camera gap that still pairs, in milliseconds
    #[arg(long = "tolerance-ms")]
    tolerance_ms: Option<u64>,
    /// JPEG quality for re-encoded images (1-100)
    #[arg(long = "jpeg-quality")]
    jpeg_quality: Option<u8>,
    /// PCD data encoding
    #[arg(long = "pcd-format", value_enum)]
    pcd_format: Option<PcdFormat>,
    /// Reference point cloud topic
    #[arg(long = "lidar-topic")]
    lidar_topic: Option<String>,
    /// Camera topic to export (can be repeated)
    #[arg(long = "camera-topic", action = ArgAction::Append)]
    camera_topics: Vec<String>,
    /// Bags processed in parallel (0 = one per core)
    #[arg(long = "workers")]
    workers: Option<usize>,
    /// Leave clouds without points out of the index sequence
    #[arg(long = "skip-empty-clouds")]
    skip_empty_clouds: bool,
    /// Keep points with NaN or infinite coordinates
    #[arg(long = "keep-non-finite")]
    keep_non_finite: bool,
    /// Prefix scene names with the local time of the run
    #[arg(long = "timestamped-scene-names")]
    timestamped_scene_names: bool,
}

impl Cli {
    fn config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(ms) = self.tolerance_ms {
            config.sync_tolerance_ms = ms;
        }
        if let Some(quality) = self.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if let Some(format) = self.pcd_format {
            config.pcd_format = format;
        }
        if let Some(topic) = &self.lidar_topic {
            config.lidar_topic = Some(topic.clone());
        }
        if !self.camera_topics.is_empty() {
            config.camera_topics = self.camera_topics.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.skip_empty_clouds |= self.skip_empty_clouds;
        config.timestamped_scene_names |= self.timestamped_scene_names;
        if self.keep_non_finite {
            config.drop_non_finite = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config()?;

    let summary = pipeline::run(&cli.input, &cli.output, &config).with_context(|| {
        format!(
            "converting {} into {}",
            cli.input.display(),
            cli.output.display()
        )
    })?;

    print!("{summary}");
    if summary.has_failures() {
        bail!("{} of {} bag(s) failed", summary.failed(), summary.reports.len());
    }
    Ok(())
}

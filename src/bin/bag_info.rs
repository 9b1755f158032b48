//! Display ROS2 bag information
//!
//! Prints the storage format, size, time span and topics of a bag file or bag
//! directory. The time span is taken from the records themselves, so it is
//! available for single storage files without `metadata.yaml`.
//!
//! Usage: bag_info <bag_path>

use anyhow::{Context, Result};
use bagscene::{Reader, TopicInfo};
use chrono::TimeZone;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <bag_path>", args[0]);
        eprintln!("Example: {} /path/to/recording.mcap", args[0]);
        std::process::exit(1);
    }
    let bag_path = Path::new(&args[1]);

    let mut reader =
        Reader::open(bag_path).with_context(|| format!("opening {}", bag_path.display()))?;
    let topics = reader.topics().to_vec();
    let format = reader
        .format()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let files = storage_files(&reader);

    // Walk the records for the time span; payloads are dropped as they arrive
    let mut span: Option<(u64, u64)> = None;
    let mut messages = 0u64;
    for record in reader.records() {
        match record {
            Ok(record) => {
                messages += 1;
                span = Some(match span {
                    Some((start, end)) => (start.min(record.timestamp), end.max(record.timestamp)),
                    None => (record.timestamp, record.timestamp),
                });
            }
            Err(e) => println!("Warning:           {e}"),
        }
    }

    println!("Files:             {}", format_file_list(&files));
    println!("Bag size:          {}", format_size(total_size(&files)));
    println!("Storage id:        {format}");
    if let Some(info) = reader.metadata().map(|m| m.info()) {
        if !info.compression_format.is_empty() {
            println!(
                "Compression:       {} ({})",
                info.compression_format, info.compression_mode
            );
        }
    }
    match span {
        Some((start, end)) => {
            println!("Duration:          {:.9}s", (end - start) as f64 / 1e9);
            println!("Start:             {}", format_timestamp(start));
            println!("End:               {}", format_timestamp(end));
        }
        None => println!("Duration:          0s"),
    }
    println!("Messages:          {messages}");

    for (i, topic) in topics.iter().enumerate() {
        let label = if i == 0 { "Topic information: " } else { "                   " };
        println!("{label}{}", format_topic(topic));
    }

    Ok(())
}

/// Storage files behind the reader
fn storage_files(reader: &Reader) -> Vec<PathBuf> {
    match reader.metadata() {
        Some(metadata) => metadata.storage_paths(reader.path()),
        None => vec![reader.path().to_path_buf()],
    }
}

fn total_size(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|file| std::fs::metadata(file).ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn format_file_list(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|file| {
            file.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format size in human-readable format
fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp_ns: u64) -> String {
    let secs = (timestamp_ns / 1_000_000_000) as i64;
    let nanos = (timestamp_ns % 1_000_000_000) as u32;

    match chrono::Utc.timestamp_opt(secs, nanos).single() {
        Some(datetime) => format!(
            "{} ({secs}.{nanos:09})",
            datetime.format("%b %e %Y %H:%M:%S%.9f")
        ),
        None => format!("Invalid timestamp ({secs}.{nanos:09})"),
    }
}

fn format_topic(topic: &TopicInfo) -> String {
    format!(
        "Topic: {} | Type: {} | Count: {} | Serialization Format: {}",
        topic.name, topic.schema, topic.message_count, topic.serialization_format
    )
}

//! PCD point cloud files
//!
//! Clouds are written unorganized (`HEIGHT 1`) with float fields `x y z` and,
//! when the source had one, `intensity`. Reading and writing both go through
//! `pcd-rs` dynamic records, so the schema follows the frame.

use crate::error::{EncodeError, EncodeResult};
use crate::frame::{Point, PointCloudFrame};
use pcd_rs::{DataKind, DynRecord, Field, Reader, Schema, ValueKind, Writer, WriterInit};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Seek, Write};

/// PCD `DATA` section encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PcdFormat {
    #[default]
    Ascii,
    Binary,
}

impl PcdFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PcdFormat::Ascii => "ascii",
            PcdFormat::Binary => "binary",
        }
    }

    fn data_kind(self) -> DataKind {
        match self {
            PcdFormat::Ascii => DataKind::Ascii,
            PcdFormat::Binary => DataKind::Binary,
        }
    }
}

fn pcd_error(e: impl std::fmt::Display) -> EncodeError {
    EncodeError::Pcd(e.to_string())
}

fn schema(has_intensity: bool) -> Schema {
    let mut fields = vec![
        ("x", ValueKind::F32, 1),
        ("y", ValueKind::F32, 1),
        ("z", ValueKind::F32, 1),
    ];
    if has_intensity {
        fields.push(("intensity", ValueKind::F32, 1));
    }
    Schema::from_iter(fields)
}

fn record(point: &Point, has_intensity: bool) -> DynRecord {
    let mut fields = vec![
        Field::F32(vec![point.x]),
        Field::F32(vec![point.y]),
        Field::F32(vec![point.z]),
    ];
    if has_intensity {
        fields.push(Field::F32(vec![point.intensity]));
    }
    DynRecord(fields)
}

/// Serialize a cloud into PCD bytes
pub fn encode_pcd(frame: &PointCloudFrame, format: PcdFormat) -> EncodeResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    write_pcd(&mut out, frame, format)?;
    Ok(out.into_inner())
}

/// Write a cloud as PCD
///
/// The writer must be seekable; the point count in the header is patched
/// when the body is complete.
pub fn write_pcd<W: Write + Seek>(
    out: W,
    frame: &PointCloudFrame,
    format: PcdFormat,
) -> EncodeResult<()> {
    let mut writer: Writer<DynRecord, W> = WriterInit {
        width: frame.points.len() as u64,
        height: 1,
        viewpoint: Default::default(),
        data_kind: format.data_kind(),
        schema: Some(schema(frame.has_intensity)),
    }
    .build_from_writer(out)
    .map_err(pcd_error)?;

    for point in &frame.points {
        writer
            .push(&record(point, frame.has_intensity))
            .map_err(pcd_error)?;
    }
    writer.finish().map_err(pcd_error)?;
    Ok(())
}

fn scalar(field: &Field) -> Option<f32> {
    match field {
        Field::F32(values) => values.first().copied(),
        Field::F64(values) => values.first().map(|&v| v as f32),
        _ => None,
    }
}

/// Non-empty rows after the `DATA ascii` line
fn ascii_rows(bytes: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(bytes).ok()?;
    let mut lines = text.lines();
    lines.by_ref().find(|line| line.trim_start().starts_with("DATA"))?;
    Some(lines.filter(|line| !line.trim().is_empty()).count())
}

/// Parse a PCD file written by [`encode_pcd`]
///
/// Any float field set containing `x`, `y` and `z` is accepted. The returned
/// frame has no timestamp or frame id.
pub fn read_pcd(bytes: &[u8]) -> EncodeResult<PointCloudFrame> {
    let reader: Reader<DynRecord, _> = Reader::from_reader(Cursor::new(bytes)).map_err(pcd_error)?;
    let meta = reader.meta();
    let declared = meta.num_points as usize;
    let column = |name: &str| meta.field_defs.fields.iter().position(|f| f.name == name);
    let (Some(xi), Some(yi), Some(zi)) = (column("x"), column("y"), column("z")) else {
        return Err(EncodeError::invalid_frame("PCD lacks x, y or z"));
    };
    let ii = column("intensity");

    if matches!(meta.data, DataKind::Ascii) {
        let rows = ascii_rows(bytes)
            .ok_or_else(|| EncodeError::invalid_frame("PCD ascii body is not UTF-8"))?;
        if rows != declared {
            return Err(EncodeError::invalid_frame(format!(
                "PCD declares {declared} points, found {rows} rows"
            )));
        }
    }

    let mut points = Vec::with_capacity(declared);
    for record in reader {
        let DynRecord(fields) = record.map_err(pcd_error)?;
        let value = |index: usize| {
            fields.get(index).and_then(scalar).ok_or_else(|| {
                EncodeError::invalid_frame(format!("PCD field {index} is not a float"))
            })
        };
        points.push(Point {
            x: value(xi)?,
            y: value(yi)?,
            z: value(zi)?,
            intensity: ii.map(value).transpose()?.unwrap_or(0.0),
        });
    }

    if points.len() != declared {
        return Err(EncodeError::invalid_frame(format!(
            "PCD declares {declared} points, found {}",
            points.len()
        )));
    }

    Ok(PointCloudFrame {
        timestamp: 0,
        frame_id: String::new(),
        points,
        has_intensity: ii.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(has_intensity: bool) -> PointCloudFrame {
        PointCloudFrame {
            timestamp: 42,
            frame_id: "lidar".to_string(),
            points: vec![
                Point {
                    x: 0.1,
                    y: -2.5e-7,
                    z: 123456.78,
                    intensity: 17.0,
                },
                Point {
                    x: f32::MAX,
                    y: f32::MIN_POSITIVE,
                    z: -0.0,
                    intensity: 0.333_333_34,
                },
            ],
            has_intensity,
        }
    }

    fn assert_same_points(a: &PointCloudFrame, b: &PointCloudFrame) {
        assert_eq!(a.points.len(), b.points.len());
        for (p, q) in a.points.iter().zip(&b.points) {
            assert!((p.x - q.x).abs() <= 1e-6 * p.x.abs().max(1.0));
            assert!((p.y - q.y).abs() <= 1e-6);
            assert!((p.z - q.z).abs() <= 1e-6 * p.z.abs().max(1.0));
            if a.has_intensity {
                assert!((p.intensity - q.intensity).abs() <= 1e-6);
            }
        }
    }

    fn header_line<'a>(text: &'a str, key: &str) -> Option<&'a str> {
        text.lines()
            .find(|line| line.starts_with(key))
            .map(|line| line[key.len()..].trim())
    }

    #[test]
    fn test_ascii_header_layout() {
        let bytes = encode_pcd(&sample(true), PcdFormat::Ascii).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(header_line(&text, "FIELDS"), Some("x y z intensity"));
        assert_eq!(header_line(&text, "TYPE"), Some("F F F F"));
        assert_eq!(header_line(&text, "WIDTH"), Some("2"));
        assert_eq!(header_line(&text, "HEIGHT"), Some("1"));
        assert_eq!(header_line(&text, "POINTS"), Some("2"));
        assert_eq!(header_line(&text, "DATA"), Some("ascii"));
    }

    #[test]
    fn test_ascii_round_trip() {
        for has_intensity in [false, true] {
            let frame = sample(has_intensity);
            let parsed = read_pcd(&encode_pcd(&frame, PcdFormat::Ascii).unwrap()).unwrap();
            assert_eq!(parsed.has_intensity, has_intensity);
            assert_same_points(&frame, &parsed);
        }
    }

    #[test]
    fn test_binary_round_trip() {
        let frame = sample(true);
        let bytes = encode_pcd(&frame, PcdFormat::Binary).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert_eq!(header_line(&text, "DATA"), Some("binary"));
        let parsed = read_pcd(&bytes).unwrap();
        assert_eq!(parsed.points, frame.points);
    }

    #[test]
    fn test_empty_cloud() {
        let frame = PointCloudFrame::default();
        let bytes = encode_pcd(&frame, PcdFormat::Ascii).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert_eq!(header_line(&text, "POINTS"), Some("0"));
        assert!(read_pcd(&bytes).unwrap().points.is_empty());
    }

    #[test]
    fn test_truncated_binary_rejected() {
        let bytes = encode_pcd(&sample(false), PcdFormat::Binary).unwrap();
        assert!(read_pcd(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_ascii_row_count_must_match_points() {
        let bytes = encode_pcd(&sample(false), PcdFormat::Ascii).unwrap();

        let mut padded = bytes.clone();
        padded.extend_from_slice(b"1 2 3\n");
        assert!(read_pcd(&padded).is_err());

        let text = String::from_utf8(bytes).unwrap();
        let short = text.trim_end().rsplit_once('\n').unwrap().0.to_string() + "\n";
        assert!(read_pcd(short.as_bytes()).is_err());
    }
}

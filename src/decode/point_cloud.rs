//! Interpreted `PointCloud2` field layouts
//!
//! The field table of a cloud is turned into a [`FieldLayout`] once per message,
//! then every point is read through it. Field order, offsets, datatypes and byte
//! order are all taken from the message.

use crate::error::{DecodeError, DecodeResult};
use crate::frame::Point;
use crate::messages::{PointCloud2, PointField};

/// Field names accepted as intensity, in order of preference
pub const INTENSITY_FIELDS: &[&str] = &["intensity", "i", "reflectivity"];

/// `sensor_msgs/PointField` datatype codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
}

impl Datatype {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Datatype::Int8,
            2 => Datatype::Uint8,
            3 => Datatype::Int16,
            4 => Datatype::Uint16,
            5 => Datatype::Int32,
            6 => Datatype::Uint32,
            7 => Datatype::Float32,
            8 => Datatype::Float64,
            _ => return None,
        })
    }

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            Datatype::Int8 | Datatype::Uint8 => 1,
            Datatype::Int16 | Datatype::Uint16 => 2,
            Datatype::Int32 | Datatype::Uint32 | Datatype::Float32 => 4,
            Datatype::Float64 => 8,
        }
    }

    /// Read one element as `f32`; `bytes` holds at least `self.size()` bytes
    fn read(&self, bytes: &[u8], big_endian: bool) -> f32 {
        macro_rules! read_as {
            ($ty:ty) => {{
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                if big_endian {
                    <$ty>::from_be_bytes(raw)
                } else {
                    <$ty>::from_le_bytes(raw)
                }
            }};
        }

        match self {
            Datatype::Int8 => bytes[0] as i8 as f32,
            Datatype::Uint8 => bytes[0] as f32,
            Datatype::Int16 => read_as!(i16) as f32,
            Datatype::Uint16 => read_as!(u16) as f32,
            Datatype::Int32 => read_as!(i32) as f32,
            Datatype::Uint32 => read_as!(u32) as f32,
            Datatype::Float32 => read_as!(f32),
            Datatype::Float64 => read_as!(f64) as f32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldReader {
    offset: usize,
    datatype: Datatype,
}

impl FieldReader {
    fn read(&self, point: &[u8], big_endian: bool) -> f32 {
        self.datatype.read(&point[self.offset..], big_endian)
    }
}

/// Where x, y, z and intensity live inside one point record
#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    x: FieldReader,
    y: FieldReader,
    z: FieldReader,
    intensity: Option<FieldReader>,
    point_step: usize,
    big_endian: bool,
}

impl FieldLayout {
    /// Build a layout from a cloud's field table
    pub fn from_message(cloud: &PointCloud2) -> DecodeResult<Self> {
        let point_step = cloud.point_step as usize;
        if point_step == 0 && cloud.width as u64 * cloud.height as u64 > 0 {
            return Err(DecodeError::field_layout("point_step is zero"));
        }

        for field in &cloud.fields {
            // Unknown datatypes are tolerated on fields we never read
            let Some(datatype) = Datatype::from_code(field.datatype) else {
                continue;
            };
            let end = field.offset as u64 + datatype.size() as u64 * field.count.max(1) as u64;
            if end > point_step as u64 {
                return Err(DecodeError::field_layout(format!(
                    "field '{}' ends at byte {end}, beyond point_step {point_step}",
                    field.name
                )));
            }
        }

        let required = |name: &str| -> DecodeResult<FieldReader> {
            let field = cloud
                .fields
                .iter()
                .find(|f| f.name == name)
                .ok_or_else(|| DecodeError::field_layout(format!("missing field '{name}'")))?;
            reader_for(field)
        };

        let intensity = INTENSITY_FIELDS
            .iter()
            .find_map(|name| cloud.fields.iter().find(|f| f.name == *name))
            .map(reader_for)
            .transpose()?;

        Ok(Self {
            x: required("x")?,
            y: required("y")?,
            z: required("z")?,
            intensity,
            point_step,
            big_endian: cloud.is_bigendian,
        })
    }

    pub fn has_intensity(&self) -> bool {
        self.intensity.is_some()
    }

    /// Read every point of the cloud, row by row
    pub fn read_points(&self, cloud: &PointCloud2, drop_non_finite: bool) -> DecodeResult<Vec<Point>> {
        let width = cloud.width as usize;
        let height = cloud.height as usize;
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let row_bytes = width as u64 * self.point_step as u64;
        let row_step = cloud.row_step as u64;
        if row_step < row_bytes && height > 1 {
            return Err(DecodeError::field_layout(format!(
                "row_step {row_step} is shorter than {width} points of {} bytes",
                self.point_step
            )));
        }
        let needed = (height as u64 - 1) * row_step + row_bytes;
        if needed > cloud.data.len() as u64 {
            return Err(DecodeError::field_layout(format!(
                "{height} rows need {needed} bytes, data holds {}",
                cloud.data.len()
            )));
        }

        let mut points = Vec::with_capacity(width * height);
        for row in 0..height {
            let row_start = row * cloud.row_step as usize;
            let row_data = &cloud.data[row_start..row_start + row_bytes as usize];
            for record in row_data.chunks_exact(self.point_step) {
                let point = Point {
                    x: self.x.read(record, self.big_endian),
                    y: self.y.read(record, self.big_endian),
                    z: self.z.read(record, self.big_endian),
                    intensity: self
                        .intensity
                        .map(|field| field.read(record, self.big_endian))
                        .unwrap_or(0.0),
                };
                if drop_non_finite && !point.is_finite() {
                    continue;
                }
                points.push(point);
            }
        }
        Ok(points)
    }
}

fn reader_for(field: &PointField) -> DecodeResult<FieldReader> {
    let datatype = Datatype::from_code(field.datatype).ok_or_else(|| {
        DecodeError::field_layout(format!(
            "field '{}' has unknown datatype {}",
            field.name, field.datatype
        ))
    })?;
    Ok(FieldReader {
        offset: field.offset as usize,
        datatype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Header;

    fn field(name: &str, offset: u32, datatype: u8) -> PointField {
        PointField {
            name: name.to_string(),
            offset,
            datatype,
            count: 1,
        }
    }

    fn cloud(fields: Vec<PointField>, point_step: u32, width: u32, data: Vec<u8>) -> PointCloud2 {
        PointCloud2 {
            header: Header::default(),
            height: 1,
            width,
            fields,
            is_bigendian: false,
            point_step,
            row_step: point_step * width,
            data,
            is_dense: true,
        }
    }

    #[test]
    fn test_reordered_fields_and_mixed_datatypes() {
        // Layout: intensity u16 @0, z f64 @2, x f32 @10, y i8 @14
        let mut data = Vec::new();
        data.extend_from_slice(&300u16.to_le_bytes());
        data.extend_from_slice(&(-2.5f64).to_le_bytes());
        data.extend_from_slice(&1.25f32.to_le_bytes());
        data.push((-7i8) as u8);
        data.push(0); // padding

        let msg = cloud(
            vec![
                field("intensity", 0, 4),
                field("z", 2, 8),
                field("x", 10, 7),
                field("y", 14, 1),
            ],
            16,
            1,
            data,
        );

        let layout = FieldLayout::from_message(&msg).unwrap();
        assert!(layout.has_intensity());
        let points = layout.read_points(&msg, true).unwrap();
        assert_eq!(
            points,
            vec![Point {
                x: 1.25,
                y: -7.0,
                z: -2.5,
                intensity: 300.0
            }]
        );
    }

    #[test]
    fn test_big_endian_cloud() {
        let mut data = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        let mut msg = cloud(
            vec![field("x", 0, 7), field("y", 4, 7), field("z", 8, 7)],
            12,
            1,
            data,
        );
        msg.is_bigendian = true;

        let layout = FieldLayout::from_message(&msg).unwrap();
        assert!(!layout.has_intensity());
        let points = layout.read_points(&msg, true).unwrap();
        assert_eq!((points[0].x, points[0].y, points[0].z), (1.0, 2.0, 3.0));
    }

    #[test]
    fn test_reflectivity_counts_as_intensity() {
        let mut data = Vec::new();
        for v in [0.0f32, 0.0, 0.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.push(42);
        let msg = cloud(
            vec![
                field("x", 0, 7),
                field("y", 4, 7),
                field("z", 8, 7),
                field("reflectivity", 12, 2),
            ],
            13,
            1,
            data,
        );

        let points = FieldLayout::from_message(&msg)
            .unwrap()
            .read_points(&msg, true)
            .unwrap();
        assert_eq!(points[0].intensity, 42.0);
    }

    #[test]
    fn test_field_beyond_point_step() {
        let msg = cloud(
            vec![field("x", 0, 7), field("y", 4, 7), field("z", 8, 8)],
            12,
            0,
            Vec::new(),
        );
        let err = FieldLayout::from_message(&msg).unwrap_err();
        assert!(matches!(err, DecodeError::FieldLayout { .. }));
    }

    #[test]
    fn test_missing_coordinate() {
        let msg = cloud(vec![field("x", 0, 7), field("y", 4, 7)], 8, 0, Vec::new());
        assert!(matches!(
            FieldLayout::from_message(&msg),
            Err(DecodeError::FieldLayout { .. })
        ));
    }

    #[test]
    fn test_rows_exceed_data() {
        let msg = cloud(
            vec![field("x", 0, 7), field("y", 4, 7), field("z", 8, 7)],
            12,
            2,
            vec![0u8; 12],
        );
        let layout = FieldLayout::from_message(&msg).unwrap();
        assert!(matches!(
            layout.read_points(&msg, true),
            Err(DecodeError::FieldLayout { .. })
        ));
    }

    #[test]
    fn test_row_padding_is_skipped() {
        let mut data = Vec::new();
        for row in 0..2 {
            data.extend_from_slice(&(row as f32).to_le_bytes());
            data.extend_from_slice(&[0xAA; 4]); // row padding
        }
        let msg = PointCloud2 {
            header: Header::default(),
            height: 2,
            width: 1,
            fields: vec![field("x", 0, 7), field("y", 0, 7), field("z", 0, 7)],
            is_bigendian: false,
            point_step: 4,
            row_step: 8,
            data,
            is_dense: true,
        };

        let points = FieldLayout::from_message(&msg)
            .unwrap()
            .read_points(&msg, true)
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].x, 1.0);
    }

    #[test]
    fn test_non_finite_points() {
        let mut data = Vec::new();
        for v in [f32::NAN, 0.0, 0.0, 1.0, 1.0, 1.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let msg = cloud(
            vec![field("x", 0, 7), field("y", 4, 7), field("z", 8, 7)],
            12,
            2,
            data,
        );
        let layout = FieldLayout::from_message(&msg).unwrap();
        assert_eq!(layout.read_points(&msg, true).unwrap().len(), 1);
        assert_eq!(layout.read_points(&msg, false).unwrap().len(), 2);
    }
}

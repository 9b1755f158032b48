//! Decoded sensor frames

use serde::{Deserialize, Serialize};

/// A single lidar return in the sensor frame, in meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Meaningful only when the owning cloud has intensity
    pub intensity: f32,
}

impl Point {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One decoded point cloud
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloudFrame {
    /// Receive timestamp in nanoseconds since epoch
    pub timestamp: u64,
    pub frame_id: String,
    pub points: Vec<Point>,
    pub has_intensity: bool,
}

/// Pixel layout of an [`ImageFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Mono8,
    /// Little-endian 16-bit grey
    Mono16,
    /// Compressed JPEG bitstream
    Jpeg,
    /// Compressed PNG bitstream
    Png,
}

impl PixelFormat {
    /// Bytes per pixel of uncompressed layouts
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Some(3),
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => Some(4),
            PixelFormat::Mono8 => Some(1),
            PixelFormat::Mono16 => Some(2),
            PixelFormat::Jpeg | PixelFormat::Png => None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.bytes_per_pixel().is_none()
    }

    /// Name recorded in scene descriptors
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Bgr8 => "bgr8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Bgra8 => "bgra8",
            PixelFormat::Mono8 => "mono8",
            PixelFormat::Mono16 => "mono16",
            PixelFormat::Jpeg => "jpeg",
            PixelFormat::Png => "png",
        }
    }
}

/// One decoded camera image
///
/// For uncompressed formats `data.len() == width * height * bytes_per_pixel`, with
/// no row padding.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    /// Receive timestamp in nanoseconds since epoch
    pub timestamp: u64,
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

/// Output of the message decoder
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    PointCloud(PointCloudFrame),
    Image(ImageFrame),
}

impl DecodedFrame {
    pub fn timestamp(&self) -> u64 {
        match self {
            DecodedFrame::PointCloud(cloud) => cloud.timestamp,
            DecodedFrame::Image(image) => image.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), Some(4));
        assert_eq!(PixelFormat::Mono16.bytes_per_pixel(), Some(2));
        assert!(PixelFormat::Png.is_compressed());
        assert!(!PixelFormat::Mono8.is_compressed());
    }

    #[test]
    fn test_point_finiteness() {
        let mut point = Point {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            intensity: f32::NAN,
        };
        assert!(point.is_finite());
        point.z = f32::INFINITY;
        assert!(!point.is_finite());
    }
}

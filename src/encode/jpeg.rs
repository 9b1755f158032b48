//! JPEG output for camera frames
//!
//! JPEG payloads are stored unchanged. PNG payloads and raw pixel buffers are
//! converted to 8-bit RGB or grey and compressed at the configured quality.

use crate::error::{EncodeError, EncodeResult};
use crate::frame::{ImageFrame, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

/// Default JPEG quality
pub const DEFAULT_QUALITY: u8 = 90;

/// Produce JPEG bytes for a frame
pub fn encode_jpeg(frame: &ImageFrame, quality: u8) -> EncodeResult<Vec<u8>> {
    let image = match frame.pixel_format {
        PixelFormat::Jpeg => return Ok(frame.data.clone()),
        PixelFormat::Png => {
            let decoded = image::load_from_memory_with_format(&frame.data, ImageFormat::Png)?;
            if decoded.color().has_color() {
                DynamicImage::ImageRgb8(decoded.to_rgb8())
            } else {
                DynamicImage::ImageLuma8(decoded.to_luma8())
            }
        }
        _ => to_dynamic(frame)?,
    };

    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    Ok(out)
}

/// Convert a packed raw frame to an 8-bit image the JPEG codec accepts
fn to_dynamic(frame: &ImageFrame) -> EncodeResult<DynamicImage> {
    let (width, height) = (frame.width, frame.height);
    let pixels = width as usize * height as usize;
    let data = &frame.data;

    let image = match frame.pixel_format {
        PixelFormat::Rgb8 => rgb(width, height, data.clone())?,
        PixelFormat::Bgr8 => {
            let mut buf = data.clone();
            for px in buf.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            rgb(width, height, buf)?
        }
        PixelFormat::Rgba8 | PixelFormat::Bgra8 => {
            let swap = frame.pixel_format == PixelFormat::Bgra8;
            let mut buf = Vec::with_capacity(pixels * 3);
            for px in data.chunks_exact(4) {
                if swap {
                    buf.extend_from_slice(&[px[2], px[1], px[0]]);
                } else {
                    buf.extend_from_slice(&px[..3]);
                }
            }
            rgb(width, height, buf)?
        }
        PixelFormat::Mono8 => grey(width, height, data.clone())?,
        PixelFormat::Mono16 => {
            let buf = data
                .chunks_exact(2)
                .map(|s| (u16::from_le_bytes([s[0], s[1]]) >> 8) as u8)
                .collect();
            grey(width, height, buf)?
        }
        PixelFormat::Jpeg | PixelFormat::Png => {
            return Err(EncodeError::invalid_frame(format!(
                "{} is not a raw pixel format",
                frame.pixel_format.as_str()
            )))
        }
    };
    Ok(image)
}

fn rgb(width: u32, height: u32, buf: Vec<u8>) -> EncodeResult<DynamicImage> {
    let len = buf.len();
    RgbImage::from_raw(width, height, buf)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| {
            EncodeError::invalid_frame(format!("{len} bytes is too short for {width}x{height} RGB"))
        })
}

fn grey(width: u32, height: u32, buf: Vec<u8>) -> EncodeResult<DynamicImage> {
    let len = buf.len();
    GrayImage::from_raw(width, height, buf)
        .map(DynamicImage::ImageLuma8)
        .ok_or_else(|| {
            EncodeError::invalid_frame(format!("{len} bytes is too short for {width}x{height} grey"))
        })
}

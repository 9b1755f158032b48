//! Raw and compressed image decoding

use crate::error::{DecodeError, DecodeResult};
use crate::frame::{ImageFrame, PixelFormat};
use crate::messages::{CompressedImage, Image};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

/// Map a `sensor_msgs/Image` encoding string to a pixel format
pub fn pixel_format_of(encoding: &str) -> Option<PixelFormat> {
    let format = match encoding {
        "rgb8" => PixelFormat::Rgb8,
        "bgr8" | "8UC3" => PixelFormat::Bgr8,
        "rgba8" => PixelFormat::Rgba8,
        "bgra8" | "8UC4" => PixelFormat::Bgra8,
        "mono8" | "8UC1" => PixelFormat::Mono8,
        "mono16" | "16UC1" => PixelFormat::Mono16,
        // Bayer mosaics are kept as their raw grey samples
        bayer if bayer.starts_with("bayer_") && bayer.ends_with('8') => PixelFormat::Mono8,
        _ => return None,
    };
    Some(format)
}

/// Decode an uncompressed image, removing row padding
pub fn decode_raw(msg: Image, timestamp: u64) -> DecodeResult<ImageFrame> {
    let pixel_format = pixel_format_of(&msg.encoding).ok_or_else(|| DecodeError::UnknownEncoding {
        encoding: msg.encoding.clone(),
    })?;
    let bytes_per_pixel = pixel_format.bytes_per_pixel().unwrap_or(1);

    let width = msg.width as usize;
    let height = msg.height as usize;
    let step = msg.step as usize;
    let too_large = || {
        DecodeError::invalid_image(format!(
            "{width}x{height} {} with step {step} overflows the address space",
            pixel_format.as_str()
        ))
    };
    let row_bytes = width.checked_mul(bytes_per_pixel).ok_or_else(too_large)?;

    if width == 0 || height == 0 {
        return Err(DecodeError::invalid_image(format!(
            "empty image {width}x{height}"
        )));
    }
    if step < row_bytes {
        return Err(DecodeError::invalid_image(format!(
            "step {step} is shorter than a {width}-pixel {} row",
            pixel_format.as_str()
        )));
    }
    let needed = (height - 1)
        .checked_mul(step)
        .and_then(|padded| padded.checked_add(row_bytes))
        .ok_or_else(too_large)?;
    if msg.data.len() < needed {
        return Err(DecodeError::invalid_image(format!(
            "{width}x{height} {} needs {needed} bytes, data holds {}",
            pixel_format.as_str(),
            msg.data.len()
        )));
    }

    let mut data = if step == row_bytes {
        let mut data = msg.data;
        data.truncate(row_bytes * height);
        data
    } else {
        let mut packed = Vec::with_capacity(row_bytes * height);
        for row in msg.data.chunks(step).take(height) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        packed
    };

    if pixel_format == PixelFormat::Mono16 && msg.is_bigendian != 0 {
        for sample in data.chunks_exact_mut(2) {
            sample.swap(0, 1);
        }
    }

    Ok(ImageFrame {
        timestamp,
        frame_id: msg.header.frame_id,
        width: msg.width,
        height: msg.height,
        pixel_format,
        data,
    })
}

/// Identify a compressed payload from its magic bytes, then its format string
pub fn compressed_format_of(format: &str, data: &[u8]) -> Option<PixelFormat> {
    if data.starts_with(JPEG_MAGIC) {
        return Some(PixelFormat::Jpeg);
    }
    if data.starts_with(PNG_MAGIC) {
        return Some(PixelFormat::Png);
    }

    let format = format.to_ascii_lowercase();
    if format.contains("jpeg") || format.contains("jpg") {
        Some(PixelFormat::Jpeg)
    } else if format.contains("png") {
        Some(PixelFormat::Png)
    } else {
        None
    }
}

/// Wrap a compressed image, reading its dimensions from the bitstream header
pub fn decode_compressed(msg: CompressedImage, timestamp: u64) -> DecodeResult<ImageFrame> {
    let pixel_format =
        compressed_format_of(&msg.format, &msg.data).ok_or_else(|| DecodeError::UnknownEncoding {
            encoding: msg.format.clone(),
        })?;

    let image_format = match pixel_format {
        PixelFormat::Png => ImageFormat::Png,
        _ => ImageFormat::Jpeg,
    };
    let (width, height) = ImageReader::with_format(Cursor::new(&msg.data), image_format)
        .into_dimensions()
        .map_err(|e| DecodeError::invalid_image(format!("{}: {e}", pixel_format.as_str())))?;

    Ok(ImageFrame {
        timestamp,
        frame_id: msg.header.frame_id,
        width,
        height,
        pixel_format,
        data: msg.data,
    })
}

//! Message decoding from raw records into frames
//!
//! [`MessageDecoder::decode`] dispatches on the schema identifier, which also
//! names the wire format: `pkg/msg/Type` is ROS2 CDR, `pkg/Type` is ROS1.
//! Schemas other than point clouds and images decode to `Ok(None)` and are
//! skipped by callers.

use crate::error::DecodeResult;
use crate::frame::{DecodedFrame, PointCloudFrame};
use crate::messages::{CompressedImage, FromCdr, FromRos1, Image, MessageType, PointCloud2};
use crate::types::{TopicInfo, WireFormat};

pub mod image;
pub mod point_cloud;

pub use point_cloud::FieldLayout;

/// What kind of frame a schema decodes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    PointCloud,
    Image,
}

impl FrameKind {
    /// Frame kind for a schema identifier, if the schema is supported
    pub fn of_schema(schema: &str) -> Option<Self> {
        MessageType::of_schema(schema).map(|(message_type, _)| Self::of_type(message_type))
    }

    /// Frame kind for a topic whose recorded serialization matches its schema
    pub fn of_topic(topic: &TopicInfo) -> Option<Self> {
        let (message_type, wire) = MessageType::of_schema(&topic.schema)?;
        (topic.wire_format() == Some(wire)).then(|| Self::of_type(message_type))
    }

    fn of_type(message_type: MessageType) -> Self {
        match message_type {
            MessageType::PointCloud2 => FrameKind::PointCloud,
            MessageType::Image | MessageType::CompressedImage => FrameKind::Image,
        }
    }
}

fn read_message<T: FromCdr + FromRos1>(wire: WireFormat, payload: &[u8]) -> DecodeResult<T> {
    match wire {
        WireFormat::Cdr => T::from_cdr_bytes(payload),
        WireFormat::Ros1 => T::from_ros1_bytes(payload),
    }
}

/// Decoder from serialized payloads to [`DecodedFrame`]s
#[derive(Debug, Clone, Copy)]
pub struct MessageDecoder {
    drop_non_finite: bool,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self {
            drop_non_finite: true,
        }
    }
}

impl MessageDecoder {
    pub fn new(drop_non_finite: bool) -> Self {
        Self { drop_non_finite }
    }

    /// Decode one payload; unsupported schemas give `Ok(None)`
    pub fn decode(
        &self,
        schema: &str,
        timestamp: u64,
        payload: &[u8],
    ) -> DecodeResult<Option<DecodedFrame>> {
        let Some((message_type, wire)) = MessageType::of_schema(schema) else {
            return Ok(None);
        };
        let frame = match message_type {
            MessageType::PointCloud2 => {
                let cloud: PointCloud2 = read_message(wire, payload)?;
                DecodedFrame::PointCloud(self.decode_cloud(cloud, timestamp)?)
            }
            MessageType::Image => {
                let msg: Image = read_message(wire, payload)?;
                DecodedFrame::Image(image::decode_raw(msg, timestamp)?)
            }
            MessageType::CompressedImage => {
                let msg: CompressedImage = read_message(wire, payload)?;
                DecodedFrame::Image(image::decode_compressed(msg, timestamp)?)
            }
        };
        Ok(Some(frame))
    }

    fn decode_cloud(&self, cloud: PointCloud2, timestamp: u64) -> DecodeResult<PointCloudFrame> {
        let layout = FieldLayout::from_message(&cloud)?;
        let points = layout.read_points(&cloud, self.drop_non_finite)?;
        Ok(PointCloudFrame {
            timestamp,
            frame_id: cloud.header.frame_id,
            points,
            has_intensity: layout.has_intensity(),
        })
    }
}

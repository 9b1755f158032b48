//! ROS sensor message definitions
//!
//! Wire-level mirrors of the `sensor_msgs` types the pipeline consumes. ROS2
//! payloads are decoded with [`FromCdr`], ROS1 payloads with [`FromRos1`], and
//! both are turned into frames by [`crate::decode`].

use crate::cdr::{CdrDeserializer, CdrSerializer};
use crate::error::DecodeResult;
use crate::ros1::{Ros1Deserializer, Ros1Serializer};
use crate::types::WireFormat;

/// Schema identifier of `sensor_msgs/msg/PointCloud2`
pub const POINT_CLOUD2: &str = "sensor_msgs/msg/PointCloud2";

/// Schema identifier of `sensor_msgs/msg/Image`
pub const IMAGE: &str = "sensor_msgs/msg/Image";

/// Schema identifier of `sensor_msgs/msg/CompressedImage`
pub const COMPRESSED_IMAGE: &str = "sensor_msgs/msg/CompressedImage";

/// ROS1 name of `sensor_msgs/PointCloud2`
pub const ROS1_POINT_CLOUD2: &str = "sensor_msgs/PointCloud2";

/// ROS1 name of `sensor_msgs/Image`
pub const ROS1_IMAGE: &str = "sensor_msgs/Image";

/// ROS1 name of `sensor_msgs/CompressedImage`
pub const ROS1_COMPRESSED_IMAGE: &str = "sensor_msgs/CompressedImage";

/// Message types the decoder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    PointCloud2,
    Image,
    CompressedImage,
}

impl MessageType {
    /// Resolve a schema name to its message type and the wire format it implies
    pub fn of_schema(schema: &str) -> Option<(Self, WireFormat)> {
        let resolved = match schema {
            POINT_CLOUD2 => (MessageType::PointCloud2, WireFormat::Cdr),
            IMAGE => (MessageType::Image, WireFormat::Cdr),
            COMPRESSED_IMAGE => (MessageType::CompressedImage, WireFormat::Cdr),
            ROS1_POINT_CLOUD2 => (MessageType::PointCloud2, WireFormat::Ros1),
            ROS1_IMAGE => (MessageType::Image, WireFormat::Ros1),
            ROS1_COMPRESSED_IMAGE => (MessageType::CompressedImage, WireFormat::Ros1),
            _ => return None,
        };
        Some(resolved)
    }
}

/// builtin_interfaces/msg/Time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Time {
    pub sec: i32,
    pub nanosec: u32,
}

impl Time {
    /// Nanoseconds since epoch, clamped at zero
    pub fn as_nanos(&self) -> u64 {
        let nanos = self.sec as i64 * 1_000_000_000 + self.nanosec as i64;
        nanos.max(0) as u64
    }
}

/// std_msgs/msg/Header
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub stamp: Time,
    pub frame_id: String,
}

/// sensor_msgs/msg/PointField
#[derive(Debug, Clone, PartialEq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

/// sensor_msgs/msg/PointCloud2
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud2 {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

/// sensor_msgs/msg/Image
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub header: Header,
    pub height: u32,
    pub width: u32,
    pub encoding: String,
    pub is_bigendian: u8,
    pub step: u32,
    pub data: Vec<u8>,
}

/// sensor_msgs/msg/CompressedImage
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    pub header: Header,
    pub format: String,
    pub data: Vec<u8>,
}

/// Trait for deserializing ROS2 messages from CDR data
pub trait FromCdr: Sized {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self>;

    /// Decode a complete payload, header included
    fn from_cdr_bytes(data: &[u8]) -> DecodeResult<Self> {
        let mut deserializer = CdrDeserializer::new(data)?;
        Self::from_cdr(&mut deserializer)
    }
}

/// Trait for serializing ROS2 messages to CDR data
pub trait ToCdr {
    fn to_cdr(&self, serializer: &mut CdrSerializer);

    /// Encode a complete little-endian payload
    fn to_cdr_bytes(&self) -> Vec<u8> {
        let mut serializer = CdrSerializer::new();
        self.to_cdr(&mut serializer);
        serializer.into_bytes()
    }
}

impl FromCdr for Time {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self> {
        Ok(Self {
            sec: deserializer.read_i32()?,
            nanosec: deserializer.read_u32()?,
        })
    }
}

impl FromCdr for Header {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self> {
        Ok(Self {
            stamp: Time::from_cdr(deserializer)?,
            frame_id: deserializer.read_string()?,
        })
    }
}

impl FromCdr for PointField {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self> {
        Ok(Self {
            name: deserializer.read_string()?,
            offset: deserializer.read_u32()?,
            datatype: deserializer.read_u8()?,
            count: deserializer.read_u32()?,
        })
    }
}

impl FromCdr for PointCloud2 {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_cdr(deserializer)?,
            height: deserializer.read_u32()?,
            width: deserializer.read_u32()?,
            fields: deserializer.read_sequence(|d| PointField::from_cdr(d))?,
            is_bigendian: deserializer.read_bool()?,
            point_step: deserializer.read_u32()?,
            row_step: deserializer.read_u32()?,
            data: deserializer.read_byte_sequence()?,
            is_dense: deserializer.read_bool()?,
        })
    }
}

impl FromCdr for Image {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_cdr(deserializer)?,
            height: deserializer.read_u32()?,
            width: deserializer.read_u32()?,
            encoding: deserializer.read_string()?,
            is_bigendian: deserializer.read_u8()?,
            step: deserializer.read_u32()?,
            data: deserializer.read_byte_sequence()?,
        })
    }
}

impl FromCdr for CompressedImage {
    fn from_cdr(deserializer: &mut CdrDeserializer) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_cdr(deserializer)?,
            format: deserializer.read_string()?,
            data: deserializer.read_byte_sequence()?,
        })
    }
}

/// Trait for deserializing ROS1 messages
pub trait FromRos1: Sized {
    fn from_ros1(deserializer: &mut Ros1Deserializer) -> DecodeResult<Self>;

    fn from_ros1_bytes(data: &[u8]) -> DecodeResult<Self> {
        Self::from_ros1(&mut Ros1Deserializer::new(data))
    }
}

/// Trait for serializing ROS1 messages
pub trait ToRos1 {
    fn to_ros1(&self, serializer: &mut Ros1Serializer);

    fn to_ros1_bytes(&self) -> Vec<u8> {
        let mut serializer = Ros1Serializer::new();
        self.to_ros1(&mut serializer);
        serializer.into_bytes()
    }
}

impl FromRos1 for Header {
    fn from_ros1(deserializer: &mut Ros1Deserializer) -> DecodeResult<Self> {
        // ROS1 headers lead with a sequence number that ROS2 dropped
        let _seq = deserializer.read_u32()?;
        let sec = deserializer.read_u32()?;
        let nanosec = deserializer.read_u32()?;
        Ok(Self {
            stamp: Time {
                sec: i32::try_from(sec).unwrap_or(i32::MAX),
                nanosec,
            },
            frame_id: deserializer.read_string()?,
        })
    }
}

impl FromRos1 for PointField {
    fn from_ros1(deserializer: &mut Ros1Deserializer) -> DecodeResult<Self> {
        Ok(Self {
            name: deserializer.read_string()?,
            offset: deserializer.read_u32()?,
            datatype: deserializer.read_u8()?,
            count: deserializer.read_u32()?,
        })
    }
}

impl FromRos1 for PointCloud2 {
    fn from_ros1(deserializer: &mut Ros1Deserializer) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_ros1(deserializer)?,
            height: deserializer.read_u32()?,
            width: deserializer.read_u32()?,
            fields: deserializer.read_array(|d| PointField::from_ros1(d))?,
            is_bigendian: deserializer.read_bool()?,
            point_step: deserializer.read_u32()?,
            row_step: deserializer.read_u32()?,
            data: deserializer.read_byte_array()?,
            is_dense: deserializer.read_bool()?,
        })
    }
}

impl FromRos1 for Image {
    fn from_ros1(deserializer: &mut Ros1Deserializer) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_ros1(deserializer)?,
            height: deserializer.read_u32()?,
            width: deserializer.read_u32()?,
            encoding: deserializer.read_string()?,
            is_bigendian: deserializer.read_u8()?,
            step: deserializer.read_u32()?,
            data: deserializer.read_byte_array()?,
        })
    }
}

impl FromRos1 for CompressedImage {
    fn from_ros1(deserializer: &mut Ros1Deserializer) -> DecodeResult<Self> {
        Ok(Self {
            header: Header::from_ros1(deserializer)?,
            format: deserializer.read_string()?,
            data: deserializer.read_byte_array()?,
        })
    }
}

impl ToCdr for Header {
    fn to_cdr(&self, serializer: &mut CdrSerializer) {
        serializer.write(self.stamp.sec);
        serializer.write(self.stamp.nanosec);
        serializer.write_string(&self.frame_id);
    }
}

impl ToCdr for PointCloud2 {
    fn to_cdr(&self, serializer: &mut CdrSerializer) {
        self.header.to_cdr(serializer);
        serializer.write(self.height);
        serializer.write(self.width);
        serializer.write(self.fields.len() as u32);
        for field in &self.fields {
            serializer.write_string(&field.name);
            serializer.write(field.offset);
            serializer.write(field.datatype);
            serializer.write(field.count);
        }
        serializer.write_bool(self.is_bigendian);
        serializer.write(self.point_step);
        serializer.write(self.row_step);
        serializer.write_byte_sequence(&self.data);
        serializer.write_bool(self.is_dense);
    }
}

impl ToCdr for Image {
    fn to_cdr(&self, serializer: &mut CdrSerializer) {
        self.header.to_cdr(serializer);
        serializer.write(self.height);
        serializer.write(self.width);
        serializer.write_string(&self.encoding);
        serializer.write(self.is_bigendian);
        serializer.write(self.step);
        serializer.write_byte_sequence(&self.data);
    }
}

impl ToCdr for CompressedImage {
    fn to_cdr(&self, serializer: &mut CdrSerializer) {
        self.header.to_cdr(serializer);
        serializer.write_string(&self.format);
        serializer.write_byte_sequence(&self.data);
    }
}

impl ToRos1 for Header {
    fn to_ros1(&self, serializer: &mut Ros1Serializer) {
        serializer.write_u32(0);
        serializer.write_u32(self.stamp.sec.max(0) as u32);
        serializer.write_u32(self.stamp.nanosec);
        serializer.write_string(&self.frame_id);
    }
}

impl ToRos1 for PointCloud2 {
    fn to_ros1(&self, serializer: &mut Ros1Serializer) {
        self.header.to_ros1(serializer);
        serializer.write_u32(self.height);
        serializer.write_u32(self.width);
        serializer.write_u32(self.fields.len() as u32);
        for field in &self.fields {
            serializer.write_string(&field.name);
            serializer.write_u32(field.offset);
            serializer.write_u8(field.datatype);
            serializer.write_u32(field.count);
        }
        serializer.write_bool(self.is_bigendian);
        serializer.write_u32(self.point_step);
        serializer.write_u32(self.row_step);
        serializer.write_byte_array(&self.data);
        serializer.write_bool(self.is_dense);
    }
}

impl ToRos1 for Image {
    fn to_ros1(&self, serializer: &mut Ros1Serializer) {
        self.header.to_ros1(serializer);
        serializer.write_u32(self.height);
        serializer.write_u32(self.width);
        serializer.write_string(&self.encoding);
        serializer.write_u8(self.is_bigendian);
        serializer.write_u32(self.step);
        serializer.write_byte_array(&self.data);
    }
}

impl ToRos1 for CompressedImage {
    fn to_ros1(&self, serializer: &mut Ros1Serializer) {
        self.header.to_ros1(serializer);
        serializer.write_string(&self.format);
        serializer.write_byte_array(&self.data);
    }
}

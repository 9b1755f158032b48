//! ROS1 message serialization
//!
//! Payloads in ROS1 bags carry no encapsulation header. Every primitive is
//! little-endian and packed without alignment; strings and arrays are prefixed
//! with a `u32` length and strings have no terminator.

use crate::error::{DecodeError, DecodeResult};

/// Reader over one ROS1-serialized payload
pub struct Ros1Deserializer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Ros1Deserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::wire(message, self.pos, self.data.len())
    }

    fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.error(format!(
                "ROS1 data truncated: need {len} bytes, {} available",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> DecodeResult<String> {
        let length = self.read_u32()? as usize;
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.error("Invalid UTF-8 in ROS1 string"))
    }

    /// Read a length-prefixed array, each element through `read_element`
    pub fn read_array<T, F>(&mut self, read_element: F) -> DecodeResult<Vec<T>>
    where
        F: Fn(&mut Self) -> DecodeResult<T>,
    {
        let length = self.read_u32()? as usize;
        if length > self.remaining() {
            return Err(self.error(format!("Array length {length} exceeds payload")));
        }
        let mut items = Vec::with_capacity(length);
        for _ in 0..length {
            items.push(read_element(self)?);
        }
        Ok(items)
    }

    pub fn read_byte_array(&mut self) -> DecodeResult<Vec<u8>> {
        let length = self.read_u32()? as usize;
        Ok(self.take(length)?.to_vec())
    }
}

/// Writer producing ROS1-serialized payloads
#[derive(Debug, Default)]
pub struct Ros1Serializer {
    buf: Vec<u8>,
}

impl Ros1Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_layout() {
        let mut ser = Ros1Serializer::new();
        ser.write_u8(7);
        ser.write_u32(0x0102_0304);
        ser.write_string("map");
        let bytes = ser.into_bytes();
        // No padding after the u8, no terminator after the string
        assert_eq!(bytes, vec![7, 4, 3, 2, 1, 3, 0, 0, 0, b'm', b'a', b'p']);

        let mut de = Ros1Deserializer::new(&bytes);
        assert_eq!(de.read_u8().unwrap(), 7);
        assert_eq!(de.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(de.read_string().unwrap(), "map");
        assert_eq!(de.remaining(), 0);
    }

    #[test]
    fn test_truncated_string() {
        let mut ser = Ros1Serializer::new();
        ser.write_u32(10);
        ser.write_u8(b'a');
        let bytes = ser.into_bytes();

        let err = Ros1Deserializer::new(&bytes).read_string().unwrap_err();
        assert!(matches!(err, DecodeError::Wire { position: 4, .. }));
    }

    #[test]
    fn test_oversized_array_rejected() {
        let mut ser = Ros1Serializer::new();
        ser.write_u32(u32::MAX);
        let bytes = ser.into_bytes();

        let mut de = Ros1Deserializer::new(&bytes);
        assert!(de.read_array(|d| d.read_u8()).is_err());
    }
}

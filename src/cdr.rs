//! CDR (Common Data Representation) encoding for ROS2 messages
//!
//! ROS2 payloads start with a 4-byte encapsulation header that selects the byte
//! order. Primitives are aligned to their own size, measured from the end of the
//! header. Strings are length-prefixed and null-terminated.

use crate::error::{DecodeError, DecodeResult};

/// Size of the encapsulation header
pub const HEADER_LEN: usize = 4;

/// CDR header information
#[derive(Debug, Clone, Copy)]
pub struct CdrHeader {
    pub endianness: Endianness,
}

/// Byte order endianness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    LittleEndian,
    BigEndian,
}

impl CdrHeader {
    /// Parse CDR header from the first 4 bytes
    pub fn parse(header_bytes: &[u8]) -> DecodeResult<Self> {
        if header_bytes.len() != HEADER_LEN {
            return Err(DecodeError::wire(
                "CDR header must be exactly 4 bytes",
                0,
                header_bytes.len(),
            ));
        }

        // Byte 1 carries the byte order: 0 = big endian, 1 = little endian
        let endianness = match header_bytes[1] {
            0 => Endianness::BigEndian,
            1 => Endianness::LittleEndian,
            flag => {
                return Err(DecodeError::wire(
                    format!("Invalid CDR endianness flag {flag}"),
                    1,
                    header_bytes.len(),
                ))
            }
        };

        Ok(Self { endianness })
    }
}

/// Primitive values readable from a CDR stream
pub trait FromBytes: Sized {
    const SIZE: usize;
    fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self;
}

macro_rules! impl_from_bytes {
    ($($ty:ty),*) => {
        $(
            impl FromBytes for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_bytes(bytes: &[u8], endianness: Endianness) -> Self {
                    let mut array = [0u8; std::mem::size_of::<$ty>()];
                    array.copy_from_slice(&bytes[..<Self as FromBytes>::SIZE]);
                    match endianness {
                        Endianness::LittleEndian => <$ty>::from_le_bytes(array),
                        Endianness::BigEndian => <$ty>::from_be_bytes(array),
                    }
                }
            }
        )*
    };
}

impl_from_bytes!(i8, u8, i16, u16, i32, u32, f32, f64);

/// CDR deserializer for reading binary message data
pub struct CdrDeserializer<'a> {
    data: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'a> CdrDeserializer<'a> {
    /// Create a new CDR deserializer from raw message data
    pub fn new(data: &'a [u8]) -> DecodeResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::wire(
                "CDR data too short for header",
                0,
                data.len(),
            ));
        }

        let header = CdrHeader::parse(&data[..HEADER_LEN])?;

        Ok(Self {
            data,
            pos: HEADER_LEN,
            endianness: header.endianness,
        })
    }

    /// Get current position in the data
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Byte order declared by the header
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn error(&self, message: impl Into<String>) -> DecodeError {
        DecodeError::wire(message, self.pos, self.data.len())
    }

    /// Align position to the specified boundary, relative to the end of the header
    fn align(&mut self, alignment: usize) {
        let body = self.pos - HEADER_LEN;
        let padded = (body + alignment - 1) & !(alignment - 1);
        self.pos = HEADER_LEN + padded;
    }

    fn take(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.error(format!(
                "CDR data truncated: need {len} bytes, {} available",
                self.remaining()
            )));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Read a primitive value with proper alignment and endianness
    pub fn read<T: FromBytes>(&mut self) -> DecodeResult<T> {
        self.align(T::SIZE);
        let endianness = self.endianness;
        let bytes = self.take(T::SIZE)?;
        Ok(T::from_bytes(bytes, endianness))
    }

    pub fn read_u8(&mut self) -> DecodeResult<u8> {
        self.read()
    }

    pub fn read_i32(&mut self) -> DecodeResult<i32> {
        self.read()
    }

    pub fn read_u32(&mut self) -> DecodeResult<u32> {
        self.read()
    }

    /// Read a boolean value
    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a string value
    pub fn read_string(&mut self) -> DecodeResult<String> {
        let length = self.read_u32()? as usize;
        if length == 0 {
            return Ok(String::new());
        }

        let bytes = self.take(length)?;
        // The length includes the terminating null
        let text = match bytes.split_last() {
            Some((0, rest)) => rest,
            _ => bytes,
        };

        String::from_utf8(text.to_vec()).map_err(|_| self.error("Invalid UTF-8 in CDR string"))
    }

    /// Read a sequence (variable-length array) of elements
    pub fn read_sequence<T, F>(&mut self, read_element: F) -> DecodeResult<Vec<T>>
    where
        F: Fn(&mut Self) -> DecodeResult<T>,
    {
        let length = self.read_u32()? as usize;
        // Every element takes at least one byte
        if length > self.remaining() {
            return Err(self.error(format!("Sequence length {length} exceeds payload")));
        }

        let mut vec = Vec::with_capacity(length);
        for _ in 0..length {
            vec.push(read_element(self)?);
        }
        Ok(vec)
    }

    /// Read a sequence of bytes (for data fields)
    pub fn read_byte_sequence(&mut self) -> DecodeResult<Vec<u8>> {
        let length = self.read_u32()? as usize;
        Ok(self.take(length)?.to_vec())
    }
}

/// Primitive values writable to a CDR stream
pub trait ToBytes: Copy {
    const SIZE: usize;
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_to_bytes {
    ($($ty:ty),*) => {
        $(
            impl ToBytes for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_to_bytes!(u8, i32, u32);

/// Little-endian CDR serializer, the mirror of [`CdrDeserializer`]
pub struct CdrSerializer {
    buf: Vec<u8>,
}

impl Default for CdrSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl CdrSerializer {
    /// Start a payload with a little-endian encapsulation header
    pub fn new() -> Self {
        Self {
            buf: vec![0x00, 0x01, 0x00, 0x00],
        }
    }

    fn align(&mut self, alignment: usize) {
        while (self.buf.len() - HEADER_LEN) % alignment != 0 {
            self.buf.push(0);
        }
    }

    /// Write a primitive value with alignment padding
    pub fn write<T: ToBytes>(&mut self, value: T) {
        self.align(T::SIZE);
        value.write_le(&mut self.buf);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write(value as u8);
    }

    /// Write a null-terminated, length-prefixed string
    pub fn write_string(&mut self, value: &str) {
        self.write((value.len() + 1) as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Write a length-prefixed byte sequence
    pub fn write_byte_sequence(&mut self, bytes: &[u8]) {
        self.write(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Finish the payload
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

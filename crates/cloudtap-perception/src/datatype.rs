//! Scalar datatype table.
//!
//! | Code | Type | Width |
//! |------|------|-------|
//! | 1 | `int8` | 1 |
//! | 2 | `uint8` | 1 |
//! | 3 | `int16` LE | 2 |
//! | 4 | `uint16` LE | 2 |
//! | 5 | `int32` LE | 4 |
//! | 6 | `uint32` LE | 4 |
//! | 7 | `float32` LE | 4 |
//! | 8 | `float64` LE | 8 |
//!
//! Any other code is not an error: the value is simply absent.

use byteorder::{ByteOrder, LittleEndian};
use cloudtap_types::Scalar;

/// One of the eight supported field encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DatatypeCode {
    Int8 = 1,
    Uint8 = 2,
    Int16 = 3,
    Uint16 = 4,
    Int32 = 5,
    Uint32 = 6,
    Float32 = 7,
    Float64 = 8,
}

impl DatatypeCode {
    /// Map a wire code to its datatype, or `None` for unknown codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DatatypeCode::Int8),
            2 => Some(DatatypeCode::Uint8),
            3 => Some(DatatypeCode::Int16),
            4 => Some(DatatypeCode::Uint16),
            5 => Some(DatatypeCode::Int32),
            6 => Some(DatatypeCode::Uint32),
            7 => Some(DatatypeCode::Float32),
            8 => Some(DatatypeCode::Float64),
            _ => None,
        }
    }

    /// Encoded width in bytes.
    pub fn size(self) -> usize {
        match self {
            DatatypeCode::Int8 | DatatypeCode::Uint8 => 1,
            DatatypeCode::Int16 | DatatypeCode::Uint16 => 2,
            DatatypeCode::Int32 | DatatypeCode::Uint32 | DatatypeCode::Float32 => 4,
            DatatypeCode::Float64 => 8,
        }
    }

    /// Decode one value starting at `offset`.
    ///
    /// Returns `None` when the value would extend past the end of `buf`.
    pub fn read(self, buf: &[u8], offset: usize) -> Option<Scalar> {
        let end = offset.checked_add(self.size())?;
        let bytes = buf.get(offset..end)?;
        let value = match self {
            DatatypeCode::Int8 => Scalar::I8(bytes[0] as i8),
            DatatypeCode::Uint8 => Scalar::U8(bytes[0]),
            DatatypeCode::Int16 => Scalar::I16(LittleEndian::read_i16(bytes)),
            DatatypeCode::Uint16 => Scalar::U16(LittleEndian::read_u16(bytes)),
            DatatypeCode::Int32 => Scalar::I32(LittleEndian::read_i32(bytes)),
            DatatypeCode::Uint32 => Scalar::U32(LittleEndian::read_u32(bytes)),
            DatatypeCode::Float32 => Scalar::F32(LittleEndian::read_f32(bytes)),
            DatatypeCode::Float64 => Scalar::F64(LittleEndian::read_f64(bytes)),
        };
        Some(value)
    }
}

/// Decode the value encoded with wire `code` at `offset`.
///
/// Unknown codes and out-of-range reads both yield `None`.
pub fn read_value(buf: &[u8], offset: usize, code: u8) -> Option<Scalar> {
    DatatypeCode::from_code(code)?.read(buf, offset)
}

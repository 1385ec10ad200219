//! Metadata values and their binary codec.
//!
//! Decoding works on a borrowed byte slice plus a cursor, so the reader can
//! walk a memory-mapped file without copying it.  Encoding writes to any
//! [`std::io::Write`] sink.

use std::io::{self, Write};

use serde::Serialize;

use crate::error::{GGUFError, Result};
use crate::types::GGUFValueType;

//  Value

/// A typed GGUF metadata value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(ValueArray),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
}

impl Value {
    pub fn value_type(&self) -> GGUFValueType {
        match self {
            Self::Uint8(_) => GGUFValueType::Uint8,
            Self::Int8(_) => GGUFValueType::Int8,
            Self::Uint16(_) => GGUFValueType::Uint16,
            Self::Int16(_) => GGUFValueType::Int16,
            Self::Uint32(_) => GGUFValueType::Uint32,
            Self::Int32(_) => GGUFValueType::Int32,
            Self::Float32(_) => GGUFValueType::Float32,
            Self::Bool(_) => GGUFValueType::Bool,
            Self::String(_) => GGUFValueType::String,
            Self::Array(_) => GGUFValueType::Array,
            Self::Uint64(_) => GGUFValueType::Uint64,
            Self::Int64(_) => GGUFValueType::Int64,
            Self::Float64(_) => GGUFValueType::Float64,
        }
    }

    /// Exact number of bytes [`encode`] writes for this value (tag excluded).
    pub fn encoded_len(&self) -> u64 {
        match self {
            Self::String(s) => 8 + s.len() as u64,
            Self::Array(arr) => 12 + arr.values.iter().map(Value::encoded_len).sum::<u64>(),
            other => other.value_type().min_encoded_len(),
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Uint8(v) => Some(u32::from(*v)),
            Self::Uint16(v) => Some(u32::from(*v)),
            Self::Uint32(v) => Some(*v),
            Self::Int32(v) => u32::try_from(*v).ok(),
            Self::Uint64(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint64(v) => Some(*v),
            Self::Int64(v) => u64::try_from(*v).ok(),
            other => other.as_u32().map(u64::from),
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float32(v) => Some(*v),
            Self::Float64(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ValueArray> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl From<Vec<$ty>> for Value {
                fn from(values: Vec<$ty>) -> Self {
                    Self::Array(ValueArray {
                        element_type: GGUFValueType::$variant,
                        values: values.into_iter().map(Value::$variant).collect(),
                    })
                }
            }
        )*
    };
}

impl_from_scalar! {
    u8 => Uint8,
    i8 => Int8,
    u16 => Uint16,
    i16 => Int16,
    u32 => Uint32,
    i32 => Int32,
    f32 => Float32,
    bool => Bool,
    String => String,
    u64 => Uint64,
    i64 => Int64,
    f64 => Float64,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<&str>> for Value {
    fn from(values: Vec<&str>) -> Self {
        values
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<String>>()
            .into()
    }
}

impl From<ValueArray> for Value {
    fn from(arr: ValueArray) -> Self {
        Self::Array(arr)
    }
}

//  Array

/// A homogeneous array value. The element type is fixed on creation and
/// can never be `Array` itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueArray {
    element_type: GGUFValueType,
    values: Vec<Value>,
}

impl ValueArray {
    pub fn new(element_type: GGUFValueType) -> Result<Self> {
        if element_type == GGUFValueType::Array {
            return Err(GGUFError::MalformedValue(
                "arrays of arrays are not supported".into(),
            ));
        }
        Ok(Self {
            element_type,
            values: Vec::new(),
        })
    }

    pub fn from_values(element_type: GGUFValueType, values: Vec<Value>) -> Result<Self> {
        let mut arr = Self::new(element_type)?;
        arr.values.reserve(values.len());
        for v in values {
            arr.push(v)?;
        }
        Ok(arr)
    }

    /// Append `value`; fails if its type differs from the element type.
    pub fn push(&mut self, value: Value) -> Result<()> {
        if value.value_type() != self.element_type {
            return Err(GGUFError::MalformedValue(format!(
                "array of {:?} cannot hold a {:?}",
                self.element_type,
                value.value_type()
            )));
        }
        self.values.push(value);
        Ok(())
    }

    pub fn element_type(&self) -> GGUFValueType {
        self.element_type
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}

//  Decoding

/// Borrow `n` bytes at `*pos` and advance the cursor.
pub(crate) fn take<'a>(data: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8]> {
    let available = data.len().saturating_sub(*pos);
    if n > available {
        return Err(GGUFError::TruncatedFile {
            offset: *pos as u64,
            needed: n as u64,
            available: available as u64,
        });
    }
    let bytes = &data[*pos..*pos + n];
    *pos += n;
    Ok(bytes)
}

fn take_array<const N: usize>(data: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    buf.copy_from_slice(take(data, pos, N)?);
    Ok(buf)
}

pub(crate) fn read_u8(data: &[u8], pos: &mut usize) -> Result<u8> {
    Ok(take_array::<1>(data, pos)?[0])
}

pub(crate) fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(take_array(data, pos)?))
}

pub(crate) fn read_u64(data: &[u8], pos: &mut usize) -> Result<u64> {
    Ok(u64::from_le_bytes(take_array(data, pos)?))
}

pub(crate) fn read_string(data: &[u8], pos: &mut usize) -> Result<String> {
    let start = *pos;
    let len = read_u64(data, pos)?;
    let remaining = data.len().saturating_sub(*pos) as u64;
    if len > remaining {
        return Err(GGUFError::MalformedValue(format!(
            "string at byte {start} declares {len} bytes, only {remaining} remain"
        )));
    }
    let bytes = take(data, pos, len as usize)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        GGUFError::MalformedValue(format!("string at byte {start} is not UTF-8: {e}"))
    })
}

/// Decode one value of type `tag` at `*pos`, advancing the cursor past it.
pub fn decode(tag: GGUFValueType, data: &[u8], pos: &mut usize) -> Result<Value> {
    Ok(match tag {
        GGUFValueType::Uint8 => Value::Uint8(read_u8(data, pos)?),
        GGUFValueType::Int8 => Value::Int8(read_u8(data, pos)? as i8),
        GGUFValueType::Uint16 => Value::Uint16(u16::from_le_bytes(take_array(data, pos)?)),
        GGUFValueType::Int16 => Value::Int16(i16::from_le_bytes(take_array(data, pos)?)),
        GGUFValueType::Uint32 => Value::Uint32(read_u32(data, pos)?),
        GGUFValueType::Int32 => Value::Int32(i32::from_le_bytes(take_array(data, pos)?)),
        GGUFValueType::Float32 => Value::Float32(f32::from_le_bytes(take_array(data, pos)?)),
        GGUFValueType::Bool => Value::Bool(read_u8(data, pos)? != 0),
        GGUFValueType::String => Value::String(read_string(data, pos)?),
        GGUFValueType::Uint64 => Value::Uint64(read_u64(data, pos)?),
        GGUFValueType::Int64 => Value::Int64(i64::from_le_bytes(take_array(data, pos)?)),
        GGUFValueType::Float64 => Value::Float64(f64::from_le_bytes(take_array(data, pos)?)),
        GGUFValueType::Array => {
            let start = *pos;
            let element_type = GGUFValueType::try_from(read_u32(data, pos)?)?;
            let count = read_u64(data, pos)?;
            let remaining = data.len().saturating_sub(*pos) as u64;
            let fits = count
                .checked_mul(element_type.min_encoded_len())
                .is_some_and(|min| min <= remaining);
            if !fits {
                return Err(GGUFError::MalformedValue(format!(
                    "array at byte {start} declares {count} elements, only {remaining} bytes remain"
                )));
            }
            let mut arr = ValueArray::new(element_type)?;
            arr.values.reserve(count as usize);
            for _ in 0..count {
                arr.values.push(decode(element_type, data, pos)?);
            }
            Value::Array(arr)
        }
    })
}

//  Encoding

pub(crate) fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    w.write_all(&(s.len() as u64).to_le_bytes())?;
    w.write_all(s.as_bytes())
}

/// Encode `value` without its leading type tag.
pub fn encode(value: &Value, w: &mut impl Write) -> io::Result<()> {
    match value {
        Value::Uint8(v) => w.write_all(&[*v]),
        Value::Int8(v) => w.write_all(&v.to_le_bytes()),
        Value::Uint16(v) => w.write_all(&v.to_le_bytes()),
        Value::Int16(v) => w.write_all(&v.to_le_bytes()),
        Value::Uint32(v) => w.write_all(&v.to_le_bytes()),
        Value::Int32(v) => w.write_all(&v.to_le_bytes()),
        Value::Float32(v) => w.write_all(&v.to_le_bytes()),
        Value::Bool(v) => w.write_all(&[u8::from(*v)]),
        Value::String(s) => write_string(w, s),
        Value::Uint64(v) => w.write_all(&v.to_le_bytes()),
        Value::Int64(v) => w.write_all(&v.to_le_bytes()),
        Value::Float64(v) => w.write_all(&v.to_le_bytes()),
        Value::Array(arr) => {
            w.write_all(&(arr.element_type as u32).to_le_bytes())?;
            w.write_all(&(arr.values.len() as u64).to_le_bytes())?;
            for v in &arr.values {
                encode(v, w)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn encoded(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        encode(value, &mut buf).unwrap();
        buf
    }

    #[test]
    fn scalars_are_little_endian() {
        assert_eq!(encoded(&Value::Uint32(0x0102_0304)), [4, 3, 2, 1]);
        assert_eq!(encoded(&Value::Int16(-2)), [0xFE, 0xFF]);
        assert_eq!(encoded(&Value::Bool(true)), [1]);
    }

    #[test]
    fn string_is_length_prefixed_without_nul() {
        let bytes = encoded(&Value::from("xor"));
        assert_eq!(&bytes[..8], &3u64.to_le_bytes());
        assert_eq!(&bytes[8..], b"xor");
    }

    #[test]
    fn decode_advances_cursor() {
        let mut data = encoded(&Value::Uint16(7));
        data.extend(encoded(&Value::from("ab")));
        let mut pos = 0;
        assert_eq!(decode(GGUFValueType::Uint16, &data, &mut pos).unwrap(), Value::Uint16(7));
        assert_eq!(pos, 2);
        assert_eq!(decode(GGUFValueType::String, &data, &mut pos).unwrap(), Value::from("ab"));
        assert_eq!(pos, data.len());
    }

    #[test]
    fn empty_array_is_valid() {
        let arr = Value::from(Vec::<u32>::new());
        let bytes = encoded(&arr);
        assert_eq!(bytes.len(), 12);
        let mut pos = 0;
        let back = decode(GGUFValueType::Array, &bytes, &mut pos).unwrap();
        assert_eq!(back, arr);
        assert_eq!(back.as_array().unwrap().element_type(), GGUFValueType::Uint32);
    }

    #[test]
    fn string_length_past_end_is_malformed() {
        let mut data = 100u64.to_le_bytes().to_vec();
        data.extend_from_slice(b"short");
        let err = decode(GGUFValueType::String, &data, &mut 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
    }

    #[test]
    fn array_count_past_end_is_malformed() {
        let mut data = (GGUFValueType::Uint64 as u32).to_le_bytes().to_vec();
        data.extend_from_slice(&u64::MAX.to_le_bytes());
        data.extend_from_slice(&[0u8; 16]);
        let err = decode(GGUFValueType::Array, &data, &mut 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
    }

    #[test]
    fn nested_array_tag_is_rejected() {
        let mut data = (GGUFValueType::Array as u32).to_le_bytes().to_vec();
        data.extend_from_slice(&0u64.to_le_bytes());
        let err = decode(GGUFValueType::Array, &data, &mut 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
    }

    #[test]
    fn short_scalar_is_truncation() {
        let err = decode(GGUFValueType::Uint64, &[1, 2, 3], &mut 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TruncatedFile);
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let mut data = 2u64.to_le_bytes().to_vec();
        data.extend_from_slice(&[0xC3, 0x28]);
        let err = decode(GGUFValueType::String, &data, &mut 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedValue);
    }

    #[test]
    fn array_rejects_mixed_elements() {
        let mut arr = ValueArray::new(GGUFValueType::Int32).unwrap();
        arr.push(Value::Int32(1)).unwrap();
        assert!(arr.push(Value::Uint32(1)).is_err());
        assert_eq!(arr.len(), 1);
        assert!(ValueArray::new(GGUFValueType::Array).is_err());
    }

    #[test]
    fn encoded_len_matches_encoding() {
        let values = [
            Value::Uint8(1),
            Value::Float64(0.5),
            Value::from("tokenizer"),
            Value::from(vec!["a", "bc", ""]),
            Value::from(vec![1i16, 2, 3]),
        ];
        for v in &values {
            assert_eq!(v.encoded_len(), encoded(v).len() as u64, "{v:?}");
        }
    }
}

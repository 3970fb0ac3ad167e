//! Element types and their HDF5 storage types.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use hdaq_format::datatype::Datatype;
use hdaq_format::FormatError;

/// The closed set of element types a dataset or attribute can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Int32,
    Float32,
    Float64,
    Bool,
    /// Unsigned machine size, stored as 64 bits.
    Size,
}

impl ElementType {
    /// HDF5 storage type for this element type.
    pub fn native_type(self) -> Datatype {
        match self {
            ElementType::Int32 => Datatype::integer(4, true),
            ElementType::Float32 => Datatype::float32(),
            ElementType::Float64 => Datatype::float64(),
            ElementType::Bool => Datatype::integer(1, false),
            ElementType::Size => Datatype::integer(8, false),
        }
    }

    /// Bytes per stored element.
    pub fn size(self) -> usize {
        match self {
            ElementType::Bool => 1,
            ElementType::Int32 | ElementType::Float32 => 4,
            ElementType::Float64 | ElementType::Size => 8,
        }
    }

    /// Element type of an existing dataset, if its storage type is one
    /// this crate writes.
    pub fn from_datatype(datatype: &Datatype) -> Option<ElementType> {
        [
            ElementType::Int32,
            ElementType::Float32,
            ElementType::Float64,
            ElementType::Bool,
            ElementType::Size,
        ]
        .into_iter()
        .find(|t| t.native_type() == *datatype)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Int32 => write!(f, "int32"),
            ElementType::Float32 => write!(f, "float32"),
            ElementType::Float64 => write!(f, "float64"),
            ElementType::Bool => write!(f, "bool"),
            ElementType::Size => write!(f, "size"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A Rust value that can be stored in a dataset or attribute.
///
/// `i32`, `f32`, `f64`, `bool`, `usize` and `u64` map to their own element
/// type. The remaining integer primitives are stored as `Float64`.
pub trait Element: Copy + sealed::Sealed {
    const ELEMENT_TYPE: ElementType;

    /// Append the little-endian encoding of `self` as `ELEMENT_TYPE`.
    fn write_le(self, out: &mut Vec<u8>);
}

impl sealed::Sealed for i32 {}
impl Element for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int32;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl sealed::Sealed for f32 {}
impl Element for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Float32;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl sealed::Sealed for f64 {}
impl Element for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float64;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl sealed::Sealed for bool {}
impl Element for bool {
    const ELEMENT_TYPE: ElementType = ElementType::Bool;
    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }
}

impl sealed::Sealed for usize {}
impl Element for usize {
    const ELEMENT_TYPE: ElementType = ElementType::Size;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self as u64).to_le_bytes());
    }
}

impl sealed::Sealed for u64 {}
impl Element for u64 {
    const ELEMENT_TYPE: ElementType = ElementType::Size;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

macro_rules! float64_fallback {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {
                const ELEMENT_TYPE: ElementType = ElementType::Float64;
                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&f64::from(self).to_le_bytes());
                }
            }
        )*
    };
}

float64_fallback!(i8, i16, u8, u16, u32);

impl sealed::Sealed for i64 {}
impl Element for i64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float64;
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self as f64).to_le_bytes());
    }
}

/// Encode values in their storage representation.
pub(crate) fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::ELEMENT_TYPE.size());
    for &v in values {
        v.write_le(&mut out);
    }
    out
}

/// Values read back from a dataset unit or an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Values {
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Bool(Vec<bool>),
    Size(Vec<u64>),
}

impl Values {
    pub(crate) fn decode(element_type: ElementType, bytes: &[u8]) -> Result<Values, FormatError> {
        let size = element_type.size();
        if bytes.len() % size != 0 {
            return Err(FormatError::DataSizeMismatch {
                expected: bytes.len() / size * size,
                actual: bytes.len(),
            });
        }
        let n = bytes.len() / size;
        Ok(match element_type {
            ElementType::Int32 => {
                let mut out = vec![0; n];
                LittleEndian::read_i32_into(bytes, &mut out);
                Values::Int32(out)
            }
            ElementType::Float32 => {
                let mut out = vec![0.0; n];
                LittleEndian::read_f32_into(bytes, &mut out);
                Values::Float32(out)
            }
            ElementType::Float64 => {
                let mut out = vec![0.0; n];
                LittleEndian::read_f64_into(bytes, &mut out);
                Values::Float64(out)
            }
            ElementType::Bool => Values::Bool(bytes.iter().map(|&b| b != 0).collect()),
            ElementType::Size => {
                let mut out = vec![0; n];
                LittleEndian::read_u64_into(bytes, &mut out);
                Values::Size(out)
            }
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Values::Int32(_) => ElementType::Int32,
            Values::Float32(_) => ElementType::Float32,
            Values::Float64(_) => ElementType::Float64,
            Values::Bool(_) => ElementType::Bool,
            Values::Size(_) => ElementType::Size,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Values::Int32(v) => v.len(),
            Values::Float32(v) => v.len(),
            Values::Float64(v) => v.len(),
            Values::Bool(v) => v.len(),
            Values::Size(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every value widened to `f64`; booleans become 0.0 or 1.0.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Values::Int32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Float32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Values::Float64(v) => v.clone(),
            Values::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
            Values::Size(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_types() {
        assert_eq!(ElementType::Int32.native_type(), Datatype::integer(4, true));
        assert_eq!(ElementType::Bool.native_type(), Datatype::integer(1, false));
        assert_eq!(ElementType::Size.native_type(), Datatype::integer(8, false));
        assert_eq!(ElementType::Float32.native_type().type_size(), 4);
        for t in [
            ElementType::Int32,
            ElementType::Float32,
            ElementType::Float64,
            ElementType::Bool,
            ElementType::Size,
        ] {
            assert_eq!(t.native_type().type_size() as usize, t.size());
            assert_eq!(ElementType::from_datatype(&t.native_type()), Some(t));
        }
    }

    #[test]
    fn unknown_storage_type() {
        assert_eq!(ElementType::from_datatype(&Datatype::integer(2, true)), None);
    }

    #[test]
    fn rust_types_map_to_element_types() {
        assert_eq!(<i32 as Element>::ELEMENT_TYPE, ElementType::Int32);
        assert_eq!(<f32 as Element>::ELEMENT_TYPE, ElementType::Float32);
        assert_eq!(<bool as Element>::ELEMENT_TYPE, ElementType::Bool);
        assert_eq!(<usize as Element>::ELEMENT_TYPE, ElementType::Size);
        assert_eq!(<u64 as Element>::ELEMENT_TYPE, ElementType::Size);
    }

    #[test]
    fn other_integers_fall_back_to_f64() {
        assert_eq!(<i16 as Element>::ELEMENT_TYPE, ElementType::Float64);
        assert_eq!(<u8 as Element>::ELEMENT_TYPE, ElementType::Float64);
        assert_eq!(<i64 as Element>::ELEMENT_TYPE, ElementType::Float64);
        let bytes = encode(&[3u16, 7]);
        assert_eq!(
            Values::decode(ElementType::Float64, &bytes).unwrap(),
            Values::Float64(vec![3.0, 7.0])
        );
    }

    #[test]
    fn decode_each_type() {
        assert_eq!(
            Values::decode(ElementType::Int32, &encode(&[-1i32, 2])).unwrap(),
            Values::Int32(vec![-1, 2])
        );
        assert_eq!(
            Values::decode(ElementType::Bool, &encode(&[true, false])).unwrap(),
            Values::Bool(vec![true, false])
        );
        assert_eq!(
            Values::decode(ElementType::Size, &encode(&[5usize])).unwrap(),
            Values::Size(vec![5])
        );
        assert_eq!(
            Values::decode(ElementType::Float32, &encode(&[0.5f32])).unwrap().to_f64(),
            vec![0.5]
        );
    }

    #[test]
    fn ragged_bytes_rejected() {
        assert!(matches!(
            Values::decode(ElementType::Float64, &[0; 12]),
            Err(FormatError::DataSizeMismatch { .. })
        ));
    }
}

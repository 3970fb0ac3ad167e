//! HDF5 Datatype message (type 0x0003): fixed-point and IEEE floating-point.

use crate::bytes::Reader;
use crate::error::FormatError;

/// Byte order of numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Numeric datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    /// Class 0: integers.
    FixedPoint {
        size: u32,
        byte_order: ByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    /// Class 1: floating point.
    FloatingPoint {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
}

impl Datatype {
    /// Little-endian integer of `size` bytes.
    pub fn integer(size: u32, signed: bool) -> Self {
        Datatype::FixedPoint {
            size,
            byte_order: ByteOrder::LittleEndian,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    /// IEEE 754 binary32, little-endian.
    pub fn float32() -> Self {
        Datatype::FloatingPoint {
            size: 4,
            byte_order: ByteOrder::LittleEndian,
            bit_offset: 0,
            bit_precision: 32,
            exponent_location: 23,
            exponent_size: 8,
            mantissa_location: 0,
            mantissa_size: 23,
            exponent_bias: 127,
        }
    }

    /// IEEE 754 binary64, little-endian.
    pub fn float64() -> Self {
        Datatype::FloatingPoint {
            size: 8,
            byte_order: ByteOrder::LittleEndian,
            bit_offset: 0,
            bit_precision: 64,
            exponent_location: 52,
            exponent_size: 11,
            mantissa_location: 0,
            mantissa_size: 52,
            exponent_bias: 1023,
        }
    }

    /// Size in bytes of one element.
    pub fn type_size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. } | Datatype::FloatingPoint { size, .. } => *size,
        }
    }

    /// Datatype class code: 0 for fixed point, 1 for floating point.
    pub fn class(&self) -> u8 {
        match self {
            Datatype::FixedPoint { .. } => 0,
            Datatype::FloatingPoint { .. } => 1,
        }
    }

    /// Parse a datatype message. Returns the datatype and bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Datatype, usize), FormatError> {
        let mut r = Reader::new(data);
        let class_and_version = r.u8()?;
        let bf0 = r.u8()?;
        let _bf1 = r.u8()?;
        let _bf2 = r.u8()?;
        let size = r.u32()?;
        let byte_order = if bf0 & 0x01 == 0 {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        };

        let datatype = match class_and_version & 0x0F {
            0 => Datatype::FixedPoint {
                size,
                byte_order,
                signed: bf0 & 0x08 != 0,
                bit_offset: r.u16()?,
                bit_precision: r.u16()?,
            },
            1 => {
                if bf0 & 0x40 != 0 {
                    // VAX ordering
                    return Err(FormatError::UnsupportedDatatypeClass(1));
                }
                Datatype::FloatingPoint {
                    size,
                    byte_order,
                    bit_offset: r.u16()?,
                    bit_precision: r.u16()?,
                    exponent_location: r.u8()?,
                    exponent_size: r.u8()?,
                    mantissa_location: r.u8()?,
                    mantissa_size: r.u8()?,
                    exponent_bias: r.u32()?,
                }
            }
            class => return Err(FormatError::UnsupportedDatatypeClass(class)),
        };
        Ok((datatype, r.position()))
    }

    /// Serialize as a version 1 datatype message.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Datatype::FixedPoint {
                size,
                byte_order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let mut bf0 = 0u8;
                if *byte_order == ByteOrder::BigEndian {
                    bf0 |= 0x01;
                }
                if *signed {
                    bf0 |= 0x08;
                }
                let mut buf = header(self.class(), [bf0, 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf
            }
            Datatype::FloatingPoint {
                size,
                byte_order,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                // bits 4-5 = 2: implied leading mantissa bit
                let mut bf0 = 0x20u8;
                if *byte_order == ByteOrder::BigEndian {
                    bf0 |= 0x01;
                }
                // second byte is the sign bit position
                let sign_location = bit_precision.saturating_sub(1) as u8;
                let mut buf = header(self.class(), [bf0, sign_location, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf.push(*exponent_location);
                buf.push(*exponent_size);
                buf.push(*mantissa_location);
                buf.push(*mantissa_size);
                buf.extend_from_slice(&exponent_bias.to_le_bytes());
                buf
            }
        }
    }
}

fn header(class: u8, bit_field: [u8; 3], size: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(20);
    buf.push((1 << 4) | class);
    buf.extend_from_slice(&bit_field);
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_encoding() {
        let bytes = Datatype::integer(4, true).serialize();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[0], 0x10);
        assert_eq!(bytes[1], 0x08);
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        let (dt, used) = Datatype::parse(&bytes).unwrap();
        assert_eq!(used, 12);
        assert_eq!(dt, Datatype::integer(4, true));
    }

    #[test]
    fn unsigned_byte_roundtrip() {
        let dt = Datatype::integer(1, false);
        let (parsed, _) = Datatype::parse(&dt.serialize()).unwrap();
        assert_eq!(parsed, dt);
        assert_eq!(parsed.type_size(), 1);
    }

    #[test]
    fn float_sign_location_tracks_precision() {
        let f32_bytes = Datatype::float32().serialize();
        let f64_bytes = Datatype::float64().serialize();
        assert_eq!(f32_bytes[0], 0x11);
        assert_eq!(f32_bytes[1], 0x20);
        assert_eq!(f32_bytes[2], 31);
        assert_eq!(f64_bytes[2], 63);
        assert_eq!(f64_bytes.len(), 20);
    }

    #[test]
    fn float_roundtrip() {
        for dt in [Datatype::float32(), Datatype::float64()] {
            let (parsed, used) = Datatype::parse(&dt.serialize()).unwrap();
            assert_eq!(parsed, dt);
            assert_eq!(used, 20);
        }
    }

    #[test]
    fn big_endian_flag() {
        let dt = Datatype::FixedPoint {
            size: 2,
            byte_order: ByteOrder::BigEndian,
            signed: false,
            bit_offset: 0,
            bit_precision: 16,
        };
        let bytes = dt.serialize();
        assert_eq!(bytes[1] & 0x01, 0x01);
        assert_eq!(Datatype::parse(&bytes).unwrap().0, dt);
    }

    #[test]
    fn string_class_rejected() {
        let mut bytes = vec![0x13, 0, 0, 0];
        bytes.extend_from_slice(&8u32.to_le_bytes());
        assert_eq!(
            Datatype::parse(&bytes),
            Err(FormatError::UnsupportedDatatypeClass(3))
        );
    }

    #[test]
    fn truncated_float() {
        let bytes = Datatype::float64().serialize();
        assert!(matches!(
            Datatype::parse(&bytes[..14]),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}

//! HDF5 Attribute message (type 0x000C), stored compactly in the object
//! header of the object it annotates.

use crate::bytes::Reader;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::FormatError;

/// A named, typed value attached to a group or dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMessage {
    /// Attribute name.
    pub name: String,
    /// Element datatype.
    pub datatype: Datatype,
    /// Shape of the value.
    pub dataspace: Dataspace,
    /// Raw little-endian element bytes.
    pub raw_data: Vec<u8>,
}

impl AttributeMessage {
    /// One-dimensional attribute holding `raw_data.len() / type_size`
    /// elements.
    pub fn new(name: impl Into<String>, datatype: Datatype, raw_data: Vec<u8>) -> Self {
        let count = raw_data.len() as u64 / u64::from(datatype.type_size().max(1));
        Self {
            name: name.into(),
            datatype,
            dataspace: Dataspace::simple(&[count]),
            raw_data,
        }
    }

    /// Parse a version 1, 2 or 3 attribute message.
    pub fn parse(data: &[u8], length_size: u8) -> Result<AttributeMessage, FormatError> {
        let mut r = Reader::new(data);
        let version = r.u8()?;
        if !(1..=3).contains(&version) {
            return Err(FormatError::InvalidAttributeVersion(version));
        }
        let flags = r.u8()?;
        if version > 1 && flags & 0x03 != 0 {
            // shared datatype or dataspace
            return Err(FormatError::UnsupportedMessage(0x000C));
        }
        let name_size = r.u16()? as usize;
        let datatype_size = r.u16()? as usize;
        let dataspace_size = r.u16()? as usize;
        if version == 3 {
            r.skip(1)?; // name character set
        }
        // Version 1 pads each field to a multiple of eight bytes.
        let padded = |n: usize| if version == 1 { (n + 7) & !7 } else { n };

        let name_bytes = r.bytes(padded(name_size))?;
        let name_end = name_bytes[..name_size]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_size);
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let (datatype, _) = Datatype::parse(&r.bytes(padded(datatype_size))?[..datatype_size])?;
        let dataspace = Dataspace::parse(
            &r.bytes(padded(dataspace_size))?[..dataspace_size],
            length_size,
        )?;

        let data_len = dataspace.num_elements() as usize * datatype.type_size() as usize;
        let raw_data = r.bytes(data_len)?.to_vec();

        Ok(AttributeMessage {
            name,
            datatype,
            dataspace,
            raw_data,
        })
    }

    /// Serialize as a version 3 attribute message with an ASCII name.
    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let mut name = self.name.as_bytes().to_vec();
        name.push(0);
        let dt = self.datatype.serialize();
        let ds = self.dataspace.serialize(length_size);

        let mut buf = Vec::with_capacity(9 + name.len() + dt.len() + ds.len() + self.raw_data.len());
        buf.push(3);
        buf.push(0);
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        buf.push(0); // ASCII
        buf.extend_from_slice(&name);
        buf.extend_from_slice(&dt);
        buf.extend_from_slice(&ds);
        buf.extend_from_slice(&self.raw_data);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doubles(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn v3_roundtrip() {
        let attr = AttributeMessage::new("gain", Datatype::float64(), doubles(&[1.5, -2.0]));
        assert_eq!(attr.dataspace.dimensions, vec![2]);
        let bytes = attr.serialize(8);
        assert_eq!(bytes[0], 3);
        assert_eq!(AttributeMessage::parse(&bytes, 8).unwrap(), attr);
    }

    #[test]
    fn v1_padded_fields() {
        let dt = Datatype::integer(4, true).serialize();
        let ds = Dataspace::simple(&[1]).serialize(8);
        let mut bytes = vec![1, 0];
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&(dt.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(ds.len() as u16).to_le_bytes());
        bytes.extend_from_slice(b"id\0\0\0\0\0\0");
        bytes.extend_from_slice(&dt);
        bytes.resize(bytes.len() + ((dt.len() + 7) & !7) - dt.len(), 0);
        bytes.extend_from_slice(&ds);
        bytes.resize(bytes.len() + ((ds.len() + 7) & !7) - ds.len(), 0);
        bytes.extend_from_slice(&42i32.to_le_bytes());

        let attr = AttributeMessage::parse(&bytes, 8).unwrap();
        assert_eq!(attr.name, "id");
        assert_eq!(attr.datatype, Datatype::integer(4, true));
        assert_eq!(attr.raw_data, 42i32.to_le_bytes().to_vec());
    }

    #[test]
    fn truncated_value() {
        let attr = AttributeMessage::new("a", Datatype::float32(), vec![0; 8]);
        let bytes = attr.serialize(8);
        assert!(matches!(
            AttributeMessage::parse(&bytes[..bytes.len() - 1], 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn unknown_version() {
        assert_eq!(
            AttributeMessage::parse(&[4, 0, 0, 0], 8),
            Err(FormatError::InvalidAttributeVersion(4))
        );
    }
}

//! Version 2 object headers: writer and parser.

use crate::bytes::{self, Reader};
use crate::error::FormatError;
use crate::message_type::MessageType;

/// Message flag: the message is constant.
pub const MSG_FLAG_CONSTANT: u8 = 0x01;

/// Message flag: readers that do not understand the message must fail.
const MSG_FLAG_MUST_UNDERSTAND: u8 = 0x08;

/// A single parsed header message.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMessage {
    /// The message type.
    pub msg_type: MessageType,
    /// Message flags byte.
    pub flags: u8,
    /// Raw message data bytes.
    pub data: Vec<u8>,
}

/// Parsed version 2 object header.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    /// Object header flags.
    pub flags: u8,
    /// All non-NIL messages from chunk 0 and its continuation chunks.
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    /// Parse the object header at `offset`, following continuation chunks.
    pub fn parse(data: &[u8], offset: usize, offset_size: u8, length_size: u8) -> Result<ObjectHeader, FormatError> {
        let mut r = Reader::at(data, offset)?;
        r.signature("OHDR")?;
        let version = r.u8()?;
        if version != 2 {
            return Err(FormatError::InvalidObjectHeaderVersion(version));
        }
        let flags = r.u8()?;
        if flags & 0x20 != 0 {
            // access, modification, change and birth times
            r.skip(16)?;
        }
        if flags & 0x10 != 0 {
            // max compact / min dense attribute counts
            r.skip(4)?;
        }
        let chunk_size_width = 1usize << (flags & 0x03);
        let chunk0_size = r.uint(chunk_size_width)? as usize;
        let start = r.position();
        let end = start.checked_add(chunk0_size).filter(|end| end.saturating_add(4) <= data.len());
        let Some(end) = end else {
            return Err(FormatError::UnexpectedEof {
                expected: start.saturating_add(chunk0_size).saturating_add(4),
                available: data.len(),
            });
        };
        bytes::verify_checksum(&data[offset..end + 4])?;

        let tracks_order = flags & 0x04 != 0;
        let mut messages = Vec::new();
        let mut pending = Vec::new();
        parse_messages(&data[start..end], tracks_order, &mut messages, &mut pending)?;

        // Continuation chunks are "OCHK" + messages + checksum.
        while let Some(cont) = pending.pop() {
            let mut cr = Reader::new(&cont);
            let cont_addr = cr.uint(offset_size as usize)? as usize;
            let cont_len = cr.uint(length_size as usize)? as usize;
            let block_end = cont_addr.checked_add(cont_len).filter(|&end| end <= data.len());
            let Some(block_end) = block_end.filter(|_| cont_len >= 8) else {
                return Err(FormatError::UnexpectedEof {
                    expected: cont_addr.saturating_add(cont_len),
                    available: data.len(),
                });
            };
            let block = &data[cont_addr..block_end];
            Reader::new(block).signature("OCHK")?;
            bytes::verify_checksum(block)?;
            parse_messages(&block[4..cont_len - 4], tracks_order, &mut messages, &mut pending)?;
        }

        Ok(ObjectHeader { flags, messages })
    }

    /// Data of the first message of the given type.
    pub fn find(&self, msg_type: MessageType) -> Option<&[u8]> {
        self.messages
            .iter()
            .find(|m| m.msg_type == msg_type)
            .map(|m| m.data.as_slice())
    }

    /// Data of every message of the given type, in header order.
    pub fn find_all(&self, msg_type: MessageType) -> impl Iterator<Item = &[u8]> {
        self.messages
            .iter()
            .filter(move |m| m.msg_type == msg_type)
            .map(|m| m.data.as_slice())
    }
}

fn parse_messages(
    chunk: &[u8],
    tracks_order: bool,
    messages: &mut Vec<HeaderMessage>,
    continuations: &mut Vec<Vec<u8>>,
) -> Result<(), FormatError> {
    let prefix = if tracks_order { 6 } else { 4 };
    let mut r = Reader::new(chunk);
    // Trailing space smaller than a message prefix is gap padding.
    while r.remaining() >= prefix {
        let raw_type = r.u8()? as u16;
        let size = r.u16()? as usize;
        let flags = r.u8()?;
        if tracks_order {
            r.skip(2)?;
        }
        let body = r.bytes(size)?;
        let msg_type = MessageType::from_u16(raw_type);
        match msg_type {
            MessageType::Nil => {}
            MessageType::ObjectHeaderContinuation => continuations.push(body.to_vec()),
            MessageType::Unknown(id) if flags & MSG_FLAG_MUST_UNDERSTAND != 0 => {
                return Err(FormatError::UnsupportedMessage(id));
            }
            _ => messages.push(HeaderMessage {
                msg_type,
                flags,
                data: body.to_vec(),
            }),
        }
    }
    Ok(())
}

/// Writer for single-chunk version 2 object headers.
#[derive(Debug, Default)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>,
}

impl ObjectHeaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message with flags 0.
    pub fn add_message(&mut self, msg_type: MessageType, data: Vec<u8>) -> Result<(), FormatError> {
        self.add_message_with_flags(msg_type, data, 0)
    }

    /// Add a message with explicit message flags.
    pub fn add_message_with_flags(&mut self, msg_type: MessageType, data: Vec<u8>, flags: u8) -> Result<(), FormatError> {
        if data.len() > u16::MAX as usize {
            return Err(FormatError::MessageTooLarge(data.len()));
        }
        self.messages.push((msg_type, data, flags));
        Ok(())
    }

    /// Serialize "OHDR" + messages + checksum.
    pub fn serialize(&self) -> Vec<u8> {
        let body_len: usize = self.messages.iter().map(|(_, d, _)| 4 + d.len()).sum();
        let (flags, width) = match body_len {
            0..=0xFF => (0x00u8, 1usize),
            0x100..=0xFFFF => (0x01, 2),
            _ => (0x02, 4),
        };

        let mut buf = Vec::with_capacity(6 + width + body_len + 4);
        buf.extend_from_slice(b"OHDR");
        buf.push(2);
        buf.push(flags);
        bytes::put_uint(&mut buf, body_len as u64, width);
        for (msg_type, data, msg_flags) in &self.messages {
            buf.push(msg_type.to_u16() as u8);
            buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
            buf.push(*msg_flags);
            buf.extend_from_slice(data);
        }
        bytes::seal(&mut buf);
        buf
    }
}

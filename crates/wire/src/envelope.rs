// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Envelope-level framing: the `message` wrapper every request or
//! response travels in, the `msg_container` used to batch several
//! messages (and, in the Query Subsystem, to rewrap a single resent
//! message under a fresh outer `msg_id`), and `gzip_packed` payload
//! compression.
use crate::serialize::{Cursor, Deserializable, DeserializeError, Identifiable, Serializable};
use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Write;

/// `msg_container#73f1f8dc messages:vector<%Message> = MessageContainer;`
pub const MESSAGE_CONTAINER_ID: u32 = 0x73f1f8dc;

/// `gzip_packed#3072cfa1 packed_data:bytes = Object;`
pub const GZIP_PACKED_ID: u32 = 0x3072cfa1;

/// `message msg_id:long seqno:int bytes:int body:Object = Message;`
///
/// The unit every logical request or response is wrapped in before
/// encryption/decryption.
#[derive(Clone, Debug)]
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// `msg_id` (8 bytes) + `seq_no` (4 bytes) + `bytes` length (4 bytes).
    pub const SIZE_OVERHEAD: usize = 16;

    /// Peek the constructor id of the body without consuming it.
    pub fn constructor_id(&self) -> Result<u32, DeserializeError> {
        u32::from_bytes(&self.body)
    }

    pub fn size(&self) -> usize {
        Self::SIZE_OVERHEAD + self.body.len()
    }
}

impl Serializable for Message {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        self.msg_id.serialize(buf);
        self.seq_no.serialize(buf);
        (self.body.len() as i32).serialize(buf);
        buf.extend(self.body.iter().copied());
    }
}

impl Deserializable for Message {
    fn deserialize(buf: &mut Cursor) -> Result<Self, DeserializeError> {
        let msg_id = i64::deserialize(buf)?;
        let seq_no = i32::deserialize(buf)?;
        let len = i32::deserialize(buf)?;
        if len < 0 {
            return Err(DeserializeError::UnexpectedEof);
        }
        let mut body = vec![0u8; len as usize];
        buf.read_exact(&mut body)?;
        Ok(Self {
            msg_id,
            seq_no,
            body,
        })
    }
}

/// `msg_container#73f1f8dc messages:vector<message> = MessageContainer;`
///
/// Used both for genuine batching and, per the alarm algorithm (spec
/// §4.4), to wrap a single previously-sent message under a fresh
/// `msg_id` when resending within the same session.
pub struct MessageContainer {
    pub messages: Vec<Message>,
}

impl MessageContainer {
    /// constructor id (4 bytes) + inner vector length (4 bytes).
    pub const SIZE_OVERHEAD: usize = 8;

    /// Maximum size in bytes for the inner payload of the container.
    /// Telegram-like servers close the connection if the payload is
    /// bigger; the container's own overhead is already subtracted.
    pub const MAXIMUM_SIZE: usize = 1_044_456 - Self::SIZE_OVERHEAD;

    /// Maximum number of messages a single container may carry,
    /// inclusive, chosen conservatively.
    pub const MAXIMUM_LENGTH: usize = 100;

    /// Wrap a single message under a container, the shape the resend
    /// algorithm needs to preserve server-side deduplication semantics
    /// while sending under a new outer `msg_id`.
    pub fn wrap_single(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }
}

impl Identifiable for MessageContainer {
    const CONSTRUCTOR_ID: u32 = MESSAGE_CONTAINER_ID;
}

impl Serializable for MessageContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        for message in &self.messages {
            message.serialize(buf);
        }
    }
}

impl Deserializable for MessageContainer {
    fn deserialize(buf: &mut Cursor) -> Result<Self, DeserializeError> {
        let constructor_id = u32::deserialize(buf)?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(DeserializeError::UnexpectedConstructor { id: constructor_id });
        }

        let len = i32::deserialize(buf)?;
        if len < 0 {
            return Err(DeserializeError::UnexpectedEof);
        }
        let len = len as usize;
        let mut messages = Vec::with_capacity(len.min(Self::MAXIMUM_LENGTH));
        for _ in 0..len {
            messages.push(Message::deserialize(buf)?);
        }
        Ok(Self { messages })
    }
}

/// `gzip_packed#3072cfa1 packed_data:bytes = Object;`
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

/// Cap on the inflated size of a response, per spec §4.1: decompression
/// is recursive at most once and the result is capped at 16 MiB.
pub const MAX_INFLATED_SIZE: usize = 16 * 1024 * 1024;

impl GzipPacked {
    pub fn new(unpacked_data: &[u8]) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        // Safe to unwrap, in-memory data never fails to compress.
        encoder.write_all(unpacked_data).unwrap();
        let packed_data = encoder.finish().unwrap();
        Self { packed_data }
    }

    /// Decompress, refusing to produce more than [`MAX_INFLATED_SIZE`]
    /// bytes: an unbounded inflate is a classic zip-bomb vector for a
    /// server-controlled payload.
    pub fn decompress(&self) -> Result<Vec<u8>, DeserializeError> {
        let mut decoder = GzDecoder::new(Vec::new());
        decoder
            .write_all(&self.packed_data)
            .map_err(|_| DeserializeError::UnexpectedEof)?;
        let out = decoder
            .finish()
            .map_err(|_| DeserializeError::UnexpectedEof)?;
        if out.len() > MAX_INFLATED_SIZE {
            return Err(DeserializeError::UnexpectedEof);
        }
        Ok(out)
    }
}

impl Identifiable for GzipPacked {
    const CONSTRUCTOR_ID: u32 = GZIP_PACKED_ID;
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: &mut Cursor) -> Result<Self, DeserializeError> {
        let constructor_id = u32::deserialize(buf)?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(DeserializeError::UnexpectedConstructor { id: constructor_id });
        }
        let packed_data = Vec::<u8>::deserialize(buf)?;
        Ok(Self { packed_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let packed = GzipPacked::new(&original);
        assert_eq!(packed.decompress().unwrap(), original);
    }

    #[test]
    fn container_round_trip() {
        let container = MessageContainer {
            messages: vec![
                Message {
                    msg_id: 1,
                    seq_no: 1,
                    body: vec![1, 2, 3, 4],
                },
                Message {
                    msg_id: 2,
                    seq_no: 3,
                    body: vec![5, 6, 7, 8],
                },
            ],
        };
        let bytes = container.to_bytes();
        let mut cursor = Cursor::from_slice(&bytes);
        let decoded = MessageContainer::deserialize(&mut cursor).unwrap();
        assert_eq!(decoded.messages.len(), 2);
        assert_eq!(decoded.messages[0].msg_id, 1);
        assert_eq!(decoded.messages[1].msg_id, 2);
    }

    #[test]
    fn wrap_single_preserves_original_ids() {
        let original = Message {
            msg_id: 555,
            seq_no: 3,
            body: vec![9, 9, 9, 9],
        };
        let wrapped = MessageContainer::wrap_single(original);
        assert_eq!(wrapped.messages[0].msg_id, 555);
        assert_eq!(wrapped.messages[0].seq_no, 3);
    }
}

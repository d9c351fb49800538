use crate::error::{ClientError, Result};
use crate::message::Message;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header:
/// `[length: u32][checksum: u32][id: u64][flag: u32]`, big-endian.
pub const HEADER_LEN: usize = 20;

/// Flag bit set when the body starts with a length-prefixed attribute
/// string.
pub const FLAG_ATTRIBUTE: u32 = 0x1;

/// Decodes a packed message stream into discrete messages.
///
/// Wraps an immutable buffer and a cursor. The cursor always sits on a
/// frame boundary and can be rewound by callers to redeliver a message
/// that failed mid-processing.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    topic: String,
    base_offset: u64,
    data: Bytes,
    position: usize,
}

impl MessageDecoder {
    pub fn new(topic: impl Into<String>, data: Bytes) -> Self {
        Self {
            topic: topic.into(),
            base_offset: 0,
            data,
            position: 0,
        }
    }

    /// Partition byte offset the buffer was fetched at; decoded messages
    /// report their offset relative to it.
    pub fn with_base_offset(mut self, base_offset: u64) -> Self {
        self.base_offset = base_offset;
        self
    }

    /// Current cursor position within the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor, e.g. back to the frame boundary of a message
    /// that failed processing
    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Length of the underlying raw buffer
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// True while a complete frame remains at the cursor.
    ///
    /// A partial trailing frame means "no more data yet", not an error.
    /// A structurally invalid length is reported here as available so
    /// that `next` can surface the decode failure.
    pub fn has_next(&self) -> bool {
        if self.data.is_empty() || self.position >= self.data.len() {
            return false;
        }
        let remaining = self.data.len() - self.position;
        if remaining < HEADER_LEN {
            return false;
        }
        let mut header = &self.data[self.position..];
        let len = header.get_i32();
        if len < 0 {
            return true;
        }
        remaining - HEADER_LEN >= len as usize
    }

    /// Decode the next frame and advance the cursor past it
    pub fn next(&mut self) -> Result<Message> {
        if !self.has_next() {
            return Err(ClientError::Consumer(
                "no complete message frame remains".to_string(),
            ));
        }

        let mut header = &self.data[self.position..self.position + HEADER_LEN];
        let len = header.get_i32();
        let checksum = header.get_u32();
        let id = header.get_u64();
        let flag = header.get_u32();

        if len < 0 {
            return Err(ClientError::InvalidMessage(format!(
                "negative body length {} for message {} in topic {}",
                len, id, self.topic
            )));
        }
        let len = len as usize;
        let body_start = self.position + HEADER_LEN;
        let body = &self.data[body_start..body_start + len];

        if crc32fast::hash(body) != checksum {
            return Err(ClientError::InvalidMessage(format!(
                "checksum mismatch for message {} in topic {}",
                id, self.topic
            )));
        }

        let (attribute, payload) = if flag & FLAG_ATTRIBUTE != 0 {
            if len < 4 {
                return Err(ClientError::InvalidMessage(format!(
                    "attribute length missing for message {} in topic {}",
                    id, self.topic
                )));
            }
            let mut attr_header = &body[..4];
            let attr_len = attr_header.get_u32() as usize;
            if attr_len > len - 4 {
                return Err(ClientError::InvalidMessage(format!(
                    "attribute length {} exceeds body for message {} in topic {}",
                    attr_len, id, self.topic
                )));
            }
            let attribute = std::str::from_utf8(&body[4..4 + attr_len])
                .map_err(|_| {
                    ClientError::InvalidMessage(format!(
                        "attribute is not valid UTF-8 for message {} in topic {}",
                        id, self.topic
                    ))
                })?
                .to_string();
            (
                Some(attribute),
                self.data.slice(body_start + 4 + attr_len..body_start + len),
            )
        } else {
            (None, self.data.slice(body_start..body_start + len))
        };

        let message = Message {
            topic: self.topic.clone(),
            id,
            offset: self.base_offset + self.position as u64,
            flag,
            attribute,
            payload,
            partition: None,
        };
        self.position += HEADER_LEN + len;
        Ok(message)
    }
}

/// Encode one message frame as produced by the broker
pub fn encode_message(id: u64, flag: u32, attribute: Option<&str>, payload: &[u8]) -> Bytes {
    let mut body = BytesMut::new();
    let flag = if let Some(attribute) = attribute {
        body.put_u32(attribute.len() as u32);
        body.put_slice(attribute.as_bytes());
        flag | FLAG_ATTRIBUTE
    } else {
        flag & !FLAG_ATTRIBUTE
    };
    body.put_slice(payload);

    let checksum = crc32fast::hash(&body);
    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_u32(checksum);
    frame.put_u64(id);
    frame.put_u32(flag);
    frame.put_slice(&body);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stream_of(frames: &[Bytes]) -> Bytes {
        let mut buf = BytesMut::new();
        for frame in frames {
            buf.put_slice(frame);
        }
        buf.freeze()
    }

    #[test]
    fn test_single_message_round_trip() {
        let frame = encode_message(7, 0, None, b"payload");
        let mut decoder = MessageDecoder::new("orders", frame.clone());

        assert!(decoder.has_next());
        let message = decoder.next().unwrap();
        assert_eq!(message.id, 7);
        assert_eq!(message.offset, 0);
        assert_eq!(message.attribute, None);
        assert_eq!(&message.payload[..], b"payload");
        assert_eq!(decoder.position(), frame.len());
        assert!(!decoder.has_next());
    }

    #[test]
    fn test_attribute_round_trip() {
        let frame = encode_message(1, 0, Some("trace=abc"), b"body");
        let mut decoder = MessageDecoder::new("orders", frame);

        let message = decoder.next().unwrap();
        assert_eq!(message.flag & FLAG_ATTRIBUTE, FLAG_ATTRIBUTE);
        assert_eq!(message.attribute.as_deref(), Some("trace=abc"));
        assert_eq!(&message.payload[..], b"body");
    }

    #[test]
    fn test_multiple_messages_in_order() {
        let frames = [
            encode_message(1, 0, None, b"a"),
            encode_message(2, 0, Some("k=v"), b"bb"),
            encode_message(3, 0, None, b"ccc"),
        ];
        let mut decoder = MessageDecoder::new("orders", stream_of(&frames)).with_base_offset(100);

        let first = decoder.next().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.offset, 100);

        let second = decoder.next().unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(second.offset, 100 + frames[0].len() as u64);

        let third = decoder.next().unwrap();
        assert_eq!(third.id, 3);
        assert!(!decoder.has_next());
    }

    #[test]
    fn test_partial_trailing_frame_is_not_an_error() {
        let frame = encode_message(1, 0, None, b"complete");
        let mut truncated = BytesMut::from(&frame[..]);
        truncated.put_slice(&encode_message(2, 0, None, b"cut off")[..HEADER_LEN + 2]);
        let mut decoder = MessageDecoder::new("orders", truncated.freeze());

        assert!(decoder.has_next());
        decoder.next().unwrap();
        // Only a partial frame remains.
        assert!(!decoder.has_next());
    }

    #[test]
    fn test_empty_and_header_only_buffers() {
        let decoder = MessageDecoder::new("orders", Bytes::new());
        assert!(!decoder.has_next());

        let decoder = MessageDecoder::new("orders", Bytes::from_static(&[0u8; HEADER_LEN - 1]));
        assert!(!decoder.has_next());
    }

    #[test]
    fn test_checksum_mismatch_is_invalid() {
        let frame = encode_message(9, 0, None, b"payload");
        let mut corrupted = BytesMut::from(&frame[..]);
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        let mut decoder = MessageDecoder::new("orders", corrupted.freeze());

        assert!(decoder.has_next());
        assert!(matches!(
            decoder.next(),
            Err(ClientError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_negative_length_is_invalid() {
        let mut frame = BytesMut::new();
        frame.put_i32(-5);
        frame.put_u32(0);
        frame.put_u64(1);
        frame.put_u32(0);
        let mut decoder = MessageDecoder::new("orders", frame.freeze());

        assert!(decoder.has_next());
        assert!(matches!(
            decoder.next(),
            Err(ClientError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_attribute_length_exceeding_body_is_invalid() {
        let mut body = BytesMut::new();
        body.put_u32(100);
        body.put_slice(b"short");
        let checksum = crc32fast::hash(&body);
        let mut frame = BytesMut::new();
        frame.put_u32(body.len() as u32);
        frame.put_u32(checksum);
        frame.put_u64(1);
        frame.put_u32(FLAG_ATTRIBUTE);
        frame.put_slice(&body);
        let mut decoder = MessageDecoder::new("orders", frame.freeze());

        assert!(matches!(
            decoder.next(),
            Err(ClientError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_rewind_redecodes_same_message() {
        let frames = [
            encode_message(1, 0, None, b"a"),
            encode_message(2, 0, None, b"b"),
        ];
        let mut decoder = MessageDecoder::new("orders", stream_of(&frames));

        decoder.next().unwrap();
        let boundary = decoder.position();
        let second = decoder.next().unwrap();
        decoder.set_position(boundary);
        let redelivered = decoder.next().unwrap();
        assert_eq!(second.id, redelivered.id);
        assert_eq!(second.payload, redelivered.payload);
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            messages in prop::collection::vec(
                (
                    any::<u64>(),
                    prop::option::of("[a-zA-Z0-9=,]{0,24}"),
                    prop::collection::vec(any::<u8>(), 0..256),
                ),
                1..8,
            )
        ) {
            let frames: Vec<Bytes> = messages
                .iter()
                .map(|(id, attr, payload)| encode_message(*id, 0, attr.as_deref(), payload))
                .collect();
            let mut decoder = MessageDecoder::new("orders", stream_of(&frames));

            for (id, attr, payload) in &messages {
                prop_assert!(decoder.has_next());
                let message = decoder.next().unwrap();
                prop_assert_eq!(message.id, *id);
                prop_assert_eq!(message.attribute.as_deref(), attr.as_deref());
                prop_assert_eq!(&message.payload[..], &payload[..]);
            }
            prop_assert!(!decoder.has_next());
        }
    }
}

use std::collections::VecDeque;

use crate::enums::{ContentType, ProtocolVersion};
use crate::error::InvalidMessage;
use crate::msgs::base::Payload;
use crate::msgs::codec::{self, Codec, Reader};
use crate::msgs::handshake::HandshakeMessagePayload;
use crate::msgs::message::{Message, MessagePayload, PlainMessage};

/// Handshake type and u24 length.
const HEADER_SIZE: usize = 1 + 3;

/// The protocol permits 16MB handshake messages; nothing legitimate here
/// comes close to 64KB.
const MAX_HANDSHAKE_SIZE: usize = 0xffff;

/// Reassembles handshake messages from handshake records.
///
/// Records may split a message or carry several; each entry of `frames`
/// is exactly one parsed message.
pub struct HandshakeJoiner {
    /// Complete messages, oldest first.
    pub frames: VecDeque<Message>,

    /// Bytes of an incomplete message.
    buf: Vec<u8>,
}

impl Default for HandshakeJoiner {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeJoiner {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            buf: Vec::new(),
        }
    }

    pub fn want_message(&self, msg: &PlainMessage) -> bool {
        msg.typ == ContentType::Handshake
    }

    /// True when no partial message is pending.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Add a handshake record, queueing every message it completes.
    ///
    /// Bodies are parsed with the grammar of `version`, the version
    /// negotiated so far. Returns how many messages were queued.
    pub fn take_message(
        &mut self,
        msg: PlainMessage,
        version: ProtocolVersion,
    ) -> Result<usize, InvalidMessage> {
        // most records hold whole messages, so avoid the copy when we can
        if self.buf.is_empty() {
            self.buf = msg.payload.0;
        } else {
            self.buf
                .extend_from_slice(msg.payload.bytes());
        }

        let mut queued = 0;
        while let Some(len) = self.complete_message_len()? {
            let frame: Vec<u8> = self.buf.drain(..len).collect();
            let parsed = HandshakeMessagePayload::read_version(&mut Reader::init(&frame), version)?;
            self.frames.push_back(Message {
                version: msg.version,
                payload: MessagePayload::Handshake {
                    parsed,
                    encoded: Payload::new(frame),
                },
            });
            queued += 1;
        }

        Ok(queued)
    }

    /// Length including header of the message at the front of `buf`, if
    /// all of it has arrived.
    fn complete_message_len(&self) -> Result<Option<usize>, InvalidMessage> {
        let Some(header) = self.buf.get(..HEADER_SIZE) else {
            return Ok(None);
        };

        let body_len = usize::from(codec::u24::read_bytes(&header[1..])?);
        if body_len > MAX_HANDSHAKE_SIZE {
            return Err(InvalidMessage::HandshakePayloadTooLarge);
        }

        let total = HEADER_SIZE + body_len;
        Ok((self.buf.len() >= total).then_some(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::HandshakeType;

    fn handshake_record(bytes: &[u8]) -> PlainMessage {
        PlainMessage {
            typ: ContentType::Handshake,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(bytes.to_vec()),
        }
    }

    #[test]
    fn only_handshake_records_are_wanted() {
        let hj = HandshakeJoiner::new();
        assert!(hj.is_empty());

        let alert = PlainMessage {
            typ: ContentType::Alert,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(vec![1, 0]),
        };

        assert!(hj.want_message(&handshake_record(&[0, 0, 0, 0])));
        assert!(!hj.want_message(&alert));
    }

    #[test]
    fn one_record_two_messages() {
        let mut hj = HandshakeJoiner::new();

        // two HelloRequests
        let msg = handshake_record(&[0; 8]);
        assert_eq!(hj.take_message(msg, ProtocolVersion::TLSv1_2), Ok(2));
        assert!(hj.is_empty());

        for _ in 0..2 {
            let m = hj.frames.pop_front().unwrap();
            assert!(m.is_handshake_type(HandshakeType::HelloRequest));
        }
    }

    #[test]
    fn three_records_one_message() {
        let mut hj = HandshakeJoiner::new();

        // a 16-byte Finished: header and 4 bytes, then 11, then 1
        let msg = handshake_record(&[0x14, 0x00, 0x00, 0x10, 0x00, 0x01, 0x02, 0x03]);
        assert_eq!(hj.take_message(msg, ProtocolVersion::TLSv1_2), Ok(0));
        assert!(!hj.is_empty());

        let msg = handshake_record(&[4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14]);
        assert_eq!(hj.take_message(msg, ProtocolVersion::TLSv1_2), Ok(0));

        let msg = handshake_record(&[15]);
        assert_eq!(hj.take_message(msg, ProtocolVersion::TLSv1_2), Ok(1));
        assert!(hj.is_empty());

        let got = hj.frames.pop_front().unwrap();
        assert!(got.is_handshake_type(HandshakeType::Finished));
        let mut encoded = Vec::new();
        got.payload.encode(&mut encoded);
        assert_eq!(encoded.len(), 4 + 16);
    }

    #[test]
    fn partial_header_waits() {
        let mut hj = HandshakeJoiner::new();
        let msg = handshake_record(&[0x14, 0x00]);
        assert_eq!(hj.take_message(msg, ProtocolVersion::TLSv1_2), Ok(0));
        assert!(!hj.is_empty());
    }

    #[test]
    fn oversized_header_is_refused() {
        let mut hj = HandshakeJoiner::new();
        let msg = handshake_record(&[0x01, 0x01, 0x00, 0x00]);
        assert_eq!(
            hj.take_message(msg, ProtocolVersion::TLSv1_2),
            Err(InvalidMessage::HandshakePayloadTooLarge)
        );
    }
}

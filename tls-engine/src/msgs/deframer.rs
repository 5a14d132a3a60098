use std::collections::VecDeque;
use std::io;

use crate::error::{Error, InvalidMessage};
use crate::msgs::codec;
use crate::msgs::message::{MessageError, OpaqueMessage};

/// This deframer works to reconstruct TLS messages
/// from arbitrary-sized reads, buffering as necessary.
/// The input is `read()`, the output is the `frames` deque.
pub struct MessageDeframer {
    /// Completed frames for output.
    pub frames: VecDeque<OpaqueMessage>,

    /// Set if the peer is not talking TLS, but some other
    /// protocol.  The caller should abort the connection, because
    /// the deframer cannot recover.
    pub desynced: Option<Error>,

    /// The currently-accumulating TLS message.
    buf: Vec<u8>,
}

impl Default for MessageDeframer {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDeframer {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            desynced: None,
            buf: Vec::new(),
        }
    }

    /// Read some bytes from `rd`, and add them to our internal
    /// buffer.  If this means our internal buffer contains
    /// full messages, decode them all.
    pub fn read(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        // Never buffer more than one maximal record beyond what we have
        // already deframed.
        let want = OpaqueMessage::MAX_WIRE_SIZE.saturating_sub(self.buf.len());
        if want == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "message buffer full",
            ));
        }

        let used = self.buf.len();
        self.buf.resize(used + want, 0u8);
        let new_bytes = match rd.read(&mut self.buf[used..]) {
            Ok(n) => n,
            Err(e) => {
                self.buf.truncate(used);
                return Err(e);
            }
        };
        self.buf.truncate(used + new_bytes);

        while self.desynced.is_none() && self.try_deframe_one() {}

        Ok(new_bytes)
    }

    /// Returns true if we have messages for the caller
    /// to process, either whole messages in our output
    /// queue or partial messages in our buffer.
    pub fn has_pending(&self) -> bool {
        !self.frames.is_empty() || !self.buf.is_empty()
    }

    /// Try to deframe one record off the front of `buf`.  Returns true if a
    /// record was produced.
    fn try_deframe_one(&mut self) -> bool {
        let mut rd = codec::Reader::init(&self.buf);

        match OpaqueMessage::read(&mut rd) {
            Ok(m) => {
                let used = rd.used();
                self.frames.push_back(m);
                self.buf.drain(..used);
                true
            }
            Err(MessageError::TooShortForHeader) | Err(MessageError::TooShortForLength) => false,
            Err(err) => {
                self.desynced = Some(Error::InvalidMessage(match err {
                    MessageError::InvalidEmptyPayload => InvalidMessage::InvalidEmptyPayload,
                    MessageError::MessageTooLarge => InvalidMessage::MessageTooLarge,
                    MessageError::InvalidContentType => InvalidMessage::InvalidContentType,
                    _ => InvalidMessage::UnknownProtocolVersion,
                }));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ContentType, ProtocolVersion};

    fn input_bytes(d: &mut MessageDeframer, bytes: &[u8]) -> io::Result<usize> {
        let mut rd = io::Cursor::new(bytes);
        d.read(&mut rd)
    }

    #[test]
    fn deframes_across_reads() {
        let record = OpaqueMessage::new(
            ContentType::Handshake,
            ProtocolVersion::TLSv1_2,
            vec![1, 2, 3, 4],
        )
        .encode();

        let mut d = MessageDeframer::new();
        assert_eq!(input_bytes(&mut d, &record[..3]).unwrap(), 3);
        assert!(d.frames.is_empty());
        assert!(d.has_pending());

        input_bytes(&mut d, &record[3..]).unwrap();
        assert_eq!(d.frames.len(), 1);
        assert!(d.desynced.is_none());

        let m = d.frames.pop_front().unwrap();
        assert_eq!(m.payload.0, vec![1, 2, 3, 4]);
        assert!(!d.has_pending());
    }

    #[test]
    fn two_records_in_one_read() {
        let mut both = OpaqueMessage::new(
            ContentType::Alert,
            ProtocolVersion::TLSv1_2,
            vec![1, 0],
        )
        .encode();
        both.extend(
            OpaqueMessage::new(ContentType::ApplicationData, ProtocolVersion::TLSv1_2, vec![9])
                .encode(),
        );

        let mut d = MessageDeframer::new();
        input_bytes(&mut d, &both).unwrap();
        assert_eq!(d.frames.len(), 2);
    }

    #[test]
    fn garbage_desyncs() {
        let mut d = MessageDeframer::new();
        input_bytes(&mut d, b"GET / HTTP/1.1\r\n").unwrap();
        assert!(d.desynced.is_some());
        assert!(d.frames.is_empty());
    }
}

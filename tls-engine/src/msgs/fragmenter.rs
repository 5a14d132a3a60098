use crate::enums::{ContentType, ProtocolVersion};
use crate::error::Error;
use crate::msgs::message::{BorrowedPlainMessage, PlainMessage};

/// Largest plaintext a single record may carry (RFC8446 5.1).
pub(crate) const MAX_FRAGMENT_LEN: usize = 16384;
/// Record header: content type, version, length.
pub(crate) const PACKET_OVERHEAD: usize = 1 + 2 + 2;
pub(crate) const MAX_FRAGMENT_SIZE: usize = MAX_FRAGMENT_LEN + PACKET_OVERHEAD;

/// Smallest record size a caller may configure.
const MIN_FRAGMENT_SIZE: usize = 32;

/// Splits outgoing messages into records of a bounded size.
pub struct MessageFragmenter {
    /// Payload bytes per record, excluding the header.
    payload_limit: usize,
}

impl Default for MessageFragmenter {
    fn default() -> Self {
        Self {
            payload_limit: MAX_FRAGMENT_LEN,
        }
    }
}

impl MessageFragmenter {
    /// Borrowed records covering all of `msg`, in order.
    pub fn fragment_message<'a>(
        &self,
        msg: &'a PlainMessage,
    ) -> impl Iterator<Item = BorrowedPlainMessage<'a>> + 'a {
        self.fragment_slice(msg.typ, msg.version, &msg.payload.0)
    }

    pub(crate) fn fragment_slice<'a>(
        &self,
        typ: ContentType,
        version: ProtocolVersion,
        payload: &'a [u8],
    ) -> impl Iterator<Item = BorrowedPlainMessage<'a>> + 'a {
        payload
            .chunks(self.payload_limit)
            .map(move |payload| BorrowedPlainMessage {
                typ,
                version,
                payload,
            })
    }

    /// Limit records to `size` bytes including the header, or to the
    /// protocol maximum for `None`.
    ///
    /// Sizes outside 32..=16389 give [`Error::BadMaxFragmentSize`].
    pub fn set_max_fragment_size(&mut self, size: Option<usize>) -> Result<(), Error> {
        let size = size.unwrap_or(MAX_FRAGMENT_SIZE);
        if !(MIN_FRAGMENT_SIZE..=MAX_FRAGMENT_SIZE).contains(&size) {
            return Err(Error::BadMaxFragmentSize);
        }
        self.payload_limit = size - PACKET_OVERHEAD;
        Ok(())
    }
}

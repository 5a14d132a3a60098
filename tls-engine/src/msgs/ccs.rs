use crate::error::InvalidMessage;
use crate::msgs::codec::{Codec, Reader};

/// The single-byte ChangeCipherSpec body. Only the value 1 exists.
#[derive(Clone, Debug)]
pub struct ChangeCipherSpecPayload;

impl Codec for ChangeCipherSpecPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(1);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        match u8::read(r)? {
            1 => r
                .expect_empty("ChangeCipherSpecPayload")
                .map(|_| Self),
            _ => Err(InvalidMessage::InvalidCcs),
        }
    }
}

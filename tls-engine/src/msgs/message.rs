use crate::enums::{AlertDescription, ContentType, HandshakeType, ProtocolVersion};
use crate::error::{Error, InvalidMessage};
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::base::Payload;
use crate::msgs::ccs::ChangeCipherSpecPayload;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::AlertLevel;
use crate::msgs::handshake::HandshakeMessagePayload;

/// A record body, decoded according to its content type.
#[derive(Clone, Debug)]
pub enum MessagePayload {
    Alert(AlertMessagePayload),
    /// Handshake messages keep their original bytes for the transcript.
    Handshake {
        parsed: HandshakeMessagePayload,
        encoded: Payload,
    },
    ChangeCipherSpec(ChangeCipherSpecPayload),
    ApplicationData(Payload),
}

impl MessagePayload {
    pub fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            Self::Alert(alert) => alert.encode(bytes),
            Self::Handshake { encoded, .. } => bytes.extend_from_slice(encoded.bytes()),
            Self::ChangeCipherSpec(ccs) => ccs.encode(bytes),
            Self::ApplicationData(data) => data.encode(bytes),
        }
    }

    pub fn handshake(parsed: HandshakeMessagePayload) -> Self {
        let encoded = Payload::new(parsed.get_encoding());
        Self::Handshake { parsed, encoded }
    }

    /// Decode `payload` as a `typ` body. Handshake parsing depends on the
    /// record version.
    pub fn new(
        typ: ContentType,
        vers: ProtocolVersion,
        payload: Payload,
    ) -> Result<Self, InvalidMessage> {
        let mut r = Reader::init(&payload.0);
        Ok(match typ {
            ContentType::ApplicationData => Self::ApplicationData(payload),
            ContentType::Alert => Self::Alert(AlertMessagePayload::read(&mut r)?),
            ContentType::Handshake => {
                let parsed = HandshakeMessagePayload::read_version(&mut r, vers)?;
                Self::Handshake {
                    parsed,
                    encoded: payload,
                }
            }
            ContentType::ChangeCipherSpec => {
                Self::ChangeCipherSpec(ChangeCipherSpecPayload::read(&mut r)?)
            }
            _ => return Err(InvalidMessage::InvalidContentType),
        })
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Alert(_) => ContentType::Alert,
            Self::Handshake { .. } => ContentType::Handshake,
            Self::ChangeCipherSpec(_) => ContentType::ChangeCipherSpec,
            Self::ApplicationData(_) => ContentType::ApplicationData,
        }
    }
}

/// A record as it appears on the wire: header fields plus a body that may
/// still be encrypted.
#[derive(Clone, Debug)]
pub struct OpaqueMessage {
    pub typ: ContentType,
    pub version: ProtocolVersion,
    pub payload: Payload,
}

impl OpaqueMessage {
    /// Largest record body accepted: 2^14 bytes plus room for AEAD
    /// expansion.
    const MAX_PAYLOAD: u16 = 16384 + 2048;

    /// Content type, version and length.
    pub(crate) const HEADER_SIZE: u16 = 1 + 2 + 2;

    /// Largest record on the wire, header included.
    pub const MAX_WIRE_SIZE: usize = (Self::MAX_PAYLOAD + Self::HEADER_SIZE) as usize;

    pub fn new(typ: ContentType, version: ProtocolVersion, payload: Vec<u8>) -> Self {
        Self {
            typ,
            version,
            payload: Payload::new(payload),
        }
    }

    /// Read one record from the front of `r`.
    ///
    /// `TooShortForHeader` and `TooShortForLength` mean more input may yet
    /// complete the record; every other error is final.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, MessageError> {
        let (typ, version, len) = Self::read_header(r)?;
        let mut body = r
            .sub(usize::from(len))
            .map_err(|_| MessageError::TooShortForLength)?;

        Ok(Self {
            typ,
            version,
            payload: Payload::read(&mut body),
        })
    }

    fn read_header(r: &mut Reader<'_>) -> Result<(ContentType, ProtocolVersion, u16), MessageError> {
        let short = |_| MessageError::TooShortForHeader;

        let typ = ContentType::read(r).map_err(short)?;
        if matches!(typ, ContentType::Unknown(_)) {
            return Err(MessageError::InvalidContentType);
        }

        // unknown versions are tolerated in the record header if they are 3.x
        let version = ProtocolVersion::read(r).map_err(short)?;
        if let ProtocolVersion::Unknown(v) = version {
            if v >> 8 != 0x03 {
                return Err(MessageError::UnknownProtocolVersion);
            }
        }

        let len = u16::read(r).map_err(short)?;
        // only application data may be empty (RFC8446 5.1, RFC5246 6.2.1)
        if len == 0 && typ != ContentType::ApplicationData {
            return Err(MessageError::InvalidEmptyPayload);
        }
        if len >= Self::MAX_PAYLOAD {
            return Err(MessageError::MessageTooLarge);
        }

        Ok((typ, version, len))
    }

    pub fn encode(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(usize::from(Self::HEADER_SIZE) + self.payload.0.len());
        self.typ.encode(&mut buf);
        self.version.encode(&mut buf);
        (self.payload.0.len() as u16).encode(&mut buf);
        buf.extend_from_slice(&self.payload.0);
        buf
    }

    /// Treat the body as plaintext. Only valid before any decrypter is
    /// installed.
    pub fn into_plain_message(self) -> PlainMessage {
        let Self {
            typ,
            version,
            payload,
        } = self;
        PlainMessage {
            typ,
            version,
            payload,
        }
    }
}

impl From<Message> for PlainMessage {
    fn from(msg: Message) -> Self {
        let typ = msg.payload.content_type();
        let payload = match msg.payload {
            MessagePayload::ApplicationData(payload) => payload,
            other => {
                let mut buf = Vec::new();
                other.encode(&mut buf);
                Payload(buf)
            }
        };

        Self {
            typ,
            version: msg.version,
            payload,
        }
    }
}

/// A record body in the clear, not yet parsed.
#[derive(Clone, Debug)]
pub struct PlainMessage {
    pub typ: ContentType,
    pub version: ProtocolVersion,
    pub payload: Payload,
}

impl PlainMessage {
    pub fn into_unencrypted_opaque(self) -> OpaqueMessage {
        let Self {
            typ,
            version,
            payload,
        } = self;
        OpaqueMessage {
            typ,
            version,
            payload,
        }
    }

    pub fn borrow(&self) -> BorrowedPlainMessage<'_> {
        BorrowedPlainMessage {
            typ: self.typ,
            version: self.version,
            payload: self.payload.bytes(),
        }
    }
}

/// A parsed message.
#[derive(Clone, Debug)]
pub struct Message {
    pub version: ProtocolVersion,
    pub payload: MessagePayload,
}

impl Message {
    pub fn is_handshake_type(&self, hstyp: HandshakeType) -> bool {
        self.handshake_type() == Some(hstyp)
    }

    pub fn handshake_type(&self) -> Option<HandshakeType> {
        match &self.payload {
            MessagePayload::Handshake { parsed, .. } => Some(parsed.typ),
            _ => None,
        }
    }

    pub fn build_alert(level: AlertLevel, desc: AlertDescription) -> Self {
        let alert = AlertMessagePayload {
            level,
            description: desc,
        };
        Self {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Alert(alert),
        }
    }

    pub fn build_change_cipher_spec() -> Self {
        Self {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload),
        }
    }

    pub fn build_handshake(version: ProtocolVersion, parsed: HandshakeMessagePayload) -> Self {
        Self {
            version,
            payload: MessagePayload::handshake(parsed),
        }
    }
}

impl TryFrom<PlainMessage> for Message {
    type Error = Error;

    fn try_from(plain: PlainMessage) -> Result<Self, Self::Error> {
        let payload = MessagePayload::new(plain.typ, plain.version, plain.payload)?;
        Ok(Self {
            version: plain.version,
            payload,
        })
    }
}

/// A cleartext record body borrowed from elsewhere, typically one
/// fragment of an outgoing message.
#[derive(Debug)]
pub struct BorrowedPlainMessage<'a> {
    pub typ: ContentType,
    pub version: ProtocolVersion,
    pub payload: &'a [u8],
}

impl BorrowedPlainMessage<'_> {
    pub fn to_unencrypted_opaque(&self) -> OpaqueMessage {
        OpaqueMessage::new(self.typ, self.version, self.payload.to_vec())
    }
}

/// Why a record header could not be read.
#[derive(Debug, PartialEq)]
pub enum MessageError {
    TooShortForHeader,
    TooShortForLength,
    InvalidEmptyPayload,
    MessageTooLarge,
    InvalidContentType,
    UnknownProtocolVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_records_want_more_data() {
        let msg = OpaqueMessage::new(ContentType::Alert, ProtocolVersion::TLSv1_2, vec![1, 0])
            .encode();

        for len in 0..5 {
            assert_eq!(
                OpaqueMessage::read(&mut Reader::init(&msg[..len])).unwrap_err(),
                MessageError::TooShortForHeader
            );
        }
        assert_eq!(
            OpaqueMessage::read(&mut Reader::init(&msg[..6])).unwrap_err(),
            MessageError::TooShortForLength
        );
        assert!(OpaqueMessage::read(&mut Reader::init(&msg)).is_ok());
    }

    #[test]
    fn rejects_bad_headers() {
        assert_eq!(
            OpaqueMessage::read(&mut Reader::init(&[0x99, 0x03, 0x03, 0x00, 0x01, 0x00]))
                .unwrap_err(),
            MessageError::InvalidContentType
        );
        assert_eq!(
            OpaqueMessage::read(&mut Reader::init(&[0x16, 0x04, 0x03, 0x00, 0x01, 0x00]))
                .unwrap_err(),
            MessageError::UnknownProtocolVersion
        );
        assert_eq!(
            OpaqueMessage::read(&mut Reader::init(&[0x16, 0x03, 0x03, 0x00, 0x00])).unwrap_err(),
            MessageError::InvalidEmptyPayload
        );
        assert_eq!(
            OpaqueMessage::read(&mut Reader::init(&[0x17, 0x03, 0x03, 0xff, 0xff])).unwrap_err(),
            MessageError::MessageTooLarge
        );
    }

    #[test]
    fn alert_decode_failure_is_reported() {
        let plain = PlainMessage {
            typ: ContentType::Alert,
            version: ProtocolVersion::TLSv1_2,
            payload: Payload::new(vec![0x02]),
        };
        assert!(matches!(
            Message::try_from(plain),
            Err(Error::InvalidMessage(InvalidMessage::MissingData(_)))
        ));
    }
}

use crate::enums::{ContentType, HandshakeType};
use crate::error::Error;
#[cfg(feature = "logging")]
use crate::log::warn;
use crate::msgs::message::{Message, MessagePayload};

/// For a Message $m, and a HandshakePayload enum member $payload_type,
/// return Ok(payload) if $m is both a handshake message and one that
/// has the given $payload_type.  If not, return Err(Error) quoting
/// $handshake_type as the expected handshake type.
macro_rules! require_handshake_msg(
  ( $m:expr, $handshake_type:path, $payload_type:path ) => (
    match &$m.payload {
        $crate::msgs::message::MessagePayload::Handshake { parsed, .. } => match &parsed.payload {
            $payload_type(hm) => Ok(hm),
            _ => Err($crate::error::Error::InappropriateHandshakeMessage {
                     expect_types: vec![ $handshake_type ],
                     got_type: parsed.typ})
        }
        payload => Err($crate::error::Error::InappropriateMessage {
                 expect_types: vec![ $crate::enums::ContentType::Handshake ],
                 got_type: payload.content_type()})
    }
  )
);

/// Like require_handshake_msg, but moves the payload out of $m.
macro_rules! require_handshake_msg_move(
  ( $m:expr, $handshake_type:path, $payload_type:path ) => (
    match $m.payload {
        $crate::msgs::message::MessagePayload::Handshake { parsed, .. } => match parsed.payload {
            $payload_type(hm) => Ok(hm),
            _ => Err($crate::error::Error::InappropriateHandshakeMessage {
                     expect_types: vec![ $handshake_type ],
                     got_type: parsed.typ})
        }
        payload => Err($crate::error::Error::InappropriateMessage {
                 expect_types: vec![ $crate::enums::ContentType::Handshake ],
                 got_type: payload.content_type()})
    }
  )
);

/// For handshake messages with no body, where there is no payload to
/// hand back: succeed only if `m` is a handshake message of type `typ`.
pub(crate) fn require_empty_handshake(m: &Message, typ: HandshakeType) -> Result<(), Error> {
    if m.is_handshake_type(typ) {
        return Ok(());
    }
    Err(inappropriate_handshake_message(
        m,
        &[ContentType::Handshake],
        &[typ],
    ))
}

pub(crate) fn inappropriate_message(payload: &MessagePayload, content_types: &[ContentType]) -> Error {
    warn!(
        "Received a {:?} message while expecting {:?}",
        payload.content_type(),
        content_types
    );
    Error::InappropriateMessage {
        expect_types: content_types.to_vec(),
        got_type: payload.content_type(),
    }
}

pub(crate) fn inappropriate_handshake_message(
    m: &Message,
    content_types: &[ContentType],
    handshake_types: &[HandshakeType],
) -> Error {
    match m.handshake_type() {
        Some(got_type) => {
            warn!(
                "Received a {:?} handshake message while expecting {:?}",
                got_type, handshake_types
            );
            Error::InappropriateHandshakeMessage {
                expect_types: handshake_types.to_vec(),
                got_type,
            }
        }
        None => inappropriate_message(&m.payload, content_types),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::ProtocolVersion;
    use crate::msgs::base::Payload;
    use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};

    fn finished() -> Message {
        Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(Payload::new(vec![1, 2, 3])),
            },
        )
    }

    #[test]
    fn require_matches_payload() {
        let m = finished();
        let got = require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)
            .unwrap();
        assert_eq!(got.bytes(), &[1, 2, 3]);

        let err = require_handshake_msg!(m, HandshakeType::Certificate, HandshakePayload::Certificate);
        assert!(err.is_err());
    }

    #[test]
    fn bodiless_handshake_messages() {
        let done = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::ServerHelloDone,
                payload: HandshakePayload::ServerHelloDone,
            },
        );
        assert_eq!(
            require_empty_handshake(&done, HandshakeType::ServerHelloDone),
            Ok(())
        );
        assert_eq!(
            require_empty_handshake(&finished(), HandshakeType::ServerHelloDone),
            Err(Error::InappropriateHandshakeMessage {
                expect_types: vec![HandshakeType::ServerHelloDone],
                got_type: HandshakeType::Finished,
            })
        );
        assert!(matches!(
            require_empty_handshake(
                &Message::build_change_cipher_spec(),
                HandshakeType::ServerHelloDone
            ),
            Err(Error::InappropriateMessage { .. })
        ));
    }

    #[test]
    fn wrong_content_type_is_reported() {
        let m = Message::build_change_cipher_spec();
        assert_eq!(
            require_handshake_msg_move!(m, HandshakeType::Finished, HandshakePayload::Finished)
                .unwrap_err(),
            Error::InappropriateMessage {
                expect_types: vec![ContentType::Handshake],
                got_type: ContentType::ChangeCipherSpec,
            }
        );
    }

    #[test]
    fn inappropriate_handshake_message_names_type() {
        assert_eq!(
            inappropriate_handshake_message(
                &finished(),
                &[ContentType::Handshake],
                &[HandshakeType::Certificate]
            ),
            Error::InappropriateHandshakeMessage {
                expect_types: vec![HandshakeType::Certificate],
                got_type: HandshakeType::Finished,
            }
        );
    }
}

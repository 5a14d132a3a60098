use std::error::Error as StdError;
use std::fmt;

use crate::crypto::GetRandomFailed;
use crate::enums::{AlertDescription, ContentType, HandshakeType};

/// Everything that can go wrong on a connection.
///
/// Most variants correspond to an alert sent to the peer; see the
/// `AlertDescription` conversion below.
#[non_exhaustive]
#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// A record of a content type the current state does not accept.
    InappropriateMessage {
        /// Content types the state would have accepted.
        expect_types: Vec<ContentType>,
        /// The content type that arrived.
        got_type: ContentType,
    },

    /// A handshake message out of order.
    InappropriateHandshakeMessage {
        /// Handshake types the state would have accepted.
        expect_types: Vec<HandshakeType>,
        /// The handshake type that arrived.
        got_type: HandshakeType,
    },

    /// A message that could not be parsed.
    InvalidMessage(InvalidMessage),

    /// An incoming record failed authentication. Always fatal.
    DecryptError,

    /// An outgoing record could not be sealed: either it was too big, or
    /// the write sequence space is used up.
    EncryptError,

    /// The peer lacks something this side insists on.
    PeerIncompatible(PeerIncompatible),

    /// The peer broke the protocol.
    PeerMisbehaved(PeerMisbehaved),

    /// The peer sent a fatal alert.
    AlertReceived(AlertDescription),

    /// Certificate verification failed.
    InvalidCertificate(CertificateError),

    /// Anything else, described in prose.
    General(String),

    /// The random source failed.
    FailedToGetRandomBytes,

    /// The operation needs a finished handshake.
    HandshakeNotComplete,

    /// An incoming record exceeded the size limit.
    PeerSentOversizedRecord,

    /// No application protocol in common.
    NoApplicationProtocol,

    /// No configured certificate fits the client's offer.
    NoSuitableCertificate,

    /// `max_fragment_size` is out of range.
    BadMaxFragmentSize,

    /// The API was called in a way, or an order, that cannot work.
    ApiMisuse(ApiMisuse),
}

/// The alert to send for a local error. Errors without one (`Err(())`)
/// close the connection silently.
impl TryFrom<&Error> for AlertDescription {
    type Error = ();

    fn try_from(error: &Error) -> Result<Self, Self::Error> {
        let alert = match error {
            Error::DecryptError => Self::BadRecordMac,
            Error::InappropriateMessage { .. } | Error::InappropriateHandshakeMessage { .. } => {
                Self::UnexpectedMessage
            }
            Error::InvalidCertificate(e) => Self::from(e),
            Error::InvalidMessage(e) => Self::from(*e),
            Error::NoApplicationProtocol => Self::NoApplicationProtocol,
            Error::PeerMisbehaved(e) => Self::from(*e),
            Error::PeerIncompatible(e) => Self::from(*e),
            Error::PeerSentOversizedRecord => Self::RecordOverflow,
            Error::NoSuitableCertificate => Self::HandshakeFailure,
            Error::FailedToGetRandomBytes | Error::General(_) => Self::InternalError,
            _ => return Err(()),
        };
        Ok(alert)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InappropriateMessage {
                expect_types,
                got_type,
            } => write!(
                f,
                "expected a {} record, got {got_type:?}",
                join(expect_types)
            ),
            Self::InappropriateHandshakeMessage {
                expect_types,
                got_type,
            } => write!(
                f,
                "expected handshake message {}, got {got_type:?}",
                join(expect_types)
            ),
            Self::InvalidMessage(why) => write!(f, "malformed message: {why:?}"),
            Self::PeerIncompatible(why) => write!(f, "incompatible peer: {why:?}"),
            Self::PeerMisbehaved(why) => write!(f, "protocol violation by peer: {why:?}"),
            Self::AlertReceived(alert) => write!(f, "peer sent fatal alert {alert:?}"),
            Self::InvalidCertificate(why) => write!(f, "certificate rejected: {why:?}"),
            Self::DecryptError => f.write_str("record failed to decrypt"),
            Self::EncryptError => f.write_str("record could not be encrypted"),
            Self::PeerSentOversizedRecord => f.write_str("peer sent an oversized record"),
            Self::HandshakeNotComplete => f.write_str("handshake still in progress"),
            Self::NoApplicationProtocol => f.write_str("no application protocol in common"),
            Self::NoSuitableCertificate => f.write_str("no certificate fits the client's offer"),
            Self::FailedToGetRandomBytes => f.write_str("random source failed"),
            Self::BadMaxFragmentSize => f.write_str("max_fragment_size out of range"),
            Self::ApiMisuse(why) => write!(f, "api misuse: {why:?}"),
            Self::General(msg) => write!(f, "tls error: {msg}"),
        }
    }
}

fn join<T: fmt::Debug>(items: &[T]) -> String {
    let names: Vec<String> = items
        .iter()
        .map(|item| format!("{item:?}"))
        .collect();
    names.join(" or ")
}

impl StdError for Error {}

impl From<CertificateError> for Error {
    #[inline]
    fn from(e: CertificateError) -> Self {
        Self::InvalidCertificate(e)
    }
}

impl From<InvalidMessage> for Error {
    #[inline]
    fn from(e: InvalidMessage) -> Self {
        Self::InvalidMessage(e)
    }
}

impl From<PeerMisbehaved> for Error {
    #[inline]
    fn from(e: PeerMisbehaved) -> Self {
        Self::PeerMisbehaved(e)
    }
}

impl From<PeerIncompatible> for Error {
    #[inline]
    fn from(e: PeerIncompatible) -> Self {
        Self::PeerIncompatible(e)
    }
}

impl From<ApiMisuse> for Error {
    #[inline]
    fn from(e: ApiMisuse) -> Self {
        Self::ApiMisuse(e)
    }
}

impl From<GetRandomFailed> for Error {
    fn from(_: GetRandomFailed) -> Self {
        Self::FailedToGetRandomBytes
    }
}

/// Why a message failed to parse.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidMessage {
    /// Certificate message over the 64KiB limit.
    CertificatePayloadTooLarge,
    /// A handshake message claimed a length beyond the limit.
    HandshakePayloadTooLarge,
    /// ChangeCipherSpec body other than a single 1.
    InvalidCcs,
    /// Record content type not known.
    InvalidContentType,
    /// Unknown certificate status type.
    InvalidCertificateStatusType,
    /// ServerDHParams with an empty prime, generator or public value.
    InvalidDhParams,
    /// Empty record of a kind that must carry data.
    InvalidEmptyPayload,
    /// KeyUpdate with an undefined request value.
    InvalidKeyUpdate,
    /// Undecodable server_name entry.
    InvalidServerName,
    /// Record payload over the protocol limit.
    MessageTooLarge,
    /// Ran out of bytes mid-message.
    MessageTooShort,
    /// The named field was absent.
    MissingData(&'static str),
    /// No key exchange groups offered.
    MissingKeyExchange,
    /// Empty signature scheme list.
    NoSignatureSchemes,
    /// Bytes left over after the named field.
    TrailingData(&'static str),
    /// A message of the named kind where none is allowed.
    UnexpectedMessage(&'static str),
    /// Version field not known.
    UnknownProtocolVersion,
    /// Compression other than null.
    UnsupportedCompression,
    /// ECParameters curve type other than named_curve.
    UnsupportedCurveType,
    /// NewSessionTicket with an empty ticket.
    EmptyTicketValue,
    /// The named list must not be empty.
    IllegalEmptyList(&'static str),
    /// The same extension type appeared twice.
    DuplicateExtension(u16),
    /// pre_shared_key was not the last ClientHello extension.
    PreSharedKeyIsNotFinalExtension,
}

impl From<InvalidMessage> for AlertDescription {
    fn from(e: InvalidMessage) -> Self {
        match e {
            InvalidMessage::PreSharedKeyIsNotFinalExtension => Self::IllegalParameter,
            InvalidMessage::CertificatePayloadTooLarge => Self::BadCertificate,
            _ => Self::DecodeError,
        }
    }
}

/// Protocol violations detected in the peer's messages.
///
/// The names describe the violation; callers are not expected to branch
/// on them.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PeerMisbehaved {
    AttemptedDowngradeToTls12WhenTls13IsSupported,
    BadCertChainExtensions,
    ExtensionNotAllowedInMessage,
    HandshakeHashVariedAfterRetry,
    /// Alert level neither warning nor fatal.
    IllegalAlertLevel(u8, AlertDescription),
    IllegalHelloRetryRequestWithNoChanges,
    IllegalHelloRetryRequestWithOfferedGroup,
    IllegalHelloRetryRequestWithUnofferedCipherSuite,
    IllegalHelloRetryRequestWithUnofferedNamedGroup,
    IllegalHelloRetryRequestWithUnsupportedVersion,
    IllegalHelloRetryRequestWithWrongSessionId,
    IllegalMiddleboxChangeCipherSpec,
    IllegalTlsInnerPlaintext,
    /// An alert that must be fatal arrived as a warning.
    IllegalWarningAlert(AlertDescription),
    InappropriateFallback,
    IncorrectBinder,
    IncorrectFinished,
    InvalidKeyShare,
    InvalidRenegotiationInfo,
    KeyEpochWithPendingFragment,
    MissingBinderInPskExtension,
    MissingKeyShare,
    MissingPskModesExtension,
    NoCertificatesPresented,
    OfferedDuplicateKeyShares,
    OfferedEmptyApplicationProtocol,
    OfferedEmptyCipherSuites,
    OfferedIncorrectCompressions,
    PskExtensionWithMismatchedIdsAndBinders,
    RefusedToFollowHelloRetryRequest,
    RenegotiationWithoutSecureRenegotiation,
    ResumptionOfferedWithVariedCipherSuite,
    SecondHelloRetryRequest,
    SelectedDifferentCipherSuiteAfterRetry,
    SelectedInvalidPsk,
    SelectedTls12UsingTls13VersionExtension,
    SelectedUnofferedApplicationProtocol,
    SelectedUnofferedCipherSuite,
    SelectedUnofferedCompression,
    SelectedUnofferedKxGroup,
    SelectedUnofferedPsk,
    SelectedUnofferedVersion,
    SelectedUnusableCipherSuiteForVersion,
    ServerEchoedCompatibilitySessionId,
    ServerEchoedWrongSessionId,
    ServerHelloMustOfferUncompressedEcPoints,
    ServerNameMustContainOneHostName,
    SignedKxWithWrongAlgorithm,
    SignedHandshakeWithUnadvertisedSigScheme,
    TooManyEmptyFragments,
    TooManyKeyUpdateRequests,
    TooManyRenegotiationRequests,
    TooManyWarningAlertsReceived,
    TooMuchEarlyDataReceived,
    UnsolicitedExtension,
    UnsupportedCriticalExtension,
    WrongGroupForKeyShare,
}

impl From<PeerMisbehaved> for AlertDescription {
    fn from(e: PeerMisbehaved) -> Self {
        match e {
            PeerMisbehaved::UnsolicitedExtension
            | PeerMisbehaved::UnsupportedCriticalExtension => Self::UnsupportedExtension,

            PeerMisbehaved::IllegalMiddleboxChangeCipherSpec
            | PeerMisbehaved::KeyEpochWithPendingFragment
            | PeerMisbehaved::TooManyEmptyFragments
            | PeerMisbehaved::TooManyWarningAlertsReceived
            | PeerMisbehaved::TooManyKeyUpdateRequests
            | PeerMisbehaved::TooManyRenegotiationRequests
            | PeerMisbehaved::IllegalTlsInnerPlaintext => Self::UnexpectedMessage,

            PeerMisbehaved::IllegalWarningAlert(_) => Self::DecodeError,

            PeerMisbehaved::IncorrectBinder | PeerMisbehaved::IncorrectFinished => {
                Self::DecryptError
            }

            PeerMisbehaved::InappropriateFallback => Self::InappropriateFallback,

            PeerMisbehaved::InvalidRenegotiationInfo
            | PeerMisbehaved::RenegotiationWithoutSecureRenegotiation => Self::HandshakeFailure,

            PeerMisbehaved::MissingKeyShare | PeerMisbehaved::MissingPskModesExtension => {
                Self::MissingExtension
            }

            PeerMisbehaved::NoCertificatesPresented => Self::CertificateRequired,

            _ => Self::IllegalParameter,
        }
    }
}

/// Features this side requires that the peer does not offer.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PeerIncompatible {
    ExtendedMasterSecretExtensionRequired,
    KeyShareExtensionRequired,
    NamedGroupsExtensionRequired,
    NoCertificateRequestSignatureSchemesInCommon,
    NoCipherSuitesInCommon,
    NoEcPointFormatsInCommon,
    NoKxGroupsInCommon,
    NoSignatureSchemesInCommon,
    NullCompressionRequired,
    ServerDoesNotSupportTls12Or13,
    ServerTlsVersionIsDisabledByOurConfig,
    SignatureAlgorithmsExtensionRequired,
    SupportedVersionsExtensionRequired,
    Tls12NotOffered,
    Tls12NotOfferedOrEnabled,
    UncompressedEcPointsRequired,
}

impl From<PeerIncompatible> for AlertDescription {
    fn from(e: PeerIncompatible) -> Self {
        match e {
            PeerIncompatible::NullCompressionRequired => Self::DecodeError,

            PeerIncompatible::ServerTlsVersionIsDisabledByOurConfig
            | PeerIncompatible::SupportedVersionsExtensionRequired
            | PeerIncompatible::Tls12NotOffered
            | PeerIncompatible::Tls12NotOfferedOrEnabled
            | PeerIncompatible::ServerDoesNotSupportTls12Or13 => Self::ProtocolVersion,

            PeerIncompatible::KeyShareExtensionRequired
            | PeerIncompatible::NamedGroupsExtensionRequired
            | PeerIncompatible::SignatureAlgorithmsExtensionRequired => Self::MissingExtension,

            PeerIncompatible::UncompressedEcPointsRequired => Self::IllegalParameter,

            _ => Self::HandshakeFailure,
        }
    }
}

/// Verification failures a certificate verifier can report.
///
/// Each maps to a specific alert, so verifiers should pick the closest
/// variant rather than falling back to `Other`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum CertificateError {
    /// Undecodable certificate.
    BadEncoding,

    /// Past `notAfter`.
    Expired,

    /// Before `notBefore`.
    NotValidYet,

    /// Revoked by its issuer.
    Revoked,

    /// A critical extension the verifier does not understand.
    UnhandledCriticalExtension,

    /// Chain does not end at a trusted root.
    UnknownIssuer,

    /// A certificate or handshake signature did not verify.
    BadSignature,

    /// The certificate is for some other name.
    NotValidForName,

    /// Key usage forbids this use.
    InvalidPurpose,

    /// Valid, but rejected by application policy.
    ApplicationVerificationFailure,

    /// Something else.
    Other(String),
}

impl From<&CertificateError> for AlertDescription {
    fn from(e: &CertificateError) -> Self {
        use CertificateError::*;
        match e {
            BadEncoding | UnhandledCriticalExtension | NotValidForName => Self::BadCertificate,
            // certificate_expired also covers not-yet-valid
            Expired | NotValidYet => Self::CertificateExpired,
            Revoked => Self::CertificateRevoked,
            UnknownIssuer => Self::UnknownCA,
            BadSignature => Self::DecryptError,
            InvalidPurpose => Self::UnsupportedCertificate,
            ApplicationVerificationFailure => Self::AccessDenied,
            Other(_) => Self::CertificateUnknown,
        }
    }
}

/// Calls the API cannot honour in the current state.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ApiMisuse {
    /// A key schedule stage was requested before the stage it depends on.
    KeyScheduleOutOfOrder {
        stage: &'static str,
    },
    /// A key schedule stage was requested a second time.
    KeyScheduleStageRepeated {
        stage: &'static str,
    },
    /// Renegotiation was requested on a connection that cannot renegotiate.
    RenegotiationNotAvailable,
    /// A key update was requested on a connection that cannot perform one.
    KeyUpdateNotAvailable,
    /// An exporter was invoked with a label or context it cannot accept.
    ExporterInvalidInput,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_extension_is_a_decode_error() {
        let err = Error::from(InvalidMessage::DuplicateExtension(0x0a));
        assert_eq!(
            AlertDescription::try_from(&err),
            Ok(AlertDescription::DecodeError)
        );
    }

    #[test]
    fn policy_violations_map_to_handshake_failure_or_illegal_parameter() {
        assert_eq!(
            AlertDescription::try_from(&Error::from(PeerIncompatible::NoCipherSuitesInCommon)),
            Ok(AlertDescription::HandshakeFailure)
        );
        assert_eq!(
            AlertDescription::try_from(&Error::from(PeerMisbehaved::SecondHelloRetryRequest)),
            Ok(AlertDescription::IllegalParameter)
        );
        assert_eq!(
            AlertDescription::try_from(&Error::from(PeerMisbehaved::InappropriateFallback)),
            Ok(AlertDescription::InappropriateFallback)
        );
    }

    #[test]
    fn authentication_failures_map_to_decrypt_error_or_bad_certificate() {
        assert_eq!(
            AlertDescription::try_from(&Error::from(CertificateError::BadSignature)),
            Ok(AlertDescription::DecryptError)
        );
        assert_eq!(
            AlertDescription::try_from(&Error::from(CertificateError::BadEncoding)),
            Ok(AlertDescription::BadCertificate)
        );
        assert_eq!(
            AlertDescription::try_from(&Error::from(PeerMisbehaved::IncorrectFinished)),
            Ok(AlertDescription::DecryptError)
        );
    }

    #[test]
    fn local_conditions_send_no_alert() {
        assert!(AlertDescription::try_from(&Error::AlertReceived(AlertDescription::CloseNotify)).is_err());
        assert!(AlertDescription::try_from(&Error::EncryptError).is_err());
        assert!(AlertDescription::try_from(&Error::HandshakeNotComplete).is_err());
    }

    #[test]
    fn display() {
        let all = vec![
            Error::InappropriateMessage {
                expect_types: vec![ContentType::Alert],
                got_type: ContentType::Handshake,
            },
            Error::InappropriateHandshakeMessage {
                expect_types: vec![HandshakeType::ClientHello, HandshakeType::Finished],
                got_type: HandshakeType::ServerHello,
            },
            Error::InvalidMessage(InvalidMessage::InvalidCcs),
            Error::DecryptError,
            Error::PeerIncompatible(PeerIncompatible::Tls12NotOffered),
            Error::PeerMisbehaved(PeerMisbehaved::UnsolicitedExtension),
            Error::AlertReceived(AlertDescription::ExportRestriction),
            Error::InvalidCertificate(CertificateError::Expired),
            Error::General("undocumented error".to_string()),
            Error::FailedToGetRandomBytes,
            Error::HandshakeNotComplete,
            Error::PeerSentOversizedRecord,
            Error::NoApplicationProtocol,
            Error::BadMaxFragmentSize,
            Error::ApiMisuse(ApiMisuse::KeyScheduleStageRepeated { stage: "early" }),
        ];

        for err in all {
            println!("{:?}:", err);
            println!("  fmt '{}'", err);
        }
    }

    #[test]
    fn inappropriate_handshake_message_lists_expectations() {
        let err = Error::InappropriateHandshakeMessage {
            expect_types: vec![HandshakeType::ClientHello, HandshakeType::Finished],
            got_type: HandshakeType::ServerHello,
        };
        assert_eq!(
            err.to_string(),
            "expected handshake message ClientHello or Finished, got ServerHello"
        );
    }
}

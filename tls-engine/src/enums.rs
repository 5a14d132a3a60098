#![allow(non_camel_case_types)]
#![allow(missing_docs)]
use std::fmt;

enum_builder! {
    /// The `ProtocolVersion` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u16)]
    pub enum ProtocolVersion {
        SSLv3 => 0x0300,
        TLSv1_0 => 0x0301,
        TLSv1_1 => 0x0302,
        TLSv1_2 => 0x0303,
        TLSv1_3 => 0x0304,
    }
}

impl crate::msgs::codec::TlsListElement for ProtocolVersion {
    const SIZE_LEN: crate::msgs::codec::ListLength = crate::msgs::codec::ListLength::U8;
}

enum_builder! {
    /// The `CipherSuite` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u16)]
    pub enum CipherSuite {
        TLS_NULL_WITH_NULL_NULL => 0x0000,
        TLS_RSA_WITH_AES_128_GCM_SHA256 => 0x009c,
        TLS_RSA_WITH_AES_256_GCM_SHA384 => 0x009d,
        TLS_DHE_RSA_WITH_AES_128_GCM_SHA256 => 0x009e,
        TLS_DHE_RSA_WITH_AES_256_GCM_SHA384 => 0x009f,
        TLS_PSK_WITH_AES_128_GCM_SHA256 => 0x00a8,
        TLS_PSK_WITH_AES_256_GCM_SHA384 => 0x00a9,
        TLS_EMPTY_RENEGOTIATION_INFO_SCSV => 0x00ff,
        TLS13_AES_128_GCM_SHA256 => 0x1301,
        TLS13_AES_256_GCM_SHA384 => 0x1302,
        TLS13_CHACHA20_POLY1305_SHA256 => 0x1303,
        TLS_FALLBACK_SCSV => 0x5600,
        TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => 0xc02b,
        TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384 => 0xc02c,
        TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 => 0xc02f,
        TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384 => 0xc030,
        TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256 => 0xcca8,
        TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256 => 0xcca9,
        TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256 => 0xccaa,
        TLS_PSK_WITH_CHACHA20_POLY1305_SHA256 => 0xccab,
    }
}

impl crate::msgs::codec::TlsListElement for CipherSuite {
    const SIZE_LEN: crate::msgs::codec::ListLength = crate::msgs::codec::ListLength::U16;
}

enum_builder! {
    /// The `ContentType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u8)]
    pub enum ContentType {
        ChangeCipherSpec => 0x14,
        Alert => 0x15,
        Handshake => 0x16,
        ApplicationData => 0x17,
    }
}

enum_builder! {
    /// The `HandshakeType` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u8)]
    pub enum HandshakeType {
        HelloRequest => 0x00,
        ClientHello => 0x01,
        ServerHello => 0x02,
        NewSessionTicket => 0x04,
        EndOfEarlyData => 0x05,
        HelloRetryRequest => 0x06,
        EncryptedExtensions => 0x08,
        Certificate => 0x0b,
        ServerKeyExchange => 0x0c,
        CertificateRequest => 0x0d,
        ServerHelloDone => 0x0e,
        CertificateVerify => 0x0f,
        ClientKeyExchange => 0x10,
        Finished => 0x14,
        CertificateStatus => 0x16,
        KeyUpdate => 0x18,
        MessageHash => 0xfe,
    }
}

enum_builder! {
    /// The `AlertDescription` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u8)]
    pub enum AlertDescription {
        CloseNotify => 0x00,
        UnexpectedMessage => 0x0a,
        BadRecordMac => 0x14,
        DecryptionFailed => 0x15,
        RecordOverflow => 0x16,
        DecompressionFailure => 0x1e,
        HandshakeFailure => 0x28,
        NoCertificate => 0x29,
        BadCertificate => 0x2a,
        UnsupportedCertificate => 0x2b,
        CertificateRevoked => 0x2c,
        CertificateExpired => 0x2d,
        CertificateUnknown => 0x2e,
        IllegalParameter => 0x2f,
        UnknownCA => 0x30,
        AccessDenied => 0x31,
        DecodeError => 0x32,
        DecryptError => 0x33,
        ExportRestriction => 0x3c,
        ProtocolVersion => 0x46,
        InsufficientSecurity => 0x47,
        InternalError => 0x50,
        InappropriateFallback => 0x56,
        UserCanceled => 0x5a,
        NoRenegotiation => 0x64,
        MissingExtension => 0x6d,
        UnsupportedExtension => 0x6e,
        CertificateUnobtainable => 0x6f,
        UnrecognisedName => 0x70,
        BadCertificateStatusResponse => 0x71,
        BadCertificateHashValue => 0x72,
        UnknownPSKIdentity => 0x73,
        CertificateRequired => 0x74,
        NoApplicationProtocol => 0x78,
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // these should be:
        // - in past tense
        // - be syntactically correct if prefaced with 'the peer' to describe
        //   received alerts
        match self {
            Self::CloseNotify => write!(f, "cleanly closed the connection"),

            Self::UnexpectedMessage => write!(f, "received an unexpected message"),
            Self::BadRecordMac => write!(f, "failed to verify a message"),
            Self::RecordOverflow => write!(f, "rejected an over-length message"),
            Self::IllegalParameter => write!(
                f,
                "rejected a message because a field was incorrect or inconsistent"
            ),
            Self::DecodeError => write!(f, "failed to decode a message"),
            Self::DecryptError => {
                write!(f, "failed to perform a handshake cryptographic operation")
            }
            Self::InappropriateFallback => write!(f, "detected an attempted version downgrade"),
            Self::MissingExtension => {
                write!(f, "required a specific extension that was not provided")
            }
            Self::UnsupportedExtension => write!(f, "rejected an unsolicited extension"),

            Self::DecryptionFailed => write!(f, "failed to decrypt a message"),
            Self::DecompressionFailure => write!(f, "failed to decompress a message"),
            Self::NoCertificate => write!(f, "found no certificate"),
            Self::ExportRestriction => write!(f, "refused due to export restrictions"),
            Self::NoRenegotiation => write!(f, "rejected an attempt at renegotiation"),
            Self::CertificateUnobtainable => write!(f, "failed to retrieve its certificate"),
            Self::BadCertificateHashValue => {
                write!(f, "rejected the `certificate_hash` extension")
            }

            Self::HandshakeFailure => write!(
                f,
                "failed to negotiate an acceptable set of security parameters"
            ),
            Self::ProtocolVersion => write!(f, "did not support a suitable TLS version"),
            Self::InsufficientSecurity => {
                write!(f, "required a higher security level than was offered")
            }

            Self::BadCertificate => write!(
                f,
                "rejected the certificate as corrupt or incorrectly signed"
            ),
            Self::UnsupportedCertificate => write!(f, "did not support the certificate"),
            Self::CertificateRevoked => write!(f, "found the certificate to be revoked"),
            Self::CertificateExpired => write!(f, "found the certificate to be expired"),
            Self::CertificateUnknown => {
                write!(f, "rejected the certificate for an unspecified reason")
            }
            Self::UnknownCA => write!(f, "found the certificate was not issued by a trusted CA"),
            Self::BadCertificateStatusResponse => {
                write!(f, "rejected the certificate status response")
            }
            Self::AccessDenied => write!(f, "denied access"),
            Self::CertificateRequired => write!(f, "required a client certificate"),

            Self::InternalError => write!(f, "encountered an internal error"),
            Self::UserCanceled => write!(f, "canceled the handshake"),
            Self::UnrecognisedName => {
                write!(f, "did not recognize a name in the `server_name` extension")
            }
            Self::UnknownPSKIdentity => write!(f, "did not recognize any offered PSK identity"),
            Self::NoApplicationProtocol => write!(
                f,
                "did not support any of the offered application protocols"
            ),

            Self::Unknown(n) => write!(f, "sent an unknown alert (0x{n:02x?})"),
        }
    }
}

enum_builder! {
    /// The `SignatureScheme` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u16)]
    pub enum SignatureScheme {
        RSA_PKCS1_SHA1 => 0x0201,
        ECDSA_SHA1_Legacy => 0x0203,
        RSA_PKCS1_SHA256 => 0x0401,
        ECDSA_NISTP256_SHA256 => 0x0403,
        RSA_PKCS1_SHA384 => 0x0501,
        ECDSA_NISTP384_SHA384 => 0x0503,
        RSA_PKCS1_SHA512 => 0x0601,
        ECDSA_NISTP521_SHA512 => 0x0603,
        RSA_PSS_SHA256 => 0x0804,
        RSA_PSS_SHA384 => 0x0805,
        RSA_PSS_SHA512 => 0x0806,
        ED25519 => 0x0807,
        ED448 => 0x0808,
    }
}

impl SignatureScheme {
    pub(crate) fn algorithm(&self) -> SignatureAlgorithm {
        match *self {
            Self::RSA_PKCS1_SHA1
            | Self::RSA_PKCS1_SHA256
            | Self::RSA_PKCS1_SHA384
            | Self::RSA_PKCS1_SHA512
            | Self::RSA_PSS_SHA256
            | Self::RSA_PSS_SHA384
            | Self::RSA_PSS_SHA512 => SignatureAlgorithm::RSA,
            Self::ECDSA_SHA1_Legacy
            | Self::ECDSA_NISTP256_SHA256
            | Self::ECDSA_NISTP384_SHA384
            | Self::ECDSA_NISTP521_SHA512 => SignatureAlgorithm::ECDSA,
            Self::ED25519 => SignatureAlgorithm::ED25519,
            Self::ED448 => SignatureAlgorithm::ED448,
            _ => SignatureAlgorithm::Unknown(0),
        }
    }

    /// Whether a particular `SignatureScheme` is allowed for TLS protocol signatures
    /// in TLS1.3.
    ///
    /// This prevents (eg) RSA_PKCS1_SHA256 being offered or accepted, even if our
    /// verifier supports it for other protocol versions.
    ///
    /// See RFC8446 s4.2.3.
    pub(crate) fn supported_in_tls13(&self) -> bool {
        matches!(
            *self,
            Self::ECDSA_NISTP521_SHA512
                | Self::ECDSA_NISTP384_SHA384
                | Self::ECDSA_NISTP256_SHA256
                | Self::RSA_PSS_SHA512
                | Self::RSA_PSS_SHA384
                | Self::RSA_PSS_SHA256
                | Self::ED25519
        )
    }
}

impl crate::msgs::codec::TlsListElement for SignatureScheme {
    const SIZE_LEN: crate::msgs::codec::ListLength = crate::msgs::codec::ListLength::U16;
}

enum_builder! {
    /// The `SignatureAlgorithm` TLS protocol enum.  Values in this enum are taken
    /// from the various RFCs covering TLS, and are listed by IANA.
    /// The `Unknown` item is used when processing unrecognised ordinals.
    #[repr(u8)]
    pub enum SignatureAlgorithm {
        Anonymous => 0x00,
        RSA => 0x01,
        DSA => 0x02,
        ECDSA => 0x03,
        ED25519 => 0x07,
        ED448 => 0x08,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::codec::Codec;

    #[test]
    fn unknown_values_survive_a_roundtrip() {
        let cs = CipherSuite::read_bytes(&[0x12, 0x34]).unwrap();
        assert_eq!(cs, CipherSuite::Unknown(0x1234));
        assert_eq!(cs.get_encoding(), vec![0x12, 0x34]);
        assert_eq!(format!("{:?}", cs), "CipherSuite(0x1234)");
        assert_eq!(cs.as_str(), None);
    }

    #[test]
    fn known_values_have_names() {
        assert_eq!(
            CipherSuite::from(0x1301),
            CipherSuite::TLS13_AES_128_GCM_SHA256
        );
        assert_eq!(ProtocolVersion::TLSv1_3.to_array(), [0x03, 0x04]);
        assert_eq!(ContentType::Alert.as_str(), Some("Alert"));
    }

    #[test]
    fn tls13_signature_schemes() {
        assert!(SignatureScheme::RSA_PSS_SHA256.supported_in_tls13());
        assert!(!SignatureScheme::RSA_PKCS1_SHA256.supported_in_tls13());
        assert_eq!(
            SignatureScheme::ECDSA_NISTP256_SHA256.algorithm(),
            SignatureAlgorithm::ECDSA
        );
    }

    #[test]
    fn alert_display_reads_as_peer_action() {
        assert_eq!(
            format!("the peer {}", AlertDescription::HandshakeFailure),
            "the peer failed to negotiate an acceptable set of security parameters"
        );
    }
}

use std::sync::Arc;

use super::server_conn::ClientHello;
use super::{tls12, tls13, ServerConfig};
use crate::conn::{CommonState, NextState, NextStateOrError, State};
use crate::crypto::CertifiedKey;
use crate::enums::{CipherSuite, HandshakeType, ProtocolVersion, SignatureScheme};
use crate::error::{Error, PeerIncompatible, PeerMisbehaved};
use crate::extensions::{self, ClientExtensions};
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::msgs::enums::Compression;
use crate::msgs::handshake::{ClientHelloPayload, HandshakePayload, ProtocolName};
use crate::msgs::message::Message;
use crate::suites::{self, PreferenceOwner, SelectionCriteria, SupportedCipherSuite};

/// What a TLS1.2 client that sends no `signature_algorithms` is
/// assumed to accept (RFC5246 section 7.4.1.4.1).
static TLS12_DEFAULT_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PKCS1_SHA1,
    SignatureScheme::ECDSA_SHA1_Legacy,
];

pub(crate) fn start(config: Arc<ServerConfig>) -> NextState {
    let mut transcript = HandshakeHashBuffer::new();
    if config.verifier.offer_client_auth() {
        transcript.set_client_auth_enabled();
    }

    Box::new(ExpectClientHello {
        config,
        transcript,
        renegotiation: None,
    })
}

/// Answer a ClientHello received on an established TLS1.2 session.
pub(super) fn start_renegotiation(
    renegotiation: tls12::Renegotiation,
    common: &mut CommonState,
    client_hello: Message,
) -> NextStateOrError {
    let config = renegotiation.config();
    let mut transcript = HandshakeHashBuffer::new();
    if config.verifier.offer_client_auth() {
        transcript.set_client_auth_enabled();
    }

    debug!("Client asked to renegotiate");
    Box::new(ExpectClientHello {
        config,
        transcript,
        renegotiation: Some(renegotiation),
    })
    .handle(common, client_hello)
}

/// Everything decided from the ClientHello before the version-specific
/// handshake takes over.
pub(super) struct ClientHelloInput<'a> {
    pub(super) config: Arc<ServerConfig>,
    pub(super) message: &'a Message,
    pub(super) client_hello: &'a ClientHelloPayload,
    pub(super) exts: ClientExtensions,
    pub(super) certkey: Arc<CertifiedKey>,
    pub(super) sni: Option<String>,
    /// The transcript so far, not yet including this ClientHello.
    pub(super) transcript: HandshakeHash,
}

impl ClientHelloInput<'_> {
    /// The signature schemes the client will accept from us.
    pub(super) fn signature_schemes(&self) -> &[SignatureScheme] {
        match &self.exts.signature_schemes {
            Some(schemes) => schemes,
            None => TLS12_DEFAULT_SCHEMES,
        }
    }
}

pub(super) struct ExpectClientHello {
    config: Arc<ServerConfig>,
    transcript: HandshakeHashBuffer,
    renegotiation: Option<tls12::Renegotiation>,
}

impl ExpectClientHello {
    fn choose_version(
        &self,
        client_hello: &ClientHelloPayload,
        exts: &ClientExtensions,
    ) -> Result<ProtocolVersion, Error> {
        let tls13_enabled =
            self.config.supports_version(ProtocolVersion::TLSv1_3) && self.renegotiation.is_none();
        let tls12_enabled = self.config.supports_version(ProtocolVersion::TLSv1_2);

        let version = match &exts.supported_versions {
            Some(versions) if tls13_enabled && versions.contains(&ProtocolVersion::TLSv1_3) => {
                ProtocolVersion::TLSv1_3
            }
            Some(versions) if tls12_enabled && versions.contains(&ProtocolVersion::TLSv1_2) => {
                ProtocolVersion::TLSv1_2
            }
            Some(_) => return Err(PeerIncompatible::Tls12NotOfferedOrEnabled.into()),
            None if u16::from(client_hello.client_version) < u16::from(ProtocolVersion::TLSv1_2) => {
                return Err(PeerIncompatible::Tls12NotOffered.into());
            }
            None if tls12_enabled => ProtocolVersion::TLSv1_2,
            None => return Err(PeerIncompatible::SupportedVersionsExtensionRequired.into()),
        };

        // RFC7507: a client falling back from a failed attempt at a higher
        // version tells us so; if we support a higher version, something
        // in the middle broke that attempt.
        if version == ProtocolVersion::TLSv1_2
            && tls13_enabled
            && client_hello
                .cipher_suites
                .contains(&CipherSuite::TLS_FALLBACK_SCSV)
        {
            return Err(PeerMisbehaved::InappropriateFallback.into());
        }

        Ok(version)
    }

    fn choose_suite(
        &self,
        version: ProtocolVersion,
        client_hello: &ClientHelloPayload,
        exts: &ClientExtensions,
        certkey: &CertifiedKey,
    ) -> Result<SupportedCipherSuite, Error> {
        let their_groups = exts.named_groups.as_deref();
        let credential_algorithms = [certkey.key.algorithm()];
        let criteria = SelectionCriteria {
            version,
            min_strength_bits: self.config.min_strength_bits,
            credential_algorithms: &credential_algorithms,
            key_transport_available: certkey.key.supports_key_transport(),
            shared_ec_group: tls12::choose_ec_group(&self.config, their_groups).is_ok(),
            shared_ff_group: tls12::choose_ff_group(&self.config, their_groups).is_some(),
        };

        let owner = match self.config.ignore_client_order {
            true => PreferenceOwner::Local,
            false => PreferenceOwner::Peer,
        };

        let suite = suites::select_cipher_suite(
            &client_hello.cipher_suites,
            &self.config.suites_for(version),
            owner,
            &criteria,
        )
        .ok_or(PeerIncompatible::NoCipherSuitesInCommon)?;

        debug!("decided upon suite {:?}", suite);
        Ok(suite)
    }

    fn choose_alpn(&self, common: &mut CommonState, exts: &ClientExtensions) -> Result<(), Error> {
        common.alpn_protocol = None;
        let Some(theirs) = &exts.protocols else {
            return Ok(());
        };
        if self.config.alpn_protocols.is_empty() {
            return Ok(());
        }

        // Our preference order decides.
        let chosen = self
            .config
            .alpn_protocols
            .iter()
            .find(|ours| theirs.contains(&ProtocolName::from(ours.to_vec())))
            .ok_or(Error::NoApplicationProtocol)?;

        common.alpn_protocol = Some(chosen.clone());
        debug!("Chosen ALPN protocol {:?}", String::from_utf8_lossy(chosen));
        Ok(())
    }
}

impl State for ExpectClientHello {
    fn handle(self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        let client_hello =
            require_handshake_msg!(m, HandshakeType::ClientHello, HandshakePayload::ClientHello)?;
        trace!("we got a clienthello {:?}", client_hello);

        if !client_hello
            .compression_methods
            .contains(&Compression::Null)
        {
            return Err(PeerIncompatible::NullCompressionRequired.into());
        }

        if client_hello.cipher_suites.is_empty() {
            return Err(PeerMisbehaved::OfferedEmptyCipherSuites.into());
        }

        let exts = extensions::parse_client_hello(&client_hello.extensions)?;
        let version = self.choose_version(client_hello, &exts)?;
        common.negotiated_version = Some(version);

        let sni = exts
            .server_name
            .as_deref()
            .and_then(|name| std::str::from_utf8(name).ok())
            .map(str::to_owned);

        let signature_schemes = match (&exts.signature_schemes, version) {
            (Some(schemes), _) => schemes.as_slice(),
            (None, ProtocolVersion::TLSv1_3) => {
                return Err(PeerIncompatible::SignatureAlgorithmsExtensionRequired.into())
            }
            (None, _) => TLS12_DEFAULT_SCHEMES,
        };

        let certkey = self
            .config
            .cert_resolver
            .resolve(ClientHello {
                server_name: sni.as_deref(),
                signature_schemes,
                alpn: exts.protocols.as_deref(),
                cipher_suites: &client_hello.cipher_suites,
                named_groups: exts.named_groups.as_deref(),
            })
            .ok_or(Error::NoSuitableCertificate)?;

        let suite = self.choose_suite(version, client_hello, &exts, &certkey)?;
        self.choose_alpn(common, &exts)?;
        common.suite = Some(suite);

        let Self {
            config,
            transcript,
            renegotiation,
        } = *self;
        let transcript = transcript.start_hash(suite.hash_provider());

        let input = ClientHelloInput {
            config,
            message: &m,
            client_hello,
            exts,
            certkey,
            sni,
            transcript,
        };

        match suite {
            SupportedCipherSuite::Tls13(suite) => tls13::handle_client_hello(input, suite, common),
            SupportedCipherSuite::Tls12(suite) => {
                tls12::handle_client_hello(input, suite, renegotiation, common)
            }
        }
    }
}


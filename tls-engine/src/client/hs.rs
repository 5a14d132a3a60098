use std::sync::Arc;

use super::tls12;
use super::tls13;
use crate::client::{ClientConfig, ServerName};
use crate::conn::{CommonState, ConnectionRandoms, NextStateOrError, State};
use crate::crypto::{hash, ActiveKeyExchange};
use crate::enums::{AlertDescription, CipherSuite, ContentType, HandshakeType, ProtocolVersion};
use crate::error::{Error, PeerIncompatible, PeerMisbehaved};
use crate::extensions::{self, ClientExtensions, ExtensionContext};
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::msgs::codec::Codec;
use crate::msgs::enums::{Compression, ECPointFormat, ExtensionType, PSKKeyExchangeMode};
use crate::msgs::handshake::{
    find_extension, ClientHelloPayload, HandshakeMessagePayload, HandshakePayload, KeyShareEntry,
    PresharedKeyIdentity, PresharedKeyOffer, ProtocolName, Random, SessionId,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::session::{unix_now, ClientSessionValue, Retrieved};
use crate::suites::SupportedCipherSuite;
use crate::tls13::key_schedule::KeySchedule;
use crate::tls13::Tls13CipherSuite;

fn find_session(
    server_name: &ServerName,
    config: &ClientConfig,
) -> Option<Retrieved<ClientSessionValue>> {
    let store = &config.session_storage;
    store
        .take_tls13_ticket(server_name)
        .map(ClientSessionValue::Tls13)
        .or_else(|| {
            store
                .tls12_session(server_name)
                .map(ClientSessionValue::Tls12)
        })
        .map(|value| Retrieved::new(value, unix_now()))
        .filter(|retrieved| {
            let (suite, version) = match &retrieved.value {
                ClientSessionValue::Tls13(v) => (v.suite().common.suite, ProtocolVersion::TLSv1_3),
                ClientSessionValue::Tls12(v) => (v.suite().common.suite, ProtocolVersion::TLSv1_2),
            };
            config.supports_version(version) && config.find_cipher_suite(suite).is_some()
        })
        .filter(|retrieved| {
            retrieved
                .map(|v| Some(v))
                .is_some_and(|r| !r.has_expired())
        })
        .or_else(|| {
            debug!("No cached session for {:?}", server_name);
            None
        })
}

pub(crate) fn start_handshake(
    config: Arc<ClientConfig>,
    server_name: ServerName,
    common: &mut CommonState,
) -> NextStateOrError {
    let mut transcript_buffer = HandshakeHashBuffer::new();
    if config
        .client_auth_cert_resolver
        .has_certs()
    {
        transcript_buffer.set_client_auth_enabled();
    }

    let mut resuming = find_session(&server_name, &config);

    let key_share = if config.supports_version(ProtocolVersion::TLSv1_3) {
        Some(initial_key_share(&config, &server_name)?)
    } else {
        None
    };

    let secure_random = config.provider.secure_random;
    let mut session_id = None;
    if let Some(resuming) = &mut resuming {
        if let ClientSessionValue::Tls12(inner) = &mut resuming.value {
            // If we have a ticket, we use the sessionid as a signal that
            // we're doing an abbreviated handshake.  See section 3.4 in
            // RFC5077.
            if !inner.ticket().is_empty() {
                inner.session_id = SessionId::random(secure_random)?;
            }
            session_id = Some(inner.session_id);
        }

        debug!("Resuming session");
    } else {
        debug!("Not resuming any session");
    }

    // https://tools.ietf.org/html/rfc8446#appendix-D.4
    let session_id = match session_id {
        Some(session_id) => session_id,
        None if config.supports_version(ProtocolVersion::TLSv1_3) => {
            SessionId::random(secure_random)?
        }
        None => SessionId::empty(),
    };

    let input = ClientHelloInput {
        random: Random::new(secure_random)?,
        config,
        resuming,
        session_id,
        server_name,
        renegotiation: None,
    };

    emit_client_hello_for_retry(
        Transcript::Buffered(transcript_buffer),
        None,
        key_share,
        input,
        common,
    )
}

/// Send a fresh ClientHello under the keys of an established TLS1.2
/// session, carrying its verify data.
pub(super) fn start_renegotiation(
    renegotiation: tls12::Renegotiation,
    common: &mut CommonState,
) -> NextStateOrError {
    let config = renegotiation.config();
    let mut transcript_buffer = HandshakeHashBuffer::new();
    if config
        .client_auth_cert_resolver
        .has_certs()
    {
        transcript_buffer.set_client_auth_enabled();
    }

    debug!("Renegotiating with {:?}", renegotiation.server_name());
    let input = ClientHelloInput {
        random: Random::new(config.provider.secure_random)?,
        config,
        resuming: None,
        session_id: SessionId::empty(),
        server_name: renegotiation.server_name().clone(),
        renegotiation: Some(renegotiation),
    };

    emit_client_hello_for_retry(
        Transcript::Buffered(transcript_buffer),
        None,
        None,
        input,
        common,
    )
}

fn initial_key_share(
    config: &ClientConfig,
    server_name: &ServerName,
) -> Result<Box<dyn ActiveKeyExchange>, Error> {
    let group = config
        .session_storage
        .kx_hint(server_name)
        .and_then(|group_name| config.provider.find_kx_group(group_name))
        .or_else(|| {
            config
                .provider
                .kx_groups
                .first()
                .copied()
        })
        .ok_or_else(|| Error::General("no kx groups configured".into()))?;

    group.start()
}

/// Everything the ClientHello was built from, kept for processing the
/// server's reply.
pub(super) struct ClientHelloInput {
    pub(super) config: Arc<ClientConfig>,
    pub(super) resuming: Option<Retrieved<ClientSessionValue>>,
    pub(super) random: Random,
    pub(super) session_id: SessionId,
    pub(super) server_name: ServerName,
    pub(super) renegotiation: Option<tls12::Renegotiation>,
}

/// What a HelloRetryRequest asked us to change.
struct Retry {
    cookie: Option<Vec<u8>>,
    suite: &'static Tls13CipherSuite,
}

/// The handshake transcript before and after we know its hash function.
enum Transcript {
    Buffered(HandshakeHashBuffer),
    Started(HandshakeHash),
}

impl Transcript {
    fn add_message(&mut self, m: &Message) {
        match self {
            Self::Buffered(buffer) => buffer.add_message(m),
            Self::Started(hash) => {
                hash.add_message(m);
            }
        }
    }

    fn hash_given(&self, provider: &'static dyn hash::Hash, extra: &[u8]) -> hash::Output {
        match self {
            Self::Buffered(buffer) => buffer.get_hash_given(provider, extra),
            Self::Started(hash) => hash.get_hash_given(extra),
        }
    }

    fn start(self, provider: &'static dyn hash::Hash) -> HandshakeHash {
        match self {
            Self::Buffered(buffer) => buffer.start_hash(provider),
            Self::Started(hash) => hash,
        }
    }
}

fn emit_client_hello_for_retry(
    mut transcript: Transcript,
    retry: Option<Retry>,
    key_share: Option<Box<dyn ActiveKeyExchange>>,
    input: ClientHelloInput,
    common: &mut CommonState,
) -> NextStateOrError {
    let config = Arc::clone(&input.config);
    let renegotiating = input.renegotiation.is_some();
    let support_tls12 = config.supports_version(ProtocolVersion::TLSv1_2);
    let support_tls13 = config.supports_version(ProtocolVersion::TLSv1_3) && !renegotiating;

    let mut supported_versions = Vec::new();
    if support_tls13 {
        supported_versions.push(ProtocolVersion::TLSv1_3);
    }
    if support_tls12 {
        supported_versions.push(ProtocolVersion::TLSv1_2);
    }

    let offered_suites: Vec<CipherSuite> = config
        .provider
        .cipher_suites
        .iter()
        .filter(|cs| supported_versions.contains(&cs.version()))
        .filter(|cs| {
            cs.info()
                .is_some_and(|info| info.strength_bits >= config.min_strength_bits)
        })
        .map(|cs| cs.suite())
        .collect();
    if offered_suites.is_empty() {
        return Err(Error::General("no usable cipher suites configured".into()));
    }

    let mut cipher_suites = offered_suites.clone();
    let mut offered_extensions = Vec::new();
    if support_tls12 && !renegotiating {
        // RFC5746: the SCSV stands in for an empty renegotiation_info,
        // which the server may then send back
        cipher_suites.push(CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);
        offered_extensions.push(ExtensionType::RenegotiationInfo);
    }

    let tls13_session = match support_tls13 {
        true => input
            .resuming
            .as_ref()
            .and_then(|r| r.map(|v| v.tls13())),
        false => None,
    };
    let tls12_session = match support_tls12 {
        true => input
            .resuming
            .as_ref()
            .and_then(|r| r.tls12()),
        false => None,
    };

    let mut exts = ClientExtensions {
        renegotiation_info: input
            .renegotiation
            .as_ref()
            .map(|r| r.client_verify_data().to_vec()),
        server_name: match config.enable_sni {
            true => input
                .server_name
                .for_sni()
                .map(|name| name.as_bytes().to_vec()),
            false => None,
        },
        status_request: config.request_ocsp,
        ec_point_formats: support_tls12.then(|| ECPointFormat::SUPPORTED.to_vec()),
        session_ticket: match support_tls12 && config.enable_tickets && !renegotiating {
            true => Some(
                tls12_session
                    .map(|session| session.ticket().to_vec())
                    .unwrap_or_default(),
            ),
            false => None,
        },
        named_groups: Some(
            config
                .provider
                .kx_groups
                .iter()
                .map(|skxg| skxg.name())
                .collect(),
        ),
        signature_schemes: Some(
            config
                .provider
                .signature_verifier
                .supported_schemes(),
        ),
        protocols: match config.alpn_protocols.is_empty() {
            true => None,
            false => Some(
                config
                    .alpn_protocols
                    .iter()
                    .cloned()
                    .map(ProtocolName::from)
                    .collect(),
            ),
        },
        extended_master_secret: support_tls12,
        supported_versions: support_tls13.then(|| supported_versions.clone()),
        cookie: retry
            .as_ref()
            .and_then(|retry| retry.cookie.clone()),
        psk_modes: support_tls13.then(|| vec![PSKKeyExchangeMode::PSK_DHE_KE]),
        key_shares: key_share
            .as_ref()
            .map(|kx| vec![KeyShareEntry::new(kx.group(), kx.pub_key())]),
        early_data: false,
        padding: None,
        preshared_key_offer: None,
    };

    // A ticket whose hash differs from the suite the server retried with
    // stays in the offer, with an empty binder the server will not check.
    let mut binder = None;
    if let Some(ticket) = &tls13_session {
        let ticket_suite = ticket.suite();
        let compatible = retry.as_ref().map_or(true, |retry| {
            retry
                .suite
                .can_resume_from(ticket_suite)
                .is_some()
        });
        if compatible {
            binder = Some((ticket.secret(), ticket_suite));
        }

        exts.early_data =
            config.enable_early_data && retry.is_none() && ticket.max_early_data_size() > 0;
        exts.preshared_key_offer = Some(PresharedKeyOffer::new(
            PresharedKeyIdentity::new(ticket.ticket().to_vec(), ticket.obfuscated_ticket_age()),
            vec![0; ticket_suite.common.hash_provider.output_len()],
        ));
    }

    let mut chp = ClientHelloPayload {
        client_version: ProtocolVersion::TLSv1_2,
        random: input.random,
        session_id: input.session_id,
        cipher_suites,
        compression_methods: vec![Compression::Null],
        extensions: extensions::client_hello_extensions(&exts),
    };

    // RFC7685: keep the message out of the 256..511 byte range some
    // middleboxes mishandle.  The handshake header adds four bytes.
    if let Some(padding) = padding_len(4 + chp.get_encoding().len()) {
        exts.padding = Some(padding);
        chp.extensions = extensions::client_hello_extensions(&exts);
    }

    offered_extensions.extend(
        chp.extensions
            .iter()
            .map(|ext| ext.typ),
    );

    let mut chp = HandshakeMessagePayload {
        typ: HandshakeType::ClientHello,
        payload: HandshakePayload::ClientHello(chp),
    };

    if let Some((secret, suite)) = binder {
        fill_in_psk_binder(secret, suite, &transcript, &mut chp)?;
    }

    let ch = Message {
        // "This value MUST be set to 0x0303 for all records generated
        //  by a TLS 1.3 implementation other than an initial ClientHello
        //  (i.e., one not generated after a HelloRetryRequest)"
        version: match retry.is_some() || renegotiating {
            true => ProtocolVersion::TLSv1_2,
            false => ProtocolVersion::TLSv1_0,
        },
        payload: MessagePayload::handshake(chp),
    };

    trace!("Sending ClientHello {:#?}", ch);

    transcript.add_message(&ch);
    common.send_handshake(ch);

    Ok(Box::new(ExpectServerHello {
        input,
        transcript,
        key_share,
        offered_suites,
        offered_extensions,
        offered_tls13: support_tls13,
        retry_suite: retry.map(|retry| retry.suite),
    }))
}

/// How many bytes of padding a ClientHello of `unpadded_len` bytes needs.
fn padding_len(unpadded_len: usize) -> Option<usize> {
    match unpadded_len {
        // the extension header is four bytes
        256..=511 => Some((512 - unpadded_len).saturating_sub(4)),
        _ => None,
    }
}

fn fill_in_psk_binder(
    secret: &[u8],
    suite: &'static Tls13CipherSuite,
    transcript: &Transcript,
    hmp: &mut HandshakeMessagePayload,
) -> Result<(), Error> {
    // The binder is calculated over the clienthello, but doesn't include itself or its
    // length, or the length of its container.
    let binder_plaintext = hmp.encoding_for_binder_signing();
    let handshake_hash = transcript.hash_given(suite.common.hash_provider, &binder_plaintext);

    // Run a fake key_schedule to simulate what the server will do if it chooses
    // to resume.
    let mut key_schedule = KeySchedule::new(suite);
    key_schedule.derive_early(Some(secret))?;
    let real_binder = key_schedule.resumption_binder(&handshake_hash)?;

    if let HandshakePayload::ClientHello(ch) = &mut hmp.payload {
        ch.set_psk_binder(real_binder.as_ref());
    }

    Ok(())
}

pub(super) fn process_alpn_protocol(
    common: &mut CommonState,
    config: &ClientConfig,
    proto: Option<&ProtocolName>,
) -> Result<(), Error> {
    common.alpn_protocol = proto.map(|p| p.as_ref().to_vec());

    if let Some(alpn_protocol) = &common.alpn_protocol {
        if !config
            .alpn_protocols
            .contains(alpn_protocol)
        {
            return Err(PeerMisbehaved::SelectedUnofferedApplicationProtocol.into());
        }
    }

    debug!(
        "ALPN protocol is {:?}",
        common
            .alpn_protocol
            .as_ref()
            .map(|v| String::from_utf8_lossy(v))
    );
    Ok(())
}

struct ExpectServerHello {
    input: ClientHelloInput,
    transcript: Transcript,
    key_share: Option<Box<dyn ActiveKeyExchange>>,
    offered_suites: Vec<CipherSuite>,
    offered_extensions: Vec<ExtensionType>,
    offered_tls13: bool,
    retry_suite: Option<&'static Tls13CipherSuite>,
}

impl ExpectServerHello {
    fn handle_server_hello(self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        let server_hello =
            require_handshake_msg!(m, HandshakeType::ServerHello, HandshakePayload::ServerHello)?;
        trace!("We got ServerHello {:#?}", server_hello);

        let Self {
            input,
            transcript,
            key_share,
            offered_suites,
            offered_extensions,
            offered_tls13,
            retry_suite,
        } = *self;
        let config = Arc::clone(&input.config);

        if server_hello.compression_method != Compression::Null {
            return Err(PeerMisbehaved::SelectedUnofferedCompression.into());
        }

        let context = match find_extension(&server_hello.extensions, ExtensionType::SupportedVersions) {
            Some(_) => ExtensionContext::ServerHelloTls13,
            None => ExtensionContext::ServerHelloTls12,
        };
        let exts =
            extensions::parse_server_extensions(&server_hello.extensions, context, &offered_extensions)?;

        let version = match exts.selected_version {
            Some(ProtocolVersion::TLSv1_3) if offered_tls13 => ProtocolVersion::TLSv1_3,
            Some(ProtocolVersion::TLSv1_2) => {
                return Err(PeerMisbehaved::SelectedTls12UsingTls13VersionExtension.into())
            }
            Some(_) => return Err(PeerMisbehaved::SelectedUnofferedVersion.into()),
            None if server_hello.legacy_version == ProtocolVersion::TLSv1_2 => {
                if !config.supports_version(ProtocolVersion::TLSv1_2) {
                    return Err(PeerIncompatible::ServerTlsVersionIsDisabledByOurConfig.into());
                }
                ProtocolVersion::TLSv1_2
            }
            None => return Err(PeerIncompatible::ServerDoesNotSupportTls12Or13.into()),
        };

        if retry_suite.is_some() && version != ProtocolVersion::TLSv1_3 {
            return Err(PeerMisbehaved::SelectedUnofferedVersion.into());
        }

        // RFC8446 section 4.1.3: a TLS1.3 client must check for the
        // sentinel a TLS1.3 server writes when it negotiates lower.
        if version == ProtocolVersion::TLSv1_2
            && offered_tls13
            && server_hello.random.has_downgrade_sentinel()
        {
            return Err(PeerMisbehaved::AttemptedDowngradeToTls12WhenTls13IsSupported.into());
        }

        common.negotiated_version = Some(version);

        let suite = config
            .find_cipher_suite(server_hello.cipher_suite)
            .filter(|suite| offered_suites.contains(&suite.suite()))
            .ok_or(PeerMisbehaved::SelectedUnofferedCipherSuite)?;

        if suite.version() != version {
            return Err(PeerMisbehaved::SelectedUnusableCipherSuiteForVersion.into());
        }

        if retry_suite.is_some_and(|prev| prev.common.suite != suite.suite()) {
            return Err(PeerMisbehaved::SelectedDifferentCipherSuiteAfterRetry.into());
        }

        debug!("Using ciphersuite {:?}", suite);
        common.suite = Some(suite);

        let mut transcript = transcript.start(suite.hash_provider());
        transcript.add_message(&m);

        let randoms = ConnectionRandoms::new(input.random, server_hello.random);

        match suite {
            SupportedCipherSuite::Tls13(suite) => tls13::handle_server_hello(
                input,
                common,
                server_hello,
                exts,
                suite,
                transcript,
                key_share,
                randoms,
                retry_suite.is_some(),
                offered_extensions,
            ),
            SupportedCipherSuite::Tls12(suite) => tls12::handle_server_hello(
                input,
                common,
                server_hello,
                exts,
                suite,
                transcript,
                randoms,
            ),
        }
    }

    fn handle_hello_retry_request(
        self: Box<Self>,
        common: &mut CommonState,
        m: Message,
    ) -> NextStateOrError {
        let hrr = require_handshake_msg!(
            m,
            HandshakeType::HelloRetryRequest,
            HandshakePayload::HelloRetryRequest
        )?;
        trace!("Got HRR {:?}", hrr);

        let Self {
            input,
            transcript,
            key_share,
            offered_suites,
            offered_extensions,
            offered_tls13,
            retry_suite,
        } = *self;

        if retry_suite.is_some() {
            return Err(PeerMisbehaved::SecondHelloRetryRequest.into());
        }

        let offered_key_share = match key_share {
            Some(kx) if offered_tls13 => kx,
            _ => return Err(PeerMisbehaved::IllegalHelloRetryRequestWithUnsupportedVersion.into()),
        };

        common.check_aligned_handshake()?;

        let exts = extensions::parse_server_extensions(
            &hrr.extensions,
            ExtensionContext::HelloRetryRequest,
            &offered_extensions,
        )?;

        // A retry that changes nothing would loop forever.
        if exts.cookie.is_none() && exts.hrr_group.is_none() {
            return Err(PeerMisbehaved::IllegalHelloRetryRequestWithNoChanges.into());
        }

        // Or asks us to talk a protocol we didn't offer, or doesn't support HRR at all.
        match exts.selected_version {
            Some(ProtocolVersion::TLSv1_3) => {}
            _ => return Err(PeerMisbehaved::IllegalHelloRetryRequestWithUnsupportedVersion.into()),
        }

        // Or echoes a session id other than ours.
        if hrr.session_id != input.session_id {
            return Err(PeerMisbehaved::IllegalHelloRetryRequestWithWrongSessionId.into());
        }

        if hrr.compression_method != Compression::Null {
            return Err(PeerMisbehaved::SelectedUnofferedCompression.into());
        }

        let config = Arc::clone(&input.config);
        let cs = config
            .find_cipher_suite(hrr.cipher_suite)
            .filter(|cs| offered_suites.contains(&cs.suite()))
            .and_then(|cs| cs.tls13())
            .ok_or(PeerMisbehaved::IllegalHelloRetryRequestWithUnofferedCipherSuite)?;

        let key_share = match exts.hrr_group {
            // Or asks for us to retry on an unsupported group, or on the
            // group we already sent a share for.
            Some(group) if group == offered_key_share.group() => {
                return Err(PeerMisbehaved::IllegalHelloRetryRequestWithOfferedGroup.into());
            }
            Some(group) => config
                .provider
                .find_kx_group(group)
                .ok_or(PeerMisbehaved::IllegalHelloRetryRequestWithUnofferedNamedGroup)?
                .start()?,
            None => offered_key_share,
        };

        common.negotiated_version = Some(ProtocolVersion::TLSv1_3);
        common.suite = Some(SupportedCipherSuite::Tls13(cs));

        // This is the draft19 change where the transcript became a tree
        let mut transcript = transcript.start(cs.common.hash_provider);
        transcript.rollup_for_hrr();
        transcript.add_message(&m);

        emit_client_hello_for_retry(
            Transcript::Started(transcript),
            Some(Retry {
                cookie: exts.cookie,
                suite: cs,
            }),
            Some(key_share),
            input,
            common,
        )
    }
}

impl State for ExpectServerHello {
    fn handle(self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        if let MessagePayload::Alert(alert) = &m.payload {
            if alert.description == AlertDescription::NoRenegotiation {
                if let Some(renegotiation) = self.input.renegotiation {
                    debug!("Server declined to renegotiate");
                    return Ok(renegotiation.abandon());
                }
            }
        }

        if m.is_handshake_type(HandshakeType::HelloRetryRequest) {
            return self.handle_hello_retry_request(common, m);
        }

        if !m.is_handshake_type(HandshakeType::ServerHello) {
            return Err(crate::check::inappropriate_handshake_message(
                &m,
                &[ContentType::Handshake],
                &[HandshakeType::ServerHello],
            ));
        }

        self.handle_server_hello(common, m)
    }
}

use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::hs::{self, ClientHelloInput};
use super::ServerConfig;
use crate::check::inappropriate_message;
use crate::conn::{CommonState, ConnectionRandoms, NextState, NextStateOrError, Side};
use crate::crypto::{
    random_vec, ActiveKeyExchange, CertifiedKey, Signer, SupportedKxGroup,
};
use crate::enums::{AlertDescription, CipherSuite, ContentType, HandshakeType, ProtocolVersion};
use crate::error::{ApiMisuse, Error, PeerIncompatible, PeerMisbehaved};
use crate::extensions::{ExtensionContext, ServerExtensions};
use crate::hash_hs::HandshakeHash;
use crate::key::Certificate;
#[cfg(feature = "logging")]
use crate::log::{debug, trace, warn};
use crate::msgs::base::{Payload, PayloadU16};
use crate::msgs::codec::Codec;
use crate::msgs::enums::{ClientCertificateType, Compression, ECPointFormat, NamedGroup};
use crate::msgs::handshake::{
    read_client_kx_public, CertificateRequestPayload, CertificateStatus, DigitallySignedStruct,
    HandshakeMessagePayload, HandshakePayload, NewSessionTicketPayload, ProtocolName, Random,
    ServerHelloPayload, ServerKeyExchange, ServerKeyExchangeParams, SessionId, DOWNGRADE_TLS12,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::session::{
    unix_now, CommonServerSessionValue, ServerSessionValue, Tls12ServerSessionValue,
};
use crate::suites::KeyExchangeKind;
use crate::tls12::steps::{Machine, Plan, Received, Step, Steps};
use crate::tls12::{self, ConnectionSecrets, Tls12CipherSuite};
use crate::verify::{self, ClientCertVerified};

/// The lifetime hint sent with TLS1.2 tickets.
const TICKET_LIFETIME_SECS: u32 = 24 * 60 * 60;

/// Where a resumed session was found.
enum Resumption {
    SessionId(Tls12ServerSessionValue),
    Ticket(Tls12ServerSessionValue),
}

impl Resumption {
    fn value(&self) -> &Tls12ServerSessionValue {
        match self {
            Self::SessionId(value) | Self::Ticket(value) => value,
        }
    }
}

pub(super) fn handle_client_hello(
    input: ClientHelloInput<'_>,
    suite: &'static Tls12CipherSuite,
    renegotiation: Option<Renegotiation>,
    common: &mut CommonState,
) -> NextStateOrError {
    let signer = match suite.kx {
        KeyExchangeKind::StaticRsa => None,
        _ => {
            let schemes = suite.resolve_sig_schemes(input.signature_schemes());
            Some(
                input
                    .certkey
                    .key
                    .choose_scheme(&schemes)
                    .ok_or(PeerIncompatible::NoSignatureSchemesInCommon)?,
            )
        }
    };

    let ClientHelloInput {
        config,
        message,
        client_hello,
        exts,
        certkey,
        sni,
        mut transcript,
    } = input;
    transcript.add_message(message);

    // RFC5746 section 3.6/3.7
    let scsv = client_hello
        .cipher_suites
        .contains(&CipherSuite::TLS_EMPTY_RENEGOTIATION_INFO_SCSV);
    let secure_renegotiation = match (&renegotiation, &exts.renegotiation_info) {
        (Some(previous), Some(info)) => {
            if scsv
                || !bool::from(
                    info.as_slice()
                        .ct_eq(previous.client_verify_data()),
                )
            {
                return Err(PeerMisbehaved::InvalidRenegotiationInfo.into());
            }
            true
        }
        (Some(_), None) => return Err(PeerMisbehaved::InvalidRenegotiationInfo.into()),
        (None, Some(info)) if !info.is_empty() => {
            return Err(PeerMisbehaved::InvalidRenegotiationInfo.into());
        }
        (None, Some(_)) => true,
        (None, None) => scsv,
    };

    let kx_group = match suite.kx {
        KeyExchangeKind::Ecdhe => {
            if let Some(formats) = &exts.ec_point_formats {
                if !formats.contains(&ECPointFormat::Uncompressed) {
                    return Err(PeerIncompatible::UncompressedEcPointsRequired.into());
                }
            }
            Some(choose_ec_group(&config, exts.named_groups.as_deref())?)
        }
        KeyExchangeKind::Dhe => Some(
            choose_ff_group(&config, exts.named_groups.as_deref())
                .ok_or(PeerIncompatible::NoKxGroupsInCommon)?,
        ),
        _ => None,
    };

    let using_ems = exts.extended_master_secret;
    let store = &config.session_storage;

    // A ticket takes precedence over the session id it came with.
    let resumption = match &exts.session_ticket {
        Some(ticket) if !ticket.is_empty() => store
            .get(ticket)
            .map(|value| (ticket.as_slice(), value)),
        _ if !client_hello.session_id.is_empty() => store
            .get(client_hello.session_id.as_ref())
            .map(|value| (client_hello.session_id.as_ref(), value)),
        _ => None,
    }
    .and_then(|(key, value)| match value {
        ServerSessionValue::Tls12(value)
            if value.common.cipher_suite == suite.common.suite && value.extended_ms == using_ems =>
        {
            Some(match exts.session_ticket.as_deref() {
                Some(ticket) if ticket == key => Resumption::Ticket(value),
                _ => Resumption::SessionId(value),
            })
        }
        _ => {
            debug!("Stored session unusable for this handshake; forgetting it");
            store.remove(key);
            None
        }
    });
    let resumed = resumption.is_some();

    let ticket = exts.session_ticket.is_some() && config.send_tls12_tickets && store.can_cache();
    let session_id = match (&resumption, store.can_cache()) {
        (Some(_), _) => client_hello.session_id,
        (None, true) => SessionId::random(config.provider.secure_random)?,
        (None, false) => SessionId::empty(),
    };

    let mut random = Random::new(config.provider.secure_random)?;
    if config.supports_version(ProtocolVersion::TLSv1_3) {
        // RFC8446 section 4.1.3
        random.set_downgrade_sentinel(&DOWNGRADE_TLS12);
    }
    let randoms = ConnectionRandoms::new(client_hello.random, random);

    let hello_exts = ServerExtensions {
        renegotiation_info: secure_renegotiation.then(|| match &renegotiation {
            Some(previous) => previous.renegotiation_info(),
            None => Vec::new(),
        }),
        server_name_ack: exts.server_name.is_some() && !resumed,
        status_request_ack: exts.status_request && certkey.ocsp.is_some() && !resumed,
        ec_point_formats: match (suite.kx, &exts.ec_point_formats) {
            (KeyExchangeKind::Ecdhe, Some(_)) => Some(ECPointFormat::SUPPORTED.to_vec()),
            _ => None,
        },
        session_ticket_ack: ticket,
        selected_protocol: common
            .alpn_protocol
            .clone()
            .map(ProtocolName::from),
        extended_master_secret_ack: using_ems,
        ..ServerExtensions::default()
    };

    let mut client_cert_chain = None;
    let mut secrets = None;
    if let Some(resumption) = &resumption {
        let value = resumption.value();
        debug!(
            "Resuming session from {}",
            match resumption {
                Resumption::Ticket(_) => "ticket",
                Resumption::SessionId(_) => "session id",
            }
        );
        let resumed = ConnectionSecrets::new_resume(randoms, suite, &value.master_secret);
        resumed.log_master_secret(&*config.key_log);
        secrets = Some(resumed);
        client_cert_chain = value.common.client_cert_chain.clone();
    }

    let client_auth = !resumed && config.verifier.offer_client_auth();
    if !client_auth {
        transcript.abandon_client_auth();
    }

    let plan = Plan {
        resumed,
        status: hello_exts.status_request_ack,
        kx_signed: suite.kx != KeyExchangeKind::StaticRsa,
        client_auth,
        client_cert_sent: false,
        ticket,
    };

    let handshake = Handshake {
        config,
        suite,
        certkey,
        signer,
        sni,
        randoms,
        transcript,
        session_id,
        client_version: client_hello.client_version,
        hello_exts,
        using_ems,
        secure_renegotiation,
        kx_group,
        kx: None,
        secrets,
        client_cert_chain,
        client_key: None,
        client_verify_data: Vec::new(),
        server_verify_data: Vec::new(),
    };

    Box::new(Machine::new(
        Step::ServerHello,
        plan,
        ServerTls12::Handshaking(Box::new(handshake)),
    ))
    .start(common)
}

/// Our most preferred elliptic-curve group that the client supports.
///
/// A client without `supported_groups` accepts any curve.
pub(super) fn choose_ec_group(
    config: &ServerConfig,
    theirs: Option<&[NamedGroup]>,
) -> Result<&'static dyn SupportedKxGroup, Error> {
    config
        .provider
        .kx_groups
        .iter()
        .copied()
        .filter(|ours| !ours.name().is_ffdhe())
        .find(|ours| theirs.map_or(true, |theirs| theirs.contains(&ours.name())))
        .ok_or_else(|| PeerIncompatible::NoKxGroupsInCommon.into())
}

/// Our most preferred finite-field group for a DHE suite (RFC7919 4).
///
/// A client that lists finite-field groups gets one of those or none; one
/// that lists none predates RFC7919 and takes whatever we send.
pub(super) fn choose_ff_group(
    config: &ServerConfig,
    theirs: Option<&[NamedGroup]>,
) -> Option<&'static dyn SupportedKxGroup> {
    let theirs = theirs.filter(|theirs| theirs.iter().any(NamedGroup::is_ffdhe));
    config
        .provider
        .kx_groups
        .iter()
        .copied()
        .filter(|ours| ours.name().is_ffdhe())
        .find(|ours| theirs.map_or(true, |theirs| theirs.contains(&ours.name())))
}

struct Handshake {
    config: Arc<ServerConfig>,
    suite: &'static Tls12CipherSuite,
    certkey: Arc<CertifiedKey>,
    signer: Option<Box<dyn Signer>>,
    sni: Option<String>,
    randoms: ConnectionRandoms,
    transcript: HandshakeHash,
    session_id: SessionId,
    client_version: ProtocolVersion,
    hello_exts: ServerExtensions,
    using_ems: bool,
    secure_renegotiation: bool,
    kx_group: Option<&'static dyn SupportedKxGroup>,
    kx: Option<Box<dyn ActiveKeyExchange>>,
    secrets: Option<ConnectionSecrets>,
    client_cert_chain: Option<Vec<Certificate>>,
    client_key: Option<ClientCertVerified>,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
}

impl Handshake {
    fn secrets(&self) -> Result<&ConnectionSecrets, Error> {
        self.secrets
            .as_ref()
            .ok_or_else(|| Error::General("TLS1.2 secrets used before derivation".into()))
    }

    fn send(&mut self, common: &mut CommonState, typ: HandshakeType, payload: HandshakePayload) {
        let m = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload { typ, payload },
        );
        trace!("sending {:?}", m);
        self.transcript.add_message(&m);
        common.send_handshake(m);
    }

    fn send_server_hello(&mut self, common: &mut CommonState) {
        let sh = ServerHelloPayload {
            legacy_version: ProtocolVersion::TLSv1_2,
            random: Random::from(self.randoms.server),
            session_id: self.session_id,
            cipher_suite: self.suite.common.suite,
            compression_method: Compression::Null,
            extensions: crate::extensions::server_extensions(
                &self.hello_exts,
                ExtensionContext::ServerHelloTls12,
            ),
        };
        self.send(common, HandshakeType::ServerHello, HandshakePayload::ServerHello(sh));
    }

    fn send_certificate(&mut self, common: &mut CommonState) {
        let chain = self.certkey.cert.clone();
        self.send(common, HandshakeType::Certificate, HandshakePayload::Certificate(chain));
    }

    fn send_certificate_status(&mut self, common: &mut CommonState) {
        let Some(ocsp) = self.certkey.ocsp.clone() else {
            return;
        };
        self.send(
            common,
            HandshakeType::CertificateStatus,
            HandshakePayload::CertificateStatus(CertificateStatus::new(ocsp)),
        );
    }

    fn send_server_kx(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let group = self
            .kx_group
            .ok_or(PeerIncompatible::NoKxGroupsInCommon)?;
        let kx = group.start()?;
        let params = ServerKeyExchangeParams::new(group.name(), kx.pub_key());

        let mut message = Vec::new();
        message.extend_from_slice(&self.randoms.client);
        message.extend_from_slice(&self.randoms.server);
        params.encode(&mut message);

        let signer = self
            .signer
            .as_ref()
            .ok_or(PeerIncompatible::NoSignatureSchemesInCommon)?;
        let sig = signer.sign(&message)?;
        let skx = ServerKeyExchange {
            params,
            dss: DigitallySignedStruct::new(signer.scheme(), sig),
        };

        self.kx = Some(kx);
        self.send(
            common,
            HandshakeType::ServerKeyExchange,
            HandshakePayload::ServerKeyExchange(Payload::new(skx.get_encoding())),
        );
        Ok(())
    }

    fn send_certificate_request(&mut self, plan: &Plan, common: &mut CommonState) {
        if !plan.client_auth {
            return;
        }

        let request = CertificateRequestPayload {
            certtypes: vec![
                ClientCertificateType::RSASign,
                ClientCertificateType::ECDSASign,
            ],
            sigschemes: self
                .config
                .provider
                .signature_verifier
                .supported_schemes(),
            canames: self
                .config
                .verifier
                .root_hint_subjects()
                .to_vec(),
        };
        debug!("Sending CertificateRequest {:?}", request);
        self.send(
            common,
            HandshakeType::CertificateRequest,
            HandshakePayload::CertificateRequest(request),
        );
    }

    fn send_new_session_ticket(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let id = random_vec(self.config.provider.secure_random, 32)?;
        let value = self.session_value()?;

        // An empty ticket tells the client we could not keep the session.
        let ticket = match self
            .config
            .session_storage
            .put(id.clone(), value.into())
        {
            true => id,
            false => Vec::new(),
        };

        self.send(
            common,
            HandshakeType::NewSessionTicket,
            HandshakePayload::NewSessionTicket(NewSessionTicketPayload::new(
                TICKET_LIFETIME_SECS,
                ticket,
            )),
        );
        Ok(())
    }

    fn send_change_cipher_spec(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let must_encrypt = common.record_layer.is_encrypting();
        common.send_msg(Message::build_change_cipher_spec(), must_encrypt);

        let (_, encrypter) = self.secrets()?.make_cipher_pair(Side::Server)?;
        common
            .record_layer
            .set_message_encrypter(encrypter);
        Ok(())
    }

    fn send_finished(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let handshake_hash = self.transcript.get_current_hash();
        let verify_data = self
            .secrets()?
            .server_verify_data(&handshake_hash);

        self.send(
            common,
            HandshakeType::Finished,
            HandshakePayload::Finished(Payload::new(verify_data.clone())),
        );
        self.server_verify_data = verify_data;
        Ok(())
    }

    fn receive_certificate(&mut self, plan: &mut Plan, m: Message) -> Result<(), Error> {
        self.transcript.add_message(&m);
        let chain =
            require_handshake_msg_move!(m, HandshakeType::Certificate, HandshakePayload::Certificate)?;

        let Some((end_entity, intermediates)) = chain.split_first() else {
            if self
                .config
                .verifier
                .client_auth_mandatory()
            {
                warn!("client didn't send a certificate, but one is required");
                return Err(PeerMisbehaved::NoCertificatesPresented.into());
            }
            debug!("client auth requested but no certificate supplied");
            self.transcript.abandon_client_auth();
            return Ok(());
        };

        trace!("certs {:?}", chain);
        let verified = self
            .config
            .verifier
            .verify_client_cert(end_entity, intermediates)?;
        self.client_key = Some(verified);
        self.client_cert_chain = Some(chain);
        plan.client_cert_sent = true;
        Ok(())
    }

    fn receive_client_kx(&mut self, m: Message) -> Result<(), Error> {
        let body = require_handshake_msg!(
            m,
            HandshakeType::ClientKeyExchange,
            HandshakePayload::ClientKeyExchange
        )?;
        let provider = Arc::clone(&self.config.provider);

        let premaster = match self.suite.kx {
            KeyExchangeKind::StaticRsa => {
                let encrypted = PayloadU16::read_bytes(body.bytes())?;
                // Every failure of the decryption is folded into a random
                // premaster here, and surfaces only as a bad Finished.
                let decrypted = self
                    .certkey
                    .key
                    .decrypt_key_exchange(&encrypted.0);
                tls12::rsa_premaster_or_substitute(
                    decrypted,
                    self.client_version,
                    provider.secure_random,
                )?
                .to_vec()
            }
            kind @ (KeyExchangeKind::Ecdhe | KeyExchangeKind::Dhe) => {
                let public = read_client_kx_public(kind, body.bytes())?;
                let kx = self
                    .kx
                    .take()
                    .ok_or_else(|| Error::General("ephemeral suite without server key exchange".into()))?;
                kx.complete_for_tls12(&public)?
                    .secret_bytes()
                    .to_vec()
            }
            _ => return Err(PeerIncompatible::NoCipherSuitesInCommon.into()),
        };
        let premaster = zeroize::Zeroizing::new(premaster);

        self.transcript.add_message(&m);

        // RFC7627: the session hash runs up to and including the ClientKeyExchange
        let ems_seed = self
            .using_ems
            .then(|| self.transcript.get_current_hash());
        let secrets = ConnectionSecrets::from_premaster(&premaster, ems_seed, self.randoms, self.suite);
        secrets.log_master_secret(&*self.config.key_log);
        self.secrets = Some(secrets);
        Ok(())
    }

    fn receive_certificate_verify(&mut self, m: Message) -> Result<(), Error> {
        let dss = require_handshake_msg!(
            m,
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify
        )?;

        let message = self
            .transcript
            .take_handshake_buf()
            .ok_or_else(|| Error::General("Expected transcript".into()))?;
        let public_key = self
            .client_key
            .as_ref()
            .ok_or(PeerMisbehaved::NoCertificatesPresented)?
            .public_key();
        let verifier = self
            .config
            .provider
            .signature_verifier;
        verify::verify_tls12_signature(
            verifier,
            &verifier.supported_schemes(),
            public_key,
            &message,
            dss,
        )?;

        trace!("client CertificateVerify OK");
        self.transcript.add_message(&m);
        Ok(())
    }

    fn receive_change_cipher_spec(&mut self, common: &mut CommonState, m: Message) -> Result<(), Error> {
        if !matches!(m.payload, MessagePayload::ChangeCipherSpec(_)) {
            return Err(inappropriate_message(&m.payload, &[ContentType::ChangeCipherSpec]));
        }

        // A handshake message split across the CCS would straddle keys.
        common.check_aligned_handshake()?;

        let (decrypter, _) = self.secrets()?.make_cipher_pair(Side::Server)?;
        common
            .record_layer
            .set_message_decrypter(decrypter);
        Ok(())
    }

    fn receive_finished(&mut self, m: Message) -> Result<(), Error> {
        let finished = require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let handshake_hash = self.transcript.get_current_hash();
        let expect_verify_data = self
            .secrets()?
            .client_verify_data(&handshake_hash);

        if !bool::from(
            expect_verify_data
                .as_slice()
                .ct_eq(finished.bytes()),
        ) {
            return Err(PeerMisbehaved::IncorrectFinished.into());
        }

        self.transcript.add_message(&m);
        self.client_verify_data = expect_verify_data;
        Ok(())
    }

    fn session_value(&self) -> Result<Tls12ServerSessionValue, Error> {
        let common = CommonServerSessionValue::new(
            self.sni.as_deref(),
            self.suite.common.suite,
            self.client_cert_chain.clone(),
            self.hello_exts
                .selected_protocol
                .as_ref()
                .map(|proto| proto.as_ref().to_vec()),
            unix_now(),
        );
        Ok(Tls12ServerSessionValue::new(
            common,
            self.secrets()?.master_secret(),
            self.using_ems,
        ))
    }

    fn save_session(&self) -> Result<(), Error> {
        if self.session_id.is_empty() {
            return Ok(());
        }

        let value = self.session_value()?;
        if !self
            .config
            .session_storage
            .put(self.session_id.as_ref().to_vec(), value.into())
        {
            debug!("Session not saved");
        }
        Ok(())
    }
}

/// An established TLS1.2 session.
struct Established {
    config: Arc<ServerConfig>,
    secrets: ConnectionSecrets,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
    secure_renegotiation: bool,
}

impl Established {
    fn duplicate(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            secrets: ConnectionSecrets::new_resume(
                self.secrets.randoms,
                self.secrets.suite(),
                self.secrets.master_secret(),
            ),
            client_verify_data: self.client_verify_data.clone(),
            server_verify_data: self.server_verify_data.clone(),
            secure_renegotiation: self.secure_renegotiation,
        }
    }
}

/// The session a renegotiation started from, whose verify data the new
/// hellos must carry.
pub(super) struct Renegotiation(Established);

impl Renegotiation {
    pub(super) fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.0.config)
    }

    fn client_verify_data(&self) -> &[u8] {
        &self.0.client_verify_data
    }

    /// What our renegotiation_info must carry.
    fn renegotiation_info(&self) -> Vec<u8> {
        let mut info = self.0.client_verify_data.clone();
        info.extend_from_slice(&self.0.server_verify_data);
        info
    }
}

enum ServerTls12 {
    Handshaking(Box<Handshake>),
    Established(Established),
}

impl ServerTls12 {
    fn handshake(&mut self) -> Result<&mut Handshake, Error> {
        match self {
            Self::Handshaking(hs) => Ok(hs),
            Self::Established(_) => Err(Error::General("TLS1.2 handshake already complete".into())),
        }
    }

    fn established(&self) -> Result<&Established, Error> {
        match self {
            Self::Established(est) => Ok(est),
            Self::Handshaking(_) => Err(Error::HandshakeNotComplete),
        }
    }
}

impl Steps for ServerTls12 {
    const SIDE: Side = Side::Server;

    fn send(&mut self, step: Step, plan: &mut Plan, common: &mut CommonState) -> Result<(), Error> {
        let hs = self.handshake()?;
        match step {
            Step::ServerHello => hs.send_server_hello(common),
            Step::ServerCertificate => hs.send_certificate(common),
            Step::CertificateStatus => hs.send_certificate_status(common),
            Step::ServerKeyExchange => hs.send_server_kx(common)?,
            Step::CertificateRequest => hs.send_certificate_request(plan, common),
            Step::ServerHelloDone => hs.send(
                common,
                HandshakeType::ServerHelloDone,
                HandshakePayload::ServerHelloDone,
            ),
            Step::NewSessionTicket => hs.send_new_session_ticket(common)?,
            Step::ServerChangeCipherSpec => hs.send_change_cipher_spec(common)?,
            Step::ServerFinished => hs.send_finished(common)?,
            _ => return Err(Error::General(format!("server cannot send {:?}", step))),
        }
        Ok(())
    }

    fn receive(
        &mut self,
        step: Step,
        plan: &mut Plan,
        common: &mut CommonState,
        m: Message,
    ) -> Result<Received, Error> {
        let hs = self.handshake()?;
        match step {
            Step::ClientCertificate => hs.receive_certificate(plan, m)?,
            Step::ClientKeyExchange => hs.receive_client_kx(m)?,
            Step::ClientCertificateVerify => hs.receive_certificate_verify(m)?,
            Step::ClientChangeCipherSpec => hs.receive_change_cipher_spec(common, m)?,
            Step::ClientFinished => hs.receive_finished(m)?,
            _ => return Err(Error::General(format!("server cannot receive {:?}", step))),
        }
        Ok(Received::Consumed)
    }

    fn complete(&mut self, plan: &Plan, common: &mut CommonState) -> Result<(), Error> {
        let hs = self.handshake()?;
        if !plan.resumed {
            hs.save_session()?;
        }
        common.peer_certificates = hs.client_cert_chain.clone();
        common.start_traffic();

        let secrets = hs
            .secrets
            .take()
            .ok_or_else(|| Error::General("TLS1.2 secrets used before derivation".into()))?;
        let established = Established {
            config: Arc::clone(&hs.config),
            secrets,
            client_verify_data: std::mem::take(&mut hs.client_verify_data),
            server_verify_data: std::mem::take(&mut hs.server_verify_data),
            secure_renegotiation: hs.secure_renegotiation,
        };
        *self = Self::Established(established);
        Ok(())
    }

    fn traffic(&mut self, _common: &mut CommonState, m: &Message) -> Result<bool, Error> {
        match &m.payload {
            MessagePayload::Handshake { parsed, .. }
                if parsed.typ == HandshakeType::ClientHello =>
            {
                Ok(true)
            }
            // The client declining our HelloRequest.
            MessagePayload::Alert(_) => Ok(false),
            payload => Err(inappropriate_message(payload, &[ContentType::ApplicationData])),
        }
    }

    fn renegotiate(
        &mut self,
        common: &mut CommonState,
        trigger: Option<Message>,
    ) -> Result<Option<NextState>, Error> {
        let est = self.established()?;
        let Some(client_hello) = trigger else {
            return Err(ApiMisuse::RenegotiationNotAvailable.into());
        };

        if !est.config.allow_renegotiation {
            warn!("Declining client's request to renegotiate");
            common.send_warning_alert(AlertDescription::NoRenegotiation);
            return Ok(None);
        }

        if !est.secure_renegotiation {
            return Err(PeerMisbehaved::RenegotiationWithoutSecureRenegotiation.into());
        }

        hs::start_renegotiation(Renegotiation(est.duplicate()), common, client_hello).map(Some)
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.established()?
            .secrets
            .export_keying_material(output, label, context)
    }

    fn request_renegotiation(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let est = self.established()?;
        if !est.config.allow_renegotiation || !est.secure_renegotiation {
            return Err(ApiMisuse::RenegotiationNotAvailable.into());
        }

        debug!("Sending HelloRequest");
        common.send_handshake(Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::HelloRequest,
                payload: HandshakePayload::HelloRequest,
            },
        ));
        Ok(())
    }
}

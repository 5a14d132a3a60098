use std::sync::Arc;

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::hs::{self, ClientHelloInput};
use crate::check::{inappropriate_message, require_empty_handshake};
use crate::client::{ClientConfig, ServerName};
use crate::conn::{CommonState, ConnectionRandoms, NextState, NextStateOrError, Side};
use crate::crypto::Signer;
use crate::enums::{AlertDescription, ContentType, HandshakeType, ProtocolVersion};
use crate::error::{ApiMisuse, Error, PeerIncompatible, PeerMisbehaved};
use crate::extensions::ServerExtensions;
use crate::hash_hs::HandshakeHash;
use crate::key::Certificate;
#[cfg(feature = "logging")]
use crate::log::{debug, trace, warn};
use crate::msgs::base::{Payload, PayloadU16};
use crate::msgs::codec::Codec;
use crate::msgs::handshake::{
    client_kx_public, DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload,
    NewSessionTicketPayload, ServerHelloPayload, ServerKeyExchange, ServerKeyExchangeParams,
    SessionId,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::session::{unix_now, ClientSessionValue, Tls12ClientSessionValue};
use crate::suites::{KeyExchangeKind, SupportedCipherSuite};
use crate::tls12::steps::{self, Machine, Plan, Received, Step, Steps};
use crate::tls12::{ConnectionSecrets, Tls12CipherSuite, RSA_PREMASTER_LEN};
use crate::verify::{self, ServerCertVerified};

pub(super) fn handle_server_hello(
    input: ClientHelloInput,
    common: &mut CommonState,
    server_hello: &ServerHelloPayload,
    exts: ServerExtensions,
    suite: &'static Tls12CipherSuite,
    transcript: HandshakeHash,
    randoms: ConnectionRandoms,
) -> NextStateOrError {
    let ClientHelloInput {
        config,
        resuming,
        server_name,
        renegotiation,
        ..
    } = input;

    // RFC5746 section 3.4/3.5
    let secure_renegotiation = match (&renegotiation, &exts.renegotiation_info) {
        (Some(_), None) => return Err(PeerMisbehaved::RenegotiationWithoutSecureRenegotiation.into()),
        (Some(previous), Some(info)) => {
            let expected = previous.expected_renegotiation_info();
            if !bool::from(info.as_slice().ct_eq(expected.as_slice())) {
                return Err(PeerMisbehaved::InvalidRenegotiationInfo.into());
            }
            true
        }
        (None, Some(info)) if !info.is_empty() => {
            return Err(PeerMisbehaved::InvalidRenegotiationInfo.into());
        }
        (None, Some(_)) => true,
        (None, None) => false,
    };

    hs::process_alpn_protocol(common, &config, exts.selected_protocol.as_ref())?;

    let using_ems = exts.extended_master_secret_ack;
    let resuming = resuming.and_then(|retrieved| match retrieved.value {
        ClientSessionValue::Tls12(value) => Some(value),
        ClientSessionValue::Tls13(_) => None,
    });

    let mut secrets = None;
    let mut server_cert_chain = Vec::new();
    if let Some(resuming) = &resuming {
        if !server_hello.session_id.is_empty() && server_hello.session_id == resuming.session_id {
            debug!("Server agreed to resume");

            if resuming.suite() != suite {
                config
                    .session_storage
                    .remove_tls12_session(&server_name);
                return Err(PeerMisbehaved::ResumptionOfferedWithVariedCipherSuite.into());
            }

            // RFC 7627 section 5.3
            if resuming.extended_ms() != using_ems {
                config
                    .session_storage
                    .remove_tls12_session(&server_name);
                return Err(PeerIncompatible::ExtendedMasterSecretExtensionRequired.into());
            }

            let resumed = ConnectionSecrets::new_resume(randoms, suite, resuming.master_secret());
            resumed.log_master_secret(&*config.key_log);
            server_cert_chain = resuming.server_cert_chain().to_vec();
            secrets = Some(resumed);
        } else {
            debug!("Server declined resumption");
            config
                .session_storage
                .remove_tls12_session(&server_name);
        }
    }

    let resumed = secrets.is_some();
    if resumed {
        common.peer_certificates = Some(server_cert_chain.clone());
    }

    let plan = Plan {
        resumed,
        status: exts.status_request_ack && !resumed,
        kx_signed: suite.kx != KeyExchangeKind::StaticRsa,
        client_auth: false,
        client_cert_sent: false,
        ticket: exts.session_ticket_ack,
    };

    let handshake = Handshake {
        config,
        server_name,
        suite,
        randoms,
        transcript,
        session_id: server_hello.session_id,
        using_ems,
        secure_renegotiation,
        server_cert_chain,
        ocsp_response: Vec::new(),
        server_key: None,
        server_kx: None,
        client_auth: None,
        secrets,
        ticket: None,
        client_verify_data: Vec::new(),
        server_verify_data: Vec::new(),
    };

    Box::new(Machine::new(
        steps::next(Step::ServerHello, &plan),
        plan,
        ClientTls12::Handshaking(Box::new(handshake)),
    ))
    .start(common)
}

/// What the client answers a CertificateRequest with.
struct ClientAuth {
    chain: Vec<Certificate>,
    signer: Option<Box<dyn Signer>>,
}

struct Handshake {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls12CipherSuite,
    randoms: ConnectionRandoms,
    transcript: HandshakeHash,
    session_id: SessionId,
    using_ems: bool,
    secure_renegotiation: bool,
    server_cert_chain: Vec<Certificate>,
    ocsp_response: Vec<u8>,
    server_key: Option<ServerCertVerified>,
    server_kx: Option<ServerKeyExchangeParams>,
    client_auth: Option<ClientAuth>,
    secrets: Option<ConnectionSecrets>,
    ticket: Option<NewSessionTicketPayload>,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
}

impl Handshake {
    fn secrets(&self) -> Result<&ConnectionSecrets, Error> {
        self.secrets
            .as_ref()
            .ok_or_else(|| Error::General("TLS1.2 secrets used before derivation".into()))
    }

    /// Check the server's certificate chain, once everything that bears on
    /// it (the stapled OCSP response) has arrived.
    fn verified_server_key(&mut self) -> Result<&ServerCertVerified, Error> {
        if self.server_key.is_none() {
            let (end_entity, intermediates) = self
                .server_cert_chain
                .split_first()
                .ok_or(PeerMisbehaved::NoCertificatesPresented)?;
            let verified = self.config.verifier.verify_server_cert(
                end_entity,
                intermediates,
                &self.server_name,
                &self.ocsp_response,
            )?;
            self.server_key = Some(verified);
        }

        self.server_key
            .as_ref()
            .ok_or_else(|| Error::General("server key unavailable".into()))
    }

    fn receive_certificate(&mut self, m: Message) -> Result<(), Error> {
        self.transcript.add_message(&m);
        let chain =
            require_handshake_msg_move!(m, HandshakeType::Certificate, HandshakePayload::Certificate)?;
        if chain.is_empty() {
            return Err(PeerMisbehaved::NoCertificatesPresented.into());
        }
        self.server_cert_chain = chain;
        Ok(())
    }

    fn receive_certificate_status(&mut self, m: Message) -> Result<Received, Error> {
        if !m.is_handshake_type(HandshakeType::CertificateStatus) {
            // The server agreed to staple, but is allowed to change its mind.
            return Ok(Received::Skipped(m));
        }

        self.transcript.add_message(&m);
        let status = require_handshake_msg_move!(
            m,
            HandshakeType::CertificateStatus,
            HandshakePayload::CertificateStatus
        )?;
        self.ocsp_response = status.into_inner();
        trace!("Server stapled OCSP response is {:?}", &self.ocsp_response);
        Ok(Received::Consumed)
    }

    fn receive_server_kx(&mut self, m: Message) -> Result<(), Error> {
        self.transcript.add_message(&m);
        let opaque_kx = require_handshake_msg!(
            m,
            HandshakeType::ServerKeyExchange,
            HandshakePayload::ServerKeyExchange
        )?;
        let kx = ServerKeyExchange::read_for(self.suite.kx, opaque_kx.bytes())?;

        if !SupportedCipherSuite::Tls12(self.suite)
            .usable_for_signature_algorithm(kx.dss.scheme.algorithm())
        {
            return Err(PeerMisbehaved::SignedKxWithWrongAlgorithm.into());
        }

        // DHE parameters arrive as a bare prime and generator; only the
        // RFC7919 groups we were configured with are accepted.
        if kx
            .params
            .named_group()
            .and_then(|group| self.config.provider.find_kx_group(group))
            .is_none()
        {
            return Err(PeerMisbehaved::SelectedUnofferedKxGroup.into());
        }

        let mut message = Vec::new();
        message.extend_from_slice(&self.randoms.client);
        message.extend_from_slice(&self.randoms.server);
        kx.params.encode(&mut message);

        let provider = Arc::clone(&self.config.provider);
        let public_key = self.verified_server_key()?.public_key();
        verify::verify_tls12_signature(
            provider.signature_verifier,
            &provider.signature_verifier.supported_schemes(),
            public_key,
            &message,
            &kx.dss,
        )?;

        self.server_kx = Some(kx.params);
        Ok(())
    }

    fn receive_certificate_request(
        &mut self,
        plan: &mut Plan,
        m: Message,
    ) -> Result<Received, Error> {
        if !m.is_handshake_type(HandshakeType::CertificateRequest) {
            return Ok(Received::Skipped(m));
        }

        self.transcript.add_message(&m);
        let request = require_handshake_msg!(
            m,
            HandshakeType::CertificateRequest,
            HandshakePayload::CertificateRequest
        )?;
        debug!("Got CertificateRequest {:?}", request);
        plan.client_auth = true;

        let root_hint_subjects = request
            .canames
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<_>>();
        self.client_auth = Some(
            match self
                .config
                .client_auth_cert_resolver
                .resolve(&root_hint_subjects, &request.sigschemes)
            {
                Some(certkey) => match certkey.key.choose_scheme(&request.sigschemes) {
                    Some(signer) => ClientAuth {
                        chain: certkey.cert.clone(),
                        signer: Some(signer),
                    },
                    None => {
                        debug!("Client certificate has no usable signature scheme");
                        ClientAuth {
                            chain: Vec::new(),
                            signer: None,
                        }
                    }
                },
                None => {
                    debug!("Client auth requested but no cert/sigscheme available");
                    ClientAuth {
                        chain: Vec::new(),
                        signer: None,
                    }
                }
            },
        );
        Ok(Received::Consumed)
    }

    fn receive_server_hello_done(&mut self, m: Message) -> Result<(), Error> {
        require_empty_handshake(&m, HandshakeType::ServerHelloDone)?;
        self.transcript.add_message(&m);
        self.verified_server_key()?;
        trace!("Server cert is {:?}", self.server_cert_chain);
        Ok(())
    }

    fn receive_new_session_ticket(&mut self, m: Message) -> Result<(), Error> {
        self.transcript.add_message(&m);
        let ticket = require_handshake_msg_move!(
            m,
            HandshakeType::NewSessionTicket,
            HandshakePayload::NewSessionTicket
        )?;
        self.ticket = Some(ticket);
        Ok(())
    }

    fn receive_change_cipher_spec(&mut self, common: &mut CommonState, m: Message) -> Result<(), Error> {
        if !matches!(m.payload, MessagePayload::ChangeCipherSpec(_)) {
            return Err(inappropriate_message(&m.payload, &[ContentType::ChangeCipherSpec]));
        }

        // A handshake message split across the CCS would straddle keys.
        common.check_aligned_handshake()?;

        let (decrypter, _) = self.secrets()?.make_cipher_pair(Side::Client)?;
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
            .server_verify_data(&handshake_hash);

        // Constant-time verification of this is relatively unimportant: they only
        // get one chance.  But it can't hurt.
        if !bool::from(
            expect_verify_data
                .as_slice()
                .ct_eq(finished.bytes()),
        ) {
            return Err(PeerMisbehaved::IncorrectFinished.into());
        }

        self.transcript.add_message(&m);
        self.server_verify_data = expect_verify_data;
        Ok(())
    }

    fn send_certificate(&mut self, plan: &mut Plan, common: &mut CommonState) {
        let chain = match &self.client_auth {
            Some(ClientAuth {
                chain,
                signer: Some(_),
            }) => chain.clone(),
            _ => Vec::new(),
        };

        plan.client_cert_sent = !chain.is_empty();
        if !plan.client_cert_sent {
            self.transcript.abandon_client_auth();
        }

        let cert = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::Certificate(chain),
            },
        );
        self.transcript.add_message(&cert);
        common.send_handshake(cert);
    }

    fn send_client_kx(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let provider = Arc::clone(&self.config.provider);

        let (body, premaster) = match self.suite.kx {
            KeyExchangeKind::StaticRsa => {
                let mut premaster = Zeroizing::new([0u8; RSA_PREMASTER_LEN]);
                premaster[..2].copy_from_slice(&ProtocolVersion::TLSv1_2.to_array());
                provider
                    .secure_random
                    .fill(&mut premaster[2..])?;

                let public_key = self.verified_server_key()?.public_key();
                let encrypted = provider
                    .key_transport
                    .encrypt_premaster(public_key, &premaster[..])?;
                (
                    PayloadU16::new(encrypted).get_encoding(),
                    Zeroizing::new(premaster.to_vec()),
                )
            }
            KeyExchangeKind::Ecdhe | KeyExchangeKind::Dhe => {
                let params = self
                    .server_kx
                    .take()
                    .ok_or_else(|| Error::General("ephemeral suite without server key exchange".into()))?;
                let group = params
                    .named_group()
                    .and_then(|group| provider.find_kx_group(group))
                    .ok_or(PeerMisbehaved::SelectedUnofferedKxGroup)?;
                let kx = group.start()?;
                let body = client_kx_public(group.name(), kx.pub_key());
                let shared = kx.complete_for_tls12(params.pub_key())?;
                (body, Zeroizing::new(shared.secret_bytes().to_vec()))
            }
            _ => return Err(PeerIncompatible::NoCipherSuitesInCommon.into()),
        };

        let ckx = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::ClientKeyExchange,
                payload: HandshakePayload::ClientKeyExchange(Payload::new(body)),
            },
        );
        self.transcript.add_message(&ckx);
        common.send_handshake(ckx);

        // RFC7627: the session hash runs up to and including the ClientKeyExchange
        let ems_seed = self
            .using_ems
            .then(|| self.transcript.get_current_hash());
        let secrets = ConnectionSecrets::from_premaster(&premaster, ems_seed, self.randoms, self.suite);
        secrets.log_master_secret(&*self.config.key_log);
        self.secrets = Some(secrets);
        Ok(())
    }

    fn send_certificate_verify(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let message = self
            .transcript
            .take_handshake_buf()
            .ok_or_else(|| Error::General("Expected transcript".into()))?;

        let signer = self
            .client_auth
            .as_ref()
            .and_then(|auth| auth.signer.as_ref())
            .ok_or_else(|| Error::General("CertificateVerify without a signer".into()))?;
        let scheme = signer.scheme();
        let sig = signer.sign(&message)?;
        let body = DigitallySignedStruct::new(scheme, sig);

        let m = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::CertificateVerify,
                payload: HandshakePayload::CertificateVerify(body),
            },
        );
        self.transcript.add_message(&m);
        common.send_handshake(m);
        Ok(())
    }

    fn send_change_cipher_spec(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let must_encrypt = common.record_layer.is_encrypting();
        common.send_msg(Message::build_change_cipher_spec(), must_encrypt);

        let (_, encrypter) = self.secrets()?.make_cipher_pair(Side::Client)?;
        common
            .record_layer
            .set_message_encrypter(encrypter);
        Ok(())
    }

    fn send_finished(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let handshake_hash = self.transcript.get_current_hash();
        let verify_data = self
            .secrets()?
            .client_verify_data(&handshake_hash);

        let f = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(Payload::new(verify_data.clone())),
            },
        );
        self.transcript.add_message(&f);
        common.send_handshake(f);
        self.client_verify_data = verify_data;
        Ok(())
    }

    fn save_session(&self) {
        let Ok(secrets) = self.secrets() else {
            return;
        };

        let (ticket, lifetime) = match &self.ticket {
            Some(ticket) => (ticket.ticket.0.clone(), ticket.lifetime_hint),
            None => (Vec::new(), 0),
        };

        if self.session_id.is_empty() && ticket.is_empty() {
            debug!("Session not saved: server didn't allocate id or ticket");
            return;
        }

        let session = Tls12ClientSessionValue::new(
            self.suite,
            self.session_id,
            ticket,
            secrets.master_secret(),
            self.server_cert_chain.clone(),
            unix_now(),
            lifetime,
            self.using_ems,
        );

        self.config
            .session_storage
            .set_tls12_session(&self.server_name, session);
    }
}

/// An established TLS1.2 session.
struct Established {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    secrets: ConnectionSecrets,
    client_verify_data: Vec<u8>,
    server_verify_data: Vec<u8>,
    secure_renegotiation: bool,
}

impl Established {
    fn duplicate(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            server_name: self.server_name.clone(),
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

/// The session a renegotiation started from.  It carries the verify data
/// the new hellos must bind to, and is restored if the server declines.
pub(super) struct Renegotiation(Established);

impl Renegotiation {
    pub(super) fn config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.0.config)
    }

    pub(super) fn server_name(&self) -> &ServerName {
        &self.0.server_name
    }

    pub(super) fn client_verify_data(&self) -> &[u8] {
        &self.0.client_verify_data
    }

    /// What the server's renegotiation_info must carry.
    fn expected_renegotiation_info(&self) -> Vec<u8> {
        let mut expected = self.0.client_verify_data.clone();
        expected.extend_from_slice(&self.0.server_verify_data);
        expected
    }

    /// Carry on with the existing session.
    pub(super) fn abandon(self) -> NextState {
        Box::new(Machine::new(
            Step::Done,
            Plan::default(),
            ClientTls12::Established(self.0),
        ))
    }
}

enum ClientTls12 {
    Handshaking(Box<Handshake>),
    Established(Established),
}

impl ClientTls12 {
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

impl Steps for ClientTls12 {
    const SIDE: Side = Side::Client;

    fn send(&mut self, step: Step, plan: &mut Plan, common: &mut CommonState) -> Result<(), Error> {
        let hs = self.handshake()?;
        match step {
            Step::ClientCertificate => {
                hs.send_certificate(plan, common);
                Ok(())
            }
            Step::ClientKeyExchange => hs.send_client_kx(common),
            Step::ClientCertificateVerify => hs.send_certificate_verify(common),
            Step::ClientChangeCipherSpec => hs.send_change_cipher_spec(common),
            Step::ClientFinished => hs.send_finished(common),
            _ => Err(Error::General(format!("client cannot send {:?}", step))),
        }
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
            Step::ServerCertificate => hs.receive_certificate(m)?,
            Step::CertificateStatus => return hs.receive_certificate_status(m),
            Step::ServerKeyExchange => hs.receive_server_kx(m)?,
            Step::CertificateRequest => return hs.receive_certificate_request(plan, m),
            Step::ServerHelloDone => hs.receive_server_hello_done(m)?,
            Step::NewSessionTicket => hs.receive_new_session_ticket(m)?,
            Step::ServerChangeCipherSpec => hs.receive_change_cipher_spec(common, m)?,
            Step::ServerFinished => hs.receive_finished(m)?,
            _ => return Err(Error::General(format!("client cannot receive {:?}", step))),
        }
        Ok(Received::Consumed)
    }

    fn complete(&mut self, _plan: &Plan, common: &mut CommonState) -> Result<(), Error> {
        let hs = self.handshake()?;
        hs.save_session();
        common.peer_certificates = Some(hs.server_cert_chain.clone());
        common.start_traffic();

        let secrets = hs
            .secrets
            .take()
            .ok_or_else(|| Error::General("TLS1.2 secrets used before derivation".into()))?;
        let established = Established {
            config: Arc::clone(&hs.config),
            server_name: hs.server_name.clone(),
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
                if parsed.typ == HandshakeType::HelloRequest =>
            {
                Ok(true)
            }
            // A late no_renegotiation warning has nothing left to act on.
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

        if !est.config.allow_renegotiation {
            return match trigger {
                Some(_) => {
                    warn!("Declining server's request to renegotiate");
                    common.send_warning_alert(AlertDescription::NoRenegotiation);
                    Ok(None)
                }
                None => Err(ApiMisuse::RenegotiationNotAvailable.into()),
            };
        }

        if !est.secure_renegotiation {
            return Err(PeerMisbehaved::RenegotiationWithoutSecureRenegotiation.into());
        }

        hs::start_renegotiation(Renegotiation(est.duplicate()), common).map(Some)
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

    fn request_renegotiation(&mut self, _common: &mut CommonState) -> Result<(), Error> {
        Err(ApiMisuse::RenegotiationNotAvailable.into())
    }
}

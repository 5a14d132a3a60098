use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::hs::{self, ClientHelloInput};
use crate::check::inappropriate_handshake_message;
use crate::client::{ClientConfig, ServerName};
use crate::conn::{CommonState, ConnectionRandoms, NextStateOrError, Side, State};
use crate::crypto::tls13::OkmBlock;
use crate::crypto::{ActiveKeyExchange, CertifiedKey, Signer};
use crate::enums::{ContentType, HandshakeType, ProtocolVersion};
use crate::error::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
use crate::extensions::{self, ExtensionContext, ServerExtensions};
use crate::hash_hs::HandshakeHash;
use crate::key::Certificate;
#[cfg(feature = "logging")]
use crate::log::{debug, trace};
use crate::msgs::base::PayloadU8;
use crate::msgs::enums::{ExtensionType, KeyUpdateRequest};
use crate::msgs::handshake::{
    CertificatePayloadTls13, DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload,
    NewSessionTicketPayloadTls13, ServerHelloPayload,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::session::{unix_now, ClientSessionValue, Tls13ClientSessionValue};
use crate::tls13::flow::{Cursor, Slot, Tag};
use crate::tls13::key_schedule::KeySchedule;
use crate::tls13::{self, Tls13CipherSuite};
use crate::verify::{self, ServerCertVerified};

#[allow(clippy::too_many_arguments)]
pub(super) fn handle_server_hello(
    input: ClientHelloInput,
    common: &mut CommonState,
    server_hello: &ServerHelloPayload,
    exts: ServerExtensions,
    suite: &'static Tls13CipherSuite,
    transcript: HandshakeHash,
    key_share: Option<Box<dyn ActiveKeyExchange>>,
    randoms: ConnectionRandoms,
    retried: bool,
    offered_extensions: Vec<ExtensionType>,
) -> NextStateOrError {
    let ClientHelloInput {
        config,
        resuming,
        session_id,
        server_name,
        ..
    } = input;

    // RFC8446 section 4.1.3: a TLS1.3 server echoes the legacy session id.
    if server_hello.session_id != session_id {
        return Err(PeerMisbehaved::ServerEchoedWrongSessionId.into());
    }

    let our_key_share =
        key_share.ok_or_else(|| Error::General("TLS1.3 negotiated without a key share".into()))?;
    let their_key_share = exts
        .key_share
        .as_ref()
        .ok_or(PeerMisbehaved::MissingKeyShare)?;
    if their_key_share.group != our_key_share.group() {
        return Err(PeerMisbehaved::WrongGroupForKeyShare.into());
    }

    let resuming = resuming.and_then(|retrieved| match retrieved.value {
        ClientSessionValue::Tls13(value) => Some(value),
        ClientSessionValue::Tls12(_) => None,
    });

    let resumed = match (exts.selected_psk, &resuming) {
        (Some(0), Some(ticket)) => {
            if suite
                .can_resume_from(ticket.suite())
                .is_none()
            {
                return Err(PeerMisbehaved::SelectedInvalidPsk.into());
            }
            debug!("Resuming using PSK");
            Some(ticket)
        }
        (Some(_), _) => return Err(PeerMisbehaved::SelectedUnofferedPsk.into()),
        (None, _) => {
            debug!("Not resuming");
            None
        }
    };

    // The handshake keys start with the next record.
    common.check_aligned_handshake()?;

    let mut key_schedule = KeySchedule::new(suite);
    key_schedule.derive_early(resumed.map(|ticket| ticket.secret()))?;
    let shared = our_key_share.complete(&their_key_share.payload.0)?;
    key_schedule.derive_handshake(
        shared.secret_bytes(),
        &transcript.get_current_hash(),
        &*config.key_log,
        &randoms.client,
    )?;

    config
        .session_storage
        .set_kx_hint(&server_name, their_key_share.group);

    common
        .record_layer
        .set_message_decrypter(key_schedule.handshake_decrypter(Side::Server)?);
    common
        .record_layer
        .set_message_encrypter(key_schedule.handshake_encrypter(Side::Client)?);

    let mut cursor = Cursor::new();
    if retried {
        cursor.learn(Tag::WITH_HRR);
    }
    while cursor.current() != Slot::ServerHello {
        cursor.advance();
    }
    cursor.learn(Tag::NEGOTIATED);
    if resumed.is_some() {
        cursor.learn(Tag::WITH_PSK);
    }
    cursor.advance();

    let server_cert_chain = resumed
        .map(|ticket| ticket.server_cert_chain().to_vec())
        .unwrap_or_default();

    Ok(Box::new(ExpectHandshake {
        config,
        server_name,
        suite,
        randoms,
        key_schedule,
        transcript,
        cursor,
        offered_extensions,
        server_cert_chain,
        ocsp_response: Vec::new(),
        server_key: None,
        client_auth: None,
    }))
}

/// The client's answer to a CertificateRequest.
struct ClientAuth {
    context: Vec<u8>,
    certkey: Option<Arc<CertifiedKey>>,
    signer: Option<Box<dyn Signer>>,
}

/// The server's encrypted flight, followed by our own.
struct ExpectHandshake {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    randoms: ConnectionRandoms,
    key_schedule: KeySchedule,
    transcript: HandshakeHash,
    cursor: Cursor,
    offered_extensions: Vec<ExtensionType>,
    server_cert_chain: Vec<Certificate>,
    ocsp_response: Vec<u8>,
    server_key: Option<ServerCertVerified>,
    client_auth: Option<ClientAuth>,
}

impl ExpectHandshake {
    fn receive_encrypted_extensions(&mut self, common: &mut CommonState, m: &Message) -> Result<(), Error> {
        let raw = require_handshake_msg!(
            m,
            HandshakeType::EncryptedExtensions,
            HandshakePayload::EncryptedExtensions
        )?;
        debug!("TLS1.3 encrypted extensions: {:?}", raw);

        let exts = extensions::parse_server_extensions(
            raw,
            ExtensionContext::EncryptedExtensions,
            &self.offered_extensions,
        )?;
        hs::process_alpn_protocol(common, &self.config, exts.selected_protocol.as_ref())?;

        if exts.early_data_ack {
            debug!("Server accepted early data; none was sent");
        }

        self.transcript.add_message(m);
        Ok(())
    }

    fn receive_certificate_request(&mut self, m: &Message) -> Result<(), Error> {
        let request = require_handshake_msg!(
            m,
            HandshakeType::CertificateRequest,
            HandshakePayload::CertificateRequestTls13
        )?;
        debug!("Got CertificateRequest {:?}", request);

        let exts = extensions::parse_server_extensions(
            &request.extensions,
            ExtensionContext::CertificateRequest,
            &self.offered_extensions,
        )?;
        let schemes = exts
            .signature_schemes
            .ok_or(PeerIncompatible::SignatureAlgorithmsExtensionRequired)?
            .into_iter()
            .filter(|scheme| scheme.supported_in_tls13())
            .collect::<Vec<_>>();
        if schemes.is_empty() {
            return Err(PeerIncompatible::NoCertificateRequestSignatureSchemesInCommon.into());
        }

        let certkey = self
            .config
            .client_auth_cert_resolver
            .resolve(&[], &schemes);
        let signer = certkey
            .as_ref()
            .and_then(|certkey| certkey.key.choose_scheme(&schemes));
        if signer.is_none() {
            debug!("Client auth requested but no cert/sigscheme available");
        }

        self.client_auth = Some(ClientAuth {
            context: request.context.0.clone(),
            certkey,
            signer,
        });
        self.transcript.add_message(m);
        Ok(())
    }

    fn receive_certificate(&mut self, m: &Message) -> Result<(), Error> {
        let cert = require_handshake_msg!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::CertificateTls13
        )?;

        // This is only non-empty for client auth.
        if !cert.context.0.is_empty() {
            return Err(InvalidMessage::UnexpectedMessage("server certificate with context").into());
        }

        for (i, entry) in cert.entries.iter().enumerate() {
            let exts = extensions::parse_server_extensions(
                &entry.extensions,
                ExtensionContext::Certificate,
                &self.offered_extensions,
            )?;
            if let Some(ocsp) = exts.ocsp_response {
                if i != 0 {
                    return Err(PeerMisbehaved::BadCertChainExtensions.into());
                }
                self.ocsp_response = ocsp;
            }
        }

        let chain = cert.clone().into_certificate_chain();
        if chain.is_empty() {
            return Err(PeerMisbehaved::NoCertificatesPresented.into());
        }
        trace!("Server cert is {:?}", chain);
        self.server_cert_chain = chain;
        self.transcript.add_message(m);
        Ok(())
    }

    fn receive_certificate_verify(&mut self, m: &Message) -> Result<(), Error> {
        let dss = require_handshake_msg!(
            m,
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify
        )?;

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

        let handshake_hash = self.transcript.get_current_hash();
        let message = tls13::construct_server_verify_message(&handshake_hash);
        let provider = &self.config.provider;
        verify::verify_tls13_signature(
            provider.signature_verifier,
            &provider.signature_verifier.supported_schemes(),
            verified.public_key(),
            message.as_ref(),
            dss,
        )?;

        self.server_key = Some(verified);
        self.transcript.add_message(m);
        Ok(())
    }

    fn receive_finished(mut self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        let finished = require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let handshake_hash = self.transcript.get_current_hash();
        let expect_verify_data = self
            .key_schedule
            .sign_finish(Side::Server, &handshake_hash)?;
        if !bool::from(
            expect_verify_data
                .as_ref()
                .ct_eq(finished.bytes()),
        ) {
            return Err(PeerMisbehaved::IncorrectFinished.into());
        }

        self.transcript.add_message(&m);
        common.check_aligned_handshake()?;

        let hash_at_server_fin = self.transcript.get_current_hash();
        self.key_schedule.derive_application(
            &hash_at_server_fin,
            &*self.config.key_log,
            &self.randoms.client,
        )?;
        common.record_layer.set_message_decrypter(
            self.key_schedule
                .application_decrypter(Side::Server)?,
        );
        self.cursor.advance();

        // Our flight still goes under the handshake keys.
        while self.cursor.is_turn_of(Side::Client) {
            match self.cursor.current() {
                Slot::ClientCertificate => self.send_certificate(common),
                Slot::ClientCertificateVerify => self.send_certificate_verify(common)?,
                Slot::ClientFinished => self.send_finished(common)?,
                slot => return Err(Error::General(format!("client cannot send {:?}", slot))),
            }
            self.cursor.advance();
        }

        common.record_layer.set_message_encrypter(
            self.key_schedule
                .application_encrypter(Side::Client)?,
        );
        let resumption_master = self
            .key_schedule
            .derive_resumption_master(&self.transcript.get_current_hash())?;

        common.peer_certificates = Some(self.server_cert_chain.clone());
        common.start_traffic();

        let this = *self;
        Ok(Box::new(ExpectTraffic {
            config: this.config,
            server_name: this.server_name,
            suite: this.suite,
            key_schedule: this.key_schedule,
            resumption_master,
            server_cert_chain: this.server_cert_chain,
            key_updates_in_a_row: 0,
        }))
    }

    fn send_certificate(&mut self, common: &mut CommonState) {
        let Some(auth) = &self.client_auth else {
            return;
        };

        let chain = match (&auth.certkey, &auth.signer) {
            (Some(certkey), Some(_)) => certkey.cert.as_slice(),
            _ => &[],
        };
        if !chain.is_empty() {
            self.cursor.learn(Tag::WITH_CCV);
        }

        let mut payload = CertificatePayloadTls13::new(chain);
        payload.context = PayloadU8::new(auth.context.clone());

        let m = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::CertificateTls13(payload),
            },
        );
        self.transcript.add_message(&m);
        common.send_handshake(m);
    }

    fn send_certificate_verify(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let signer = self
            .client_auth
            .as_ref()
            .and_then(|auth| auth.signer.as_ref())
            .ok_or_else(|| Error::General("CertificateVerify without a signer".into()))?;

        let message = tls13::construct_client_verify_message(&self.transcript.get_current_hash());
        let scheme = signer.scheme();
        let sig = signer.sign(message.as_ref())?;
        let dss = DigitallySignedStruct::new(scheme, sig);

        let m = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::CertificateVerify,
                payload: HandshakePayload::CertificateVerify(dss),
            },
        );
        self.transcript.add_message(&m);
        common.send_handshake(m);
        Ok(())
    }

    fn send_finished(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let handshake_hash = self.transcript.get_current_hash();
        let verify_data = self
            .key_schedule
            .sign_finish(Side::Client, &handshake_hash)?;

        let m = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(crate::msgs::base::Payload::new(
                    verify_data.as_ref(),
                )),
            },
        );
        self.transcript.add_message(&m);
        common.send_handshake(m);
        Ok(())
    }
}

impl State for ExpectHandshake {
    fn handle(mut self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        // A CertificateRequest is only known to be coming when it arrives.
        if self.cursor.current() == Slot::ServerCertificate
            && m.is_handshake_type(HandshakeType::CertificateRequest)
        {
            self.cursor.learn(Tag::WITH_CR);
        }

        match self.cursor.current() {
            Slot::EncryptedExtensions => self.receive_encrypted_extensions(common, &m)?,
            Slot::CertificateRequest => self.receive_certificate_request(&m)?,
            Slot::ServerCertificate => self.receive_certificate(&m)?,
            Slot::ServerCertificateVerify => self.receive_certificate_verify(&m)?,
            Slot::ServerFinished => return self.receive_finished(common, m),
            slot => {
                let expected = slot
                    .handshake_type()
                    .map(|typ| vec![typ])
                    .unwrap_or_default();
                return Err(inappropriate_handshake_message(
                    &m,
                    &[ContentType::Handshake],
                    &expected,
                ));
            }
        }

        trace!("TLS1.3 slot {:?} done", self.cursor.current());
        self.cursor.advance();
        Ok(self)
    }
}

/// The established TLS1.3 session.
struct ExpectTraffic {
    config: Arc<ClientConfig>,
    server_name: ServerName,
    suite: &'static Tls13CipherSuite,
    key_schedule: KeySchedule,
    resumption_master: OkmBlock,
    server_cert_chain: Vec<Certificate>,
    key_updates_in_a_row: u8,
}

impl ExpectTraffic {
    fn handle_new_ticket(&mut self, nst: &NewSessionTicketPayloadTls13) -> Result<(), Error> {
        let exts = extensions::parse_server_extensions(
            &nst.extensions,
            ExtensionContext::NewSessionTicket,
            &[],
        )?;

        let secret = self
            .key_schedule
            .derive_ticket_psk(&self.resumption_master, &nst.nonce.0);

        let value = Tls13ClientSessionValue::new(
            self.suite,
            nst.ticket.0.clone(),
            secret.as_ref(),
            self.server_cert_chain.clone(),
            unix_now(),
            nst.lifetime,
            nst.age_add,
            exts.max_early_data.unwrap_or_default(),
        );

        debug!("Ticket received, lifetime {}s", nst.lifetime);
        self.config
            .session_storage
            .insert_tls13_ticket(&self.server_name, value);
        Ok(())
    }
}

impl State for ExpectTraffic {
    fn handle(mut self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        match &m.payload {
            MessagePayload::Handshake { parsed, .. } => match &parsed.payload {
                HandshakePayload::NewSessionTicketTls13(nst) => self.handle_new_ticket(nst)?,
                HandshakePayload::KeyUpdate(request) => tls13::receive_key_update(
                    &mut self.key_schedule,
                    common,
                    *request,
                    &mut self.key_updates_in_a_row,
                )?,
                _ => {
                    return Err(inappropriate_handshake_message(
                        &m,
                        &[ContentType::ApplicationData, ContentType::Handshake],
                        &[HandshakeType::NewSessionTicket, HandshakeType::KeyUpdate],
                    ));
                }
            },
            payload => {
                return Err(crate::check::inappropriate_message(
                    payload,
                    &[ContentType::ApplicationData, ContentType::Handshake],
                ));
            }
        }

        Ok(self)
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.key_schedule
            .export_keying_material(output, label, context)
    }

    fn send_key_update(&mut self, common: &mut CommonState) -> Result<(), Error> {
        tls13::send_key_update(
            &mut self.key_schedule,
            common,
            KeyUpdateRequest::UpdateRequested,
        )
    }
}

use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::hs::ClientHelloInput;
use super::ServerConfig;
use crate::check::inappropriate_handshake_message;
use crate::conn::{CommonState, NextStateOrError, Side, State};
use crate::crypto::tls13::OkmBlock;
use crate::crypto::{hash, random_u32, random_vec, CertifiedKey, Signer};
use crate::enums::{ContentType, HandshakeType, ProtocolVersion, SignatureScheme};
use crate::error::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
use crate::extensions::{self, ClientExtensions, ExtensionContext, ServerExtensions};
use crate::hash_hs::HandshakeHash;
use crate::key::Certificate;
#[cfg(feature = "logging")]
use crate::log::{debug, trace, warn};
use crate::msgs::base::{Payload, PayloadU8};
use crate::msgs::enums::{Compression, KeyUpdateRequest, NamedGroup, PSKKeyExchangeMode};
use crate::msgs::handshake::{
    CertificatePayloadTls13, CertificateRequestPayloadTls13, ClientHelloPayload,
    DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload, KeyShareEntry,
    NewSessionTicketPayloadTls13, ProtocolName, Random, ServerHelloPayload, SessionId,
    HELLO_RETRY_REQUEST_RANDOM,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::session::{
    unix_now, CommonServerSessionValue, ServerSessionValue, Tls13ServerSessionValue,
};
use crate::tls13::flow::{Cursor, Slot, Tag};
use crate::tls13::key_schedule::KeySchedule;
use crate::tls13::{self, Tls13CipherSuite};
use crate::verify::{self, ClientCertVerified};

/// How long the tickets we issue are good for.
const TICKET_LIFETIME_SECS: u32 = 24 * 60 * 60;

/// The decisions taken on the first ClientHello, which a retried
/// ClientHello must leave alone.
struct Hello {
    config: Arc<ServerConfig>,
    suite: &'static Tls13CipherSuite,
    certkey: Arc<CertifiedKey>,
    signer: Box<dyn Signer>,
    sni: Option<String>,
}

pub(super) fn handle_client_hello(
    input: ClientHelloInput<'_>,
    suite: &'static Tls13CipherSuite,
    common: &mut CommonState,
) -> NextStateOrError {
    let schemes = input
        .signature_schemes()
        .iter()
        .copied()
        .filter(SignatureScheme::supported_in_tls13)
        .collect::<Vec<_>>();
    let signer = input
        .certkey
        .key
        .choose_scheme(&schemes)
        .ok_or(PeerIncompatible::NoSignatureSchemesInCommon)?;

    let ClientHelloInput {
        config,
        message,
        client_hello,
        exts,
        certkey,
        sni,
        mut transcript,
    } = input;

    let hello = Hello {
        config,
        suite,
        certkey,
        signer,
        sni,
    };

    let offered_groups = exts
        .named_groups
        .as_deref()
        .ok_or(PeerIncompatible::NamedGroupsExtensionRequired)?;
    let shares = client_key_shares(&exts)?;

    // Our order of preference, among the groups the client sent a share for.
    let share = hello
        .config
        .provider
        .kx_groups
        .iter()
        .find_map(|ours| {
            shares
                .iter()
                .find(|share| share.group == ours.name())
        })
        .cloned();

    if let Some(share) = share {
        return emit_server_hello(hello, message, client_hello, &exts, share, transcript, false, common);
    }

    // The client shares a group with us, but sent no key share for it.
    let group = hello
        .config
        .provider
        .kx_groups
        .iter()
        .map(|ours| ours.name())
        .find(|ours| offered_groups.contains(ours))
        .ok_or(PeerIncompatible::NoKxGroupsInCommon)?;

    debug!("Requesting retry with group {:?}", group);
    transcript.add_message(message);
    transcript.rollup_for_hrr();

    let hrr_exts = ServerExtensions {
        selected_version: Some(ProtocolVersion::TLSv1_3),
        hrr_group: Some(group),
        ..ServerExtensions::default()
    };
    let hrr = Message::build_handshake(
        ProtocolVersion::TLSv1_2,
        HandshakeMessagePayload {
            typ: HandshakeType::HelloRetryRequest,
            payload: HandshakePayload::HelloRetryRequest(ServerHelloPayload {
                legacy_version: ProtocolVersion::TLSv1_2,
                random: HELLO_RETRY_REQUEST_RANDOM,
                session_id: client_hello.session_id,
                cipher_suite: suite.common.suite,
                compression_method: Compression::Null,
                extensions: extensions::server_extensions(
                    &hrr_exts,
                    ExtensionContext::HelloRetryRequest,
                ),
            }),
        },
    );

    trace!("Sending HelloRetryRequest {:?}", hrr);
    transcript.add_message(&hrr);
    common.send_msg(hrr, false);

    Ok(Box::new(ExpectRetriedClientHello {
        digest: extensions::client_hello_digest(client_hello, suite.common.hash_provider),
        hello,
        transcript,
        group,
    }))
}

fn client_key_shares(exts: &ClientExtensions) -> Result<&[KeyShareEntry], Error> {
    let shares = exts
        .key_shares
        .as_deref()
        .ok_or(PeerIncompatible::KeyShareExtensionRequired)?;

    for (i, share) in shares.iter().enumerate() {
        if shares[..i]
            .iter()
            .any(|earlier| earlier.group == share.group)
        {
            return Err(PeerMisbehaved::OfferedDuplicateKeyShares.into());
        }
    }

    Ok(shares)
}

/// A HelloRetryRequest has been sent; only the changes it asked for
/// may appear in the next ClientHello.
struct ExpectRetriedClientHello {
    hello: Hello,
    transcript: HandshakeHash,
    digest: hash::Output,
    group: NamedGroup,
}

impl State for ExpectRetriedClientHello {
    fn handle(self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        let client_hello =
            require_handshake_msg!(m, HandshakeType::ClientHello, HandshakePayload::ClientHello)?;
        trace!("we got a retried clienthello {:?}", client_hello);

        let Self {
            hello,
            transcript,
            digest,
            group,
        } = *self;

        let exts = extensions::parse_client_hello(&client_hello.extensions)?;
        let retried_digest =
            extensions::client_hello_digest(client_hello, hello.suite.common.hash_provider);
        if !bool::from(
            retried_digest
                .as_ref()
                .ct_eq(digest.as_ref()),
        ) {
            return Err(PeerMisbehaved::HandshakeHashVariedAfterRetry.into());
        }

        let share = client_key_shares(&exts)?
            .iter()
            .find(|share| share.group == group)
            .cloned()
            .ok_or(PeerMisbehaved::RefusedToFollowHelloRetryRequest)?;

        emit_server_hello(hello, &m, client_hello, &exts, share, transcript, true, common)
    }
}

/// Find a ticket among the client's PSK identities that we can resume,
/// checking its binder.
///
/// Tickets are taken from the store whether or not they turn out to be
/// usable, so each is tried at most once.
fn find_resumption(
    hello: &Hello,
    message: &Message,
    exts: &ClientExtensions,
    transcript: &HandshakeHash,
) -> Result<Option<(u16, Tls13ServerSessionValue)>, Error> {
    let Some(offer) = &exts.preshared_key_offer else {
        return Ok(None);
    };

    let modes = exts
        .psk_modes
        .as_ref()
        .ok_or(PeerMisbehaved::MissingPskModesExtension)?;
    if offer.binders.is_empty() {
        return Err(PeerMisbehaved::MissingBinderInPskExtension.into());
    }
    if offer.binders.len() != offer.identities.len() {
        return Err(PeerMisbehaved::PskExtensionWithMismatchedIdsAndBinders.into());
    }
    if !modes.contains(&PSKKeyExchangeMode::PSK_DHE_KE) {
        debug!("Client unwilling to resume, PSK_DHE_KE not offered");
        return Ok(None);
    }

    let MessagePayload::Handshake { parsed, .. } = &message.payload else {
        return Err(Error::General("ClientHello is not a handshake message".into()));
    };
    let binder_plaintext = parsed.encoding_for_binder_signing();

    let now = unix_now();
    for (i, (identity, binder)) in offer
        .identities
        .iter()
        .zip(offer.binders.iter())
        .enumerate()
    {
        let stored = match hello
            .config
            .session_storage
            .take(&identity.identity.0)
        {
            Some(ServerSessionValue::Tls13(stored)) => stored,
            _ => {
                debug!("PSK identity {} not found", i);
                continue;
            }
        };

        let Some(stored_suite) = hello
            .config
            .provider
            .cipher_suites
            .iter()
            .find(|cs| cs.suite() == stored.common.cipher_suite)
            .and_then(|cs| cs.tls13())
        else {
            continue;
        };
        if hello
            .suite
            .can_resume_from(stored_suite)
            .is_none()
        {
            debug!("Ticket for {:?} unusable with {:?}", stored_suite, hello.suite);
            continue;
        }

        if !stored.is_fresh(identity.obfuscated_ticket_age, now) {
            debug!("Ticket expired or client's age is off");
            continue;
        }

        let handshake_hash = transcript.get_hash_given(&binder_plaintext);
        let mut key_schedule = KeySchedule::new(hello.suite);
        key_schedule.derive_early(Some(stored.secret.as_slice()))?;
        let real_binder = key_schedule.resumption_binder(&handshake_hash)?;
        if !bool::from(
            real_binder
                .as_ref()
                .ct_eq(binder.as_ref()),
        ) {
            return Err(PeerMisbehaved::IncorrectBinder.into());
        }

        let index = u16::try_from(i).map_err(|_| PeerMisbehaved::IncorrectBinder)?;
        return Ok(Some((index, stored)));
    }

    Ok(None)
}

#[allow(clippy::too_many_arguments)]
fn emit_server_hello(
    hello: Hello,
    message: &Message,
    client_hello: &ClientHelloPayload,
    exts: &ClientExtensions,
    share: KeyShareEntry,
    mut transcript: HandshakeHash,
    retried: bool,
    common: &mut CommonState,
) -> NextStateOrError {
    let resumption = find_resumption(&hello, message, exts, &transcript)?;
    transcript.add_message(message);

    let kx = hello
        .config
        .provider
        .find_kx_group(share.group)
        .ok_or(PeerIncompatible::NoKxGroupsInCommon)?
        .start()?;
    let our_share = KeyShareEntry::new(kx.group(), kx.pub_key());
    let shared = kx.complete(&share.payload.0)?;

    let sh_exts = ServerExtensions {
        selected_version: Some(ProtocolVersion::TLSv1_3),
        key_share: Some(our_share),
        selected_psk: resumption
            .as_ref()
            .map(|(index, _)| *index),
        ..ServerExtensions::default()
    };
    let sh = Message::build_handshake(
        ProtocolVersion::TLSv1_2,
        HandshakeMessagePayload {
            typ: HandshakeType::ServerHello,
            payload: HandshakePayload::ServerHello(ServerHelloPayload {
                legacy_version: ProtocolVersion::TLSv1_2,
                random: Random::new(hello.config.provider.secure_random)?,
                session_id: client_hello.session_id,
                cipher_suite: hello.suite.common.suite,
                compression_method: Compression::Null,
                extensions: extensions::server_extensions(&sh_exts, ExtensionContext::ServerHelloTls13),
            }),
        },
    );

    trace!("sending server hello {:?}", sh);
    transcript.add_message(&sh);
    common.send_msg(sh, false);

    // Nothing may straddle the switch to handshake keys.
    common.check_aligned_handshake()?;

    let client_random = client_hello.random.0;
    let mut key_schedule = KeySchedule::new(hello.suite);
    key_schedule.derive_early(
        resumption
            .as_ref()
            .map(|(_, stored)| stored.secret.as_slice()),
    )?;
    key_schedule.derive_handshake(
        shared.secret_bytes(),
        &transcript.get_current_hash(),
        &*hello.config.key_log,
        &client_random,
    )?;

    common
        .record_layer
        .set_message_encrypter(key_schedule.handshake_encrypter(Side::Server)?);
    let decrypter = key_schedule.handshake_decrypter(Side::Client)?;
    if exts.early_data {
        // We never accept early data; skip over whatever the client
        // sent under its early keys, up to our advertised budget.
        debug!("Rejecting early data");
        common
            .record_layer
            .set_message_decrypter_with_trial_decryption(
                decrypter,
                hello.config.max_early_data_size as usize,
            );
    } else {
        common
            .record_layer
            .set_message_decrypter(decrypter);
    }

    let mut cursor = Cursor::new();
    if retried {
        cursor.learn(Tag::WITH_HRR);
    }
    while cursor.current() != Slot::ServerHello {
        cursor.advance();
    }
    cursor.learn(Tag::NEGOTIATED);

    let resumed = resumption.is_some();
    let mut client_cert_chain = None;
    if let Some((_, stored)) = resumption {
        debug!("Resuming session");
        cursor.learn(Tag::WITH_PSK);
        client_cert_chain = stored.common.client_cert_chain;
    } else if hello.config.verifier.offer_client_auth() {
        cursor.learn(Tag::WITH_CR);
    }
    cursor.advance();

    let mut flight = ServerFlight {
        hello,
        key_schedule,
        transcript,
        cursor,
        client_random,
        status_requested: exts.status_request,
        sni_requested: exts.server_name.is_some() && !resumed,
        client_cert_chain,
        client_key: None,
    };

    while flight.cursor.is_turn_of(Side::Server) {
        match flight.cursor.current() {
            Slot::EncryptedExtensions => flight.send_encrypted_extensions(common),
            Slot::CertificateRequest => flight.send_certificate_request(common),
            Slot::ServerCertificate => flight.send_certificate(common),
            Slot::ServerCertificateVerify => flight.send_certificate_verify(common)?,
            Slot::ServerFinished => flight.send_finished(common)?,
            slot => return Err(Error::General(format!("server cannot send {:?}", slot))),
        }
        flight.cursor.advance();
    }

    Ok(Box::new(flight))
}

/// Our flight is sent; the client's is expected.
struct ServerFlight {
    hello: Hello,
    key_schedule: KeySchedule,
    transcript: HandshakeHash,
    cursor: Cursor,
    client_random: [u8; 32],
    status_requested: bool,
    sni_requested: bool,
    client_cert_chain: Option<Vec<Certificate>>,
    client_key: Option<ClientCertVerified>,
}

impl ServerFlight {
    fn send_encrypted_extensions(&mut self, common: &mut CommonState) {
        let ee_exts = ServerExtensions {
            server_name_ack: self.sni_requested,
            selected_protocol: common
                .alpn_protocol
                .clone()
                .map(ProtocolName::from),
            ..ServerExtensions::default()
        };

        let ee = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::EncryptedExtensions,
                payload: HandshakePayload::EncryptedExtensions(extensions::server_extensions(
                    &ee_exts,
                    ExtensionContext::EncryptedExtensions,
                )),
            },
        );

        trace!("sending encrypted extensions {:?}", ee);
        self.transcript.add_message(&ee);
        common.send_handshake(ee);
    }

    fn send_certificate_request(&mut self, common: &mut CommonState) {
        let cr_exts = ServerExtensions {
            signature_schemes: Some(self.acceptable_client_schemes()),
            ..ServerExtensions::default()
        };

        let cr = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::CertificateRequest,
                payload: HandshakePayload::CertificateRequestTls13(CertificateRequestPayloadTls13 {
                    context: PayloadU8::empty(),
                    extensions: extensions::server_extensions(
                        &cr_exts,
                        ExtensionContext::CertificateRequest,
                    ),
                }),
            },
        );

        trace!("Sending CertificateRequest {:?}", cr);
        self.transcript.add_message(&cr);
        common.send_handshake(cr);
    }

    fn acceptable_client_schemes(&self) -> Vec<SignatureScheme> {
        self.hello
            .config
            .provider
            .signature_verifier
            .supported_schemes()
            .into_iter()
            .filter(SignatureScheme::supported_in_tls13)
            .collect()
    }

    fn send_certificate(&mut self, common: &mut CommonState) {
        let mut payload = CertificatePayloadTls13::new(&self.hello.certkey.cert);

        // The OCSP response belongs to the end-entity certificate.
        if let (true, Some(ocsp), Some(end_entity)) = (
            self.status_requested,
            &self.hello.certkey.ocsp,
            payload.entries.first_mut(),
        ) {
            let cert_exts = ServerExtensions {
                ocsp_response: Some(ocsp.clone()),
                ..ServerExtensions::default()
            };
            end_entity.extensions =
                extensions::server_extensions(&cert_exts, ExtensionContext::Certificate);
        }

        let cert = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::CertificateTls13(payload),
            },
        );

        self.transcript.add_message(&cert);
        common.send_handshake(cert);
    }

    fn send_certificate_verify(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let message = tls13::construct_server_verify_message(&self.transcript.get_current_hash());
        let signer = &self.hello.signer;
        let sig = signer.sign(message.as_ref())?;
        let dss = DigitallySignedStruct::new(signer.scheme(), sig);

        let cv = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::CertificateVerify,
                payload: HandshakePayload::CertificateVerify(dss),
            },
        );

        trace!("sending certificate-verify {:?}", cv);
        self.transcript.add_message(&cv);
        common.send_handshake(cv);
        Ok(())
    }

    fn send_finished(&mut self, common: &mut CommonState) -> Result<(), Error> {
        let handshake_hash = self.transcript.get_current_hash();
        let verify_data = self
            .key_schedule
            .sign_finish(Side::Server, &handshake_hash)?;

        let fin = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(Payload::new(verify_data.as_ref())),
            },
        );

        trace!("sending finished {:?}", fin);
        self.transcript.add_message(&fin);
        common.send_handshake(fin);

        // Application keys come from the transcript up to our Finished;
        // the client's flight still arrives under handshake keys.
        self.key_schedule.derive_application(
            &self.transcript.get_current_hash(),
            &*self.hello.config.key_log,
            &self.client_random,
        )?;
        common.record_layer.set_message_encrypter(
            self.key_schedule
                .application_encrypter(Side::Server)?,
        );
        Ok(())
    }

    fn receive_certificate(&mut self, m: &Message) -> Result<(), Error> {
        let certp = require_handshake_msg!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::CertificateTls13
        )?;

        // We sent an empty certificate_request_context.
        if !certp.context.0.is_empty() {
            return Err(InvalidMessage::UnexpectedMessage("client certificate with context").into());
        }

        let chain = certp.clone().into_certificate_chain();
        self.transcript.add_message(m);

        let Some((end_entity, intermediates)) = chain.split_first() else {
            if self
                .hello
                .config
                .verifier
                .client_auth_mandatory()
            {
                warn!("client didn't send a certificate, but one is required");
                return Err(PeerMisbehaved::NoCertificatesPresented.into());
            }
            debug!("client auth requested but no certificate supplied");
            return Ok(());
        };

        trace!("certs {:?}", chain);
        let verified = self
            .hello
            .config
            .verifier
            .verify_client_cert(end_entity, intermediates)?;
        self.client_key = Some(verified);
        self.client_cert_chain = Some(chain);
        self.cursor.learn(Tag::WITH_CCV);
        Ok(())
    }

    fn receive_certificate_verify(&mut self, m: &Message) -> Result<(), Error> {
        let dss = require_handshake_msg!(
            m,
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify
        )?;

        let public_key = self
            .client_key
            .as_ref()
            .ok_or(PeerMisbehaved::NoCertificatesPresented)?
            .public_key();
        let message = tls13::construct_client_verify_message(&self.transcript.get_current_hash());
        let verifier = self
            .hello
            .config
            .provider
            .signature_verifier;
        verify::verify_tls13_signature(
            verifier,
            &self.acceptable_client_schemes(),
            public_key,
            message.as_ref(),
            dss,
        )?;

        trace!("client CertificateVerify OK");
        self.transcript.add_message(m);
        Ok(())
    }

    fn receive_finished(mut self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        let finished = require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let handshake_hash = self.transcript.get_current_hash();
        let expect_verify_data = self
            .key_schedule
            .sign_finish(Side::Client, &handshake_hash)?;
        if !bool::from(
            expect_verify_data
                .as_ref()
                .ct_eq(finished.bytes()),
        ) {
            return Err(PeerMisbehaved::IncorrectFinished.into());
        }

        self.transcript.add_message(&m);
        common.check_aligned_handshake()?;
        common.record_layer.set_message_decrypter(
            self.key_schedule
                .application_decrypter(Side::Client)?,
        );

        let resumption_master = self
            .key_schedule
            .derive_resumption_master(&self.transcript.get_current_hash())?;

        common.peer_certificates = self.client_cert_chain.clone();
        for nonce in 0..self.hello.config.send_tls13_tickets {
            self.send_ticket(common, &resumption_master, nonce)?;
        }
        common.start_traffic();

        Ok(Box::new(ExpectTraffic {
            key_schedule: self.key_schedule,
            key_updates_in_a_row: 0,
        }))
    }

    fn send_ticket(
        &self,
        common: &mut CommonState,
        resumption_master: &OkmBlock,
        counter: usize,
    ) -> Result<(), Error> {
        let config = &self.hello.config;
        if !config.session_storage.can_cache() {
            return Ok(());
        }

        let secure_random = config.provider.secure_random;
        let nonce = (counter as u64).to_be_bytes().to_vec();
        let secret = self
            .key_schedule
            .derive_ticket_psk(resumption_master, &nonce);
        let age_add = random_u32(secure_random)?;
        let id = random_vec(secure_random, 32)?;

        let value = Tls13ServerSessionValue::new(
            CommonServerSessionValue::new(
                self.hello.sni.as_deref(),
                self.hello.suite.common.suite,
                self.client_cert_chain.clone(),
                common.alpn_protocol.clone(),
                unix_now(),
            ),
            secret.as_ref(),
            age_add,
            TICKET_LIFETIME_SECS,
        );

        if !config
            .session_storage
            .put(id.clone(), value.into())
        {
            debug!("Ticket not stored; not sending it");
            return Ok(());
        }

        let mut nst = NewSessionTicketPayloadTls13::new(TICKET_LIFETIME_SECS, age_add, nonce, id);
        let nst_exts = ServerExtensions {
            max_early_data: (config.max_early_data_size > 0).then_some(config.max_early_data_size),
            ..ServerExtensions::default()
        };
        nst.extensions = extensions::server_extensions(&nst_exts, ExtensionContext::NewSessionTicket);

        let m = Message::build_handshake(
            ProtocolVersion::TLSv1_3,
            HandshakeMessagePayload {
                typ: HandshakeType::NewSessionTicket,
                payload: HandshakePayload::NewSessionTicketTls13(nst),
            },
        );

        trace!("sending new ticket {:?}", m);
        common.send_handshake(m);
        Ok(())
    }
}

impl State for ServerFlight {
    fn handle(mut self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        // The client's real flight has begun: anything that fails to
        // decrypt from here on is an error.
        common
            .record_layer
            .finish_trial_decryption();

        match self.cursor.current() {
            Slot::ClientCertificate => self.receive_certificate(&m)?,
            Slot::ClientCertificateVerify => self.receive_certificate_verify(&m)?,
            Slot::ClientFinished => return self.receive_finished(common, m),
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
    key_schedule: KeySchedule,
    key_updates_in_a_row: u8,
}

impl State for ExpectTraffic {
    fn handle(mut self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        match &m.payload {
            MessagePayload::Handshake { parsed, .. } => match &parsed.payload {
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
                        &[HandshakeType::KeyUpdate],
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

#[cfg(test)]
mod tests {
    use super::*;

    fn share(group: NamedGroup) -> KeyShareEntry {
        KeyShareEntry::new(group, &[0x42; 32])
    }

    #[test]
    fn key_shares_are_required() {
        let exts = ClientExtensions::default();
        assert_eq!(
            client_key_shares(&exts).unwrap_err(),
            PeerIncompatible::KeyShareExtensionRequired.into()
        );
    }

    #[test]
    fn duplicate_key_shares_are_refused() {
        let exts = ClientExtensions {
            key_shares: Some(vec![
                share(NamedGroup::X25519),
                share(NamedGroup::secp256r1),
                share(NamedGroup::X25519),
            ]),
            ..ClientExtensions::default()
        };
        assert_eq!(
            client_key_shares(&exts).unwrap_err(),
            PeerMisbehaved::OfferedDuplicateKeyShares.into()
        );
    }

    #[test]
    fn distinct_key_shares_are_returned_in_order() {
        let exts = ClientExtensions {
            key_shares: Some(vec![share(NamedGroup::secp256r1), share(NamedGroup::X25519)]),
            ..ClientExtensions::default()
        };
        let shares = client_key_shares(&exts).unwrap();
        assert_eq!(shares[0].group, NamedGroup::secp256r1);
        assert_eq!(shares[1].group, NamedGroup::X25519);
    }
}

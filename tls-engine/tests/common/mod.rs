#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use rsa::pkcs8::EncodePrivateKey;
use tls_engine::crypto::rustcrypto;
use tls_engine::crypto::CryptoProvider;
use tls_engine::internal::msgs::base::Payload;
use tls_engine::internal::msgs::codec::{Codec, Reader};
use tls_engine::internal::msgs::handshake::{ClientHelloPayload, HandshakePayload};
use tls_engine::internal::msgs::message::{Message, MessagePayload, OpaqueMessage, PlainMessage};
use tls_engine::{
    Certificate, ClientConfig, Connection, Error, KeyLog, PinnedCertVerifier, PrivateKey,
    ServerCertVerified, ServerCertVerifier, ServerConfig, ServerName, SubjectPublicKeyInfo,
    SupportedCipherSuite,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyType {
    Rsa,
    Ecdsa,
}

pub static ALL_KEY_TYPES: &[KeyType] = &[KeyType::Rsa, KeyType::Ecdsa];

/// A self-signed certificate and its key.
pub struct Identity {
    pub cert: Certificate,
    pub key: PrivateKey,
    pub spki: SubjectPublicKeyInfo,
}

fn make_identity(kt: KeyType, name: &str) -> Identity {
    let key_pair = match kt {
        KeyType::Ecdsa => rcgen::KeyPair::generate().unwrap(),
        KeyType::Rsa => {
            let rsa = rsa::RsaPrivateKey::new(&mut rand_core::OsRng, 2048).unwrap();
            let der = rsa.to_pkcs8_der().unwrap();
            rcgen::KeyPair::try_from(der.as_bytes()).unwrap()
        }
    };

    let cert = rcgen::CertificateParams::new(vec![name.to_string()])
        .unwrap()
        .self_signed(&key_pair)
        .unwrap();

    Identity {
        cert: Certificate(cert.der().to_vec()),
        key: PrivateKey(key_pair.serialize_der()),
        spki: SubjectPublicKeyInfo(key_pair.public_key_der()),
    }
}

impl KeyType {
    /// The server identity for this key type.  Generated once per test binary.
    pub fn server(self) -> &'static Identity {
        static RSA: OnceLock<Identity> = OnceLock::new();
        static ECDSA: OnceLock<Identity> = OnceLock::new();
        match self {
            Self::Rsa => RSA.get_or_init(|| make_identity(self, "localhost")),
            Self::Ecdsa => ECDSA.get_or_init(|| make_identity(self, "localhost")),
        }
    }

    /// A client identity for this key type.
    pub fn client(self) -> &'static Identity {
        static RSA: OnceLock<Identity> = OnceLock::new();
        static ECDSA: OnceLock<Identity> = OnceLock::new();
        match self {
            Self::Rsa => RSA.get_or_init(|| make_identity(self, "client.example")),
            Self::Ecdsa => ECDSA.get_or_init(|| make_identity(self, "client.example")),
        }
    }
}

pub fn provider_with_suites(suites: &[SupportedCipherSuite]) -> CryptoProvider {
    CryptoProvider {
        cipher_suites: suites.to_vec(),
        ..rustcrypto::provider()
    }
}

pub fn make_server_config(kt: KeyType) -> ServerConfig {
    make_server_config_with_provider(kt, rustcrypto::provider())
}

pub fn make_server_config_with_provider(kt: KeyType, provider: CryptoProvider) -> ServerConfig {
    let id = kt.server();
    ServerConfig::with_single_cert(provider, vec![id.cert.clone()], id.key.clone()).unwrap()
}

/// A server that asks for a client certificate of type `kt`.
pub fn make_server_config_with_client_auth(kt: KeyType, mandatory: bool) -> ServerConfig {
    let client = kt.client();
    let mut verifier = PinnedCertVerifier::new(client.cert.clone(), client.spki.clone());
    if !mandatory {
        verifier = verifier.allow_unauthenticated();
    }

    let mut cfg = make_server_config(kt);
    cfg.verifier = Arc::new(verifier);
    cfg
}

pub fn make_client_config(kt: KeyType) -> ClientConfig {
    make_client_config_with_provider(kt, rustcrypto::provider())
}

pub fn make_client_config_with_provider(kt: KeyType, provider: CryptoProvider) -> ClientConfig {
    let server = kt.server();
    ClientConfig::new(
        provider,
        Arc::new(PinnedCertVerifier::new(
            server.cert.clone(),
            server.spki.clone(),
        )),
    )
}

pub fn make_client_config_with_versions(
    kt: KeyType,
    versions: &[tls_engine::ProtocolVersion],
) -> ClientConfig {
    let mut cfg = make_client_config(kt);
    cfg.versions = versions.to_vec();
    cfg
}

pub fn make_client_config_with_auth(kt: KeyType) -> ClientConfig {
    let client = kt.client();
    make_client_config(kt)
        .with_client_auth_cert(vec![client.cert.clone()], client.key.clone())
        .unwrap()
}

/// A server certificate verifier that counts how often it is consulted.
/// A resumed handshake never consults it.
#[derive(Debug)]
pub struct CountingVerifier {
    inner: PinnedCertVerifier,
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ServerCertVerifier for CountingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        ocsp_response: &[u8],
    ) -> Result<ServerCertVerified, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response)
    }
}

/// A client config whose verifier reports how many full handshakes it saw.
pub fn make_client_config_counting(kt: KeyType) -> (ClientConfig, Arc<CountingVerifier>) {
    let server = kt.server();
    let verifier = Arc::new(CountingVerifier {
        inner: PinnedCertVerifier::new(server.cert.clone(), server.spki.clone()),
        calls: AtomicUsize::new(0),
    });
    let mut cfg = make_client_config(kt);
    cfg.verifier = verifier.clone();
    (cfg, verifier)
}

pub fn server_name(name: &'static str) -> ServerName {
    name.try_into().unwrap()
}

pub fn make_pair_for_configs(
    client_config: ClientConfig,
    server_config: ServerConfig,
) -> (Connection, Connection) {
    make_pair_for_arc_configs(&Arc::new(client_config), &Arc::new(server_config))
}

pub fn make_pair_for_arc_configs(
    client_config: &Arc<ClientConfig>,
    server_config: &Arc<ServerConfig>,
) -> (Connection, Connection) {
    (
        Connection::connect(Arc::clone(client_config), server_name("localhost")).unwrap(),
        Connection::accept(Arc::clone(server_config)).unwrap(),
    )
}

pub fn make_pair(kt: KeyType) -> (Connection, Connection) {
    make_pair_for_configs(make_client_config(kt), make_server_config(kt))
}

pub fn transfer(left: &mut Connection, right: &mut Connection) -> usize {
    let mut buf = [0u8; 262144];
    let mut total = 0;

    while left.wants_write() {
        let sz = {
            let into_buf: &mut dyn io::Write = &mut &mut buf[..];
            left.write_tls(into_buf).unwrap()
        };
        total += sz;
        if sz == 0 {
            return total;
        }

        let mut offs = 0;
        loop {
            let from_buf: &mut dyn io::Read = &mut &buf[offs..sz];
            offs += right.read_tls(from_buf).unwrap();
            if sz == offs {
                break;
            }
        }
    }

    total
}

/// Move everything `left` has to write into a byte vector.
pub fn take_tls(left: &mut Connection) -> Vec<u8> {
    let mut out = Vec::new();
    while left.wants_write() {
        if left.write_tls(&mut out).unwrap() == 0 {
            break;
        }
    }
    out
}

/// Feed raw bytes to `right`.
pub fn give_tls(right: &mut Connection, mut data: &[u8]) {
    while !data.is_empty() {
        let n = right.read_tls(&mut data).unwrap();
        assert!(n > 0);
    }
}

pub enum Altered {
    /// message has been edited in-place (or is unchanged)
    InPlace,
    /// send these raw bytes instead of the message.
    Raw(Vec<u8>),
}

pub fn transfer_altered<F>(left: &mut Connection, filter: F, right: &mut Connection) -> usize
where
    F: Fn(&mut Message) -> Altered,
{
    let data = take_tls(left);
    let mut reader = Reader::init(&data);
    let mut altered = Vec::new();

    while reader.any_left() {
        let message = OpaqueMessage::read(&mut reader).unwrap();
        let plain = message.into_plain_message();

        // encrypted records pass through untouched: they are not
        // (or not meaningfully) parseable here.
        match Message::try_from(plain.clone()) {
            Ok(mut message) => match filter(&mut message) {
                Altered::InPlace => altered.extend(
                    PlainMessage::from(message)
                        .into_unencrypted_opaque()
                        .encode(),
                ),
                Altered::Raw(data) => altered.extend(data),
            },
            Err(_) => altered.extend(plain.into_unencrypted_opaque().encode()),
        }
    }

    give_tls(right, &altered);
    data.len()
}

/// Apply `f` to the message if it is a ClientHello, keeping its encoding
/// in step.
pub fn alter_client_hello(m: &mut Message, f: impl Fn(&mut ClientHelloPayload)) -> Altered {
    if let MessagePayload::Handshake { parsed, encoded } = &mut m.payload {
        if let HandshakePayload::ClientHello(ch) = &mut parsed.payload {
            f(ch);
            *encoded = Payload::new(parsed.get_encoding());
        }
    }
    Altered::InPlace
}

pub fn do_handshake(client: &mut Connection, server: &mut Connection) -> (usize, usize) {
    let (mut to_client, mut to_server) = (0, 0);
    while server.is_handshaking() || client.is_handshaking() {
        to_server += transfer(client, server);
        server.process_new_packets().unwrap();
        to_client += transfer(server, client);
        client.process_new_packets().unwrap();
    }
    (to_server, to_client)
}

#[derive(PartialEq, Debug)]
pub enum ErrorFromPeer {
    Client(Error),
    Server(Error),
}

pub fn do_handshake_until_error(
    client: &mut Connection,
    server: &mut Connection,
) -> Result<(), ErrorFromPeer> {
    while server.is_handshaking() || client.is_handshaking() {
        transfer(client, server);
        server
            .process_new_packets()
            .map_err(ErrorFromPeer::Server)?;
        transfer(server, client);
        client
            .process_new_packets()
            .map_err(ErrorFromPeer::Client)?;
    }

    Ok(())
}

pub fn do_handshake_altered(
    client: &mut Connection,
    alter_server_message: impl Fn(&mut Message) -> Altered,
    alter_client_message: impl Fn(&mut Message) -> Altered,
    server: &mut Connection,
) -> Result<(), ErrorFromPeer> {
    while server.is_handshaking() || client.is_handshaking() {
        transfer_altered(client, &alter_client_message, server);

        server
            .process_new_packets()
            .map_err(ErrorFromPeer::Server)?;

        transfer_altered(server, &alter_server_message, client);

        client
            .process_new_packets()
            .map_err(ErrorFromPeer::Client)?;
    }

    Ok(())
}

/// Run `do_handshake_until_error`, then deliver the failing side's alert
/// and return both errors.
pub fn do_handshake_until_both_error(
    client: &mut Connection,
    server: &mut Connection,
) -> Result<(), Vec<ErrorFromPeer>> {
    match do_handshake_until_error(client, server) {
        Err(server_err @ ErrorFromPeer::Server(_)) => {
            let mut errors = vec![server_err];
            transfer(server, client);
            let client_err = client
                .process_new_packets()
                .map_err(ErrorFromPeer::Client)
                .expect_err("client didn't produce error after server error");
            errors.push(client_err);
            Err(errors)
        }

        Err(client_err @ ErrorFromPeer::Client(_)) => {
            let mut errors = vec![client_err];
            transfer(client, server);
            let server_err = server
                .process_new_packets()
                .map_err(ErrorFromPeer::Server)
                .expect_err("server didn't produce error after client error");
            errors.push(server_err);
            Err(errors)
        }

        Ok(()) => Ok(()),
    }
}

/// Write `data` on `sender` and check it arrives intact at `receiver`.
pub fn send_and_receive(sender: &mut Connection, receiver: &mut Connection, data: &[u8]) {
    use std::io::{Read, Write};

    sender.writer().write_all(data).unwrap();
    transfer(sender, receiver);
    receiver.process_new_packets().unwrap();

    let mut buf = vec![0u8; data.len()];
    receiver
        .reader()
        .read_exact(&mut buf)
        .unwrap();
    assert_eq!(buf, data);
}

/// A `KeyLog` that remembers what it was given.
#[derive(Debug, Default)]
pub struct KeyLogToVec {
    items: Mutex<Vec<KeyLogItem>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyLogItem {
    pub label: String,
    pub client_random: Vec<u8>,
    pub secret: Vec<u8>,
}

impl KeyLogToVec {
    pub fn take(&self) -> Vec<KeyLogItem> {
        std::mem::take(&mut self.items.lock().unwrap())
    }
}

impl KeyLog for KeyLogToVec {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        self.items
            .lock()
            .unwrap()
            .push(KeyLogItem {
                label: label.into(),
                client_random: client_random.into(),
                secret: secret.into(),
            });
    }
}

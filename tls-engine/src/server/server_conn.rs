use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::crypto::{CertifiedKey, CryptoProvider};
use crate::enums::{CipherSuite, ProtocolVersion, SignatureScheme};
use crate::error::Error;
use crate::key::{Certificate, PrivateKey};
use crate::key_log::{KeyLog, NoKeyLog};
use crate::msgs::enums::NamedGroup;
use crate::msgs::handshake::ProtocolName;
use crate::session::ServerSessionValue;
use crate::suites::SupportedCipherSuite;
use crate::verify::{ClientCertVerifier, NoClientAuth};

use super::handy::{AlwaysResolvesChain, ServerSessionMemoryCache};

/// Server-side resumption state, keyed by session id or ticket.
///
/// Values hold master secrets: anyone who can read the store can decrypt
/// the sessions in it. Forgetting entries is always safe, and a store may
/// evict whenever it likes. `take` is different: a taken entry must be
/// gone, because TLS1.3 tickets are single-use.
///
/// Methods take `&self`; implementations bring their own locking.
pub trait StoresServerSessions: Debug + Send + Sync {
    /// Insert or replace. `false` if the value was not kept.
    fn put(&self, key: Vec<u8>, value: ServerSessionValue) -> bool;

    /// Look up without removing.
    fn get(&self, key: &[u8]) -> Option<ServerSessionValue>;

    /// Look up and remove in one step.
    fn take(&self, key: &[u8]) -> Option<ServerSessionValue>;

    /// Forget any value stored against `key`.
    fn remove(&self, key: &[u8]) {
        self.take(key);
    }

    /// Whether issuing a session id is worthwhile. A `true` here is not a
    /// promise to keep the next `put`.
    fn can_cache(&self) -> bool;
}

/// Picks the certificate and key to authenticate with, per connection.
pub trait ResolvesServerCert: Debug + Send + Sync {
    /// `None` fails the handshake with `NoSuitableCertificate`.
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>>;
}

/// What a certificate resolver gets to see of the ClientHello.
#[derive(Debug)]
pub struct ClientHello<'a> {
    pub(super) server_name: Option<&'a str>,
    pub(super) signature_schemes: &'a [SignatureScheme],
    pub(super) alpn: Option<&'a [ProtocolName]>,
    pub(super) cipher_suites: &'a [CipherSuite],
    pub(super) named_groups: Option<&'a [NamedGroup]>,
}

impl<'a> ClientHello<'a> {
    /// The SNI host name, if sent.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name
    }

    /// Schemes the client can verify. The RFC5246 default set when the
    /// client sent no `signature_algorithms`.
    pub fn signature_schemes(&self) -> &[SignatureScheme] {
        self.signature_schemes
    }

    /// The client's ALPN offer, if any.
    pub fn alpn(&self) -> Option<impl Iterator<Item = &'a [u8]>> {
        self.alpn.map(|protocols| {
            protocols
                .iter()
                .map(|proto| proto.as_ref())
        })
    }

    /// Offered suites, in client preference order.
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        self.cipher_suites
    }

    /// The `supported_groups` offer, if any.
    pub fn named_groups(&self) -> Option<&'a [NamedGroup]> {
        self.named_groups
    }
}

/// Server settings, shared by every connection accepted with them.
///
/// `ServerConfig::new` gives TLS1.3 and TLS1.2, an in-memory store of 256
/// sessions, no ALPN, no key logging, two TLS1.3 tickets per handshake and
/// no client authentication.
#[derive(Clone)]
pub struct ServerConfig {
    /// Cryptography: suites in preference order, key exchange groups,
    /// signature verification and randomness.
    pub provider: Arc<CryptoProvider>,

    /// Protocol versions we are willing to negotiate.
    pub versions: Vec<ProtocolVersion>,

    /// Choose suites by our order rather than the client's.
    pub ignore_client_order: bool,

    /// Cap on outgoing record size, header included. `None` means
    /// 16384 bytes of payload, the protocol maximum.
    pub max_fragment_size: Option<usize>,

    /// How to store client sessions.  TLS1.2 session ids and tickets, and
    /// TLS1.3 tickets, are all keys into this store.
    pub session_storage: Arc<dyn StoresServerSessions>,

    /// How to choose a server cert and key.
    pub cert_resolver: Arc<dyn ResolvesServerCert>,

    /// Decides whether to ask for a client certificate, and whether
    /// the one received is acceptable.
    pub verifier: Arc<dyn ClientCertVerifier>,

    /// ALPN protocols, most preferred first. Empty disables ALPN.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// Where to write NSS key log lines.
    pub key_log: Arc<dyn KeyLog>,

    /// Whether to issue a TLS1.2 session ticket to clients that ask for one.
    /// Tickets are references into `session_storage`.
    pub send_tls12_tickets: bool,

    /// TLS1.3 tickets sent after each full handshake. Tickets are
    /// single-use, so each one is good for one resumption; 0 turns
    /// TLS1.3 resumption off.
    pub send_tls13_tickets: usize,

    /// How many bytes of 0-RTT data we are prepared to skip over from a
    /// client that offers it.  Early data is never accepted.
    pub max_early_data_size: u32,

    /// Suites with fewer bits of security than this are never chosen.
    pub min_strength_bits: u16,

    /// Whether a TLS1.2 client may renegotiate, and whether we may ask it
    /// to.  Renegotiation is only ever done securely (RFC5746).
    pub allow_renegotiation: bool,
}

impl ServerConfig {
    /// A configuration using `provider` that authenticates with whatever
    /// `cert_resolver` picks, with everything else at its default.
    pub fn new(provider: CryptoProvider, cert_resolver: Arc<dyn ResolvesServerCert>) -> Self {
        Self {
            provider: Arc::new(provider),
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            ignore_client_order: false,
            max_fragment_size: None,
            session_storage: Arc::new(ServerSessionMemoryCache::new(256)),
            cert_resolver,
            verifier: Arc::new(NoClientAuth),
            alpn_protocols: Vec::new(),
            key_log: Arc::new(NoKeyLog {}),
            send_tls12_tickets: true,
            send_tls13_tickets: 2,
            max_early_data_size: 16384,
            min_strength_bits: 0,
            allow_renegotiation: false,
        }
    }

    /// A configuration that always authenticates with `cert_chain`
    /// (end-entity first) and `key_der`.
    pub fn with_single_cert(
        provider: CryptoProvider,
        cert_chain: Vec<Certificate>,
        key_der: PrivateKey,
    ) -> Result<Self, Error> {
        let private_key = provider
            .key_provider
            .load_private_key(&key_der)?;
        let resolver = AlwaysResolvesChain::new(private_key, cert_chain)?;
        Ok(Self::new(provider, Arc::new(resolver)))
    }

    /// Like [`ServerConfig::with_single_cert`], also stapling
    /// `ocsp` to the certificate for clients that ask.
    pub fn with_single_cert_with_ocsp(
        provider: CryptoProvider,
        cert_chain: Vec<Certificate>,
        key_der: PrivateKey,
        ocsp: Vec<u8>,
    ) -> Result<Self, Error> {
        let private_key = provider
            .key_provider
            .load_private_key(&key_der)?;
        let resolver = AlwaysResolvesChain::new_with_extras(private_key, cert_chain, ocsp)?;
        Ok(Self::new(provider, Arc::new(resolver)))
    }

    /// Whether `v` is enabled and has at least one suite.
    pub fn supports_version(&self, v: ProtocolVersion) -> bool {
        self.versions.contains(&v)
            && self
                .provider
                .cipher_suites
                .iter()
                .any(|cs| cs.version() == v)
    }

    pub(super) fn suites_for(&self, version: ProtocolVersion) -> Vec<SupportedCipherSuite> {
        self.provider
            .cipher_suites
            .iter()
            .copied()
            .filter(|cs| cs.version() == version)
            .collect()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("provider", &self.provider)
            .field("versions", &self.versions)
            .field("ignore_client_order", &self.ignore_client_order)
            .field("alpn_protocols", &self.alpn_protocols)
            .field("send_tls13_tickets", &self.send_tls13_tickets)
            .field("allow_renegotiation", &self.allow_renegotiation)
            .finish_non_exhaustive()
    }
}

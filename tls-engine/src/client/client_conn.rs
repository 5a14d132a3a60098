use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::crypto::{CertifiedKey, CryptoProvider};
use crate::enums::{CipherSuite, ProtocolVersion, SignatureScheme};
use crate::error::Error;
use crate::key::{Certificate, PrivateKey};
use crate::key_log::{KeyLog, NoKeyLog};
use crate::msgs::enums::NamedGroup;
use crate::session::{Tls12ClientSessionValue, Tls13ClientSessionValue};
use crate::suites::SupportedCipherSuite;
use crate::verify::ServerCertVerifier;

use super::handy::{AlwaysResolvesClientCert, ClientSessionMemoryCache, FailResolveClientCert};

/// A trait for the ability to store client session data, so that sessions
/// can be resumed in future connections.
///
/// Generally all data in this interface should be treated as
/// **highly sensitive**, containing enough key material to break all security
/// of the corresponding session.
///
/// `set_`, `insert_`, `remove_` and `take_` operations are mutating; this isn't
/// expressed in the type system to allow implementations freedom in
/// how to achieve interior mutability.  `Mutex` is a common choice.
pub trait ClientSessionStore: fmt::Debug + Send + Sync {
    /// Remember what `NamedGroup` the given server chose.
    fn set_kx_hint(&self, server_name: &ServerName, group: NamedGroup);

    /// This should return the value most recently passed to `set_kx_hint`
    /// for the given `server_name`.
    ///
    /// If `None` is returned, the caller chooses the first configured group,
    /// and an extra round trip might happen if that choice is unsatisfactory
    /// to the server.
    fn kx_hint(&self, server_name: &ServerName) -> Option<NamedGroup>;

    /// Remember a TLS1.2 session.
    ///
    /// At most one of these can be remembered at a time, per `server_name`.
    fn set_tls12_session(&self, server_name: &ServerName, value: Tls12ClientSessionValue);

    /// Get the most recently saved TLS1.2 session for `server_name` provided to `set_tls12_session`.
    fn tls12_session(&self, server_name: &ServerName) -> Option<Tls12ClientSessionValue>;

    /// Remove and forget any saved TLS1.2 session for `server_name`.
    fn remove_tls12_session(&self, server_name: &ServerName);

    /// Remember a TLS1.3 ticket that might be retrieved later from `take_tls13_ticket`, allowing
    /// resumption of this session.
    ///
    /// This can be called multiple times for a given session, allowing multiple independent tickets
    /// to be valid at once.  The number of times this is called is controlled by the server, so
    /// implementations of this trait should apply a reasonable bound of how many items are stored
    /// simultaneously.
    fn insert_tls13_ticket(&self, server_name: &ServerName, value: Tls13ClientSessionValue);

    /// Return a TLS1.3 ticket previously provided to `insert_tls13_ticket`.
    ///
    /// Implementations of this trait must return each value provided to `insert_tls13_ticket` _at most once_.
    fn take_tls13_ticket(&self, server_name: &ServerName) -> Option<Tls13ClientSessionValue>;
}

/// A trait for the ability to choose a certificate chain and
/// private key for the purposes of client authentication.
pub trait ResolvesClientCert: fmt::Debug + Send + Sync {
    /// With the server-supplied acceptable issuers in `root_hint_subjects`,
    /// the server's supported signature schemes in `sigschemes`,
    /// return a certificate chain and signing key to authenticate.
    ///
    /// `root_hint_subjects` is undecoded and unverified by the engine,
    /// but it should be expected to contain DER encodings of X501 NAMEs.
    ///
    /// Return `None` to continue the handshake without any client
    /// authentication.  The server may reject the handshake later
    /// if it requires authentication.
    fn resolve(
        &self,
        root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>>;

    /// Return true if any certificates at all are available.
    fn has_certs(&self) -> bool;
}

/// Common configuration for (typically) all connections made by a program.
///
/// Making one of these can be expensive, and should be once per process
/// rather than once per connection.
///
/// # Defaults
///
/// * [`ClientConfig::versions`]: TLS1.3 and TLS1.2.
/// * [`ClientConfig::session_storage`]: the default stores 256 sessions in memory.
/// * [`ClientConfig::alpn_protocols`]: the default is empty -- no ALPN protocol is negotiated.
/// * [`ClientConfig::key_log`]: key material is not logged.
/// * [`ClientConfig::allow_renegotiation`]: `false`; a HelloRequest is
///   answered with a `no_renegotiation` warning.
#[derive(Clone)]
pub struct ClientConfig {
    /// Cryptography: suites in preference order, key exchange groups,
    /// signature verification and randomness.
    pub provider: Arc<CryptoProvider>,

    /// Protocol versions we are willing to negotiate.
    pub versions: Vec<ProtocolVersion>,

    /// Which ALPN protocols we include in our client hello.
    /// If empty, no ALPN extension is sent.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// How and when the client can resume a previous session.
    pub session_storage: Arc<dyn ClientSessionStore>,

    /// The maximum size of plaintext input to be emitted in a single TLS record.
    /// A value of None is equivalent to the [TLS maximum] of 16 kB.
    ///
    /// [TLS maximum]: https://datatracker.ietf.org/doc/html/rfc8446#section-5.1
    pub max_fragment_size: Option<usize>,

    /// How to decide what client auth certificate/keys to use.
    pub client_auth_cert_resolver: Arc<dyn ResolvesClientCert>,

    /// Whether to support RFC5077 tickets.  You must provide a working
    /// `session_storage` member for this to have any meaningful
    /// effect.
    ///
    /// The default is true.
    pub enable_tickets: bool,

    /// Whether to send the Server Name Indication (SNI) extension
    /// during the client handshake.
    ///
    /// The default is true.
    pub enable_sni: bool,

    /// Whether to ask the server to staple an OCSP response.
    pub request_ocsp: bool,

    /// Whether to offer 0-RTT when resuming with a ticket that allows it.
    /// No early data is sent, so servers are expected to decline.
    pub enable_early_data: bool,

    /// Suites with fewer bits of security than this are never offered.
    pub min_strength_bits: u16,

    /// How to output key material for debugging.  The default
    /// does nothing.
    pub key_log: Arc<dyn KeyLog>,

    /// Whether a TLS1.2 connection may be renegotiated, at the server's
    /// request or ours.  Renegotiation is only ever done securely
    /// (RFC5746).
    pub allow_renegotiation: bool,

    /// Decides whether the server's certificate chain is acceptable.
    pub verifier: Arc<dyn ServerCertVerifier>,
}

impl ClientConfig {
    /// A configuration using `provider` that accepts servers `verifier`
    /// accepts, with everything else at its default.
    pub fn new(provider: CryptoProvider, verifier: Arc<dyn ServerCertVerifier>) -> Self {
        Self {
            provider: Arc::new(provider),
            versions: vec![ProtocolVersion::TLSv1_3, ProtocolVersion::TLSv1_2],
            alpn_protocols: Vec::new(),
            session_storage: Arc::new(ClientSessionMemoryCache::new(256)),
            max_fragment_size: None,
            client_auth_cert_resolver: Arc::new(FailResolveClientCert {}),
            enable_tickets: true,
            enable_sni: true,
            request_ocsp: false,
            enable_early_data: false,
            min_strength_bits: 0,
            key_log: Arc::new(NoKeyLog {}),
            allow_renegotiation: false,
            verifier,
        }
    }

    /// Authenticate with `cert_chain` (end-entity first) and `key_der`
    /// whenever a server asks for a client certificate.
    pub fn with_client_auth_cert(
        mut self,
        cert_chain: Vec<Certificate>,
        key_der: PrivateKey,
    ) -> Result<Self, Error> {
        let private_key = self
            .provider
            .key_provider
            .load_private_key(&key_der)?;
        let resolver = AlwaysResolvesClientCert::new(private_key, cert_chain)?;
        self.client_auth_cert_resolver = Arc::new(resolver);
        Ok(self)
    }

    /// Return true if connections made with this `ClientConfig` will
    /// operate using TLS protocol version `v`.
    pub fn supports_version(&self, v: ProtocolVersion) -> bool {
        self.versions.contains(&v)
            && self
                .provider
                .cipher_suites
                .iter()
                .any(|cs| cs.version() == v)
    }

    pub(super) fn find_cipher_suite(&self, suite: CipherSuite) -> Option<SupportedCipherSuite> {
        self.provider
            .cipher_suites
            .iter()
            .copied()
            .find(|&scs| scs.suite() == suite)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("provider", &self.provider)
            .field("versions", &self.versions)
            .field("alpn_protocols", &self.alpn_protocols)
            .field("enable_tickets", &self.enable_tickets)
            .field("enable_sni", &self.enable_sni)
            .field("allow_renegotiation", &self.allow_renegotiation)
            .finish_non_exhaustive()
    }
}

/// Encodes ways a client can know the expected name of the server.
///
/// This currently covers knowing the DNS name of the server, but
/// will be extended in the future to supporting privacy-preserving names
/// for the server ("ECH").  For this reason this enum is `non_exhaustive`.
///
/// # Making one
///
/// If you have a DNS name as a `&str`, this type implements `TryFrom<&str>`,
/// so you can do:
///
/// ```
/// # use tls_engine::ServerName;
/// ServerName::try_from("example.com").expect("invalid DNS name");
///
/// // or, alternatively...
///
/// let x = "example.com".try_into().expect("invalid DNS name");
/// # let _: ServerName = x;
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ServerName {
    /// The server is identified by a DNS name.  The name
    /// is sent in the TLS Server Name Indication (SNI)
    /// extension.
    DnsName(String),

    /// The server is identified by an IP address. SNI is not
    /// done.
    IpAddress(IpAddr),
}

impl ServerName {
    /// The name to put in the SNI extension, if any.
    pub(crate) fn for_sni(&self) -> Option<&str> {
        match self {
            Self::DnsName(name) => Some(name.trim_end_matches('.')),
            Self::IpAddress(_) => None,
        }
    }
}

/// Attempt to make a ServerName from a string by parsing
/// it as a DNS name or an IP address.
impl TryFrom<&str> for ServerName {
    type Error = InvalidDnsNameError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::IpAddress(ip));
        }

        if is_valid_dns_name(s) {
            Ok(Self::DnsName(s.to_ascii_lowercase()))
        } else {
            Err(InvalidDnsNameError)
        }
    }
}

fn is_valid_dns_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    })
}

/// The provided input could not be parsed because
/// it is not a syntactically-valid DNS Name.
#[derive(Debug)]
pub struct InvalidDnsNameError;

impl fmt::Display for InvalidDnsNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid dns name")
    }
}

impl std::error::Error for InvalidDnsNameError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_names() {
        assert_eq!(
            ServerName::try_from("Example.COM").unwrap(),
            ServerName::DnsName("example.com".into())
        );
        assert!(ServerName::try_from("a-b.example.com.").is_ok());
        assert!(ServerName::try_from("").is_err());
        assert!(ServerName::try_from("-bad.example").is_err());
        assert!(ServerName::try_from("bad..example").is_err());
        assert!(ServerName::try_from("spa ce.example").is_err());
        assert!(ServerName::try_from(&*"a".repeat(64)).is_err());
    }

    #[test]
    fn ip_addresses_have_no_sni() {
        let name = ServerName::try_from("192.0.2.1").unwrap();
        assert!(matches!(name, ServerName::IpAddress(_)));
        assert_eq!(name.for_sni(), None);

        let name = ServerName::try_from("::1").unwrap();
        assert_eq!(name.for_sni(), None);

        let name = ServerName::try_from("example.com.").unwrap();
        assert_eq!(name.for_sni(), Some("example.com"));
    }
}

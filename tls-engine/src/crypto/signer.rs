use std::fmt::Debug;
use std::sync::Arc;

use crate::enums::{SignatureAlgorithm, SignatureScheme};
use crate::error::Error;
use crate::key::Certificate;

/// A private key used to authenticate this side of a handshake.
///
/// Load one with
/// [`KeyProvider::load_private_key()`](super::KeyProvider::load_private_key).
pub trait SigningKey: Debug + Send + Sync {
    /// Pick one of the peer's `offered` schemes this key can produce, or
    /// `None` if there is none.
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>>;

    /// The key's algorithm family.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Decrypt a TLS1.2 ClientKeyExchange for static RSA key transport.
    ///
    /// A failure here must not be observable by the peer; the server
    /// substitutes a random premaster instead.
    fn decrypt_key_exchange(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        Err(Error::General("key cannot decrypt".into()))
    }

    /// True for RSA keys, which can do static RSA key transport.
    fn supports_key_transport(&self) -> bool {
        false
    }
}

/// A key bound to one signature scheme.
pub trait Signer: Debug + Send + Sync {
    /// Sign `message`, hashing it as the scheme requires.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error>;

    /// The scheme `sign` uses.
    fn scheme(&self) -> SignatureScheme;
}

/// A certificate chain with its private key, and optionally an OCSP
/// response to staple.
#[derive(Clone, Debug)]
pub struct CertifiedKey {
    /// End-entity certificate first.
    pub cert: Vec<Certificate>,

    /// Key for the end-entity certificate.
    pub key: Arc<dyn SigningKey>,

    /// DER-encoded OCSP response.
    pub ocsp: Option<Vec<u8>>,
}

impl CertifiedKey {
    /// A chain and key, without OCSP.
    pub fn new(cert: Vec<Certificate>, key: Arc<dyn SigningKey>) -> Self {
        Self {
            cert,
            key,
            ocsp: None,
        }
    }

    /// The first certificate of the chain.
    pub fn end_entity_cert(&self) -> Result<&Certificate, Error> {
        self.cert
            .first()
            .ok_or(Error::NoSuitableCertificate)
    }
}

//! Pluggable cryptography.
//!
//! The engine itself never touches a primitive directly: hashing, HMAC,
//! AEAD, key exchange, signing, signature verification and RSA key
//! transport are all reached through the traits in this module, bundled
//! together in a [`CryptoProvider`].

use std::fmt::Debug;
use std::sync::Arc;

use zeroize::Zeroize;

use crate::enums::SignatureScheme;
use crate::error::Error;
use crate::key::{PrivateKey, SubjectPublicKeyInfo};
use crate::msgs::enums::NamedGroup;
use crate::suites::SupportedCipherSuite;

/// TLS message encryption/decryption interfaces.
pub mod cipher;

/// Finite-field Diffie-Hellman group parameters.
pub mod ffdhe;

/// Hashing interfaces.
pub mod hash;

/// HMAC interfaces.
pub mod hmac;

/// Message signing interfaces.
pub mod signer;

/// Cryptography specific to TLS1.2.
pub mod tls12;

/// Cryptography specific to TLS1.3.
pub mod tls13;

/// A provider built on the RustCrypto crates.
#[cfg(feature = "rustcrypto")]
pub mod rustcrypto;

pub use signer::{CertifiedKey, Signer, SigningKey};

/// Everything the engine needs from a cryptography library.
///
/// The cipher suites listed here are the ones a configuration starts out
/// with; they are also the only ones it can ever negotiate.
#[derive(Clone)]
pub struct CryptoProvider {
    /// Cipher suites, in order of preference.
    pub cipher_suites: Vec<SupportedCipherSuite>,

    /// Key exchange groups, in order of preference.
    ///
    /// The first entry is the one a client sends a key share for.
    pub kx_groups: Vec<&'static dyn SupportedKxGroup>,

    /// Verifies handshake signatures made by the peer.
    pub signature_verifier: &'static dyn SignatureVerifier,

    /// Source of cryptographically secure randomness.
    pub secure_random: &'static dyn SecureRandom,

    /// RSA encryption of a TLS1.2 premaster secret.
    pub key_transport: &'static dyn KeyTransport,

    /// Loads private keys into [`SigningKey`]s.
    pub key_provider: &'static dyn KeyProvider,
}

impl CryptoProvider {
    pub(crate) fn find_kx_group(&self, name: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups
            .iter()
            .find(|skxg| skxg.name() == name)
            .copied()
    }
}

impl Debug for CryptoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("cipher_suites", &self.cipher_suites)
            .field(
                "kx_groups",
                &self
                    .kx_groups
                    .iter()
                    .map(|g| g.name())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// A source of cryptographically secure randomness.
pub trait SecureRandom: Send + Sync + Debug {
    /// Fill the given buffer with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed>;
}

/// Random material generation failed.
#[derive(Debug)]
pub struct GetRandomFailed;

/// Make a `Vec<u8>` of the given size containing random material.
pub(crate) fn random_vec(
    secure_random: &dyn SecureRandom,
    len: usize,
) -> Result<Vec<u8>, GetRandomFailed> {
    let mut v = vec![0; len];
    secure_random.fill(&mut v)?;
    Ok(v)
}

/// Return a uniformly random `u32`.
pub(crate) fn random_u32(secure_random: &dyn SecureRandom) -> Result<u32, GetRandomFailed> {
    let mut buf = [0u8; 4];
    secure_random.fill(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// A supported key exchange group.
///
/// This has a TLS-level name expressed using the [`NamedGroup`] enum, and
/// a function which produces an [`ActiveKeyExchange`].
pub trait SupportedKxGroup: Send + Sync + Debug {
    /// Start a key exchange.
    ///
    /// This prepares an ephemeral secret key in the supported group, and a
    /// corresponding public key.
    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error>;

    /// Named group the SupportedKxGroup operates in.
    fn name(&self) -> NamedGroup;
}

/// An in-progress key exchange originating from a [`SupportedKxGroup`].
pub trait ActiveKeyExchange: Send + Sync {
    /// Completes the key exchange, given the peer's public key.
    ///
    /// This consumes and so terminates the key exchange.  Invalid peer
    /// public keys are reported as `PeerMisbehaved::InvalidKeyShare`.
    fn complete(self: Box<Self>, peer_pub_key: &[u8]) -> Result<SharedSecret, Error>;

    /// Completes the key exchange for use as a TLS1.2 premaster secret.
    ///
    /// For finite-field groups RFC5246 8.1.2 strips leading zero bytes from
    /// the agreed value; TLS1.3 keeps them (RFC8446 7.4.1).
    fn complete_for_tls12(self: Box<Self>, peer_pub_key: &[u8]) -> Result<SharedSecret, Error> {
        let ffdhe = self.group().is_ffdhe();
        let mut secret = self.complete(peer_pub_key)?;
        if ffdhe {
            secret.strip_leading_zeros();
        }
        Ok(secret)
    }

    /// Return the public key being used.
    fn pub_key(&self) -> &[u8];

    /// Return the group being used.
    fn group(&self) -> NamedGroup;
}

/// The result from [`ActiveKeyExchange::complete`], wiped on drop.
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Returns the shared secret as a slice of bytes.
    pub fn secret_bytes(&self) -> &[u8] {
        &self.0
    }

    fn strip_leading_zeros(&mut self) {
        let start = self
            .0
            .iter()
            .position(|b| *b != 0)
            .unwrap_or(self.0.len());
        self.0.drain(..start);
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl From<&[u8]> for SharedSecret {
    fn from(source: &[u8]) -> Self {
        Self(source.to_vec())
    }
}

impl From<Vec<u8>> for SharedSecret {
    fn from(source: Vec<u8>) -> Self {
        Self(source)
    }
}

/// Verifies signatures made during the handshake.
///
/// The public key is supplied as the DER `SubjectPublicKeyInfo` that a
/// certificate verifier extracted from the peer's end-entity certificate.
pub trait SignatureVerifier: Send + Sync + Debug {
    /// Check `signature` over `message` using `scheme`.
    ///
    /// Failures are reported as `Error::InvalidCertificate(CertificateError::BadSignature)`.
    fn verify(
        &self,
        public_key: &SubjectPublicKeyInfo,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error>;

    /// Which signature schemes this verifier supports, in preference order.
    fn supported_schemes(&self) -> Vec<SignatureScheme>;
}

/// Encrypts a TLS1.2 premaster secret to the server's RSA public key.
pub trait KeyTransport: Send + Sync + Debug {
    /// Return the RSAES-PKCS1-v1_5 encryption of `premaster_secret`.
    fn encrypt_premaster(
        &self,
        public_key: &SubjectPublicKeyInfo,
        premaster_secret: &[u8],
    ) -> Result<Vec<u8>, Error>;
}

/// Turns private key bytes into a [`SigningKey`].
pub trait KeyProvider: Send + Sync + Debug {
    /// Decode and validate a PKCS#8 private signing key.
    fn load_private_key(&self, key: &PrivateKey) -> Result<Arc<dyn SigningKey>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counting;

    impl SecureRandom for Counting {
        fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = i as u8;
            }
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl SecureRandom for Broken {
        fn fill(&self, _: &mut [u8]) -> Result<(), GetRandomFailed> {
            Err(GetRandomFailed)
        }
    }

    struct FixedSecret(NamedGroup);

    impl ActiveKeyExchange for FixedSecret {
        fn complete(self: Box<Self>, _: &[u8]) -> Result<SharedSecret, Error> {
            Ok(SharedSecret::from(&[0, 0, 7, 0][..]))
        }

        fn pub_key(&self) -> &[u8] {
            &[]
        }

        fn group(&self) -> NamedGroup {
            self.0
        }
    }

    #[test]
    fn tls12_strips_ffdhe_zeros_only() {
        let ff = Box::new(FixedSecret(NamedGroup::FFDHE2048));
        assert_eq!(ff.complete_for_tls12(&[]).unwrap().secret_bytes(), &[7, 0]);

        let ec = Box::new(FixedSecret(NamedGroup::X25519));
        assert_eq!(ec.complete_for_tls12(&[]).unwrap().secret_bytes(), &[0, 0, 7, 0]);

        let ff = Box::new(FixedSecret(NamedGroup::FFDHE3072));
        assert_eq!(ff.complete(&[]).unwrap().secret_bytes(), &[0, 0, 7, 0]);
    }

    #[test]
    fn random_helpers() {
        assert_eq!(random_vec(&Counting, 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(random_u32(&Counting).unwrap(), 0x00010203);
        assert!(random_vec(&Broken, 1).is_err());
        assert_eq!(
            Error::from(random_u32(&Broken).unwrap_err()),
            Error::FailedToGetRandomBytes
        );
    }
}

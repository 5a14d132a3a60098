use std::sync::Arc;

use pkcs8::DecodePrivateKey;
use rand_core::OsRng;
use rsa::{pkcs1v15, pss, Pkcs1v15Encrypt, RsaPrivateKey};
use signature::{RandomizedSigner, SignatureEncoding};

use crate::crypto::{KeyProvider, Signer, SigningKey};
use crate::enums::{SignatureAlgorithm, SignatureScheme};
use crate::error::Error;
use crate::key::PrivateKey;

/// Loads PKCS#8 P-256 and RSA private keys.
#[derive(Debug)]
pub struct Pkcs8KeyProvider;

impl KeyProvider for Pkcs8KeyProvider {
    fn load_private_key(&self, key: &PrivateKey) -> Result<Arc<dyn SigningKey>, Error> {
        if let Ok(ecdsa) = p256::ecdsa::SigningKey::from_pkcs8_der(&key.0) {
            return Ok(Arc::new(EcdsaSigningKeyP256::new(ecdsa)));
        }

        if let Ok(rsa) = RsaPrivateKey::from_pkcs8_der(&key.0) {
            return Ok(Arc::new(RsaSigningKey::new(rsa)));
        }

        Err(Error::General(
            "failed to parse private key as P-256 or RSA".into(),
        ))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct EcdsaSigningKeyP256 {
    key: Arc<p256::ecdsa::SigningKey>,
}

impl EcdsaSigningKeyP256 {
    pub(crate) fn new(key: p256::ecdsa::SigningKey) -> Self {
        Self { key: Arc::new(key) }
    }
}

impl SigningKey for EcdsaSigningKeyP256 {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        if offered.contains(&SignatureScheme::ECDSA_NISTP256_SHA256) {
            Some(Box::new(self.clone()))
        } else {
            None
        }
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::ECDSA
    }
}

impl Signer for EcdsaSigningKeyP256 {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        self.key
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(|_| Error::General("signing failed".into()))
            .map(|sig: p256::ecdsa::DerSignature| sig.to_vec())
    }

    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::ECDSA_NISTP256_SHA256
    }
}

/// RSA schemes we can sign with, most preferred first.
static RSA_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
];

#[derive(Debug)]
pub(crate) struct RsaSigningKey {
    key: Arc<RsaPrivateKey>,
}

impl RsaSigningKey {
    pub(crate) fn new(key: RsaPrivateKey) -> Self {
        Self { key: Arc::new(key) }
    }
}

impl SigningKey for RsaSigningKey {
    fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<Box<dyn Signer>> {
        RSA_SCHEMES
            .iter()
            .find(|scheme| offered.contains(scheme))
            .map(|scheme| {
                Box::new(RsaSigner {
                    key: self.key.clone(),
                    scheme: *scheme,
                }) as Box<dyn Signer>
            })
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::RSA
    }

    fn decrypt_key_exchange(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self.key
            .decrypt_blinded(&mut OsRng, Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| Error::DecryptError)
    }

    fn supports_key_transport(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct RsaSigner {
    key: Arc<RsaPrivateKey>,
    scheme: SignatureScheme,
}

impl Signer for RsaSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        let key = RsaPrivateKey::clone(&self.key);
        let sig = match self.scheme {
            SignatureScheme::RSA_PSS_SHA256 => pss::BlindedSigningKey::<sha2::Sha256>::new(key)
                .try_sign_with_rng(&mut OsRng, message)
                .map(|sig| sig.to_vec()),
            SignatureScheme::RSA_PSS_SHA384 => pss::BlindedSigningKey::<sha2::Sha384>::new(key)
                .try_sign_with_rng(&mut OsRng, message)
                .map(|sig| sig.to_vec()),
            SignatureScheme::RSA_PKCS1_SHA256 => pkcs1v15::SigningKey::<sha2::Sha256>::new(key)
                .try_sign_with_rng(&mut OsRng, message)
                .map(|sig| sig.to_vec()),
            SignatureScheme::RSA_PKCS1_SHA384 => pkcs1v15::SigningKey::<sha2::Sha384>::new(key)
                .try_sign_with_rng(&mut OsRng, message)
                .map(|sig| sig.to_vec()),
            _ => return Err(Error::General("unsupported RSA signature scheme".into())),
        };

        sig.map_err(|_| Error::General("signing failed".into()))
    }

    fn scheme(&self) -> SignatureScheme {
        self.scheme
    }
}

#[cfg(test)]
mod tests {
    use pkcs8::EncodePrivateKey;

    use super::*;

    fn p256_pkcs8() -> PrivateKey {
        let key = p256::ecdsa::SigningKey::random(&mut OsRng);
        PrivateKey(key.to_pkcs8_der().unwrap().as_bytes().to_vec())
    }

    #[test]
    fn loads_p256_keys() {
        let key = Pkcs8KeyProvider
            .load_private_key(&p256_pkcs8())
            .unwrap();
        assert_eq!(key.algorithm(), SignatureAlgorithm::ECDSA);
        assert!(!key.supports_key_transport());

        assert!(key
            .choose_scheme(&[SignatureScheme::RSA_PSS_SHA256])
            .is_none());
        let signer = key
            .choose_scheme(&[SignatureScheme::ECDSA_NISTP256_SHA256])
            .unwrap();
        assert!(!signer.sign(b"message").unwrap().is_empty());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Pkcs8KeyProvider
            .load_private_key(&PrivateKey(vec![0x30, 0x00]))
            .is_err());
    }

    #[test]
    fn rsa_prefers_pss() {
        let rsa = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let key = RsaSigningKey::new(rsa);
        assert!(key.supports_key_transport());

        let signer = key
            .choose_scheme(&[
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
            ])
            .unwrap();
        assert_eq!(signer.scheme(), SignatureScheme::RSA_PSS_SHA384);
        assert_eq!(signer.sign(b"hello").unwrap().len(), 128);

        assert_eq!(
            key.decrypt_key_exchange(&[0u8; 128]).unwrap_err(),
            Error::DecryptError
        );
    }
}

use pkcs8::DecodePublicKey;
use rand_core::OsRng;
use rsa::{pkcs1v15, pss, Pkcs1v15Encrypt, RsaPublicKey};
use signature::Verifier;

use crate::crypto::{KeyTransport, SignatureVerifier};
use crate::enums::SignatureScheme;
use crate::error::{CertificateError, Error, PeerMisbehaved};
use crate::key::SubjectPublicKeyInfo;

/// Verifies ECDSA P-256 and RSA handshake signatures.
#[derive(Debug)]
pub struct RustCryptoVerifier;

static SUPPORTED_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
];

fn bad_signature<E>(_: E) -> Error {
    Error::InvalidCertificate(CertificateError::BadSignature)
}

fn rsa_key(spki: &SubjectPublicKeyInfo) -> Result<RsaPublicKey, Error> {
    RsaPublicKey::from_public_key_der(&spki.0).map_err(bad_signature)
}

impl SignatureVerifier for RustCryptoVerifier {
    fn verify(
        &self,
        public_key: &SubjectPublicKeyInfo,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        match scheme {
            SignatureScheme::ECDSA_NISTP256_SHA256 => {
                let key = p256::ecdsa::VerifyingKey::from_public_key_der(&public_key.0)
                    .map_err(bad_signature)?;
                let sig = p256::ecdsa::DerSignature::try_from(signature).map_err(bad_signature)?;
                key.verify(message, &sig)
                    .map_err(bad_signature)
            }
            SignatureScheme::RSA_PSS_SHA256 => {
                let sig = pss::Signature::try_from(signature).map_err(bad_signature)?;
                pss::VerifyingKey::<sha2::Sha256>::new(rsa_key(public_key)?)
                    .verify(message, &sig)
                    .map_err(bad_signature)
            }
            SignatureScheme::RSA_PSS_SHA384 => {
                let sig = pss::Signature::try_from(signature).map_err(bad_signature)?;
                pss::VerifyingKey::<sha2::Sha384>::new(rsa_key(public_key)?)
                    .verify(message, &sig)
                    .map_err(bad_signature)
            }
            SignatureScheme::RSA_PKCS1_SHA256 => {
                let sig = pkcs1v15::Signature::try_from(signature).map_err(bad_signature)?;
                pkcs1v15::VerifyingKey::<sha2::Sha256>::new(rsa_key(public_key)?)
                    .verify(message, &sig)
                    .map_err(bad_signature)
            }
            SignatureScheme::RSA_PKCS1_SHA384 => {
                let sig = pkcs1v15::Signature::try_from(signature).map_err(bad_signature)?;
                pkcs1v15::VerifyingKey::<sha2::Sha384>::new(rsa_key(public_key)?)
                    .verify(message, &sig)
                    .map_err(bad_signature)
            }
            _ => Err(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme.into()),
        }
    }

    fn supported_schemes(&self) -> Vec<SignatureScheme> {
        SUPPORTED_SCHEMES.to_vec()
    }
}

/// RSAES-PKCS1-v1_5 encryption of a TLS1.2 premaster secret.
#[derive(Debug)]
pub struct RsaKeyTransport;

impl KeyTransport for RsaKeyTransport {
    fn encrypt_premaster(
        &self,
        public_key: &SubjectPublicKeyInfo,
        premaster_secret: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let key = RsaPublicKey::from_public_key_der(&public_key.0)
            .map_err(|_| Error::InvalidCertificate(CertificateError::BadEncoding))?;
        key.encrypt(&mut OsRng, Pkcs1v15Encrypt, premaster_secret)
            .map_err(|_| Error::EncryptError)
    }
}

#[cfg(test)]
mod tests {
    use pkcs8::EncodePublicKey;
    use rsa::RsaPrivateKey;

    use super::super::sign::RsaSigningKey;
    use super::*;
    use crate::crypto::SigningKey;

    fn rsa_pair() -> (RsaPrivateKey, SubjectPublicKeyInfo) {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let spki = key
            .to_public_key()
            .to_public_key_der()
            .unwrap();
        (key, SubjectPublicKeyInfo(spki.as_bytes().to_vec()))
    }

    #[test]
    fn p256_signatures_verify() {
        let key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let spki = SubjectPublicKeyInfo(
            key.verifying_key()
                .to_public_key_der()
                .unwrap()
                .as_bytes()
                .to_vec(),
        );
        let signer = super::super::sign::EcdsaSigningKeyP256::new(key);
        let sig = crate::crypto::Signer::sign(&signer, b"msg").unwrap();

        let scheme = SignatureScheme::ECDSA_NISTP256_SHA256;
        assert!(RustCryptoVerifier
            .verify(&spki, scheme, b"msg", &sig)
            .is_ok());
        assert_eq!(
            RustCryptoVerifier
                .verify(&spki, scheme, b"other", &sig)
                .unwrap_err(),
            Error::InvalidCertificate(CertificateError::BadSignature)
        );
    }

    #[test]
    fn rsa_signatures_and_key_transport() {
        let (private, spki) = rsa_pair();
        let signing = RsaSigningKey::new(private);

        for scheme in SUPPORTED_SCHEMES
            .iter()
            .filter(|s| s.algorithm() == crate::enums::SignatureAlgorithm::RSA)
        {
            let signer = signing.choose_scheme(&[*scheme]).unwrap();
            let sig = signer.sign(b"transcript").unwrap();
            assert!(RustCryptoVerifier
                .verify(&spki, *scheme, b"transcript", &sig)
                .is_ok());
        }

        let ct = RsaKeyTransport
            .encrypt_premaster(&spki, &[3; 48])
            .unwrap();
        assert_eq!(signing.decrypt_key_exchange(&ct).unwrap(), vec![3; 48]);
    }

    #[test]
    fn unadvertised_schemes_are_refused() {
        let (_, spki) = rsa_pair();
        assert_eq!(
            RustCryptoVerifier
                .verify(&spki, SignatureScheme::ED25519, b"", &[])
                .unwrap_err(),
            Error::PeerMisbehaved(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme)
        );
    }
}

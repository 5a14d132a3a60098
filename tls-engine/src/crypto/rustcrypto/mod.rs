//! A [`CryptoProvider`] built from the RustCrypto crates.
//!
//! `sha2` and `hmac` provide hashing, the PRF and HKDF; `aes-gcm` and
//! `chacha20poly1305` protect records; `x25519-dalek` and `p256` do
//! elliptic-curve key exchange, and the RFC7919 groups use `rsa`'s big
//! integers; `p256` and `rsa` sign and verify.

use rand_core::{OsRng, RngCore};

use crate::crypto::tls12::PrfUsingHmac;
use crate::crypto::tls13::HkdfUsingHmac;
use crate::crypto::{CryptoProvider, GetRandomFailed, SecureRandom, SupportedKxGroup};
use crate::enums::{CipherSuite, SignatureScheme};
use crate::suites::{CipherSuiteCommon, KeyExchangeKind, SupportedCipherSuite};
use crate::tls12::Tls12CipherSuite;
use crate::tls13::Tls13CipherSuite;

pub(crate) mod aead;
pub(crate) mod hash;
pub(crate) mod hmac;
pub(crate) mod kx;
pub(crate) mod sign;
pub(crate) mod verify;

pub use kx::{Ffdhe, SecP256r1, FFDHE2048, FFDHE3072, X25519};
pub use sign::Pkcs8KeyProvider;
pub use verify::{RsaKeyTransport, RustCryptoVerifier};

/// A `CryptoProvider` with the default suites and groups of this module.
///
/// Suites are ordered TLS1.3 first, then ECDHE. Static RSA, finite-field
/// DHE and the RFC7919 groups are opt-in via [`ALL_CIPHER_SUITES`] and
/// [`ALL_KX_GROUPS`].
pub fn provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        kx_groups: DEFAULT_KX_GROUPS.to_vec(),
        signature_verifier: &RustCryptoVerifier,
        secure_random: &OsRandom,
        key_transport: &RsaKeyTransport,
        key_provider: &Pkcs8KeyProvider,
    }
}

/// Operating system randomness via `getrandom`.
#[derive(Debug)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|_| GetRandomFailed)
    }
}

/// The key exchange groups a default configuration offers.
pub static DEFAULT_KX_GROUPS: &[&dyn SupportedKxGroup] = &[&X25519, &SecP256r1];

/// All key exchange groups, most preferred first.
///
/// A client whose first group is finite-field sends a multi-hundred byte
/// TLS1.3 key share for it, so these come last.
pub static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] = &[&X25519, &SecP256r1, &FFDHE2048, &FFDHE3072];

/// The suites a default configuration offers.
///
/// Static RSA key transport lacks forward secrecy, so it is only
/// offered when a configuration asks for it from [`ALL_CIPHER_SUITES`].
pub static DEFAULT_CIPHER_SUITES: &[SupportedCipherSuite] = &[
    TLS13_AES_256_GCM_SHA384,
    TLS13_AES_128_GCM_SHA256,
    TLS13_CHACHA20_POLY1305_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
];

/// Every suite implemented here.
pub static ALL_CIPHER_SUITES: &[SupportedCipherSuite] = &[
    TLS13_AES_256_GCM_SHA384,
    TLS13_AES_128_GCM_SHA256,
    TLS13_CHACHA20_POLY1305_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    TLS_DHE_RSA_WITH_AES_256_GCM_SHA384,
    TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    TLS_RSA_WITH_AES_256_GCM_SHA384,
    TLS_RSA_WITH_AES_128_GCM_SHA256,
];

static HKDF_SHA256: HkdfUsingHmac<'static> = HkdfUsingHmac(&hmac::HMAC_SHA256);
static HKDF_SHA384: HkdfUsingHmac<'static> = HkdfUsingHmac(&hmac::HMAC_SHA384);
static PRF_SHA256: PrfUsingHmac<'static> = PrfUsingHmac(&hmac::HMAC_SHA256);
static PRF_SHA384: PrfUsingHmac<'static> = PrfUsingHmac(&hmac::HMAC_SHA384);

/// The TLS1.3 ciphersuite TLS_AES_128_GCM_SHA256
pub static TLS13_AES_128_GCM_SHA256: SupportedCipherSuite =
    SupportedCipherSuite::Tls13(&Tls13CipherSuite {
        common: CipherSuiteCommon {
            suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            hash_provider: &hash::SHA256,
        },
        hkdf_provider: &HKDF_SHA256,
        aead_alg: &aead::AES_128_GCM,
    });

/// The TLS1.3 ciphersuite TLS_AES_256_GCM_SHA384
pub static TLS13_AES_256_GCM_SHA384: SupportedCipherSuite =
    SupportedCipherSuite::Tls13(&Tls13CipherSuite {
        common: CipherSuiteCommon {
            suite: CipherSuite::TLS13_AES_256_GCM_SHA384,
            hash_provider: &hash::SHA384,
        },
        hkdf_provider: &HKDF_SHA384,
        aead_alg: &aead::AES_256_GCM,
    });

/// The TLS1.3 ciphersuite TLS_CHACHA20_POLY1305_SHA256
pub static TLS13_CHACHA20_POLY1305_SHA256: SupportedCipherSuite =
    SupportedCipherSuite::Tls13(&Tls13CipherSuite {
        common: CipherSuiteCommon {
            suite: CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
            hash_provider: &hash::SHA256,
        },
        hkdf_provider: &HKDF_SHA256,
        aead_alg: &aead::CHACHA20_POLY1305,
    });

static TLS12_ECDSA_SCHEMES: &[SignatureScheme] = &[SignatureScheme::ECDSA_NISTP256_SHA256];

static TLS12_RSA_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA256,
];

macro_rules! tls12_suite {
    ($name:ident, $kx:ident, $sign:ident, $hash:ident, $prf:ident, $aead:ident) => {
        #[doc = concat!("The TLS1.2 ciphersuite ", stringify!($name))]
        pub static $name: SupportedCipherSuite =
            SupportedCipherSuite::Tls12(&Tls12CipherSuite {
                common: CipherSuiteCommon {
                    suite: CipherSuite::$name,
                    hash_provider: &hash::$hash,
                },
                kx: KeyExchangeKind::$kx,
                sign: $sign,
                prf_provider: &$prf,
                aead_alg: &aead::$aead,
            });
    };
}

tls12_suite!(
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    Ecdhe,
    TLS12_ECDSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    AES_128_GCM
);
tls12_suite!(
    TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    Ecdhe,
    TLS12_ECDSA_SCHEMES,
    SHA384,
    PRF_SHA384,
    AES_256_GCM
);
tls12_suite!(
    TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    Ecdhe,
    TLS12_ECDSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    CHACHA20_POLY1305
);
tls12_suite!(
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    Ecdhe,
    TLS12_RSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    AES_128_GCM
);
tls12_suite!(
    TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    Ecdhe,
    TLS12_RSA_SCHEMES,
    SHA384,
    PRF_SHA384,
    AES_256_GCM
);
tls12_suite!(
    TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    Ecdhe,
    TLS12_RSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    CHACHA20_POLY1305
);
tls12_suite!(
    TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
    Dhe,
    TLS12_RSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    AES_128_GCM
);
tls12_suite!(
    TLS_DHE_RSA_WITH_AES_256_GCM_SHA384,
    Dhe,
    TLS12_RSA_SCHEMES,
    SHA384,
    PRF_SHA384,
    AES_256_GCM
);
tls12_suite!(
    TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    Dhe,
    TLS12_RSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    CHACHA20_POLY1305
);
tls12_suite!(
    TLS_RSA_WITH_AES_128_GCM_SHA256,
    StaticRsa,
    TLS12_RSA_SCHEMES,
    SHA256,
    PRF_SHA256,
    AES_128_GCM
);
tls12_suite!(
    TLS_RSA_WITH_AES_256_GCM_SHA384,
    StaticRsa,
    TLS12_RSA_SCHEMES,
    SHA384,
    PRF_SHA384,
    AES_256_GCM
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_suites_are_a_forward_secret_subset() {
        for suite in DEFAULT_CIPHER_SUITES {
            assert!(ALL_CIPHER_SUITES.contains(suite));
            if let Some(tls12) = suite.tls12() {
                assert_eq!(tls12.kx, KeyExchangeKind::Ecdhe);
            }
        }
    }

    #[test]
    fn provider_has_everything() {
        let p = provider();
        assert_eq!(p.cipher_suites.len(), DEFAULT_CIPHER_SUITES.len());
        assert!(p
            .find_kx_group(crate::msgs::enums::NamedGroup::X25519)
            .is_some());
        assert!(p
            .kx_groups
            .iter()
            .all(|group| !group.name().is_ffdhe()));
        let mut buf = [0u8; 32];
        p.secure_random.fill(&mut buf).unwrap();
        assert_ne!(buf, [0u8; 32]);
    }

    #[test]
    fn implemented_suites_agree_with_the_registry() {
        for suite in ALL_CIPHER_SUITES {
            let info = crate::suites::lookup(suite.suite()).unwrap();
            if let Some(tls12) = suite.tls12() {
                assert_eq!(tls12.kx, info.kx, "{:?}", info.suite);
            }
        }
    }
}

use std::fmt;

use crate::crypto;
use crate::enums::{CipherSuite, ProtocolVersion, SignatureAlgorithm, SignatureScheme};
use crate::msgs::enums::HashAlgorithm;
use crate::tls12::Tls12CipherSuite;
use crate::tls13::Tls13CipherSuite;

/// Common state for cipher suites (both for TLS 1.2 and TLS 1.3)
pub struct CipherSuiteCommon {
    /// The TLS enumeration naming this cipher suite.
    pub suite: CipherSuite,

    /// Which hash function the suite uses.
    pub hash_provider: &'static dyn crypto::hash::Hash,
}

/// A cipher suite implemented by a crypto provider.
#[derive(Clone, Copy)]
pub enum SupportedCipherSuite {
    /// A TLS 1.2 cipher suite
    Tls12(&'static Tls12CipherSuite),
    /// A TLS 1.3 cipher suite
    Tls13(&'static Tls13CipherSuite),
}

impl PartialEq for SupportedCipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.suite() == other.suite()
    }
}

impl fmt::Debug for SupportedCipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.suite().fmt(f)
    }
}

impl SupportedCipherSuite {
    /// The cipher suite's identifier
    pub fn suite(&self) -> CipherSuite {
        self.common().suite
    }

    /// The hash function the ciphersuite uses.
    pub(crate) fn hash_provider(&self) -> &'static dyn crypto::hash::Hash {
        self.common().hash_provider
    }

    pub(crate) fn common(&self) -> &CipherSuiteCommon {
        match self {
            Self::Tls12(inner) => &inner.common,
            Self::Tls13(inner) => &inner.common,
        }
    }

    /// Return the inner `Tls13CipherSuite` for this suite, if it is a TLS1.3 suite.
    pub fn tls13(&self) -> Option<&'static Tls13CipherSuite> {
        match self {
            Self::Tls12(_) => None,
            Self::Tls13(inner) => Some(inner),
        }
    }

    /// Return the inner `Tls12CipherSuite` for this suite, if it is a TLS1.2 suite.
    pub fn tls12(&self) -> Option<&'static Tls12CipherSuite> {
        match self {
            Self::Tls12(inner) => Some(inner),
            Self::Tls13(_) => None,
        }
    }

    /// Return supported protocol version for the cipher suite.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::Tls12(_) => ProtocolVersion::TLSv1_2,
            Self::Tls13(_) => ProtocolVersion::TLSv1_3,
        }
    }

    /// The registry entry describing this suite, if the registry knows it.
    pub fn info(&self) -> Option<&'static SuiteInfo> {
        lookup(self.suite())
    }

    /// Return true if this suite is usable for a key only offering `sig_alg`
    /// signatures.  This resolves to true for all TLS1.3 suites.
    pub fn usable_for_signature_algorithm(&self, sig_alg: SignatureAlgorithm) -> bool {
        match self {
            Self::Tls13(_) => true,
            Self::Tls12(inner) => inner
                .sign
                .iter()
                .any(|scheme| scheme.algorithm() == sig_alg),
        }
    }
}

/// How a suite establishes its premaster/shared secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyExchangeKind {
    /// The client encrypts a premaster secret to the server's RSA key.
    StaticRsa,
    /// Finite-field ephemeral Diffie-Hellman.
    Dhe,
    /// Elliptic-curve ephemeral Diffie-Hellman.
    Ecdhe,
    /// A pre-shared key alone.
    Psk,
    /// Negotiated separately by TLS1.3 `key_share`.
    Tls13,
}

/// How the server authenticates itself under a suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    /// An RSA certificate.
    Rsa,
    /// An ECDSA certificate.
    Ecdsa,
    /// Knowledge of a pre-shared key.
    Psk,
    /// Negotiated separately by TLS1.3 `signature_algorithms`.
    Tls13,
}

/// The record protection algorithm of a suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkCipher {
    /// AES-128 in GCM mode.
    Aes128Gcm,
    /// AES-256 in GCM mode.
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    ChaCha20Poly1305,
}

impl BulkCipher {
    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }
}

/// Static description of one cipher suite.
#[derive(Debug)]
pub struct SuiteInfo {
    /// The suite identifier.
    pub suite: CipherSuite,
    /// Key exchange method.
    pub kx: KeyExchangeKind,
    /// Authentication method.
    pub auth: AuthKind,
    /// Bulk cipher.  All registered suites are AEADs, so there is no separate MAC.
    pub bulk: BulkCipher,
    /// Handshake hash and PRF/HKDF hash.
    pub hash: HashAlgorithm,
    /// Lowest protocol version the suite may be used with.
    pub min_version: ProtocolVersion,
    /// Highest protocol version the suite may be used with.
    pub max_version: ProtocolVersion,
    /// Symmetric strength classification, in bits.
    pub strength_bits: u16,
    /// Fixed (implicit) part of the AEAD nonce, from the key schedule.
    pub fixed_iv_len: usize,
    /// Variable part of the AEAD nonce, sent with each record.
    pub explicit_nonce_len: usize,
}

impl SuiteInfo {
    /// Whether this suite may be used with protocol version `v`.
    pub fn usable_with_version(&self, v: ProtocolVersion) -> bool {
        let v = u16::from(v);
        u16::from(self.min_version) <= v && v <= u16::from(self.max_version)
    }
}

macro_rules! tls12_suite {
    ($suite:ident, $kx:ident, $auth:ident, $bulk:ident, $hash:ident, $bits:literal) => {
        SuiteInfo {
            suite: CipherSuite::$suite,
            kx: KeyExchangeKind::$kx,
            auth: AuthKind::$auth,
            bulk: BulkCipher::$bulk,
            hash: HashAlgorithm::$hash,
            min_version: ProtocolVersion::TLSv1_2,
            max_version: ProtocolVersion::TLSv1_2,
            strength_bits: $bits,
            fixed_iv_len: match BulkCipher::$bulk {
                BulkCipher::ChaCha20Poly1305 => 12,
                _ => 4,
            },
            explicit_nonce_len: match BulkCipher::$bulk {
                BulkCipher::ChaCha20Poly1305 => 0,
                _ => 8,
            },
        }
    };
}

macro_rules! tls13_suite {
    ($suite:ident, $bulk:ident, $hash:ident, $bits:literal) => {
        SuiteInfo {
            suite: CipherSuite::$suite,
            kx: KeyExchangeKind::Tls13,
            auth: AuthKind::Tls13,
            bulk: BulkCipher::$bulk,
            hash: HashAlgorithm::$hash,
            min_version: ProtocolVersion::TLSv1_3,
            max_version: ProtocolVersion::TLSv1_3,
            strength_bits: $bits,
            fixed_iv_len: 12,
            explicit_nonce_len: 0,
        }
    };
}

/// Every suite the engine knows about, sorted by identifier.
static REGISTRY: &[SuiteInfo] = &[
    tls12_suite!(TLS_RSA_WITH_AES_128_GCM_SHA256, StaticRsa, Rsa, Aes128Gcm, SHA256, 128),
    tls12_suite!(TLS_RSA_WITH_AES_256_GCM_SHA384, StaticRsa, Rsa, Aes256Gcm, SHA384, 256),
    tls12_suite!(TLS_DHE_RSA_WITH_AES_128_GCM_SHA256, Dhe, Rsa, Aes128Gcm, SHA256, 128),
    tls12_suite!(TLS_DHE_RSA_WITH_AES_256_GCM_SHA384, Dhe, Rsa, Aes256Gcm, SHA384, 256),
    tls12_suite!(TLS_PSK_WITH_AES_128_GCM_SHA256, Psk, Psk, Aes128Gcm, SHA256, 128),
    tls12_suite!(TLS_PSK_WITH_AES_256_GCM_SHA384, Psk, Psk, Aes256Gcm, SHA384, 256),
    tls13_suite!(TLS13_AES_128_GCM_SHA256, Aes128Gcm, SHA256, 128),
    tls13_suite!(TLS13_AES_256_GCM_SHA384, Aes256Gcm, SHA384, 256),
    tls13_suite!(TLS13_CHACHA20_POLY1305_SHA256, ChaCha20Poly1305, SHA256, 256),
    tls12_suite!(TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, Ecdhe, Ecdsa, Aes128Gcm, SHA256, 128),
    tls12_suite!(TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, Ecdhe, Ecdsa, Aes256Gcm, SHA384, 256),
    tls12_suite!(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, Ecdhe, Rsa, Aes128Gcm, SHA256, 128),
    tls12_suite!(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, Ecdhe, Rsa, Aes256Gcm, SHA384, 256),
    tls12_suite!(TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256, Ecdhe, Rsa, ChaCha20Poly1305, SHA256, 256),
    tls12_suite!(TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256, Ecdhe, Ecdsa, ChaCha20Poly1305, SHA256, 256),
    tls12_suite!(TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256, Dhe, Rsa, ChaCha20Poly1305, SHA256, 256),
    tls12_suite!(TLS_PSK_WITH_CHACHA20_POLY1305_SHA256, Psk, Psk, ChaCha20Poly1305, SHA256, 256),
];

/// Find the registry entry for `suite`.
///
/// The registry is sorted, so this is a binary search.
pub fn lookup(suite: CipherSuite) -> Option<&'static SuiteInfo> {
    let id = u16::from(suite);
    REGISTRY
        .binary_search_by_key(&id, |info| u16::from(info.suite))
        .ok()
        .map(|i| &REGISTRY[i])
}

/// Whose order of preference decides between mutually acceptable suites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreferenceOwner {
    /// The local configuration's order.
    Local,
    /// The peer's offered order.
    Peer,
}

/// Everything besides the suite lists that bears on suite selection.
pub(crate) struct SelectionCriteria<'a> {
    /// The already-negotiated protocol version.
    pub(crate) version: ProtocolVersion,
    /// Suites weaker than this are refused.
    pub(crate) min_strength_bits: u16,
    /// Algorithms of the certified keys we could authenticate with.
    pub(crate) credential_algorithms: &'a [SignatureAlgorithm],
    /// Whether one of those keys can decrypt an RSA key transport.
    pub(crate) key_transport_available: bool,
    /// Whether both sides share an elliptic-curve group.
    pub(crate) shared_ec_group: bool,
    /// Whether both sides share a finite-field group.
    pub(crate) shared_ff_group: bool,
}

impl SelectionCriteria<'_> {
    fn accepts(&self, suite: &SupportedCipherSuite) -> bool {
        let Some(info) = suite.info() else {
            return false;
        };

        if !info.usable_with_version(self.version) || suite.version() != self.version {
            return false;
        }

        if info.strength_bits < self.min_strength_bits {
            return false;
        }

        let authenticated = match info.auth {
            AuthKind::Tls13 => !self.credential_algorithms.is_empty(),
            AuthKind::Rsa => self
                .credential_algorithms
                .contains(&SignatureAlgorithm::RSA),
            AuthKind::Ecdsa => self
                .credential_algorithms
                .contains(&SignatureAlgorithm::ECDSA),
            AuthKind::Psk => false,
        };

        let exchangeable = match info.kx {
            KeyExchangeKind::Tls13 => true,
            KeyExchangeKind::StaticRsa => self.key_transport_available,
            KeyExchangeKind::Ecdhe => self.shared_ec_group,
            KeyExchangeKind::Dhe => self.shared_ff_group,
            KeyExchangeKind::Psk => false,
        };

        authenticated && exchangeable
    }
}

/// Choose the first mutually acceptable suite in the preference owner's order.
///
/// `None` means there is nothing in common; the caller reports that as
/// `handshake_failure`.
pub(crate) fn select_cipher_suite(
    offered_by_peer: &[CipherSuite],
    locally_configured: &[SupportedCipherSuite],
    owner: PreferenceOwner,
    criteria: &SelectionCriteria<'_>,
) -> Option<SupportedCipherSuite> {
    match owner {
        PreferenceOwner::Local => locally_configured
            .iter()
            .filter(|ours| offered_by_peer.contains(&ours.suite()))
            .find(|ours| criteria.accepts(ours))
            .copied(),
        PreferenceOwner::Peer => offered_by_peer
            .iter()
            .filter_map(|theirs| {
                locally_configured
                    .iter()
                    .find(|ours| ours.suite() == *theirs)
            })
            .find(|ours| criteria.accepts(ours))
            .copied(),
    }
}

/// Return true if `sigscheme` is usable by any of the given suites.
pub(crate) fn compatible_sigscheme_for_suites(
    sigscheme: SignatureScheme,
    common_suites: &[SupportedCipherSuite],
) -> bool {
    let sigalg = sigscheme.algorithm();
    common_suites
        .iter()
        .any(|&suite| suite.usable_for_signature_algorithm(sigalg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_sorted_and_unique() {
        for pair in REGISTRY.windows(2) {
            assert!(u16::from(pair[0].suite) < u16::from(pair[1].suite));
        }
    }

    #[test]
    fn lookup_finds_every_registered_suite() {
        for info in REGISTRY {
            assert_eq!(lookup(info.suite).unwrap().suite, info.suite);
        }
    }

    #[test]
    fn lookup_misses_are_none() {
        for id in [0x0000u16, 0x00ff, 0x1304, 0x5600, 0xffff] {
            assert!(lookup(CipherSuite::from(id)).is_none());
        }
    }

    #[test]
    fn version_applicability() {
        let info = lookup(CipherSuite::TLS13_AES_128_GCM_SHA256).unwrap();
        assert!(info.usable_with_version(ProtocolVersion::TLSv1_3));
        assert!(!info.usable_with_version(ProtocolVersion::TLSv1_2));

        let info = lookup(CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256).unwrap();
        assert!(info.usable_with_version(ProtocolVersion::TLSv1_2));
        assert!(!info.usable_with_version(ProtocolVersion::TLSv1_3));
        assert_eq!(info.fixed_iv_len + info.explicit_nonce_len, 12);
    }

    #[cfg(feature = "rustcrypto")]
    mod selection {
        use super::super::*;
        use crate::crypto::rustcrypto::*;

        fn criteria(version: ProtocolVersion) -> SelectionCriteria<'static> {
            SelectionCriteria {
                version,
                min_strength_bits: 0,
                credential_algorithms: &[SignatureAlgorithm::ECDSA],
                key_transport_available: false,
                shared_ec_group: true,
                shared_ff_group: false,
            }
        }

        #[test]
        fn provider_suites_agree_with_registry() {
            for suite in ALL_CIPHER_SUITES {
                let info = suite.info().unwrap();
                assert!(info.usable_with_version(suite.version()));
                assert_eq!(info.hash, suite.hash_provider().algorithm());
                if let Some(tls12) = suite.tls12() {
                    assert_eq!(info.kx, tls12.kx);
                }
            }
        }

        #[test]
        fn preference_owner_decides() {
            let ours = [
                TLS13_AES_256_GCM_SHA384,
                TLS13_AES_128_GCM_SHA256,
            ];
            let theirs = [
                CipherSuite::TLS13_AES_128_GCM_SHA256,
                CipherSuite::TLS13_AES_256_GCM_SHA384,
            ];
            let c = criteria(ProtocolVersion::TLSv1_3);
            assert_eq!(
                select_cipher_suite(&theirs, &ours, PreferenceOwner::Local, &c)
                    .unwrap()
                    .suite(),
                CipherSuite::TLS13_AES_256_GCM_SHA384
            );
            assert_eq!(
                select_cipher_suite(&theirs, &ours, PreferenceOwner::Peer, &c)
                    .unwrap()
                    .suite(),
                CipherSuite::TLS13_AES_128_GCM_SHA256
            );
        }

        #[test]
        fn nothing_in_common_is_none() {
            let ours = [TLS13_AES_256_GCM_SHA384];
            let theirs = [CipherSuite::TLS13_CHACHA20_POLY1305_SHA256];
            assert!(select_cipher_suite(
                &theirs,
                &ours,
                PreferenceOwner::Local,
                &criteria(ProtocolVersion::TLSv1_3)
            )
            .is_none());
        }

        #[test]
        fn filters_apply() {
            let ours = [
                TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                TLS_RSA_WITH_AES_256_GCM_SHA384,
            ];
            let theirs: Vec<CipherSuite> = ours.iter().map(|s| s.suite()).collect();

            // only an ECDSA credential: the RSA-authenticated suites drop out
            let c = criteria(ProtocolVersion::TLSv1_2);
            assert_eq!(
                select_cipher_suite(&theirs, &ours, PreferenceOwner::Local, &c)
                    .unwrap()
                    .suite(),
                CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
            );

            // wrong version: nothing
            let c = criteria(ProtocolVersion::TLSv1_3);
            assert!(select_cipher_suite(&theirs, &ours, PreferenceOwner::Local, &c).is_none());

            // no shared curve, RSA key that can decrypt: static RSA
            let c = SelectionCriteria {
                version: ProtocolVersion::TLSv1_2,
                min_strength_bits: 0,
                credential_algorithms: &[SignatureAlgorithm::RSA],
                key_transport_available: true,
                shared_ec_group: false,
                shared_ff_group: false,
            };
            assert_eq!(
                select_cipher_suite(&theirs, &ours, PreferenceOwner::Local, &c)
                    .unwrap()
                    .suite(),
                CipherSuite::TLS_RSA_WITH_AES_256_GCM_SHA384
            );

            // security floor excludes the 128-bit suites
            let c = SelectionCriteria {
                version: ProtocolVersion::TLSv1_2,
                min_strength_bits: 256,
                credential_algorithms: &[SignatureAlgorithm::RSA],
                key_transport_available: false,
                shared_ec_group: true,
                shared_ff_group: false,
            };
            assert!(select_cipher_suite(&theirs, &ours, PreferenceOwner::Local, &c).is_none());
        }
    }
}

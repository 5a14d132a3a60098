use std::fmt;

use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use zeroize::Zeroize;

use crate::conn::{ConnectionRandoms, Side};
use crate::crypto;
use crate::crypto::cipher::{AeadKey, MessageDecrypter, MessageEncrypter};
use crate::crypto::hash;
use crate::crypto::SecureRandom;
use crate::enums::{ProtocolVersion, SignatureScheme};
use crate::error::{ApiMisuse, Error};
use crate::key_log::KeyLog;
use crate::msgs::codec::Codec;
use crate::suites::{CipherSuiteCommon, KeyExchangeKind, SupportedCipherSuite};

pub(crate) mod steps;

/// A TLS 1.2 cipher suite supported by this crate.
pub struct Tls12CipherSuite {
    /// Common cipher suite fields.
    pub common: CipherSuiteCommon,

    /// How to compute the TLS1.2 PRF for the suite's hash function.
    pub prf_provider: &'static dyn crypto::tls12::Prf,

    /// How to exchange/agree keys.
    pub kx: KeyExchangeKind,

    /// How to sign messages for authentication.
    ///
    /// This is a set of [`SignatureScheme`]s, in preference order.
    pub sign: &'static [SignatureScheme],

    /// How to produce a [`MessageDecrypter`] or [`MessageEncrypter`]
    /// from raw key material.
    pub aead_alg: &'static dyn crypto::cipher::Tls12AeadAlgorithm,
}

impl Tls12CipherSuite {
    /// Resolve the set of supported [`SignatureScheme`]s from the
    /// offered signature schemes.  If we return an empty
    /// set, the handshake terminates.
    pub fn resolve_sig_schemes(&self, offered: &[SignatureScheme]) -> Vec<SignatureScheme> {
        self.sign
            .iter()
            .filter(|pref| offered.contains(pref))
            .cloned()
            .collect()
    }
}

impl From<&'static Tls12CipherSuite> for SupportedCipherSuite {
    fn from(s: &'static Tls12CipherSuite) -> Self {
        Self::Tls12(s)
    }
}

impl PartialEq for Tls12CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.common.suite == other.common.suite
    }
}

impl fmt::Debug for Tls12CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tls12CipherSuite")
            .field("suite", &self.common.suite)
            .field("kx", &self.kx)
            .finish()
    }
}

/// TLS1.2 per-connection keying material
pub(crate) struct ConnectionSecrets {
    pub(crate) randoms: ConnectionRandoms,
    suite: &'static Tls12CipherSuite,
    master_secret: [u8; 48],
}

impl ConnectionSecrets {
    /// Derive the master secret from a premaster secret.
    ///
    /// `ems_seed` is the session hash when extended master secret was
    /// negotiated (RFC7627).
    pub(crate) fn from_premaster(
        premaster_secret: &[u8],
        ems_seed: Option<hash::Output>,
        randoms: ConnectionRandoms,
        suite: &'static Tls12CipherSuite,
    ) -> Self {
        let mut ret = Self {
            randoms,
            suite,
            master_secret: [0u8; 48],
        };

        let (label, seed) = match ems_seed {
            Some(seed) => ("extended master secret", Seed::Ems(seed)),
            None => (
                "master secret",
                Seed::Randoms(join_randoms(&ret.randoms.client, &ret.randoms.server)),
            ),
        };

        suite.prf_provider.for_secret(
            &mut ret.master_secret,
            premaster_secret,
            label.as_bytes(),
            seed.as_ref(),
        );

        ret
    }

    pub(crate) fn new_resume(
        randoms: ConnectionRandoms,
        suite: &'static Tls12CipherSuite,
        master_secret: &[u8; 48],
    ) -> Self {
        Self {
            randoms,
            suite,
            master_secret: *master_secret,
        }
    }

    /// Make a `MessageCipherPair` based on the given supported ciphersuite `self.suite`,
    /// and the session's `secrets`.
    pub(crate) fn make_cipher_pair(&self, side: Side) -> Result<MessageCipherPair, Error> {
        // Make a key block, and chop it up.
        // Note: we don't implement any ciphersuites with nonzero mac_key_len.
        let mut key_block = self.make_key_block();
        let shape = self.suite.aead_alg.key_block_shape();

        let (client_write_key, rest) = key_block.split_at(shape.enc_key_len);
        let (server_write_key, rest) = rest.split_at(shape.enc_key_len);
        let (client_write_iv, rest) = rest.split_at(shape.fixed_iv_len);
        let (server_write_iv, extra) = rest.split_at(shape.fixed_iv_len);

        let (write_key, write_iv, read_key, read_iv) = match side {
            Side::Client => (
                client_write_key,
                client_write_iv,
                server_write_key,
                server_write_iv,
            ),
            Side::Server => (
                server_write_key,
                server_write_iv,
                client_write_key,
                client_write_iv,
            ),
        };

        let pair = (
            self.suite
                .aead_alg
                .decrypter(AeadKey::new(read_key), read_iv)?,
            self.suite
                .aead_alg
                .encrypter(AeadKey::new(write_key), write_iv, extra)?,
        );
        key_block.zeroize();
        Ok(pair)
    }

    fn make_key_block(&self) -> Vec<u8> {
        let shape = self.suite.aead_alg.key_block_shape();

        let len = (shape.enc_key_len + shape.fixed_iv_len) * 2 + shape.explicit_nonce_len;

        let mut out = vec![0u8; len];

        // NOTE: opposite order to above for no good reason.
        // Don't design security protocols on drugs, kids.
        let randoms = join_randoms(&self.randoms.server, &self.randoms.client);
        self.suite.prf_provider.for_secret(
            &mut out,
            &self.master_secret,
            b"key expansion",
            &randoms,
        );

        out
    }

    pub(crate) fn suite(&self) -> &'static Tls12CipherSuite {
        self.suite
    }

    pub(crate) fn master_secret(&self) -> &[u8; 48] {
        &self.master_secret
    }

    pub(crate) fn log_master_secret(&self, key_log: &dyn KeyLog) {
        if key_log.will_log("CLIENT_RANDOM") {
            key_log.log("CLIENT_RANDOM", &self.randoms.client, &self.master_secret);
        }
    }

    fn make_verify_data(&self, handshake_hash: &hash::Output, label: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 12];

        self.suite.prf_provider.for_secret(
            &mut out,
            &self.master_secret,
            label,
            handshake_hash.as_ref(),
        );

        out
    }

    pub(crate) fn client_verify_data(&self, handshake_hash: &hash::Output) -> Vec<u8> {
        self.make_verify_data(handshake_hash, b"client finished")
    }

    pub(crate) fn server_verify_data(&self, handshake_hash: &hash::Output) -> Vec<u8> {
        self.make_verify_data(handshake_hash, b"server finished")
    }

    /// RFC5705 exporter.
    pub(crate) fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        let mut randoms = Vec::new();
        randoms.extend_from_slice(&self.randoms.client);
        randoms.extend_from_slice(&self.randoms.server);
        if let Some(context) = context {
            let len = u16::try_from(context.len()).map_err(|_| ApiMisuse::ExporterInvalidInput)?;
            len.encode(&mut randoms);
            randoms.extend_from_slice(context);
        }

        self.suite
            .prf_provider
            .for_secret(output, &self.master_secret, label, &randoms);
        Ok(())
    }
}

impl Drop for ConnectionSecrets {
    fn drop(&mut self) {
        self.master_secret.zeroize();
    }
}

type MessageCipherPair = (Box<dyn MessageDecrypter>, Box<dyn MessageEncrypter>);

enum Seed {
    Ems(hash::Output),
    Randoms([u8; 64]),
}

impl AsRef<[u8]> for Seed {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Ems(seed) => seed.as_ref(),
            Self::Randoms(randoms) => randoms.as_ref(),
        }
    }
}

fn join_randoms(first: &[u8; 32], second: &[u8; 32]) -> [u8; 64] {
    let mut randoms = [0u8; 64];
    randoms[..32].copy_from_slice(first);
    randoms[32..].copy_from_slice(second);
    randoms
}

/// Length of a static RSA premaster secret.
pub(crate) const RSA_PREMASTER_LEN: usize = 48;

/// Choose the premaster secret for a static RSA key exchange.
///
/// A random premaster carrying `client_version` is prepared first.  It is
/// used instead of `decrypted` when decryption failed, produced the wrong
/// length or carried the wrong version, and the choice is made without
/// branching on those conditions (RFC5246 section 7.4.7.1).  The caller
/// carries on identically either way; a bad premaster shows up only as a
/// Finished mismatch.
pub(crate) fn rsa_premaster_or_substitute(
    decrypted: Result<Vec<u8>, Error>,
    client_version: ProtocolVersion,
    secure_random: &dyn SecureRandom,
) -> Result<[u8; RSA_PREMASTER_LEN], Error> {
    let version = client_version.to_array();

    let mut substitute = [0u8; RSA_PREMASTER_LEN];
    secure_random.fill(&mut substitute)?;
    substitute[..2].copy_from_slice(&version);

    let (mut candidate, decrypted_ok) = match decrypted {
        Ok(mut bytes) => {
            let mut candidate = [0u8; RSA_PREMASTER_LEN];
            let len_ok = Choice::from((bytes.len() == RSA_PREMASTER_LEN) as u8);
            let n = bytes.len().min(RSA_PREMASTER_LEN);
            candidate[..n].copy_from_slice(&bytes[..n]);
            bytes.zeroize();
            (candidate, len_ok)
        }
        Err(_) => ([0u8; RSA_PREMASTER_LEN], Choice::from(0)),
    };

    let use_decrypted = decrypted_ok & candidate[..2].ct_eq(&version);

    let mut premaster = [0u8; RSA_PREMASTER_LEN];
    for (i, out) in premaster.iter_mut().enumerate() {
        *out = u8::conditional_select(&substitute[i], &candidate[i], use_decrypted);
    }

    candidate.zeroize();
    substitute.zeroize();
    Ok(premaster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::GetRandomFailed;

    #[derive(Debug)]
    struct Fixed(u8);

    impl SecureRandom for Fixed {
        fn fill(&self, buf: &mut [u8]) -> Result<(), GetRandomFailed> {
            buf.fill(self.0);
            Ok(())
        }
    }

    fn good_premaster() -> Vec<u8> {
        let mut pms = vec![0x11; 48];
        pms[..2].copy_from_slice(&[0x03, 0x03]);
        pms
    }

    #[test]
    fn correct_premaster_is_used() {
        let pms = rsa_premaster_or_substitute(
            Ok(good_premaster()),
            ProtocolVersion::TLSv1_2,
            &Fixed(0xee),
        )
        .unwrap();
        assert_eq!(pms.to_vec(), good_premaster());
    }

    #[test]
    fn wrong_length_is_substituted() {
        let mut short = good_premaster();
        short.truncate(47);
        let pms =
            rsa_premaster_or_substitute(Ok(short), ProtocolVersion::TLSv1_2, &Fixed(0xee)).unwrap();
        assert_eq!(&pms[..2], &[0x03, 0x03]);
        assert!(pms[2..].iter().all(|b| *b == 0xee));

        let mut long = good_premaster();
        long.push(0);
        let pms =
            rsa_premaster_or_substitute(Ok(long), ProtocolVersion::TLSv1_2, &Fixed(0xee)).unwrap();
        assert!(pms[2..].iter().all(|b| *b == 0xee));
    }

    #[test]
    fn wrong_version_is_substituted() {
        let pms = rsa_premaster_or_substitute(
            Ok(good_premaster()),
            ProtocolVersion::TLSv1_1,
            &Fixed(0xee),
        )
        .unwrap();
        assert_eq!(&pms[..2], &[0x03, 0x02]);
        assert!(pms[2..].iter().all(|b| *b == 0xee));
    }

    #[test]
    fn decryption_failure_is_substituted() {
        let pms = rsa_premaster_or_substitute(
            Err(Error::DecryptError),
            ProtocolVersion::TLSv1_2,
            &Fixed(0x5a),
        )
        .unwrap();
        assert_eq!(&pms[..2], &[0x03, 0x03]);
        assert!(pms[2..].iter().all(|b| *b == 0x5a));
    }

    #[cfg(feature = "rustcrypto")]
    mod secrets {
        use super::super::*;
        use crate::crypto::rustcrypto::{
            TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        };
        use crate::enums::ContentType;
        use crate::msgs::message::PlainMessage;

        fn randoms() -> ConnectionRandoms {
            ConnectionRandoms {
                client: [1; 32],
                server: [2; 32],
            }
        }

        fn pair(suite: SupportedCipherSuite) -> (ConnectionSecrets, ConnectionSecrets) {
            let suite = suite.tls12().unwrap();
            (
                ConnectionSecrets::from_premaster(&[9; 48], None, randoms(), suite),
                ConnectionSecrets::from_premaster(&[9; 48], None, randoms(), suite),
            )
        }

        #[test]
        fn client_and_server_ciphers_interoperate() {
            for suite in [
                TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
                TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ] {
                let (client, server) = pair(suite);
                let (_, client_enc) = client.make_cipher_pair(Side::Client).unwrap();
                let (server_dec, _) = server.make_cipher_pair(Side::Server).unwrap();

                let msg = PlainMessage {
                    typ: ContentType::ApplicationData,
                    version: ProtocolVersion::TLSv1_2,
                    payload: crate::msgs::base::Payload::new(b"hello".to_vec()),
                };
                let sealed = client_enc.encrypt(msg.borrow(), 0).unwrap();
                let opened = server_dec.decrypt(sealed, 0).unwrap();
                assert_eq!(opened.payload.0, b"hello");
            }
        }

        #[test]
        fn extended_master_secret_changes_master() {
            let suite = TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
                .tls12()
                .unwrap();
            let plain = ConnectionSecrets::from_premaster(&[9; 48], None, randoms(), suite);
            let ems = ConnectionSecrets::from_premaster(
                &[9; 48],
                Some(hash::Output::new(&[3; 32])),
                randoms(),
                suite,
            );
            assert_ne!(plain.master_secret(), ems.master_secret());

            let resumed = ConnectionSecrets::new_resume(randoms(), suite, ems.master_secret());
            let h = hash::Output::new(&[4; 32]);
            assert_eq!(resumed.client_verify_data(&h), ems.client_verify_data(&h));
            assert_ne!(resumed.client_verify_data(&h), resumed.server_verify_data(&h));
            assert_eq!(resumed.client_verify_data(&h).len(), 12);
        }

        #[test]
        fn exporter_context_is_length_checked() {
            let (client, server) = pair(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256);
            let mut a = [0u8; 20];
            let mut b = [0u8; 20];
            client
                .export_keying_material(&mut a, b"label", Some(b"ctx"))
                .unwrap();
            server
                .export_keying_material(&mut b, b"label", Some(b"ctx"))
                .unwrap();
            assert_eq!(a, b);

            server
                .export_keying_material(&mut b, b"label", None)
                .unwrap();
            assert_ne!(a, b);

            let huge = vec![0u8; 0x10000];
            assert_eq!(
                client
                    .export_keying_material(&mut a, b"label", Some(&huge))
                    .unwrap_err(),
                Error::ApiMisuse(ApiMisuse::ExporterInvalidInput)
            );
        }
    }
}

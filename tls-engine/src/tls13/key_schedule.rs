//! The TLS1.3 key schedule (RFC8446 section 7.1).
//!
//! The schedule moves through three stages (early, handshake and
//! application), each of which may be entered exactly once and only after
//! its predecessor.  Asking for a stage out of turn is reported as
//! [`ApiMisuse`] and leaves the schedule untouched.  Secrets that no later
//! stage needs are dropped, and so wiped, when the stage that supersedes
//! them is derived.

use crate::conn::Side;
use crate::crypto::cipher::{AeadKey, Iv, MessageDecrypter, MessageEncrypter, Tls13AeadAlgorithm};
use crate::crypto::tls13::{HkdfExpander, OkmBlock, OutputLengthError};
use crate::crypto::{hash, hmac};
use crate::error::{ApiMisuse, Error};
use crate::key_log::KeyLog;
use crate::tls13::Tls13CipherSuite;

/// The kinds of secret we can extract from `KeySchedule`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SecretKind {
    ResumptionPskBinderKey,
    ClientHandshakeTrafficSecret,
    ServerHandshakeTrafficSecret,
    ClientApplicationTrafficSecret,
    ServerApplicationTrafficSecret,
    ExporterMasterSecret,
    ResumptionMasterSecret,
    DerivedSecret,
}

impl SecretKind {
    fn to_bytes(self) -> &'static [u8] {
        use self::SecretKind::*;
        match self {
            ResumptionPskBinderKey => b"res binder",
            ClientHandshakeTrafficSecret => b"c hs traffic",
            ServerHandshakeTrafficSecret => b"s hs traffic",
            ClientApplicationTrafficSecret => b"c ap traffic",
            ServerApplicationTrafficSecret => b"s ap traffic",
            ExporterMasterSecret => b"exp master",
            ResumptionMasterSecret => b"res master",
            DerivedSecret => b"derived",
        }
    }

    fn log_label(self) -> Option<&'static str> {
        use self::SecretKind::*;
        Some(match self {
            ClientHandshakeTrafficSecret => "CLIENT_HANDSHAKE_TRAFFIC_SECRET",
            ServerHandshakeTrafficSecret => "SERVER_HANDSHAKE_TRAFFIC_SECRET",
            ClientApplicationTrafficSecret => "CLIENT_TRAFFIC_SECRET_0",
            ServerApplicationTrafficSecret => "SERVER_TRAFFIC_SECRET_0",
            ExporterMasterSecret => "EXPORTER_SECRET",
            _ => {
                return None;
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Fresh,
    Early,
    Handshake,
    Application,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Early => "early",
            Self::Handshake => "handshake",
            Self::Application => "application",
        }
    }

    fn successor(self) -> Option<Self> {
        match self {
            Self::Fresh => Some(Self::Early),
            Self::Early => Some(Self::Handshake),
            Self::Handshake => Some(Self::Application),
            Self::Application => None,
        }
    }
}

/// One secret per direction.
struct TrafficSecrets {
    client: OkmBlock,
    server: OkmBlock,
}

impl TrafficSecrets {
    fn get(&self, side: Side) -> &OkmBlock {
        match side {
            Side::Client => &self.client,
            Side::Server => &self.server,
        }
    }

    fn get_mut(&mut self, side: Side) -> &mut OkmBlock {
        match side {
            Side::Client => &mut self.client,
            Side::Server => &mut self.server,
        }
    }
}

/// The secrets of one TLS1.3 connection.
pub(crate) struct KeySchedule {
    suite: &'static Tls13CipherSuite,
    stage: Stage,

    /// The most recently extracted secret: early, then handshake, then master.
    current: Option<Box<dyn HkdfExpander>>,
    binder_key: Option<OkmBlock>,
    handshake: Option<TrafficSecrets>,
    finished_keys: Option<TrafficSecrets>,
    application: Option<TrafficSecrets>,
    exporter: Option<OkmBlock>,
}

impl KeySchedule {
    pub(crate) fn new(suite: &'static Tls13CipherSuite) -> Self {
        Self {
            suite,
            stage: Stage::Fresh,
            current: None,
            binder_key: None,
            handshake: None,
            finished_keys: None,
            application: None,
            exporter: None,
        }
    }

    pub(crate) fn suite(&self) -> &'static Tls13CipherSuite {
        self.suite
    }

    /// Check that `to` may be entered now.  Nothing is changed.
    fn check_next(&self, to: Stage) -> Result<(), Error> {
        if self.stage >= to {
            return Err(ApiMisuse::KeyScheduleStageRepeated { stage: to.name() }.into());
        }

        if self.stage.successor() != Some(to) {
            return Err(ApiMisuse::KeyScheduleOutOfOrder { stage: to.name() }.into());
        }

        Ok(())
    }

    fn current(&self) -> Result<&dyn HkdfExpander, Error> {
        self.current
            .as_deref()
            .ok_or_else(|| Error::General("key schedule secret already wiped".into()))
    }

    fn empty_hash(&self) -> hash::Output {
        self.suite
            .common
            .hash_provider
            .hash(&[])
    }

    /// Enter the early stage, from a resumption PSK or (for a full
    /// handshake) from zeroes.
    ///
    /// With a PSK this also prepares the binder key.
    pub(crate) fn derive_early(&mut self, psk: Option<&[u8]>) -> Result<(), Error> {
        self.check_next(Stage::Early)?;

        let hkdf = self.suite.hkdf_provider;
        let current = match psk {
            Some(psk) => hkdf.extract_from_secret(None, psk),
            None => hkdf.extract_from_zero_ikm(None),
        };

        if psk.is_some() {
            let empty_hash = self.empty_hash();
            self.binder_key = Some(hkdf_expand_label_block(
                current.as_ref(),
                SecretKind::ResumptionPskBinderKey.to_bytes(),
                empty_hash.as_ref(),
            ));
        }

        self.current = Some(current);
        self.stage = Stage::Early;
        Ok(())
    }

    /// Compute the PSK binder over `hs_hash`, the transcript up to and
    /// excluding the binders themselves.
    pub(crate) fn resumption_binder(&self, hs_hash: &hash::Output) -> Result<hmac::Tag, Error> {
        let binder_key = self
            .binder_key
            .as_ref()
            .ok_or(ApiMisuse::KeyScheduleOutOfOrder { stage: "binder" })?;
        Ok(self.sign_verify_data(binder_key, hs_hash))
    }

    /// Enter the handshake stage by mixing in the (EC)DHE shared secret.
    ///
    /// `hs_hash` covers ClientHello..ServerHello.
    pub(crate) fn derive_handshake(
        &mut self,
        shared_secret: &[u8],
        hs_hash: &hash::Output,
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> Result<(), Error> {
        self.check_next(Stage::Handshake)?;

        let salt = self.derive_for_empty_hash(self.current()?, SecretKind::DerivedSecret);
        let current = self
            .suite
            .hkdf_provider
            .extract_from_secret(Some(salt.as_ref()), shared_secret);

        let client = self.derive_logged_secret(
            current.as_ref(),
            SecretKind::ClientHandshakeTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );
        let server = self.derive_logged_secret(
            current.as_ref(),
            SecretKind::ServerHandshakeTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );

        self.finished_keys = Some(TrafficSecrets {
            client: self.finished_key(&client),
            server: self.finished_key(&server),
        });
        self.handshake = Some(TrafficSecrets { client, server });
        self.binder_key = None;
        self.current = Some(current);
        self.stage = Stage::Handshake;
        Ok(())
    }

    pub(crate) fn handshake_encrypter(&self, side: Side) -> Result<Box<dyn MessageEncrypter>, Error> {
        let secrets = self
            .handshake
            .as_ref()
            .ok_or(ApiMisuse::KeyScheduleOutOfOrder { stage: "handshake" })?;
        self.encrypter_for(secrets.get(side))
    }

    pub(crate) fn handshake_decrypter(&self, side: Side) -> Result<Box<dyn MessageDecrypter>, Error> {
        let secrets = self
            .handshake
            .as_ref()
            .ok_or(ApiMisuse::KeyScheduleOutOfOrder { stage: "handshake" })?;
        self.decrypter_for(secrets.get(side))
    }

    /// The `verify_data` of `side`'s Finished message over `hs_hash`.
    pub(crate) fn sign_finish(&self, side: Side, hs_hash: &hash::Output) -> Result<hmac::Tag, Error> {
        let keys = self
            .finished_keys
            .as_ref()
            .ok_or(ApiMisuse::KeyScheduleOutOfOrder { stage: "finished" })?;
        Ok(self
            .suite
            .hkdf_provider
            .hmac_sign(keys.get(side), hs_hash.as_ref()))
    }

    /// Enter the application stage.
    ///
    /// `hs_hash` covers ClientHello..server Finished.  The handshake traffic
    /// secrets are wiped; the record layer keeps whatever it built from them.
    pub(crate) fn derive_application(
        &mut self,
        hs_hash: &hash::Output,
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> Result<(), Error> {
        self.check_next(Stage::Application)?;

        let salt = self.derive_for_empty_hash(self.current()?, SecretKind::DerivedSecret);
        let current = self
            .suite
            .hkdf_provider
            .extract_from_zero_ikm(Some(salt.as_ref()));

        let client = self.derive_logged_secret(
            current.as_ref(),
            SecretKind::ClientApplicationTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );
        let server = self.derive_logged_secret(
            current.as_ref(),
            SecretKind::ServerApplicationTrafficSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        );
        self.exporter = Some(self.derive_logged_secret(
            current.as_ref(),
            SecretKind::ExporterMasterSecret,
            hs_hash.as_ref(),
            key_log,
            client_random,
        ));

        self.application = Some(TrafficSecrets { client, server });
        self.handshake = None;
        self.current = Some(current);
        self.stage = Stage::Application;
        Ok(())
    }

    pub(crate) fn application_encrypter(
        &self,
        side: Side,
    ) -> Result<Box<dyn MessageEncrypter>, Error> {
        let secrets = self
            .application
            .as_ref()
            .ok_or(ApiMisuse::KeyScheduleOutOfOrder { stage: "application" })?;
        self.encrypter_for(secrets.get(side))
    }

    pub(crate) fn application_decrypter(
        &self,
        side: Side,
    ) -> Result<Box<dyn MessageDecrypter>, Error> {
        let secrets = self
            .application
            .as_ref()
            .ok_or(ApiMisuse::KeyScheduleOutOfOrder { stage: "application" })?;
        self.decrypter_for(secrets.get(side))
    }

    /// Finish the handshake: derive the resumption master secret over the
    /// full transcript, then wipe the master secret and finished keys.
    pub(crate) fn derive_resumption_master(
        &mut self,
        hs_hash: &hash::Output,
    ) -> Result<OkmBlock, Error> {
        if self.stage != Stage::Application {
            return Err(ApiMisuse::KeyScheduleOutOfOrder {
                stage: "resumption",
            }
            .into());
        }

        let rms = hkdf_expand_label_block(
            self.current()?,
            SecretKind::ResumptionMasterSecret.to_bytes(),
            hs_hash.as_ref(),
        );
        self.current = None;
        self.finished_keys = None;
        Ok(rms)
    }

    /// The PSK for the ticket carrying `nonce`.
    pub(crate) fn derive_ticket_psk(&self, rms: &OkmBlock, nonce: &[u8]) -> OkmBlock {
        let expander = self.suite.hkdf_provider.expander_for_okm(rms);
        hkdf_expand_label_block(expander.as_ref(), b"resumption", nonce)
    }

    /// Ratchet `side`'s application traffic secret forward in place.
    ///
    /// The caller then rebuilds that direction's encrypter or decrypter.
    pub(crate) fn update_traffic_secret(&mut self, side: Side) -> Result<(), Error> {
        let hkdf = self.suite.hkdf_provider;
        let secrets = self
            .application
            .as_mut()
            .ok_or(ApiMisuse::KeyUpdateNotAvailable)?;
        let secret = secrets.get_mut(side);
        let next = hkdf_expand_label_block(hkdf.expander_for_okm(secret).as_ref(), b"traffic upd", &[]);
        *secret = next;
        Ok(())
    }

    /// RFC8446 section 7.5 exporter.
    pub(crate) fn export_keying_material(
        &self,
        out: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        let exporter = self
            .exporter
            .as_ref()
            .ok_or(Error::HandshakeNotComplete)?;

        // HkdfLabel.label is at most 255 bytes, "tls13 " included
        if LABEL_PREFIX.len() + label.len() > usize::from(u8::MAX) {
            return Err(ApiMisuse::ExporterInvalidInput.into());
        }

        let hkdf = self.suite.hkdf_provider;
        let h_empty = self.empty_hash();
        let secret = hkdf_expand_label_block(
            hkdf.expander_for_okm(exporter).as_ref(),
            label,
            h_empty.as_ref(),
        );

        let h_context = self
            .suite
            .common
            .hash_provider
            .hash(context.unwrap_or(&[]));

        hkdf_expand_label_slice(
            hkdf.expander_for_okm(&secret).as_ref(),
            b"exporter",
            h_context.as_ref(),
            out,
        )
        .map_err(|_| ApiMisuse::ExporterInvalidInput.into())
    }

    fn derive_logged_secret(
        &self,
        expander: &dyn HkdfExpander,
        kind: SecretKind,
        hs_hash: &[u8],
        key_log: &dyn KeyLog,
        client_random: &[u8; 32],
    ) -> OkmBlock {
        let secret = hkdf_expand_label_block(expander, kind.to_bytes(), hs_hash);
        if let Some(label) = kind.log_label() {
            if key_log.will_log(label) {
                key_log.log(label, client_random, secret.as_ref());
            }
        }
        secret
    }

    fn derive_for_empty_hash(&self, expander: &dyn HkdfExpander, kind: SecretKind) -> OkmBlock {
        let empty_hash = self.empty_hash();
        hkdf_expand_label_block(expander, kind.to_bytes(), empty_hash.as_ref())
    }

    fn finished_key(&self, base_key: &OkmBlock) -> OkmBlock {
        let expander = self
            .suite
            .hkdf_provider
            .expander_for_okm(base_key);
        hkdf_expand_label_block(expander.as_ref(), b"finished", &[])
    }

    fn sign_verify_data(&self, base_key: &OkmBlock, hs_hash: &hash::Output) -> hmac::Tag {
        let hmac_key = self.finished_key(base_key);
        self.suite
            .hkdf_provider
            .hmac_sign(&hmac_key, hs_hash.as_ref())
    }

    fn encrypter_for(&self, secret: &OkmBlock) -> Result<Box<dyn MessageEncrypter>, Error> {
        let expander = self.suite.hkdf_provider.expander_for_okm(secret);
        let key = derive_traffic_key(expander.as_ref(), self.suite.aead_alg)?;
        let iv = derive_traffic_iv(expander.as_ref())?;
        self.suite.aead_alg.encrypter(key, iv)
    }

    fn decrypter_for(&self, secret: &OkmBlock) -> Result<Box<dyn MessageDecrypter>, Error> {
        let expander = self.suite.hkdf_provider.expander_for_okm(secret);
        let key = derive_traffic_key(expander.as_ref(), self.suite.aead_alg)?;
        let iv = derive_traffic_iv(expander.as_ref())?;
        self.suite.aead_alg.decrypter(key, iv)
    }
}

/// [HKDF-Expand-Label] where the output length is a compile-time constant, and therefore
/// it is infallible.
///
/// [HKDF-Expand-Label]: <https://www.rfc-editor.org/rfc/rfc8446#section-7.1>
fn hkdf_expand_label_block(expander: &dyn HkdfExpander, label: &[u8], context: &[u8]) -> OkmBlock {
    hkdf_expand_label_inner(expander, label, context, expander.hash_len(), |e, info| {
        e.expand_block(info)
    })
}

/// [HKDF-Expand-Label] where the output is written into `output`.
///
/// [HKDF-Expand-Label]: <https://www.rfc-editor.org/rfc/rfc8446#section-7.1>
fn hkdf_expand_label_slice(
    expander: &dyn HkdfExpander,
    label: &[u8],
    context: &[u8],
    output: &mut [u8],
) -> Result<(), OutputLengthError> {
    let n = output.len();
    hkdf_expand_label_inner(expander, label, context, n, |e, info| {
        e.expand_slice(info, output)
    })
}

const LABEL_PREFIX: &[u8] = b"tls13 ";

fn hkdf_expand_label_inner<F, T>(
    expander: &dyn HkdfExpander,
    label: &[u8],
    context: &[u8],
    n: usize,
    f: F,
) -> T
where
    F: FnOnce(&dyn HkdfExpander, &[&[u8]]) -> T,
{
    let output_len = u16::to_be_bytes(n as u16);
    let label_len = u8::to_be_bytes((LABEL_PREFIX.len() + label.len()) as u8);
    let context_len = u8::to_be_bytes(context.len() as u8);

    let info = &[
        &output_len[..],
        &label_len[..],
        LABEL_PREFIX,
        label,
        &context_len[..],
        context,
    ];

    f(expander, info)
}

fn derive_traffic_key(
    expander: &dyn HkdfExpander,
    aead_alg: &dyn Tls13AeadAlgorithm,
) -> Result<AeadKey, Error> {
    let mut key = [0u8; 32];
    let key = key
        .get_mut(..aead_alg.key_len())
        .ok_or_else(|| Error::General("AEAD key too long".into()))?;
    hkdf_expand_label_slice(expander, b"key", &[], key)
        .map_err(|_| Error::General("traffic key expansion failed".into()))?;
    let aead_key = AeadKey::new(key);
    zeroize::Zeroize::zeroize(key);
    Ok(aead_key)
}

fn derive_traffic_iv(expander: &dyn HkdfExpander) -> Result<Iv, Error> {
    let mut iv = [0u8; crate::crypto::cipher::NONCE_LEN];
    hkdf_expand_label_slice(expander, b"iv", &[], &mut iv)
        .map_err(|_| Error::General("traffic iv expansion failed".into()))?;
    Ok(Iv::from(iv))
}

#[cfg(all(test, feature = "rustcrypto"))]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::crypto::rustcrypto::{TLS13_AES_128_GCM_SHA256, TLS13_AES_256_GCM_SHA384};

    fn suite() -> &'static Tls13CipherSuite {
        TLS13_AES_128_GCM_SHA256.tls13().unwrap()
    }

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<(String, Vec<u8>)>>);

    impl KeyLog for Recorder {
        fn log(&self, label: &str, _client_random: &[u8], secret: &[u8]) {
            self.0
                .lock()
                .unwrap()
                .push((label.to_string(), secret.to_vec()));
        }
    }

    impl Recorder {
        fn get(&self, label: &str) -> Vec<u8> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, s)| s.clone())
                .unwrap()
        }
    }

    fn assert_key_and_iv(secret: &OkmBlock, expected_key: &[u8], expected_iv: &[u8]) {
        let expander = suite().hkdf_provider.expander_for_okm(secret);
        let key = derive_traffic_key(expander.as_ref(), suite().aead_alg).unwrap();
        assert_eq!(key.as_ref(), expected_key);
        let iv = derive_traffic_iv(expander.as_ref()).unwrap();
        assert_eq!(iv.as_ref(), expected_iv);
    }

    #[test]
    fn test_vectors() {
        /* These test vectors generated with OpenSSL. */
        let hs_start_hash = [
            0xec, 0x14, 0x7a, 0x06, 0xde, 0xa3, 0xc8, 0x84, 0x6c, 0x02, 0xb2, 0x23, 0x8e, 0x41,
            0xbd, 0xdc, 0x9d, 0x89, 0xf9, 0xae, 0xa1, 0x7b, 0x5e, 0xfd, 0x4d, 0x74, 0x82, 0xaf,
            0x75, 0x88, 0x1c, 0x0a,
        ];

        let hs_full_hash = [
            0x75, 0x1a, 0x3d, 0x4a, 0x14, 0xdf, 0xab, 0xeb, 0x68, 0xe9, 0x2c, 0xa5, 0x91, 0x8e,
            0x24, 0x08, 0xb9, 0xbc, 0xb0, 0x74, 0x89, 0x82, 0xec, 0x9c, 0x32, 0x30, 0xac, 0x30,
            0xbb, 0xeb, 0x23, 0xe2,
        ];

        let ecdhe_secret = [
            0xe7, 0xb8, 0xfe, 0xf8, 0x90, 0x3b, 0x52, 0x0c, 0xb9, 0xa1, 0x89, 0x71, 0xb6, 0x9d,
            0xd4, 0x5d, 0xca, 0x53, 0xce, 0x2f, 0x12, 0xbf, 0x3b, 0xef, 0x93, 0x15, 0xe3, 0x12,
            0x71, 0xdf, 0x4b, 0x40,
        ];

        let client_hts = [
            0x61, 0x7b, 0x35, 0x07, 0x6b, 0x9d, 0x0e, 0x08, 0xcf, 0x73, 0x1d, 0x94, 0xa8, 0x66,
            0x14, 0x78, 0x41, 0x09, 0xef, 0x25, 0x55, 0x51, 0x92, 0x1d, 0xd4, 0x6e, 0x04, 0x01,
            0x35, 0xcf, 0x46, 0xab,
        ];

        let client_hts_key = [
            0x62, 0xd0, 0xdd, 0x00, 0xf6, 0x96, 0x19, 0xd3, 0xb8, 0x19, 0x3a, 0xb4, 0xa0, 0x95,
            0x85, 0xa7,
        ];

        let client_hts_iv = [
            0xff, 0xf7, 0x5d, 0xf5, 0xad, 0x35, 0xd5, 0xcb, 0x3c, 0x53, 0xf3, 0xa9,
        ];

        let server_hts = [
            0xfc, 0xf7, 0xdf, 0xe6, 0x4f, 0xa2, 0xc0, 0x4f, 0x62, 0x35, 0x38, 0x7f, 0x43, 0x4e,
            0x01, 0x42, 0x23, 0x36, 0xd9, 0xc0, 0x39, 0xde, 0x68, 0x47, 0xa0, 0xb9, 0xdd, 0xcf,
            0x29, 0xa8, 0x87, 0x59,
        ];

        let server_hts_key = [
            0x04, 0x67, 0xf3, 0x16, 0xa8, 0x05, 0xb8, 0xc4, 0x97, 0xee, 0x67, 0x04, 0x7b, 0xbc,
            0xbc, 0x54,
        ];

        let server_hts_iv = [
            0xde, 0x83, 0xa7, 0x3e, 0x9d, 0x81, 0x4b, 0x04, 0xc4, 0x8b, 0x78, 0x09,
        ];

        let client_ats = [
            0xc1, 0x4a, 0x6d, 0x79, 0x76, 0xd8, 0x10, 0x2b, 0x5a, 0x0c, 0x99, 0x51, 0x49, 0x3f,
            0xee, 0x87, 0xdc, 0xaf, 0xf8, 0x2c, 0x24, 0xca, 0xb2, 0x14, 0xe8, 0xbe, 0x71, 0xa8,
            0x20, 0x6d, 0xbd, 0xa5,
        ];

        let client_ats_key = [
            0xcc, 0x9f, 0x5f, 0x98, 0x0b, 0x5f, 0x10, 0x30, 0x6c, 0xba, 0xd7, 0xbe, 0x98, 0xd7,
            0x57, 0x2e,
        ];

        let client_ats_iv = [
            0xb8, 0x09, 0x29, 0xe8, 0xd0, 0x2c, 0x70, 0xf6, 0x11, 0x62, 0xed, 0x6b,
        ];

        let server_ats = [
            0x2c, 0x90, 0x77, 0x38, 0xd3, 0xf8, 0x37, 0x02, 0xd1, 0xe4, 0x59, 0x8f, 0x48, 0x48,
            0x53, 0x1d, 0x9f, 0x93, 0x65, 0x49, 0x1b, 0x9f, 0x7f, 0x52, 0xc8, 0x22, 0x29, 0x0d,
            0x4c, 0x23, 0x21, 0x92,
        ];

        let server_ats_key = [
            0x0c, 0xb2, 0x95, 0x62, 0xd8, 0xd8, 0x8f, 0x48, 0xb0, 0x2c, 0xbf, 0xbe, 0xd7, 0xe6,
            0x2b, 0xb3,
        ];

        let server_ats_iv = [
            0x0d, 0xb2, 0x8f, 0x98, 0x85, 0x86, 0xa1, 0xb7, 0xe4, 0xd5, 0xc6, 0x9c,
        ];

        let log = Recorder::default();
        let mut ks = KeySchedule::new(suite());
        ks.derive_early(None).unwrap();
        ks.derive_handshake(
            &ecdhe_secret,
            &hash::Output::new(&hs_start_hash),
            &log,
            &[0; 32],
        )
        .unwrap();

        assert_eq!(log.get("CLIENT_HANDSHAKE_TRAFFIC_SECRET"), client_hts);
        assert_eq!(log.get("SERVER_HANDSHAKE_TRAFFIC_SECRET"), server_hts);
        {
            let hs = ks.handshake.as_ref().unwrap();
            assert_key_and_iv(&hs.client, &client_hts_key, &client_hts_iv);
            assert_key_and_iv(&hs.server, &server_hts_key, &server_hts_iv);
        }

        ks.derive_application(&hash::Output::new(&hs_full_hash), &log, &[0; 32])
            .unwrap();

        assert_eq!(log.get("CLIENT_TRAFFIC_SECRET_0"), client_ats);
        assert_eq!(log.get("SERVER_TRAFFIC_SECRET_0"), server_ats);
        let ap = ks.application.as_ref().unwrap();
        assert_key_and_iv(&ap.client, &client_ats_key, &client_ats_iv);
        assert_key_and_iv(&ap.server, &server_ats_key, &server_ats_iv);

        // superseded handshake secrets are gone
        assert!(ks.handshake.is_none());
        assert!(ks.handshake_encrypter(Side::Client).is_err());
    }

    #[test]
    fn stages_must_run_in_order() {
        let h = hash::Output::new(&[0; 32]);
        let mut ks = KeySchedule::new(suite());

        assert_eq!(
            ks.derive_handshake(&[1; 32], &h, &crate::key_log::NoKeyLog, &[0; 32])
                .unwrap_err(),
            Error::ApiMisuse(ApiMisuse::KeyScheduleOutOfOrder { stage: "handshake" })
        );
        assert_eq!(
            ks.derive_application(&h, &crate::key_log::NoKeyLog, &[0; 32])
                .unwrap_err(),
            Error::ApiMisuse(ApiMisuse::KeyScheduleOutOfOrder {
                stage: "application"
            })
        );
        assert_eq!(ks.stage, Stage::Fresh);
        assert!(ks.current.is_none());
    }

    #[test]
    fn early_stage_runs_once() {
        let mut ks = KeySchedule::new(suite());
        ks.derive_early(Some(&[7; 32])).unwrap();
        let binder = ks
            .resumption_binder(&hash::Output::new(&[1; 32]))
            .unwrap();

        assert_eq!(
            ks.derive_early(None).unwrap_err(),
            Error::ApiMisuse(ApiMisuse::KeyScheduleStageRepeated { stage: "early" })
        );

        // the failed call did not disturb the binder key
        let again = ks
            .resumption_binder(&hash::Output::new(&[1; 32]))
            .unwrap();
        assert_eq!(binder.as_ref(), again.as_ref());
    }

    #[test]
    fn binder_key_wiped_by_handshake_stage() {
        let h = hash::Output::new(&[0; 32]);
        let mut ks = KeySchedule::new(suite());
        ks.derive_early(Some(&[7; 32])).unwrap();
        ks.derive_handshake(&[1; 32], &h, &crate::key_log::NoKeyLog, &[0; 32])
            .unwrap();
        assert!(ks.resumption_binder(&h).is_err());
        assert_eq!(
            ks.derive_handshake(&[1; 32], &h, &crate::key_log::NoKeyLog, &[0; 32])
                .unwrap_err(),
            Error::ApiMisuse(ApiMisuse::KeyScheduleStageRepeated { stage: "handshake" })
        );
    }

    fn established() -> KeySchedule {
        let h = hash::Output::new(&[0; 32]);
        let mut ks = KeySchedule::new(suite());
        ks.derive_early(None).unwrap();
        ks.derive_handshake(&[1; 32], &h, &crate::key_log::NoKeyLog, &[0; 32])
            .unwrap();
        ks.derive_application(&h, &crate::key_log::NoKeyLog, &[0; 32])
            .unwrap();
        ks
    }

    #[test]
    fn finished_keys_differ_per_side() {
        let ks = established();
        let h = hash::Output::new(&[3; 32]);
        let c = ks.sign_finish(Side::Client, &h).unwrap();
        let s = ks.sign_finish(Side::Server, &h).unwrap();
        assert_ne!(c.as_ref(), s.as_ref());
        assert_eq!(c.as_ref().len(), 32);
    }

    #[test]
    fn resumption_master_wipes_master_secret() {
        let mut ks = established();
        let h = hash::Output::new(&[4; 32]);
        let rms = ks.derive_resumption_master(&h).unwrap();
        assert!(ks.derive_resumption_master(&h).is_err());
        assert!(ks.sign_finish(Side::Client, &h).is_err());

        let psk1 = ks.derive_ticket_psk(&rms, &[0]);
        let psk2 = ks.derive_ticket_psk(&rms, &[1]);
        assert_ne!(psk1.as_ref(), psk2.as_ref());

        // traffic keys and exporter survive
        assert!(ks.application_encrypter(Side::Client).is_ok());
        let mut out = [0u8; 16];
        ks.export_keying_material(&mut out, b"label", None)
            .unwrap();
    }

    #[test]
    fn key_update_touches_one_direction() {
        let mut ks = established();
        let before_client = ks.application.as_ref().unwrap().client.as_ref().to_vec();
        let before_server = ks.application.as_ref().unwrap().server.as_ref().to_vec();

        ks.update_traffic_secret(Side::Client).unwrap();
        let ap = ks.application.as_ref().unwrap();
        assert_ne!(ap.client.as_ref(), &before_client[..]);
        assert_eq!(ap.server.as_ref(), &before_server[..]);
    }

    #[test]
    fn key_update_before_handshake_is_refused() {
        let mut ks = KeySchedule::new(suite());
        assert_eq!(
            ks.update_traffic_secret(Side::Server)
                .unwrap_err(),
            Error::ApiMisuse(ApiMisuse::KeyUpdateNotAvailable)
        );
    }

    #[test]
    fn exporter_context_matters() {
        let ks = established();
        let mut none = [0u8; 32];
        let mut empty = [0u8; 32];
        let mut some = [0u8; 32];
        ks.export_keying_material(&mut none, b"EXPORTER-test", None)
            .unwrap();
        ks.export_keying_material(&mut empty, b"EXPORTER-test", Some(b""))
            .unwrap();
        ks.export_keying_material(&mut some, b"EXPORTER-test", Some(b"ctx"))
            .unwrap();
        // RFC8446 treats an absent context as empty
        assert_eq!(none, empty);
        assert_ne!(none, some);

        let mut huge = vec![0u8; 255 * 32 + 1];
        assert_eq!(
            ks.export_keying_material(&mut huge, b"EXPORTER-test", None)
                .unwrap_err(),
            Error::ApiMisuse(ApiMisuse::ExporterInvalidInput)
        );
    }

    #[test]
    fn exporter_label_must_fit_hkdf_label() {
        let ks = established();
        let mut out = [0u8; 32];

        let longest = vec![b'x'; 255 - 6];
        ks.export_keying_material(&mut out, &longest, None)
            .unwrap();

        let too_long = vec![b'x'; 255 - 5];
        assert_eq!(
            ks.export_keying_material(&mut out, &too_long, None)
                .unwrap_err(),
            Error::ApiMisuse(ApiMisuse::ExporterInvalidInput)
        );
    }

    #[test]
    fn sha384_suite_has_longer_secrets() {
        let suite = TLS13_AES_256_GCM_SHA384.tls13().unwrap();
        let mut ks = KeySchedule::new(suite);
        ks.derive_early(None).unwrap();
        let log = Recorder::default();
        ks.derive_handshake(&[9; 48], &hash::Output::new(&[0; 48]), &log, &[0; 32])
            .unwrap();
        assert_eq!(log.get("CLIENT_HANDSHAKE_TRAFFIC_SECRET").len(), 48);
    }
}

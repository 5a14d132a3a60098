use crate::crypto::cipher::{MessageDecrypter, MessageEncrypter};
use crate::error::Error;
#[cfg(feature = "logging")]
use crate::log::{error, trace};
use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage, PlainMessage};

/// Sequence number at which a key should be retired.
const SEQ_SOFT_LIMIT: u64 = 0xffff_ffff_ffff_0000u64;
/// No record is ever protected with a sequence number above this.
const SEQ_HARD_LIMIT: u64 = 0xffff_ffff_ffff_fffeu64;

#[derive(Clone, Copy, Debug, PartialEq)]
enum DirectionState {
    /// No key yet.
    Invalid,
    /// Key installed, waiting for ChangeCipherSpec.
    Prepared,
    Active,
}

/// One direction's key and sequence counter.
struct Direction<C: ?Sized> {
    cipher: Box<C>,
    seq: u64,
    state: DirectionState,
}

impl<C: ?Sized> Direction<C> {
    fn new(cipher: Box<C>) -> Self {
        Self {
            cipher,
            seq: 0,
            state: DirectionState::Invalid,
        }
    }

    fn prepare(&mut self, cipher: Box<C>) {
        self.cipher = cipher;
        self.seq = 0;
        self.state = DirectionState::Prepared;
    }

    fn activate(&mut self) {
        debug_assert_eq!(self.state, DirectionState::Prepared);
        self.state = DirectionState::Active;
    }

    fn is_active(&self) -> bool {
        self.state == DirectionState::Active
    }
}

/// Per-direction record protection: keys, sequence numbers, and the
/// bookkeeping for skipping rejected early data.
pub(crate) struct RecordLayer {
    write: Direction<dyn MessageEncrypter>,
    read: Direction<dyn MessageDecrypter>,
    /// Survives key changes, unlike `read.seq`.
    has_decrypted: bool,
    /// Bytes of undecryptable records we may still silently drop, while
    /// skipping 0-RTT data the server refused.
    trial_decryption_len: Option<usize>,
}

impl RecordLayer {
    pub(crate) fn new() -> Self {
        Self {
            write: Direction::new(<dyn MessageEncrypter>::invalid()),
            read: Direction::new(<dyn MessageDecrypter>::invalid()),
            has_decrypted: false,
            trial_decryption_len: None,
        }
    }

    /// Unprotect a record from the peer.
    ///
    /// Before the read key is active records pass through as plaintext.
    /// `Ok(None)` means the record was skipped as refused early data.
    pub(crate) fn decrypt_incoming(
        &mut self,
        encr: OpaqueMessage,
    ) -> Result<Option<Decrypted>, Error> {
        if !self.read.is_active() {
            return Ok(Some(Decrypted {
                want_close_before_decrypt: false,
                plaintext: encr.into_plain_message(),
            }));
        }

        let seq = self.read.seq;
        if seq > SEQ_HARD_LIMIT {
            error!("peer exhausted its read sequence space");
            return Err(Error::DecryptError);
        }

        let encrypted_len = encr.payload.0.len();
        match self.read.cipher.decrypt(encr, seq) {
            Ok(plaintext) => {
                self.read.seq += 1;
                self.has_decrypted = true;
                Ok(Some(Decrypted {
                    want_close_before_decrypt: seq == SEQ_SOFT_LIMIT,
                    plaintext,
                }))
            }
            Err(Error::DecryptError) if self.spend_trial_budget(encrypted_len) => {
                trace!("skipping {encrypted_len} byte record after refused early data");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Protect a record for the peer.
    ///
    /// Fails with `EncryptError` once the write sequence space is used up,
    /// and keeps failing until the key changes.
    pub(crate) fn encrypt_outgoing(
        &mut self,
        plain: BorrowedPlainMessage<'_>,
    ) -> Result<OpaqueMessage, Error> {
        debug_assert!(self.write.is_active());
        if self.encrypt_exhausted() {
            error!("refusing to encrypt: write sequence space exhausted");
            return Err(Error::EncryptError);
        }

        let opaque = self
            .write
            .cipher
            .encrypt(plain, self.write.seq)?;
        self.write.seq += 1;
        Ok(opaque)
    }

    /// Install a read key to be activated later by `start_decrypting`.
    pub(crate) fn prepare_message_decrypter(&mut self, cipher: Box<dyn MessageDecrypter>) {
        self.read.prepare(cipher);
    }

    pub(crate) fn start_decrypting(&mut self) {
        self.read.activate();
    }

    /// Replace the write key, effective immediately.
    pub(crate) fn set_message_encrypter(&mut self, cipher: Box<dyn MessageEncrypter>) {
        self.write.prepare(cipher);
        self.write.activate();
    }

    /// Replace the read key, effective immediately.
    pub(crate) fn set_message_decrypter(&mut self, cipher: Box<dyn MessageDecrypter>) {
        self.read.prepare(cipher);
        self.read.activate();
        self.trial_decryption_len = None;
    }

    /// Like `set_message_decrypter`, but records that fail to decrypt are
    /// dropped until `max_length` bytes of them have been seen.
    pub(crate) fn set_message_decrypter_with_trial_decryption(
        &mut self,
        cipher: Box<dyn MessageDecrypter>,
        max_length: usize,
    ) {
        self.set_message_decrypter(cipher);
        self.trial_decryption_len = Some(max_length);
    }

    pub(crate) fn finish_trial_decryption(&mut self) {
        self.trial_decryption_len = None;
    }

    /// The next record is the last before the soft limit; TLS1.2 closes
    /// here.
    pub(crate) fn wants_close_before_encrypt(&self) -> bool {
        self.write.seq == SEQ_SOFT_LIMIT
    }

    /// The write key is due for a TLS1.3 KeyUpdate.
    pub(crate) fn wants_key_update(&self) -> bool {
        self.write.is_active() && self.write.seq >= SEQ_SOFT_LIMIT
    }

    pub(crate) fn encrypt_exhausted(&self) -> bool {
        self.write.seq >= SEQ_HARD_LIMIT
    }

    pub(crate) fn is_encrypting(&self) -> bool {
        self.write.is_active()
    }

    pub(crate) fn is_decrypting(&self) -> bool {
        self.read.is_active()
    }

    pub(crate) fn has_decrypted(&self) -> bool {
        self.has_decrypted
    }

    pub(crate) fn read_seq(&self) -> u64 {
        self.read.seq
    }

    #[cfg(test)]
    fn write_seq(&self) -> u64 {
        self.write.seq
    }

    #[cfg(test)]
    fn set_write_seq(&mut self, seq: u64) {
        self.write.seq = seq;
    }

    fn spend_trial_budget(&mut self, len: usize) -> bool {
        let Some(remaining) = self
            .trial_decryption_len
            .and_then(|budget| budget.checked_sub(len))
        else {
            return false;
        };
        self.trial_decryption_len = Some(remaining);
        true
    }
}

/// A record after `RecordLayer::decrypt_incoming`.
#[derive(Debug)]
pub(crate) struct Decrypted {
    /// The peer has reached the soft limit on its key.
    pub(crate) want_close_before_decrypt: bool,
    pub(crate) plaintext: PlainMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ContentType, ProtocolVersion};

    struct PassThroughDecrypter;

    impl MessageDecrypter for PassThroughDecrypter {
        fn decrypt(&self, m: OpaqueMessage, _: u64) -> Result<PlainMessage, Error> {
            Ok(m.into_plain_message())
        }
    }

    struct FailingDecrypter;

    impl MessageDecrypter for FailingDecrypter {
        fn decrypt(&self, _: OpaqueMessage, _: u64) -> Result<PlainMessage, Error> {
            Err(Error::DecryptError)
        }
    }

    struct SeqEncrypter;

    impl MessageEncrypter for SeqEncrypter {
        fn encrypt(&self, m: BorrowedPlainMessage<'_>, seq: u64) -> Result<OpaqueMessage, Error> {
            let mut payload = m.payload.to_vec();
            payload.extend_from_slice(&seq.to_be_bytes());
            Ok(OpaqueMessage::new(m.typ, m.version, payload))
        }

        fn encrypted_payload_len(&self, payload_len: usize) -> usize {
            payload_len + 8
        }
    }

    fn record() -> OpaqueMessage {
        OpaqueMessage::new(
            ContentType::Handshake,
            ProtocolVersion::TLSv1_2,
            vec![0xC0, 0xFF, 0xEE],
        )
    }

    fn plain() -> BorrowedPlainMessage<'static> {
        BorrowedPlainMessage {
            typ: ContentType::ApplicationData,
            version: ProtocolVersion::TLSv1_2,
            payload: b"x",
        }
    }

    #[test]
    fn has_decrypted_outlives_key_changes() {
        let mut rl = RecordLayer::new();
        assert_eq!(rl.read.state, DirectionState::Invalid);
        assert!(!rl.has_decrypted());

        rl.prepare_message_decrypter(Box::new(PassThroughDecrypter));
        assert_eq!(rl.read.state, DirectionState::Prepared);
        assert!(!rl.is_decrypting());

        rl.start_decrypting();
        assert!(rl.is_decrypting());
        assert!(!rl.has_decrypted());

        rl.decrypt_incoming(record()).unwrap();
        assert_eq!(rl.read_seq(), 1);
        assert!(rl.has_decrypted());

        rl.set_message_decrypter(Box::new(PassThroughDecrypter));
        assert_eq!(rl.read_seq(), 0);
        assert!(rl.has_decrypted());
    }

    #[test]
    fn sequence_numbers_increase_by_one() {
        let mut rl = RecordLayer::new();
        rl.set_message_encrypter(Box::new(SeqEncrypter));
        for expect in 0u64..3 {
            let out = rl.encrypt_outgoing(plain()).unwrap();
            assert_eq!(&out.payload.0[1..], &expect.to_be_bytes());
        }
        assert_eq!(rl.write_seq(), 3);
    }

    #[test]
    fn exhausted_write_sequence_fails_closed() {
        let mut rl = RecordLayer::new();
        rl.set_message_encrypter(Box::new(SeqEncrypter));

        rl.set_write_seq(SEQ_SOFT_LIMIT);
        assert!(rl.wants_close_before_encrypt());
        assert!(rl.wants_key_update());

        rl.set_write_seq(SEQ_HARD_LIMIT - 1);
        rl.encrypt_outgoing(plain()).unwrap();
        assert!(rl.encrypt_exhausted());
        assert_eq!(
            rl.encrypt_outgoing(plain()).unwrap_err(),
            Error::EncryptError
        );
        assert_eq!(rl.write_seq(), SEQ_HARD_LIMIT);
        assert!(rl.encrypt_outgoing(plain()).is_err());

        // a new key starts again from zero
        rl.set_message_encrypter(Box::new(SeqEncrypter));
        assert!(rl.encrypt_outgoing(plain()).is_ok());
    }

    #[test]
    fn plaintext_passes_before_keys() {
        let mut rl = RecordLayer::new();
        let out = rl
            .decrypt_incoming(record())
            .unwrap()
            .unwrap();
        assert_eq!(out.plaintext.payload.0, vec![0xC0, 0xFF, 0xEE]);
        assert_eq!(rl.read_seq(), 0);
    }

    #[test]
    fn trial_decryption_budget() {
        let mut rl = RecordLayer::new();
        rl.set_message_decrypter_with_trial_decryption(Box::new(FailingDecrypter), 5);
        assert!(rl
            .decrypt_incoming(record())
            .unwrap()
            .is_none());
        // 2 bytes of budget left; a 3-byte record exceeds it
        assert_eq!(
            rl.decrypt_incoming(record()).unwrap_err(),
            Error::DecryptError
        );

        rl.set_message_decrypter_with_trial_decryption(Box::new(FailingDecrypter), 100);
        rl.finish_trial_decryption();
        assert!(rl.decrypt_incoming(record()).is_err());
    }
}

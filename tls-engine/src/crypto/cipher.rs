use zeroize::Zeroize;

use crate::enums::{ContentType, ProtocolVersion};
use crate::error::{Error, PeerMisbehaved};
use crate::msgs::base::Payload;
use crate::msgs::codec;
use crate::msgs::fragmenter::MAX_FRAGMENT_LEN;
pub use crate::msgs::message::{BorrowedPlainMessage, OpaqueMessage, PlainMessage};

/// The AEAD of a TLS1.3 suite, turning traffic keys into record protection.
pub trait Tls13AeadAlgorithm: Send + Sync {
    /// Protection for outgoing records.
    fn encrypter(&self, key: AeadKey, iv: Iv) -> Result<Box<dyn MessageEncrypter>, Error>;

    /// Protection for incoming records.
    fn decrypter(&self, key: AeadKey, iv: Iv) -> Result<Box<dyn MessageDecrypter>, Error>;

    /// Key length in bytes.
    fn key_len(&self) -> usize;
}

/// The AEAD of a TLS1.2 suite, built from slices of the key block.
pub trait Tls12AeadAlgorithm: Send + Sync {
    /// Protection for outgoing records. `extra` is the key block tail
    /// that seeds the explicit nonce, for algorithms that have one.
    fn encrypter(
        &self,
        key: AeadKey,
        iv: &[u8],
        extra: &[u8],
    ) -> Result<Box<dyn MessageEncrypter>, Error>;

    /// Protection for incoming records.
    fn decrypter(&self, key: AeadKey, iv: &[u8]) -> Result<Box<dyn MessageDecrypter>, Error>;

    /// The key block layout this algorithm needs.
    fn key_block_shape(&self) -> KeyBlockShape;
}

/// Lengths of the pieces a TLS1.2 key block is cut into. Only AEAD suites
/// exist here, so there are no MAC keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyBlockShape {
    /// Per-direction key length.
    pub enc_key_len: usize,

    /// Per-direction implicit nonce length.
    pub fixed_iv_len: usize,

    /// Bytes taken after both keys and IVs to seed the explicit nonce.
    /// Zero for suites without one.
    pub explicit_nonce_len: usize,
}

/// Removes record protection.
pub trait MessageDecrypter: Send + Sync {
    /// Open `m`, the record with sequence number `seq`.
    fn decrypt(&self, m: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error>;

    /// Turn an opened TLS1.3 `TLSInnerPlaintext` into a plain record:
    /// strip the padding, recover the real content type and check the
    /// size limit.
    fn tls13_check_length_and_unpad(&self, msg: OpaqueMessage) -> Result<PlainMessage, Error> {
        let mut inner = msg.payload.0;
        // content plus the type byte, before looking at padding
        if inner.len() > MAX_FRAGMENT_LEN + 1 {
            return Err(Error::PeerSentOversizedRecord);
        }

        let typ = unpad_tls13(&mut inner);
        if typ == ContentType::Unknown(0) {
            return Err(PeerMisbehaved::IllegalTlsInnerPlaintext.into());
        }
        if inner.len() > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        Ok(PlainMessage {
            typ,
            version: ProtocolVersion::TLSv1_3,
            payload: Payload(inner),
        })
    }
}

/// Drop trailing zero padding and pop the content type byte (RFC8446 5.2).
/// All-zero input yields `ContentType::Unknown(0)`.
fn unpad_tls13(v: &mut Vec<u8>) -> ContentType {
    let content_len = v
        .iter()
        .rposition(|b| *b != 0)
        .unwrap_or(0);
    let typ = v.get(content_len).copied().unwrap_or(0);
    v.truncate(content_len);
    ContentType::from(typ)
}

/// Applies record protection.
pub trait MessageEncrypter: Send + Sync {
    /// Seal `m` as the record with sequence number `seq`.
    fn encrypt(&self, m: BorrowedPlainMessage<'_>, seq: u64) -> Result<OpaqueMessage, Error>;

    /// Ciphertext length for `payload_len` bytes of plaintext.
    fn encrypted_payload_len(&self, payload_len: usize) -> usize;
}

impl dyn MessageEncrypter {
    pub(crate) fn invalid() -> Box<dyn MessageEncrypter> {
        Box::new(InvalidMessageEncrypter {})
    }
}

impl dyn MessageDecrypter {
    pub(crate) fn invalid() -> Box<dyn MessageDecrypter> {
        Box::new(InvalidMessageDecrypter {})
    }
}

/// Nonce length of every supported AEAD.
pub const NONCE_LEN: usize = 12;

/// The per-direction IV, XORed with the sequence number to form nonces.
#[derive(Default)]
pub struct Iv([u8; NONCE_LEN]);

impl Iv {
    /// Exactly [`NONCE_LEN`] bytes.
    pub fn copy(value: &[u8]) -> Result<Self, Error> {
        Self::from_parts(value, &[])
    }

    /// A TLS1.2 IV: implicit part from the key block, then the explicit
    /// part.
    pub fn from_parts(fixed: &[u8], explicit: &[u8]) -> Result<Self, Error> {
        if fixed.len() + explicit.len() != NONCE_LEN {
            return Err(Error::General(format!(
                "IV must be {NONCE_LEN} bytes, got {}",
                fixed.len() + explicit.len()
            )));
        }
        let mut iv = Self::default();
        let (head, tail) = iv.0.split_at_mut(fixed.len());
        head.copy_from_slice(fixed);
        tail.copy_from_slice(explicit);
        Ok(iv)
    }
}

impl From<[u8; NONCE_LEN]> for Iv {
    fn from(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Iv {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for Iv {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// The per-record nonce: `iv` XOR the sequence number, right-aligned.
#[inline]
pub fn make_nonce(iv: &Iv, seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = iv.0;
    let mut seq_bytes = [0u8; 8];
    codec::put_u64(seq, &mut seq_bytes);
    for (n, s) in nonce[NONCE_LEN - 8..]
        .iter_mut()
        .zip(seq_bytes)
    {
        *n ^= s;
    }
    nonce
}

/// TLS1.3 `additional_data`: the outer record header (RFC8446 5.2).
#[inline]
pub fn make_tls13_aad(payload_len: usize) -> [u8; 5] {
    // the outer header always claims application_data and TLS1.2
    let [v0, v1] = ProtocolVersion::TLSv1_2.to_array();
    let [l0, l1] = (payload_len as u16).to_be_bytes();
    [u8::from(ContentType::ApplicationData), v0, v1, l0, l1]
}

const TLS12_AAD_SIZE: usize = 8 + 1 + 2 + 2;

/// TLS1.2 `additional_data`: sequence number then the plaintext record
/// header (RFC5246 6.2.3.3).
#[inline]
pub fn make_tls12_aad(
    seq: u64,
    typ: ContentType,
    vers: ProtocolVersion,
    len: usize,
) -> [u8; TLS12_AAD_SIZE] {
    let mut out = [0; TLS12_AAD_SIZE];
    codec::put_u64(seq, &mut out[0..]);
    out[8] = u8::from(typ);
    codec::put_u16(u16::from(vers), &mut out[9..]);
    codec::put_u16(len as u16, &mut out[11..]);
    out
}

/// Room for an AES-256 or ChaCha20 key.
const MAX_AEAD_KEY_LEN: usize = 32;

/// A key for an AEAD algorithm, wiped on drop.
pub struct AeadKey {
    buf: [u8; MAX_AEAD_KEY_LEN],
    used: usize,
}

impl AeadKey {
    /// Copy a key. Anything past 32 bytes is dropped.
    pub fn new(bytes: &[u8]) -> Self {
        let used = bytes.len().min(MAX_AEAD_KEY_LEN);
        let mut buf = [0u8; MAX_AEAD_KEY_LEN];
        buf[..used].copy_from_slice(&bytes[..used]);
        Self { buf, used }
    }
}

impl AsRef<[u8]> for AeadKey {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

/// Stands in until a write key exists.
struct InvalidMessageEncrypter {}

impl MessageEncrypter for InvalidMessageEncrypter {
    fn encrypt(&self, _m: BorrowedPlainMessage<'_>, _seq: u64) -> Result<OpaqueMessage, Error> {
        Err(Error::EncryptError)
    }

    fn encrypted_payload_len(&self, payload_len: usize) -> usize {
        payload_len
    }
}

/// Stands in until a read key exists.
struct InvalidMessageDecrypter {}

impl MessageDecrypter for InvalidMessageDecrypter {
    fn decrypt(&self, _m: OpaqueMessage, _seq: u64) -> Result<PlainMessage, Error> {
        Err(Error::DecryptError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_is_iv_xor_sequence_number() {
        let iv = Iv::from([0xff; NONCE_LEN]);
        assert_eq!(make_nonce(&iv, 0), [0xff; NONCE_LEN]);
        assert_eq!(
            make_nonce(&iv, 0x0102),
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xfd]
        );
    }

    #[test]
    fn aad_encodings() {
        assert_eq!(make_tls13_aad(0x1234), [0x17, 0x03, 0x03, 0x12, 0x34]);
        assert_eq!(
            make_tls12_aad(1, ContentType::Handshake, ProtocolVersion::TLSv1_2, 16),
            [0, 0, 0, 0, 0, 0, 0, 1, 0x16, 0x03, 0x03, 0x00, 0x10]
        );
    }

    #[test]
    fn unpad_recovers_inner_type() {
        let mut v = vec![1, 2, 0x16, 0, 0, 0];
        assert_eq!(unpad_tls13(&mut v), ContentType::Handshake);
        assert_eq!(v, vec![1, 2]);

        let mut zeroes = vec![0, 0, 0];
        assert_eq!(unpad_tls13(&mut zeroes), ContentType::Unknown(0));
    }

    #[test]
    fn all_zero_plaintext_is_rejected() {
        let msg = OpaqueMessage::new(ContentType::ApplicationData, ProtocolVersion::TLSv1_2, vec![0; 4]);
        let dec = <dyn MessageDecrypter>::invalid();
        assert_eq!(
            dec.tls13_check_length_and_unpad(msg)
                .unwrap_err(),
            Error::PeerMisbehaved(PeerMisbehaved::IllegalTlsInnerPlaintext)
        );
    }

    #[test]
    fn iv_lengths_are_checked() {
        assert!(Iv::copy(&[0; 11]).is_err());
        assert!(Iv::from_parts(&[1; 4], &[2; 8]).is_ok());
        assert!(Iv::from_parts(&[1; 4], &[2; 4]).is_err());
    }
}

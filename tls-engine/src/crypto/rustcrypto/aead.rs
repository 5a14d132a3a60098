use std::marker::PhantomData;

use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce};

use crate::crypto::cipher::{
    make_nonce, make_tls12_aad, make_tls13_aad, AeadKey, BorrowedPlainMessage, Iv, KeyBlockShape,
    MessageDecrypter, MessageEncrypter, OpaqueMessage, PlainMessage, Tls12AeadAlgorithm,
    Tls13AeadAlgorithm, NONCE_LEN,
};
use crate::enums::{ContentType, ProtocolVersion};
use crate::error::Error;
use crate::msgs::fragmenter::MAX_FRAGMENT_LEN;

/// All the AEADs we support have a 16-byte tag.
const TAG_LEN: usize = 16;

/// TLS1.2 GCM sends this much of the nonce with each record.
const GCM_EXPLICIT_NONCE_LEN: usize = 8;
const GCM_FIXED_IV_LEN: usize = 4;

/// An AEAD from the RustCrypto `aead` family.
///
/// `explicit_nonce` selects the TLS1.2 nonce construction: RFC5288 style
/// (4 fixed bytes plus 8 sent on the wire) for GCM, or RFC7905 style
/// (12-byte IV XOR sequence number) for ChaCha20-Poly1305.
pub struct Aead<C> {
    key_len: usize,
    explicit_nonce: bool,
    cipher: PhantomData<fn() -> C>,
}

pub static AES_128_GCM: Aead<aes_gcm::Aes128Gcm> = Aead {
    key_len: 16,
    explicit_nonce: true,
    cipher: PhantomData,
};

pub static AES_256_GCM: Aead<aes_gcm::Aes256Gcm> = Aead {
    key_len: 32,
    explicit_nonce: true,
    cipher: PhantomData,
};

pub static CHACHA20_POLY1305: Aead<chacha20poly1305::ChaCha20Poly1305> = Aead {
    key_len: 32,
    explicit_nonce: false,
    cipher: PhantomData,
};

fn new_cipher<C: KeyInit>(key: &AeadKey) -> Result<C, Error> {
    C::new_from_slice(key.as_ref()).map_err(|_| Error::General("AEAD key length mismatch".into()))
}

impl<C> Tls13AeadAlgorithm for Aead<C>
where
    C: AeadInPlace + KeyInit + Send + Sync + 'static,
{
    fn encrypter(&self, key: AeadKey, iv: Iv) -> Result<Box<dyn MessageEncrypter>, Error> {
        Ok(Box::new(Tls13Cipher(new_cipher::<C>(&key)?, iv)))
    }

    fn decrypter(&self, key: AeadKey, iv: Iv) -> Result<Box<dyn MessageDecrypter>, Error> {
        Ok(Box::new(Tls13Cipher(new_cipher::<C>(&key)?, iv)))
    }

    fn key_len(&self) -> usize {
        self.key_len
    }
}

impl<C> Tls12AeadAlgorithm for Aead<C>
where
    C: AeadInPlace + KeyInit + Send + Sync + 'static,
{
    fn encrypter(
        &self,
        key: AeadKey,
        iv: &[u8],
        extra: &[u8],
    ) -> Result<Box<dyn MessageEncrypter>, Error> {
        let cipher = new_cipher::<C>(&key)?;
        Ok(match self.explicit_nonce {
            true => Box::new(GcmEncrypter {
                cipher,
                iv: Iv::from_parts(iv, extra)?,
            }),
            false => Box::new(Tls12Cipher(cipher, Iv::copy(iv)?)),
        })
    }

    fn decrypter(&self, key: AeadKey, iv: &[u8]) -> Result<Box<dyn MessageDecrypter>, Error> {
        let cipher = new_cipher::<C>(&key)?;
        Ok(match self.explicit_nonce {
            true => {
                let mut fixed = [0u8; GCM_FIXED_IV_LEN];
                if iv.len() != GCM_FIXED_IV_LEN {
                    return Err(Error::General("IV length mismatch".into()));
                }
                fixed.copy_from_slice(iv);
                Box::new(GcmDecrypter { cipher, fixed })
            }
            false => Box::new(Tls12Cipher(cipher, Iv::copy(iv)?)),
        })
    }

    fn key_block_shape(&self) -> KeyBlockShape {
        match self.explicit_nonce {
            true => KeyBlockShape {
                enc_key_len: self.key_len,
                fixed_iv_len: GCM_FIXED_IV_LEN,
                explicit_nonce_len: GCM_EXPLICIT_NONCE_LEN,
            },
            false => KeyBlockShape {
                enc_key_len: self.key_len,
                fixed_iv_len: NONCE_LEN,
                explicit_nonce_len: 0,
            },
        }
    }
}

struct Tls13Cipher<C>(C, Iv);

impl<C> MessageEncrypter for Tls13Cipher<C>
where
    C: AeadInPlace + Send + Sync,
{
    fn encrypt(&self, msg: BorrowedPlainMessage<'_>, seq: u64) -> Result<OpaqueMessage, Error> {
        let total_len = self.encrypted_payload_len(msg.payload.len());
        let mut payload = Vec::with_capacity(total_len);
        payload.extend_from_slice(msg.payload);
        payload.push(u8::from(msg.typ));

        let nonce = make_nonce(&self.1, seq);
        let aad = make_tls13_aad(total_len);

        self.0
            .encrypt_in_place(Nonce::<C>::from_slice(&nonce), &aad, &mut payload)
            .map_err(|_| Error::EncryptError)?;

        Ok(OpaqueMessage::new(
            ContentType::ApplicationData,
            ProtocolVersion::TLSv1_2,
            payload,
        ))
    }

    fn encrypted_payload_len(&self, payload_len: usize) -> usize {
        payload_len + 1 + TAG_LEN
    }
}

impl<C> MessageDecrypter for Tls13Cipher<C>
where
    C: AeadInPlace + Send + Sync,
{
    fn decrypt(&self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &mut msg.payload.0;
        if payload.len() < TAG_LEN {
            return Err(Error::DecryptError);
        }

        let nonce = make_nonce(&self.1, seq);
        let aad = make_tls13_aad(payload.len());

        self.0
            .decrypt_in_place(Nonce::<C>::from_slice(&nonce), &aad, payload)
            .map_err(|_| Error::DecryptError)?;

        self.tls13_check_length_and_unpad(msg)
    }
}

/// TLS1.2 with a 12-byte IV XOR sequence number nonce (RFC7905).
struct Tls12Cipher<C>(C, Iv);

impl<C> MessageEncrypter for Tls12Cipher<C>
where
    C: AeadInPlace + Send + Sync,
{
    fn encrypt(&self, msg: BorrowedPlainMessage<'_>, seq: u64) -> Result<OpaqueMessage, Error> {
        let mut payload = Vec::with_capacity(self.encrypted_payload_len(msg.payload.len()));
        payload.extend_from_slice(msg.payload);

        let nonce = make_nonce(&self.1, seq);
        let aad = make_tls12_aad(seq, msg.typ, msg.version, msg.payload.len());

        self.0
            .encrypt_in_place(Nonce::<C>::from_slice(&nonce), &aad, &mut payload)
            .map_err(|_| Error::EncryptError)?;

        Ok(OpaqueMessage::new(msg.typ, msg.version, payload))
    }

    fn encrypted_payload_len(&self, payload_len: usize) -> usize {
        payload_len + TAG_LEN
    }
}

impl<C> MessageDecrypter for Tls12Cipher<C>
where
    C: AeadInPlace + Send + Sync,
{
    fn decrypt(&self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &mut msg.payload.0;
        if payload.len() < TAG_LEN {
            return Err(Error::DecryptError);
        }

        let nonce = make_nonce(&self.1, seq);
        let aad = make_tls12_aad(seq, msg.typ, msg.version, payload.len() - TAG_LEN);

        self.0
            .decrypt_in_place(Nonce::<C>::from_slice(&nonce), &aad, payload)
            .map_err(|_| Error::DecryptError)?;

        if payload.len() > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        Ok(msg.into_plain_message())
    }
}

/// TLS1.2 GCM (RFC5288): the explicit part of the nonce precedes the ciphertext.
///
/// The explicit part is derived from the sequence number XOR a
/// key-block-derived offset, so it never repeats under one key.
struct GcmEncrypter<C> {
    cipher: C,
    iv: Iv,
}

impl<C> MessageEncrypter for GcmEncrypter<C>
where
    C: AeadInPlace + Send + Sync,
{
    fn encrypt(&self, msg: BorrowedPlainMessage<'_>, seq: u64) -> Result<OpaqueMessage, Error> {
        let nonce = make_nonce(&self.iv, seq);
        let aad = make_tls12_aad(seq, msg.typ, msg.version, msg.payload.len());

        let mut payload = Vec::with_capacity(self.encrypted_payload_len(msg.payload.len()));
        payload.extend_from_slice(&nonce[GCM_FIXED_IV_LEN..]);
        payload.extend_from_slice(msg.payload);

        let mut body = payload.split_off(GCM_EXPLICIT_NONCE_LEN);
        self.cipher
            .encrypt_in_place(Nonce::<C>::from_slice(&nonce), &aad, &mut body)
            .map_err(|_| Error::EncryptError)?;
        payload.extend_from_slice(&body);

        Ok(OpaqueMessage::new(msg.typ, msg.version, payload))
    }

    fn encrypted_payload_len(&self, payload_len: usize) -> usize {
        GCM_EXPLICIT_NONCE_LEN + payload_len + TAG_LEN
    }
}

struct GcmDecrypter<C> {
    cipher: C,
    fixed: [u8; GCM_FIXED_IV_LEN],
}

impl<C> MessageDecrypter for GcmDecrypter<C>
where
    C: AeadInPlace + Send + Sync,
{
    fn decrypt(&self, mut msg: OpaqueMessage, seq: u64) -> Result<PlainMessage, Error> {
        let payload = &mut msg.payload.0;
        if payload.len() < GCM_EXPLICIT_NONCE_LEN + TAG_LEN {
            return Err(Error::DecryptError);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..GCM_FIXED_IV_LEN].copy_from_slice(&self.fixed);
        nonce[GCM_FIXED_IV_LEN..].copy_from_slice(&payload[..GCM_EXPLICIT_NONCE_LEN]);

        let aad = make_tls12_aad(
            seq,
            msg.typ,
            msg.version,
            payload.len() - GCM_EXPLICIT_NONCE_LEN - TAG_LEN,
        );

        payload.drain(..GCM_EXPLICIT_NONCE_LEN);
        self.cipher
            .decrypt_in_place(Nonce::<C>::from_slice(&nonce), &aad, payload)
            .map_err(|_| Error::DecryptError)?;

        if payload.len() > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }

        Ok(msg.into_plain_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(typ: ContentType, payload: &[u8]) -> BorrowedPlainMessage<'_> {
        BorrowedPlainMessage {
            typ,
            version: ProtocolVersion::TLSv1_2,
            payload,
        }
    }

    #[test]
    fn tls13_hides_the_content_type() {
        let enc = Tls13AeadAlgorithm::encrypter(
            &AES_128_GCM,
            AeadKey::new(&[1; 16]),
            Iv::from([2; NONCE_LEN]),
        )
        .unwrap();
        let dec = Tls13AeadAlgorithm::decrypter(
            &AES_128_GCM,
            AeadKey::new(&[1; 16]),
            Iv::from([2; NONCE_LEN]),
        )
        .unwrap();

        let sealed = enc
            .encrypt(plain(ContentType::Handshake, b"hello"), 7)
            .unwrap();
        assert_eq!(sealed.typ, ContentType::ApplicationData);
        assert_eq!(sealed.payload.0.len(), enc.encrypted_payload_len(5));

        let opened = dec.decrypt(sealed.clone(), 7).unwrap();
        assert_eq!(opened.typ, ContentType::Handshake);
        assert_eq!(opened.payload.0, b"hello");

        // wrong sequence number means wrong nonce
        assert_eq!(dec.decrypt(sealed, 8).unwrap_err(), Error::DecryptError);
    }

    #[test]
    fn tls12_gcm_carries_explicit_nonce() {
        let shape = AES_256_GCM.key_block_shape();
        assert_eq!(shape.fixed_iv_len + shape.explicit_nonce_len, NONCE_LEN);

        let enc = Tls12AeadAlgorithm::encrypter(
            &AES_256_GCM,
            AeadKey::new(&[3; 32]),
            &[4; 4],
            &[5; 8],
        )
        .unwrap();
        let dec =
            Tls12AeadAlgorithm::decrypter(&AES_256_GCM, AeadKey::new(&[3; 32]), &[4; 4]).unwrap();

        let sealed = enc
            .encrypt(plain(ContentType::ApplicationData, b"x"), 1)
            .unwrap();
        assert_eq!(sealed.payload.0.len(), 8 + 1 + 16);
        assert_eq!(&sealed.payload.0[..7], &[5; 7]);
        assert_eq!(sealed.payload.0[7], 5 ^ 1);

        let opened = dec.decrypt(sealed, 1).unwrap();
        assert_eq!(opened.payload.0, b"x");
    }

    #[test]
    fn tls12_chacha_tamper_is_detected() {
        let enc = Tls12AeadAlgorithm::encrypter(
            &CHACHA20_POLY1305,
            AeadKey::new(&[6; 32]),
            &[7; 12],
            &[],
        )
        .unwrap();
        let dec =
            Tls12AeadAlgorithm::decrypter(&CHACHA20_POLY1305, AeadKey::new(&[6; 32]), &[7; 12])
                .unwrap();

        let mut sealed = enc
            .encrypt(plain(ContentType::ApplicationData, b"data"), 0)
            .unwrap();
        sealed.payload.0[0] ^= 1;
        assert_eq!(dec.decrypt(sealed, 0).unwrap_err(), Error::DecryptError);
    }

    #[test]
    fn short_records_fail_to_decrypt() {
        let dec = Tls13AeadAlgorithm::decrypter(
            &CHACHA20_POLY1305,
            AeadKey::new(&[0; 32]),
            Iv::from([0; NONCE_LEN]),
        )
        .unwrap();
        let msg = OpaqueMessage::new(
            ContentType::ApplicationData,
            ProtocolVersion::TLSv1_2,
            vec![0; 15],
        );
        assert_eq!(dec.decrypt(msg, 0).unwrap_err(), Error::DecryptError);
    }
}

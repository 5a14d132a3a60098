//! HKDF (RFC5869) in the shape the TLS1.3 key schedule uses it, built on
//! any provider's HMAC.
use zeroize::Zeroize;

use super::hmac;

/// An HKDF pseudorandom key, ready to expand.
pub struct HkdfExpanderUsingHmac(Box<dyn hmac::Key>);

impl HkdfExpanderUsingHmac {
    /// T(1) | T(2) | ... truncated to `output.len()`, where
    /// T(n) = HMAC(PRK, T(n-1) | info | n). The caller checks the length.
    fn fill(&self, info: &[&[u8]], output: &mut [u8]) {
        let mut previous = hmac::Tag::new(&[]);
        let mut counter = 0u8;
        for chunk in output.chunks_mut(self.0.tag_len()) {
            counter += 1;
            previous = self
                .0
                .sign_concat(previous.as_ref(), info, &[counter]);
            chunk.copy_from_slice(&previous.as_ref()[..chunk.len()]);
        }
    }
}

impl HkdfExpander for HkdfExpanderUsingHmac {
    fn expand_slice(&self, info: &[&[u8]], output: &mut [u8]) -> Result<(), OutputLengthError> {
        // the block counter is a single byte
        if output.len() > 255 * self.0.tag_len() {
            return Err(OutputLengthError);
        }
        self.fill(info, output);
        Ok(())
    }

    fn expand_block(&self, info: &[&[u8]]) -> OkmBlock {
        let mut scratch = [0u8; hmac::Tag::MAX_LEN];
        let len = self.0.tag_len();
        self.fill(info, &mut scratch[..len]);
        let block = OkmBlock::new(&scratch[..len]);
        scratch.zeroize();
        block
    }

    fn hash_len(&self) -> usize {
        self.0.tag_len()
    }
}

/// [`Hkdf`] for any [`hmac::Hmac`].
pub struct HkdfUsingHmac<'a>(pub &'a dyn hmac::Hmac);

impl HkdfUsingHmac<'_> {
    fn expander(&self, prk: &[u8]) -> Box<dyn HkdfExpander> {
        Box::new(HkdfExpanderUsingHmac(self.0.with_key(prk)))
    }
}

impl Hkdf for HkdfUsingHmac<'_> {
    fn extract_from_zero_ikm(&self, salt: Option<&[u8]>) -> Box<dyn HkdfExpander> {
        let zeroes = [0u8; hmac::Tag::MAX_LEN];
        self.extract_from_secret(salt, &zeroes[..self.0.hash_output_len()])
    }

    fn extract_from_secret(&self, salt: Option<&[u8]>, secret: &[u8]) -> Box<dyn HkdfExpander> {
        let zeroes = [0u8; hmac::Tag::MAX_LEN];
        let salt = salt.unwrap_or(&zeroes[..self.0.hash_output_len()]);
        let prk = self.0.with_key(salt).sign(&[secret]);
        self.expander(prk.as_ref())
    }

    fn expander_for_okm(&self, okm: &OkmBlock) -> Box<dyn HkdfExpander> {
        self.expander(okm.as_ref())
    }

    fn hmac_sign(&self, key: &OkmBlock, message: &[u8]) -> hmac::Tag {
        self.0
            .with_key(key.as_ref())
            .sign(&[message])
    }
}

/// HKDF-Expand with a fixed PRK.
pub trait HkdfExpander: Send + Sync {
    /// Fill `output`. The pieces of `info` are used as if concatenated.
    ///
    /// Outputs over 255 hash lengths are refused.
    fn expand_slice(&self, info: &[&[u8]], output: &mut [u8]) -> Result<(), OutputLengthError>;

    /// Exactly one hash length of output, which can never be too long.
    fn expand_block(&self, info: &[&[u8]]) -> OkmBlock;

    /// The underlying hash's output length.
    fn hash_len(&self) -> usize;
}

/// HKDF-Extract and friends, as the TLS1.3 key schedule needs them.
///
/// A `salt` of `None` means one hash length of zeroes.
pub trait Hkdf: Send + Sync {
    /// Extract with an all-zero input secret.
    fn extract_from_zero_ikm(&self, salt: Option<&[u8]>) -> Box<dyn HkdfExpander>;

    /// Extract from `secret`.
    fn extract_from_secret(&self, salt: Option<&[u8]>, secret: &[u8]) -> Box<dyn HkdfExpander>;

    /// Treat `okm` as a PRK without extracting.
    fn expander_for_okm(&self, okm: &OkmBlock) -> Box<dyn HkdfExpander>;

    /// HMAC of `message` keyed by `key`, for Finished and binders.
    fn hmac_sign(&self, key: &OkmBlock, message: &[u8]) -> hmac::Tag;
}

/// One hash length of secret key material, wiped on drop.
#[derive(Clone)]
pub struct OkmBlock {
    buf: [u8; Self::MAX_LEN],
    used: usize,
}

impl OkmBlock {
    /// Room for a SHA-512 output.
    pub const MAX_LEN: usize = 64;

    /// Copy `bytes`, keeping at most [`OkmBlock::MAX_LEN`] of them.
    pub fn new(bytes: &[u8]) -> Self {
        let used = bytes.len().min(Self::MAX_LEN);
        let mut buf = [0u8; Self::MAX_LEN];
        buf[..used].copy_from_slice(&bytes[..used]);
        Self { buf, used }
    }
}

impl Drop for OkmBlock {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl AsRef<[u8]> for OkmBlock {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

/// HKDF-Expand was asked for more than 255 hash lengths.
#[derive(Debug)]
pub struct OutputLengthError;

#[cfg(all(test, feature = "rustcrypto"))]
mod tests {
    use super::{Hkdf, HkdfUsingHmac};
    use crate::crypto::rustcrypto::hmac::{HMAC_SHA256, HMAC_SHA384};

    // Test cases from appendix A in RFC5869, minus cases requiring SHA1.

    #[test]
    fn test_case_1() {
        let hkdf = HkdfUsingHmac(&HMAC_SHA256);
        let ikm = &[0x0b; 22];
        let salt = &[
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
        ];
        let info: &[&[u8]] = &[
            &[0xf0, 0xf1, 0xf2],
            &[0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9],
        ];

        let mut output = [0u8; 42];
        hkdf.extract_from_secret(Some(salt), ikm)
            .expand_slice(info, &mut output)
            .unwrap();

        assert_eq!(
            &output,
            &[
                0x3c, 0xb2, 0x5f, 0x25, 0xfa, 0xac, 0xd5, 0x7a, 0x90, 0x43, 0x4f, 0x64, 0xd0, 0x36,
                0x2f, 0x2a, 0x2d, 0x2d, 0x0a, 0x90, 0xcf, 0x1a, 0x5a, 0x4c, 0x5d, 0xb0, 0x2d, 0x56,
                0xec, 0xc4, 0xc5, 0xbf, 0x34, 0x00, 0x72, 0x08, 0xd5, 0xb8, 0x87, 0x18, 0x58, 0x65
            ]
        );
    }

    #[test]
    fn test_case_2() {
        let hkdf = HkdfUsingHmac(&HMAC_SHA256);
        let ikm: Vec<u8> = (0x00u8..=0x4f).collect();
        let salt: Vec<u8> = (0x60u8..=0xaf).collect();
        let info: Vec<u8> = (0xb0u8..=0xff).collect();

        let mut output = [0u8; 82];
        hkdf.extract_from_secret(Some(&salt), &ikm)
            .expand_slice(&[&info], &mut output)
            .unwrap();

        assert_eq!(
            &output[..],
            &[
                0xb1, 0x1e, 0x39, 0x8d, 0xc8, 0x03, 0x27, 0xa1, 0xc8, 0xe7, 0xf7, 0x8c, 0x59, 0x6a,
                0x49, 0x34, 0x4f, 0x01, 0x2e, 0xda, 0x2d, 0x4e, 0xfa, 0xd8, 0xa0, 0x50, 0xcc, 0x4c,
                0x19, 0xaf, 0xa9, 0x7c, 0x59, 0x04, 0x5a, 0x99, 0xca, 0xc7, 0x82, 0x72, 0x71, 0xcb,
                0x41, 0xc6, 0x5e, 0x59, 0x0e, 0x09, 0xda, 0x32, 0x75, 0x60, 0x0c, 0x2f, 0x09, 0xb8,
                0x36, 0x77, 0x93, 0xa9, 0xac, 0xa3, 0xdb, 0x71, 0xcc, 0x30, 0xc5, 0x81, 0x79, 0xec,
                0x3e, 0x87, 0xc1, 0x4c, 0x01, 0xd5, 0xc1, 0xf3, 0x43, 0x4f, 0x1d, 0x87
            ][..]
        );
    }

    #[test]
    fn test_case_3() {
        let hkdf = HkdfUsingHmac(&HMAC_SHA256);
        let ikm = &[0x0b; 22];

        let mut output = [0u8; 42];
        hkdf.extract_from_secret(Some(&[]), ikm)
            .expand_slice(&[], &mut output)
            .unwrap();

        assert_eq!(
            &output,
            &[
                0x8d, 0xa4, 0xe7, 0x75, 0xa5, 0x63, 0xc1, 0x8f, 0x71, 0x5f, 0x80, 0x2a, 0x06, 0x3c,
                0x5a, 0x31, 0xb8, 0xa1, 0x1f, 0x5c, 0x5e, 0xe1, 0x87, 0x9e, 0xc3, 0x45, 0x4e, 0x5f,
                0x3c, 0x73, 0x8d, 0x2d, 0x9d, 0x20, 0x13, 0x95, 0xfa, 0xa4, 0xb6, 0x1a, 0x96, 0xc8
            ]
        );
    }

    #[test]
    fn test_salt_not_provided() {
        // >>> hkdf.HKDF(algorithm=hashes.SHA384(), length=96, salt=None, info=b"hello").derive(b"\x0b" * 40)
        let hkdf = HkdfUsingHmac(&HMAC_SHA384);
        let ikm = &[0x0b; 40];
        let info = &[&b"hel"[..], &b"lo"[..]];

        let mut output = [0u8; 96];
        hkdf.extract_from_secret(None, ikm)
            .expand_slice(info, &mut output)
            .unwrap();

        assert_eq!(
            &output[..],
            &[
                0xd5, 0x45, 0xdd, 0x3a, 0xff, 0x5b, 0x19, 0x46, 0xd4, 0x86, 0xfd, 0xb8, 0xd8, 0x88,
                0x2e, 0xe0, 0x1c, 0xc1, 0xa5, 0x48, 0xb6, 0x05, 0x75, 0xe4, 0xd7, 0x5d, 0x0f, 0x5f,
                0x23, 0x40, 0xee, 0x6c, 0x9e, 0x7c, 0x65, 0xd0, 0xee, 0x79, 0xdb, 0xb2, 0x07, 0x1d,
                0x66, 0xa5, 0x50, 0xc4, 0x8a, 0xa3, 0x93, 0x86, 0x8b, 0x7c, 0x69, 0x41, 0x6b, 0x3e,
                0x61, 0x44, 0x98, 0xb8, 0xc2, 0xfc, 0x82, 0x82, 0xae, 0xcd, 0x46, 0xcf, 0xb1, 0x47,
                0xdc, 0xd0, 0x69, 0x0d, 0x19, 0xad, 0xe6, 0x6c, 0x70, 0xfe, 0x87, 0x92, 0x04, 0xb6,
                0x82, 0x2d, 0x97, 0x7e, 0x46, 0x80, 0x4c, 0xe5, 0x76, 0x72, 0xb4, 0xb8
            ][..]
        );
    }

    #[test]
    fn test_output_length_bounds() {
        let hkdf = HkdfUsingHmac(&HMAC_SHA256);

        let mut output = [0u8; 32 * 255 + 1];
        assert!(hkdf
            .extract_from_secret(None, &[])
            .expand_slice(&[], &mut output)
            .is_err());
    }
}

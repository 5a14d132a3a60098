use zeroize::Zeroize;

/// HMAC over one particular hash, eg. HMAC-SHA256.
pub trait Hmac: Send + Sync {
    /// Key an HMAC instance.
    fn with_key(&self, key: &[u8]) -> Box<dyn Key>;

    /// Output length of the hash (`L` in RFC2104).
    fn hash_output_len(&self) -> usize;
}

/// An HMAC output held inline. HKDF and the TLS1.2 PRF use tags as keys,
/// so they are wiped on drop.
#[derive(Clone)]
pub struct Tag {
    buf: [u8; Self::MAX_LEN],
    used: usize,
}

impl Tag {
    /// Room for HMAC-SHA512.
    pub const MAX_LEN: usize = 64;

    /// Copy `bytes`, keeping at most [`Tag::MAX_LEN`] of them.
    pub fn new(bytes: &[u8]) -> Self {
        let used = bytes.len().min(Self::MAX_LEN);
        let mut buf = [0u8; Self::MAX_LEN];
        buf[..used].copy_from_slice(&bytes[..used]);
        Self { buf, used }
    }
}

impl Drop for Tag {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

impl AsRef<[u8]> for Tag {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

/// A keyed HMAC instance.
pub trait Key: Send + Sync {
    /// The tag over the concatenation of `data`.
    fn sign(&self, data: &[&[u8]]) -> Tag {
        self.sign_concat(&[], data, &[])
    }

    /// The tag over `first`, then each of `middle`, then `last`.
    fn sign_concat(&self, first: &[u8], middle: &[&[u8]], last: &[u8]) -> Tag;

    /// Tag length in bytes.
    fn tag_len(&self) -> usize;
}

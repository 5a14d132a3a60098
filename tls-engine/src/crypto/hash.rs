pub use crate::msgs::enums::HashAlgorithm;

/// A hash function a provider supplies.
///
/// The transcript is hashed incrementally via [`Hash::start()`]; binders and
/// exporters hash in one go.
pub trait Hash: Send + Sync {
    /// Begin an incremental hash.
    fn start(&self) -> Box<dyn Context>;

    /// Hash `data` in one go.
    fn hash(&self, data: &[u8]) -> Output;

    /// Digest length in bytes.
    fn output_len(&self) -> usize;

    /// The algorithm's TLS identifier.
    fn algorithm(&self) -> HashAlgorithm;
}

/// A digest held inline, up to SHA-512 in size.
#[derive(Clone)]
pub struct Output {
    bytes: [u8; Self::MAX_LEN],
    len: usize,
}

impl Output {
    /// Room for the largest digest.
    pub const MAX_LEN: usize = 64;

    /// Copy a digest. Anything past [`Output::MAX_LEN`] is dropped.
    pub fn new(digest: &[u8]) -> Self {
        let len = digest.len().min(Self::MAX_LEN);
        let mut bytes = [0u8; Self::MAX_LEN];
        bytes[..len].copy_from_slice(&digest[..len]);
        Self { bytes, len }
    }
}

impl AsRef<[u8]> for Output {
    fn as_ref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::msgs::base::hex(f, self.as_ref())
    }
}

/// An in-progress hash.
pub trait Context: Send + Sync {
    /// The digest of everything so far. The context can keep going.
    fn fork_finish(&self) -> Output;

    /// An independent copy of this context.
    fn fork(&self) -> Box<dyn Context>;

    /// The digest of everything so far, consuming the context.
    fn finish(self: Box<Self>) -> Output;

    /// Feed in more input.
    fn update(&mut self, data: &[u8]);
}

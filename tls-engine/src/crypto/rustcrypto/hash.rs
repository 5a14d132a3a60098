use std::marker::PhantomData;

use sha2::Digest;

use crate::crypto::hash;

/// A SHA-2 family hash, generic over the RustCrypto digest type.
pub struct Sha2<D> {
    algorithm: hash::HashAlgorithm,
    digest: PhantomData<fn() -> D>,
}

pub static SHA256: Sha2<sha2::Sha256> = Sha2 {
    algorithm: hash::HashAlgorithm::SHA256,
    digest: PhantomData,
};

pub static SHA384: Sha2<sha2::Sha384> = Sha2 {
    algorithm: hash::HashAlgorithm::SHA384,
    digest: PhantomData,
};

impl<D> hash::Hash for Sha2<D>
where
    D: Digest + Clone + Send + Sync + 'static,
{
    fn start(&self) -> Box<dyn hash::Context> {
        Box::new(Sha2Context(D::new()))
    }

    fn hash(&self, data: &[u8]) -> hash::Output {
        hash::Output::new(&D::digest(data)[..])
    }

    fn output_len(&self) -> usize {
        <D as Digest>::output_size()
    }

    fn algorithm(&self) -> hash::HashAlgorithm {
        self.algorithm
    }
}

struct Sha2Context<D>(D);

impl<D> hash::Context for Sha2Context<D>
where
    D: Digest + Clone + Send + Sync + 'static,
{
    fn fork_finish(&self) -> hash::Output {
        hash::Output::new(&self.0.clone().finalize()[..])
    }

    fn fork(&self) -> Box<dyn hash::Context> {
        Box::new(Self(self.0.clone()))
    }

    fn finish(self: Box<Self>) -> hash::Output {
        hash::Output::new(&self.0.finalize()[..])
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::Hash;

    #[test]
    fn empty_input_digests() {
        assert_eq!(
            format!("{:?}", SHA256.hash(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(SHA384.output_len(), 48);
        assert_eq!(SHA384.algorithm(), hash::HashAlgorithm::SHA384);
    }

    #[test]
    fn fork_keeps_the_prefix() {
        let mut ctx = SHA256.start();
        ctx.update(b"ab");
        let forked = ctx.fork();
        ctx.update(b"c");
        assert_eq!(ctx.finish().as_ref(), SHA256.hash(b"abc").as_ref());
        assert_eq!(forked.fork_finish().as_ref(), SHA256.hash(b"ab").as_ref());
    }
}

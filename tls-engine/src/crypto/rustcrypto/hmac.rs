use std::marker::PhantomData;

use hmac::{Mac, SimpleHmac};
use sha2::digest::core_api::BlockSizeUser;
use sha2::Digest;

use crate::crypto;

/// HMAC over a SHA-2 family hash.
pub struct Sha2Hmac<D>(PhantomData<fn() -> D>);

pub static HMAC_SHA256: Sha2Hmac<sha2::Sha256> = Sha2Hmac(PhantomData);
pub static HMAC_SHA384: Sha2Hmac<sha2::Sha384> = Sha2Hmac(PhantomData);

impl<D> crypto::hmac::Hmac for Sha2Hmac<D>
where
    D: Digest + BlockSizeUser + Clone + Send + Sync + 'static,
{
    fn with_key(&self, key: &[u8]) -> Box<dyn crypto::hmac::Key> {
        // HMAC hashes over-long keys and pads short ones, so every length is fine.
        let mac = <SimpleHmac<D> as Mac>::new_from_slice(key)
            .expect("HMAC accepts keys of any length");
        Box::new(Sha2HmacKey(mac))
    }

    fn hash_output_len(&self) -> usize {
        <D as Digest>::output_size()
    }
}

struct Sha2HmacKey<D: Digest + BlockSizeUser>(SimpleHmac<D>);

impl<D> crypto::hmac::Key for Sha2HmacKey<D>
where
    D: Digest + BlockSizeUser + Clone + Send + Sync + 'static,
{
    fn sign_concat(&self, first: &[u8], middle: &[&[u8]], last: &[u8]) -> crypto::hmac::Tag {
        let mut ctx = self.0.clone();
        ctx.update(first);
        for m in middle {
            ctx.update(m);
        }
        ctx.update(last);
        crypto::hmac::Tag::new(&ctx.finalize().into_bytes()[..])
    }

    fn tag_len(&self) -> usize {
        <D as Digest>::output_size()
    }
}

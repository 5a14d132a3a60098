use rand_core::{OsRng, RngCore};
use rsa::BigUint;
use zeroize::Zeroizing;

use crate::crypto::ffdhe::FfdheGroup;
use crate::crypto::{ActiveKeyExchange, SharedSecret, SupportedKxGroup};
use crate::error::{Error, PeerMisbehaved};
use crate::msgs::enums::NamedGroup;

/// X25519 (RFC7748).
#[derive(Debug)]
pub struct X25519;

impl SupportedKxGroup for X25519 {
    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error> {
        let priv_key = x25519_dalek::EphemeralSecret::random_from_rng(OsRng);
        Ok(Box::new(X25519KeyExchange {
            pub_key: (&priv_key).into(),
            priv_key,
        }))
    }

    fn name(&self) -> NamedGroup {
        NamedGroup::X25519
    }
}

struct X25519KeyExchange {
    priv_key: x25519_dalek::EphemeralSecret,
    pub_key: x25519_dalek::PublicKey,
}

impl ActiveKeyExchange for X25519KeyExchange {
    fn complete(self: Box<Self>, peer: &[u8]) -> Result<SharedSecret, Error> {
        let peer: [u8; 32] = peer
            .try_into()
            .map_err(|_| Error::from(PeerMisbehaved::InvalidKeyShare))?;
        let shared = self
            .priv_key
            .diffie_hellman(&x25519_dalek::PublicKey::from(peer));

        // low-order peer points give an all-zero secret
        if !shared.was_contributory() {
            return Err(PeerMisbehaved::InvalidKeyShare.into());
        }

        Ok(SharedSecret::from(&shared.as_bytes()[..]))
    }

    fn pub_key(&self) -> &[u8] {
        self.pub_key.as_bytes()
    }

    fn group(&self) -> NamedGroup {
        NamedGroup::X25519
    }
}

/// NIST P-256, with uncompressed point encoding.
#[derive(Debug)]
pub struct SecP256r1;

impl SupportedKxGroup for SecP256r1 {
    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error> {
        let priv_key = p256::ecdh::EphemeralSecret::random(&mut OsRng);
        let pub_key = p256::EncodedPoint::from(priv_key.public_key())
            .as_bytes()
            .to_vec();
        Ok(Box::new(P256KeyExchange { priv_key, pub_key }))
    }

    fn name(&self) -> NamedGroup {
        NamedGroup::secp256r1
    }
}

struct P256KeyExchange {
    priv_key: p256::ecdh::EphemeralSecret,
    pub_key: Vec<u8>,
}

impl ActiveKeyExchange for P256KeyExchange {
    fn complete(self: Box<Self>, peer: &[u8]) -> Result<SharedSecret, Error> {
        // TLS requires the uncompressed form (RFC8446 s4.2.8.2)
        if peer.first() != Some(&0x04) {
            return Err(PeerMisbehaved::InvalidKeyShare.into());
        }

        let their_pub = p256::PublicKey::from_sec1_bytes(peer)
            .map_err(|_| Error::from(PeerMisbehaved::InvalidKeyShare))?;
        let shared = self.priv_key.diffie_hellman(&their_pub);
        Ok(SharedSecret::from(&shared.raw_secret_bytes()[..]))
    }

    fn pub_key(&self) -> &[u8] {
        &self.pub_key
    }

    fn group(&self) -> NamedGroup {
        NamedGroup::secp256r1
    }
}

/// A finite-field group from RFC7919.
#[derive(Debug)]
pub struct Ffdhe(NamedGroup);

/// The 2048-bit RFC7919 group.
pub static FFDHE2048: Ffdhe = Ffdhe(NamedGroup::FFDHE2048);

/// The 3072-bit RFC7919 group.
pub static FFDHE3072: Ffdhe = Ffdhe(NamedGroup::FFDHE3072);

/// Private exponent size; RFC7919 section 5.2 asks for at least twice the
/// group's security strength.
const FFDHE_EXPONENT_LEN: usize = 64;

impl SupportedKxGroup for Ffdhe {
    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error> {
        let params = FfdheGroup::from_named_group(self.0)
            .ok_or_else(|| Error::General(format!("{:?} is not a finite-field group", self.0)))?;
        let p = BigUint::from_bytes_be(params.p);
        let g = BigUint::from_bytes_be(params.g);

        let mut x = Zeroizing::new(vec![0u8; FFDHE_EXPONENT_LEN]);
        OsRng
            .try_fill_bytes(&mut x[..])
            .map_err(|_| Error::FailedToGetRandomBytes)?;
        let pub_key = to_bytes_be_with_len(&g.modpow(&BigUint::from_bytes_be(&x), &p), params.p.len());

        Ok(Box::new(FfdheKeyExchange {
            group: self.0,
            p,
            x,
            pub_key,
        }))
    }

    fn name(&self) -> NamedGroup {
        self.0
    }
}

struct FfdheKeyExchange {
    group: NamedGroup,
    p: BigUint,
    x: Zeroizing<Vec<u8>>,
    pub_key: Vec<u8>,
}

impl ActiveKeyExchange for FfdheKeyExchange {
    fn complete(self: Box<Self>, peer: &[u8]) -> Result<SharedSecret, Error> {
        let len = self.pub_key.len();
        let one = BigUint::from(1u32);
        let peer = BigUint::from_bytes_be(peer);

        // RFC7919 5.1: 1 < y < p-1 rules out the trivial subgroups
        if peer <= one || peer >= &self.p - &one {
            return Err(PeerMisbehaved::InvalidKeyShare.into());
        }

        let x = BigUint::from_bytes_be(&self.x);
        let secret = peer.modpow(&x, &self.p);
        Ok(SharedSecret::from(to_bytes_be_with_len(&secret, len)))
    }

    fn pub_key(&self) -> &[u8] {
        &self.pub_key
    }

    fn group(&self) -> NamedGroup {
        self.group
    }
}

/// Big-endian bytes of `n`, left-padded with zeros to `len`.
fn to_bytes_be_with_len(n: &BigUint, len: usize) -> Vec<u8> {
    let bytes = n.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        for group in [&X25519 as &dyn SupportedKxGroup, &SecP256r1, &FFDHE2048] {
            let a = group.start().unwrap();
            let b = group.start().unwrap();
            let (a_pub, b_pub) = (a.pub_key().to_vec(), b.pub_key().to_vec());
            assert_eq!(a.group(), group.name());
            let sa = a.complete(&b_pub).unwrap();
            let sb = b.complete(&a_pub).unwrap();
            assert_eq!(sa.secret_bytes(), sb.secret_bytes());
        }
    }

    #[test]
    fn bad_peer_keys_are_rejected() {
        let err = Error::PeerMisbehaved(PeerMisbehaved::InvalidKeyShare);

        let a = X25519.start().unwrap();
        assert_eq!(a.complete(&[1; 31]).err(), Some(err.clone()));
        let a = X25519.start().unwrap();
        assert_eq!(a.complete(&[0; 32]).err(), Some(err.clone()));

        let a = SecP256r1.start().unwrap();
        assert_eq!(a.complete(&[0x04; 65]).err(), Some(err.clone()));
        let a = SecP256r1.start().unwrap();
        let compressed = [0x02; 33];
        assert_eq!(a.complete(&compressed).err(), Some(err));
    }

    #[test]
    fn ffdhe_values_are_padded_to_the_modulus() {
        for (group, len) in [(&FFDHE2048, 256), (&FFDHE3072, 384)] {
            let a = group.start().unwrap();
            let b = group.start().unwrap();
            assert_eq!(a.pub_key().len(), len);
            let b_pub = b.pub_key().to_vec();
            assert_eq!(a.complete(&b_pub).unwrap().secret_bytes().len(), len);
        }
    }

    #[test]
    fn ffdhe_rejects_trivial_peer_values() {
        let p = FfdheGroup::from_named_group(NamedGroup::FFDHE2048)
            .unwrap()
            .p
            .to_vec();
        let mut p_minus_one = p.clone();
        *p_minus_one.last_mut().unwrap() -= 1;

        for bad in [vec![0u8], vec![1u8], p_minus_one, p] {
            let a = FFDHE2048.start().unwrap();
            assert_eq!(
                a.complete(&bad).err(),
                Some(Error::PeerMisbehaved(PeerMisbehaved::InvalidKeyShare))
            );
        }
    }
}

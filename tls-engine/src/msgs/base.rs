//! Opaque byte strings, bare or behind a length prefix.
use std::fmt;

use zeroize::Zeroize;

use crate::error::InvalidMessage;
use crate::key::Certificate;
use crate::msgs::codec::{self, Codec, Reader};

/// Take exactly `len` bytes.
fn take(r: &mut Reader<'_>, len: usize) -> Result<Vec<u8>, InvalidMessage> {
    Ok(r.sub(len)?.rest().to_vec())
}

fn put_u24_prefixed(body: &[u8], out: &mut Vec<u8>) {
    codec::u24(body.len() as u32).encode(out);
    out.extend_from_slice(body);
}

fn take_u24_prefixed(r: &mut Reader<'_>) -> Result<Vec<u8>, InvalidMessage> {
    let len = codec::u24::read(r)?;
    take(r, usize::from(len))
}

/// Bytes whose length is known from context, eg. the rest of a record.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Consumes everything left in `r`.
    pub fn read(r: &mut Reader<'_>) -> Self {
        Self(r.rest().to_vec())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Codec for Payload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self::read(r))
    }
}

// A certificate in a Certificate message is a u24-prefixed DER blob.
impl Codec for Certificate {
    fn encode(&self, bytes: &mut Vec<u8>) {
        put_u24_prefixed(&self.0, bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        take_u24_prefixed(r).map(Self)
    }
}

/// `opaque <0..2^24-1>`
#[derive(Clone, Eq, PartialEq)]
pub struct PayloadU24(pub Vec<u8>);

impl PayloadU24 {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Codec for PayloadU24 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        put_u24_prefixed(&self.0, bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        take_u24_prefixed(r).map(Self)
    }
}

/// `opaque <0..2^16-1>`
#[derive(Clone, Eq, PartialEq, Default)]
pub struct PayloadU16(pub Vec<u8>);

impl PayloadU16 {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Write `slice` with its u16 length, without building a `PayloadU16`.
    pub fn encode_slice(slice: &[u8], bytes: &mut Vec<u8>) {
        (slice.len() as u16).encode(bytes);
        bytes.extend_from_slice(slice);
    }
}

impl Codec for PayloadU16 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        Self::encode_slice(&self.0, bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let len = u16::read(r)?;
        take(r, usize::from(len)).map(Self)
    }
}

/// `opaque <0..255>`
#[derive(Clone, Eq, PartialEq, Default)]
pub struct PayloadU8(pub Vec<u8>);

impl PayloadU8 {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn encode_slice(slice: &[u8], bytes: &mut Vec<u8>) {
        (slice.len() as u8).encode(bytes);
        bytes.extend_from_slice(slice);
    }
}

impl Codec for PayloadU8 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        Self::encode_slice(&self.0, bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let len = u8::read(r)?;
        take(r, usize::from(len)).map(Self)
    }
}

// PayloadU8 carries secrets (eg. the TLS1.2 premaster in a
// ClientKeyExchange), so it can be wiped.
impl Zeroize for PayloadU8 {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

macro_rules! debug_as_hex {
    ($($ty:ty),*) => {
        $(
            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    hex(f, &self.0)
                }
            }
        )*
    };
}

debug_as_hex!(Payload, PayloadU8, PayloadU16, PayloadU24);

/// Lowercase hex, no separators.
pub(crate) fn hex<'a>(
    f: &mut fmt::Formatter<'_>,
    payload: impl IntoIterator<Item = &'a u8>,
) -> fmt::Result {
    payload
        .into_iter()
        .try_for_each(|b| write!(f, "{b:02x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_checked_against_available_bytes() {
        assert_eq!(
            PayloadU8::read_bytes(&[2, 0xaa, 0xbb])
                .unwrap()
                .0,
            vec![0xaa, 0xbb]
        );
        assert!(PayloadU8::read_bytes(&[3, 0xaa, 0xbb]).is_err());
        assert!(PayloadU16::read_bytes(&[0, 1]).is_err());
        assert!(PayloadU24::read_bytes(&[0, 0, 1, 7]).is_ok());
    }

    #[test]
    fn encodings_carry_their_length() {
        assert_eq!(PayloadU16::new(vec![9]).get_encoding(), vec![0, 1, 9]);
        assert_eq!(PayloadU24::new(vec![9]).get_encoding(), vec![0, 0, 1, 9]);
        assert_eq!(Payload::new([9u8, 8]).get_encoding(), vec![9, 8]);
    }

    #[test]
    fn debug_is_hex() {
        assert_eq!(format!("{:?}", PayloadU8::new(vec![0x0f, 0xa0])), "0fa0");
    }
}

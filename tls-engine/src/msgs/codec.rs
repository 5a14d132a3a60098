//! Big-endian wire encoding shared by every message type.
use std::fmt::Debug;

use crate::error::InvalidMessage;

/// A cursor over borrowed input.
///
/// Reads never copy; they hand out subslices of the input and advance.
pub struct Reader<'a> {
    buffer: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    pub fn init(bytes: &'a [u8]) -> Self {
        Reader {
            buffer: bytes,
            cursor: 0,
        }
    }

    /// A reader over the next `length` bytes, which this reader skips.
    pub fn sub(&mut self, length: usize) -> Result<Self, InvalidMessage> {
        self.take(length)
            .map(Reader::init)
            .ok_or(InvalidMessage::MessageTooShort)
    }

    /// Everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buffer[self.cursor..];
        self.cursor = self.buffer.len();
        rest
    }

    /// The next `length` bytes, or `None` (consuming nothing) if there
    /// are fewer.
    pub fn take(&mut self, length: usize) -> Option<&'a [u8]> {
        let end = self.cursor.checked_add(length)?;
        let bytes = self.buffer.get(self.cursor..end)?;
        self.cursor = end;
        Some(bytes)
    }

    pub fn any_left(&self) -> bool {
        self.left() > 0
    }

    /// Fail with `TrailingData(name)` unless the input is used up.
    pub fn expect_empty(&self, name: &'static str) -> Result<(), InvalidMessage> {
        if self.any_left() {
            return Err(InvalidMessage::TrailingData(name));
        }
        Ok(())
    }

    /// Bytes consumed so far.
    pub fn used(&self) -> usize {
        self.cursor
    }

    pub fn left(&self) -> usize {
        self.buffer.len() - self.cursor
    }
}

/// Types with a TLS wire encoding.
pub trait Codec: Debug + Sized {
    /// Append the encoding to `bytes`.
    fn encode(&self, bytes: &mut Vec<u8>);

    /// Decode one value from the front of `r`.
    fn read(_: &mut Reader<'_>) -> Result<Self, InvalidMessage>;

    /// The encoding as a fresh vector.
    fn get_encoding(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes);
        bytes
    }

    /// Decode from the start of `bytes`. Trailing input is not an error.
    fn read_bytes(bytes: &[u8]) -> Result<Self, InvalidMessage> {
        Self::read(&mut Reader::init(bytes))
    }
}

/// Read exactly `N` bytes, or report the named field as missing.
fn read_array<const N: usize>(
    r: &mut Reader<'_>,
    what: &'static str,
) -> Result<[u8; N], InvalidMessage> {
    r.take(N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(InvalidMessage::MissingData(what))
}

impl Codec for u8 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.push(*self);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        read_array::<1>(r, "u8").map(|[b]| b)
    }
}

pub(crate) fn put_u16(v: u16, out: &mut [u8]) {
    out[..2].copy_from_slice(&v.to_be_bytes());
}

impl Codec for u16 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_be_bytes());
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        read_array(r, "u16").map(Self::from_be_bytes)
    }
}

/// A three-byte length, as used by handshake headers and certificates.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone)]
pub struct u24(pub u32);

#[cfg(any(target_pointer_width = "32", target_pointer_width = "64"))]
impl From<u24> for usize {
    #[inline]
    fn from(v: u24) -> Self {
        v.0 as Self
    }
}

impl Codec for u24 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0.to_be_bytes()[1..]);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let [a, b, c] = read_array(r, "u24")?;
        Ok(Self(u32::from_be_bytes([0, a, b, c])))
    }
}

impl Codec for u32 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_be_bytes());
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        read_array(r, "u32").map(Self::from_be_bytes)
    }
}

pub(crate) fn put_u64(v: u64, bytes: &mut [u8]) {
    bytes[..8].copy_from_slice(&v.to_be_bytes());
}

impl Codec for u64 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.to_be_bytes());
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        read_array(r, "u64").map(Self::from_be_bytes)
    }
}

/// Vectors encode as a length prefix followed by their elements; the
/// element type decides how wide the prefix is.
impl<T: Codec + TlsListElement + Debug> Codec for Vec<T> {
    fn encode(&self, bytes: &mut Vec<u8>) {
        let nest = LengthPrefixedBuffer::new(T::SIZE_LEN, bytes);
        for item in self {
            item.encode(nest.buf);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let len = match T::SIZE_LEN {
            ListLength::U8 => usize::from(u8::read(r)?),
            ListLength::U16 => usize::from(u16::read(r)?),
            ListLength::U24 { max } => usize::from(u24::read(r)?).min(max),
        };

        let mut body = r.sub(len)?;
        let mut items = Self::new();
        while body.any_left() {
            items.push(T::read(&mut body)?);
        }
        Ok(items)
    }
}

/// Elements of a length-prefixed wire list.
pub(crate) trait TlsListElement {
    const SIZE_LEN: ListLength;
}

/// Width of a list's length prefix. 24-bit lists also carry a cap on
/// how much a peer may make us read.
pub(crate) enum ListLength {
    U8,
    U16,
    U24 { max: usize },
}

impl ListLength {
    fn width(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U24 { .. } => 3,
        }
    }
}

/// Writes a length prefix, lets the caller append the body through `buf`,
/// and fills the real length in on drop.
///
/// Until then the prefix reads as all-ones, so a half-written structure
/// can never be mistaken for a complete one.
pub(crate) struct LengthPrefixedBuffer<'a> {
    pub(crate) buf: &'a mut Vec<u8>,
    len_offset: usize,
    size_len: ListLength,
}

impl<'a> LengthPrefixedBuffer<'a> {
    pub(crate) fn new(size_len: ListLength, buf: &'a mut Vec<u8>) -> LengthPrefixedBuffer<'a> {
        let len_offset = buf.len();
        buf.resize(len_offset + size_len.width(), 0xff);
        Self {
            buf,
            len_offset,
            size_len,
        }
    }
}

impl Drop for LengthPrefixedBuffer<'_> {
    fn drop(&mut self) {
        let width = self.size_len.width();
        let len = self.buf.len() - self.len_offset - width;
        debug_assert!(len < 1 << (8 * width));
        let be = (len as u32).to_be_bytes();
        self.buf[self.len_offset..self.len_offset + width].copy_from_slice(&be[4 - width..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfinished_prefix_reads_as_maximum() {
        let mut buf = Vec::new();
        let nested = LengthPrefixedBuffer::new(ListLength::U16, &mut buf);
        nested.buf.push(0xaa);
        assert_eq!(nested.buf, &vec![0xff, 0xff, 0xaa]);
        drop(nested);
        assert_eq!(buf, vec![0x00, 0x01, 0xaa]);
    }

    #[test]
    fn prefix_widths() {
        for (size_len, expect) in [
            (ListLength::U8, vec![2, 1, 2]),
            (ListLength::U16, vec![0, 2, 1, 2]),
            (ListLength::U24 { max: 10 }, vec![0, 0, 2, 1, 2]),
        ] {
            let mut buf = Vec::new();
            LengthPrefixedBuffer::new(size_len, &mut buf)
                .buf
                .extend_from_slice(&[1, 2]);
            assert_eq!(buf, expect);
        }
    }

    #[test]
    fn reader_sub_reports_short_input() {
        let mut r = Reader::init(&[1, 2, 3]);
        assert!(r.sub(4).is_err());
        assert_eq!(r.used(), 0);
        let mut sub = r.sub(2).unwrap();
        assert_eq!(sub.rest(), &[1, 2]);
        assert_eq!(r.left(), 1);
        assert!(r.expect_empty("x").is_err());
    }

    #[test]
    fn u24_is_three_bytes() {
        let bytes = u24(0x0a0b0c).get_encoding();
        assert_eq!(bytes, vec![0x0a, 0x0b, 0x0c]);
        assert_eq!(usize::from(u24::read_bytes(&bytes).unwrap()), 0x0a0b0c);
    }

    #[test]
    fn short_integers_are_missing_data() {
        assert_eq!(
            u16::read_bytes(&[1]).unwrap_err(),
            InvalidMessage::MissingData("u16")
        );
        assert_eq!(
            u64::read_bytes(&[1, 2, 3]).unwrap_err(),
            InvalidMessage::MissingData("u64")
        );
        assert_eq!(u32::read_bytes(&[0, 0, 1, 0]).unwrap(), 256);
    }
}

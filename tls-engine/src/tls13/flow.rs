//! The TLS1.3 handshake as a table of message slots.
//!
//! Which messages a handshake carries, and in what order, depends on a
//! handful of facts learned along the way: whether the server asked for a
//! retry, whether a PSK was accepted, whether the server requested a client
//! certificate and whether the client sent one.  Those facts are collected
//! in a [`Tag`]; each tag resolves to one fixed list of [`Slot`]s, and a
//! [`Cursor`] walks that list.  Learning a new fact swaps the list but keeps
//! the position, which works because every list agrees on the slots that
//! precede the point where the fact is learned.

use crate::conn::Side;
use crate::enums::HandshakeType;

/// One position in a handshake flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    ClientHello,
    HelloRetryRequest,
    ServerHello,
    EncryptedExtensions,
    CertificateRequest,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientCertificate,
    ClientCertificateVerify,
    ClientFinished,
    /// The handshake is over; only post-handshake messages follow.
    Established,
}

impl Slot {
    /// Which side writes the message for this slot.
    pub(crate) fn sender(self) -> Option<Side> {
        use Slot::*;
        match self {
            ClientHello | ClientCertificate | ClientCertificateVerify | ClientFinished => {
                Some(Side::Client)
            }
            HelloRetryRequest
            | ServerHello
            | EncryptedExtensions
            | CertificateRequest
            | ServerCertificate
            | ServerCertificateVerify
            | ServerFinished => Some(Side::Server),
            Established => None,
        }
    }

    /// The handshake message type carried in this slot.
    pub(crate) fn handshake_type(self) -> Option<HandshakeType> {
        use Slot::*;
        Some(match self {
            ClientHello => HandshakeType::ClientHello,
            HelloRetryRequest => HandshakeType::HelloRetryRequest,
            ServerHello => HandshakeType::ServerHello,
            EncryptedExtensions => HandshakeType::EncryptedExtensions,
            CertificateRequest => HandshakeType::CertificateRequest,
            ServerCertificate | ClientCertificate => HandshakeType::Certificate,
            ServerCertificateVerify | ClientCertificateVerify => HandshakeType::CertificateVerify,
            ServerFinished | ClientFinished => HandshakeType::Finished,
            Established => return None,
        })
    }
}

/// Facts about the handshake that decide its shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Tag(u8);

impl Tag {
    /// The ServerHello has been processed.
    pub(crate) const NEGOTIATED: Self = Self(0x01);
    /// The server sent a CertificateRequest.
    pub(crate) const WITH_CR: Self = Self(0x02);
    /// The server sent a HelloRetryRequest.
    pub(crate) const WITH_HRR: Self = Self(0x04);
    /// The server accepted a pre-shared key.
    pub(crate) const WITH_PSK: Self = Self(0x08);
    /// The client sent a non-empty certificate, so also a CertificateVerify.
    pub(crate) const WITH_CCV: Self = Self(0x10);

    pub(crate) fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

use Slot::*;

static INITIAL: &[Slot] = &[ClientHello, ServerHello];

static RETRY: &[Slot] = &[ClientHello, HelloRetryRequest, ClientHello, ServerHello];

static FULL: &[Slot] = &[
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientFinished,
    Established,
];

static FULL_WITH_CR: &[Slot] = &[
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    CertificateRequest,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientCertificate,
    ClientFinished,
    Established,
];

static FULL_WITH_CR_CCV: &[Slot] = &[
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    CertificateRequest,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientCertificate,
    ClientCertificateVerify,
    ClientFinished,
    Established,
];

static PSK: &[Slot] = &[
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    ServerFinished,
    ClientFinished,
    Established,
];

static RETRY_FULL: &[Slot] = &[
    ClientHello,
    HelloRetryRequest,
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientFinished,
    Established,
];

static RETRY_FULL_WITH_CR: &[Slot] = &[
    ClientHello,
    HelloRetryRequest,
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    CertificateRequest,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientCertificate,
    ClientFinished,
    Established,
];

static RETRY_FULL_WITH_CR_CCV: &[Slot] = &[
    ClientHello,
    HelloRetryRequest,
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    CertificateRequest,
    ServerCertificate,
    ServerCertificateVerify,
    ServerFinished,
    ClientCertificate,
    ClientCertificateVerify,
    ClientFinished,
    Established,
];

static RETRY_PSK: &[Slot] = &[
    ClientHello,
    HelloRetryRequest,
    ClientHello,
    ServerHello,
    EncryptedExtensions,
    ServerFinished,
    ClientFinished,
    Established,
];

/// Resolve a tag to its slot list.
pub(crate) fn slots(tag: Tag) -> &'static [Slot] {
    let hrr = tag.contains(Tag::WITH_HRR);

    if !tag.contains(Tag::NEGOTIATED) {
        return if hrr { RETRY } else { INITIAL };
    }

    match (
        hrr,
        tag.contains(Tag::WITH_PSK),
        tag.contains(Tag::WITH_CR),
        tag.contains(Tag::WITH_CCV),
    ) {
        (false, true, _, _) => PSK,
        (true, true, _, _) => RETRY_PSK,
        (false, false, false, _) => FULL,
        (true, false, false, _) => RETRY_FULL,
        (false, false, true, false) => FULL_WITH_CR,
        (true, false, true, false) => RETRY_FULL_WITH_CR,
        (false, false, true, true) => FULL_WITH_CR_CCV,
        (true, false, true, true) => RETRY_FULL_WITH_CR_CCV,
    }
}

/// A position within the slot list of the current tag.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Cursor {
    tag: Tag,
    index: usize,
}

impl Cursor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn current(&self) -> Slot {
        slots(self.tag)
            .get(self.index)
            .copied()
            .unwrap_or(Established)
    }

    pub(crate) fn advance(&mut self) {
        if self.current() != Established {
            self.index += 1;
        }
    }

    /// Record a newly learned fact; the position is kept.
    pub(crate) fn learn(&mut self, fact: Tag) {
        self.tag.insert(fact);
    }

    pub(crate) fn tag(&self) -> Tag {
        self.tag
    }

    /// Whether it is `side`'s turn to write.
    pub(crate) fn is_turn_of(&self, side: Side) -> bool {
        self.current().sender() == Some(side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tags() -> impl Iterator<Item = Tag> {
        (0u8..0x20).map(Tag)
    }

    #[test]
    fn every_negotiated_list_ends_established() {
        for tag in all_tags().filter(|t| t.contains(Tag::NEGOTIATED)) {
            assert_eq!(slots(tag).last(), Some(&Established), "{tag:?}");
        }
    }

    #[test]
    fn lists_agree_before_each_fact_is_learned() {
        // ServerHello is at the same index whether or not NEGOTIATED is set
        for hrr in [Tag::default(), Tag::WITH_HRR] {
            let before = slots(hrr);
            for extra in [Tag::default(), Tag::WITH_PSK, Tag::WITH_CR] {
                let mut after = hrr;
                after.insert(Tag::NEGOTIATED);
                after.insert(extra);
                assert_eq!(&slots(after)[..before.len()], before);
            }
        }

        // CertificateRequest replaces ServerCertificate at the same index
        let full = slots(Tag(Tag::NEGOTIATED.0));
        let cr = slots(Tag(Tag::NEGOTIATED.0 | Tag::WITH_CR.0));
        let i = full
            .iter()
            .position(|s| *s == ServerCertificate)
            .unwrap();
        assert_eq!(cr[i], CertificateRequest);
        assert_eq!(full[..i], cr[..i]);

        // ClientCertificateVerify replaces ClientFinished at the same index
        let ccv = slots(Tag(Tag::NEGOTIATED.0 | Tag::WITH_CR.0 | Tag::WITH_CCV.0));
        let i = cr
            .iter()
            .position(|s| *s == ClientFinished)
            .unwrap();
        assert_eq!(ccv[i], ClientCertificateVerify);
        assert_eq!(cr[..i], ccv[..i]);
    }

    #[test]
    fn retry_appears_at_most_once() {
        for tag in all_tags() {
            let hrrs = slots(tag)
                .iter()
                .filter(|s| **s == HelloRetryRequest)
                .count();
            assert!(hrrs <= 1);
        }
    }

    #[test]
    fn cursor_walks_a_full_handshake() {
        let mut c = Cursor::new();
        assert!(c.is_turn_of(Side::Client));
        c.advance();
        assert_eq!(c.current(), ServerHello);
        c.learn(Tag::NEGOTIATED);
        c.advance();
        assert_eq!(c.current(), EncryptedExtensions);
        c.advance();
        assert_eq!(c.current(), ServerCertificate);
        c.learn(Tag::WITH_CR);
        assert_eq!(c.current(), CertificateRequest);

        for _ in 0..20 {
            c.advance();
        }
        assert_eq!(c.current(), Established);
        assert_eq!(c.current().sender(), None);
    }

    #[test]
    fn slot_types() {
        assert_eq!(
            ServerCertificate.handshake_type(),
            ClientCertificate.handshake_type()
        );
        assert_eq!(Established.handshake_type(), None);
        assert_eq!(HelloRetryRequest.sender(), Some(Side::Server));
    }
}

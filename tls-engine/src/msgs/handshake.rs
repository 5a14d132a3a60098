#![allow(non_camel_case_types)]
use std::fmt;

use subtle::ConstantTimeEq;

use crate::crypto::ffdhe::FfdheGroup;
use crate::crypto::{GetRandomFailed, SecureRandom};
use crate::enums::{CipherSuite, HandshakeType, ProtocolVersion, SignatureScheme};
use crate::error::InvalidMessage;
use crate::key::Certificate;
#[cfg(feature = "logging")]
use crate::log::warn;
use crate::msgs::base::{Payload, PayloadU16, PayloadU24, PayloadU8};
use crate::msgs::codec::{self, Codec, ListLength, Reader, TlsListElement};
use crate::msgs::enums::{
    CertificateStatusType, ClientCertificateType, Compression, ECCurveType, ExtensionType,
    KeyUpdateRequest, NamedGroup, ServerNameType,
};
use crate::suites::KeyExchangeKind;

/// Declares an opaque newtype over a length-prefixed payload, for wire
/// values that are only ever compared or passed on as bytes.
macro_rules! wrapped_payload(
  ($(#[$comment:meta])* $name:ident, $inner:ident,) => {
    $(#[$comment])*
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct $name($inner);

    impl From<Vec<u8>> for $name {
        fn from(v: Vec<u8>) -> Self {
            Self($inner::new(v))
        }
    }

    impl AsRef<[u8]> for $name {
        fn as_ref(&self) -> &[u8] {
            self.0.0.as_slice()
        }
    }

    impl Codec for $name {
        fn encode(&self, bytes: &mut Vec<u8>) {
            self.0.encode(bytes);
        }

        fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
            Ok(Self($inner::read(r)?))
        }
    }
  }
);

wrapped_payload!(
    /// A `ProtocolName` is an opaque ALPN identifier, as carried in the
    /// `application_layer_protocol_negotiation` extension.
    ProtocolName,
    PayloadU8,
);

impl TlsListElement for ProtocolName {
    const SIZE_LEN: ListLength = ListLength::U16;
}

wrapped_payload!(
    /// A DER-encoded X.501 `Name`, as listed in a CertificateRequest's
    /// `certificate_authorities`.
    DistinguishedName,
    PayloadU16,
);

impl TlsListElement for DistinguishedName {
    const SIZE_LEN: ListLength = ListLength::U16;
}

wrapped_payload!(
    /// A single binder in a `pre_shared_key` offer.
    PresharedKeyBinder,
    PayloadU8,
);

impl TlsListElement for PresharedKeyBinder {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Random(pub [u8; 32]);

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::base::hex(f, &self.0)
    }
}

pub(crate) static HELLO_RETRY_REQUEST_RANDOM: Random = Random([
    0xcf, 0x21, 0xad, 0x74, 0xe5, 0x9a, 0x61, 0x11, 0xbe, 0x1d, 0x8c, 0x02, 0x1e, 0x65, 0xb8, 0x91,
    0xc2, 0xa2, 0x11, 0x16, 0x7a, 0xbb, 0x8c, 0x5e, 0x07, 0x9e, 0x09, 0xe2, 0xc8, 0xa8, 0x33, 0x9c,
]);

/// Written into the tail of a server random when a 1.3-capable server
/// negotiates TLS1.2.
pub(crate) const DOWNGRADE_TLS12: [u8; 8] = *b"DOWNGRD\x01";

/// Written into the tail of a server random when a server capable of a
/// higher version negotiates TLS1.1 or below.
pub(crate) const DOWNGRADE_TLS11: [u8; 8] = *b"DOWNGRD\x00";

impl Codec for Random {
    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.0);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        r.take(32)
            .and_then(|bytes| bytes.try_into().ok())
            .map(Self)
            .ok_or(InvalidMessage::MissingData("Random"))
    }
}

impl Random {
    pub fn new(secure_random: &dyn SecureRandom) -> Result<Self, GetRandomFailed> {
        let mut data = [0u8; 32];
        secure_random.fill(&mut data)?;
        Ok(Self(data))
    }

    /// Overwrite the final eight bytes with a downgrade sentinel.
    pub(crate) fn set_downgrade_sentinel(&mut self, sentinel: &[u8; 8]) {
        self.0[24..].copy_from_slice(sentinel);
    }

    pub(crate) fn has_downgrade_sentinel(&self) -> bool {
        self.0[24..] == DOWNGRADE_TLS12 || self.0[24..] == DOWNGRADE_TLS11
    }
}

impl From<[u8; 32]> for Random {
    #[inline]
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

#[derive(Copy, Clone)]
pub struct SessionId {
    len: usize,
    data: [u8; 32],
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::base::hex(f, &self.data[..self.len])
    }
}

// Session ids are looked up by value on the server, so compare them
// without an early exit.
impl PartialEq for SessionId {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref()
            .ct_eq(other.as_ref())
            .into()
    }
}

impl Codec for SessionId {
    fn encode(&self, bytes: &mut Vec<u8>) {
        debug_assert!(self.len <= 32);
        bytes.push(self.len as u8);
        bytes.extend_from_slice(self.as_ref());
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let len = usize::from(u8::read(r)?);
        if len > 32 {
            return Err(InvalidMessage::TrailingData("SessionID"));
        }

        let bytes = r
            .take(len)
            .ok_or(InvalidMessage::MissingData("SessionID"))?;
        let mut data = [0u8; 32];
        data[..len].copy_from_slice(bytes);
        Ok(Self { data, len })
    }
}

impl SessionId {
    pub fn random(secure_random: &dyn SecureRandom) -> Result<Self, GetRandomFailed> {
        let mut data = [0u8; 32];
        secure_random.fill(&mut data)?;
        Ok(Self { data, len: 32 })
    }

    pub fn empty() -> Self {
        Self {
            data: [0u8; 32],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// One `{uint16 type, opaque data<0..2^16-1>}` extension envelope.
///
/// Handshake messages carry their extensions in this undecoded form; the
/// contents are interpreted by the extension table in `crate::extensions`.
#[derive(Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub typ: ExtensionType,
    pub body: Vec<u8>,
}

impl RawExtension {
    pub fn new(typ: ExtensionType, body: Vec<u8>) -> Self {
        Self { typ, body }
    }
}

impl fmt::Debug for RawExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(", self.typ)?;
        super::base::hex(f, &self.body)?;
        write!(f, ")")
    }
}

impl Codec for RawExtension {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        PayloadU16::encode_slice(&self.body, bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ExtensionType::read(r)?;
        let body = PayloadU16::read(r)?.0;
        Ok(Self { typ, body })
    }
}

impl TlsListElement for RawExtension {
    const SIZE_LEN: ListLength = ListLength::U16;
}

pub(crate) fn find_extension(exts: &[RawExtension], typ: ExtensionType) -> Option<&RawExtension> {
    exts.iter().find(|ext| ext.typ == typ)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerNameEntry {
    pub typ: ServerNameType,
    pub name: PayloadU16,
}

impl Codec for ServerNameEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.typ.encode(bytes);
        self.name.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let typ = ServerNameType::read(r)?;
        let name = PayloadU16::read(r)?;
        Ok(Self { typ, name })
    }
}

impl TlsListElement for ServerNameEntry {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub payload: PayloadU16,
}

impl KeyShareEntry {
    pub fn new(group: NamedGroup, payload: &[u8]) -> Self {
        Self {
            group,
            payload: PayloadU16::new(payload.to_vec()),
        }
    }
}

impl Codec for KeyShareEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.group.encode(bytes);
        self.payload.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let group = NamedGroup::read(r)?;
        let payload = PayloadU16::read(r)?;

        Ok(Self { group, payload })
    }
}

impl TlsListElement for KeyShareEntry {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresharedKeyIdentity {
    pub identity: PayloadU16,
    pub obfuscated_ticket_age: u32,
}

impl PresharedKeyIdentity {
    pub fn new(id: Vec<u8>, age: u32) -> Self {
        Self {
            identity: PayloadU16::new(id),
            obfuscated_ticket_age: age,
        }
    }
}

impl Codec for PresharedKeyIdentity {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identity.encode(bytes);
        self.obfuscated_ticket_age.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            identity: PayloadU16::read(r)?,
            obfuscated_ticket_age: u32::read(r)?,
        })
    }
}

impl TlsListElement for PresharedKeyIdentity {
    const SIZE_LEN: ListLength = ListLength::U16;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresharedKeyOffer {
    pub identities: Vec<PresharedKeyIdentity>,
    pub binders: Vec<PresharedKeyBinder>,
}

impl PresharedKeyOffer {
    /// An offer of a single ticket.
    pub fn new(id: PresharedKeyIdentity, binder: Vec<u8>) -> Self {
        Self {
            identities: vec![id],
            binders: vec![PresharedKeyBinder::from(binder)],
        }
    }
}

impl Codec for PresharedKeyOffer {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.identities.encode(bytes);
        self.binders.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            identities: Vec::read(r)?,
            binders: Vec::read(r)?,
        })
    }
}

/// The body of an OCSP `status_request` extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OcspCertificateStatusRequest {
    pub responder_ids: Vec<ResponderId>,
    pub extensions: PayloadU16,
}

wrapped_payload!(
    /// An OCSP responder identifier.
    ResponderId,
    PayloadU16,
);

impl TlsListElement for ResponderId {
    const SIZE_LEN: ListLength = ListLength::U16;
}

impl OcspCertificateStatusRequest {
    pub fn empty() -> Self {
        Self {
            responder_ids: Vec::new(),
            extensions: PayloadU16::empty(),
        }
    }
}

impl Codec for OcspCertificateStatusRequest {
    fn encode(&self, bytes: &mut Vec<u8>) {
        CertificateStatusType::OCSP.encode(bytes);
        self.responder_ids.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        match CertificateStatusType::read(r)? {
            CertificateStatusType::OCSP => Ok(Self {
                responder_ids: Vec::read(r)?,
                extensions: PayloadU16::read(r)?,
            }),
            _ => Err(InvalidMessage::InvalidCertificateStatusType),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientHelloPayload {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<Compression>,
    pub extensions: Vec<RawExtension>,
}

impl Codec for ClientHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.client_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suites.encode(bytes);
        self.compression_methods.encode(bytes);

        if !self.extensions.is_empty() {
            self.extensions.encode(bytes);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let client_version = ProtocolVersion::read(r)?;
        let random = Random::read(r)?;
        let session_id = SessionId::read(r)?;
        let cipher_suites = Vec::read(r)?;
        let compression_methods = Vec::read(r)?;

        // a hello with no extensions at all is too old to be useful
        let extensions: Vec<RawExtension> = match r.any_left() {
            true => Vec::read(r)?,
            false => Vec::new(),
        };
        r.expect_empty("ClientHelloPayload")?;
        if extensions.is_empty() {
            return Err(InvalidMessage::MissingData("ClientHelloPayload"));
        }

        Ok(Self {
            client_version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }
}

impl ClientHelloPayload {
    /// Replace the binder in the final `pre_shared_key` extension.
    pub(crate) fn set_psk_binder(&mut self, binder: impl Into<Vec<u8>>) {
        if let Some(last) = self.extensions.last_mut() {
            if last.typ != ExtensionType::PreSharedKey {
                return;
            }

            let Ok(mut offer) = PresharedKeyOffer::read_bytes(&last.body) else {
                return;
            };
            if let Some(first) = offer.binders.first_mut() {
                *first = PresharedKeyBinder::from(binder.into());
                last.body = offer.get_encoding();
            }
        }
    }

    fn binders_encoding_len(&self) -> usize {
        match self.extensions.last() {
            Some(ext) if ext.typ == ExtensionType::PreSharedKey => {
                PresharedKeyOffer::read_bytes(&ext.body)
                    .map(|offer| offer.binders.get_encoding().len())
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// A ServerHello, or the HelloRetryRequest which shares its wire format.
#[derive(Clone, Debug)]
pub struct ServerHelloPayload {
    pub legacy_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: Compression,
    pub extensions: Vec<RawExtension>,
}

impl Codec for ServerHelloPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.legacy_version.encode(bytes);
        self.random.encode(bytes);
        self.session_id.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.compression_method.encode(bytes);

        if !self.extensions.is_empty() {
            self.extensions.encode(bytes);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let legacy_version = ProtocolVersion::read(r)?;
        let random = Random::read(r)?;
        let session_id = SessionId::read(r)?;
        let suite = CipherSuite::read(r)?;
        let compression = Compression::read(r)?;

        // the extensions block is optional in TLS1.2 (RFC5246 7.4.1.3)
        let extensions = match r.any_left() {
            true => Vec::read(r)?,
            false => Vec::new(),
        };
        r.expect_empty("ServerHelloPayload")?;

        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suite: suite,
            compression_method: compression,
            extensions,
        })
    }
}

impl TlsListElement for Certificate {
    const SIZE_LEN: ListLength = ListLength::U24 {
        max: CERTIFICATE_MAX_SIZE_LIMIT,
    };
}

/// Limit on the size of a certificate list, to bound allocations made on
/// behalf of the peer.
pub(crate) const CERTIFICATE_MAX_SIZE_LIMIT: usize = 0x1_0000;

pub type CertificateChain = Vec<Certificate>;

#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub cert: Certificate,
    pub extensions: Vec<RawExtension>,
}

impl Codec for CertificateEntry {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.cert.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            cert: Certificate::read(r)?,
            extensions: Vec::read(r)?,
        })
    }
}

impl CertificateEntry {
    pub fn new(cert: Certificate) -> Self {
        Self {
            cert,
            extensions: Vec::new(),
        }
    }
}

impl TlsListElement for CertificateEntry {
    const SIZE_LEN: ListLength = ListLength::U24 {
        max: CERTIFICATE_MAX_SIZE_LIMIT,
    };
}

#[derive(Clone, Debug)]
pub struct CertificatePayloadTls13 {
    pub context: PayloadU8,
    pub entries: Vec<CertificateEntry>,
}

impl Codec for CertificatePayloadTls13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        self.entries.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            context: PayloadU8::read(r)?,
            entries: Vec::read(r)?,
        })
    }
}

impl CertificatePayloadTls13 {
    pub fn new(certs: &[Certificate]) -> Self {
        Self {
            context: PayloadU8::empty(),
            entries: certs
                .iter()
                .cloned()
                .map(CertificateEntry::new)
                .collect(),
        }
    }

    pub fn into_certificate_chain(self) -> CertificateChain {
        self.entries
            .into_iter()
            .map(|e| e.cert)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigitallySignedStruct {
    pub scheme: SignatureScheme,
    pub sig: PayloadU16,
}

impl DigitallySignedStruct {
    pub fn new(scheme: SignatureScheme, sig: Vec<u8>) -> Self {
        Self {
            scheme,
            sig: PayloadU16::new(sig),
        }
    }

    pub fn signature(&self) -> &[u8] {
        &self.sig.0
    }
}

impl Codec for DigitallySignedStruct {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.scheme.encode(bytes);
        self.sig.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let scheme = SignatureScheme::read(r)?;
        let sig = PayloadU16::read(r)?;

        Ok(Self { scheme, sig })
    }
}

#[derive(Clone, Debug)]
pub struct ServerEcdhParams {
    pub named_group: NamedGroup,
    pub public: PayloadU8,
}

impl ServerEcdhParams {
    pub fn new(named_group: NamedGroup, pubkey: &[u8]) -> Self {
        Self {
            named_group,
            public: PayloadU8::new(pubkey.to_vec()),
        }
    }
}

impl Codec for ServerEcdhParams {
    fn encode(&self, bytes: &mut Vec<u8>) {
        ECCurveType::NamedCurve.encode(bytes);
        self.named_group.encode(bytes);
        self.public.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        if ECCurveType::read(r)? != ECCurveType::NamedCurve {
            return Err(InvalidMessage::UnsupportedCurveType);
        }

        let named_group = NamedGroup::read(r)?;
        let public = PayloadU8::read(r)?;

        Ok(Self {
            named_group,
            public,
        })
    }
}

/// RFC5246 7.4.3 `ServerDHParams`: explicit group parameters and the
/// server's public value.
#[derive(Clone, Debug)]
pub struct ServerDhParams {
    pub dh_p: PayloadU16,
    pub dh_g: PayloadU16,
    pub dh_ys: PayloadU16,
}

impl ServerDhParams {
    pub fn new(group: FfdheGroup<'_>, pubkey: &[u8]) -> Self {
        Self {
            dh_p: PayloadU16::new(group.p.to_vec()),
            dh_g: PayloadU16::new(group.g.to_vec()),
            dh_ys: PayloadU16::new(pubkey.to_vec()),
        }
    }

    pub fn group(&self) -> FfdheGroup<'_> {
        FfdheGroup::from_wire(&self.dh_p.0, &self.dh_g.0)
    }
}

impl Codec for ServerDhParams {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.dh_p.encode(bytes);
        self.dh_g.encode(bytes);
        self.dh_ys.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let dh_p = PayloadU16::read(r)?;
        let dh_g = PayloadU16::read(r)?;
        let dh_ys = PayloadU16::read(r)?;
        if dh_p.0.is_empty() || dh_g.0.is_empty() || dh_ys.0.is_empty() {
            return Err(InvalidMessage::InvalidDhParams);
        }

        Ok(Self { dh_p, dh_g, dh_ys })
    }
}

#[derive(Clone, Debug)]
pub enum ServerKeyExchangeParams {
    Ecdh(ServerEcdhParams),
    Dh(ServerDhParams),
}

impl ServerKeyExchangeParams {
    /// Parameters carrying `pubkey`, shaped for the group it belongs to.
    pub fn new(group: NamedGroup, pubkey: &[u8]) -> Self {
        match FfdheGroup::from_named_group(group) {
            Some(ff) => Self::Dh(ServerDhParams::new(ff, pubkey)),
            None => Self::Ecdh(ServerEcdhParams::new(group, pubkey)),
        }
    }

    /// The group these parameters name, if we recognise it.
    pub fn named_group(&self) -> Option<NamedGroup> {
        match self {
            Self::Ecdh(ecdh) => Some(ecdh.named_group),
            Self::Dh(dh) => dh.group().named_group(),
        }
    }

    pub fn pub_key(&self) -> &[u8] {
        match self {
            Self::Ecdh(ecdh) => &ecdh.public.0,
            Self::Dh(dh) => &dh.dh_ys.0,
        }
    }

    pub fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            Self::Ecdh(ecdh) => ecdh.encode(bytes),
            Self::Dh(dh) => dh.encode(bytes),
        }
    }
}

/// A signed ServerKeyExchange.
///
/// The body cannot be parsed without knowing the negotiated key exchange,
/// so there is no `Codec::read`; use [`ServerKeyExchange::read_for`].
#[derive(Clone, Debug)]
pub struct ServerKeyExchange {
    pub params: ServerKeyExchangeParams,
    pub dss: DigitallySignedStruct,
}

impl ServerKeyExchange {
    pub fn read_for(kx: KeyExchangeKind, body: &[u8]) -> Result<Self, InvalidMessage> {
        let mut r = Reader::init(body);
        let params = match kx {
            KeyExchangeKind::Dhe => ServerKeyExchangeParams::Dh(ServerDhParams::read(&mut r)?),
            KeyExchangeKind::Ecdhe => ServerKeyExchangeParams::Ecdh(ServerEcdhParams::read(&mut r)?),
            _ => return Err(InvalidMessage::UnexpectedMessage("ServerKeyExchange")),
        };
        let dss = DigitallySignedStruct::read(&mut r)?;
        r.expect_empty("ServerKeyExchange")?;

        Ok(Self { params, dss })
    }

    pub fn get_encoding(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.params.encode(&mut bytes);
        self.dss.encode(&mut bytes);
        bytes
    }
}

/// The client's ephemeral public value in a ClientKeyExchange: u8-prefixed
/// for ECDHE (RFC8422 5.7), u16-prefixed for DHE (RFC5246 7.4.7.2).
pub fn read_client_kx_public(kx: KeyExchangeKind, body: &[u8]) -> Result<Vec<u8>, InvalidMessage> {
    let mut r = Reader::init(body);
    let public = match kx {
        KeyExchangeKind::Dhe => PayloadU16::read(&mut r)?.0,
        KeyExchangeKind::Ecdhe => PayloadU8::read(&mut r)?.0,
        _ => return Err(InvalidMessage::UnexpectedMessage("ClientKeyExchange")),
    };
    r.expect_empty("ClientKeyExchange")?;
    if public.is_empty() {
        return Err(InvalidMessage::MissingData("ClientKeyExchange public value"));
    }
    Ok(public)
}

/// Encodes `public` as a ClientKeyExchange body for `group`.
pub fn client_kx_public(group: NamedGroup, public: &[u8]) -> Vec<u8> {
    match group.is_ffdhe() {
        true => PayloadU16::new(public.to_vec()).get_encoding(),
        false => PayloadU8::new(public.to_vec()).get_encoding(),
    }
}

#[derive(Clone, Debug)]
pub struct CertificateRequestPayload {
    pub certtypes: Vec<ClientCertificateType>,
    pub sigschemes: Vec<SignatureScheme>,
    pub canames: Vec<DistinguishedName>,
}

impl Codec for CertificateRequestPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.certtypes.encode(bytes);
        self.sigschemes.encode(bytes);
        self.canames.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let certtypes = Vec::read(r)?;
        let sigschemes: Vec<SignatureScheme> = Vec::read(r)?;
        let canames = Vec::read(r)?;

        // nothing could satisfy a request without signature schemes
        if sigschemes.is_empty() {
            warn!("CertificateRequest lists no signature schemes");
            return Err(InvalidMessage::NoSignatureSchemes);
        }

        Ok(Self {
            certtypes,
            sigschemes,
            canames,
        })
    }
}

#[derive(Clone, Debug)]
pub struct CertificateRequestPayloadTls13 {
    pub context: PayloadU8,
    pub extensions: Vec<RawExtension>,
}

impl Codec for CertificateRequestPayloadTls13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.context.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let context = PayloadU8::read(r)?;
        let extensions = Vec::read(r)?;

        Ok(Self {
            context,
            extensions,
        })
    }
}

#[derive(Clone, Debug)]
pub struct NewSessionTicketPayload {
    pub lifetime_hint: u32,
    pub ticket: PayloadU16,
}

impl NewSessionTicketPayload {
    pub fn new(lifetime_hint: u32, ticket: Vec<u8>) -> Self {
        Self {
            lifetime_hint,
            ticket: PayloadU16::new(ticket),
        }
    }
}

impl Codec for NewSessionTicketPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime_hint.encode(bytes);
        self.ticket.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Ok(Self {
            lifetime_hint: u32::read(r)?,
            ticket: PayloadU16::read(r)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct NewSessionTicketPayloadTls13 {
    pub lifetime: u32,
    pub age_add: u32,
    pub nonce: PayloadU8,
    pub ticket: PayloadU16,
    pub extensions: Vec<RawExtension>,
}

impl NewSessionTicketPayloadTls13 {
    pub fn new(lifetime: u32, age_add: u32, nonce: Vec<u8>, ticket: Vec<u8>) -> Self {
        Self {
            lifetime,
            age_add,
            nonce: PayloadU8::new(nonce),
            ticket: PayloadU16::new(ticket),
            extensions: vec![],
        }
    }
}

impl Codec for NewSessionTicketPayloadTls13 {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.lifetime.encode(bytes);
        self.age_add.encode(bytes);
        self.nonce.encode(bytes);
        self.ticket.encode(bytes);
        self.extensions.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        let lifetime = u32::read(r)?;
        let age_add = u32::read(r)?;
        let nonce = PayloadU8::read(r)?;
        let ticket = PayloadU16::read(r)?;
        let extensions = Vec::read(r)?;

        if ticket.0.is_empty() {
            return Err(InvalidMessage::EmptyTicketValue);
        }

        Ok(Self {
            lifetime,
            age_add,
            nonce,
            ticket,
            extensions,
        })
    }
}

/// A stapled OCSP response. No other status type exists.
#[derive(Clone, Debug)]
pub struct CertificateStatus {
    pub ocsp_response: PayloadU24,
}

impl Codec for CertificateStatus {
    fn encode(&self, bytes: &mut Vec<u8>) {
        CertificateStatusType::OCSP.encode(bytes);
        self.ocsp_response.encode(bytes);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        if CertificateStatusType::read(r)? != CertificateStatusType::OCSP {
            return Err(InvalidMessage::InvalidCertificateStatusType);
        }
        PayloadU24::read(r).map(|ocsp_response| Self { ocsp_response })
    }
}

impl CertificateStatus {
    pub fn new(ocsp: Vec<u8>) -> Self {
        Self {
            ocsp_response: PayloadU24::new(ocsp),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.ocsp_response.0
    }
}

#[derive(Clone, Debug)]
pub enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHelloPayload),
    ServerHello(ServerHelloPayload),
    HelloRetryRequest(ServerHelloPayload),
    Certificate(CertificateChain),
    CertificateTls13(CertificatePayloadTls13),
    ServerKeyExchange(Payload),
    CertificateRequest(CertificateRequestPayload),
    CertificateRequestTls13(CertificateRequestPayloadTls13),
    CertificateVerify(DigitallySignedStruct),
    ServerHelloDone,
    EndOfEarlyData,
    ClientKeyExchange(Payload),
    NewSessionTicket(NewSessionTicketPayload),
    NewSessionTicketTls13(NewSessionTicketPayloadTls13),
    EncryptedExtensions(Vec<RawExtension>),
    KeyUpdate(KeyUpdateRequest),
    Finished(Payload),
    CertificateStatus(CertificateStatus),
    MessageHash(Payload),
    Unknown(Payload),
}

impl HandshakePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        use self::HandshakePayload::*;
        match self {
            HelloRequest | ServerHelloDone | EndOfEarlyData => {}
            ClientHello(x) => x.encode(bytes),
            ServerHello(x) => x.encode(bytes),
            HelloRetryRequest(x) => x.encode(bytes),
            Certificate(x) => x.encode(bytes),
            CertificateTls13(x) => x.encode(bytes),
            ServerKeyExchange(x) => x.encode(bytes),
            ClientKeyExchange(x) => x.encode(bytes),
            CertificateRequest(x) => x.encode(bytes),
            CertificateRequestTls13(x) => x.encode(bytes),
            CertificateVerify(x) => x.encode(bytes),
            NewSessionTicket(x) => x.encode(bytes),
            NewSessionTicketTls13(x) => x.encode(bytes),
            EncryptedExtensions(x) => x.encode(bytes),
            KeyUpdate(x) => x.encode(bytes),
            Finished(x) => x.encode(bytes),
            CertificateStatus(x) => x.encode(bytes),
            MessageHash(x) => x.encode(bytes),
            Unknown(x) => x.encode(bytes),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HandshakeMessagePayload {
    pub typ: HandshakeType,
    pub payload: HandshakePayload,
}

impl Codec for HandshakeMessagePayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        // a HelloRetryRequest is a ServerHello on the wire
        let wire_type = match self.typ {
            HandshakeType::HelloRetryRequest => HandshakeType::ServerHello,
            typ => typ,
        };
        wire_type.encode(bytes);

        let nested = codec::LengthPrefixedBuffer::new(
            ListLength::U24 {
                max: usize::MAX,
            },
            bytes,
        );
        self.payload.encode(nested.buf);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, InvalidMessage> {
        Self::read_version(r, ProtocolVersion::TLSv1_2)
    }
}

impl HandshakeMessagePayload {
    /// Decode a handshake message whose body grammar depends on the
    /// negotiated protocol version.
    pub fn read_version(r: &mut Reader<'_>, vers: ProtocolVersion) -> Result<Self, InvalidMessage> {
        let mut typ = HandshakeType::read(r)?;
        let len = usize::from(codec::u24::read(r)?);
        let mut sub = r.sub(len)?;

        let payload = match typ {
            HandshakeType::HelloRequest if sub.left() == 0 => HandshakePayload::HelloRequest,
            HandshakeType::ClientHello => {
                HandshakePayload::ClientHello(ClientHelloPayload::read(&mut sub)?)
            }
            HandshakeType::ServerHello => {
                let shp = ServerHelloPayload::read(&mut sub)?;
                if shp.random == HELLO_RETRY_REQUEST_RANDOM {
                    typ = HandshakeType::HelloRetryRequest;
                    HandshakePayload::HelloRetryRequest(shp)
                } else {
                    HandshakePayload::ServerHello(shp)
                }
            }
            HandshakeType::Certificate if vers == ProtocolVersion::TLSv1_3 => {
                HandshakePayload::CertificateTls13(CertificatePayloadTls13::read(&mut sub)?)
            }
            HandshakeType::Certificate => {
                HandshakePayload::Certificate(CertificateChain::read(&mut sub)?)
            }
            HandshakeType::ServerKeyExchange => {
                HandshakePayload::ServerKeyExchange(Payload::read(&mut sub))
            }
            HandshakeType::ServerHelloDone => {
                sub.expect_empty("ServerHelloDone")?;
                HandshakePayload::ServerHelloDone
            }
            HandshakeType::ClientKeyExchange => {
                HandshakePayload::ClientKeyExchange(Payload::read(&mut sub))
            }
            HandshakeType::CertificateRequest if vers == ProtocolVersion::TLSv1_3 => {
                let p = CertificateRequestPayloadTls13::read(&mut sub)?;
                HandshakePayload::CertificateRequestTls13(p)
            }
            HandshakeType::CertificateRequest => {
                let p = CertificateRequestPayload::read(&mut sub)?;
                HandshakePayload::CertificateRequest(p)
            }
            HandshakeType::CertificateVerify => {
                HandshakePayload::CertificateVerify(DigitallySignedStruct::read(&mut sub)?)
            }
            HandshakeType::NewSessionTicket if vers == ProtocolVersion::TLSv1_3 => {
                let p = NewSessionTicketPayloadTls13::read(&mut sub)?;
                HandshakePayload::NewSessionTicketTls13(p)
            }
            HandshakeType::NewSessionTicket => {
                let p = NewSessionTicketPayload::read(&mut sub)?;
                HandshakePayload::NewSessionTicket(p)
            }
            HandshakeType::EncryptedExtensions => {
                HandshakePayload::EncryptedExtensions(Vec::read(&mut sub)?)
            }
            HandshakeType::KeyUpdate => {
                HandshakePayload::KeyUpdate(KeyUpdateRequest::read(&mut sub)?)
            }
            HandshakeType::EndOfEarlyData => {
                sub.expect_empty("EndOfEarlyData")?;
                HandshakePayload::EndOfEarlyData
            }
            HandshakeType::Finished => HandshakePayload::Finished(Payload::read(&mut sub)),
            HandshakeType::CertificateStatus => {
                HandshakePayload::CertificateStatus(CertificateStatus::read(&mut sub)?)
            }
            // transcript-only types, never sent
            HandshakeType::MessageHash | HandshakeType::HelloRetryRequest => {
                return Err(InvalidMessage::UnexpectedMessage(
                    typ.as_str().unwrap_or("handshake"),
                ));
            }
            _ => HandshakePayload::Unknown(Payload::read(&mut sub)),
        };

        sub.expect_empty("HandshakeMessagePayload")
            .map(|_| Self { typ, payload })
    }

    pub fn build_key_update(request: KeyUpdateRequest) -> Self {
        Self {
            typ: HandshakeType::KeyUpdate,
            payload: HandshakePayload::KeyUpdate(request),
        }
    }

    /// The encoding of a ClientHello, truncated just before the PSK binders.
    pub fn encoding_for_binder_signing(&self) -> Vec<u8> {
        let mut encoding = self.get_encoding();
        if let HandshakePayload::ClientHello(ch) = &self.payload {
            let keep = encoding.len() - ch.binders_encoding_len();
            encoding.truncate(keep);
        }
        encoding
    }

    /// The synthetic `message_hash` message which replaces ClientHello1 in
    /// the transcript after a HelloRetryRequest.
    pub fn build_handshake_hash(hash: &[u8]) -> Self {
        Self {
            typ: HandshakeType::MessageHash,
            payload: HandshakePayload::MessageHash(Payload::new(hash.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_client_hello() -> ClientHelloPayload {
        ClientHelloPayload {
            client_version: ProtocolVersion::TLSv1_2,
            random: Random([0x11; 32]),
            session_id: SessionId::empty(),
            cipher_suites: vec![CipherSuite::TLS13_AES_128_GCM_SHA256],
            compression_methods: vec![Compression::Null],
            extensions: vec![RawExtension::new(ExtensionType::ExtendedMasterSecret, vec![])],
        }
    }

    #[test]
    fn hello_retry_request_is_recognised_by_its_random() {
        let hrr = HandshakeMessagePayload {
            typ: HandshakeType::HelloRetryRequest,
            payload: HandshakePayload::HelloRetryRequest(ServerHelloPayload {
                legacy_version: ProtocolVersion::TLSv1_2,
                random: HELLO_RETRY_REQUEST_RANDOM,
                session_id: SessionId::empty(),
                cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
                compression_method: Compression::Null,
                extensions: vec![RawExtension::new(
                    ExtensionType::SupportedVersions,
                    vec![0x03, 0x04],
                )],
            }),
        };

        let bytes = hrr.get_encoding();
        assert_eq!(bytes[0], 0x02);
        let back = HandshakeMessagePayload::read_bytes(&bytes).unwrap();
        assert_eq!(back.typ, HandshakeType::HelloRetryRequest);
    }

    #[test]
    fn client_hello_requires_extensions() {
        let mut ch = sample_client_hello();
        ch.extensions.clear();
        let bytes = ch.get_encoding();
        assert_eq!(
            ClientHelloPayload::read_bytes(&bytes).unwrap_err(),
            InvalidMessage::MissingData("ClientHelloPayload")
        );
    }

    #[test]
    fn binder_signing_encoding_excludes_binders() {
        let mut ch = sample_client_hello();
        let offer = PresharedKeyOffer::new(PresharedKeyIdentity::new(vec![1, 2, 3], 4), vec![0; 32]);
        ch.extensions.push(RawExtension::new(
            ExtensionType::PreSharedKey,
            offer.get_encoding(),
        ));

        let hmp = HandshakeMessagePayload {
            typ: HandshakeType::ClientHello,
            payload: HandshakePayload::ClientHello(ch.clone()),
        };
        let full = hmp.get_encoding();
        let truncated = hmp.encoding_for_binder_signing();
        // u16 list length, u8 binder length, 32 binder bytes
        assert_eq!(full.len() - truncated.len(), 2 + 1 + 32);

        ch.set_psk_binder(vec![0xaa; 32]);
        let offer = PresharedKeyOffer::read_bytes(&ch.extensions.last().unwrap().body).unwrap();
        assert_eq!(offer.binders[0].as_ref(), &[0xaa; 32][..]);
    }

    #[test]
    fn downgrade_sentinels() {
        let mut random = Random([0u8; 32]);
        assert!(!random.has_downgrade_sentinel());
        random.set_downgrade_sentinel(&DOWNGRADE_TLS12);
        assert!(random.has_downgrade_sentinel());
        assert_eq!(&random.0[24..], b"DOWNGRD\x01");
    }

    #[test]
    fn session_id_rejects_overlong() {
        let mut bytes = vec![33u8];
        bytes.extend_from_slice(&[0u8; 33]);
        assert!(SessionId::read_bytes(&bytes).is_err());
    }

    #[test]
    fn certificate_request_needs_signature_schemes() {
        let crp = CertificateRequestPayload {
            certtypes: vec![ClientCertificateType::ECDSASign],
            sigschemes: vec![],
            canames: vec![],
        };
        assert_eq!(
            CertificateRequestPayload::read_bytes(&crp.get_encoding()).unwrap_err(),
            InvalidMessage::NoSignatureSchemes
        );
    }

    #[test]
    fn dhe_server_key_exchange_names_its_group() {
        let skx = ServerKeyExchange {
            params: ServerKeyExchangeParams::new(NamedGroup::FFDHE2048, &[0x42; 256]),
            dss: DigitallySignedStruct::new(SignatureScheme::RSA_PSS_SHA256, vec![1, 2, 3]),
        };
        let bytes = skx.get_encoding();
        assert_eq!(&bytes[..2], &[0x01, 0x00]);

        let read = ServerKeyExchange::read_for(KeyExchangeKind::Dhe, &bytes).unwrap();
        assert_eq!(read.params.named_group(), Some(NamedGroup::FFDHE2048));
        assert_eq!(read.params.pub_key(), &[0x42; 256]);

        // the same bytes do not parse as ECDHE parameters
        assert!(ServerKeyExchange::read_for(KeyExchangeKind::Ecdhe, &bytes).is_err());
    }

    #[test]
    fn dh_params_reject_empty_fields() {
        let empty_generator = [0, 1, 0x17, 0, 0, 0, 1, 0x05];
        assert_eq!(
            ServerDhParams::read_bytes(&empty_generator).unwrap_err(),
            InvalidMessage::InvalidDhParams
        );

        let unknown = ServerDhParams::read_bytes(&[0, 1, 0x17, 0, 1, 0x05, 0, 1, 0x03]).unwrap();
        assert_eq!(ServerKeyExchangeParams::Dh(unknown).named_group(), None);
    }

    #[test]
    fn client_kx_public_values_are_strict() {
        let dhe = client_kx_public(NamedGroup::FFDHE2048, &[9, 9]);
        assert_eq!(dhe, vec![0, 2, 9, 9]);
        assert_eq!(read_client_kx_public(KeyExchangeKind::Dhe, &dhe).unwrap(), vec![9, 9]);

        let ecdhe = client_kx_public(NamedGroup::X25519, &[9, 9]);
        assert_eq!(ecdhe, vec![2, 9, 9]);
        assert_eq!(read_client_kx_public(KeyExchangeKind::Ecdhe, &ecdhe).unwrap(), vec![9, 9]);

        let mut trailing = dhe;
        trailing.push(0);
        assert_eq!(
            read_client_kx_public(KeyExchangeKind::Dhe, &trailing).unwrap_err(),
            InvalidMessage::TrailingData("ClientKeyExchange")
        );
        assert!(read_client_kx_public(KeyExchangeKind::Dhe, &[0, 0]).is_err());
    }
}

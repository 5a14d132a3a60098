//! Handshake extension negotiation.
//!
//! Every extension this engine understands has one entry in [`EXTENSIONS`]:
//! the handshake messages it may appear in, and for each role a `needs`
//! predicate, a `build` serializer and a `parse` deserializer.  Outbound
//! messages are assembled by walking the table in order; inbound messages
//! are checked for duplicates before any body is parsed, then dispatched
//! by type.

use std::collections::HashSet;

use crate::crypto::hash;
use crate::enums::{ProtocolVersion, SignatureScheme};
use crate::error::{Error, InvalidMessage, PeerMisbehaved};
#[cfg(feature = "logging")]
use crate::log::trace;
use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{
    ECPointFormat, ExtensionType, NamedGroup, PSKKeyExchangeMode, ServerNameType,
};
use crate::msgs::handshake::{
    CertificateStatus, ClientHelloPayload, KeyShareEntry, OcspCertificateStatusRequest,
    PresharedKeyOffer, ProtocolName, RawExtension, ServerNameEntry,
};

/// The handshake message an extension block belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExtensionContext {
    ClientHello,
    ServerHelloTls12,
    ServerHelloTls13,
    HelloRetryRequest,
    EncryptedExtensions,
    CertificateRequest,
    Certificate,
    NewSessionTicket,
}

impl ExtensionContext {
    const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Messages where we ignore extensions we don't know, rather than
    /// treating them as unsolicited.
    fn ignores_unknown(self) -> bool {
        matches!(
            self,
            Self::ClientHello | Self::CertificateRequest | Self::NewSessionTicket
        )
    }
}

const CH: u16 = ExtensionContext::ClientHello.bit();
const SH12: u16 = ExtensionContext::ServerHelloTls12.bit();
const SH13: u16 = ExtensionContext::ServerHelloTls13.bit();
const HRR: u16 = ExtensionContext::HelloRetryRequest.bit();
const EE: u16 = ExtensionContext::EncryptedExtensions.bit();
const CR: u16 = ExtensionContext::CertificateRequest.bit();
const CT: u16 = ExtensionContext::Certificate.bit();
const NST: u16 = ExtensionContext::NewSessionTicket.bit();

/// Extension values a client offers in its ClientHello.
///
/// The client fills this in and [`client_hello_extensions`] serializes it;
/// the server obtains one from [`parse_client_hello`].
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ClientExtensions {
    pub(crate) renegotiation_info: Option<Vec<u8>>,
    /// A DNS hostname.
    pub(crate) server_name: Option<Vec<u8>>,
    pub(crate) status_request: bool,
    pub(crate) ec_point_formats: Option<Vec<ECPointFormat>>,
    /// An empty value asks for a fresh ticket.
    pub(crate) session_ticket: Option<Vec<u8>>,
    pub(crate) named_groups: Option<Vec<NamedGroup>>,
    pub(crate) signature_schemes: Option<Vec<SignatureScheme>>,
    pub(crate) protocols: Option<Vec<ProtocolName>>,
    pub(crate) extended_master_secret: bool,
    pub(crate) supported_versions: Option<Vec<ProtocolVersion>>,
    pub(crate) cookie: Option<Vec<u8>>,
    pub(crate) psk_modes: Option<Vec<PSKKeyExchangeMode>>,
    pub(crate) key_shares: Option<Vec<KeyShareEntry>>,
    pub(crate) early_data: bool,
    /// Number of padding bytes.
    pub(crate) padding: Option<usize>,
    pub(crate) preshared_key_offer: Option<PresharedKeyOffer>,
}

/// Extension values a server sends, across all the messages that carry
/// server extensions.  Which fields are written depends on the
/// [`ExtensionContext`] being built.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ServerExtensions {
    pub(crate) renegotiation_info: Option<Vec<u8>>,
    pub(crate) server_name_ack: bool,
    pub(crate) status_request_ack: bool,
    /// Stapled OCSP response in a TLS1.3 leaf certificate entry.
    pub(crate) ocsp_response: Option<Vec<u8>>,
    pub(crate) ec_point_formats: Option<Vec<ECPointFormat>>,
    pub(crate) session_ticket_ack: bool,
    pub(crate) named_groups: Option<Vec<NamedGroup>>,
    pub(crate) signature_schemes: Option<Vec<SignatureScheme>>,
    pub(crate) selected_protocol: Option<ProtocolName>,
    pub(crate) extended_master_secret_ack: bool,
    pub(crate) selected_version: Option<ProtocolVersion>,
    pub(crate) cookie: Option<Vec<u8>>,
    pub(crate) key_share: Option<KeyShareEntry>,
    pub(crate) hrr_group: Option<NamedGroup>,
    pub(crate) early_data_ack: bool,
    pub(crate) max_early_data: Option<u32>,
    pub(crate) selected_psk: Option<u16>,
}

/// Client-side capabilities: build into a ClientHello, parse what the
/// server sends back.
struct ClientRole {
    needs: fn(&ClientExtensions) -> bool,
    build: fn(&ClientExtensions, &mut Vec<u8>),
    parse: fn(&mut Reader<'_>, ExtensionContext, &mut ServerExtensions) -> Result<(), Error>,
}

/// Server-side capabilities: parse a ClientHello, build the server's
/// messages.
struct ServerRole {
    needs: fn(&ServerExtensions, ExtensionContext) -> bool,
    build: fn(&ServerExtensions, ExtensionContext, &mut Vec<u8>),
    parse: fn(&mut Reader<'_>, &mut ClientExtensions) -> Result<(), Error>,
}

pub(crate) struct ExtensionDescriptor {
    pub(crate) typ: ExtensionType,
    messages: u16,
    client: ClientRole,
    server: ServerRole,
}

impl ExtensionDescriptor {
    pub(crate) fn allowed_in(&self, ctx: ExtensionContext) -> bool {
        self.messages & ctx.bit() != 0
    }
}

fn expect_empty_body(r: &mut Reader<'_>, name: &'static str) -> Result<(), Error> {
    Ok(r.expect_empty(name)?)
}

fn read_non_empty<T: Codec>(r: &mut Reader<'_>, name: &'static str) -> Result<Vec<T>, Error>
where
    Vec<T>: Codec,
{
    let items = Vec::<T>::read(r)?;
    if items.is_empty() {
        return Err(InvalidMessage::IllegalEmptyList(name).into());
    }
    Ok(items)
}

/// The table is walked in order when building, so this order is the
/// on-the-wire order.  `pre_shared_key` must stay last.
pub(crate) static EXTENSIONS: &[ExtensionDescriptor] = &[
    ExtensionDescriptor {
        typ: ExtensionType::RenegotiationInfo,
        messages: CH | SH12,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.renegotiation_info.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(ri) = &c.renegotiation_info {
                    PayloadU8::encode_slice(ri, out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                s.renegotiation_info = Some(PayloadU8::read(r)?.0);
                expect_empty_body(r, "RenegotiationInfo")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.renegotiation_info.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(ri) = &s.renegotiation_info {
                    PayloadU8::encode_slice(ri, out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.renegotiation_info = Some(PayloadU8::read(r)?.0);
                expect_empty_body(r, "RenegotiationInfo")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::ServerName,
        messages: CH | SH12 | EE,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.server_name.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(name) = &c.server_name {
                    vec![ServerNameEntry {
                        typ: ServerNameType::HostName,
                        name: PayloadU16::new(name.clone()),
                    }]
                    .encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                s.server_name_ack = true;
                expect_empty_body(r, "ServerName")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.server_name_ack,
            build: |_, _, _| {},
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                let entries = Vec::<ServerNameEntry>::read(r)?;
                let mut host_names = entries
                    .into_iter()
                    .filter(|e| e.typ == ServerNameType::HostName);
                let name = match (host_names.next(), host_names.next()) {
                    (Some(only), None) => only.name.0,
                    _ => return Err(PeerMisbehaved::ServerNameMustContainOneHostName.into()),
                };
                if name.is_empty() || !name.is_ascii() {
                    return Err(InvalidMessage::InvalidServerName.into());
                }
                c.server_name = Some(name);
                expect_empty_body(r, "ServerName")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::StatusRequest,
        messages: CH | SH12 | CT,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.status_request,
            build: |_, out: &mut Vec<u8>| OcspCertificateStatusRequest::empty().encode(out),
            parse: |r: &mut Reader<'_>, ctx, s: &mut ServerExtensions| -> Result<(), Error> {
                match ctx {
                    ExtensionContext::Certificate => {
                        s.ocsp_response = Some(CertificateStatus::read(r)?.into_inner());
                    }
                    _ => s.status_request_ack = true,
                }
                expect_empty_body(r, "StatusRequest")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, ctx| match ctx {
                ExtensionContext::Certificate => s.ocsp_response.is_some(),
                _ => s.status_request_ack,
            },
            build: |s: &ServerExtensions, ctx, out: &mut Vec<u8>| {
                if let (ExtensionContext::Certificate, Some(ocsp)) = (ctx, &s.ocsp_response) {
                    CertificateStatus::new(ocsp.clone()).encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                // we only staple a response we already have, so the
                // responder list and extensions are not interesting
                c.status_request = OcspCertificateStatusRequest::read(r).is_ok();
                r.rest();
                Ok(())
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::ECPointFormats,
        messages: CH | SH12,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.ec_point_formats.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(formats) = &c.ec_point_formats {
                    formats.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                let formats = Vec::<ECPointFormat>::read(r)?;
                if !formats.contains(&ECPointFormat::Uncompressed) {
                    return Err(PeerMisbehaved::ServerHelloMustOfferUncompressedEcPoints.into());
                }
                s.ec_point_formats = Some(formats);
                expect_empty_body(r, "ECPointFormats")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.ec_point_formats.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(formats) = &s.ec_point_formats {
                    formats.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.ec_point_formats = Some(read_non_empty(r, "ECPointFormats")?);
                expect_empty_body(r, "ECPointFormats")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::SessionTicket,
        messages: CH | SH12,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.session_ticket.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(ticket) = &c.session_ticket {
                    out.extend_from_slice(ticket);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                s.session_ticket_ack = true;
                expect_empty_body(r, "SessionTicket")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.session_ticket_ack,
            build: |_, _, _| {},
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.session_ticket = Some(r.rest().to_vec());
                Ok(())
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::EllipticCurves,
        messages: CH | EE,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.named_groups.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(groups) = &c.named_groups {
                    groups.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                // informational only
                s.named_groups = Some(Vec::read(r)?);
                expect_empty_body(r, "NamedGroups")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.named_groups.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(groups) = &s.named_groups {
                    groups.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.named_groups = Some(read_non_empty(r, "NamedGroups")?);
                expect_empty_body(r, "NamedGroups")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::SignatureAlgorithms,
        messages: CH | CR,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.signature_schemes.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(schemes) = &c.signature_schemes {
                    schemes.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                let schemes = Vec::<SignatureScheme>::read(r)?;
                if schemes.is_empty() {
                    return Err(InvalidMessage::NoSignatureSchemes.into());
                }
                s.signature_schemes = Some(schemes);
                expect_empty_body(r, "SignatureAlgorithms")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.signature_schemes.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(schemes) = &s.signature_schemes {
                    schemes.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                let schemes = Vec::<SignatureScheme>::read(r)?;
                if schemes.is_empty() {
                    return Err(InvalidMessage::NoSignatureSchemes.into());
                }
                c.signature_schemes = Some(schemes);
                expect_empty_body(r, "SignatureAlgorithms")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::ALProtocolNegotiation,
        messages: CH | SH12 | EE,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.protocols.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(protocols) = &c.protocols {
                    protocols.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                let mut protocols = Vec::<ProtocolName>::read(r)?;
                match (protocols.pop(), protocols.is_empty()) {
                    (Some(selected), true) if !selected.as_ref().is_empty() => {
                        s.selected_protocol = Some(selected);
                    }
                    _ => return Err(PeerMisbehaved::SelectedUnofferedApplicationProtocol.into()),
                }
                expect_empty_body(r, "ALProtocolNegotiation")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.selected_protocol.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(selected) = &s.selected_protocol {
                    vec![selected.clone()].encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                let protocols: Vec<ProtocolName> = read_non_empty(r, "ALProtocolNegotiation")?;
                if protocols
                    .iter()
                    .any(|p| p.as_ref().is_empty())
                {
                    return Err(PeerMisbehaved::OfferedEmptyApplicationProtocol.into());
                }
                c.protocols = Some(protocols);
                expect_empty_body(r, "ALProtocolNegotiation")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::ExtendedMasterSecret,
        messages: CH | SH12,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.extended_master_secret,
            build: |_, _| {},
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                s.extended_master_secret_ack = true;
                expect_empty_body(r, "ExtendedMasterSecret")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.extended_master_secret_ack,
            build: |_, _, _| {},
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.extended_master_secret = true;
                expect_empty_body(r, "ExtendedMasterSecret")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::SupportedVersions,
        messages: CH | SH13 | HRR,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.supported_versions.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(versions) = &c.supported_versions {
                    versions.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                s.selected_version = Some(ProtocolVersion::read(r)?);
                expect_empty_body(r, "SupportedVersions")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.selected_version.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(version) = s.selected_version {
                    version.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.supported_versions = Some(read_non_empty(r, "SupportedVersions")?);
                expect_empty_body(r, "SupportedVersions")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::Cookie,
        messages: CH | HRR,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.cookie.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(cookie) = &c.cookie {
                    PayloadU16::encode_slice(cookie, out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                let cookie = PayloadU16::read(r)?.0;
                if cookie.is_empty() {
                    return Err(InvalidMessage::IllegalEmptyList("Cookie").into());
                }
                s.cookie = Some(cookie);
                expect_empty_body(r, "Cookie")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.cookie.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(cookie) = &s.cookie {
                    PayloadU16::encode_slice(cookie, out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.cookie = Some(PayloadU16::read(r)?.0);
                expect_empty_body(r, "Cookie")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::PSKKeyExchangeModes,
        messages: CH,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.psk_modes.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(modes) = &c.psk_modes {
                    modes.encode(out);
                }
            },
            parse: |_, _, _| Err(PeerMisbehaved::UnsolicitedExtension.into()),
        },
        server: ServerRole {
            needs: |_, _| false,
            build: |_, _, _| {},
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.psk_modes = Some(read_non_empty(r, "PSKKeyExchangeModes")?);
                expect_empty_body(r, "PSKKeyExchangeModes")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::KeyShare,
        messages: CH | SH13 | HRR,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.key_shares.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(shares) = &c.key_shares {
                    shares.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, ctx, s: &mut ServerExtensions| -> Result<(), Error> {
                match ctx {
                    ExtensionContext::HelloRetryRequest => {
                        s.hrr_group = Some(NamedGroup::read(r)?);
                    }
                    _ => s.key_share = Some(KeyShareEntry::read(r)?),
                }
                expect_empty_body(r, "KeyShare")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, ctx| match ctx {
                ExtensionContext::HelloRetryRequest => s.hrr_group.is_some(),
                _ => s.key_share.is_some(),
            },
            build: |s: &ServerExtensions, ctx, out: &mut Vec<u8>| match (ctx, &s.key_share) {
                (ExtensionContext::HelloRetryRequest, _) => {
                    if let Some(group) = s.hrr_group {
                        group.encode(out);
                    }
                }
                (_, Some(share)) => share.encode(out),
                _ => {}
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                let shares = Vec::<KeyShareEntry>::read(r)?;
                let mut seen = HashSet::new();
                if !shares
                    .iter()
                    .all(|share| seen.insert(share.group))
                {
                    return Err(PeerMisbehaved::OfferedDuplicateKeyShares.into());
                }
                c.key_shares = Some(shares);
                expect_empty_body(r, "KeyShare")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::EarlyData,
        messages: CH | EE | NST,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.early_data,
            build: |_, _| {},
            parse: |r: &mut Reader<'_>, ctx, s: &mut ServerExtensions| -> Result<(), Error> {
                match ctx {
                    ExtensionContext::NewSessionTicket => {
                        s.max_early_data = Some(u32::read(r)?);
                    }
                    _ => s.early_data_ack = true,
                }
                expect_empty_body(r, "EarlyData")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, ctx| match ctx {
                ExtensionContext::NewSessionTicket => s.max_early_data.is_some(),
                _ => s.early_data_ack,
            },
            build: |s: &ServerExtensions, ctx, out: &mut Vec<u8>| {
                if let (ExtensionContext::NewSessionTicket, Some(max)) = (ctx, s.max_early_data) {
                    max.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.early_data = true;
                expect_empty_body(r, "EarlyData")
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::Padding,
        messages: CH,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.padding.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                out.resize(out.len() + c.padding.unwrap_or_default(), 0);
            },
            parse: |_, _, _| Err(PeerMisbehaved::UnsolicitedExtension.into()),
        },
        server: ServerRole {
            needs: |_, _| false,
            build: |_, _, _| {},
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                c.padding = Some(r.rest().len());
                Ok(())
            },
        },
    },
    ExtensionDescriptor {
        typ: ExtensionType::PreSharedKey,
        messages: CH | SH13,
        client: ClientRole {
            needs: |c: &ClientExtensions| c.preshared_key_offer.is_some(),
            build: |c: &ClientExtensions, out: &mut Vec<u8>| {
                if let Some(offer) = &c.preshared_key_offer {
                    offer.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, _, s: &mut ServerExtensions| -> Result<(), Error> {
                s.selected_psk = Some(u16::read(r)?);
                expect_empty_body(r, "PreSharedKey")
            },
        },
        server: ServerRole {
            needs: |s: &ServerExtensions, _| s.selected_psk.is_some(),
            build: |s: &ServerExtensions, _, out: &mut Vec<u8>| {
                if let Some(index) = s.selected_psk {
                    index.encode(out);
                }
            },
            parse: |r: &mut Reader<'_>, c: &mut ClientExtensions| -> Result<(), Error> {
                let offer = PresharedKeyOffer::read(r)?;
                if offer.identities.is_empty() {
                    return Err(InvalidMessage::IllegalEmptyList("PskIdentities").into());
                }
                if offer.identities.len() != offer.binders.len() {
                    return Err(PeerMisbehaved::PskExtensionWithMismatchedIdsAndBinders.into());
                }
                c.preshared_key_offer = Some(offer);
                expect_empty_body(r, "PreSharedKey")
            },
        },
    },
];

fn lookup(typ: ExtensionType) -> Option<&'static ExtensionDescriptor> {
    EXTENSIONS
        .iter()
        .find(|d| d.typ == typ)
}

/// Reject a message that carries any extension type more than once.
///
/// This runs over the whole block before any body is parsed.
fn check_duplicates(raw: &[RawExtension]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for ext in raw {
        if !seen.insert(ext.typ) {
            return Err(InvalidMessage::DuplicateExtension(u16::from(ext.typ)).into());
        }
    }
    Ok(())
}

fn envelope(typ: ExtensionType, build: impl FnOnce(&mut Vec<u8>)) -> RawExtension {
    let mut body = Vec::new();
    build(&mut body);
    RawExtension::new(typ, body)
}

/// Serialize the extensions of a ClientHello.
pub(crate) fn client_hello_extensions(exts: &ClientExtensions) -> Vec<RawExtension> {
    EXTENSIONS
        .iter()
        .filter(|d| d.allowed_in(ExtensionContext::ClientHello) && (d.client.needs)(exts))
        .map(|d| envelope(d.typ, |out| (d.client.build)(exts, out)))
        .collect()
}

/// Serialize the extensions a server sends in the message `ctx`.
pub(crate) fn server_extensions(exts: &ServerExtensions, ctx: ExtensionContext) -> Vec<RawExtension> {
    EXTENSIONS
        .iter()
        .filter(|d| d.allowed_in(ctx) && (d.server.needs)(exts, ctx))
        .map(|d| envelope(d.typ, |out| (d.server.build)(exts, ctx, out)))
        .collect()
}

/// Decode the extension block of a ClientHello.
///
/// Unknown extension types are ignored.  `pre_shared_key` must come last.
pub(crate) fn parse_client_hello(raw: &[RawExtension]) -> Result<ClientExtensions, Error> {
    check_duplicates(raw)?;

    if let Some(pos) = raw
        .iter()
        .position(|ext| ext.typ == ExtensionType::PreSharedKey)
    {
        if pos != raw.len() - 1 {
            return Err(InvalidMessage::PreSharedKeyIsNotFinalExtension.into());
        }
    }

    let mut exts = ClientExtensions::default();
    for ext in raw {
        let Some(desc) = lookup(ext.typ) else {
            trace!("ignoring unknown extension {:?}", ext.typ);
            continue;
        };

        let mut r = Reader::init(&ext.body);
        (desc.server.parse)(&mut r, &mut exts)?;
    }

    Ok(exts)
}

/// Decode the extensions of a server message.
///
/// `offered` lists the extension types our ClientHello carried: a server
/// may only answer those.  Within TLS1.3 messages, a known extension in a
/// message where it may not appear is an error even if offered.
pub(crate) fn parse_server_extensions(
    raw: &[RawExtension],
    ctx: ExtensionContext,
    offered: &[ExtensionType],
) -> Result<ServerExtensions, Error> {
    check_duplicates(raw)?;

    let mut exts = ServerExtensions::default();
    for ext in raw {
        let desc = match lookup(ext.typ) {
            Some(desc) => desc,
            None if ctx.ignores_unknown() => {
                trace!("ignoring unknown extension {:?} in {:?}", ext.typ, ctx);
                continue;
            }
            None => return Err(PeerMisbehaved::UnsolicitedExtension.into()),
        };

        if !desc.allowed_in(ctx) {
            return Err(match ctx {
                ExtensionContext::ServerHelloTls12 => PeerMisbehaved::UnsolicitedExtension,
                _ => PeerMisbehaved::ExtensionNotAllowedInMessage,
            }
            .into());
        }

        let answers_offer = matches!(
            ctx,
            ExtensionContext::CertificateRequest | ExtensionContext::NewSessionTicket
        ) || offered.contains(&ext.typ);
        if !answers_offer {
            return Err(PeerMisbehaved::UnsolicitedExtension.into());
        }

        let mut r = Reader::init(&ext.body);
        (desc.client.parse)(&mut r, ctx, &mut exts)?;
    }

    Ok(exts)
}

/// Digest of a ClientHello that is stable across a HelloRetryRequest.
///
/// A retried ClientHello may change its key shares, PSK binders and
/// identities' ages, early data indication, cookie and padding.  The
/// contents of those are left out; for `key_share` and `pre_shared_key`
/// the type is still covered, so adding or dropping them is detected.
pub(crate) fn client_hello_digest(
    ch: &ClientHelloPayload,
    hash: &'static dyn hash::Hash,
) -> hash::Output {
    let mut buf = Vec::new();
    ch.client_version.encode(&mut buf);
    ch.random.encode(&mut buf);
    ch.session_id.encode(&mut buf);
    ch.cipher_suites.encode(&mut buf);
    ch.compression_methods.encode(&mut buf);

    for ext in &ch.extensions {
        match ext.typ {
            ExtensionType::EarlyData | ExtensionType::Cookie | ExtensionType::Padding => {}
            ExtensionType::KeyShare | ExtensionType::PreSharedKey => ext.typ.encode(&mut buf),
            _ => ext.encode(&mut buf),
        }
    }

    hash.hash(&buf)
}

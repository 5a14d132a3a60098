//! # tls-engine
//!
//! A TLS protocol engine: the handshake state machines for TLS1.2 and
//! TLS1.3, the record layer that protects application data, and the
//! extension and cipher-suite negotiation that sits between them.
//!
//! The engine does no IO of its own.  A [`Connection`] is fed bytes read
//! from the transport with [`Connection::read_tls`], processes them with
//! [`Connection::process_new_packets`], and yields bytes to write back with
//! [`Connection::write_tls`].  Plaintext goes in and out through
//! [`Connection::writer`] and [`Connection::reader`].
//!
//! All cryptography is reached through a [`crypto::CryptoProvider`]; the
//! `rustcrypto` feature supplies one built on the RustCrypto crates.
//!
//! ## Crate features
//!
//! - `logging` (enabled by default): make the engine emit log output via
//!   the `log` crate.
//! - `rustcrypto` (enabled by default): build the RustCrypto-based
//!   provider in [`crypto::rustcrypto`].

#![forbid(unsafe_code, unused_must_use)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::use_self,
    trivial_casts,
    trivial_numeric_casts,
    missing_docs,
    unused_import_braces,
    unused_extern_crates,
    unused_qualifications
)]
// Relax these clippy lints:
// - too_many_arguments: some things just need a lot of state, wrapping it
//   doesn't necessarily make it easier to follow what's going on
// - new_ret_no_self: we sometimes return `Arc<Self>`, which seems fine
// - single_component_path_imports: our top-level `use log` import causes
//   a false positive, https://github.com/rust-lang/rust-clippy/issues/5210
// - new_without_default: for internal constructors, the indirection is not
//   helpful
#![allow(
    clippy::too_many_arguments,
    clippy::new_ret_no_self,
    clippy::single_component_path_imports,
    clippy::new_without_default
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// log for logging (optional).
#[cfg(feature = "logging")]
use log;

#[cfg(not(feature = "logging"))]
#[macro_use]
mod log {
    macro_rules! trace    ( ($($tt:tt)*) => {{}} );
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! warn     ( ($($tt:tt)*) => {{}} );
    macro_rules! error    ( ($($tt:tt)*) => {{}} );
}

#[macro_use]
mod msgs;
#[macro_use]
mod check;
mod conn;
pub mod crypto;
mod enums;
mod error;
mod extensions;
mod hash_hs;
mod key;
mod key_log;
mod limited_cache;
mod record_layer;
mod session;
mod suites;
mod tls12;
mod tls13;
mod vecbuf;
mod verify;

/// Internal classes which may be useful outside the library.
/// The contents of this section DO NOT form part of the stable interface.
pub mod internal {
    /// Low-level TLS message parsing and encoding functions.
    pub mod msgs {
        pub use crate::msgs::*;
    }
}

// The public interface is:
pub use crate::conn::{Connection, IoState, Reader, Side, Writer};
pub use crate::enums::{
    AlertDescription, CipherSuite, ContentType, HandshakeType, ProtocolVersion,
    SignatureAlgorithm, SignatureScheme,
};
pub use crate::error::{
    ApiMisuse, CertificateError, Error, InvalidMessage, PeerIncompatible, PeerMisbehaved,
};
pub use crate::key::{Certificate, PrivateKey, SubjectPublicKeyInfo};
pub use crate::key_log::{KeyLog, KeyLogFile, NoKeyLog};
pub use crate::msgs::enums::NamedGroup;
pub use crate::suites::{
    lookup as lookup_suite, AuthKind, BulkCipher, CipherSuiteCommon, KeyExchangeKind,
    PreferenceOwner, SuiteInfo, SupportedCipherSuite,
};
pub use crate::tls12::Tls12CipherSuite;
pub use crate::tls13::Tls13CipherSuite;
pub use crate::verify::{
    ClientCertVerified, ClientCertVerifier, NoClientAuth, PinnedCertVerifier, ServerCertVerified,
    ServerCertVerifier,
};

/// Items for use in a client.
pub mod client {
    mod client_conn;
    pub(super) mod handy;
    pub(crate) mod hs;
    mod tls12;
    mod tls13;

    pub use client_conn::{
        ClientConfig, ClientSessionStore, InvalidDnsNameError, ResolvesClientCert, ServerName,
    };
    pub use handy::{AlwaysResolvesClientCert, ClientSessionMemoryCache, NoClientSessionStorage};

    pub use crate::session::{Tls12ClientSessionValue, Tls13ClientSessionValue};
}

pub use client::{ClientConfig, ServerName};

/// Items for use in a server.
pub mod server {
    pub(crate) mod handy;
    pub(crate) mod hs;
    mod server_conn;
    mod tls12;
    mod tls13;

    pub use handy::{AlwaysResolvesChain, NoServerSessionStorage, ServerSessionMemoryCache};
    pub use server_conn::{ClientHello, ResolvesServerCert, ServerConfig, StoresServerSessions};

    pub use crate::session::ServerSessionValue;
}

pub use server::ServerConfig;

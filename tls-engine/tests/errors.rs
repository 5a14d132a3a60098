//! Malformed or hostile hellos, and the alerts they produce.
use std::cell::RefCell;

use tls_engine::crypto::rustcrypto::{self, SecP256r1};
use tls_engine::crypto::CryptoProvider;
use tls_engine::internal::msgs::enums::{Compression, ExtensionType};
use tls_engine::internal::msgs::handshake::RawExtension;
use tls_engine::internal::msgs::message::Message;
use tls_engine::{
    AlertDescription, CipherSuite, ClientConfig, Error, HandshakeType, InvalidMessage,
    PeerIncompatible, PeerMisbehaved, ProtocolVersion,
};

mod common;
use crate::common::*;

/// Run a handshake with the client's hello edited by `f`, and check the
/// server refuses it with `expected`, telling the client `alert`.
fn server_refuses_hello(
    client_config: ClientConfig,
    f: impl Fn(&mut tls_engine::internal::msgs::handshake::ClientHelloPayload),
    expected: Error,
    alert: AlertDescription,
) {
    let (mut client, mut server) =
        make_pair_for_configs(client_config, make_server_config(KeyType::Ecdsa));

    let result = do_handshake_altered(
        &mut client,
        |_| Altered::InPlace,
        |m| alter_client_hello(m, &f),
        &mut server,
    );
    assert_eq!(result, Err(ErrorFromPeer::Server(expected)));

    transfer(&mut server, &mut client);
    assert_eq!(
        client.process_new_packets().unwrap_err(),
        Error::AlertReceived(alert)
    );
}

fn tls12_client() -> ClientConfig {
    make_client_config_with_versions(KeyType::Ecdsa, &[ProtocolVersion::TLSv1_2])
}

#[test]
fn fallback_scsv_is_refused_by_tls13_server() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();

    server_refuses_hello(
        tls12_client(),
        |ch| {
            ch.cipher_suites
                .push(CipherSuite::TLS_FALLBACK_SCSV)
        },
        PeerMisbehaved::InappropriateFallback.into(),
        AlertDescription::InappropriateFallback,
    );
}

#[test]
fn fallback_scsv_is_fine_for_tls12_server() {
    let mut server_config = make_server_config(KeyType::Ecdsa);
    server_config.versions = vec![ProtocolVersion::TLSv1_2];
    let (mut client, mut server) = make_pair_for_configs(tls12_client(), server_config);

    // the altered hello never reaches the Finished check intact, so just
    // look at how the server reacts to it.
    transfer_altered(
        &mut client,
        |m| {
            alter_client_hello(m, |ch| {
                ch.cipher_suites
                    .push(CipherSuite::TLS_FALLBACK_SCSV)
            })
        },
        &mut server,
    );
    server.process_new_packets().unwrap();
    transfer(&mut server, &mut client);
    client.process_new_packets().unwrap();
}

#[test]
fn null_compression_is_required() {
    server_refuses_hello(
        make_client_config(KeyType::Ecdsa),
        |ch| ch.compression_methods = vec![Compression::Deflate, Compression::LSZ],
        PeerIncompatible::NullCompressionRequired.into(),
        AlertDescription::DecodeError,
    );
}

#[test]
fn empty_cipher_suites_are_illegal() {
    server_refuses_hello(
        make_client_config(KeyType::Ecdsa),
        |ch| ch.cipher_suites.clear(),
        PeerMisbehaved::OfferedEmptyCipherSuites.into(),
        AlertDescription::IllegalParameter,
    );
}

#[test]
fn duplicate_extensions_are_refused() {
    for client_config in [make_client_config(KeyType::Ecdsa), tls12_client()] {
        server_refuses_hello(
            client_config,
            |ch| {
                let dup = ch
                    .extensions
                    .iter()
                    .find(|ext| ext.typ == ExtensionType::EllipticCurves)
                    .cloned()
                    .unwrap();
                ch.extensions.insert(0, dup);
            },
            InvalidMessage::DuplicateExtension(u16::from(ExtensionType::EllipticCurves)).into(),
            AlertDescription::DecodeError,
        );
    }
}

#[test]
fn unknown_extension_type_duplicated_is_refused() {
    server_refuses_hello(
        make_client_config(KeyType::Ecdsa),
        |ch| {
            let unknown = RawExtension::new(ExtensionType::from(0xfafa), vec![]);
            ch.extensions.insert(0, unknown.clone());
            ch.extensions.insert(0, unknown);
        },
        InvalidMessage::DuplicateExtension(0xfafa).into(),
        AlertDescription::DecodeError,
    );
}

#[test]
fn tls13_hello_needs_signature_algorithms() {
    server_refuses_hello(
        make_client_config(KeyType::Ecdsa),
        |ch| {
            ch.extensions
                .retain(|ext| ext.typ != ExtensionType::SignatureAlgorithms)
        },
        PeerIncompatible::SignatureAlgorithmsExtensionRequired.into(),
        AlertDescription::MissingExtension,
    );
}

#[test]
fn versions_below_tls12_are_refused() {
    server_refuses_hello(
        make_client_config(KeyType::Ecdsa),
        |ch| {
            ch.client_version = ProtocolVersion::TLSv1_1;
            ch.extensions
                .retain(|ext| ext.typ != ExtensionType::SupportedVersions);
        },
        PeerIncompatible::Tls12NotOffered.into(),
        AlertDescription::ProtocolVersion,
    );
}

#[test]
fn initial_hello_with_nonempty_renegotiation_info_is_refused() {
    server_refuses_hello(
        tls12_client(),
        |ch| {
            ch.extensions
                .retain(|ext| ext.typ != ExtensionType::RenegotiationInfo);
            ch.extensions.insert(
                0,
                RawExtension::new(ExtensionType::RenegotiationInfo, vec![1, 0xaa]),
            );
        },
        PeerMisbehaved::InvalidRenegotiationInfo.into(),
        AlertDescription::HandshakeFailure,
    );
}

#[test]
fn downgrade_to_tls12_is_detected() {
    // a TLS1.3 client whose supported_versions gets lost on the way
    // ends up talking TLS1.2 to a TLS1.3 server.
    let (mut client, mut server) = make_pair(KeyType::Ecdsa);
    let result = do_handshake_altered(
        &mut client,
        |_| Altered::InPlace,
        |m| {
            alter_client_hello(m, |ch| {
                ch.extensions
                    .retain(|ext| ext.typ != ExtensionType::SupportedVersions)
            })
        },
        &mut server,
    );

    assert_eq!(
        result,
        Err(ErrorFromPeer::Client(
            PeerMisbehaved::AttemptedDowngradeToTls12WhenTls13IsSupported.into()
        ))
    );
}

fn p256_only_server() -> tls_engine::ServerConfig {
    make_server_config_with_provider(
        KeyType::Ecdsa,
        CryptoProvider {
            kx_groups: vec![&SecP256r1],
            ..rustcrypto::provider()
        },
    )
}

#[test]
fn hello_retry_request_then_handshake() {
    let (mut client, mut server) =
        make_pair_for_configs(make_client_config(KeyType::Ecdsa), p256_only_server());
    do_handshake(&mut client, &mut server);
    assert_eq!(client.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    send_and_receive(&mut client, &mut server, b"retried");
}

#[test]
fn second_hello_retry_request_is_illegal() {
    let (mut client, mut server) =
        make_pair_for_configs(make_client_config(KeyType::Ecdsa), p256_only_server());

    // replay the first HelloRetryRequest in place of the ServerHello.
    let hrr: RefCell<Option<Message>> = RefCell::new(None);
    let result = do_handshake_altered(
        &mut client,
        |m| {
            if m.is_handshake_type(HandshakeType::HelloRetryRequest) {
                *hrr.borrow_mut() = Some(m.clone());
            } else if m.is_handshake_type(HandshakeType::ServerHello) {
                if let Some(first) = hrr.borrow().clone() {
                    *m = first;
                }
            }
            Altered::InPlace
        },
        |_| Altered::InPlace,
        &mut server,
    );

    assert_eq!(
        result,
        Err(ErrorFromPeer::Client(
            PeerMisbehaved::SecondHelloRetryRequest.into()
        ))
    );
}

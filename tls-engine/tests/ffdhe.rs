//! Finite-field Diffie-Hellman: the DHE_RSA suites over the RFC7919 groups,
//! and how a server picks (or avoids) a group for them.
use tls_engine::crypto::rustcrypto::{
    self, SecP256r1, FFDHE2048, FFDHE3072, TLS13_AES_128_GCM_SHA256,
    TLS_DHE_RSA_WITH_AES_128_GCM_SHA256, TLS_DHE_RSA_WITH_AES_256_GCM_SHA384,
    TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256, TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
};
use tls_engine::crypto::{CryptoProvider, SupportedKxGroup};
use tls_engine::internal::msgs::codec::Codec;
use tls_engine::internal::msgs::enums::ExtensionType;
use tls_engine::internal::msgs::handshake::RawExtension;
use tls_engine::internal::msgs::message::Message;
use tls_engine::{
    CipherSuite, ClientConfig, NamedGroup, PeerMisbehaved, ProtocolVersion, ServerConfig,
    SupportedCipherSuite,
};

mod common;
use crate::common::*;

fn ffdhe_provider(
    suites: &[SupportedCipherSuite],
    groups: &[&'static dyn SupportedKxGroup],
) -> CryptoProvider {
    CryptoProvider {
        cipher_suites: suites.to_vec(),
        kx_groups: groups.to_vec(),
        ..rustcrypto::provider()
    }
}

fn tls12_client(provider: CryptoProvider) -> ClientConfig {
    let mut cfg = make_client_config_with_provider(KeyType::Rsa, provider);
    cfg.versions = vec![ProtocolVersion::TLSv1_2];
    cfg
}

fn tls12_server(provider: CryptoProvider) -> ServerConfig {
    let mut cfg = make_server_config_with_provider(KeyType::Rsa, provider);
    cfg.versions = vec![ProtocolVersion::TLSv1_2];
    cfg
}

fn replace_supported_groups(groups: Option<Vec<NamedGroup>>) -> impl Fn(&mut Message) -> Altered {
    move |m| {
        alter_client_hello(m, |ch| {
            ch.extensions
                .retain(|ext| ext.typ != ExtensionType::EllipticCurves);
            if let Some(groups) = &groups {
                ch.extensions.push(RawExtension::new(
                    ExtensionType::EllipticCurves,
                    groups.get_encoding(),
                ));
            }
        })
    }
}

#[test]
fn ffdhe_cipher_suites() {
    let _ = env_logger::builder()
        .is_test(true)
        .try_init();

    for suite in [
        TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
        TLS_DHE_RSA_WITH_AES_256_GCM_SHA384,
        TLS_DHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ] {
        for group in [&FFDHE2048 as &'static dyn SupportedKxGroup, &FFDHE3072] {
            let provider = || ffdhe_provider(&[suite], &[group]);
            let (mut client, mut server) =
                make_pair_for_configs(tls12_client(provider()), tls12_server(provider()));
            do_handshake(&mut client, &mut server);

            assert_eq!(
                client
                    .negotiated_cipher_suite()
                    .map(|s| s.suite()),
                Some(suite.suite())
            );
            send_and_receive(&mut client, &mut server, b"finite");
            send_and_receive(&mut server, &mut client, b"field");
        }
    }
}

#[test]
fn tls13_key_share_in_a_finite_field_group() {
    let provider = || ffdhe_provider(&[TLS13_AES_128_GCM_SHA256], &[&FFDHE2048]);
    let (mut client, mut server) = make_pair_for_configs(
        make_client_config_with_provider(KeyType::Rsa, provider()),
        make_server_config_with_provider(KeyType::Rsa, provider()),
    );
    do_handshake(&mut client, &mut server);
    assert_eq!(client.protocol_version(), Some(ProtocolVersion::TLSv1_3));
    send_and_receive(&mut client, &mut server, b"ffdhe");
}

#[test]
fn server_picks_ffdhe_group_when_clienthello_has_no_ffdhe_group_in_groups_ext() {
    let provider = || ffdhe_provider(&[TLS_DHE_RSA_WITH_AES_128_GCM_SHA256], &[&FFDHE2048]);
    let (mut client, mut server) =
        make_pair_for_configs(tls12_client(provider()), tls12_server(provider()));

    transfer_altered(
        &mut client,
        replace_supported_groups(Some(vec![NamedGroup::X25519])),
        &mut server,
    );
    server.process_new_packets().unwrap();
    assert_eq!(
        server
            .negotiated_cipher_suite()
            .map(|s| s.suite()),
        Some(CipherSuite::TLS_DHE_RSA_WITH_AES_128_GCM_SHA256)
    );
}

#[test]
fn server_picks_ffdhe_group_when_clienthello_has_no_groups_ext() {
    let provider = || ffdhe_provider(&[TLS_DHE_RSA_WITH_AES_128_GCM_SHA256], &[&FFDHE2048]);
    let (mut client, mut server) =
        make_pair_for_configs(tls12_client(provider()), tls12_server(provider()));

    transfer_altered(&mut client, replace_supported_groups(None), &mut server);
    server.process_new_packets().unwrap();
    assert_eq!(
        server
            .negotiated_cipher_suite()
            .map(|s| s.suite()),
        Some(CipherSuite::TLS_DHE_RSA_WITH_AES_128_GCM_SHA256)
    );
}

#[test]
fn server_avoids_dhe_cipher_suites_when_client_has_no_known_dhe_in_groups_ext() {
    let suites = [
        TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
        TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ];
    let client_config = tls12_client(ffdhe_provider(&suites, &[&FFDHE3072, &SecP256r1]));
    let server_config = tls12_server(ffdhe_provider(&suites, &[&FFDHE2048, &SecP256r1]));

    let (mut client, mut server) = make_pair_for_configs(client_config, server_config);
    do_handshake(&mut client, &mut server);
    assert_eq!(
        server
            .negotiated_cipher_suite()
            .map(|s| s.suite()),
        Some(CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256)
    );
}

#[test]
fn client_rejects_dh_parameters_for_a_group_it_did_not_configure() {
    let suites = [TLS_DHE_RSA_WITH_AES_128_GCM_SHA256];
    let client_config = tls12_client(ffdhe_provider(&suites, &[&FFDHE3072]));
    let server_config = tls12_server(ffdhe_provider(&suites, &[&FFDHE2048]));

    // without supported_groups the server takes the client for a legacy
    // one, and sends the only group it has.
    let (mut client, mut server) = make_pair_for_configs(client_config, server_config);
    let result = do_handshake_altered(
        &mut client,
        |_| Altered::InPlace,
        replace_supported_groups(None),
        &mut server,
    );
    assert_eq!(
        result,
        Err(ErrorFromPeer::Client(
            PeerMisbehaved::SelectedUnofferedKxGroup.into()
        ))
    );
}

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::client;
use crate::client::ServerName;
use crate::crypto::{CertifiedKey, SigningKey};
use crate::enums::SignatureScheme;
use crate::error::Error;
use crate::key::Certificate;
use crate::limited_cache;
use crate::msgs::enums::NamedGroup;
use crate::session::{Tls12ClientSessionValue, Tls13ClientSessionValue};

/// An implementer of `ClientSessionStore` which does nothing.
#[derive(Debug)]
pub struct NoClientSessionStorage;

impl client::ClientSessionStore for NoClientSessionStorage {
    fn set_kx_hint(&self, _: &ServerName, _: NamedGroup) {}

    fn kx_hint(&self, _: &ServerName) -> Option<NamedGroup> {
        None
    }

    fn set_tls12_session(&self, _: &ServerName, _: Tls12ClientSessionValue) {}

    fn tls12_session(&self, _: &ServerName) -> Option<Tls12ClientSessionValue> {
        None
    }

    fn remove_tls12_session(&self, _: &ServerName) {}

    fn insert_tls13_ticket(&self, _: &ServerName, _: Tls13ClientSessionValue) {}

    fn take_tls13_ticket(&self, _: &ServerName) -> Option<Tls13ClientSessionValue> {
        None
    }
}

const MAX_TLS13_TICKETS_PER_SERVER: usize = 8;

struct ServerData {
    kx_hint: Option<NamedGroup>,

    // Zero or one TLS1.2 sessions.
    tls12: Option<Tls12ClientSessionValue>,

    // Up to MAX_TLS13_TICKETS_PER_SERVER TLS1.3 tickets, oldest first.
    tls13: VecDeque<Tls13ClientSessionValue>,
}

impl Default for ServerData {
    fn default() -> Self {
        Self {
            kx_hint: None,
            tls12: None,
            tls13: VecDeque::with_capacity(MAX_TLS13_TICKETS_PER_SERVER),
        }
    }
}

/// An implementer of `ClientSessionStore` that stores everything
/// in memory.
///
/// It enforces a limit on the number of entries to bound memory usage.
/// A poisoned lock makes the cache behave as if it were empty.
pub struct ClientSessionMemoryCache {
    servers: Mutex<limited_cache::LimitedCache<ServerName, ServerData>>,
}

impl ClientSessionMemoryCache {
    /// Make a new ClientSessionMemoryCache.  `size` is the
    /// maximum number of stored sessions.
    pub fn new(size: usize) -> Self {
        let max_servers =
            size.saturating_add(MAX_TLS13_TICKETS_PER_SERVER - 1) / MAX_TLS13_TICKETS_PER_SERVER;
        Self {
            servers: Mutex::new(limited_cache::LimitedCache::new(max_servers)),
        }
    }
}

impl client::ClientSessionStore for ClientSessionMemoryCache {
    fn set_kx_hint(&self, server_name: &ServerName, group: NamedGroup) {
        let Ok(mut servers) = self.servers.lock() else {
            return;
        };
        servers.get_or_insert_default_and_edit(server_name.clone(), |data| {
            data.kx_hint = Some(group)
        });
    }

    fn kx_hint(&self, server_name: &ServerName) -> Option<NamedGroup> {
        let Ok(servers) = self.servers.lock() else {
            return None;
        };
        servers
            .get(server_name)
            .and_then(|sd| sd.kx_hint)
    }

    fn set_tls12_session(&self, server_name: &ServerName, value: Tls12ClientSessionValue) {
        let Ok(mut servers) = self.servers.lock() else {
            return;
        };
        servers.get_or_insert_default_and_edit(server_name.clone(), |data| {
            data.tls12 = Some(value)
        });
    }

    fn tls12_session(&self, server_name: &ServerName) -> Option<Tls12ClientSessionValue> {
        let Ok(servers) = self.servers.lock() else {
            return None;
        };
        servers
            .get(server_name)
            .and_then(|sd| sd.tls12.as_ref().cloned())
    }

    fn remove_tls12_session(&self, server_name: &ServerName) {
        let Ok(mut servers) = self.servers.lock() else {
            return;
        };
        servers
            .get_mut(server_name)
            .and_then(|data| data.tls12.take());
    }

    fn insert_tls13_ticket(&self, server_name: &ServerName, value: Tls13ClientSessionValue) {
        let Ok(mut servers) = self.servers.lock() else {
            return;
        };
        servers.get_or_insert_default_and_edit(server_name.clone(), |data| {
            if data.tls13.len() == MAX_TLS13_TICKETS_PER_SERVER {
                data.tls13.pop_front();
            }
            data.tls13.push_back(value);
        });
    }

    fn take_tls13_ticket(&self, server_name: &ServerName) -> Option<Tls13ClientSessionValue> {
        let Ok(mut servers) = self.servers.lock() else {
            return None;
        };
        servers
            .get_mut(server_name)
            .and_then(|data| data.tls13.pop_back())
    }
}

impl fmt::Debug for ClientSessionMemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Note: we omit self.servers as it may contain sensitive data.
        f.debug_struct("ClientSessionMemoryCache")
            .finish()
    }
}

#[derive(Debug)]
pub(super) struct FailResolveClientCert {}

impl client::ResolvesClientCert for FailResolveClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        None
    }

    fn has_certs(&self) -> bool {
        false
    }
}

/// Always offers the same certificate chain and key, whatever the server
/// asks for.
#[derive(Debug)]
pub struct AlwaysResolvesClientCert(Arc<CertifiedKey>);

impl AlwaysResolvesClientCert {
    /// Offer `chain` (end-entity first) backed by `private_key`.
    pub fn new(private_key: Arc<dyn SigningKey>, chain: Vec<Certificate>) -> Result<Self, Error> {
        let certified = CertifiedKey::new(chain, private_key);
        certified.end_entity_cert()?;
        Ok(Self(Arc::new(certified)))
    }
}

impl client::ResolvesClientCert for AlwaysResolvesClientCert {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[cfg(all(test, feature = "rustcrypto"))]
mod tests {
    use super::*;
    use crate::client::ClientSessionStore;
    use crate::crypto::rustcrypto;
    use crate::msgs::handshake::SessionId;

    fn name(s: &str) -> ServerName {
        ServerName::try_from(s).unwrap()
    }

    fn ticket(id: u8) -> Tls13ClientSessionValue {
        Tls13ClientSessionValue::new(
            rustcrypto::TLS13_AES_128_GCM_SHA256
                .tls13()
                .unwrap(),
            vec![id],
            &[0; 32],
            vec![],
            0,
            3600,
            0,
            0,
        )
    }

    #[test]
    fn test_noclientsessionstorage_does_nothing() {
        let c = NoClientSessionStorage {};
        let n = name("example.com");
        c.set_kx_hint(&n, NamedGroup::X25519);
        assert_eq!(None, c.kx_hint(&n));
        c.insert_tls13_ticket(&n, ticket(1));
        assert!(c.take_tls13_ticket(&n).is_none());
    }

    #[test]
    fn tls13_tickets_are_taken_newest_first() {
        let c = ClientSessionMemoryCache::new(32);
        let n = name("example.com");
        for id in 0..10 {
            c.insert_tls13_ticket(&n, ticket(id));
        }

        // only the newest eight are kept
        let mut taken = Vec::new();
        while let Some(t) = c.take_tls13_ticket(&n) {
            taken.push(t.ticket()[0]);
        }
        assert_eq!(taken, vec![9, 8, 7, 6, 5, 4, 3, 2]);
    }

    #[test]
    fn tls12_session_and_kx_hint() {
        let c = ClientSessionMemoryCache::new(32);
        let n = name("example.com");
        assert!(c.tls12_session(&n).is_none());

        c.set_kx_hint(&n, NamedGroup::secp256r1);
        let suite = rustcrypto::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            .tls12()
            .unwrap();
        c.set_tls12_session(
            &n,
            Tls12ClientSessionValue::new(
                suite,
                SessionId::empty(),
                vec![1],
                &[0; 48],
                vec![],
                0,
                3600,
                true,
            ),
        );

        assert_eq!(c.kx_hint(&n), Some(NamedGroup::secp256r1));
        assert!(c.tls12_session(&n).is_some());
        c.remove_tls12_session(&n);
        assert!(c.tls12_session(&n).is_none());
        assert_eq!(c.kx_hint(&n), Some(NamedGroup::secp256r1));
    }
}

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::crypto::{CertifiedKey, SigningKey};
use crate::error::Error;
use crate::key::Certificate;
use crate::limited_cache;
use crate::server;
use crate::server::ClientHello;
use crate::session::ServerSessionValue;

/// Something which never stores sessions.
#[derive(Debug)]
pub struct NoServerSessionStorage {}

impl server::StoresServerSessions for NoServerSessionStorage {
    fn put(&self, _id: Vec<u8>, _sec: ServerSessionValue) -> bool {
        false
    }
    fn get(&self, _id: &[u8]) -> Option<ServerSessionValue> {
        None
    }
    fn take(&self, _id: &[u8]) -> Option<ServerSessionValue> {
        None
    }
    fn can_cache(&self) -> bool {
        false
    }
}

/// An implementer of `StoresServerSessions` that stores everything
/// in memory.  If enforces a limit on the number of stored sessions
/// to bound memory usage.
///
/// A poisoned lock makes the cache behave as if it were empty.
pub struct ServerSessionMemoryCache {
    cache: Mutex<limited_cache::LimitedCache<Vec<u8>, ServerSessionValue>>,
}

impl ServerSessionMemoryCache {
    /// Make a new ServerSessionMemoryCache.  `size` is the maximum
    /// number of stored sessions, and may be rounded-up for
    /// efficiency.
    pub fn new(size: usize) -> Self {
        Self {
            cache: Mutex::new(limited_cache::LimitedCache::new(size)),
        }
    }
}

impl server::StoresServerSessions for ServerSessionMemoryCache {
    fn put(&self, key: Vec<u8>, value: ServerSessionValue) -> bool {
        let Ok(mut cache) = self.cache.lock() else {
            return false;
        };
        cache.insert(key, value);
        true
    }

    fn get(&self, key: &[u8]) -> Option<ServerSessionValue> {
        let Ok(cache) = self.cache.lock() else {
            return None;
        };
        cache.get(key).cloned()
    }

    fn take(&self, key: &[u8]) -> Option<ServerSessionValue> {
        let Ok(mut cache) = self.cache.lock() else {
            return None;
        };
        cache.remove(key)
    }

    fn can_cache(&self) -> bool {
        true
    }
}

impl fmt::Debug for ServerSessionMemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Note: we omit self.cache as it may contain sensitive data.
        f.debug_struct("ServerSessionMemoryCache")
            .finish()
    }
}

/// Something which always resolves to the same cert chain.
#[derive(Debug)]
pub struct AlwaysResolvesChain(Arc<CertifiedKey>);

impl AlwaysResolvesChain {
    /// Offer `chain` (end-entity first) backed by `private_key`.
    pub fn new(private_key: Arc<dyn SigningKey>, chain: Vec<Certificate>) -> Result<Self, Error> {
        let certified = CertifiedKey::new(chain, private_key);
        certified.end_entity_cert()?;
        Ok(Self(Arc::new(certified)))
    }

    /// Like [`AlwaysResolvesChain::new`].
    ///
    /// If non-empty, the given OCSP response is stapled for clients that
    /// ask for one.
    pub fn new_with_extras(
        private_key: Arc<dyn SigningKey>,
        chain: Vec<Certificate>,
        ocsp: Vec<u8>,
    ) -> Result<Self, Error> {
        let mut r = Self::new(private_key, chain)?;

        if !ocsp.is_empty() {
            Arc::make_mut(&mut r.0).ocsp = Some(ocsp);
        }

        Ok(r)
    }
}

impl server::ResolvesServerCert for AlwaysResolvesChain {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::CipherSuite;
    use crate::server::StoresServerSessions;
    use crate::session::{CommonServerSessionValue, Tls12ServerSessionValue};

    fn session(marker: u8) -> ServerSessionValue {
        let common = CommonServerSessionValue::new(
            None,
            CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            None,
            None,
            0,
        );
        Tls12ServerSessionValue::new(common, &[marker; 48], true).into()
    }

    fn marker(value: &ServerSessionValue) -> u8 {
        match value {
            ServerSessionValue::Tls12(v) => v.master_secret[0],
            ServerSessionValue::Tls13(v) => v.secret[0],
        }
    }

    #[test]
    fn test_noserversessionstorage_drops_put() {
        let c = NoServerSessionStorage {};
        assert!(!c.put(vec![0x01], session(1)));
    }

    #[test]
    fn test_noserversessionstorage_denies_gets() {
        let c = NoServerSessionStorage {};
        c.put(vec![0x01], session(1));
        assert_eq!(c.get(&[]).map(|v| marker(&v)), None);
        assert!(c.get(&[0x01]).is_none());
        assert!(!c.can_cache());
    }

    #[test]
    fn test_noserversessionstorage_denies_takes() {
        let c = NoServerSessionStorage {};
        assert!(c.take(&[0x01]).is_none());
    }

    #[test]
    fn test_serversessionmemorycache_persists_put() {
        let c = ServerSessionMemoryCache::new(4);
        assert!(c.put(vec![0x01], session(1)));
        assert_eq!(c.get(&[0x01]).map(|v| marker(&v)), Some(1));
        assert_eq!(c.get(&[0x01]).map(|v| marker(&v)), Some(1));
    }

    #[test]
    fn test_serversessionmemorycache_overwrites_put() {
        let c = ServerSessionMemoryCache::new(4);
        assert!(c.put(vec![0x01], session(1)));
        assert!(c.put(vec![0x01], session(2)));
        assert_eq!(c.get(&[0x01]).map(|v| marker(&v)), Some(2));
    }

    #[test]
    fn test_serversessionmemorycache_take_deletes() {
        let c = ServerSessionMemoryCache::new(4);
        c.put(vec![0x01], session(1));
        assert_eq!(c.take(&[0x01]).map(|v| marker(&v)), Some(1));
        assert!(c.take(&[0x01]).is_none());

        c.put(vec![0x02], session(2));
        c.remove(&[0x02]);
        assert!(c.get(&[0x02]).is_none());
    }

    #[test]
    fn test_serversessionmemorycache_drops_to_maintain_size_invariant() {
        let c = ServerSessionMemoryCache::new(2);
        assert!(c.put(vec![0x01], session(1)));
        assert!(c.put(vec![0x02], session(2)));
        assert!(c.put(vec![0x03], session(3)));
        assert!(c.put(vec![0x04], session(4)));
        assert!(c.put(vec![0x05], session(5)));

        let count = [0x01u8, 0x02, 0x03, 0x04, 0x05]
            .iter()
            .filter(|k| c.get(&[**k]).is_some())
            .count();
        assert!(count < 5);
        assert!(c.get(&[0x05]).is_some());
    }
}

use std::cmp;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use crate::enums::{CipherSuite, ProtocolVersion};
use crate::key::Certificate;
use crate::msgs::handshake::SessionId;
use crate::tls12::Tls12CipherSuite;
use crate::tls13::Tls13CipherSuite;

/// Seconds since the Unix epoch, now.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

static MAX_TICKET_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Clock skew tolerated when judging a ticket's obfuscated age.
const MAX_FRESHNESS_SKEW_MS: u32 = 60 * 1000;

/// A stored value along with the time it was looked up.
pub(crate) struct Retrieved<T> {
    pub(crate) value: T,
    retrieved_at: u64,
}

impl<T> Retrieved<T> {
    pub(crate) fn new(value: T, retrieved_at: u64) -> Self {
        Self {
            value,
            retrieved_at,
        }
    }

    pub(crate) fn map<M>(&self, f: impl FnOnce(&T) -> Option<&M>) -> Option<Retrieved<&M>> {
        Some(Retrieved {
            value: f(&self.value)?,
            retrieved_at: self.retrieved_at,
        })
    }
}

impl Retrieved<&Tls13ClientSessionValue> {
    pub(crate) fn obfuscated_ticket_age(&self) -> u32 {
        let age_secs = self
            .retrieved_at
            .saturating_sub(self.value.common.epoch);
        let age_millis = (age_secs as u32).wrapping_mul(1000);
        age_millis.wrapping_add(self.value.age_add)
    }
}

impl<T: std::ops::Deref<Target = ClientSessionCommon>> Retrieved<&T> {
    pub(crate) fn has_expired(&self) -> bool {
        let common: &ClientSessionCommon = self.value;
        common.lifetime != Duration::ZERO
            && common
                .epoch
                .saturating_add(common.lifetime.as_secs())
                < self.retrieved_at
    }
}

impl<T> std::ops::Deref for Retrieved<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// What a client remembers about a server between connections: the ticket
/// (or session id), when it was issued, and the server's certificates.
#[derive(Debug, Clone)]
pub struct ClientSessionCommon {
    ticket: Vec<u8>,
    epoch: u64,
    lifetime: Duration,
    server_cert_chain: Vec<Certificate>,
}

impl ClientSessionCommon {
    fn new(
        ticket: Vec<u8>,
        time_now: u64,
        lifetime: Duration,
        server_cert_chain: Vec<Certificate>,
    ) -> Self {
        Self {
            ticket,
            epoch: time_now,
            lifetime: cmp::min(lifetime, MAX_TICKET_LIFETIME),
            server_cert_chain,
        }
    }

    pub(crate) fn server_cert_chain(&self) -> &[Certificate] {
        &self.server_cert_chain
    }

    pub(crate) fn ticket(&self) -> &[u8] {
        &self.ticket
    }
}

/// A TLS1.3 ticket, as kept by a client.
#[derive(Debug)]
pub struct Tls13ClientSessionValue {
    suite: &'static Tls13CipherSuite,
    secret: Zeroizing<Vec<u8>>,
    age_add: u32,
    max_early_data_size: u32,
    pub(crate) common: ClientSessionCommon,
}

impl Tls13ClientSessionValue {
    pub(crate) fn new(
        suite: &'static Tls13CipherSuite,
        ticket: Vec<u8>,
        secret: &[u8],
        server_cert_chain: Vec<Certificate>,
        time_now: u64,
        lifetime_secs: u32,
        age_add: u32,
        max_early_data_size: u32,
    ) -> Self {
        Self {
            suite,
            secret: Zeroizing::new(secret.to_vec()),
            age_add,
            max_early_data_size,
            common: ClientSessionCommon::new(
                ticket,
                time_now,
                Duration::from_secs(u64::from(lifetime_secs)),
                server_cert_chain,
            ),
        }
    }

    pub(crate) fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// The most early data the server said it would accept under this ticket.
    pub fn max_early_data_size(&self) -> u32 {
        self.max_early_data_size
    }

    /// The suite this ticket was issued under.
    pub fn suite(&self) -> &'static Tls13CipherSuite {
        self.suite
    }

    /// Make the session look `delta` seconds older.
    #[doc(hidden)]
    pub fn rewind_epoch(&mut self, delta: u32) {
        self.common.epoch -= u64::from(delta);
    }
}

impl std::ops::Deref for Tls13ClientSessionValue {
    type Target = ClientSessionCommon;

    fn deref(&self) -> &Self::Target {
        &self.common
    }
}

/// A TLS1.2 session, as kept by a client.
///
/// The ticket is empty when the server did not issue one; the session
/// id is then what resumes it.
#[derive(Debug, Clone)]
pub struct Tls12ClientSessionValue {
    suite: &'static Tls12CipherSuite,
    pub(crate) session_id: SessionId,
    master_secret: Zeroizing<[u8; 48]>,
    extended_ms: bool,
    pub(crate) common: ClientSessionCommon,
}

impl Tls12ClientSessionValue {
    pub(crate) fn new(
        suite: &'static Tls12CipherSuite,
        session_id: SessionId,
        ticket: Vec<u8>,
        master_secret: &[u8; 48],
        server_cert_chain: Vec<Certificate>,
        time_now: u64,
        lifetime_secs: u32,
        extended_ms: bool,
    ) -> Self {
        Self {
            suite,
            session_id,
            master_secret: Zeroizing::new(*master_secret),
            extended_ms,
            common: ClientSessionCommon::new(
                ticket,
                time_now,
                Duration::from_secs(u64::from(lifetime_secs)),
                server_cert_chain,
            ),
        }
    }

    pub(crate) fn master_secret(&self) -> &[u8; 48] {
        &self.master_secret
    }

    pub(crate) fn extended_ms(&self) -> bool {
        self.extended_ms
    }

    /// The suite this session was established with.
    pub fn suite(&self) -> &'static Tls12CipherSuite {
        self.suite
    }

    /// Make the session look `delta` seconds older.
    #[doc(hidden)]
    pub fn rewind_epoch(&mut self, delta: u32) {
        self.common.epoch -= u64::from(delta);
    }
}

impl std::ops::Deref for Tls12ClientSessionValue {
    type Target = ClientSessionCommon;

    fn deref(&self) -> &Self::Target {
        &self.common
    }
}

/// Either kind of client session.
pub(crate) enum ClientSessionValue {
    Tls13(Tls13ClientSessionValue),
    Tls12(Tls12ClientSessionValue),
}

impl ClientSessionValue {
    pub(crate) fn tls13(&self) -> Option<&Tls13ClientSessionValue> {
        match self {
            Self::Tls13(v) => Some(v),
            Self::Tls12(_) => None,
        }
    }

    pub(crate) fn tls12(&self) -> Option<&Tls12ClientSessionValue> {
        match self {
            Self::Tls12(v) => Some(v),
            Self::Tls13(_) => None,
        }
    }
}

impl std::ops::Deref for ClientSessionValue {
    type Target = ClientSessionCommon;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Tls13(v) => &v.common,
            Self::Tls12(v) => &v.common,
        }
    }
}

// server side

/// Facts about a resumable session that both versions record.
#[derive(Debug, Clone)]
pub struct CommonServerSessionValue {
    pub(crate) sni: Option<String>,
    pub(crate) cipher_suite: CipherSuite,
    pub(crate) client_cert_chain: Option<Vec<Certificate>>,
    pub(crate) alpn: Option<Vec<u8>>,
    pub(crate) creation_time_sec: u64,
}

impl CommonServerSessionValue {
    pub(crate) fn new(
        sni: Option<&str>,
        cipher_suite: CipherSuite,
        client_cert_chain: Option<Vec<Certificate>>,
        alpn: Option<Vec<u8>>,
        creation_time_sec: u64,
    ) -> Self {
        Self {
            sni: sni.map(str::to_owned),
            cipher_suite,
            client_cert_chain,
            alpn,
            creation_time_sec,
        }
    }
}

/// A session a server may resume, keyed by session id or ticket.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ServerSessionValue {
    /// Resumable with a TLS1.2 abbreviated handshake.
    Tls12(Tls12ServerSessionValue),
    /// Resumable with a TLS1.3 PSK handshake.
    Tls13(Tls13ServerSessionValue),
}

impl ServerSessionValue {
    /// The protocol version the session belongs to.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::Tls12(_) => ProtocolVersion::TLSv1_2,
            Self::Tls13(_) => ProtocolVersion::TLSv1_3,
        }
    }

    pub(crate) fn common(&self) -> &CommonServerSessionValue {
        match self {
            Self::Tls12(v) => &v.common,
            Self::Tls13(v) => &v.common,
        }
    }
}

/// A TLS1.2 session, as kept by a server.
#[derive(Debug, Clone)]
pub struct Tls12ServerSessionValue {
    pub(crate) common: CommonServerSessionValue,
    pub(crate) master_secret: Zeroizing<[u8; 48]>,
    pub(crate) extended_ms: bool,
}

impl Tls12ServerSessionValue {
    pub(crate) fn new(
        common: CommonServerSessionValue,
        master_secret: &[u8; 48],
        extended_ms: bool,
    ) -> Self {
        Self {
            common,
            master_secret: Zeroizing::new(*master_secret),
            extended_ms,
        }
    }
}

impl From<Tls12ServerSessionValue> for ServerSessionValue {
    fn from(value: Tls12ServerSessionValue) -> Self {
        Self::Tls12(value)
    }
}

/// A TLS1.3 ticket, as kept by a server.
#[derive(Debug, Clone)]
pub struct Tls13ServerSessionValue {
    pub(crate) common: CommonServerSessionValue,
    pub(crate) secret: Zeroizing<Vec<u8>>,
    pub(crate) age_obfuscation_offset: u32,
    pub(crate) lifetime_secs: u32,
}

impl Tls13ServerSessionValue {
    pub(crate) fn new(
        common: CommonServerSessionValue,
        secret: &[u8],
        age_obfuscation_offset: u32,
        lifetime_secs: u32,
    ) -> Self {
        Self {
            common,
            secret: Zeroizing::new(secret.to_vec()),
            age_obfuscation_offset,
            lifetime_secs,
        }
    }

    /// Whether the ticket age the client claims is close to what we
    /// believe, and the ticket has not outlived its lifetime.
    pub(crate) fn is_fresh(&self, obfuscated_client_age_ms: u32, time_now: u64) -> bool {
        let server_age_secs = time_now.saturating_sub(self.common.creation_time_sec);
        if server_age_secs > u64::from(self.lifetime_secs) {
            return false;
        }

        let client_age_ms = obfuscated_client_age_ms.wrapping_sub(self.age_obfuscation_offset);
        let server_age_ms = (server_age_secs as u32).saturating_mul(1000);
        server_age_ms.abs_diff(client_age_ms) <= MAX_FRESHNESS_SKEW_MS
    }
}

impl From<Tls13ServerSessionValue> for ServerSessionValue {
    fn from(value: Tls13ServerSessionValue) -> Self {
        Self::Tls13(value)
    }
}

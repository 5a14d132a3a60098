//! The handshake transcript.
//!
//! Until a cipher suite is chosen the hash function is unknown, so the
//! transcript starts life as a plain byte log ([`HandshakeHashBuffer`]) and
//! becomes a running hash ([`HandshakeHash`]) once it is.  A TLS1.2
//! CertificateVerify signs the whole transcript rather than its hash, so
//! while client auth remains possible the raw bytes are kept as well.

use std::mem;

use crate::crypto::hash;
use crate::msgs::codec::Codec;
use crate::msgs::handshake::HandshakeMessagePayload;
use crate::msgs::message::{Message, MessagePayload};

/// Whether the raw transcript is still being recorded for a TLS1.2
/// CertificateVerify.
enum ClientAuthLog {
    NotNeeded,
    Recording(Vec<u8>),
}

impl ClientAuthLog {
    fn record(&mut self, bytes: &[u8]) {
        if let Self::Recording(log) = self {
            log.extend_from_slice(bytes);
        }
    }
}

fn handshake_bytes(m: &Message) -> Option<&[u8]> {
    match &m.payload {
        MessagePayload::Handshake { encoded, .. } => Some(&encoded.0),
        _ => None,
    }
}

/// The transcript before its hash function is known.
pub(crate) struct HandshakeHashBuffer {
    bytes: Vec<u8>,
    keep_for_client_auth: bool,
}

impl HandshakeHashBuffer {
    pub(crate) fn new() -> Self {
        Self {
            bytes: Vec::new(),
            keep_for_client_auth: false,
        }
    }

    /// Keep the raw transcript after hashing starts.
    pub(crate) fn set_client_auth_enabled(&mut self) {
        self.keep_for_client_auth = true;
    }

    pub(crate) fn add_message(&mut self, m: &Message) {
        if let Some(bytes) = handshake_bytes(m) {
            self.bytes.extend_from_slice(bytes);
        }
    }

    /// The hash of everything so far followed by `extra`, using `provider`.
    /// Used for PSK binders, which are computed before a suite is agreed.
    pub(crate) fn get_hash_given(
        &self,
        provider: &'static dyn hash::Hash,
        extra: &[u8],
    ) -> hash::Output {
        let mut ctx = provider.start();
        ctx.update(&self.bytes);
        ctx.update(extra);
        ctx.finish()
    }

    /// Switch to a running hash with `provider`.
    pub(crate) fn start_hash(self, provider: &'static dyn hash::Hash) -> HandshakeHash {
        let mut ctx = provider.start();
        ctx.update(&self.bytes);
        let client_auth = match self.keep_for_client_auth {
            true => ClientAuthLog::Recording(self.bytes),
            false => ClientAuthLog::NotNeeded,
        };

        HandshakeHash {
            provider,
            ctx,
            client_auth,
        }
    }
}

/// The running transcript hash of a handshake whose suite is known.
pub(crate) struct HandshakeHash {
    provider: &'static dyn hash::Hash,
    ctx: Box<dyn hash::Context>,
    client_auth: ClientAuthLog,
}

impl HandshakeHash {
    /// Client auth will not happen; stop recording.
    pub(crate) fn abandon_client_auth(&mut self) {
        self.client_auth = ClientAuthLog::NotNeeded;
    }

    pub(crate) fn add_message(&mut self, m: &Message) -> &mut Self {
        if let Some(bytes) = handshake_bytes(m) {
            self.update_raw(bytes);
        }
        self
    }

    fn update_raw(&mut self, bytes: &[u8]) {
        self.ctx.update(bytes);
        self.client_auth.record(bytes);
    }

    /// The hash of the transcript followed by `extra`, leaving the
    /// transcript itself alone.
    pub(crate) fn get_hash_given(&self, extra: &[u8]) -> hash::Output {
        let mut ctx = self.ctx.fork();
        ctx.update(extra);
        ctx.finish()
    }

    /// After a HelloRetryRequest the transcript so far is replaced by a
    /// synthetic `message_hash` message carrying its hash (RFC8446 4.4.1).
    pub(crate) fn rollup_for_hrr(&mut self) {
        let previous = mem::replace(&mut self.ctx, self.provider.start()).finish();
        let synthetic = HandshakeMessagePayload::build_handshake_hash(previous.as_ref());
        self.update_raw(&synthetic.get_encoding());
    }

    pub(crate) fn get_current_hash(&self) -> hash::Output {
        self.ctx.fork_finish()
    }

    /// The raw transcript for a TLS1.2 CertificateVerify, if it was kept.
    /// Only available once.
    pub(crate) fn take_handshake_buf(&mut self) -> Option<Vec<u8>> {
        match mem::replace(&mut self.client_auth, ClientAuthLog::NotNeeded) {
            ClientAuthLog::Recording(log) => Some(log),
            ClientAuthLog::NotNeeded => None,
        }
    }
}

use std::io;
use std::sync::Arc;

use crate::client::{ClientConfig, ServerName};
use crate::enums::{AlertDescription, ContentType, ProtocolVersion};
use crate::error::{ApiMisuse, Error, InvalidMessage, PeerMisbehaved};
use crate::key::Certificate;
#[cfg(feature = "logging")]
use crate::log::{debug, error, trace, warn};
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::base::Payload;
use crate::msgs::deframer::MessageDeframer;
use crate::msgs::enums::AlertLevel;
use crate::msgs::fragmenter::MessageFragmenter;
use crate::msgs::handshake::Random;
use crate::msgs::hsjoiner::HandshakeJoiner;
use crate::msgs::message::{BorrowedPlainMessage, Message, MessagePayload, OpaqueMessage, PlainMessage};
use crate::record_layer::{Decrypted, RecordLayer};
use crate::server::ServerConfig;
use crate::suites::SupportedCipherSuite;
use crate::vecbuf::BufferQueue;

/// Which end of a connection we are.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Sends the first ClientHello.
    Client,
    /// Answers one.
    Server,
}

impl Side {
    pub(crate) fn peer(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

/// The two hello randoms of a connection.
#[derive(Clone, Copy)]
pub(crate) struct ConnectionRandoms {
    pub(crate) client: [u8; 32],
    pub(crate) server: [u8; 32],
}

impl ConnectionRandoms {
    pub(crate) fn new(client: Random, server: Random) -> Self {
        Self {
            client: client.0,
            server: server.0,
        }
    }
}

/// Buffer levels after [`Connection::process_new_packets`].
#[derive(Debug, Eq, PartialEq)]
pub struct IoState {
    tls_bytes_to_write: usize,
    plaintext_bytes_to_read: usize,
    peer_has_closed: bool,
}

impl IoState {
    /// Bytes queued for [`Connection::write_tls`]. Nonzero exactly when
    /// [`Connection::wants_write`] holds.
    pub fn tls_bytes_to_write(&self) -> usize {
        self.tls_bytes_to_write
    }

    /// Decrypted bytes ready in [`Connection::reader`].
    pub fn plaintext_bytes_to_read(&self) -> usize {
        self.plaintext_bytes_to_read
    }

    /// The peer sent close_notify: its direction is finished, and the
    /// reader reports EOF once drained. Ours stays open.
    pub fn peer_has_closed(&self) -> bool {
        self.peer_has_closed
    }
}

/// Plaintext received from the peer, as [`std::io::Read`].
pub struct Reader<'a> {
    common: &'a mut CommonState,
}

impl io::Read for Reader<'_> {
    /// `Ok(0)` only after close_notify and with nothing left buffered.
    /// An empty buffer before that is [`io::ErrorKind::WouldBlock`].
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.common.received_plaintext.read(buf)?;

        if len == 0 && !buf.is_empty() && !self.common.has_received_close_notify {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        Ok(len)
    }
}

/// Plaintext for the peer, as [`std::io::Write`].
pub struct Writer<'a> {
    conn: &'a mut Connection,
}

impl io::Write for Writer<'_> {
    /// Protect `buf` into records for [`Connection::write_tls`]. Before
    /// the handshake finishes the bytes wait in a buffer instead, and go
    /// out as soon as traffic keys exist.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.conn.send_plaintext(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One step of a handshake, or the traffic stage that follows it.
///
/// Each state consumes the next message and returns its successor; both
/// sides' machines are made of these.
pub(crate) trait State: Send + Sync {
    fn handle(self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError;

    fn export_keying_material(
        &self,
        _output: &mut [u8],
        _label: &[u8],
        _context: Option<&[u8]>,
    ) -> Result<(), Error> {
        Err(Error::HandshakeNotComplete)
    }

    fn send_key_update(&mut self, _common: &mut CommonState) -> Result<(), Error> {
        Err(ApiMisuse::KeyUpdateNotAvailable.into())
    }

    /// Client only: begin a new handshake under the current keys.
    fn renegotiate(&mut self, _common: &mut CommonState) -> NextStateOrError {
        Err(ApiMisuse::RenegotiationNotAvailable.into())
    }

    /// Server only: send a HelloRequest.
    fn request_renegotiation(&mut self, _common: &mut CommonState) -> Result<(), Error> {
        Err(ApiMisuse::RenegotiationNotAvailable.into())
    }
}

pub(crate) type NextState = Box<dyn State>;
pub(crate) type NextStateOrError = Result<NextState, Error>;

/// Connection state shared by both sides, and by every handshake state.
pub(crate) struct CommonState {
    pub(crate) side: Side,
    pub(crate) negotiated_version: Option<ProtocolVersion>,
    pub(crate) suite: Option<SupportedCipherSuite>,
    pub(crate) alpn_protocol: Option<Vec<u8>>,
    pub(crate) peer_certificates: Option<Vec<Certificate>>,
    pub(crate) record_layer: RecordLayer,
    pub(crate) message_fragmenter: MessageFragmenter,
    pub(crate) may_send_application_data: bool,
    pub(crate) may_receive_application_data: bool,
    has_received_close_notify: bool,
    has_sent_close_notify: bool,
    has_seen_eof: bool,
    sent_fatal_alert: bool,
    received_middlebox_ccs: bool,
    deframer: MessageDeframer,
    handshake_joiner: HandshakeJoiner,
    received_plaintext: BufferQueue,
    sendable_plaintext: BufferQueue,
    sendable_tls: BufferQueue,
    error: Option<Error>,
}

const DEFAULT_RECEIVED_PLAINTEXT_LIMIT: usize = 16 * 1024;
const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

impl CommonState {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            negotiated_version: None,
            suite: None,
            alpn_protocol: None,
            peer_certificates: None,
            record_layer: RecordLayer::new(),
            message_fragmenter: MessageFragmenter::default(),
            may_send_application_data: false,
            may_receive_application_data: false,
            has_received_close_notify: false,
            has_sent_close_notify: false,
            has_seen_eof: false,
            sent_fatal_alert: false,
            received_middlebox_ccs: false,
            deframer: MessageDeframer::new(),
            handshake_joiner: HandshakeJoiner::new(),
            received_plaintext: BufferQueue::new(Some(DEFAULT_RECEIVED_PLAINTEXT_LIMIT)),
            sendable_plaintext: BufferQueue::new(Some(DEFAULT_BUFFER_LIMIT)),
            sendable_tls: BufferQueue::new(Some(DEFAULT_BUFFER_LIMIT)),
            error: None,
        }
    }

    pub(crate) fn is_tls13(&self) -> bool {
        matches!(self.negotiated_version, Some(ProtocolVersion::TLSv1_3))
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        !(self.may_send_application_data && self.may_receive_application_data)
    }

    /// Fail if a handshake message was split across a change of keys.
    pub(crate) fn check_aligned_handshake(&self) -> Result<(), Error> {
        if !self.handshake_joiner.is_empty() || !self.handshake_joiner.frames.is_empty() {
            Err(PeerMisbehaved::KeyEpochWithPendingFragment.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn take_received_plaintext(&mut self, bytes: Payload) {
        self.received_plaintext.enqueue(bytes.0);
    }

    /// Split `m` into records and queue them, protected or not.
    pub(crate) fn send_msg(&mut self, m: Message, must_encrypt: bool) {
        let plain = PlainMessage::from(m);
        if !must_encrypt {
            for frag in self.message_fragmenter.fragment_message(&plain) {
                self.queue_tls_message(frag.to_unencrypted_opaque());
            }
        } else {
            for frag in self.message_fragmenter.fragment_message(&plain) {
                self.send_single_fragment(frag);
            }
        }
    }

    /// Send a handshake message, encrypted if keys are in use.
    pub(crate) fn send_handshake(&mut self, m: Message) {
        let must_encrypt = self.record_layer.is_encrypting();
        self.send_msg(m, must_encrypt);
    }

    fn send_appdata_encrypt(&mut self, payload: &[u8], limit: Limit) -> usize {
        // The limit is on queued ciphertext; measuring plaintext against
        // it undercounts by the per-record overhead only.
        let len = match limit {
            Limit::Yes => self.sendable_tls.apply_limit(payload.len()),
            Limit::No => payload.len(),
        };

        let fragments = self.message_fragmenter.fragment_slice(
            ContentType::ApplicationData,
            ProtocolVersion::TLSv1_2,
            &payload[..len],
        );
        for m in fragments {
            self.send_single_fragment(m);
        }

        len
    }

    fn send_single_fragment(&mut self, m: BorrowedPlainMessage<'_>) {
        // TLS1.2 has no rekeying, so a nearly spent key ends the
        // connection. TLS1.3 sends KeyUpdate before getting here.
        if self.record_layer.wants_close_before_encrypt() && !self.is_tls13() {
            self.send_close_notify();
        }

        // never reuse a nonce
        if self.record_layer.encrypt_exhausted() {
            error!("refusing to encrypt: write sequence space exhausted");
            self.error.get_or_insert(Error::EncryptError);
            return;
        }

        match self.record_layer.encrypt_outgoing(m) {
            Ok(em) => self.queue_tls_message(em),
            Err(e) => {
                error!("encryption failed: {:?}", e);
                self.error.get_or_insert(e);
            }
        }
    }

    fn queue_tls_message(&mut self, m: OpaqueMessage) {
        self.sendable_tls.enqueue(m.encode());
    }

    /// Queue application data, protected if traffic keys are up and
    /// buffered if not. Returns how much of `data` was taken.
    fn send_plain(&mut self, data: &[u8], limit: Limit) -> usize {
        if !self.may_send_application_data {
            let len = match limit {
                Limit::Yes => self
                    .sendable_plaintext
                    .enqueue_limited_copy(data),
                Limit::No => self.sendable_plaintext.enqueue(data.to_vec()),
            };
            return len;
        }

        self.send_appdata_encrypt(data, limit)
    }

    pub(crate) fn start_outgoing_traffic(&mut self) {
        self.may_send_application_data = true;
        self.flush_plaintext();
    }

    pub(crate) fn start_traffic(&mut self) {
        self.may_receive_application_data = true;
        self.start_outgoing_traffic();
    }

    /// Drain plaintext written during the handshake.
    fn flush_plaintext(&mut self) {
        if !self.may_send_application_data {
            return;
        }

        while let Some(buf) = self.sendable_plaintext.dequeue() {
            self.send_plain(&buf, Limit::No);
        }
    }

    /// Handle an alert.  Returns true if the alert should also be given
    /// to the handshake state.
    fn process_alert(&mut self, alert: &AlertMessagePayload) -> Result<bool, Error> {
        if let AlertLevel::Unknown(level) = alert.level {
            return Err(PeerMisbehaved::IllegalAlertLevel(level, alert.description).into());
        }

        // Half-close: only the peer's direction ends.
        if alert.description == AlertDescription::CloseNotify {
            debug!("peer sent close_notify");
            self.has_received_close_notify = true;
            return Ok(false);
        }

        if alert.level == AlertLevel::Warning {
            if alert.description == AlertDescription::UserCanceled {
                warn!("TLS alert warning received: {:?}", alert);
                return Ok(false);
            }

            if self.is_tls13() {
                return Err(PeerMisbehaved::IllegalWarningAlert(alert.description).into());
            }

            if alert.description == AlertDescription::NoRenegotiation {
                warn!("TLS alert warning received: {:?}", alert);
                return Ok(true);
            }
        }

        // Any other alert tears down both directions.
        warn!("TLS alert received: {:?}", alert);
        Err(Error::AlertReceived(alert.description))
    }

    pub(crate) fn send_warning_alert(&mut self, desc: AlertDescription) {
        warn!("Sending warning alert {:?}", desc);
        self.send_warning_alert_no_log(desc);
    }

    fn send_fatal_alert(&mut self, desc: AlertDescription) {
        warn!("Sending fatal alert {:?}", desc);
        debug_assert!(!self.sent_fatal_alert);
        let m = Message::build_alert(AlertLevel::Fatal, desc);
        let must_encrypt = self.record_layer.is_encrypting();
        self.send_msg(m, must_encrypt);
        self.sent_fatal_alert = true;
    }

    /// Queue close_notify, at most once per connection.
    pub(crate) fn send_close_notify(&mut self) {
        if self.has_sent_close_notify {
            return;
        }
        debug!("Sending warning alert {:?}", AlertDescription::CloseNotify);
        self.has_sent_close_notify = true;
        self.send_warning_alert_no_log(AlertDescription::CloseNotify);
    }

    fn send_warning_alert_no_log(&mut self, desc: AlertDescription) {
        let m = Message::build_alert(AlertLevel::Warning, desc);
        let must_encrypt = self.record_layer.is_encrypting();
        self.send_msg(m, must_encrypt);
    }

    /// Record `err` as the connection's final error, sending the alert
    /// it corresponds to.
    fn fail(&mut self, err: Error) -> Error {
        if !self.sent_fatal_alert {
            if let Ok(desc) = AlertDescription::try_from(&err) {
                self.send_fatal_alert(desc);
            }
        }
        self.error = Some(err.clone());
        err
    }

    fn current_io_state(&self) -> IoState {
        IoState {
            tls_bytes_to_write: self.sendable_tls.len(),
            plaintext_bytes_to_read: self.received_plaintext.len(),
            peer_has_closed: self.has_received_close_notify,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Limit {
    Yes,
    No,
}

/// A TLS connection, on either the client or the server side.
///
/// Create one with [`Connection::connect`] or [`Connection::accept`].
pub struct Connection {
    common: CommonState,
    state: Option<NextState>,
}

impl Connection {
    /// Start a client connection to `name`.
    ///
    /// The ClientHello is queued immediately: the first call to
    /// [`Connection::write_tls`] will send it.
    pub fn connect(config: Arc<ClientConfig>, name: ServerName) -> Result<Self, Error> {
        let mut common = CommonState::new(Side::Client);
        common
            .message_fragmenter
            .set_max_fragment_size(config.max_fragment_size)?;
        let state = crate::client::hs::start_handshake(config, name, &mut common)?;
        Ok(Self {
            common,
            state: Some(state),
        })
    }

    /// Start a server connection, waiting for a ClientHello.
    pub fn accept(config: Arc<ServerConfig>) -> Result<Self, Error> {
        let mut common = CommonState::new(Side::Server);
        common
            .message_fragmenter
            .set_max_fragment_size(config.max_fragment_size)?;
        Ok(Self {
            common,
            state: Some(crate::server::hs::start(config)),
        })
    }

    /// Which side this connection is.
    pub fn side(&self) -> Side {
        self.common.side
    }

    /// Pull ciphertext from `rd`. Record boundaries need not line up
    /// with reads.
    ///
    /// Follow every successful call with
    /// [`Connection::process_new_packets`]. `Ok(0)` is passed through from
    /// `rd` and marks transport EOF. Fails without reading while the
    /// received-plaintext buffer is full.
    pub fn read_tls(&mut self, rd: &mut dyn io::Read) -> Result<usize, io::Error> {
        if self.common.received_plaintext.is_full() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "received plaintext buffer full",
            ));
        }

        let res = self.common.deframer.read(rd);
        if let Ok(0) = res {
            self.common.has_seen_eof = true;
        }
        res
    }

    /// Push queued records to `wr`; returns the ciphertext byte count.
    pub fn write_tls(&mut self, wr: &mut dyn io::Write) -> Result<usize, io::Error> {
        self.common.sendable_tls.write_to(wr)
    }

    /// Run every complete record buffered by [`Connection::read_tls`]
    /// through the record layer and the handshake.
    ///
    /// An error is final: the matching alert is already queued, so write
    /// it out with [`Connection::write_tls`] and close the transport.
    /// Later calls return the same error without doing anything.
    pub fn process_new_packets(&mut self) -> Result<IoState, Error> {
        if let Some(err) = &self.common.error {
            return Err(err.clone());
        }

        if let Some(err) = self.common.deframer.desynced.take() {
            return Err(self.common.fail(err));
        }

        while let Some(msg) = self.common.deframer.frames.pop_front() {
            if let Err(err) = self.process_msg(msg) {
                return Err(self.common.fail(err));
            }
        }

        if let Some(err) = &self.common.error {
            return Err(err.clone());
        }

        Ok(self.common.current_io_state())
    }

    fn process_msg(&mut self, msg: OpaqueMessage) -> Result<(), Error> {
        // Drop the one CCS a TLS1.3 peer may send for middlebox
        // compatibility.  It is never encrypted.
        if msg.typ == ContentType::ChangeCipherSpec
            && self.common.is_tls13()
            && !self.common.may_receive_application_data
        {
            if msg.payload.0 != [0x01] {
                return Err(InvalidMessage::InvalidCcs.into());
            }
            if self.common.received_middlebox_ccs {
                return Err(PeerMisbehaved::IllegalMiddleboxChangeCipherSpec.into());
            }
            trace!("Dropping CCS");
            self.common.received_middlebox_ccs = true;
            return Ok(());
        }

        let msg = match self
            .common
            .record_layer
            .decrypt_incoming(msg)?
        {
            Some(Decrypted {
                want_close_before_decrypt,
                plaintext,
            }) => {
                if want_close_before_decrypt {
                    self.common.send_close_notify();
                }
                plaintext
            }
            // rejected early data
            None => return Ok(()),
        };

        // handshake messages may span records
        if self.common.handshake_joiner.want_message(&msg) {
            let version = self
                .common
                .negotiated_version
                .unwrap_or(ProtocolVersion::TLSv1_2);
            self.common
                .handshake_joiner
                .take_message(msg, version)?;
            return self.process_new_handshake_messages();
        }

        let msg = Message::try_from(msg)?;

        if let MessagePayload::Alert(alert) = &msg.payload {
            if !self.common.process_alert(alert)? {
                return Ok(());
            }
        }

        self.process_main_protocol(msg)
    }

    fn process_new_handshake_messages(&mut self) -> Result<(), Error> {
        while let Some(msg) = self
            .common
            .handshake_joiner
            .frames
            .pop_front()
        {
            self.process_main_protocol(msg)?;
        }

        Ok(())
    }

    fn process_main_protocol(&mut self, msg: Message) -> Result<(), Error> {
        if let MessagePayload::ApplicationData(payload) = msg.payload {
            if !self.common.may_receive_application_data {
                return Err(Error::InappropriateMessage {
                    expect_types: vec![ContentType::Handshake],
                    got_type: ContentType::ApplicationData,
                });
            }
            self.common.take_received_plaintext(payload);
            return Ok(());
        }

        let state = self
            .state
            .take()
            .ok_or_else(|| Error::General("handshake state lost".into()))?;
        self.state = Some(state.handle(&mut self.common, msg)?);
        Ok(())
    }

    /// Plaintext from the peer.
    pub fn reader(&mut self) -> Reader<'_> {
        Reader {
            common: &mut self.common,
        }
    }

    /// Plaintext to the peer.
    pub fn writer(&mut self) -> Writer<'_> {
        Writer { conn: self }
    }

    fn send_plaintext(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(err) = &self.common.error {
            return Err(io::Error::new(io::ErrorKind::InvalidData, err.clone()));
        }

        if self.common.has_sent_close_notify {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        if self.common.may_send_application_data
            && self.common.is_tls13()
            && self.common.record_layer.wants_key_update()
        {
            debug!("write key nearing exhaustion; sending key update");
            self.refresh_traffic_keys()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        }

        Ok(self.common.send_plain(data, Limit::Yes))
    }

    /// Drive blocking transport `io` with the public calls above.
    ///
    /// While [`is_handshaking`], loops until the handshake ends. After
    /// that, flushes everything if [`wants_write`], else does one
    /// [`read_tls`] if [`wants_read`]. Returns `(read, written)` byte
    /// counts, and an unexpected EOF error if the transport closes
    /// mid-handshake.
    ///
    /// [`is_handshaking`]: Connection::is_handshaking
    /// [`wants_read`]: Connection::wants_read
    /// [`wants_write`]: Connection::wants_write
    /// [`write_tls`]: Connection::write_tls
    /// [`read_tls`]: Connection::read_tls
    pub fn complete_io<T>(&mut self, io: &mut T) -> Result<(usize, usize), io::Error>
    where
        Self: Sized,
        T: io::Read + io::Write,
    {
        let until_handshaked = self.is_handshaking();
        let mut eof = false;
        let mut wrlen = 0;
        let mut rdlen = 0;

        loop {
            while self.wants_write() {
                wrlen += self.write_tls(io)?;
            }

            if !until_handshaked && wrlen > 0 {
                return Ok((rdlen, wrlen));
            }

            while !eof && self.wants_read() {
                let read_size = match self.read_tls(io) {
                    Ok(0) => {
                        eof = true;
                        Some(0)
                    }
                    Ok(n) => {
                        rdlen += n;
                        Some(n)
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => None, // nothing to do
                    Err(err) => return Err(err),
                };
                if read_size.is_some() {
                    break;
                }
            }

            match self.process_new_packets() {
                Ok(_) => {}
                Err(e) => {
                    // best effort to deliver the alert; the protocol error wins
                    let _ignored = self.write_tls(io);

                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            };

            match (eof, until_handshaked, self.is_handshaking()) {
                (_, true, false) => return Ok((rdlen, wrlen)),
                (_, false, _) => return Ok((rdlen, wrlen)),
                (true, true, true) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                (..) => {}
            }
        }
    }

    /// Whether [`Connection::read_tls`] would make progress.
    pub fn wants_read(&self) -> bool {
        // Unread plaintext applies back-pressure. Mid-handshake, our own
        // flight goes out before we wait for the reply.
        self.common.received_plaintext.is_empty()
            && !self.common.has_received_close_notify
            && !self.common.has_seen_eof
            && (self.common.may_send_application_data || self.common.sendable_tls.is_empty())
    }

    /// Whether records are queued for [`Connection::write_tls`].
    pub fn wants_write(&self) -> bool {
        !self.common.sendable_tls.is_empty()
    }

    /// True until traffic keys are in place in both directions. Writes
    /// made meanwhile are buffered. Renegotiation is refused, so this
    /// never becomes true again.
    pub fn is_handshaking(&self) -> bool {
        self.common.is_handshaking()
    }

    /// Close our direction. The alert goes out on the next
    /// [`Connection::write_tls`]; the peer may keep sending until it
    /// closes too.
    pub fn send_close_notify(&mut self) {
        self.common.send_close_notify();
    }

    /// The negotiated version, once known.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.common.negotiated_version
    }

    /// The negotiated suite, once known.
    pub fn negotiated_cipher_suite(&self) -> Option<SupportedCipherSuite> {
        self.common.suite
    }

    /// The ALPN protocol. `None` after the handshake means ALPN was not
    /// used on this connection.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.common.alpn_protocol.as_deref()
    }

    /// The chain the peer authenticated with, end-entity first and in
    /// wire order.
    ///
    /// A server only has one after client authentication.
    pub fn peer_certificates(&self) -> Option<&[Certificate]> {
        self.common.peer_certificates.as_deref()
    }

    /// Fill `output` from the connection's exporter: RFC5705 for TLS1.2,
    /// RFC8446 section 7.5 for TLS1.3.
    ///
    /// [`Error::HandshakeNotComplete`] until the handshake is done.
    pub fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        if self.is_handshaking() {
            return Err(Error::HandshakeNotComplete);
        }

        match &self.state {
            Some(state) => state.export_keying_material(output, label, context),
            None => Err(Error::HandshakeNotComplete),
        }
    }

    /// Replace our TLS1.3 sending key, telling the peer with a KeyUpdate.
    ///
    /// This happens automatically before the sequence space of a key
    /// runs out.  It is not available for TLS1.2 or before the handshake
    /// completes.
    pub fn refresh_traffic_keys(&mut self) -> Result<(), Error> {
        if !self.common.is_tls13() || self.is_handshaking() {
            return Err(ApiMisuse::KeyUpdateNotAvailable.into());
        }

        match &mut self.state {
            Some(state) => state.send_key_update(&mut self.common),
            None => Err(ApiMisuse::KeyUpdateNotAvailable.into()),
        }
    }

    /// Start a TLS1.2 renegotiation from the client side.
    ///
    /// The new ClientHello is queued for [`Connection::write_tls`].
    /// Application data continues to flow under the current keys until
    /// the new handshake completes.
    pub fn renegotiate(&mut self) -> Result<(), Error> {
        let next = match &mut self.state {
            Some(state) => state.renegotiate(&mut self.common)?,
            None => return Err(ApiMisuse::RenegotiationNotAvailable.into()),
        };
        self.state = Some(next);
        Ok(())
    }

    /// Ask a TLS1.2 client to renegotiate, by sending a HelloRequest.
    pub fn request_renegotiation(&mut self) -> Result<(), Error> {
        match &mut self.state {
            Some(state) => state.request_renegotiation(&mut self.common),
            None => Err(ApiMisuse::RenegotiationNotAvailable.into()),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.common.side)
            .field("version", &self.common.negotiated_version)
            .field("suite", &self.common.suite)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(level: AlertLevel, description: AlertDescription) -> AlertMessagePayload {
        AlertMessagePayload { level, description }
    }

    #[test]
    fn close_notify_only_closes_reading() {
        let mut common = CommonState::new(Side::Client);
        let forward = common
            .process_alert(&alert(AlertLevel::Warning, AlertDescription::CloseNotify))
            .unwrap();
        assert!(!forward);
        assert!(common.current_io_state().peer_has_closed());
        assert!(!common.has_sent_close_notify);
    }

    #[test]
    fn fatal_alert_is_an_error() {
        let mut common = CommonState::new(Side::Server);
        assert_eq!(
            common.process_alert(&alert(AlertLevel::Fatal, AlertDescription::HandshakeFailure)),
            Err(Error::AlertReceived(AlertDescription::HandshakeFailure))
        );
    }

    #[test]
    fn unknown_alert_level_is_illegal() {
        let mut common = CommonState::new(Side::Server);
        assert_eq!(
            common.process_alert(&alert(AlertLevel::Unknown(3), AlertDescription::DecodeError)),
            Err(PeerMisbehaved::IllegalAlertLevel(3, AlertDescription::DecodeError).into())
        );
    }

    #[test]
    fn tls13_rejects_warnings_except_user_canceled() {
        let mut common = CommonState::new(Side::Client);
        common.negotiated_version = Some(ProtocolVersion::TLSv1_3);
        assert_eq!(
            common.process_alert(&alert(AlertLevel::Warning, AlertDescription::UserCanceled)),
            Ok(false)
        );
        assert_eq!(
            common.process_alert(&alert(AlertLevel::Warning, AlertDescription::NoRenegotiation)),
            Err(PeerMisbehaved::IllegalWarningAlert(AlertDescription::NoRenegotiation).into())
        );
    }

    #[test]
    fn tls12_forwards_no_renegotiation() {
        let mut common = CommonState::new(Side::Client);
        common.negotiated_version = Some(ProtocolVersion::TLSv1_2);
        assert_eq!(
            common.process_alert(&alert(AlertLevel::Warning, AlertDescription::NoRenegotiation)),
            Ok(true)
        );
        assert_eq!(
            common.process_alert(&alert(AlertLevel::Warning, AlertDescription::BadCertificate)),
            Err(Error::AlertReceived(AlertDescription::BadCertificate))
        );
    }

    #[test]
    fn plaintext_is_buffered_until_traffic() {
        let mut common = CommonState::new(Side::Client);
        assert_eq!(common.send_plain(b"hello", Limit::Yes), 5);
        assert!(common.sendable_tls.is_empty());
        assert_eq!(common.sendable_plaintext.len(), 5);

        let big = vec![0u8; DEFAULT_BUFFER_LIMIT];
        assert_eq!(
            common.send_plain(&big, Limit::Yes),
            DEFAULT_BUFFER_LIMIT - 5
        );
    }

    #[test]
    fn fatal_error_sends_one_alert() {
        let mut common = CommonState::new(Side::Server);
        let err = common.fail(PeerMisbehaved::IncorrectFinished.into());
        assert_eq!(err, Error::PeerMisbehaved(PeerMisbehaved::IncorrectFinished));
        let mut out = Vec::new();
        common.sendable_tls.write_to(&mut out).unwrap();
        assert_eq!(out, vec![0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x33]);

        // a second failure does not alert again
        common.fail(Error::DecryptError);
        assert!(common.sendable_tls.is_empty());
    }

    #[test]
    fn received_alert_gets_no_reply() {
        let mut common = CommonState::new(Side::Server);
        common.fail(Error::AlertReceived(AlertDescription::InternalError));
        assert!(common.sendable_tls.is_empty());
        assert!(common.error.is_some());
    }

    #[test]
    fn reader_would_block_until_close() {
        let mut common = CommonState::new(Side::Client);
        let mut buf = [0u8; 4];
        let err = io::Read::read(&mut Reader { common: &mut common }, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        common.take_received_plaintext(Payload::new(b"ab".to_vec()));
        common.has_received_close_notify = true;
        let mut reader = Reader { common: &mut common };
        assert_eq!(io::Read::read(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(io::Read::read(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn side_peer() {
        assert_eq!(Side::Client.peer(), Side::Server);
        assert_eq!(Side::Server.peer(), Side::Client);
    }
}

//! The TLS1.2 handshake as an explicit sequence of steps.
//!
//! Both sides walk the same [`Step`] sequence.  At each step one side
//! writes and the other reads; which step follows is a pure function of
//! the current step and the [`Plan`], the handful of options negotiated
//! in the hellos (and refined as later messages arrive).
//!
//! Some server messages may be left out without the client being told in
//! advance.  The client visits those steps anyway; if the message that
//! arrived belongs to a later step, the step is skipped and the same
//! message is offered to the next one.

use crate::conn::{CommonState, NextState, NextStateOrError, Side, State};
use crate::error::Error;
#[cfg(feature = "logging")]
use crate::log::trace;
use crate::msgs::message::Message;

/// One message of a TLS1.2 handshake, or a point after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    ServerHello,
    ServerCertificate,
    CertificateStatus,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    ClientCertificate,
    ClientKeyExchange,
    ClientCertificateVerify,
    ClientChangeCipherSpec,
    ClientFinished,
    NewSessionTicket,
    ServerChangeCipherSpec,
    ServerFinished,
    /// The handshake is complete; application data flows.
    Done,
    /// A new handshake was asked for while `Done`.
    Renegotiate,
}

impl Step {
    /// Which side writes this step's message.
    pub(crate) fn sender(self) -> Option<Side> {
        use Step::*;
        match self {
            ServerHello | ServerCertificate | CertificateStatus | ServerKeyExchange
            | CertificateRequest | ServerHelloDone | NewSessionTicket | ServerChangeCipherSpec
            | ServerFinished => Some(Side::Server),
            ClientCertificate | ClientKeyExchange | ClientCertificateVerify
            | ClientChangeCipherSpec | ClientFinished => Some(Side::Client),
            Done | Renegotiate => None,
        }
    }

    /// A server may leave these out without saying so in its ServerHello.
    pub(crate) fn is_optional(self) -> bool {
        matches!(self, Self::CertificateStatus | Self::CertificateRequest)
    }
}

/// The options that shape a handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Plan {
    /// An earlier session is being resumed: the abbreviated handshake.
    pub(crate) resumed: bool,
    /// The server agreed to staple an OCSP response.
    pub(crate) status: bool,
    /// The suite's key exchange needs a signed ServerKeyExchange.
    pub(crate) kx_signed: bool,
    /// The server asked for a client certificate.
    pub(crate) client_auth: bool,
    /// The client answered with a non-empty certificate chain.
    pub(crate) client_cert_sent: bool,
    /// The server will issue a session ticket.
    pub(crate) ticket: bool,
}

/// The step after `step`, given `plan`.
pub(crate) fn next(step: Step, plan: &Plan) -> Step {
    use Step::*;
    match step {
        ServerHello if plan.resumed && plan.ticket => NewSessionTicket,
        ServerHello if plan.resumed => ServerChangeCipherSpec,
        ServerHello => ServerCertificate,
        ServerCertificate if plan.status => CertificateStatus,
        ServerCertificate | CertificateStatus if plan.kx_signed => ServerKeyExchange,
        ServerCertificate | CertificateStatus | ServerKeyExchange => CertificateRequest,
        CertificateRequest => ServerHelloDone,
        ServerHelloDone if plan.client_auth => ClientCertificate,
        ServerHelloDone | ClientCertificate => ClientKeyExchange,
        ClientKeyExchange if plan.client_cert_sent => ClientCertificateVerify,
        ClientKeyExchange | ClientCertificateVerify => ClientChangeCipherSpec,
        ClientChangeCipherSpec => ClientFinished,
        ClientFinished if plan.resumed => Done,
        ClientFinished if plan.ticket => NewSessionTicket,
        ClientFinished | NewSessionTicket => ServerChangeCipherSpec,
        ServerChangeCipherSpec => ServerFinished,
        ServerFinished if plan.resumed => ClientChangeCipherSpec,
        ServerFinished | Done | Renegotiate => Done,
    }
}

/// What became of a message offered to a step.
pub(crate) enum Received {
    Consumed,
    /// The step's message was absent; the message belongs to a later step.
    Skipped(Message),
}

/// One side's half of the TLS1.2 handshake: how it writes the steps it
/// sends and reads the steps it receives.
pub(crate) trait Steps: Send + Sync + 'static {
    const SIDE: Side;

    fn send(&mut self, step: Step, plan: &mut Plan, common: &mut CommonState) -> Result<(), Error>;

    fn receive(
        &mut self,
        step: Step,
        plan: &mut Plan,
        common: &mut CommonState,
        m: Message,
    ) -> Result<Received, Error>;

    /// The handshake reached [`Step::Done`].
    fn complete(&mut self, plan: &Plan, common: &mut CommonState) -> Result<(), Error>;

    /// Handle a message received once the handshake is `Done`.  Returns
    /// `true` if the message asks for a renegotiation.
    fn traffic(&mut self, common: &mut CommonState, m: &Message) -> Result<bool, Error>;

    /// Start a renegotiation, triggered by `trigger` or (with `None`) by
    /// our own caller.  `Ok(None)` means it was declined and the current
    /// session continues.
    fn renegotiate(
        &mut self,
        common: &mut CommonState,
        trigger: Option<Message>,
    ) -> Result<Option<NextState>, Error>;

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error>;

    /// Send a HelloRequest.  Only a server can.
    fn request_renegotiation(&mut self, common: &mut CommonState) -> Result<(), Error>;
}

/// A TLS1.2 handshake in progress, and the session that follows it.
pub(crate) struct Machine<S> {
    step: Step,
    plan: Plan,
    side: S,
}

impl<S: Steps> Machine<S> {
    pub(crate) fn new(step: Step, plan: Plan, side: S) -> Self {
        Self { step, plan, side }
    }

    /// Write whatever is ours to write, starting from the current step.
    pub(crate) fn start(self: Box<Self>, common: &mut CommonState) -> NextStateOrError {
        self.walk(common, None)
    }

    fn walk(mut self: Box<Self>, common: &mut CommonState, mut pending: Option<Message>) -> NextStateOrError {
        loop {
            let step = self.step;
            match step.sender() {
                Some(sender) if sender == S::SIDE => {
                    self.side.send(step, &mut self.plan, common)?;
                }
                Some(_) => {
                    let Some(m) = pending.take() else {
                        return Ok(self);
                    };
                    match self.side.receive(step, &mut self.plan, common, m)? {
                        Received::Consumed => {}
                        Received::Skipped(m) => {
                            debug_assert!(step.is_optional());
                            trace!("{:?} absent; offering message to next step", step);
                            pending = Some(m);
                        }
                    }
                }
                None if step == Step::Renegotiate => {
                    self.step = Step::Done;
                    return match self.side.renegotiate(common, pending.take())? {
                        Some(next) => Ok(next),
                        None => Ok(self),
                    };
                }
                None => {
                    let Some(m) = pending.take() else {
                        return Ok(self);
                    };
                    if self.side.traffic(common, &m)? {
                        self.step = Step::Renegotiate;
                        pending = Some(m);
                        continue;
                    }
                    return Ok(self);
                }
            }

            self.step = next(step, &self.plan);
            trace!("TLS1.2 step {:?} -> {:?}", step, self.step);
            if self.step == Step::Done {
                self.side.complete(&self.plan, common)?;
            }
        }
    }
}

impl<S: Steps> State for Machine<S> {
    fn handle(self: Box<Self>, common: &mut CommonState, m: Message) -> NextStateOrError {
        self.walk(common, Some(m))
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        if self.step != Step::Done {
            return Err(Error::HandshakeNotComplete);
        }
        self.side
            .export_keying_material(output, label, context)
    }

    fn renegotiate(&mut self, common: &mut CommonState) -> NextStateOrError {
        if self.step != Step::Done || S::SIDE != Side::Client {
            return Err(crate::error::ApiMisuse::RenegotiationNotAvailable.into());
        }

        match self.side.renegotiate(common, None)? {
            Some(next) => Ok(next),
            None => Err(crate::error::ApiMisuse::RenegotiationNotAvailable.into()),
        }
    }

    fn request_renegotiation(&mut self, common: &mut CommonState) -> Result<(), Error> {
        if self.step != Step::Done {
            return Err(crate::error::ApiMisuse::RenegotiationNotAvailable.into());
        }
        self.side.request_renegotiation(common)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{HandshakeType, ProtocolVersion};
    use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};

    fn walk(plan: Plan, from: Step) -> Vec<Step> {
        let mut steps = vec![from];
        let mut step = from;
        while step != Step::Done {
            step = next(step, &plan);
            steps.push(step);
        }
        steps
    }

    #[test]
    fn full_ecdhe_handshake() {
        use Step::*;
        let plan = Plan {
            kx_signed: true,
            ..Plan::default()
        };
        assert_eq!(
            walk(plan, ServerHello),
            vec![
                ServerHello,
                ServerCertificate,
                ServerKeyExchange,
                CertificateRequest,
                ServerHelloDone,
                ClientKeyExchange,
                ClientChangeCipherSpec,
                ClientFinished,
                ServerChangeCipherSpec,
                ServerFinished,
                Done
            ]
        );
    }

    #[test]
    fn static_rsa_has_no_server_key_exchange() {
        let steps = walk(Plan::default(), Step::ServerHello);
        assert!(!steps.contains(&Step::ServerKeyExchange));
        assert!(steps.contains(&Step::ClientKeyExchange));
    }

    #[test]
    fn status_and_client_auth() {
        use Step::*;
        let plan = Plan {
            status: true,
            kx_signed: true,
            client_auth: true,
            client_cert_sent: true,
            ticket: true,
            ..Plan::default()
        };
        assert_eq!(
            walk(plan, ServerHello),
            vec![
                ServerHello,
                ServerCertificate,
                CertificateStatus,
                ServerKeyExchange,
                CertificateRequest,
                ServerHelloDone,
                ClientCertificate,
                ClientKeyExchange,
                ClientCertificateVerify,
                ClientChangeCipherSpec,
                ClientFinished,
                NewSessionTicket,
                ServerChangeCipherSpec,
                ServerFinished,
                Done
            ]
        );
    }

    #[test]
    fn empty_client_certificate_has_no_verify() {
        let plan = Plan {
            client_auth: true,
            ..Plan::default()
        };
        let steps = walk(plan, Step::ServerHello);
        assert!(steps.contains(&Step::ClientCertificate));
        assert!(!steps.contains(&Step::ClientCertificateVerify));
    }

    #[test]
    fn abbreviated_handshake() {
        use Step::*;
        let plan = Plan {
            resumed: true,
            ticket: true,
            ..Plan::default()
        };
        assert_eq!(
            walk(plan, ServerHello),
            vec![
                ServerHello,
                NewSessionTicket,
                ServerChangeCipherSpec,
                ServerFinished,
                ClientChangeCipherSpec,
                ClientFinished,
                Done
            ]
        );
    }

    #[test]
    fn senders() {
        assert_eq!(Step::NewSessionTicket.sender(), Some(Side::Server));
        assert_eq!(Step::ClientChangeCipherSpec.sender(), Some(Side::Client));
        assert_eq!(Step::Done.sender(), None);
        assert_eq!(Step::Renegotiate.sender(), None);
        assert!(Step::CertificateRequest.is_optional());
        assert!(!Step::ServerKeyExchange.is_optional());
    }

    #[test]
    fn renegotiate_returns_to_done() {
        assert_eq!(next(Step::Renegotiate, &Plan::default()), Step::Done);
        assert_eq!(next(Step::Done, &Plan::default()), Step::Done);
    }

    /// Records the steps it is driven through, receiving by matching the
    /// handshake type each step expects.
    struct Recorder {
        seen: Vec<Step>,
        completed: bool,
    }

    fn expected_type(step: Step) -> HandshakeType {
        match step {
            Step::CertificateStatus => HandshakeType::CertificateStatus,
            Step::CertificateRequest => HandshakeType::CertificateRequest,
            Step::ServerHelloDone => HandshakeType::ServerHelloDone,
            _ => HandshakeType::Finished,
        }
    }

    impl Steps for Recorder {
        const SIDE: Side = Side::Client;

        fn send(&mut self, step: Step, _: &mut Plan, _: &mut CommonState) -> Result<(), Error> {
            self.seen.push(step);
            Ok(())
        }

        fn receive(
            &mut self,
            step: Step,
            _: &mut Plan,
            _: &mut CommonState,
            m: Message,
        ) -> Result<Received, Error> {
            if step.is_optional() && !m.is_handshake_type(expected_type(step)) {
                return Ok(Received::Skipped(m));
            }
            self.seen.push(step);
            Ok(Received::Consumed)
        }

        fn complete(&mut self, _: &Plan, _: &mut CommonState) -> Result<(), Error> {
            self.completed = true;
            Ok(())
        }

        fn traffic(&mut self, _: &mut CommonState, _: &Message) -> Result<bool, Error> {
            Ok(false)
        }

        fn renegotiate(
            &mut self,
            _: &mut CommonState,
            _: Option<Message>,
        ) -> Result<Option<NextState>, Error> {
            Ok(None)
        }

        fn export_keying_material(&self, _: &mut [u8], _: &[u8], _: Option<&[u8]>) -> Result<(), Error> {
            Ok(())
        }

        fn request_renegotiation(&mut self, _: &mut CommonState) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn absent_optional_step_reuses_message() {
        let mut common = CommonState::new(Side::Client);
        let machine = Box::new(Machine::new(
            Step::CertificateRequest,
            Plan::default(),
            Recorder {
                seen: Vec::new(),
                completed: false,
            },
        ));

        let done = Message::build_handshake(
            ProtocolVersion::TLSv1_2,
            HandshakeMessagePayload {
                typ: HandshakeType::ServerHelloDone,
                payload: HandshakePayload::ServerHelloDone,
            },
        );

        // ServerHelloDone arrives where a CertificateRequest might have been:
        // the request is skipped, the message is taken by ServerHelloDone,
        // and the client then writes its flight.
        let machine = machine.walk(&mut common, Some(done)).unwrap();
        assert!(machine.export_keying_material(&mut [0u8; 4], b"l", None).is_err());
    }
}

//! S8 Session State Machine
//!
//! Sequences the S8 create/modify/delete exchanges of one session with at most
//! one open transaction. `transition` is the pure state table; `dispatch` runs
//! the chosen handler and keeps the transaction and its timer in step.

use std::fmt;
use std::time::Duration;

use crate::context::SmfSess;
use crate::error::SmfError;
use crate::s8_build::{S8Message, S8Procedure};
use crate::s8_handler::{self, GtpPath, PfcpPath};
use crate::timer::{SmfTimerId, TimerConfig};

// ============================================================================
// States and Events
// ============================================================================

/// S8 FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum S8State {
    #[default]
    Initial,
    Operational,
    WaitCreateResponse,
    WaitModifyResponse,
    WaitDeleteResponse,
    Final,
    Exception,
}

impl S8State {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initial => "s8_state_initial",
            Self::Operational => "s8_state_operational",
            Self::WaitCreateResponse => "s8_state_wait_create_response",
            Self::WaitModifyResponse => "s8_state_wait_modify_response",
            Self::WaitDeleteResponse => "s8_state_wait_delete_response",
            Self::Final => "s8_state_final",
            Self::Exception => "s8_state_exception",
        }
    }

    /// No transition leaves Final or Exception
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final | Self::Exception)
    }
}

impl fmt::Display for S8State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event delivered to a session's S8 FSM
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S8Event {
    /// GTP-C message received on transaction `xact_id`
    Message { xact_id: u64, message: S8Message },
    /// T3-RESPONSE expiry of transaction `xact_id`
    Timer { xact_id: u64 },
}

impl S8Event {
    pub fn xact_id(&self) -> u64 {
        match self {
            Self::Message { xact_id, .. } | Self::Timer { xact_id } => *xact_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Message { message, .. } => message.name(),
            Self::Timer { .. } => "T3-RESPONSE expiry",
        }
    }
}

/// Outstanding S8 transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S8Xact {
    pub id: u64,
    pub procedure: S8Procedure,
    pub timeout: Duration,
}

// ============================================================================
// Transition Table
// ============================================================================

/// Effect selected by the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S8Action {
    CreateSessionRequest,
    ModifyBearerRequest { bearer_contexts_to_be_modified: bool },
    DeleteSessionRequest,
    BearerResourceCommand { linked_ebi: Option<u8> },
    BearerResourceFailureIndication { cause: Option<u8> },
    CreateSessionResponse { cause: Option<u8> },
    ModifyBearerResponse { cause: Option<u8> },
    DeleteSessionResponse { cause: Option<u8> },
    /// Event not valid in the current state
    ProtocolViolation,
    /// Response timer fired while waiting
    Timeout,
    /// Event in a terminal state
    Ignore,
}

fn is_open(open_xact: Option<&S8Xact>, xact_id: u64, procedure: S8Procedure) -> bool {
    open_xact.is_some_and(|x| x.id == xact_id && x.procedure == procedure)
}

fn operational(message: &S8Message) -> (S8State, S8Action) {
    use S8Action as A;
    use S8State as S;

    match message {
        S8Message::CreateSessionRequest => (S::WaitCreateResponse, A::CreateSessionRequest),
        S8Message::ModifyBearerRequest {
            bearer_contexts_to_be_modified,
        } => (
            S::WaitModifyResponse,
            A::ModifyBearerRequest {
                bearer_contexts_to_be_modified: *bearer_contexts_to_be_modified,
            },
        ),
        S8Message::DeleteSessionRequest => (S::WaitDeleteResponse, A::DeleteSessionRequest),
        S8Message::BearerResourceCommand { linked_ebi } => (
            S::Operational,
            A::BearerResourceCommand {
                linked_ebi: *linked_ebi,
            },
        ),
        S8Message::BearerResourceFailureIndication { cause } => (
            S::Operational,
            A::BearerResourceFailureIndication { cause: *cause },
        ),
        _ => (S::Exception, A::ProtocolViolation),
    }
}

/// Next state and effect of `event` in `state`
pub fn transition(
    state: S8State,
    event: &S8Event,
    open_xact: Option<&S8Xact>,
) -> (S8State, S8Action) {
    use S8Action as A;
    use S8State as S;

    let (procedure, on_accept) = match state {
        S::Initial => return transition(S::Operational, event, open_xact),
        S::Final | S::Exception => return (state, A::Ignore),
        S::Operational => {
            return match event {
                S8Event::Message { message, .. } => operational(message),
                S8Event::Timer { .. } => (S::Exception, A::ProtocolViolation),
            };
        }
        S::WaitCreateResponse => (S8Procedure::CreateSession, S::Operational),
        S::WaitModifyResponse => (S8Procedure::ModifyBearer, S::Operational),
        S::WaitDeleteResponse => (S8Procedure::DeleteSession, S::Final),
    };

    let (xact_id, message) = match event {
        S8Event::Timer { .. } => return (S::Exception, A::Timeout),
        S8Event::Message { xact_id, message } => (*xact_id, message),
    };
    if !is_open(open_xact, xact_id, procedure)
        || message.message_type() != procedure.response_type()
    {
        return (S::Exception, A::ProtocolViolation);
    }

    let cause = message.cause();
    let action = match procedure {
        S8Procedure::CreateSession => A::CreateSessionResponse { cause },
        S8Procedure::ModifyBearer => A::ModifyBearerResponse { cause },
        S8Procedure::DeleteSession => A::DeleteSessionResponse { cause },
    };
    (on_accept, action)
}

// ============================================================================
// FSM Driver
// ============================================================================

/// S8 FSM result
#[derive(Debug)]
pub enum S8FsmResult {
    /// Handler ran, state unchanged
    Handled,
    /// Handler ran, new state entered
    Transition(S8State),
    /// Handler reported an error; the transition was applied regardless
    HandlerFailed { next: S8State, error: SmfError },
    /// Invalid message; session moved to Exception
    ProtocolViolation,
    /// Open transaction expired; session moved to Exception
    Timeout,
    /// Event discarded
    Ignored,
}

/// Per-session S8 state and open transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S8Fsm {
    pub state: S8State,
    pub xact: Option<S8Xact>,
}

impl S8Fsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the FSM
    pub fn init(&mut self) {
        log::debug!("{}", S8State::Initial);
        self.state = S8State::Operational;
    }

    /// Finalize the FSM
    pub fn fini(&mut self) {
        log::debug!("{}", S8State::Final);
        self.xact = None;
        self.state = S8State::Final;
    }

    fn open_xact(
        &mut self,
        id: u64,
        procedure: S8Procedure,
        timer: &TimerConfig,
        gtp: &mut dyn GtpPath,
    ) {
        self.xact = Some(S8Xact {
            id,
            procedure,
            timeout: timer.duration,
        });
        if timer.enabled {
            gtp.start_timer(id, SmfTimerId::S8T3Response, timer.duration);
        }
    }

    fn close_xact(&mut self, gtp: &mut dyn GtpPath) {
        if let Some(xact) = self.xact.take() {
            gtp.stop_timer(xact.id, SmfTimerId::S8T3Response);
        }
    }
}

/// Run one event through the session's S8 FSM
pub fn dispatch(
    sess: &mut SmfSess,
    event: &S8Event,
    timer: &TimerConfig,
    pfcp: &mut dyn PfcpPath,
    gtp: &mut dyn GtpPath,
) -> S8FsmResult {
    if sess.s8.state == S8State::Initial {
        sess.s8.init();
    }
    let state = sess.s8.state;
    let (next, action) = transition(state, event, sess.s8.xact.as_ref());
    let xact_id = event.xact_id();

    log::debug!("[{}] {}: {}", sess.imsi_bcd, state, event.name());

    let handled = match action {
        S8Action::Ignore => {
            log::warn!("[{}] {} ignored in {}", sess.imsi_bcd, event.name(), state);
            return S8FsmResult::Ignored;
        }
        S8Action::ProtocolViolation => {
            log::error!(
                "[{}] unexpected {} (xact {}) in {}",
                sess.imsi_bcd,
                event.name(),
                xact_id,
                state
            );
            sess.s8.close_xact(gtp);
            sess.s8.state = next;
            return S8FsmResult::ProtocolViolation;
        }
        S8Action::Timeout => {
            log::error!(
                "[{}] {} (xact {}) in {}",
                sess.imsi_bcd,
                event.name(),
                xact_id,
                state
            );
            sess.s8.close_xact(gtp);
            sess.s8.state = next;
            return S8FsmResult::Timeout;
        }
        S8Action::CreateSessionRequest => {
            let r = s8_handler::handle_create_session_request(xact_id, sess, pfcp, gtp);
            sess.s8.open_xact(xact_id, S8Procedure::CreateSession, timer, gtp);
            r
        }
        S8Action::ModifyBearerRequest {
            bearer_contexts_to_be_modified,
        } => {
            let r = s8_handler::handle_modify_bearer_request(
                xact_id,
                sess,
                bearer_contexts_to_be_modified,
                pfcp,
                gtp,
            );
            sess.s8.open_xact(xact_id, S8Procedure::ModifyBearer, timer, gtp);
            r
        }
        S8Action::DeleteSessionRequest => {
            let r = s8_handler::handle_delete_session_request(xact_id, sess, pfcp, gtp);
            sess.s8.open_xact(xact_id, S8Procedure::DeleteSession, timer, gtp);
            r
        }
        S8Action::BearerResourceCommand { linked_ebi } => {
            s8_handler::handle_bearer_resource_command(xact_id, sess, linked_ebi, pfcp, gtp)
        }
        S8Action::BearerResourceFailureIndication { cause } => {
            s8_handler::handle_bearer_resource_failure_indication(sess, cause);
            Ok(())
        }
        S8Action::CreateSessionResponse { cause } => {
            sess.s8.close_xact(gtp);
            s8_handler::handle_create_session_response(sess, cause)
        }
        S8Action::ModifyBearerResponse { cause } => {
            sess.s8.close_xact(gtp);
            s8_handler::handle_modify_bearer_response(sess, cause)
        }
        S8Action::DeleteSessionResponse { cause } => {
            sess.s8.close_xact(gtp);
            s8_handler::handle_delete_session_response(sess, cause)
        }
    };

    sess.s8.state = next;
    if next != state {
        log::debug!("[{}] {} -> {}", sess.imsi_bcd, state, next);
    }

    match handled {
        Err(error) => S8FsmResult::HandlerFailed { next, error },
        Ok(()) if next == state => S8FsmResult::Handled,
        Ok(()) => S8FsmResult::Transition(next),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s8_handler::tests::{MockGtpPath, MockPfcpPath};

    /// PFCP/GTP doubles and the T3 timer shared by one test
    #[derive(Default)]
    struct Peers {
        pfcp: MockPfcpPath,
        gtp: MockGtpPath,
        timer: TimerConfig,
    }

    impl Peers {
        fn new() -> Self {
            Self {
                timer: TimerConfig::new(Duration::from_secs(3)),
                ..Default::default()
            }
        }

        fn dispatch(&mut self, sess: &mut SmfSess, event: S8Event) -> S8FsmResult {
            dispatch(sess, &event, &self.timer, &mut self.pfcp, &mut self.gtp)
        }
    }

    fn msg(xact_id: u64, message: S8Message) -> S8Event {
        S8Event::Message { xact_id, message }
    }

    fn new_sess() -> SmfSess {
        let mut sess = SmfSess::new(1, 1, "001010000000001", Some("internet"));
        sess.s8.init();
        sess
    }

    fn accepted_create() -> S8Message {
        S8Message::CreateSessionResponse { cause: Some(16) }
    }

    #[test]
    fn test_create_then_delete_reaches_final() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        let r = peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        assert!(matches!(r, S8FsmResult::Transition(S8State::WaitCreateResponse)));
        assert_eq!(sess.s8.xact.map(|x| x.id), Some(1));
        assert_eq!(peers.gtp.started, vec![(1, Duration::from_secs(3))]);

        let r = peers.dispatch(&mut sess, msg(1, accepted_create()));
        assert!(matches!(r, S8FsmResult::Transition(S8State::Operational)));
        assert!(sess.s8.xact.is_none());
        assert_eq!(peers.gtp.stopped, vec![1]);

        peers.dispatch(&mut sess, msg(2, S8Message::DeleteSessionRequest));
        assert_eq!(sess.state(), S8State::WaitDeleteResponse);
        let rsp = S8Message::DeleteSessionResponse { cause: Some(16) };
        let r = peers.dispatch(&mut sess, msg(2, rsp));
        assert!(matches!(r, S8FsmResult::Transition(S8State::Final)));
        assert_eq!(
            peers.pfcp.requests,
            vec!["session establishment", "session deletion"]
        );
    }

    #[test]
    fn test_modify_timeout_then_exception_absorbs() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        let req = S8Message::ModifyBearerRequest {
            bearer_contexts_to_be_modified: true,
        };
        peers.dispatch(&mut sess, msg(5, req));
        assert_eq!(sess.state(), S8State::WaitModifyResponse);

        let r = peers.dispatch(&mut sess, S8Event::Timer { xact_id: 5 });
        assert!(matches!(r, S8FsmResult::Timeout));
        assert_eq!(sess.state(), S8State::Exception);
        assert!(sess.s8.xact.is_none());
        assert_eq!(peers.gtp.stopped, vec![5]);

        let r = peers.dispatch(&mut sess, msg(6, S8Message::CreateSessionRequest));
        assert!(matches!(r, S8FsmResult::Ignored));
        assert_eq!(sess.state(), S8State::Exception);
        assert_eq!(peers.pfcp.requests, vec!["session modification"]);
    }

    #[test]
    fn test_timer_in_operational_is_violation() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        let r = peers.dispatch(&mut sess, S8Event::Timer { xact_id: 9 });
        assert!(matches!(r, S8FsmResult::ProtocolViolation));
        assert_eq!(sess.state(), S8State::Exception);
        assert!(peers.pfcp.requests.is_empty());
    }

    #[test]
    fn test_any_timer_while_waiting_times_out() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        let req = S8Message::ModifyBearerRequest {
            bearer_contexts_to_be_modified: false,
        };
        peers.dispatch(&mut sess, msg(1, req));
        let r = peers.dispatch(&mut sess, S8Event::Timer { xact_id: 2 });

        assert!(matches!(r, S8FsmResult::Timeout));
        assert_eq!(sess.state(), S8State::Exception);
        assert!(sess.s8.xact.is_none());
        assert_eq!(peers.gtp.stopped, vec![1]);
    }

    #[test]
    fn test_mismatched_xact_is_violation() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        let r = peers.dispatch(&mut sess, msg(2, accepted_create()));
        assert!(matches!(r, S8FsmResult::ProtocolViolation));
        assert_eq!(sess.state(), S8State::Exception);
        assert!(sess.s8.xact.is_none());
        assert_eq!(peers.gtp.stopped, vec![1]);
    }

    #[test]
    fn test_wrong_response_type_is_violation() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        let rsp = S8Message::DeleteSessionResponse { cause: Some(16) };
        let r = peers.dispatch(&mut sess, msg(1, rsp));

        assert!(matches!(r, S8FsmResult::ProtocolViolation));
        assert_eq!(sess.state(), S8State::Exception);
        assert!(sess.s8.xact.is_none());
    }

    #[test]
    fn test_request_while_waiting_is_violation() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        let r = peers.dispatch(&mut sess, msg(2, S8Message::CreateSessionRequest));

        assert!(matches!(r, S8FsmResult::ProtocolViolation));
        assert_eq!(sess.state(), S8State::Exception);
        assert_eq!(peers.pfcp.requests, vec!["session establishment"]);
        assert_eq!(peers.gtp.committed.len(), 1);
    }

    #[test]
    fn test_response_in_operational_is_violation() {
        let rsp = S8Message::ModifyBearerResponse { cause: Some(16) };
        let (next, action) = transition(S8State::Operational, &msg(1, rsp), None);
        assert_eq!(next, S8State::Exception);
        assert_eq!(action, S8Action::ProtocolViolation);
    }

    #[test]
    fn test_rejected_response_still_transitions() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        let rsp = S8Message::CreateSessionResponse { cause: Some(64) };
        let r = peers.dispatch(&mut sess, msg(1, rsp));
        assert!(matches!(
            r,
            S8FsmResult::HandlerFailed {
                next: S8State::Operational,
                error: SmfError::PeerRejected { cause: 64, .. }
            }
        ));
        assert_eq!(sess.state(), S8State::Operational);
    }

    #[test]
    fn test_pfcp_failure_still_opens_xact() {
        let mut sess = new_sess();
        let mut peers = Peers::new();
        peers.pfcp.fail = true;

        let r = peers.dispatch(&mut sess, msg(4, S8Message::DeleteSessionRequest));
        assert!(matches!(
            r,
            S8FsmResult::HandlerFailed {
                next: S8State::WaitDeleteResponse,
                ..
            }
        ));
        assert!(peers.gtp.committed.is_empty());
        assert_eq!(
            sess.s8.xact.map(|x| x.procedure),
            Some(S8Procedure::DeleteSession)
        );
    }

    #[test]
    fn test_commit_failure_still_transitions() {
        let mut sess = new_sess();
        let mut peers = Peers::new();
        peers.gtp.fail = true;

        let r = peers.dispatch(&mut sess, msg(3, S8Message::CreateSessionRequest));
        assert!(matches!(
            r,
            S8FsmResult::HandlerFailed {
                next: S8State::WaitCreateResponse,
                error: SmfError::GtpCommitFailure { xact_id: 3, .. }
            }
        ));
        assert_eq!(sess.state(), S8State::WaitCreateResponse);
    }

    #[test]
    fn test_bearer_resource_keeps_operational() {
        let mut sess = new_sess();
        let mut peers = Peers::new();

        let cmd = S8Message::BearerResourceCommand {
            linked_ebi: Some(5),
        };
        let r = peers.dispatch(&mut sess, msg(8, cmd));
        assert!(matches!(r, S8FsmResult::Handled));
        let ind = S8Message::BearerResourceFailureIndication { cause: Some(73) };
        let r = peers.dispatch(&mut sess, msg(9, ind));
        assert!(matches!(r, S8FsmResult::Handled));
        assert_eq!(sess.state(), S8State::Operational);
        assert!(sess.s8.xact.is_none());
        assert!(peers.gtp.started.is_empty());
    }

    #[test]
    fn test_initial_advances_before_handling() {
        let mut sess = SmfSess::new(1, 1, "001010000000001", None);
        assert_eq!(sess.state(), S8State::Initial);
        let mut peers = Peers::new();
        peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        assert_eq!(sess.state(), S8State::WaitCreateResponse);
    }

    #[test]
    fn test_disabled_timer_not_armed() {
        let mut sess = new_sess();
        let mut peers = Peers::default();
        peers.dispatch(&mut sess, msg(1, S8Message::CreateSessionRequest));
        assert!(peers.gtp.started.is_empty());
        assert!(sess.s8.xact.is_some());
    }

    #[test]
    fn test_fini() {
        let mut fsm = S8Fsm::new();
        fsm.init();
        assert_eq!(fsm.state, S8State::Operational);
        fsm.fini();
        assert_eq!(fsm.state, S8State::Final);
        assert!(fsm.state.is_terminal());
    }
}

//! S8 GTP-C Message Handlers
//!
//! Request handlers drive the user-plane session (PFCP) and answer the peer
//! SMF on the request's transaction. Response handlers check the peer's cause.

use std::time::Duration;

use crate::context::SmfSess;
use crate::error::{SmfError, SmfResult};
use crate::s8_build::{
    build_bearer_resource_failure_indication, build_create_session_response,
    build_delete_session_response, build_modify_bearer_response, Gtp2Cause, S8Message,
    S8Procedure, OGS_GTP2_CAUSE_REQUEST_ACCEPTED,
};
use crate::timer::SmfTimerId;

// ============================================================================
// Collaborators
// ============================================================================

/// PFCP path towards the UPF serving a session
pub trait PfcpPath {
    fn send_session_establishment_request(&mut self, sess: &SmfSess) -> SmfResult<()>;
    fn send_session_modification_request(&mut self, sess: &SmfSess) -> SmfResult<()>;
    fn send_session_deletion_request(&mut self, sess: &SmfSess) -> SmfResult<()>;
}

/// GTP-C path towards the peer SMF
pub trait GtpPath {
    /// Send `message` as the answer on transaction `xact_id`
    fn commit(&mut self, xact_id: u64, message: S8Message) -> SmfResult<()>;
    /// Arm a transaction timer; expiry is reported as an S8 timer event
    fn start_timer(&mut self, xact_id: u64, timer_id: SmfTimerId, duration: Duration);
    fn stop_timer(&mut self, xact_id: u64, timer_id: SmfTimerId);
}

// ============================================================================
// Requests
// ============================================================================

fn commit_response(
    sess: &SmfSess,
    gtp: &mut dyn GtpPath,
    xact_id: u64,
    message: S8Message,
) -> SmfResult<()> {
    let name = message.name();
    gtp.commit(xact_id, message).map_err(|e| {
        log::error!("[{}] {} not sent: {}", sess.imsi_bcd, name, e);
        e
    })
}

pub fn handle_create_session_request(
    xact_id: u64,
    sess: &SmfSess,
    pfcp: &mut dyn PfcpPath,
    gtp: &mut dyn GtpPath,
) -> SmfResult<()> {
    log::info!("[{}] S8 Create Session Request", sess.imsi_bcd);

    if let Err(e) = pfcp.send_session_establishment_request(sess) {
        log::error!("[{}] PFCP session establishment failed: {}", sess.imsi_bcd, e);
        return Err(e);
    }
    let rsp = build_create_session_response(OGS_GTP2_CAUSE_REQUEST_ACCEPTED);
    commit_response(sess, gtp, xact_id, rsp)
}

pub fn handle_modify_bearer_request(
    xact_id: u64,
    sess: &SmfSess,
    bearer_contexts_to_be_modified: bool,
    pfcp: &mut dyn PfcpPath,
    gtp: &mut dyn GtpPath,
) -> SmfResult<()> {
    log::info!("[{}] S8 Modify Bearer Request", sess.imsi_bcd);

    if bearer_contexts_to_be_modified {
        if let Err(e) = pfcp.send_session_modification_request(sess) {
            log::error!("[{}] PFCP session modification failed: {}", sess.imsi_bcd, e);
            return Err(e);
        }
    }
    let rsp = build_modify_bearer_response(OGS_GTP2_CAUSE_REQUEST_ACCEPTED);
    commit_response(sess, gtp, xact_id, rsp)
}

pub fn handle_delete_session_request(
    xact_id: u64,
    sess: &SmfSess,
    pfcp: &mut dyn PfcpPath,
    gtp: &mut dyn GtpPath,
) -> SmfResult<()> {
    log::info!("[{}] S8 Delete Session Request", sess.imsi_bcd);

    if let Err(e) = pfcp.send_session_deletion_request(sess) {
        log::error!("[{}] PFCP session deletion failed: {}", sess.imsi_bcd, e);
        return Err(e);
    }
    let rsp = build_delete_session_response(OGS_GTP2_CAUSE_REQUEST_ACCEPTED);
    commit_response(sess, gtp, xact_id, rsp)
}

/// Modify the user plane for a linked bearer, then always answer with an
/// accepted failure indication.
pub fn handle_bearer_resource_command(
    xact_id: u64,
    sess: &SmfSess,
    linked_ebi: Option<u8>,
    pfcp: &mut dyn PfcpPath,
    gtp: &mut dyn GtpPath,
) -> SmfResult<()> {
    log::info!(
        "[{}] S8 Bearer Resource Command (LBI={:?})",
        sess.imsi_bcd, linked_ebi
    );

    if linked_ebi.is_some() {
        if let Err(e) = pfcp.send_session_modification_request(sess) {
            log::error!("[{}] PFCP session modification failed: {}", sess.imsi_bcd, e);
            return Err(e);
        }
    }
    let rsp = build_bearer_resource_failure_indication(OGS_GTP2_CAUSE_REQUEST_ACCEPTED);
    commit_response(sess, gtp, xact_id, rsp)
}

pub fn handle_bearer_resource_failure_indication(sess: &SmfSess, cause: Option<u8>) {
    match cause {
        Some(cause) => log::error!(
            "[{}] S8 Bearer Resource Failure Indication received: cause={}",
            sess.imsi_bcd, cause
        ),
        None => log::debug!(
            "[{}] S8 Bearer Resource Failure Indication without cause",
            sess.imsi_bcd
        ),
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Accept a peer response only when it carries the accepted cause
pub fn handle_response(
    sess: &SmfSess,
    procedure: S8Procedure,
    cause: Option<u8>,
) -> SmfResult<()> {
    match cause {
        Some(OGS_GTP2_CAUSE_REQUEST_ACCEPTED) => {
            log::info!("[{}] S8 {} Response accepted", sess.imsi_bcd, procedure);
            Ok(())
        }
        Some(cause) => {
            log::error!(
                "[{}] S8 {} Response rejected (cause={} {})",
                sess.imsi_bcd,
                procedure,
                cause,
                Gtp2Cause::from_u8(cause).map_or("Unknown", |c| c.name())
            );
            Err(SmfError::PeerRejected { procedure, cause })
        }
        None => {
            log::error!("[{}] S8 {} Response without cause", sess.imsi_bcd, procedure);
            Err(SmfError::MissingCause { procedure })
        }
    }
}

pub fn handle_create_session_response(sess: &SmfSess, cause: Option<u8>) -> SmfResult<()> {
    handle_response(sess, S8Procedure::CreateSession, cause)
}

pub fn handle_modify_bearer_response(sess: &SmfSess, cause: Option<u8>) -> SmfResult<()> {
    handle_response(sess, S8Procedure::ModifyBearer, cause)
}

pub fn handle_delete_session_response(sess: &SmfSess, cause: Option<u8>) -> SmfResult<()> {
    handle_response(sess, S8Procedure::DeleteSession, cause)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records PFCP requests; fails them when `fail` is set
    #[derive(Debug, Default)]
    pub(crate) struct MockPfcpPath {
        pub fail: bool,
        pub requests: Vec<&'static str>,
    }

    impl MockPfcpPath {
        fn record(&mut self, operation: &'static str) -> SmfResult<()> {
            if self.fail {
                return Err(SmfError::PfcpFailure {
                    operation,
                    reason: "no association".to_string(),
                });
            }
            self.requests.push(operation);
            Ok(())
        }
    }

    impl PfcpPath for MockPfcpPath {
        fn send_session_establishment_request(&mut self, _sess: &SmfSess) -> SmfResult<()> {
            self.record("session establishment")
        }
        fn send_session_modification_request(&mut self, _sess: &SmfSess) -> SmfResult<()> {
            self.record("session modification")
        }
        fn send_session_deletion_request(&mut self, _sess: &SmfSess) -> SmfResult<()> {
            self.record("session deletion")
        }
    }

    /// Records committed messages and timer operations; commits fail when
    /// `fail` is set
    #[derive(Debug, Default)]
    pub(crate) struct MockGtpPath {
        pub fail: bool,
        pub committed: Vec<(u64, S8Message)>,
        pub started: Vec<(u64, Duration)>,
        pub stopped: Vec<u64>,
    }

    impl GtpPath for MockGtpPath {
        fn commit(&mut self, xact_id: u64, message: S8Message) -> SmfResult<()> {
            if self.fail {
                return Err(SmfError::GtpCommitFailure {
                    xact_id,
                    reason: "peer unreachable".to_string(),
                });
            }
            self.committed.push((xact_id, message));
            Ok(())
        }
        fn start_timer(&mut self, xact_id: u64, _timer_id: SmfTimerId, duration: Duration) {
            self.started.push((xact_id, duration));
        }
        fn stop_timer(&mut self, xact_id: u64, _timer_id: SmfTimerId) {
            self.stopped.push(xact_id);
        }
    }

    fn sess() -> SmfSess {
        SmfSess::new(1, 1, "001010000000001", Some("internet"))
    }

    #[test]
    fn test_create_session_request_commits_accepted() {
        let mut pfcp = MockPfcpPath::default();
        let mut gtp = MockGtpPath::default();
        handle_create_session_request(9, &sess(), &mut pfcp, &mut gtp).unwrap();

        assert_eq!(pfcp.requests, vec!["session establishment"]);
        assert_eq!(
            gtp.committed,
            vec![(9, S8Message::CreateSessionResponse { cause: Some(16) })]
        );
    }

    #[test]
    fn test_pfcp_failure_sends_no_response() {
        let mut pfcp = MockPfcpPath {
            fail: true,
            ..Default::default()
        };
        let mut gtp = MockGtpPath::default();
        let err = handle_delete_session_request(3, &sess(), &mut pfcp, &mut gtp).unwrap_err();

        assert!(matches!(err, SmfError::PfcpFailure { .. }));
        assert!(gtp.committed.is_empty());
    }

    #[test]
    fn test_commit_failure_is_reported() {
        let mut pfcp = MockPfcpPath::default();
        let mut gtp = MockGtpPath {
            fail: true,
            ..Default::default()
        };
        let err = handle_create_session_request(2, &sess(), &mut pfcp, &mut gtp).unwrap_err();

        assert!(matches!(err, SmfError::GtpCommitFailure { xact_id: 2, .. }));
        assert_eq!(pfcp.requests, vec!["session establishment"]);
        assert!(gtp.committed.is_empty());
    }

    #[test]
    fn test_modify_bearer_without_contexts_skips_pfcp() {
        let mut pfcp = MockPfcpPath::default();
        let mut gtp = MockGtpPath::default();
        handle_modify_bearer_request(4, &sess(), false, &mut pfcp, &mut gtp).unwrap();
        assert!(pfcp.requests.is_empty());
        assert_eq!(gtp.committed.len(), 1);

        handle_modify_bearer_request(5, &sess(), true, &mut pfcp, &mut gtp).unwrap();
        assert_eq!(pfcp.requests, vec!["session modification"]);
    }

    #[test]
    fn test_bearer_resource_command_always_answers() {
        let mut pfcp = MockPfcpPath::default();
        let mut gtp = MockGtpPath::default();
        handle_bearer_resource_command(6, &sess(), None, &mut pfcp, &mut gtp).unwrap();
        handle_bearer_resource_command(7, &sess(), Some(5), &mut pfcp, &mut gtp).unwrap();

        assert_eq!(pfcp.requests, vec!["session modification"]);
        assert_eq!(gtp.committed.len(), 2);
        assert!(gtp.committed.iter().all(|(_, m)| m.cause() == Some(16)));
    }

    #[test]
    fn test_response_cause_check() {
        let s = sess();
        assert!(handle_create_session_response(&s, Some(16)).is_ok());
        assert!(matches!(
            handle_modify_bearer_response(&s, Some(64)),
            Err(SmfError::PeerRejected {
                procedure: S8Procedure::ModifyBearer,
                cause: 64
            })
        ));
        assert!(matches!(
            handle_delete_session_response(&s, None),
            Err(SmfError::MissingCause { .. })
        ));
    }
}

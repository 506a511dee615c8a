//! SMF Error Types
//!
//! Error types for S8 session control and its collaborators.

use thiserror::Error;

use crate::s8_build::S8Procedure;

/// SMF Error type
#[derive(Debug, Error)]
pub enum SmfError {
    /// User-plane session control (PFCP) request could not be sent
    #[error("PFCP {operation} failed: {reason}")]
    PfcpFailure {
        operation: &'static str,
        reason: String,
    },

    /// GTP path could not commit a response on its transaction
    #[error("GTP transaction {xact_id} commit failed: {reason}")]
    GtpCommitFailure { xact_id: u64, reason: String },

    /// Peer SMF answered with a non-accepted cause
    #[error("S8 {procedure} rejected by peer (cause={cause})")]
    PeerRejected { procedure: S8Procedure, cause: u8 },

    /// Peer SMF answered without a cause IE
    #[error("S8 {procedure} response carries no cause")]
    MissingCause { procedure: S8Procedure },

    /// No session with this identifier
    #[error("Session not found: {0}")]
    SessionNotFound(u64),
}

/// SMF Result type
pub type SmfResult<T> = Result<T, SmfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_rejected_display() {
        let err = SmfError::PeerRejected {
            procedure: S8Procedure::CreateSession,
            cause: 64,
        };
        assert_eq!(
            err.to_string(),
            "S8 Create Session rejected by peer (cause=64)"
        );
    }

    #[test]
    fn test_gtp_commit_failure_display() {
        let err = SmfError::GtpCommitFailure {
            xact_id: 7,
            reason: "peer unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "GTP transaction 7 commit failed: peer unreachable"
        );
    }

    #[test]
    fn test_pfcp_failure_display() {
        let err = SmfError::PfcpFailure {
            operation: "session establishment",
            reason: "no association".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "PFCP session establishment failed: no association"
        );
    }
}

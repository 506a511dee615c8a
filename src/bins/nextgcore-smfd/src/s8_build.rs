//! S8 GTP-C Message Building
//!
//! GTPv2-C (3GPP TS 29.274) messages exchanged with a peer SMF over S8, in
//! decoded form. Encoding and transport belong to the GTP path.

use std::fmt;

// ============================================================================
// GTPv2-C Message Types
// ============================================================================

/// GTPv2-C Message types used on S8
pub mod gtp2_message_type {
    pub const CREATE_SESSION_REQUEST: u8 = 32;
    pub const CREATE_SESSION_RESPONSE: u8 = 33;
    pub const MODIFY_BEARER_REQUEST: u8 = 34;
    pub const MODIFY_BEARER_RESPONSE: u8 = 35;
    pub const DELETE_SESSION_REQUEST: u8 = 36;
    pub const DELETE_SESSION_RESPONSE: u8 = 37;
    pub const BEARER_RESOURCE_COMMAND: u8 = 68;
    pub const BEARER_RESOURCE_FAILURE_INDICATION: u8 = 69;
}

// ============================================================================
// GTPv2-C Cause
// ============================================================================

/// GTPv2-C Cause values (subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gtp2Cause {
    RequestAccepted = 16,
    RequestAcceptedPartially = 17,
    ContextNotFound = 64,
    InvalidMessageFormat = 65,
    MandatoryIeIncorrect = 69,
    MandatoryIeMissing = 70,
    SystemFailure = 72,
    NoResourcesAvailable = 73,
    MissingOrUnknownApn = 78,
    RequestRejected = 94,
}

impl Gtp2Cause {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestAccepted => "Request accepted",
            Self::RequestAcceptedPartially => "Request accepted partially",
            Self::ContextNotFound => "Context Not Found",
            Self::InvalidMessageFormat => "Invalid Message Format",
            Self::MandatoryIeIncorrect => "Mandatory IE incorrect",
            Self::MandatoryIeMissing => "Mandatory IE missing",
            Self::SystemFailure => "System failure",
            Self::NoResourcesAvailable => "No resources available",
            Self::MissingOrUnknownApn => "Missing or unknown APN",
            Self::RequestRejected => "Request rejected",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            16 => Some(Self::RequestAccepted),
            17 => Some(Self::RequestAcceptedPartially),
            64 => Some(Self::ContextNotFound),
            65 => Some(Self::InvalidMessageFormat),
            69 => Some(Self::MandatoryIeIncorrect),
            70 => Some(Self::MandatoryIeMissing),
            72 => Some(Self::SystemFailure),
            73 => Some(Self::NoResourcesAvailable),
            78 => Some(Self::MissingOrUnknownApn),
            94 => Some(Self::RequestRejected),
            _ => None,
        }
    }
}

/// Cause value of an accepted request
pub const OGS_GTP2_CAUSE_REQUEST_ACCEPTED: u8 = Gtp2Cause::RequestAccepted as u8;

// ============================================================================
// Procedures
// ============================================================================

/// S8 procedure a transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S8Procedure {
    CreateSession,
    ModifyBearer,
    DeleteSession,
}

impl S8Procedure {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession => "Create Session",
            Self::ModifyBearer => "Modify Bearer",
            Self::DeleteSession => "Delete Session",
        }
    }

    /// Message type answering this procedure's request
    pub fn response_type(&self) -> u8 {
        match self {
            Self::CreateSession => gtp2_message_type::CREATE_SESSION_RESPONSE,
            Self::ModifyBearer => gtp2_message_type::MODIFY_BEARER_RESPONSE,
            Self::DeleteSession => gtp2_message_type::DELETE_SESSION_RESPONSE,
        }
    }
}

impl fmt::Display for S8Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Decoded S8 message. `cause` is None when the Cause IE is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S8Message {
    CreateSessionRequest,
    CreateSessionResponse { cause: Option<u8> },
    ModifyBearerRequest {
        /// Bearer Contexts to be modified IE present
        bearer_contexts_to_be_modified: bool,
    },
    ModifyBearerResponse { cause: Option<u8> },
    DeleteSessionRequest,
    DeleteSessionResponse { cause: Option<u8> },
    BearerResourceCommand {
        /// Linked EPS Bearer ID
        linked_ebi: Option<u8>,
    },
    BearerResourceFailureIndication { cause: Option<u8> },
}

impl S8Message {
    pub fn message_type(&self) -> u8 {
        use gtp2_message_type::*;
        match self {
            Self::CreateSessionRequest => CREATE_SESSION_REQUEST,
            Self::CreateSessionResponse { .. } => CREATE_SESSION_RESPONSE,
            Self::ModifyBearerRequest { .. } => MODIFY_BEARER_REQUEST,
            Self::ModifyBearerResponse { .. } => MODIFY_BEARER_RESPONSE,
            Self::DeleteSessionRequest => DELETE_SESSION_REQUEST,
            Self::DeleteSessionResponse { .. } => DELETE_SESSION_RESPONSE,
            Self::BearerResourceCommand { .. } => BEARER_RESOURCE_COMMAND,
            Self::BearerResourceFailureIndication { .. } => BEARER_RESOURCE_FAILURE_INDICATION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSessionRequest => "Create Session Request",
            Self::CreateSessionResponse { .. } => "Create Session Response",
            Self::ModifyBearerRequest { .. } => "Modify Bearer Request",
            Self::ModifyBearerResponse { .. } => "Modify Bearer Response",
            Self::DeleteSessionRequest => "Delete Session Request",
            Self::DeleteSessionResponse { .. } => "Delete Session Response",
            Self::BearerResourceCommand { .. } => "Bearer Resource Command",
            Self::BearerResourceFailureIndication { .. } => "Bearer Resource Failure Indication",
        }
    }

    /// Cause IE of a response or failure indication
    pub fn cause(&self) -> Option<u8> {
        match self {
            Self::CreateSessionResponse { cause }
            | Self::ModifyBearerResponse { cause }
            | Self::DeleteSessionResponse { cause }
            | Self::BearerResourceFailureIndication { cause } => *cause,
            _ => None,
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn build_create_session_response(cause: u8) -> S8Message {
    S8Message::CreateSessionResponse { cause: Some(cause) }
}

pub fn build_modify_bearer_response(cause: u8) -> S8Message {
    S8Message::ModifyBearerResponse { cause: Some(cause) }
}

pub fn build_delete_session_response(cause: u8) -> S8Message {
    S8Message::DeleteSessionResponse { cause: Some(cause) }
}

pub fn build_bearer_resource_failure_indication(cause: u8) -> S8Message {
    S8Message::BearerResourceFailureIndication { cause: Some(cause) }
}

//! Gx Message Model
//!
//! Decoded Credit-Control-Answer / Re-Auth-Request content as seen by the
//! policy compiler (3GPP TS 29.212).

use crate::context::{PccRule, Qos, SessionAmbr};

/// Gx Command Codes
pub mod cmd {
    pub const CREDIT_CONTROL: u32 = 272;
    pub const RE_AUTH: u32 = 258;
}

/// Diameter Result-Code values returned by the compiler
pub mod result_code {
    pub const DIAMETER_SUCCESS: u32 = 2001;
    pub const DIAMETER_AUTHENTICATION_REJECTED: u32 = 4001;
    pub const DIAMETER_UNABLE_TO_COMPLY: u32 = 5012;
}

/// CC-Request-Type values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CcRequestType {
    InitialRequest = 1,
    UpdateRequest = 2,
    TerminationRequest = 3,
    EventRequest = 4,
}

/// What a Gx message asks the SMF to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GxMessageKind {
    /// Credit-Control-Answer for a CCR-Initial (policy install)
    CcaInitial,
    /// Credit-Control-Answer for a CCR-Termination
    CcaTermination,
    /// Credit-Control-Answer for a CCR-Update (not consumed by the compiler)
    CcaUpdate,
    /// Re-Auth-Request pushed by the PCRF
    ReAuth,
}

impl GxMessageKind {
    pub fn cmd_code(&self) -> u32 {
        match self {
            Self::ReAuth => cmd::RE_AUTH,
            _ => cmd::CREDIT_CONTROL,
        }
    }

    pub fn cc_request_type(&self) -> Option<CcRequestType> {
        match self {
            Self::CcaInitial => Some(CcRequestType::InitialRequest),
            Self::CcaUpdate => Some(CcRequestType::UpdateRequest),
            Self::CcaTermination => Some(CcRequestType::TerminationRequest),
            Self::ReAuth => None,
        }
    }
}

/// Policy data carried by a CCA/RAR
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GxSessionData {
    pub ambr: SessionAmbr,
    pub qos: Qos,
    /// Charging-Rule-Install content, in received order
    pub pcc_rules: Vec<PccRule>,
}

/// Gx message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GxMessage {
    pub kind: GxMessageKind,
    /// Result code
    pub result_code: u32,
    /// Error pointer
    pub err: Option<u32>,
    pub session_data: GxSessionData,
}

impl GxMessage {
    /// Create a successful message of the given kind with no policy data
    pub fn new(kind: GxMessageKind) -> Self {
        Self {
            kind,
            result_code: result_code::DIAMETER_SUCCESS,
            err: None,
            session_data: GxSessionData::default(),
        }
    }

    pub fn with_result(mut self, result_code: u32, err: Option<u32>) -> Self {
        self.result_code = result_code;
        self.err = err;
        self
    }

    pub fn with_session_data(mut self, session_data: GxSessionData) -> Self {
        self.session_data = session_data;
        self
    }

    pub fn is_success(&self) -> bool {
        self.result_code == result_code::DIAMETER_SUCCESS
    }
}

//! NextGCore SMF Session Control Library
//!
//! Session-control core of the SMF for the EPC roaming path:
//!
//! - Gx policy compilation: PCC rules from the PCRF become the session's
//!   PDR/FAR/QER/URR rule graph (3GPP TS 29.212, TS 29.244)
//! - S8 session state machine: create/modify/delete transactions with a
//!   peer SMF over GTPv2-C (3GPP TS 29.274)
//!
//! PFCP and GTP-C transport, and bearer binding, are collaborators reached
//! through the `PfcpPath`, `GtpPath` and `BearerBinding` traits.

pub mod binding;
pub mod config;
pub mod context;
pub mod error;
pub mod gx_handler;
pub mod gx_message;
pub mod mirror;
pub mod pfcp_context;
pub mod s8_build;
pub mod s8_handler;
pub mod s8_sm;
pub mod timer;


pub use config::{ConfigError, SmfConfig};
pub use context::{SmfContext, SmfSess};
pub use error::{SmfError, SmfResult};
pub use mirror::{KvStore, MirrorContext, MirrorError, RedisKvStore};
pub use s8_sm::{S8Event, S8FsmResult, S8State};

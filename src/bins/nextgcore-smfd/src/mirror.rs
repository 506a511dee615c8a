//! Session Mirror
//!
//! Best-effort copy of UE session metadata into an external key-value store
//! for observability. The mirror is never authoritative: every failure is
//! logged and swallowed so session control is unaffected.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::Commands;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MirrorConfig;
use crate::context::SmfSess;

/// Mirror errors
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Mirror backend not connected")]
    NotConnected,
    #[error("Mirror backend error: {0}")]
    Backend(String),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cannot encode session record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value backend
pub trait KvStore: Send {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), MirrorError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), MirrorError>;
    fn del(&mut self, key: &str) -> Result<(), MirrorError>;
    fn disconnect(&mut self);
}

// ============================================================================
// Redis backend
// ============================================================================

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Redis backend
#[derive(Default)]
pub struct RedisKvStore {
    conn: Option<redis::Connection>,
}

impl RedisKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn conn(&mut self) -> Result<&mut redis::Connection, MirrorError> {
        self.conn.as_mut().ok_or(MirrorError::NotConnected)
    }
}

impl KvStore for RedisKvStore {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), MirrorError> {
        let client = redis::Client::open(format!("redis://{host}:{port}/").as_str())?;
        self.conn = Some(client.get_connection_with_timeout(REDIS_CONNECT_TIMEOUT)?);
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), MirrorError> {
        self.conn()?.set::<_, _, ()>(key, value)?;
        Ok(())
    }

    fn del(&mut self, key: &str) -> Result<(), MirrorError> {
        self.conn()?.del::<_, ()>(key)?;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.conn = None;
    }
}

// ============================================================================
// Mirror context
// ============================================================================

/// Mirrored view of one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub imsi: String,
    pub apn: Option<String>,
    pub ue_ipv4: Option<String>,
    pub ue_ipv6: Option<String>,
    pub state: String,
    pub smf_id: String,
    pub timestamp: u64,
}

impl SessionRecord {
    pub fn from_sess(sess: &SmfSess, smf_id: &str) -> Self {
        Self {
            imsi: sess.imsi_bcd.clone(),
            apn: sess.session_name.clone(),
            ue_ipv4: sess.ipv4_addr.map(|a| a.to_string()),
            ue_ipv6: sess.ipv6_prefix.map(|(len, a)| format!("{a}/{len}")),
            state: sess.state().to_string(),
            smf_id: smf_id.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Mirror context, created at startup and torn down at shutdown
pub struct MirrorContext {
    config: MirrorConfig,
    store: Box<dyn KvStore>,
    connected: bool,
}

impl MirrorContext {
    pub fn new(config: MirrorConfig, store: Box<dyn KvStore>) -> Self {
        Self {
            config,
            store,
            connected: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn key(&self, imsi_bcd: &str) -> String {
        format!("{}_{}", self.config.key_prefix, imsi_bcd)
    }

    /// Connect to the backend. A failure leaves the mirror disconnected.
    pub fn init(&mut self) {
        if !self.config.enabled {
            log::info!("Session mirror disabled");
            return;
        }
        match self.store.connect(&self.config.host, self.config.port) {
            Ok(()) => {
                self.connected = true;
                log::info!(
                    "Session mirror connected to {}:{}",
                    self.config.host, self.config.port
                );
            }
            Err(e) => {
                self.connected = false;
                log::warn!(
                    "Session mirror connection to {}:{} failed: {}",
                    self.config.host, self.config.port, e
                );
            }
        }
    }

    pub fn reconnect(&mut self) {
        if self.config.enabled && !self.connected {
            self.store.disconnect();
            self.init();
        }
    }

    pub fn update_session(&mut self, sess: &SmfSess, smf_id: &str) {
        if !self.ready() {
            return;
        }
        let key = self.key(&sess.imsi_bcd);
        let result = serde_json::to_string(&SessionRecord::from_sess(sess, smf_id))
            .map_err(MirrorError::from)
            .and_then(|value| self.store.set(&key, &value));
        self.check(&key, result);
    }

    pub fn remove_session(&mut self, sess: &SmfSess) {
        if !self.ready() {
            return;
        }
        let key = self.key(&sess.imsi_bcd);
        let result = self.store.del(&key);
        self.check(&key, result);
    }

    pub fn fini(&mut self) {
        if self.connected {
            self.store.disconnect();
            self.connected = false;
            log::info!("Session mirror disconnected");
        }
    }

    fn ready(&self) -> bool {
        if self.config.enabled && !self.connected {
            log::debug!("Session mirror not connected, update skipped");
        }
        self.config.enabled && self.connected
    }

    fn check(&mut self, key: &str, result: Result<(), MirrorError>) {
        if let Err(e) = result {
            log::warn!("Session mirror update of {} failed: {}", key, e);
            if !matches!(e, MirrorError::Encode(_)) {
                self.connected = false;
            }
        }
    }
}

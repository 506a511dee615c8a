//! SMF Configuration
//!
//! YAML configuration for the policy compiler, S8 transaction timers and the
//! session mirror. Every field has a default so a partial `smf:` section is
//! accepted.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default IMS voice DNN/APN
pub const DEFAULT_IMS_DNN: &str = "ims";
/// Default maximum number of flows per PCC rule
pub const OGS_MAX_NUM_OF_FLOW: usize = 8;
/// Default URR time threshold (1 hour)
pub const DEFAULT_URR_TIME_THRESHOLD: u32 = 3600;
/// Default URR total volume threshold (1 GiB)
pub const DEFAULT_URR_VOLUME_THRESHOLD: u64 = 1 << 30;
/// Default GTP-C T3-RESPONSE (seconds)
pub const DEFAULT_T3_RESPONSE_SECS: u64 = 3;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Usage reporting defaults applied to rating-group URRs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrrConfig {
    /// Time threshold in seconds
    pub time_threshold: u32,
    /// Total volume threshold in bytes
    pub volume_threshold: u64,
}

impl Default for UrrConfig {
    fn default() -> Self {
        Self {
            time_threshold: DEFAULT_URR_TIME_THRESHOLD,
            volume_threshold: DEFAULT_URR_VOLUME_THRESHOLD,
        }
    }
}

/// S8 transaction parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S8Config {
    /// Response wait time in seconds
    pub t3_response: u64,
}

impl Default for S8Config {
    fn default() -> Self {
        Self {
            t3_response: DEFAULT_T3_RESPONSE_SECS,
        }
    }
}

impl S8Config {
    pub fn t3_response_duration(&self) -> Duration {
        Duration::from_secs(self.t3_response)
    }
}

/// Session mirror (external key-value store) settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Keys are written as `<key_prefix>_<imsi>`
    pub key_prefix: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 6379,
            key_prefix: "smf".to_string(),
        }
    }
}

/// SMF configuration (`smf:` section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmfConfig {
    /// Node name reported in the session mirror
    pub name: String,
    /// Reserved IMS voice DNN; sessions on it bypass Gx result checks
    pub ims_dnn: String,
    /// Maximum number of flows accepted in one PCC rule
    pub max_num_of_flow: usize,
    /// SMF GTP-U address (IPv4)
    pub gtpu_addr: Option<Ipv4Addr>,
    /// SMF GTP-U address (IPv6)
    pub gtpu_addr6: Option<Ipv6Addr>,
    pub urr: UrrConfig,
    pub s8: S8Config,
    pub mirror: MirrorConfig,
}

impl Default for SmfConfig {
    fn default() -> Self {
        Self {
            name: "nextgcore-smfd".to_string(),
            ims_dnn: DEFAULT_IMS_DNN.to_string(),
            max_num_of_flow: OGS_MAX_NUM_OF_FLOW,
            gtpu_addr: Some(Ipv4Addr::LOCALHOST),
            gtpu_addr6: None,
            urr: UrrConfig::default(),
            s8: S8Config::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    smf: SmfConfig,
}

impl SmfConfig {
    /// Parse from a YAML document holding an `smf:` section
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(content)?;
        file.smf.validate()?;
        Ok(file.smf)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ims_dnn.trim().is_empty() {
            return Err(ConfigError::Validation("ims_dnn must not be empty".into()));
        }
        if self.max_num_of_flow == 0 {
            return Err(ConfigError::Validation(
                "max_num_of_flow must be at least 1".into(),
            ));
        }
        if self.urr.volume_threshold == 0 {
            return Err(ConfigError::Validation(
                "urr.volume_threshold must be non-zero".into(),
            ));
        }
        if self.gtpu_addr.is_none() && self.gtpu_addr6.is_none() {
            return Err(ConfigError::Validation(
                "one of gtpu_addr/gtpu_addr6 is required".into(),
            ));
        }
        Ok(())
    }
}

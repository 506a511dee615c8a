//! SMF Timer Management
//!
//! Timer identifiers and configuration for S8 transactions. Timers are armed
//! and cancelled through the GTP path; expiry comes back as an S8 timer event.

use std::time::Duration;

use crate::config::SmfConfig;

// ============================================================================
// Timer IDs
// ============================================================================

/// SMF timer identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmfTimerId {
    /// No response to an S8 request within T3-RESPONSE
    S8T3Response,
}

impl SmfTimerId {
    /// Get timer name
    pub fn name(&self) -> &'static str {
        match self {
            Self::S8T3Response => "SMF_TIMER_S8_T3_RESPONSE",
        }
    }
}

// ============================================================================
// Timer Configuration
// ============================================================================

/// Timer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Timer is configured
    pub enabled: bool,
    /// Timer duration
    pub duration: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::ZERO,
        }
    }
}

impl TimerConfig {
    pub fn new(duration: Duration) -> Self {
        Self {
            enabled: !duration.is_zero(),
            duration,
        }
    }
}

/// SMF timer configurations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmfTimerConfigs {
    pub s8_t3_response: TimerConfig,
}

impl SmfTimerConfigs {
    pub fn from_config(config: &SmfConfig) -> Self {
        Self {
            s8_t3_response: TimerConfig::new(config.s8.t3_response_duration()),
        }
    }

    pub fn get(&self, timer_id: SmfTimerId) -> &TimerConfig {
        match timer_id {
            SmfTimerId::S8T3Response => &self.s8_t3_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_name() {
        assert_eq!(SmfTimerId::S8T3Response.name(), "SMF_TIMER_S8_T3_RESPONSE");
    }

    #[test]
    fn test_from_config() {
        let timers = SmfTimerConfigs::from_config(&SmfConfig::default());
        let t3 = timers.get(SmfTimerId::S8T3Response);
        assert!(t3.enabled);
        assert_eq!(t3.duration, Duration::from_secs(3));
    }

    #[test]
    fn test_zero_duration_disables() {
        let mut config = SmfConfig::default();
        config.s8.t3_response = 0;
        let timers = SmfTimerConfigs::from_config(&config);
        assert!(!timers.s8_t3_response.enabled);
    }
}

//! SMF Policy Binding
//!
//! Contract of the bearer binding engine that re-maps the session's PCC rules
//! onto bearers after a Re-Auth-Request. Dedicated-bearer orchestration lives
//! behind this trait; the Gx handler only triggers it.

use crate::context::SmfSess;

/// Bearer binding engine
pub trait BearerBinding {
    /// Re-bind `sess.pcc_rules` onto the session's bearers.
    ///
    /// Called once per Re-Auth-Request, after the stored rule list has been
    /// replaced. Implementations own any PFCP/GTP signalling this requires.
    fn bearer_binding(&mut self, sess: &mut SmfSess);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records the rule names seen on each binding call
    #[derive(Debug, Default)]
    pub(crate) struct RecordingBinding {
        pub calls: Vec<Vec<String>>,
    }

    impl BearerBinding for RecordingBinding {
        fn bearer_binding(&mut self, sess: &mut SmfSess) {
            self.calls
                .push(sess.pcc_rules.iter().map(|r| r.name.clone()).collect());
        }
    }

    #[test]
    fn test_recording_binding() {
        let mut binding = RecordingBinding::default();
        let mut sess = SmfSess::new(1, 1, "001010000000001", Some("internet"));
        sess.pcc_rules.push(crate::context::PccRule::new("rule-a"));
        binding.bearer_binding(&mut sess);
        assert_eq!(binding.calls, vec![vec!["rule-a".to_string()]]);
    }
}

//! Embedder-facing configuration (spec §6 configuration table). Every field
//! is optional with a documented default, matching the teacher's habit of
//! serde-deriving its config/identity records for embedding in JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub presence_broadcast_interval_ms: u64,
    pub fast_switchboard_request_interval_ms: u64,
    pub slow_switchboard_request_interval_ms: u64,
    pub garbage_collect_interval_ms: u64,
    pub max_message_rate_before_rude: Option<u32>,
    pub max_connections: usize,
    pub memory_duration_ms: u64,
    pub message_ttl_max: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            presence_broadcast_interval_ms: 5_000,
            fast_switchboard_request_interval_ms: 500,
            slow_switchboard_request_interval_ms: 3_000,
            garbage_collect_interval_ms: 5_000,
            max_message_rate_before_rude: None,
            max_connections: 10,
            memory_duration_ms: 60_000,
            message_ttl_max: 6,
        }
    }
}

impl Config {
    pub fn presence_broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.presence_broadcast_interval_ms)
    }

    pub fn fast_switchboard_request_interval(&self) -> Duration {
        Duration::from_millis(self.fast_switchboard_request_interval_ms)
    }

    pub fn slow_switchboard_request_interval(&self) -> Duration {
        Duration::from_millis(self.slow_switchboard_request_interval_ms)
    }

    pub fn garbage_collect_interval(&self) -> Duration {
        Duration::from_millis(self.garbage_collect_interval_ms)
    }

    pub fn memory_duration(&self) -> Duration {
        Duration::from_millis(self.memory_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let c = Config::default();
        assert_eq!(c.presence_broadcast_interval_ms, 5_000);
        assert_eq!(c.fast_switchboard_request_interval_ms, 500);
        assert_eq!(c.slow_switchboard_request_interval_ms, 3_000);
        assert_eq!(c.garbage_collect_interval_ms, 5_000);
        assert_eq!(c.max_connections, 10);
        assert_eq!(c.memory_duration_ms, 60_000);
        assert_eq!(c.message_ttl_max, 6);
        assert!(c.max_message_rate_before_rude.is_none());
    }
}

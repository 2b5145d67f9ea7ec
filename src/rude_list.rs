//! Per-sender rate accounting and drop decisions (spec §3, §4.5). Testable
//! property P7 (§8): a sender exceeding `max_message_rate_before_rude`
//! within any 1-second window receives no new Connections for as long as
//! the window remains saturated.

use crate::types::Address;
use dashmap::DashMap;
use std::time::{Duration, Instant};

const RUDE_WINDOW: Duration = Duration::from_millis(1000);

pub struct RudeList {
    timestamps: DashMap<Address, Vec<Instant>>,
    max_message_rate: Option<u32>,
}

impl RudeList {
    pub fn new(max_message_rate: Option<u32>) -> Self {
        RudeList {
            timestamps: DashMap::new(),
            max_message_rate,
        }
    }

    /// Appends `now` to `address`'s timestamp vector.
    pub fn register(&self, address: &Address) {
        let mut entry = self.timestamps.entry(address.clone()).or_default();
        entry.push(Instant::now());
    }

    /// Evicts timestamps older than the 1-second window and returns whether
    /// `address`'s remaining count exceeds the configured threshold. With no
    /// threshold configured (`max_message_rate_before_rude` default of
    /// infinity), no sender is ever rude.
    pub fn is_rude(&self, address: &Address) -> bool {
        let Some(max_rate) = self.max_message_rate else {
            return false;
        };
        let Some(mut entry) = self.timestamps.get_mut(address) else {
            return false;
        };
        entry.retain(|t| t.elapsed() < RUDE_WINDOW);
        entry.len() as u32 > max_rate
    }
}

//! Time-bounded set of recently seen message ids (spec §3, §4.6). Bounded
//! memory is testable property P4 (§8): `|SeenMemory|` is bounded by the
//! number of distinct messages observed within `memory_duration`.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub struct SeenMemory {
    seen: DashMap<String, Instant>,
    memory_duration: Duration,
}

impl SeenMemory {
    pub fn new(memory_duration: Duration) -> Self {
        SeenMemory {
            seen: DashMap::new(),
            memory_duration,
        }
    }

    /// Returns `true` if `id` was already present (a duplicate).
    pub fn add(&self, id: &str) -> bool {
        if self.has(id) {
            return true;
        }
        self.seen.insert(id.to_string(), Instant::now());
        false
    }

    pub fn has(&self, id: &str) -> bool {
        self.seen.contains_key(id)
    }

    /// Evicts entries older than `memory_duration`. Run periodically from
    /// the GC timer (spec §4.7) and also invoked by
    /// `ConnectionManager::gc`.
    pub fn sweep(&self) {
        let cutoff = self.memory_duration;
        self.seen.retain(|_, inserted_at| inserted_at.elapsed() < cutoff);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_detected() {
        let memory = SeenMemory::new(Duration::from_secs(60));
        assert!(!memory.add("m1"));
        assert!(memory.add("m1"));
        assert!(memory.has("m1"));
    }

    #[test]
    fn sweep_evicts_only_expired_entries() {
        let memory = SeenMemory::new(Duration::from_millis(10));
        memory.add("old");
        std::thread::sleep(Duration::from_millis(30));
        memory.add("new");
        memory.sweep();
        assert!(!memory.has("old"));
        assert!(memory.has("new"));
    }

    #[test]
    fn bounded_by_distinct_messages_observed() {
        let memory = SeenMemory::new(Duration::from_secs(60));
        for i in 0..50 {
            memory.add(&format!("m{i}"));
        }
        // re-observing the same ids must not grow memory (P4)
        for i in 0..50 {
            memory.add(&format!("m{i}"));
        }
        assert_eq!(memory.len(), 50);
    }
}

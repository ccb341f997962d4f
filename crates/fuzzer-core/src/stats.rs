//! Live request-completion counters keyed by `Request::stat_key` (§4.6:
//! "Done(req, res): ... increment stats[req.statKey]").

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct Stats {
    counts: Mutex<HashMap<String, u64>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, key: &str) {
        let mut counts = self.counts.lock().unwrap();
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_accumulates_per_key() {
        let stats = Stats::new();
        stats.increment("generate");
        stats.increment("generate");
        stats.increment("triage");
        assert_eq!(stats.get("generate"), 2);
        assert_eq!(stats.get("triage"), 1);
        assert_eq!(stats.get("unknown"), 0);
    }
}

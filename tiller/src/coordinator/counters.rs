//! Per-consistency-level request counters

use super::Consistency;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
struct LevelCounters {
    count: u64,
    total_latency_ms: f64,
    failures: u64,
    quorum_not_achieved: u64,
}

/// Summary for one consistency level as served by `/consistency-metrics`
#[derive(Debug, Clone, Serialize)]
pub struct LevelSummary {
    pub count: u64,
    pub avg_latency_ms: f64,
    pub failures: u64,
    pub quorum_not_achieved: u64,
    pub success_rate: f64,
}

/// Counters updated on every completed request, one lock for both levels
#[derive(Default)]
pub struct ConsistencyCounters {
    eventual: Mutex<LevelCounters>,
    strong: Mutex<LevelCounters>,
}

impl ConsistencyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn level(&self, level: Consistency) -> &Mutex<LevelCounters> {
        match level {
            Consistency::Eventual => &self.eventual,
            Consistency::Strong => &self.strong,
        }
    }

    pub fn record_success(&self, level: Consistency, latency_ms: f64) {
        let mut counters = self.level(level).lock();
        counters.count += 1;
        counters.total_latency_ms += latency_ms;
    }

    pub fn record_failure(&self, level: Consistency) {
        self.level(level).lock().failures += 1;
    }

    /// STRONG write that was durable on the primary but whose quorum did not
    /// catch up in time. Counted alongside the success.
    pub fn record_quorum_not_achieved(&self, level: Consistency) {
        self.level(level).lock().quorum_not_achieved += 1;
    }

    pub fn reset(&self) {
        *self.eventual.lock() = LevelCounters::default();
        *self.strong.lock() = LevelCounters::default();
    }

    pub fn summary(&self) -> BTreeMap<String, LevelSummary> {
        let mut out = BTreeMap::new();
        for level in [Consistency::Eventual, Consistency::Strong] {
            let counters = self.level(level).lock().clone();
            let avg_latency_ms = if counters.count > 0 {
                counters.total_latency_ms / counters.count as f64
            } else {
                0.0
            };
            let attempts = counters.count + counters.failures;
            let success_rate = if attempts > 0 {
                counters.count as f64 / attempts as f64 * 100.0
            } else {
                100.0
            };
            out.insert(
                level.as_str().to_string(),
                LevelSummary {
                    count: counters.count,
                    avg_latency_ms,
                    failures: counters.failures,
                    quorum_not_achieved: counters.quorum_not_achieved,
                    success_rate,
                },
            );
        }
        out
    }
}

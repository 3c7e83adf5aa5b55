//! The read pipeline: replica routing under tunable consistency
//!
//! STRONG reads execute on the primary with no fallback; in a log-shipping
//! cluster a follower cannot serve a linearizable read without per-session
//! bookkeeping. EVENTUAL reads go to the lowest-latency healthy follower
//! and fall back to the primary once on failure.

use super::{Consistency, Coordinator, QueryOutcome};
use crate::error::{Error, Result};
use crate::topology::InstanceDescriptor;
use rand::seq::SliceRandom;
use std::time::Instant;
use tracing::{debug, warn};

impl Coordinator {
    pub(crate) async fn read_statement(
        &self,
        statement: &str,
        level: Consistency,
    ) -> Result<QueryOutcome> {
        let start = Instant::now();

        match level {
            Consistency::Strong => {
                let primary = self.topology.primary();
                let rows = self
                    .engine
                    .execute_read(&primary, statement)
                    .await
                    .map_err(|e| Error::ExecutionError(e.to_string()))?;
                self.finish_read(level, rows, primary.id, start)
            }
            Consistency::Eventual => {
                match self.pick_read_target() {
                    Some(follower) => {
                        match self.engine.execute_read(&follower, statement).await {
                            Ok(rows) => self.finish_read(level, rows, follower.id, start),
                            Err(e) => {
                                // Single fallback to the primary
                                warn!(
                                    follower = %follower.id,
                                    "replica read failed, falling back to primary: {}", e
                                );
                                let primary = self.topology.primary();
                                let rows = self
                                    .engine
                                    .execute_read(&primary, statement)
                                    .await
                                    .map_err(|e| Error::ExecutionError(e.to_string()))?;
                                self.finish_read(level, rows, primary.id, start)
                            }
                        }
                    }
                    None => {
                        let primary = self.topology.primary();
                        let rows = self
                            .engine
                            .execute_read(&primary, statement)
                            .await
                            .map_err(|e| Error::ExecutionError(e.to_string()))?;
                        self.finish_read(level, rows, primary.id, start)
                    }
                }
            }
        }
    }

    /// Choose the follower to serve an EVENTUAL read: lowest-latency healthy
    /// follower per the latest snapshot; a random follower when metrics are
    /// unavailable; none (primary) when no follower qualifies.
    fn pick_read_target(&self) -> Option<InstanceDescriptor> {
        let followers = self.topology.followers();
        if followers.is_empty() {
            return None;
        }

        let snapshot = self.sampler.snapshot();
        if snapshot.replicas.is_empty() {
            debug!("metrics unavailable, picking a random follower");
            return followers.choose(&mut rand::thread_rng()).cloned();
        }

        followers
            .iter()
            .filter_map(|f| {
                snapshot
                    .get(&f.id)
                    .filter(|m| m.is_healthy)
                    .map(|m| (f, m.latency_ms))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(f, _)| f.clone())
    }

    fn finish_read(
        &self,
        level: Consistency,
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
        executed_on: String,
        start: Instant,
    ) -> Result<QueryOutcome> {
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.counters.record_success(level, latency_ms);
        Ok(QueryOutcome {
            success: true,
            message: format!("Read complete ({})", level.as_str()),
            timestamp: None,
            rows_affected: Some(rows.len() as u64),
            data: Some(rows),
            executed_on,
            consistency_level: level,
            latency_ms,
            quorum_achieved: None,
            replica_caught_up: None,
        })
    }
}

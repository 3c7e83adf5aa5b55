//! The write pipeline: timestamp → primary apply → quorum catch-up → respond
//!
//! A write is acknowledged only after it is durable on the primary.
//! STRONG writes additionally wait for every member of the Cabinet quorum
//! to report a watermark at or above the write's timestamp; a catch-up
//! timeout is a soft failure: the write stays durable and propagates via
//! the binlog, and the response says so with `quorum_achieved = false`.

use super::{Consistency, Coordinator, QueryOutcome};
use crate::error::{Error, Result};
use crate::quorum::select_quorum;
use crate::topology::InstanceDescriptor;
use std::time::Instant;
use tracing::{info, warn};

struct CatchupOutcome {
    achieved: bool,
    caught_up: Vec<String>,
}

impl Coordinator {
    pub(crate) async fn write_statement(
        &self,
        statement: &str,
        table: Option<&str>,
        level: Consistency,
    ) -> Result<QueryOutcome> {
        let start = Instant::now();

        let grant = self.allocator.next().await?;
        let timestamp = grant.timestamp;

        // Select the quorum before touching the primary so an unservable
        // STRONG write is rejected without side effects.
        let quorum = match level {
            Consistency::Strong => Some(select_quorum(
                &self.sampler.snapshot(),
                &self.topology.snapshot(),
            )?),
            Consistency::Eventual => None,
        };

        let primary = self.topology.primary();
        let (rows_affected, executed_on) = match self
            .engine
            .apply_write(&primary, statement, timestamp, table)
            .await
        {
            Ok(rows) => (rows, primary),
            Err(e) if e.indicates_primary_loss() => {
                warn!(
                    primary = %primary.id,
                    "write failed with a primary-loss symptom, starting failover: {}", e
                );
                self.failover.run(&[]).await?;

                let new_primary = self.topology.primary();
                let rows = self
                    .engine
                    .apply_write(&new_primary, statement, timestamp, table)
                    .await
                    .map_err(|retry_err| {
                        Error::PrimaryUnavailable(format!(
                            "write failed on new primary {}: {}",
                            new_primary.id, retry_err
                        ))
                    })?;
                (rows, new_primary)
            }
            Err(Error::Database(db)) => return Err(Error::ExecutionError(db.to_string())),
            Err(e) => return Err(e),
        };

        let quorum = match quorum {
            Some(quorum) => quorum,
            None => {
                // EVENTUAL: the binlog propagates the write asynchronously;
                // the response does not wait and carries no receipt.
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.counters.record_success(level, latency_ms);
                return Ok(QueryOutcome {
                    success: true,
                    message: format!("Write applied (EVENTUAL, timestamp {})", timestamp),
                    timestamp: Some(timestamp),
                    rows_affected: Some(rows_affected),
                    data: None,
                    executed_on: executed_on.id,
                    consistency_level: level,
                    latency_ms,
                    quorum_achieved: None,
                    replica_caught_up: None,
                });
            }
        };
        let members = self.quorum_descriptors(&quorum.quorum);
        let catchup = self.wait_for_catchup(&members, timestamp).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.counters.record_success(level, latency_ms);
        if catchup.achieved {
            info!(
                timestamp,
                quorum = ?quorum.quorum,
                "quorum caught up"
            );
            Ok(QueryOutcome {
                success: true,
                message: format!(
                    "Write applied (STRONG, timestamp {}, {}/{} quorum members confirmed)",
                    timestamp,
                    catchup.caught_up.len(),
                    quorum.quorum_size
                ),
                timestamp: Some(timestamp),
                rows_affected: Some(rows_affected),
                data: None,
                executed_on: executed_on.id,
                consistency_level: level,
                latency_ms,
                quorum_achieved: Some(true),
                replica_caught_up: Some(true),
            })
        } else {
            self.counters.record_quorum_not_achieved(level);
            metrics::counter!("tiller_quorum_not_achieved_total").increment(1);
            warn!(
                timestamp,
                caught_up = catchup.caught_up.len(),
                quorum_size = quorum.quorum_size,
                "quorum catch-up timed out; write remains durable on the primary"
            );
            Ok(QueryOutcome {
                success: true,
                message: format!(
                    "Write applied on primary (timestamp {}), but only {}/{} quorum members \
                     caught up in time; data will propagate via binlog",
                    timestamp,
                    catchup.caught_up.len(),
                    quorum.quorum_size
                ),
                timestamp: Some(timestamp),
                rows_affected: Some(rows_affected),
                data: None,
                executed_on: executed_on.id,
                consistency_level: level,
                latency_ms,
                quorum_achieved: Some(false),
                replica_caught_up: Some(false),
            })
        }
    }

    fn quorum_descriptors(&self, ids: &[String]) -> Vec<InstanceDescriptor> {
        ids.iter()
            .filter_map(|id| self.config.instance(id).cloned())
            .collect()
    }

    /// Poll every quorum member until all report a watermark ≥ the write's
    /// timestamp or the deadline passes.
    async fn wait_for_catchup(
        &self,
        members: &[InstanceDescriptor],
        timestamp: u64,
    ) -> CatchupOutcome {
        let deadline = Instant::now() + self.config.write.catchup_timeout();

        loop {
            let checks = futures::future::join_all(members.iter().map(|member| async move {
                match self.engine.last_applied_timestamp(member).await {
                    Ok(ts) => (member.id.clone(), ts >= timestamp),
                    Err(_) => (member.id.clone(), false),
                }
            }))
            .await;

            let caught_up: Vec<String> = checks
                .iter()
                .filter(|(_, ok)| *ok)
                .map(|(id, _)| id.clone())
                .collect();

            if caught_up.len() == members.len() && !members.is_empty() {
                return CatchupOutcome {
                    achieved: true,
                    caught_up,
                };
            }

            if Instant::now() >= deadline {
                return CatchupOutcome {
                    achieved: false,
                    caught_up,
                };
            }

            tokio::time::sleep(self.config.write.catchup_poll()).await;
        }
    }
}

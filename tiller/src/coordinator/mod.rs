//! Request coordination
//!
//! The coordinator owns the full statement path: classification, timestamp
//! allocation, primary apply, quorum catch-up, replica routing, and the
//! failover hand-off when the primary drops mid-write.

mod counters;
mod read;
mod write;

pub use counters::{ConsistencyCounters, LevelSummary};

use crate::allocator::Allocator;
use crate::config::Config;
use crate::engine::EngineClient;
use crate::error::{Error, Result};
use crate::failover::FailoverOrchestrator;
use crate::sampler::MetricsSampler;
use crate::statement::classify;
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Tunable consistency for reads and writes.
///
/// EVENTUAL returns once the primary applied; STRONG additionally waits for
/// the Cabinet quorum (writes) or pins execution to the primary (reads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Consistency {
    Eventual,
    Strong,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::Strong
    }
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Consistency::Eventual => "EVENTUAL",
            Consistency::Strong => "STRONG",
        }
    }
}

/// Result of one coordinated statement
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Map<String, Value>>>,
    pub executed_on: String,
    pub consistency_level: Consistency,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum_achieved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replica_caught_up: Option<bool>,
}

pub struct Coordinator {
    config: Arc<Config>,
    engine: Arc<EngineClient>,
    topology: Arc<Topology>,
    allocator: Arc<dyn Allocator>,
    sampler: Arc<MetricsSampler>,
    failover: Arc<FailoverOrchestrator>,
    counters: ConsistencyCounters,
}

impl Coordinator {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<EngineClient>,
        topology: Arc<Topology>,
        allocator: Arc<dyn Allocator>,
        sampler: Arc<MetricsSampler>,
        failover: Arc<FailoverOrchestrator>,
    ) -> Self {
        Self {
            config,
            engine,
            topology,
            allocator,
            sampler,
            failover,
            counters: ConsistencyCounters::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn engine(&self) -> &Arc<EngineClient> {
        &self.engine
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.allocator
    }

    pub fn sampler(&self) -> &Arc<MetricsSampler> {
        &self.sampler
    }

    pub fn failover(&self) -> &Arc<FailoverOrchestrator> {
        &self.failover
    }

    pub fn counters(&self) -> &ConsistencyCounters {
        &self.counters
    }

    /// Execute one client statement at the requested consistency level.
    ///
    /// Unclassifiable statements are rejected here; everything else is
    /// routed to the write or read pipeline.
    pub async fn execute(&self, statement: &str, level: Consistency) -> Result<QueryOutcome> {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidStatement("statement is empty".to_string()));
        }

        let classified = classify(trimmed);
        let result = if classified.kind.is_write() {
            self.write_statement(trimmed, classified.table.as_deref(), level)
                .await
        } else if classified.kind.is_read() {
            self.read_statement(trimmed, level).await
        } else {
            return Err(Error::InvalidStatement(format!(
                "unsupported statement kind: {}",
                classified.kind.as_str()
            )));
        };

        if result.is_err() {
            self.counters.record_failure(level);
        }
        result
    }

    /// Destructive reset: clear user tables on the primary (the truncations
    /// replicate through the binlog), zero the logical watermarks, reset the
    /// allocator shards and all in-memory counters.
    pub async fn clear_data(&self) -> Result<Vec<String>> {
        let primary = self.topology.primary();
        tracing::warn!(primary = %primary.id, "clearing all data");

        let tables = self.engine.user_tables(&primary).await?;
        for table in &tables {
            self.engine.truncate_table(&primary, table).await?;
        }
        self.engine.reset_metadata(&primary).await?;
        self.allocator.reset_all().await?;
        self.counters.reset();
        self.sampler.reset_counters();

        Ok(tables)
    }
}

//! Tiller - coordination plane for replicated MySQL clusters
//!
//! Tiller fronts a cluster of one writable primary and several read-only
//! followers kept in sync by the engine's native binlog replication. It
//! assigns every mutating statement a globally ordered logical timestamp,
//! applies it on the primary, and (at STRONG consistency) confirms
//! durability against an adaptively chosen follower quorum before
//! acknowledging. On primary loss it elects the fittest follower, promotes
//! it, and rewires the survivors.
//!
//! # Architecture
//!
//! - **Allocator**: K stateless shard processes hand out disjoint timestamp
//!   lanes; the coordinator fans out over them through one capability trait
//! - **Sampler**: background task probing every instance for latency and
//!   logical watermarks, published as immutable snapshots
//! - **Cabinet**: majority-sized write quorum composed from the currently
//!   fittest followers
//! - **SEER**: leader election scored on latency, stability and lag
//! - **Coordinator**: the write and read pipelines plus per-level counters
//! - **Failover**: detect → elect → promote → rewire → rejoin state machine
//! - **API**: axum control surface binding it all together

pub mod allocator;
pub mod api;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod elect;
pub mod engine;
pub mod error;
pub mod failover;
pub mod quorum;
pub mod sampler;
pub mod statement;
pub mod topology;

pub use allocator::{Allocator, HttpAllocator, ShardCounter, TimestampGrant};
pub use api::ApiServer;
pub use config::Config;
pub use coordinator::{Consistency, Coordinator, QueryOutcome};
pub use elect::{elect_leader, ElectedLeader};
pub use engine::EngineClient;
pub use error::{Error, Result};
pub use failover::{FailoverOrchestrator, FailoverReport, FailoverState};
pub use quorum::{select_quorum, QuorumSelection};
pub use sampler::{InstanceMetrics, MetricsSampler, MetricsSnapshot};
pub use statement::{classify, ClassifiedStatement, StatementKind};
pub use topology::{InstanceDescriptor, Topology, TopologySnapshot};

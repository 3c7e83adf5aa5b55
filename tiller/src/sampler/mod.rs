//! Background metrics sampler
//!
//! One owned task probes every managed instance on a fixed period: a
//! round-trip probe for latency, then the global and per-table logical
//! watermarks. Healthy/unhealthy edges drive the crash counter and uptime
//! anchor that feed leader election.
//!
//! Readers never hold a lock across their work: each round builds a fresh
//! immutable [`MetricsSnapshot`] and swaps the shared pointer.

use crate::config::SamplerConfig;
use crate::engine::EngineClient;
use crate::topology::{InstanceDescriptor, Topology};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Latency recorded when a probe fails outright
pub const PROBE_FAILURE_LATENCY_MS: f64 = 9999.0;

/// One instance's health record as of the latest sampling round
#[derive(Debug, Clone, Serialize)]
pub struct InstanceMetrics {
    #[serde(rename = "replica_id")]
    pub instance_id: String,
    pub latency_ms: f64,
    pub last_applied_timestamp: u64,
    /// Writes behind the primary, in units of applied writes
    pub replication_lag: u64,
    pub table_timestamps: HashMap<String, u64>,
    pub uptime_seconds: f64,
    pub crash_count: u32,
    pub is_healthy: bool,
    pub last_updated: DateTime<Utc>,
}

/// Immutable view over every instance, published atomically per round
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub replicas: Vec<InstanceMetrics>,
    pub master_timestamp: u64,
    pub primary_id: String,
}

impl MetricsSnapshot {
    pub fn get(&self, instance_id: &str) -> Option<&InstanceMetrics> {
        self.replicas.iter().find(|m| m.instance_id == instance_id)
    }
}

struct HealthTracker {
    healthy: bool,
    anchor: Instant,
    crash_count: u32,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            healthy: true,
            anchor: Instant::now(),
            crash_count: 0,
        }
    }
}

struct ProbeResult {
    instance_id: String,
    latency_ms: f64,
    last_applied_timestamp: u64,
    table_timestamps: HashMap<String, u64>,
}

/// Periodic sampler over all managed instances
pub struct MetricsSampler {
    config: SamplerConfig,
    engine: Arc<EngineClient>,
    topology: Arc<Topology>,
    instances: Vec<InstanceDescriptor>,
    snapshot: RwLock<Arc<MetricsSnapshot>>,
    trackers: Mutex<HashMap<String, HealthTracker>>,
    running: RwLock<bool>,
}

impl MetricsSampler {
    pub fn new(
        config: SamplerConfig,
        engine: Arc<EngineClient>,
        topology: Arc<Topology>,
        instances: Vec<InstanceDescriptor>,
    ) -> Self {
        Self {
            config,
            engine,
            topology,
            instances,
            snapshot: RwLock::new(Arc::new(MetricsSnapshot::default())),
            trackers: Mutex::new(HashMap::new()),
            running: RwLock::new(false),
        }
    }

    /// The most recently published snapshot
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Swap in an externally built snapshot (tests and tooling)
    pub fn publish_snapshot(&self, snapshot: MetricsSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Clear crash counters and uptime anchors (administrative data-clear)
    pub fn reset_counters(&self) {
        let mut trackers = self.trackers.lock();
        for tracker in trackers.values_mut() {
            tracker.crash_count = 0;
            tracker.anchor = Instant::now();
        }
    }

    /// Start the background sampling task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        *self.running.write() = true;
        let sampler = Arc::clone(&self);
        tokio::spawn(async move {
            sampler.run_loop().await;
        })
    }

    pub fn stop(&self) {
        *self.running.write() = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.period());
        info!(
            period_secs = self.config.period_secs,
            threshold_ms = self.config.unhealthy_threshold_ms,
            "metrics sampler started"
        );

        while *self.running.read() {
            ticker.tick().await;
            if !*self.running.read() {
                break;
            }
            self.sample_once().await;
        }

        info!("metrics sampler stopped");
    }

    /// One full sampling round: primary watermark, per-instance probes,
    /// edge detection, snapshot swap.
    pub async fn sample_once(&self) {
        // Refresh the primary view so lag is computed against the live
        // primary, not the bootstrap one.
        let primary = self.topology.primary();

        let mut master_timestamp = self.watermark(&primary).await;
        if master_timestamp == 0 {
            // Between stop and promote the primary may be gone; fall back to
            // the highest watermark any instance reports so lag stays
            // meaningful and non-negative.
            for instance in &self.instances {
                let ts = self.watermark(instance).await;
                if ts > master_timestamp {
                    master_timestamp = ts;
                }
            }
        }

        let probes = futures::future::join_all(
            self.instances.iter().map(|inst| self.probe_instance(inst)),
        )
        .await;

        let now = Utc::now();
        let mut replicas = Vec::with_capacity(probes.len());
        {
            let mut trackers = self.trackers.lock();
            for probe in probes {
                let tracker = trackers
                    .entry(probe.instance_id.clone())
                    .or_insert_with(HealthTracker::new);

                let is_healthy = probe.latency_ms < self.config.unhealthy_threshold_ms;
                if tracker.healthy && !is_healthy {
                    tracker.crash_count += 1;
                    tracker.anchor = Instant::now();
                    warn!(
                        instance = %probe.instance_id,
                        crash_count = tracker.crash_count,
                        "instance became unhealthy"
                    );
                } else if !tracker.healthy && is_healthy {
                    tracker.anchor = Instant::now();
                    info!(instance = %probe.instance_id, "instance recovered");
                }
                tracker.healthy = is_healthy;

                let uptime_seconds = if is_healthy {
                    tracker.anchor.elapsed().as_secs_f64()
                } else {
                    0.0
                };

                let replication_lag = if master_timestamp > 0 {
                    master_timestamp.saturating_sub(probe.last_applied_timestamp)
                } else {
                    0
                };

                metrics::gauge!("tiller_instance_latency_ms", "instance" => probe.instance_id.clone())
                    .set(probe.latency_ms);
                metrics::gauge!("tiller_instance_lag", "instance" => probe.instance_id.clone())
                    .set(replication_lag as f64);

                replicas.push(InstanceMetrics {
                    instance_id: probe.instance_id,
                    latency_ms: probe.latency_ms,
                    last_applied_timestamp: probe.last_applied_timestamp,
                    replication_lag,
                    table_timestamps: probe.table_timestamps,
                    uptime_seconds,
                    crash_count: tracker.crash_count,
                    is_healthy,
                    last_updated: now,
                });
            }
        }

        self.publish_snapshot(MetricsSnapshot {
            replicas,
            master_timestamp,
            primary_id: primary.id,
        });
    }

    async fn probe_instance(&self, instance: &InstanceDescriptor) -> ProbeResult {
        let start = Instant::now();
        let probe_ok = matches!(
            timeout(self.config.probe_timeout(), self.engine.probe(instance)).await,
            Ok(Ok(()))
        );

        if !probe_ok {
            debug!(instance = %instance.id, "probe failed");
            return ProbeResult {
                instance_id: instance.id.clone(),
                latency_ms: PROBE_FAILURE_LATENCY_MS,
                last_applied_timestamp: 0,
                table_timestamps: HashMap::new(),
            };
        }

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let last_applied_timestamp = self.watermark(instance).await;
        let table_timestamps = match timeout(
            self.config.probe_timeout(),
            self.engine.table_timestamps(instance),
        )
        .await
        {
            Ok(Ok(map)) => map,
            _ => HashMap::new(),
        };

        ProbeResult {
            instance_id: instance.id.clone(),
            latency_ms,
            last_applied_timestamp,
            table_timestamps,
        }
    }

    async fn watermark(&self, instance: &InstanceDescriptor) -> u64 {
        match timeout(
            self.config.probe_timeout(),
            self.engine.last_applied_timestamp(instance),
        )
        .await
        {
            Ok(Ok(ts)) => ts,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, SamplerConfig};

    fn unreachable_instance(id: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            // Nothing listens here; probes fail fast
            port: 1,
            container: id.to_string(),
        }
    }

    fn make_sampler(instances: Vec<InstanceDescriptor>) -> Arc<MetricsSampler> {
        let db = DatabaseConfig {
            connect_timeout_ms: 200,
            ..DatabaseConfig::default()
        };
        let engine = Arc::new(EngineClient::new(db));
        let primary = instances[0].clone();
        let followers = instances[1..].to_vec();
        let topology = Arc::new(Topology::new(primary, followers));
        Arc::new(MetricsSampler::new(
            SamplerConfig {
                period_secs: 1,
                unhealthy_threshold_ms: 5000.0,
                probe_timeout_ms: 500,
            },
            engine,
            topology,
            instances,
        ))
    }

    #[test]
    fn test_snapshot_starts_empty() {
        let sampler = make_sampler(vec![unreachable_instance("a")]);
        let snapshot = sampler.snapshot();
        assert!(snapshot.replicas.is_empty());
        assert_eq!(snapshot.master_timestamp, 0);
    }

    #[test]
    fn test_publish_snapshot_swaps_pointer() {
        let sampler = make_sampler(vec![unreachable_instance("a")]);
        let before = sampler.snapshot();

        sampler.publish_snapshot(MetricsSnapshot {
            replicas: vec![],
            master_timestamp: 42,
            primary_id: "a".to_string(),
        });

        assert_eq!(before.master_timestamp, 0);
        assert_eq!(sampler.snapshot().master_timestamp, 42);
    }

    #[tokio::test]
    async fn test_failed_probes_mark_unhealthy_with_sentinel_latency() {
        let sampler = make_sampler(vec![
            unreachable_instance("instance-1"),
            unreachable_instance("instance-2"),
        ]);
        sampler.sample_once().await;

        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.replicas.len(), 2);
        assert_eq!(snapshot.primary_id, "instance-1");
        assert_eq!(snapshot.master_timestamp, 0);
        for replica in &snapshot.replicas {
            assert!(!replica.is_healthy);
            assert_eq!(replica.latency_ms, PROBE_FAILURE_LATENCY_MS);
            assert_eq!(replica.uptime_seconds, 0.0);
            assert_eq!(replica.replication_lag, 0);
        }
    }

    #[tokio::test]
    async fn test_crash_is_counted_once_per_healthy_unhealthy_edge() {
        let sampler = make_sampler(vec![unreachable_instance("instance-1")]);

        // First round crosses the healthy→unhealthy edge; the second round
        // stays unhealthy and must not count again
        sampler.sample_once().await;
        sampler.sample_once().await;

        let snapshot = sampler.snapshot();
        assert_eq!(snapshot.replicas[0].crash_count, 1);
    }

    #[tokio::test]
    async fn test_reset_counters_clears_crash_history() {
        let sampler = make_sampler(vec![unreachable_instance("instance-1")]);
        sampler.sample_once().await;
        assert_eq!(sampler.snapshot().replicas[0].crash_count, 1);

        sampler.reset_counters();
        sampler.sample_once().await;
        assert_eq!(sampler.snapshot().replicas[0].crash_count, 0);
    }
}

//! SEER: performance-aware leader election
//!
//! Candidates are the current followers. Each healthy candidate is scored
//! on latency, stability and replication lag; the stability term charges a
//! fixed block of dead time per historical crash so a follower that flaps
//! through many short recoveries cannot outrank one that has stayed up.

use crate::config::SeerConfig;
use crate::error::{Error, Result};
use crate::sampler::{InstanceMetrics, MetricsSnapshot};
use crate::topology::TopologySnapshot;
use serde::Serialize;

/// Score breakdown for one candidate
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreComponents {
    pub latency_score: f64,
    pub stability_score: f64,
    pub lag_score: f64,
    pub total: f64,
}

/// The elected leader with the metrics that won it the election
#[derive(Debug, Clone, Serialize)]
pub struct ElectedLeader {
    pub leader_id: String,
    pub score: f64,
    pub latency_ms: f64,
    pub uptime_seconds: f64,
    pub replication_lag: u64,
    pub crash_count: u32,
}

/// Score one candidate. Unhealthy candidates score zero across the board.
pub fn score_candidate(metrics: &InstanceMetrics, config: &SeerConfig) -> ScoreComponents {
    if !metrics.is_healthy {
        return ScoreComponents {
            latency_score: 0.0,
            stability_score: 0.0,
            lag_score: 0.0,
            total: 0.0,
        };
    }

    let latency_score = 1.0 / (metrics.latency_ms + 1.0);
    let stability_penalty = metrics.crash_count as f64 * config.crash_penalty_secs;
    let stability_score =
        metrics.uptime_seconds / (metrics.uptime_seconds + stability_penalty + 1.0);
    let lag_score = 1.0 / (metrics.replication_lag as f64 + 1.0);

    let total = latency_score * config.latency_weight
        + stability_score * config.stability_weight
        + lag_score * config.lag_weight;

    ScoreComponents {
        latency_score,
        stability_score,
        lag_score,
        total,
    }
}

/// Elect the best follower to take over as primary.
///
/// Ties break by instance id. A best score of zero (everything unhealthy or
/// unsampled) is [`Error::NoEligibleLeader`].
pub fn elect_leader(
    snapshot: &MetricsSnapshot,
    topology: &TopologySnapshot,
    exclude: &[String],
    config: &SeerConfig,
) -> Result<ElectedLeader> {
    let candidates: Vec<&InstanceMetrics> = topology
        .followers
        .iter()
        .filter(|f| !exclude.contains(&f.id))
        .filter_map(|f| snapshot.get(&f.id))
        .collect();

    if candidates.is_empty() {
        return Err(Error::NoEligibleLeader(
            "no candidates remain after exclusions".to_string(),
        ));
    }

    let mut scored: Vec<(&InstanceMetrics, ScoreComponents)> = candidates
        .into_iter()
        .map(|m| (m, score_candidate(m, config)))
        .collect();

    scored.sort_by(|a, b| {
        b.1.total
            .partial_cmp(&a.1.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.instance_id.cmp(&b.0.instance_id))
    });

    let (best, components) = &scored[0];
    if components.total == 0.0 {
        return Err(Error::NoEligibleLeader(
            "no healthy candidate scored above zero".to_string(),
        ));
    }

    Ok(ElectedLeader {
        leader_id: best.instance_id.clone(),
        score: components.total,
        latency_ms: best.latency_ms,
        uptime_seconds: best.uptime_seconds,
        replication_lag: best.replication_lag,
        crash_count: best.crash_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::InstanceDescriptor;
    use std::collections::HashMap;

    fn instance(id: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            id: id.to_string(),
            host: id.to_string(),
            port: 3306,
            container: id.to_string(),
        }
    }

    fn metric(
        id: &str,
        latency_ms: f64,
        uptime: f64,
        crashes: u32,
        lag: u64,
        healthy: bool,
    ) -> InstanceMetrics {
        InstanceMetrics {
            instance_id: id.to_string(),
            latency_ms,
            last_applied_timestamp: 100,
            replication_lag: lag,
            table_timestamps: HashMap::new(),
            uptime_seconds: uptime,
            crash_count: crashes,
            is_healthy: healthy,
            last_updated: chrono::Utc::now(),
        }
    }

    fn topo() -> TopologySnapshot {
        TopologySnapshot {
            primary: instance("instance-1"),
            followers: vec![
                instance("instance-2"),
                instance("instance-3"),
                instance("instance-4"),
            ],
            needs_reconfigure: vec![],
        }
    }

    fn snap(metrics: Vec<InstanceMetrics>) -> MetricsSnapshot {
        MetricsSnapshot {
            replicas: metrics,
            master_timestamp: 100,
            primary_id: "instance-1".to_string(),
        }
    }

    #[test]
    fn test_unhealthy_scores_zero() {
        let config = SeerConfig::default();
        let m = metric("x", 1.0, 1000.0, 0, 0, false);
        let s = score_candidate(&m, &config);
        assert_eq!(s.total, 0.0);
    }

    #[test]
    fn test_score_component_weighting() {
        let config = SeerConfig::default();
        let m = metric("x", 0.0, 0.0, 0, 0, true);
        let s = score_candidate(&m, &config);
        // latency_score = 1, stability_score = 0, lag_score = 1
        assert!((s.total - (0.4 + 0.0 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_elects_fastest_stable_candidate() {
        let config = SeerConfig::default();
        let snapshot = snap(vec![
            metric("instance-2", 2.0, 600.0, 0, 0, true),
            metric("instance-3", 80.0, 600.0, 0, 5, true),
            metric("instance-4", 40.0, 30.0, 2, 1, true),
        ]);
        let leader = elect_leader(&snapshot, &topo(), &[], &config).unwrap();
        assert_eq!(leader.leader_id, "instance-2");
        assert!(leader.score > 0.0);
    }

    #[test]
    fn test_crash_penalty_beats_flappy_candidate() {
        let config = SeerConfig::default();
        // instance-3 has a short recent uptime but many crashes; instance-2
        // is slower but steady. Stability must dominate.
        let snapshot = snap(vec![
            metric("instance-2", 20.0, 3600.0, 0, 0, true),
            metric("instance-3", 5.0, 50.0, 8, 0, true),
        ]);
        let leader = elect_leader(&snapshot, &topo(), &[], &config).unwrap();
        assert_eq!(leader.leader_id, "instance-2");
    }

    #[test]
    fn test_never_elects_unhealthy() {
        let config = SeerConfig::default();
        let snapshot = snap(vec![
            metric("instance-2", 9999.0, 0.0, 1, 50, false),
            metric("instance-3", 3.0, 500.0, 0, 0, true),
        ]);
        let leader = elect_leader(&snapshot, &topo(), &[], &config).unwrap();
        assert_eq!(leader.leader_id, "instance-3");
    }

    #[test]
    fn test_all_unhealthy_is_no_eligible_leader() {
        let config = SeerConfig::default();
        let snapshot = snap(vec![
            metric("instance-2", 9999.0, 0.0, 1, 0, false),
            metric("instance-3", 9999.0, 0.0, 2, 0, false),
        ]);
        assert!(matches!(
            elect_leader(&snapshot, &topo(), &[], &config),
            Err(Error::NoEligibleLeader(_))
        ));
    }

    #[test]
    fn test_exclusions_are_honored() {
        let config = SeerConfig::default();
        let snapshot = snap(vec![
            metric("instance-2", 1.0, 600.0, 0, 0, true),
            metric("instance-3", 10.0, 600.0, 0, 0, true),
        ]);
        let leader = elect_leader(
            &snapshot,
            &topo(),
            &["instance-2".to_string()],
            &config,
        )
        .unwrap();
        assert_eq!(leader.leader_id, "instance-3");
    }

    #[test]
    fn test_excluding_everything_is_an_error() {
        let config = SeerConfig::default();
        let snapshot = snap(vec![metric("instance-2", 1.0, 600.0, 0, 0, true)]);
        let exclude: Vec<String> = vec![
            "instance-2".into(),
            "instance-3".into(),
            "instance-4".into(),
        ];
        assert!(matches!(
            elect_leader(&snapshot, &topo(), &exclude, &config),
            Err(Error::NoEligibleLeader(_))
        ));
    }

    #[test]
    fn test_ties_break_by_id() {
        let config = SeerConfig::default();
        let snapshot = snap(vec![
            metric("instance-3", 5.0, 100.0, 0, 0, true),
            metric("instance-2", 5.0, 100.0, 0, 0, true),
        ]);
        let leader = elect_leader(&snapshot, &topo(), &[], &config).unwrap();
        assert_eq!(leader.leader_id, "instance-2");
    }

    #[test]
    fn test_primary_is_never_a_candidate() {
        let config = SeerConfig::default();
        // Snapshot contains the primary with a perfect score; it must not win
        let snapshot = snap(vec![
            metric("instance-1", 0.5, 10000.0, 0, 0, true),
            metric("instance-2", 50.0, 100.0, 0, 3, true),
        ]);
        let leader = elect_leader(&snapshot, &topo(), &[], &config).unwrap();
        assert_eq!(leader.leader_id, "instance-2");
    }
}

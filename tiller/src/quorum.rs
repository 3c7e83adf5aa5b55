//! Cabinet: dynamically weighted quorum selection
//!
//! A quorum is a majority-sized subset of the followers, composed from the
//! followers currently best placed to confirm a write: low latency, low
//! replication lag. Quorum *size* is classical majority-of-cluster; only
//! the *composition* adapts.
//!
//! Selection is a pure function of the health snapshot, so every call
//! re-ranks against live metrics and the quorum drifts away from degraded
//! followers within one sampling period.

use crate::error::{Error, Result};
use crate::sampler::MetricsSnapshot;
use crate::topology::TopologySnapshot;
use serde::Serialize;

/// The selected quorum, ordered best-first
#[derive(Debug, Clone, Serialize)]
pub struct QuorumSelection {
    pub quorum: Vec<String>,
    pub quorum_size: usize,
    pub total_replicas: usize,
}

/// Majority size for a cluster of `total_instances` members: ⌈(N+1)/2⌉
pub fn majority_size(total_instances: usize) -> usize {
    (total_instances + 2) / 2
}

/// Weight of one follower: zero when unhealthy, otherwise the inverse of
/// its combined latency and lag. Higher is better.
pub fn replica_weight(latency_ms: f64, replication_lag: u64, is_healthy: bool) -> f64 {
    if !is_healthy {
        return 0.0;
    }
    1.0 / (latency_ms + replication_lag as f64 + 1.0)
}

/// Select a write quorum from the current snapshot.
///
/// Followers are ranked by weight, ties broken by instance id so repeated
/// calls over an unchanged snapshot return the same set. The primary counts
/// toward the majority size but is never a member. Errors with
/// [`Error::NoHealthyQuorum`] when there are no followers or the selected
/// set contains no healthy member.
pub fn select_quorum(
    snapshot: &MetricsSnapshot,
    topology: &TopologySnapshot,
) -> Result<QuorumSelection> {
    if topology.followers.is_empty() {
        return Err(Error::NoHealthyQuorum("no followers available".to_string()));
    }

    let total_replicas = snapshot.replicas.len().max(topology.total_instances());

    let mut ranked: Vec<(String, f64, bool)> = topology
        .followers
        .iter()
        .map(|follower| match snapshot.get(&follower.id) {
            Some(m) => (
                follower.id.clone(),
                replica_weight(m.latency_ms, m.replication_lag, m.is_healthy),
                m.is_healthy,
            ),
            // Never sampled yet: treat as unhealthy, rank last
            None => (follower.id.clone(), 0.0, false),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });

    let quorum_size = majority_size(total_replicas).min(ranked.len());
    let selected = &ranked[..quorum_size];

    if !selected.iter().any(|(_, _, healthy)| *healthy) {
        return Err(Error::NoHealthyQuorum(
            "no healthy follower available for quorum".to_string(),
        ));
    }

    Ok(QuorumSelection {
        quorum: selected.iter().map(|(id, _, _)| id.clone()).collect(),
        quorum_size,
        total_replicas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::InstanceMetrics;
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

    fn metric(id: &str, latency_ms: f64, lag: u64, healthy: bool) -> InstanceMetrics {
        InstanceMetrics {
            instance_id: id.to_string(),
            latency_ms,
            last_applied_timestamp: 100,
            replication_lag: lag,
            table_timestamps: HashMap::new(),
            uptime_seconds: 60.0,
            crash_count: 0,
            is_healthy: healthy,
            last_updated: chrono::Utc::now(),
        }
    }

    fn four_node_cluster() -> TopologySnapshot {
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

    fn snapshot(metrics: Vec<InstanceMetrics>) -> MetricsSnapshot {
        MetricsSnapshot {
            replicas: metrics,
            master_timestamp: 100,
            primary_id: "instance-1".to_string(),
        }
    }

    #[test]
    fn test_majority_size() {
        assert_eq!(majority_size(2), 2);
        assert_eq!(majority_size(3), 2);
        assert_eq!(majority_size(4), 3);
        assert_eq!(majority_size(5), 3);
        assert_eq!(majority_size(7), 4);
    }

    #[test]
    fn test_weight_favors_low_latency_and_lag() {
        assert!(replica_weight(1.0, 0, true) > replica_weight(10.0, 0, true));
        assert!(replica_weight(5.0, 0, true) > replica_weight(5.0, 20, true));
        assert_eq!(replica_weight(1.0, 0, false), 0.0);
    }

    #[test]
    fn test_quorum_size_is_majority_of_cluster() {
        let topo = four_node_cluster();
        let snap = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 3.0, 0, true),
            metric("instance-3", 4.0, 1, true),
            metric("instance-4", 5.0, 2, true),
        ]);

        let selection = select_quorum(&snap, &topo).unwrap();
        assert_eq!(selection.quorum_size, 3);
        assert_eq!(selection.total_replicas, 4);
        assert_eq!(selection.quorum.len(), 3);
        // Primary never appears in the quorum
        assert!(!selection.quorum.contains(&"instance-1".to_string()));
    }

    #[test]
    fn test_best_followers_ranked_first() {
        let topo = four_node_cluster();
        let snap = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 50.0, 5, true),
            metric("instance-3", 1.0, 0, true),
            metric("instance-4", 10.0, 0, true),
        ]);

        let selection = select_quorum(&snap, &topo).unwrap();
        assert_eq!(selection.quorum[0], "instance-3");
        assert_eq!(selection.quorum[1], "instance-4");
    }

    #[test]
    fn test_degraded_follower_drops_in_rank_after_one_round() {
        let topo = four_node_cluster();
        let baseline = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 2.0, 0, true),
            metric("instance-3", 3.0, 0, true),
            metric("instance-4", 4.0, 0, true),
        ]);
        let selection = select_quorum(&baseline, &topo).unwrap();
        assert_eq!(selection.quorum[0], "instance-2");

        // instance-2 picks up 300ms of injected latency; the next call over
        // the refreshed snapshot ranks it last
        let degraded = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 302.0, 0, true),
            metric("instance-3", 3.0, 0, true),
            metric("instance-4", 4.0, 0, true),
        ]);
        let selection = select_quorum(&degraded, &topo).unwrap();
        assert_eq!(selection.quorum[0], "instance-3");
        assert_eq!(*selection.quorum.last().unwrap(), "instance-2");
    }

    #[test]
    fn test_ties_break_by_instance_id() {
        let topo = four_node_cluster();
        let snap = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 5.0, 0, true),
            metric("instance-3", 5.0, 0, true),
            metric("instance-4", 5.0, 0, true),
        ]);

        let selection = select_quorum(&snap, &topo).unwrap();
        assert_eq!(
            selection.quorum,
            vec!["instance-2", "instance-3", "instance-4"]
        );
    }

    #[test]
    fn test_unhealthy_followers_rank_last_but_majority_holds() {
        let topo = four_node_cluster();
        let snap = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 9999.0, 50, false),
            metric("instance-3", 3.0, 0, true),
            metric("instance-4", 4.0, 0, true),
        ]);

        let selection = select_quorum(&snap, &topo).unwrap();
        // Majority of 4 is 3, so the unhealthy follower is still a member,
        // ranked last
        assert_eq!(selection.quorum.len(), 3);
        assert_eq!(*selection.quorum.last().unwrap(), "instance-2");
    }

    #[test]
    fn test_no_followers_is_an_error() {
        let topo = TopologySnapshot {
            primary: instance("instance-1"),
            followers: vec![],
            needs_reconfigure: vec![],
        };
        let snap = snapshot(vec![metric("instance-1", 2.0, 0, true)]);
        assert!(matches!(
            select_quorum(&snap, &topo),
            Err(Error::NoHealthyQuorum(_))
        ));
    }

    #[test]
    fn test_all_unhealthy_is_an_error() {
        let topo = four_node_cluster();
        let snap = snapshot(vec![
            metric("instance-1", 2.0, 0, true),
            metric("instance-2", 9999.0, 0, false),
            metric("instance-3", 9999.0, 0, false),
            metric("instance-4", 9999.0, 0, false),
        ]);
        assert!(matches!(
            select_quorum(&snap, &topo),
            Err(Error::NoHealthyQuorum(_))
        ));
    }

    #[test]
    fn test_unsampled_followers_treated_as_unhealthy() {
        let topo = four_node_cluster();
        // Empty snapshot: nothing sampled yet
        let snap = MetricsSnapshot::default();
        assert!(matches!(
            select_quorum(&snap, &topo),
            Err(Error::NoHealthyQuorum(_))
        ));
    }
}

//! Failover orchestration
//!
//! State machine: Steady → Detecting → Electing → Promoting → Rewiring →
//! Steady, with an operator-driven Rejoining flow for bringing a former
//! primary back as a follower.
//!
//! Promotion is destructive (it resets the candidate's replication config),
//! so two promotions must never run concurrently: every topology-mutating
//! flow here serializes behind one async mutex. Failure semantics:
//! promotion failure aborts with the topology untouched; per-follower
//! rewire failures advance the topology anyway and flag the follower for an
//! operator retry; election exhaustion leaves the machine in Detecting.

use crate::config::Config;
use crate::container::ContainerControl;
use crate::elect::{elect_leader, ElectedLeader};
use crate::error::{Error, Result};
use crate::sampler::MetricsSampler;
use crate::topology::{InstanceDescriptor, Topology, TopologySnapshot};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverState {
    Steady,
    Detecting,
    Electing,
    Promoting,
    Rewiring,
    Rejoining,
}

/// Outcome of a completed failover
#[derive(Debug, Clone, Serialize)]
pub struct FailoverReport {
    pub old_primary: String,
    pub new_primary: String,
    pub score: f64,
    pub rewired: Vec<String>,
    pub failed_rewires: Vec<String>,
}

pub struct FailoverOrchestrator {
    config: Arc<Config>,
    topology: Arc<Topology>,
    sampler: Arc<MetricsSampler>,
    container: Arc<ContainerControl>,
    /// Single-writer failover lock; held across the whole transition
    lock: Mutex<()>,
    state: RwLock<FailoverState>,
}

impl FailoverOrchestrator {
    pub fn new(
        config: Arc<Config>,
        topology: Arc<Topology>,
        sampler: Arc<MetricsSampler>,
        container: Arc<ContainerControl>,
    ) -> Self {
        Self {
            config,
            topology,
            sampler,
            container,
            lock: Mutex::new(()),
            state: RwLock::new(FailoverState::Steady),
        }
    }

    pub fn state(&self) -> FailoverState {
        *self.state.read()
    }

    fn set_state(&self, state: FailoverState) {
        *self.state.write() = state;
        metrics::gauge!("tiller_failover_state").set(state as i32 as f64);
    }

    /// Stop the current primary's container (operator-driven failure
    /// injection). Does not elect or promote; pair with [`Self::run`] for a
    /// full stop-and-failover.
    pub async fn stop_primary(&self) -> Result<String> {
        let primary = self.topology.primary();
        self.container.stop(&primary.container).await?;
        Ok(primary.id)
    }

    /// Full failover after primary loss: elect, promote, rewire.
    ///
    /// The dead primary is left out of the follower set until an explicit
    /// rejoin. `exclude` removes additional candidates from the election.
    pub async fn run(&self, exclude: &[String]) -> Result<FailoverReport> {
        let _guard = self.lock.lock().await;
        self.set_state(FailoverState::Detecting);

        let old_primary = self.topology.primary();
        info!(old_primary = %old_primary.id, "failover started");

        let leader = match self.elect_with_retry(exclude).await {
            Ok(leader) => leader,
            Err(e) => {
                // Stay in Detecting: the cluster has no writable primary and
                // needs another election or a manual restore.
                error!("election exhausted: {}", e);
                return Err(e);
            }
        };

        self.set_state(FailoverState::Promoting);
        let candidate = match self.follower_descriptor(&leader.leader_id) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.set_state(FailoverState::Steady);
                return Err(e);
            }
        };
        if let Err(e) = self.promote_instance(&candidate).await {
            self.set_state(FailoverState::Steady);
            return Err(Error::PromotionFailed(e.to_string()));
        }

        self.set_state(FailoverState::Rewiring);
        let new_primary = match self.topology.promote(&leader.leader_id, false) {
            Ok(primary) => primary,
            Err(e) => {
                self.set_state(FailoverState::Steady);
                return Err(e);
            }
        };
        let (rewired, failed_rewires) = self.rewire_followers(&new_primary).await;

        self.set_state(FailoverState::Steady);
        metrics::counter!("tiller_failovers_total").increment(1);
        info!(
            old_primary = %old_primary.id,
            new_primary = %new_primary.id,
            score = leader.score,
            "failover complete"
        );

        Ok(FailoverReport {
            old_primary: old_primary.id,
            new_primary: new_primary.id,
            score: leader.score,
            rewired,
            failed_rewires,
        })
    }

    /// Graceful promotion: the old primary is reachable and is demoted to a
    /// follower of the new one. When `target` is omitted the leader is
    /// elected.
    pub async fn promote_target(&self, target: Option<String>) -> Result<FailoverReport> {
        let _guard = self.lock.lock().await;
        self.set_state(FailoverState::Electing);

        let leader = match target {
            Some(id) => {
                if !self.topology.is_follower(&id) {
                    self.set_state(FailoverState::Steady);
                    return Err(Error::InstanceNotFound(id));
                }
                ElectedLeader {
                    leader_id: id,
                    score: 0.0,
                    latency_ms: 0.0,
                    uptime_seconds: 0.0,
                    replication_lag: 0,
                    crash_count: 0,
                }
            }
            None => match self.elect_with_retry(&[]).await {
                Ok(leader) => leader,
                Err(e) => {
                    self.set_state(FailoverState::Steady);
                    return Err(e);
                }
            },
        };

        let old_primary = self.topology.primary();
        info!(
            old_primary = %old_primary.id,
            new_primary = %leader.leader_id,
            "graceful promotion started"
        );

        self.set_state(FailoverState::Promoting);
        let candidate = match self.follower_descriptor(&leader.leader_id) {
            Ok(candidate) => candidate,
            Err(e) => {
                self.set_state(FailoverState::Steady);
                return Err(e);
            }
        };
        if let Err(e) = self.promote_instance(&candidate).await {
            self.set_state(FailoverState::Steady);
            return Err(Error::PromotionFailed(e.to_string()));
        }

        self.set_state(FailoverState::Rewiring);
        let mut failed_rewires = Vec::new();

        // Demote the displaced primary first so there is never a window with
        // two writable instances.
        if let Err(e) = self.demote_old_primary(&old_primary, &candidate.host).await {
            warn!(
                "failed to demote old primary {}: {}; continuing with promotion",
                old_primary.id, e
            );
            self.topology.mark_needs_reconfigure(&old_primary.id);
            failed_rewires.push(old_primary.id.clone());
        }

        let new_primary = match self.topology.promote(&leader.leader_id, true) {
            Ok(primary) => primary,
            Err(e) => {
                self.set_state(FailoverState::Steady);
                return Err(e);
            }
        };

        let (mut rewired, mut failures) = self
            .rewire_followers_except(&new_primary, &old_primary.id)
            .await;
        failed_rewires.append(&mut failures);
        if !failed_rewires.contains(&old_primary.id) {
            rewired.push(old_primary.id.clone());
        }

        self.set_state(FailoverState::Steady);
        metrics::counter!("tiller_failovers_total").increment(1);

        Ok(FailoverReport {
            old_primary: old_primary.id,
            new_primary: new_primary.id,
            score: leader.score,
            rewired,
            failed_rewires,
        })
    }

    /// Bring an instance (typically a former primary) back as a follower of
    /// the current primary.
    pub async fn rejoin(&self, instance_id: &str) -> Result<TopologySnapshot> {
        let _guard = self.lock.lock().await;

        let instance = self
            .config
            .instance(instance_id)
            .cloned()
            .ok_or_else(|| Error::InstanceNotFound(instance_id.to_string()))?;

        if self.topology.is_primary(instance_id) {
            return Ok(self.topology.snapshot());
        }

        // Already attached and streaming: nothing to do
        if self.topology.is_follower(instance_id)
            && self.container.is_running(&instance.container).await.unwrap_or(false)
            && self.verify_replication(&instance).await.unwrap_or(false)
        {
            info!(instance = instance_id, "already replicating, rejoin is a no-op");
            return Ok(self.topology.snapshot());
        }

        self.set_state(FailoverState::Rejoining);
        let result = self.rejoin_inner(&instance).await;
        self.set_state(FailoverState::Steady);
        result?;
        Ok(self.topology.snapshot())
    }

    async fn rejoin_inner(&self, instance: &InstanceDescriptor) -> Result<()> {
        self.container.start(&instance.container).await?;
        self.container.wait_for_ready(&instance.container).await?;

        let primary = self.topology.primary();
        self.configure_replica(instance, &primary.host).await?;
        self.topology.add_follower(instance.clone());
        info!(
            instance = %instance.id,
            primary = %primary.id,
            "instance rejoined as follower"
        );
        Ok(())
    }

    async fn elect_with_retry(&self, exclude: &[String]) -> Result<ElectedLeader> {
        self.set_state(FailoverState::Electing);
        let attempts = self.config.seer.election_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let snapshot = self.sampler.snapshot();
            let topology = self.topology.snapshot();
            match elect_leader(&snapshot, &topology, exclude, &self.config.seer) {
                Ok(leader) => {
                    info!(
                        leader = %leader.leader_id,
                        score = leader.score,
                        attempt,
                        "leader elected"
                    );
                    return Ok(leader);
                }
                Err(e) => {
                    warn!(attempt, "election attempt failed: {}", e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.seer.election_backoff()).await;
                    }
                }
            }
        }

        self.set_state(FailoverState::Detecting);
        Err(last_error
            .unwrap_or_else(|| Error::NoEligibleLeader("no election attempts made".to_string())))
    }

    fn follower_descriptor(&self, id: &str) -> Result<InstanceDescriptor> {
        self.topology
            .followers()
            .into_iter()
            .find(|f| f.id == id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// Promote a follower in place: detach it from its source, make it
    /// writable, reset its binlog, and make sure the replication account
    /// exists for the followers that are about to stream from it.
    async fn promote_instance(&self, candidate: &InstanceDescriptor) -> Result<()> {
        info!(candidate = %candidate.id, "promoting follower");

        let modern = "STOP REPLICA; RESET REPLICA ALL; \
                      SET GLOBAL read_only = OFF; SET GLOBAL super_read_only = OFF; \
                      RESET MASTER;";
        let legacy = "STOP SLAVE; RESET SLAVE ALL; \
                      SET GLOBAL read_only = OFF; SET GLOBAL super_read_only = OFF; \
                      RESET MASTER;";

        if self
            .container
            .exec_sql(&candidate.container, modern)
            .await
            .is_err()
        {
            self.container.exec_sql(&candidate.container, legacy).await?;
        }

        let db = &self.config.database;
        let ensure_user = format!(
            "CREATE USER IF NOT EXISTS '{user}'@'%' IDENTIFIED WITH mysql_native_password BY '{pass}'; \
             GRANT REPLICATION SLAVE ON *.* TO '{user}'@'%'; \
             FLUSH PRIVILEGES;",
            user = db.replication_user,
            pass = db.replication_password,
        );
        self.container
            .exec_sql(&candidate.container, &ensure_user)
            .await?;

        Ok(())
    }

    /// Point the displaced primary at its successor
    async fn demote_old_primary(
        &self,
        old_primary: &InstanceDescriptor,
        new_primary_host: &str,
    ) -> Result<()> {
        info!(
            old_primary = %old_primary.id,
            new_primary_host,
            "demoting old primary"
        );

        let server_id = self.config.server_id(&old_primary.id);
        let db = &self.config.database;
        let modern = format!(
            "SET GLOBAL server_id = {server_id}; \
             SET GLOBAL read_only = ON; SET GLOBAL super_read_only = ON; \
             STOP REPLICA; RESET REPLICA ALL; \
             CHANGE REPLICATION SOURCE TO SOURCE_HOST='{host}', SOURCE_USER='{user}', \
             SOURCE_PASSWORD='{pass}', SOURCE_AUTO_POSITION=1, GET_SOURCE_PUBLIC_KEY=1; \
             START REPLICA;",
            host = new_primary_host,
            user = db.replication_user,
            pass = db.replication_password,
        );
        let legacy = format!(
            "SET GLOBAL server_id = {server_id}; \
             SET GLOBAL read_only = ON; SET GLOBAL super_read_only = ON; \
             STOP SLAVE; RESET SLAVE ALL; \
             CHANGE MASTER TO MASTER_HOST='{host}', MASTER_USER='{user}', \
             MASTER_PASSWORD='{pass}', MASTER_AUTO_POSITION=1, GET_MASTER_PUBLIC_KEY=1; \
             START SLAVE;",
            host = new_primary_host,
            user = db.replication_user,
            pass = db.replication_password,
        );

        if self
            .container
            .exec_sql(&old_primary.container, &modern)
            .await
            .is_err()
        {
            self.container
                .exec_sql(&old_primary.container, &legacy)
                .await?;
        }
        Ok(())
    }

    async fn rewire_followers(&self, new_primary: &InstanceDescriptor) -> (Vec<String>, Vec<String>) {
        self.rewire_followers_except(new_primary, "").await
    }

    /// Reconfigure every surviving follower to stream from the new primary.
    /// Per-follower failures are flagged, never rolled back: the cluster is
    /// already writable on the new primary and the flagged follower can be
    /// retried through the operator flow.
    async fn rewire_followers_except(
        &self,
        new_primary: &InstanceDescriptor,
        skip_id: &str,
    ) -> (Vec<String>, Vec<String>) {
        let mut rewired = Vec::new();
        let mut failed = Vec::new();

        for follower in self.topology.followers() {
            if follower.id == skip_id {
                continue;
            }
            match self.configure_replica(&follower, &new_primary.host).await {
                Ok(()) => {
                    self.topology.clear_needs_reconfigure(&follower.id);
                    rewired.push(follower.id);
                }
                Err(e) => {
                    error!(
                        follower = %follower.id,
                        "rewire failed, flagging for operator retry: {}", e
                    );
                    self.topology.mark_needs_reconfigure(&follower.id);
                    failed.push(follower.id);
                }
            }
        }

        (rewired, failed)
    }

    /// Full replica configuration sequence against a (possibly just
    /// restarted) instance. Robust to both replication SQL dialects.
    async fn configure_replica(
        &self,
        instance: &InstanceDescriptor,
        primary_host: &str,
    ) -> Result<()> {
        info!(
            instance = %instance.id,
            primary_host,
            "configuring replication"
        );
        let container = &instance.container;
        let db = &self.config.database;

        // Correct server id first; a clashing id wedges replication with a
        // "same server ID" error after failover.
        let server_id = self.config.server_id(&instance.id);
        self.container
            .exec_sql(container, &format!("SET GLOBAL server_id = {};", server_id))
            .await?;

        // The replication account must exist on the primary before CHANGE
        // SOURCE will authenticate.
        self.ensure_replication_user(container, primary_host).await;

        // Stop and clear any previous replication config
        if self
            .container
            .exec_sql(container, "STOP REPLICA; RESET REPLICA ALL;")
            .await
            .is_err()
        {
            if let Err(e) = self
                .container
                .exec_sql(container, "STOP SLAVE; RESET SLAVE ALL;")
                .await
            {
                warn!(instance = %instance.id, "could not stop prior replication: {}", e);
            }
        }

        if let Err(e) = self.container.exec_sql(container, "RESET MASTER;").await {
            warn!(instance = %instance.id, "could not reset binlog: {}", e);
        }

        self.container
            .exec_sql(
                container,
                "SET GLOBAL read_only = ON; SET GLOBAL super_read_only = ON;",
            )
            .await
            .map_err(|e| Error::RewireFailed(format!("{}: {}", instance.id, e)))?;

        let modern = format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_HOST='{host}', SOURCE_USER='{user}', \
             SOURCE_PASSWORD='{pass}', SOURCE_AUTO_POSITION=1, GET_SOURCE_PUBLIC_KEY=1;",
            host = primary_host,
            user = db.replication_user,
            pass = db.replication_password,
        );
        let legacy = format!(
            "CHANGE MASTER TO MASTER_HOST='{host}', MASTER_USER='{user}', \
             MASTER_PASSWORD='{pass}', MASTER_AUTO_POSITION=1, GET_MASTER_PUBLIC_KEY=1;",
            host = primary_host,
            user = db.replication_user,
            pass = db.replication_password,
        );
        if self.container.exec_sql(container, &modern).await.is_err() {
            self.container
                .exec_sql(container, &legacy)
                .await
                .map_err(|e| Error::RewireFailed(format!("{}: {}", instance.id, e)))?;
        }

        if self
            .container
            .exec_sql(container, "START REPLICA;")
            .await
            .is_err()
        {
            self.container
                .exec_sql(container, "START SLAVE;")
                .await
                .map_err(|e| Error::RewireFailed(format!("{}: {}", instance.id, e)))?;
        }

        // Replication threads take a moment to connect; verify with retries
        for attempt in 1..=10 {
            if self.verify_replication(instance).await? {
                info!(instance = %instance.id, "replication running");
                return Ok(());
            }
            if attempt < 10 {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            }
        }

        Err(Error::RewireFailed(format!(
            "{}: replication threads did not start",
            instance.id
        )))
    }

    async fn ensure_replication_user(&self, from_container: &str, primary_host: &str) {
        let db = &self.config.database;
        let check = format!(
            "SELECT User, Host FROM mysql.user WHERE User='{}';",
            db.replication_user
        );
        if self
            .container
            .exec_sql_on_host(from_container, Some(primary_host), &check)
            .await
            .is_ok()
        {
            return;
        }

        // Cannot see the account from the replica; create it on the primary
        let primary_container = self
            .config
            .instances
            .iter()
            .find(|i| i.host == primary_host)
            .map(|i| i.container.clone());

        if let Some(primary_container) = primary_container {
            let create = format!(
                "CREATE USER IF NOT EXISTS '{user}'@'%' IDENTIFIED WITH mysql_native_password BY '{pass}'; \
                 GRANT REPLICATION SLAVE ON *.* TO '{user}'@'%'; \
                 FLUSH PRIVILEGES;",
                user = db.replication_user,
                pass = db.replication_password,
            );
            if let Err(e) = self.container.exec_sql(&primary_container, &create).await {
                warn!("could not create replication user on primary: {}", e);
            }
        }
    }

    /// Check both replication thread flags, tolerant of either dialect
    async fn verify_replication(&self, instance: &InstanceDescriptor) -> Result<bool> {
        let output = match self
            .container
            .exec_sql(&instance.container, "SHOW REPLICA STATUS\\G")
            .await
        {
            Ok(output) => output,
            Err(_) => {
                self.container
                    .exec_sql(&instance.container, "SHOW SLAVE STATUS\\G")
                    .await?
            }
        };

        let io_running = output.contains("Replica_IO_Running: Yes")
            || output.contains("Slave_IO_Running: Yes");
        let sql_running = output.contains("Replica_SQL_Running: Yes")
            || output.contains("Slave_SQL_Running: Yes");
        Ok(io_running && sql_running)
    }
}

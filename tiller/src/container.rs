//! Container control channel
//!
//! Failover has to reach instances the normal client path cannot: a primary
//! being stopped, a replica still in super-read-only, an engine that has not
//! finished booting. Everything here shells out to the configured container
//! binary (stop/start/inspect/exec) the same way an operator would.

use crate::config::{ContainerConfig, DatabaseConfig};
use crate::error::{Error, Result};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ContainerControl {
    config: ContainerConfig,
    db: DatabaseConfig,
}

impl ContainerControl {
    pub fn new(config: ContainerConfig, db: DatabaseConfig) -> Self {
        Self { config, db }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(binary = %self.config.binary, ?args, "container command");
        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            Command::new(&self.config.binary).args(args).output(),
        )
        .await
        .map_err(|_| Error::Container(format!("{} {:?} timed out", self.config.binary, args)))??;
        Ok(output)
    }

    /// Stop a container and poll until it is actually gone (1 s interval,
    /// bounded wait).
    pub async fn stop(&self, container: &str) -> Result<()> {
        info!(container, "stopping container");
        let output = self.run(&["stop", container]).await?;
        if !output.status.success() {
            return Err(Error::Container(format!(
                "failed to stop {}: {}",
                container,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(self.config.stop_wait_secs);
        while std::time::Instant::now() < deadline {
            if !self.is_running(container).await? {
                info!(container, "container stopped");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(self.config.stop_poll_secs)).await;
        }
        Err(Error::Container(format!(
            "{} still running after {}s",
            container, self.config.stop_wait_secs
        )))
    }

    pub async fn start(&self, container: &str) -> Result<()> {
        info!(container, "starting container");
        let output = self.run(&["start", container]).await?;
        if !output.status.success() {
            return Err(Error::Container(format!(
                "failed to start {}: {}",
                container,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    pub async fn is_running(&self, container: &str) -> Result<bool> {
        let output = self
            .run(&["inspect", "-f", "{{.State.Running}}", container])
            .await?;
        if !output.status.success() {
            // Unknown container or daemon error: treat as not running
            return Ok(false);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim()
            .eq_ignore_ascii_case("true"))
    }

    /// Execute admin SQL inside a container against its local engine
    pub async fn exec_sql(&self, container: &str, sql: &str) -> Result<String> {
        self.exec_sql_on_host(container, None, sql).await
    }

    /// Execute admin SQL from inside a container against another host.
    /// Used to verify the replication account on the primary from a replica.
    pub async fn exec_sql_on_host(
        &self,
        container: &str,
        host: Option<&str>,
        sql: &str,
    ) -> Result<String> {
        let password = format!("-p{}", self.db.password);
        let mut args = vec!["exec", container, "mysql", "-u", self.db.user.as_str()];
        if let Some(host) = host {
            args.push("-h");
            args.push(host);
        }
        args.push(password.as_str());
        args.push("-e");
        args.push(sql);

        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(Error::Container(format!(
                "sql on {} failed: {}",
                container,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Wait for a freshly started engine to accept connections
    pub async fn wait_for_ready(&self, container: &str) -> Result<()> {
        let password = format!("-p{}", self.db.password);
        let attempts = self.config.ready_wait_secs.max(1);
        for attempt in 1..=attempts {
            let result = self
                .run(&[
                    "exec",
                    container,
                    "mysqladmin",
                    "-u",
                    self.db.user.as_str(),
                    password.as_str(),
                    "ping",
                ])
                .await;
            match result {
                Ok(output)
                    if output.status.success()
                        && String::from_utf8_lossy(&output.stdout).contains("mysqld is alive") =>
                {
                    info!(container, "engine ready");
                    return Ok(());
                }
                Ok(_) | Err(_) => {
                    debug!(container, attempt, "waiting for engine");
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        warn!(container, "engine did not become ready in time");
        Err(Error::Container(format!(
            "engine in {} not ready after {}s",
            container, self.config.ready_wait_secs
        )))
    }
}

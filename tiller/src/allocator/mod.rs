//! Logical timestamp allocation
//!
//! Timestamps are strictly positive integers partitioned into K lanes:
//! shard i (seed i, stride K) emits i, i+K, i+2K, ... so issued values are
//! disjoint across shards and strictly increasing within one. Cluster-wide
//! order is established only when the primary serializes writes at apply
//! time.
//!
//! The coordinator sees allocation as a capability ([`Allocator`]) and stays
//! unaware of the shard count; the HTTP implementation fans out over the
//! configured shard endpoints.

mod shard;
pub mod service;

pub use shard::ShardCounter;

use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A timestamp grant from one shard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampGrant {
    pub timestamp: u64,
    pub server_id: u32,
}

/// Capability for obtaining globally unique logical timestamps
#[async_trait]
pub trait Allocator: Send + Sync {
    /// Obtain the next timestamp from any available shard
    async fn next(&self) -> Result<TimestampGrant>;

    /// Reset every shard counter back to its seed. Cluster-wide destructive:
    /// only valid together with an administrative data-clear.
    async fn reset_all(&self) -> Result<()>;
}

/// HTTP fan-out allocator over the timestamp shard services.
///
/// Shards are tried in a freshly shuffled order with a short per-try
/// deadline; the first grant wins. Total failure is transient
/// ([`Error::AllocatorUnavailable`]) and the client may retry.
pub struct HttpAllocator {
    endpoints: Vec<String>,
    client: reqwest::Client,
    try_timeout: Duration,
}

impl HttpAllocator {
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            client: reqwest::Client::new(),
            try_timeout: config.try_timeout(),
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

#[async_trait]
impl Allocator for HttpAllocator {
    async fn next(&self) -> Result<TimestampGrant> {
        if self.endpoints.is_empty() {
            return Err(Error::AllocatorUnavailable(
                "no timestamp shard endpoints configured".to_string(),
            ));
        }

        let mut order = self.endpoints.clone();
        order.shuffle(&mut rand::thread_rng());

        let mut last_error = String::new();
        for endpoint in &order {
            match self
                .client
                .get(format!("{}/timestamp", endpoint))
                .timeout(self.try_timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => match response.json::<TimestampGrant>().await {
                    Ok(grant) => {
                        debug!(
                            timestamp = grant.timestamp,
                            server_id = grant.server_id,
                            "timestamp granted"
                        );
                        return Ok(grant);
                    }
                    Err(e) => {
                        last_error = format!("{}: {}", endpoint, e);
                    }
                },
                Err(e) => {
                    warn!("timestamp shard {} unavailable: {}", endpoint, e);
                    last_error = format!("{}: {}", endpoint, e);
                }
            }
        }

        Err(Error::AllocatorUnavailable(last_error))
    }

    async fn reset_all(&self) -> Result<()> {
        let mut failures = Vec::new();
        for endpoint in &self.endpoints {
            let result = self
                .client
                .post(format!("{}/reset", endpoint))
                .timeout(self.try_timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                failures.push(format!("{}: {}", endpoint, e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::AllocatorUnavailable(failures.join("; ")))
        }
    }
}

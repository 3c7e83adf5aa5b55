//! End-to-end tests for the timestamp shard HTTP service and the fan-out
//! allocator client.
//!
//! Each test binds a real axum server on a random port and talks to it with
//! reqwest, the same way the coordinator does in production.

use std::collections::HashSet;
use std::sync::Arc;
use tiller::allocator::service::ShardService;
use tiller::allocator::{Allocator, HttpAllocator, TimestampGrant};
use tiller::config::AllocatorConfig;
use tiller::{Error, ShardCounter};

async fn start_shard(seed: u64, stride: u64, server_id: u32) -> (String, tokio::task::JoinHandle<()>) {
    let counter = Arc::new(ShardCounter::new(seed, stride));
    let router = ShardService::new(counter, server_id).router();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), handle)
}

fn allocator_for(endpoints: Vec<String>) -> HttpAllocator {
    HttpAllocator::new(&AllocatorConfig {
        endpoints,
        try_timeout_ms: 500,
    })
}

#[tokio::test]
async fn test_grants_are_monotone_within_one_lane() {
    let (base, _handle) = start_shard(1, 2, 1).await;
    let client = reqwest::Client::new();

    let mut last = 0;
    for _ in 0..10 {
        let grant: TimestampGrant = client
            .get(format!("{}/timestamp", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(grant.timestamp > last);
        assert_eq!(grant.timestamp % 2, 1);
        assert_eq!(grant.server_id, 1);
        last = grant.timestamp;
    }
}

#[tokio::test]
async fn test_concurrent_grants_are_unique() {
    let (base, _handle) = start_shard(2, 2, 2).await;
    let client = reqwest::Client::new();

    let mut tasks = Vec::new();
    for _ in 0..200 {
        let client = client.clone();
        let url = format!("{}/timestamp", base);
        tasks.push(tokio::spawn(async move {
            client
                .get(url)
                .send()
                .await
                .unwrap()
                .json::<TimestampGrant>()
                .await
                .unwrap()
                .timestamp
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        let ts = task.await.unwrap();
        assert!(seen.insert(ts), "timestamp {} granted twice", ts);
        assert_eq!(ts % 2, 0);
    }
    assert_eq!(seen.len(), 200);
}

#[tokio::test]
async fn test_reset_restarts_the_lane() {
    let (base, _handle) = start_shard(1, 2, 1).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        client
            .get(format!("{}/timestamp", base))
            .send()
            .await
            .unwrap();
    }

    let reset: serde_json::Value = client
        .post(format!("{}/reset", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["status"], "reset");
    assert_eq!(reset["current_counter"], 1);

    let grant: TimestampGrant = client
        .get(format!("{}/timestamp", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(grant.timestamp, 1);
}

#[tokio::test]
async fn test_health_reports_counter_position() {
    let (base, _handle) = start_shard(3, 5, 3).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["server_id"], 3);
    assert_eq!(health["current_counter"], 3);
}

#[tokio::test]
async fn test_allocator_fans_out_across_shards() {
    let (odd, _h1) = start_shard(1, 2, 1).await;
    let (even, _h2) = start_shard(2, 2, 2).await;
    let allocator = allocator_for(vec![odd, even]);

    let mut seen = HashSet::new();
    for _ in 0..40 {
        let grant = allocator.next().await.unwrap();
        assert!(seen.insert(grant.timestamp));
    }
}

#[tokio::test]
async fn test_allocator_survives_a_dead_shard() {
    let (live, _handle) = start_shard(1, 2, 1).await;
    // Nothing listens on the dead endpoint
    let dead = "http://127.0.0.1:9".to_string();
    let allocator = allocator_for(vec![dead, live]);

    // Shuffled order means the dead shard is tried first about half the
    // time; every call must still succeed via the live one.
    for _ in 0..20 {
        let grant = allocator.next().await.unwrap();
        assert_eq!(grant.timestamp % 2, 1);
    }
}

#[tokio::test]
async fn test_allocator_reports_transient_error_when_all_shards_down() {
    let allocator = allocator_for(vec![
        "http://127.0.0.1:9".to_string(),
        "http://127.0.0.1:10".to_string(),
    ]);
    let err = allocator.next().await.unwrap_err();
    assert!(matches!(err, Error::AllocatorUnavailable(_)));
}

#[tokio::test]
async fn test_allocator_with_no_endpoints_is_unavailable() {
    let allocator = allocator_for(vec![]);
    assert!(matches!(
        allocator.next().await.unwrap_err(),
        Error::AllocatorUnavailable(_)
    ));
}

#[tokio::test]
async fn test_reset_all_hits_every_shard() {
    let (a, _h1) = start_shard(1, 2, 1).await;
    let (b, _h2) = start_shard(2, 2, 2).await;
    let client = reqwest::Client::new();

    for base in [&a, &b] {
        for _ in 0..3 {
            client
                .get(format!("{}/timestamp", base))
                .send()
                .await
                .unwrap();
        }
    }

    let allocator = allocator_for(vec![a.clone(), b.clone()]);
    allocator.reset_all().await.unwrap();

    for (base, seed) in [(&a, 1), (&b, 2)] {
        let health: serde_json::Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["current_counter"], seed);
    }
}

#[tokio::test]
async fn test_reset_all_fails_when_a_shard_is_down() {
    let (live, _handle) = start_shard(1, 2, 1).await;
    let allocator = allocator_for(vec![live, "http://127.0.0.1:9".to_string()]);
    assert!(matches!(
        allocator.reset_all().await.unwrap_err(),
        Error::AllocatorUnavailable(_)
    ));
}

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tiller::allocator::service::ShardService;
use tiller::ShardCounter;

#[derive(Parser, Debug)]
#[command(name = "tiller-timestamp")]
#[command(about = "Timestamp shard: one lane of the logical timestamp space")]
#[command(version)]
struct Args {
    /// Shard identifier, 1-based (env: SERVER_ID)
    #[arg(long, default_value_t = 1, env = "SERVER_ID")]
    server_id: u32,

    /// First value of this shard's lane; defaults to the shard id
    /// (env: START_VALUE)
    #[arg(long, env = "START_VALUE")]
    seed: Option<u64>,

    /// Total shard count K; this shard emits seed, seed+K, seed+2K, ...
    /// (env: SHARD_COUNT)
    #[arg(long, default_value_t = 2, env = "SHARD_COUNT")]
    stride: u64,

    /// Persist the high-water mark here so a restart resumes above it
    /// (env: TILLER_SHARD_STATE)
    #[arg(long, env = "TILLER_SHARD_STATE")]
    state_file: Option<PathBuf>,

    /// Bind address (env: TILLER_SHARD_BIND)
    #[arg(long, default_value = "0.0.0.0:8000", env = "TILLER_SHARD_BIND")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        )
        .init();

    let seed = args.seed.unwrap_or(args.server_id as u64);
    let counter = match &args.state_file {
        Some(path) => Arc::new(ShardCounter::with_state_file(
            seed,
            args.stride,
            path.clone(),
        )?),
        None => Arc::new(ShardCounter::new(seed, args.stride)),
    };

    tracing::info!(
        server_id = args.server_id,
        seed,
        stride = args.stride,
        next = counter.current(),
        "timestamp shard starting on {}",
        args.bind
    );

    let router = ShardService::new(counter, args.server_id).router();
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

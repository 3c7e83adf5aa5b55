use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug, Clone)]
#[command(name = "tiller-server")]
#[command(about = "Tiller cluster coordinator")]
#[command(version)]
struct Args {
    /// Configuration file path (env: TILLER_CONFIG_PATH)
    #[arg(short, long, default_value = "tiller.toml", env = "TILLER_CONFIG_PATH")]
    config: String,

    /// Bind address override (env: TILLER_BIND_ADDR)
    #[arg(long, env = "TILLER_BIND_ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config first (tracing init depends on it)
    let config = tiller::Config::load_or_create(std::path::Path::new(&args.config))?;

    // Env vars override the config for log level and format
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.observability.log_level.clone());
    let log_format =
        std::env::var("LOG_FORMAT").unwrap_or_else(|_| config.observability.log_format.clone());

    let env_filter = tracing_subscriber::EnvFilter::new(&log_level);
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let metrics_handle = if config.observability.metrics_enabled {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("Failed to install Prometheus metrics recorder");
        tracing::info!("Prometheus metrics enabled at /prometheus");
        Some(handle)
    } else {
        None
    };

    let addr = args
        .bind
        .clone()
        .unwrap_or_else(|| config.server.bind_addr.clone());

    let (primary, followers) = config.bootstrap_topology()?;
    tracing::info!(
        primary = %primary.id,
        followers = followers.len(),
        shards = config.allocator.endpoints.len(),
        "starting coordinator"
    );

    let config = Arc::new(config);
    let engine = Arc::new(tiller::EngineClient::new(config.database.clone()));
    let topology = Arc::new(tiller::Topology::new(primary.clone(), followers));
    let allocator: Arc<dyn tiller::Allocator> =
        Arc::new(tiller::HttpAllocator::new(&config.allocator));

    // Make sure the metadata tables exist on the bootstrap primary; they
    // replicate to the followers through the binlog.
    if let Err(e) = engine.ensure_metadata(&primary).await {
        tracing::warn!(
            "could not prepare metadata tables on {}: {} (is the engine up?)",
            primary.id,
            e
        );
    }

    let sampler = Arc::new(tiller::MetricsSampler::new(
        config.sampler.clone(),
        Arc::clone(&engine),
        Arc::clone(&topology),
        config.instances.clone(),
    ));
    let sampler_task = Arc::clone(&sampler).start();

    let container = Arc::new(tiller::container::ContainerControl::new(
        config.container.clone(),
        config.database.clone(),
    ));
    let failover = Arc::new(tiller::FailoverOrchestrator::new(
        Arc::clone(&config),
        Arc::clone(&topology),
        Arc::clone(&sampler),
        container,
    ));

    let coordinator = Arc::new(tiller::Coordinator::new(
        Arc::clone(&config),
        engine,
        topology,
        allocator,
        Arc::clone(&sampler),
        failover,
    ));

    let server = tiller::ApiServer::new(coordinator).with_metrics(metrics_handle);
    let result = server.serve(&addr).await;

    sampler.stop();
    sampler_task.abort();

    result?;
    Ok(())
}

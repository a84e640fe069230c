//! OCT Streamer - ophthalmic imaging ingestion and frame server.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oct_streamer::{
    checksum::{checksum_of_bytes, checksum_of_descriptor, ChecksumService},
    config::{ChecksumConfig, Cli, Command, EvictConfig, ServeConfig},
    server::{create_router, RouterConfig},
    FrameCache, FrameEncoder, FlatteningEngine, IngestService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Evict(config) => run_evict(config).await,
        Command::Checksum(config) => run_checksum(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let version = env!("CARGO_PKG_VERSION");
    info!("OCT Streamer v{}", version);
    info!("Configuration:");
    info!("  Cache dir: {}", config.cache_dir.display());
    info!("  Cache TTL: {} h", config.cache_ttl_hours);
    info!("  JPEG quality: {}", config.jpeg_quality);
    info!(
        "  Flattening: median {}, CLAHE clip {} grid {}",
        config.median_kernel, config.clahe_clip_limit, config.clahe_grid
    );
    info!("  Max upload: {} MiB", config.max_upload_mb);

    if let Err(e) = tokio::fs::create_dir_all(&config.cache_dir).await {
        error!(
            "Failed to create cache dir {}: {}",
            config.cache_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let cache = FrameCache::with_ttl(config.cache_dir.clone(), config.cache_ttl());
    let service = Arc::new(
        IngestService::new(cache)
            .with_checksums(ChecksumService::with_capacity(config.checksum_memo))
            .with_encoder(FrameEncoder::with_quality(config.jpeg_quality))
            .with_flattener(FlatteningEngine::new(config.flatten_config())),
    );

    let support = service.support_status();
    info!(
        "  Readers: {:?}",
        support
            .readers
            .iter()
            .map(|format| format.tag())
            .collect::<Vec<_>>()
    );
    if support.readers.is_empty() {
        warn!("  No container readers registered; every upload will report not_supported");
    }

    let removed = service.evict_expired().await;
    if removed > 0 {
        info!("  Evicted {} expired cache entr(ies)", removed);
    }

    let router = create_router(Arc::clone(&service), build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/support", addr);
    info!("    curl --data-binary @scan.dcm 'http://{}/documents?name=scan.dcm'", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    service.shutdown().await;

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}

/// Resolve once Ctrl-C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "oct_streamer=debug,tower_http=debug"
    } else {
        "oct_streamer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_max_upload_bytes(config.max_upload_bytes());

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Evict Command
// =============================================================================

async fn run_evict(config: EvictConfig) -> ExitCode {
    init_logging(config.verbose);

    if config.max_age_hours == 0 {
        error!("max_age_hours must be greater than 0");
        return ExitCode::FAILURE;
    }

    let cache = FrameCache::new(config.cache_dir.clone());
    let max_age = config.max_age();

    match tokio::task::spawn_blocking(move || cache.evict_older_than(max_age)).await {
        Ok(removed) => {
            println!(
                "Removed {} entr(ies) older than {} h from {}",
                removed,
                config.max_age_hours,
                config.cache_dir.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Eviction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Checksum Command
// =============================================================================

async fn run_checksum(config: ChecksumConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(descriptor) = config.descriptor() {
        println!("{}", checksum_of_descriptor(&descriptor));
        return ExitCode::SUCCESS;
    }

    let Some(path) = config.file else {
        eprintln!("Error: either --file or --path is required");
        return ExitCode::FAILURE;
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            println!("{}", checksum_of_bytes(&bytes));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", path.display(), e);
            ExitCode::FAILURE
        }
    }
}

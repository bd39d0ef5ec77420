//! Deep Zoom Enhancer - a tile server for planetary imagery.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deep_zoom_enhancer::{
    cache::MemoryEnhancementCache,
    config::Config,
    create_s3_client,
    enhance::OperationTable,
    persist::{JsonLinesMetadataSink, MetadataSink, TracingMetadataSink},
    pipeline::{BatchCoordinator, PrecomputeScheduler, TileOrchestrator},
    server::{create_router, AppState, RouterConfig},
    source::{FsTileStore, ImageCatalog, S3TileStore, StaticCatalog, TileStore},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Deep Zoom Enhancer v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    if let Some(root) = config.tile_root.clone() {
        info!("  Tile source: {}", root.display());
        let store = FsTileStore::new(root).with_extension(config.tile_extension.clone());
        run_server(config, store).await
    } else {
        let bucket = config.s3_bucket.clone().unwrap_or_default();
        info!("  Tile source: s3://{}", bucket);
        if let Some(ref endpoint) = config.s3_endpoint {
            info!("  S3 endpoint: {}", endpoint);
        }
        info!("  S3 region: {}", config.s3_region);

        let client = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;
        let mut store =
            S3TileStore::new(client, bucket).with_extension(config.tile_extension.clone());
        if let Some(ref prefix) = config.s3_prefix {
            store = store.with_prefix(prefix.clone());
        }
        run_server(config, store).await
    }
}

/// Wire the pipeline over `store` and serve until ctrl-c.
async fn run_server<S: TileStore>(config: Config, store: S) -> ExitCode {
    let catalog: Arc<dyn ImageCatalog> = match &config.catalog {
        Some(path) => match StaticCatalog::load(path).await {
            Ok(catalog) => {
                info!("  Catalog: {} image(s) from {}", catalog.len(), path.display());
                Arc::new(catalog)
            }
            Err(e) => {
                error!("Failed to load catalog: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            warn!("  Catalog: none (precompute requests will find no images)");
            Arc::new(StaticCatalog::new())
        }
    };

    let sink: Arc<dyn MetadataSink> = match &config.metadata_log {
        Some(path) => {
            info!("  Metadata log: {}", path.display());
            Arc::new(JsonLinesMetadataSink::new(path.clone()))
        }
        None => Arc::new(TracingMetadataSink),
    };

    info!(
        "  Cache: {}MB, {} entries",
        config.cache_bytes / (1024 * 1024),
        config.cache_entries
    );
    let cache =
        MemoryEnhancementCache::with_capacity_and_entries(config.cache_bytes, config.cache_entries);

    let operations = OperationTable::with_settings(&config.provider_settings());
    for (kind, version) in operations.model_versions() {
        info!("  Operation {}: {}", kind, version);
    }

    let orchestrator = Arc::new(
        TileOrchestrator::new(store, cache, operations)
            .with_metadata_sink(sink)
            .with_coalescing(config.coalesce_renders),
    );
    let scheduler = Arc::new(
        PrecomputeScheduler::new(Arc::clone(&orchestrator), catalog)
            .with_concurrency(config.precompute_concurrency),
    );
    let batch = Arc::new(
        BatchCoordinator::new(Arc::clone(&orchestrator)).with_chunk_size(config.batch_chunk_size),
    );

    let state = AppState::new(orchestrator, Arc::clone(&scheduler), batch)
        .with_jpeg_quality(config.jpeg_quality);
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!("  curl http://{}/health", addr);
    info!("  curl http://{}/tiles/<image_id>/0/0/0.jpg?enhance=true", addr);

    let shutdown_scheduler = Arc::clone(&scheduler);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Shutdown signal received");
            shutdown_scheduler.shutdown();
        })
        .await;

    // Jobs still running after the server stops would outlive the runtime
    scheduler.shutdown();

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "deep_zoom_enhancer=debug,tower_http=debug"
    } else {
        "deep_zoom_enhancer=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

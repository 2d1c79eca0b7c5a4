//! pixelpipe - An on-the-fly image transformation server.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pixelpipe::{
    config::{Config, SourceConfig},
    server::create_router,
    source::{create_s3_client, FsImageSource, ImageSource, S3ImageSource},
    transform::{ImageCrateLibrary, TransformManager},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let source = match build_source(&config).await {
        Ok(source) => source,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let manager_config = config.manager_config();

    info!("Configuration:");
    info!("  Source: {}", source.describe());
    info!(
        "  Workers: {}, queue: {}, max wait: {}s",
        manager_config.workers,
        manager_config.queue_capacity,
        config.max_queue_wait
    );
    info!(
        "  Cache: {}MB, ttl: {}s",
        config.cache_size / (1024 * 1024),
        config.cache_ttl
    );
    if config.admin_token.is_none() {
        info!("  Cache deletion: disabled (set --admin-token to enable)");
    }

    let imaging = Arc::new(ImageCrateLibrary::with_max_pixels(config.max_pixels));
    let manager = TransformManager::spawn(manager_config, Arc::clone(&source), imaging);
    let router = create_router(manager, source, config.router_config());

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!("  curl 'http://{}/images/<path>?ops=resize:200x'", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

async fn build_source(config: &Config) -> Result<Arc<dyn ImageSource>, String> {
    match config.source()? {
        SourceConfig::Directory(root) => {
            if !root.is_dir() {
                return Err(format!("{} is not a directory", root.display()));
            }
            Ok(Arc::new(FsImageSource::new(root)))
        }
        SourceConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
        } => {
            let client = create_s3_client(endpoint.as_deref(), &region).await;
            let mut source = S3ImageSource::new(client, bucket);
            if let Some(prefix) = prefix {
                source = source.with_prefix(prefix);
            }
            Ok(Arc::new(source))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pixelpipe=debug,tower_http=debug"
    } else {
        "pixelpipe=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

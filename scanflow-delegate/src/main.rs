//! Scanflow delegate server binary
//!
//! Loads configuration and the product setup, then serves jobs until ctrl-c.
//! On shutdown running jobs are put back to READY_TO_START, and ready jobs
//! found in storage are queued again at start.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanflow_core::product::{ProductSetupFile, load_product_setup_file};
use scanflow_delegate::process::SystemLauncher;
use scanflow_delegate::{Config, DelegateJobService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanflow_delegate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Scanflow Delegate");

    let config = load_config()?;
    info!(
        "Loaded configuration: server_id={}, workspace_root={}",
        config.server_id,
        config.workspace_root.display()
    );

    let products = load_products(&config)?;
    info!(
        "Serving {} product(s) with storage id {}",
        products.products.len(),
        products.storage_id()
    );
    for product in &products.products {
        info!("  - {} ({:?})", product.id, product.scan_type);
    }

    tokio::fs::create_dir_all(&config.workspace_root)
        .await
        .with_context(|| format!("Failed to create {}", config.workspace_root.display()))?;

    info!(
        "Workers: {}, queue max: {}, cancel window: {:?}",
        config.worker_threads, config.queue_max, config.cancel_max_wait
    );
    let service = DelegateJobService::new(config, products, Arc::new(SystemLauncher));
    let resumed = service.resume_ready_jobs().await?;
    if resumed > 0 {
        info!("Requeued {} job(s) left ready by the last shutdown", resumed);
    }

    info!("Delegate ready, press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    service.shutdown().await?;
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            warn!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn load_products(config: &Config) -> Result<ProductSetupFile> {
    let Some(path) = &config.product_setup_file else {
        warn!("No product setup file configured, no products available");
        return Ok(ProductSetupFile {
            server_id: config.server_id.clone(),
            products: Vec::new(),
        });
    };

    let (setup, warnings) = load_product_setup_file(path)
        .with_context(|| format!("Failed to load product setup {}", path.display()))?;
    for warning in warnings {
        warn!("Product setup: {}", warning);
    }
    Ok(setup)
}

//! Quarry host — bootstraps every configured tenant and keeps them alive
//! until interrupted.

mod config;

use std::path::PathBuf;

use anyhow::Context;
use quarry_db::{LogSinkLayer, Tenant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, reload};

const CONFIG_ENV: &str = "QUARRY_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("quarry.toml"));
    let config = config::load_config(&path)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("Invalid log filter '{}'", config.log_filter))?,
    };
    let (sink_layers, sink_layers_handle) = reload::Layer::new(Vec::<LogSinkLayer>::new());
    tracing_subscriber::registry()
        .with(filter)
        .with(sink_layers)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config = %path.display(), tenants = config.tenants.len(), "Starting Quarry host...");

    let mut tenants = Vec::with_capacity(config.tenants.len());
    for settings in &config.tenants {
        let bootstrapped = match settings.tenant_config() {
            Ok(tenant_config) => Tenant::bootstrap(tenant_config)
                .await
                .with_context(|| format!("Failed to bootstrap tenant '{}'", settings.name)),
            Err(e) => Err(e),
        };
        let tenant = match bootstrapped {
            Ok(tenant) => tenant,
            Err(e) => {
                shutdown(tenants).await;
                return Err(e);
            }
        };

        if settings.forward_tracing {
            match tenant.log_sink() {
                Some(sink) => {
                    let layer = sink.layer();
                    sink_layers_handle
                        .modify(|layers| layers.push(layer))
                        .context("Failed to attach tenant log sink to tracing")?;
                }
                None => tracing::warn!(
                    tenant = %settings.name,
                    "forward_tracing is set but the tenant has no log sink"
                ),
            }
        }
        tenants.push(tenant);
    }

    tracing::info!("All tenants ready; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    shutdown(tenants).await;
    tracing::info!("Quarry host stopped.");
    Ok(())
}

async fn shutdown(tenants: Vec<Tenant>) {
    for tenant in tenants {
        tenant.shutdown().await;
    }
}

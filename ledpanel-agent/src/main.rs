//! LedPanel Agent - drives the status panel from the local config
//!
//! - Loads the panel configuration (argument, `LEDPANEL_CONFIG`, or OS config dir)
//! - Resolves hardware metrics backends for the configured GPU vendor
//! - Publishes one JSON frame per tick on stdout until Ctrl-C

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use ledpanel_agent::config::PanelConfig;
use ledpanel_agent::metrics::{default_candidates, MetricsCache, MetricsRegistry, Signal};
use ledpanel_agent::scheduler::{JsonLinesSink, UpdateScheduler};
use ledpanel_agent::store::PanelStore;

const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Main agent state
struct Agent {
    config_path: PathBuf,
    store: Arc<PanelStore>,
    cache: Arc<MetricsCache>,
}

impl Agent {
    async fn new(config_arg: Option<String>) -> Result<Self> {
        info!("Initializing LedPanel Agent v{}", env!("CARGO_PKG_VERSION"));

        let config_path = PanelConfig::resolve_path(config_arg).context("Failed to locate config file")?;
        let config = PanelConfig::load(&config_path).await;

        let registry = MetricsRegistry::resolve(default_candidates(config.gpu_vendor)).await;
        for signal in Signal::ALL {
            if let Some(name) = registry.backend_name(signal) {
                debug!("{} -> {}", signal, name);
            }
        }
        let cache = Arc::new(MetricsCache::new(Arc::new(registry), config.metrics_update_interval()));

        info!(
            "Agent initialized - layout: {:?}, config: {}",
            config.layout_mode,
            config_path.display()
        );

        Ok(Agent {
            config_path,
            store: Arc::new(PanelStore::new(config)),
            cache,
        })
    }

    /// Run until Ctrl-C
    async fn run(&self) -> Result<()> {
        let (sink, writer) = JsonLinesSink::spawn(tokio::io::stdout());
        let scheduler = UpdateScheduler::new(self.store.subscribe(), self.cache.clone(), sink).start();

        let mut metrics_timer = interval(METRICS_LOG_INTERVAL);

        loop {
            tokio::select! {
                _ = metrics_timer.tick() => {
                    let units = self.store.program().units();
                    let snapshot = self.cache.get_metrics_snapshot(units).await;
                    debug!(
                        "CPU {}° {}%, GPU {}° {}%",
                        snapshot.cpu_temp, snapshot.cpu_usage, snapshot.gpu_temp, snapshot.gpu_usage
                    );
                }

                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for Ctrl-C")?;
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        let state = scheduler.stop().await;
        writer
            .await
            .context("Frame writer task failed")?
            .context("Failed to write frames")?;
        info!("Scheduler {:?}, config at {}", state, self.config_path.display());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ledpanel_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("LedPanel Agent starting...");

    let agent = Agent::new(std::env::args().nth(1))
        .await
        .context("Failed to create agent")?;

    agent.run().await.context("Agent execution failed")?;

    Ok(())
}

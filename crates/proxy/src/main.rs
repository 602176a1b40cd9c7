mod context;
mod service;
mod upstream;

use std::sync::Arc;

use anyhow::Result;
use botgate_admin::SharedState;
use botgate_common::{AppConfig, SystemClock};
use botgate_limiter::Gate;
use pingora_core::server::{Server, ShutdownWatch};
use pingora_core::services::background::{background_service, BackgroundService};
use pingora_proxy::http_proxy_service;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::service::BotgateProxy;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/botgate.yaml".to_string());

    info!(config_path = %config_path, "starting botgate");

    let config = AppConfig::load(&config_path)?;

    let gate = if config.limiter.enabled {
        let gate = Gate::new(&config.limiter, Arc::new(SystemClock))?;
        gate.restore_state();
        Some(Arc::new(gate))
    } else {
        info!("limiter disabled, proxying without checks");
        None
    };

    let state = botgate_admin::new_shared_state(config.clone(), gate.clone())?;

    let mut server = Server::new(None)?;
    server.bootstrap();

    let mut proxy_service = http_proxy_service(&server.configuration, BotgateProxy::new(state.clone()));
    for listen_addr in &config.server.listen {
        info!(addr = %listen_addr, "adding listener");
        proxy_service.add_tcp(listen_addr);
    }
    server.add_service(proxy_service);

    if config.server.admin.enabled {
        server.add_service(background_service(
            "admin API",
            AdminBackgroundService {
                listen_addr: config.server.admin.listen.clone(),
                state,
            },
        ));
    }

    if let Some(gate) = gate {
        server.add_service(background_service(
            "limiter state",
            StatePersistenceService { gate },
        ));
    }

    info!("botgate started");
    server.run_forever();
}

/// Runs the admin API alongside Pingora.
struct AdminBackgroundService {
    listen_addr: String,
    state: SharedState,
}

#[async_trait::async_trait]
impl BackgroundService for AdminBackgroundService {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        info!(addr = %self.listen_addr, "starting admin API");

        tokio::select! {
            result = botgate_admin::run_admin_server(self.state.clone(), &self.listen_addr) => {
                if let Err(e) = result {
                    error!(error = %e, "admin API server error");
                }
            }
            _ = shutdown.changed() => {
                info!("admin API shutting down");
            }
        }
    }
}

/// Writes the limiter registry to its state file once shutdown begins.
struct StatePersistenceService {
    gate: Arc<Gate>,
}

#[async_trait::async_trait]
impl BackgroundService for StatePersistenceService {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        // A dropped sender also means the server is going away.
        let _ = shutdown.changed().await;
        info!(path = %self.gate.state_file().display(), "persisting limiter state");
        let gate = Arc::clone(&self.gate);
        if let Err(e) = tokio::task::spawn_blocking(move || gate.persist_state()).await {
            error!(error = %e, "limiter state persistence task failed");
        }
    }
}

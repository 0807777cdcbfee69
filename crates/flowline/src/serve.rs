// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `flowline serve` command implementation.
//!
//! Opens SQLite storage, builds the WhatsApp provider and the engine, starts
//! the job loops and the HTTP gateway, and waits for SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowline_config::model::FlowlineConfig;
use flowline_core::{Clock, FlowlineError, StorageAdapter, SystemClock};
use flowline_engine::shutdown;
use flowline_engine::{jobs, EngineServices, HttpApiCaller};
use flowline_gateway::{AuthConfig, GatewayState, ServerConfig, WebhookConfig};
use flowline_storage::SqliteStorage;
use flowline_whatsapp::WhatsAppProvider;
use tracing::{info, warn};

/// Upper bound on waiting for job loops after shutdown is requested.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Open and migrate the configured database.
pub(crate) async fn open_storage(
    config: &FlowlineConfig,
) -> Result<Arc<SqliteStorage>, FlowlineError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(Arc::new(storage))
}

/// Wire the engine against live adapters.
pub(crate) fn build_services(
    config: &FlowlineConfig,
    storage: Arc<SqliteStorage>,
) -> Result<EngineServices, FlowlineError> {
    let provider = Arc::new(WhatsAppProvider::new(&config.whatsapp)?);
    let api = Arc::new(HttpApiCaller::new()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Ok(EngineServices::new(config, storage, provider, api, clock))
}

/// Runs the `flowline serve` command.
pub async fn run_serve(config: FlowlineConfig) -> Result<(), FlowlineError> {
    info!(name = %config.service.name, "starting flowline serve");

    let storage = open_storage(&config).await?;
    let services = build_services(&config, storage.clone())?;

    let cancel = shutdown::install_signal_handler();

    let mut tasks = Vec::new();
    if config.jobs.enabled {
        for (job, every) in &services.jobs {
            tasks.push(jobs::spawn_job(job.clone(), *every, cancel.clone()));
        }
        info!(count = tasks.len(), "job loops started");
    } else {
        info!("scheduled jobs disabled by configuration");
    }

    if config.gateway.enabled {
        let state = GatewayState {
            engine: services.engine.clone(),
            lifecycle: services.lifecycle.clone(),
            webhook: WebhookConfig::from(&config.whatsapp),
            auth: AuthConfig {
                bearer_token: config.gateway.bearer_token.clone(),
            },
            start_time: Instant::now(),
        };
        if config.whatsapp.app_secret.is_none() {
            warn!("whatsapp.app_secret is unset -- webhook signatures are not checked");
        }
        if config.gateway.bearer_token.is_none() {
            warn!("gateway.bearer_token is unset -- operator routes reject every request");
        }
        flowline_gateway::start_server(&ServerConfig::from(&config.gateway), state, cancel.clone())
            .await?;
    } else {
        info!("gateway disabled by configuration, running jobs only");
        cancel.cancelled().await;
    }

    shutdown::drain_tasks(tasks, DRAIN_TIMEOUT).await;
    storage.close().await?;

    info!("flowline serve shutdown complete");
    Ok(())
}

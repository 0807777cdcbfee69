// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot operator commands: `flowline jobs` and `flowline session`.

use std::sync::Arc;

use flowline_config::model::FlowlineConfig;
use flowline_core::types::Session;
use flowline_core::{Clock, FlowlineError, StorageAdapter, SystemClock};
use flowline_engine::{jobs, SessionLifecycle};
use tracing::{info, warn};

use crate::serve::{build_services, open_storage};
use crate::SessionAction;

/// Runs every scheduled job once. Fails if any job failed.
pub async fn run_jobs(config: &FlowlineConfig) -> Result<(), FlowlineError> {
    let storage = open_storage(config).await?;
    let services = build_services(config, storage.clone())?;

    let mut failed = Vec::new();
    for (name, result) in jobs::run_all_once(&services.job_list()).await {
        match result {
            Ok(count) => {
                info!(job = name, count, "job finished");
                println!("{name}: {count}");
            }
            Err(e) => {
                warn!(job = name, error = %e, "job failed");
                println!("{name}: failed ({e})");
                failed.push(name);
            }
        }
    }

    storage.close().await?;

    if failed.is_empty() {
        Ok(())
    } else {
        Err(FlowlineError::Internal(format!(
            "jobs failed: {}",
            failed.join(", ")
        )))
    }
}

/// Runs `flowline session <action> <id>`.
pub async fn run_session(
    config: &FlowlineConfig,
    action: SessionAction,
    id: &str,
) -> Result<(), FlowlineError> {
    let storage = open_storage(config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lifecycle = SessionLifecycle::new(
        storage.clone(),
        clock,
        config.engine.idle_window_mins,
    );

    let result = apply(&lifecycle, action, id).await;
    storage.close().await?;

    let session = result?;
    println!("session {} is now {}", session.id, session.status);
    Ok(())
}

async fn apply(
    lifecycle: &SessionLifecycle,
    action: SessionAction,
    id: &str,
) -> Result<Session, FlowlineError> {
    match action {
        SessionAction::Pause => lifecycle.pause(id).await,
        SessionAction::Resume => lifecycle.resume(id).await,
        SessionAction::Cancel => lifecycle.cancel(id).await,
    }
}

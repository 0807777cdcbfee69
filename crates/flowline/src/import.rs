// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `flowline import` command implementation.
//!
//! Loads flows, campaigns and keyword bindings from one JSON document. Every
//! flow graph and cross reference is checked before anything is written.

use std::collections::HashSet;
use std::path::Path;

use flowline_config::model::FlowlineConfig;
use flowline_core::flow::FlowDefinition;
use flowline_core::types::Campaign;
use flowline_core::{FlowlineError, StorageAdapter};
use serde::Deserialize;
use tracing::info;

use crate::serve::open_storage;

/// Shape of an import file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportDocument {
    #[serde(default)]
    pub flows: Vec<FlowDefinition>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub keywords: Vec<CampaignKeyword>,
    #[serde(default)]
    pub system_keywords: Vec<SystemKeywordEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignKeyword {
    pub keyword: String,
    pub campaign_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemKeywordEntry {
    pub keyword: String,
    pub flow_id: String,
}

/// Counts of what an import wrote.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub flows: usize,
    pub campaigns: usize,
    pub keywords: usize,
    pub system_keywords: usize,
}

/// Runs `flowline import <file>`.
pub async fn run_import(config: &FlowlineConfig, path: &Path) -> Result<(), FlowlineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        FlowlineError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let doc: ImportDocument = serde_json::from_str(&raw).map_err(|e| {
        FlowlineError::Config(format!("invalid import file {}: {e}", path.display()))
    })?;

    let storage = open_storage(config).await?;
    let result = import(storage.as_ref(), &doc).await;
    storage.close().await?;

    let summary = result?;
    println!(
        "imported {} flows, {} campaigns, {} keywords, {} system keywords",
        summary.flows, summary.campaigns, summary.keywords, summary.system_keywords
    );
    Ok(())
}

/// Validate `doc` against itself and what is already stored, then write it.
///
/// Keyword ownership is enforced by storage, so a keyword owned by another
/// campaign that has not ended fails the import at that binding with `Conflict`.
pub async fn import(
    storage: &dyn StorageAdapter,
    doc: &ImportDocument,
) -> Result<ImportSummary, FlowlineError> {
    for flow in &doc.flows {
        flow.validate()?;
    }

    let flow_ids: HashSet<&str> = doc.flows.iter().map(|f| f.id.as_str()).collect();
    for campaign in &doc.campaigns {
        require_flow(storage, &flow_ids, &campaign.flow_id).await?;
    }
    for entry in &doc.system_keywords {
        require_flow(storage, &flow_ids, &entry.flow_id).await?;
    }

    let campaign_ids: HashSet<&str> = doc.campaigns.iter().map(|c| c.id.as_str()).collect();
    for entry in &doc.keywords {
        if !campaign_ids.contains(entry.campaign_id.as_str())
            && storage.get_campaign(&entry.campaign_id).await?.is_none()
        {
            return Err(FlowlineError::NotFound {
                entity: "campaign",
                id: entry.campaign_id.clone(),
            });
        }
    }

    for flow in &doc.flows {
        storage.upsert_flow(flow).await?;
        info!(flow_id = %flow.id, nodes = flow.nodes.len(), "flow imported");
    }
    for campaign in &doc.campaigns {
        storage.upsert_campaign(campaign).await?;
        info!(campaign_id = %campaign.id, status = %campaign.status, "campaign imported");
    }
    for entry in &doc.keywords {
        storage.bind_keyword(&entry.keyword, &entry.campaign_id).await?;
    }
    for entry in &doc.system_keywords {
        storage
            .bind_system_keyword(&entry.keyword, &entry.flow_id)
            .await?;
    }

    Ok(ImportSummary {
        flows: doc.flows.len(),
        campaigns: doc.campaigns.len(),
        keywords: doc.keywords.len(),
        system_keywords: doc.system_keywords.len(),
    })
}

async fn require_flow(
    storage: &dyn StorageAdapter,
    in_doc: &HashSet<&str>,
    flow_id: &str,
) -> Result<(), FlowlineError> {
    if in_doc.contains(flow_id) || storage.get_flow(flow_id).await?.is_some() {
        Ok(())
    } else {
        Err(FlowlineError::NotFound {
            entity: "flow",
            id: flow_id.to_string(),
        })
    }
}

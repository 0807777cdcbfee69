// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaigns, keyword bindings, and time-window transitions.

use flowline_core::normalize_input;
use flowline_core::types::{Campaign, CampaignStatus, KeywordBinding, SystemKeyword};
use flowline_core::FlowlineError;
use rusqlite::{params, OptionalExtension};
use tracing::warn;

use super::parse_col;
use crate::database::Database;

/// Insert or update a campaign.
pub async fn upsert_campaign(db: &Database, campaign: &Campaign) -> Result<(), FlowlineError> {
    let c = campaign.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO campaigns (id, name, flow_id, status, starts_at, ends_at, activated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    flow_id = excluded.flow_id,
                    status = excluded.status,
                    starts_at = excluded.starts_at,
                    ends_at = excluded.ends_at,
                    activated_at = excluded.activated_at",
                params![
                    c.id,
                    c.name,
                    c.flow_id,
                    c.status.to_string(),
                    c.starts_at,
                    c.ends_at,
                    c.activated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a campaign by ID.
pub async fn get_campaign(db: &Database, id: &str) -> Result<Option<Campaign>, FlowlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Campaign>, rusqlite::Error> {
            conn.query_row(
                "SELECT id, name, flow_id, status, starts_at, ends_at, activated_at
                 FROM campaigns WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Campaign {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        flow_id: row.get(2)?,
                        status: parse_col::<CampaignStatus>(row, 3)?,
                        starts_at: row.get(4)?,
                        ends_at: row.get(5)?,
                        activated_at: row.get(6)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Bind a normalized keyword to a campaign.
///
/// A keyword may belong to only one campaign that has not ended; binding it
/// to a second one is a `Conflict`. Drafts count, so a keyword cannot be
/// handed out twice before either campaign is scheduled.
pub async fn bind_keyword(
    db: &Database,
    keyword: &str,
    campaign_id: &str,
) -> Result<(), FlowlineError> {
    let keyword = normalize_input(keyword);
    let campaign_id = campaign_id.to_string();
    let kw = keyword.clone();
    let owner = db
        .connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let owner: Option<String> = tx
                .query_row(
                    "SELECT k.campaign_id FROM keywords k
                     JOIN campaigns c ON c.id = k.campaign_id
                     WHERE k.keyword = ?1 AND k.campaign_id != ?2
                       AND c.status != 'ended'
                     LIMIT 1",
                    params![kw, campaign_id],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.is_none() {
                tx.execute(
                    "INSERT OR IGNORE INTO keywords (keyword, campaign_id) VALUES (?1, ?2)",
                    params![kw, campaign_id],
                )?;
                tx.commit()?;
            }
            Ok(owner)
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    match owner {
        Some(other) => Err(FlowlineError::Conflict(format!(
            "keyword `{keyword}` is already owned by campaign {other}"
        ))),
        None => Ok(()),
    }
}

/// Map a command keyword to a system flow.
pub async fn bind_system_keyword(
    db: &Database,
    keyword: &str,
    flow_id: &str,
) -> Result<(), FlowlineError> {
    let keyword = normalize_input(keyword);
    let flow_id = flow_id.to_string();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO system_keywords (keyword, flow_id) VALUES (?1, ?2)
                 ON CONFLICT(keyword) DO UPDATE SET flow_id = excluded.flow_id",
                params![keyword, flow_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn find_system_keyword(
    db: &Database,
    normalized: &str,
) -> Result<Option<SystemKeyword>, FlowlineError> {
    let normalized = normalized.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<SystemKeyword>, rusqlite::Error> {
            conn.query_row(
                "SELECT s.keyword, s.flow_id, f.entry_key
                 FROM system_keywords s JOIN flows f ON f.id = s.flow_id
                 WHERE s.keyword = ?1",
                params![normalized],
                |row| {
                    Ok(SystemKeyword {
                        keyword: row.get(0)?,
                        flow_id: row.get(1)?,
                        entry_key: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Keyword bindings owned by active campaigns, most recently activated first.
pub async fn find_campaign_keywords(
    db: &Database,
    normalized: &str,
) -> Result<Vec<KeywordBinding>, FlowlineError> {
    let normalized = normalized.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<KeywordBinding>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT k.keyword, c.id, c.flow_id, f.entry_key, c.activated_at
                 FROM keywords k
                 JOIN campaigns c ON c.id = k.campaign_id
                 JOIN flows f ON f.id = c.flow_id
                 WHERE k.keyword = ?1 AND c.status = 'active'
                 ORDER BY c.activated_at DESC, c.id ASC",
            )?;
            let rows = stmt.query_map(params![normalized], |row| {
                Ok(KeywordBinding {
                    keyword: row.get(0)?,
                    campaign_id: row.get(1)?,
                    flow_id: row.get(2)?,
                    entry_key: row.get(3)?,
                    activated_at: row.get(4)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Due scheduled campaigns sharing a keyword with another open campaign.
/// A status edit after binding can produce these; they stay scheduled.
const KEYWORD_CLASH: &str = "EXISTS (
    SELECT 1 FROM keywords k
    JOIN keywords o ON o.keyword = k.keyword AND o.campaign_id != k.campaign_id
    JOIN campaigns oc ON oc.id = o.campaign_id
    WHERE k.campaign_id = campaigns.id AND oc.status IN ('active', 'paused'))";

/// Open scheduled campaigns whose start time has passed and whose window
/// has not already closed. A campaign whose keyword is held by an active or
/// paused campaign is left scheduled until that owner ends.
pub async fn activate_due_campaigns(db: &Database, now: &str) -> Result<u64, FlowlineError> {
    let now = now.to_string();
    let (activated, blocked) = db
        .connection()
        .call(move |conn| -> Result<(u64, Vec<String>), rusqlite::Error> {
            let tx = conn.transaction()?;
            let due = "status = 'scheduled'
                   AND starts_at IS NOT NULL AND starts_at <= ?1
                   AND (ends_at IS NULL OR ends_at > ?1)";
            let blocked = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id FROM campaigns WHERE {due} AND {KEYWORD_CLASH} ORDER BY id"
                ))?;
                let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let n = tx.execute(
                &format!(
                    "UPDATE campaigns SET status = 'active', activated_at = ?1
                     WHERE {due} AND NOT {KEYWORD_CLASH}"
                ),
                params![now],
            )?;
            tx.commit()?;
            Ok((n as u64, blocked))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    for campaign_id in blocked {
        warn!(
            campaign_id = %campaign_id,
            "activation held back, keyword owned by another open campaign"
        );
    }
    Ok(activated)
}

/// Close live campaigns whose end time has passed.
pub async fn end_due_campaigns(db: &Database, now: &str) -> Result<u64, FlowlineError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let n = conn.execute(
                "UPDATE campaigns SET status = 'ended'
                 WHERE status IN ('scheduled', 'active', 'paused')
                   AND ends_at IS NOT NULL AND ends_at <= ?1",
                params![now],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

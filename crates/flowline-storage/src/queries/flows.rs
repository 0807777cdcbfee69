// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow store. Read-only to the engine; written by imports.

use flowline_core::flow::{FlowDefinition, FlowNode};
use flowline_core::FlowlineError;
use rusqlite::params;
use rusqlite::types::Type;

use crate::database::Database;

/// Validate and store a flow, replacing any previous version of its nodes.
pub async fn upsert_flow(db: &Database, flow: &FlowDefinition) -> Result<(), FlowlineError> {
    flow.validate()?;

    let definitions = flow
        .nodes
        .iter()
        .map(|n| Ok((n.key.clone(), serde_json::to_string(n)?)))
        .collect::<Result<Vec<_>, serde_json::Error>>()?;
    let flow_id = flow.id.clone();
    let name = flow.name.clone();
    let entry_key = flow.entry_key.clone();
    let fallback_key = flow.fallback_key.clone();

    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO flows (id, name, entry_key, fallback_key)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    entry_key = excluded.entry_key,
                    fallback_key = excluded.fallback_key,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![flow_id, name, entry_key, fallback_key],
            )?;
            tx.execute("DELETE FROM flow_nodes WHERE flow_id = ?1", params![flow_id])?;
            for (position, (key, definition)) in definitions.iter().enumerate() {
                tx.execute(
                    "INSERT INTO flow_nodes (flow_id, node_key, position, definition)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![flow_id, key, position as i64, definition],
                )?;
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Load a flow with its nodes in authored order.
pub async fn get_flow(db: &Database, id: &str) -> Result<Option<FlowDefinition>, FlowlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<FlowDefinition>, rusqlite::Error> {
            let header = conn.query_row(
                "SELECT id, name, entry_key, fallback_key FROM flows WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            );
            let (id, name, entry_key, fallback_key) = match header {
                Ok(h) => h,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e),
            };

            let mut stmt = conn.prepare(
                "SELECT definition FROM flow_nodes WHERE flow_id = ?1 ORDER BY position ASC",
            )?;
            let nodes = stmt
                .query_map(params![id], |row| {
                    let definition: String = row.get(0)?;
                    serde_json::from_str::<FlowNode>(&definition).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(FlowDefinition {
                id,
                name,
                entry_key,
                fallback_key,
                nodes,
            }))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

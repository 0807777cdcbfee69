// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the flow, session, and delivery stores.

pub mod campaigns;
pub mod deliveries;
pub mod flows;
pub mod sessions;
pub mod turns;

use std::str::FromStr;

use flowline_core::types::{Direction, Message};
use rusqlite::types::Type;
use rusqlite::{params, Row, Transaction};

/// Parse a TEXT column into a strum-backed enum.
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// True for UNIQUE / CHECK / FK constraint failures.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, session_id, direction, contact_id, content_type, \
     payload, status, provider_message_id, created_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        direction: parse_col::<Direction>(row, 2)?,
        contact_id: row.get(3)?,
        content_type: row.get(4)?,
        payload: row.get(5)?,
        status: row.get(6)?,
        provider_message_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub(crate) fn insert_message(tx: &Transaction<'_>, message: &Message) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO messages (id, session_id, direction, contact_id, content_type,
                               payload, status, provider_message_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            message.id,
            message.session_id,
            message.direction.to_string(),
            message.contact_id,
            message.content_type,
            message.payload,
            message.status,
            message.provider_message_id,
            message.created_at,
        ],
    )?;
    Ok(())
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session store queries.
//!
//! Every status change is scoped by the row's current status so a sweep can
//! never overwrite a session that finished a moment earlier.

use flowline_core::types::{Message, OutboundRecord, Session, SessionStatus};
use flowline_core::FlowlineError;
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{insert_message, is_constraint_violation, message_from_row, parse_col};
use crate::database::Database;
use crate::queries::deliveries::insert_attempt;

pub(crate) const SESSION_COLUMNS: &str = "id, contact_id, campaign_id, flow_id, checkpoint, \
     status, created_at, last_active_at, expires_at, feedback_prompted_at, ended_at";

pub(crate) fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        campaign_id: row.get(2)?,
        flow_id: row.get(3)?,
        checkpoint: row.get(4)?,
        status: parse_col::<SessionStatus>(row, 5)?,
        created_at: row.get(6)?,
        last_active_at: row.get(7)?,
        expires_at: row.get(8)?,
        feedback_prompted_at: row.get(9)?,
        ended_at: row.get(10)?,
    })
}

pub(crate) fn insert_session(tx: &Transaction<'_>, session: &Session) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO sessions (id, contact_id, campaign_id, flow_id, checkpoint, status,
                               created_at, last_active_at, expires_at, feedback_prompted_at,
                               ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            session.id,
            session.contact_id,
            session.campaign_id,
            session.flow_id,
            session.checkpoint,
            session.status.to_string(),
            session.created_at,
            session.last_active_at,
            session.expires_at,
            session.feedback_prompted_at,
            session.ended_at,
        ],
    )?;
    Ok(())
}

pub async fn get_session(db: &Database, id: &str) -> Result<Option<Session>, FlowlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Session>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// The contact's ACTIVE session, if any.
pub async fn active_session_for_contact(
    db: &Database,
    contact_id: &str,
) -> Result<Option<Session>, FlowlineError> {
    let contact_id = contact_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Session>, rusqlite::Error> {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE contact_id = ?1 AND status = 'ACTIVE'"
                ),
                params![contact_id],
                session_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// True if a turn for this provider message id has already been committed.
pub async fn is_processed(db: &Database, provider_message_id: &str) -> Result<bool, FlowlineError> {
    let id = provider_message_id.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM processed_events WHERE provider_message_id = ?1)",
                params![id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Conditionally move a session between lifecycle states.
///
/// Returns `Ok(false)` when the row is no longer in `from`. Resuming a paused
/// session while the contact already has another ACTIVE one is a `Conflict`.
pub async fn transition_session(
    db: &Database,
    id: &str,
    from: SessionStatus,
    to: SessionStatus,
    now: &str,
) -> Result<bool, FlowlineError> {
    if !from.can_transition_to(to) {
        return Err(FlowlineError::InvalidTransition {
            entity: "session",
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    let session_id = id.to_string();
    let now = now.to_string();
    let ended_at = to.is_terminal().then(|| now.clone());
    let resumed = to == SessionStatus::Active;

    let changed = db
        .connection()
        .call(move |conn| -> Result<Option<usize>, rusqlite::Error> {
            let result = conn.execute(
                "UPDATE sessions SET
                    status = ?1,
                    ended_at = COALESCE(?2, ended_at),
                    last_active_at = CASE WHEN ?3 THEN ?4 ELSE last_active_at END
                 WHERE id = ?5 AND status = ?6",
                params![
                    to.to_string(),
                    ended_at,
                    resumed,
                    now,
                    session_id,
                    from.to_string()
                ],
            );
            match result {
                Ok(n) => Ok(Some(n)),
                Err(e) if is_constraint_violation(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    match changed {
        Some(n) => Ok(n > 0),
        None => Err(FlowlineError::Conflict(format!(
            "session {id} cannot resume while its contact has another ACTIVE session"
        ))),
    }
}

/// Expire ACTIVE sessions that have been idle since before `idle_cutoff` or
/// whose node wait deadline has passed.
pub async fn expire_idle_sessions(
    db: &Database,
    now: &str,
    idle_cutoff: &str,
) -> Result<u64, FlowlineError> {
    let now = now.to_string();
    let idle_cutoff = idle_cutoff.to_string();
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let n = conn.execute(
                "UPDATE sessions SET status = 'EXPIRED', ended_at = ?1
                 WHERE status = 'ACTIVE'
                   AND (last_active_at < ?2
                        OR (expires_at IS NOT NULL AND expires_at <= ?1))",
                params![now, idle_cutoff],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// ACTIVE sessions not yet prompted whose last activity falls in
/// `(idle_cutoff, prompt_cutoff]`, stalest first.
pub async fn sessions_due_feedback(
    db: &Database,
    prompt_cutoff: &str,
    idle_cutoff: &str,
    limit: u32,
) -> Result<Vec<Session>, FlowlineError> {
    let prompt_cutoff = prompt_cutoff.to_string();
    let idle_cutoff = idle_cutoff.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<Session>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status = 'ACTIVE'
                   AND feedback_prompted_at IS NULL
                   AND last_active_at <= ?1
                   AND last_active_at >= ?2
                 ORDER BY last_active_at ASC, id ASC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![prompt_cutoff, idle_cutoff, limit], session_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Stamp a feedback prompt and queue its message in one transaction.
///
/// Nothing is written if the session replied, ended, or was already prompted
/// since `session` was read.
pub async fn record_feedback_prompt(
    db: &Database,
    session: &Session,
    outbound: &OutboundRecord,
    now: &str,
) -> Result<bool, FlowlineError> {
    let session_id = session.id.clone();
    let last_active_at = session.last_active_at.clone();
    let outbound = outbound.clone();
    let now = now.to_string();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            let stamped = tx.execute(
                "UPDATE sessions SET feedback_prompted_at = ?1
                 WHERE id = ?2 AND status = 'ACTIVE'
                   AND feedback_prompted_at IS NULL
                   AND last_active_at = ?3",
                params![now, session_id, last_active_at],
            )?;
            if stamped == 0 {
                return Ok(false);
            }
            insert_message(&tx, &outbound.message)?;
            insert_attempt(&tx, &outbound.attempt)?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Expire ACTIVE sessions whose feedback prompt went unanswered past the
/// discard cutoff. A reply clears the prompt stamp, so answered sessions are
/// never matched.
pub async fn discard_unanswered_feedback(
    db: &Database,
    now: &str,
    discard_cutoff: &str,
) -> Result<u64, FlowlineError> {
    let now = now.to_string();
    let discard_cutoff = discard_cutoff.to_string();
    db.connection()
        .call(move |conn| -> Result<u64, rusqlite::Error> {
            let n = conn.execute(
                "UPDATE sessions SET status = 'EXPIRED', ended_at = ?1
                 WHERE status = 'ACTIVE'
                   AND feedback_prompted_at IS NOT NULL
                   AND feedback_prompted_at <= ?2",
                params![now, discard_cutoff],
            )?;
            Ok(n as u64)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All messages of a session in creation order.
pub async fn messages_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Vec<Message>, FlowlineError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<Message>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, rowid ASC",
                super::MESSAGE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![session_id], message_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Atomic turn commit.
//!
//! One transaction records the dedupe marker, the session write, the inbound
//! message, and every outbound message with its pending attempt. Any guard
//! miss rolls the whole turn back.

use flowline_core::types::{CommitOutcome, SessionStatus, SessionWrite, TurnCommit};
use flowline_core::FlowlineError;
use rusqlite::params;

use super::deliveries::insert_attempt;
use super::sessions::insert_session;
use super::{insert_message, is_constraint_violation};
use crate::database::Database;

pub async fn commit_turn(db: &Database, commit: &TurnCommit) -> Result<CommitOutcome, FlowlineError> {
    let commit = commit.clone();
    db.connection()
        .call(move |conn| -> Result<CommitOutcome, rusqlite::Error> {
            let tx = conn.transaction()?;
            let now = &commit.now;

            if let Some(inbound) = &commit.inbound {
                let fresh = tx.execute(
                    "INSERT OR IGNORE INTO processed_events (provider_message_id, processed_at)
                     VALUES (?1, ?2)",
                    params![inbound.provider_message_id, now],
                )?;
                if fresh == 0 {
                    return Ok(CommitOutcome::Duplicate);
                }
            }

            if let Some(id) = &commit.cancel_session {
                tx.execute(
                    "UPDATE sessions SET status = 'CANCELLED', ended_at = ?1
                     WHERE id = ?2 AND status = 'ACTIVE'",
                    params![now, id],
                )?;
            }

            match &commit.session {
                SessionWrite::Create(session) => match insert_session(&tx, session) {
                    Ok(()) => {}
                    Err(e) if is_constraint_violation(&e) => return Ok(CommitOutcome::Conflict),
                    Err(e) => return Err(e),
                },
                SessionWrite::Advance(update) => {
                    let ended_at =
                        (update.status == SessionStatus::Completed).then(|| now.clone());
                    let moved = tx.execute(
                        "UPDATE sessions SET
                            checkpoint = ?1,
                            status = ?2,
                            last_active_at = ?3,
                            expires_at = ?4,
                            feedback_prompted_at = CASE WHEN ?5 THEN NULL
                                                        ELSE feedback_prompted_at END,
                            ended_at = COALESCE(?6, ended_at)
                         WHERE id = ?7 AND status = 'ACTIVE' AND checkpoint = ?8",
                        params![
                            update.checkpoint,
                            update.status.to_string(),
                            update.last_active_at,
                            update.expires_at,
                            update.clear_feedback,
                            ended_at,
                            update.session_id,
                            update.expected_checkpoint,
                        ],
                    )?;
                    if moved == 0 {
                        return Ok(CommitOutcome::Conflict);
                    }
                }
                SessionWrite::Untouched => {}
            }

            if let Some(inbound) = &commit.inbound {
                insert_message(&tx, &inbound.message)?;
            }
            for record in &commit.outbound {
                insert_message(&tx, &record.message)?;
                insert_attempt(&tx, &record.attempt)?;
            }

            tx.commit()?;
            Ok(CommitOutcome::Committed)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

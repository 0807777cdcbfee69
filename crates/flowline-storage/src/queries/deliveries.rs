// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery log queries.
//!
//! A row moving to `retrying` is the lease: only the caller whose conditional
//! update matched may send the message and settle the attempt.
//!
//! Every row carries a `seq` assigned at insert. Scans order by their
//! timestamp and then by `seq`, so equal due times keep insertion order.

use flowline_core::types::{AttemptUpdate, ClaimedAttempt, DeliveryAttempt, DeliveryStatus};
use flowline_core::FlowlineError;
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{message_from_row, parse_col, MESSAGE_COLUMNS};
use crate::database::Database;

const ATTEMPT_COLUMNS: &str = "id, message_id, status, retry_count, next_retry_at, \
     last_attempt_at, lease_until, error_message, created_at, updated_at";

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryAttempt> {
    Ok(DeliveryAttempt {
        id: row.get(0)?,
        message_id: row.get(1)?,
        status: parse_col::<DeliveryStatus>(row, 2)?,
        retry_count: row.get(3)?,
        next_retry_at: row.get(4)?,
        last_attempt_at: row.get(5)?,
        lease_until: row.get(6)?,
        error_message: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn insert_attempt(tx: &Transaction<'_>, attempt: &DeliveryAttempt) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO delivery_attempts (id, seq, message_id, status, retry_count, next_retry_at,
                                        last_attempt_at, lease_until, error_message,
                                        created_at, updated_at)
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM delivery_attempts),
                 ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            attempt.id,
            attempt.message_id,
            attempt.status.to_string(),
            attempt.retry_count,
            attempt.next_retry_at,
            attempt.last_attempt_at,
            attempt.lease_until,
            attempt.error_message,
            attempt.created_at,
            attempt.updated_at,
        ],
    )?;
    Ok(())
}

pub async fn get_attempt(db: &Database, id: &str) -> Result<Option<DeliveryAttempt>, FlowlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<DeliveryAttempt>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM delivery_attempts WHERE id = ?1"),
                params![id],
                attempt_from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Lease a due `pending` or `failed` attempt by moving it to `retrying`.
pub async fn claim_attempt(
    db: &Database,
    id: &str,
    now: &str,
    lease_until: &str,
) -> Result<Option<ClaimedAttempt>, FlowlineError> {
    let id = id.to_string();
    let now = now.to_string();
    let lease_until = lease_until.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ClaimedAttempt>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let claimed = tx.execute(
                "UPDATE delivery_attempts
                 SET status = 'retrying', lease_until = ?1, updated_at = ?2
                 WHERE id = ?3
                   AND status IN ('pending', 'failed')
                   AND (next_retry_at IS NULL OR next_retry_at <= ?2)",
                params![lease_until, now, id],
            )?;
            if claimed == 0 {
                return Ok(None);
            }

            let attempt = tx.query_row(
                &format!("SELECT {ATTEMPT_COLUMNS} FROM delivery_attempts WHERE id = ?1"),
                params![id],
                attempt_from_row,
            )?;
            tx.execute(
                "UPDATE messages SET status = 'retrying' WHERE id = ?1",
                params![attempt.message_id],
            )?;
            let message = tx.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![attempt.message_id],
                message_from_row,
            )?;
            tx.commit()?;
            Ok(Some(ClaimedAttempt { attempt, message }))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Apply one attempt transition if the row is still in `update.from` with
/// `update.expected_retry_count`, mirroring the outcome onto the message.
pub async fn update_attempt(db: &Database, update: &AttemptUpdate) -> Result<bool, FlowlineError> {
    update.validate()?;
    let u = update.clone();
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            let keep_lease = u.to == DeliveryStatus::Retrying;
            let changed = tx.execute(
                "UPDATE delivery_attempts SET
                    status = ?1,
                    retry_count = ?2,
                    next_retry_at = ?3,
                    last_attempt_at = COALESCE(?4, last_attempt_at),
                    error_message = ?5,
                    lease_until = CASE WHEN ?6 THEN lease_until ELSE NULL END,
                    updated_at = ?7
                 WHERE id = ?8 AND status = ?9 AND retry_count = ?10",
                params![
                    u.to.to_string(),
                    u.retry_count,
                    u.next_retry_at,
                    u.last_attempt_at,
                    u.error_message,
                    keep_lease,
                    u.now,
                    u.attempt_id,
                    u.from.to_string(),
                    u.expected_retry_count,
                ],
            )?;
            if changed == 0 {
                return Ok(false);
            }
            tx.execute(
                "UPDATE messages SET
                    status = ?1,
                    provider_message_id = COALESCE(?2, provider_message_id)
                 WHERE id = ?3",
                params![u.to.to_string(), u.provider_message_id, u.message_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Attempts whose next try is due, below the retry ceiling, oldest due first
/// and insertion order within the same due time.
pub async fn due_attempts(
    db: &Database,
    now: &str,
    max_retries: u32,
    limit: u32,
) -> Result<Vec<DeliveryAttempt>, FlowlineError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<DeliveryAttempt>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTEMPT_COLUMNS} FROM delivery_attempts
                 WHERE status IN ('pending', 'failed')
                   AND next_retry_at IS NOT NULL AND next_retry_at <= ?1
                   AND retry_count < ?2
                 ORDER BY next_retry_at ASC, seq ASC
                 LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![now, max_retries, limit], attempt_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// `retrying` rows whose holder never settled them before the lease lapsed.
pub async fn expired_leases(db: &Database, now: &str) -> Result<Vec<DeliveryAttempt>, FlowlineError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<DeliveryAttempt>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ATTEMPT_COLUMNS} FROM delivery_attempts
                 WHERE status = 'retrying'
                   AND lease_until IS NOT NULL AND lease_until < ?1
                 ORDER BY lease_until ASC, seq ASC"
            ))?;
            let rows = stmt.query_map(params![now], attempt_from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{
    Contact, ExecutionId, ExecutionRecord, StepRecord, StepStatus, ThreadSnapshot,
};

use crate::store::{db_err, parse_opt_ts, parse_ts, ts, SqliteStore};

impl SqliteStore {
    /// Insert an execution and its planned steps in one transaction.
    pub fn create_execution(&self, record: &ExecutionRecord, steps: &[StepRecord]) -> Result<()> {
        let contact_json = record
            .contact
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO executions (id, owner_id, cadence_id, contact_id, contact_json,
                thread_id, canonical_subject, canonical_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.0,
                record.owner_id,
                record.cadence_id,
                record.contact_id(),
                contact_json,
                record.thread.thread_id,
                record.thread.canonical_subject,
                record.thread.canonical_message_id,
                ts(&record.created_at),
            ],
        )
        .map_err(db_err)?;

        for step in steps {
            tx.execute(
                "INSERT INTO steps (execution_id, node_id, position, recipient, subject, body,
                    scheduled_for, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id.0,
                    step.node_id,
                    step.position as i64,
                    step.recipient,
                    step.subject,
                    step.body,
                    ts(&step.scheduled_for),
                    step.status.as_str(),
                ],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;

        debug!(execution_id = %record.id, steps = steps.len(), "Execution persisted");
        Ok(())
    }

    /// Store the conversation values captured by the first send.
    pub fn update_thread(&self, id: &ExecutionId, thread: &ThreadSnapshot) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE executions SET thread_id = ?2, canonical_subject = ?3, canonical_message_id = ?4
             WHERE id = ?1",
            params![
                id.0,
                thread.thread_id,
                thread.canonical_subject,
                thread.canonical_message_id
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn execution(&self, id: &ExecutionId) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, owner_id, cadence_id, contact_json, thread_id, canonical_subject,
                canonical_message_id, created_at, cancelled_at, completed_at
             FROM executions WHERE id = ?1",
            params![id.0],
            execution_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Steps of an execution in timeline order.
    pub fn steps(&self, id: &ExecutionId) -> Result<Vec<StepRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT execution_id, node_id, position, recipient, subject, body,
                    scheduled_for, status, sent_at, provider_message_id
                 FROM steps WHERE execution_id = ?1 ORDER BY position ASC",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![id.0], step_from_row).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Execution row plus its steps.
    pub fn execution_status(
        &self,
        id: &ExecutionId,
    ) -> Result<(ExecutionRecord, Vec<StepRecord>)> {
        let record = self
            .execution(id)?
            .ok_or_else(|| CadenceError::ExecutionNotFound(id.to_string()))?;
        let steps = self.steps(id)?;
        Ok((record, steps))
    }

    pub fn step_status(&self, id: &ExecutionId, node_id: &str) -> Result<Option<StepStatus>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM steps WHERE execution_id = ?1 AND node_id = ?2",
                params![id.0, node_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(raw.as_deref().and_then(StepStatus::parse))
    }

    /// `pending -> sent`. Returns false when the step was no longer pending.
    pub fn mark_step_sent(
        &self,
        id: &ExecutionId,
        node_id: &str,
        provider_message_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE steps SET status = 'sent', sent_at = ?3, provider_message_id = ?4
                 WHERE execution_id = ?1 AND node_id = ?2 AND status = 'pending'",
                params![id.0, node_id, ts(&sent_at), provider_message_id],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// `pending -> cancelled` for the named steps. Sent steps are untouched.
    pub fn cancel_steps(&self, id: &ExecutionId, node_ids: &[String]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut changed = 0;
        for node_id in node_ids {
            changed += tx
                .execute(
                    "UPDATE steps SET status = 'cancelled'
                     WHERE execution_id = ?1 AND node_id = ?2 AND status = 'pending'",
                    params![id.0, node_id],
                )
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        Ok(changed)
    }

    /// `pending -> cancelled` for every remaining step of the execution.
    pub fn cancel_all_pending(&self, id: &ExecutionId) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE steps SET status = 'cancelled' WHERE execution_id = ?1 AND status = 'pending'",
            params![id.0],
        )
        .map_err(db_err)
    }

    /// Record the cancellation time. Only the first call for an execution
    /// returns true.
    pub fn mark_cancelled_once(&self, id: &ExecutionId, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE executions SET cancelled_at = ?2 WHERE id = ?1 AND cancelled_at IS NULL",
                params![id.0, ts(&at)],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    pub fn mark_completed(&self, id: &ExecutionId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE executions SET completed_at = ?2 WHERE id = ?1 AND completed_at IS NULL",
            params![id.0, ts(&at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Executions that still have work to do: neither cancelled nor completed,
    /// with at least one pending step.
    pub fn executions_with_pending_steps(&self) -> Result<Vec<ExecutionId>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT e.id FROM executions e
                 JOIN steps s ON s.execution_id = e.id
                 WHERE e.cancelled_at IS NULL AND e.completed_at IS NULL
                    AND s.status = 'pending'
                 ORDER BY e.created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok(ExecutionId(row.get(0)?)))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Executions of one cadence for one contact that have not been cancelled.
    pub fn active_executions_for(
        &self,
        owner_id: &str,
        contact_id: &str,
        cadence_id: &str,
    ) -> Result<Vec<ExecutionId>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM executions
                 WHERE owner_id = ?1 AND contact_id = ?2 AND cadence_id = ?3
                    AND cancelled_at IS NULL
                 ORDER BY created_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![owner_id, contact_id, cadence_id], |row| {
                Ok(ExecutionId(row.get(0)?))
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}

fn execution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let contact_json: Option<String> = row.get(3)?;
    let contact = contact_json
        .map(|raw| serde_json::from_str::<Contact>(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let created_at: String = row.get(7)?;

    Ok(ExecutionRecord {
        id: ExecutionId(row.get(0)?),
        owner_id: row.get(1)?,
        cadence_id: row.get(2)?,
        contact,
        thread: ThreadSnapshot {
            thread_id: row.get(4)?,
            canonical_subject: row.get(5)?,
            canonical_message_id: row.get(6)?,
        },
        created_at: parse_ts(7, &created_at)?,
        cancelled_at: parse_opt_ts(8, row.get(8)?)?,
        completed_at: parse_opt_ts(9, row.get(9)?)?,
    })
}

fn step_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRecord> {
    let scheduled: String = row.get(6)?;
    let status: String = row.get(7)?;
    let status = StepStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown step status '{}'", status).into(),
        )
    })?;

    Ok(StepRecord {
        execution_id: ExecutionId(row.get(0)?),
        node_id: row.get(1)?,
        position: row.get::<_, i64>(2)? as usize,
        recipient: row.get(3)?,
        subject: row.get(4)?,
        body: row.get(5)?,
        scheduled_for: parse_ts(6, &scheduled)?,
        status,
        sent_at: parse_opt_ts(8, row.get(8)?)?,
        provider_message_id: row.get(9)?,
    })
}

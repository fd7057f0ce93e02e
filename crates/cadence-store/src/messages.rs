use chrono::{DateTime, Utc};
use rusqlite::params;

use cadence_core::error::Result;
use cadence_core::types::{ExecutionId, InboundReplyRecord, SentMessageRecord};

use crate::store::{db_err, parse_ts, ts, SqliteStore};

impl SqliteStore {
    /// Record a provider message we produced. Returns false if the provider
    /// message id was already recorded.
    pub fn insert_sent_message(&self, record: &SentMessageRecord) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO sent_messages (provider_message_id, owner_id, execution_id,
                    cadence_id, contact_id, node_id, thread_id, canonical_message_id, subject,
                    recipient, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.provider_message_id,
                    record.owner_id,
                    record.execution_id.as_ref().map(|id| id.0.as_str()),
                    record.cadence_id,
                    record.contact_id,
                    record.node_id,
                    record.thread_id,
                    record.canonical_message_id,
                    record.subject,
                    record.recipient,
                    ts(&record.sent_at),
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    /// Sent messages of one owner newer than `since`, oldest first.
    pub fn sent_messages_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SentMessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT provider_message_id, owner_id, execution_id, cadence_id, contact_id,
                    node_id, thread_id, canonical_message_id, subject, recipient, sent_at
                 FROM sent_messages
                 WHERE owner_id = ?1 AND sent_at >= ?2
                 ORDER BY sent_at ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![owner_id, ts(&since)], |row| {
                let sent_at: String = row.get(10)?;
                Ok(SentMessageRecord {
                    provider_message_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    execution_id: row.get::<_, Option<String>>(2)?.map(ExecutionId),
                    cadence_id: row.get(3)?,
                    contact_id: row.get(4)?,
                    node_id: row.get(5)?,
                    thread_id: row.get(6)?,
                    canonical_message_id: row.get(7)?,
                    subject: row.get(8)?,
                    recipient: row.get(9)?,
                    sent_at: parse_ts(10, &sent_at)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Log an inbound reply. Returns false when (provider message id, owner)
    /// was already logged; that pair is the dedup key for reply processing.
    pub fn insert_inbound_reply(&self, record: &InboundReplyRecord) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO inbound_replies (provider_message_id, owner_id,
                    execution_id, cadence_id, contact_id, thread_id, sender, subject,
                    body_excerpt, received_at, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.provider_message_id,
                    record.owner_id,
                    record.execution_id.as_ref().map(|id| id.0.as_str()),
                    record.cadence_id,
                    record.contact_id,
                    record.thread_id,
                    record.sender,
                    record.subject,
                    record.body_excerpt,
                    ts(&record.received_at),
                    record.read as i64,
                ],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    pub fn has_inbound_reply(&self, owner_id: &str, provider_message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM inbound_replies
                 WHERE owner_id = ?1 AND provider_message_id = ?2",
                params![owner_id, provider_message_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Logged replies of one owner, newest first.
    pub fn inbound_replies(&self, owner_id: &str) -> Result<Vec<InboundReplyRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT provider_message_id, owner_id, execution_id, cadence_id, contact_id,
                    thread_id, sender, subject, body_excerpt, received_at, read
                 FROM inbound_replies WHERE owner_id = ?1
                 ORDER BY received_at DESC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![owner_id], |row| {
                let received_at: String = row.get(9)?;
                Ok(InboundReplyRecord {
                    provider_message_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    execution_id: row.get::<_, Option<String>>(2)?.map(ExecutionId),
                    cadence_id: row.get(3)?,
                    contact_id: row.get(4)?,
                    thread_id: row.get(5)?,
                    sender: row.get(6)?,
                    subject: row.get(7)?,
                    body_excerpt: row.get(8)?,
                    received_at: parse_ts(9, &received_at)?,
                    read: row.get::<_, i64>(10)? != 0,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    pub fn mark_reply_read(&self, owner_id: &str, provider_message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE inbound_replies SET read = 1
                 WHERE owner_id = ?1 AND provider_message_id = ?2",
                params![owner_id, provider_message_id],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }
}

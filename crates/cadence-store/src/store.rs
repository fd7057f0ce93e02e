use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{MailAccount, UserSettings};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    owner_id TEXT PRIMARY KEY,
    address TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    owner_id TEXT PRIMARY KEY,
    ai_replies_enabled INTEGER NOT NULL DEFAULT 1,
    draft_mode INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    cadence_id TEXT NOT NULL,
    contact_id TEXT,
    contact_json TEXT,
    thread_id TEXT,
    canonical_subject TEXT,
    canonical_message_id TEXT,
    created_at TEXT NOT NULL,
    cancelled_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_executions_contact
    ON executions(owner_id, contact_id, cadence_id);

CREATE TABLE IF NOT EXISTS steps (
    execution_id TEXT NOT NULL REFERENCES executions(id),
    node_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    scheduled_for TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    sent_at TEXT,
    provider_message_id TEXT,
    PRIMARY KEY (execution_id, node_id)
);

CREATE INDEX IF NOT EXISTS idx_steps_status ON steps(status, execution_id);

CREATE TABLE IF NOT EXISTS sent_messages (
    provider_message_id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    execution_id TEXT,
    cadence_id TEXT,
    contact_id TEXT,
    node_id TEXT,
    thread_id TEXT NOT NULL,
    canonical_message_id TEXT,
    subject TEXT NOT NULL,
    recipient TEXT NOT NULL,
    sent_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sent_owner ON sent_messages(owner_id, sent_at);

CREATE TABLE IF NOT EXISTS inbound_replies (
    provider_message_id TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    execution_id TEXT,
    cadence_id TEXT,
    contact_id TEXT,
    thread_id TEXT NOT NULL,
    sender TEXT NOT NULL,
    subject TEXT NOT NULL,
    body_excerpt TEXT NOT NULL,
    received_at TEXT NOT NULL,
    read INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (provider_message_id, owner_id)
);
";

/// SQLite-backed store for executions, steps and mail records.
///
/// All methods are synchronous and hold the connection lock only for the
/// duration of one statement or transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CadenceError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CadenceError::Database(e.to_string()))
    }

    /// Insert or replace the mailbox credentials of one owner.
    pub fn upsert_account(&self, account: &MailAccount) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts (owner_id, address, access_token, refresh_token, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(owner_id) DO UPDATE SET
                address = excluded.address,
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, accounts.refresh_token),
                updated_at = excluded.updated_at",
            params![
                account.owner_id,
                account.address,
                account.access_token,
                account.refresh_token,
                ts(&Utc::now())
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Persist a refreshed access token.
    pub fn update_access_token(&self, owner_id: &str, access_token: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET access_token = ?2, updated_at = ?3 WHERE owner_id = ?1",
            params![owner_id, access_token, ts(&Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn mail_account(&self, owner_id: &str) -> Result<Option<MailAccount>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT owner_id, address, access_token, refresh_token
             FROM accounts WHERE owner_id = ?1",
            params![owner_id],
            account_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Every owner with stored mail credentials.
    pub fn mail_accounts(&self) -> Result<Vec<MailAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT owner_id, address, access_token, refresh_token
                 FROM accounts ORDER BY owner_id",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map([], account_from_row).map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Settings for an owner; defaults when none are stored.
    pub fn settings(&self, owner_id: &str) -> Result<UserSettings> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT ai_replies_enabled, draft_mode FROM settings WHERE owner_id = ?1",
                params![owner_id],
                |row| {
                    Ok(UserSettings {
                        ai_replies_enabled: row.get::<_, i64>(0)? != 0,
                        draft_mode: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;
        Ok(row.unwrap_or_default())
    }

    pub fn set_settings(&self, owner_id: &str, settings: UserSettings) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (owner_id, ai_replies_enabled, draft_mode) VALUES (?1, ?2, ?3)
             ON CONFLICT(owner_id) DO UPDATE SET
                ai_replies_enabled = excluded.ai_replies_enabled,
                draft_mode = excluded.draft_mode",
            params![
                owner_id,
                settings.ai_replies_enabled as i64,
                settings.draft_mode as i64
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MailAccount> {
    Ok(MailAccount {
        owner_id: row.get(0)?,
        address: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
    })
}

pub(crate) fn db_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so text comparison in SQL orders correctly.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp inside a row mapper.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job history: append-only SQLite log of every fully received job.
//
// Schema:
//   job_log(
//     id        INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp TEXT    NOT NULL,   -- RFC 3339
//     email     TEXT    NOT NULL,   -- account the job was charged to
//     job_name  TEXT    NOT NULL,
//     pages     INTEGER NOT NULL,   -- 0 for anything not printed
//     outcome   TEXT    NOT NULL,   -- "printed", "dropped", "rejected", "failed"
//     details   TEXT                -- optional free-form context
//   )

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use greenbar_core::error::{GreenbarError, Result};

fn db_err(e: rusqlite::Error) -> GreenbarError {
    GreenbarError::Database(e.to_string())
}

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS job_log (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT    NOT NULL,
        email     TEXT    NOT NULL,
        job_name  TEXT    NOT NULL,
        pages     INTEGER NOT NULL,
        outcome   TEXT    NOT NULL,
        details   TEXT
    );";

/// A single entry in the job history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub id: i64,
    pub timestamp: String,
    pub email: String,
    pub job_name: String,
    pub pages: u32,
    pub outcome: String,
    pub details: Option<String>,
}

/// Append-only job history backed by a SQLite database.
pub struct JobLog {
    conn: Connection,
}

impl JobLog {
    /// Open (or create) the job history at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("job log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory job history (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory job log opened");
        Ok(Self { conn })
    }

    /// Append an entry.
    #[instrument(skip(self, details), fields(%email, %outcome, pages))]
    pub fn record(
        &self,
        email: &str,
        job_name: &str,
        pages: u32,
        outcome: &str,
        details: Option<&str>,
    ) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO job_log (timestamp, email, job_name, pages, outcome, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![timestamp, email, job_name, pages, outcome, details],
            )
            .map_err(db_err)?;

        debug!("job log entry recorded");
        Ok(())
    }

    /// All entries for one account, oldest first.
    pub fn entries_for_account(&self, email: &str) -> Result<Vec<JobLogEntry>> {
        self.query(
            "SELECT id, timestamp, email, job_name, pages, outcome, details
             FROM job_log
             WHERE email = ?1
             ORDER BY id ASC",
            params![email],
        )
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<JobLogEntry>> {
        self.query(
            "SELECT id, timestamp, email, job_name, pages, outcome, details
             FROM job_log
             ORDER BY id DESC
             LIMIT ?1",
            params![limit],
        )
    }

    /// Total number of entries.
    pub fn count(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM job_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<JobLogEntry>> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(JobLogEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    email: row.get(2)?,
                    job_name: row.get(3)?,
                    pages: row.get(4)?,
                    outcome: row.get(5)?,
                    details: row.get(6)?,
                })
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }
}

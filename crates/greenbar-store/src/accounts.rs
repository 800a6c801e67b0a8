// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite-backed account store.
//
// Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
// precision, `Z` suffix) so that SQL string comparison orders them
// chronologically.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::store::AccountStore;
use greenbar_core::types::Account;

/// SQLite schema for the accounts table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        email TEXT PRIMARY KEY,
        access_key TEXT NOT NULL UNIQUE,
        full_name TEXT NOT NULL DEFAULT '',
        location TEXT NOT NULL DEFAULT '',
        verified INTEGER NOT NULL DEFAULT 0,
        enabled INTEGER NOT NULL DEFAULT 1,
        admin INTEGER NOT NULL DEFAULT 0,
        unlimited INTEGER NOT NULL DEFAULT 0,
        nuisance_opt_out INTEGER NOT NULL DEFAULT 0,
        email_opt_out INTEGER NOT NULL DEFAULT 0,
        profile TEXT,
        job_count INTEGER NOT NULL DEFAULT 0,
        page_count INTEGER NOT NULL DEFAULT 0,
        window_start TEXT NOT NULL,
        last_job TEXT,
        created_at TEXT NOT NULL
    )
"#;

const SELECT_COLUMNS: &str = "SELECT email, access_key, full_name, location, verified, enabled,
        admin, unlimited, nuisance_opt_out, email_opt_out, profile, job_count,
        page_count, window_start, last_job, created_at
     FROM accounts";

/// Convert a `rusqlite::Error` into a `GreenbarError::Database`.
fn db_err(e: rusqlite::Error) -> GreenbarError {
    GreenbarError::Database(e.to_string())
}

/// Format a timestamp the way every column in this table stores it.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Account store backed by a SQLite database.
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so the connection sits
/// behind a mutex.  Every statement is a single short query; the lock is
/// never held across an await point.
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    /// Open (or create) the account database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;

        // WAL lets the retention sweep read while connections write.
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        info!("account database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(db_err)?;

        debug!("in-memory account database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| GreenbarError::Database("account store lock poisoned".into()))?;
        f(&conn)
    }

    fn query_accounts(&self, where_clause: &str, param: &str) -> Result<Vec<Account>> {
        self.with_conn(|conn| {
            let sql = format!("{SELECT_COLUMNS} {where_clause}");
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            stmt.query_map(params![param], row_to_account)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)
        })
    }

    fn query_one(&self, where_clause: &str, param: &str) -> Result<Option<Account>> {
        self.with_conn(|conn| {
            let sql = format!("{SELECT_COLUMNS} {where_clause}");
            conn.query_row(&sql, params![param], row_to_account)
                .optional()
                .map_err(db_err)
        })
    }
}

impl AccountStore for SqliteAccountStore {
    #[instrument(skip(self))]
    fn lookup(&self, access_key: &str) -> Result<Option<Account>> {
        self.query_one("WHERE access_key = ?1", access_key)
    }

    #[instrument(skip(self))]
    fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.query_one("WHERE email = ?1", email)
    }

    /// Insert or update.  An existing row keeps its original access key.
    #[instrument(skip(self, account), fields(email = %account.email))]
    fn save(&self, account: &Account) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts (email, access_key, full_name, location, verified,
                    enabled, admin, unlimited, nuisance_opt_out, email_opt_out, profile,
                    job_count, page_count, window_start, last_job, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(email) DO UPDATE SET
                    full_name = excluded.full_name,
                    location = excluded.location,
                    verified = excluded.verified,
                    enabled = excluded.enabled,
                    admin = excluded.admin,
                    unlimited = excluded.unlimited,
                    nuisance_opt_out = excluded.nuisance_opt_out,
                    email_opt_out = excluded.email_opt_out,
                    profile = excluded.profile,
                    job_count = excluded.job_count,
                    page_count = excluded.page_count,
                    window_start = excluded.window_start,
                    last_job = excluded.last_job",
                params![
                    account.email,
                    account.access_key,
                    account.full_name,
                    account.location,
                    account.verified,
                    account.enabled,
                    account.admin,
                    account.unlimited,
                    account.nuisance_opt_out,
                    account.email_opt_out,
                    account.profile,
                    account.job_count,
                    account.page_count,
                    fmt_ts(&account.window_start),
                    account.last_job.as_ref().map(fmt_ts),
                    fmt_ts(&account.created_at),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })?;

        debug!("account saved");
        Ok(())
    }

    fn list_expired_unverified(&self, threshold: DateTime<Utc>) -> Result<Vec<Account>> {
        self.query_accounts(
            "WHERE verified = 0 AND created_at < ?1 ORDER BY created_at ASC",
            &fmt_ts(&threshold),
        )
    }

    fn list_inactive(&self, threshold: DateTime<Utc>) -> Result<Vec<Account>> {
        self.query_accounts(
            "WHERE verified = 1 AND COALESCE(last_job, created_at) < ?1
             ORDER BY COALESCE(last_job, created_at) ASC",
            &fmt_ts(&threshold),
        )
    }

    #[instrument(skip(self))]
    fn remove(&self, email: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM accounts WHERE email = ?1", params![email])
                .map_err(db_err)?;
            Ok(())
        })?;

        info!(email, "account removed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Parse a stored timestamp, surfacing malformed values as conversion errors.
fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a SQLite row to an `Account`.
///
/// Column indices must match `SELECT_COLUMNS`.
fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    let window_start: String = row.get(13)?;
    let last_job: Option<String> = row.get(14)?;
    let created_at: String = row.get(15)?;

    Ok(Account {
        email: row.get(0)?,
        access_key: row.get(1)?,
        full_name: row.get(2)?,
        location: row.get(3)?,
        verified: row.get(4)?,
        enabled: row.get(5)?,
        admin: row.get(6)?,
        unlimited: row.get(7)?,
        nuisance_opt_out: row.get(8)?,
        email_opt_out: row.get(9)?,
        profile: row.get(10)?,
        job_count: row.get(11)?,
        page_count: row.get(12)?,
        window_start: parse_ts(13, &window_start)?,
        last_job: last_job.as_deref().map(|s| parse_ts(14, s)).transpose()?,
        created_at: parse_ts(15, &created_at)?,
    })
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Account store adapter.
//
// The print pipeline only ever sees accounts through this trait.  The
// persistence engine behind it (SQLite in the daemon, a map in tests) is not
// the pipeline's concern.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::Account;

/// Narrow load/save interface over persisted accounts.
///
/// Implementations must be safe to call from many connection tasks at once
/// and must make each `save` of a single account atomic.
pub trait AccountStore: Send + Sync {
    /// Find the account whose access key equals `access_key`.
    fn lookup(&self, access_key: &str) -> Result<Option<Account>>;

    /// Find an account by email address.
    fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Insert or replace the account keyed by its email address.
    fn save(&self, account: &Account) -> Result<()>;

    /// Unverified accounts created before `threshold`.
    fn list_expired_unverified(&self, threshold: DateTime<Utc>) -> Result<Vec<Account>>;

    /// Verified accounts whose last activity is before `threshold`.
    fn list_inactive(&self, threshold: DateTime<Utc>) -> Result<Vec<Account>>;

    /// Delete the account with the given email.  Idempotent.
    fn remove(&self, email: &str) -> Result<()>;
}

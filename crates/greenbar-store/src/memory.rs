// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory account store for tests and throwaway instances.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::store::AccountStore;
use greenbar_core::types::Account;

/// Account store keeping everything in a map keyed by email.
///
/// Mirrors the SQLite store's constraints: access keys are unique and an
/// update never replaces an existing access key.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `accounts`.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let map = accounts
            .into_iter()
            .map(|a| (a.email.clone(), a))
            .collect();
        Self {
            accounts: Mutex::new(map),
        }
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.accounts.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, Account>) -> Result<T>) -> Result<T> {
        let mut map = self
            .accounts
            .lock()
            .map_err(|_| GreenbarError::Database("account map lock poisoned".into()))?;
        f(&mut map)
    }

    fn filtered(&self, pred: impl Fn(&Account) -> bool) -> Result<Vec<Account>> {
        self.with_map(|map| {
            let mut found: Vec<Account> = map.values().filter(|a| pred(a)).cloned().collect();
            found.sort_by_key(|a| a.last_activity());
            Ok(found)
        })
    }
}

impl AccountStore for MemoryAccountStore {
    fn lookup(&self, access_key: &str) -> Result<Option<Account>> {
        self.with_map(|map| {
            Ok(map
                .values()
                .find(|a| a.access_key == access_key)
                .cloned())
        })
    }

    fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        self.with_map(|map| Ok(map.get(email).cloned()))
    }

    fn save(&self, account: &Account) -> Result<()> {
        self.with_map(|map| {
            let clash = map
                .values()
                .any(|a| a.access_key == account.access_key && a.email != account.email);
            if clash {
                return Err(GreenbarError::Database(format!(
                    "access key already issued to another account ({})",
                    account.email
                )));
            }

            let mut stored = account.clone();
            if let Some(existing) = map.get(&account.email) {
                stored.access_key = existing.access_key.clone();
                stored.created_at = existing.created_at;
            }
            map.insert(stored.email.clone(), stored);
            Ok(())
        })
    }

    fn list_expired_unverified(&self, threshold: DateTime<Utc>) -> Result<Vec<Account>> {
        self.filtered(|a| !a.verified && a.created_at < threshold)
    }

    fn list_inactive(&self, threshold: DateTime<Utc>) -> Result<Vec<Account>> {
        self.filtered(|a| a.verified && a.last_activity() < threshold)
    }

    fn remove(&self, email: &str) -> Result<()> {
        self.with_map(|map| {
            map.remove(email);
            Ok(())
        })
    }
}

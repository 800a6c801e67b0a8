// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Queue resolver: maps the queue name a client prints to onto an account.

use std::sync::Arc;

use tracing::debug;

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::store::AccountStore;
use greenbar_core::types::Account;

/// Resolves queue names (access keys) to enabled accounts.
#[derive(Clone)]
pub struct QueueResolver {
    store: Arc<dyn AccountStore>,
}

impl QueueResolver {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Look up the account owning `queue`.
    ///
    /// The returned account carries its `admin` and `unlimited` flags so
    /// later stages need no second lookup to decide on quota exemption.
    /// The store lookup runs on the blocking pool.
    pub async fn resolve(&self, queue: &str) -> Result<Account> {
        let store = Arc::clone(&self.store);
        let key = queue.to_string();
        let account = tokio::task::spawn_blocking(move || store.lookup(&key))
            .await
            .map_err(|e| GreenbarError::PrintServer(format!("queue lookup task failed: {e}")))??
            .ok_or_else(|| GreenbarError::UnknownQueue(queue.to_string()))?;

        if !account.enabled {
            return Err(GreenbarError::AccountDisabled(account.email));
        }

        debug!(email = %account.email, "queue resolved");
        Ok(account)
    }
}

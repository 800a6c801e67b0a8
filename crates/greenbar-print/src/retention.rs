// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retention scheduler: periodically expires stale accounts and deletes
// aged documents.
//
// Runs on its own timer, independent of print traffic.  Account sweeps only
// happen when both month thresholds are set; administrators are never
// expired.  One failing account is logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use greenbar_core::config::ServerConfig;
use greenbar_core::error::Result;
use greenbar_core::store::AccountStore;
use greenbar_core::types::Account;
use greenbar_store::DocumentArchive;

/// Retention thresholds.  Zero months disables the account sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub unverified_months: u32,
    pub inactive_months: u32,
    pub document_days: u32,
    pub interval: Duration,
}

impl From<&ServerConfig> for RetentionPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            unverified_months: config.unverified_months_cleanup,
            inactive_months: config.inactive_months_cleanup,
            document_days: config.pdf_cleanup_days,
            interval: Duration::from_secs(config.retention_interval_secs),
        }
    }
}

impl RetentionPolicy {
    fn accounts_enabled(&self) -> bool {
        self.unverified_months > 0 && self.inactive_months > 0
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub unverified_removed: Vec<String>,
    pub inactive_removed: Vec<String>,
    pub documents_removed: usize,
    pub failures: usize,
}

/// Periodic cleanup over the account store and the document archive.
pub struct RetentionScheduler {
    store: Arc<dyn AccountStore>,
    archive: DocumentArchive,
    policy: RetentionPolicy,
}

impl RetentionScheduler {
    pub fn new(store: Arc<dyn AccountStore>, archive: DocumentArchive, policy: RetentionPolicy) -> Self {
        Self {
            store,
            archive,
            policy,
        }
    }

    /// Run one sweep as of `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> RetentionReport {
        let mut report = RetentionReport::default();

        if self.policy.accounts_enabled() {
            let unverified = months_before(now, self.policy.unverified_months);
            match self.store.list_expired_unverified(unverified) {
                Ok(accounts) => {
                    self.remove_all(accounts, &mut report.unverified_removed, &mut report.failures)
                }
                Err(e) => {
                    error!(error = %e, "listing unverified accounts failed");
                    report.failures += 1;
                }
            }

            let inactive = months_before(now, self.policy.inactive_months);
            match self.store.list_inactive(inactive) {
                Ok(accounts) => {
                    self.remove_all(accounts, &mut report.inactive_removed, &mut report.failures)
                }
                Err(e) => {
                    error!(error = %e, "listing inactive accounts failed");
                    report.failures += 1;
                }
            }
        }

        let cutoff = now - chrono::Duration::days(i64::from(self.policy.document_days));
        match self.archive.purge_older_than(cutoff) {
            Ok(n) => report.documents_removed = n,
            Err(e) => {
                error!(error = %e, "document purge failed");
                report.failures += 1;
            }
        }

        info!(
            unverified = report.unverified_removed.len(),
            inactive = report.inactive_removed.len(),
            documents = report.documents_removed,
            failures = report.failures,
            "retention sweep finished"
        );
        report
    }

    fn remove_all(&self, accounts: Vec<Account>, removed: &mut Vec<String>, failures: &mut usize) {
        for account in accounts {
            if account.admin {
                debug!(email = %account.email, "administrator exempt from expiry");
                continue;
            }
            match self.store.remove(&account.email) {
                Ok(()) => {
                    info!(email = %account.email, last_activity = %account.last_activity(), "account expired");
                    removed.push(account.email);
                }
                Err(e) => {
                    warn!(email = %account.email, error = %e, "account removal failed");
                    *failures += 1;
                }
            }
        }
    }

    /// Sweep every `policy.interval` until `shutdown` is notified.
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.policy.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("retention scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || this.sweep(Utc::now())).await {
                        error!(error = %e, "retention sweep crashed");
                    }
                }
            }
        }
    }
}

/// `now` minus whole calendar months, clamped to the earliest date.
fn months_before(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use greenbar_store::MemoryAccountStore;

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            unverified_months: 1,
            inactive_months: 6,
            document_days: 30,
            interval: Duration::from_secs(3600),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn verified(email: &str, last_job_days_ago: i64) -> Account {
        let mut a = Account::new(email);
        a.verified = true;
        a.created_at = now() - chrono::Duration::days(1000);
        a.last_job = Some(now() - chrono::Duration::days(last_job_days_ago));
        a
    }

    fn setup(accounts: Vec<Account>, policy: RetentionPolicy) -> (Arc<MemoryAccountStore>, RetentionScheduler, tempfile::TempDir) {
        let store = Arc::new(MemoryAccountStore::with_accounts(accounts));
        let dir = tempfile::tempdir().unwrap();
        let archive = DocumentArchive::open(dir.path()).unwrap();
        let scheduler = RetentionScheduler::new(store.clone(), archive, policy);
        (store, scheduler, dir)
    }

    #[test]
    fn inactive_accounts_removed_active_kept() {
        let (store, scheduler, _dir) = setup(
            vec![
                verified("stale@example.com", 200),
                verified("recent@example.com", 20),
            ],
            policy(),
        );

        let report = scheduler.sweep(now());
        assert_eq!(report.inactive_removed, vec!["stale@example.com".to_string()]);
        assert!(store.find_by_email("stale@example.com").unwrap().is_none());
        assert!(store.find_by_email("recent@example.com").unwrap().is_some());
    }

    #[test]
    fn never_printed_uses_creation_date() {
        let mut old = Account::new("old@example.com");
        old.verified = true;
        old.created_at = now() - chrono::Duration::days(365);
        let mut new = Account::new("new@example.com");
        new.verified = true;
        new.created_at = now() - chrono::Duration::days(10);

        let (_store, scheduler, _dir) = setup(vec![old, new], policy());
        let report = scheduler.sweep(now());
        assert_eq!(report.inactive_removed, vec!["old@example.com".to_string()]);
    }

    #[test]
    fn unverified_accounts_expire_after_threshold() {
        let mut pending = Account::new("pending@example.com");
        pending.created_at = now() - chrono::Duration::days(45);
        let mut fresh = Account::new("fresh@example.com");
        fresh.created_at = now() - chrono::Duration::days(5);

        let (store, scheduler, _dir) = setup(vec![pending, fresh], policy());
        let report = scheduler.sweep(now());
        assert_eq!(report.unverified_removed, vec!["pending@example.com".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn admins_are_never_expired() {
        let mut admin = verified("root@example.com", 900);
        admin.admin = true;
        let (store, scheduler, _dir) = setup(vec![admin], policy());

        let report = scheduler.sweep(now());
        assert!(report.inactive_removed.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn account_sweeps_need_both_thresholds() {
        let disabled = RetentionPolicy {
            unverified_months: 0,
            ..policy()
        };
        let (store, scheduler, _dir) = setup(vec![verified("stale@example.com", 400)], disabled);
        let report = scheduler.sweep(now());
        assert!(report.inactive_removed.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn months_are_calendar_months() {
        let t = Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap();
        assert_eq!(
            months_before(t, 1),
            Utc.with_ymd_and_hms(2026, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (_store, scheduler, _dir) = setup(vec![], policy());
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(Arc::new(scheduler).run(Arc::clone(&shutdown)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap()
            .unwrap();
    }
}

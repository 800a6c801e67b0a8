// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Quota tracker: per-account rolling-window job and page counters.
//
// A job is reserved (job counter incremented) before rendering and
// committed (pages added) after.  Page quota is checked only at reservation,
// so the job that crosses the page limit is still delivered; the account is
// then blocked until the window rolls over.
//
// Every read-modify-write of an account's counters runs on the blocking pool
// under that account's own async mutex.  The map of mutexes is guarded by a
// short-lived std mutex that is never held across an await, and an entry is
// dropped as soon as no task holds or waits on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use greenbar_core::config::ServerConfig;
use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::store::AccountStore;
use greenbar_core::types::{Account, QuotaKind};

/// Quota settings.  A limit of zero disables that dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub jobs: u32,
    pub pages: u32,
    pub period_days: u32,
}

impl From<&ServerConfig> for QuotaLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            jobs: config.quota_jobs,
            pages: config.quota_pages,
            period_days: config.quota_period,
        }
    }
}

/// Proof that a job slot was reserved.
///
/// Pass it to exactly one of [`QuotaTracker::commit`] or
/// [`QuotaTracker::rollback`], or wrap it in a [`ReservationGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a reservation must be committed or rolled back"]
pub struct Reservation {
    pub access_key: String,
    pub email: String,
    /// Window the job was counted in.
    pub window_start: DateTime<Utc>,
    /// Whether quota checks were skipped for this account.
    pub exempt: bool,
}

/// Holds a reservation for the lifetime of a job.
///
/// Dropping the guard without calling [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) releases the job slot on a background task,
/// so a job abandoned mid-render (connection task cancelled, daemon shutting
/// down) is not left counted.
pub struct ReservationGuard {
    tracker: Arc<QuotaTracker>,
    reservation: Option<Reservation>,
}

impl ReservationGuard {
    pub fn new(tracker: Arc<QuotaTracker>, reservation: Reservation) -> Self {
        Self {
            tracker,
            reservation: Some(reservation),
        }
    }

    /// Charge `pages` and disarm the guard.
    pub async fn commit(mut self, pages: u32) -> Result<()> {
        match self.reservation.take() {
            Some(reservation) => self.tracker.commit(reservation, pages).await,
            None => Ok(()),
        }
    }

    /// Release the job slot now and disarm the guard.
    pub async fn rollback(mut self) -> Result<()> {
        match self.reservation.take() {
            Some(reservation) => self.tracker.rollback(reservation).await,
            None => Ok(()),
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        warn!(email = %reservation.email, "job abandoned; releasing its reservation");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tracker = Arc::clone(&self.tracker);
                handle.spawn(async move {
                    if let Err(e) = tracker.rollback(reservation).await {
                        error!(error = %e, "releasing abandoned reservation failed");
                    }
                });
            }
            Err(_) => {
                error!(email = %reservation.email, "no runtime left to release reservation");
            }
        }
    }
}

type AccountLock = Arc<tokio::sync::Mutex<()>>;

/// Rolling-window quota enforcement.
pub struct QuotaTracker {
    store: Arc<dyn AccountStore>,
    limits: QuotaLimits,
    locks: Mutex<HashMap<String, AccountLock>>,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn AccountStore>, limits: QuotaLimits) -> Self {
        Self {
            store,
            limits,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    fn account_lock(&self, access_key: &str) -> Result<AccountLock> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| GreenbarError::PrintServer("quota lock map poisoned".into()))?;
        Ok(Arc::clone(
            locks
                .entry(access_key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        ))
    }

    /// Drop the map entry for `access_key` once nobody else holds its lock.
    ///
    /// Clones are only taken under the map mutex, so a strong count of one
    /// seen under that mutex means no task is using or waiting on the lock.
    fn release_lock(&self, access_key: &str, lock: AccountLock) {
        drop(lock);
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks
            .get(access_key)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(access_key);
        }
    }

    /// Locked entries currently held in the lock map.
    pub fn tracked_accounts(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or_default()
    }

    /// Run `f` against the store under `access_key`'s lock, on the blocking
    /// pool.  The lock guard travels with `f`, so the account stays locked
    /// until the store work has finished even if the caller goes away.
    async fn locked<T, F>(&self, access_key: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AccountStore, QuotaLimits) -> Result<T> + Send + 'static,
    {
        let lock = self.account_lock(access_key)?;
        let guard = Arc::clone(&lock).lock_owned().await;
        let store = Arc::clone(&self.store);
        let limits = self.limits;

        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f(store.as_ref(), limits)
        });
        let result = task.await;
        self.release_lock(access_key, lock);

        result.map_err(|e| GreenbarError::PrintServer(format!("quota task failed: {e}")))?
    }

    /// Reserve a job slot for `account`.
    pub async fn reserve(&self, account: &Account) -> Result<Reservation> {
        self.reserve_at(account, Utc::now()).await
    }

    /// [`reserve`](Self::reserve) with an explicit clock.
    pub async fn reserve_at(&self, account: &Account, now: DateTime<Utc>) -> Result<Reservation> {
        let access_key = account.access_key.clone();
        self.locked(&account.access_key, move |store, limits| {
            reserve_locked(store, limits, &access_key, now)
        })
        .await
    }

    /// Charge `pages` against the reservation's account and stamp `last_job`.
    pub async fn commit(&self, reservation: Reservation, pages: u32) -> Result<()> {
        self.commit_at(reservation, pages, Utc::now()).await
    }

    /// [`commit`](Self::commit) with an explicit clock.
    pub async fn commit_at(
        &self,
        reservation: Reservation,
        pages: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let access_key = reservation.access_key.clone();
        self.locked(&access_key, move |store, limits| {
            commit_locked(store, limits, &reservation, pages, now)
        })
        .await
    }

    /// Undo the job-count increment of a reservation whose job failed.
    ///
    /// Does nothing if the window has rolled over since the reservation, as
    /// the reserved job is no longer counted.
    pub async fn rollback(&self, reservation: Reservation) -> Result<()> {
        let access_key = reservation.access_key.clone();
        self.locked(&access_key, move |store, _| rollback_locked(store, &reservation))
            .await
    }
}

fn reload(store: &dyn AccountStore, access_key: &str) -> Result<Account> {
    let account = store
        .lookup(access_key)?
        .ok_or_else(|| GreenbarError::UnknownQueue(access_key.to_string()))?;
    if !account.enabled {
        return Err(GreenbarError::AccountDisabled(account.email));
    }
    Ok(account)
}

/// Start a fresh window when the current one has expired.
fn roll_window(limits: QuotaLimits, account: &mut Account, now: DateTime<Utc>) -> bool {
    let period = Duration::days(i64::from(limits.period_days));
    if now - account.window_start > period {
        account.window_start = now;
        account.job_count = 0;
        account.page_count = 0;
        true
    } else {
        false
    }
}

fn reserve_locked(
    store: &dyn AccountStore,
    limits: QuotaLimits,
    access_key: &str,
    now: DateTime<Utc>,
) -> Result<Reservation> {
    // The caller's copy may be stale; the store is authoritative.
    let mut current = reload(store, access_key)?;
    let exempt = current.is_quota_exempt();

    if roll_window(limits, &mut current, now) {
        debug!(email = %current.email, "quota window rolled over");
    }

    if !exempt {
        if limits.jobs > 0 && current.job_count >= limits.jobs {
            return Err(GreenbarError::QuotaExceeded {
                kind: QuotaKind::Jobs,
                used: current.job_count,
                limit: limits.jobs,
            });
        }
        if limits.pages > 0 && current.page_count >= limits.pages {
            return Err(GreenbarError::QuotaExceeded {
                kind: QuotaKind::Pages,
                used: current.page_count,
                limit: limits.pages,
            });
        }
    }

    current.job_count = current.job_count.saturating_add(1);
    store.save(&current)?;

    debug!(
        email = %current.email,
        jobs = current.job_count,
        exempt,
        "job slot reserved"
    );
    Ok(Reservation {
        access_key: current.access_key,
        email: current.email,
        window_start: current.window_start,
        exempt,
    })
}

fn commit_locked(
    store: &dyn AccountStore,
    limits: QuotaLimits,
    reservation: &Reservation,
    pages: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(mut current) = store.lookup(&reservation.access_key)? else {
        warn!(email = %reservation.email, "account vanished before commit");
        return Ok(());
    };

    current.page_count = current.page_count.saturating_add(pages);
    current.last_job = Some(now);
    store.save(&current)?;

    if !reservation.exempt && limits.pages > 0 && current.page_count > limits.pages {
        info!(
            email = %current.email,
            pages = current.page_count,
            limit = limits.pages,
            "page quota overshot; further jobs blocked until the window rolls over"
        );
    }
    Ok(())
}

fn rollback_locked(store: &dyn AccountStore, reservation: &Reservation) -> Result<()> {
    let Some(mut current) = store.lookup(&reservation.access_key)? else {
        return Ok(());
    };
    if current.window_start != reservation.window_start {
        debug!(email = %current.email, "window changed; nothing to roll back");
        return Ok(());
    }

    current.job_count = current.job_count.saturating_sub(1);
    store.save(&current)?;
    debug!(email = %current.email, jobs = current.job_count, "reservation rolled back");
    Ok(())
}

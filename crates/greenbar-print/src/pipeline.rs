// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job pipeline: everything that happens to a job once both of its files
// have arrived.
//
//   parse -> nuisance filter -> reserve -> render -> commit -> deliver
//
// Nothing touches the account's counters until the job has been parsed and
// has passed the nuisance filter.  A render failure rolls the reservation
// back, as does abandoning the job before it is committed; a failed commit or
// delivery does not.

use std::sync::{Arc, Mutex};

use tracing::{error, info, instrument, warn};

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::profiles::{is_known, profile_by_name};
use greenbar_core::types::{Account, JobOutcome, RenderProfile};
use greenbar_store::JobLog;

use crate::delivery::DeliveryNotifier;
use crate::dispatcher::RenderDispatcher;
use crate::job::{JobLimits, ParsedJob, parse_control_file};
use crate::lpd::ReceivedJob;
use crate::nuisance::NuisanceFilter;
use crate::quota::{QuotaTracker, ReservationGuard};

/// Outcome labels written to the job log.
mod outcome {
    pub const PRINTED: &str = "printed";
    pub const UNDELIVERED: &str = "undelivered";
    pub const DROPPED: &str = "dropped";
    pub const REJECTED: &str = "rejected";
    pub const FAILED: &str = "failed";
}

/// Admission, rendering, and delivery for received jobs.
pub struct JobPipeline {
    limits: JobLimits,
    nuisance: NuisanceFilter,
    quota: Arc<QuotaTracker>,
    dispatcher: Arc<RenderDispatcher>,
    delivery: Arc<DeliveryNotifier>,
    job_log: Option<Arc<Mutex<JobLog>>>,
    default_profile: String,
}

impl JobPipeline {
    pub fn new(
        limits: JobLimits,
        nuisance: NuisanceFilter,
        quota: Arc<QuotaTracker>,
        dispatcher: Arc<RenderDispatcher>,
        delivery: Arc<DeliveryNotifier>,
    ) -> Self {
        Self {
            limits,
            nuisance,
            quota,
            dispatcher,
            delivery,
            job_log: None,
            default_profile: greenbar_core::profiles::DEFAULT_PROFILE.to_string(),
        }
    }

    /// Record every outcome in `log`.
    pub fn with_job_log(mut self, log: Arc<Mutex<JobLog>>) -> Self {
        self.job_log = Some(log);
        self
    }

    /// Profile used for accounts that have not chosen one.
    pub fn with_default_profile(mut self, name: impl Into<String>) -> Self {
        self.default_profile = name.into();
        self
    }

    pub fn dispatcher(&self) -> &RenderDispatcher {
        &self.dispatcher
    }

    /// The account's own profile if it names a known one, else the default.
    pub fn profile_for(&self, account: &Account) -> RenderProfile {
        match account.profile.as_deref() {
            Some(name) if is_known(name) => profile_by_name(name),
            _ => profile_by_name(&self.default_profile),
        }
    }

    /// Run a fully received job for `account` through to delivery.
    ///
    /// Admission failures (`JobTooLarge`, `QuotaExceeded`) and render
    /// failures come back as errors.  Once rendered, a job is always
    /// delivered: a failed quota commit is logged and recorded, and a failed
    /// mail hand-off yields `Printed` with `delivered: false`.
    #[instrument(skip(self, account, job), fields(email = %account.email, data_file = %job.data.name))]
    pub async fn process(&self, account: &Account, job: ReceivedJob) -> Result<JobOutcome> {
        let control = parse_control_file(&job.control.bytes);
        let parsed = match ParsedJob::build(&control, &job.data.name, &job.data.bytes, &self.limits) {
            Ok(parsed) => Arc::new(parsed),
            Err(e) => {
                warn!(error = %e, "job rejected");
                let name = control.job_name.as_deref().unwrap_or(&job.data.name);
                self.record(account, name, 0, outcome::REJECTED, Some(&e.to_string())).await;
                return Err(e);
            }
        };

        if self.nuisance.should_drop(account, &parsed.job_name) {
            info!(job_id = %parsed.id, job_name = %parsed.job_name, "nuisance job dropped");
            self.record(account, &parsed.job_name, 0, outcome::DROPPED, None).await;
            return Ok(JobOutcome::Dropped { job_id: parsed.id });
        }

        let reservation = match self.quota.reserve(account).await {
            Ok(r) => ReservationGuard::new(Arc::clone(&self.quota), r),
            Err(e) => {
                info!(job_id = %parsed.id, error = %e, "job refused");
                self.record(account, &parsed.job_name, 0, outcome::REJECTED, Some(&e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let profile = self.profile_for(account);
        let doc = match self.dispatcher.render(Arc::clone(&parsed), profile).await {
            Ok(doc) => doc,
            Err(e) => {
                error!(job_id = %parsed.id, error = %e, "render failed");
                if let Err(rb) = reservation.rollback().await {
                    error!(job_id = %parsed.id, error = %rb, "quota rollback failed");
                }
                self.record(account, &parsed.job_name, 0, outcome::FAILED, Some(&e.to_string()))
                    .await;
                return Err(e);
            }
        };

        // The document exists; it is delivered even if its pages could not
        // be charged.
        let commit_error = match reservation.commit(doc.pages).await {
            Ok(()) => None,
            Err(e) => {
                error!(job_id = %parsed.id, pages = doc.pages, error = %e, "quota commit failed");
                Some(format!("quota commit failed: {e}"))
            }
        };

        let delivered = match self.delivery.deliver(account, &parsed, &doc).await {
            Ok(_) => {
                self.record(
                    account,
                    &parsed.job_name,
                    doc.pages,
                    outcome::PRINTED,
                    commit_error.as_deref(),
                )
                .await;
                true
            }
            Err(e) => {
                warn!(job_id = %parsed.id, error = %e, "job printed but not delivered");
                let details = match &commit_error {
                    Some(c) => format!("{e}; {c}"),
                    None => e.to_string(),
                };
                self.record(
                    account,
                    &parsed.job_name,
                    doc.pages,
                    outcome::UNDELIVERED,
                    Some(&details),
                )
                .await;
                false
            }
        };

        info!(
            job_id = %parsed.id,
            job_name = %parsed.job_name,
            pages = doc.pages,
            copies = parsed.copies,
            delivered,
            "job printed"
        );
        Ok(JobOutcome::Printed {
            job_id: parsed.id,
            pages: doc.pages,
            delivered,
        })
    }

    async fn record(
        &self,
        account: &Account,
        job_name: &str,
        pages: u32,
        outcome: &'static str,
        details: Option<&str>,
    ) {
        let Some(log) = self.job_log.clone() else {
            return;
        };
        let email = account.email.clone();
        let job_name = job_name.to_string();
        let details = details.map(str::to_string);

        let task = tokio::task::spawn_blocking(move || match log.lock() {
            Ok(log) => log.record(&email, &job_name, pages, outcome, details.as_deref()),
            Err(_) => Err(GreenbarError::Database("job log lock poisoned".into())),
        });
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to write job log"),
            Err(e) => warn!(error = %e, "job log task failed"),
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer: opens the stores, wires the print pipeline, and
// starts or stops the LPD listener and the retention scheduler together.
//
// The job log is a rusqlite connection (`Send` but not `Sync`), so it is
// shared behind `Arc<Mutex<>>`.  Account storage serializes internally.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use greenbar_core::config::ServerConfig;
use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::store::AccountStore;
use greenbar_core::types::Account;
use greenbar_document::GreenbarRenderer;
use greenbar_print::{
    ConnectionLimits, DeliveryNotifier, JobLimits, JobPipeline, LpdServer, NuisanceFilter,
    OutboxMailer, QueueResolver, QuotaLimits, QuotaTracker, RenderDispatcher, RetentionPolicy,
    RetentionScheduler,
};
use greenbar_store::{DocumentArchive, JobLog, SqliteAccountStore};

/// Every long-lived subsystem of the daemon.
pub struct AppServices {
    config: ServerConfig,
    store: Arc<dyn AccountStore>,
    job_log: Arc<Mutex<JobLog>>,
    pipeline: Arc<JobPipeline>,
    lpd_server: LpdServer,
    retention: Arc<RetentionScheduler>,
    retention_shutdown: Arc<Notify>,
    retention_task: Option<JoinHandle<Result<()>>>,
}

impl AppServices {
    /// Open storage and build the pipeline.  Nothing listens yet.
    pub fn init(config: ServerConfig) -> Result<Self> {
        info!(database = %config.database_file.display(), "initialising services");

        let store: Arc<dyn AccountStore> = Arc::new(SqliteAccountStore::open(&config.database_file)?);
        let job_log = Arc::new(Mutex::new(JobLog::open(&config.database_file)?));
        let archive = DocumentArchive::open(&config.document_dir)?;
        let mailer = Arc::new(OutboxMailer::new(&config.outbox_dir)?);

        let quota = Arc::new(QuotaTracker::new(Arc::clone(&store), QuotaLimits::from(&config)));
        let dispatcher = Arc::new(RenderDispatcher::new(
            Arc::new(GreenbarRenderer::new()),
            config.concurrent_print_jobs,
        ));
        let delivery = Arc::new(
            DeliveryNotifier::new(archive.clone(), mailer, config.mail_from.clone())
                .with_contact(config.server_admin_email.clone()),
        );
        let limits = JobLimits {
            max_lines: config.max_lines_per_job,
            max_copies: config.max_copies,
        };
        let pipeline = Arc::new(
            JobPipeline::new(
                limits,
                NuisanceFilter::new(&config.nuisance_job_names)?,
                quota,
                dispatcher,
                delivery,
            )
            .with_job_log(Arc::clone(&job_log))
            .with_default_profile(config.default_profile.clone()),
        );

        let retention = Arc::new(RetentionScheduler::new(
            Arc::clone(&store),
            archive,
            RetentionPolicy::from(&config),
        ));

        let bind: IpAddr = config
            .bind_address
            .parse()
            .map_err(|_| GreenbarError::Config(vec![format!("bind_address `{}` is not an IP address", config.bind_address)]))?;
        let lpd_server = LpdServer::new(Some(config.listen_port)).with_bind_address(bind);

        if !config.account_cleanup_enabled() {
            info!("account expiry disabled; only documents will be purged");
        }

        Ok(Self {
            config,
            store,
            job_log,
            pipeline,
            lpd_server,
            retention,
            retention_shutdown: Arc::new(Notify::new()),
            retention_task: None,
        })
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Start the LPD listener and the retention timer.
    pub async fn start(&mut self) -> Result<()> {
        self.lpd_server
            .start(
                QueueResolver::new(Arc::clone(&self.store)),
                Arc::clone(&self.pipeline),
                ConnectionLimits::from(&self.config),
            )
            .await?;

        let retention = Arc::clone(&self.retention);
        let shutdown = Arc::clone(&self.retention_shutdown);
        self.retention_task = Some(tokio::spawn(retention.run(shutdown)));

        info!(
            addr = ?self.lpd_server.local_addr(),
            render_slots = self.pipeline.dispatcher().capacity(),
            "greenbar running"
        );
        Ok(())
    }

    /// Stop accepting jobs, let jobs in progress finish, and stop the
    /// retention timer.
    pub async fn stop(&mut self) -> Result<()> {
        self.lpd_server.stop().await?;

        // A connection idles at most one receive timeout between reads.
        let grace = Duration::from_secs(self.config.receive_timeout_secs);
        if !self.lpd_server.drain(grace).await {
            warn!(
                open = self.lpd_server.active_connections(),
                "connections still open at shutdown; their jobs are abandoned"
            );
        }

        self.retention_shutdown.notify_one();
        if let Some(task) = self.retention_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "retention scheduler stopped with an error"),
                Err(e) => error!(error = %e, "retention task join failed"),
            }
        }

        let logged = match self.job_log.lock() {
            Ok(log) => log.count().unwrap_or_default(),
            Err(_) => 0,
        };
        info!(jobs_logged = logged, "greenbar stopped");
        Ok(())
    }
}

/// Make sure a verified, enabled administrator exists for `email`.
///
/// Returns the account and whether it was newly created.  An existing
/// account is promoted rather than replaced, so its access key survives.
pub fn create_admin(store: &dyn AccountStore, email: &str) -> Result<(Account, bool)> {
    let email = email.trim();
    if !greenbar_core::config::is_plausible_address(email) {
        return Err(GreenbarError::Config(vec![format!(
            "`{email}` does not appear to be a valid email address"
        )]));
    }

    let (mut account, created) = match store.find_by_email(email)? {
        Some(existing) => (existing, false),
        None => (Account::new(email), true),
    };
    account.admin = true;
    account.verified = true;
    account.enabled = true;
    store.save(&account)?;

    Ok((account, created))
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbar_core::types::ServerStatus;
    use greenbar_store::MemoryAccountStore;

    fn config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            database_file: dir.join("greenbar.db"),
            document_dir: dir.join("documents"),
            outbox_dir: dir.join("outbox"),
            bind_address: "127.0.0.1".into(),
            listen_port: 0,
            mail_from: "printer@example.com".into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn create_admin_makes_a_verified_admin() {
        let store = MemoryAccountStore::new();
        let (account, created) = create_admin(&store, "root@example.com").unwrap();
        assert!(created);
        assert!(account.admin && account.verified && account.enabled);
        assert_eq!(store.lookup(&account.access_key).unwrap().unwrap().email, "root@example.com");
    }

    #[test]
    fn create_admin_promotes_an_existing_account() {
        let existing = Account::new("op@example.com");
        let key = existing.access_key.clone();
        let store = MemoryAccountStore::with_accounts(vec![existing]);

        let (account, created) = create_admin(&store, "op@example.com").unwrap();
        assert!(!created);
        assert!(account.admin);
        assert_eq!(account.access_key, key);
    }

    #[test]
    fn create_admin_rejects_bad_addresses() {
        let store = MemoryAccountStore::new();
        assert!(create_admin(&store, "not-an-address").is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn services_start_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut services = AppServices::init(config(dir.path())).unwrap();
        assert!(dir.path().join("outbox").is_dir());
        assert!(dir.path().join("documents").is_dir());

        services.start().await.unwrap();
        assert_eq!(services.lpd_server.status(), ServerStatus::Running);
        assert!(services.lpd_server.local_addr().is_some());

        services.stop().await.unwrap();
        assert_eq!(services.lpd_server.status(), ServerStatus::Stopped);
        assert_eq!(services.job_log.lock().unwrap().count().unwrap(), 0);
    }
}

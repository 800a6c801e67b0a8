// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.
//
// The configuration is read once at startup from a JSON file and validated
// as a whole: every problem is collected and reported together, and the
// daemon refuses to start while any remain.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GreenbarError, Result};
use crate::profiles;

/// Default LPD port (RFC 1179).
pub const DEFAULT_LPD_PORT: u16 = 515;

/// Daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// SQLite database holding accounts and the job log.
    pub database_file: PathBuf,
    /// Directory where rendered documents are retained.
    pub document_dir: PathBuf,
    /// Directory the outbox mailer spools messages into.
    pub outbox_dir: PathBuf,
    /// Address the LPD listener binds to.
    pub bind_address: String,
    /// Port the LPD listener binds to.
    pub listen_port: u16,
    /// Sender address on delivered mail.
    pub mail_from: String,
    /// Contact address of the server administrator (optional).
    pub server_admin_email: String,
    /// Jobs allowed per account per quota period (0 = no job limit).
    pub quota_jobs: u32,
    /// Pages allowed per account per quota period (0 = no page limit).
    pub quota_pages: u32,
    /// Length of the quota window in days.
    pub quota_period: u32,
    /// Maximum printable lines in one job (counting every copy).
    pub max_lines_per_job: usize,
    /// Maximum size in bytes of a single control or data file.
    pub max_job_bytes: usize,
    /// Upper bound on the copy count a control file may request.
    pub max_copies: u32,
    /// Number of jobs rendered at the same time.
    pub concurrent_print_jobs: usize,
    /// Remove accounts inactive for this many months (0 = never).
    pub inactive_months_cleanup: u32,
    /// Remove accounts still unverified after this many months (0 = never).
    pub unverified_months_cleanup: u32,
    /// Delete retained documents after this many days.
    #[serde(rename = "pdf_cleanup_days")]
    pub pdf_cleanup_days: u32,
    /// Seconds between retention sweeps.
    pub retention_interval_secs: u64,
    /// Seconds a connection may sit idle mid-job before it is dropped.
    pub receive_timeout_secs: u64,
    /// Regular expressions matched against job names; matches are dropped.
    pub nuisance_job_names: Vec<String>,
    /// Render profile used when an account has none selected.
    pub default_profile: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_file: PathBuf::from("greenbar.db"),
            document_dir: PathBuf::from("documents"),
            outbox_dir: PathBuf::from("outbox"),
            bind_address: "0.0.0.0".into(),
            listen_port: DEFAULT_LPD_PORT,
            mail_from: String::new(),
            server_admin_email: String::new(),
            quota_jobs: 0,
            quota_pages: 0,
            quota_period: 1,
            max_lines_per_job: 50_000,
            max_job_bytes: 16 * 1024 * 1024,
            max_copies: 10,
            concurrent_print_jobs: 4,
            inactive_months_cleanup: 0,
            unverified_months_cleanup: 0,
            pdf_cleanup_days: 30,
            retention_interval_secs: 3600,
            receive_timeout_secs: 60,
            nuisance_job_names: Vec::new(),
            default_profile: profiles::DEFAULT_PROFILE.into(),
        }
    }
}

impl ServerConfig {
    /// Read, parse, and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&data)
    }

    /// Parse and validate configuration from a JSON document.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field and cross-field constraint.
    ///
    /// Returns `GreenbarError::Config` listing all problems found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.database_file.as_os_str().is_empty() {
            problems.push("database_file is required".to_string());
        }
        if self.document_dir.as_os_str().is_empty() {
            problems.push("document_dir is required".to_string());
        }
        if self.outbox_dir.as_os_str().is_empty() {
            problems.push("outbox_dir is required".to_string());
        }

        if self.listen_port == 0 {
            problems.push("listen_port 0 is invalid".to_string());
        }
        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            problems.push(format!(
                "bind_address `{}` is not an IP address",
                self.bind_address
            ));
        }

        if !is_plausible_address(&self.mail_from) {
            problems.push(format!(
                "mail_from `{}` does not appear to be a valid email address",
                self.mail_from
            ));
        }
        if !self.server_admin_email.is_empty() && !is_plausible_address(&self.server_admin_email) {
            problems.push(format!(
                "server_admin_email `{}` does not appear to be a valid email address",
                self.server_admin_email
            ));
        }

        if (self.quota_jobs > 0 || self.quota_pages > 0) && self.quota_period == 0 {
            problems.push("quota_period must be > 0 when a quota is set".to_string());
        }
        if self.max_lines_per_job == 0 {
            problems.push("max_lines_per_job must be > 0".to_string());
        }
        if self.max_job_bytes == 0 {
            problems.push("max_job_bytes must be > 0".to_string());
        }
        if self.max_copies == 0 {
            problems.push("max_copies must be > 0".to_string());
        }
        if self.concurrent_print_jobs == 0 {
            problems.push("concurrent_print_jobs must be > 0".to_string());
        }

        if self.inactive_months_cleanup > 0 && self.unverified_months_cleanup == 0 {
            problems.push(
                "when inactive_months_cleanup is > 0, unverified_months_cleanup must also be > 0"
                    .to_string(),
            );
        }
        if self.unverified_months_cleanup > 0 && self.inactive_months_cleanup == 0 {
            problems.push(
                "when unverified_months_cleanup is > 0, inactive_months_cleanup must also be > 0"
                    .to_string(),
            );
        }
        if self.pdf_cleanup_days == 0 {
            problems.push("pdf_cleanup_days is required and must be > 0".to_string());
        }
        if self.retention_interval_secs == 0 {
            problems.push("retention_interval_secs must be > 0".to_string());
        }
        if self.receive_timeout_secs == 0 {
            problems.push("receive_timeout_secs must be > 0".to_string());
        }

        for pattern in &self.nuisance_job_names {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!("nuisance regex `{pattern}` error: {e}"));
            }
        }

        if !profiles::is_known(&self.default_profile) {
            problems.push(format!(
                "default_profile `{}` is not a known render profile",
                self.default_profile
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GreenbarError::Config(problems))
        }
    }

    /// Whether account expiry sweeps are enabled.
    pub fn account_cleanup_enabled(&self) -> bool {
        self.inactive_months_cleanup > 0 && self.unverified_months_cleanup > 0
    }
}

/// Loose sanity check on an email address: one `@`, non-empty local part,
/// and a dotted domain.
pub fn is_plausible_address(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !address.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServerConfig {
        ServerConfig {
            mail_from: "printer@example.com".into(),
            ..Default::default()
        }
    }

    fn problems(config: &ServerConfig) -> Vec<String> {
        match config.validate() {
            Ok(()) => Vec::new(),
            Err(GreenbarError::Config(p)) => p,
            Err(other) => panic!("unexpected error variant: {other}"),
        }
    }

    #[test]
    fn defaults_with_sender_are_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn missing_sender_is_rejected() {
        let config = ServerConfig::default();
        let p = problems(&config);
        assert_eq!(p.len(), 1);
        assert!(p[0].contains("mail_from"));
    }

    #[test]
    fn retention_thresholds_must_be_paired() {
        let mut config = valid();
        config.inactive_months_cleanup = 6;
        let p = problems(&config);
        assert_eq!(p.len(), 1);
        assert!(p[0].contains("unverified_months_cleanup must also be > 0"));

        config.inactive_months_cleanup = 0;
        config.unverified_months_cleanup = 2;
        let p = problems(&config);
        assert_eq!(p.len(), 1);
        assert!(p[0].contains("inactive_months_cleanup must also be > 0"));

        config.inactive_months_cleanup = 6;
        assert!(config.validate().is_ok());
        assert!(config.account_cleanup_enabled());
    }

    #[test]
    fn all_problems_reported_together() {
        let config = ServerConfig {
            mail_from: "nope".into(),
            pdf_cleanup_days: 0,
            concurrent_print_jobs: 0,
            nuisance_job_names: vec!["(unclosed".into()],
            default_profile: "sepia".into(),
            ..Default::default()
        };
        let p = problems(&config);
        assert_eq!(p.len(), 5, "{p:?}");
    }

    #[test]
    fn quota_needs_a_period() {
        let config = ServerConfig {
            quota_jobs: 10,
            quota_period: 0,
            ..valid()
        };
        assert_eq!(problems(&config).len(), 1);
    }

    #[test]
    fn load_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greenbar.json");
        std::fs::write(
            &path,
            r#"{
                "mail_from": "printer@example.com",
                "listen_port": 1515,
                "quota_jobs": 2,
                "quota_pages": 100,
                "pdf_cleanup_days": 7,
                "nuisance_job_names": ["^TESTPRINT$"]
            }"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).expect("valid config");
        assert_eq!(config.listen_port, 1515);
        assert_eq!(config.quota_jobs, 2);
        assert_eq!(config.pdf_cleanup_days, 7);
        assert_eq!(config.nuisance_job_names, vec!["^TESTPRINT$".to_string()]);
        // Unspecified fields keep their defaults.
        assert_eq!(config.concurrent_print_jobs, 4);
    }

    #[test]
    fn invalid_json_file_is_rejected_as_a_whole() {
        let result = ServerConfig::from_json(
            r#"{ "mail_from": "printer@example.com", "unverified_months_cleanup": 3 }"#,
        );
        assert!(matches!(result, Err(GreenbarError::Config(_))));
    }

    #[test]
    fn address_check() {
        assert!(is_plausible_address("a@b.co"));
        assert!(!is_plausible_address("a@b"));
        assert!(!is_plausible_address("@b.co"));
        assert!(!is_plausible_address("a@@b.co"));
        assert!(!is_plausible_address("a b@c.co"));
    }
}

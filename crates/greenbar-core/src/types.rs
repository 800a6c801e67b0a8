// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Greenbar virtual line printer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a received print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered operator.
///
/// The access key doubles as the LPD queue name that the operator's
/// emulator prints to.  It is issued once by [`Account::new`] and never
/// changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique email address; also the delivery destination.
    pub email: String,
    /// Opaque queue name clients connect to.
    pub access_key: String,
    pub full_name: String,
    /// Physical-location tag printed in the document metadata ("room").
    pub location: String,
    pub verified: bool,
    pub enabled: bool,
    pub admin: bool,
    /// Bypasses all quota checks.
    pub unlimited: bool,
    /// Never drop this account's jobs as nuisance jobs.
    pub nuisance_opt_out: bool,
    /// Keep documents for retrieval but don't email them.
    pub email_opt_out: bool,
    /// Render profile name; `None` uses the configured default.
    pub profile: Option<String>,
    /// Jobs counted in the current quota window.
    pub job_count: u32,
    /// Pages counted in the current quota window.
    pub page_count: u32,
    /// Start of the current quota window.
    pub window_start: DateTime<Utc>,
    /// When the account last printed a job.
    pub last_job: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new, unverified and enabled account with a fresh access key.
    pub fn new(email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            email: email.into(),
            access_key: Uuid::new_v4().simple().to_string(),
            full_name: String::new(),
            location: String::new(),
            verified: false,
            enabled: true,
            admin: false,
            unlimited: false,
            nuisance_opt_out: false,
            email_opt_out: false,
            profile: None,
            job_count: 0,
            page_count: 0,
            window_start: now,
            last_job: None,
            created_at: now,
        }
    }

    /// Whether quota checks apply to this account.
    ///
    /// Administrators are never throttled.
    pub fn is_quota_exempt(&self) -> bool {
        self.unlimited || self.admin
    }

    /// The instant the account was last active: its most recent job, or its
    /// creation if it never printed.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_job.unwrap_or(self.created_at)
    }
}

/// Which quota dimension a rejected job ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaKind {
    Jobs,
    Pages,
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jobs => f.write_str("job"),
            Self::Pages => f.write_str("page"),
        }
    }
}

/// An RGB color in 0..=255 components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorRgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Dark (rules, numbers) and light (bars) colors of the pre-printed form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarColors {
    pub dark: ColorRgb,
    pub light: ColorRgb,
}

/// Typeface used for the printed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FontFace {
    /// Clean monospace.
    Courier,
    /// Heavier strike, closer to a worn print chain.
    CourierBold,
}

/// A named rendering configuration.
///
/// Chosen once per job and handed unchanged to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProfile {
    pub name: String,
    pub font: FontFace,
    /// Font size in points.
    pub font_size: f32,
    /// Lines left blank at the top of each form (carriage-control skip).
    pub top_skip: u32,
    /// Vertical pitch: 6 or 8 lines per inch.
    pub lines_per_inch: u32,
    /// Fold text to upper case, as the 1403 print chain had no lower case.
    pub uppercase: bool,
    /// `None` renders on plain paper without the green-bar form.
    pub bars: Option<BarColors>,
}

/// What happened to a fully received job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Rendered, charged, and handed to delivery.
    Printed {
        job_id: JobId,
        pages: u32,
        /// `false` when the document was rendered but the mail hand-off
        /// failed.
        delivered: bool,
    },
    /// Silently discarded as a nuisance job; nothing charged.
    Dropped { job_id: JobId },
}

/// Lifecycle state of the LPD listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_defaults() {
        let account = Account::new("op@example.com");
        assert!(account.enabled);
        assert!(!account.verified);
        assert!(!account.unlimited);
        assert_eq!(account.job_count, 0);
        assert_eq!(account.access_key.len(), 32);
        assert!(account.access_key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn access_keys_are_unique() {
        let a = Account::new("a@example.com");
        let b = Account::new("b@example.com");
        assert_ne!(a.access_key, b.access_key);
    }

    #[test]
    fn last_activity_falls_back_to_creation() {
        let mut account = Account::new("op@example.com");
        assert_eq!(account.last_activity(), account.created_at);

        let later = account.created_at + chrono::Duration::days(3);
        account.last_job = Some(later);
        assert_eq!(account.last_activity(), later);
    }

    #[test]
    fn admins_are_quota_exempt() {
        let mut account = Account::new("root@example.com");
        assert!(!account.is_quota_exempt());
        account.admin = true;
        assert!(account.is_quota_exempt());
    }
}

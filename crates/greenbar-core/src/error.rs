// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Greenbar.

use thiserror::Error;

use crate::types::QuotaKind;

/// Top-level error type for all Greenbar operations.
#[derive(Debug, Error)]
pub enum GreenbarError {
    // -- Reception --
    #[error("LPD protocol error: {0}")]
    Protocol(String),

    #[error("no account for queue `{0}`")]
    UnknownQueue(String),

    #[error("account {0} is disabled")]
    AccountDisabled(String),

    #[error("print server error: {0}")]
    PrintServer(String),

    // -- Admission --
    #[error("{kind} quota exceeded ({used} of {limit} used in the current period)")]
    QuotaExceeded {
        kind: QuotaKind,
        used: u32,
        limit: u32,
    },

    #[error("job has {lines} lines, limit is {max}")]
    JobTooLarge { lines: usize, max: usize },

    // -- Rendering / delivery --
    #[error("render failed: {0}")]
    Render(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Startup --
    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),
}

impl GreenbarError {
    /// Whether the job was turned away before any rendering work happened.
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownQueue(_)
                | Self::AccountDisabled(_)
                | Self::QuotaExceeded { .. }
                | Self::JobTooLarge { .. }
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, GreenbarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_lists_every_problem() {
        let err = GreenbarError::Config(vec!["a is bad".into(), "b is bad".into()]);
        assert_eq!(err.to_string(), "invalid configuration: a is bad; b is bad");
    }

    #[test]
    fn quota_message_names_the_dimension() {
        let err = GreenbarError::QuotaExceeded {
            kind: QuotaKind::Pages,
            used: 510,
            limit: 500,
        };
        assert_eq!(
            err.to_string(),
            "page quota exceeded (510 of 500 used in the current period)"
        );
        assert!(err.is_admission_rejection());
        assert!(!GreenbarError::Render("boom".into()).is_admission_rejection());
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Nuisance filter: drops banner pages, driver test prints, and other jobs
// operators never want mailed to them.

use regex::Regex;

use greenbar_core::error::{GreenbarError, Result};
use greenbar_core::types::Account;

/// Set of job-name patterns whose matches are silently discarded.
#[derive(Debug, Clone, Default)]
pub struct NuisanceFilter {
    patterns: Vec<Regex>,
}

impl NuisanceFilter {
    /// Compile `patterns`, reporting every invalid one.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut problems = Vec::new();

        for pattern in patterns {
            match Regex::new(pattern) {
                Ok(re) => compiled.push(re),
                Err(e) => problems.push(format!("nuisance regex `{pattern}` error: {e}")),
            }
        }

        if !problems.is_empty() {
            return Err(GreenbarError::Config(problems));
        }
        Ok(Self { patterns: compiled })
    }

    /// Whether `job_name` matches any pattern.
    pub fn is_nuisance(&self, job_name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(job_name))
    }

    /// Whether this account's job should be dropped.
    pub fn should_drop(&self, account: &Account, job_name: &str) -> bool {
        !account.nuisance_opt_out && self.is_nuisance(job_name)
    }
}

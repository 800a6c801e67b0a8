// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Greenbar: Core types, configuration, and error definitions shared across
// all crates.

pub mod config;
pub mod error;
pub mod profiles;
pub mod store;
pub mod types;

pub use config::ServerConfig;
pub use error::GreenbarError;
pub use store::AccountStore;
pub use types::*;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// greenbar-store: persistence behind the print pipeline.
//
// Accounts and the job history live in SQLite; rendered documents are kept
// as content-addressed files until the retention sweep deletes them.

pub mod accounts;
pub mod archive;
pub mod integrity;
pub mod job_log;
pub mod memory;

pub use accounts::SqliteAccountStore;
pub use archive::DocumentArchive;
pub use integrity::hash_bytes;
pub use job_log::{JobLog, JobLogEntry};
pub use memory::MemoryAccountStore;

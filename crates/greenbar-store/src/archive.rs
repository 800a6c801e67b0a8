// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document archive: rendered PDFs kept on disk until the retention sweep
// removes them.
//
// Files are content-addressed (`<sha256>.pdf`), so storing the same bytes
// twice keeps one file and a file name is enough to verify its contents.
// Storing again refreshes the file's modification time.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use greenbar_core::error::Result;

use crate::integrity::hash_bytes;

const EXTENSION: &str = "pdf";

/// Directory of retained documents.
#[derive(Debug, Clone)]
pub struct DocumentArchive {
    root: PathBuf,
}

impl DocumentArchive {
    /// Open the archive rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `bytes` into the archive and return the stored path.
    #[instrument(skip_all, fields(len = bytes.len()))]
    pub fn store(&self, bytes: &[u8]) -> Result<PathBuf> {
        let hash = hash_bytes(bytes);
        let path = self.root.join(format!("{hash}.{EXTENSION}"));

        if path.exists() {
            // Retention counts from the latest delivery of these bytes.
            std::fs::File::options()
                .write(true)
                .open(&path)?
                .set_modified(SystemTime::now())?;
            debug!(%hash, "document already archived; age reset");
            return Ok(path);
        }

        // Write to a temporary name first so a crash never leaves a
        // truncated file under a valid content address.  Concurrent stores of
        // the same bytes each get their own partial file.
        let partial = self
            .root
            .join(format!("{hash}.{}.partial", Uuid::new_v4().simple()));
        if let Err(e) = std::fs::write(&partial, bytes).and_then(|()| std::fs::rename(&partial, &path)) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }

        debug!(%hash, "document archived");
        Ok(path)
    }

    /// Delete every archived document last modified before `cutoff`.
    ///
    /// Returns the number of files removed.  A file that cannot be inspected
    /// or removed is logged and skipped.
    #[instrument(skip(self))]
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;

        for entry in std::fs::read_dir(&self.root)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "unreadable archive entry");
                    continue;
                }
            };

            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }

            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read modification time");
                    continue;
                }
            };

            if modified >= cutoff {
                continue;
            }

            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "cannot remove document"),
            }
        }

        if removed > 0 {
            info!(removed, "expired documents purged");
        }
        Ok(removed)
    }
}

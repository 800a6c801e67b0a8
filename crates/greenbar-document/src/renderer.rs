// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rendering collaborator interface.

use greenbar_core::error::Result;
use greenbar_core::types::RenderProfile;

/// A finished document and the number of pages it holds.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub pages: u32,
}

/// One document being rendered.
///
/// Lines are appended top to bottom; the job starts a new page on its own
/// when the current one is full.  Dropping a job without calling
/// [`RenderJob::finish`] discards it.
pub trait RenderJob: Send {
    /// Print one line.  Lines wider than the print area are cut off.
    fn add_line(&mut self, text: &str) -> Result<()>;

    /// Eject to the top of the next form.
    fn new_page(&mut self) -> Result<()>;

    /// Pages started so far.
    fn page_count(&self) -> u32;

    /// Serialize the document.
    fn finish(self: Box<Self>) -> Result<RenderedDocument>;
}

/// Factory for render jobs.
pub trait Renderer: Send + Sync {
    /// Start a new document laid out according to `profile`.
    fn open(&self, profile: &RenderProfile, title: &str) -> Result<Box<dyn RenderJob>>;
}

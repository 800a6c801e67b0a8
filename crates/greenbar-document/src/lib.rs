// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// greenbar-document: renders received print jobs as green-bar PDFs.
//
// The print pipeline talks to rendering only through the `Renderer` and
// `RenderJob` traits; `GreenbarRenderer` is the printpdf implementation that
// draws the IBM 1403 continuous form behind the text.

pub mod pdf;
pub mod renderer;

pub use pdf::writer::GreenbarRenderer;
pub use renderer::{RenderJob, RenderedDocument, Renderer};

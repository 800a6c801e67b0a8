// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module: page geometry, the pre-printed form, and the line writer.

pub mod form;
pub mod writer;

/// Page width in points (14 7/8 inches).
pub const PAGE_WIDTH_PT: f32 = 1071.0;
/// Page height in points (11 inches).
pub const PAGE_HEIGHT_PT: f32 = 792.0;
/// Printable columns on a 1403 print line.
pub const LINE_COLUMNS: usize = 132;

/// Height of one print line at the given vertical pitch.
pub fn line_height_pt(lines_per_inch: u32) -> f32 {
    72.0 / lines_per_inch.max(1) as f32
}

/// Print lines that fit on one form at the given vertical pitch.
pub fn lines_per_page(lines_per_inch: u32) -> u32 {
    11 * lines_per_inch.max(1)
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Line writer: lays print lines onto green-bar pages using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: each page is a `PdfPage` holding a
// `Vec<Op>`, and the document is serialised once via `PdfDocument::save()`.
// A render job therefore accumulates ops for the current page and seals it
// into the page list on every form feed.

use greenbar_core::error::Result;
use greenbar_core::types::{ColorRgb, FontFace, RenderProfile};
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, TextItem,
};
use tracing::{debug, instrument};

use super::form::{form_ops, rgb};
use super::{LINE_COLUMNS, PAGE_HEIGHT_PT, PAGE_WIDTH_PT, line_height_pt, lines_per_page};
use crate::renderer::{RenderJob, RenderedDocument, Renderer};

/// Courier glyphs advance 0.6 em.
const COURIER_ADVANCE_EM: f32 = 0.6;

fn pt_to_mm(pt: f32) -> Mm {
    Mm(pt * 25.4 / 72.0)
}

/// Renders jobs onto IBM 1403 style continuous forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreenbarRenderer;

impl GreenbarRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for GreenbarRenderer {
    #[instrument(skip(self, profile), fields(profile = %profile.name))]
    fn open(&self, profile: &RenderProfile, title: &str) -> Result<Box<dyn RenderJob>> {
        debug!("starting render job");
        Ok(Box::new(GreenbarJob::new(profile.clone(), title)))
    }
}

/// A document in progress.
pub struct GreenbarJob {
    profile: RenderProfile,
    title: String,
    font: BuiltinFont,
    background: Vec<Op>,
    left_margin: f32,
    line_height: f32,
    capacity: u32,
    finished_pages: Vec<PdfPage>,
    ops: Vec<Op>,
    cur_line: u32,
    page_touched: bool,
}

impl GreenbarJob {
    fn new(profile: RenderProfile, title: &str) -> Self {
        let font = match profile.font {
            FontFace::Courier => BuiltinFont::Courier,
            FontFace::CourierBold => BuiltinFont::CourierBold,
        };

        // Centre the 132-column print area on the page.
        let line_width = LINE_COLUMNS as f32 * profile.font_size * COURIER_ADVANCE_EM;
        let left_margin = (PAGE_WIDTH_PT - line_width) / 2.0;

        let mut job = Self {
            background: form_ops(profile.bars.as_ref()),
            line_height: line_height_pt(profile.lines_per_inch),
            capacity: lines_per_page(profile.lines_per_inch),
            title: title.to_string(),
            profile,
            font,
            left_margin,
            finished_pages: Vec::new(),
            ops: Vec::new(),
            cur_line: 0,
            page_touched: false,
        };
        job.start_page();
        job
    }

    fn start_page(&mut self) {
        self.ops = self.background.clone();
        self.ops.push(Op::SetFillColor {
            col: rgb(ColorRgb::new(0, 0, 0)),
        });
        self.cur_line = self.profile.top_skip.min(self.capacity.saturating_sub(1));
        self.page_touched = false;
    }

    fn seal_page(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        self.finished_pages.push(PdfPage::new(
            pt_to_mm(PAGE_WIDTH_PT),
            pt_to_mm(PAGE_HEIGHT_PT),
            ops,
        ));
    }

    fn baseline(&self) -> f32 {
        let top = self.cur_line as f32 * self.line_height;
        PAGE_HEIGHT_PT - (top + self.line_height / 2.0 + self.profile.font_size * 0.3)
    }
}

impl RenderJob for GreenbarJob {
    fn add_line(&mut self, text: &str) -> Result<()> {
        if self.cur_line >= self.capacity {
            self.seal_page();
            self.start_page();
        }

        let mut printed: String = text.chars().take(LINE_COLUMNS).collect();
        if self.profile.uppercase {
            printed = printed.to_uppercase();
        }
        let printed = printed.trim_end();

        if !printed.is_empty() {
            let y = self.baseline();
            self.ops.extend([
                Op::StartTextSection,
                Op::SetTextCursor {
                    pos: Point {
                        x: Pt(self.left_margin),
                        y: Pt(y),
                    },
                },
                Op::SetFontSizeBuiltinFont {
                    size: Pt(self.profile.font_size),
                    font: self.font,
                },
                Op::WriteTextBuiltinFont {
                    items: vec![TextItem::Text(printed.to_string())],
                    font: self.font,
                },
                Op::EndTextSection,
            ]);
        }

        self.cur_line += 1;
        self.page_touched = true;
        Ok(())
    }

    fn new_page(&mut self) -> Result<()> {
        // Ejecting an untouched form would only waste paper.
        if self.page_touched {
            self.seal_page();
            self.start_page();
        }
        Ok(())
    }

    fn page_count(&self) -> u32 {
        self.finished_pages.len() as u32 + 1
    }

    fn finish(mut self: Box<Self>) -> Result<RenderedDocument> {
        self.seal_page();
        let pages = self.finished_pages.len() as u32;

        let mut doc = PdfDocument::new(&self.title);
        doc.with_pages(std::mem::take(&mut self.finished_pages));

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);

        debug!(pages, bytes = bytes.len(), "render job finished");
        Ok(RenderedDocument { bytes, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenbar_core::profiles::profile_by_name;

    fn open(profile: &str) -> Box<dyn RenderJob> {
        GreenbarRenderer::new()
            .open(&profile_by_name(profile), "TEST JOB")
            .expect("open render job")
    }

    #[test]
    fn short_job_is_one_page() {
        let mut job = open("default-green");
        for line in ["HELLO", "", "WORLD"] {
            job.add_line(line).unwrap();
        }
        let doc = job.finish().unwrap();
        assert_eq!(doc.pages, 1);
        assert!(doc.bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn overflow_starts_a_new_page() {
        // 66 lines per form at 6 lpi, minus the 5-line top skip.
        let mut job = open("default-green");
        for i in 0..61 {
            job.add_line(&format!("LINE {i}")).unwrap();
        }
        assert_eq!(job.page_count(), 1);
        job.add_line("ONE MORE").unwrap();
        assert_eq!(job.page_count(), 2);
        assert_eq!(job.finish().unwrap().pages, 2);
    }

    #[test]
    fn eight_lpi_holds_more_lines() {
        let mut job = open("lpi8-modern-plain-noskip");
        for _ in 0..88 {
            job.add_line("x").unwrap();
        }
        assert_eq!(job.page_count(), 1);
        job.add_line("x").unwrap();
        assert_eq!(job.page_count(), 2);
    }

    #[test]
    fn form_feed_on_untouched_page_is_ignored() {
        let mut job = open("modern-blue");
        job.new_page().unwrap();
        job.add_line("first").unwrap();
        job.new_page().unwrap();
        job.add_line("second").unwrap();
        assert_eq!(job.finish().unwrap().pages, 2);
    }

    #[test]
    fn empty_job_still_produces_a_page() {
        let doc = open("retro-plain").finish().unwrap();
        assert_eq!(doc.pages, 1);
        assert!(!doc.bytes.is_empty());
    }

    #[test]
    fn print_area_is_centred() {
        let job = GreenbarJob::new(profile_by_name("default-green"), "t");
        let right = job.left_margin + LINE_COLUMNS as f32 * 12.0 * COURIER_ADVANCE_EM;
        assert!((job.left_margin - (PAGE_WIDTH_PT - right)).abs() < 0.01);
        assert!(job.left_margin > 40.0);
    }
}

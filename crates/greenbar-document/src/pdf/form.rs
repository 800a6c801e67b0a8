// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pre-printed continuous form drawn behind every page.
//
// Coordinates in this file are measured from the TOP of the page, the way
// the physical form is described; `flip` converts to PDF space.

use greenbar_core::types::{BarColors, ColorRgb};
use printpdf::{
    BuiltinFont, Color, Line, LinePoint, Op, PaintMode, Point, Polygon, PolygonRing, Pt, Rgb,
    TextItem, WindingOrder,
};

use super::{PAGE_HEIGHT_PT, PAGE_WIDTH_PT};

/// Top edge of the first bar.
const FORM_TOP: f32 = 72.0;
/// Outer margin gutter (line numbers) starts here.
const GUTTER_OUTER: f32 = 30.0;
/// Inner edge of the gutter, where the bars begin.
const GUTTER_INNER: f32 = 40.0;
/// Height of one bar; a bar and a gap make one inch.
const BAR_HEIGHT: f32 = 36.0;
const BAR_COUNT: usize = 10;
const FEED_HOLE_X: f32 = 20.0;
const FEED_HOLE_RADIUS: f32 = 5.5;
const FEED_HOLE_PITCH: f32 = 36.0;
const MARGIN_FONT_SIZE: f32 = 7.0;

const HOLE_OUTLINE: ColorRgb = ColorRgb::new(200, 200, 200);
const HOLE_FILL: ColorRgb = ColorRgb::new(230, 230, 230);

pub(crate) fn rgb(c: ColorRgb) -> Color {
    Color::Rgb(Rgb {
        r: c.r as f32 / 255.0,
        g: c.g as f32 / 255.0,
        b: c.b as f32 / 255.0,
        icc_profile: None,
    })
}

fn flip(x: f32, y_from_top: f32) -> Point {
    Point {
        x: Pt(x),
        y: Pt(PAGE_HEIGHT_PT - y_from_top),
    }
}

fn point(x: f32, y_from_top: f32) -> LinePoint {
    LinePoint {
        p: flip(x, y_from_top),
        bezier: false,
    }
}

fn filled(points: Vec<LinePoint>, mode: PaintMode) -> Op {
    Op::DrawPolygon {
        polygon: Polygon {
            rings: vec![PolygonRing { points }],
            mode,
            winding_order: WindingOrder::NonZero,
        },
    }
}

fn rect(x: f32, y: f32, w: f32, h: f32) -> Op {
    filled(
        vec![
            point(x, y),
            point(x + w, y),
            point(x + w, y + h),
            point(x, y + h),
        ],
        PaintMode::Fill,
    )
}

fn circle(cx: f32, cy: f32, r: f32) -> Op {
    const SEGMENTS: usize = 24;
    let points = (0..SEGMENTS)
        .map(|i| {
            let a = i as f32 / SEGMENTS as f32 * std::f32::consts::TAU;
            point(cx + r * a.cos(), cy + r * a.sin())
        })
        .collect();
    filled(points, PaintMode::FillStroke)
}

fn line(x1: f32, y1: f32, x2: f32, y2: f32) -> Op {
    Op::DrawLine {
        line: Line {
            points: vec![point(x1, y1), point(x2, y2)],
            is_closed: false,
        },
    }
}

fn label(x: f32, baseline_from_top: f32, text: String) -> [Op; 5] {
    [
        Op::StartTextSection,
        Op::SetTextCursor {
            pos: flip(x, baseline_from_top),
        },
        Op::SetFontSizeBuiltinFont {
            size: Pt(MARGIN_FONT_SIZE),
            font: BuiltinFont::Helvetica,
        },
        Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text)],
            font: BuiltinFont::Helvetica,
        },
        Op::EndTextSection,
    ]
}

/// Column of gutter numbers centred in a 10 pt cell starting at `x`.
fn margin_numbers(ops: &mut Vec<Op>, x: f32, count: usize, pitch: f32) {
    for i in 0..count {
        let text = (i + 1).to_string();
        // Helvetica digits are about 0.556 em wide.
        let width = text.len() as f32 * MARGIN_FONT_SIZE * 0.556;
        let left = x + (10.0 - width) / 2.0;
        let baseline = FORM_TOP + i as f32 * pitch + pitch / 2.0 + MARGIN_FONT_SIZE * 0.35;
        ops.extend(label(left, baseline, text));
    }
}

/// Drawing operations for the form background.
///
/// Returns nothing for plain paper.  The graphics state is saved and
/// restored around the form so the text that follows starts clean.
pub fn form_ops(bars: Option<&BarColors>) -> Vec<Op> {
    let Some(colors) = bars else {
        return Vec::new();
    };

    let w = PAGE_WIDTH_PT;
    let h = PAGE_HEIGHT_PT;
    let bottom = h - 1.5;
    let mut ops = vec![Op::SaveGraphicsState];

    // Tractor feed holes down both edges.
    ops.push(Op::SetOutlineColor {
        col: rgb(HOLE_OUTLINE),
    });
    ops.push(Op::SetFillColor {
        col: rgb(HOLE_FILL),
    });
    ops.push(Op::SetOutlineThickness { pt: Pt(0.75) });
    for i in 0..22 {
        let y = 18.0 + FEED_HOLE_PITCH * i as f32;
        let r = if i == 0 || i == 21 {
            FEED_HOLE_RADIUS + 1.0
        } else {
            FEED_HOLE_RADIUS
        };
        ops.push(circle(FEED_HOLE_X, y, r));
        ops.push(circle(w - FEED_HOLE_X, y, r));
    }

    // Bars.
    ops.push(Op::SetFillColor {
        col: rgb(colors.light),
    });
    for i in 0..BAR_COUNT {
        let top = FORM_TOP + (i as f32) * 2.0 * BAR_HEIGHT - 0.5;
        ops.push(rect(GUTTER_INNER, top, w - 2.0 * GUTTER_INNER, BAR_HEIGHT));
    }

    // Horizontal rules: full width at top and bottom, bar width between.
    ops.push(Op::SetOutlineColor {
        col: rgb(colors.dark),
    });
    ops.push(Op::SetOutlineThickness { pt: Pt(0.7) });
    ops.push(line(
        GUTTER_OUTER - 0.25,
        FORM_TOP - 0.5,
        w - GUTTER_OUTER + 0.25,
        FORM_TOP - 0.5,
    ));
    ops.push(line(GUTTER_OUTER - 0.25, bottom, w - GUTTER_OUTER + 0.25, bottom));
    for i in 0..2 * BAR_COUNT {
        let y = FORM_TOP + BAR_HEIGHT * i as f32 - 0.5;
        ops.push(line(GUTTER_INNER, y, w - GUTTER_INNER, y));
    }

    // Gutter verticals.
    ops.push(Op::SetOutlineThickness { pt: Pt(0.5) });
    for x in [
        GUTTER_OUTER,
        GUTTER_INNER,
        w - GUTTER_INNER,
        w - GUTTER_OUTER,
    ] {
        ops.push(line(x, FORM_TOP - 0.5, x, bottom));
    }

    // Line numbers: 6 lpi on the left, 8 lpi on the right.
    ops.push(Op::SetFillColor {
        col: rgb(colors.dark),
    });
    margin_numbers(&mut ops, GUTTER_OUTER, 60, 12.0);
    margin_numbers(&mut ops, w - GUTTER_INNER, 80, 9.0);

    ops.push(Op::RestoreGraphicsState);
    ops
}

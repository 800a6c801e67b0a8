// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Render profile catalog.
//
// Profile names follow `<family>-<color>[-<skip>]`:
//
//   family: default | retro | modern | lpi8-modern
//   color:  green | blue | plain
//   skip:   (none) | skip5 | noskip      (skip5 only for `modern`)
//
// Unknown names resolve to `default-green`.

use crate::types::{BarColors, ColorRgb, FontFace, RenderProfile};

/// Profile used when nothing else is configured.
pub const DEFAULT_PROFILE: &str = "default-green";

pub const DARK_GREEN: ColorRgb = ColorRgb::new(99, 182, 99);
pub const LIGHT_GREEN: ColorRgb = ColorRgb::new(219, 240, 219);
pub const DARK_BLUE: ColorRgb = ColorRgb::new(65, 182, 255);
pub const LIGHT_BLUE: ColorRgb = ColorRgb::new(214, 239, 255);

/// Every name accepted by [`profile_by_name`].
pub const PROFILE_NAMES: &[&str] = &[
    "default-green",
    "default-green-noskip",
    "default-blue",
    "default-blue-noskip",
    "default-plain",
    "default-plain-noskip",
    "retro-green",
    "retro-green-noskip",
    "retro-blue",
    "retro-blue-noskip",
    "retro-plain",
    "retro-plain-noskip",
    "modern-green",
    "modern-green-skip5",
    "modern-green-noskip",
    "modern-blue",
    "modern-blue-skip5",
    "modern-blue-noskip",
    "modern-plain",
    "modern-plain-skip5",
    "modern-plain-noskip",
    "lpi8-modern-green",
    "lpi8-modern-green-noskip",
    "lpi8-modern-blue",
    "lpi8-modern-blue-noskip",
    "lpi8-modern-plain",
    "lpi8-modern-plain-noskip",
];

/// Whether `name` (case-insensitive) is in the catalog.
pub fn is_known(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PROFILE_NAMES.iter().any(|p| *p == lower)
}

/// Look up a profile by name, falling back to [`DEFAULT_PROFILE`].
pub fn profile_by_name(name: &str) -> RenderProfile {
    let lower = name.to_ascii_lowercase();
    if !is_known(&lower) {
        return build(DEFAULT_PROFILE);
    }
    build(&lower)
}

fn build(name: &str) -> RenderProfile {
    let (family, rest) = if let Some(rest) = name.strip_prefix("lpi8-modern-") {
        (Family::Lpi8Modern, rest)
    } else if let Some(rest) = name.strip_prefix("modern-") {
        (Family::Modern, rest)
    } else if let Some(rest) = name.strip_prefix("retro-") {
        (Family::Retro, rest)
    } else {
        (Family::Default, name.strip_prefix("default-").unwrap_or("green"))
    };

    let (color, variant) = match rest.split_once('-') {
        Some((color, variant)) => (color, Some(variant)),
        None => (rest, None),
    };

    let bars = match color {
        "blue" => Some(BarColors {
            dark: DARK_BLUE,
            light: LIGHT_BLUE,
        }),
        "plain" => None,
        _ => Some(BarColors {
            dark: DARK_GREEN,
            light: LIGHT_GREEN,
        }),
    };

    // The first printable line sits below the top-of-form skip.
    let standard_skip = match family {
        Family::Lpi8Modern => 7,
        _ => 5,
    };
    let top_skip = match variant {
        Some("noskip") => 0,
        Some("skip5") => 4,
        _ => standard_skip,
    };

    let (font, font_size, lines_per_inch, uppercase) = match family {
        Family::Default => (FontFace::Courier, 12.0, 6, true),
        Family::Retro => (FontFace::CourierBold, 10.0, 6, true),
        Family::Modern => (FontFace::Courier, 12.0, 6, false),
        Family::Lpi8Modern => (FontFace::Courier, 9.0, 8, false),
    };

    RenderProfile {
        name: name.to_string(),
        font,
        font_size,
        top_skip,
        lines_per_inch,
        uppercase,
        bars,
    }
}

#[derive(Debug, Clone, Copy)]
enum Family {
    Default,
    Retro,
    Modern,
    Lpi8Modern,
}

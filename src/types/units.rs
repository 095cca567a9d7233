//! Length units.
//!
//! Document geometry is stored in English Metric Units (EMU), a fixed-point
//! length unit: 914400 per inch, 12700 per point.

use regex_lite::Regex;
use std::sync::OnceLock;

use crate::error::{EngineError, EngineResult};

/// A length in English Metric Units.
pub type Emu = i64;

/// EMU per inch.
pub const EMU_PER_INCH: Emu = 914_400;
/// EMU per centimetre.
pub const EMU_PER_CM: Emu = 360_000;
/// EMU per millimetre.
pub const EMU_PER_MM: Emu = 36_000;
/// EMU per typographic point.
pub const EMU_PER_POINT: Emu = 12_700;
/// EMU per CSS pixel (96 dpi).
pub const EMU_PER_PIXEL: Emu = 9_525;

fn length_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*(emu|in|cm|mm|pt|px)?\s*$")
            .expect("length pattern is a valid regex")
    })
}

/// Parse a length string such as `"2.5in"`, `"12pt"` or `"914400"` into EMU.
///
/// A bare number is taken as EMU.
pub fn parse_length(field: &str, raw: &str) -> EngineResult<Emu> {
    let caps = length_pattern()
        .captures(raw)
        .ok_or_else(|| EngineError::addressing(field, format!("not a length: {raw:?}")))?;

    let value: f64 = caps[1]
        .parse()
        .map_err(|_| EngineError::addressing(field, format!("not a number: {raw:?}")))?;

    let per_unit = match caps.get(2).map(|m| m.as_str()) {
        None | Some("emu") => 1,
        Some("in") => EMU_PER_INCH,
        Some("cm") => EMU_PER_CM,
        Some("mm") => EMU_PER_MM,
        Some("pt") => EMU_PER_POINT,
        Some("px") => EMU_PER_PIXEL,
        Some(other) => {
            return Err(EngineError::addressing(field, format!("unknown unit {other:?}")))
        }
    };

    Ok((value * per_unit as f64).round() as Emu)
}

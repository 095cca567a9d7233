//! Addressing specs: where a shape goes and how big it is.
//!
//! Callers describe placement in exactly one of four families:
//!
//! | Family | Keys | Example |
//! |--------|------|---------|
//! | Percentage | `left`, `top` as `"N%"` | `{"left": "10%", "top": "20%"}` |
//! | Absolute | `left`, `top` as EMU or unit strings | `{"left": "1in", "top": 457200}` |
//! | Anchor | `anchor`, `offset_x`, `offset_y` | `{"anchor": "center", "offset_x": -100}` |
//! | Grid | `grid_row`, `grid_col`, `grid_size` | `{"grid_row": 1, "grid_col": 2, "grid_size": 3}` |
//!
//! Mixing keys from two families in one spec is a caller error.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;

use super::units::{parse_length, Emu};
use crate::error::{EngineError, EngineResult};

/// One of the nine fixed anchor points on a slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPoint {
    /// Top-left corner.
    TopLeft,
    /// Midpoint of the top edge.
    TopCenter,
    /// Top-right corner.
    TopRight,
    /// Midpoint of the left edge.
    MiddleLeft,
    /// Slide center.
    Center,
    /// Midpoint of the right edge.
    MiddleRight,
    /// Bottom-left corner.
    BottomLeft,
    /// Midpoint of the bottom edge.
    BottomCenter,
    /// Bottom-right corner.
    BottomRight,
}

impl AnchorPoint {
    /// All anchors, row-major.
    pub const ALL: [AnchorPoint; 9] = [
        Self::TopLeft,
        Self::TopCenter,
        Self::TopRight,
        Self::MiddleLeft,
        Self::Center,
        Self::MiddleRight,
        Self::BottomLeft,
        Self::BottomCenter,
        Self::BottomRight,
    ];

    /// Fractions `(x, y)` of the slide dimensions, in halves (0, 1 or 2).
    pub(crate) fn halves(&self) -> (i64, i64) {
        match self {
            Self::TopLeft => (0, 0),
            Self::TopCenter => (1, 0),
            Self::TopRight => (2, 0),
            Self::MiddleLeft => (0, 1),
            Self::Center => (1, 1),
            Self::MiddleRight => (2, 1),
            Self::BottomLeft => (0, 2),
            Self::BottomCenter => (1, 2),
            Self::BottomRight => (2, 2),
        }
    }
}

impl std::str::FromStr for AnchorPoint {
    type Err = EngineError;

    /// Parse an anchor name (`top_left`, `top-left` and `topleft` are all accepted).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "topleft" => Ok(Self::TopLeft),
            "topcenter" | "top" => Ok(Self::TopCenter),
            "topright" => Ok(Self::TopRight),
            "middleleft" | "left" => Ok(Self::MiddleLeft),
            "center" | "middle" | "middlecenter" => Ok(Self::Center),
            "middleright" | "right" => Ok(Self::MiddleRight),
            "bottomleft" => Ok(Self::BottomLeft),
            "bottomcenter" | "bottom" => Ok(Self::BottomCenter),
            "bottomright" => Ok(Self::BottomRight),
            _ => Err(EngineError::addressing("anchor", format!("unknown anchor {s:?}"))),
        }
    }
}

impl fmt::Display for AnchorPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TopLeft => "top_left",
            Self::TopCenter => "top_center",
            Self::TopRight => "top_right",
            Self::MiddleLeft => "middle_left",
            Self::Center => "center",
            Self::MiddleRight => "middle_right",
            Self::BottomLeft => "bottom_left",
            Self::BottomCenter => "bottom_center",
            Self::BottomRight => "bottom_right",
        };
        write!(f, "{s}")
    }
}

/// Where a shape's top-left corner goes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum AddressingSpec {
    /// Percentages of the slide width/height.
    Percentage {
        /// Left, in percent of slide width.
        left: f64,
        /// Top, in percent of slide height.
        top: f64,
    },
    /// Native units.
    Absolute {
        /// Left edge.
        left: Emu,
        /// Top edge.
        top: Emu,
    },
    /// A named anchor point plus signed offsets.
    Anchor {
        /// Anchor point.
        anchor: AnchorPoint,
        /// Horizontal offset.
        offset_x: Emu,
        /// Vertical offset.
        offset_y: Emu,
    },
    /// Top-left of a cell in an N×N grid.
    Grid {
        /// Row (0-based).
        row: u32,
        /// Column (0-based).
        col: u32,
        /// Cells per axis.
        grid_size: u32,
    },
}

/// One axis of a size request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Extent {
    /// Percent of the slide dimension on this axis.
    Percent(f64),
    /// Native units.
    Absolute(Emu),
    /// Derived from the other axis and the asset's aspect ratio.
    Auto,
}

impl Extent {
    fn family(&self) -> Option<&'static str> {
        match self {
            Self::Percent(_) => Some("percentage"),
            Self::Absolute(_) => Some("absolute"),
            Self::Auto => None,
        }
    }
}

/// How big a shape is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum SizeSpec {
    /// Per-axis extents.
    Dimensions {
        /// Width.
        width: Extent,
        /// Height.
        height: Extent,
    },
    /// A span of cells in an N×N grid.
    Grid {
        /// Rows spanned.
        row_span: u32,
        /// Columns spanned.
        col_span: u32,
        /// Cells per axis.
        grid_size: u32,
    },
}

impl SizeSpec {
    /// Percent size on both axes.
    pub fn percent(width: f64, height: f64) -> Self {
        Self::Dimensions {
            width: Extent::Percent(width),
            height: Extent::Percent(height),
        }
    }

    /// Absolute size on both axes.
    pub fn absolute(width: Emu, height: Emu) -> Self {
        Self::Dimensions {
            width: Extent::Absolute(width),
            height: Extent::Absolute(height),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON parsing
// ─────────────────────────────────────────────────────────────────────────────

const POSITIONAL_KEYS: &[&str] = &["left", "top"];
const ANCHOR_KEYS: &[&str] = &["anchor", "offset_x", "offset_y"];
const GRID_KEYS: &[&str] = &["grid_row", "grid_col", "grid_size"];
const DIMENSION_KEYS: &[&str] = &["width", "height"];
const GRID_SPAN_KEYS: &[&str] = &["grid_row_span", "grid_col_span", "grid_size"];

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*%\s*$").expect("percent pattern is a valid regex")
    })
}

/// Parse `"<number>%"` into the number. Returns `None` if the string is not a percentage.
pub fn parse_percent(raw: &str) -> Option<f64> {
    percent_pattern()
        .captures(raw)
        .and_then(|caps| caps[1].parse().ok())
}

fn as_object<'a>(field: &str, value: &'a Value) -> EngineResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| EngineError::addressing(field, "expected a JSON object"))
}

/// Which of the given key families appear in `map`; error if more than one.
fn single_family<'k>(
    field: &str,
    map: &Map<String, Value>,
    families: &[(&'k str, &[&str])],
) -> EngineResult<&'k str> {
    for key in map.keys() {
        if !families.iter().any(|(_, keys)| keys.contains(&key.as_str())) {
            return Err(EngineError::addressing(field, format!("unknown key `{key}`")));
        }
    }

    let present: Vec<&str> = families
        .iter()
        .filter(|(_, keys)| keys.iter().any(|k| map.contains_key(*k)))
        .map(|(name, _)| *name)
        .collect();

    match present.as_slice() {
        [one] => Ok(*one),
        [] => Err(EngineError::addressing(field, "no addressing keys given")),
        many => Err(EngineError::addressing(
            field,
            format!("mixes addressing families: {}", many.join(", ")),
        )),
    }
}

fn required<'a>(field: &str, map: &'a Map<String, Value>, key: &str) -> EngineResult<&'a Value> {
    map.get(key)
        .ok_or_else(|| EngineError::addressing(field, format!("missing `{key}`")))
}

fn as_u32(field: &str, key: &str, value: &Value) -> EngineResult<u32> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| EngineError::addressing(field, format!("`{key}` must be a non-negative integer")))
}

fn as_length(field: &str, key: &str, value: &Value) -> EngineResult<Emu> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| EngineError::addressing(field, format!("`{key}` is not a length"))),
        Value::String(s) => parse_length(field, s),
        _ => Err(EngineError::addressing(field, format!("`{key}` is not a length"))),
    }
}

/// A single scalar classified as percent or absolute.
enum Scalar {
    Percent(f64),
    Absolute(Emu),
}

fn classify(field: &str, key: &str, value: &Value) -> EngineResult<Scalar> {
    if let Some(pct) = value.as_str().and_then(parse_percent) {
        return Ok(Scalar::Percent(pct));
    }
    as_length(field, key, value).map(Scalar::Absolute)
}

impl AddressingSpec {
    /// Parse a caller-supplied position map.
    pub fn from_json(value: &Value) -> EngineResult<Self> {
        let field = "position";
        let map = as_object(field, value)?;
        let family = single_family(
            field,
            map,
            &[("positional", POSITIONAL_KEYS), ("anchor", ANCHOR_KEYS), ("grid", GRID_KEYS)],
        )?;

        match family {
            "positional" => {
                let left = classify(field, "left", required(field, map, "left")?)?;
                let top = classify(field, "top", required(field, map, "top")?)?;
                match (left, top) {
                    (Scalar::Percent(left), Scalar::Percent(top)) => Ok(Self::Percentage { left, top }),
                    (Scalar::Absolute(left), Scalar::Absolute(top)) => Ok(Self::Absolute { left, top }),
                    _ => Err(EngineError::addressing(
                        field,
                        "`left` and `top` mix percentage and absolute units",
                    )),
                }
            }
            "anchor" => {
                let name = required(field, map, "anchor")?
                    .as_str()
                    .ok_or_else(|| EngineError::addressing(field, "`anchor` must be a string"))?;
                let anchor: AnchorPoint = name
                    .parse()
                    .map_err(|_| EngineError::addressing(field, format!("unknown anchor {name:?}")))?;
                let offset = |key: &str| -> EngineResult<Emu> {
                    map.get(key).map_or(Ok(0), |v| as_length(field, key, v))
                };
                Ok(Self::Anchor {
                    anchor,
                    offset_x: offset("offset_x")?,
                    offset_y: offset("offset_y")?,
                })
            }
            _ => Ok(Self::Grid {
                row: as_u32(field, "grid_row", required(field, map, "grid_row")?)?,
                col: as_u32(field, "grid_col", required(field, map, "grid_col")?)?,
                grid_size: as_u32(field, "grid_size", required(field, map, "grid_size")?)?,
            }),
        }
    }
}

impl SizeSpec {
    /// Parse a caller-supplied size map.
    pub fn from_json(value: &Value) -> EngineResult<Self> {
        let field = "size";
        let map = as_object(field, value)?;
        let family = single_family(
            field,
            map,
            &[("dimensions", DIMENSION_KEYS), ("grid", GRID_SPAN_KEYS)],
        )?;

        if family == "grid" {
            return Ok(Self::Grid {
                row_span: as_u32(field, "grid_row_span", required(field, map, "grid_row_span")?)?,
                col_span: as_u32(field, "grid_col_span", required(field, map, "grid_col_span")?)?,
                grid_size: as_u32(field, "grid_size", required(field, map, "grid_size")?)?,
            });
        }

        let extent = |key: &str| -> EngineResult<Extent> {
            match map.get(key) {
                None => Ok(Extent::Auto),
                Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("auto") => Ok(Extent::Auto),
                Some(v) => Ok(match classify(field, key, v)? {
                    Scalar::Percent(p) => Extent::Percent(p),
                    Scalar::Absolute(a) => Extent::Absolute(a),
                }),
            }
        };
        let width = extent("width")?;
        let height = extent("height")?;

        if let (Some(a), Some(b)) = (width.family(), height.family()) {
            if a != b {
                return Err(EngineError::addressing(
                    field,
                    "`width` and `height` mix percentage and absolute units",
                ));
            }
        }
        Ok(Self::Dimensions { width, height })
    }
}

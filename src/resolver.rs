//! Spatial resolution of addressing specs into absolute slide coordinates.
//!
//! Every function here is a pure function of its inputs: no hidden state,
//! no I/O, no randomness.
//!
//! ## Permissive cases
//!
//! Percentages outside `0..=100` resolve normally and produce an
//! [`AddressingWarning`]. Off-slide placement is a legitimate layout choice,
//! so it is surfaced, never rejected.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::{AddressingSpec, Emu, Extent, SizeSpec};

/// Caller-visible note attached to a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressingWarning {
    /// Spec field the warning refers to.
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl AddressingWarning {
    fn out_of_range(field: &str, pct: f64) -> Self {
        Self {
            field: field.to_string(),
            message: format!("{field} is {pct}%, outside 0-100%; the shape will extend off-slide"),
        }
    }
}

impl std::fmt::Display for AddressingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Absolute top-left corner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPosition {
    /// Left edge.
    pub left: Emu,
    /// Top edge.
    pub top: Emu,
    /// Permissive-case warnings.
    pub warnings: Vec<AddressingWarning>,
}

/// Axis of a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Horizontal.
    Width,
    /// Vertical.
    Height,
}

/// A size with one axis waiting for the asset's aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredAspect {
    /// The axis that was specified.
    pub known_axis: Axis,
    /// Its resolved extent.
    pub known: Emu,
}

impl DeferredAspect {
    /// Derive the missing axis from an intrinsic aspect ratio (`width / height`).
    pub fn complete(&self, aspect_ratio: f64) -> EngineResult<(Emu, Emu)> {
        if !aspect_ratio.is_finite() || aspect_ratio <= 0.0 {
            return Err(EngineError::addressing(
                "aspect_ratio",
                format!("must be a positive finite number, got {aspect_ratio}"),
            ));
        }
        Ok(match self.known_axis {
            Axis::Width => (self.known, (self.known as f64 / aspect_ratio).round() as Emu),
            Axis::Height => ((self.known as f64 * aspect_ratio).round() as Emu, self.known),
        })
    }
}

/// Outcome of size resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolvedSize {
    /// Both axes known.
    Exact {
        /// Width.
        width: Emu,
        /// Height.
        height: Emu,
    },
    /// One axis is `auto`.
    Deferred(DeferredAspect),
}

/// Size resolution plus warnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeResolution {
    /// The resolved (or deferred) size.
    pub size: ResolvedSize,
    /// Permissive-case warnings.
    pub warnings: Vec<AddressingWarning>,
}

fn check_slide(slide_width: Emu, slide_height: Emu) -> EngineResult<()> {
    if slide_width <= 0 || slide_height <= 0 {
        return Err(EngineError::parameter(
            "slide_size",
            format!("slide dimensions must be positive, got {slide_width}x{slide_height}"),
        ));
    }
    Ok(())
}

fn scale_percent(
    field: &str,
    pct: f64,
    dimension: Emu,
    warnings: &mut Vec<AddressingWarning>,
) -> EngineResult<Emu> {
    if !pct.is_finite() {
        return Err(EngineError::addressing(field, format!("percentage must be finite, got {pct}")));
    }
    if !(0.0..=100.0).contains(&pct) {
        warnings.push(AddressingWarning::out_of_range(field, pct));
    }
    Ok((pct / 100.0 * dimension as f64).round() as Emu)
}

fn check_grid(field: &str, grid_size: u32) -> EngineResult<()> {
    if grid_size < 1 {
        return Err(EngineError::addressing(field, "grid_size must be at least 1"));
    }
    Ok(())
}

/// Cell boundary `i` of `n` along a dimension, without accumulating rounding error.
fn grid_line(dimension: Emu, i: u32, n: u32) -> Emu {
    (dimension as i128 * i as i128 / n as i128) as Emu
}

/// Anchor point along one axis (`halves` of 2 is the far edge) plus the offset.
fn anchor_coord(field: &str, dimension: Emu, halves: i64, offset: Emu) -> EngineResult<Emu> {
    let base = dimension as i128 * halves as i128 / 2;
    Emu::try_from(base + offset as i128).map_err(|_| {
        EngineError::addressing(field, format!("offset {offset} moves the anchor outside the EMU range"))
    })
}

/// Resolve a position spec into an absolute top-left corner.
pub fn resolve_position(
    spec: &AddressingSpec,
    slide_width: Emu,
    slide_height: Emu,
) -> EngineResult<ResolvedPosition> {
    check_slide(slide_width, slide_height)?;
    let mut warnings = Vec::new();

    let (left, top) = match *spec {
        AddressingSpec::Percentage { left, top } => (
            scale_percent("left", left, slide_width, &mut warnings)?,
            scale_percent("top", top, slide_height, &mut warnings)?,
        ),
        AddressingSpec::Absolute { left, top } => (left, top),
        AddressingSpec::Anchor { anchor, offset_x, offset_y } => {
            let (hx, hy) = anchor.halves();
            (
                anchor_coord("offset_x", slide_width, hx, offset_x)?,
                anchor_coord("offset_y", slide_height, hy, offset_y)?,
            )
        }
        AddressingSpec::Grid { row, col, grid_size } => {
            check_grid("position", grid_size)?;
            if row >= grid_size || col >= grid_size {
                return Err(EngineError::addressing(
                    "position",
                    format!("cell ({row}, {col}) is outside a {grid_size}x{grid_size} grid"),
                ));
            }
            (
                grid_line(slide_width, col, grid_size),
                grid_line(slide_height, row, grid_size),
            )
        }
    };

    Ok(ResolvedPosition { left, top, warnings })
}

/// Resolve a size spec. One `auto` axis yields [`ResolvedSize::Deferred`].
pub fn resolve_size(spec: &SizeSpec, slide_width: Emu, slide_height: Emu) -> EngineResult<SizeResolution> {
    check_slide(slide_width, slide_height)?;
    let mut warnings = Vec::new();

    let size = match *spec {
        SizeSpec::Grid { row_span, col_span, grid_size } => {
            check_grid("size", grid_size)?;
            if row_span < 1 || col_span < 1 || row_span > grid_size || col_span > grid_size {
                return Err(EngineError::addressing(
                    "size",
                    format!("span {row_span}x{col_span} does not fit a {grid_size}x{grid_size} grid"),
                ));
            }
            ResolvedSize::Exact {
                width: grid_line(slide_width, col_span, grid_size),
                height: grid_line(slide_height, row_span, grid_size),
            }
        }
        SizeSpec::Dimensions { width, height } => {
            let mut axis = |field: &str, extent: Extent, dimension: Emu| -> EngineResult<Option<Emu>> {
                match extent {
                    Extent::Auto => Ok(None),
                    Extent::Percent(p) => {
                        if p < 0.0 {
                            return Err(EngineError::addressing(field, format!("negative size {p}%")));
                        }
                        scale_percent(field, p, dimension, &mut warnings).map(Some)
                    }
                    Extent::Absolute(v) if v < 0 => {
                        Err(EngineError::addressing(field, format!("negative size {v}")))
                    }
                    Extent::Absolute(v) => Ok(Some(v)),
                }
            };
            let w = axis("width", width, slide_width)?;
            let h = axis("height", height, slide_height)?;

            match (w, h) {
                (Some(width), Some(height)) => ResolvedSize::Exact { width, height },
                (Some(known), None) => ResolvedSize::Deferred(DeferredAspect { known_axis: Axis::Width, known }),
                (None, Some(known)) => ResolvedSize::Deferred(DeferredAspect { known_axis: Axis::Height, known }),
                (None, None) => {
                    return Err(EngineError::UnderspecifiedSize(
                        "width and height are both auto; at least one axis must be given".to_string(),
                    ))
                }
            }
        }
    };

    Ok(SizeResolution { size, warnings })
}

/// Resolve a size, completing a deferred axis with the asset's aspect ratio.
///
/// Fails with `UnderspecifiedSize` if an axis is `auto` and no ratio is supplied.
pub fn resolve_size_with_aspect(
    spec: &SizeSpec,
    slide_width: Emu,
    slide_height: Emu,
    aspect_ratio: Option<f64>,
) -> EngineResult<(Emu, Emu, Vec<AddressingWarning>)> {
    let resolution = resolve_size(spec, slide_width, slide_height)?;
    let (width, height) = match resolution.size {
        ResolvedSize::Exact { width, height } => (width, height),
        ResolvedSize::Deferred(deferred) => {
            let ratio = aspect_ratio.ok_or_else(|| {
                EngineError::UnderspecifiedSize(format!(
                    "{:?} is auto but no intrinsic aspect ratio was supplied",
                    match deferred.known_axis {
                        Axis::Width => Axis::Height,
                        Axis::Height => Axis::Width,
                    }
                ))
            })?;
            deferred.complete(ratio)?
        }
    };
    Ok((width, height, resolution.warnings))
}

//! Template capability probe.
//!
//! Answers "what layouts does this template offer, and where do their
//! placeholders actually land?" without leaving a trace in the document.
//!
//! ## Modes
//!
//! | Mode | Reads | Mutates |
//! |------|-------|---------|
//! | shallow | declared layouts, master defaults, theme | nothing |
//! | deep | + geometry of a slide realized from each layout | transient slides only |
//!
//! Deep mode realizes one [`TransientSlide`] per layout inside the live
//! document, measures it and removes it again. The guard holds the only
//! mutable borrow of the document for its whole lifetime, so nothing can
//! save the document while a transient slide exists, and its `Drop` removes
//! the slide on every exit path including a panicking measurer.
//!
//! Deep mode runs under a cooperative time budget. When the budget or the
//! layout cap is exhausted, the remaining layouts keep their declared
//! geometry and the snapshot is marked `analysis_complete = false`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::canonical::canonical_hash_hex;
use crate::config::EngineConfig;
use crate::contrast::{aa_threshold, contrast_ratio, Rgb};
use crate::error::{EngineError, EngineResult};
use crate::types::document::is_footer_placeholder;
use crate::types::{Document, Emu, Geometry, Layout, Slide};

/// Probe parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOptions {
    /// Realize layouts to measure placeholder geometry.
    pub deep: bool,
    /// Time budget for deep mode.
    pub timeout: Duration,
    /// Maximum number of layouts realized in deep mode.
    pub max_layouts: usize,
}

impl ProbeOptions {
    /// Options taken from engine configuration.
    pub fn from_config(config: &EngineConfig, deep: bool) -> Self {
        Self {
            deep,
            timeout: config.probe_timeout,
            max_layouts: config.max_probe_layouts,
        }
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default(), false)
    }
}

/// Where a placeholder's geometry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometrySource {
    /// Read from the layout (or inherited from the master).
    Declared,
    /// Measured on a realized slide.
    Measured,
}

/// One placeholder of a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderCapability {
    /// Placeholder type.
    pub kind: String,
    /// Placeholder index.
    pub idx: u32,
    /// Left edge, when known.
    pub left: Option<Emu>,
    /// Top edge, when known.
    pub top: Option<Emu>,
    /// Width, when known.
    pub width: Option<Emu>,
    /// Height, when known.
    pub height: Option<Emu>,
    /// Provenance of the geometry.
    pub source: GeometrySource,
}

impl PlaceholderCapability {
    fn set_geometry(&mut self, geometry: Option<Geometry>, source: GeometrySource) {
        self.left = geometry.map(|g| g.left);
        self.top = geometry.map(|g| g.top);
        self.width = geometry.map(|g| g.width);
        self.height = geometry.map(|g| g.height);
        self.source = source;
    }

    /// Geometry, when all four fields are known.
    pub fn geometry(&self) -> Option<Geometry> {
        Some(Geometry::new(self.left?, self.top?, self.width?, self.height?))
    }
}

/// One layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutCapability {
    /// Layout name.
    pub name: String,
    /// Placeholders in paint order.
    pub placeholders: Vec<PlaceholderCapability>,
}

/// Theme summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeCapability {
    /// Color slot → `RRGGBB`.
    pub colors: BTreeMap<String, String>,
    /// Font role (`major`, `minor`) → typeface.
    pub fonts: BTreeMap<String, String>,
}

/// Probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    /// Stable id of the template (layouts, master, theme).
    pub template_id: String,
    /// Slide width.
    pub slide_width: Emu,
    /// Slide height.
    pub slide_height: Emu,
    /// Layouts in declaration order.
    pub layouts: Vec<LayoutCapability>,
    /// Theme colors and fonts.
    pub theme: ThemeCapability,
    /// `false` when deep mode stopped early.
    pub analysis_complete: bool,
    /// Number of layouts realized and measured.
    pub layouts_measured: usize,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// Placeholder geometry found on a realized slide.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasuredPlaceholder {
    /// Placeholder type.
    pub kind: String,
    /// Placeholder index.
    pub idx: u32,
    /// Realized geometry.
    pub geometry: Option<Geometry>,
}

/// Measures placeholders on a realized slide.
pub trait PlaceholderMeasure {
    /// Measure every placeholder on `slide`.
    fn measure(&self, slide: &Slide) -> EngineResult<Vec<MeasuredPlaceholder>>;
}

/// Reads the geometry a realized slide actually carries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealizedGeometry;

impl PlaceholderMeasure for RealizedGeometry {
    fn measure(&self, slide: &Slide) -> EngineResult<Vec<MeasuredPlaceholder>> {
        Ok(slide
            .shapes()
            .iter()
            .filter_map(|shape| {
                let ph = shape.placeholder()?;
                Some(MeasuredPlaceholder {
                    kind: ph.kind,
                    idx: ph.idx,
                    geometry: shape.geometry(),
                })
            })
            .collect())
    }
}

/// A slide realized from a layout for measurement. Removed on drop.
pub struct TransientSlide<'a> {
    document: &'a mut Document,
    index: usize,
    part_name: String,
}

impl<'a> TransientSlide<'a> {
    /// Realize `layout` as a new last slide of `document`.
    pub fn create(document: &'a mut Document, layout: &Layout) -> Self {
        let slide = document.instantiate_layout(layout);
        let part_name = slide.part_name.clone();
        let index = document.attach_slide(slide);
        debug!(layout = %layout.name, index, "transient slide created");
        Self { document, index, part_name }
    }

    /// The realized slide.
    pub fn slide(&self) -> Option<&Slide> {
        self.document.slide(self.index).filter(|s| s.part_name == self.part_name)
    }
}

impl Drop for TransientSlide<'_> {
    fn drop(&mut self) {
        let index = self
            .document
            .slides()
            .iter()
            .position(|s| s.part_name == self.part_name);
        match index.map(|i| self.document.remove_slide(i)) {
            Some(Ok(_)) => debug!(part = %self.part_name, "transient slide removed"),
            Some(Err(e)) => warn!(part = %self.part_name, error = %e, "failed to remove transient slide"),
            None => warn!(part = %self.part_name, "transient slide already gone"),
        }
    }
}

/// Probe with the default measurer.
pub fn probe(document: &mut Document, options: &ProbeOptions) -> EngineResult<CapabilitySnapshot> {
    probe_with(document, options, &RealizedGeometry)
}

/// Probe with a custom measurer.
pub fn probe_with(
    document: &mut Document,
    options: &ProbeOptions,
    measurer: &dyn PlaceholderMeasure,
) -> EngineResult<CapabilitySnapshot> {
    let slides_before = document.slide_count();
    let template_id = canonical_hash_hex(&(&document.layouts, &document.master, &document.theme))?;
    let mut warnings = theme_warnings(document);
    let mut layouts: Vec<LayoutCapability> =
        document.layouts.iter().map(|l| declared(document, l)).collect();

    let mut analysis_complete = true;
    let mut layouts_measured = 0;

    if options.deep {
        let started = Instant::now();
        let templates = document.layouts.clone();

        for (i, layout) in templates.iter().enumerate() {
            if i >= options.max_layouts {
                analysis_complete = false;
                warnings.push(format!(
                    "layout cap {} reached: {} layout(s) report declared geometry",
                    options.max_layouts,
                    templates.len() - i
                ));
                break;
            }
            if started.elapsed() >= options.timeout {
                analysis_complete = false;
                warnings.push(format!(
                    "probe budget of {}ms exhausted after {i} of {} layouts",
                    options.timeout.as_millis(),
                    templates.len()
                ));
                break;
            }

            let measured = {
                let transient = TransientSlide::create(document, layout);
                let result = match transient.slide() {
                    Some(slide) => measurer.measure(slide),
                    None => Err(EngineError::patch(
                        transient.part_name.clone(),
                        "transient slide not found after insert",
                    )),
                };
                result
            };

            match measured {
                Ok(found) => {
                    apply_measurements(&mut layouts[i], &found);
                    layouts_measured += 1;
                }
                Err(e) => {
                    warn!(layout = %layout.name, error = %e, "placeholder measurement failed");
                    warnings.push(format!("layout '{}': measurement failed ({e}); declared geometry kept", layout.name));
                }
            }
        }

        let slides_after = document.slide_count();
        if slides_after != slides_before {
            return Err(EngineError::ProbeCleanup {
                expected: slides_before,
                actual: slides_after,
            });
        }
    }

    info!(
        template_id = %template_id,
        deep = options.deep,
        layouts = layouts.len(),
        layouts_measured,
        analysis_complete,
        "capability probe finished"
    );

    Ok(CapabilitySnapshot {
        template_id,
        slide_width: document.slide_width,
        slide_height: document.slide_height,
        layouts,
        theme: ThemeCapability {
            colors: document.theme.colors.clone(),
            fonts: BTreeMap::from([
                ("major".to_string(), document.theme.fonts.major.clone()),
                ("minor".to_string(), document.theme.fonts.minor.clone()),
            ]),
        },
        analysis_complete,
        layouts_measured,
        warnings,
    })
}

fn declared(document: &Document, layout: &Layout) -> LayoutCapability {
    let placeholders = layout
        .placeholders
        .iter()
        .map(|ph| {
            let mut cap = PlaceholderCapability {
                kind: ph.kind.clone(),
                idx: ph.idx,
                left: None,
                top: None,
                width: None,
                height: None,
                source: GeometrySource::Declared,
            };
            let geometry = ph.geometry.or_else(|| document.master.geometry_for(&ph.kind));
            cap.set_geometry(geometry, GeometrySource::Declared);
            cap
        })
        .collect();
    LayoutCapability { name: layout.name.clone(), placeholders }
}

fn apply_measurements(layout: &mut LayoutCapability, found: &[MeasuredPlaceholder]) {
    for cap in layout.placeholders.iter_mut() {
        if is_footer_placeholder(&cap.kind) {
            continue;
        }
        if let Some(m) = found.iter().find(|m| m.idx == cap.idx && m.kind == cap.kind) {
            cap.set_geometry(m.geometry, GeometrySource::Measured);
        }
    }
}

fn theme_warnings(document: &Document) -> Vec<String> {
    let colors = &document.theme.colors;
    let pair = colors
        .get("dk1")
        .and_then(|c| Rgb::from_hex(c))
        .zip(colors.get("lt1").and_then(|c| Rgb::from_hex(c)));
    match pair {
        Some((text, background)) => {
            let ratio = contrast_ratio(text, background);
            if ratio < aa_threshold(false) {
                vec![format!("theme text color dk1 on lt1 has contrast {ratio:.2}:1, below 4.5:1")]
            } else {
                Vec::new()
            }
        }
        None => vec!["theme is missing a valid dk1/lt1 color pair".to_string()],
    }
}

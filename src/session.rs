//! Mutation sessions: the single-writer envelope around every edit.
//!
//! ## Session flow
//!
//! ```text
//! with_session(path, run)
//!   ├─ acquire <path>.lock          (bounded wait, else LockContention)
//!   ├─ open document, observe ledger
//!   ├─ run(&mut MutationSession)     (each call: version → index → approval → mutate)
//!   ├─ save if anything changed      (ledger records the saved version)
//!   └─ release lock                  (guard drop, every exit path)
//! ```
//!
//! An error from `run` discards the in-memory document; nothing is saved.
//!
//! ## Per-call checks
//!
//! Each mutation takes an optional expected [`VersionToken`]. The token is
//! compared before anything changes. Slide and shape references are then
//! checked against the ledger, destructive calls are gated on approval, and
//! only then is the document touched. A successful call returns a
//! [`MutationReport`] with the new token and the scopes it invalidated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::approval::{authorize, ApprovalToken, ApprovalVerifier, DenyAll, DestructiveOperation};
use crate::config::EngineConfig;
use crate::contrast::Rgb;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::fingerprint;
use crate::lifecycle::{IndexScope, OperationKind, ShapeRef, SlideRef, StructuralChange};
use crate::lock::DocumentLock;
use crate::patcher::{Channel, ReorderAction, TreePatcher};
use crate::probe::{probe, CapabilitySnapshot, ProbeOptions};
use crate::resolver::{resolve_position, resolve_size_with_aspect};
use crate::types::{
    AddressingSpec, Document, Emu, Geometry, NewShape, PlaceholderRef, ShapeKind, SizeSpec, VersionToken,
};

// ─────────────────────────────────────────────────────────────────────────────
// Requests and reports
// ─────────────────────────────────────────────────────────────────────────────

/// A shape to add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeRequest {
    /// Where the top-left corner goes.
    pub position: AddressingSpec,
    /// How big the shape is.
    pub size: SizeSpec,
    /// Intrinsic `width / height` of the asset, for an `auto` axis.
    #[serde(default)]
    pub aspect_ratio: Option<f64>,
    /// Autoshape preset, or `None` for a text box.
    #[serde(default)]
    pub preset: Option<String>,
    /// Initial text.
    #[serde(default)]
    pub text: Option<String>,
    /// Solid fill `RRGGBB`.
    #[serde(default)]
    pub fill: Option<String>,
    /// Fill opacity in `0.0..=1.0`.
    #[serde(default)]
    pub opacity: Option<f64>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl ShapeRequest {
    /// Rectangle at `position` with `size`.
    pub fn rect(position: AddressingSpec, size: SizeSpec) -> Self {
        Self {
            position,
            size,
            aspect_ratio: None,
            preset: Some("rect".to_string()),
            text: None,
            fill: None,
            opacity: None,
            name: None,
        }
    }

    /// Text box at `position` with `size`.
    pub fn text_box(position: AddressingSpec, size: SizeSpec, text: impl Into<String>) -> Self {
        Self {
            preset: None,
            text: Some(text.into()),
            ..Self::rect(position, size)
        }
    }
}

/// Outcome of one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationReport {
    /// The operation performed.
    pub operation: OperationKind,
    /// Version after the call.
    pub version: VersionToken,
    /// Version before the call.
    pub previous_version: VersionToken,
    /// Whether any index scope was invalidated.
    pub structural: bool,
    /// Scopes whose references are now stale.
    pub invalidated: Vec<IndexScope>,
    /// A reference now addresses a different object than before the call.
    pub index_meaning_changed: bool,
    /// The number of slides or shapes changed.
    pub count_changed: bool,
    /// Reference to a slide the call created.
    pub created_slide: Option<SlideRef>,
    /// Reference to a shape the call created.
    pub created_shape: Option<ShapeRef>,
    /// Non-fatal notes (e.g. off-slide placement).
    pub warnings: Vec<String>,
}

/// One shape in a [`DocumentIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeEntry {
    /// Fresh reference.
    pub shape: ShapeRef,
    /// Shape kind.
    pub kind: ShapeKind,
    /// Display name.
    pub name: String,
    /// Explicit geometry, if any.
    pub geometry: Option<Geometry>,
    /// Text content.
    pub text: String,
    /// Placeholder marker, if any.
    pub placeholder: Option<PlaceholderRef>,
}

/// One slide in a [`DocumentIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideEntry {
    /// Fresh reference.
    pub slide: SlideRef,
    /// Layout name.
    pub layout: String,
    /// Shapes in paint order.
    pub shapes: Vec<ShapeEntry>,
}

/// Fresh references to everything in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentIndex {
    /// Version the references were issued at.
    pub version: VersionToken,
    /// Slide width.
    pub slide_width: Emu,
    /// Slide height.
    pub slide_height: Emu,
    /// Slides in order.
    pub slides: Vec<SlideEntry>,
}

impl DocumentIndex {
    /// Shape reference by position.
    pub fn shape(&self, slide: usize, shape: usize) -> Option<ShapeRef> {
        self.slides.get(slide)?.shapes.get(shape).map(|s| s.shape)
    }

    /// Slide reference by position.
    pub fn slide(&self, slide: usize) -> Option<SlideRef> {
        self.slides.get(slide).map(|s| s.slide)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point: configuration plus the approval verifier.
#[derive(Clone)]
pub struct DeckEngine {
    config: EngineConfig,
    verifier: Arc<dyn ApprovalVerifier>,
}

impl std::fmt::Debug for DeckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeckEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Default for DeckEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DeckEngine {
    /// Engine that refuses every destructive operation.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            verifier: Arc::new(DenyAll),
        }
    }

    /// Builder: approval verifier.
    pub fn with_verifier(mut self, verifier: impl ApprovalVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a new document file. Fails if the path already exists.
    pub fn create(&self, path: impl AsRef<Path>, document: &Document) -> EngineResult<VersionToken> {
        let path = path.as_ref();
        if path.exists() {
            return Err(EngineError::parameter(
                "path",
                format!("{} already exists", path.display()),
            ));
        }
        let mut document = document.clone();
        let version = fingerprint(&document);
        let slides = document.slide_count();
        document.ledger_mut().observe(version, slides);
        document.save(path)?;
        info!(path = %path.display(), version = %version, "document created");
        Ok(version)
    }

    /// Run `run` against the document at `path` under its exclusive lock.
    ///
    /// The document is saved after `run` returns `Ok` if anything changed.
    /// The lock is released on every path.
    pub fn with_session<T, F>(&self, path: impl AsRef<Path>, run: F) -> EngineResult<T>
    where
        F: FnOnce(&mut MutationSession<'_>) -> EngineResult<T>,
    {
        let path = path.as_ref();
        let session_id = Uuid::new_v4();
        let span = info_span!("session", %session_id, path = %path.display());
        let _entered = span.enter();

        let _lock = DocumentLock::acquire(
            path,
            session_id,
            self.config.lock_wait,
            self.config.lock_poll_interval,
            self.config.stale_lock_after,
        )?;

        let mut document = Document::open(path)?;
        let opened_at = fingerprint(&document);
        let slides = document.slide_count();
        let realigned = document.ledger_mut().observe(opened_at, slides);
        if !realigned.is_empty() {
            // Generations handed out from here on must survive this session.
            document.save(path)?;
            debug!(scopes = realigned.len(), "realigned ledger saved");
        }
        info!(
            version = %opened_at.short(self.config.token_display_len),
            slides,
            realigned = realigned.len(),
            config = %self.config.params_hash(),
            "session opened"
        );

        let mut session = MutationSession {
            engine: self,
            path: path.to_path_buf(),
            document,
            patcher: TreePatcher::new(),
            dirty: false,
        };

        let output = run(&mut session)?;

        if session.dirty {
            let version = fingerprint(&session.document);
            session.document.ledger_mut().record(version);
            session.document.save(path)?;
            info!(version = %version.short(self.config.token_display_len), "session saved");
        } else {
            debug!("session made no changes");
        }
        Ok(output)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// An open, exclusively held document.
pub struct MutationSession<'e> {
    engine: &'e DeckEngine,
    path: PathBuf,
    document: Document,
    patcher: TreePatcher,
    dirty: bool,
}

impl MutationSession<'_> {
    /// Read access to the document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Current version token.
    pub fn version(&self) -> VersionToken {
        fingerprint(&self.document)
    }

    /// Whether the session will save on exit.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Fresh references to every slide and shape, bound to the current version.
    pub fn refresh(&self) -> DocumentIndex {
        let version = self.version();
        let ledger = self.document.ledger();
        let slides = self
            .document
            .slides()
            .iter()
            .enumerate()
            .map(|(s, slide)| SlideEntry {
                slide: ledger.slide_ref(s, version),
                layout: slide.layout.clone(),
                shapes: slide
                    .shapes()
                    .iter()
                    .enumerate()
                    .map(|(i, shape)| ShapeEntry {
                        shape: ledger.shape_ref(s, i, version),
                        kind: shape.kind(),
                        name: shape.name().to_string(),
                        geometry: shape.geometry(),
                        text: shape.text(),
                        placeholder: shape.placeholder(),
                    })
                    .collect(),
            })
            .collect();

        DocumentIndex {
            version,
            slide_width: self.document.slide_width,
            slide_height: self.document.slide_height,
            slides,
        }
    }

    // ── checks ──────────────────────────────────────────────────────────────

    fn check_version(&self, expected: Option<VersionToken>) -> EngineResult<VersionToken> {
        let actual = self.version();
        match expected {
            Some(expected) if expected != actual => Err(EngineError::VersionConflict {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            }),
            _ => Ok(actual),
        }
    }

    fn check_slide(&self, slide: &SlideRef) -> EngineResult<usize> {
        let index = self.document.ledger().check_slide(slide)?;
        if index >= self.document.slide_count() {
            return Err(EngineError::parameter(
                "slide",
                format!("no slide {index} (count {})", self.document.slide_count()),
            ));
        }
        Ok(index)
    }

    fn check_shape(&self, shape: &ShapeRef) -> EngineResult<(usize, usize)> {
        let (slide, index) = self.document.ledger().check_shape(shape)?;
        let count = self.document.slide(slide).map_or(0, |s| s.shape_count());
        if index >= count {
            return Err(EngineError::parameter(
                "shape",
                format!("no shape {index} on slide {slide} (count {count})"),
            ));
        }
        Ok((slide, index))
    }

    fn approve(&self, kind: OperationKind, target: String, approval: Option<&ApprovalToken>) -> EngineResult<()> {
        let operation = DestructiveOperation {
            kind,
            target,
            document: self.path.display().to_string(),
        };
        authorize(self.engine.verifier.as_ref(), &operation, approval)
    }

    fn current_geometry(&self, slide: usize, shape: usize) -> EngineResult<Geometry> {
        self.document
            .slide(slide)
            .and_then(|s| s.shape(shape))
            .and_then(|s| s.geometry())
            .ok_or_else(|| {
                EngineError::parameter(
                    "shape",
                    format!("shape {shape} on slide {slide} inherits its geometry; set an explicit size first"),
                )
            })
    }

    // ── reporting ───────────────────────────────────────────────────────────

    fn finish(
        &mut self,
        operation: OperationKind,
        previous_version: VersionToken,
        changes: &[StructuralChange],
        warnings: Vec<String>,
    ) -> MutationReport {
        let mut invalidated: Vec<IndexScope> = changes
            .iter()
            .flat_map(|c| self.document.ledger_mut().apply(*c))
            .collect();
        invalidated.sort();
        invalidated.dedup();

        let version = self.version();
        self.dirty = true;

        let structural = !invalidated.is_empty();
        info!(
            operation = %operation,
            version = %version.short(self.engine.config.token_display_len),
            structural,
            invalidated = invalidated.len(),
            "mutation applied"
        );

        MutationReport {
            operation,
            version,
            previous_version,
            structural,
            invalidated,
            index_meaning_changed: structural,
            count_changed: structural && operation.changes_count(),
            created_slide: None,
            created_shape: None,
            warnings,
        }
    }

    fn unchanged(&self, operation: OperationKind, version: VersionToken, warnings: Vec<String>) -> MutationReport {
        debug!(operation = %operation, "mutation was a no-op");
        MutationReport {
            operation,
            version,
            previous_version: version,
            structural: false,
            invalidated: Vec::new(),
            index_meaning_changed: false,
            count_changed: false,
            created_slide: None,
            created_shape: None,
            warnings,
        }
    }

    // ── shapes ──────────────────────────────────────────────────────────────

    /// Add a shape on top of the paint order of `slide`.
    pub fn add_shape(
        &mut self,
        slide: SlideRef,
        request: &ShapeRequest,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let s = self.check_slide(&slide)?;

        let (w, h) = (self.document.slide_width, self.document.slide_height);
        let position = resolve_position(&request.position, w, h)?;
        let (width, height, size_warnings) = resolve_size_with_aspect(&request.size, w, h, request.aspect_ratio)?;
        if let Some(fill) = &request.fill {
            validate_color(fill)?;
        }
        if let Some(alpha) = request.opacity {
            validate_alpha(alpha)?;
        }

        let warnings = position
            .warnings
            .iter()
            .chain(size_warnings.iter())
            .map(|w| w.to_string())
            .collect();

        let index = self.document.add_shape(
            s,
            NewShape {
                preset: request.preset.clone(),
                geometry: Geometry::new(position.left, position.top, width, height),
                text: request.text.clone(),
                fill: request.fill.clone(),
                name: request.name.clone(),
            },
        )?;

        if let Some(alpha) = request.opacity {
            let applied = match self.document.slide_mut(s) {
                Some(target) => self.patcher.set_alpha(&mut target.tree, index, Channel::Fill, alpha).map(|_| ()),
                None => Err(EngineError::parameter("slide", format!("no slide {s}"))),
            };
            if let Err(e) = applied {
                self.document.remove_shape(s, index)?;
                return Err(e);
            }
        }

        let mut report = self.finish(
            OperationKind::AddShape,
            before,
            &[StructuralChange::ShapesChanged { slide: s }],
            warnings,
        );
        report.created_shape = Some(self.document.ledger().shape_ref(s, index, report.version));
        Ok(report)
    }

    /// Move a shape, keeping its size.
    pub fn move_shape(
        &mut self,
        shape: ShapeRef,
        position: &AddressingSpec,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        let current = self.current_geometry(s, i)?;

        let resolved = resolve_position(position, self.document.slide_width, self.document.slide_height)?;
        let target = Geometry { left: resolved.left, top: resolved.top, ..current };
        let warnings = resolved.warnings.iter().map(|w| w.to_string()).collect();
        if target == current {
            return Ok(self.unchanged(OperationKind::MoveShape, before, warnings));
        }

        self.document.set_shape_geometry(s, i, target)?;
        Ok(self.finish(OperationKind::MoveShape, before, &[], warnings))
    }

    /// Resize a shape, keeping its top-left corner.
    ///
    /// An `auto` axis uses `aspect_ratio`, or the shape's current proportions.
    pub fn resize_shape(
        &mut self,
        shape: ShapeRef,
        size: &SizeSpec,
        aspect_ratio: Option<f64>,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        let current = self.current_geometry(s, i)?;

        let ratio = aspect_ratio.or_else(|| {
            (current.width > 0 && current.height > 0).then(|| current.width as f64 / current.height as f64)
        });
        let (width, height, warnings) =
            resolve_size_with_aspect(size, self.document.slide_width, self.document.slide_height, ratio)?;
        let warnings = warnings.iter().map(|w| w.to_string()).collect();
        let target = Geometry { width, height, ..current };
        if target == current {
            return Ok(self.unchanged(OperationKind::ResizeShape, before, warnings));
        }

        self.document.set_shape_geometry(s, i, target)?;
        Ok(self.finish(OperationKind::ResizeShape, before, &[], warnings))
    }

    /// Replace a shape's text.
    pub fn set_text(
        &mut self,
        shape: ShapeRef,
        text: &str,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        self.document.set_shape_text(s, i, text)?;
        Ok(self.finish(OperationKind::SetText, before, &[], Vec::new()))
    }

    /// Set a solid fill color.
    pub fn set_fill(
        &mut self,
        shape: ShapeRef,
        rgb: &str,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        validate_color(rgb)?;
        self.document.set_fill_color(s, i, rgb)?;
        Ok(self.finish(OperationKind::SetFill, before, &[], Vec::new()))
    }

    /// Set fill or line opacity.
    pub fn set_opacity(
        &mut self,
        shape: ShapeRef,
        channel: Channel,
        alpha: f64,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        let slide = self
            .document
            .slide_mut(s)
            .ok_or_else(|| EngineError::parameter("slide", format!("no slide {s}")))?;
        let outcome = self.patcher.set_alpha(&mut slide.tree, i, channel, alpha)?;
        if !outcome.changed {
            return Ok(self.unchanged(OperationKind::SetOpacity, before, Vec::new()));
        }
        Ok(self.finish(OperationKind::SetOpacity, before, &[], Vec::new()))
    }

    /// Change a shape's paint order.
    ///
    /// The shape count is unchanged, but every shape index on the slide may
    /// now address a different shape, so the slide's shape scope is
    /// invalidated. At a boundary the call is a no-op.
    pub fn reorder_shape(
        &mut self,
        shape: ShapeRef,
        action: ReorderAction,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        let slide = self
            .document
            .slide_mut(s)
            .ok_or_else(|| EngineError::parameter("slide", format!("no slide {s}")))?;
        let outcome = self.patcher.reorder(&mut slide.tree, i, action)?;
        if !outcome.moved {
            return Ok(self.unchanged(
                OperationKind::ReorderShape,
                before,
                vec![format!("shape {i} is already at the boundary for {action:?}")],
            ));
        }
        Ok(self.finish(
            OperationKind::ReorderShape,
            before,
            &[StructuralChange::ShapesReordered { slide: s }],
            Vec::new(),
        ))
    }

    /// Remove a shape. Requires approval.
    pub fn remove_shape(
        &mut self,
        shape: ShapeRef,
        approval: Option<&ApprovalToken>,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let (s, i) = self.check_shape(&shape)?;
        self.approve(OperationKind::RemoveShape, format!("slide {s} shape {i}"), approval)?;
        self.document.remove_shape(s, i)?;
        Ok(self.finish(
            OperationKind::RemoveShape,
            before,
            &[StructuralChange::ShapesChanged { slide: s }],
            Vec::new(),
        ))
    }

    // ── slides ──────────────────────────────────────────────────────────────

    /// Append a slide realized from a layout.
    pub fn add_slide(&mut self, layout: &str, expected: Option<VersionToken>) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let index = self.document.add_slide(layout)?;
        let mut report = self.finish(
            OperationKind::AddSlide,
            before,
            &[StructuralChange::SlideInserted { at: index }],
            Vec::new(),
        );
        report.created_slide = Some(self.document.ledger().slide_ref(index, report.version));
        Ok(report)
    }

    /// Remove a slide. Requires approval.
    pub fn remove_slide(
        &mut self,
        slide: SlideRef,
        approval: Option<&ApprovalToken>,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let s = self.check_slide(&slide)?;
        self.approve(OperationKind::RemoveSlide, format!("slide {s}"), approval)?;
        self.document.remove_slide(s)?;
        Ok(self.finish(
            OperationKind::RemoveSlide,
            before,
            &[StructuralChange::SlideRemoved { at: s }],
            Vec::new(),
        ))
    }

    /// Move a slide to position `to`.
    pub fn move_slide(
        &mut self,
        slide: SlideRef,
        to: usize,
        expected: Option<VersionToken>,
    ) -> EngineResult<MutationReport> {
        let before = self.check_version(expected)?;
        let from = self.check_slide(&slide)?;
        if from == to {
            return Ok(self.unchanged(OperationKind::MoveSlide, before, Vec::new()));
        }
        self.document.move_slide(from, to)?;
        Ok(self.finish(
            OperationKind::MoveSlide,
            before,
            &[StructuralChange::SlideMoved { from, to }],
            Vec::new(),
        ))
    }

    // ── probing ─────────────────────────────────────────────────────────────

    /// Probe template capabilities. Leaves the document unchanged.
    pub fn probe(&mut self, deep: bool) -> EngineResult<CapabilitySnapshot> {
        let options = ProbeOptions::from_config(&self.engine.config, deep);
        self.probe_with_options(&options)
    }

    /// Probe with explicit options.
    pub fn probe_with_options(&mut self, options: &ProbeOptions) -> EngineResult<CapabilitySnapshot> {
        probe(&mut self.document, options)
    }
}

fn validate_color(rgb: &str) -> EngineResult<()> {
    Rgb::from_hex(rgb)
        .map(|_| ())
        .ok_or_else(|| EngineError::parameter("fill", format!("expected RRGGBB, got {rgb:?}")))
}

fn validate_alpha(alpha: f64) -> EngineResult<()> {
    if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
        return Err(EngineError::parameter("opacity", format!("must be within 0.0..=1.0, got {alpha}")));
    }
    Ok(())
}

//! Lifecycle of positional slide and shape indices.
//!
//! Slides and shapes have no stable identity: a shape is "index 2 on slide
//! 0" until something is inserted, removed or reordered before it. Indices
//! are therefore handed out as short-lived references tagged with a
//! generation, and every structural edit bumps the generation of the scope it
//! touched. A reference whose generation no longer matches is stale and is
//! rejected with `StaleIndexUsed`; it is never silently renumbered.
//!
//! ## Invalidation rules
//!
//! | Edit | Invalidated |
//! |------|-------------|
//! | slide insert / remove / move | slide indices + shape indices on every slide |
//! | shape insert / remove / z-order on slide S | shape indices on S only |
//! | text, geometry, fill, opacity | nothing |
//!
//! Generations come from one monotonically increasing counter, so a scope can
//! never return to a generation it held before. The ledger is persisted with
//! the document, which lets independent stateless invocations share it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::types::VersionToken;

/// A family of positional indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum IndexScope {
    /// Slide indices within the document.
    Slides,
    /// Shape indices within one slide.
    Shapes {
        /// Slide position.
        slide: usize,
    },
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slides => write!(f, "slides"),
            Self::Shapes { slide } => write!(f, "shapes@slide{slide}"),
        }
    }
}

/// Validity of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "version", rename_all = "snake_case")]
pub enum IndexState {
    /// Valid; confirmed at this version.
    Fresh(VersionToken),
    /// Invalidated by a structural edit since it was issued.
    Stale,
}

/// Engine operations, classified by their effect on indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Add a shape.
    AddShape,
    /// Remove a shape.
    RemoveShape,
    /// Change a shape's paint order.
    ReorderShape,
    /// Add a slide.
    AddSlide,
    /// Remove a slide.
    RemoveSlide,
    /// Move a slide.
    MoveSlide,
    /// Move a shape.
    MoveShape,
    /// Resize a shape.
    ResizeShape,
    /// Replace a shape's text.
    SetText,
    /// Set a shape's fill color.
    SetFill,
    /// Set fill or line opacity.
    SetOpacity,
}

impl OperationKind {
    /// Whether the operation adds, removes or reorders slides or shapes.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::AddShape
                | Self::RemoveShape
                | Self::ReorderShape
                | Self::AddSlide
                | Self::RemoveSlide
                | Self::MoveSlide
        )
    }

    /// Whether the operation needs an approval credential.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::RemoveShape | Self::RemoveSlide)
    }

    /// Whether the operation changes the number of slides or shapes.
    pub fn changes_count(&self) -> bool {
        matches!(
            self,
            Self::AddShape | Self::RemoveShape | Self::AddSlide | Self::RemoveSlide
        )
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddShape => "add_shape",
            Self::RemoveShape => "remove_shape",
            Self::ReorderShape => "reorder_shape",
            Self::AddSlide => "add_slide",
            Self::RemoveSlide => "remove_slide",
            Self::MoveSlide => "move_slide",
            Self::MoveShape => "move_shape",
            Self::ResizeShape => "resize_shape",
            Self::SetText => "set_text",
            Self::SetFill => "set_fill",
            Self::SetOpacity => "set_opacity",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structural edit, as seen by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralChange {
    /// A slide was inserted at `at`.
    SlideInserted {
        /// Insert position.
        at: usize,
    },
    /// The slide at `at` was removed.
    SlideRemoved {
        /// Former position.
        at: usize,
    },
    /// A slide moved.
    SlideMoved {
        /// Former position.
        from: usize,
        /// New position.
        to: usize,
    },
    /// A shape was added to or removed from a slide.
    ShapesChanged {
        /// Slide position.
        slide: usize,
    },
    /// A slide's shapes were reordered.
    ShapesReordered {
        /// Slide position.
        slide: usize,
    },
}

/// Reference to a slide, valid until the next slide-level structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlideRef {
    index: usize,
    generation: u64,
    version: VersionToken,
}

impl SlideRef {
    /// Positional index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Generation the reference was issued under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Version token the reference was read under.
    pub fn version(&self) -> VersionToken {
        self.version
    }
}

/// Reference to a shape, valid until the next structural edit on its slide
/// (or any slide-level structural edit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeRef {
    slide: SlideRef,
    index: usize,
    generation: u64,
}

impl ShapeRef {
    /// Slide the shape is on.
    pub fn slide(&self) -> SlideRef {
        self.slide
    }

    /// Positional index within the slide.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Shape-scope generation the reference was issued under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Version token the reference was read under.
    pub fn version(&self) -> VersionToken {
        self.slide.version
    }
}

/// Persisted generation counters for every index scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexLedger {
    counter: u64,
    slide_generation: u64,
    shape_generations: Vec<u64>,
    /// Version the document had when the ledger was last saved with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seen: Option<VersionToken>,
}

impl IndexLedger {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Current slide-scope generation.
    pub fn slide_generation(&self) -> u64 {
        self.slide_generation
    }

    /// Current shape-scope generation for a slide.
    pub fn shape_generation(&self, slide: usize) -> Option<u64> {
        self.shape_generations.get(slide).copied()
    }

    /// Align the ledger with a document whose slide count it has not seen
    /// (a file written without a ledger, or edited by another tool).
    ///
    /// Returns the scopes invalidated by the realignment.
    pub fn reconcile(&mut self, slide_count: usize) -> Vec<IndexScope> {
        if self.shape_generations.len() == slide_count && self.counter > 0 {
            return Vec::new();
        }
        let before = self.shape_generations.len();
        self.slide_generation = self.next();
        self.shape_generations = vec![0; slide_count];
        for i in 0..slide_count {
            self.shape_generations[i] = self.next();
        }
        all_scopes(before.max(slide_count))
    }

    /// Align the ledger with a freshly opened document.
    ///
    /// A version that differs from the one recorded at the last save means
    /// another tool edited the file, so every scope is invalidated.
    pub fn observe(&mut self, version: VersionToken, slide_count: usize) -> Vec<IndexScope> {
        let external = matches!(self.seen, Some(seen) if seen != version);
        let mut scopes = self.reconcile(slide_count);
        if external && scopes.is_empty() {
            scopes = self.invalidate_all(slide_count);
        }
        self.seen = Some(version);
        scopes
    }

    /// Remember the version the document is saved at.
    pub fn record(&mut self, version: VersionToken) {
        self.seen = Some(version);
    }

    /// Record a structural edit. Returns every scope it invalidated.
    pub fn apply(&mut self, change: StructuralChange) -> Vec<IndexScope> {
        match change {
            StructuralChange::SlideInserted { at } => {
                let at = at.min(self.shape_generations.len());
                let generation = self.next();
                self.shape_generations.insert(at, generation);
                self.invalidate_all(self.shape_generations.len())
            }
            StructuralChange::SlideRemoved { at } => {
                let before = self.shape_generations.len();
                if at < before {
                    self.shape_generations.remove(at);
                }
                self.invalidate_all(before)
            }
            StructuralChange::SlideMoved { from, to } => {
                let len = self.shape_generations.len();
                if from < len && to < len {
                    let g = self.shape_generations.remove(from);
                    self.shape_generations.insert(to, g);
                }
                self.invalidate_all(len)
            }
            StructuralChange::ShapesChanged { slide } | StructuralChange::ShapesReordered { slide } => {
                let generation = self.next();
                if let Some(g) = self.shape_generations.get_mut(slide) {
                    *g = generation;
                }
                vec![IndexScope::Shapes { slide }]
            }
        }
    }

    fn invalidate_all(&mut self, reported_slides: usize) -> Vec<IndexScope> {
        self.slide_generation = self.next();
        for i in 0..self.shape_generations.len() {
            self.shape_generations[i] = self.next();
        }
        all_scopes(reported_slides)
    }

    /// Issue a slide reference at the current generation.
    pub fn slide_ref(&self, index: usize, version: VersionToken) -> SlideRef {
        SlideRef {
            index,
            generation: self.slide_generation,
            version,
        }
    }

    /// Issue a shape reference at the current generation.
    pub fn shape_ref(&self, slide: usize, index: usize, version: VersionToken) -> ShapeRef {
        ShapeRef {
            slide: self.slide_ref(slide, version),
            index,
            generation: self.shape_generation(slide).unwrap_or(0),
        }
    }

    /// Validity of a slide reference.
    pub fn slide_state(&self, r: &SlideRef) -> IndexState {
        if r.generation == self.slide_generation {
            IndexState::Fresh(r.version)
        } else {
            IndexState::Stale
        }
    }

    /// Validity of a shape reference.
    pub fn shape_state(&self, r: &ShapeRef) -> IndexState {
        match self.slide_state(&r.slide) {
            IndexState::Fresh(v) if self.shape_generation(r.slide.index) == Some(r.generation) => {
                IndexState::Fresh(v)
            }
            _ => IndexState::Stale,
        }
    }

    /// Check a slide reference; returns its index if still valid.
    pub fn check_slide(&self, r: &SlideRef) -> EngineResult<usize> {
        if r.generation != self.slide_generation {
            return Err(EngineError::StaleIndexUsed {
                scope: IndexScope::Slides,
                index: r.index,
                issued_generation: r.generation,
                current_generation: self.slide_generation,
            });
        }
        Ok(r.index)
    }

    /// Check a shape reference; returns `(slide, shape)` if still valid.
    pub fn check_shape(&self, r: &ShapeRef) -> EngineResult<(usize, usize)> {
        let slide = self.check_slide(&r.slide)?;
        let current = self.shape_generation(slide).unwrap_or(0);
        if r.generation != current {
            return Err(EngineError::StaleIndexUsed {
                scope: IndexScope::Shapes { slide },
                index: r.index,
                issued_generation: r.generation,
                current_generation: current,
            });
        }
        Ok((slide, r.index))
    }
}

fn all_scopes(slides: usize) -> Vec<IndexScope> {
    std::iter::once(IndexScope::Slides)
        .chain((0..slides).map(|slide| IndexScope::Shapes { slide }))
        .collect()
}

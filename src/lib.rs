//! # deck-mutation-kernel
//!
//! Safe, stateless mutation of presentation documents.
//!
//! The kernel answers one question for every caller invocation:
//!
//! > Given the document as the caller last saw it, can this edit be applied
//! > **without clobbering anyone else's work or addressing the wrong shape**?
//!
//! ## Core Contract
//!
//! 1. Resolve heterogeneous addressing (percent, absolute, anchor, grid) into slide coordinates
//! 2. Fingerprint the document so stale callers fail with `VersionConflict` before any change
//! 3. Tag every positional index with a generation and reject it once a structural edit invalidates it
//! 4. Patch the markup tree directly for opacity and paint order, all-or-nothing
//! 5. Probe template layouts with transient slides that never outlive the probe
//!
//! ## Architecture
//!
//! ```text
//! DeckEngine::with_session ─ DocumentLock ─ Document::open
//!        │
//!        ▼
//! MutationSession ─► resolver ─► Document / TreePatcher ─► fingerprint ─► IndexLedger
//!        │
//!        └─► probe (TransientSlide guard)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same document bytes → identical version token
//! - Same addressing spec + slide size → identical coordinates
//! - Index generations are drawn from one monotonic counter persisted with the document

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod resolver;
pub mod fingerprint;
pub mod lifecycle;
pub mod patcher;
pub mod probe;
pub mod lock;
pub mod approval;
pub mod session;
pub mod contrast;
pub mod canonical;
pub mod config;
pub mod telemetry;

// Re-exports
pub use types::{
    AddressingSpec, AnchorPoint, Document, Emu, Extent, Geometry, MarkupNode, NewShape,
    ShapeKind, SizeSpec, Slide, VersionToken,
};
pub use error::{EngineError, EngineResult};
pub use resolver::{
    resolve_position, resolve_size, resolve_size_with_aspect, AddressingWarning, DeferredAspect,
    ResolvedPosition, ResolvedSize,
};
pub use fingerprint::{fingerprint, snapshot, FINGERPRINT_VERSION};
pub use lifecycle::{IndexLedger, IndexScope, IndexState, OperationKind, ShapeRef, SlideRef};
pub use patcher::{Channel, ReorderAction, TreePatcher, ALPHA_OPAQUE};
pub use probe::{
    probe, probe_with, CapabilitySnapshot, GeometrySource, PlaceholderMeasure, ProbeOptions,
};
pub use lock::{DocumentLock, LockHolder};
pub use approval::{ApprovalToken, ApprovalVerifier, DenyAll, DestructiveOperation};
pub use session::{DeckEngine, DocumentIndex, MutationReport, MutationSession, ShapeRequest};
pub use contrast::{contrast_ratio, Rgb};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use config::EngineConfig;

/// Schema version for the persisted document and report types.
/// Increment on breaking changes to any schema type.
pub const ENGINE_SCHEMA_VERSION: &str = "1.0.0";

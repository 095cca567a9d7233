//! Error taxonomy for the mutation engine.
//!
//! Every variant carries enough structured detail (expected vs. actual
//! version, index generations, attempted node path) for a caller to decide
//! whether to retry, refresh, or abort. The engine itself never retries.

use std::path::PathBuf;

use crate::lifecycle::IndexScope;
use crate::lock::LockHolder;

/// Error type for all engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed or out-of-domain addressing spec (caller error).
    #[error("Invalid addressing for `{field}`: {reason}")]
    InvalidAddressing {
        /// Spec field that failed to resolve.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Both axes of a size request are `auto`, or `auto` was used without an aspect ratio.
    #[error("Underspecified size: {0}")]
    UnderspecifiedSize(String),

    /// The caller's expected version token does not match the document.
    #[error("Version conflict: expected {expected}, document is at {actual}")]
    VersionConflict {
        /// Token supplied by the caller.
        expected: String,
        /// Token computed from the document before mutating.
        actual: String,
    },

    /// Another session holds the document.
    #[error("Document {path} is locked by another session")]
    LockContention {
        /// Path of the contended document.
        path: PathBuf,
        /// Holder metadata, when the lock file was readable.
        holder: Option<LockHolder>,
    },

    /// An index was used after a structural edit invalidated it.
    #[error(
        "Stale index {index} in scope {scope}: issued at generation {issued_generation}, current is {current_generation}"
    )]
    StaleIndexUsed {
        /// Scope the index belongs to.
        scope: IndexScope,
        /// The index the caller supplied.
        index: usize,
        /// Generation the caller's reference was issued under.
        issued_generation: u64,
        /// Generation the document is at now.
        current_generation: u64,
    },

    /// Destructive operation without (or with a rejected) approval credential.
    #[error("Permission denied for {operation}: {reason}")]
    PermissionDenied {
        /// Operation that was refused.
        operation: String,
        /// Why it was refused.
        reason: String,
    },

    /// The tree patcher could not locate or construct a node. The tree is unchanged.
    #[error("Patch failed at {node_path}: {reason}")]
    PatchFailed {
        /// Node path that was attempted.
        node_path: String,
        /// What went wrong.
        reason: String,
    },

    /// A non-addressing parameter was out of its domain.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested layout does not exist in the document.
    #[error("Unknown layout: {0}")]
    UnknownLayout(String),

    /// A capability probe left the document with a different slide count.
    #[error("Probe cleanup failed: expected {expected} slides, found {actual}")]
    ProbeCleanup {
        /// Slide count before probing.
        expected: usize,
        /// Slide count after probing.
        actual: usize,
    },

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Build an `InvalidAddressing` error.
    pub fn addressing(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddressing {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build an `InvalidParameter` error.
    pub fn parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Build a `PatchFailed` error.
    pub fn patch(node_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PatchFailed {
            node_path: node_path.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may reasonably retry the same request.
    ///
    /// `VersionConflict` needs a re-probe first; `LockContention` needs backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. } | Self::LockContention { .. })
    }

    /// Stable machine-readable code for callers that serialize errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddressing { .. } => "invalid_addressing",
            Self::UnderspecifiedSize(_) => "underspecified_size",
            Self::VersionConflict { .. } => "version_conflict",
            Self::LockContention { .. } => "lock_contention",
            Self::StaleIndexUsed { .. } => "stale_index_used",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::PatchFailed { .. } => "patch_failed",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::UnknownLayout(_) => "unknown_layout",
            Self::ProbeCleanup { .. } => "probe_cleanup",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

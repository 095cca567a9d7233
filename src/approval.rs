//! Approval gate for destructive operations.
//!
//! Removing a shape or a slide requires a caller-supplied credential. The
//! engine does not define how credentials are minted; it hands the
//! credential and a description of the operation to an [`ApprovalVerifier`]
//! and refuses the operation unless the verifier accepts it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::lifecycle::OperationKind;

/// Opaque approval credential.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    /// Wrap a credential string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw credential.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Credentials never reach logs in full.
impl fmt::Debug for ApprovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApprovalToken(<{} bytes>)", self.0.len())
    }
}

/// What a verifier is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestructiveOperation {
    /// The operation.
    pub kind: OperationKind,
    /// Human-readable target, e.g. `slide 2` or `slide 0 shape 1`.
    pub target: String,
    /// Document path.
    pub document: String,
}

/// Decides whether a credential authorizes an operation.
pub trait ApprovalVerifier: Send + Sync {
    /// Return `true` to allow the operation.
    fn verify(&self, operation: &DestructiveOperation, token: &ApprovalToken) -> bool;
}

impl<F> ApprovalVerifier for F
where
    F: Fn(&DestructiveOperation, &ApprovalToken) -> bool + Send + Sync,
{
    fn verify(&self, operation: &DestructiveOperation, token: &ApprovalToken) -> bool {
        self(operation, token)
    }
}

/// Verifier that rejects everything. The engine default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl ApprovalVerifier for DenyAll {
    fn verify(&self, _operation: &DestructiveOperation, _token: &ApprovalToken) -> bool {
        false
    }
}

/// Gate a destructive operation.
///
/// A missing or empty credential is refused without consulting the verifier.
pub fn authorize(
    verifier: &dyn ApprovalVerifier,
    operation: &DestructiveOperation,
    token: Option<&ApprovalToken>,
) -> EngineResult<()> {
    let denied = |reason: &str| {
        warn!(operation = %operation.kind, target = %operation.target, reason, "destructive operation refused");
        Err(EngineError::PermissionDenied {
            operation: operation.kind.to_string(),
            reason: reason.to_string(),
        })
    };

    match token {
        None => denied("approval credential required"),
        Some(t) if t.as_str().trim().is_empty() => denied("approval credential is empty"),
        Some(t) if !verifier.verify(operation, t) => denied("approval credential rejected"),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn op() -> DestructiveOperation {
        DestructiveOperation {
            kind: OperationKind::RemoveSlide,
            target: "slide 0".to_string(),
            document: "deck.json".to_string(),
        }
    }

    #[test]
    fn test_missing_token_skips_verifier() {
        let calls = AtomicUsize::new(0);
        let verifier = |_: &DestructiveOperation, _: &ApprovalToken| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        };
        assert!(matches!(authorize(&verifier, &op(), None), Err(EngineError::PermissionDenied { .. })));
        assert!(authorize(&verifier, &op(), Some(&ApprovalToken::new("  "))).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_verifier_decides() {
        let verifier = |o: &DestructiveOperation, t: &ApprovalToken| {
            o.kind == OperationKind::RemoveSlide && t.as_str() == "ok"
        };
        assert!(authorize(&verifier, &op(), Some(&ApprovalToken::new("ok"))).is_ok());
        assert!(authorize(&verifier, &op(), Some(&ApprovalToken::new("nope"))).is_err());
        assert!(authorize(&DenyAll, &op(), Some(&ApprovalToken::new("ok"))).is_err());
    }

    #[test]
    fn test_debug_hides_credential() {
        let t = ApprovalToken::new("secret-value");
        assert!(!format!("{t:?}").contains("secret"));
    }
}

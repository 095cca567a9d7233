//! Version tokens and the geometry snapshot they are computed from.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::document::{Geometry, ShapeKind};

/// Hex characters shown when a token is displayed.
pub const DEFAULT_DISPLAY_LEN: usize = 16;

/// Opaque SHA-256 digest over a document's geometry snapshot.
///
/// Equality always compares the full 32-byte digest; truncation is only
/// applied by [`fmt::Display`] and [`VersionToken::short`]. Serializes as the
/// full 64-character hex string so round-tripped tokens compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VersionToken([u8; 32]);

impl VersionToken {
    /// Wrap a raw digest.
    pub fn from_digest(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a full 64-character hex token.
    pub fn from_hex(s: &str) -> Result<Self, TokenFormatError> {
        let bytes = hex::decode(s.trim()).map_err(|e| TokenFormatError(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| TokenFormatError(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(arr))
    }

    /// Truncated hex for display.
    pub fn short(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.clamp(1, 64));
        hex
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short(DEFAULT_DISPLAY_LEN))
    }
}

impl From<VersionToken> for String {
    fn from(token: VersionToken) -> Self {
        token.to_hex()
    }
}

impl TryFrom<String> for VersionToken {
    type Error = TokenFormatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

/// A version token string that is not 64 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid version token: {0}")]
pub struct TokenFormatError(pub String);

/// Geometry and text of one shape, as covered by the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeGeometry {
    /// Shape kind.
    pub kind: ShapeKind,
    /// `p:cNvPr@id`, if present and numeric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Explicit geometry, or `None` when inherited.
    pub geometry: Option<Geometry>,
    /// SHA-256 of the text content, or the empty-text sentinel.
    #[serde(with = "hex_digest")]
    pub text_hash: [u8; 32],
}

/// Layout identity and shapes of one slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideGeometry {
    /// Layout name.
    pub layout: String,
    /// Shapes in paint order.
    pub shapes: Vec<ShapeGeometry>,
}

/// Derived, non-owned view of a document's structure, geometry and text.
///
/// Recomputed on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometrySnapshot {
    /// Slide width.
    pub slide_width: i64,
    /// Slide height.
    pub slide_height: i64,
    /// Slides in order.
    pub slides: Vec<SlideGeometry>,
}

impl GeometrySnapshot {
    /// Number of slides.
    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }
}

mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(&raw).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let token = VersionToken::from_digest([7u8; 32]);
        let parsed = VersionToken::from_hex(&token.to_hex()).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_display_is_truncated_but_equality_is_full() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[31] = 1;
        b[31] = 2;
        let (a, b) = (VersionToken::from_digest(a), VersionToken::from_digest(b));
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), DEFAULT_DISPLAY_LEN);
    }

    #[test]
    fn test_serde_uses_full_hex() {
        let token = VersionToken::from_digest([0xab; 32]);
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json.len(), 64 + 2);
        let back: VersionToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_short_token_rejected() {
        assert!(VersionToken::from_hex("abcd").is_err());
    }
}

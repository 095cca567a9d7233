//! Geometry fingerprint: the document's optimistic-concurrency version token.
//!
//! ## Byte stream
//!
//! ```text
//! token      = SHA256("deck_geometry_v2" || slide_w || slide_h || slide_count || slide_digest*)
//! slide      = SHA256(len(layout) || layout || shape_count || shape_record*)
//! shape      = kind_tag || has_id || id || has_geometry || left || top || width || height || text_hash
//! text_hash  = SHA256(text)            (non-empty text)
//!            = EMPTY_TEXT_SENTINEL     (empty text)
//! ```
//!
//! All integers are fixed-width little-endian. Geometry is hashed as
//! integers, never as formatted text, so the same document always produces
//! the same token.
//!
//! ## Coverage
//!
//! Slide count and order, layout identity, shape count and order, shape
//! id, kind, geometry and text are covered. The id makes a paint-order swap
//! of two otherwise identical shapes visible. Style-only edits (fill color,
//! opacity, line width) are not guaranteed to change the token.

use sha2::{Digest, Sha256};

use crate::types::{
    Document, GeometrySnapshot, ShapeGeometry, ShapeKind, SlideGeometry, VersionToken,
};

/// Domain separator for the token digest. Bump when the byte stream changes.
pub const FINGERPRINT_VERSION: &str = "deck_geometry_v2";

/// Text hash used for shapes with no text, so empty shapes still contribute a record.
pub const EMPTY_TEXT_SENTINEL: [u8; 32] = [0xE7; 32];

/// Hash a shape's text content.
pub fn text_hash(text: &str) -> [u8; 32] {
    if text.is_empty() {
        return EMPTY_TEXT_SENTINEL;
    }
    Sha256::digest(text.as_bytes()).into()
}

fn kind_tag(kind: ShapeKind) -> u8 {
    match kind {
        ShapeKind::AutoShape => 1,
        ShapeKind::TextBox => 2,
        ShapeKind::Picture => 3,
        ShapeKind::GraphicFrame => 4,
        ShapeKind::Connector => 5,
        ShapeKind::Group => 6,
        ShapeKind::ContentPart => 7,
    }
}

/// Capture the geometry snapshot of a document.
pub fn snapshot(document: &Document) -> GeometrySnapshot {
    GeometrySnapshot {
        slide_width: document.slide_width,
        slide_height: document.slide_height,
        slides: document
            .slides()
            .iter()
            .map(|slide| SlideGeometry {
                layout: slide.layout.clone(),
                shapes: slide
                    .shapes()
                    .iter()
                    .map(|shape| ShapeGeometry {
                        kind: shape.kind(),
                        id: shape.id(),
                        geometry: shape.geometry(),
                        text_hash: text_hash(&shape.text()),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn slide_digest(slide: &SlideGeometry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((slide.layout.len() as u64).to_le_bytes());
    hasher.update(slide.layout.as_bytes());
    hasher.update((slide.shapes.len() as u64).to_le_bytes());

    for shape in &slide.shapes {
        hasher.update([kind_tag(shape.kind)]);
        match shape.id {
            Some(id) => {
                hasher.update([1u8]);
                hasher.update(id.to_le_bytes());
            }
            None => hasher.update([0u8; 5]),
        }
        match shape.geometry {
            Some(g) => {
                hasher.update([1u8]);
                hasher.update(g.left.to_le_bytes());
                hasher.update(g.top.to_le_bytes());
                hasher.update(g.width.to_le_bytes());
                hasher.update(g.height.to_le_bytes());
            }
            None => {
                hasher.update([0u8]);
                hasher.update([0u8; 32]);
            }
        }
        hasher.update(shape.text_hash);
    }

    hasher.finalize().into()
}

/// Digest a geometry snapshot.
pub fn digest(snapshot: &GeometrySnapshot) -> VersionToken {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION.as_bytes());
    hasher.update(snapshot.slide_width.to_le_bytes());
    hasher.update(snapshot.slide_height.to_le_bytes());
    hasher.update((snapshot.slides.len() as u64).to_le_bytes());
    for slide in &snapshot.slides {
        hasher.update(slide_digest(slide));
    }
    VersionToken::from_digest(hasher.finalize().into())
}

/// Compute a document's version token.
pub fn fingerprint(document: &Document) -> VersionToken {
    digest(&snapshot(document))
}

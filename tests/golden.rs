//! Golden tests for the mutation kernel.
//!
//! These pin exact outputs: version tokens for fixed documents and
//! coordinates for fixed addressing specs. A change here is a change to the
//! persisted contract and needs a `FINGERPRINT_VERSION` bump.

use deck_kernel::{
    fingerprint, resolve_position, resolve_size_with_aspect, AddressingSpec, AnchorPoint,
    Document, EngineError, Extent, Geometry, NewShape, SizeSpec, VersionToken,
    FINGERPRINT_VERSION,
};
use serde_json::json;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn blank_with_slide() -> Document {
    let mut doc = Document::blank();
    doc.add_slide("Blank").unwrap();
    doc
}

fn hello_deck() -> Document {
    let mut doc = blank_with_slide();
    doc.add_shape(
        0,
        NewShape {
            preset: Some("rect".to_string()),
            geometry: Geometry::new(914_400, 914_400, 1_828_800, 914_400),
            text: Some("Hello".to_string()),
            fill: Some("FF0000".to_string()),
            name: None,
        },
    )
    .unwrap();
    doc
}

// ─────────────────────────────────────────────────────────────────────────────
// Version tokens
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn golden_fingerprint_version_tag() {
    assert_eq!(FINGERPRINT_VERSION, "deck_geometry_v2");
}

#[test]
fn golden_empty_deck_token() {
    let token = fingerprint(&Document::blank());
    assert_eq!(
        token.to_hex(),
        "0dc8658394072c1a324b1d9dcf030d0ce51bf90d26c6d0d14483e7c0153df88c"
    );
    assert_eq!(token.to_string(), "0dc8658394072c1a");
}

#[test]
fn golden_single_shape_token() {
    assert_eq!(
        fingerprint(&hello_deck()).to_hex(),
        "5dfb1f0890313a9c96dc41c908f00a629e052fba1d107c7010c5b883dbe48624"
    );
}

#[test]
fn golden_empty_text_box_token() {
    let mut doc = blank_with_slide();
    doc.add_shape(
        0,
        NewShape {
            preset: None,
            geometry: Geometry::new(0, 0, 100, 100),
            text: None,
            fill: None,
            name: None,
        },
    )
    .unwrap();
    assert_eq!(
        fingerprint(&doc).to_hex(),
        "f6a23281373f5d9728bdabf88fe8db8d13ea90d86f71febdab4d7ce0e2d7dc06"
    );
}

#[test]
fn golden_token_ignores_fill_and_survives_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.json");

    let mut doc = hello_deck();
    doc.set_fill_color(0, 0, "00FF00").unwrap();
    doc.save(&path).unwrap();

    let reopened = Document::open(&path).unwrap();
    assert_eq!(
        fingerprint(&reopened),
        VersionToken::from_hex("5dfb1f0890313a9c96dc41c908f00a629e052fba1d107c7010c5b883dbe48624").unwrap()
    );
}

#[test]
fn golden_token_serializes_as_full_hex() {
    let token = fingerprint(&hello_deck());
    let value = serde_json::to_value(token).unwrap();
    assert_eq!(value, json!("5dfb1f0890313a9c96dc41c908f00a629e052fba1d107c7010c5b883dbe48624"));
    let back: VersionToken = serde_json::from_value(value).unwrap();
    assert_eq!(back, token);
}

// ─────────────────────────────────────────────────────────────────────────────
// Spatial resolution
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn golden_percentage_position() {
    let spec = AddressingSpec::from_json(&json!({ "left": "10%", "top": "20%" })).unwrap();
    let pos = resolve_position(&spec, 10_000, 7_500).unwrap();
    assert_eq!((pos.left, pos.top), (1_000, 1_500));
    assert!(pos.warnings.is_empty());
}

#[test]
fn golden_off_slide_percentage_warns() {
    let spec = AddressingSpec::from_json(&json!({ "left": "110%", "top": "-5%" })).unwrap();
    let pos = resolve_position(&spec, 10_000, 7_500).unwrap();
    assert_eq!((pos.left, pos.top), (11_000, -375));
    assert_eq!(pos.warnings.len(), 2);
}

#[test]
fn golden_anchor_table() {
    let expected = [
        (AnchorPoint::TopLeft, (0, 0)),
        (AnchorPoint::TopCenter, (5_000, 0)),
        (AnchorPoint::TopRight, (10_000, 0)),
        (AnchorPoint::MiddleLeft, (0, 3_750)),
        (AnchorPoint::Center, (5_000, 3_750)),
        (AnchorPoint::MiddleRight, (10_000, 3_750)),
        (AnchorPoint::BottomLeft, (0, 7_500)),
        (AnchorPoint::BottomCenter, (5_000, 7_500)),
        (AnchorPoint::BottomRight, (10_000, 7_500)),
    ];
    for (anchor, (x, y)) in expected {
        let spec = AddressingSpec::Anchor { anchor, offset_x: -10, offset_y: 20 };
        let pos = resolve_position(&spec, 10_000, 7_500).unwrap();
        assert_eq!((pos.left, pos.top), (x - 10, y + 20), "{anchor}");
    }
}

#[test]
fn golden_grid_cells() {
    let spec = AddressingSpec::Grid { row: 2, col: 1, grid_size: 3 };
    let pos = resolve_position(&spec, 10_000, 7_500).unwrap();
    assert_eq!((pos.left, pos.top), (3_333, 5_000));

    let out_of_grid = AddressingSpec::Grid { row: 3, col: 0, grid_size: 3 };
    assert!(matches!(
        resolve_position(&out_of_grid, 10_000, 7_500),
        Err(EngineError::InvalidAddressing { .. })
    ));
}

#[test]
fn golden_auto_size_from_aspect() {
    let spec = SizeSpec::Dimensions { width: Extent::Percent(50.0), height: Extent::Auto };
    let (w, h, _) = resolve_size_with_aspect(&spec, 10_000, 7_500, Some(2.0)).unwrap();
    assert_eq!((w, h), (5_000, 2_500));

    let both = SizeSpec::Dimensions { width: Extent::Auto, height: Extent::Auto };
    assert!(matches!(
        resolve_size_with_aspect(&both, 10_000, 7_500, Some(2.0)),
        Err(EngineError::UnderspecifiedSize(_))
    ));
}

#[test]
fn golden_mixed_families_rejected() {
    let err = AddressingSpec::from_json(&json!({ "left": "10%", "anchor": "center" })).unwrap_err();
    assert!(matches!(err, EngineError::InvalidAddressing { .. }));
}

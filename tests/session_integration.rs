//! End-to-end session tests against documents on disk.
//!
//! Each test runs one or more independent sessions against the same file,
//! the way stateless command invocations would.

use std::path::{Path, PathBuf};
use std::time::Duration;

use deck_kernel::lock::{lock_path, DocumentLock, LockHolder};
use deck_kernel::{
    AddressingSpec, ApprovalToken, Channel, DeckEngine, DestructiveOperation, Document,
    EngineConfig, EngineError, IndexScope, ProbeOptions, ShapeRequest, SizeSpec,
};
use tempfile::TempDir;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const APPROVED: &str = "approved-by-operator";

fn engine() -> DeckEngine {
    let config = EngineConfig::default().with_lock_wait(Duration::from_millis(50));
    DeckEngine::new(config)
        .with_verifier(|_: &DestructiveOperation, t: &ApprovalToken| t.as_str() == APPROVED)
}

fn approval() -> ApprovalToken {
    ApprovalToken::new(APPROVED)
}

fn new_deck(dir: &TempDir, slides: usize) -> PathBuf {
    let path = dir.path().join("deck.json");
    let mut doc = Document::blank();
    for _ in 0..slides {
        doc.add_slide("Blank").unwrap();
    }
    engine().create(&path, &doc).unwrap();
    path
}

fn add_shapes(path: &Path, slide: usize, labels: &[&str]) {
    engine()
        .with_session(path, |s| {
            for (i, label) in labels.iter().enumerate() {
                let slide_ref = s.refresh().slide(slide).unwrap();
                let request = ShapeRequest::text_box(
                    AddressingSpec::Grid { row: 0, col: i as u32, grid_size: 4 },
                    SizeSpec::Grid { row_span: 1, col_span: 1, grid_size: 4 },
                    *label,
                );
                s.add_shape(slide_ref, &request, None)?;
            }
            Ok(())
        })
        .unwrap();
}

fn shape_texts(path: &Path, slide: usize) -> Vec<String> {
    let doc = Document::open(path).unwrap();
    doc.slide(slide).unwrap().shapes().iter().map(|s| s.text()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Index lifecycle across sessions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_removed_shape_leaves_old_index_stale() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    add_shapes(&path, 0, &["zero", "one", "two"]);

    // Session 1: caller reads indices.
    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    assert_eq!(index.slides[0].shapes.len(), 3);
    let one = index.shape(0, 1).unwrap();
    let two = index.shape(0, 2).unwrap();

    // Session 2: remove index 1.
    let report = engine()
        .with_session(&path, |s| s.remove_shape(one, Some(&approval()), Some(index.version)))
        .unwrap();
    assert!(report.structural);
    assert!(report.count_changed);
    assert_eq!(report.invalidated, vec![IndexScope::Shapes { slide: 0 }]);

    // Session 3: the cached "index 2" is refused.
    let err = engine()
        .with_session(&path, |s| s.set_text(two, "clobbered", None))
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { scope: IndexScope::Shapes { slide: 0 }, index: 2, .. }));

    // Session 4: after refresh, the former index 2 is at index 1.
    let refreshed = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    assert_eq!(refreshed.slides[0].shapes.len(), 2);
    assert_eq!(refreshed.slides[0].shapes[1].text, "two");
    engine()
        .with_session(&path, |s| s.set_text(refreshed.shape(0, 1).unwrap(), "two!", Some(refreshed.version)))
        .unwrap();
    assert_eq!(shape_texts(&path, 0), vec!["zero", "two!"]);
}

#[test]
fn test_shape_edit_on_one_slide_keeps_other_slides_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 2);
    add_shapes(&path, 0, &["a"]);
    add_shapes(&path, 1, &["b"]);

    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    let on_first = index.shape(0, 0).unwrap();
    let on_second = index.shape(1, 0).unwrap();

    engine()
        .with_session(&path, |s| {
            let slide = s.refresh().slide(0).unwrap();
            s.add_shape(slide, &ShapeRequest::rect(
                AddressingSpec::Absolute { left: 0, top: 0 },
                SizeSpec::absolute(100, 100),
            ), None)
        })
        .unwrap();

    engine()
        .with_session(&path, |s| {
            assert!(matches!(s.set_text(on_first, "x", None), Err(EngineError::StaleIndexUsed { .. })));
            s.set_text(on_second, "still valid", None)
        })
        .unwrap();
}

#[test]
fn test_slide_removal_invalidates_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 3);
    add_shapes(&path, 2, &["last"]);

    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    let shape = index.shape(2, 0).unwrap();

    let report = engine()
        .with_session(&path, |s| s.remove_slide(index.slide(0).unwrap(), Some(&approval()), None))
        .unwrap();
    assert_eq!(report.invalidated.len(), 4);
    assert!(report.invalidated.contains(&IndexScope::Slides));

    let err = engine().with_session(&path, |s| s.set_text(shape, "x", None)).unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { scope: IndexScope::Slides, .. }));
    assert_eq!(Document::open(&path).unwrap().slide_count(), 2);
}

#[test]
fn test_slide_move_invalidates_every_scope() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 3);
    add_shapes(&path, 2, &["moved"]);

    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    let slide = index.slide(2).unwrap();
    let shape = index.shape(2, 0).unwrap();

    // Moving a slide onto its own position changes nothing.
    let noop = engine()
        .with_session(&path, |s| s.move_slide(slide, 2, Some(index.version)))
        .unwrap();
    assert!(!noop.structural);
    assert!(noop.invalidated.is_empty());
    assert_eq!(noop.version, index.version);

    let report = engine()
        .with_session(&path, |s| s.move_slide(slide, 0, Some(index.version)))
        .unwrap();
    assert!(report.structural);
    assert!(report.index_meaning_changed);
    assert!(!report.count_changed);
    assert_ne!(report.version, index.version);
    assert_eq!(
        report.invalidated,
        vec![
            IndexScope::Slides,
            IndexScope::Shapes { slide: 0 },
            IndexScope::Shapes { slide: 1 },
            IndexScope::Shapes { slide: 2 },
        ]
    );

    let err = engine().with_session(&path, |s| s.set_text(shape, "x", None)).unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { scope: IndexScope::Slides, .. }));
    let err = engine().with_session(&path, |s| s.move_slide(slide, 1, None)).unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { .. }));

    assert_eq!(shape_texts(&path, 0), vec!["moved"]);
}

#[test]
fn test_external_edit_invalidates_cached_refs() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    add_shapes(&path, 0, &["mine"]);
    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();

    // Another tool rewrites the text without going through the engine.
    let mut doc = Document::open(&path).unwrap();
    doc.set_shape_text(0, 0, "theirs").unwrap();
    doc.save(&path).unwrap();

    let err = engine()
        .with_session(&path, |s| s.set_text(index.shape(0, 0).unwrap(), "mine again", None))
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { .. }));
}

#[test]
fn test_generations_never_repeat_across_external_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    add_shapes(&path, 0, &["a", "b", "c"]);

    // First external edit, then a read-only session hands out refs.
    let mut doc = Document::open(&path).unwrap();
    doc.set_shape_text(0, 2, "c'").unwrap();
    doc.save(&path).unwrap();
    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    let b = index.shape(0, 1).unwrap();
    assert_eq!(index.slides[0].shapes[1].text, "b");

    // Second external edit shifts "b" to index 0.
    let mut doc = Document::open(&path).unwrap();
    doc.remove_shape(0, 0).unwrap();
    doc.save(&path).unwrap();

    let err = engine()
        .with_session(&path, |s| s.set_text(b, "b!", None))
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { .. }));
    assert_eq!(shape_texts(&path, 0), vec!["b", "c'"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency and approval
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_version_conflict_from_concurrent_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    add_shapes(&path, 0, &["draft"]);
    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();

    engine()
        .with_session(&path, |s| s.set_text(index.shape(0, 0).unwrap(), "someone else", None))
        .unwrap();
    let saved = std::fs::read(&path).unwrap();

    let err = engine()
        .with_session(&path, |s| s.set_text(index.shape(0, 0).unwrap(), "mine", Some(index.version)))
        .unwrap_err();
    match &err {
        EngineError::VersionConflict { expected, actual } => {
            assert_eq!(expected, &index.version.to_hex());
            assert_ne!(expected, actual);
        }
        other => panic!("expected VersionConflict, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert_eq!(std::fs::read(&path).unwrap(), saved);
}

#[test]
fn test_lock_contention_is_reported_with_holder() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    let holder_session = Uuid::new_v4();
    let held = DocumentLock::acquire(
        &path,
        holder_session,
        Duration::ZERO,
        Duration::from_millis(1),
        Duration::from_secs(600),
    )
    .unwrap();

    let err = engine().with_session(&path, |s| Ok(s.version())).unwrap_err();
    match err {
        EngineError::LockContention { holder, .. } => {
            assert_eq!(holder.map(|h| h.session_id), Some(holder_session));
        }
        other => panic!("expected LockContention, got {other:?}"),
    }

    drop(held);
    assert!(engine().with_session(&path, |s| Ok(s.version())).is_ok());
}

#[test]
fn test_abandoned_lock_does_not_block_later_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);

    // A holder that was killed an hour ago without releasing.
    let abandoned = LockHolder {
        pid: std::process::id(),
        session_id: Uuid::new_v4(),
        acquired_at: chrono::Utc::now() - chrono::Duration::hours(1),
    };
    std::fs::write(lock_path(&path), serde_json::to_vec(&abandoned).unwrap()).unwrap();

    let version = engine().with_session(&path, |s| Ok(s.version())).unwrap();
    assert_eq!(version, deck_kernel::fingerprint(&Document::open(&path).unwrap()));
    assert!(!lock_path(&path).exists());
}

#[test]
fn test_lock_released_after_failed_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    let result: Result<(), EngineError> =
        engine().with_session(&path, |_| Err(EngineError::parameter("test", "forced failure")));
    assert!(result.is_err());
    assert!(!lock_path(&path).exists());
}

#[test]
fn test_destructive_ops_need_approval() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 2);
    add_shapes(&path, 0, &["keep"]);
    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();

    for token in [None, Some(ApprovalToken::new("")), Some(ApprovalToken::new("forged"))] {
        let err = engine()
            .with_session(&path, |s| s.remove_shape(index.shape(0, 0).unwrap(), token.as_ref(), None))
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
        let err = engine()
            .with_session(&path, |s| s.remove_slide(index.slide(1).unwrap(), token.as_ref(), None))
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
    }

    assert_eq!(shape_texts(&path, 0), vec!["keep"]);
    assert_eq!(Document::open(&path).unwrap().slide_count(), 2);

    // A default engine refuses even a well-formed credential.
    let err = DeckEngine::default()
        .with_session(&path, |s| s.remove_slide(index.slide(1).unwrap(), Some(&approval()), None))
        .unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied { .. }));
}

#[test]
fn test_stale_check_precedes_approval() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    add_shapes(&path, 0, &["a", "b"]);
    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    engine()
        .with_session(&path, |s| s.remove_shape(index.shape(0, 0).unwrap(), Some(&approval()), None))
        .unwrap();

    let err = engine()
        .with_session(&path, |s| s.remove_shape(index.shape(0, 1).unwrap(), None, None))
        .unwrap_err();
    assert!(matches!(err, EngineError::StaleIndexUsed { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Patching and probing through sessions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_opacity_round_trip_leaves_no_alpha_node() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    engine()
        .with_session(&path, |s| {
            let slide = s.refresh().slide(0).unwrap();
            let mut request = ShapeRequest::rect(
                AddressingSpec::Percentage { left: 10.0, top: 20.0 },
                SizeSpec::percent(25.0, 25.0),
            );
            request.fill = Some("336699".to_string());
            s.add_shape(slide, &request, None)
        })
        .unwrap();
    let plain = std::fs::read(&path).unwrap();

    let index = engine().with_session(&path, |s| Ok(s.refresh())).unwrap();
    let shape = index.shape(0, 0).unwrap();
    assert_eq!(index.slides[0].shapes[0].geometry.map(|g| (g.left, g.top)), Some((1_219_200, 1_371_600)));

    engine().with_session(&path, |s| s.set_opacity(shape, Channel::Fill, 0.0, None)).unwrap();
    assert!(String::from_utf8(std::fs::read(&path).unwrap()).unwrap().contains("a:alpha"));

    let report = engine().with_session(&path, |s| s.set_opacity(shape, Channel::Fill, 1.0, None)).unwrap();
    assert!(!report.structural);
    let text = String::from_utf8(std::fs::read(&path).unwrap()).unwrap();
    assert!(!text.contains("a:alpha"));

    assert_eq!(std::fs::read(&path).unwrap(), plain);
}

#[test]
fn test_deep_probe_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 1);
    let before = std::fs::read(&path).unwrap();

    let snapshot = engine()
        .with_session(&path, |s| {
            let snap = s.probe(true)?;
            assert!(!s.is_dirty());
            Ok(snap)
        })
        .unwrap();
    assert!(snapshot.analysis_complete);
    assert_eq!(snapshot.layouts_measured, 3);
    assert_eq!(std::fs::read(&path).unwrap(), before);

    let partial = engine()
        .with_session(&path, |s| {
            s.probe_with_options(&ProbeOptions { deep: true, timeout: Duration::ZERO, max_layouts: 50 })
        })
        .unwrap();
    assert!(!partial.analysis_complete);
    assert_eq!(Document::open(&path).unwrap().slide_count(), 1);
}

#[test]
fn test_add_slide_returns_usable_ref() {
    let dir = tempfile::tempdir().unwrap();
    let path = new_deck(&dir, 0);
    engine()
        .with_session(&path, |s| {
            let report = s.add_slide("Title and Content", None)?;
            assert!(report.count_changed);
            let slide = report.created_slide.unwrap();
            let added = s.add_shape(
                slide,
                &ShapeRequest::text_box(
                    AddressingSpec::Anchor {
                        anchor: deck_kernel::AnchorPoint::BottomRight,
                        offset_x: -1_000_000,
                        offset_y: -500_000,
                    },
                    SizeSpec::absolute(900_000, 400_000),
                    "footnote",
                ),
                Some(report.version),
            )?;
            assert_eq!(added.created_shape.unwrap().index(), 2);
            Ok(())
        })
        .unwrap();

    assert!(matches!(
        engine().with_session(&path, |s| s.add_slide("Nonexistent", None)),
        Err(EngineError::UnknownLayout(_))
    ));
}

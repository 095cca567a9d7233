//! Direct markup patches for features the object model does not expose.
//!
//! Two patches live here: the alpha channel of a fill or line color, and a
//! shape's position in the slide's paint order. Nothing else in the engine
//! depends on the shape of the markup these touch.
//!
//! ## Transactional guarantee
//!
//! Every patch builds its result on a staged copy (the shape subtree for
//! alpha, the `p:spTree` child list for reorder) and commits it with a
//! single assignment. An error at any step before the commit leaves the
//! live tree exactly as it was.
//!
//! ## Alpha policy
//!
//! Alpha is written on the DrawingML scale `0..=100000`. Fully opaque
//! (`1.0`) omits the `a:alpha` node entirely, removing it if present, so a
//! fully opaque color is byte-identical to one that was never patched.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::document::{is_drawable, node_label, SHAPE_PROPERTIES_ORDER};
use crate::types::{MarkupNode, ShapeKind};

/// DrawingML value for fully opaque.
pub const ALPHA_OPAQUE: i64 = 100_000;

/// Color elements that can carry an `a:alpha` modifier.
const COLOR_ELEMENTS: &[&str] = &[
    "a:srgbClr",
    "a:schemeClr",
    "a:sysClr",
    "a:prstClr",
    "a:hslClr",
    "a:scrgbClr",
];

/// Schema order of children inside `a:ln`.
const LINE_ORDER: &[&str] = &[
    "a:noFill",
    "a:solidFill",
    "a:gradFill",
    "a:pattFill",
    "a:prstDash",
    "a:custDash",
    "a:round",
    "a:bevel",
    "a:miter",
    "a:headEnd",
    "a:tailEnd",
    "a:extLst",
];

/// Which color of a shape to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Shape fill.
    Fill,
    /// Outline.
    Line,
}

impl Channel {
    fn default_scheme_color(&self) -> &'static str {
        match self {
            Self::Fill => "accent1",
            Self::Line => "tx1",
        }
    }
}

/// Paint-order move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderAction {
    /// Paint last (topmost).
    BringToFront,
    /// Paint first (bottommost).
    SendToBack,
    /// Swap with the next sibling.
    ForwardOne,
    /// Swap with the previous sibling.
    BackwardOne,
}

impl std::str::FromStr for ReorderAction {
    type Err = EngineError;

    /// Parse `bring_to_front`, `send_to_back`, `forward_one`/`bring_forward`,
    /// `backward_one`/`send_backward`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bring_to_front" | "front" => Ok(Self::BringToFront),
            "send_to_back" | "back" => Ok(Self::SendToBack),
            "forward_one" | "bring_forward" | "forward" => Ok(Self::ForwardOne),
            "backward_one" | "send_backward" | "backward" => Ok(Self::BackwardOne),
            _ => Err(EngineError::parameter("action", format!("unknown reorder action {s:?}"))),
        }
    }
}

/// Result of an alpha patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlphaOutcome {
    /// Whether the tree changed.
    pub changed: bool,
    /// Value written, or `None` when the node was omitted (fully opaque).
    pub value: Option<i64>,
}

/// Result of a reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderOutcome {
    /// Shape index before the move.
    pub from: usize,
    /// Shape index after the move.
    pub to: usize,
    /// `false` when the shape was already at the boundary.
    pub moved: bool,
}

/// Points inside a patch where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PatchStep {
    /// The staged copy exists.
    Staged,
    /// The staged copy is partially rewritten.
    Rewriting,
    /// Immediately before the commit.
    BeforeCommit,
}

/// Applies alpha and paint-order patches to a slide's `p:spTree`.
#[derive(Debug, Clone, Default)]
pub struct TreePatcher {
    fault: Option<PatchStep>,
}

impl TreePatcher {
    /// Create a patcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Patcher that fails at the given step.
    #[cfg(test)]
    pub(crate) fn failing_at(step: PatchStep) -> Self {
        Self { fault: Some(step) }
    }

    fn checkpoint(&self, step: PatchStep, node_path: &str) -> EngineResult<()> {
        if self.fault == Some(step) {
            return Err(EngineError::patch(node_path, format!("fault injected at {step:?}")));
        }
        Ok(())
    }

    /// Set the alpha of a shape's fill or line color.
    ///
    /// Creates the solid fill (theme color) and the `a:alpha` node when absent.
    /// Repeating a call with the same value is a no-op.
    pub fn set_alpha(
        &self,
        tree: &mut MarkupNode,
        shape: usize,
        channel: Channel,
        alpha: f64,
    ) -> EngineResult<AlphaOutcome> {
        if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
            return Err(EngineError::parameter("alpha", format!("must be within 0.0..=1.0, got {alpha}")));
        }
        let value = (alpha * ALPHA_OPAQUE as f64).round() as i64;
        let position = drawable_position(tree, shape)?;

        let live = &tree.children[position];
        let kind = ShapeKind::of(live)
            .ok_or_else(|| EngineError::patch(live.name.clone(), "not a drawable shape"))?;
        let label = node_label(kind);
        let props_name = kind.properties_element().ok_or_else(|| {
            EngineError::patch(format!("{label}/p:spPr"), "shape kind has no shape properties")
        })?;

        let mut staged = live.clone();
        self.checkpoint(PatchStep::Staged, label)?;

        let props = staged
            .child_mut(props_name)
            .ok_or_else(|| EngineError::patch(format!("{label}/{props_name}"), "node not found"))?;

        let (container, path) = match channel {
            Channel::Fill => (props, format!("{label}/{props_name}")),
            Channel::Line => {
                if props.child("a:ln").is_none() {
                    if value == ALPHA_OPAQUE {
                        return Ok(AlphaOutcome { changed: false, value: None });
                    }
                    props.insert_ordered(MarkupNode::new("a:ln"), SHAPE_PROPERTIES_ORDER);
                }
                let ln = props
                    .child_mut("a:ln")
                    .ok_or_else(|| EngineError::patch(format!("{label}/{props_name}/a:ln"), "node not found"))?;
                (ln, format!("{label}/{props_name}/a:ln"))
            }
        };

        let has_fill = container.child("a:solidFill").is_some() || container.child("a:gradFill").is_some();
        if !has_fill {
            for other in ["a:blipFill", "a:pattFill", "a:grpFill"] {
                if container.child(other).is_some() {
                    return Err(EngineError::patch(
                        format!("{path}/{other}"),
                        "fill type has no color alpha channel",
                    ));
                }
            }
            if value == ALPHA_OPAQUE {
                return Ok(AlphaOutcome { changed: false, value: None });
            }
            container.remove_children("a:noFill");
            let fill = MarkupNode::new("a:solidFill").with_child(
                MarkupNode::new("a:schemeClr").with_attr("val", channel.default_scheme_color()),
            );
            let order = match channel {
                Channel::Fill => SHAPE_PROPERTIES_ORDER,
                Channel::Line => LINE_ORDER,
            };
            container.insert_ordered(fill, order);
        }

        self.checkpoint(PatchStep::Rewriting, &path)?;

        let mut colors: Vec<&mut MarkupNode> = Vec::new();
        for fill in container.children.iter_mut() {
            let solid = fill.name == "a:solidFill";
            let gradient = fill.name == "a:gradFill";
            if solid {
                colors.extend(
                    fill.children
                        .iter_mut()
                        .filter(|c| COLOR_ELEMENTS.contains(&c.name.as_str())),
                );
            } else if gradient {
                if let Some(stops) = fill.child_mut("a:gsLst") {
                    for stop in stops.children.iter_mut().filter(|s| s.name == "a:gs") {
                        colors.extend(
                            stop.children
                                .iter_mut()
                                .filter(|c| COLOR_ELEMENTS.contains(&c.name.as_str())),
                        );
                    }
                }
            }
        }
        if colors.is_empty() {
            return Err(EngineError::patch(format!("{path}/a:solidFill/*"), "fill has no color element"));
        }

        for color in colors {
            if value == ALPHA_OPAQUE {
                color.remove_children("a:alpha");
            } else {
                match color.child_mut("a:alpha") {
                    Some(node) => node.set_attr("val", value.to_string()),
                    None => color
                        .children
                        .push(MarkupNode::new("a:alpha").with_attr("val", value.to_string())),
                }
                if color.children.iter().filter(|c| c.name == "a:alpha").count() > 1 {
                    let mut seen = false;
                    color.children.retain(|c| {
                        if c.name != "a:alpha" {
                            return true;
                        }
                        let keep = !seen;
                        seen = true;
                        keep
                    });
                }
            }
        }

        self.checkpoint(PatchStep::BeforeCommit, &path)?;

        let changed = staged != tree.children[position];
        if changed {
            tree.children[position] = staged;
        }
        debug!(shape, ?channel, value, changed, "alpha patch applied");

        Ok(AlphaOutcome {
            changed,
            value: (value != ALPHA_OPAQUE).then_some(value),
        })
    }

    /// Move a shape within the paint order.
    ///
    /// Only drawable children move; `p:nvGrpSpPr`, `p:grpSpPr` and a trailing
    /// `p:extLst` keep their positions. At a boundary the call is a no-op.
    pub fn reorder(
        &self,
        tree: &mut MarkupNode,
        shape: usize,
        action: ReorderAction,
    ) -> EngineResult<ReorderOutcome> {
        let slots: Vec<usize> = tree
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| is_drawable(c))
            .map(|(i, _)| i)
            .collect();
        let count = slots.len();
        if shape >= count {
            return Err(EngineError::patch(
                format!("p:spTree/drawable[{shape}]"),
                format!("slide has {count} shapes"),
            ));
        }

        let target = match action {
            ReorderAction::BringToFront => count - 1,
            ReorderAction::SendToBack => 0,
            ReorderAction::ForwardOne => (shape + 1).min(count - 1),
            ReorderAction::BackwardOne => shape.saturating_sub(1),
        };
        if target == shape {
            debug!(shape, ?action, "reorder at boundary, nothing to do");
            return Ok(ReorderOutcome { from: shape, to: shape, moved: false });
        }

        let mut staged = tree.children.clone();
        self.checkpoint(PatchStep::Staged, "p:spTree")?;

        let mut order = slots.clone();
        let moving = order.remove(shape);
        order.insert(target, moving);

        for (n, (slot, source)) in slots.iter().zip(order.iter()).enumerate() {
            if n == count / 2 {
                self.checkpoint(PatchStep::Rewriting, "p:spTree")?;
            }
            staged[*slot] = tree.children[*source].clone();
        }

        self.checkpoint(PatchStep::BeforeCommit, "p:spTree")?;
        tree.children = staged;
        debug!(from = shape, to = target, ?action, "reorder applied");

        Ok(ReorderOutcome { from: shape, to: target, moved: true })
    }
}

fn drawable_position(tree: &MarkupNode, shape: usize) -> EngineResult<usize> {
    tree.children
        .iter()
        .enumerate()
        .filter(|(_, c)| is_drawable(c))
        .nth(shape)
        .map(|(i, _)| i)
        .ok_or_else(|| EngineError::patch(format!("p:spTree/drawable[{shape}]"), "shape not found"))
}

/// Read the alpha of a shape's fill or line color, if one is set.
///
/// Returns `Some(1.0)` for an explicit color without an alpha node and
/// `None` when the channel has no color.
pub fn read_alpha(tree: &MarkupNode, shape: usize, channel: Channel) -> Option<f64> {
    let node = &tree.children[drawable_position(tree, shape).ok()?];
    let props = node.child(ShapeKind::of(node)?.properties_element()?)?;
    let container = match channel {
        Channel::Fill => props,
        Channel::Line => props.child("a:ln")?,
    };
    let fill = container.child("a:solidFill")?;
    let color = fill.children.iter().find(|c| COLOR_ELEMENTS.contains(&c.name.as_str()))?;
    Some(match color.child("a:alpha").and_then(|a| a.attr_i64("val")) {
        Some(v) => v as f64 / ALPHA_OPAQUE as f64,
        None => 1.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, Geometry, NewShape};

    fn deck(shapes: usize) -> Document {
        let mut doc = Document::blank();
        doc.add_slide("Blank").unwrap();
        for i in 0..shapes {
            doc.add_shape(
                0,
                NewShape {
                    preset: Some("rect".to_string()),
                    geometry: Geometry::new(i as i64, 0, 10, 10),
                    text: Some(format!("s{i}")),
                    fill: Some("FF0000".to_string()),
                    name: None,
                },
            )
            .unwrap();
        }
        doc
    }

    fn texts(doc: &Document) -> Vec<String> {
        doc.slide(0).unwrap().shapes().iter().map(|s| s.text()).collect()
    }

    fn tree_bytes(doc: &Document) -> Vec<u8> {
        serde_json::to_vec(&doc.slide(0).unwrap().tree).unwrap()
    }

    #[test]
    fn test_set_alpha_is_idempotent() {
        let mut doc = deck(1);
        let idx = doc.slide(0).unwrap().shape_count() - 1;
        let patcher = TreePatcher::new();

        let tree = &mut doc.slide_mut(0).unwrap().tree;
        let first = patcher.set_alpha(tree, idx, Channel::Fill, 0.15).unwrap();
        assert!(first.changed);
        assert_eq!(first.value, Some(15_000));
        let once = serde_json::to_vec(&*tree).unwrap();

        let second = patcher.set_alpha(tree, idx, Channel::Fill, 0.15).unwrap();
        assert!(!second.changed);
        assert_eq!(serde_json::to_vec(&*tree).unwrap(), once);

        let color = tree.children.iter().filter(|c| is_drawable(c)).nth(idx).unwrap()
            .find("p:spPr/a:solidFill/a:srgbClr").unwrap();
        assert_eq!(color.children.iter().filter(|c| c.name == "a:alpha").count(), 1);
    }

    #[test]
    fn test_opaque_omits_alpha_node() {
        let mut doc = deck(1);
        let idx = doc.slide(0).unwrap().shape_count() - 1;
        let untouched = tree_bytes(&doc);
        let patcher = TreePatcher::new();
        let tree = &mut doc.slide_mut(0).unwrap().tree;

        patcher.set_alpha(tree, idx, Channel::Fill, 0.0).unwrap();
        assert_eq!(read_alpha(tree, idx, Channel::Fill), Some(0.0));

        let outcome = patcher.set_alpha(tree, idx, Channel::Fill, 1.0).unwrap();
        assert_eq!(outcome.value, None);
        assert_eq!(read_alpha(tree, idx, Channel::Fill), Some(1.0));
        assert_eq!(tree_bytes(&doc), untouched);
    }

    #[test]
    fn test_line_alpha_creates_line_fill() {
        let mut doc = deck(1);
        let idx = doc.slide(0).unwrap().shape_count() - 1;
        let tree = &mut doc.slide_mut(0).unwrap().tree;
        TreePatcher::new().set_alpha(tree, idx, Channel::Line, 0.5).unwrap();
        let shape = tree.children.iter().filter(|c| is_drawable(c)).nth(idx).unwrap();
        let color = shape.find("p:spPr/a:ln/a:solidFill/a:schemeClr").unwrap();
        assert_eq!(color.attr("val"), Some("tx1"));
        assert_eq!(read_alpha(tree, idx, Channel::Line), Some(0.5));
    }

    #[test]
    fn test_alpha_out_of_range_rejected() {
        let mut doc = deck(1);
        let tree = &mut doc.slide_mut(0).unwrap().tree;
        assert!(matches!(
            TreePatcher::new().set_alpha(tree, 0, Channel::Fill, 1.5),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_alpha_fault_leaves_tree_untouched() {
        for step in [PatchStep::Staged, PatchStep::Rewriting, PatchStep::BeforeCommit] {
            let mut doc = deck(1);
            let idx = doc.slide(0).unwrap().shape_count() - 1;
            let before = tree_bytes(&doc);
            let tree = &mut doc.slide_mut(0).unwrap().tree;
            let err = TreePatcher::failing_at(step).set_alpha(tree, idx, Channel::Line, 0.3).unwrap_err();
            assert!(matches!(err, EngineError::PatchFailed { .. }));
            assert_eq!(tree_bytes(&doc), before, "tree changed after fault at {step:?}");
        }
    }

    #[test]
    fn test_reorder_moves_and_clamps() {
        let mut doc = deck(3);
        let patcher = TreePatcher::new();
        let n = doc.slide(0).unwrap().shape_count();
        let tree = &mut doc.slide_mut(0).unwrap().tree;

        let out = patcher.reorder(tree, n - 1, ReorderAction::SendToBack).unwrap();
        assert_eq!((out.from, out.to, out.moved), (n - 1, 0, true));
        assert_eq!(texts(&doc)[0], "s2");

        let tree = &mut doc.slide_mut(0).unwrap().tree;
        let out = patcher.reorder(tree, 0, ReorderAction::BackwardOne).unwrap();
        assert!(!out.moved);

        let out = patcher.reorder(tree, n - 1, ReorderAction::ForwardOne).unwrap();
        assert!(!out.moved);

        let out = patcher.reorder(tree, 0, ReorderAction::ForwardOne).unwrap();
        assert_eq!(out.to, 1);
        assert_eq!(texts(&doc)[1], "s2");
    }

    #[test]
    fn test_reorder_action_names() {
        assert_eq!("bring-to-front".parse::<ReorderAction>().unwrap(), ReorderAction::BringToFront);
        assert_eq!("send_backward".parse::<ReorderAction>().unwrap(), ReorderAction::BackwardOne);
        assert!(matches!(
            "sideways".parse::<ReorderAction>(),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_reorder_keeps_group_header_first() {
        let mut doc = deck(2);
        let tree = &mut doc.slide_mut(0).unwrap().tree;
        TreePatcher::new().reorder(tree, 1, ReorderAction::SendToBack).unwrap();
        assert_eq!(tree.children[0].name, "p:nvGrpSpPr");
        assert_eq!(tree.children[1].name, "p:grpSpPr");
    }

    #[test]
    fn test_reorder_fault_leaves_paint_order_unchanged() {
        for step in [PatchStep::Staged, PatchStep::Rewriting, PatchStep::BeforeCommit] {
            let mut doc = deck(4);
            let before = tree_bytes(&doc);
            let order_before = texts(&doc);
            let tree = &mut doc.slide_mut(0).unwrap().tree;
            let err = TreePatcher::failing_at(step)
                .reorder(tree, 0, ReorderAction::BringToFront)
                .unwrap_err();
            assert!(matches!(err, EngineError::PatchFailed { .. }));
            assert_eq!(texts(&doc), order_before);
            assert_eq!(tree_bytes(&doc), before);
        }
    }

    #[test]
    fn test_graphic_frame_alpha_reports_path() {
        let mut doc = deck(0);
        let tree = &mut doc.slide_mut(0).unwrap().tree;
        let frame = MarkupNode::new("p:graphicFrame")
            .with_child(MarkupNode::new("p:nvGraphicFramePr"))
            .with_child(Geometry::new(0, 0, 1, 1).to_xfrm("p:xfrm"));
        tree.children.push(frame);
        let idx = tree.children.iter().filter(|c| is_drawable(c)).count() - 1;
        match TreePatcher::new().set_alpha(tree, idx, Channel::Fill, 0.5) {
            Err(EngineError::PatchFailed { node_path, .. }) => assert_eq!(node_path, "p:graphicFrame/p:spPr"),
            other => panic!("expected PatchFailed, got {other:?}"),
        }
    }
}

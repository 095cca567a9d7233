//! Markup tree backing each slide.
//!
//! A slide's drawing content is an ordered tree of qualified elements
//! (`p:spTree`, `p:sp`, `a:solidFill`, ...). Attribute order is kept sorted
//! so that serialization is byte-stable across open/save cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One element of the markup tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupNode {
    /// Qualified element name, e.g. `a:srgbClr`.
    pub name: String,
    /// Attributes (sorted by name).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    /// Child elements in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MarkupNode>,
    /// Text content (only leaf text elements such as `a:t` carry one).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MarkupNode {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
            text: None,
        }
    }

    /// Builder: add an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Builder: append a child.
    pub fn with_child(mut self, child: MarkupNode) -> Self {
        self.children.push(child);
        self
    }

    /// Builder: set text content.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attribute value, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Attribute parsed as an integer.
    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attr(key).and_then(|v| v.parse().ok())
    }

    /// Set (or overwrite) an attribute.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&MarkupNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// First direct child with the given name, mutably.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut MarkupNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Position of the first direct child with the given name.
    pub fn child_position(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|c| c.name == name)
    }

    /// Follow a `/`-separated path of child names.
    pub fn find(&self, path: &str) -> Option<&MarkupNode> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Follow a `/`-separated path of child names, mutably.
    pub fn find_mut(&mut self, path: &str) -> Option<&mut MarkupNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }

    /// Remove every direct child with the given name. Returns how many were removed.
    pub fn remove_children(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|c| c.name != name);
        before - self.children.len()
    }

    /// Insert `child` respecting a schema ordering.
    ///
    /// `order` lists sibling names in the order the schema requires. The child
    /// is placed after the last existing sibling whose name appears earlier
    /// than its own in `order`. Names absent from `order` are treated as
    /// trailing.
    pub fn insert_ordered(&mut self, child: MarkupNode, order: &[&str]) -> usize {
        let rank = |name: &str| order.iter().position(|n| *n == name).unwrap_or(order.len());
        let own = rank(&child.name);
        let position = self
            .children
            .iter()
            .rposition(|c| rank(&c.name) <= own)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.children.insert(position, child);
        position
    }

    /// Depth-first collection of all descendants with the given name.
    pub fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a MarkupNode>) {
        for child in &self.children {
            if child.name == name {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MarkupNode {
        MarkupNode::new("p:sp").with_child(
            MarkupNode::new("p:spPr")
                .with_child(MarkupNode::new("a:xfrm"))
                .with_child(MarkupNode::new("a:ln")),
        )
    }

    #[test]
    fn test_find_by_path() {
        let node = sample();
        assert!(node.find("p:spPr/a:xfrm").is_some());
        assert!(node.find("p:spPr/a:solidFill").is_none());
        assert_eq!(node.find("").map(|n| n.name.as_str()), Some("p:sp"));
    }

    #[test]
    fn test_insert_ordered_places_fill_before_line() {
        let mut node = sample();
        let sp_pr = node.find_mut("p:spPr").unwrap();
        let order = ["a:xfrm", "a:prstGeom", "a:solidFill", "a:ln"];
        let at = sp_pr.insert_ordered(MarkupNode::new("a:solidFill"), &order);
        assert_eq!(at, 1);
        let names: Vec<_> = sp_pr.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a:xfrm", "a:solidFill", "a:ln"]);
    }

    #[test]
    fn test_descendants() {
        let node = MarkupNode::new("p:txBody")
            .with_child(MarkupNode::new("a:p").with_child(MarkupNode::new("a:r").with_child(
                MarkupNode::new("a:t").with_text("one"),
            )))
            .with_child(MarkupNode::new("a:p").with_child(MarkupNode::new("a:r").with_child(
                MarkupNode::new("a:t").with_text("two"),
            )));
        let mut found = Vec::new();
        node.descendants("a:t", &mut found);
        assert_eq!(found.len(), 2);
    }
}

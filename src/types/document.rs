//! High-level presentation object model.
//!
//! A [`Document`] owns an ordered list of [`Slide`]s, each a `p:spTree`
//! markup tree plus the name of the layout it was created from. Shape and
//! slide identity is purely positional: a shape is "the i-th drawable child
//! of its slide's tree", a slide is "the i-th slide of the document".
//!
//! The operations here are the plain object-model calls (add a shape, set its
//! text, remove a slide). They know nothing about version tokens, index
//! lifecycles or approval; the session layers those on top.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use super::tree::MarkupNode;
use super::units::Emu;
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::IndexLedger;

/// Default slide width (16:9).
pub const DEFAULT_SLIDE_WIDTH: Emu = 12_192_000;
/// Default slide height (16:9).
pub const DEFAULT_SLIDE_HEIGHT: Emu = 6_858_000;

/// Element names that are drawable shapes inside a `p:spTree`.
pub const DRAWABLE_ELEMENTS: &[&str] = &[
    "p:sp",
    "p:pic",
    "p:graphicFrame",
    "p:cxnSp",
    "p:grpSp",
    "p:contentPart",
];

/// Schema order of children inside `p:spPr`.
pub const SHAPE_PROPERTIES_ORDER: &[&str] = &[
    "a:xfrm",
    "a:custGeom",
    "a:prstGeom",
    "a:noFill",
    "a:solidFill",
    "a:gradFill",
    "a:blipFill",
    "a:pattFill",
    "a:grpFill",
    "a:ln",
    "a:effectLst",
    "a:effectDag",
    "a:scene3d",
    "a:sp3d",
    "a:extLst",
];

/// Whether a tree node is a drawable shape.
pub fn is_drawable(node: &MarkupNode) -> bool {
    DRAWABLE_ELEMENTS.contains(&node.name.as_str())
}

/// Position and extent of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    /// Left edge.
    pub left: Emu,
    /// Top edge.
    pub top: Emu,
    /// Width.
    pub width: Emu,
    /// Height.
    pub height: Emu,
}

impl Geometry {
    /// Create a geometry.
    pub fn new(left: Emu, top: Emu, width: Emu, height: Emu) -> Self {
        Self { left, top, width, height }
    }

    /// Read geometry from an `a:xfrm` / `p:xfrm` node.
    pub fn from_xfrm(xfrm: &MarkupNode) -> Option<Self> {
        let off = xfrm.child("a:off")?;
        let ext = xfrm.child("a:ext")?;
        Some(Self {
            left: off.attr_i64("x")?,
            top: off.attr_i64("y")?,
            width: ext.attr_i64("cx")?,
            height: ext.attr_i64("cy")?,
        })
    }

    /// Build an `a:xfrm` node (or `p:xfrm` for graphic frames).
    pub fn to_xfrm(&self, element: &str) -> MarkupNode {
        MarkupNode::new(element)
            .with_child(
                MarkupNode::new("a:off")
                    .with_attr("x", self.left.to_string())
                    .with_attr("y", self.top.to_string()),
            )
            .with_child(
                MarkupNode::new("a:ext")
                    .with_attr("cx", self.width.to_string())
                    .with_attr("cy", self.height.to_string()),
            )
    }
}

/// Kind of drawable shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    /// Preset-geometry autoshape.
    AutoShape,
    /// Autoshape flagged as a text box.
    TextBox,
    /// Picture.
    Picture,
    /// Graphic frame (table, chart).
    GraphicFrame,
    /// Connector line.
    Connector,
    /// Group of shapes.
    Group,
    /// Ink / content part.
    ContentPart,
}

impl ShapeKind {
    /// Classify a drawable node.
    pub fn of(node: &MarkupNode) -> Option<Self> {
        match node.name.as_str() {
            "p:sp" => {
                let text_box = node
                    .find("p:nvSpPr/p:cNvSpPr")
                    .and_then(|n| n.attr("txBox"))
                    .map_or(false, |v| v == "1");
                Some(if text_box { Self::TextBox } else { Self::AutoShape })
            }
            "p:pic" => Some(Self::Picture),
            "p:graphicFrame" => Some(Self::GraphicFrame),
            "p:cxnSp" => Some(Self::Connector),
            "p:grpSp" => Some(Self::Group),
            "p:contentPart" => Some(Self::ContentPart),
            _ => None,
        }
    }

    /// Name of the shape-properties child that holds fill, line and (usually) the transform.
    pub fn properties_element(&self) -> Option<&'static str> {
        match self {
            Self::AutoShape | Self::TextBox | Self::Picture | Self::Connector => Some("p:spPr"),
            Self::Group => Some("p:grpSpPr"),
            Self::GraphicFrame | Self::ContentPart => None,
        }
    }

    /// Path (relative to the shape node) of its transform.
    pub fn xfrm_path(&self) -> &'static str {
        match self {
            Self::Group => "p:grpSpPr/a:xfrm",
            Self::GraphicFrame | Self::ContentPart => "p:xfrm",
            _ => "p:spPr/a:xfrm",
        }
    }

    /// Name of the non-visual properties child (holds `p:cNvPr`).
    fn non_visual_element(&self) -> &'static str {
        match self {
            Self::AutoShape | Self::TextBox => "p:nvSpPr",
            Self::Picture => "p:nvPicPr",
            Self::GraphicFrame => "p:nvGraphicFramePr",
            Self::Connector => "p:nvCxnSpPr",
            Self::Group => "p:nvGrpSpPr",
            Self::ContentPart => "p:nvContentPartPr",
        }
    }
}

/// Placeholder marker on a shape (`p:ph`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderRef {
    /// Placeholder type (`title`, `body`, `ctrTitle`, ...). Absent type means `obj`.
    pub kind: String,
    /// Placeholder index.
    pub idx: u32,
}

/// Borrowed view over one drawable shape node.
#[derive(Debug, Clone, Copy)]
pub struct ShapeView<'a> {
    node: &'a MarkupNode,
    kind: ShapeKind,
}

impl<'a> ShapeView<'a> {
    /// Wrap a drawable node. Returns `None` for non-drawable nodes.
    pub fn new(node: &'a MarkupNode) -> Option<Self> {
        ShapeKind::of(node).map(|kind| Self { node, kind })
    }

    /// Underlying node.
    pub fn node(&self) -> &'a MarkupNode {
        self.node
    }

    /// Shape kind.
    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    fn c_nv_pr(&self) -> Option<&'a MarkupNode> {
        self.node.find(self.kind.non_visual_element())?.child("p:cNvPr")
    }

    /// Document-unique shape id (`p:cNvPr@id`).
    pub fn id(&self) -> Option<u32> {
        self.c_nv_pr()?.attr("id")?.parse().ok()
    }

    /// Display name (`p:cNvPr@name`).
    pub fn name(&self) -> &'a str {
        self.c_nv_pr().and_then(|n| n.attr("name")).unwrap_or("")
    }

    /// Geometry, when the shape carries an explicit transform.
    pub fn geometry(&self) -> Option<Geometry> {
        self.node.find(self.kind.xfrm_path()).and_then(Geometry::from_xfrm)
    }

    /// Placeholder marker, when the shape is a placeholder.
    pub fn placeholder(&self) -> Option<PlaceholderRef> {
        let ph = self
            .node
            .find(self.kind.non_visual_element())?
            .find("p:nvPr/p:ph")?;
        Some(PlaceholderRef {
            kind: ph.attr("type").unwrap_or("obj").to_string(),
            idx: ph.attr("idx").and_then(|v| v.parse().ok()).unwrap_or(0),
        })
    }

    /// Text content: runs concatenated per paragraph, paragraphs joined by `\n`.
    pub fn text(&self) -> String {
        let Some(body) = self.node.child("p:txBody") else {
            return String::new();
        };
        body.children
            .iter()
            .filter(|c| c.name == "a:p")
            .map(|p| {
                let mut runs = Vec::new();
                p.descendants("a:t", &mut runs);
                runs.iter().filter_map(|t| t.text.as_deref()).collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Placeholder declared by a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPlaceholder {
    /// Placeholder type.
    pub kind: String,
    /// Placeholder index.
    pub idx: u32,
    /// Display name used for the instantiated shape.
    pub name: String,
    /// Geometry declared on the layout; `None` means inherited from the master.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

/// Slide layout (template).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    /// Layout name, also its identity.
    pub name: String,
    /// Declared placeholders in paint order.
    pub placeholders: Vec<LayoutPlaceholder>,
}

/// Placeholder geometry defined on the slide master, by placeholder type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterDefaults {
    /// Geometry per placeholder type.
    pub placeholders: BTreeMap<String, Geometry>,
}

impl MasterDefaults {
    /// Master geometry for a placeholder type, following type inheritance
    /// (`ctrTitle` → `title`, `subTitle`/`obj` → `body`).
    pub fn geometry_for(&self, kind: &str) -> Option<Geometry> {
        if let Some(g) = self.placeholders.get(kind) {
            return Some(*g);
        }
        let parent = match kind {
            "ctrTitle" => "title",
            "subTitle" | "obj" | "tbl" | "chart" | "pic" => "body",
            _ => return None,
        };
        self.placeholders.get(parent).copied()
    }
}

/// Theme fonts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeFonts {
    /// Heading font.
    pub major: String,
    /// Body font.
    pub minor: String,
}

/// Theme colors and fonts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Theme name.
    pub name: String,
    /// Color scheme slot → `RRGGBB`.
    pub colors: BTreeMap<String, String>,
    /// Font scheme.
    pub fonts: ThemeFonts,
}

impl Default for Theme {
    fn default() -> Self {
        let colors = [
            ("dk1", "000000"),
            ("lt1", "FFFFFF"),
            ("dk2", "44546A"),
            ("lt2", "E7E6E6"),
            ("accent1", "4472C4"),
            ("accent2", "ED7D31"),
            ("accent3", "A5A5A5"),
            ("accent4", "FFC000"),
            ("accent5", "5B9BD5"),
            ("accent6", "70AD47"),
            ("hlink", "0563C1"),
            ("folHlink", "954F72"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            name: "Office Theme".to_string(),
            colors,
            fonts: ThemeFonts {
                major: "Calibri Light".to_string(),
                minor: "Calibri".to_string(),
            },
        }
    }
}

/// Presentation → slide relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideRelationship {
    /// Relationship id (`rIdN`).
    pub id: String,
    /// Target slide part name.
    pub target: String,
}

/// One slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    /// Part name of the slide.
    pub part_name: String,
    /// Name of the layout the slide uses.
    pub layout: String,
    /// Root `p:spTree`.
    pub tree: MarkupNode,
}

impl Slide {
    /// Drawable shapes in paint order.
    pub fn shapes(&self) -> Vec<ShapeView<'_>> {
        self.tree.children.iter().filter_map(ShapeView::new).collect()
    }

    /// Number of drawable shapes.
    pub fn shape_count(&self) -> usize {
        self.tree.children.iter().filter(|c| is_drawable(c)).count()
    }

    /// Shape at a positional index.
    pub fn shape(&self, index: usize) -> Option<ShapeView<'_>> {
        self.tree.children.iter().filter_map(ShapeView::new).nth(index)
    }

    /// Position in `tree.children` of the `index`-th drawable.
    pub fn tree_position(&self, index: usize) -> Option<usize> {
        self.tree
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| is_drawable(c))
            .nth(index)
            .map(|(pos, _)| pos)
    }

    /// Shape node at a positional index, mutably.
    pub fn shape_node_mut(&mut self, index: usize) -> Option<&mut MarkupNode> {
        let pos = self.tree_position(index)?;
        self.tree.children.get_mut(pos)
    }

    /// Next free `p:cNvPr@id` on this slide.
    pub fn next_shape_id(&self) -> u32 {
        let mut ids = Vec::new();
        self.tree.descendants("p:cNvPr", &mut ids);
        ids.iter()
            .filter_map(|n| n.attr("id").and_then(|v| v.parse::<u32>().ok()))
            .max()
            .unwrap_or(1)
            + 1
    }
}

/// What to draw when adding a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShape {
    /// Autoshape preset (e.g. `rect`, `ellipse`), or `None` for a text box.
    pub preset: Option<String>,
    /// Resolved geometry.
    pub geometry: Geometry,
    /// Optional initial text.
    pub text: Option<String>,
    /// Optional solid fill `RRGGBB`.
    pub fill: Option<String>,
    /// Optional display name.
    pub name: Option<String>,
}

/// An opened presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Slide width.
    pub slide_width: Emu,
    /// Slide height.
    pub slide_height: Emu,
    /// Theme.
    pub theme: Theme,
    /// Master placeholder geometry.
    pub master: MasterDefaults,
    /// Declared layouts.
    pub layouts: Vec<Layout>,
    /// Presentation → slide relationships.
    pub relationships: Vec<SlideRelationship>,
    slides: Vec<Slide>,
    /// Persisted positional-index generations.
    #[serde(default)]
    pub(crate) ledger: IndexLedger,
}

impl Document {
    /// Empty document with the given slide size, default theme and no layouts.
    pub fn new(slide_width: Emu, slide_height: Emu) -> Self {
        Self {
            slide_width,
            slide_height,
            theme: Theme::default(),
            master: MasterDefaults::default(),
            layouts: Vec::new(),
            relationships: Vec::new(),
            slides: Vec::new(),
            ledger: IndexLedger::default(),
        }
    }

    /// 16:9 document with the standard "Title Slide", "Title and Content" and "Blank" layouts.
    pub fn blank() -> Self {
        let mut doc = Self::new(DEFAULT_SLIDE_WIDTH, DEFAULT_SLIDE_HEIGHT);

        let master = [
            ("title", Geometry::new(838_200, 365_125, 10_515_600, 1_325_563)),
            ("body", Geometry::new(838_200, 1_825_625, 10_515_600, 4_351_338)),
            ("dt", Geometry::new(838_200, 6_356_350, 2_743_200, 365_125)),
            ("ftr", Geometry::new(4_038_600, 6_356_350, 4_114_800, 365_125)),
            ("sldNum", Geometry::new(8_610_600, 6_356_350, 2_743_200, 365_125)),
        ];
        doc.master.placeholders = master.into_iter().map(|(k, g)| (k.to_string(), g)).collect();

        let footer = |idx: u32| {
            [("dt", "Date Placeholder"), ("ftr", "Footer Placeholder"), ("sldNum", "Slide Number Placeholder")]
                .into_iter()
                .enumerate()
                .map(move |(i, (kind, name))| LayoutPlaceholder {
                    kind: kind.to_string(),
                    idx: idx + i as u32,
                    name: name.to_string(),
                    geometry: None,
                })
        };

        let mut title_slide = vec![
            LayoutPlaceholder {
                kind: "ctrTitle".to_string(),
                idx: 0,
                name: "Title 1".to_string(),
                geometry: Some(Geometry::new(1_524_000, 1_122_363, 9_144_000, 2_387_600)),
            },
            LayoutPlaceholder {
                kind: "subTitle".to_string(),
                idx: 1,
                name: "Subtitle 2".to_string(),
                geometry: Some(Geometry::new(1_524_000, 3_602_038, 9_144_000, 1_655_762)),
            },
        ];
        title_slide.extend(footer(10));

        let mut title_content = vec![
            LayoutPlaceholder {
                kind: "title".to_string(),
                idx: 0,
                name: "Title 1".to_string(),
                geometry: None,
            },
            LayoutPlaceholder {
                kind: "body".to_string(),
                idx: 1,
                name: "Content Placeholder 2".to_string(),
                geometry: Some(Geometry::new(838_200, 1_825_625, 10_515_600, 4_351_338)),
            },
        ];
        title_content.extend(footer(10));

        doc.layouts = vec![
            Layout { name: "Title Slide".to_string(), placeholders: title_slide },
            Layout { name: "Title and Content".to_string(), placeholders: title_content },
            Layout { name: "Blank".to_string(), placeholders: footer(10).collect() },
        ];
        doc
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse a document from its JSON form.
    pub fn from_json_slice(bytes: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize a document to its JSON form.
    pub fn to_json_vec(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Open a document from disk.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_json_slice(&bytes)
    }

    /// Write the document to disk atomically (temp file in the same directory, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let bytes = self.to_json_vec()?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        Ok(result?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Slides
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of slides.
    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }

    /// All slides in order.
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    /// Slide at a positional index.
    pub fn slide(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }

    /// Slide at a positional index, mutably.
    pub fn slide_mut(&mut self, index: usize) -> Option<&mut Slide> {
        self.slides.get_mut(index)
    }

    /// Layout by name.
    pub fn layout(&self, name: &str) -> Option<&Layout> {
        self.layouts.iter().find(|l| l.name == name)
    }

    fn slide_at(&self, index: usize) -> EngineResult<&Slide> {
        self.slides.get(index).ok_or_else(|| {
            EngineError::parameter("slide", format!("no slide {index} (count {})", self.slides.len()))
        })
    }

    fn slide_at_mut(&mut self, index: usize) -> EngineResult<&mut Slide> {
        let count = self.slides.len();
        self.slides
            .get_mut(index)
            .ok_or_else(|| EngineError::parameter("slide", format!("no slide {index} (count {count})")))
    }

    fn next_part_name(&self) -> String {
        let n = (1..)
            .find(|n| {
                let candidate = format!("ppt/slides/slide{n}.xml");
                !self.slides.iter().any(|s| s.part_name == candidate)
            })
            .unwrap_or(1);
        format!("ppt/slides/slide{n}.xml")
    }

    fn next_relationship_id(&self) -> String {
        let max = self
            .relationships
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId").and_then(|n| n.parse::<u32>().ok()))
            .max()
            .unwrap_or(0);
        format!("rId{}", max + 1)
    }

    /// Build (but do not attach) a slide realized from a layout.
    ///
    /// Each placeholder gets the layout's declared geometry, or the master's
    /// geometry for its type when the layout declares none. Date, footer and
    /// slide-number placeholders stay on the layout.
    pub fn instantiate_layout(&self, layout: &Layout) -> Slide {
        let mut tree = empty_shape_tree();
        let mut next_id = 2u32;

        for ph in layout.placeholders.iter().filter(|ph| !is_footer_placeholder(&ph.kind)) {
            let geometry = ph.geometry.or_else(|| self.master.geometry_for(&ph.kind));
            let mut ph_node = MarkupNode::new("p:ph").with_attr("idx", ph.idx.to_string());
            if ph.kind != "obj" {
                ph_node.set_attr("type", ph.kind.clone());
            }

            let mut sp_pr = MarkupNode::new("p:spPr");
            if let Some(g) = geometry {
                sp_pr.children.push(g.to_xfrm("a:xfrm"));
            }

            let shape = MarkupNode::new("p:sp")
                .with_child(
                    MarkupNode::new("p:nvSpPr")
                        .with_child(
                            MarkupNode::new("p:cNvPr")
                                .with_attr("id", next_id.to_string())
                                .with_attr("name", ph.name.clone()),
                        )
                        .with_child(MarkupNode::new("p:cNvSpPr"))
                        .with_child(MarkupNode::new("p:nvPr").with_child(ph_node)),
                )
                .with_child(sp_pr)
                .with_child(text_body(""));
            tree.children.push(shape);
            next_id += 1;
        }

        Slide {
            part_name: self.next_part_name(),
            layout: layout.name.clone(),
            tree,
        }
    }

    /// Append a slide built from the named layout. Returns its index.
    pub fn add_slide(&mut self, layout_name: &str) -> EngineResult<usize> {
        let layout = self
            .layout(layout_name)
            .ok_or_else(|| EngineError::UnknownLayout(layout_name.to_string()))?;
        let slide = self.instantiate_layout(layout);
        Ok(self.attach_slide(slide))
    }

    /// Append an already-built slide and its relationship. Returns its index.
    pub(crate) fn attach_slide(&mut self, slide: Slide) -> usize {
        self.relationships.push(SlideRelationship {
            id: self.next_relationship_id(),
            target: slide.part_name.clone(),
        });
        self.slides.push(slide);
        self.slides.len() - 1
    }

    /// Remove a slide and every relationship targeting it.
    pub fn remove_slide(&mut self, index: usize) -> EngineResult<Slide> {
        self.slide_at(index)?;
        let slide = self.slides.remove(index);
        self.relationships.retain(|r| r.target != slide.part_name);
        Ok(slide)
    }

    /// Move a slide from one position to another.
    pub fn move_slide(&mut self, from: usize, to: usize) -> EngineResult<()> {
        self.slide_at(from)?;
        if to >= self.slides.len() {
            return Err(EngineError::parameter(
                "to",
                format!("target position {to} out of range (count {})", self.slides.len()),
            ));
        }
        let slide = self.slides.remove(from);
        self.slides.insert(to, slide);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shapes
    // ─────────────────────────────────────────────────────────────────────────

    fn shape_node_mut(&mut self, slide: usize, shape: usize) -> EngineResult<&mut MarkupNode> {
        let s = self.slide_at_mut(slide)?;
        let count = s.shape_count();
        s.shape_node_mut(shape).ok_or_else(|| {
            EngineError::parameter("shape", format!("no shape {shape} on slide {slide} (count {count})"))
        })
    }

    /// Add a shape on top of the paint order. Returns its index.
    pub fn add_shape(&mut self, slide: usize, shape: NewShape) -> EngineResult<usize> {
        let s = self.slide_at_mut(slide)?;
        let id = s.next_shape_id();
        let text_box = shape.preset.is_none();
        let name = shape.name.clone().unwrap_or_else(|| {
            if text_box {
                format!("TextBox {}", id - 1)
            } else {
                format!("Shape {}", id - 1)
            }
        });

        let mut c_nv_sp_pr = MarkupNode::new("p:cNvSpPr");
        if text_box {
            c_nv_sp_pr.set_attr("txBox", "1");
        }

        let mut sp_pr = MarkupNode::new("p:spPr")
            .with_child(shape.geometry.to_xfrm("a:xfrm"))
            .with_child(
                MarkupNode::new("a:prstGeom")
                    .with_attr("prst", shape.preset.clone().unwrap_or_else(|| "rect".to_string()))
                    .with_child(MarkupNode::new("a:avLst")),
            );
        match (&shape.fill, text_box) {
            (Some(rgb), _) => sp_pr.children.push(solid_fill(rgb)),
            (None, true) => sp_pr.children.push(MarkupNode::new("a:noFill")),
            (None, false) => {}
        }

        let node = MarkupNode::new("p:sp")
            .with_child(
                MarkupNode::new("p:nvSpPr")
                    .with_child(
                        MarkupNode::new("p:cNvPr")
                            .with_attr("id", id.to_string())
                            .with_attr("name", name),
                    )
                    .with_child(c_nv_sp_pr)
                    .with_child(MarkupNode::new("p:nvPr")),
            )
            .with_child(sp_pr)
            .with_child(text_body(shape.text.as_deref().unwrap_or("")));

        // Drawables go before a trailing p:extLst, if any.
        let at = s.tree.child_position("p:extLst").unwrap_or(s.tree.children.len());
        s.tree.children.insert(at, node);
        Ok(s.shape_count() - 1)
    }

    /// Remove a shape. Returns the removed node.
    pub fn remove_shape(&mut self, slide: usize, shape: usize) -> EngineResult<MarkupNode> {
        let s = self.slide_at_mut(slide)?;
        let count = s.shape_count();
        let pos = s.tree_position(shape).ok_or_else(|| {
            EngineError::parameter("shape", format!("no shape {shape} on slide {slide} (count {count})"))
        })?;
        Ok(s.tree.children.remove(pos))
    }

    /// Replace a shape's text. Paragraph and body properties are kept.
    pub fn set_shape_text(&mut self, slide: usize, shape: usize, text: &str) -> EngineResult<()> {
        let node = self.shape_node_mut(slide, shape)?;
        if node.name != "p:sp" {
            return Err(EngineError::parameter(
                "shape",
                format!("{} cannot hold text", node.name),
            ));
        }
        match node.child_mut("p:txBody") {
            Some(body) => {
                body.remove_children("a:p");
                body.children.extend(paragraphs(text));
            }
            None => node.children.push(text_body(text)),
        }
        Ok(())
    }

    /// Move and/or resize a shape. Creates the transform if the shape inherited one.
    pub fn set_shape_geometry(&mut self, slide: usize, shape: usize, geometry: Geometry) -> EngineResult<()> {
        let node = self.shape_node_mut(slide, shape)?;
        let kind = ShapeKind::of(node)
            .ok_or_else(|| EngineError::patch(node.name.clone(), "not a drawable shape"))?;

        match kind.properties_element() {
            Some(props) => {
                let element = node.child_mut(props).ok_or_else(|| {
                    EngineError::patch(format!("{}/{props}", node_label(kind)), "shape has no properties node")
                })?;
                element.remove_children("a:xfrm");
                element.insert_ordered(geometry.to_xfrm("a:xfrm"), SHAPE_PROPERTIES_ORDER);
            }
            None => {
                let at = node.child_position("p:xfrm");
                let xfrm = geometry.to_xfrm("p:xfrm");
                match at {
                    Some(at) => node.children[at] = xfrm,
                    None => node.children.insert(node.children.len().min(1), xfrm),
                }
            }
        }
        Ok(())
    }

    /// Set a solid fill color (`RRGGBB`), replacing any other fill.
    pub fn set_fill_color(&mut self, slide: usize, shape: usize, rgb: &str) -> EngineResult<()> {
        let node = self.shape_node_mut(slide, shape)?;
        let kind = ShapeKind::of(node)
            .ok_or_else(|| EngineError::patch(node.name.clone(), "not a drawable shape"))?;
        let props = kind
            .properties_element()
            .ok_or_else(|| EngineError::patch(node_label(kind), "shape kind has no fill"))?;
        let element = node
            .child_mut(props)
            .ok_or_else(|| EngineError::patch(format!("{}/{props}", node_label(kind)), "missing"))?;
        for fill in ["a:noFill", "a:solidFill", "a:gradFill", "a:blipFill", "a:pattFill", "a:grpFill"] {
            element.remove_children(fill);
        }
        element.insert_ordered(solid_fill(rgb), SHAPE_PROPERTIES_ORDER);
        Ok(())
    }

    /// Ledger of positional-index generations.
    pub fn ledger(&self) -> &IndexLedger {
        &self.ledger
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut IndexLedger {
        &mut self.ledger
    }
}

/// Element name of a shape kind, for error paths.
pub(crate) fn node_label(kind: ShapeKind) -> &'static str {
    match kind {
        ShapeKind::AutoShape | ShapeKind::TextBox => "p:sp",
        ShapeKind::Picture => "p:pic",
        ShapeKind::GraphicFrame => "p:graphicFrame",
        ShapeKind::Connector => "p:cxnSp",
        ShapeKind::Group => "p:grpSp",
        ShapeKind::ContentPart => "p:contentPart",
    }
}

/// Placeholder types that are not copied onto new slides.
pub fn is_footer_placeholder(kind: &str) -> bool {
    matches!(kind, "dt" | "ftr" | "sldNum")
}

fn empty_shape_tree() -> MarkupNode {
    MarkupNode::new("p:spTree")
        .with_child(
            MarkupNode::new("p:nvGrpSpPr")
                .with_child(MarkupNode::new("p:cNvPr").with_attr("id", "1").with_attr("name", ""))
                .with_child(MarkupNode::new("p:cNvGrpSpPr"))
                .with_child(MarkupNode::new("p:nvPr")),
        )
        .with_child(MarkupNode::new("p:grpSpPr").with_child(
            MarkupNode::new("a:xfrm")
                .with_child(MarkupNode::new("a:off").with_attr("x", "0").with_attr("y", "0"))
                .with_child(MarkupNode::new("a:ext").with_attr("cx", "0").with_attr("cy", "0"))
                .with_child(MarkupNode::new("a:chOff").with_attr("x", "0").with_attr("y", "0"))
                .with_child(MarkupNode::new("a:chExt").with_attr("cx", "0").with_attr("cy", "0")),
        ))
}

fn solid_fill(rgb: &str) -> MarkupNode {
    MarkupNode::new("a:solidFill")
        .with_child(MarkupNode::new("a:srgbClr").with_attr("val", rgb.trim_start_matches('#').to_uppercase()))
}

fn paragraphs(text: &str) -> Vec<MarkupNode> {
    text.split('\n')
        .map(|line| {
            let p = MarkupNode::new("a:p");
            if line.is_empty() {
                p
            } else {
                p.with_child(MarkupNode::new("a:r").with_child(MarkupNode::new("a:t").with_text(line)))
            }
        })
        .collect()
}

fn text_body(text: &str) -> MarkupNode {
    let mut body = MarkupNode::new("p:txBody")
        .with_child(MarkupNode::new("a:bodyPr"))
        .with_child(MarkupNode::new("a:lstStyle"));
    body.children.extend(paragraphs(text));
    body
}

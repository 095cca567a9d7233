//! Core types for the mutation engine.

pub mod units;
pub mod tree;
pub mod document;
pub mod addressing;
pub mod version;

pub use units::{Emu, parse_length, EMU_PER_INCH, EMU_PER_POINT, EMU_PER_CM};
pub use tree::MarkupNode;
pub use document::{
    Document, Slide, ShapeView, ShapeKind, Geometry, Layout, LayoutPlaceholder,
    MasterDefaults, NewShape, PlaceholderRef, SlideRelationship, Theme, ThemeFonts,
    DEFAULT_SLIDE_WIDTH, DEFAULT_SLIDE_HEIGHT,
};
pub use addressing::{AddressingSpec, SizeSpec, Extent, AnchorPoint, parse_percent};
pub use version::{VersionToken, GeometrySnapshot, SlideGeometry, ShapeGeometry, TokenFormatError};

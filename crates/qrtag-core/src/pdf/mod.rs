mod background;
mod font;
mod render;
mod story;

pub use background::{BoundingBox, PageTemplate};
pub use font::{CaptionFont, EmbeddedFont, StandardFont};
pub use render::{PdfRenderer, StoryRenderer};
pub use story::{Alignment, CaptionStyle, LayoutPrimitive, TemplateRegistry};

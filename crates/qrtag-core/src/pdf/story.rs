//! Layout primitives and the ordered "story" handed to a renderer.

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::background::PageTemplate;

/// Horizontal placement inside the content frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

impl Alignment {
    /// X offset of an item `item_width` wide inside a frame `frame_width` wide
    pub fn offset(self, frame_width: f32, item_width: f32) -> f32 {
        match self {
            Self::Left => 0.0,
            Self::Center => (frame_width - item_width) / 2.0,
            Self::Right => frame_width - item_width,
        }
    }
}

/// Paragraph style of a caption
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    /// Name the font was registered under with the renderer
    pub font_name: String,
    pub font_size: f32,
    /// Distance between baselines of wrapped lines
    pub leading: f32,
    pub alignment: Alignment,
    pub first_line_indent: f32,
    pub space_before: f32,
    pub space_after: f32,
}

/// One layout instruction. Order within a story is significant.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutPrimitive {
    /// Use the named page template for the next page that starts
    TemplateSwitch(String),
    /// Empty vertical space
    Spacer { width: f32, height: f32 },
    /// Raster image read from disk at render time
    Image {
        path: PathBuf,
        width: f32,
        height: f32,
        align: Alignment,
    },
    /// Wrapped text paragraph
    Caption { text: String, style: CaptionStyle },
    /// End the current page
    PageBreak,
}

/// Named page templates available to a story.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, PageTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, template: PageTemplate) {
        self.templates.insert(name.into(), template);
    }

    pub fn get(&self, name: &str) -> Option<&PageTemplate> {
        self.templates.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PageTemplate)> {
        self.templates.iter().map(|(name, t)| (name.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

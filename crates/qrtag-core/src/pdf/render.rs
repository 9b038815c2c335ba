//! Story rendering.
//!
//! A story is consumed top to bottom. The first primitive that needs room
//! opens a page. The page starts with the current template's background, and
//! content then flows down the layout frame. A page ends on `PageBreak` or at
//! the end of the story. Content never silently flows onto another page; if
//! it does not fit, rendering fails.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use super::background::PageTemplate;
use super::font::{CaptionFont, EmbeddedFont, StandardFont};
use super::story::{Alignment, CaptionStyle, LayoutPrimitive, TemplateRegistry};
use crate::config::{Frame, LayoutPolicy};
use crate::error::{Error, Result};
use crate::util;

/// Resource name of the background form on every page
const BACKGROUND_RESOURCE: &str = "Bg";

/// Slack for float comparisons against the frame bottom
const FIT_TOLERANCE: f32 = 0.01;

/// Turns a story into a paginated document at `output`.
///
/// Implementations must either produce the complete file or leave `output`
/// untouched.
pub trait StoryRenderer: Send + Sync {
    fn render(
        &self,
        story: &[LayoutPrimitive],
        templates: &TemplateRegistry,
        output: &Path,
    ) -> Result<()>;
}

/// Renders stories to PDF with lopdf.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    layout: LayoutPolicy,
    fonts: BTreeMap<String, CaptionFont>,
}

impl PdfRenderer {
    /// Renderer with the standard Helvetica font registered as "Helvetica".
    pub fn new(layout: LayoutPolicy) -> Self {
        let fonts = BTreeMap::from([(
            StandardFont::Helvetica.base_font().to_string(),
            CaptionFont::Standard(StandardFont::Helvetica),
        )]);
        Self { layout, fonts }
    }

    /// Make an embedded font available to captions under `name`.
    #[must_use]
    pub fn with_font(mut self, name: impl Into<String>, font: EmbeddedFont) -> Self {
        self.fonts.insert(name.into(), CaptionFont::Embedded(font));
        self
    }

    pub const fn layout(&self) -> &LayoutPolicy {
        &self.layout
    }

    /// Render a story into PDF bytes.
    pub fn render_to_bytes(
        &self,
        story: &[LayoutPrimitive],
        templates: &TemplateRegistry,
    ) -> Result<Vec<u8>> {
        let mut writer = DocumentWriter::new(&self.layout, templates);
        writer.register_fonts(&self.fonts, story)?;

        for (index, primitive) in story.iter().enumerate() {
            writer.place(index, primitive, &self.fonts)?;
        }

        writer.finish()
    }
}

impl StoryRenderer for PdfRenderer {
    fn render(
        &self,
        story: &[LayoutPrimitive],
        templates: &TemplateRegistry,
        output: &Path,
    ) -> Result<()> {
        let bytes = self.render_to_bytes(story, templates)?;
        write_atomically(output, &bytes)?;
        debug!("Wrote {} bytes to {}", bytes.len(), output.display());
        Ok(())
    }
}

/// Stage `bytes` next to `output` and move them into place in one step.
fn write_atomically(output: &Path, bytes: &[u8]) -> Result<()> {
    let dir = util::parent_dir(output);
    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::Render(format!("Failed to stage output in {}: {e}", dir.display())))?;

    staged
        .write_all(bytes)
        .and_then(|()| staged.flush())
        .map_err(|e| Error::Render(format!("Failed to write staged output: {e}")))?;

    staged
        .persist(output)
        .map_err(|e| Error::Render(format!("Failed to write {}: {}", output.display(), e.error)))?;

    Ok(())
}

/// Greedy word wrap by measured width.
///
/// A single word wider than `max_width` gets a line of its own.
fn wrap_words(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
            continue;
        }

        let candidate = format!("{current_line} {word}");
        if measure(&candidate) <= max_width {
            current_line = candidate;
        } else {
            lines.push(std::mem::replace(&mut current_line, word.to_string()));
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    lines
}

// =============================================================================
// Document Assembly
// =============================================================================

/// A font registered in the output document
struct FontSlot {
    resource: String,
    id: ObjectId,
}

/// Content of the page being filled
struct PageBuilder {
    operations: Vec<Operation>,
    xobjects: Dictionary,
    /// Top of the free space, in page coordinates
    cursor_y: f32,
    images: usize,
}

struct DocumentWriter<'a> {
    doc: Document,
    pages_id: ObjectId,
    frame: Frame,
    page_width: f32,
    page_height: f32,
    templates: &'a TemplateRegistry,
    /// Template forms already copied into `doc`
    forms: BTreeMap<String, ObjectId>,
    fonts: BTreeMap<String, FontSlot>,
    current_template: Option<String>,
    page: Option<PageBuilder>,
    kids: Vec<ObjectId>,
}

impl<'a> DocumentWriter<'a> {
    fn new(layout: &LayoutPolicy, templates: &'a TemplateRegistry) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        Self {
            doc,
            pages_id,
            frame: layout.frame(),
            page_width: layout.page_width(),
            page_height: layout.page_height(),
            templates,
            forms: BTreeMap::new(),
            fonts: BTreeMap::new(),
            current_template: None,
            page: None,
            kids: Vec::new(),
        }
    }

    /// Register every font a caption in `story` refers to, once.
    fn register_fonts(
        &mut self,
        available: &BTreeMap<String, CaptionFont>,
        story: &[LayoutPrimitive],
    ) -> Result<()> {
        let mut used: BTreeMap<&str, BTreeSet<char>> = BTreeMap::new();
        for primitive in story {
            if let LayoutPrimitive::Caption { text, style } = primitive {
                used.entry(style.font_name.as_str())
                    .or_default()
                    .extend(text.chars());
            }
        }

        for (index, (name, chars)) in used.into_iter().enumerate() {
            let font = available
                .get(name)
                .ok_or_else(|| Error::Render(format!("Font '{name}' is not registered")))?;
            let id = font.register(&mut self.doc, &chars)?;
            self.fonts.insert(
                name.to_string(),
                FontSlot {
                    resource: format!("F{}", index + 1),
                    id,
                },
            );
        }

        Ok(())
    }

    fn place(
        &mut self,
        index: usize,
        primitive: &LayoutPrimitive,
        fonts: &BTreeMap<String, CaptionFont>,
    ) -> Result<()> {
        match primitive {
            LayoutPrimitive::TemplateSwitch(name) => {
                if self.templates.get(name).is_none() {
                    return Err(Error::Render(format!("Unknown page template '{name}'")));
                }
                self.current_template = Some(name.clone());
                Ok(())
            }
            LayoutPrimitive::Spacer { height, .. } => {
                let page_number = self.page_number();
                let bottom = self.frame.y;
                let page = self.page_mut()?;
                page.cursor_y = take_space(page.cursor_y, *height, bottom, index, page_number)?;
                Ok(())
            }
            LayoutPrimitive::Image {
                path,
                width,
                height,
                align,
            } => {
                let image_id = self.embed_image(path)?;
                self.draw_image(index, image_id, *width, *height, *align)
            }
            LayoutPrimitive::Caption { text, style } => {
                let font = fonts
                    .get(&style.font_name)
                    .ok_or_else(|| Error::Render(format!("Font '{}' is not registered", style.font_name)))?;
                self.draw_caption(index, text, style, font)
            }
            LayoutPrimitive::PageBreak => self.close_page(),
        }
    }

    fn page_number(&self) -> usize {
        self.kids.len() + 1
    }

    fn page_mut(&mut self) -> Result<&mut PageBuilder> {
        if self.page.is_none() {
            let page = self.open_page()?;
            self.page = Some(page);
        }
        self.page
            .as_mut()
            .ok_or_else(|| Error::Render("No open page".to_string()))
    }

    /// Start a page, drawing the current template's background first.
    fn open_page(&mut self) -> Result<PageBuilder> {
        let mut page = PageBuilder {
            operations: Vec::new(),
            xobjects: Dictionary::new(),
            cursor_y: self.frame.top(),
            images: 0,
        };

        if let Some(name) = self.current_template.clone() {
            let templates = self.templates;
            let template = templates
                .get(&name)
                .ok_or_else(|| Error::Render(format!("Unknown page template '{name}'")))?;
            let form_id = self.form_for(&name, template);
            page.xobjects.set(BACKGROUND_RESOURCE, Object::Reference(form_id));
            page.operations.extend(template.draw_operations(BACKGROUND_RESOURCE));
        }

        Ok(page)
    }

    /// Form XObject of a template, copied into the document on first use.
    fn form_for(&mut self, name: &str, template: &PageTemplate) -> ObjectId {
        if let Some(&id) = self.forms.get(name) {
            return id;
        }
        let id = template.register(&mut self.doc);
        self.forms.insert(name.to_string(), id);
        id
    }

    fn embed_image(&mut self, path: &Path) -> Result<ObjectId> {
        let image = image::open(path)
            .map_err(|e| Error::Render(format!("Failed to read image {}: {e}", path.display())))?
            .to_luma8();

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(i64::from(image.width()))),
            ("Height", Object::Integer(i64::from(image.height()))),
            ("ColorSpace", Object::Name(b"DeviceGray".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
            // Keep module edges sharp when scaled up
            ("Interpolate", Object::Boolean(false)),
        ]);

        let stream = Stream::new(dict, image.into_raw()).with_compression(true);
        Ok(self.doc.add_object(stream))
    }

    fn draw_image(
        &mut self,
        index: usize,
        image_id: ObjectId,
        width: f32,
        height: f32,
        align: Alignment,
    ) -> Result<()> {
        let page_number = self.page_number();
        let frame = self.frame;
        let page = self.page_mut()?;

        let y = take_space(page.cursor_y, height, frame.y, index, page_number)?;
        let x = frame.x + align.offset(frame.width, width);

        page.images += 1;
        let name = format!("Im{}", page.images);
        page.xobjects.set(name.as_bytes(), Object::Reference(image_id));
        page.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(width),
                    Object::Real(0.0),
                    Object::Real(0.0),
                    Object::Real(height),
                    Object::Real(x),
                    Object::Real(y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
            Operation::new("Q", vec![]),
        ]);
        page.cursor_y = y;

        Ok(())
    }

    fn draw_caption(
        &mut self,
        index: usize,
        text: &str,
        style: &CaptionStyle,
        font: &CaptionFont,
    ) -> Result<()> {
        let resource = self
            .fonts
            .get(&style.font_name)
            .map(|slot| slot.resource.clone())
            .ok_or_else(|| Error::Render(format!("Font '{}' is not registered", style.font_name)))?;

        let page_number = self.page_number();
        let frame = self.frame;
        let page = self.page_mut()?;

        let lines = wrap_words(text, frame.width - style.first_line_indent, |s| {
            font.string_width(s, style.font_size)
        });

        #[allow(clippy::cast_precision_loss)]
        let text_height = style.leading * lines.len() as f32;
        let bottom = take_space(
            page.cursor_y,
            style.space_before + text_height,
            frame.y,
            index,
            page_number,
        )?;

        let mut line_top = page.cursor_y - style.space_before;
        for (line_index, line) in lines.iter().enumerate() {
            let indent = if line_index == 0 { style.first_line_indent } else { 0.0 };
            let line_width = font.string_width(line, style.font_size);
            let x = frame.x + indent + style.alignment.offset(frame.width - indent, line_width);
            let baseline = line_top - style.font_size;

            page.operations.extend([
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(resource.as_bytes().to_vec()),
                        Object::Real(style.font_size),
                    ],
                ),
                Operation::new("Td", vec![Object::Real(x), Object::Real(baseline)]),
                Operation::new("Tj", vec![font.encode(line)]),
                Operation::new("ET", vec![]),
            ]);

            line_top -= style.leading;
        }

        // Trailing space may be cut short by the frame bottom
        page.cursor_y = (bottom - style.space_after).max(frame.y);
        Ok(())
    }

    /// End the current page. With no page open, an empty page is emitted.
    fn close_page(&mut self) -> Result<()> {
        let page = match self.page.take() {
            Some(page) => page,
            None => self.open_page()?,
        };

        let content = Content {
            operations: page.operations,
        }
        .encode()
        .map_err(|e| Error::Render(format!("Failed to encode page content: {e}")))?;
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content).with_compression(true));

        let font_resources: Dictionary = self
            .fonts
            .values()
            .map(|slot| (slot.resource.clone(), Object::Reference(slot.id)))
            .collect();

        let resources = Dictionary::from_iter([
            ("Font", Object::Dictionary(font_resources)),
            ("XObject", Object::Dictionary(page.xobjects)),
        ]);

        let page_id = self.doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(self.pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(self.page_width),
                    Object::Real(self.page_height),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Dictionary(resources)),
        ]));

        self.kids.push(page_id);
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        if self.page.is_some() {
            self.close_page()?;
        }
        if self.kids.is_empty() {
            return Err(Error::Render("Story produced no pages".to_string()));
        }

        let kids: Vec<Object> = self.kids.iter().map(|&id| Object::Reference(id)).collect();
        let count = i64::try_from(kids.len()).unwrap_or(i64::MAX);

        let pages = Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ]);
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(self.pages_id)),
        ]));
        self.doc.trailer.set("Root", Object::Reference(catalog_id));
        self.doc.compress();

        let mut output = Vec::new();
        self.doc
            .save_to(&mut output)
            .map_err(|e| Error::Render(format!("Failed to save PDF: {e}")))?;

        debug!("Rendered {count} page(s)");
        Ok(output)
    }
}

/// Move the cursor down by `height`, failing if that passes the frame bottom.
fn take_space(cursor_y: f32, height: f32, bottom: f32, index: usize, page: usize) -> Result<f32> {
    let y = cursor_y - height;
    if y < bottom - FIT_TOLERANCE {
        return Err(Error::Render(format!(
            "Story item {index} needs {height:.1}pt but only {:.1}pt remain on page {page}",
            (cursor_y - bottom).max(0.0)
        )));
    }
    Ok(y)
}

//! Background page templates.
//!
//! The first page of a source PDF is captured as a self-contained Form
//! XObject "stamp": its decoded content stream, its resource dictionary and
//! every object those resources reference. The stamp is registered once per
//! output document and drawn behind every page, stretched independently on
//! each axis to cover the page.
//!
//! # Coordinate System
//!
//! The form keeps the source page's MediaBox as its `/BBox`. Drawing applies
//!
//! ```text
//! [sx 0 0 sy -x0·sx -y0·sy] cm
//! ```
//!
//! so the box corner `(x0, y0)` lands on the page origin and the far corner on
//! `(page_width, page_height)`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::error::{Error, Result};

/// How many `Parent` links to follow for inherited page attributes.
/// Guards against circular page trees.
const INHERIT_DEPTH: usize = 10;

/// Bounding box in PDF coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Build from a PDF rectangle, whose corners may come in any order
    pub fn from_rect(rect: [f32; 4]) -> Self {
        Self {
            x0: rect[0].min(rect[2]),
            y0: rect[1].min(rect[3]),
            x1: rect[0].max(rect[2]),
            y1: rect[1].max(rect[3]),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Convert to array format [x0, y0, x1, y1]
    pub const fn as_array(self) -> [f32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

/// Captured page content, portable to any target document.
#[derive(Debug, Clone)]
struct FormStamp {
    content: Vec<u8>,
    resources: Dictionary,
    /// Objects reachable from `resources`, keyed by their id in the source
    objects: BTreeMap<ObjectId, Object>,
}

/// A background drawing scaled to fill the output page.
///
/// Built once per document and never changed afterwards.
#[derive(Debug, Clone)]
pub struct PageTemplate {
    bbox: BoundingBox,
    scale_x: f32,
    scale_y: f32,
    stamp: FormStamp,
}

impl PageTemplate {
    /// Load the first page of the PDF at `source`.
    pub fn load(source: impl AsRef<Path>, page_width: f32, page_height: f32) -> Result<Self> {
        let path = source.as_ref();
        let doc = Document::load(path).map_err(|e| Error::AssetLoad {
            path: path.to_path_buf(),
            reason: format!("Failed to open PDF: {e}"),
        })?;

        let template = Self::from_document(&doc, page_width, page_height).map_err(|reason| {
            Error::AssetLoad {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        debug!(
            "Loaded background {} ({}x{} pt, scale {:.3}x{:.3})",
            path.display(),
            template.bbox.width(),
            template.bbox.height(),
            template.scale_x,
            template.scale_y
        );

        Ok(template)
    }

    /// Load the first page of an in-memory PDF.
    pub fn from_bytes(bytes: &[u8], page_width: f32, page_height: f32) -> Result<Self> {
        let in_memory = || PathBuf::from("<memory>");
        let doc = Document::load_mem(bytes).map_err(|e| Error::AssetLoad {
            path: in_memory(),
            reason: format!("Failed to parse PDF: {e}"),
        })?;

        Self::from_document(&doc, page_width, page_height).map_err(|reason| Error::AssetLoad {
            path: in_memory(),
            reason,
        })
    }

    fn from_document(
        doc: &Document,
        page_width: f32,
        page_height: f32,
    ) -> std::result::Result<Self, String> {
        let pages = doc.get_pages();
        let Some(&page_id) = pages.values().next() else {
            return Err("document has no pages".to_string());
        };

        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| format!("Failed to get first page: {e}"))?;

        let media_box = inherited(doc, page, b"MediaBox")
            .and_then(|obj| rect_from_object(doc, obj))
            .ok_or_else(|| "first page has no MediaBox".to_string())?;

        let bbox = BoundingBox::from_rect(media_box);
        if bbox.width() <= 0.0 || bbox.height() <= 0.0 {
            return Err(format!("first page has an empty MediaBox {media_box:?}"));
        }

        let resources = inherited(doc, page, b"Resources")
            .and_then(|obj| resolve_dict(doc, obj))
            .unwrap_or_else(Dictionary::new);

        let content = doc
            .get_page_content(page_id)
            .map_err(|e| format!("Failed to read page content: {e}"))?;

        let mut objects = BTreeMap::new();
        for (_, value) in resources.iter() {
            collect_references(doc, value, &mut objects);
        }

        Ok(Self {
            bbox,
            scale_x: page_width / bbox.width(),
            scale_y: page_height / bbox.height(),
            stamp: FormStamp {
                content,
                resources,
                objects,
            },
        })
    }

    /// Source page box the stamp was captured from
    pub const fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub const fn scale_x(&self) -> f32 {
        self.scale_x
    }

    pub const fn scale_y(&self) -> f32 {
        self.scale_y
    }

    /// Copy the stamp into `doc` as a Form XObject and return its id.
    ///
    /// Referenced objects get fresh ids in the target document. Call this once
    /// per document and share the id between pages.
    pub fn register(&self, doc: &mut Document) -> ObjectId {
        let ids: BTreeMap<ObjectId, ObjectId> = self
            .stamp
            .objects
            .keys()
            .map(|&old| (old, doc.new_object_id()))
            .collect();

        for (old, new) in &ids {
            if let Some(object) = self.stamp.objects.get(old) {
                doc.objects.insert(*new, remap(object, &ids));
            }
        }

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Form".to_vec())),
            ("FormType", Object::Integer(1)),
            (
                "BBox",
                Object::Array(self.bbox.as_array().into_iter().map(Object::Real).collect()),
            ),
            ("Resources", Object::Dictionary(remap_dict(&self.stamp.resources, &ids))),
        ]);

        let stream = Stream::new(dict, self.stamp.content.clone()).with_compression(true);
        doc.add_object(Object::Stream(stream))
    }

    /// Content stream operations that paint the stamp over the whole page.
    ///
    /// The graphics state is saved and restored around the drawing, so the
    /// transform does not leak into content drawn afterwards.
    pub fn draw_operations(&self, resource_name: &str) -> Vec<Operation> {
        vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(self.scale_x),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(self.scale_y),
                    Object::Real(-self.bbox.x0 * self.scale_x),
                    Object::Real(-self.bbox.y0 * self.scale_y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(resource_name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Look up a page attribute, walking up the Pages tree for inherited values.
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..=INHERIT_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        node = match node.get(b"Parent") {
            Ok(Object::Reference(parent_id)) => doc.get_dictionary(*parent_id).ok()?,
            _ => return None,
        };
    }
    None
}

/// Resolve an object that should be a Dictionary (handles References).
fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(ref_id) => doc.get_dictionary(*ref_id).ok().cloned(),
        _ => None,
    }
}

fn rect_from_object(doc: &Document, obj: &Object) -> Option<[f32; 4]> {
    let items = match obj {
        Object::Array(arr) => arr,
        Object::Reference(ref_id) => doc.get_object(*ref_id).ok()?.as_array().ok()?,
        _ => return None,
    };

    let values: Vec<f32> = items.iter().filter_map(number).collect();
    <[f32; 4]>::try_from(values).ok()
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        #[allow(clippy::cast_precision_loss)]
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Gather every object reachable from `obj` into `out`, keyed by source id.
///
/// `Parent` links are not followed so the page tree is never pulled in.
fn collect_references(doc: &Document, obj: &Object, out: &mut BTreeMap<ObjectId, Object>) {
    match obj {
        Object::Reference(id) => {
            if out.contains_key(id) {
                return;
            }
            if let Ok(target) = doc.get_object(*id) {
                out.insert(*id, target.clone());
                collect_references(doc, target, out);
            }
        }
        Object::Array(items) => {
            for item in items {
                collect_references(doc, item, out);
            }
        }
        Object::Dictionary(dict) => collect_dict_references(doc, dict, out),
        Object::Stream(stream) => collect_dict_references(doc, &stream.dict, out),
        _ => {}
    }
}

fn collect_dict_references(doc: &Document, dict: &Dictionary, out: &mut BTreeMap<ObjectId, Object>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            collect_references(doc, value, out);
        }
    }
}

/// Rewrite references through `ids`. Dangling references become null.
fn remap(obj: &Object, ids: &BTreeMap<ObjectId, ObjectId>) -> Object {
    match obj {
        Object::Reference(id) => ids.get(id).map_or(Object::Null, |&new| Object::Reference(new)),
        Object::Array(items) => Object::Array(items.iter().map(|o| remap(o, ids)).collect()),
        Object::Dictionary(dict) => Object::Dictionary(remap_dict(dict, ids)),
        Object::Stream(stream) => {
            let mut copy = stream.clone();
            copy.dict = remap_dict(&stream.dict, ids);
            Object::Stream(copy)
        }
        other => other.clone(),
    }
}

fn remap_dict(dict: &Dictionary, ids: &BTreeMap<ObjectId, ObjectId>) -> Dictionary {
    let mut out = Dictionary::new();
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            out.set(key.clone(), remap(value, ids));
        }
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lopdf::content::Content;

    /// One-page PDF drawing a filled rectangle and a line of text.
    /// The MediaBox may live on the page or on the Pages node.
    fn create_background_pdf(media_box: [i64; 4], inherit_box: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let page_tree_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));

        let resources_id = doc.add_object(Dictionary::from_iter([(
            "Font",
            Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
        )]));

        let content = Content {
            operations: vec![
                Operation::new("rg", vec![Object::Real(0.9), Object::Real(0.8), Object::Real(0.2)]),
                Operation::new("re", vec![10.into(), 10.into(), 100.into(), 100.into()]),
                Operation::new("f", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![20.into(), 200.into()]),
                Operation::new("Tj", vec![Object::string_literal("Background")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let box_object = Object::Array(media_box.iter().map(|&v| Object::Integer(v)).collect());

        let mut page = Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(page_tree_id)),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Reference(resources_id)),
        ]);
        let mut page_tree = Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(1)),
        ]);
        if inherit_box {
            page_tree.set("MediaBox", box_object);
        } else {
            page.set("MediaBox", box_object);
        }

        let page_id = doc.add_object(page);
        page_tree.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
        doc.objects.insert(page_tree_id, Object::Dictionary(page_tree));

        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(page_tree_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut output = Vec::new();
        doc.save_to(&mut output).unwrap();
        output
    }

    fn create_empty_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let page_tree_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(vec![])),
            ("Count", Object::Integer(0)),
        ]));
        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(page_tree_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut output = Vec::new();
        doc.save_to(&mut output).unwrap();
        output
    }

    #[test]
    fn test_scale_factors_fill_page() {
        let pdf = create_background_pdf([0, 0, 300, 400], false);
        let template = PageTemplate::from_bytes(&pdf, 595.275_6, 841.889_8).unwrap();

        let bbox = template.bbox();
        assert!((template.scale_x() * bbox.width() - 595.275_6).abs() < 1e-3);
        assert!((template.scale_y() * bbox.height() - 841.889_8).abs() < 1e-3);
    }

    #[test]
    fn test_scaling_is_per_axis() {
        let pdf = create_background_pdf([0, 0, 300, 400], false);
        let template = PageTemplate::from_bytes(&pdf, 600.0, 1000.0).unwrap();
        assert!((template.scale_x() - 2.0).abs() < f32::EPSILON);
        assert!((template.scale_y() - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_inherited_media_box() {
        let pdf = create_background_pdf([0, 0, 200, 100], true);
        let template = PageTemplate::from_bytes(&pdf, 400.0, 400.0).unwrap();
        assert_eq!(template.bbox(), BoundingBox::new(0.0, 0.0, 200.0, 100.0));
    }

    #[test]
    fn test_empty_document_rejected() {
        let result = PageTemplate::from_bytes(&create_empty_pdf(), 100.0, 100.0);
        assert!(matches!(result, Err(Error::AssetLoad { .. })));
    }

    #[test]
    fn test_degenerate_box_rejected() {
        let pdf = create_background_pdf([0, 0, 0, 400], false);
        let result = PageTemplate::from_bytes(&pdf, 100.0, 100.0);
        assert!(matches!(result, Err(Error::AssetLoad { .. })));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = PageTemplate::from_bytes(b"not a pdf", 100.0, 100.0);
        assert!(matches!(result, Err(Error::AssetLoad { .. })));
    }

    #[test]
    fn test_missing_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = PageTemplate::load(dir.path().join("missing.pdf"), 100.0, 100.0);
        match result {
            Err(Error::AssetLoad { path, .. }) => assert!(path.ends_with("missing.pdf")),
            other => panic!("expected AssetLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_draw_operations_wrap_transform_in_saved_state() {
        let pdf = create_background_pdf([10, 20, 310, 420], false);
        let template = PageTemplate::from_bytes(&pdf, 600.0, 800.0).unwrap();
        let ops = template.draw_operations("Bg");

        let names: Vec<&str> = ops.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(names, ["q", "cm", "Do", "Q"]);

        let cm: Vec<f32> = ops[1].operands.iter().filter_map(number).collect();
        assert_eq!(cm, [2.0, 0.0, 0.0, 2.0, -20.0, -40.0]);
        assert_eq!(ops[2].operands[0].as_name().unwrap(), b"Bg");
    }

    #[test]
    fn test_register_copies_resources_into_target() {
        let pdf = create_background_pdf([0, 0, 300, 400], false);
        let template = PageTemplate::from_bytes(&pdf, 600.0, 800.0).unwrap();

        let mut target = Document::with_version("1.5");
        let form_id = template.register(&mut target);

        let form = target.get_object(form_id).unwrap().as_stream().unwrap();
        assert_eq!(form.dict.get(b"Subtype").unwrap().as_name().unwrap(), b"Form");

        let resources = form.dict.get(b"Resources").unwrap().as_dict().unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        let font_ref = fonts.get(b"F1").unwrap().as_reference().unwrap();
        let font = target.get_dictionary(font_ref).unwrap();
        assert_eq!(font.get(b"BaseFont").unwrap().as_name().unwrap(), b"Helvetica");

        let content = Content::decode(&form.content).unwrap();
        assert!(content.operations.iter().any(|op| op.operator == "Tj"));
    }
}

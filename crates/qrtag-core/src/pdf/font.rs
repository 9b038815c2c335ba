//! Caption fonts.
//!
//! Two kinds of font can set a caption:
//!
//! - **Standard**: Helvetica, one of the PDF base-14 fonts. Nothing is
//!   embedded; text is written in WinAnsiEncoding, which covers Latin-1 plus
//!   the Windows-1252 punctuation block. Captions with characters outside it
//!   are rejected at render time.
//! - **Embedded**: a TrueType file embedded as a composite font with
//!   Identity-H encoding, so every character the font has a glyph for prints.
//!
//! # PDF Font Structure (embedded)
//!
//! - **Type0 font**: The top-level font dictionary that references:
//!   - **CIDFont**: Contains glyph metrics and references:
//!     - **FontDescriptor**: Font metadata (flags, bounding box, etc.)
//!     - **FontFile2**: The embedded TrueType font program
//!   - **ToUnicode CMap**: Maps glyph IDs back to Unicode for copy/paste

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use ttf_parser::{Face, GlyphId};

use crate::error::{Error, Result};

/// Byte written for characters WinAnsiEncoding cannot represent
const WIN_ANSI_REPLACEMENT: u8 = b'?';

/// Helvetica advance widths (1/1000 em) for 0x20..=0x7E
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

/// Helvetica advance widths (1/1000 em) for 0xA0..=0xFF
const HELVETICA_LATIN1: [u16; 96] = [
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500,
];

/// Windows-1252 characters in 0x80..=0x9F: (char, code, Helvetica width)
const WIN_ANSI_EXTRA: [(char, u8, u16); 27] = [
    ('€', 0x80, 556),
    ('‚', 0x82, 222),
    ('ƒ', 0x83, 556),
    ('„', 0x84, 333),
    ('…', 0x85, 1000),
    ('†', 0x86, 556),
    ('‡', 0x87, 556),
    ('ˆ', 0x88, 333),
    ('‰', 0x89, 1000),
    ('Š', 0x8A, 667),
    ('‹', 0x8B, 333),
    ('Œ', 0x8C, 1000),
    ('Ž', 0x8E, 611),
    ('\u{2018}', 0x91, 222),
    ('\u{2019}', 0x92, 222),
    ('\u{201C}', 0x93, 333),
    ('\u{201D}', 0x94, 333),
    ('•', 0x95, 350),
    ('–', 0x96, 556),
    ('—', 0x97, 1000),
    ('˜', 0x98, 333),
    ('™', 0x99, 1000),
    ('š', 0x9A, 500),
    ('›', 0x9B, 333),
    ('œ', 0x9C, 944),
    ('ž', 0x9E, 500),
    ('Ÿ', 0x9F, 667),
];

// =============================================================================
// Standard Fonts
// =============================================================================

/// A base-14 font every PDF viewer provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFont {
    Helvetica,
}

impl StandardFont {
    pub const fn base_font(self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
        }
    }

    /// Whether `c` has a code in WinAnsiEncoding
    pub fn can_encode(self, c: char) -> bool {
        win_ansi_code(c).is_some()
    }

    /// Encode text as WinAnsiEncoding bytes.
    ///
    /// Unencodable characters become `?`. Rendering rejects them before this
    /// is reached.
    pub fn encode(self, text: &str) -> Vec<u8> {
        text.chars().map(win_ansi_byte).collect()
    }

    /// Decode WinAnsiEncoding bytes back to text
    pub fn decode(self, bytes: &[u8]) -> String {
        bytes.iter().map(|&b| win_ansi_char(b)).collect()
    }

    /// Width of `text` in points at `font_size`
    pub fn string_width(self, text: &str, font_size: f32) -> f32 {
        let units: u32 = text
            .chars()
            .map(|c| u32::from(helvetica_width(win_ansi_byte(c))))
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let units = units as f32;
        units * font_size / 1000.0
    }

    fn register(self, doc: &mut Document) -> ObjectId {
        doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(self.base_font().as_bytes().to_vec())),
            ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
        ]))
    }
}

fn win_ansi_code(c: char) -> Option<u8> {
    match u32::from(c) {
        code @ (0x20..=0x7E | 0xA0..=0xFF) => u8::try_from(code).ok(),
        _ => WIN_ANSI_EXTRA
            .iter()
            .find(|(extra, _, _)| *extra == c)
            .map(|&(_, code, _)| code),
    }
}

fn win_ansi_byte(c: char) -> u8 {
    win_ansi_code(c).unwrap_or(WIN_ANSI_REPLACEMENT)
}

fn win_ansi_char(b: u8) -> char {
    match b {
        0x20..=0x7E | 0xA0..=0xFF => char::from(b),
        _ => WIN_ANSI_EXTRA
            .iter()
            .find(|(_, code, _)| *code == b)
            .map_or(char::REPLACEMENT_CHARACTER, |&(c, _, _)| c),
    }
}

fn helvetica_width(b: u8) -> u16 {
    match b {
        0x20..=0x7E => HELVETICA_ASCII[usize::from(b - 0x20)],
        0xA0..=0xFF => HELVETICA_LATIN1[usize::from(b - 0xA0)],
        _ => WIN_ANSI_EXTRA
            .iter()
            .find(|(_, code, _)| *code == b)
            .map_or(556, |&(_, _, width)| width),
    }
}

// =============================================================================
// Embedded TrueType Fonts
// =============================================================================

/// A TrueType font program loaded from disk and embedded into each document
/// that uses it.
#[derive(Clone)]
pub struct EmbeddedFont {
    data: Vec<u8>,
    /// PostScript-safe name used for BaseFont/FontName
    base_name: String,
}

impl std::fmt::Debug for EmbeddedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedFont")
            .field("base_name", &self.base_name)
            .field("bytes_len", &self.data.len())
            .finish()
    }
}

impl EmbeddedFont {
    /// Read and validate a TrueType file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::Font(format!("Failed to read {}: {e}", path.display())))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("EmbeddedFont");
        Self::from_bytes(name, data)
    }

    /// Validate font bytes; `name` becomes the font's PDF name.
    pub fn from_bytes(name: &str, data: Vec<u8>) -> Result<Self> {
        Face::parse(&data, 0).map_err(|e| Error::Font(format!("Failed to parse font: {e}")))?;

        let mut base_name: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
        if base_name.is_empty() {
            base_name.push_str("EmbeddedFont");
        }

        Ok(Self { data, base_name })
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Parsed face. Bytes were validated on construction.
    fn face(&self) -> Option<Face<'_>> {
        Face::parse(&self.data, 0).ok()
    }

    /// Get the glyph ID for a character, falling back to .notdef (0) if not found.
    pub fn glyph_id(&self, c: char) -> u16 {
        self.face()
            .and_then(|face| face.glyph_index(c))
            .map_or(0, |g| g.0)
    }

    /// Calculate the width of a string in PDF points at the given font size.
    pub fn string_width(&self, text: &str, font_size: f32) -> f32 {
        let Some(face) = self.face() else {
            return 0.0;
        };
        let units_per_em = f32::from(face.units_per_em());
        let total_units: u32 = text
            .chars()
            .map(|c| {
                let gid = face.glyph_index(c).unwrap_or(GlyphId(0));
                u32::from(face.glyph_hor_advance(gid).unwrap_or(0))
            })
            .sum();
        #[allow(clippy::cast_precision_loss)]
        let total_units = total_units as f32;
        total_units * font_size / units_per_em
    }

    /// Encode text as big-endian glyph IDs for Identity-H.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        text.chars().flat_map(|c| self.glyph_id(c).to_be_bytes()).collect()
    }

    /// Embed the font program and its dictionaries into `doc`.
    ///
    /// Widths and ToUnicode entries are written for `used` characters only.
    /// Returns the Type0 font's object id.
    fn register(&self, doc: &mut Document, used: &BTreeSet<char>) -> Result<ObjectId> {
        let face = self
            .face()
            .ok_or_else(|| Error::Font(format!("Font {} is no longer parseable", self.base_name)))?;

        let glyphs: BTreeMap<char, u16> = used
            .iter()
            .filter_map(|&c| face.glyph_index(c).map(|g| (c, g.0)))
            .collect();

        let font_file_id = self.create_font_file(doc);
        let font_descriptor_id = self.create_font_descriptor(doc, &face, font_file_id);
        let cid_font_id = self.create_cid_font(doc, &face, &glyphs, font_descriptor_id);
        let to_unicode_id = create_to_unicode_cmap(doc, &glyphs);

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type0".to_vec())),
            ("BaseFont", Object::Name(self.base_name.as_bytes().to_vec())),
            ("Encoding", Object::Name(b"Identity-H".to_vec())),
            ("DescendantFonts", Object::Array(vec![Object::Reference(cid_font_id)])),
            ("ToUnicode", Object::Reference(to_unicode_id)),
        ]);

        Ok(doc.add_object(Object::Dictionary(dict)))
    }

    /// Create the FontFile2 stream containing the raw TrueType data.
    fn create_font_file(&self, doc: &mut Document) -> ObjectId {
        let mut dict = Dictionary::new();
        dict.set(
            "Length1",
            Object::Integer(i64::try_from(self.data.len()).unwrap_or(i64::MAX)),
        );

        let stream = Stream::new(dict, self.data.clone()).with_compression(true);
        doc.add_object(Object::Stream(stream))
    }

    /// Create the FontDescriptor dictionary with font metrics.
    fn create_font_descriptor(&self, doc: &mut Document, face: &Face<'_>, font_file_id: ObjectId) -> ObjectId {
        let bbox = face.global_bounding_box();

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"FontDescriptor".to_vec())),
            ("FontName", Object::Name(self.base_name.as_bytes().to_vec())),
            ("Flags", Object::Integer(32)), // Nonsymbolic
            ("FontBBox", Object::Array(vec![
                Object::Integer(i64::from(bbox.x_min)),
                Object::Integer(i64::from(bbox.y_min)),
                Object::Integer(i64::from(bbox.x_max)),
                Object::Integer(i64::from(bbox.y_max)),
            ])),
            ("ItalicAngle", Object::Integer(0)),
            ("Ascent", Object::Integer(i64::from(face.ascender()))),
            ("Descent", Object::Integer(i64::from(face.descender()))),
            ("CapHeight", Object::Integer(i64::from(face.capital_height().unwrap_or_else(|| face.ascender())))),
            ("StemV", Object::Integer(80)),
            ("FontFile2", Object::Reference(font_file_id)),
        ]);

        doc.add_object(Object::Dictionary(dict))
    }

    /// Create the CIDFont dictionary with per-glyph width information.
    fn create_cid_font(
        &self,
        doc: &mut Document,
        face: &Face<'_>,
        glyphs: &BTreeMap<char, u16>,
        font_descriptor_id: ObjectId,
    ) -> ObjectId {
        let scale = |gid: u16| -> i64 {
            // PDF expects widths in 1/1000ths of text space
            let advance = i64::from(face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0));
            advance * 1000 / i64::from(face.units_per_em())
        };

        let gid_widths: BTreeMap<u16, i64> = glyphs.values().map(|&gid| (gid, scale(gid))).collect();
        let default_width = face.glyph_index(' ').map_or(0, |g| scale(g.0));

        let dict = Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"CIDFontType2".to_vec())),
            ("BaseFont", Object::Name(self.base_name.as_bytes().to_vec())),
            ("CIDSystemInfo", Object::Dictionary(Dictionary::from_iter([
                ("Registry", Object::String(b"Adobe".to_vec(), StringFormat::Literal)),
                ("Ordering", Object::String(b"Identity".to_vec(), StringFormat::Literal)),
                ("Supplement", Object::Integer(0)),
            ]))),
            ("FontDescriptor", Object::Reference(font_descriptor_id)),
            ("DW", Object::Integer(default_width)),
            ("W", Object::Array(widths_array(&gid_widths))),
            ("CIDToGIDMap", Object::Name(b"Identity".to_vec())),
        ]);

        doc.add_object(Object::Dictionary(dict))
    }
}

/// Build the W (widths) array for a CIDFont.
/// The format is: [gid [w1 w2 ...]] for runs of consecutive GIDs.
fn widths_array(gid_widths: &BTreeMap<u16, i64>) -> Vec<Object> {
    let mut result = Vec::new();
    let mut iter = gid_widths.iter().peekable();

    while let Some((&first_gid, &first_width)) = iter.next() {
        let mut widths = vec![Object::Integer(first_width)];
        let mut expected_next = u32::from(first_gid) + 1;

        while let Some(&(&gid, &width)) = iter.peek() {
            if u32::from(gid) != expected_next {
                break;
            }
            widths.push(Object::Integer(width));
            expected_next += 1;
            iter.next();
        }

        result.push(Object::Integer(i64::from(first_gid)));
        result.push(Object::Array(widths));
    }

    result
}

/// Create a ToUnicode CMap mapping each used glyph back to its character.
fn create_to_unicode_cmap(doc: &mut Document, glyphs: &BTreeMap<char, u16>) -> ObjectId {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CIDSystemInfo <<
  /Registry (Adobe)
  /Ordering (UCS)
  /Supplement 0
>> def
/CMapName /Adobe-Identity-UCS def
/CMapType 2 def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
",
    );

    let entries: Vec<(char, u16)> = glyphs.iter().map(|(&c, &gid)| (c, gid)).collect();
    // bfchar blocks hold at most 100 entries
    for chunk in entries.chunks(100) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for &(c, gid) in chunk {
            let mut units = [0u16; 2];
            let utf16: String = c
                .encode_utf16(&mut units)
                .iter()
                .fold(String::new(), |mut acc, unit| {
                    let _ = write!(acc, "{unit:04X}");
                    acc
                });
            let _ = writeln!(cmap, "<{gid:04X}> <{utf16}>");
        }
        cmap.push_str("endbfchar\n");
    }

    cmap.push_str(
        "endcmap
CMapName currentdict /CMap defineresource pop
end
end",
    );

    let stream = Stream::new(Dictionary::new(), cmap.into_bytes());
    doc.add_object(Object::Stream(stream))
}

// =============================================================================
// Caption Fonts
// =============================================================================

/// Any font a caption can be set in.
#[derive(Debug, Clone)]
pub enum CaptionFont {
    Standard(StandardFont),
    Embedded(EmbeddedFont),
}

impl CaptionFont {
    pub fn string_width(&self, text: &str, font_size: f32) -> f32 {
        match self {
            Self::Standard(font) => font.string_width(text, font_size),
            Self::Embedded(font) => font.string_width(text, font_size),
        }
    }

    /// `Tj` operand for `text`
    pub fn encode(&self, text: &str) -> Object {
        match self {
            Self::Standard(font) => Object::String(font.encode(text), StringFormat::Literal),
            Self::Embedded(font) => Object::String(font.encode(text), StringFormat::Hexadecimal),
        }
    }

    /// Add the font to `doc`, covering the characters in `used`.
    pub fn register(&self, doc: &mut Document, used: &BTreeSet<char>) -> Result<ObjectId> {
        match self {
            Self::Standard(font) => {
                // Whitespace only separates words; it is never drawn as-is
                if let Some(c) = used
                    .iter()
                    .find(|&&c| !c.is_whitespace() && !font.can_encode(c))
                {
                    return Err(Error::Render(format!(
                        "Character '{c}' (U+{:04X}) cannot be set in {}; configure a TrueType caption font",
                        u32::from(*c),
                        font.base_font()
                    )));
                }
                Ok(font.register(doc))
            }
            Self::Embedded(font) => font.register(doc, used),
        }
    }
}

//! Per-download PDF stamping.
//!
//! Every download is stamped with the buyer's identity in four places: the
//! document info dictionary, tiny near-transparent text scattered over each
//! page, large translucent text at random angles in the middle of each page,
//! and a fixed red footer. Positions are random per download; the identity
//! is not.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use rand::Rng;
use shared::PaymentReference;
use thiserror::Error;

use super::font::{FontAsset, FontError, Glyph};

const FONT_KEY: &str = "FWm";
const FONT_NAME: &[u8] = b"WatermarkSans";
const TO_UNICODE_CHUNK: usize = 100;
const INK_STAMPS: usize = 5;
const VISIBLE_STAMPS: usize = 3;
const MAX_INHERIT_DEPTH: usize = 32;
// US Letter, used when a page declares no MediaBox anywhere in its tree.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("asset is not a PDF document")]
    NotPdf,
    #[error("cannot parse PDF")]
    Parse(#[source] lopdf::Error),
    #[error("PDF is encrypted")]
    Encrypted,
    #[error("PDF has no pages")]
    NoPages,
    #[error("malformed PDF: {0}")]
    Malformed(String),
    #[error("cannot write PDF")]
    Write(#[source] std::io::Error),
    #[error("cannot shape watermark text")]
    Font(#[from] FontError),
}

/// Who a copy was made for.
#[derive(Debug, Clone)]
pub struct Licensee {
    pub email: String,
    pub order_reference: PaymentReference,
    pub title: String,
}

pub fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

pub struct Watermarker<'a> {
    font: &'a FontAsset,
}

impl<'a> Watermarker<'a> {
    pub fn new(font: &'a FontAsset) -> Self {
        Self { font }
    }

    pub fn stamp<R: Rng + ?Sized>(&self, pdf: &[u8], licensee: &Licensee, rng: &mut R) -> Result<Vec<u8>, WatermarkError> {
        if !is_pdf(pdf) {
            return Err(WatermarkError::NotPdf);
        }
        let mut doc = Document::load_mem(pdf).map_err(WatermarkError::Parse)?;
        if doc.is_encrypted() {
            return Err(WatermarkError::Encrypted);
        }
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(WatermarkError::NoPages);
        }

        set_info(&mut doc, licensee);

        let font_id = doc.new_object_id();
        let mut used = BTreeMap::new();
        for page_id in pages {
            self.stamp_page(&mut doc, page_id, font_id, &mut used, licensee, rng)?;
        }
        self.embed_font(&mut doc, font_id, &used);

        let mut out = Vec::with_capacity(pdf.len() + self.font.bytes().len());
        doc.save_to(&mut out).map_err(WatermarkError::Write)?;
        Ok(out)
    }

    /// Embeds the whole font as a Type0 font with Identity-H encoding, so
    /// text operands are glyph ids and `used` drives the widths and the
    /// ToUnicode map.
    fn embed_font(&self, doc: &mut Document, font_id: ObjectId, used: &BTreeMap<u16, Glyph>) {
        let file = Stream::new(
            dictionary! { "Length1" => self.font.bytes().len() as i64 },
            self.font.bytes().to_vec(),
        );
        let file_id = doc.add_object(file);

        let descriptor_id = doc.add_object(dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(FONT_NAME.to_vec()),
            "Flags" => 4,
            "FontBBox" => self.font.bbox.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            "ItalicAngle" => 0,
            "Ascent" => self.font.ascent,
            "Descent" => self.font.descent,
            "CapHeight" => self.font.cap_height,
            "StemV" => 80,
            "FontFile2" => file_id,
        });

        let mut widths = Vec::with_capacity(used.len() * 2);
        for glyph in used.values() {
            widths.push(Object::Integer(i64::from(glyph.id)));
            widths.push(Object::Array(vec![Object::Integer(glyph.width)]));
        }
        let cid_font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "BaseFont" => Object::Name(FONT_NAME.to_vec()),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => 1000,
            "W" => widths,
            "CIDToGIDMap" => "Identity",
        });

        let to_unicode_id = doc.add_object(Stream::new(Dictionary::new(), to_unicode_cmap(used).into_bytes()));

        doc.objects.insert(
            font_id,
            Object::Dictionary(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => Object::Name(FONT_NAME.to_vec()),
                "Encoding" => "Identity-H",
                "DescendantFonts" => vec![Object::Reference(cid_font_id)],
                "ToUnicode" => to_unicode_id,
            }),
        );
    }

    fn shape(&self, text: &str, used: &mut BTreeMap<u16, Glyph>) -> Result<Vec<Glyph>, WatermarkError> {
        let glyphs = self.font.shape(text)?;
        for glyph in &glyphs {
            used.entry(glyph.id).or_insert(*glyph);
        }
        Ok(glyphs)
    }

    fn stamp_page<R: Rng + ?Sized>(
        &self,
        doc: &mut Document,
        page_id: ObjectId,
        font_id: ObjectId,
        used: &mut BTreeMap<u16, Glyph>,
        licensee: &Licensee,
        rng: &mut R,
    ) -> Result<(), WatermarkError> {
        let [x0, y0, x1, y1] = media_box(doc, page_id)?;
        let (width, height) = ((x1 - x0).abs(), (y1 - y0).abs());
        let (left, bottom) = (x0.min(x1), y0.min(y1));

        let mut layer = Layer::default();

        let ink = self.shape(&format!("[Source: {}]", licensee.email), used)?;
        for _ in 0..INK_STAMPS {
            layer.text(TextStamp {
                glyphs: &ink,
                x: left + rng.gen_range(0.0..=width),
                y: bottom + rng.gen_range(0.0..=height),
                size: 4.0,
                rotation: 0.0,
                color: [0.0, 0.0, 0.0],
                opacity: 0.01,
            });
        }

        let email = self.shape(&licensee.email, used)?;
        for _ in 0..VISIBLE_STAMPS {
            layer.text(TextStamp {
                glyphs: &email,
                x: left + width / 4.0 + rng.gen_range(0.0..=width / 2.0),
                y: bottom + height / 4.0 + rng.gen_range(0.0..=height / 2.0),
                size: rng.gen_range(18.0..=28.0),
                rotation: rng.gen_range(-45.0f32..=45.0),
                color: [0.6, 0.6, 0.6],
                opacity: rng.gen_range(0.2..=0.5),
            });
        }

        let footer = self.shape(
            &format!("Owned by {} - #{}", licensee.email, licensee.order_reference),
            used,
        )?;
        layer.text(TextStamp {
            glyphs: &footer,
            x: left + 20.0,
            y: bottom + 10.0,
            size: 8.0,
            rotation: 0.0,
            color: [0.8, 0.0, 0.0],
            opacity: 0.8,
        });

        let mut resources = effective_resources(doc, page_id)?;
        let mut fonts = resolved_dict(doc, resources.get(b"Font").ok())?;
        fonts.set(FONT_KEY, font_id);
        resources.set("Font", fonts);
        let mut states = resolved_dict(doc, resources.get(b"ExtGState").ok())?;
        for (name, opacity) in &layer.states {
            states.set(name.as_str(), dictionary! { "Type" => "ExtGState", "ca" => *opacity, "CA" => *opacity });
        }
        resources.set("ExtGState", states);

        let content = Content {
            operations: layer.operations,
        }
        .encode()
        .map_err(|e| WatermarkError::Malformed(format!("cannot encode stamp: {e}")))?;

        let prefix_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let mut suffix = b"\nQ\n".to_vec();
        suffix.extend_from_slice(&content);
        let suffix_id = doc.add_object(Stream::new(Dictionary::new(), suffix));

        let mut contents = vec![Object::Reference(prefix_id)];
        contents.extend(content_streams(doc, page_id)?);
        contents.push(Object::Reference(suffix_id));

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| WatermarkError::Malformed(format!("page {page_id:?}: {e}")))?;
        page.set("Contents", contents);
        page.set("Resources", resources);
        Ok(())
    }
}

struct TextStamp<'t> {
    glyphs: &'t [Glyph],
    x: f32,
    y: f32,
    size: f32,
    /// Degrees, counter-clockwise.
    rotation: f32,
    color: [f32; 3],
    opacity: f32,
}

#[derive(Default)]
struct Layer {
    operations: Vec<Operation>,
    states: Vec<(String, f32)>,
}

impl Layer {
    fn text(&mut self, stamp: TextStamp<'_>) {
        let state = format!("GSWm{}", self.states.len());
        self.states.push((state.clone(), stamp.opacity));

        let (sin, cos) = stamp.rotation.to_radians().sin_cos();
        let [r, g, b] = stamp.color;
        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new("gs", vec![Object::Name(state.into_bytes())]),
            Operation::new("rg", vec![r.into(), g.into(), b.into()]),
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(FONT_KEY.as_bytes().to_vec()), stamp.size.into()]),
            Operation::new(
                "Tm",
                vec![cos.into(), sin.into(), (-sin).into(), cos.into(), stamp.x.into(), stamp.y.into()],
            ),
            Operation::new("Tj", vec![glyph_string(stamp.glyphs)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ]);
    }
}

fn set_info(doc: &mut Document, licensee: &Licensee) {
    let reference = licensee.order_reference;
    let info = dictionary! {
        "Title" => text_string(&licensee.title),
        "Author" => text_string(&format!("Licensed to: {}", licensee.email)),
        "Subject" => text_string(&format!("Order #{reference}")),
        "Keywords" => text_string(&format!("{}, Order {reference}, Protected", licensee.email)),
        "Producer" => text_string("Marketplace Secure DRM System"),
        "Creator" => text_string("Marketplace PDF Engine"),
    };
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);
}

/// Two-byte glyph ids, as Identity-H expects.
fn glyph_string(glyphs: &[Glyph]) -> Object {
    Object::String(
        glyphs.iter().flat_map(|g| g.id.to_be_bytes()).collect(),
        StringFormat::Hexadecimal,
    )
}

fn to_unicode_cmap(used: &BTreeMap<u16, Glyph>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let glyphs: Vec<&Glyph> = used.values().collect();
    for chunk in glyphs.chunks(TO_UNICODE_CHUNK) {
        let _ = writeln!(cmap, "{} beginbfchar", chunk.len());
        for glyph in chunk {
            let mut units = [0u16; 2];
            let unicode: String = glyph.ch.encode_utf16(&mut units).iter().map(|u| format!("{u:04X}")).collect();
            let _ = writeln!(cmap, "<{:04X}> <{unicode}>", glyph.id);
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMapResource defineresource pop\nend\nend\n");
    cmap
}

/// The page's content streams as a flat list of references. `Contents` may
/// name one stream, an array of streams, or a reference to such an array.
fn content_streams(doc: &Document, page_id: ObjectId) -> Result<Vec<Object>, WatermarkError> {
    let page = doc
        .get_dictionary(page_id)
        .map_err(|e| WatermarkError::Malformed(format!("page {page_id:?}: {e}")))?;
    let Ok(contents) = page.get(b"Contents") else {
        return Ok(Vec::new());
    };

    let entries = match contents {
        Object::Array(items) => items.clone(),
        Object::Reference(id) => match resolve(doc, contents)? {
            Object::Stream(_) => return Ok(vec![Object::Reference(*id)]),
            Object::Array(items) => items.clone(),
            _ => return Err(WatermarkError::Malformed(format!("page {page_id:?} has invalid Contents"))),
        },
        _ => return Err(WatermarkError::Malformed(format!("page {page_id:?} has invalid Contents"))),
    };

    for entry in &entries {
        if !matches!(entry, Object::Reference(_)) || !matches!(resolve(doc, entry)?, Object::Stream(_)) {
            return Err(WatermarkError::Malformed(format!(
                "page {page_id:?} Contents holds something other than a stream"
            )));
        }
    }
    Ok(entries)
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte order mark otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::string_literal(text)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

fn resolve<'d>(doc: &'d Document, object: &'d Object) -> Result<&'d Object, WatermarkError> {
    match object {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| WatermarkError::Malformed(format!("dangling reference {id:?}: {e}"))),
        other => Ok(other),
    }
}

/// Looks `key` up on the page, then up its `Parent` chain.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Result<Option<Object>, WatermarkError> {
    let mut node = doc
        .get_dictionary(page_id)
        .map_err(|e| WatermarkError::Malformed(format!("page {page_id:?}: {e}")))?;
    for _ in 0..MAX_INHERIT_DEPTH {
        if let Ok(value) = node.get(key) {
            return Ok(Some(resolve(doc, value)?.clone()));
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => {
                node = doc
                    .get_dictionary(parent)
                    .map_err(|e| WatermarkError::Malformed(format!("page tree node {parent:?}: {e}")))?;
            }
            Err(_) => return Ok(None),
        }
    }
    Err(WatermarkError::Malformed("page tree too deep".to_string()))
}

fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f32; 4], WatermarkError> {
    let Some(Object::Array(values)) = inherited(doc, page_id, b"MediaBox")? else {
        return Ok(DEFAULT_MEDIA_BOX);
    };
    let numbers: Vec<f32> = values
        .iter()
        .filter_map(|v| match resolve(doc, v).ok()? {
            Object::Integer(i) => Some(*i as f32),
            Object::Real(r) => Some(*r as f32),
            _ => None,
        })
        .collect();
    match numbers.as_slice() {
        [x0, y0, x1, y1] => Ok([*x0, *y0, *x1, *y1]),
        _ => Err(WatermarkError::Malformed(format!("page {page_id:?} has an invalid MediaBox"))),
    }
}

fn effective_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, WatermarkError> {
    match inherited(doc, page_id, b"Resources")? {
        Some(Object::Dictionary(dict)) => Ok(dict),
        Some(_) => Err(WatermarkError::Malformed(format!("page {page_id:?} has invalid Resources"))),
        None => Ok(Dictionary::new()),
    }
}

fn resolved_dict(doc: &Document, object: Option<&Object>) -> Result<Dictionary, WatermarkError> {
    match object {
        None => Ok(Dictionary::new()),
        Some(object) => match resolve(doc, object)? {
            Object::Dictionary(dict) => Ok(dict.clone()),
            _ => Err(WatermarkError::Malformed("resource entry is not a dictionary".to_string())),
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::delivery::font::test_font;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// A small uncompressed PDF with `pages` pages, built the way a publisher
    /// export would: a shared font resource on the page tree root.
    pub(crate) fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for n in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("Chapter {}", n + 1))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    /// One page whose `Contents` is a reference to an array of streams.
    fn indirect_contents_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("Chapter ORIGINAL")]),
                Operation::new("ET", vec![]),
            ],
        };
        let stream_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let array_id = doc.add_object(vec![Object::Reference(stream_id)]);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => array_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::from(page_id)],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn licensee(email: &str) -> Licensee {
        Licensee {
            email: email.to_string(),
            order_reference: PaymentReference::new(123_456_789).unwrap(),
            title: "Rust in Action".to_string(),
        }
    }

    /// Operands of every `Tj` on the page.
    fn shown_strings(doc: &Document, page_id: ObjectId) -> Vec<Vec<u8>> {
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        content
            .operations
            .into_iter()
            .filter(|op| op.operator == "Tj")
            .filter_map(|op| op.operands.first().and_then(|o| o.as_str().ok()).map(<[u8]>::to_vec))
            .collect()
    }

    fn glyph_bytes(font: &FontAsset, text: &str) -> Vec<u8> {
        match glyph_string(&font.shape(text).unwrap()) {
            Object::String(bytes, _) => bytes,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn info_string(doc: &Document, key: &[u8]) -> Vec<u8> {
        let info_id = doc.trailer.get(b"Info").and_then(Object::as_reference).unwrap();
        let info = doc.get_dictionary(info_id).unwrap();
        info.get(key).and_then(Object::as_str).unwrap().to_vec()
    }

    #[test]
    fn every_page_carries_the_identity() {
        let font = test_font();
        let mut rng = StdRng::seed_from_u64(7);
        let stamped = Watermarker::new(&font)
            .stamp(&sample_pdf(2), &licensee("a@x.com"), &mut rng)
            .unwrap();

        let doc = Document::load_mem(&stamped).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        for (number, page_id) in &pages {
            let shown = shown_strings(&doc, *page_id);
            let ink = glyph_bytes(&font, "[Source: a@x.com]");
            assert_eq!(shown.iter().filter(|s| **s == ink).count(), INK_STAMPS);
            assert_eq!(
                shown.iter().filter(|s| **s == glyph_bytes(&font, "a@x.com")).count(),
                VISIBLE_STAMPS
            );
            assert!(shown.contains(&glyph_bytes(&font, "Owned by a@x.com - #123456789")));
            assert!(shown.contains(&format!("Chapter {number}").into_bytes()));

            let resources = doc.get_dictionary(*page_id).unwrap().get(b"Resources").unwrap();
            let fonts = resources.as_dict().unwrap().get(b"Font").unwrap().as_dict().unwrap();
            assert!(fonts.has(b"F1"));
            assert!(fonts.has(FONT_KEY.as_bytes()));
        }

        assert_eq!(info_string(&doc, b"Author"), b"Licensed to: a@x.com".to_vec());
        assert_eq!(info_string(&doc, b"Subject"), b"Order #123456789".to_vec());
        assert_eq!(info_string(&doc, b"Title"), b"Rust in Action".to_vec());
    }

    #[test]
    fn indirect_content_arrays_keep_the_original_text() {
        let font = test_font();
        let stamped = Watermarker::new(&font)
            .stamp(&indirect_contents_pdf(), &licensee("a@x.com"), &mut StdRng::seed_from_u64(3))
            .unwrap();

        let doc = Document::load_mem(&stamped).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let contents = doc.get_dictionary(page_id).unwrap().get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 3);
        for entry in contents {
            let id = entry.as_reference().unwrap();
            assert!(matches!(doc.get_object(id).unwrap(), Object::Stream(_)));
        }
        assert!(shown_strings(&doc, page_id).contains(&b"Chapter ORIGINAL".to_vec()));
    }

    #[test]
    fn contents_that_are_not_streams_fail() {
        let mut doc = Document::load_mem(&sample_pdf(1)).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        doc.get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Contents", vec![Object::Integer(7)]);
        let mut broken = Vec::new();
        doc.save_to(&mut broken).unwrap();

        let font = test_font();
        let result = Watermarker::new(&font).stamp(&broken, &licensee("a@x.com"), &mut StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(WatermarkError::Malformed(_))));
    }

    #[test]
    fn non_ascii_identities_survive_in_the_stamps() {
        let font = test_font();
        let stamped = Watermarker::new(&font)
            .stamp(&sample_pdf(1), &licensee("trần@sách.vn"), &mut StdRng::seed_from_u64(5))
            .unwrap();

        let doc = Document::load_mem(&stamped).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let shown = shown_strings(&doc, page_id);
        assert!(shown.contains(&glyph_bytes(&font, "[Source: trần@sách.vn]")));
        assert!(!shown.contains(&glyph_bytes(&font, "[Source: tr?n@s?ch.vn]")));

        let resources = doc.get_dictionary(page_id).unwrap().get(b"Resources").unwrap();
        let fonts = resources.as_dict().unwrap().get(b"Font").unwrap().as_dict().unwrap();
        let type0_id = fonts.get(FONT_KEY.as_bytes()).and_then(Object::as_reference).unwrap();
        let type0 = doc.get_dictionary(type0_id).unwrap();
        assert_eq!(type0.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");
        let cmap_id = type0.get(b"ToUnicode").unwrap().as_reference().unwrap();
        let cmap = doc.get_object(cmap_id).unwrap().as_stream().unwrap().content.clone();
        let a_hat = format!("{:04X}", font.shape("ầ").unwrap()[0].id);
        assert!(String::from_utf8(cmap).unwrap().contains(&format!("<{a_hat}> <1EA7>")));
    }

    #[test]
    fn layout_changes_between_downloads() {
        let font = test_font();
        let pdf = sample_pdf(1);
        let first = Watermarker::new(&font)
            .stamp(&pdf, &licensee("a@x.com"), &mut StdRng::seed_from_u64(1))
            .unwrap();
        let second = Watermarker::new(&font)
            .stamp(&pdf, &licensee("a@x.com"), &mut StdRng::seed_from_u64(2))
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn non_ascii_titles_become_utf16() {
        match text_string("Sách hay") {
            Object::String(bytes, StringFormat::Hexadecimal) => assert_eq!(&bytes[..2], &[0xFE, 0xFF]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_formats_are_refused() {
        let font = test_font();
        let result = Watermarker::new(&font).stamp(b"PK\x03\x04epub", &licensee("a@x.com"), &mut StdRng::seed_from_u64(0));
        assert!(matches!(result, Err(WatermarkError::NotPdf)));
    }
}

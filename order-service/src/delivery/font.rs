use std::path::Path;

use thiserror::Error;
use ttf_parser::{Face, GlyphId};

/// Drawn in place of characters the font has no glyph for.
const FALLBACK_CHAR: char = '?';

#[derive(Debug, Error)]
pub enum FontError {
    #[error("cannot read font file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("font file is not a usable TrueType font: {0}")]
    Parse(String),
}

/// A glyph of shaped text. `width` is in 1/1000 em.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub id: u16,
    pub width: i64,
    pub ch: char,
}

/// A TrueType font validated once at startup and embedded whole, so any
/// character it covers can be stamped.
#[derive(Debug, Clone)]
pub struct FontAsset {
    bytes: Vec<u8>,
    units_per_em: u16,
    fallback: GlyphId,
    pub ascent: i64,
    pub descent: i64,
    pub cap_height: i64,
    pub bbox: [i64; 4],
}

impl FontAsset {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FontError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| FontError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, FontError> {
        let face = Face::parse(&bytes, 0).map_err(|e| FontError::Parse(e.to_string()))?;
        let units_per_em = face.units_per_em();
        if units_per_em == 0 {
            return Err(FontError::Parse("units per em is zero".to_string()));
        }
        if let Some(missing) = (' '..='~').find(|c| face.glyph_index(*c).is_none()) {
            return Err(FontError::Parse(format!("no glyph for {missing:?}")));
        }
        let fallback = face
            .glyph_index(FALLBACK_CHAR)
            .ok_or_else(|| FontError::Parse(format!("no glyph for {FALLBACK_CHAR:?}")))?;

        let to_em = |v: i16| scale(i32::from(v), units_per_em);
        let rect = face.global_bounding_box();
        let ascent = to_em(face.ascender());
        let asset = Self {
            units_per_em,
            fallback,
            ascent,
            descent: to_em(face.descender()),
            cap_height: face.capital_height().map(to_em).unwrap_or(ascent),
            bbox: [to_em(rect.x_min), to_em(rect.y_min), to_em(rect.x_max), to_em(rect.y_max)],
            bytes,
        };
        Ok(asset)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Maps `text` to glyphs one character at a time. Characters without a
    /// glyph become `?`.
    pub fn shape(&self, text: &str) -> Result<Vec<Glyph>, FontError> {
        let face = Face::parse(&self.bytes, 0).map_err(|e| FontError::Parse(e.to_string()))?;
        Ok(text
            .chars()
            .map(|c| {
                let (id, ch) = match face.glyph_index(c) {
                    Some(id) => (id, c),
                    None => (self.fallback, FALLBACK_CHAR),
                };
                let advance = face.glyph_hor_advance(id).unwrap_or(0);
                Glyph {
                    id: id.0,
                    width: scale(i32::from(advance), self.units_per_em),
                    ch,
                }
            })
            .collect())
    }
}

fn scale(value: i32, units_per_em: u16) -> i64 {
    (f64::from(value) * 1000.0 / f64::from(units_per_em)).round() as i64
}

#[cfg(test)]
pub(crate) fn test_font() -> FontAsset {
    FontAsset::load(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/fonts/DejaVuSans.ttf")).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_font_loads() {
        let font = test_font();
        assert!(font.ascent > 0 && font.descent < 0);
        let glyphs = font.shape("buyer@example.com").unwrap();
        assert_eq!(glyphs.len(), 17);
        assert!(glyphs.iter().all(|g| g.id != 0 && g.width > 0));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            FontAsset::from_bytes(b"not a font".to_vec()),
            Err(FontError::Parse(_))
        ));
        assert!(matches!(FontAsset::load("/nonexistent/font.ttf"), Err(FontError::Read { .. })));
    }

    #[test]
    fn vietnamese_text_keeps_its_characters() {
        let font = test_font();
        let glyphs = font.shape("trần@sách.vn").unwrap();
        let text: String = glyphs.iter().map(|g| g.ch).collect();
        assert_eq!(text, "trần@sách.vn");
        assert_ne!(glyphs[2].id, font.shape("a").unwrap()[0].id);
    }

    #[test]
    fn uncovered_characters_fall_back() {
        let font = test_font();
        let glyphs = font.shape("a\u{10FFFD}").unwrap();
        assert_eq!(glyphs[1].ch, '?');
        assert_eq!(glyphs[1].id, font.shape("?").unwrap()[0].id);
    }
}

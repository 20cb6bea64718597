// ABOUTME: Builds bitmap font sheets from BDF (Bitmap Distribution Format) fonts.
// ABOUTME: Lays glyphs out in row-major cells, white on black, ready for GlyphAtlas.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};

const INK: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PAPER: Rgba<u8> = Rgba([0, 0, 0, 255]);

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("Invalid BDF format: {0}")]
    InvalidFormat(String),

    #[error("Failed to parse number: {0}")]
    ParseNumber(String),

    #[error("Font sheet too large: {0}")]
    TooLarge(String),
}

/// A rendered font sheet and the cell size its glyphs occupy
#[derive(Debug, Clone)]
pub struct FontSheet {
    pub image: RgbaImage,
    pub cell_size: (u32, u32),
    /// Mapping characters the font had no glyph for; their cells are blank
    pub missing: Vec<char>,
}

struct BdfGlyph {
    width: u32,
    height: u32,
    offset_x: i32,
    offset_y: i32,
    rows: Vec<Vec<u8>>,
}

impl FontSheet {
    /// Cells per sheet row
    pub const COLUMNS: u32 = 16;

    /// Rasterize the glyphs named by `mapping` from BDF source, one cell each
    pub fn from_bdf(data: &[u8], mapping: &str) -> Result<Self, SheetError> {
        let content = std::str::from_utf8(data)
            .map_err(|e| SheetError::InvalidFormat(format!("Invalid UTF-8: {}", e)))?;
        Self::from_bdf_str(content, mapping)
    }

    pub fn from_bdf_str(content: &str, mapping: &str) -> Result<Self, SheetError> {
        let font = parse(content)?;
        let cell_w = font.cell_width;
        let cell_h = font.ascent.checked_add(font.descent).ok_or_else(|| {
            SheetError::TooLarge(format!("ascent {} + descent {}", font.ascent, font.descent))
        })?;
        if cell_w == 0 || cell_h <= 0 {
            return Err(SheetError::InvalidFormat("Font has an empty bounding box".into()));
        }
        let cell_h = cell_h as u32;

        let count = u32::try_from(mapping.chars().count())
            .map_err(|_| SheetError::TooLarge("mapping has too many characters".into()))?;
        let rows = count.div_ceil(Self::COLUMNS);
        let width = Self::COLUMNS.checked_mul(cell_w);
        let height = rows.checked_mul(cell_h);
        let Some((width, height)) = width.zip(height) else {
            return Err(SheetError::TooLarge(format!(
                "{} rows of {}x{} cells",
                rows, cell_w, cell_h
            )));
        };
        let mut image = RgbaImage::from_pixel(width, height, PAPER);
        let mut missing = Vec::new();

        for (index, c) in mapping.chars().enumerate() {
            let index = index as u32;
            let origin_x = (index % Self::COLUMNS) * cell_w;
            let origin_y = (index / Self::COLUMNS) * cell_h;
            let Some(glyph) = font.glyphs.get(&(c as u32)) else {
                missing.push(c);
                continue;
            };

            // Baseline sits `ascent` pixels below the cell top; BBX offsets are from the baseline
            let left = glyph.offset_x - font.offset_x;
            let top = font.ascent - (glyph.offset_y + glyph.height as i32);
            for (row, bytes) in glyph.rows.iter().take(glyph.height as usize).enumerate() {
                for col in 0..glyph.width as usize {
                    let lit = bytes
                        .get(col / 8)
                        .is_some_and(|byte| (byte >> (7 - col % 8)) & 1 == 1);
                    if !lit {
                        continue;
                    }
                    let x = left + col as i32;
                    let y = top + row as i32;
                    if x < 0 || y < 0 || x >= cell_w as i32 || y >= cell_h as i32 {
                        continue;
                    }
                    image.put_pixel(origin_x + x as u32, origin_y + y as u32, INK);
                }
            }
        }

        if !missing.is_empty() {
            tracing::warn!(
                "BDF font has no glyph for {} mapped characters: {:?}",
                missing.len(),
                missing
            );
        }
        tracing::debug!(
            "Built {}x{} font sheet with {}x{} cells for {} characters",
            image.width(),
            image.height(),
            cell_w,
            cell_h,
            count
        );

        Ok(Self {
            image,
            cell_size: (cell_w, cell_h),
            missing,
        })
    }
}

struct ParsedFont {
    cell_width: u32,
    offset_x: i32,
    ascent: i32,
    descent: i32,
    glyphs: HashMap<u32, BdfGlyph>,
}

fn parse(content: &str) -> Result<ParsedFont, SheetError> {
    let mut lines = content.lines().map(str::trim);

    let first = lines.next().ok_or_else(|| SheetError::InvalidFormat("Empty file".into()))?;
    if !first.starts_with("STARTFONT") {
        return Err(SheetError::InvalidFormat("Missing STARTFONT".into()));
    }

    let mut bbox = (0u32, 0u32, 0i32, 0i32);
    let mut ascent: Option<i32> = None;
    let mut descent: Option<i32> = None;
    let mut glyphs = HashMap::new();

    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("FONTBOUNDINGBOX ") {
            let [w, h, x, y] = numbers::<4>(rest, "FONTBOUNDINGBOX")?;
            bbox = (w.max(0) as u32, h.max(0) as u32, x, y);
        } else if let Some(rest) = line.strip_prefix("FONT_ASCENT ") {
            ascent = Some(number(rest, "FONT_ASCENT")?);
        } else if let Some(rest) = line.strip_prefix("FONT_DESCENT ") {
            descent = Some(number(rest, "FONT_DESCENT")?);
        } else if line.starts_with("STARTCHAR") {
            if let Some((encoding, glyph)) = parse_glyph(&mut lines)? {
                glyphs.insert(encoding, glyph);
            }
        } else if line == "ENDFONT" {
            break;
        }
    }

    let (cell_width, bbox_height, offset_x, offset_y) = bbox;
    // Without explicit metrics the bounding box bottom is the descent
    let descent = descent.unwrap_or(-offset_y);
    let ascent = ascent.unwrap_or(bbox_height as i32 - descent);

    Ok(ParsedFont {
        cell_width,
        offset_x,
        ascent,
        descent,
        glyphs,
    })
}

/// Parse one STARTCHAR..ENDCHAR block. Glyphs with negative or absent
/// encodings are consumed and dropped.
fn parse_glyph<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
) -> Result<Option<(u32, BdfGlyph)>, SheetError> {
    let mut encoding: Option<i64> = None;
    let mut bbx = (0i32, 0i32, 0i32, 0i32);
    let mut rows = Vec::new();
    let mut in_bitmap = false;

    for line in lines.by_ref() {
        if line == "ENDCHAR" {
            break;
        }
        if in_bitmap {
            rows.push(parse_hex_row(line)?);
        } else if let Some(rest) = line.strip_prefix("ENCODING ") {
            let first = rest.split_whitespace().next().unwrap_or(rest);
            encoding = Some(number(first, "ENCODING")?);
        } else if let Some(rest) = line.strip_prefix("BBX ") {
            let [w, h, x, y] = numbers::<4>(rest, "BBX")?;
            bbx = (w, h, x, y);
        } else if line == "BITMAP" {
            in_bitmap = true;
        }
    }

    let Some(encoding) = encoding.filter(|e| *e >= 0).and_then(|e| u32::try_from(e).ok()) else {
        return Ok(None);
    };
    let (width, height, offset_x, offset_y) = bbx;
    Ok(Some((
        encoding,
        BdfGlyph {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            offset_x,
            offset_y,
            rows,
        },
    )))
}

fn number<N: std::str::FromStr>(s: &str, what: &str) -> Result<N, SheetError> {
    s.trim()
        .parse()
        .map_err(|_| SheetError::ParseNumber(format!("{}: {}", what, s.trim())))
}

fn numbers<const N: usize>(s: &str, what: &str) -> Result<[i32; N], SheetError> {
    let mut out = [0i32; N];
    let mut parts = s.split_whitespace();
    for slot in out.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| SheetError::InvalidFormat(format!("{} needs {} values", what, N)))?;
        *slot = number(part, what)?;
    }
    Ok(out)
}

fn parse_hex_row(hex: &str) -> Result<Vec<u8>, SheetError> {
    let digits = hex.as_bytes();
    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_digit(pair[0]);
            let lo = pair.get(1).map_or(Some(0), |d| hex_digit(*d));
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
                _ => Err(SheetError::InvalidFormat(format!("Invalid hex row: {}", hex))),
            }
        })
        .collect()
}

fn hex_digit(d: u8) -> Option<u8> {
    (d as char).to_digit(16).map(|v| v as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::GlyphAtlas;

    const TEST_BDF: &str = include_str!("../../../fixtures/test.bdf");

    fn lit(sheet: &FontSheet, x: u32, y: u32) -> bool {
        *sheet.image.get_pixel(x, y) == INK
    }

    #[test]
    fn cell_size_comes_from_bounding_box_and_metrics() {
        let sheet = FontSheet::from_bdf_str(TEST_BDF, " A").unwrap();
        assert_eq!(sheet.cell_size, (6, 13));
        assert_eq!(sheet.image.dimensions(), (6 * FontSheet::COLUMNS, 13));
        assert!(sheet.missing.is_empty());
    }

    #[test]
    fn glyphs_are_placed_in_mapping_order() {
        let sheet = FontSheet::from_bdf_str(TEST_BDF, " A").unwrap();
        // Row 2 of 'A' is 0x20: only column 2 lit
        assert!(lit(&sheet, 6 + 2, 2));
        assert!(!lit(&sheet, 6, 2));
        // Row 7 is 0xF8: columns 0-4
        assert!(lit(&sheet, 6, 7));
        assert!(lit(&sheet, 6 + 4, 7));
        assert!(!lit(&sheet, 6 + 5, 7));
        // Space cell stays blank
        assert!((0..6).all(|x| (0..13).all(|y| !lit(&sheet, x, y))));
    }

    #[test]
    fn small_glyphs_sit_on_the_baseline() {
        let sheet = FontSheet::from_bdf_str(TEST_BDF, ".").unwrap();
        // Baseline at y = 11; a 2px tall glyph with offset 0 covers rows 9 and 10
        assert!(lit(&sheet, 2, 9));
        assert!(lit(&sheet, 3, 10));
        assert!(!lit(&sheet, 2, 11));
        assert!(!lit(&sheet, 2, 8));
        assert!(!lit(&sheet, 1, 9));
    }

    #[test]
    fn missing_characters_leave_blank_cells() {
        let sheet = FontSheet::from_bdf_str(TEST_BDF, "AZ").unwrap();
        assert_eq!(sheet.missing, vec!['Z']);
        assert!((6..12).all(|x| (0..13).all(|y| !lit(&sheet, x, y))));
    }

    #[test]
    fn long_mappings_wrap_to_new_rows() {
        let mapping: String = std::iter::repeat('A').take(17).collect();
        let sheet = FontSheet::from_bdf_str(TEST_BDF, &mapping).unwrap();
        assert_eq!(sheet.image.dimensions(), (96, 26));
        assert!(lit(&sheet, 2, 13 + 2));
    }

    #[test]
    fn sheet_feeds_atlas() {
        let sheet = FontSheet::from_bdf_str(TEST_BDF, " A.").unwrap();
        let atlas = GlyphAtlas::new(sheet.image, " A.", sheet.cell_size).unwrap();
        assert_eq!(atlas.len(), 3);
        assert_eq!(atlas.glyph('A').unwrap()[0], [6.0, 0.0]);
        assert_eq!(atlas.glyph('.').unwrap()[2], [18.0, 13.0]);
    }

    #[test]
    fn rejects_non_bdf_input() {
        let err = FontSheet::from_bdf_str("hello", "A").unwrap_err();
        assert!(matches!(err, SheetError::InvalidFormat(_)));
    }

    #[test]
    fn reports_bad_numbers() {
        let bdf = "STARTFONT 2.1\nFONTBOUNDINGBOX 6 x 0 -2\nENDFONT\n";
        let err = FontSheet::from_bdf_str(bdf, "A").unwrap_err();
        assert!(matches!(err, SheetError::ParseNumber(_)));
    }

    #[test]
    fn oversized_metrics_are_rejected() {
        let tall = "STARTFONT 2.1\nFONTBOUNDINGBOX 6 13 0 -2\n\
                    FONT_ASCENT 2147483647\nFONT_DESCENT 1\nENDFONT\n";
        let err = FontSheet::from_bdf_str(tall, "A").unwrap_err();
        assert!(matches!(err, SheetError::TooLarge(_)));

        let wide = "STARTFONT 2.1\nFONTBOUNDINGBOX 400000000 13 0 -2\nENDFONT\n";
        let err = FontSheet::from_bdf_str(wide, "A").unwrap_err();
        assert!(matches!(err, SheetError::TooLarge(_)));
    }

    #[test]
    fn hex_rows_decode() {
        assert_eq!(parse_hex_row("F8").unwrap(), vec![0xF8]);
        assert_eq!(parse_hex_row("0FA").unwrap(), vec![0x0F, 0xA0]);
        assert!(parse_hex_row("G0").is_err());
    }
}

// ABOUTME: Glyph atlas built from a bitmap font sheet.
// ABOUTME: Recolors the sheet for tinting and maps characters to cell quads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bitgrid_core::RecolorMode;
use image::{Rgba, RgbaImage};

use crate::vertex::TexCoord;

static NEXT_ATLAS_ID: AtomicU64 = AtomicU64::new(1);

const OPAQUE_BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const OPAQUE_WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Immutable font atlas. Share it between grids with `Arc`.
pub struct GlyphAtlas {
    id: u64,
    cell_width: u32,
    cell_height: u32,
    texture: RgbaImage,
    glyphs: HashMap<char, [TexCoord; 4]>,
}

#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    #[error("Invalid cell size {width}x{height}")]
    InvalidCellSize { width: u32, height: u32 },
}

impl GlyphAtlas {
    /// Build an atlas with the black-key recolor rule.
    ///
    /// `mapping` names the glyphs in the sheet, one character per cell in
    /// row-major order. Cells past the end of the mapping stay unmapped.
    pub fn new(image: RgbaImage, mapping: &str, cell_size: (u32, u32)) -> Result<Self, AtlasError> {
        Self::with_recolor(image, mapping, cell_size, RecolorMode::BlackKey)
    }

    pub fn with_recolor(
        mut image: RgbaImage,
        mapping: &str,
        cell_size: (u32, u32),
        mode: RecolorMode,
    ) -> Result<Self, AtlasError> {
        let (cell_width, cell_height) = cell_size;
        if cell_width == 0 || cell_height == 0 {
            return Err(AtlasError::InvalidCellSize {
                width: cell_width,
                height: cell_height,
            });
        }

        recolor(&mut image, mode);

        // Partial trailing rows/columns are never scanned
        let columns = image.width() / cell_width;
        let rows = image.height() / cell_height;
        let cells = (0..rows).flat_map(|row| (0..columns).map(move |col| (col, row)));

        let mut glyphs = HashMap::new();
        let mut consumed = 0usize;
        for (c, (col, row)) in mapping.chars().zip(cells) {
            let x = (col * cell_width) as f32;
            let y = (row * cell_height) as f32;
            let w = cell_width as f32;
            let h = cell_height as f32;
            // Clockwise; a repeated character keeps its last cell
            glyphs.insert(c, [[x, y], [x + w, y], [x + w, y + h], [x, y + h]]);
            consumed += 1;
        }

        let total = mapping.chars().count();
        if consumed < total {
            tracing::warn!(
                "Font sheet has {} cells but mapping names {} characters; {} dropped",
                columns * rows,
                total,
                total - consumed
            );
        }

        let id = NEXT_ATLAS_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Built glyph atlas {} ({}x{} sheet, {}x{} cells, {} glyphs)",
            id,
            image.width(),
            image.height(),
            cell_width,
            cell_height,
            glyphs.len()
        );

        Ok(Self {
            id,
            cell_width,
            cell_height,
            texture: image,
            glyphs,
        })
    }

    /// Texture-space corners for `c`: top-left, top-right, bottom-right, bottom-left
    pub fn glyph(&self, c: char) -> Option<[TexCoord; 4]> {
        self.glyphs.get(&c).copied()
    }

    pub fn contains(&self, c: char) -> bool {
        self.glyphs.contains_key(&c)
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn chars(&self) -> impl Iterator<Item = char> + '_ {
        self.glyphs.keys().copied()
    }

    pub fn cell_size(&self) -> (u32, u32) {
        (self.cell_width, self.cell_height)
    }

    /// The recolored sheet, ready to upload
    pub fn texture(&self) -> &RgbaImage {
        &self.texture
    }

    pub fn texture_size(&self) -> (u32, u32) {
        self.texture.dimensions()
    }

    /// Unique per atlas, for caching uploaded textures
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Turn a font sheet into white glyph texels that can be tinted per draw.
pub fn recolor(image: &mut RgbaImage, mode: RecolorMode) {
    match mode {
        RecolorMode::BlackKey => {
            for pixel in image.pixels_mut() {
                *pixel = if *pixel == OPAQUE_BLACK {
                    TRANSPARENT
                } else {
                    OPAQUE_WHITE
                };
            }
        }
        RecolorMode::Luminance => {
            for pixel in image.pixels_mut() {
                let [r, g, b, a] = pixel.0;
                let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                let alpha = (luma * a as f32 / 255.0).round().clamp(0.0, 255.0) as u8;
                *pixel = Rgba([255, 255, 255, alpha]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, OPAQUE_BLACK)
    }

    #[test]
    fn maps_one_character_per_cell_in_row_major_order() {
        let atlas = GlyphAtlas::new(sheet(16, 16), "ABCD", (8, 8)).unwrap();

        assert_eq!(atlas.len(), 4);
        assert_eq!(atlas.glyph('A').unwrap()[0], [0.0, 0.0]);
        assert_eq!(atlas.glyph('B').unwrap()[0], [8.0, 0.0]);
        assert_eq!(atlas.glyph('C').unwrap()[0], [0.0, 8.0]);
        assert_eq!(atlas.glyph('D').unwrap()[0], [8.0, 8.0]);
    }

    #[test]
    fn mapped_count_is_min_of_mapping_and_cells() {
        // 3 whole columns x 2 whole rows; trailing 4px column and 5px row dropped
        let cases = [("AB", 2), ("ABCDEF", 6), ("ABCDEFGHIJ", 6), ("", 0)];
        for (mapping, expected) in cases {
            let atlas = GlyphAtlas::new(sheet(28, 21), mapping, (8, 8)).unwrap();
            assert_eq!(atlas.len(), expected, "mapping {:?}", mapping);
        }
    }

    #[test]
    fn scanning_stops_mid_row_when_mapping_runs_out() {
        let atlas = GlyphAtlas::new(sheet(32, 16), "abcde", (8, 8)).unwrap();
        assert_eq!(atlas.glyph('e').unwrap()[0], [0.0, 8.0]);
        assert_eq!(atlas.len(), 5);
    }

    #[test]
    fn last_character_of_mapping_is_mapped() {
        let atlas = GlyphAtlas::new(sheet(24, 8), "xyz", (8, 8)).unwrap();
        assert_eq!(atlas.glyph('z').unwrap()[0], [16.0, 0.0]);
    }

    #[test]
    fn quad_corners_form_an_axis_aligned_cell() {
        let atlas = GlyphAtlas::new(sheet(30, 36), "0123456789", (6, 12)).unwrap();
        for c in atlas.chars() {
            let [tl, tr, br, bl] = atlas.glyph(c).unwrap();
            assert_eq!(tl[0], bl[0]);
            assert_eq!(tr[0], br[0]);
            assert_eq!(tl[1], tr[1]);
            assert_eq!(bl[1], br[1]);
            assert_eq!(tr[0] - tl[0], 6.0);
            assert_eq!(bl[1] - tl[1], 12.0);
        }
    }

    #[test]
    fn duplicate_characters_keep_last_cell() {
        let atlas = GlyphAtlas::new(sheet(24, 8), "AbA", (8, 8)).unwrap();
        assert_eq!(atlas.len(), 2);
        assert_eq!(atlas.glyph('A').unwrap()[0], [16.0, 0.0]);
    }

    #[test]
    fn unknown_character_is_not_found() {
        let atlas = GlyphAtlas::new(sheet(8, 8), "A", (8, 8)).unwrap();
        assert!(atlas.glyph('Z').is_none());
        assert!(!atlas.contains('Z'));
    }

    #[test]
    fn zero_cell_size_is_rejected() {
        let err = GlyphAtlas::new(sheet(8, 8), "A", (0, 8)).err().unwrap();
        assert!(matches!(err, AtlasError::InvalidCellSize { width: 0, height: 8 }));
    }

    #[test]
    fn black_key_recolor() {
        let mut image = RgbaImage::new(5, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([0, 0, 0, 0]));
        image.put_pixel(2, 0, Rgba([128, 128, 128, 255]));
        image.put_pixel(3, 0, Rgba([255, 0, 0, 10]));
        image.put_pixel(4, 0, Rgba([1, 0, 0, 255]));

        let atlas = GlyphAtlas::new(image, "", (1, 1)).unwrap();
        let tex = atlas.texture();
        assert_eq!(*tex.get_pixel(0, 0), TRANSPARENT);
        // Transparent black is not pure opaque black, so it turns white
        assert_eq!(*tex.get_pixel(1, 0), OPAQUE_WHITE);
        assert_eq!(*tex.get_pixel(2, 0), OPAQUE_WHITE);
        assert_eq!(*tex.get_pixel(3, 0), OPAQUE_WHITE);
        assert_eq!(*tex.get_pixel(4, 0), OPAQUE_WHITE);
    }

    #[test]
    fn luminance_recolor_keeps_gray_levels_as_alpha() {
        let mut image = RgbaImage::new(3, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([128, 128, 128, 255]));
        image.put_pixel(2, 0, Rgba([255, 255, 255, 255]));

        recolor(&mut image, RecolorMode::Luminance);
        assert_eq!(*image.get_pixel(0, 0), Rgba([255, 255, 255, 0]));
        assert_eq!(*image.get_pixel(1, 0), Rgba([255, 255, 255, 128]));
        assert_eq!(*image.get_pixel(2, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn atlases_get_distinct_ids() {
        let a = GlyphAtlas::new(sheet(8, 8), "A", (8, 8)).unwrap();
        let b = GlyphAtlas::new(sheet(8, 8), "A", (8, 8)).unwrap();
        assert_ne!(a.id(), b.id());
    }
}

// ABOUTME: Character cell grid rendered through a glyph atlas.
// ABOUTME: Sparse per-cell colors, rebuilt into background and glyph quads on demand.

use std::collections::HashMap;
use std::sync::Arc;

use bitgrid_core::{Color, UnmappedGlyph};
use image::RgbaImage;

use crate::atlas::GlyphAtlas;
use crate::target::{RenderError, RenderTarget, SoftwareTarget};
use crate::vertex::{quad_corners, QuadBuffer, TexCoord};

const NO_TEXTURE: [TexCoord; 4] = [[0.0, 0.0]; 4];

/// Cell address: column from the left, row from the top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellPos {
    pub col: u32,
    pub row: u32,
}

impl CellPos {
    pub const fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

/// What one occupied cell shows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderCharacter {
    pub character: char,
    pub foreground: Color,
    pub background: Color,
}

impl RenderCharacter {
    pub fn new(character: char, foreground: Color, background: Color) -> Self {
        Self {
            character,
            foreground,
            background,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("Cell ({col}, {row}) is outside the {columns}x{rows} grid")]
    OutOfBounds {
        col: u32,
        row: u32,
        columns: u32,
        rows: u32,
    },

    #[error("Render target is {actual:?} pixels but the grid needs {expected:?}")]
    TargetSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("{columns}x{rows} cells of {cell_width}x{cell_height} pixels overflow the target size")]
    TooLarge {
        columns: u32,
        rows: u32,
        cell_width: u32,
        cell_height: u32,
    },
}

pub struct CellGrid<T: RenderTarget = SoftwareTarget> {
    atlas: Arc<GlyphAtlas>,
    columns: u32,
    rows: u32,
    cell_width: u32,
    cell_height: u32,
    cells: HashMap<CellPos, RenderCharacter>,
    target: T,
    background_quads: QuadBuffer,
    glyph_quads: QuadBuffer,
    unmapped_glyph: UnmappedGlyph,
}

impl CellGrid<SoftwareTarget> {
    /// Grid of `dimensions` (columns, rows) drawn by the CPU rasterizer
    pub fn new(atlas: Arc<GlyphAtlas>, dimensions: (u32, u32)) -> Result<Self, GridError> {
        let (width, height) = target_size(&atlas, dimensions)?;
        let target = SoftwareTarget::new(width, height);
        Ok(Self::build(atlas, dimensions, target))
    }
}

impl<T: RenderTarget> CellGrid<T> {
    /// Grid drawn into a caller-supplied target, which must match the grid's pixel size
    pub fn with_target(
        atlas: Arc<GlyphAtlas>,
        dimensions: (u32, u32),
        target: T,
    ) -> Result<Self, GridError> {
        let expected = target_size(&atlas, dimensions)?;
        let actual = target.size();
        if expected != actual {
            return Err(GridError::TargetSize { expected, actual });
        }
        Ok(Self::build(atlas, dimensions, target))
    }

    fn build(atlas: Arc<GlyphAtlas>, dimensions: (u32, u32), target: T) -> Self {
        let (columns, rows) = dimensions;
        let (cell_width, cell_height) = atlas.cell_size();
        // Sized for full occupancy so rebuilds never allocate
        let capacity = columns as usize * rows as usize;

        Self {
            atlas,
            columns,
            rows,
            cell_width,
            cell_height,
            cells: HashMap::with_capacity(capacity),
            target,
            background_quads: QuadBuffer::with_quad_capacity(capacity),
            glyph_quads: QuadBuffer::with_quad_capacity(capacity),
            unmapped_glyph: UnmappedGlyph::default(),
        }
    }

    pub fn set_unmapped_glyph(&mut self, policy: UnmappedGlyph) {
        self.unmapped_glyph = policy;
    }

    pub fn unmapped_glyph(&self) -> UnmappedGlyph {
        self.unmapped_glyph
    }

    /// (columns, rows)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    /// Render target size in pixels; checked against overflow at construction
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.columns * self.cell_width, self.rows * self.cell_height)
    }

    pub fn atlas(&self) -> &Arc<GlyphAtlas> {
        &self.atlas
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    fn check_bounds(&self, pos: CellPos) -> Result<(), GridError> {
        if pos.col >= self.columns || pos.row >= self.rows {
            return Err(GridError::OutOfBounds {
                col: pos.col,
                row: pos.row,
                columns: self.columns,
                rows: self.rows,
            });
        }
        Ok(())
    }

    /// Occupy a cell, returning what was there before
    pub fn set(
        &mut self,
        pos: CellPos,
        cell: RenderCharacter,
    ) -> Result<Option<RenderCharacter>, GridError> {
        self.check_bounds(pos)?;
        Ok(self.cells.insert(pos, cell))
    }

    pub fn get(&self, pos: CellPos) -> Option<&RenderCharacter> {
        self.cells.get(&pos)
    }

    pub fn remove(&mut self, pos: CellPos) -> Option<RenderCharacter> {
        self.cells.remove(&pos)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Write `text` along one row starting at `pos`, clipped at the right edge.
    /// Returns the number of cells written.
    pub fn write_str(
        &mut self,
        pos: CellPos,
        text: &str,
        foreground: Color,
        background: Color,
    ) -> Result<usize, GridError> {
        self.check_bounds(pos)?;
        let room = (self.columns - pos.col) as usize;
        let mut written = 0;
        for (offset, character) in text.chars().take(room).enumerate() {
            let at = CellPos::new(pos.col + offset as u32, pos.row);
            self.cells
                .insert(at, RenderCharacter::new(character, foreground, background));
            written += 1;
        }
        Ok(written)
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellPos, &RenderCharacter)> + '_ {
        self.cells.iter().map(|(pos, cell)| (*pos, cell))
    }

    /// Number of occupied cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Redraw the render target from the current cells.
    ///
    /// The target is cleared to `background`, then every occupied cell gets a
    /// flat background quad and a tinted glyph quad. Empty cells keep the
    /// clear color.
    pub fn rebuild(&mut self, background: Color) -> Result<(), RenderError> {
        self.target.clear(background);
        self.background_quads.reset();
        self.glyph_quads.reset();

        let w = self.cell_width as f32;
        let h = self.cell_height as f32;
        let mut unmapped = 0usize;

        for (pos, cell) in &self.cells {
            let x = pos.col as f32 * w;
            let y = pos.row as f32 * h;
            let corners = quad_corners(x, y, w, h);

            let bg_fits = self
                .background_quads
                .push_quad(corners, NO_TEXTURE, cell.background);

            let (corners, tex_coords) = match self.atlas.glyph(cell.character) {
                Some(tex_coords) => (corners, tex_coords),
                None => {
                    unmapped += 1;
                    match self.unmapped_glyph {
                        // Samples texel (0, 0) across the whole cell
                        UnmappedGlyph::SolidBlock => (corners, NO_TEXTURE),
                        UnmappedGlyph::Skip => (quad_corners(x, y, 0.0, 0.0), NO_TEXTURE),
                    }
                }
            };
            let glyph_fits = self
                .glyph_quads
                .push_quad(corners, tex_coords, cell.foreground);
            debug_assert!(bg_fits && glyph_fits, "cell count exceeds grid capacity");
        }

        if unmapped > 0 {
            tracing::debug!("{} cells hold characters missing from the atlas", unmapped);
        }

        self.target.draw_flat(self.background_quads.used());
        self.target.draw_textured(self.glyph_quads.used(), &self.atlas);
        self.target.display()
    }

    /// Copy of the render target's current contents
    pub fn pixels(&self) -> Result<RgbaImage, RenderError> {
        self.target.read_pixels()
    }
}

/// Pixel size of a `dimensions` (columns, rows) grid drawn with `atlas`
pub fn target_size(atlas: &GlyphAtlas, dimensions: (u32, u32)) -> Result<(u32, u32), GridError> {
    let (columns, rows) = dimensions;
    let (cell_width, cell_height) = atlas.cell_size();
    columns
        .checked_mul(cell_width)
        .zip(rows.checked_mul(cell_height))
        .ok_or(GridError::TooLarge {
            columns,
            rows,
            cell_width,
            cell_height,
        })
}

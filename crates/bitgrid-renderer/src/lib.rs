// ABOUTME: Bitmap font atlas and character grid rendering.
// ABOUTME: Rebuilds offscreen render targets from per-cell glyphs and colors.

pub mod atlas;
pub mod gpu;
pub mod grid;
pub mod sheet;
pub mod target;
pub mod vertex;

pub use atlas::{AtlasError, GlyphAtlas};
pub use gpu::{GpuContext, GpuError, GpuTarget};
pub use grid::{target_size, CellGrid, CellPos, GridError, RenderCharacter};
pub use sheet::{FontSheet, SheetError};
pub use target::{RenderError, RenderTarget, SoftwareTarget};
pub use vertex::{QuadBuffer, TexCoord, Vertex};

// ABOUTME: Render target abstraction and the CPU rasterizer behind it.
// ABOUTME: Clears, draws flat or atlas-textured quads, and reads pixels back.

use bitgrid_core::Color;
use image::{Rgba, RgbaImage};

use crate::atlas::GlyphAtlas;
use crate::vertex::Vertex;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("GPU error: {0}")]
    Gpu(#[from] crate::gpu::GpuError),

    #[error("Failed to map readback buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),

    #[error("Readback channel closed before the buffer was mapped")]
    ReadbackLost,
}

/// Something quads can be drawn into and read back from.
///
/// Vertices come in groups of four (top-left, top-right, bottom-right,
/// bottom-left); a trailing partial group is ignored. Both draws blend
/// source-over onto what is already there.
pub trait RenderTarget {
    /// Size in pixels
    fn size(&self) -> (u32, u32);

    fn clear(&mut self, color: Color);

    /// Draw quads with their vertex color only
    fn draw_flat(&mut self, vertices: &[Vertex]);

    /// Draw quads sampling `atlas`'s texture, tinted by vertex color
    fn draw_textured(&mut self, vertices: &[Vertex], atlas: &GlyphAtlas);

    /// Finish pending work so the contents are safe to read
    fn display(&mut self) -> Result<(), RenderError>;

    fn read_pixels(&self) -> Result<RgbaImage, RenderError>;
}

/// Pixel-exact CPU render target.
///
/// A pixel is covered by a quad when its center lies inside the quad's
/// half-open bounds; textures are sampled nearest at the pixel center.
pub struct SoftwareTarget {
    pixels: RgbaImage,
}

impl SoftwareTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    fn draw(&mut self, vertices: &[Vertex], texture: Option<&RgbaImage>) {
        for quad in vertices.chunks_exact(4) {
            self.fill_quad(quad, texture);
        }
    }

    fn fill_quad(&mut self, quad: &[Vertex], texture: Option<&RgbaImage>) {
        let (tl, br) = (&quad[0], &quad[2]);
        let (x0, y0) = (tl.position[0], tl.position[1]);
        let (x1, y1) = (br.position[0], br.position[1]);
        if x1 <= x0 || y1 <= y0 {
            return;
        }

        let (width, height) = self.pixels.dimensions();
        let first_x = pixel_span_start(x0).min(width);
        let last_x = pixel_span_start(x1).min(width);
        let first_y = pixel_span_start(y0).min(height);
        let last_y = pixel_span_start(y1).min(height);

        let tint = Color::from(tl.color);
        for y in first_y..last_y {
            let fy = (y as f32 + 0.5 - y0) / (y1 - y0);
            let v = lerp(tl.tex_coords[1], br.tex_coords[1], fy);
            for x in first_x..last_x {
                let src = match texture {
                    Some(texture) => {
                        let fx = (x as f32 + 0.5 - x0) / (x1 - x0);
                        let u = lerp(tl.tex_coords[0], br.tex_coords[0], fx);
                        modulate(sample_nearest(texture, u, v), tint)
                    }
                    None => tint,
                };
                let dst = self.pixels.get_pixel_mut(x, y);
                *dst = blend_over(src, *dst);
            }
        }
    }
}

impl RenderTarget for SoftwareTarget {
    fn size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    fn clear(&mut self, color: Color) {
        let fill = Rgba(color.to_rgba8());
        for pixel in self.pixels.pixels_mut() {
            *pixel = fill;
        }
    }

    fn draw_flat(&mut self, vertices: &[Vertex]) {
        self.draw(vertices, None);
    }

    fn draw_textured(&mut self, vertices: &[Vertex], atlas: &GlyphAtlas) {
        self.draw(vertices, Some(atlas.texture()));
    }

    fn display(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    fn read_pixels(&self) -> Result<RgbaImage, RenderError> {
        Ok(self.pixels.clone())
    }
}

/// First pixel whose center is at or past `edge`
fn pixel_span_start(edge: f32) -> u32 {
    (edge - 0.5).ceil().max(0.0) as u32
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn sample_nearest(texture: &RgbaImage, u: f32, v: f32) -> Color {
    let (width, height) = texture.dimensions();
    if width == 0 || height == 0 {
        return Color::TRANSPARENT;
    }
    let x = (u.floor().max(0.0) as u32).min(width - 1);
    let y = (v.floor().max(0.0) as u32).min(height - 1);
    Color::from_rgba8(texture.get_pixel(x, y).0)
}

fn modulate(texel: Color, tint: Color) -> Color {
    Color::rgba(
        texel.r * tint.r,
        texel.g * tint.g,
        texel.b * tint.b,
        texel.a * tint.a,
    )
}

/// Standard alpha blending: src * a + dst * (1 - a)
fn blend_over(src: Color, dst: Rgba<u8>) -> Rgba<u8> {
    let dst = Color::from_rgba8(dst.0);
    let a = src.a.clamp(0.0, 1.0);
    let inv = 1.0 - a;
    Rgba(
        Color::rgba(
            src.r * a + dst.r * inv,
            src.g * a + dst.g * inv,
            src.b * a + dst.b * inv,
            a + dst.a * inv,
        )
        .to_rgba8(),
    )
}

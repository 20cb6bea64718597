// ABOUTME: Vertex layout shared by every render target.
// ABOUTME: Fixed-capacity quad buffer reused across grid rebuilds.

use bytemuck::{Pod, Zeroable};
use bitgrid_core::Color;

/// A point in texture space, measured in texels from the atlas top-left
pub type TexCoord = [f32; 2];

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coords: TexCoord,
    pub color: [f32; 4],
}

impl Vertex {
    const ATTRIBS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x2,
        1 => Float32x2,
        2 => Float32x4,
    ];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Corner offsets of a quad, clockwise from top-left
pub fn quad_corners(x: f32, y: f32, width: f32, height: f32) -> [[f32; 2]; 4] {
    [
        [x, y],
        [x + width, y],
        [x + width, y + height],
        [x, y + height],
    ]
}

/// Vertex storage sized once for the worst case.
///
/// `reset` only rewinds the used count, so a rebuild writes over the previous
/// frame's vertices without touching the allocator.
pub struct QuadBuffer {
    vertices: Vec<Vertex>,
    used: usize,
}

impl QuadBuffer {
    pub fn with_quad_capacity(quads: usize) -> Self {
        Self {
            vertices: vec![Vertex::default(); quads * 4],
            used: 0,
        }
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Append one quad. Returns false when the buffer is full.
    pub fn push_quad(
        &mut self,
        corners: [[f32; 2]; 4],
        tex_coords: [TexCoord; 4],
        color: Color,
    ) -> bool {
        if self.used + 4 > self.vertices.len() {
            return false;
        }
        let color = color.to_array();
        for (i, slot) in self.vertices[self.used..self.used + 4].iter_mut().enumerate() {
            *slot = Vertex {
                position: corners[i],
                tex_coords: tex_coords[i],
                color,
            };
        }
        self.used += 4;
        true
    }

    /// The vertices written since the last reset
    pub fn used(&self) -> &[Vertex] {
        &self.vertices[..self.used]
    }

    pub fn vertex_capacity(&self) -> usize {
        self.vertices.len()
    }
}

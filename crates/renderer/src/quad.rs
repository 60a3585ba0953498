use crate::context::{BufferId, GraphicsContext};
use crate::error::Result;

/// Two clip-space triangles spanning `[-1, 1]²`.
pub const FULLSCREEN_TRIANGLES: [[f32; 2]; 6] = [
    [-1.0, -1.0],
    [1.0, -1.0],
    [1.0, 1.0],
    [-1.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
];

/// Full-screen quad uploaded once and shared by both stages.
#[derive(Debug, Clone, Copy)]
pub struct FullscreenQuad {
    buffer: BufferId,
}

impl FullscreenQuad {
    pub fn new<C: GraphicsContext>(ctx: &mut C) -> Result<Self> {
        let buffer = ctx.create_vertex_buffer(&FULLSCREEN_TRIANGLES)?;
        Ok(Self { buffer })
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        FULLSCREEN_TRIANGLES.len() as u32
    }
}

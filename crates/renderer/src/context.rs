//! The explicit graphics context every feedback operation is threaded through.
//!
//! Nothing in the pipeline reaches for an ambient "current context". Program
//! handles, the feedback target pair and both stages receive
//! `&mut impl GraphicsContext`, which lets the same orchestration drive the
//! wgpu device ([`crate::gpu::WgpuContext`]) or the CPU reference
//! implementation ([`crate::software::SoftwareContext`]).
//!
//! The trait deliberately mirrors a small, bind-then-draw command model:
//!
//! ```text
//!   use_program ─▶ bind_draw_target ─▶ bind_texture / set_uniform
//!        │                                   │
//!        └────────── bind_vertex_attribute ──┴─▶ draw ─▶ flush
//! ```
//!
//! Bindings persist until explicitly replaced; activating a program only
//! changes the current program.

use std::fmt;

use crate::error::Result;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, " #{}"), self.0)
            }
        }
    };
}

resource_id!(
    /// Linked program owned by a context.
    ProgramId,
    "program"
);
resource_id!(
    /// Color texture owned by a context.
    TextureId,
    "texture"
);
resource_id!(
    /// Off-screen draw target that renders into an attached texture.
    DrawTargetId,
    "draw target"
);
resource_id!(
    /// Immutable vertex buffer holding 2D clip-space positions.
    BufferId,
    "vertex buffer"
);

/// Resolved vertex input location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeSlot(pub u32);

/// Resolved uniform location, an index into the program's uniform table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformSlot(pub u32);

/// Value shapes a uniform can be written with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    /// Texture unit a sampler uniform reads from.
    TextureUnit(u32),
}

/// Pixel format of the feedback textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// 32-bit float components; values outside `[0, 1]` survive and
    /// accumulation does not drift.
    Float,
    /// 8-bit normalized components.
    Unorm8,
}

impl ColorFormat {
    /// Picks the feedback texture format for the probed capabilities.
    ///
    /// Floating point wins whenever it is preferred and available; 8-bit
    /// normalized color is the fallback. A device that can render neither
    /// cannot host the pipeline at all.
    pub fn negotiate(capabilities: Capabilities, prefer_high_precision: bool) -> Option<Self> {
        match (
            prefer_high_precision,
            capabilities.float_color,
            capabilities.unorm_color,
        ) {
            (true, true, _) => Some(ColorFormat::Float),
            (_, _, true) => Some(ColorFormat::Unorm8),
            (false, true, false) => Some(ColorFormat::Float),
            (_, false, false) => None,
        }
    }

    pub fn is_high_precision(self) -> bool {
        matches!(self, ColorFormat::Float)
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorFormat::Float => f.write_str("rgba32float"),
            ColorFormat::Unorm8 => f.write_str("rgba8unorm"),
        }
    }
}

/// Result of the color-target capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Floating-point textures can be rendered to and sampled.
    pub float_color: bool,
    /// 8-bit normalized textures can be rendered to and sampled.
    pub unorm_color: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            float_color: true,
            unorm_color: true,
        }
    }
}

/// Where the next draw call writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawBinding {
    /// The visible surface (swapchain image or headless canvas).
    Surface,
    /// An off-screen draw target with `texture` attached as its color output.
    Offscreen {
        target: DrawTargetId,
        texture: TextureId,
    },
}

/// Explicit graphics context handle.
pub trait GraphicsContext {
    /// Probes which color formats can back the feedback textures.
    fn capabilities(&self) -> Capabilities;

    /// Compiles both stages and links them into a program.
    ///
    /// Each stage failure is reported as `RenderError::Compile` for that stage;
    /// interface mismatches between the stages as `RenderError::Link`.
    fn create_program(&mut self, vertex_source: &str, fragment_source: &str) -> Result<ProgramId>;

    /// Location of a vertex input, `None` when the program does not declare it.
    fn attribute_slot(&self, program: ProgramId, name: &str) -> Option<AttributeSlot>;

    /// Location of a uniform, `None` when the program does not declare it.
    fn uniform_slot(&self, program: ProgramId, name: &str) -> Option<UniformSlot>;

    /// Makes `program` the target of subsequent draws.
    fn use_program(&mut self, program: ProgramId) -> Result<()>;

    /// Writes a uniform value into `program`'s parameter storage.
    fn set_uniform(&mut self, program: ProgramId, slot: UniformSlot, value: UniformValue);

    fn create_texture(&mut self, width: u32, height: u32, format: ColorFormat)
        -> Result<TextureId>;

    /// Releases a texture. Later references report `RenderError::StaleResource`.
    fn destroy_texture(&mut self, texture: TextureId);

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)>;

    fn texture_format(&self, texture: TextureId) -> Option<ColorFormat>;

    /// Replaces the whole contents of a texture with RGBA texels in row-major
    /// order. Row 0 is the bottom row, where `gl_FragCoord.y` is 0.5.
    fn upload_texture(&mut self, texture: TextureId, texels: &[[f32; 4]]) -> Result<()>;

    /// Reads a texture back as RGBA texels in row-major, bottom-row-first order.
    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>>;

    /// Reads back the visible surface top-row-first, where the backend keeps it
    /// addressable.
    fn read_surface(&mut self) -> Result<Vec<[f32; 4]>>;

    /// Current size of the visible surface in pixels.
    fn surface_size(&self) -> (u32, u32);

    fn create_draw_target(&mut self) -> Result<DrawTargetId>;

    /// Routes subsequent draws either to the visible surface or to a texture
    /// attached to an off-screen draw target.
    fn bind_draw_target(&mut self, binding: DrawBinding) -> Result<()>;

    /// Binds `texture` to a texture unit for sampling.
    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    fn create_vertex_buffer(&mut self, positions: &[[f32; 2]]) -> Result<BufferId>;

    /// Feeds `buffer` into the vertex input at `slot`.
    fn bind_vertex_attribute(&mut self, slot: AttributeSlot, buffer: BufferId);

    /// Draws `vertex_count` vertices as a triangle list into the bound target.
    fn draw(&mut self, vertex_count: u32) -> Result<()>;

    /// Submits recorded work. A submission boundary, never a blocking wait.
    fn flush(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_prefers_float_when_requested_and_available() {
        let caps = Capabilities::default();
        assert_eq!(ColorFormat::negotiate(caps, true), Some(ColorFormat::Float));
        assert_eq!(ColorFormat::negotiate(caps, false), Some(ColorFormat::Unorm8));
    }

    #[test]
    fn negotiation_falls_back_to_whatever_renders() {
        let unorm_only = Capabilities {
            float_color: false,
            unorm_color: true,
        };
        assert_eq!(
            ColorFormat::negotiate(unorm_only, true),
            Some(ColorFormat::Unorm8)
        );

        let float_only = Capabilities {
            float_color: true,
            unorm_color: false,
        };
        assert_eq!(
            ColorFormat::negotiate(float_only, false),
            Some(ColorFormat::Float)
        );

        let neither = Capabilities {
            float_color: false,
            unorm_color: false,
        };
        assert_eq!(ColorFormat::negotiate(neither, true), None);
    }

    #[test]
    fn resource_ids_render_with_their_kind() {
        assert_eq!(TextureId(3).to_string(), "texture #3");
        assert_eq!(DrawTargetId(0).to_string(), "draw target #0");
    }
}

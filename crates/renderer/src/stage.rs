//! The two render stages and the renderer that sequences them.
//!
//! One frame is strictly `resize? → simulate → display`:
//!
//! ```text
//!   FrameContext ─▶ SimulationStage::step ──(mutates)──▶ FeedbackTargetPair
//!                                                            │ front()
//!                   DisplayStage::present ◀──────────────────┘
//!                          │
//!                          ▼
//!                   visible surface
//! ```

use crate::context::{GraphicsContext, UniformValue};
use crate::error::Result;
use crate::program::ProgramHandle;
use crate::quad::FullscreenQuad;
use crate::targets::FeedbackTargetPair;

/// Attribute fed with the full-screen quad.
pub const POSITION_ATTRIBUTE: &str = "aVertexPosition";
/// `vec2` surface size in pixels.
pub const RESOLUTION_UNIFORM: &str = "uResolution";
/// `float` elapsed seconds.
pub const TIME_UNIFORM: &str = "uTime";
/// `sampler2D` reading the front feedback texture.
pub const TEXTURE_UNIFORM: &str = "uTexture";
/// Texture unit the front texture is bound to.
pub const FEEDBACK_TEXTURE_UNIT: u32 = 0;

const ATTRIBUTE_NAMES: &[&str] = &[POSITION_ATTRIBUTE];
const UNIFORM_NAMES: &[&str] = &[RESOLUTION_UNIFORM, TIME_UNIFORM, TEXTURE_UNIFORM];

/// Per-frame inputs from the frame driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    pub elapsed_seconds: f32,
    pub width: u32,
    pub height: u32,
}

impl FrameContext {
    pub fn new(elapsed_seconds: f32, width: u32, height: u32) -> Self {
        Self {
            elapsed_seconds,
            width,
            height,
        }
    }

    fn resolution(&self) -> UniformValue {
        UniformValue::Vec2([self.width as f32, self.height as f32])
    }
}

/// Sets the shared uniforms and issues one full-screen draw with `program`.
fn draw_fullscreen<C: GraphicsContext>(
    ctx: &mut C,
    program: &ProgramHandle,
    quad: &FullscreenQuad,
    frame: &FrameContext,
) -> Result<()> {
    program.set_uniform(ctx, RESOLUTION_UNIFORM, frame.resolution());
    program.set_uniform(ctx, TIME_UNIFORM, UniformValue::Float(frame.elapsed_seconds));
    program.bind_attribute(ctx, POSITION_ATTRIBUTE, quad.buffer());
    ctx.draw(quad.vertex_count())?;
    ctx.flush()
}

/// Advances the feedback state by one step.
#[derive(Debug)]
pub struct SimulationStage {
    program: ProgramHandle,
}

impl SimulationStage {
    pub fn new<C: GraphicsContext>(ctx: &mut C, vertex_source: &str, fragment_source: &str) -> Result<Self> {
        let program =
            ProgramHandle::new(ctx, vertex_source, fragment_source, ATTRIBUTE_NAMES, UNIFORM_NAMES)?;
        Ok(Self { program })
    }

    pub fn program(&self) -> &ProgramHandle {
        &self.program
    }

    /// Draws into the back texture while sampling the front one, then swaps.
    pub fn step<C: GraphicsContext>(
        &self,
        ctx: &mut C,
        pair: &mut FeedbackTargetPair,
        quad: &FullscreenQuad,
        frame: &FrameContext,
    ) -> Result<()> {
        self.program.activate(ctx)?;
        let targets = pair.begin_write(ctx)?;
        ctx.bind_texture(FEEDBACK_TEXTURE_UNIT, targets.front);
        self.program.set_uniform(
            ctx,
            TEXTURE_UNIFORM,
            UniformValue::TextureUnit(FEEDBACK_TEXTURE_UNIT),
        );
        draw_fullscreen(ctx, &self.program, quad, frame)?;
        pair.end_write_and_swap(ctx)
    }
}

/// Shows the pair's front texture on the visible surface.
#[derive(Debug)]
pub struct DisplayStage {
    program: ProgramHandle,
}

impl DisplayStage {
    pub fn new<C: GraphicsContext>(ctx: &mut C, vertex_source: &str, fragment_source: &str) -> Result<Self> {
        let program =
            ProgramHandle::new(ctx, vertex_source, fragment_source, ATTRIBUTE_NAMES, UNIFORM_NAMES)?;
        Ok(Self { program })
    }

    pub fn program(&self) -> &ProgramHandle {
        &self.program
    }

    /// Reads the pair, never writes it. Presenting twice without a simulation
    /// step in between produces identical output.
    pub fn present<C: GraphicsContext>(
        &self,
        ctx: &mut C,
        pair: &FeedbackTargetPair,
        quad: &FullscreenQuad,
        frame: &FrameContext,
    ) -> Result<()> {
        self.program.activate(ctx)?;
        ctx.bind_texture(FEEDBACK_TEXTURE_UNIT, pair.front());
        self.program.set_uniform(
            ctx,
            TEXTURE_UNIFORM,
            UniformValue::TextureUnit(FEEDBACK_TEXTURE_UNIT),
        );
        draw_fullscreen(ctx, &self.program, quad, frame)
    }
}

/// Owns both stages, the feedback pair and the shared quad.
#[derive(Debug)]
pub struct FeedbackRenderer {
    simulation: SimulationStage,
    display: DisplayStage,
    pair: FeedbackTargetPair,
    quad: FullscreenQuad,
}

/// Shader sources for [`FeedbackRenderer::new`].
#[derive(Debug, Clone, Copy)]
pub struct ShaderSet<'a> {
    pub vertex: &'a str,
    pub simulation: &'a str,
    pub display: &'a str,
}

impl FeedbackRenderer {
    /// Builds programs first and textures last, so shader errors surface
    /// before any texture is allocated.
    pub fn new<C: GraphicsContext>(
        ctx: &mut C,
        shaders: ShaderSet<'_>,
        width: u32,
        height: u32,
        prefer_high_precision: bool,
    ) -> Result<Self> {
        let simulation = SimulationStage::new(ctx, shaders.vertex, shaders.simulation)?;
        let display = DisplayStage::new(ctx, shaders.vertex, shaders.display)?;
        let quad = FullscreenQuad::new(ctx)?;
        let pair = FeedbackTargetPair::new(ctx, width, height, prefer_high_precision)?;
        Ok(Self {
            simulation,
            display,
            pair,
            quad,
        })
    }

    /// Runs one frame: resize when the surface changed, simulate, display.
    pub fn render_frame<C: GraphicsContext>(&mut self, ctx: &mut C, frame: &FrameContext) -> Result<()> {
        if self.pair.size() != (frame.width.max(1), frame.height.max(1)) {
            self.pair.resize(ctx, frame.width, frame.height)?;
        }
        self.simulation.step(ctx, &mut self.pair, &self.quad, frame)?;
        self.display.present(ctx, &self.pair, &self.quad, frame)
    }

    /// Re-presents the current front texture without advancing the simulation.
    pub fn redisplay<C: GraphicsContext>(&self, ctx: &mut C, frame: &FrameContext) -> Result<()> {
        self.display.present(ctx, &self.pair, &self.quad, frame)
    }

    /// Replaces the front texture with an initial state.
    pub fn seed<C: GraphicsContext>(&self, ctx: &mut C, texels: &[[f32; 4]]) -> Result<()> {
        self.pair.seed(ctx, texels)
    }

    pub fn pair(&self) -> &FeedbackTargetPair {
        &self.pair
    }

    pub fn simulation(&self) -> &SimulationStage {
        &self.simulation
    }

    pub fn display(&self) -> &DisplayStage {
        &self.display
    }

    /// Reads back the current front texture.
    pub fn read_front<C: GraphicsContext>(&self, ctx: &mut C) -> Result<Vec<[f32; 4]>> {
        ctx.read_texture(self.pair.front())
    }

    pub fn release<C: GraphicsContext>(self, ctx: &mut C) {
        self.pair.release(ctx);
    }
}

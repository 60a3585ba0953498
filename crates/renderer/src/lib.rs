//! Renderer crate for loopshade, a GPU feedback-loop shader renderer.
//!
//! A simulation fragment shader reads its own previous output and writes the
//! next state into a second texture; a display shader then shows the latest
//! state on screen. The overall flow per frame is:
//!
//! ```text
//!   frame driver (window / headless)
//!          │ FrameContext { elapsed_seconds, width, height }
//!          ▼
//!   FeedbackRenderer::render_frame
//!          ├─▶ FeedbackTargetPair::resize        (only when the size changed)
//!          ├─▶ SimulationStage::step             back ◀─ draw ─ sample ◀─ front, swap
//!          └─▶ DisplayStage::present             front ─▶ visible surface
//! ```
//!
//! Every operation receives the graphics context explicitly as
//! `&mut impl GraphicsContext`. [`WgpuContext`] drives a real device;
//! [`SoftwareContext`] is a CPU reference used by the tests.
//!
//! Shaders are plain GLSL with loose `uniform` declarations. The [`glsl`]
//! module rewrites them into Vulkan-compatible GLSL, validates them with naga
//! and reflects the names the stages bind.

pub mod clock;
pub mod context;
pub mod error;
pub mod glsl;
pub mod gpu;
pub mod headless;
pub mod program;
pub mod quad;
pub mod shaders;
pub mod software;
pub mod stage;
pub mod targets;
pub mod types;
pub mod window;

pub use clock::{FrameClock, FramePacer, RenderStats, TimeSample};
pub use context::{
    AttributeSlot, BufferId, Capabilities, ColorFormat, DrawBinding, DrawTargetId,
    GraphicsContext, ProgramId, TextureId, UniformSlot, UniformValue,
};
pub use error::{RenderError, Result, ShaderStage};
pub use gpu::{AdapterProfile, FrameStatus, WgpuContext};
pub use headless::{export_png, render_frames, HeadlessReport};
pub use program::ProgramHandle;
pub use quad::FullscreenQuad;
pub use software::{DrawRecord, Fragment, SoftwareContext};
pub use stage::{DisplayStage, FeedbackRenderer, FrameContext, ShaderSet, SimulationStage};
pub use targets::{FeedbackTargetPair, Slot, WriteTargets};
pub use types::{Precision, SessionConfig, SessionMode, ShaderSources};

/// Outcome of [`Renderer::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    /// The window was closed.
    Closed,
    Headless(HeadlessReport),
}

/// Entry point that picks the frame driver for a session.
pub struct Renderer {
    config: SessionConfig,
}

impl Renderer {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary> {
        tracing::info!(
            width = self.config.surface_size.0,
            height = self.config.surface_size.1,
            precision = %self.config.precision,
            mode = ?self.config.mode,
            "starting feedback session"
        );
        match &self.config.mode {
            SessionMode::Windowed { target_fps } => {
                window::run_window(&self.config, *target_fps)?;
                Ok(RunSummary::Closed)
            }
            SessionMode::Headless {
                frames,
                fps,
                output,
            } => headless::run_headless(&self.config, *frames, *fps, output.as_deref())
                .map(RunSummary::Headless),
        }
    }
}

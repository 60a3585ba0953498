use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::shaders;
use crate::stage::ShaderSet;

/// Requested precision of the feedback textures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    /// Floating point when the device can render it, otherwise 8-bit.
    #[default]
    Auto,
    /// Floating point; falls back to 8-bit with a warning when unavailable.
    Float,
    /// 8-bit normalized even when floating point is available.
    Unorm,
}

impl Precision {
    pub fn prefers_high_precision(self) -> bool {
        !matches!(self, Precision::Unorm)
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Precision::Auto),
            "float" | "high" => Ok(Precision::Float),
            "unorm" | "unorm8" | "low" => Ok(Precision::Unorm),
            other => Err(format!(
                "unknown precision '{other}'; expected auto, float or unorm"
            )),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Auto => f.write_str("auto"),
            Precision::Float => f.write_str("float"),
            Precision::Unorm => f.write_str("unorm"),
        }
    }
}

/// Owned shader sources for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub vertex: String,
    pub simulation: String,
    pub display: String,
}

impl ShaderSources {
    /// Uses the built-in vertex and display shaders around `simulation`.
    pub fn with_simulation(simulation: impl Into<String>) -> Self {
        Self {
            vertex: shaders::VERTEX_SHADER.to_string(),
            simulation: simulation.into(),
            display: shaders::DISPLAY_SHADER.to_string(),
        }
    }

    pub fn as_set(&self) -> ShaderSet<'_> {
        ShaderSet {
            vertex: &self.vertex,
            simulation: &self.simulation,
            display: &self.display,
        }
    }
}

/// How frames are produced and where they end up.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMode {
    /// Interactive window, optionally capped to `target_fps`.
    Windowed { target_fps: Option<f32> },
    /// Fixed number of frames at a fixed time step, optionally exported as PNG.
    Headless {
        frames: u32,
        fps: f32,
        output: Option<PathBuf>,
    },
}

/// Everything a driver needs to run a rendering session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub shaders: ShaderSources,
    pub surface_size: (u32, u32),
    pub precision: Precision,
    pub mode: SessionMode,
}

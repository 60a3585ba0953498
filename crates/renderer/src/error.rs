use std::fmt;
use std::path::PathBuf;

/// Programmable stage a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Failures surfaced by the feedback pipeline.
///
/// Construction errors (`Compile`, `Link`, `UnsupportedFormat`) are reported
/// synchronously and never retried. Everything raised from inside a frame is
/// fatal to the rendering session.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to compile {stage} shader:\n{diagnostics}")]
    Compile {
        stage: ShaderStage,
        diagnostics: String,
    },
    #[error("failed to link shader program:\n{diagnostics}")]
    Link { diagnostics: String },
    #[error("neither floating-point nor 8-bit normalized color targets are renderable")]
    UnsupportedFormat,
    #[error("feedback targets used out of sequence: {0}")]
    Sequence(&'static str),
    #[error("texture {0} is bound both as draw destination and sampled input")]
    FeedbackLoop(u32),
    #[error("{0} was destroyed or never created")]
    StaleResource(String),
    #[error("graphics device failure: {0}")]
    Device(String),
    #[error("failed to write {}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl RenderError {
    pub(crate) fn compile(stage: ShaderStage, diagnostics: impl Into<String>) -> Self {
        RenderError::Compile {
            stage,
            diagnostics: diagnostics.into(),
        }
    }

    pub(crate) fn link(diagnostics: impl Into<String>) -> Self {
        RenderError::Link {
            diagnostics: diagnostics.into(),
        }
    }

    /// True for failures raised while building programs or targets, as
    /// opposed to failures of a running session.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            RenderError::Compile { .. } | RenderError::Link { .. } | RenderError::UnsupportedFormat
        )
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

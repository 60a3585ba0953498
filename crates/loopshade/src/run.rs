use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use renderer::shaders::DEMO_SIMULATION;
use renderer::{Renderer, RunSummary, SessionConfig, SessionMode, ShaderSources};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::config::{ModeSettings, SessionFile, Settings};

/// Simulation shader picked up from the working directory when none is given.
pub const DEFAULT_FRAGMENT_FILE: &str = "fragment.glsl";

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let file = match args.config.as_deref() {
        Some(path) => {
            let file = SessionFile::load(path)
                .with_context(|| format!("failed to load session file {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded session file");
            file
        }
        None => SessionFile::default(),
    };
    let settings = Settings::resolve(&args, file).context("invalid session settings")?;
    let config = session_config(&settings, Path::new("."))?;

    match Renderer::new(config).run().context("render session failed")? {
        RunSummary::Closed => tracing::info!("window closed"),
        RunSummary::Headless(report) => tracing::info!(
            frames = report.frames,
            width = report.width,
            height = report.height,
            format = %report.format,
            "headless session complete"
        ),
    }
    Ok(())
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Reads the shader files named by `settings` and builds the renderer config.
///
/// Without an explicit fragment path, `DEFAULT_FRAGMENT_FILE` under `workdir`
/// is used when present, otherwise the built-in demo simulation.
pub fn session_config(settings: &Settings, workdir: &Path) -> Result<SessionConfig> {
    let simulation = match resolve_fragment(settings, workdir) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading simulation shader");
            read_shader(&path)?
        }
        None => {
            tracing::info!("no simulation shader found; running the built-in demo");
            DEMO_SIMULATION.to_string()
        }
    };

    let mut shaders = ShaderSources::with_simulation(simulation);
    if let Some(path) = settings.display.as_deref() {
        tracing::info!(path = %path.display(), "loading display shader");
        shaders.display = read_shader(path)?;
    }

    let mode = match &settings.mode {
        ModeSettings::Windowed { target_fps } => SessionMode::Windowed {
            target_fps: *target_fps,
        },
        ModeSettings::Headless {
            frames,
            fps,
            output,
        } => SessionMode::Headless {
            frames: *frames,
            fps: *fps,
            output: output.clone(),
        },
    };

    Ok(SessionConfig {
        shaders,
        surface_size: settings.surface_size,
        precision: settings.precision,
        mode,
    })
}

fn resolve_fragment(settings: &Settings, workdir: &Path) -> Option<PathBuf> {
    if let Some(path) = settings.fragment.clone() {
        return Some(path);
    }
    let fallback = workdir.join(DEFAULT_FRAGMENT_FILE);
    fallback.is_file().then_some(fallback)
}

fn read_shader(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read shader source {}", path.display()))
}

use std::path::PathBuf;

use clap::Parser;
use renderer::Precision;

#[derive(Parser, Debug, Default)]
#[command(
    name = "loopshade",
    author,
    version,
    about = "Render a GLSL feedback loop: the simulation shader reads its own previous frame"
)]
pub struct Args {
    /// Simulation fragment shader. Defaults to `fragment.glsl` in the working
    /// directory, or a built-in demo when that file does not exist.
    #[arg(value_name = "FRAGMENT")]
    pub fragment: Option<PathBuf>,

    /// Display fragment shader replacing the built-in pass-through.
    #[arg(long, value_name = "PATH")]
    pub display: Option<PathBuf>,

    /// Surface size (e.g. `800x600`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Feedback texture precision: `auto`, `float`, or `unorm`.
    #[arg(long, value_name = "MODE", value_parser = parse_precision)]
    pub precision: Option<Precision>,

    /// Render without a window and exit after `--frames` frames.
    #[arg(long)]
    pub headless: bool,

    /// Number of frames to render in headless mode.
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    /// Headless time step (1/FPS) or windowed frame cap (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Write the final feedback texture to this PNG (headless only).
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// TOML session file; flags given on the command line take precedence.
    #[arg(long, value_name = "PATH", env = "LOOPSHADE_CONFIG")]
    pub config: Option<PathBuf>,
}

pub fn parse() -> Args {
    Args::parse()
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| format!("expected WxH format (e.g. 800x600), got '{trimmed}'"))?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{}' in size", width.trim()))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{}' in size", height.trim()))?;

    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

pub fn parse_precision(value: &str) -> Result<Precision, String> {
    if value.trim().is_empty() {
        return Err("precision must not be empty".to_string());
    }
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_size_accepts_common_separators() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_surface_size(" 64 X 32 "), Ok((64, 32)));
        assert_eq!(parse_surface_size("4×4"), Ok((4, 4)));
    }

    #[test]
    fn surface_size_rejects_bad_input() {
        assert!(parse_surface_size("1280").is_err());
        assert!(parse_surface_size("0x720").is_err());
        assert!(parse_surface_size("widex10").unwrap_err().contains("width"));
    }

    #[test]
    fn precision_rejects_empty_values() {
        assert_eq!(parse_precision("float"), Ok(Precision::Float));
        assert!(parse_precision("  ").is_err());
    }

    #[test]
    fn flags_parse_into_args() {
        let args = Args::try_parse_from([
            "loopshade",
            "sim.glsl",
            "--headless",
            "--frames",
            "3",
            "--size",
            "4x4",
            "--precision",
            "unorm",
        ])
        .expect("valid arguments");
        assert_eq!(args.fragment, Some(PathBuf::from("sim.glsl")));
        assert!(args.headless);
        assert_eq!(args.frames, Some(3));
        assert_eq!(args.size, Some((4, 4)));
        assert_eq!(args.precision, Some(Precision::Unorm));
    }
}

//! Optional TOML session file and its merge with command-line flags.
//!
//! ```toml
//! fragment = "shaders/reaction.glsl"
//! size = "640x480"
//! precision = "float"
//!
//! [headless]
//! frames = 240
//! fps = 30
//! output = "last.png"
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use renderer::Precision;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::cli::{parse_surface_size, Args};

pub const DEFAULT_SURFACE_SIZE: (u32, u32) = (800, 600);
pub const DEFAULT_HEADLESS_FRAMES: u32 = 120;
pub const DEFAULT_HEADLESS_FPS: f32 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse session file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFile {
    pub fragment: Option<PathBuf>,
    pub display: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_size_opt")]
    pub size: Option<(u32, u32)>,
    #[serde(default, deserialize_with = "deserialize_precision_opt")]
    pub precision: Option<Precision>,
    /// Frame cap for windowed sessions.
    pub fps: Option<f32>,
    /// Presence of this table selects headless rendering.
    pub headless: Option<HeadlessSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeadlessSection {
    pub frames: Option<u32>,
    pub fps: Option<f32>,
    pub output: Option<PathBuf>,
}

impl SessionFile {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SessionFile = toml::from_str(input)?;
        Ok(raw)
    }

    /// Reads `path` and rebases its relative paths onto the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = Self::from_toml_str(&contents)?;
        if let Some(base) = path.parent() {
            file.rebase(base);
        }
        Ok(file)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |path: &mut Option<PathBuf>| {
            if let Some(inner) = path.as_mut() {
                if inner.is_relative() {
                    *inner = base.join(&*inner);
                }
            }
        };
        join(&mut self.fragment);
        join(&mut self.display);
        if let Some(headless) = self.headless.as_mut() {
            join(&mut headless.output);
        }
    }
}

/// How the session produces frames after merging flags and file.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeSettings {
    Windowed {
        target_fps: Option<f32>,
    },
    Headless {
        frames: u32,
        fps: f32,
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// `None` selects `fragment.glsl` or the built-in demo.
    pub fragment: Option<PathBuf>,
    pub display: Option<PathBuf>,
    pub surface_size: (u32, u32),
    pub precision: Precision,
    pub mode: ModeSettings,
}

impl Settings {
    /// Merges command-line flags over the session file.
    pub fn resolve(args: &Args, file: SessionFile) -> Result<Self, ConfigError> {
        let headless = args.headless || file.headless.is_some();
        let headless_section = file.headless.unwrap_or_default();

        let mode = if headless {
            let frames = args
                .frames
                .or(headless_section.frames)
                .unwrap_or(DEFAULT_HEADLESS_FRAMES);
            if frames == 0 {
                return Err(ConfigError::Invalid(
                    "headless sessions need at least one frame".to_string(),
                ));
            }
            let fps = args
                .fps
                .or(headless_section.fps)
                .unwrap_or(DEFAULT_HEADLESS_FPS);
            if !(fps.is_finite() && fps > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "headless fps must be a positive number, got {fps}"
                )));
            }
            ModeSettings::Headless {
                frames,
                fps,
                output: args.output.clone().or(headless_section.output),
            }
        } else {
            if args.output.is_some() {
                return Err(ConfigError::Invalid(
                    "--output requires --headless".to_string(),
                ));
            }
            if args.frames.is_some() {
                return Err(ConfigError::Invalid(
                    "--frames requires --headless".to_string(),
                ));
            }
            let target_fps = match args.fps.or(file.fps) {
                Some(fps) if fps.is_nan() || fps < 0.0 => {
                    return Err(ConfigError::Invalid(format!(
                        "fps cap must not be negative, got {fps}"
                    )))
                }
                Some(fps) if fps == 0.0 => None,
                other => other,
            };
            ModeSettings::Windowed { target_fps }
        };

        Ok(Self {
            fragment: args.fragment.clone().or(file.fragment),
            display: args.display.clone().or(file.display),
            surface_size: args.size.or(file.size).unwrap_or(DEFAULT_SURFACE_SIZE),
            precision: args.precision.or(file.precision).unwrap_or_default(),
            mode,
        })
    }
}

fn deserialize_size_opt<'de, D>(deserializer: D) -> Result<Option<(u32, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<(u32, u32)>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a size such as \"800x600\" or [800, 600]")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse_surface_size(v).map(Some).map_err(E::custom)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let width: u32 = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(0, &self))?;
            let height: u32 = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(1, &self))?;
            if seq.next_element::<u32>()?.is_some() {
                return Err(de::Error::invalid_length(3, &self));
            }
            if width == 0 || height == 0 {
                return Err(de::Error::custom(
                    "surface dimensions must be greater than zero",
                ));
            }
            Ok(Some((width, height)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn deserialize_precision_opt<'de, D>(deserializer: D) -> Result<Option<Precision>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map(Some).map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::default()
    }

    #[test]
    fn empty_file_gives_windowed_defaults() {
        let settings = Settings::resolve(&args(), SessionFile::default()).expect("settings");
        assert_eq!(settings.surface_size, DEFAULT_SURFACE_SIZE);
        assert_eq!(settings.precision, Precision::Auto);
        assert_eq!(settings.mode, ModeSettings::Windowed { target_fps: None });
        assert!(settings.fragment.is_none());
    }

    #[test]
    fn file_values_are_parsed() {
        let file = SessionFile::from_toml_str(
            r#"
            fragment = "sim.glsl"
            size = [320, 200]
            precision = "unorm"

            [headless]
            frames = 10
            fps = 30
            "#,
        )
        .expect("parse");
        assert_eq!(file.size, Some((320, 200)));
        assert_eq!(file.precision, Some(Precision::Unorm));

        let settings = Settings::resolve(&args(), file).expect("settings");
        assert_eq!(
            settings.mode,
            ModeSettings::Headless {
                frames: 10,
                fps: 30.0,
                output: None,
            }
        );
    }

    #[test]
    fn flags_override_file_values() {
        let file = SessionFile::from_toml_str("size = \"320x200\"\nprecision = \"float\"\nfps = 20\n")
            .expect("parse");
        let args = Args {
            size: Some((64, 64)),
            precision: Some(Precision::Unorm),
            fps: Some(0.0),
            ..Args::default()
        };
        let settings = Settings::resolve(&args, file).expect("settings");
        assert_eq!(settings.surface_size, (64, 64));
        assert_eq!(settings.precision, Precision::Unorm);
        assert_eq!(settings.mode, ModeSettings::Windowed { target_fps: None });
    }

    #[test]
    fn invalid_combinations_are_rejected() {
        let output_without_headless = Args {
            output: Some(PathBuf::from("out.png")),
            ..Args::default()
        };
        assert!(matches!(
            Settings::resolve(&output_without_headless, SessionFile::default()),
            Err(ConfigError::Invalid(_))
        ));

        let zero_frames = Args {
            headless: true,
            frames: Some(0),
            ..Args::default()
        };
        assert!(matches!(
            Settings::resolve(&zero_frames, SessionFile::default()),
            Err(ConfigError::Invalid(_))
        ));

        let bad_fps = Args {
            headless: true,
            fps: Some(-1.0),
            ..Args::default()
        };
        assert!(Settings::resolve(&bad_fps, SessionFile::default()).is_err());
    }

    #[test]
    fn malformed_files_report_parse_errors() {
        assert!(matches!(
            SessionFile::from_toml_str("size = \"wide\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SessionFile::from_toml_str("precision = \"half\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SessionFile::from_toml_str("colour = true"),
            Err(ConfigError::Parse(_))
        ));
    }
}

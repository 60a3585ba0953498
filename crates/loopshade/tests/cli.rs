use std::fs;
use std::process::Command;

use loopshade::config::{ModeSettings, SessionFile, Settings};
use loopshade::cli::Args;
use renderer::Precision;

fn loopshade() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_loopshade"));
    command.env_remove("LOOPSHADE_CONFIG");
    command
}

#[test]
fn malformed_size_is_an_argument_error() {
    let output = loopshade()
        .args(["--headless", "--size", "wide"])
        .output()
        .expect("spawn loopshade");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("WxH"), "stderr: {stderr}");
}

#[test]
fn unknown_precision_is_an_argument_error() {
    let output = loopshade()
        .args(["--precision", "half"])
        .output()
        .expect("spawn loopshade");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("precision"));
}

#[test]
fn missing_shader_file_fails_before_rendering() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = loopshade()
        .arg(dir.path().join("absent.glsl"))
        .args(["--headless", "--frames", "1"])
        .output()
        .expect("spawn loopshade");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.glsl"));
}

#[test]
fn session_file_paths_are_relative_to_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.toml");
    fs::write(
        &path,
        r#"
fragment = "sim.glsl"
size = "16x8"
precision = "float"

[headless]
frames = 5
output = "renders/last.png"
"#,
    )
    .expect("write session file");

    let file = SessionFile::load(&path).expect("load");
    assert_eq!(file.fragment, Some(dir.path().join("sim.glsl")));

    let args = Args {
        frames: Some(2),
        ..Args::default()
    };
    let settings = Settings::resolve(&args, file).expect("resolve");
    assert_eq!(settings.surface_size, (16, 8));
    assert_eq!(settings.precision, Precision::Float);
    assert_eq!(
        settings.mode,
        ModeSettings::Headless {
            frames: 2,
            fps: 60.0,
            output: Some(dir.path().join("renders/last.png")),
        }
    );
}

#[test]
fn unreadable_session_file_names_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = SessionFile::load(&dir.path().join("nope.toml")).unwrap_err();
    assert!(err.to_string().contains("nope.toml"));
}

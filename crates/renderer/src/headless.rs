use std::path::Path;
use std::time::Instant;

use crate::clock::FrameClock;
use crate::context::{ColorFormat, GraphicsContext};
use crate::error::{RenderError, Result};
use crate::gpu::WgpuContext;
use crate::stage::{FeedbackRenderer, FrameContext};
use crate::types::{Precision, SessionConfig};

/// Summary of a finished headless run.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessReport {
    pub frames: u32,
    /// Simulated time of the last frame.
    pub last_time: f32,
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
}

/// Renders `frames` frames on the GPU without a window, then optionally
/// writes the final front texture to `output` as PNG.
pub fn run_headless(
    config: &SessionConfig,
    frames: u32,
    fps: f32,
    output: Option<&Path>,
) -> Result<HeadlessReport> {
    let (width, height) = config.surface_size;
    let mut ctx = WgpuContext::headless(width, height)?;
    let mut renderer = FeedbackRenderer::new(
        &mut ctx,
        config.shaders.as_set(),
        width,
        height,
        config.precision.prefers_high_precision(),
    )?;
    warn_on_precision_fallback(config.precision, renderer.pair().format());

    let mut clock = FrameClock::fixed(fps);
    let started = Instant::now();
    let report = render_frames(&mut ctx, &mut renderer, &mut clock, frames)?;
    tracing::info!(
        frames = report.frames,
        simulated_seconds = report.last_time,
        wall_ms = started.elapsed().as_millis() as u64,
        "headless render finished"
    );

    if let Some(path) = output {
        let texels = renderer.read_front(&mut ctx)?;
        export_png(path, report.width, report.height, &texels)?;
        tracing::info!(path = %path.display(), "wrote front texture");
    }
    renderer.release(&mut ctx);
    Ok(report)
}

/// Drives `renderer` for `frames` frames at the surface size of `ctx`.
pub fn render_frames<C: GraphicsContext>(
    ctx: &mut C,
    renderer: &mut FeedbackRenderer,
    clock: &mut FrameClock,
    frames: u32,
) -> Result<HeadlessReport> {
    let (width, height) = ctx.surface_size();
    let mut last_time = 0.0;
    for _ in 0..frames {
        let sample = clock.tick();
        last_time = sample.seconds;
        renderer.render_frame(ctx, &FrameContext::new(sample.seconds, width, height))?;
        tracing::trace!(frame = sample.frame_index, time = sample.seconds, "rendered frame");
    }
    let (width, height) = renderer.pair().size();
    Ok(HeadlessReport {
        frames,
        last_time,
        width,
        height,
        format: renderer.pair().format(),
    })
}

/// Writes RGBA texels as an 8-bit PNG. Values are clamped to `[0, 1]`.
///
/// `texels` are in texture order, bottom row first, and are flipped so the
/// image shows what the surface displays.
pub fn export_png(path: &Path, width: u32, height: u32, texels: &[[f32; 4]]) -> Result<()> {
    let bytes: Vec<u8> = texels
        .chunks(width.max(1) as usize)
        .rev()
        .flatten()
        .flat_map(|texel| texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        .collect();
    let image = image::RgbaImage::from_raw(width, height, bytes).ok_or_else(|| {
        RenderError::Device(format!(
            "{} texels do not fill a {width}x{height} image",
            texels.len()
        ))
    })?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|source| RenderError::Export {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn warn_on_precision_fallback(requested: Precision, format: ColorFormat) {
    if requested == Precision::Float && !format.is_high_precision() {
        tracing::warn!(%format, "floating-point color targets unavailable; using 8-bit textures");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::{DISPLAY_SHADER, VERTEX_SHADER};
    use crate::software::SoftwareContext;
    use crate::stage::ShaderSet;

    const COUNTER: &str = "uniform sampler2D uTexture;\nuniform vec2 uResolution;\nvoid main() {\n    vec4 previous = texture2D(uTexture, gl_FragCoord.xy / uResolution);\n    gl_FragColor = previous + vec4(0.25, 0.0, 0.0, 0.0);\n}\n";

    fn software() -> SoftwareContext {
        let mut ctx = SoftwareContext::new(3, 2);
        ctx.register_fragment(COUNTER, |fragment| {
            let [w, h] = fragment.uniform_vec2("uResolution");
            let [x, y] = fragment.coord();
            let mut previous = fragment.sample("uTexture", [x / w, y / h]);
            previous[0] += 0.25;
            previous
        });
        ctx.register_fragment(DISPLAY_SHADER, |fragment| {
            let [w, h] = fragment.uniform_vec2("uResolution");
            let [x, y] = fragment.coord();
            fragment.sample("uTexture", [x / w, y / h])
        });
        ctx
    }

    #[test]
    fn frames_accumulate_through_the_feedback_loop() {
        let mut ctx = software();
        let shaders = ShaderSet {
            vertex: VERTEX_SHADER,
            simulation: COUNTER,
            display: DISPLAY_SHADER,
        };
        let mut renderer = FeedbackRenderer::new(&mut ctx, shaders, 3, 2, true).expect("renderer");
        let mut clock = FrameClock::fixed(60.0);

        let report = render_frames(&mut ctx, &mut renderer, &mut clock, 3).expect("frames");
        assert_eq!(report.frames, 3);
        assert_eq!((report.width, report.height), (3, 2));
        assert_eq!(report.format, ColorFormat::Float);
        assert!((report.last_time - 2.0 / 60.0).abs() < 1e-6);

        let front = renderer.read_front(&mut ctx).expect("front");
        assert!(front.iter().all(|texel| (texel[0] - 0.75).abs() < 1e-6));
    }

    #[test]
    fn png_export_puts_the_bottom_texture_row_last() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("front.png");
        let texels = [
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 2.0, 0.0, 1.0],
            [0.0, 0.0, 0.5, 1.0],
            [-1.0, 0.0, 0.0, 0.0],
        ];
        export_png(&path, 2, 2, &texels).expect("export");

        let image = image::open(&path).expect("open").to_rgba8();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 128, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0, 0]);
        assert_eq!(image.get_pixel(0, 1).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 1).0, [0, 255, 0, 255]);
    }

    #[test]
    fn mismatched_texel_counts_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = export_png(&dir.path().join("short.png"), 4, 4, &[[0.0; 4]; 3]);
        assert!(matches!(result, Err(RenderError::Device(_))));
    }
}

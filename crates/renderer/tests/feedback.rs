use renderer::shaders::{DISPLAY_SHADER, VERTEX_SHADER};
use renderer::{
    Capabilities, ColorFormat, DrawBinding, FeedbackRenderer, FeedbackTargetPair, FrameContext,
    FullscreenQuad, GraphicsContext, ProgramHandle, RenderError, ShaderSet, ShaderStage,
    SimulationStage, SoftwareContext, UniformValue,
};

const PASS_THROUGH: &str = r"precision highp float;

uniform sampler2D uTexture;
uniform vec2 uResolution;
uniform float uTime;

void main() {
    gl_FragColor = texture2D(uTexture, gl_FragCoord.xy / uResolution);
}
";

fn sample_own_pixel(fragment: &renderer::Fragment<'_>) -> [f32; 4] {
    let [w, h] = fragment.uniform_vec2("uResolution");
    let [x, y] = fragment.coord();
    fragment.sample("uTexture", [x / w, y / h])
}

fn context(width: u32, height: u32) -> SoftwareContext {
    let mut ctx = SoftwareContext::new(width, height);
    ctx.register_fragment(PASS_THROUGH, sample_own_pixel);
    ctx.register_fragment(DISPLAY_SHADER, sample_own_pixel);
    ctx
}

fn shaders() -> ShaderSet<'static> {
    ShaderSet {
        vertex: VERTEX_SHADER,
        simulation: PASS_THROUGH,
        display: DISPLAY_SHADER,
    }
}

fn gradient(width: u32, height: u32) -> Vec<[f32; 4]> {
    (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| {
                [
                    x as f32 / width as f32,
                    y as f32 / height as f32,
                    0.5,
                    1.0,
                ]
            })
        })
        .collect()
}

#[test]
fn front_is_always_the_texture_written_by_the_last_step() {
    let mut ctx = context(4, 4);
    let stage = SimulationStage::new(&mut ctx, VERTEX_SHADER, PASS_THROUGH).expect("stage");
    let quad = FullscreenQuad::new(&mut ctx).expect("quad");
    let mut pair = FeedbackTargetPair::new(&mut ctx, 4, 4, true).expect("pair");

    let mut previous_front = pair.front();
    for step in 0..7 {
        let written = pair.back();
        stage
            .step(&mut ctx, &mut pair, &quad, &FrameContext::new(step as f32, 4, 4))
            .expect("step");
        assert_eq!(pair.front(), written, "step {step}");
        assert_ne!(pair.front(), previous_front, "step {step}");
        assert_eq!(pair.back(), previous_front, "step {step}");
        previous_front = pair.front();

        let draw = ctx.draws().last().expect("draw recorded");
        assert!(
            matches!(draw.destination, DrawBinding::Offscreen { texture, .. } if texture == written),
            "step {step} drew into {:?}",
            draw.destination
        );
    }
}

#[test]
fn no_draw_samples_its_own_destination() {
    let mut ctx = context(4, 4);
    let mut renderer = FeedbackRenderer::new(&mut ctx, shaders(), 4, 4, true).expect("renderer");
    for frame in 0..5 {
        renderer
            .render_frame(&mut ctx, &FrameContext::new(frame as f32 * 0.016, 4, 4))
            .expect("frame");
    }

    assert_eq!(ctx.draws().len(), 10);
    for draw in ctx.draws() {
        if let DrawBinding::Offscreen { texture, .. } = draw.destination {
            assert!(!draw.sampled.contains(&texture), "{draw:?} reads its destination");
            assert_eq!(draw.sampled.len(), 1);
        }
    }
}

#[test]
fn sampling_the_destination_is_refused() {
    let mut ctx = context(2, 2);
    let program =
        ProgramHandle::new(&mut ctx, VERTEX_SHADER, PASS_THROUGH, &["aVertexPosition"], &["uTexture"])
            .expect("program");
    let quad = FullscreenQuad::new(&mut ctx).expect("quad");
    let mut pair = FeedbackTargetPair::new(&mut ctx, 2, 2, true).expect("pair");

    program.activate(&mut ctx).expect("activate");
    let targets = pair.begin_write(&mut ctx).expect("begin");
    ctx.bind_texture(0, targets.back);
    program.set_uniform(&mut ctx, "uTexture", UniformValue::TextureUnit(0));
    program.bind_attribute(&mut ctx, "aVertexPosition", quad.buffer());

    assert!(matches!(
        ctx.draw(quad.vertex_count()),
        Err(RenderError::FeedbackLoop(_))
    ));
}

#[test]
fn resize_changes_size_but_not_format() {
    for (capabilities, prefer, expected) in [
        (Capabilities::default(), true, ColorFormat::Float),
        (Capabilities::default(), false, ColorFormat::Unorm8),
        (
            Capabilities {
                float_color: false,
                unorm_color: true,
            },
            true,
            ColorFormat::Unorm8,
        ),
    ] {
        let mut ctx = SoftwareContext::with_capabilities(4, 4, capabilities);
        let mut pair = FeedbackTargetPair::new(&mut ctx, 4, 4, prefer).expect("pair");
        assert_eq!(pair.format(), expected);

        pair.resize(&mut ctx, 10, 3).expect("resize");
        for texture in [pair.front(), pair.back()] {
            assert_eq!(ctx.texture_size(texture), Some((10, 3)));
            assert_eq!(ctx.texture_format(texture), Some(expected));
        }
        assert_eq!(pair.format(), expected);
    }
}

#[test]
fn unbound_names_are_tolerated_and_isolated() {
    const SOLID: &str = "uniform vec2 uColor;\nvoid main() { gl_FragColor = vec4(uColor, 0.0, 1.0); }\n";
    let mut ctx = SoftwareContext::new(2, 2);
    ctx.register_fragment(SOLID, |fragment| {
        let [r, g] = fragment.uniform_vec2("uColor");
        [r, g, 0.0, 1.0]
    });
    let program = ProgramHandle::new(
        &mut ctx,
        VERTEX_SHADER,
        SOLID,
        &["aVertexPosition", "aNormal"],
        &["uColor", "uMissing", "uTime"],
    )
    .expect("unknown names do not fail construction");
    let quad = FullscreenQuad::new(&mut ctx).expect("quad");

    program.activate(&mut ctx).expect("activate");
    program.set_uniform(&mut ctx, "uColor", UniformValue::Vec2([0.0, 1.0]));
    program.set_uniform(&mut ctx, "uMissing", UniformValue::Vec2([1.0, 0.0]));
    program.set_uniform(&mut ctx, "uTime", UniformValue::Float(3.0));
    program.bind_attribute(&mut ctx, "aNormal", quad.buffer());
    program.bind_attribute(&mut ctx, "aVertexPosition", quad.buffer());
    ctx.draw(quad.vertex_count()).expect("draw");

    let surface = ctx.read_surface().expect("surface");
    assert!(surface.iter().all(|texel| *texel == [0.0, 1.0, 0.0, 1.0]));
}

#[test]
fn display_is_a_pure_function_of_the_front_texture() {
    let mut ctx = context(4, 4);
    let mut renderer = FeedbackRenderer::new(&mut ctx, shaders(), 4, 4, false).expect("renderer");
    renderer.seed(&mut ctx, &gradient(4, 4)).expect("seed");
    let frame = FrameContext::new(0.0, 4, 4);
    renderer.render_frame(&mut ctx, &frame).expect("frame");

    let front = renderer.pair().front();
    let first = ctx.read_surface().expect("first");
    renderer.redisplay(&mut ctx, &frame).expect("redisplay");
    let second = ctx.read_surface().expect("second");
    renderer
        .redisplay(&mut ctx, &FrameContext::new(5.0, 4, 4))
        .expect("redisplay later");
    let third = ctx.read_surface().expect("third");

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(renderer.pair().front(), front);

    // The surface lists rows top-down, the texture bottom-up.
    let texels = ctx.read_texture(front).expect("front texels");
    let upright: Vec<[f32; 4]> = texels.chunks(4).rev().flatten().copied().collect();
    assert_eq!(first, upright);
    assert_ne!(first, texels);
}

#[test]
fn pass_through_content_survives_three_frames() {
    let mut ctx = context(4, 4);
    let mut renderer = FeedbackRenderer::new(&mut ctx, shaders(), 4, 4, true).expect("renderer");
    renderer.seed(&mut ctx, &gradient(4, 4)).expect("seed");

    let mut after_first = None;
    for (index, time) in [0.0, 0.016, 0.033].into_iter().enumerate() {
        renderer
            .render_frame(&mut ctx, &FrameContext::new(time, 4, 4))
            .expect("frame");
        if index == 0 {
            after_first = Some(renderer.read_front(&mut ctx).expect("frame 1 front"));
        }
    }

    let after_first = after_first.expect("first frame ran");
    assert_eq!(after_first, gradient(4, 4));
    assert_eq!(renderer.read_front(&mut ctx).expect("frame 3 front"), after_first);
    assert_eq!(ctx.flush_count(), 6);
}

#[test]
fn resizing_mid_session_leaves_no_stale_textures() {
    let mut ctx = context(4, 4);
    let mut renderer = FeedbackRenderer::new(&mut ctx, shaders(), 4, 4, true).expect("renderer");
    renderer
        .render_frame(&mut ctx, &FrameContext::new(0.0, 4, 4))
        .expect("4x4 frame");
    let old = [renderer.pair().front(), renderer.pair().back()];
    ctx.clear_draws();

    ctx.set_surface_size(8, 8);
    renderer
        .render_frame(&mut ctx, &FrameContext::new(0.016, 8, 8))
        .expect("8x8 frame");

    assert_eq!(renderer.pair().size(), (8, 8));
    assert!(old.iter().all(|texture| !ctx.is_live(*texture)));
    assert_eq!(ctx.live_textures(), 2);
    assert_eq!(ctx.draws().len(), 2);
    for draw in ctx.draws() {
        assert_eq!(draw.fragments, 64);
        for texture in &draw.sampled {
            assert!(!old.contains(texture));
            assert_eq!(ctx.texture_size(*texture), Some((8, 8)));
        }
    }
}

#[test]
fn shader_failures_surface_before_any_texture_is_allocated() {
    const BROKEN: &str = "void main() { gl_FragColor = vec4(undefined_value); }\n";
    let mut ctx = context(4, 4);
    ctx.register_fragment(BROKEN, |_| [0.0; 4]);
    let result = FeedbackRenderer::new(
        &mut ctx,
        ShaderSet {
            simulation: BROKEN,
            ..shaders()
        },
        4,
        4,
        true,
    );

    match result {
        Err(RenderError::Compile { stage, diagnostics }) => {
            assert_eq!(stage, ShaderStage::Fragment);
            assert!(!diagnostics.is_empty());
        }
        other => panic!("expected a fragment compile error, got {other:?}"),
    }
    assert_eq!(ctx.live_textures(), 0);
}

#[test]
fn mismatched_varyings_fail_to_link() {
    const VERTEX: &str = "attribute vec4 aVertexPosition;\nvarying vec2 vUv;\nvoid main() { vUv = aVertexPosition.xy; gl_Position = aVertexPosition; }\n";
    const FRAGMENT: &str = "varying vec3 vUv;\nvoid main() { gl_FragColor = vec4(vUv, 1.0); }\n";
    let mut ctx = SoftwareContext::new(2, 2);
    ctx.register_fragment(FRAGMENT, |_| [0.0; 4]);
    assert!(matches!(
        ctx.create_program(VERTEX, FRAGMENT),
        Err(RenderError::Link { .. })
    ));
}

#[test]
fn devices_without_color_targets_cannot_host_the_pipeline() {
    let mut ctx = SoftwareContext::with_capabilities(
        4,
        4,
        Capabilities {
            float_color: false,
            unorm_color: false,
        },
    );
    ctx.register_fragment(PASS_THROUGH, sample_own_pixel);
    ctx.register_fragment(DISPLAY_SHADER, sample_own_pixel);
    let error = FeedbackRenderer::new(&mut ctx, shaders(), 4, 4, true).unwrap_err();
    assert!(matches!(error, RenderError::UnsupportedFormat));
    assert!(error.is_construction_error());
}

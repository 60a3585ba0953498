use std::sync::Arc;
use std::time::Instant;

use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::clock::{FrameClock, FramePacer, RenderStats};
use crate::context::GraphicsContext;
use crate::error::{RenderError, Result};
use crate::gpu::{FrameStatus, WgpuContext};
use crate::headless::warn_on_precision_fallback;
use crate::stage::{FeedbackRenderer, FrameContext};
use crate::types::SessionConfig;

const SOFTWARE_FPS_CAP: f32 = 15.0;

/// Opens a window and renders the feedback loop until it is closed.
///
/// Resizes are applied to the swapchain immediately and reach the feedback
/// textures at the start of the next frame.
pub fn run_window(config: &SessionConfig, target_fps: Option<f32>) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| RenderError::Device(format!("failed to create event loop: {err}")))?;
    let (width, height) = config.surface_size;
    let window = WindowBuilder::new()
        .with_title("loopshade")
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(|err| RenderError::Device(format!("failed to create window: {err}")))?;
    let window = Arc::new(window);

    let mut ctx = WgpuContext::windowed(window.clone())?;
    let (surface_width, surface_height) = ctx.surface_size();
    let mut renderer = FeedbackRenderer::new(
        &mut ctx,
        config.shaders.as_set(),
        surface_width,
        surface_height,
        config.precision.prefers_high_precision(),
    )?;
    warn_on_precision_fallback(config.precision, renderer.pair().format());

    let profile = ctx.adapter_profile().clone();
    let target_fps = match target_fps {
        None if profile.is_software() => {
            tracing::warn!(
                adapter = %profile.name,
                cap = SOFTWARE_FPS_CAP,
                "software rasterizer detected; capping preview (override with --fps)"
            );
            Some(SOFTWARE_FPS_CAP)
        }
        other => other,
    };

    let mut clock = FrameClock::realtime();
    let mut pacer = FramePacer::new(target_fps);
    let mut stats = RenderStats::new(Instant::now());
    let mut failure: Option<RenderError> = None;

    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && matches!(event.logical_key, Key::Named(NamedKey::Escape)) =>
            {
                elwt.exit();
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = ctx.resize_surface(size.width, size.height) {
                    failure = Some(err);
                    elwt.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                match render_window_frame(&mut ctx, &mut renderer, &mut clock) {
                    Ok(FrameStatus::Ready) => {
                        pacer.mark_rendered(now);
                        if let Some(fps) = stats.record_frame(now) {
                            let (width, height) = renderer.pair().size();
                            tracing::debug!(fps = fps.round(), width, height, "render stats");
                        }
                    }
                    Ok(FrameStatus::Skipped) => {}
                    Err(err) => {
                        tracing::error!(error = %err, "frame failed; ending session");
                        failure = Some(err);
                        elwt.exit();
                    }
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if pacer.ready_for_frame(now) {
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = pacer.next_deadline() {
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
        }
        _ => {}
    });

    if let Some(err) = failure {
        return Err(err);
    }
    run_result.map_err(|err| RenderError::Device(format!("window event loop error: {err}")))?;
    renderer.release(&mut ctx);
    Ok(())
}

fn render_window_frame(
    ctx: &mut WgpuContext,
    renderer: &mut FeedbackRenderer,
    clock: &mut FrameClock,
) -> Result<FrameStatus> {
    if ctx.begin_frame()? == FrameStatus::Skipped {
        return Ok(FrameStatus::Skipped);
    }
    let sample = clock.tick();
    let (width, height) = ctx.surface_size();
    renderer.render_frame(ctx, &FrameContext::new(sample.seconds, width, height))?;
    ctx.present()?;
    Ok(FrameStatus::Ready)
}

use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::context::Capabilities;
use crate::error::{RenderError, Result};

/// Format of the off-screen canvas standing in for a window surface.
pub(crate) const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Adapter details worth logging and exposing to drivers.
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl AdapterProfile {
    fn from_wgpu(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

pub(crate) struct WindowSurface {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

pub(crate) struct Canvas {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("headless canvas"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CANVAS_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

/// Where the default draw target lives.
pub(crate) enum Presentation {
    Window(WindowSurface),
    Canvas(Canvas),
}

pub(crate) struct GpuDevice {
    pub _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_profile: AdapterProfile,
    pub capabilities: Capabilities,
    pub max_dimension: u32,
    pub presentation: Presentation,
}

impl GpuDevice {
    /// Presents into `window`'s swapchain.
    pub fn windowed(window: Arc<Window>) -> Result<Self> {
        let size = window.inner_size();
        let instance = create_instance();
        let surface = instance
            .create_surface(window)
            .map_err(|err| RenderError::Device(format!("failed to create rendering surface: {err}")))?;
        let adapter = request_adapter(&instance, Some(&surface))?;
        let (device, queue) = request_device(&adapter)?;
        let config = configure_surface(&surface, &adapter, &device, size)?;

        Ok(Self::assemble(
            instance,
            &adapter,
            device,
            queue,
            Presentation::Window(WindowSurface { surface, config }),
        ))
    }

    /// Renders the default target into an off-screen canvas of the given size.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let instance = create_instance();
        let adapter = request_adapter(&instance, None)?;
        let (device, queue) = request_device(&adapter)?;
        let canvas = Canvas::new(&device, width, height);

        Ok(Self::assemble(
            instance,
            &adapter,
            device,
            queue,
            Presentation::Canvas(canvas),
        ))
    }

    fn assemble(
        instance: wgpu::Instance,
        adapter: &wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        presentation: Presentation,
    ) -> Self {
        let adapter_profile = AdapterProfile::from_wgpu(&adapter.get_info());
        let capabilities = probe_capabilities(adapter);
        tracing::info!(
            adapter = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            float_color = capabilities.float_color,
            unorm_color = capabilities.unorm_color,
            "created GPU device"
        );
        Self {
            _instance: instance,
            max_dimension: device.limits().max_texture_dimension_2d,
            device,
            queue,
            adapter_profile,
            capabilities,
            presentation,
        }
    }

    pub fn surface_size(&self) -> (u32, u32) {
        match &self.presentation {
            Presentation::Window(window) => (window.config.width, window.config.height),
            Presentation::Canvas(canvas) => (canvas.width, canvas.height),
        }
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        match &self.presentation {
            Presentation::Window(window) => window.config.format,
            Presentation::Canvas(_) => CANVAS_FORMAT,
        }
    }

    /// Reconfigures the swapchain or reallocates the canvas. Zero sizes are
    /// ignored; minimised windows report them.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        match &mut self.presentation {
            Presentation::Window(window) => {
                window.config.width = width;
                window.config.height = height;
                window.surface.configure(&self.device, &window.config);
            }
            Presentation::Canvas(canvas) => {
                *canvas = Canvas::new(&self.device, width, height);
            }
        }
    }

    /// Reapplies the current configuration after the surface was lost.
    pub fn reconfigure(&self) {
        if let Presentation::Window(window) = &self.presentation {
            window.surface.configure(&self.device, &window.config);
        }
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    compatible_surface: Option<&wgpu::Surface<'_>>,
) -> Result<wgpu::Adapter> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface,
        force_fallback_adapter: false,
    }))
    .map_err(|err| RenderError::Device(format!("failed to find a suitable GPU adapter: {err}")))
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("loopshade device"),
        required_features: wgpu::Features::empty(),
        required_limits: adapter.limits(),
        memory_hints: wgpu::MemoryHints::Performance,
        trace: wgpu::Trace::default(),
    }))
    .map_err(|err| RenderError::Device(format!("failed to create GPU device: {err}")))
}

fn configure_surface(
    surface: &wgpu::Surface<'static>,
    adapter: &wgpu::Adapter,
    device: &wgpu::Device,
    size: PhysicalSize<u32>,
) -> Result<wgpu::SurfaceConfiguration> {
    let caps = surface.get_capabilities(adapter);
    let Some(&fallback) = caps.formats.first() else {
        return Err(RenderError::Device(
            "surface reports no supported formats".into(),
        ));
    };
    // Shaders write display-ready values, as they would to a WebGL canvas.
    let format = caps
        .formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .unwrap_or_else(|| {
            tracing::warn!(
                ?fallback,
                "no linear (non-sRGB) surface format available; falling back to {:?}",
                fallback
            );
            fallback
        });
    let present_mode = caps
        .present_modes
        .iter()
        .copied()
        .find(|mode| *mode == wgpu::PresentMode::Fifo)
        .or_else(|| caps.present_modes.first().copied())
        .unwrap_or(wgpu::PresentMode::Fifo);
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);
    tracing::debug!(?format, ?present_mode, "configuring window surface");

    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(device, &config);
    Ok(config)
}

/// Feedback textures must be both renderable and sampleable.
fn probe_capabilities(adapter: &wgpu::Adapter) -> Capabilities {
    let usable = |format| {
        adapter
            .get_texture_format_features(format)
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING)
    };
    Capabilities {
        float_color: usable(wgpu::TextureFormat::Rgba32Float),
        unorm_color: usable(wgpu::TextureFormat::Rgba8Unorm),
    }
}

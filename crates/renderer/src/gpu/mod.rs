//! wgpu implementation of [`GraphicsContext`].
//!
//! - `device` owns instance/adapter/device wiring and the default draw target,
//!   which is either a window swapchain or an off-screen canvas.
//! - `uniforms` mirrors each program's std140 block on the CPU; the bytes
//!   reach the GPU through a staging copy recorded right before each draw.
//! - `texels` converts between RGBA f32 texels and wgpu copy layouts.
//!
//! Draws are recorded into one command encoder and submitted on `flush`.
//! Render pipelines are built lazily per program and color target format.

mod device;
mod texels;
mod uniforms;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::context::{
    AttributeSlot, BufferId, Capabilities, ColorFormat, DrawBinding, DrawTargetId,
    GraphicsContext, ProgramId, TextureId, UniformSlot, UniformValue,
};
use crate::error::{RenderError, Result, ShaderStage};
use crate::glsl::{self, ProgramLayout, UniformLocation};

use self::device::{GpuDevice, Presentation};
use self::texels::{texture_format, TexelLayout};
use self::uniforms::UniformBlock;

pub use self::device::AdapterProfile;

/// Vertex buffers hold `vec4(x, y, 0, 1)` so any float attribute width reads them.
const VERTEX_STRIDE: u64 = 16;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: ColorFormat,
    width: u32,
    height: u32,
}

struct GpuProgram {
    layout: ProgramLayout,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    sampler_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    block: UniformBlock,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    sampler_units: Vec<Option<u32>>,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

/// Result of acquiring the next window frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    /// The surface was outdated or lost and has been reconfigured; skip this frame.
    Skipped,
}

pub struct WgpuContext {
    gpu: GpuDevice,
    programs: Vec<GpuProgram>,
    textures: Vec<Option<GpuTexture>>,
    draw_targets: Vec<bool>,
    buffers: Vec<wgpu::Buffer>,
    placeholder: wgpu::TextureView,
    sampler: wgpu::Sampler,
    current_program: Option<ProgramId>,
    binding: DrawBinding,
    units: BTreeMap<u32, TextureId>,
    attributes: BTreeMap<AttributeSlot, BufferId>,
    encoder: Option<wgpu::CommandEncoder>,
    frame: Option<wgpu::SurfaceTexture>,
}

impl WgpuContext {
    /// Context presenting to `window`.
    pub fn windowed(window: Arc<Window>) -> Result<Self> {
        Ok(Self::from_device(GpuDevice::windowed(window)?))
    }

    /// Context whose visible surface is an off-screen `width`×`height` canvas.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        Ok(Self::from_device(GpuDevice::headless(width, height)?))
    }

    fn from_device(gpu: GpuDevice) -> Self {
        let placeholder = gpu
            .device
            .create_texture_with_data(
                &gpu.queue,
                &wgpu::TextureDescriptor {
                    label: Some("unbound sampler placeholder"),
                    size: wgpu::Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                wgpu::util::TextureDataOrder::LayerMajor,
                &[0, 0, 0, 0],
            )
            .create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("feedback sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu,
            programs: Vec::new(),
            textures: Vec::new(),
            draw_targets: Vec::new(),
            buffers: Vec::new(),
            placeholder,
            sampler,
            current_program: None,
            binding: DrawBinding::Surface,
            units: BTreeMap::new(),
            attributes: BTreeMap::new(),
            encoder: None,
            frame: None,
        }
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.gpu.adapter_profile
    }

    /// Resizes the visible surface. Pending work targeting the old surface
    /// is submitted first.
    pub fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        self.flush()?;
        self.frame = None;
        self.gpu.resize(width, height);
        Ok(())
    }

    /// Acquires the swapchain image the next surface draws go to. Headless
    /// contexts are always ready.
    pub fn begin_frame(&mut self) -> Result<FrameStatus> {
        let Presentation::Window(window) = &self.gpu.presentation else {
            return Ok(FrameStatus::Ready);
        };
        if self.frame.is_some() {
            return Ok(FrameStatus::Ready);
        }
        match window.surface.get_current_texture() {
            Ok(frame) => {
                self.frame = Some(frame);
                Ok(FrameStatus::Ready)
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost or outdated; reconfiguring");
                self.gpu.reconfigure();
                Ok(FrameStatus::Skipped)
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::warn!("surface timeout; retrying next frame");
                Ok(FrameStatus::Skipped)
            }
            Err(err) => Err(RenderError::Device(format!("surface error: {err}"))),
        }
    }

    /// Submits pending work and shows the acquired swapchain image.
    pub fn present(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        Ok(())
    }

    fn texture(&self, texture: TextureId) -> Result<&GpuTexture> {
        self.textures
            .get(texture.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| RenderError::StaleResource(texture.to_string()))
    }

    fn program(&self, program: ProgramId) -> Result<&GpuProgram> {
        self.programs
            .get(program.0 as usize)
            .ok_or_else(|| RenderError::StaleResource(program.to_string()))
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.gpu.device;
        self.encoder.get_or_insert_with(|| {
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("feedback encoder"),
            })
        })
    }

    /// View and format the current draw binding writes to.
    fn destination(&mut self) -> Result<(wgpu::TextureView, wgpu::TextureFormat, Option<TextureId>)> {
        match self.binding {
            DrawBinding::Offscreen { texture, .. } => {
                let target = self.texture(texture)?;
                Ok((
                    target.view.clone(),
                    texture_format(target.format),
                    Some(texture),
                ))
            }
            DrawBinding::Surface => {
                let format = self.gpu.surface_format();
                if let Presentation::Canvas(canvas) = &self.gpu.presentation {
                    return Ok((canvas.view.clone(), format, None));
                }
                if self.begin_frame()? == FrameStatus::Skipped {
                    return Err(RenderError::Device(
                        "no swapchain image available for the surface draw".into(),
                    ));
                }
                let frame = self
                    .frame
                    .as_ref()
                    .ok_or_else(|| RenderError::Device("swapchain image missing".into()))?;
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok((view, format, None))
            }
        }
    }

    fn pipeline(&mut self, program: ProgramId, format: wgpu::TextureFormat) -> Result<wgpu::RenderPipeline> {
        let device = &self.gpu.device;
        let entry = self
            .programs
            .get_mut(program.0 as usize)
            .ok_or_else(|| RenderError::StaleResource(program.to_string()))?;
        if let Some(pipeline) = entry.pipelines.get(&format) {
            return Ok(pipeline.clone());
        }

        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = entry
            .layout
            .attributes
            .iter()
            .map(|attribute| {
                vertex_format(&attribute.ty).map(|format| {
                    [wgpu::VertexAttribute {
                        format,
                        offset: 0,
                        shader_location: attribute.location,
                    }]
                })
            })
            .collect::<Option<_>>()
            .ok_or_else(|| {
                RenderError::compile(ShaderStage::Vertex, "vertex attributes must be float vectors")
            })?;
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = vertex_attributes
            .iter()
            .map(|attributes| wgpu::VertexBufferLayout {
                array_stride: VERTEX_STRIDE,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        tracing::debug!(%program, ?format, "building render pipeline");
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("feedback pipeline"),
            layout: Some(&entry.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &entry.vertex,
                entry_point: Some("main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &entry.fragment,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        entry.pipelines.insert(format, pipeline.clone());
        Ok(pipeline)
    }

    fn read_back(
        &mut self,
        texture: &wgpu::Texture,
        layout: TexelLayout,
        width: u32,
        height: u32,
    ) -> Result<Vec<[f32; 4]>> {
        self.flush()?;
        let row_bytes = layout.padded_row_bytes(width);
        let staging = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: u64::from(row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.gpu
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Device(format!("device poll failed: {err}")))?;
        receiver
            .recv()
            .map_err(|_| RenderError::Device("readback callback dropped".into()))?
            .map_err(|err| RenderError::Device(format!("failed to map readback buffer: {err}")))?;

        let texels = {
            let bytes = slice.get_mapped_range();
            layout.decode(&bytes, width, height, row_bytes)
        };
        staging.unmap();
        Ok(texels)
    }
}

fn vertex_format(ty: &str) -> Option<wgpu::VertexFormat> {
    match ty {
        "float" => Some(wgpu::VertexFormat::Float32),
        "vec2" => Some(wgpu::VertexFormat::Float32x2),
        "vec3" => Some(wgpu::VertexFormat::Float32x3),
        "vec4" => Some(wgpu::VertexFormat::Float32x4),
        _ => None,
    }
}

fn shader_module(
    device: &wgpu::Device,
    stage: wgpu::naga::ShaderStage,
    source: String,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(match stage {
            wgpu::naga::ShaderStage::Vertex => "feedback vertex shader",
            _ => "feedback fragment shader",
        }),
        source: wgpu::ShaderSource::Glsl {
            shader: source.into(),
            stage,
            defines: &[],
        },
    })
}

fn sampler_layout_entries(layout: &ProgramLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    layout
        .samplers()
        .flat_map(|(_, uniform)| {
            let UniformLocation::Sampler {
                texture_binding,
                sampler_binding,
            } = uniform.location
            else {
                return Vec::new();
            };
            vec![
                wgpu::BindGroupLayoutEntry {
                    binding: texture_binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: sampler_binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ]
        })
        .collect()
}

impl GraphicsContext for WgpuContext {
    fn capabilities(&self) -> Capabilities {
        self.gpu.capabilities
    }

    fn create_program(&mut self, vertex_source: &str, fragment_source: &str) -> Result<ProgramId> {
        let prepared = glsl::compile_program(vertex_source, fragment_source)?;
        let device = &self.gpu.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let vertex = shader_module(device, wgpu::naga::ShaderStage::Vertex, prepared.vertex);
        let fragment = shader_module(device, wgpu::naga::ShaderStage::Fragment, prepared.fragment);

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("feedback uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let sampler_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("feedback sampler layout"),
            entries: &sampler_layout_entries(&prepared.layout),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("feedback pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &sampler_layout],
            push_constant_ranges: &[],
        });

        let block = UniformBlock::new(&prepared.layout);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("feedback uniform buffer"),
            size: block.len(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("feedback uniform bind group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::link(error.to_string()));
        }

        let sampler_units = vec![None; prepared.layout.uniforms.len()];
        self.programs.push(GpuProgram {
            layout: prepared.layout,
            vertex,
            fragment,
            sampler_layout,
            pipeline_layout,
            block,
            uniform_buffer,
            uniform_bind_group,
            sampler_units,
            pipelines: HashMap::new(),
        });
        Ok(ProgramId((self.programs.len() - 1) as u32))
    }

    fn attribute_slot(&self, program: ProgramId, name: &str) -> Option<AttributeSlot> {
        let program = self.program(program).ok()?;
        program
            .layout
            .attribute(name)
            .map(|attribute| AttributeSlot(attribute.location))
    }

    fn uniform_slot(&self, program: ProgramId, name: &str) -> Option<UniformSlot> {
        let program = self.program(program).ok()?;
        program
            .layout
            .uniform_index(name)
            .map(|index| UniformSlot(index as u32))
    }

    fn use_program(&mut self, program: ProgramId) -> Result<()> {
        self.program(program)?;
        self.current_program = Some(program);
        Ok(())
    }

    fn set_uniform(&mut self, program: ProgramId, slot: UniformSlot, value: UniformValue) {
        let Some(program) = self.programs.get_mut(program.0 as usize) else {
            return;
        };
        let index = slot.0 as usize;
        let Some(uniform) = program.layout.uniforms.get(index) else {
            return;
        };
        match value {
            UniformValue::TextureUnit(unit) => program.sampler_units[index] = Some(unit),
            value => program.block.write(uniform.location, value),
        }
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> Result<TextureId> {
        let supported = match format {
            ColorFormat::Float => self.gpu.capabilities.float_color,
            ColorFormat::Unorm8 => self.gpu.capabilities.unorm_color,
        };
        if !supported {
            return Err(RenderError::UnsupportedFormat);
        }
        let (width, height) = (width.max(1), height.max(1));
        let max = self.gpu.max_dimension;
        if width > max || height > max {
            return Err(RenderError::Device(format!(
                "GPU max texture dimension is {max}, requested {width}x{height}"
            )));
        }

        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("feedback texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.push(Some(GpuTexture {
            texture,
            view,
            format,
            width,
            height,
        }));
        Ok(TextureId((self.textures.len() - 1) as u32))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(slot) = self.textures.get_mut(texture.0 as usize) {
            if let Some(entry) = slot.take() {
                entry.texture.destroy();
            }
        }
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.texture(texture).ok().map(|t| (t.width, t.height))
    }

    fn texture_format(&self, texture: TextureId) -> Option<ColorFormat> {
        self.texture(texture).ok().map(|t| t.format)
    }

    fn upload_texture(&mut self, texture: TextureId, texels: &[[f32; 4]]) -> Result<()> {
        let target = self.texture(texture)?;
        let expected = (target.width * target.height) as usize;
        if texels.len() != expected {
            return Err(RenderError::Device(format!(
                "upload of {} texels into {texture} holding {expected}",
                texels.len()
            )));
        }
        let layout = match target.format {
            ColorFormat::Float => TexelLayout::Rgba32Float,
            ColorFormat::Unorm8 => TexelLayout::Rgba8Unorm,
        };
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &layout.encode(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(target.width * layout.bytes_per_texel()),
                rows_per_image: Some(target.height),
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        let source = self.texture(texture)?;
        let layout = match source.format {
            ColorFormat::Float => TexelLayout::Rgba32Float,
            ColorFormat::Unorm8 => TexelLayout::Rgba8Unorm,
        };
        let (handle, width, height) = (source.texture.clone(), source.width, source.height);
        self.read_back(&handle, layout, width, height)
    }

    fn read_surface(&mut self) -> Result<Vec<[f32; 4]>> {
        let Presentation::Canvas(canvas) = &self.gpu.presentation else {
            return Err(RenderError::Device(
                "window surfaces cannot be read back".into(),
            ));
        };
        let layout = TexelLayout::of(canvas.texture.format())
            .ok_or_else(|| RenderError::Device("canvas format is not readable".into()))?;
        let (handle, width, height) = (canvas.texture.clone(), canvas.width, canvas.height);
        self.read_back(&handle, layout, width, height)
    }

    fn surface_size(&self) -> (u32, u32) {
        self.gpu.surface_size()
    }

    /// wgpu has no framebuffer objects; a draw target only names an
    /// attachment point that `bind_draw_target` routes draws through.
    fn create_draw_target(&mut self) -> Result<DrawTargetId> {
        self.draw_targets.push(true);
        Ok(DrawTargetId((self.draw_targets.len() - 1) as u32))
    }

    fn bind_draw_target(&mut self, binding: DrawBinding) -> Result<()> {
        if let DrawBinding::Offscreen { target, texture } = binding {
            if !self.draw_targets.get(target.0 as usize).copied().unwrap_or(false) {
                return Err(RenderError::StaleResource(target.to_string()));
            }
            self.texture(texture)?;
        }
        self.binding = binding;
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.units.insert(unit, texture);
    }

    fn create_vertex_buffer(&mut self, positions: &[[f32; 2]]) -> Result<BufferId> {
        let padded: Vec<[f32; 4]> = positions.iter().map(|[x, y]| [*x, *y, 0.0, 1.0]).collect();
        let buffer = self
            .gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("feedback vertex buffer"),
                contents: bytemuck::cast_slice(&padded),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.buffers.push(buffer);
        Ok(BufferId((self.buffers.len() - 1) as u32))
    }

    fn bind_vertex_attribute(&mut self, slot: AttributeSlot, buffer: BufferId) {
        self.attributes.insert(slot, buffer);
    }

    fn draw(&mut self, vertex_count: u32) -> Result<()> {
        let program_id = self
            .current_program
            .ok_or(RenderError::Sequence("draw issued without an active program"))?;
        let (view, format, destination) = self.destination()?;
        let height = match destination {
            Some(texture) => self.texture(texture)?.height,
            None => self.gpu.surface_size().1,
        };
        let orientation = glsl::orientation(self.binding, height);

        // Pipeline and bind group creation must land inside the encoder's
        // validation scope.
        self.encoder();
        let pipeline = self.pipeline(program_id, format)?;
        let upload = self
            .programs
            .get_mut(program_id.0 as usize)
            .is_some_and(|program| {
                program.block.write_orientation(orientation);
                program.block.take_dirty()
            });
        let program = self.program(program_id)?;

        let mut views = Vec::new();
        for (index, uniform) in program.layout.samplers() {
            let UniformLocation::Sampler {
                texture_binding,
                sampler_binding,
            } = uniform.location
            else {
                continue;
            };
            let bound = program.sampler_units[index].and_then(|unit| self.units.get(&unit).copied());
            let view = match bound {
                Some(texture) if Some(texture) == destination => {
                    return Err(RenderError::FeedbackLoop(texture.0));
                }
                Some(texture) => self.texture(texture)?.view.clone(),
                None => self.placeholder.clone(),
            };
            views.push((texture_binding, sampler_binding, view));
        }
        let entries: Vec<wgpu::BindGroupEntry<'_>> = views
            .iter()
            .flat_map(|(texture_binding, sampler_binding, view)| {
                [
                    wgpu::BindGroupEntry {
                        binding: *texture_binding,
                        resource: wgpu::BindingResource::TextureView(view),
                    },
                    wgpu::BindGroupEntry {
                        binding: *sampler_binding,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ]
            })
            .collect();
        let sampler_bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("feedback sampler bind group"),
            layout: &program.sampler_layout,
            entries: &entries,
        });

        let vertex_buffers = program
            .layout
            .attributes
            .iter()
            .map(|attribute| {
                self.attributes
                    .get(&AttributeSlot(attribute.location))
                    .and_then(|buffer| self.buffers.get(buffer.0 as usize))
                    .cloned()
                    .ok_or(RenderError::Sequence("draw issued with an unbound vertex attribute"))
            })
            .collect::<Result<Vec<_>>>()?;

        let staging = upload.then(|| {
            self.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("uniform staging"),
                    contents: program.block.as_bytes(),
                    usage: wgpu::BufferUsages::COPY_SRC,
                })
        });
        let uniform_buffer = program.uniform_buffer.clone();
        let uniform_bind_group = program.uniform_bind_group.clone();
        let block_len = program.block.len();
        let load = match destination {
            Some(_) => wgpu::LoadOp::Load,
            None => wgpu::LoadOp::Clear(wgpu::Color::BLACK),
        };

        let encoder = self.encoder();
        if let Some(staging) = &staging {
            encoder.copy_buffer_to_buffer(staging, 0, &uniform_buffer, 0, block_len);
        }
        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("feedback pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        render_pass.set_pipeline(&pipeline);
        render_pass.set_bind_group(0, &uniform_bind_group, &[]);
        render_pass.set_bind_group(1, &sampler_bind_group, &[]);
        for (index, buffer) in vertex_buffers.iter().enumerate() {
            render_pass.set_vertex_buffer(index as u32, buffer.slice(..));
        }
        render_pass.draw(0..vertex_count, 0..1);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        match pollster::block_on(self.gpu.device.pop_error_scope()) {
            Some(error) => Err(RenderError::Device(error.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::FULLSCREEN_TRIANGLES;

    const VERTEX: &str = "attribute vec2 aPosition;\nvoid main() { gl_Position = vec4(aPosition, 0.0, 1.0); }\n";
    // Integer output that no float or unorm color target accepts.
    const INTEGER_OUTPUT: &str = "layout(location = 0) out ivec4 color;\nvoid main() { color = ivec4(1); }\n";

    fn context() -> Option<WgpuContext> {
        match WgpuContext::headless(4, 4) {
            Ok(ctx) => Some(ctx),
            Err(error) => {
                eprintln!("skipping: no wgpu adapter ({error})");
                None
            }
        }
    }

    #[test]
    fn pipeline_errors_are_reported_by_flush() {
        let Some(mut ctx) = context() else {
            return;
        };
        let program = ctx.create_program(VERTEX, INTEGER_OUTPUT).expect("program");
        let position = ctx.attribute_slot(program, "aPosition").expect("position slot");
        let buffer = ctx.create_vertex_buffer(&FULLSCREEN_TRIANGLES).expect("buffer");
        ctx.use_program(program).expect("use");
        ctx.bind_vertex_attribute(position, buffer);

        ctx.draw(FULLSCREEN_TRIANGLES.len() as u32).expect("draw is recorded");
        assert!(matches!(ctx.flush(), Err(RenderError::Device(_))));
    }
}

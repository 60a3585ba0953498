//! CPU reference implementation of [`GraphicsContext`].
//!
//! Programs still go through the full GLSL preparation, naga validation and
//! link check, but fragment execution is delegated to a Rust closure that was
//! registered for the exact fragment source text. The vertex stage is a
//! position pass-through of the first bound attribute.
//!
//! Draws rasterize triangle lists with edge functions and a top-left fill
//! rule, so a two-triangle quad covers every pixel exactly once. Each draw is
//! logged as a [`DrawRecord`] for inspection.
//!
//! Beyond what a GPU reports, the context refuses two hazards outright:
//! sampling the texture that is also the draw destination, and sampling a
//! texture whose writing draw has not been flushed yet.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::context::{
    AttributeSlot, BufferId, Capabilities, ColorFormat, DrawBinding, DrawTargetId,
    GraphicsContext, ProgramId, TextureId, UniformSlot, UniformValue,
};
use crate::error::{RenderError, Result, ShaderStage};
use crate::glsl::{self, ProgramLayout};

/// Fragment program body executed per covered pixel.
pub type FragmentKernel = Arc<dyn Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync>;

/// Inputs visible to a fragment kernel.
pub struct Fragment<'a> {
    coord: [f32; 2],
    layout: &'a ProgramLayout,
    values: &'a [Option<UniformValue>],
    samplers: &'a [(usize, &'a SoftwareTexture)],
}

impl Fragment<'_> {
    /// `gl_FragCoord.xy` of the pixel center, origin at the bottom-left.
    pub fn coord(&self) -> [f32; 2] {
        self.coord
    }

    /// Value of a float uniform; `0.0` when unset or not declared.
    pub fn uniform_f32(&self, name: &str) -> f32 {
        match self.value(name) {
            Some(UniformValue::Float(value)) => value,
            _ => 0.0,
        }
    }

    /// Value of a vec2 uniform; zero when unset or not declared.
    pub fn uniform_vec2(&self, name: &str) -> [f32; 2] {
        match self.value(name) {
            Some(UniformValue::Vec2(value)) => value,
            _ => [0.0; 2],
        }
    }

    /// Nearest-neighbour fetch through a sampler uniform, clamped to the edge.
    /// Unbound samplers read transparent black.
    pub fn sample(&self, sampler: &str, uv: [f32; 2]) -> [f32; 4] {
        let Some(index) = self.layout.uniform_index(sampler) else {
            return [0.0; 4];
        };
        self.samplers
            .iter()
            .find(|(uniform, _)| *uniform == index)
            .map(|(_, texture)| texture.fetch(uv))
            .unwrap_or([0.0; 4])
    }

    fn value(&self, name: &str) -> Option<UniformValue> {
        let index = self.layout.uniform_index(name)?;
        self.values.get(index).copied().flatten()
    }
}

/// Texel storage for textures and the visible surface.
#[derive(Clone)]
pub struct SoftwareTexture {
    width: u32,
    height: u32,
    format: ColorFormat,
    texels: Vec<[f32; 4]>,
}

impl SoftwareTexture {
    fn new(width: u32, height: u32, format: ColorFormat) -> Self {
        Self {
            width,
            height,
            format,
            texels: vec![[0.0; 4]; (width as usize) * (height as usize)],
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn texels(&self) -> &[[f32; 4]] {
        &self.texels
    }

    fn fetch(&self, uv: [f32; 2]) -> [f32; 4] {
        let x = texel_index(uv[0], self.width);
        let y = texel_index(uv[1], self.height);
        self.texels[(y * self.width + x) as usize]
    }

    fn quantize(&self, color: [f32; 4]) -> [f32; 4] {
        match self.format {
            ColorFormat::Float => color,
            ColorFormat::Unorm8 => color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0),
        }
    }
}

impl fmt::Debug for SoftwareTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareTexture")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

fn texel_index(coordinate: f32, extent: u32) -> u32 {
    let scaled = (coordinate * extent as f32).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as u32).min(extent.saturating_sub(1))
    }
}

/// One executed draw call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub program: ProgramId,
    pub destination: DrawBinding,
    pub sampled: Vec<TextureId>,
    /// Number of fragments the rasterizer produced.
    pub fragments: usize,
}

struct SoftwareProgram {
    layout: ProgramLayout,
    kernel: FragmentKernel,
    values: Vec<Option<UniformValue>>,
}

pub struct SoftwareContext {
    capabilities: Capabilities,
    kernels: HashMap<String, FragmentKernel>,
    programs: Vec<SoftwareProgram>,
    textures: Vec<Option<SoftwareTexture>>,
    draw_targets: Vec<bool>,
    buffers: Vec<Vec<[f32; 2]>>,
    surface: SoftwareTexture,
    current_program: Option<ProgramId>,
    binding: DrawBinding,
    units: BTreeMap<u32, TextureId>,
    attributes: BTreeMap<AttributeSlot, BufferId>,
    unflushed: HashSet<TextureId>,
    draws: Vec<DrawRecord>,
    flushes: usize,
}

impl SoftwareContext {
    /// Creates a context whose visible surface is `width`×`height` 8-bit pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, Capabilities::default())
    }

    pub fn with_capabilities(width: u32, height: u32, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            kernels: HashMap::new(),
            programs: Vec::new(),
            textures: Vec::new(),
            draw_targets: Vec::new(),
            buffers: Vec::new(),
            surface: SoftwareTexture::new(width.max(1), height.max(1), ColorFormat::Unorm8),
            current_program: None,
            binding: DrawBinding::Surface,
            units: BTreeMap::new(),
            attributes: BTreeMap::new(),
            unflushed: HashSet::new(),
            draws: Vec::new(),
            flushes: 0,
        }
    }

    /// Registers the closure that executes `fragment_source`.
    pub fn register_fragment<F>(&mut self, fragment_source: impl Into<String>, kernel: F) -> &mut Self
    where
        F: Fn(&Fragment<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        self.kernels.insert(fragment_source.into(), Arc::new(kernel));
        self
    }

    /// Resizes the visible surface, discarding its contents.
    pub fn set_surface_size(&mut self, width: u32, height: u32) {
        self.surface = SoftwareTexture::new(width.max(1), height.max(1), ColorFormat::Unorm8);
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    pub fn is_live(&self, texture: TextureId) -> bool {
        self.texture(texture).is_ok()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.iter().filter(|slot| slot.is_some()).count()
    }

    fn texture(&self, texture: TextureId) -> Result<&SoftwareTexture> {
        self.textures
            .get(texture.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| RenderError::StaleResource(texture.to_string()))
    }

    fn program(&self, program: ProgramId) -> Result<&SoftwareProgram> {
        self.programs
            .get(program.0 as usize)
            .ok_or_else(|| RenderError::StaleResource(program.to_string()))
    }

    fn position_buffer(&self, layout: &ProgramLayout) -> Result<&[[f32; 2]]> {
        let buffer = layout
            .attributes
            .iter()
            .filter_map(|attribute| self.attributes.get(&AttributeSlot(attribute.location)))
            .next()
            .ok_or(RenderError::Sequence(
                "draw issued without a bound position attribute",
            ))?;
        self.buffers
            .get(buffer.0 as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| RenderError::StaleResource(buffer.to_string()))
    }
}

impl GraphicsContext for SoftwareContext {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_program(&mut self, vertex_source: &str, fragment_source: &str) -> Result<ProgramId> {
        let prepared = glsl::compile_program(vertex_source, fragment_source)?;
        let kernel = self.kernels.get(fragment_source).cloned().ok_or_else(|| {
            RenderError::compile(
                ShaderStage::Fragment,
                "no software kernel is registered for this fragment source",
            )
        })?;
        let values = vec![None; prepared.layout.uniforms.len()];
        self.programs.push(SoftwareProgram {
            layout: prepared.layout,
            kernel,
            values,
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
        if let Some(slot) = self
            .programs
            .get_mut(program.0 as usize)
            .and_then(|program| program.values.get_mut(slot.0 as usize))
        {
            *slot = Some(value);
        }
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> Result<TextureId> {
        let supported = match format {
            ColorFormat::Float => self.capabilities.float_color,
            ColorFormat::Unorm8 => self.capabilities.unorm_color,
        };
        if !supported {
            return Err(RenderError::UnsupportedFormat);
        }
        self.textures
            .push(Some(SoftwareTexture::new(width.max(1), height.max(1), format)));
        Ok(TextureId((self.textures.len() - 1) as u32))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(slot) = self.textures.get_mut(texture.0 as usize) {
            *slot = None;
        }
        self.unflushed.remove(&texture);
    }

    fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.texture(texture).ok().map(SoftwareTexture::size)
    }

    fn texture_format(&self, texture: TextureId) -> Option<ColorFormat> {
        self.texture(texture).ok().map(|texture| texture.format)
    }

    fn upload_texture(&mut self, texture: TextureId, texels: &[[f32; 4]]) -> Result<()> {
        self.texture(texture)?;
        let Some(Some(target)) = self.textures.get_mut(texture.0 as usize) else {
            return Err(RenderError::StaleResource(texture.to_string()));
        };
        if texels.len() != target.texels.len() {
            return Err(RenderError::Device(format!(
                "upload of {} texels into {texture} holding {}",
                texels.len(),
                target.texels.len()
            )));
        }
        for (slot, texel) in target.texels.iter_mut().zip(texels) {
            *slot = *texel;
        }
        let quantized: Vec<[f32; 4]> = target.texels.iter().map(|t| target.quantize(*t)).collect();
        target.texels = quantized;
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureId) -> Result<Vec<[f32; 4]>> {
        Ok(self.texture(texture)?.texels.clone())
    }

    fn read_surface(&mut self) -> Result<Vec<[f32; 4]>> {
        Ok(self.surface.texels.clone())
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface.size()
    }

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
        self.buffers.push(positions.to_vec());
        Ok(BufferId((self.buffers.len() - 1) as u32))
    }

    fn bind_vertex_attribute(&mut self, slot: AttributeSlot, buffer: BufferId) {
        self.attributes.insert(slot, buffer);
    }

    fn draw(&mut self, vertex_count: u32) -> Result<()> {
        let program_id = self
            .current_program
            .ok_or(RenderError::Sequence("draw issued without an active program"))?;
        let program = self.program(program_id)?;

        let destination_texture = match self.binding {
            DrawBinding::Surface => None,
            DrawBinding::Offscreen { texture, .. } => Some(texture),
        };
        let (width, height) = match destination_texture {
            Some(texture) => self.texture(texture)?.size(),
            None => self.surface.size(),
        };

        let mut sampled = Vec::new();
        let mut samplers = Vec::new();
        for (index, _) in program.layout.samplers() {
            let Some(UniformValue::TextureUnit(unit)) = program.values[index] else {
                continue;
            };
            let Some(&texture) = self.units.get(&unit) else {
                continue;
            };
            if destination_texture == Some(texture) {
                return Err(RenderError::FeedbackLoop(texture.0));
            }
            if self.unflushed.contains(&texture) {
                return Err(RenderError::Sequence(
                    "texture sampled before the draw that wrote it was flushed",
                ));
            }
            samplers.push((index, self.texture(texture)?));
            sampled.push(texture);
        }

        let positions = self.position_buffer(&program.layout)?;
        let count = vertex_count as usize;
        if count > positions.len() {
            return Err(RenderError::Device(format!(
                "draw of {count} vertices from a buffer holding {}",
                positions.len()
            )));
        }

        let [clip_y_scale, frag_y_offset, frag_y_scale, _] =
            glsl::orientation(self.binding, height);
        let mut writes = Vec::new();
        rasterize(&positions[..count], width, height, clip_y_scale, |x, y| {
            let fragment = Fragment {
                coord: [x as f32 + 0.5, frag_y_offset + frag_y_scale * (y as f32 + 0.5)],
                layout: &program.layout,
                values: &program.values,
                samplers: &samplers,
            };
            writes.push(((y * width + x) as usize, (program.kernel)(&fragment)));
        });

        let fragments = writes.len();
        let target = match destination_texture {
            Some(texture) => self
                .textures
                .get_mut(texture.0 as usize)
                .and_then(Option::as_mut)
                .ok_or_else(|| RenderError::StaleResource(texture.to_string()))?,
            None => &mut self.surface,
        };
        for (index, color) in writes {
            target.texels[index] = target.quantize(color);
        }

        if let Some(texture) = destination_texture {
            self.unflushed.insert(texture);
        }
        self.draws.push(DrawRecord {
            program: program_id,
            destination: self.binding,
            sampled,
            fragments,
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.unflushed.clear();
        self.flushes += 1;
        Ok(())
    }
}

/// Calls `emit` once for every pixel center covered by the triangle list.
///
/// Clip-space `y` is multiplied by `clip_y_scale` and then maps to memory rows
/// top-down, so `-1.0` puts clip-space `+y` on the last row.
/// Pixel centers lying exactly on an edge belong to the triangle only when the
/// edge is a top or left edge, so triangles sharing an edge never both claim
/// a pixel.
fn rasterize(
    positions: &[[f32; 2]],
    width: u32,
    height: u32,
    clip_y_scale: f32,
    mut emit: impl FnMut(u32, u32),
) {
    let to_window = |p: [f32; 2]| {
        [
            (p[0] + 1.0) * 0.5 * width as f32,
            (1.0 - clip_y_scale * p[1]) * 0.5 * height as f32,
        ]
    };

    for triangle in positions.chunks_exact(3) {
        let mut a = to_window(triangle[0]);
        let b = to_window(triangle[1]);
        let mut c = to_window(triangle[2]);
        let area = edge(a, b, c);
        if area == 0.0 {
            continue;
        }
        if area < 0.0 {
            std::mem::swap(&mut a, &mut c);
        }

        let min_x = a[0].min(b[0]).min(c[0]).floor().max(0.0) as u32;
        let min_y = a[1].min(b[1]).min(c[1]).floor().max(0.0) as u32;
        let max_x = (a[0].max(b[0]).max(c[0]).ceil().max(0.0) as u32).min(width);
        let max_y = (a[1].max(b[1]).max(c[1]).ceil().max(0.0) as u32).min(height);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = [x as f32 + 0.5, y as f32 + 0.5];
                if covers(a, b, p) && covers(b, c, p) && covers(c, a, p) {
                    emit(x, y);
                }
            }
        }
    }
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn covers(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> bool {
    let weight = edge(a, b, p);
    if weight != 0.0 {
        return weight > 0.0;
    }
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let is_top = dy == 0.0 && dx > 0.0;
    let is_left = dy < 0.0;
    is_top || is_left
}

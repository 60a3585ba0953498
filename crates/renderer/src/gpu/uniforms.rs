use crate::context::UniformValue;
use crate::glsl::{ProgramLayout, UniformLocation, MIN_BLOCK_SIZE, ORIENTATION_OFFSET};

/// CPU mirror of a program's std140 uniform block.
///
/// Offsets come from the program layout; the bytes are uploaded through a
/// staging copy right before each draw so every pass sees its own values.
#[derive(Debug, Clone)]
pub(crate) struct UniformBlock {
    bytes: Vec<u8>,
    dirty: bool,
}

impl UniformBlock {
    pub fn new(layout: &ProgramLayout) -> Self {
        let size = layout.block_size.max(MIN_BLOCK_SIZE) as usize;
        Self {
            bytes: vec![0; size],
            dirty: true,
        }
    }

    /// Writes a value at the uniform's block offset. Sampler uniforms and
    /// values of the wrong shape are ignored here.
    pub fn write(&mut self, location: UniformLocation, value: UniformValue) {
        let UniformLocation::Block { offset } = location else {
            return;
        };
        let offset = offset as usize;
        match value {
            UniformValue::Float(value) => self.store(offset, bytemuck::bytes_of(&value)),
            UniformValue::Vec2(value) => self.store(offset, bytemuck::bytes_of(&value)),
            UniformValue::TextureUnit(_) => {}
        }
    }

    /// Stores the per-draw orientation from [`crate::glsl::orientation`].
    pub fn write_orientation(&mut self, orientation: [f32; 4]) {
        self.store(ORIENTATION_OFFSET as usize, bytemuck::bytes_of(&orientation));
    }

    fn store(&mut self, offset: usize, data: &[u8]) {
        if let Some(slot) = self.bytes.get_mut(offset..offset + data.len()) {
            if slot != data {
                slot.copy_from_slice(data);
                self.dirty = true;
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns whether the block changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

//! Conversion between RGBA f32 texels and the byte layouts wgpu copies.

use crate::context::ColorFormat;

pub(crate) fn texture_format(format: ColorFormat) -> wgpu::TextureFormat {
    match format {
        ColorFormat::Float => wgpu::TextureFormat::Rgba32Float,
        ColorFormat::Unorm8 => wgpu::TextureFormat::Rgba8Unorm,
    }
}

/// Byte layout of a readable texture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TexelLayout {
    Rgba32Float,
    Rgba8Unorm,
    Bgra8Unorm,
}

impl TexelLayout {
    pub fn of(format: wgpu::TextureFormat) -> Option<Self> {
        match format {
            wgpu::TextureFormat::Rgba32Float => Some(TexelLayout::Rgba32Float),
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => {
                Some(TexelLayout::Rgba8Unorm)
            }
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => {
                Some(TexelLayout::Bgra8Unorm)
            }
            _ => None,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TexelLayout::Rgba32Float => 16,
            TexelLayout::Rgba8Unorm | TexelLayout::Bgra8Unorm => 4,
        }
    }

    /// Row pitch satisfying `COPY_BYTES_PER_ROW_ALIGNMENT` for buffer copies.
    pub fn padded_row_bytes(self, width: u32) -> u32 {
        let unpadded = width * self.bytes_per_texel();
        unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
    }

    /// Tightly packed bytes for `queue.write_texture`.
    pub fn encode(self, texels: &[[f32; 4]]) -> Vec<u8> {
        match self {
            TexelLayout::Rgba32Float => bytemuck::cast_slice::<[f32; 4], u8>(texels).to_vec(),
            TexelLayout::Rgba8Unorm => texels.iter().flat_map(|texel| texel.map(to_unorm)).collect(),
            TexelLayout::Bgra8Unorm => texels
                .iter()
                .flat_map(|[r, g, b, a]| [b, g, r, a].map(|c| to_unorm(*c)))
                .collect(),
        }
    }

    /// Decodes `height` rows of `width` texels spaced `row_bytes` apart.
    pub fn decode(self, bytes: &[u8], width: u32, height: u32, row_bytes: u32) -> Vec<[f32; 4]> {
        let used = (width * self.bytes_per_texel()) as usize;
        let mut texels = Vec::with_capacity((width * height) as usize);
        for row in bytes.chunks(row_bytes as usize).take(height as usize) {
            let row = &row[..used.min(row.len())];
            match self {
                TexelLayout::Rgba32Float => texels.extend(
                    row.chunks_exact(16)
                        .map(bytemuck::pod_read_unaligned::<[f32; 4]>),
                ),
                TexelLayout::Rgba8Unorm => texels.extend(
                    row.chunks_exact(4)
                        .map(|c| [c[0], c[1], c[2], c[3]].map(from_unorm)),
                ),
                TexelLayout::Bgra8Unorm => texels.extend(
                    row.chunks_exact(4)
                        .map(|c| [c[2], c[1], c[0], c[3]].map(from_unorm)),
                ),
            }
        }
        texels
    }
}

fn to_unorm(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn from_unorm(value: u8) -> f32 {
    value as f32 / 255.0
}

use std::mem::offset_of;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

/// Per-vertex input: homogeneous position and texture coordinate
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct VertexData {
    pub position: Vec4,
    pub texcoord: Vec2,
    _padding: Vec2,
}

impl VertexData {
    pub const fn new(position: Vec4, texcoord: Vec2) -> Self {
        Self {
            position,
            texcoord,
            _padding: Vec2::ZERO,
        }
    }
}

pub struct VertexInputDescription {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl Default for VertexInputDescription {
    /// POSITION (float4) at location 0, TEXCOORD (float2) at location 1
    fn default() -> Self {
        Self {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: size_of::<VertexData>() as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: vec![
                vk::VertexInputAttributeDescription {
                    location: 0,
                    binding: 0,
                    format: vk::Format::R32G32B32A32_SFLOAT,
                    offset: offset_of!(VertexData, position) as u32,
                },
                vk::VertexInputAttributeDescription {
                    location: 1,
                    binding: 0,
                    format: vk::Format::R32G32_SFLOAT,
                    offset: offset_of!(VertexData, texcoord) as u32,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_layout_matches_vertex_data() {
        let description = VertexInputDescription::default();
        assert_eq!(description.bindings[0].stride, 32);
        assert_eq!(description.attributes[0].offset, 0);
        assert_eq!(description.attributes[1].offset, 16);
        assert_eq!(description.attributes[1].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_vertex_bytes() {
        let vertex = VertexData::new(Vec4::new(1.0, 2.0, 3.0, 1.0), Vec2::new(0.5, 1.0));
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&vertex));
        assert_eq!(&floats[..6], &[1.0, 2.0, 3.0, 1.0, 0.5, 1.0]);
    }
}

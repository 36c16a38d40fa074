use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Pixel-stage material constants
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct MaterialData {
    pub color: Vec4,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self { color: Vec4::ONE }
    }
}

/// Vertex-stage transform constants
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Pod, Zeroable)]
pub struct TransformData {
    pub wvp: Mat4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_layouts() {
        assert_eq!(size_of::<MaterialData>(), 16);
        assert_eq!(size_of::<TransformData>(), 64);
    }

    #[test]
    fn test_wvp_is_stored_column_major() {
        let data = TransformData {
            wvp: Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0)),
        };
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&data));
        assert_eq!(&floats[12..15], &[1.0, 2.0, 3.0]);
    }
}

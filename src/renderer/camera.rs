use glam::{Mat4, Vec3};
use crate::renderer::transform;

/// Orbit camera producing the view-projection matrix the renderer consumes once per frame
pub struct Camera {
    position: Vec3,
    forward: Vec3,
    up: Vec3,
    right: Vec3,
    world_up: Vec3,
    fov_y_deg: f32,
    near: f32,
    far: f32,
    pivot: Vec3,
}

impl Camera {
    const DEFAULT_FOV_Y_DEG: f32 = 45.0;

    pub fn new() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            right: Vec3::X,
            world_up: Vec3::Y,
            fov_y_deg: Self::DEFAULT_FOV_Y_DEG,
            near: 0.1,
            far: 100.0,
            pivot: Vec3::ZERO,
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.look_at(self.pivot);
    }

    pub fn look_at(&mut self, target: Vec3) {
        if target == self.position {
            return;
        }
        self.pivot = target;
        self.forward = (target - self.position).normalize();
        self.right = self.forward.cross(self.world_up).normalize();
        self.up = self.right.cross(self.forward).normalize();
    }

    /// `width`/`height` are the render target extent; a zero height yields an aspect of 1
    pub fn get_viewproj_mat(&self, width: u32, height: u32) -> Mat4 {
        self.get_proj_mat(width, height) * self.get_view_mat()
    }

    pub fn get_view_mat(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn get_proj_mat(&self, width: u32, height: u32) -> Mat4 {
        let aspect_ratio = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };
        transform::make_perspective_fov(
            self.fov_y_deg.to_radians(),
            aspect_ratio,
            self.near,
            self.far,
        )
    }

    pub fn get_position(&self) -> Vec3 {
        self.position
    }

    pub fn get_forward(&self) -> Vec3 {
        self.forward
    }

    pub fn get_up(&self) -> Vec3 {
        self.up
    }

    pub fn get_right(&self) -> Vec3 {
        self.right
    }

    pub fn get_near(&self) -> f32 {
        self.near
    }

    pub fn get_far(&self) -> f32 {
        self.far
    }

    pub fn get_pivot(&self) -> Vec3 {
        self.pivot
    }
}

pub fn calculate_pitch(forward: Vec3) -> f32 {
    let forward = forward.normalize();
    forward.y.clamp(-1.0, 1.0).asin()
}

pub fn calculate_yaw(forward: Vec3) -> f32 {
    let forward = forward.normalize();
    forward.z.atan2(forward.x)
}

pub fn calculate_direction(pitch: f32, yaw: f32) -> Vec3 {
    Vec3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pivot_projects_to_screen_center() {
        let camera = Camera::new();
        let clip = camera.get_viewproj_mat(1280, 720).project_point3(camera.get_pivot());
        assert!(clip.x.abs() < 1e-5);
        assert!(clip.y.abs() < 1e-5);
        assert!((0.0..=1.0).contains(&clip.z));
    }

    #[test]
    fn test_zero_height_does_not_produce_nan() {
        let camera = Camera::new();
        let m = camera.get_proj_mat(1280, 0);
        assert!(!m.is_nan());
    }

    #[test]
    fn test_direction_roundtrip() {
        let dir = calculate_direction(0.3, 1.2);
        assert!((calculate_pitch(dir) - 0.3).abs() < 1e-5);
        assert!((calculate_yaw(dir) - 1.2).abs() < 1e-5);
    }
}

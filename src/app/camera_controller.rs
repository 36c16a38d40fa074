use std::f32::consts::{PI, TAU};
use glam::{FloatExt, Vec2};
use crate::app::input_state::InputState;
use crate::renderer::camera::{calculate_direction, calculate_pitch, calculate_yaw, Camera};

/// Orbits the camera around its pivot: right-drag rotates, the wheel zooms.
/// Both follow their targets with exponential smoothing.
pub struct CameraController {
    camera: Camera,

    rotation_sensitivity: f32,
    rotation_smoothing_speed: f32,
    max_pitch: f32,
    desired_angles: Vec2,
    current_angles: Vec2,

    zoom_sensitivity: f32,
    zoom_smoothing_speed: f32,
    desired_distance: f32,
    current_distance: f32,
}

impl CameraController {
    pub fn new(camera: Camera) -> Self {
        let pivot_to_eye = camera.get_position() - camera.get_pivot();
        // (pitch, yaw)
        let angles = Vec2::new(calculate_pitch(pivot_to_eye), calculate_yaw(pivot_to_eye));
        let distance = pivot_to_eye.length();
        Self {
            camera,

            rotation_sensitivity: 2.0,
            rotation_smoothing_speed: 10.0,
            max_pitch: 80.0_f32.to_radians(),
            desired_angles: angles,
            current_angles: angles,

            zoom_sensitivity: 2.0,
            zoom_smoothing_speed: 4.0,
            desired_distance: distance,
            current_distance: distance,
        }
    }

    pub fn get_camera(&self) -> &Camera {
        &self.camera
    }

    /// `viewport` is the window size in pixels
    pub fn process_input(&mut self, input_state: &InputState, viewport: Vec2, delta_time: f32) {
        if input_state.mouse_right_down && viewport.x > 0.0 && viewport.y > 0.0 {
            // A full sweep across the window turns 360 degrees around and 180 degrees up
            let drag = input_state.mouse_curr_pos - input_state.mouse_prev_pos;
            let delta = Vec2::new(drag.y * PI / viewport.y, drag.x * TAU / viewport.x);
            self.rotate(delta * self.rotation_sensitivity);
        }
        self.zoom(input_state.mouse_wheel_delta_y * self.zoom_sensitivity);
        self.update(delta_time);
    }

    fn rotate(&mut self, delta: Vec2) {
        let pitch = (self.desired_angles.x + delta.x).clamp(-self.max_pitch, self.max_pitch);
        let yaw = self.desired_angles.y + delta.y;
        self.desired_angles = Vec2::new(pitch, yaw);
    }

    fn zoom(&mut self, delta: f32) {
        if delta == 0.0 {
            return;
        }
        // Proportional to distance so zooming feels the same near and far
        let delta = delta * self.current_distance * 0.1;
        self.desired_distance = (self.current_distance - delta)
            .clamp(self.camera.get_near() + 0.1, self.camera.get_far() - 0.1);
    }

    fn update(&mut self, delta_time: f32) {
        let rotation_t = 1.0 - (-self.rotation_smoothing_speed * delta_time).exp();
        let zoom_t = 1.0 - (-self.zoom_smoothing_speed * delta_time).exp();
        self.current_angles = self.current_angles.lerp(self.desired_angles, rotation_t);
        self.current_distance = self.current_distance.lerp(self.desired_distance, zoom_t);

        let pivot_to_eye = calculate_direction(self.current_angles.x, self.current_angles.y);
        let pivot = self.camera.get_pivot();
        self.camera.set_position(pivot + pivot_to_eye * self.current_distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distance(controller: &CameraController) -> f32 {
        let camera = controller.get_camera();
        (camera.get_position() - camera.get_pivot()).length()
    }

    #[test]
    fn test_idle_input_keeps_camera_in_place() {
        let mut controller = CameraController::new(Camera::new());
        let before = controller.get_camera().get_position();
        controller.process_input(&InputState::default(), Vec2::new(1280.0, 720.0), 0.016);
        let after = controller.get_camera().get_position();
        assert!(before.distance(after) < 1e-4);
    }

    #[test]
    fn test_zoom_is_clamped_to_clip_planes() {
        let mut controller = CameraController::new(Camera::new());
        let input = InputState {
            mouse_wheel_delta_y: 100.0,
            ..Default::default()
        };
        for _ in 0..100 {
            controller.process_input(&input, Vec2::new(1280.0, 720.0), 0.1);
        }
        let near = controller.get_camera().get_near();
        assert!(distance(&controller) >= near + 0.1 - 1e-4);
    }

    #[test]
    fn test_pitch_never_passes_the_pole() {
        let mut controller = CameraController::new(Camera::new());
        let input = InputState {
            mouse_right_down: true,
            mouse_prev_pos: Vec2::new(640.0, 0.0),
            mouse_curr_pos: Vec2::new(640.0, 720.0),
            ..Default::default()
        };
        for _ in 0..50 {
            controller.process_input(&input, Vec2::new(1280.0, 720.0), 0.1);
        }
        let camera = controller.get_camera();
        let pitch = calculate_pitch(camera.get_position() - camera.get_pivot());
        assert!(pitch.abs() <= 80.0_f32.to_radians() + 1e-4);
        assert!(camera.get_forward().is_finite());
    }
}

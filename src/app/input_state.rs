use glam::Vec2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

/// Mouse state accumulated from window events between two frames
#[derive(Debug, Default)]
pub struct InputState {
    pub mouse_curr_pos: Vec2,
    pub mouse_prev_pos: Vec2,
    pub mouse_wheel_delta_y: f32,
    pub mouse_right_down: bool,
}

impl InputState {
    pub fn process_window_events(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Right,
                ..
            } => {
                self.mouse_right_down = *state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.mouse_curr_pos = Vec2::new(position.x as f32, position.y as f32);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.mouse_wheel_delta_y += match delta {
                    MouseScrollDelta::LineDelta(_x, y) => y.signum(),
                    MouseScrollDelta::PixelDelta(pos) => pos.y.signum() as f32,
                };
            }
            WindowEvent::CursorLeft { .. } => {
                self.mouse_right_down = false;
            }
            _ => {}
        }
    }

    /// Reset the per-frame deltas for the next frame.
    pub fn reset_frame(&mut self) {
        self.mouse_wheel_delta_y = 0.0;
        self.mouse_prev_pos = self.mouse_curr_pos;
    }
}

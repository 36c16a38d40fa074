mod input_state;
mod camera_controller;
mod frame_stats;

use color_eyre::eyre::Report;
use glam::Vec2;
use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::app::camera_controller::CameraController;
use crate::app::frame_stats::FrameStatsOverlay;
use crate::app::input_state::InputState;
use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::Renderer;

const FRAME_STATS_INTERVAL: u32 = 240;

pub struct App {
    config: RenderConfig,
    // Dropped before the window it renders into
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    camera_controller: CameraController,

    // State
    input_state: InputState,
    prev_frame_time: Instant,
    delta_time_secs: f32,
    request_redraws: bool,
    close_requested: bool,
    error: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Self {
        let camera = Camera::new();
        let camera_controller = CameraController::new(camera);

        Self {
            config,
            renderer: None,
            window: None,
            camera_controller,

            input_state: InputState::default(),
            prev_frame_time: Instant::now(),
            delta_time_secs: 0.0,
            request_redraws: true,
            close_requested: false,
            error: None,
        }
    }

    /// The error that stopped the event loop, if any
    pub fn take_error(&mut self) -> Option<Report> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: impl Into<Report>) {
        let error = error.into();
        log::error!("{error}");
        self.error = Some(error);
        self.renderer = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> color_eyre::Result<()> {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title(self.config.title.clone())
                .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
            self.window = Some(Arc::new(event_loop.create_window(attributes)?));
        }

        if self.renderer.is_none() {
            if let Some(window) = self.window.as_ref() {
                let mut renderer = Renderer::new(window, &self.config)?;
                renderer.set_overlay(Box::new(FrameStatsOverlay::new(FRAME_STATS_INTERVAL)))?;
                self.renderer = Some(renderer);
            }
        }
        Ok(())
    }

    fn redraw(&mut self) -> color_eyre::Result<()> {
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return Ok(());
        };
        let size = window.inner_size();
        self.camera_controller.process_input(
            &self.input_state,
            Vec2::new(size.width as f32, size.height as f32),
            self.delta_time_secs,
        );
        self.input_state.reset_frame();

        let extent = renderer.extent();
        let view_proj = self
            .camera_controller
            .get_camera()
            .get_viewproj_mat(extent.width, extent.height);
        renderer.draw(&view_proj)?;
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time.duration_since(self.prev_frame_time).as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().is_none_or(|window| window.id() != window_id) {
            return;
        }

        self.input_state.process_window_events(&event);

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize(new_size.width, new_size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => match key.as_ref() {
                Key::Character("r") => {
                    self.request_redraws = !self.request_redraws;
                    log::info!("request_redraws: {}", self.request_redraws);
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.request_redraws {
            if let Some(window) = self.window.as_ref() {
                window.request_redraw();
            }
        }

        if self.close_requested {
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
    }
}

pub mod camera;
pub mod config;
pub mod core;
pub mod error;
pub mod frame;
pub mod overlay;
pub mod pipeline;
pub mod resources;
pub mod shader_data;
pub mod transform;

use ash::vk;
use glam::{Mat4, Vec2, Vec3, Vec4};
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::frame::gpu::GpuContext;
use crate::renderer::frame::{FrameBackend, FrameEngine, FrameState};
use crate::renderer::overlay::{Overlay, OverlayInitInfo};
use crate::renderer::pipeline::pipeline_state::{PipelineState, PipelineStateBuilder};
use crate::renderer::pipeline::root_signature::{MATERIAL_PARAMETER, TEXTURE_PARAMETER, TRANSFORM_PARAMETER};
use crate::renderer::pipeline::shader::{ShaderCompiler, ShaderModule};
use crate::renderer::pipeline::vertex::VertexData;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::descriptor::{DescriptorHandle, SlotAllocator, SlotRange};
use crate::renderer::resources::state::ResourceState;
use crate::renderer::resources::texture::{self, Texture};
use crate::renderer::resources::upload;
use crate::renderer::shader_data::{MaterialData, TransformData};

const TRIANGLE_VERTICES: [VertexData; 3] = [
    VertexData::new(Vec4::new(-0.5, -0.5, 0.0, 1.0), Vec2::new(0.0, 1.0)),
    VertexData::new(Vec4::new(0.0, 0.5, 0.0, 1.0), Vec2::new(0.5, 0.0)),
    VertexData::new(Vec4::new(0.5, -0.5, 0.0, 1.0), Vec2::new(1.0, 1.0)),
];

// Screen space, y down
const SPRITE_VERTICES: [VertexData; 6] = [
    VertexData::new(Vec4::new(0.0, 360.0, 0.0, 1.0), Vec2::new(0.0, 1.0)),
    VertexData::new(Vec4::new(0.0, 0.0, 0.0, 1.0), Vec2::new(0.0, 0.0)),
    VertexData::new(Vec4::new(640.0, 360.0, 0.0, 1.0), Vec2::new(1.0, 1.0)),
    VertexData::new(Vec4::new(0.0, 0.0, 0.0, 1.0), Vec2::new(0.0, 0.0)),
    VertexData::new(Vec4::new(640.0, 0.0, 0.0, 1.0), Vec2::new(1.0, 0.0)),
    VertexData::new(Vec4::new(640.0, 360.0, 0.0, 1.0), Vec2::new(1.0, 1.0)),
];

const TRIANGLE_SPIN_PER_FRAME: f32 = 0.02;

/// Scale, rotation (radians, XYZ) and translation of one drawable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: Vec3,
    pub rotate: Vec3,
    pub translate: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            rotate: Vec3::ZERO,
            translate: Vec3::ZERO,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        transform::make_affine_matrix(self.scale, self.rotate, self.translate)
    }
}

/// World-view-projection of the screen-space sprite for a render target of `width` x `height`
pub fn sprite_wvp(sprite: &Transform, width: u32, height: u32) -> Mat4 {
    let projection = transform::make_orthographic(0.0, 0.0, width as f32, height as f32, 0.0, 100.0);
    projection * sprite.matrix()
}

/// Shader-visible heap slots the renderer hands out at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSlots {
    pub overlay: SlotRange,
    pub texture: SlotRange,
}

/// The overlay claims its slot first so it always sits at the start of the heap
pub fn reserve_heap_slots(slots: &mut SlotAllocator) -> EngineResult<HeapSlots> {
    let overlay = slots.allocate(1)?;
    let texture = slots.allocate(1)?;
    Ok(HeapSlots { overlay, texture })
}

pub struct Renderer {
    pipeline: PipelineState,
    material: Buffer,
    triangle_wvp: Buffer,
    sprite_wvp: Buffer,
    triangle_vertices: Buffer,
    sprite_vertices: Buffer,
    texture: Texture,
    texture_slot: SlotRange,
    overlay_slot: SlotRange,
    overlay: Option<Box<dyn Overlay>>,

    pub material_color: Vec4,
    pub triangle: Transform,
    pub sprite: Transform,

    window_extent: vk::Extent2D,
    resize_requested: bool,

    engine: FrameEngine<GpuContext>,
}

impl Renderer {
    pub fn new(window: &Window, config: &RenderConfig) -> EngineResult<Self> {
        let size = window.inner_size();
        let gpu = GpuContext::initialize(window, size.width, size.height, config)?;
        let mut engine = FrameEngine::new(gpu);

        let pipeline = Self::create_pipeline(engine.backend(), config)?;

        let factory = engine.backend().factory();
        let mut material = factory.create_buffer(size_of::<MaterialData>() as u64)?;
        material.write(&[MaterialData::default()])?;
        let triangle_wvp = factory.create_buffer(size_of::<TransformData>() as u64)?;
        let sprite_wvp = factory.create_buffer(size_of::<TransformData>() as u64)?;
        let mut triangle_vertices = factory.create_buffer(size_of_val(&TRIANGLE_VERTICES) as u64)?;
        triangle_vertices.write(&TRIANGLE_VERTICES)?;
        let mut sprite_vertices = factory.create_buffer(size_of_val(&SPRITE_VERTICES) as u64)?;
        sprite_vertices.write(&SPRITE_VERTICES)?;

        // Recorded into the open command list; it executes with the first frame
        let loaded = texture::load_texture(&config.texture)?;
        let mut texture = factory.create_texture(&loaded.metadata)?;
        let staging = {
            let mut recorder = engine.backend().recorder()?;
            upload::upload_texture_data(&mut texture, &loaded.mips, &mut recorder, factory)?
        };
        engine.defer_release(staging);

        let heap = engine.backend_mut().srv_heap_mut();
        let HeapSlots { overlay: overlay_slot, texture: texture_slot } = reserve_heap_slots(heap.slots_mut())?;
        let texture_handle = heap
            .cpu_handle(texture_slot.start)
            .ok_or(EngineError::DescriptorHeapFull { requested: 1, available: 0 })?;
        heap.write_texture_view(texture_handle, texture.view)?;
        log::info!(
            "Texture slot {}, overlay slot {}",
            texture_slot.start,
            overlay_slot.start,
        );

        Ok(Self {
            pipeline,
            material,
            triangle_wvp,
            sprite_wvp,
            triangle_vertices,
            sprite_vertices,
            texture,
            texture_slot,
            overlay_slot,
            overlay: None,

            material_color: Vec4::ONE,
            triangle: Transform::default(),
            sprite: Transform::default(),

            window_extent: vk::Extent2D { width: size.width, height: size.height },
            resize_requested: false,

            engine,
        })
    }

    fn create_pipeline(gpu: &GpuContext, config: &RenderConfig) -> EngineResult<PipelineState> {
        let mut compiler = ShaderCompiler::new();
        let device = gpu.device().logical.clone();
        let vertex_blob = compiler.compile_shader(&config.vertex_shader.path, &config.vertex_shader.profile)?;
        let pixel_blob = compiler.compile_shader(&config.pixel_shader.path, &config.pixel_shader.profile)?;
        let vertex_shader = ShaderModule::new(&vertex_blob, device.clone())?;
        let pixel_shader = ShaderModule::new(&pixel_blob, device.clone())?;

        PipelineStateBuilder::new(device)
            .with_shaders(&vertex_shader, &pixel_shader)
            .with_root_signature(gpu.root_signature())
            .with_color_attachment_format(gpu.back_buffer_format())
            .with_blending_disabled()
            .with_depth_test(true, Some(vk::CompareOp::LESS_OR_EQUAL))
            .build()
    }

    /// Hands the overlay its reserved heap slot; it is drawn every frame from then on
    pub fn set_overlay(&mut self, mut overlay: Box<dyn Overlay>) -> EngineResult<()> {
        let gpu = self.engine.backend();
        let heap = gpu.srv_heap();
        let missing = || EngineError::DescriptorHeapFull { requested: 1, available: 0 };
        let info = OverlayInitInfo {
            device: gpu.device(),
            back_buffer_count: gpu.back_buffer_count(),
            back_buffer_format: gpu.back_buffer_format(),
            srv_heap: heap,
            font_srv_cpu_handle: heap.cpu_handle(self.overlay_slot.start).ok_or_else(missing)?,
            font_srv_gpu_handle: heap.gpu_handle(self.overlay_slot.start).ok_or_else(missing)?,
        };
        overlay.init(&info)?;
        self.overlay = Some(overlay);
        Ok(())
    }

    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
        self.resize_requested = true;
    }

    /// Size of the back buffers
    pub fn extent(&self) -> vk::Extent2D {
        self.engine.backend().extent()
    }

    pub fn draw(&mut self, camera_view_proj: &Mat4) -> EngineResult<()> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(());
        }
        if self.resize_requested || self.engine.backend().swapchain_stale() {
            self.engine
                .backend_mut()
                .resize(self.window_extent.width, self.window_extent.height)?;
            self.resize_requested = false;
        }

        let scene = Scene {
            pipeline: &self.pipeline,
            material: &mut self.material,
            triangle_wvp: &mut self.triangle_wvp,
            sprite_wvp: &mut self.sprite_wvp,
            triangle_vertices: &self.triangle_vertices,
            sprite_vertices: &self.sprite_vertices,
            texture: &self.texture,
            texture_slot: self.texture_slot,
        };
        self.triangle.rotate.y += TRIANGLE_SPIN_PER_FRAME;
        let material = MaterialData { color: self.material_color };
        let triangle_world = self.triangle.matrix();
        let sprite = self.sprite;

        let frame = self.engine.run_frame(self.overlay.as_deref_mut(), |engine| {
            let extent = engine.backend().extent();
            scene.material.write(&[material])?;
            scene.triangle_wvp.write(&[TransformData {
                wvp: *camera_view_proj * triangle_world,
            }])?;
            scene.sprite_wvp.write(&[TransformData {
                wvp: sprite_wvp(&sprite, extent.width, extent.height),
            }])?;
            scene.record_draws(engine, extent)
        });
        match frame {
            Ok(_) => Ok(()),
            Err(EngineError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
                if self.engine.state() == FrameState::Idle =>
            {
                // Nothing was recorded; rebuild and try again next frame
                self.resize_requested = true;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// What one frame's draws read and write, borrowed apart from the engine
struct Scene<'a> {
    pipeline: &'a PipelineState,
    material: &'a mut Buffer,
    triangle_wvp: &'a mut Buffer,
    sprite_wvp: &'a mut Buffer,
    triangle_vertices: &'a Buffer,
    sprite_vertices: &'a Buffer,
    texture: &'a Texture,
    texture_slot: SlotRange,
}

impl Scene<'_> {
    fn record_draws(&self, engine: &FrameEngine<GpuContext>, extent: vk::Extent2D) -> EngineResult<()> {
        if self.texture.state != ResourceState::GenericRead {
            return Err(EngineError::InvalidFrameState(format!(
                "texture sampled while in {:?}",
                self.texture.state,
            )));
        }
        let recorder = engine.record()?;
        let gpu = engine.backend();
        let root_signature = gpu.root_signature();
        let texture_handle: DescriptorHandle = gpu
            .srv_heap()
            .gpu_handle(self.texture_slot.start)
            .ok_or(EngineError::DescriptorHeapFull { requested: 1, available: 0 })?;

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            recorder.device.cmd_set_viewport(recorder.cmd, 0, &[viewport]);
            recorder.device.cmd_set_scissor(recorder.cmd, 0, &[scissor]);
        }

        self.pipeline.bind(&recorder);
        root_signature.set_constant_buffer_view(&recorder, MATERIAL_PARAMETER, &self.material)?;
        root_signature.set_descriptor_table(&recorder, TEXTURE_PARAMETER, texture_handle)?;

        for (wvp, vertices, count) in [
            (&*self.triangle_wvp, self.triangle_vertices, TRIANGLE_VERTICES.len()),
            (&*self.sprite_wvp, self.sprite_vertices, SPRITE_VERTICES.len()),
        ] {
            root_signature.set_constant_buffer_view(&recorder, TRANSFORM_PARAMETER, wvp)?;
            unsafe {
                recorder.device.cmd_bind_vertex_buffers(recorder.cmd, 0, &[vertices.handle], &[0]);
                recorder.device.cmd_draw(recorder.cmd, count as u32, 1, 0, 0);
            }
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Buffers and the texture are released before the engine
        if let Err(e) = self.engine.backend().device().wait_idle() {
            log::error!("Failed to wait for the device before teardown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprite_corners_map_to_screen_corners() {
        let wvp = sprite_wvp(&Transform::default(), 1280, 720);
        let top_left = transform::transform_point(Vec3::new(0.0, 0.0, 0.0), &wvp);
        let bottom_right = transform::transform_point(Vec3::new(1280.0, 720.0, 0.0), &wvp);
        assert!((top_left.x + 1.0).abs() < 1e-5 && (top_left.y - 1.0).abs() < 1e-5);
        assert!((bottom_right.x - 1.0).abs() < 1e-5 && (bottom_right.y + 1.0).abs() < 1e-5);
        assert!((0.0..=1.0).contains(&top_left.z));
    }

    #[test]
    fn test_default_transform_is_identity() {
        assert_eq!(Transform::default().matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_triangle_winds_clockwise_on_screen() {
        // Shoelace sum in a y-up plane: negative means clockwise
        let [a, b, c] = TRIANGLE_VERTICES.map(|v| v.position);
        let area = (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
        assert!(area < 0.0);
    }

    #[test]
    fn test_overlay_owns_first_heap_slot() {
        let mut slots = SlotAllocator::new(128);
        let reserved = reserve_heap_slots(&mut slots).unwrap();
        assert_eq!(reserved.overlay, SlotRange { start: 0, count: 1 });
        assert_eq!(reserved.texture, SlotRange { start: 1, count: 1 });
        assert_eq!(slots.available(), 126);
    }

    #[test]
    fn test_heap_too_small_for_texture_is_an_error() {
        let mut slots = SlotAllocator::new(1);
        assert!(matches!(
            reserve_heap_slots(&mut slots),
            Err(EngineError::DescriptorHeapFull { requested: 1, available: 0 })
        ));
    }
}

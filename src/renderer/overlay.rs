use ash::vk;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::error::EngineResult;
use crate::renderer::frame::FrameBackend;
use crate::renderer::frame::gpu::GpuContext;
use crate::renderer::resources::descriptor::{DescriptorHandle, DescriptorHeap};

/// What an overlay needs to share the engine's device and heap
pub struct OverlayInitInfo<'a> {
    pub device: &'a RenderDevice,
    pub back_buffer_count: u32,
    pub back_buffer_format: vk::Format,
    pub srv_heap: &'a DescriptorHeap,
    /// Slot reserved for the overlay's font atlas
    pub font_srv_cpu_handle: DescriptorHandle,
    pub font_srv_gpu_handle: DescriptorHandle,
}

/// An immediate-mode UI drawn into the frame's command list.
///
/// `FrameEngine::run_frame` calls `begin` right after `begin_frame`, then
/// `end` and `draw` once the scene is recorded, before `end_frame`. For the
/// Vulkan backend `draw` receives a `CommandRecorder`.
pub trait Overlay<B: FrameBackend = GpuContext> {
    fn init(&mut self, info: &OverlayInitInfo) -> EngineResult<()>;
    fn begin(&mut self);
    fn end(&mut self);
    fn draw(&mut self, cmd: &B::Recorder<'_>);
}

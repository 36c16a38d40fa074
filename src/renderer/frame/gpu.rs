use ash::vk;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::commands::{CommandContext, CommandRecorder};
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::swapchain::Swapchain;
use crate::renderer::core::sync::Fence;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::frame::FrameBackend;
use crate::renderer::pipeline::root_signature::RootSignature;
use crate::renderer::resources::descriptor::{DescriptorHandle, DescriptorHeap, DescriptorHeapKind};
use crate::renderer::resources::state::ResourceState;
use crate::renderer::resources::texture::Texture;
use crate::renderer::resources::ResourceFactory;

/// Everything the frame protocol runs on, owned in one place.
///
/// Fields are dropped top to bottom, which is the reverse of the order
/// `initialize` creates them in.
pub struct GpuContext {
    root_signature: RootSignature,
    fence: Fence,
    srv_heap: DescriptorHeap,
    dsv_heap: DescriptorHeap,
    depth: Texture,
    rtv_heap: DescriptorHeap,
    back_buffer_states: Vec<ResourceState>,
    swapchain: Swapchain,
    commands: CommandContext,
    factory: ResourceFactory,
    device: RenderDevice,
    instance: RenderInstance,

    clear_color: [f32; 4],
    clear_depth: f32,
    vsync: bool,
    swapchain_stale: bool,
}

impl GpuContext {
    pub fn initialize(
        window: &Window,
        width: u32,
        height: u32,
        config: &RenderConfig,
    ) -> EngineResult<Self> {
        // (a) Validation is set up together with the instance
        let instance = RenderInstance::new(window, config.validation)?;
        log::info!("Complete create instance");

        // (b)(c) Adapter selection and feature level
        let device = RenderDevice::new(&instance)?;

        // (d) Queue, command allocator and command list
        let commands = CommandContext::new(device.queue.family_index, device.logical.clone())?;
        log::info!("Complete create command list");

        // (e) Swap chain
        let swapchain = Swapchain::new(&instance, &device, width, height, config.vsync, None)?;
        log::info!("Complete create swap chain");

        // (f) One render target view per back buffer
        let factory = ResourceFactory::new(&device);
        let mut rtv_heap = factory.create_descriptor_heap(
            DescriptorHeapKind::Rtv,
            swapchain.image_count(),
            false,
        )?;
        Self::create_render_target_views(&mut rtv_heap, &swapchain)?;
        log::info!("Complete create render target views");

        // (g) Depth buffer and its view
        let depth = factory.create_depth_texture(swapchain.extent.width, swapchain.extent.height)?;
        let mut dsv_heap = factory.create_descriptor_heap(DescriptorHeapKind::Dsv, 1, false)?;
        Self::create_depth_view(&mut dsv_heap, &depth)?;
        log::info!("Complete create depth stencil view");

        // (h) Shader-visible heap
        let srv_heap = factory.create_descriptor_heap(
            DescriptorHeapKind::CbvSrvUav,
            config.srv_heap_capacity,
            true,
        )?;
        log::info!("Complete create shader resource heap ({} slots)", srv_heap.capacity());

        // (i) Fence
        let fence = Fence::new(0, device.logical.clone())?;
        log::info!("Complete create fence");

        let root_signature = RootSignature::create(&device, &srv_heap)?;

        Ok(Self {
            root_signature,
            fence,
            srv_heap,
            dsv_heap,
            depth,
            rtv_heap,
            back_buffer_states: vec![ResourceState::Undefined; swapchain.images.len()],
            swapchain,
            commands,
            factory,
            device,
            instance,

            clear_color: config.clear_color,
            clear_depth: config.clear_depth,
            vsync: config.vsync,
            swapchain_stale: false,
        })
    }

    pub fn device(&self) -> &RenderDevice {
        &self.device
    }

    pub fn factory(&self) -> &ResourceFactory {
        &self.factory
    }

    pub fn root_signature(&self) -> &RootSignature {
        &self.root_signature
    }

    pub fn srv_heap(&self) -> &DescriptorHeap {
        &self.srv_heap
    }

    pub fn srv_heap_mut(&mut self) -> &mut DescriptorHeap {
        &mut self.srv_heap
    }

    pub fn back_buffer_format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn back_buffer_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Whether presentation reported that the swap chain no longer matches the surface
    pub fn swapchain_stale(&self) -> bool {
        self.swapchain_stale
    }

    /// Rebuilds the swap chain and the size-dependent targets.
    ///
    /// Only valid between frames.
    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        self.device.wait_idle()?;

        let swapchain = Swapchain::new(
            &self.instance,
            &self.device,
            width,
            height,
            self.vsync,
            Some(&self.swapchain),
        )?;
        // Views of the old images go before the images themselves
        self.rtv_heap = self.factory.create_descriptor_heap(
            DescriptorHeapKind::Rtv,
            swapchain.image_count(),
            false,
        )?;
        self.swapchain = swapchain;
        self.swapchain_stale = false;
        self.back_buffer_states = vec![ResourceState::Undefined; self.swapchain.images.len()];
        Self::create_render_target_views(&mut self.rtv_heap, &self.swapchain)?;

        let depth = self
            .factory
            .create_depth_texture(self.swapchain.extent.width, self.swapchain.extent.height)?;
        Self::create_depth_view(&mut self.dsv_heap, &depth)?;
        self.depth = depth;

        log::debug!("Resized to {}x{}", self.swapchain.extent.width, self.swapchain.extent.height);
        Ok(())
    }

    fn create_render_target_views(rtv_heap: &mut DescriptorHeap, swapchain: &Swapchain) -> EngineResult<()> {
        for (i, image) in swapchain.images.iter().enumerate() {
            let handle = Self::heap_handle(rtv_heap, i as u32)?;
            rtv_heap.create_image_view(handle, *image, swapchain.format, vk::ImageAspectFlags::COLOR)?;
        }
        Ok(())
    }

    fn create_depth_view(dsv_heap: &mut DescriptorHeap, depth: &Texture) -> EngineResult<()> {
        let handle = Self::heap_handle(dsv_heap, 0)?;
        dsv_heap.create_image_view(handle, depth.image, depth.metadata.format, depth.aspect)?;
        Ok(())
    }

    fn heap_handle(heap: &DescriptorHeap, index: u32) -> EngineResult<DescriptorHandle> {
        heap.cpu_handle(index).ok_or(EngineError::DescriptorHeapFull {
            requested: index + 1,
            available: heap.capacity(),
        })
    }

    fn view(heap: &DescriptorHeap, index: u32) -> EngineResult<vk::ImageView> {
        Self::heap_handle(heap, index)
            .and_then(|handle| {
                heap.image_view(handle)
                    .ok_or_else(|| EngineError::Init(format!("no {:?} view at slot {index}", heap.kind)))
            })
    }
}

impl FrameBackend for GpuContext {
    type Recorder<'a> = CommandRecorder<'a>;

    fn acquire_back_buffer(&mut self) -> EngineResult<u32> {
        Ok(self.swapchain.acquire_next_image()?)
    }

    fn transition_back_buffer(
        &mut self,
        index: u32,
        before: ResourceState,
        after: ResourceState,
    ) -> EngineResult<()> {
        let image = self
            .swapchain
            .images
            .get(index as usize)
            .copied()
            .ok_or_else(|| EngineError::InvalidFrameState(format!("no back buffer {index}")))?;
        // A back buffer that has never been presented has no contents to keep
        let before = match self.back_buffer_states[index as usize] {
            ResourceState::Undefined => ResourceState::Undefined,
            _ => before,
        };
        self.commands
            .recorder()?
            .transition_image(image, vk::ImageAspectFlags::COLOR, 1, before, after);
        self.back_buffer_states[index as usize] = after;
        Ok(())
    }

    fn begin_rendering(&mut self, index: u32) -> EngineResult<()> {
        let color_view = Self::view(&self.rtv_heap, index)?;
        let depth_view = Self::view(&self.dsv_heap, 0)?;
        let recorder = self.commands.recorder()?;

        if self.depth.state != ResourceState::DepthWrite {
            recorder.transition_image(
                self.depth.image,
                self.depth.aspect,
                1,
                self.depth.state,
                ResourceState::DepthWrite,
            );
            self.depth.state = ResourceState::DepthWrite;
        }

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(ResourceState::RenderTarget.layout())
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear_color },
            })];
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth_view)
            .image_layout(ResourceState::DepthWrite.layout())
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: self.clear_depth, stencil: 0 },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.swapchain.extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);
        unsafe {
            recorder.device.cmd_begin_rendering(recorder.cmd, &rendering_info);
        }

        self.root_signature.bind_heap(&recorder);
        Ok(())
    }

    fn end_rendering(&mut self) -> EngineResult<()> {
        let recorder = self.commands.recorder()?;
        unsafe {
            recorder.device.cmd_end_rendering(recorder.cmd);
        }
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        self.commands.close()
    }

    fn execute(&mut self, index: u32) -> EngineResult<()> {
        let waits = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.swapchain.image_available())
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.swapchain.render_finished(index))
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        self.commands.execute(self.device.queue.handle, &waits, &signals)
    }

    fn present(&mut self, index: u32) -> EngineResult<()> {
        match self.swapchain.present(self.device.queue.handle, index) {
            // The frame is still signalled and waited on; the swap chain is rebuilt before the next one
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain out of date at present");
                self.swapchain_stale = true;
                Ok(())
            }
            result => Ok(result?),
        }
    }

    fn signal(&mut self, value: u64) -> EngineResult<()> {
        self.fence.signal(self.device.queue.handle, value)
    }

    fn completed_value(&self) -> EngineResult<u64> {
        self.fence.completed_value()
    }

    fn wait(&mut self, value: u64) -> EngineResult<()> {
        self.fence.wait(value)
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.commands.reset()
    }

    fn recorder(&self) -> EngineResult<CommandRecorder<'_>> {
        self.commands.recorder()
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // Nothing below may be destroyed while the queue still uses it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to wait for the device before teardown: {e}");
        }
    }
}

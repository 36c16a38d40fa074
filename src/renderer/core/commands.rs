use std::sync::Arc;
use ash::vk;
use crate::renderer::core::release_on_error;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::resources::state::{image_barrier, ResourceState};

/// One command pool (the allocator) and one primary command buffer (the list).
///
/// Like a freshly created command list, the buffer starts out recording.
pub struct CommandContext {
    pub pool: vk::CommandPool,
    pub buffer: vk::CommandBuffer,
    recording: bool,
    device: Arc<ash::Device>,
}

impl CommandContext {
    pub fn new(queue_family_index: u32, device: Arc<ash::Device>) -> EngineResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let buffers = unsafe { device.allocate_command_buffers(&buffer_info) }
            .map_err(EngineError::from)
            .and_then(|buffers| {
                buffers
                    .first()
                    .copied()
                    .ok_or_else(|| EngineError::Init("no command buffer allocated".into()))
            });
        let buffer = release_on_error(buffers, pool, |pool| unsafe {
            device.destroy_command_pool(pool, None)
        })?;

        let mut ctx = Self {
            pool,
            buffer,
            recording: false,
            device,
        };
        ctx.begin()?;
        Ok(ctx)
    }

    pub fn recorder(&self) -> EngineResult<CommandRecorder<'_>> {
        if !self.recording {
            return Err(EngineError::InvalidFrameState("command list is closed".into()));
        }
        Ok(CommandRecorder {
            cmd: self.buffer,
            device: &self.device,
        })
    }

    pub fn close(&mut self) -> EngineResult<()> {
        if !self.recording {
            return Err(EngineError::InvalidFrameState("command list is already closed".into()));
        }
        unsafe { self.device.end_command_buffer(self.buffer)? };
        self.recording = false;
        Ok(())
    }

    /// Resets the allocator, then reopens the list.
    ///
    /// The GPU must have finished every submission recorded from this pool.
    pub fn reset(&mut self) -> EngineResult<()> {
        unsafe {
            self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        self.recording = false;
        self.begin()
    }

    pub fn execute(
        &self,
        queue: vk::Queue,
        wait_semaphores: &[vk::SemaphoreSubmitInfo<'_>],
        signal_semaphores: &[vk::SemaphoreSubmitInfo<'_>],
    ) -> EngineResult<()> {
        if self.recording {
            return Err(EngineError::InvalidFrameState("command list must be closed before execution".into()));
        }
        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.buffer)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(wait_semaphores)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(signal_semaphores);
        unsafe {
            self.device.queue_submit2(queue, &[submit], vk::Fence::null())?;
        }
        Ok(())
    }

    fn begin(&mut self) -> EngineResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.buffer, &begin_info)? };
        self.recording = true;
        Ok(())
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        unsafe {
            // Frees the command buffer along with the pool
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Borrowed handle for recording into the open command list
#[derive(Clone, Copy)]
pub struct CommandRecorder<'a> {
    pub cmd: vk::CommandBuffer,
    pub device: &'a ash::Device,
}

impl CommandRecorder<'_> {
    pub fn transition_image(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
        before: ResourceState,
        after: ResourceState,
    ) {
        if before == after {
            return;
        }
        let barriers = [image_barrier(image, aspect, mip_levels, before, after)];
        let dep_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.cmd, &dep_info);
        }
    }
}

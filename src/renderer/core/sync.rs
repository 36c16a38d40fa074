use std::sync::Arc;
use ash::vk;
use crate::renderer::error::EngineResult;

/// Monotonic 64-bit counter shared by the CPU and the GPU, backed by a timeline semaphore.
///
/// The CPU decides the next target value and asks the queue to signal it; the
/// GPU writes the completed value once everything submitted before the signal
/// has finished. Waiting blocks the calling thread with no timeout.
pub struct Fence {
    pub semaphore: vk::Semaphore,
    device: Arc<ash::Device>,
}

impl Fence {
    pub fn new(initial_value: u64, device: Arc<ash::Device>) -> EngineResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { device.create_semaphore(&info, None)? };

        Ok(Self { semaphore, device })
    }

    /// Queues a signal of `value` behind all previously submitted work
    pub fn signal(&self, queue: vk::Queue, value: u64) -> EngineResult<()> {
        let signal_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default().signal_semaphore_infos(&signal_infos);
        unsafe {
            self.device.queue_submit2(queue, &[submit], vk::Fence::null())?;
        }
        Ok(())
    }

    pub fn completed_value(&self) -> EngineResult<u64> {
        Ok(unsafe { self.device.get_semaphore_counter_value(self.semaphore)? })
    }

    pub fn wait(&self, value: u64) -> EngineResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.device.wait_semaphores(&wait_info, u64::MAX)?;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Binary semaphore for acquire/present ordering on the GPU timeline
pub struct Semaphore {
    pub handle: vk::Semaphore,
    device: Arc<ash::Device>,
}

impl Semaphore {
    pub fn new(device: Arc<ash::Device>) -> EngineResult<Self> {
        let handle = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { handle, device })
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.handle, None);
        }
    }
}

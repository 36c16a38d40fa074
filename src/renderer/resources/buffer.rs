use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::resources::state::ResourceState;

/// Constant buffer views address memory in 256-byte units
pub const BUFFER_ALIGNMENT: u64 = 256;

/// Rounds `value` up to the next multiple of `alignment` (a power of two)
pub const fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

pub struct Buffer {
    pub handle: vk::Buffer,
    /// Allocated size, already rounded to `BUFFER_ALIGNMENT`
    pub size: u64,
    pub state: ResourceState,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        location: MemoryLocation,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> EngineResult<Self> {
        let size = align_to(size.max(1), BUFFER_ALIGNMENT);
        let handle = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe { device.create_buffer(&buffer_info, None)? }
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };
        let allocation = memory_allocator
            .lock()
            .map_err(|_| EngineError::LockPoisoned("memory allocator"))
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(EngineError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(e);
            }
        };

        unsafe {
            device.bind_buffer_memory(handle, allocation.memory(), allocation.offset())?;
        }
        log::trace!("Created buffer \"{name}\" ({size} bytes, {location:?})");

        Ok(Self {
            handle,
            size,
            state: ResourceState::GenericRead,

            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }

    pub fn write<T: Copy>(&mut self, data: &[T]) -> EngineResult<()> {
        self.write_at_offset(data, 0).map(|_| ())
    }

    /// Copies `data` into the mapped allocation, respecting `T`'s alignment
    pub fn write_at_offset<T: Copy>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> EngineResult<presser::CopyRecord> {
        let allocation = self
            .allocation
            .as_mut()
            .filter(|allocation| allocation.mapped_ptr().is_some())
            .ok_or_else(|| EngineError::Init("buffer memory is not host visible".into()))?;
        Ok(presser::copy_from_slice_to_offset(data, allocation, start_offset)?)
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.handle)
            .offset(0)
            .range(self.size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free buffer memory: {e}");
                    }
                }
                Err(_) => log::error!("Memory allocator lock poisoned, leaking buffer memory"),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_to_rounds_up_to_256() {
        assert_eq!(align_to(1, BUFFER_ALIGNMENT), 256);
        assert_eq!(align_to(64, BUFFER_ALIGNMENT), 256);
        assert_eq!(align_to(256, BUFFER_ALIGNMENT), 256);
        assert_eq!(align_to(257, BUFFER_ALIGNMENT), 512);
    }

    #[test]
    fn test_align_to_keeps_aligned_values() {
        assert_eq!(align_to(0, 512), 0);
        assert_eq!(align_to(1024, 512), 1024);
        assert_eq!(align_to(1025, 512), 1536);
    }
}

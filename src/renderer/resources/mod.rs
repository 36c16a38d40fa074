/// GPU-visible memory objects and the factory that creates them.
/// Everything here is owned by the caller and released on drop.

pub mod buffer;
pub mod descriptor;
pub mod state;
pub mod texture;
pub mod upload;

use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::{vulkan::Allocator, MemoryLocation};
use crate::renderer::core::device::{GpuDescriptorAllocator, RenderDevice};
use crate::renderer::error::EngineResult;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::descriptor::{DescriptorHeap, DescriptorHeapKind};
use crate::renderer::resources::state::ResourceState;
use crate::renderer::resources::texture::{Texture, TextureMetadata};

pub struct ResourceFactory {
    memory_allocator: Arc<Mutex<Allocator>>,
    descriptor_allocator: Arc<Mutex<GpuDescriptorAllocator>>,
    device: Arc<ash::Device>,
}

impl ResourceFactory {
    pub fn new(dev: &RenderDevice) -> Self {
        Self {
            memory_allocator: dev.memory_allocator(),
            descriptor_allocator: dev.descriptor_allocator(),
            device: Arc::clone(&dev.logical),
        }
    }

    /// CPU-writable buffer for constants, vertices or staging, in `GenericRead`
    pub fn create_buffer(&self, size_in_bytes: u64) -> EngineResult<Buffer> {
        Buffer::new(
            size_in_bytes,
            vk::BufferUsageFlags::UNIFORM_BUFFER
                | vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC,
            "Upload buffer",
            MemoryLocation::CpuToGpu,
            Arc::clone(&self.memory_allocator),
            Arc::clone(&self.device),
        )
    }

    /// GPU-only sampled texture in `CopyDest`, waiting for `upload_texture_data`
    pub fn create_texture(&self, metadata: &TextureMetadata) -> EngineResult<Texture> {
        Texture::new(
            metadata,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
            ResourceState::CopyDest,
            "Texture",
            Arc::clone(&self.memory_allocator),
            Arc::clone(&self.device),
        )
    }

    pub fn create_depth_texture(&self, width: u32, height: u32) -> EngineResult<Texture> {
        Texture::new_depth(
            width,
            height,
            Arc::clone(&self.memory_allocator),
            Arc::clone(&self.device),
        )
    }

    pub fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        count: u32,
        shader_visible: bool,
    ) -> EngineResult<DescriptorHeap> {
        DescriptorHeap::new(
            kind,
            count,
            shader_visible,
            Arc::clone(&self.descriptor_allocator),
            Arc::clone(&self.device),
        )
    }
}

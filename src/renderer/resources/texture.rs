use std::path::Path;
use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use image::imageops::FilterType;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::resources::state::ResourceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMetadata {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
}

impl TextureMetadata {
    pub fn extent(&self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: 1,
        }
    }
}

/// Tightly packed RGBA8 pixels of one mip level
#[derive(Debug, Clone)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

pub struct LoadedTexture {
    pub metadata: TextureMetadata,
    pub mips: Vec<MipLevel>,
}

/// Decodes an image file as sRGB RGBA8 and builds its full mip chain
pub fn load_texture(path: impl AsRef<Path>) -> EngineResult<LoadedTexture> {
    let path = path.as_ref();
    let image = image::open(path)?.to_rgba8();
    let mips = generate_mip_chain(image);
    let metadata = TextureMetadata {
        width: mips[0].width,
        height: mips[0].height,
        mip_levels: mips.len() as u32,
        format: vk::Format::R8G8B8A8_SRGB,
    };
    log::info!(
        "Loaded texture {} ({}x{}, {} mips)",
        path.display(),
        metadata.width,
        metadata.height,
        metadata.mip_levels,
    );
    Ok(LoadedTexture { metadata, mips })
}

pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Successive halving with a triangle filter down to 1x1
pub fn generate_mip_chain(base: image::RgbaImage) -> Vec<MipLevel> {
    let count = mip_level_count(base.width(), base.height());
    let mut mips = Vec::with_capacity(count as usize);
    let mut current = base;
    for level in 0..count {
        if level > 0 {
            let width = (current.width() / 2).max(1);
            let height = (current.height() / 2).max(1);
            current = image::imageops::resize(&current, width, height, FilterType::Triangle);
        }
        mips.push(MipLevel {
            width: current.width(),
            height: current.height(),
            data: current.as_raw().clone(),
        });
    }
    mips
}

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// GPU-only image plus its full-resource view
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub metadata: TextureMetadata,
    pub aspect: vk::ImageAspectFlags,
    pub state: ResourceState,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Texture {
    pub fn new(
        metadata: &TextureMetadata,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        initial_state: ResourceState,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> EngineResult<Self> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(metadata.format)
                .usage(usage)
                .extent(metadata.extent())
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(metadata.mip_levels)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.create_image(&info, None)? }
        };
        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .map_err(|_| EngineError::LockPoisoned("memory allocator"))
            .and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name,
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::DedicatedImage(image),
                    })
                    .map_err(EngineError::from)
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut texture = Self {
            image,
            view: vk::ImageView::null(),
            metadata: *metadata,
            aspect,
            state: initial_state,

            allocation: Some(allocation),
            memory_allocator,
            device,
        };
        // On failure the partially built texture is released by Drop
        if let Some(allocation) = texture.allocation.as_ref() {
            unsafe {
                texture.device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
            }
        }
        texture.view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image)
                .format(metadata.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: metadata.mip_levels,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { texture.device.create_image_view(&info, None)? }
        };
        log::trace!("Created texture \"{name}\" ({}x{})", metadata.width, metadata.height);

        Ok(texture)
    }

    /// Depth buffer; starts `Undefined` and is moved to `DepthWrite` on first use
    pub fn new_depth(
        width: u32,
        height: u32,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> EngineResult<Self> {
        let metadata = TextureMetadata {
            width,
            height,
            mip_levels: 1,
            format: DEPTH_FORMAT,
        };
        Self::new(
            &metadata,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
            ResourceState::Undefined,
            "Depth buffer",
            memory_allocator,
            device,
        )
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free texture memory: {e}");
                    }
                }
                Err(_) => log::error!("Memory allocator lock poisoned, leaking texture memory"),
            }
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_descriptor::{DescriptorSetLayoutCreateFlags, DescriptorTotalCount};
use crate::renderer::core::device::{DescriptorAshDevice, GpuDescriptorAllocator};
use crate::renderer::core::release_on_error;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::pipeline::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::pipeline::root_signature::STATIC_SAMPLER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorHeapKind {
    Rtv,
    Dsv,
    CbvSrvUav,
}

/// Binding numbers inside the shader-visible heap set
pub const HEAP_TEXTURE_BINDING: u32 = 0;
pub const HEAP_SAMPLER_BINDING: u32 = 1;

/// A contiguous run of heap slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u32,
    pub count: u32,
}

/// Hands out slot ranges of a fixed-capacity heap and tracks which are taken
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    occupied: Vec<bool>,
}

impl SlotAllocator {
    pub fn new(capacity: u32) -> Self {
        Self {
            occupied: vec![false; capacity as usize],
        }
    }

    pub fn capacity(&self) -> u32 {
        self.occupied.len() as u32
    }

    pub fn available(&self) -> u32 {
        self.occupied.iter().filter(|taken| !**taken).count() as u32
    }

    /// First-fit search for `count` consecutive free slots
    pub fn allocate(&mut self, count: u32) -> EngineResult<SlotRange> {
        let count_usize = count as usize;
        let mut run = 0;
        let start = self.occupied.iter().enumerate().find_map(|(index, taken)| {
            run = if *taken { 0 } else { run + 1 };
            (count_usize > 0 && run == count_usize).then(|| index + 1 - count_usize)
        });

        match start {
            Some(start) => {
                self.occupied[start..start + count_usize].fill(true);
                Ok(SlotRange {
                    start: start as u32,
                    count,
                })
            }
            None => Err(EngineError::DescriptorHeapFull {
                requested: count,
                available: self.available(),
            }),
        }
    }

    pub fn release(&mut self, range: SlotRange) {
        let start = range.start as usize;
        let end = (start + range.count as usize).min(self.occupied.len());
        if start < end {
            self.occupied[start..end].fill(false);
        }
    }

    pub fn is_occupied(&self, slot: u32) -> bool {
        self.occupied.get(slot as usize).copied().unwrap_or(false)
    }
}

/// Position of one descriptor in a heap.
///
/// The CPU handle addresses the slot for writes; the GPU handle is the array
/// element shaders index with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHandle {
    pub kind: DescriptorHeapKind,
    pub index: u32,
}

enum HeapStorage {
    /// Views owned by the heap (render target and depth views)
    Views(Vec<vk::ImageView>),
    ShaderVisible {
        layout: vk::DescriptorSetLayout,
        set: Option<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
        sampler: vk::Sampler,
        descriptor_allocator: Arc<Mutex<GpuDescriptorAllocator>>,
    },
}

pub struct DescriptorHeap {
    pub kind: DescriptorHeapKind,
    pub shader_visible: bool,
    capacity: u32,
    slots: SlotAllocator,
    storage: HeapStorage,
    device: Arc<ash::Device>,
}

impl DescriptorHeap {
    pub fn new(
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        descriptor_allocator: Arc<Mutex<GpuDescriptorAllocator>>,
        device: Arc<ash::Device>,
    ) -> EngineResult<Self> {
        let storage = match (kind, shader_visible) {
            (DescriptorHeapKind::CbvSrvUav, true) => {
                Self::create_shader_visible(capacity, descriptor_allocator, &device)?
            }
            (DescriptorHeapKind::CbvSrvUav, false) => {
                return Err(EngineError::Init(
                    "CBV/SRV/UAV heaps must be shader visible".into(),
                ));
            }
            (_, true) => {
                return Err(EngineError::Init(format!(
                    "{kind:?} heaps cannot be shader visible",
                )));
            }
            (_, false) => HeapStorage::Views(vec![vk::ImageView::null(); capacity as usize]),
        };
        log::debug!("Created {kind:?} descriptor heap with {capacity} slots");

        Ok(Self {
            kind,
            shader_visible,
            capacity,
            slots: SlotAllocator::new(capacity),
            storage,
            device,
        })
    }

    fn allocate_heap_set(
        capacity: u32,
        layout: vk::DescriptorSetLayout,
        descriptor_allocator: &Mutex<GpuDescriptorAllocator>,
        device: &Arc<ash::Device>,
    ) -> EngineResult<gpu_descriptor::DescriptorSet<vk::DescriptorSet>> {
        let mut allocator = descriptor_allocator
            .lock()
            .map_err(|_| EngineError::LockPoisoned("descriptor allocator"))?;
        let descriptor_device = DescriptorAshDevice::from(Arc::clone(device));
        let set = unsafe {
            allocator.allocate(
                &descriptor_device,
                &layout,
                DescriptorSetLayoutCreateFlags::empty(),
                &DescriptorTotalCount {
                    sampler: 1,
                    combined_image_sampler: 0,
                    sampled_image: capacity,
                    storage_image: 0,
                    uniform_texel_buffer: 0,
                    storage_texel_buffer: 0,
                    uniform_buffer: 0,
                    storage_buffer: 0,
                    uniform_buffer_dynamic: 0,
                    storage_buffer_dynamic: 0,
                    input_attachment: 0,
                    acceleration_structure: 0,
                    inline_uniform_block_bytes: 0,
                    inline_uniform_block_bindings: 0,
                },
                1,
            )?
            .pop()
        };
        set.ok_or_else(|| EngineError::Init("no descriptor set returned for heap".into()))
    }

    fn create_shader_visible(
        capacity: u32,
        descriptor_allocator: Arc<Mutex<GpuDescriptorAllocator>>,
        device: &Arc<ash::Device>,
    ) -> EngineResult<HeapStorage> {
        let sampler = {
            let info = vk::SamplerCreateInfo::default()
                .mag_filter(STATIC_SAMPLER.filter)
                .min_filter(STATIC_SAMPLER.filter)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(STATIC_SAMPLER.address_mode)
                .address_mode_v(STATIC_SAMPLER.address_mode)
                .address_mode_w(STATIC_SAMPLER.address_mode)
                .min_lod(0.0)
                .max_lod(vk::LOD_CLAMP_NONE);
            unsafe { device.create_sampler(&info, None)? }
        };

        let immutable_samplers = [sampler];
        let layout = DescriptorSetLayoutBuilder::new()
            .add_binding(
                HEAP_TEXTURE_BINDING,
                vk::DescriptorType::SAMPLED_IMAGE,
                capacity,
                vk::ShaderStageFlags::FRAGMENT,
                vk::DescriptorBindingFlags::PARTIALLY_BOUND,
                None,
            )
            .add_binding(
                HEAP_SAMPLER_BINDING,
                vk::DescriptorType::SAMPLER,
                1,
                STATIC_SAMPLER.visibility.stage_flags(),
                vk::DescriptorBindingFlags::empty(),
                Some(&immutable_samplers),
            )
            .build(vk::DescriptorSetLayoutCreateFlags::empty(), device);
        let layout = release_on_error(layout, sampler, |sampler| unsafe {
            device.destroy_sampler(sampler, None)
        })?;

        let set = Self::allocate_heap_set(capacity, layout, &descriptor_allocator, device);
        let set = release_on_error(set, (layout, sampler), |(layout, sampler)| unsafe {
            device.destroy_descriptor_set_layout(layout, None);
            device.destroy_sampler(sampler, None);
        })?;

        Ok(HeapStorage::ShaderVisible {
            layout,
            set: Some(set),
            sampler,
            descriptor_allocator,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slot bookkeeping for shader resource views placed in this heap
    pub fn slots_mut(&mut self) -> &mut SlotAllocator {
        &mut self.slots
    }

    pub fn cpu_handle(&self, index: u32) -> Option<DescriptorHandle> {
        (index < self.capacity).then_some(DescriptorHandle {
            kind: self.kind,
            index,
        })
    }

    pub fn gpu_handle(&self, index: u32) -> Option<DescriptorHandle> {
        if self.shader_visible {
            self.cpu_handle(index)
        } else {
            None
        }
    }

    /// Layout of the heap set, used by root signatures that bind this heap
    pub fn set_layout(&self) -> Option<vk::DescriptorSetLayout> {
        match &self.storage {
            HeapStorage::ShaderVisible { layout, .. } => Some(*layout),
            HeapStorage::Views(_) => None,
        }
    }

    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        match &self.storage {
            HeapStorage::ShaderVisible { set, .. } => set.as_ref().map(|set| *set.raw()),
            HeapStorage::Views(_) => None,
        }
    }

    /// Creates a 2D view of `image` at `handle`, replacing whatever was there
    pub fn create_image_view(
        &mut self,
        handle: DescriptorHandle,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> EngineResult<vk::ImageView> {
        let HeapStorage::Views(views) = &mut self.storage else {
            return Err(EngineError::Init("image views live in RTV or DSV heaps".into()));
        };
        let slot = views
            .get_mut(handle.index as usize)
            .filter(|_| handle.kind == self.kind)
            .ok_or_else(|| EngineError::Init(format!("invalid {:?} handle {}", handle.kind, handle.index)))?;

        let info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&info, None)? };
        let previous = std::mem::replace(slot, view);
        if previous != vk::ImageView::null() {
            unsafe { self.device.destroy_image_view(previous, None) };
        }
        Ok(view)
    }

    pub fn image_view(&self, handle: DescriptorHandle) -> Option<vk::ImageView> {
        match &self.storage {
            HeapStorage::Views(views) => views
                .get(handle.index as usize)
                .copied()
                .filter(|view| *view != vk::ImageView::null()),
            HeapStorage::ShaderVisible { .. } => None,
        }
    }

    /// Writes a shader resource view of `view` into slot `handle`.
    ///
    /// No draw that reads the heap may be in flight.
    pub fn write_texture_view(&self, handle: DescriptorHandle, view: vk::ImageView) -> EngineResult<()> {
        let set = self
            .descriptor_set()
            .ok_or_else(|| EngineError::Init("texture views need a shader-visible heap".into()))?;
        if handle.kind != self.kind || handle.index >= self.capacity {
            return Err(EngineError::Init(format!("invalid {:?} handle {}", handle.kind, handle.index)));
        }

        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(HEAP_TEXTURE_BINDING)
            .dst_array_element(handle.index)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        match &mut self.storage {
            HeapStorage::Views(views) => unsafe {
                for view in views.drain(..).filter(|view| *view != vk::ImageView::null()) {
                    self.device.destroy_image_view(view, None);
                }
            },
            HeapStorage::ShaderVisible { layout, set, sampler, descriptor_allocator } => {
                if let Some(set) = set.take() {
                    match descriptor_allocator.lock() {
                        Ok(mut allocator) => unsafe {
                            let descriptor_device = DescriptorAshDevice::from(Arc::clone(&self.device));
                            allocator.free(&descriptor_device, [set]);
                        },
                        Err(_) => log::error!("Descriptor allocator lock poisoned, leaking heap set"),
                    }
                }
                unsafe {
                    self.device.destroy_descriptor_set_layout(*layout, None);
                    self.device.destroy_sampler(*sampler, None);
                }
            }
        }
    }
}

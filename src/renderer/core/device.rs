use std::ffi::{c_char, CStr};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_descriptor::{
    CreatePoolError, DescriptorAllocator, DescriptorDevice, DescriptorPoolCreateFlags,
    DescriptorTotalCount, DeviceAllocationError,
};
use crate::renderer::core::adapter::{self, AdapterInfo, FeatureLevel};
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::release_on_error;
use crate::renderer::error::{EngineError, EngineResult};

pub type GpuDescriptorAllocator = DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>;

pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

/// The logical device plus the allocators every GPU object is created through
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub adapter: AdapterInfo,
    /// Single queue used for graphics, copies and presentation
    pub queue: Queue,
    pub push_descriptor_loader: ash::khr::push_descriptor::Device,

    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    descriptor_allocator: Arc<Mutex<GpuDescriptorAllocator>>,
}

impl RenderDevice {
    pub fn new(instance: &RenderInstance) -> EngineResult<Self> {
        let required_extensions = Self::get_required_device_extensions();
        let mut candidates = adapter::enumerate_adapters(
            &instance.instance,
            instance.surface,
            &instance.surface_loader,
            &required_extensions,
        )?;
        for (_, info) in &candidates {
            log::debug!("Found adapter {} ({:?})", info.name, info.kind);
        }

        let infos = candidates
            .iter()
            .map(|(_, info)| info.clone())
            .collect::<Vec<_>>();
        let index = adapter::select_adapter(&infos)?;
        let (physical, adapter_info) = candidates.swap_remove(index);
        log::info!("Use adapter: {}", adapter_info.name);

        let feature_level = adapter::select_feature_level(
            adapter_info.api_version,
            FeatureLevel::CANDIDATES,
        )?;
        log::info!("Feature level: {}", feature_level);

        let family_index = adapter_info
            .graphics_queue_family
            .ok_or(EngineError::NoSuitableAdapter)?;
        let logical = Self::create_logical_device(
            &instance.instance,
            physical,
            family_index,
            &required_extensions,
        )?;
        log::info!("Complete create device");

        let queue = Queue {
            family_index,
            handle: unsafe { logical.get_device_queue(family_index, 0) },
        };

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical.clone(),
            physical_device: physical,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(EngineError::from);
        let memory_allocator = release_on_error(memory_allocator, &logical, |logical| unsafe {
            logical.destroy_device(None)
        })?;

        let push_descriptor_loader =
            ash::khr::push_descriptor::Device::new(&instance.instance, &logical);

        Ok(Self {
            logical: Arc::new(logical),
            physical,
            adapter: adapter_info,
            queue,
            push_descriptor_loader,

            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
            descriptor_allocator: Arc::new(Mutex::new(DescriptorAllocator::new(0))),
        })
    }

    pub fn memory_allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    pub fn descriptor_allocator(&self) -> Arc<Mutex<GpuDescriptorAllocator>> {
        Arc::clone(&self.descriptor_allocator)
    }

    pub fn descriptor_device(&self) -> DescriptorAshDevice {
        DescriptorAshDevice::from(self.logical.clone())
    }

    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.logical.device_wait_idle()? };
        Ok(())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        required_extensions: &[&CStr],
    ) -> EngineResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family_index)
                .queue_priorities(&queue_priorities),
        ];

        let enabled_extension_names = required_extensions
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut enabled_features = RequiredDeviceFeatures::new(physical_device, instance);
        if let Some(missing) = enabled_features.first_missing() {
            return Err(EngineError::Init(format!("Required device feature not supported: {missing}")));
        }

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .enabled_features(&enabled_features.core)
            .push_next(&mut enabled_features.vulkan12)
            .push_next(&mut enabled_features.vulkan13);

        Ok(unsafe { instance.create_device(physical_device, &device_create_info, None)? })
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,
            ash::khr::push_descriptor::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.logical.device_wait_idle() {
                log::error!("device_wait_idle failed during teardown: {e}");
            }
            let device = self.descriptor_device();
            if let Ok(mut allocator) = self.descriptor_allocator.lock() {
                allocator.cleanup(&device);
            }
            // Memory blocks are returned while the device is still alive
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
    }
}

struct RequiredDeviceFeatures {
    core: vk::PhysicalDeviceFeatures,
    vulkan12: vk::PhysicalDeviceVulkan12Features<'static>,
    vulkan13: vk::PhysicalDeviceVulkan13Features<'static>,
}

impl RequiredDeviceFeatures {
    /// Queries what the device supports; the returned structs double as the enable list
    fn new(physical_device: vk::PhysicalDevice, instance: &ash::Instance) -> Self {
        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
        let core = {
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut vulkan12)
                .push_next(&mut vulkan13);
            unsafe {
                instance.get_physical_device_features2(physical_device, &mut features);
            }
            features.features
        };

        // Keep only what is needed, everything else stays disabled
        Self {
            core: vk::PhysicalDeviceFeatures::default()
                .shader_sampled_image_array_dynamic_indexing(
                    core.shader_sampled_image_array_dynamic_indexing == vk::TRUE,
                ),
            vulkan12: vk::PhysicalDeviceVulkan12Features::default()
                .timeline_semaphore(vulkan12.timeline_semaphore == vk::TRUE)
                .descriptor_indexing(vulkan12.descriptor_indexing == vk::TRUE)
                .descriptor_binding_partially_bound(
                    vulkan12.descriptor_binding_partially_bound == vk::TRUE,
                ),
            vulkan13: vk::PhysicalDeviceVulkan13Features::default()
                .dynamic_rendering(vulkan13.dynamic_rendering == vk::TRUE)
                .synchronization2(vulkan13.synchronization2 == vk::TRUE),
        }
    }

    fn first_missing(&self) -> Option<&'static str> {
        [
            (self.core.shader_sampled_image_array_dynamic_indexing, "shaderSampledImageArrayDynamicIndexing"),
            (self.vulkan12.timeline_semaphore, "timelineSemaphore"),
            (self.vulkan12.descriptor_indexing, "descriptorIndexing"),
            (self.vulkan12.descriptor_binding_partially_bound, "descriptorBindingPartiallyBound"),
            (self.vulkan13.dynamic_rendering, "dynamicRendering"),
            (self.vulkan13.synchronization2, "synchronization2"),
        ]
            .into_iter()
            .find(|(enabled, _)| *enabled != vk::TRUE)
            .map(|(_, name)| name)
    }
}

pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let pool_sizes = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count.uniform_texel_buffer),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count.storage_texel_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, descriptor_count.storage_buffer_dynamic),
            (vk::DescriptorType::INPUT_ATTACHMENT, descriptor_count.input_attachment),
        ]
            .into_iter()
            .filter(|(_, count)| *count != 0)
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect::<smallvec::SmallVec<[_; 11]>>();

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }
        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("Unexpected result from vkCreateDescriptorPool: {err}");
                Err(CreatePoolError::OutOfHostMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.0.destroy_descriptor_pool(pool, None) }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };

        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(DeviceAllocationError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                log::error!("Unexpected result from vkAllocateDescriptorSets: {err}");
                Err(DeviceAllocationError::OutOfHostMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("Unexpected result from vkFreeDescriptorSets: {err}");
        }
    }
}

use std::sync::Arc;
use ash::vk;
use crate::renderer::core::commands::CommandRecorder;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::release_on_error;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::pipeline::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::descriptor::{DescriptorHandle, DescriptorHeap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderVisibility {
    Vertex,
    Pixel,
}

impl ShaderVisibility {
    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Pixel => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// A constant buffer bound directly, at `binding` of the push-descriptor set
    ConstantBufferView { binding: u32, visibility: ShaderVisibility },
    /// A range of shader resource views inside the shader-visible heap
    DescriptorTable { srv_count: u32, visibility: ShaderVisibility },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSampler {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub visibility: ShaderVisibility,
}

pub const MATERIAL_PARAMETER: usize = 0;
pub const TRANSFORM_PARAMETER: usize = 1;
pub const TEXTURE_PARAMETER: usize = 2;

const ROOT_PARAMETERS: [RootParameter; 3] = [
    RootParameter::ConstantBufferView { binding: 0, visibility: ShaderVisibility::Pixel },
    RootParameter::ConstantBufferView { binding: 1, visibility: ShaderVisibility::Vertex },
    RootParameter::DescriptorTable { srv_count: 1, visibility: TABLE_VISIBILITY },
];

/// The sampler baked into the heap set
pub const STATIC_SAMPLER: StaticSampler = StaticSampler {
    filter: vk::Filter::LINEAR,
    address_mode: vk::SamplerAddressMode::REPEAT,
    visibility: ShaderVisibility::Pixel,
};

const TABLE_VISIBILITY: ShaderVisibility = ShaderVisibility::Pixel;
const ROOT_DESCRIPTOR_SET: u32 = 0;
const HEAP_SET: u32 = 1;

/// The binding contract between the shaders and what the CPU supplies.
///
/// Set 0 holds the constant buffers as push descriptors, set 1 is the
/// shader-visible heap, and a 4-byte push constant selects the heap slot a
/// descriptor table starts at. The shaders must declare exactly this.
pub struct RootSignature {
    pub layout: vk::PipelineLayout,
    root_set_layout: vk::DescriptorSetLayout,
    heap_set: vk::DescriptorSet,
    push_descriptor_loader: ash::khr::push_descriptor::Device,
    device: Arc<ash::Device>,
}

impl RootSignature {
    pub fn create(dev: &RenderDevice, heap: &DescriptorHeap) -> EngineResult<Self> {
        let (heap_set_layout, heap_set) = heap
            .set_layout()
            .zip(heap.descriptor_set())
            .ok_or_else(|| EngineError::Pipeline("root signature needs a shader-visible heap".into()))?;
        let device = Arc::clone(&dev.logical);

        let root_set_layout = ROOT_PARAMETERS
            .iter()
            .filter_map(|parameter| match *parameter {
                RootParameter::ConstantBufferView { binding, visibility } => Some((binding, visibility)),
                RootParameter::DescriptorTable { .. } => None,
            })
            .fold(DescriptorSetLayoutBuilder::new(), |builder, (binding, visibility)| {
                builder.add_binding(
                    binding,
                    vk::DescriptorType::UNIFORM_BUFFER,
                    1,
                    visibility.stage_flags(),
                    vk::DescriptorBindingFlags::empty(),
                    None,
                )
            })
            .build(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR, &device)?;

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(TABLE_VISIBILITY.stage_flags())
            .offset(0)
            .size(size_of::<u32>() as u32)];
        let set_layouts = [root_set_layout, heap_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }.map_err(EngineError::from);
        let layout = release_on_error(layout, root_set_layout, |root_set_layout| unsafe {
            device.destroy_descriptor_set_layout(root_set_layout, None)
        })?;
        log::info!("Created root signature with {} parameters", ROOT_PARAMETERS.len());

        Ok(Self {
            layout,
            root_set_layout,
            heap_set,
            push_descriptor_loader: dev.push_descriptor_loader.clone(),
            device,
        })
    }

    pub fn parameters(&self) -> &'static [RootParameter] {
        &ROOT_PARAMETERS
    }

    pub fn set_constant_buffer_view(
        &self,
        recorder: &CommandRecorder,
        parameter_index: usize,
        buffer: &Buffer,
    ) -> EngineResult<()> {
        let binding = match ROOT_PARAMETERS.get(parameter_index) {
            Some(RootParameter::ConstantBufferView { binding, .. }) => *binding,
            _ => {
                return Err(EngineError::Pipeline(format!(
                    "root parameter {parameter_index} is not a constant buffer view",
                )));
            }
        };
        let buffer_info = [buffer.descriptor_info()];
        let write = vk::WriteDescriptorSet::default()
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        unsafe {
            self.push_descriptor_loader.cmd_push_descriptor_set(
                recorder.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                ROOT_DESCRIPTOR_SET,
                &[write],
            );
        }
        Ok(())
    }

    /// Binds the shader-visible heap for every draw recorded after this
    pub fn bind_heap(&self, recorder: &CommandRecorder) {
        unsafe {
            recorder.device.cmd_bind_descriptor_sets(
                recorder.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                HEAP_SET,
                &[self.heap_set],
                &[],
            );
        }
    }

    /// Points the table at the heap slot `handle`; the heap must already be bound
    pub fn set_descriptor_table(
        &self,
        recorder: &CommandRecorder,
        parameter_index: usize,
        handle: DescriptorHandle,
    ) -> EngineResult<()> {
        let visibility = match ROOT_PARAMETERS.get(parameter_index) {
            Some(RootParameter::DescriptorTable { visibility, .. }) => *visibility,
            _ => {
                return Err(EngineError::Pipeline(format!(
                    "root parameter {parameter_index} is not a descriptor table",
                )));
            }
        };
        unsafe {
            recorder.device.cmd_push_constants(
                recorder.cmd,
                self.layout,
                visibility.stage_flags(),
                0,
                &handle.index.to_ne_bytes(),
            );
        }
        Ok(())
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
            self.device.destroy_descriptor_set_layout(self.root_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_parameter_order() {
        assert_eq!(
            ROOT_PARAMETERS[MATERIAL_PARAMETER],
            RootParameter::ConstantBufferView { binding: 0, visibility: ShaderVisibility::Pixel },
        );
        assert_eq!(
            ROOT_PARAMETERS[TRANSFORM_PARAMETER],
            RootParameter::ConstantBufferView { binding: 1, visibility: ShaderVisibility::Vertex },
        );
        assert_eq!(
            ROOT_PARAMETERS[TEXTURE_PARAMETER],
            RootParameter::DescriptorTable { srv_count: 1, visibility: ShaderVisibility::Pixel },
        );
    }

    #[test]
    fn test_static_sampler_is_linear_wrap() {
        assert_eq!(STATIC_SAMPLER.filter, vk::Filter::LINEAR);
        assert_eq!(STATIC_SAMPLER.address_mode, vk::SamplerAddressMode::REPEAT);
        assert_eq!(STATIC_SAMPLER.visibility, ShaderVisibility::Pixel);
    }

    #[test]
    fn test_visibility_maps_to_stages() {
        assert_eq!(ShaderVisibility::Vertex.stage_flags(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(ShaderVisibility::Pixel.stage_flags(), vk::ShaderStageFlags::FRAGMENT);
    }
}

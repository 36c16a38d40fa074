use ash::vk;
use crate::renderer::error::EngineResult;

pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    binding_flags: Vec<vk::DescriptorBindingFlags>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            binding_flags: Vec::new(),
        }
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        descriptor_count: u32,
        stages: vk::ShaderStageFlags,
        binding_flags: vk::DescriptorBindingFlags,
        immutable_samplers: Option<&'a [vk::Sampler]>,
    ) -> Self {
        let mut binding = vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(descriptor_count)
            .stage_flags(stages);

        if let Some(immutable_samplers) = immutable_samplers {
            binding = binding.immutable_samplers(immutable_samplers);
        }

        self.bindings.push(binding);
        self.binding_flags.push(binding_flags);
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'a>] {
        &self.bindings
    }

    pub fn build(
        self,
        flags: vk::DescriptorSetLayoutCreateFlags,
        device: &ash::Device,
    ) -> EngineResult<vk::DescriptorSetLayout> {
        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
            .binding_flags(&self.binding_flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .flags(flags)
            .push_next(&mut binding_flags_info);
        Ok(unsafe { device.create_descriptor_set_layout(&layout_info, None)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immutable_sampler_is_attached() {
        let samplers = [vk::Sampler::null()];
        let builder = DescriptorSetLayoutBuilder::new()
            .add_binding(
                0,
                vk::DescriptorType::SAMPLED_IMAGE,
                128,
                vk::ShaderStageFlags::FRAGMENT,
                vk::DescriptorBindingFlags::PARTIALLY_BOUND,
                None,
            )
            .add_binding(
                1,
                vk::DescriptorType::SAMPLER,
                1,
                vk::ShaderStageFlags::FRAGMENT,
                vk::DescriptorBindingFlags::empty(),
                Some(&samplers),
            );

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_count, 128);
        assert!(bindings[0].p_immutable_samplers.is_null());
        assert_eq!(bindings[1].descriptor_count, 1);
        assert!(!bindings[1].p_immutable_samplers.is_null());
    }
}

use std::ffi::CStr;
use std::sync::Arc;
use ash::vk;
use crate::renderer::core::commands::CommandRecorder;
use crate::renderer::error::{EngineError, EngineResult};
use crate::renderer::pipeline::root_signature::RootSignature;
use crate::renderer::pipeline::shader::{ShaderModule, ShaderStage};
use crate::renderer::pipeline::vertex::VertexInputDescription;
use crate::renderer::resources::texture::DEPTH_FORMAT;

const ENTRY_POINT_NAME: &CStr = c"main";

/// Immutable pipeline object: shaders, input layout, fixed-function state and
/// the root signature it was built against
pub struct PipelineState {
    pub pipeline: vk::Pipeline,
    device: Arc<ash::Device>,
}

impl PipelineState {
    pub fn bind(&self, recorder: &CommandRecorder) {
        unsafe {
            recorder.device.cmd_bind_pipeline(
                recorder.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
        }
    }
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

pub struct PipelineStateBuilder<'a> {
    device: Arc<ash::Device>,

    input_assembly: vk::PipelineInputAssemblyStateCreateInfo<'a>,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'a>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    multisample: vk::PipelineMultisampleStateCreateInfo<'a>,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'a>,
    color_attachment_format: vk::Format,
    vertex_shader: Option<&'a ShaderModule>,
    pixel_shader: Option<&'a ShaderModule>,
    root_signature: Option<&'a RootSignature>,
}

impl<'a> PipelineStateBuilder<'a> {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,

            input_assembly: Self::default_input_assembly_info(),
            rasterization: Self::default_rasterization_info(),
            color_blend_attachment: Self::default_color_blend_state(),
            multisample: Self::default_multisample_info(),
            depth_stencil: Self::default_depth_stencil_info(),
            color_attachment_format: vk::Format::UNDEFINED,
            vertex_shader: None,
            pixel_shader: None,
            root_signature: None,
        }
    }

    pub fn with_shaders(mut self, vertex: &'a ShaderModule, pixel: &'a ShaderModule) -> Self {
        self.vertex_shader = Some(vertex);
        self.pixel_shader = Some(pixel);
        self
    }

    pub fn with_root_signature(mut self, root_signature: &'a RootSignature) -> Self {
        self.root_signature = Some(root_signature);
        self
    }

    pub fn with_blending_disabled(mut self) -> Self {
        self.color_blend_attachment.color_write_mask = vk::ColorComponentFlags::RGBA;
        self.color_blend_attachment.blend_enable = vk::FALSE;
        self
    }

    pub fn with_color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_attachment_format = format;
        self
    }

    pub fn with_depth_test(mut self, enable: bool, compare: Option<vk::CompareOp>) -> Self {
        self.depth_stencil.depth_test_enable = enable.into();
        self.depth_stencil.depth_write_enable = enable.into();
        self.depth_stencil.depth_compare_op = if enable {
            compare.unwrap_or(vk::CompareOp::LESS_OR_EQUAL)
        } else {
            vk::CompareOp::ALWAYS
        };
        self.depth_stencil.min_depth_bounds = 0.0;
        self.depth_stencil.max_depth_bounds = 1.0;
        self
    }

    pub fn build(self) -> EngineResult<PipelineState> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| EngineError::Pipeline("no vertex shader provided".into()))?;
        let pixel_shader = self
            .pixel_shader
            .ok_or_else(|| EngineError::Pipeline("no pixel shader provided".into()))?;
        let root_signature = self
            .root_signature
            .ok_or_else(|| EngineError::Pipeline("no root signature provided".into()))?;
        if vertex_shader.stage != ShaderStage::Vertex || pixel_shader.stage != ShaderStage::Pixel {
            return Err(EngineError::Pipeline("shader stages are swapped".into()));
        }
        if self.color_attachment_format == vk::Format::UNDEFINED {
            return Err(EngineError::Pipeline("no color attachment format provided".into()));
        }

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vertex_shader.stage.vk_stage())
                .module(vertex_shader.handle)
                .name(ENTRY_POINT_NAME),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(pixel_shader.stage.vk_stage())
                .module(pixel_shader.handle)
                .name(ENTRY_POINT_NAME),
        ];

        let vertex_input_description = VertexInputDescription::default();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_attribute_descriptions(&vertex_input_description.attributes)
            .vertex_binding_descriptions(&vertex_input_description.bindings);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let color_blend_attachments = [self.color_blend_attachment];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        // Viewport and scissor follow the swap chain extent
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [self.color_attachment_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(DEPTH_FORMAT);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .push_next(&mut rendering_info)
            .stages(&shader_stages)
            .layout(root_signature.layout)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&self.input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&self.multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&self.depth_stencil)
            .dynamic_state(&dynamic_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)?
        };
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Pipeline("driver returned no pipeline".into()))?;
        log::info!("Created pipeline state, color format {:?}", self.color_attachment_format);

        Ok(PipelineState {
            pipeline,
            device: self.device,
        })
    }

    fn default_input_assembly_info() -> vk::PipelineInputAssemblyStateCreateInfo<'a> {
        vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false)
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'a> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            // Shaders flip y, so clockwise in clip space stays clockwise on screen
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    }

    fn default_multisample_info() -> vk::PipelineMultisampleStateCreateInfo<'a> {
        vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            // 1 sample per pixel means no multisampling
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
    }

    fn default_depth_stencil_info() -> vk::PipelineDepthStencilStateCreateInfo<'a> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Builder<'a> = PipelineStateBuilder<'a>;

    #[test]
    fn test_default_fixed_function_state() {
        let raster = Builder::default_rasterization_info();
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert_eq!(raster.cull_mode, vk::CullModeFlags::BACK);

        let depth = Builder::default_depth_stencil_info();
        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(depth.stencil_test_enable, vk::FALSE);

        let blend = Builder::default_color_blend_state();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_entry_point_name() {
        assert_eq!(ENTRY_POINT_NAME.to_str().unwrap(), crate::renderer::pipeline::shader::ENTRY_POINT);
    }
}

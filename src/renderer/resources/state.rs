use ash::vk;

/// The state a resource must be in before an operation may touch it.
///
/// A transition's `before` must be the resource's true current state; this
/// layer does not track or verify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Contents are undefined, e.g. a freshly created or never presented image
    Undefined,
    Present,
    RenderTarget,
    DepthWrite,
    CopyDest,
    GenericRead,
}

impl ResourceState {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
            Self::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthWrite => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            Self::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::GenericRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn access(self) -> vk::AccessFlags2 {
        match self {
            Self::Undefined | Self::Present => vk::AccessFlags2::NONE,
            Self::RenderTarget => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthWrite => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::CopyDest => vk::AccessFlags2::TRANSFER_WRITE,
            Self::GenericRead => vk::AccessFlags2::SHADER_SAMPLED_READ,
        }
    }

    pub fn stages(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::Undefined => vk::PipelineStageFlags2::TOP_OF_PIPE,
            // Matches the stage the acquire semaphore is waited on
            Self::Present | Self::RenderTarget => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthWrite => {
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
            }
            Self::CopyDest => vk::PipelineStageFlags2::COPY,
            Self::GenericRead => {
                vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
            }
        }
    }
}

/// Whole-resource image transition for `mip_levels` levels of one layer
pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
    before: ResourceState,
    after: ResourceState,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(before.stages())
        .src_access_mask(before.access())
        .dst_stage_mask(after.stages())
        .dst_access_mask(after.access())
        .old_layout(before.layout())
        .new_layout(after.layout())
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_to_render_target_barrier() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            1,
            ResourceState::Present,
            ResourceState::RenderTarget,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(barrier.dst_access_mask.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_upload_transition_covers_all_mips() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            3,
            ResourceState::CopyDest,
            ResourceState::GenericRead,
        );
        assert_eq!(barrier.subresource_range.level_count, 3);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}

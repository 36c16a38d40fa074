use std::sync::Arc;
use ash::prelude::VkResult;
use ash::vk;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::release_on_error;
use crate::renderer::core::sync::Semaphore;
use crate::renderer::error::{EngineError, EngineResult};

pub const REQUESTED_IMAGE_COUNT: u32 = 2;
pub const SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Clamps the requested image count to what the surface supports.
/// A `max` of 0 means the surface imposes no upper bound.
pub fn choose_image_count(requested: u32, min: u32, max: u32) -> u32 {
    let count = requested.max(min);
    if max > 0 { count.min(max) } else { count }
}

pub fn choose_present_mode(vsync: bool, available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // Every surface supports FIFO
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// The ring of presentable back buffers.
///
/// One binary semaphore orders acquisition against the frame's submission, and
/// one per image orders the submission against presentation. A single shared
/// acquire semaphore is enough because at most one frame is ever outstanding.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    image_available: Semaphore,
    render_finished: Vec<Semaphore>,
}

impl Swapchain {
    pub fn new(
        ins: &RenderInstance,
        dev: &RenderDevice,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<&Swapchain>,
    ) -> EngineResult<Self> {
        let capabilities = unsafe {
            ins.surface_loader
                .get_physical_device_surface_capabilities(dev.physical, ins.surface)?
        };
        let formats = unsafe {
            ins.surface_loader
                .get_physical_device_surface_formats(dev.physical, ins.surface)?
        };
        if !formats.iter().any(|f| {
            f.format == SURFACE_FORMAT.format && f.color_space == SURFACE_FORMAT.color_space
        }) {
            return Err(EngineError::Init(format!(
                "surface does not support {:?}/{:?}",
                SURFACE_FORMAT.format, SURFACE_FORMAT.color_space,
            )));
        }
        let present_modes = unsafe {
            ins.surface_loader
                .get_physical_device_surface_present_modes(dev.physical, ins.surface)?
        };
        let present_mode = choose_present_mode(vsync, &present_modes);

        let image_count = choose_image_count(
            REQUESTED_IMAGE_COUNT,
            capabilities.min_image_count,
            capabilities.max_image_count,
        );
        if image_count != REQUESTED_IMAGE_COUNT {
            log::warn!(
                "Requested {} swapchain images, surface allows {}",
                REQUESTED_IMAGE_COUNT,
                image_count,
            );
        }
        let extent = choose_extent(&capabilities, width, height);
        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        let loader = ash::khr::swapchain::Device::new(&ins.instance, &dev.logical);
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ins.surface)
            .min_image_count(image_count)
            .image_format(SURFACE_FORMAT.format)
            .image_color_space(SURFACE_FORMAT.color_space)
            .image_extent(extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain.map_or(vk::SwapchainKHR::null(), |old| old.handle));
        let handle = unsafe { loader.create_swapchain(&swapchain_info, None)? };

        let images_and_semaphores = unsafe { loader.get_swapchain_images(handle) }
            .map_err(EngineError::from)
            .and_then(|images| {
                let image_available = Semaphore::new(Arc::clone(&dev.logical))?;
                let render_finished = images
                    .iter()
                    .map(|_| Semaphore::new(Arc::clone(&dev.logical)))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok((images, image_available, render_finished))
            });
        let (images, image_available, render_finished) =
            release_on_error(images_and_semaphores, handle, |handle| unsafe {
                loader.destroy_swapchain(handle, None)
            })?;

        log::info!(
            "Swapchain: {} images, {}x{}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            present_mode,
        );

        Ok(Self {
            handle,
            loader,
            images,
            format: SURFACE_FORMAT.format,
            extent,
            present_mode,
            image_available,
            render_finished,
        })
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Acquires the next back buffer and returns its index
    pub fn acquire_next_image(&self) -> VkResult<u32> {
        let (index, suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.handle,
                u64::MAX,
                self.image_available.handle,
                vk::Fence::null(),
            )?
        };
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle
    }

    pub fn render_finished(&self, index: u32) -> vk::Semaphore {
        self.render_finished[index as usize].handle
    }

    pub fn present(&self, queue: vk::Queue, index: u32) -> VkResult<()> {
        let wait_semaphores = [self.render_finished(index)];
        let swapchains = [self.handle];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let suboptimal = unsafe { self.loader.queue_present(queue, &present_info)? };
        if suboptimal {
            log::debug!("Presented to a suboptimal swapchain");
        }
        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_count_honours_request_within_limits() {
        assert_eq!(choose_image_count(2, 2, 8), 2);
        assert_eq!(choose_image_count(2, 1, 0), 2);
    }

    #[test]
    fn test_image_count_clamps_to_surface_limits() {
        assert_eq!(choose_image_count(2, 3, 8), 3);
        assert_eq!(choose_image_count(2, 1, 1), 1);
    }

    #[test]
    fn test_present_mode_follows_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(true, &modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(false, &modes), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(false, &[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO,
        );
    }

    #[test]
    fn test_extent_uses_window_size_when_surface_is_flexible() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 1024, height: 1024 },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 1280, 720);
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 720);
    }
}

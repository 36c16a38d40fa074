use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use crate::renderer::core::adapter::FeatureLevel;
use crate::renderer::error::EngineResult;

/// Loads Vulkan and keeps the instance, the debug messenger and the window surface alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    const VALIDATION_LAYER: &'static CStr = c"VK_LAYER_KHRONOS_validation";

    pub fn new(window: &Window, enable_validation: bool) -> EngineResult<Self> {
        let entry = unsafe { ash::Entry::load()? };

        let enable_validation = enable_validation && Self::validation_layer_supported(&entry)?;
        let instance = Self::create_instance(&entry, window, enable_validation)?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        // Owned from here on, so a failure below still destroys the instance
        let mut this = Self {
            entry,
            instance,
            surface: vk::SurfaceKHR::null(),
            surface_loader,
            debug_utils: None,
        };

        if enable_validation {
            let loader = ash::ext::debug_utils::Instance::new(&this.entry, &this.instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_utils_messenger_create_info(), None)?
            };
            this.debug_utils = Some((loader, messenger));
            log::info!("Validation layer enabled");
        }

        this.surface = unsafe {
            ash_window::create_surface(
                &this.entry,
                &this.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };

        Ok(this)
    }

    fn create_instance(
        entry: &ash::Entry,
        window: &Window,
        enable_validation: bool,
    ) -> EngineResult<ash::Instance> {
        let highest = FeatureLevel::CANDIDATES[0];
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"fenceline")
            .engine_name(c"fenceline")
            .api_version(highest.api_version());

        let enabled_layer_names = if enable_validation {
            vec![Self::VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut enabled_extension_names: Vec<*const c_char> = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw(),
        )?
            .to_vec();
        if enable_validation {
            enabled_extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        #[cfg(target_os = "macos")]
        {
            enabled_extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
            enabled_extension_names.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }

        // Chained so instance creation and destruction are covered too
        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if enable_validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe { entry.create_instance(&instance_info, None)? })
    }

    fn validation_layer_supported(entry: &ash::Entry) -> EngineResult<bool> {
        let supported = unsafe { entry.enumerate_instance_layer_properties()? }
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == Self::VALIDATION_LAYER));
        if !supported {
            log::warn!("Validation requested but {:?} is not installed", Self::VALIDATION_LAYER);
        }
        Ok(supported)
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::trace!("{} {}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("{} {}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{} {}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{} {}", msg_type, msg),
        _ => log::warn!("[Unknown]{} {}", msg_type, msg),
    }

    vk::FALSE
}

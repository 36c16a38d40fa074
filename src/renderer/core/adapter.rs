use std::ffi::CStr;
use ash::vk;
use crate::renderer::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AdapterKind {
    Discrete,
    Integrated,
    Virtual,
    Other,
    /// CPU implementations such as lavapipe or SwiftShader
    Software,
}

impl From<vk::PhysicalDeviceType> for AdapterKind {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => Self::Discrete,
            vk::PhysicalDeviceType::INTEGRATED_GPU => Self::Integrated,
            vk::PhysicalDeviceType::VIRTUAL_GPU => Self::Virtual,
            vk::PhysicalDeviceType::CPU => Self::Software,
            _ => Self::Other,
        }
    }
}

/// What the selector needs to know about one enumerated adapter
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: AdapterKind,
    pub api_version: u32,
    /// A queue family that supports both graphics and presentation to the target surface
    pub graphics_queue_family: Option<u32>,
    pub has_required_extensions: bool,
}

impl AdapterInfo {
    fn qualifies(&self) -> bool {
        self.kind != AdapterKind::Software
            && self.graphics_queue_family.is_some()
            && self.has_required_extensions
    }
}

/// Picks the first qualifying adapter in descending preference order.
///
/// Adapters of equal preference keep their enumeration order. Software
/// adapters never qualify, even when they are the only ones present.
pub fn select_adapter(adapters: &[AdapterInfo]) -> EngineResult<usize> {
    let mut order = (0..adapters.len()).collect::<Vec<_>>();
    order.sort_by_key(|&i| adapters[i].kind);

    order
        .into_iter()
        .find(|&i| {
            let adapter = &adapters[i];
            if !adapter.qualifies() {
                log::debug!("Skipping adapter {} ({:?})", adapter.name, adapter.kind);
            }
            adapter.qualifies()
        })
        .ok_or(EngineError::NoSuitableAdapter)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLevel {
    pub major: u32,
    pub minor: u32,
}

impl FeatureLevel {
    pub const V1_4: Self = Self { major: 1, minor: 4 };
    pub const V1_3: Self = Self { major: 1, minor: 3 };

    /// Tried highest first
    pub const CANDIDATES: &'static [Self] = &[Self::V1_4, Self::V1_3];

    pub fn api_version(&self) -> u32 {
        vk::make_api_version(0, self.major, self.minor, 0)
    }
}

impl std::fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

pub fn select_feature_level(
    adapter_api_version: u32,
    candidates: &[FeatureLevel],
) -> EngineResult<FeatureLevel> {
    let major = vk::api_version_major(adapter_api_version);
    let minor = vk::api_version_minor(adapter_api_version);

    candidates
        .iter()
        .copied()
        .find(|level| (level.major, level.minor) <= (major, minor))
        .ok_or(EngineError::UnsupportedFeatureLevel { major, minor })
}

/// Gathers an [`AdapterInfo`] for every physical device the instance exposes
pub fn enumerate_adapters(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
    required_extensions: &[&CStr],
) -> EngineResult<Vec<(vk::PhysicalDevice, AdapterInfo)>> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    Ok(devices
        .into_iter()
        .map(|device| {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = props
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "<unnamed>".into());

            let supported_extensions = unsafe {
                instance
                    .enumerate_device_extension_properties(device)
                    .unwrap_or_default()
            };
            let has_required_extensions = required_extensions.iter().all(|req| {
                let found = supported_extensions
                    .iter()
                    .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == *req));
                if !found {
                    log::debug!("{} lacks device extension {:?}", name, req);
                }
                found
            });

            let graphics_queue_family = unsafe {
                instance
                    .get_physical_device_queue_family_properties(device)
                    .iter()
                    .enumerate()
                    .position(|(i, q)| {
                        let supports_present = surface_loader
                            .get_physical_device_surface_support(device, i as u32, surface)
                            .unwrap_or(false);
                        q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && supports_present
                    })
                    .map(|i| i as u32)
            };

            let info = AdapterInfo {
                name,
                kind: props.device_type.into(),
                api_version: props.api_version,
                graphics_queue_family,
                has_required_extensions,
            };
            (device, info)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, kind: AdapterKind) -> AdapterInfo {
        AdapterInfo {
            name: name.into(),
            kind,
            api_version: vk::API_VERSION_1_3,
            graphics_queue_family: Some(0),
            has_required_extensions: true,
        }
    }

    #[test]
    fn test_software_adapter_falls_through_to_next() {
        let adapters = [
            adapter("llvmpipe", AdapterKind::Software),
            adapter("igpu", AdapterKind::Integrated),
        ];
        assert_eq!(select_adapter(&adapters).unwrap(), 1);
    }

    #[test]
    fn test_prefers_discrete_over_enumeration_order() {
        let adapters = [
            adapter("igpu", AdapterKind::Integrated),
            adapter("dgpu", AdapterKind::Discrete),
        ];
        assert_eq!(select_adapter(&adapters).unwrap(), 1);
    }

    #[test]
    fn test_equal_preference_keeps_enumeration_order() {
        let adapters = [
            adapter("first", AdapterKind::Discrete),
            adapter("second", AdapterKind::Discrete),
        ];
        assert_eq!(select_adapter(&adapters).unwrap(), 0);
    }

    #[test]
    fn test_fails_when_nothing_qualifies() {
        let mut no_present = adapter("headless", AdapterKind::Discrete);
        no_present.graphics_queue_family = None;
        let mut no_swapchain = adapter("compute", AdapterKind::Integrated);
        no_swapchain.has_required_extensions = false;
        let adapters = [adapter("swiftshader", AdapterKind::Software), no_present, no_swapchain];

        assert!(matches!(select_adapter(&adapters), Err(EngineError::NoSuitableAdapter)));
        assert!(matches!(select_adapter(&[]), Err(EngineError::NoSuitableAdapter)));
    }

    #[test]
    fn test_feature_level_picks_highest_supported() {
        let level = select_feature_level(
            vk::make_api_version(0, 1, 4, 303),
            FeatureLevel::CANDIDATES,
        ).unwrap();
        assert_eq!(level, FeatureLevel::V1_4);

        let level = select_feature_level(
            vk::make_api_version(0, 1, 3, 250),
            FeatureLevel::CANDIDATES,
        ).unwrap();
        assert_eq!(level, FeatureLevel::V1_3);
    }

    #[test]
    fn test_feature_level_rejects_old_adapters() {
        let result = select_feature_level(vk::API_VERSION_1_2, FeatureLevel::CANDIDATES);
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedFeatureLevel { major: 1, minor: 2 })
        ));
    }
}

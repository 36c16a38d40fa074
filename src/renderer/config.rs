use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::renderer::error::EngineResult;

/// Contains configuration options for the renderer like the resolution, vsync, and other settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub vsync: bool,
    /// Enables the validation layer and routes its messages into `log`
    pub validation: bool,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    /// Capacity of the shader-visible descriptor heap
    pub srv_heap_capacity: u32,
    pub vertex_shader: ShaderSource,
    pub pixel_shader: ShaderSource,
    pub texture: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub profile: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "fenceline".into(),
            vsync: true,
            validation: cfg!(debug_assertions),
            clear_color: [0.1, 0.25, 0.5, 1.0],
            clear_depth: 1.0,
            srv_heap_capacity: 128,
            vertex_shader: ShaderSource {
                path: "shaders/Object3D.VS.wgsl".into(),
                profile: "vs_6_0".into(),
            },
            pixel_shader: ShaderSource {
                path: "shaders/Object3D.PS.wgsl".into(),
                profile: "ps_6_0".into(),
            },
            texture: "assets/uvChecker.png".into(),
        }
    }
}

impl RenderConfig {
    pub const DEFAULT_PATH: &'static str = "fenceline.ron";

    /// Loads the config at `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_ron(&text)?;
        log::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_ron(text: &str) -> EngineResult<Self> {
        Ok(ron::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_back_buffer_setup() {
        let config = RenderConfig::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.clear_color, [0.1, 0.25, 0.5, 1.0]);
        assert_eq!(config.srv_heap_capacity, 128);
        assert_eq!(config.pixel_shader.profile, "ps_6_0");
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = RenderConfig::from_ron("(width: 800, vsync: false)").unwrap();
        assert_eq!(config.width, 800);
        assert!(!config.vsync);
        assert_eq!(config.height, 720);
        assert_eq!(config.title, "fenceline");
    }

    #[test]
    fn test_malformed_ron_is_an_error() {
        assert!(RenderConfig::from_ron("(width: \"wide\")").is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config = RenderConfig::load_or_default(RenderConfig::DEFAULT_PATH).unwrap();
        assert_eq!(config, RenderConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = RenderConfig::load_or_default("does/not/exist.ron").unwrap();
        assert_eq!(config, RenderConfig::default());
    }
}

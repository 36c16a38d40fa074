use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use ash::vk;
use naga::back::spv;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use crate::renderer::error::{EngineError, EngineResult};

pub const ENTRY_POINT: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Pixel => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    fn naga_stage(self) -> naga::ShaderStage {
        match self {
            Self::Vertex => naga::ShaderStage::Vertex,
            Self::Pixel => naga::ShaderStage::Fragment,
        }
    }
}

/// A version-tagged target such as `vs_6_0` or `ps_6_0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderProfile {
    pub stage: ShaderStage,
    pub major: u32,
    pub minor: u32,
}

impl FromStr for ShaderProfile {
    type Err = EngineError;

    fn from_str(profile: &str) -> Result<Self, Self::Err> {
        let unknown = || EngineError::UnknownShaderProfile(profile.to_owned());
        let mut parts = profile.split('_');
        let stage = match parts.next() {
            Some("vs") => ShaderStage::Vertex,
            Some("ps") => ShaderStage::Pixel,
            _ => return Err(unknown()),
        };
        let major = parts.next().and_then(|p| p.parse().ok()).ok_or_else(unknown)?;
        let minor = parts.next().and_then(|p| p.parse().ok()).ok_or_else(unknown)?;
        if parts.next().is_some() {
            return Err(unknown());
        }
        Ok(Self { stage, major, minor })
    }
}

/// Compiled SPIR-V for one stage
#[derive(Debug, Clone)]
pub struct ShaderBlob {
    pub stage: ShaderStage,
    pub words: Vec<u32>,
}

/// Turns WGSL source files into SPIR-V blobs with a fixed argument set:
/// entry point `main`, embedded debug info, no optimisation. Matrices keep
/// WGSL's column-major layout, which is glam's storage order.
pub struct ShaderCompiler {
    validator: Validator,
}

impl ShaderCompiler {
    pub fn new() -> Self {
        let capabilities = Capabilities::PUSH_CONSTANT
            | Capabilities::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING;
        Self {
            validator: Validator::new(ValidationFlags::all(), capabilities),
        }
    }

    pub fn compile_shader(&mut self, path: impl AsRef<Path>, profile: &str) -> EngineResult<ShaderBlob> {
        let path = path.as_ref();
        log::info!("Begin CompileShader, path:{}, profile:{}", path.display(), profile);

        let profile = profile.parse::<ShaderProfile>()?;
        let source = std::fs::read_to_string(path).map_err(|e| {
            let e = EngineError::ShaderTool(format!("cannot read {}: {e}", path.display()));
            log::error!("{e}");
            e
        })?;

        let blob = self.compile_source(&source, path, profile).inspect_err(|e| log::error!("{e}"))?;
        log::info!("Compile Succeeded");
        Ok(blob)
    }

    /// Compiles `source`; `path` is only used for diagnostics and debug info
    pub fn compile_source(
        &mut self,
        source: &str,
        path: &Path,
        profile: ShaderProfile,
    ) -> EngineResult<ShaderBlob> {
        let path_str = path.to_string_lossy();
        let compile_error = |diagnostics: String| EngineError::ShaderCompile {
            path: PathBuf::from(path),
            diagnostics,
        };

        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| compile_error(e.emit_to_string_with_path(source, &*path_str)))?;
        let info = self
            .validator
            .validate(&module)
            .map_err(|e| compile_error(e.emit_to_string_with_path(source, &*path_str)))?;

        let options = spv::Options {
            lang_version: (1, 3),
            flags: spv::WriterFlags::DEBUG
                | spv::WriterFlags::ADJUST_COORDINATE_SPACE
                | spv::WriterFlags::LABEL_VARYINGS
                | spv::WriterFlags::CLAMP_FRAG_DEPTH,
            debug_info: Some(spv::DebugInfo {
                source_code: source,
                file_name: path,
                language: spv::SourceLanguage::WGSL,
            }),
            ..Default::default()
        };
        let pipeline_options = spv::PipelineOptions {
            shader_stage: profile.stage.naga_stage(),
            entry_point: ENTRY_POINT.to_owned(),
        };
        let words = spv::write_vec(&module, &info, &options, Some(&pipeline_options))
            .map_err(|e| match e {
                spv::Error::EntryPointNotFound => compile_error(format!(
                    "{path_str}: no {:?} entry point named `{ENTRY_POINT}`",
                    profile.stage,
                )),
                other => EngineError::ShaderTool(other.to_string()),
            })?;

        Ok(ShaderBlob {
            stage: profile.stage,
            words,
        })
    }
}

pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    pub stage: ShaderStage,
    device: Arc<ash::Device>,
}

impl ShaderModule {
    pub fn new(blob: &ShaderBlob, device: Arc<ash::Device>) -> EngineResult<Self> {
        let info = vk::ShaderModuleCreateInfo::default().code(&blob.words);
        let handle = unsafe { device.create_shader_module(&info, None)? };
        Ok(Self {
            handle,
            stage: blob.stage,
            device,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_PIXEL_SHADER: &str = r#"
struct Material {
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> material: Material;

@fragment
fn main(@location(0) texcoord: vec2<f32>) -> @location(0) vec4<f32> {
    return material.color * vec4<f32>(texcoord, 1.0, 1.0);
}
"#;

    fn profile(s: &str) -> ShaderProfile {
        s.parse().unwrap()
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!(
            profile("vs_6_0"),
            ShaderProfile { stage: ShaderStage::Vertex, major: 6, minor: 0 },
        );
        assert_eq!(profile("ps_6_0").stage, ShaderStage::Pixel);
        for bad in ["gs_6_0", "ps_6", "ps_x_0", "ps_6_0_1", ""] {
            assert!(matches!(
                bad.parse::<ShaderProfile>(),
                Err(EngineError::UnknownShaderProfile(_))
            ));
        }
    }

    #[test]
    fn test_valid_source_compiles_to_spirv() {
        let mut compiler = ShaderCompiler::new();
        let blob = compiler
            .compile_source(VALID_PIXEL_SHADER, Path::new("Object3D.PS.wgsl"), profile("ps_6_0"))
            .unwrap();
        // SPIR-V magic number
        assert_eq!(blob.words[0], 0x0723_0203);
        assert_eq!(blob.stage, ShaderStage::Pixel);
    }

    #[test]
    fn test_invalid_source_reports_diagnostics() {
        let mut compiler = ShaderCompiler::new();
        let result = compiler.compile_source(
            "@fragment fn main( -> @location(0) vec4<f32> { return 1.0 }",
            Path::new("Object3D.PS.wgsl"),
            profile("ps_6_0"),
        );
        match result {
            Err(EngineError::ShaderCompile { path, diagnostics }) => {
                assert_eq!(path, PathBuf::from("Object3D.PS.wgsl"));
                assert!(!diagnostics.trim().is_empty());
            }
            other => panic!("expected a compile error, got {other:?}"),
        }
    }

    #[test]
    fn test_type_error_is_a_compile_error() {
        let mut compiler = ShaderCompiler::new();
        let result = compiler.compile_source(
            "@fragment fn main() -> @location(0) vec4<f32> { return 1.0; }",
            Path::new("bad.wgsl"),
            profile("ps_6_0"),
        );
        assert!(matches!(result, Err(EngineError::ShaderCompile { .. })));
    }

    #[test]
    fn test_wrong_stage_entry_point() {
        let mut compiler = ShaderCompiler::new();
        let result = compiler.compile_source(
            VALID_PIXEL_SHADER,
            Path::new("Object3D.PS.wgsl"),
            profile("vs_6_0"),
        );
        assert!(matches!(result, Err(EngineError::ShaderCompile { .. })));
    }

    #[test]
    fn test_bundled_shaders_compile() {
        let mut compiler = ShaderCompiler::new();
        let vertex = compiler.compile_shader("shaders/Object3D.VS.wgsl", "vs_6_0").unwrap();
        let pixel = compiler.compile_shader("shaders/Object3D.PS.wgsl", "ps_6_0").unwrap();
        assert_eq!(vertex.stage, ShaderStage::Vertex);
        assert_eq!(pixel.stage, ShaderStage::Pixel);
    }

    #[test]
    fn test_missing_file_is_a_tool_error() {
        let mut compiler = ShaderCompiler::new();
        let result = compiler.compile_shader("no/such/shader.wgsl", "vs_6_0");
        assert!(matches!(result, Err(EngineError::ShaderTool(_))));
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Everything the engine can fail with.
///
/// Initialization failures are never retried; callers are expected to log
/// and terminate. Shader failures carry the compiler output so a harness can
/// assert on the failure mode.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("Memory allocation error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Descriptor allocation error: {0}")]
    DescriptorAllocation(#[from] gpu_descriptor::AllocationError),

    #[error("Window handle error: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ron::error::SpannedError),

    #[error("Copy into mapped memory failed: {0}")]
    Copy(#[from] presser::CopyError),

    #[error("Initialization failed: {0}")]
    Init(String),

    #[error("No suitable adapter found")]
    NoSuitableAdapter,

    #[error("Adapter supports Vulkan {major}.{minor}, none of the feature level candidates")]
    UnsupportedFeatureLevel { major: u32, minor: u32 },

    #[error("Shader compiler failed to run: {0}")]
    ShaderTool(String),

    #[error("Shader compilation failed for {}:\n{diagnostics}", path.display())]
    ShaderCompile { path: PathBuf, diagnostics: String },

    #[error("Unknown shader profile: {0}")]
    UnknownShaderProfile(String),

    #[error("Descriptor heap exhausted: requested {requested}, {available} free")]
    DescriptorHeapFull { requested: u32, available: u32 },

    #[error("Invalid frame state: {0}")]
    InvalidFrameState(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

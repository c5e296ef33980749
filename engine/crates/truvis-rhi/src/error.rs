use ash::vk;
use thiserror::Error;

/// 资源创建、设备初始化等非帧路径上的错误
#[derive(Debug, Error)]
pub enum RhiError {
    #[error("failed to load vulkan loader: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("no suitable physical device (requires vulkan 1.3 and a graphics+compute queue)")]
    NoSuitableDevice,

    #[error("out of device memory while creating {what}")]
    OutOfDeviceMemory { what: String },

    #[error("unsupported configuration: {0}")]
    Unsupported(String),

    #[error("invalid SPIR-V: {0}")]
    InvalidShader(#[from] std::io::Error),

    #[error("device lost")]
    DeviceLost,
}

/// begin_frame / end_frame 等帧操作的失败类型
///
/// 调用者根据类型决定是重建 swapchain 重试，还是放弃整个 RHI 实例
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameOpError {
    #[error("frame operation failed")]
    Error,

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("device lost")]
    DeviceLost,
}

pub type FrameOpResult = Result<(), FrameOpError>;

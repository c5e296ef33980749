use slotmap::new_key_type;

// 所有资源都由 RHI 实例持有，外部只拿到带代际的 key
new_key_type! {
    pub struct BufferHandle;
    pub struct TextureHandle;
    pub struct SamplerHandle;
    pub struct RenderBufferHandle;
    pub struct SrbHandle;
    pub struct GraphicsPipelineHandle;
    pub struct ComputePipelineHandle;
    pub struct RenderPassDescHandle;
    pub struct RenderTargetHandle;
    pub struct SwapchainHandle;
    pub struct CommandBufferHandle;
}

/// begin_pass 的目标：swapchain 的当前 image，或者一个离屏 render target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderTarget {
    Swapchain(SwapchainHandle),
    Texture(RenderTargetHandle),
}

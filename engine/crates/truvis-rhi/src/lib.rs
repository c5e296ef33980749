//! Truvis RHI
//!
//! 一套可移植的、retained-mode 的图形 API（buffer、texture、pipeline、render target、
//! command buffer），由后端映射到具体的图形 API。目前只有 Vulkan 后端。
//!
//! # 使用流程
//! 1. [`create_rhi`] 创建 RHI 实例，后端的选择只发生在这里
//! 2. `new_*` 创建资源对象，`create_*` 生成原生对象，可以多次重建
//! 3. `begin_frame` / `begin_offscreen_frame` 拿到 command buffer，录制 pass 和资源更新
//! 4. `end_frame` / `end_offscreen_frame` 提交
//!
//! RHI 实例只能在一个线程上使用，内部没有任何锁。

pub mod config;
pub mod desc;
pub mod error;
pub mod handles;
pub mod native;
pub mod resource_update;
pub mod stats;

mod backend;

use ash::vk;

use crate::config::RhiInitParams;
use crate::desc::*;
use crate::error::{FrameOpError, FrameOpResult, RhiError};
use crate::handles::*;
use crate::native::{NativeBuffer, NativeCommandBuffer, NativeDevice, NativeRenderPass, NativeTexture};
use crate::resource_update::ResourceUpdateBatch;
use crate::stats::RhiStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RhiBackend {
    Vulkan,
}

/// 创建 RHI 实例
pub fn create_rhi(backend: RhiBackend, params: RhiInitParams) -> Result<Box<dyn Rhi>, RhiError> {
    let params = params.normalized();
    match backend {
        RhiBackend::Vulkan => Ok(Box::new(backend::vulkan::VulkanRhi::new(params)?)),
    }
}

/// 后端需要实现的全部接口
///
/// 资源通过 handle 引用，对已经 release 的 handle 调用任何方法都属于使用错误（panic）。
pub trait Rhi {
    fn backend(&self) -> RhiBackend;
    fn frames_in_flight(&self) -> usize;
    fn current_frame_slot(&self) -> usize;
    fn is_device_lost(&self) -> bool;
    fn is_recording_frame(&self) -> bool;
    fn native_device(&self) -> NativeDevice;

    // buffer
    fn new_buffer(&mut self, desc: BufferDesc) -> BufferHandle;
    /// 修改尺寸，在下一次 create_buffer 时生效
    fn set_buffer_size(&mut self, buffer: BufferHandle, size: u32);
    fn create_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn release_buffer(&mut self, buffer: BufferHandle);
    fn native_buffer(&self, buffer: BufferHandle) -> NativeBuffer;

    // texture
    fn new_texture(&mut self, desc: TextureDesc) -> TextureHandle;
    fn set_texture_size(&mut self, texture: TextureHandle, width: u32, height: u32);
    fn create_texture(&mut self, texture: TextureHandle) -> Result<(), RhiError>;
    fn destroy_texture(&mut self, texture: TextureHandle);
    fn release_texture(&mut self, texture: TextureHandle);
    fn native_texture(&self, texture: TextureHandle) -> NativeTexture;
    /// 外部代码在 RHI 之外改变了 image layout 时，用这个接口同步
    fn set_native_layout(&mut self, texture: TextureHandle, layout: vk::ImageLayout);

    // sampler
    fn new_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle;
    fn create_sampler(&mut self, sampler: SamplerHandle) -> Result<(), RhiError>;
    fn destroy_sampler(&mut self, sampler: SamplerHandle);
    fn release_sampler(&mut self, sampler: SamplerHandle);

    // render buffer
    fn new_render_buffer(&mut self, desc: RenderBufferDesc) -> RenderBufferHandle;
    fn set_render_buffer_size(&mut self, render_buffer: RenderBufferHandle, width: u32, height: u32);
    fn create_render_buffer(&mut self, render_buffer: RenderBufferHandle) -> Result<(), RhiError>;
    fn destroy_render_buffer(&mut self, render_buffer: RenderBufferHandle);
    fn release_render_buffer(&mut self, render_buffer: RenderBufferHandle);

    // shader resource bindings
    fn new_shader_resource_bindings(&mut self, bindings: Vec<ShaderResourceBinding>) -> SrbHandle;
    fn set_shader_resource_bindings(&mut self, srb: SrbHandle, bindings: Vec<ShaderResourceBinding>);
    fn create_srb(&mut self, srb: SrbHandle) -> Result<(), RhiError>;
    fn destroy_srb(&mut self, srb: SrbHandle);
    fn release_srb(&mut self, srb: SrbHandle);

    // pipeline
    fn new_graphics_pipeline(&mut self, desc: GraphicsPipelineDesc) -> GraphicsPipelineHandle;
    fn create_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<(), RhiError>;
    fn destroy_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle);
    fn release_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle);
    fn new_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> ComputePipelineHandle;
    fn create_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<(), RhiError>;
    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);
    fn release_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    // render target
    fn new_texture_render_target(&mut self, desc: TextureRenderTargetDesc) -> RenderTargetHandle;
    /// 根据 render target 当前的 attachment 创建一个兼容的 render pass
    ///
    /// texture render target 要求 attachment 已经 create；swapchain 要求 surface 格式已确定
    fn new_compatible_render_pass_descriptor(&mut self, target: RenderTarget) -> Result<RenderPassDescHandle, RhiError>;
    fn set_render_pass_descriptor(&mut self, target: RenderTarget, render_pass: RenderPassDescHandle);
    fn release_render_pass_descriptor(&mut self, render_pass: RenderPassDescHandle);
    fn native_render_pass(&self, render_pass: RenderPassDescHandle) -> NativeRenderPass;
    fn create_texture_render_target(&mut self, target: RenderTargetHandle) -> Result<(), RhiError>;
    fn destroy_texture_render_target(&mut self, target: RenderTargetHandle);
    fn release_texture_render_target(&mut self, target: RenderTargetHandle);

    // swapchain
    /// 立即创建 surface 并选择格式，原生 swapchain 在 create_or_resize_swapchain 时创建
    fn new_swapchain(&mut self, desc: SwapchainDesc) -> Result<SwapchainHandle, RhiError>;
    /// 返回 Ok(false) 表示当前 surface 尺寸为 0（例如窗口最小化），此时不能开始帧
    fn create_or_resize_swapchain(&mut self, swapchain: SwapchainHandle, width: u32, height: u32)
    -> Result<bool, RhiError>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);
    fn release_swapchain(&mut self, swapchain: SwapchainHandle);
    fn swapchain_pixel_size(&self, swapchain: SwapchainHandle) -> (u32, u32);

    // frame
    fn begin_frame(&mut self, swapchain: SwapchainHandle) -> Result<CommandBufferHandle, FrameOpError>;
    fn end_frame(&mut self, swapchain: SwapchainHandle, flags: EndFrameFlags) -> FrameOpResult;
    fn begin_offscreen_frame(&mut self) -> Result<CommandBufferHandle, FrameOpError>;
    fn end_offscreen_frame(&mut self, flags: EndFrameFlags) -> FrameOpResult;
    /// 提交当前帧已经录制的内容并等待 GPU 空闲，之后可以继续在同一帧录制
    fn finish(&mut self) -> FrameOpResult;

    // command buffer
    fn resource_update(&mut self, cb: CommandBufferHandle, batch: ResourceUpdateBatch);
    fn begin_pass(
        &mut self,
        cb: CommandBufferHandle,
        target: RenderTarget,
        clear: ClearValues,
        batch: Option<ResourceUpdateBatch>,
        flags: BeginPassFlags,
    );
    fn end_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>);
    fn begin_compute_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>, flags: BeginPassFlags);
    fn end_compute_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>);
    fn set_graphics_pipeline(&mut self, cb: CommandBufferHandle, pipeline: GraphicsPipelineHandle);
    fn set_compute_pipeline(&mut self, cb: CommandBufferHandle, pipeline: ComputePipelineHandle);
    /// srb 为 None 时使用当前 pipeline 创建时的 srb；dynamic_offsets 为 (binding, offset)
    fn set_shader_resources(&mut self, cb: CommandBufferHandle, srb: Option<SrbHandle>, dynamic_offsets: &[(u32, u32)]);
    fn set_vertex_input(
        &mut self,
        cb: CommandBufferHandle,
        start_binding: u32,
        bindings: &[(BufferHandle, u32)],
        index: Option<(BufferHandle, u32, IndexFormat)>,
    );
    fn set_viewport(&mut self, cb: CommandBufferHandle, viewport: Viewport);
    fn set_scissor(&mut self, cb: CommandBufferHandle, scissor: Scissor);
    fn set_blend_constants(&mut self, cb: CommandBufferHandle, constants: [f32; 4]);
    fn set_stencil_ref(&mut self, cb: CommandBufferHandle, reference: u32);
    fn draw(&mut self, cb: CommandBufferHandle, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        cb: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn dispatch(&mut self, cb: CommandBufferHandle, x: u32, y: u32, z: u32);
    fn debug_mark_begin(&mut self, cb: CommandBufferHandle, name: &str);
    fn debug_mark_end(&mut self, cb: CommandBufferHandle);
    fn debug_mark_msg(&mut self, cb: CommandBufferHandle, msg: &str);
    fn begin_external(&mut self, cb: CommandBufferHandle);
    fn end_external(&mut self, cb: CommandBufferHandle);
    fn native_command_buffer(&self, cb: CommandBufferHandle) -> NativeCommandBuffer;

    // misc
    /// 序列化的 pipeline cache，带有设备校验信息的头部
    fn pipeline_cache_data(&self) -> Vec<u8>;
    /// 只有头部和当前设备完全匹配时才会采用，否则丢弃并使用空的 cache
    fn set_pipeline_cache_data(&mut self, data: &[u8]);
    fn statistics(&self) -> RhiStats;
}

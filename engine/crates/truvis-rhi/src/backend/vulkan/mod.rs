//! Vulkan 后端
//!
//! 所有资源存放在 `VulkanRhi` 的 slotmap 中，各个子模块以 `impl VulkanRhi` 的形式实现
//! 各自负责的那部分接口，本文件只负责初始化、销毁以及把 [`Rhi`] trait 转发到这些实现上。

mod barrier;
mod batch;
mod buffer;
mod command_buffer;
mod command_list;
mod context;
mod convert;
mod debug_utils;
mod descriptor_pool;
mod encoder;
mod frame;
mod pipeline;
mod pipeline_cache;
mod readback;
mod release;
mod release_queue;
mod render_target;
mod srb;
mod swapchain;
mod texture;
mod tracker;

use std::time::Duration;

use ash::vk;
use slotmap::SlotMap;

use crate::backend::vulkan::buffer::VulkanBuffer;
use crate::backend::vulkan::command_buffer::VulkanCommandBuffer;
use crate::backend::vulkan::context::VulkanContext;
use crate::backend::vulkan::descriptor_pool::DescriptorPoolManager;
use crate::backend::vulkan::frame::{SlotCommandPool, SlotFenceTracker};
use crate::backend::vulkan::pipeline::{VulkanComputePipeline, VulkanGraphicsPipeline};
use crate::backend::vulkan::readback::ActiveReadback;
use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::release_queue::DeferredQueue;
use crate::backend::vulkan::render_target::{VulkanRenderPassDesc, VulkanTextureRenderTarget};
use crate::backend::vulkan::srb::VulkanSrb;
use crate::backend::vulkan::swapchain::VulkanSwapchain;
use crate::backend::vulkan::texture::{VulkanRenderBuffer, VulkanSampler, VulkanTexture};
use crate::config::RhiInitParams;
use crate::desc::*;
use crate::error::{FrameOpError, FrameOpResult, RhiError};
use crate::handles::*;
use crate::native::{NativeBuffer, NativeCommandBuffer, NativeDevice, NativeRenderPass, NativeTexture};
use crate::resource_update::ResourceUpdateBatch;
use crate::stats::RhiStats;
use crate::{Rhi, RhiBackend};

pub(crate) struct VulkanConstants;

impl VulkanConstants {
    /// 每个 descriptor pool 可以分配的 set 数量
    pub const DESCRIPTOR_SETS_PER_POOL: u32 = 128;
    pub const DESCRIPTOR_POOL_SIZES: &'static [(vk::DescriptorType, u32)] = &[
        (vk::DescriptorType::UNIFORM_BUFFER, 256),
        (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 128),
        (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 256),
        (vk::DescriptorType::STORAGE_BUFFER, 128),
        (vk::DescriptorType::STORAGE_IMAGE, 64),
    ];
    pub const MAX_VERTEX_INPUT_BINDINGS: usize = 16;
    /// 纹理上传时 staging buffer 中每个 subresource 的最小对齐
    pub const STAGING_ALIGNMENT: u32 = 4;
}

pub(crate) struct VulkanRhi {
    ctx: VulkanContext,

    // frame 调度
    frames_in_flight: usize,
    /// 当前帧（或者最近一帧）所在的 slot
    current_frame_slot: usize,
    slot_fences: Vec<vk::Fence>,
    fence_tracker: SlotFenceTracker,
    command_pools: Vec<SlotCommandPool>,
    in_frame: bool,
    device_lost: bool,
    current_swapchain: Option<SwapchainHandle>,
    offscreen_active: bool,
    offscreen_cb: CommandBufferHandle,

    descriptor_pools: DescriptorPoolManager,
    pipeline_cache: vk::PipelineCache,
    release_queue: DeferredQueue<ReleaseKind>,
    active_readbacks: DeferredQueue<ActiveReadback>,

    next_resource_id: u64,
    pipeline_creation_time: Duration,

    buffers: SlotMap<BufferHandle, VulkanBuffer>,
    textures: SlotMap<TextureHandle, VulkanTexture>,
    samplers: SlotMap<SamplerHandle, VulkanSampler>,
    render_buffers: SlotMap<RenderBufferHandle, VulkanRenderBuffer>,
    srbs: SlotMap<SrbHandle, VulkanSrb>,
    graphics_pipelines: SlotMap<GraphicsPipelineHandle, VulkanGraphicsPipeline>,
    compute_pipelines: SlotMap<ComputePipelineHandle, VulkanComputePipeline>,
    render_pass_descs: SlotMap<RenderPassDescHandle, VulkanRenderPassDesc>,
    render_targets: SlotMap<RenderTargetHandle, VulkanTextureRenderTarget>,
    swapchains: SlotMap<SwapchainHandle, VulkanSwapchain>,
    command_buffers: SlotMap<CommandBufferHandle, VulkanCommandBuffer>,

    /// 放在最后，销毁过程中的 span 仍然有效
    _tracy: tracy_client::Client,
}

// init & destroy
impl VulkanRhi {
    pub fn new(params: RhiInitParams) -> Result<Self, RhiError> {
        let tracy = tracy_client::Client::start();
        let _span = tracy_client::span!("VulkanRhi::new");

        let ctx = VulkanContext::new(&params)?;
        let frames_in_flight = params.frames_in_flight;
        let mut command_buffers = SlotMap::with_key();
        let offscreen_cb = command_buffers.insert(VulkanCommandBuffer::new());

        // 先构造出实例，之后的初始化失败时由 Drop 负责清理
        let mut rhi = Self {
            ctx,
            frames_in_flight,
            current_frame_slot: 0,
            slot_fences: Vec::with_capacity(frames_in_flight),
            fence_tracker: SlotFenceTracker::new(frames_in_flight),
            command_pools: Vec::with_capacity(frames_in_flight),
            in_frame: false,
            device_lost: false,
            current_swapchain: None,
            offscreen_active: false,
            offscreen_cb,
            descriptor_pools: DescriptorPoolManager::new(),
            pipeline_cache: vk::PipelineCache::null(),
            release_queue: DeferredQueue::new(),
            active_readbacks: DeferredQueue::new(),
            next_resource_id: 1,
            pipeline_creation_time: Duration::ZERO,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            render_buffers: SlotMap::with_key(),
            srbs: SlotMap::with_key(),
            graphics_pipelines: SlotMap::with_key(),
            compute_pipelines: SlotMap::with_key(),
            render_pass_descs: SlotMap::with_key(),
            render_targets: SlotMap::with_key(),
            swapchains: SlotMap::with_key(),
            command_buffers,
            _tracy: tracy,
        };
        rhi.init_frame_resources()?;

        log::info!(
            "vulkan rhi initialized on '{}', frames in flight: {}",
            rhi.ctx.device_name(),
            rhi.frames_in_flight
        );
        Ok(rhi)
    }

    fn init_frame_resources(&mut self) -> Result<(), RhiError> {
        for slot in 0..self.frames_in_flight {
            let fence = self.ctx.create_fence(false, &format!("frame-slot-{slot}-fence"))?;
            self.slot_fences.push(fence);
            let pool = SlotCommandPool::new(&self.ctx, slot)?;
            self.command_pools.push(pool);
        }
        self.pipeline_cache = Self::create_pipeline_cache(&self.ctx.device, &[])?;
        Ok(())
    }

    /// 释放所有仍然存活的资源对象，GPU 必须已经空闲
    fn release_all_resources(&mut self) {
        for handle in self.swapchains.keys().collect::<Vec<_>>() {
            self.release_swapchain(handle);
        }
        for handle in self.render_targets.keys().collect::<Vec<_>>() {
            self.release_texture_render_target(handle);
        }
        for handle in self.render_pass_descs.keys().collect::<Vec<_>>() {
            self.release_render_pass_descriptor(handle);
        }
        for handle in self.graphics_pipelines.keys().collect::<Vec<_>>() {
            self.release_graphics_pipeline(handle);
        }
        for handle in self.compute_pipelines.keys().collect::<Vec<_>>() {
            self.release_compute_pipeline(handle);
        }
        for handle in self.srbs.keys().collect::<Vec<_>>() {
            self.release_srb(handle);
        }
        for handle in self.render_buffers.keys().collect::<Vec<_>>() {
            self.release_render_buffer(handle);
        }
        for handle in self.samplers.keys().collect::<Vec<_>>() {
            self.release_sampler(handle);
        }
        for handle in self.textures.keys().collect::<Vec<_>>() {
            self.release_texture(handle);
        }
        for handle in self.buffers.keys().collect::<Vec<_>>() {
            self.release_buffer(handle);
        }
    }
}

impl Drop for VulkanRhi {
    fn drop(&mut self) {
        let _span = tracy_client::span!("VulkanRhi::drop");
        if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
            log::error!("device_wait_idle failed during shutdown: {:?}", e);
        }
        self.in_frame = false;
        self.offscreen_active = false;
        self.current_swapchain = None;

        self.release_all_resources();
        if let Err(e) = self.wait_all_slots() {
            log::error!("failed to wait frame slot fences during shutdown: {:?}", e);
        }
        self.execute_deferred_releases(true);
        self.finish_active_readbacks(true);

        let device = &self.ctx.device;
        self.descriptor_pools.destroy(device);
        unsafe {
            device.destroy_pipeline_cache(self.pipeline_cache, None);
            for fence in self.slot_fences.drain(..) {
                device.destroy_fence(fence, None);
            }
        }
        for pool in self.command_pools.drain(..) {
            pool.destroy(device);
        }
        self.ctx.destroy();
        log::info!("vulkan rhi destroyed");
    }
}

// tools
impl VulkanRhi {
    /// 资源对象的全局唯一 id，从 1 开始单调递增
    #[inline]
    pub(super) fn next_resource_id(&mut self) -> u64 {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        id
    }

    /// 资源创建失败时的统一错误转换
    pub(super) fn creation_error(&self, what: &str, e: vk::Result) -> RhiError {
        match e {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                log::warn!("out of memory while creating {}: {:?}", what, e);
                log::warn!("allocator: {}", self.statistics());
                RhiError::OutOfDeviceMemory { what: what.to_string() }
            }
            vk::Result::ERROR_DEVICE_LOST => {
                log::error!("device lost while creating {}", what);
                RhiError::DeviceLost
            }
            e => {
                log::error!("failed to create {}: {:?}", what, e);
                RhiError::Vulkan(e)
            }
        }
    }

    pub(super) fn statistics(&self) -> RhiStats {
        let mut stats = RhiStats {
            total_pipeline_creation_time: self.pipeline_creation_time,
            ..Default::default()
        };
        if let Some(vma) = self.ctx.allocator_statistics() {
            stats.block_count = vma.blockCount;
            stats.allocation_count = vma.allocationCount;
            stats.used_bytes = vma.allocationBytes;
            stats.unused_bytes = vma.blockBytes.saturating_sub(vma.allocationBytes);
        }
        stats
    }
}

impl Rhi for VulkanRhi {
    fn backend(&self) -> RhiBackend {
        RhiBackend::Vulkan
    }

    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn current_frame_slot(&self) -> usize {
        self.current_frame_slot
    }

    fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    fn is_recording_frame(&self) -> bool {
        self.in_frame
    }

    fn native_device(&self) -> NativeDevice {
        NativeDevice {
            instance: self.ctx.instance.handle(),
            physical_device: self.ctx.physical_device,
            device: self.ctx.device.handle(),
            queue_family_index: self.ctx.queue_family_index,
            queue: self.ctx.queue,
        }
    }

    // buffer
    fn new_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        VulkanRhi::new_buffer(self, desc)
    }
    fn set_buffer_size(&mut self, buffer: BufferHandle, size: u32) {
        self.buffers[buffer].desc.size = size;
    }
    fn create_buffer(&mut self, buffer: BufferHandle) -> Result<(), RhiError> {
        VulkanRhi::create_buffer(self, buffer)
    }
    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        VulkanRhi::destroy_buffer(self, buffer)
    }
    fn release_buffer(&mut self, buffer: BufferHandle) {
        VulkanRhi::release_buffer(self, buffer)
    }
    fn native_buffer(&self, buffer: BufferHandle) -> NativeBuffer {
        VulkanRhi::native_buffer(self, buffer)
    }

    // texture
    fn new_texture(&mut self, desc: TextureDesc) -> TextureHandle {
        VulkanRhi::new_texture(self, desc)
    }
    fn set_texture_size(&mut self, texture: TextureHandle, width: u32, height: u32) {
        let desc = &mut self.textures[texture].desc;
        desc.width = width;
        desc.height = height;
    }
    fn create_texture(&mut self, texture: TextureHandle) -> Result<(), RhiError> {
        VulkanRhi::create_texture(self, texture)
    }
    fn destroy_texture(&mut self, texture: TextureHandle) {
        VulkanRhi::destroy_texture(self, texture)
    }
    fn release_texture(&mut self, texture: TextureHandle) {
        VulkanRhi::release_texture(self, texture)
    }
    fn native_texture(&self, texture: TextureHandle) -> NativeTexture {
        VulkanRhi::native_texture(self, texture)
    }
    fn set_native_layout(&mut self, texture: TextureHandle, layout: vk::ImageLayout) {
        VulkanRhi::set_native_layout(self, texture, layout)
    }

    // sampler
    fn new_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle {
        VulkanRhi::new_sampler(self, desc)
    }
    fn create_sampler(&mut self, sampler: SamplerHandle) -> Result<(), RhiError> {
        VulkanRhi::create_sampler(self, sampler)
    }
    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        VulkanRhi::destroy_sampler(self, sampler)
    }
    fn release_sampler(&mut self, sampler: SamplerHandle) {
        VulkanRhi::release_sampler(self, sampler)
    }

    // render buffer
    fn new_render_buffer(&mut self, desc: RenderBufferDesc) -> RenderBufferHandle {
        VulkanRhi::new_render_buffer(self, desc)
    }
    fn set_render_buffer_size(&mut self, render_buffer: RenderBufferHandle, width: u32, height: u32) {
        let desc = &mut self.render_buffers[render_buffer].desc;
        desc.width = width;
        desc.height = height;
    }
    fn create_render_buffer(&mut self, render_buffer: RenderBufferHandle) -> Result<(), RhiError> {
        VulkanRhi::create_render_buffer(self, render_buffer)
    }
    fn destroy_render_buffer(&mut self, render_buffer: RenderBufferHandle) {
        VulkanRhi::destroy_render_buffer(self, render_buffer)
    }
    fn release_render_buffer(&mut self, render_buffer: RenderBufferHandle) {
        VulkanRhi::release_render_buffer(self, render_buffer)
    }

    // shader resource bindings
    fn new_shader_resource_bindings(&mut self, bindings: Vec<ShaderResourceBinding>) -> SrbHandle {
        VulkanRhi::new_shader_resource_bindings(self, bindings)
    }
    fn set_shader_resource_bindings(&mut self, srb: SrbHandle, bindings: Vec<ShaderResourceBinding>) {
        VulkanRhi::set_shader_resource_bindings(self, srb, bindings)
    }
    fn create_srb(&mut self, srb: SrbHandle) -> Result<(), RhiError> {
        VulkanRhi::create_srb(self, srb)
    }
    fn destroy_srb(&mut self, srb: SrbHandle) {
        VulkanRhi::destroy_srb(self, srb)
    }
    fn release_srb(&mut self, srb: SrbHandle) {
        VulkanRhi::release_srb(self, srb)
    }

    // pipeline
    fn new_graphics_pipeline(&mut self, desc: GraphicsPipelineDesc) -> GraphicsPipelineHandle {
        VulkanRhi::new_graphics_pipeline(self, desc)
    }
    fn create_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) -> Result<(), RhiError> {
        VulkanRhi::create_graphics_pipeline(self, pipeline)
    }
    fn destroy_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) {
        VulkanRhi::destroy_graphics_pipeline(self, pipeline)
    }
    fn release_graphics_pipeline(&mut self, pipeline: GraphicsPipelineHandle) {
        VulkanRhi::release_graphics_pipeline(self, pipeline)
    }
    fn new_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> ComputePipelineHandle {
        VulkanRhi::new_compute_pipeline(self, desc)
    }
    fn create_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<(), RhiError> {
        VulkanRhi::create_compute_pipeline(self, pipeline)
    }
    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        VulkanRhi::destroy_compute_pipeline(self, pipeline)
    }
    fn release_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        VulkanRhi::release_compute_pipeline(self, pipeline)
    }

    // render target
    fn new_texture_render_target(&mut self, desc: TextureRenderTargetDesc) -> RenderTargetHandle {
        VulkanRhi::new_texture_render_target(self, desc)
    }
    fn new_compatible_render_pass_descriptor(&mut self, target: RenderTarget) -> Result<RenderPassDescHandle, RhiError> {
        VulkanRhi::new_compatible_render_pass_descriptor(self, target)
    }
    fn set_render_pass_descriptor(&mut self, target: RenderTarget, render_pass: RenderPassDescHandle) {
        VulkanRhi::set_render_pass_descriptor(self, target, render_pass)
    }
    fn release_render_pass_descriptor(&mut self, render_pass: RenderPassDescHandle) {
        VulkanRhi::release_render_pass_descriptor(self, render_pass)
    }
    fn native_render_pass(&self, render_pass: RenderPassDescHandle) -> NativeRenderPass {
        VulkanRhi::native_render_pass(self, render_pass)
    }
    fn create_texture_render_target(&mut self, target: RenderTargetHandle) -> Result<(), RhiError> {
        VulkanRhi::create_texture_render_target(self, target)
    }
    fn destroy_texture_render_target(&mut self, target: RenderTargetHandle) {
        VulkanRhi::destroy_texture_render_target(self, target)
    }
    fn release_texture_render_target(&mut self, target: RenderTargetHandle) {
        VulkanRhi::release_texture_render_target(self, target)
    }

    // swapchain
    fn new_swapchain(&mut self, desc: SwapchainDesc) -> Result<SwapchainHandle, RhiError> {
        VulkanRhi::new_swapchain(self, desc)
    }
    fn create_or_resize_swapchain(&mut self, swapchain: SwapchainHandle, width: u32, height: u32) -> Result<bool, RhiError> {
        VulkanRhi::create_or_resize_swapchain(self, swapchain, width, height)
    }
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        VulkanRhi::destroy_swapchain(self, swapchain)
    }
    fn release_swapchain(&mut self, swapchain: SwapchainHandle) {
        VulkanRhi::release_swapchain(self, swapchain)
    }
    fn swapchain_pixel_size(&self, swapchain: SwapchainHandle) -> (u32, u32) {
        VulkanRhi::swapchain_pixel_size(self, swapchain)
    }

    // frame
    fn begin_frame(&mut self, swapchain: SwapchainHandle) -> Result<CommandBufferHandle, FrameOpError> {
        VulkanRhi::begin_frame(self, swapchain)
    }
    fn end_frame(&mut self, swapchain: SwapchainHandle, flags: EndFrameFlags) -> FrameOpResult {
        VulkanRhi::end_frame(self, swapchain, flags)
    }
    fn begin_offscreen_frame(&mut self) -> Result<CommandBufferHandle, FrameOpError> {
        VulkanRhi::begin_offscreen_frame(self)
    }
    fn end_offscreen_frame(&mut self, flags: EndFrameFlags) -> FrameOpResult {
        VulkanRhi::end_offscreen_frame(self, flags)
    }
    fn finish(&mut self) -> FrameOpResult {
        VulkanRhi::finish(self)
    }

    // command buffer
    fn resource_update(&mut self, cb: CommandBufferHandle, batch: ResourceUpdateBatch) {
        VulkanRhi::resource_update(self, cb, batch)
    }
    fn begin_pass(
        &mut self,
        cb: CommandBufferHandle,
        target: RenderTarget,
        clear: ClearValues,
        batch: Option<ResourceUpdateBatch>,
        flags: BeginPassFlags,
    ) {
        VulkanRhi::begin_pass(self, cb, target, clear, batch, flags)
    }
    fn end_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>) {
        VulkanRhi::end_pass(self, cb, batch)
    }
    fn begin_compute_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>, flags: BeginPassFlags) {
        VulkanRhi::begin_compute_pass(self, cb, batch, flags)
    }
    fn end_compute_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>) {
        VulkanRhi::end_compute_pass(self, cb, batch)
    }
    fn set_graphics_pipeline(&mut self, cb: CommandBufferHandle, pipeline: GraphicsPipelineHandle) {
        VulkanRhi::set_graphics_pipeline(self, cb, pipeline)
    }
    fn set_compute_pipeline(&mut self, cb: CommandBufferHandle, pipeline: ComputePipelineHandle) {
        VulkanRhi::set_compute_pipeline(self, cb, pipeline)
    }
    fn set_shader_resources(&mut self, cb: CommandBufferHandle, srb: Option<SrbHandle>, dynamic_offsets: &[(u32, u32)]) {
        VulkanRhi::set_shader_resources(self, cb, srb, dynamic_offsets)
    }
    fn set_vertex_input(
        &mut self,
        cb: CommandBufferHandle,
        start_binding: u32,
        bindings: &[(BufferHandle, u32)],
        index: Option<(BufferHandle, u32, IndexFormat)>,
    ) {
        VulkanRhi::set_vertex_input(self, cb, start_binding, bindings, index)
    }
    fn set_viewport(&mut self, cb: CommandBufferHandle, viewport: Viewport) {
        VulkanRhi::set_viewport(self, cb, viewport)
    }
    fn set_scissor(&mut self, cb: CommandBufferHandle, scissor: Scissor) {
        VulkanRhi::set_scissor(self, cb, scissor)
    }
    fn set_blend_constants(&mut self, cb: CommandBufferHandle, constants: [f32; 4]) {
        VulkanRhi::set_blend_constants(self, cb, constants)
    }
    fn set_stencil_ref(&mut self, cb: CommandBufferHandle, reference: u32) {
        VulkanRhi::set_stencil_ref(self, cb, reference)
    }
    fn draw(&mut self, cb: CommandBufferHandle, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        VulkanRhi::draw(self, cb, vertex_count, instance_count, first_vertex, first_instance)
    }
    fn draw_indexed(
        &mut self,
        cb: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        VulkanRhi::draw_indexed(self, cb, index_count, instance_count, first_index, vertex_offset, first_instance)
    }
    fn dispatch(&mut self, cb: CommandBufferHandle, x: u32, y: u32, z: u32) {
        VulkanRhi::dispatch(self, cb, x, y, z)
    }
    fn debug_mark_begin(&mut self, cb: CommandBufferHandle, name: &str) {
        VulkanRhi::debug_mark_begin(self, cb, name)
    }
    fn debug_mark_end(&mut self, cb: CommandBufferHandle) {
        VulkanRhi::debug_mark_end(self, cb)
    }
    fn debug_mark_msg(&mut self, cb: CommandBufferHandle, msg: &str) {
        VulkanRhi::debug_mark_msg(self, cb, msg)
    }
    fn begin_external(&mut self, cb: CommandBufferHandle) {
        VulkanRhi::begin_external(self, cb)
    }
    fn end_external(&mut self, cb: CommandBufferHandle) {
        VulkanRhi::end_external(self, cb)
    }
    fn native_command_buffer(&self, cb: CommandBufferHandle) -> NativeCommandBuffer {
        VulkanRhi::native_command_buffer(self, cb)
    }

    // misc
    fn pipeline_cache_data(&self) -> Vec<u8> {
        VulkanRhi::pipeline_cache_data(self)
    }
    fn set_pipeline_cache_data(&mut self, data: &[u8]) {
        VulkanRhi::set_pipeline_cache_data(self, data)
    }
    fn statistics(&self) -> RhiStats {
        VulkanRhi::statistics(self)
    }
}

//! command buffer 的录制
//!
//! 默认情况下命令先进入延迟列表（见 [`command_list`](super::command_list)），提交前回放到 primary。
//! 以 `EXTERNAL_CONTENT` 开始的 pass 改为立即写入 secondary command buffer，
//! 这样 begin_external / end_external 之间的原生命令可以插在正确的位置。

use ash::vk;
use indexmap::IndexMap;

use crate::backend::vulkan::barrier::{BufferBarrier, BufferUsageState, ImageBarrier, TextureUsageState};
use crate::backend::vulkan::command_list::{Command, CommandSink, replay};
use crate::backend::vulkan::encoder::NativeEncoder;
use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::swapchain::SwapchainImageUse;
use crate::backend::vulkan::tracker::{PassResourceTracker, tracked_register_buffer, tracked_register_texture};
use crate::backend::vulkan::{VulkanConstants, VulkanRhi, convert};
use crate::desc::{
    AttachmentSource, BeginPassFlags, BindingResource, ClearValues, GraphicsPipelineFlags, IndexFormat, Scissor,
    StorageAccess, Viewport,
};
use crate::handles::{
    BufferHandle, CommandBufferHandle, ComputePipelineHandle, GraphicsPipelineHandle, RenderTarget, SrbHandle,
};
use crate::error::RhiError;
use crate::native::NativeCommandBuffer;
use crate::resource_update::ResourceUpdateBatch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PassKind {
    None,
    Render,
    Compute,
}

/// 已经绑定的状态，避免重复录制相同的绑定命令
#[derive(Default)]
pub(crate) struct CachedState {
    pub graphics_pipeline: Option<(GraphicsPipelineHandle, u32)>,
    pub compute_pipeline: Option<(ComputePipelineHandle, u32)>,
    pub srb: Option<(SrbHandle, u32)>,
    pub vertex_buffers: Vec<Option<(vk::Buffer, u64)>>,
    pub index_buffer: Option<(vk::Buffer, u64, vk::IndexType)>,
}

impl CachedState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// secondary command buffer 继承的 render pass
#[derive(Clone, Copy, Debug)]
pub(crate) struct ActiveRenderPass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

const ACCESS_LOAD: u8 = 1;
const ACCESS_STORE: u8 = 2;

fn access_bits(access: StorageAccess) -> u8 {
    match access {
        StorageAccess::Load => ACCESS_LOAD,
        StorageAccess::Store => ACCESS_STORE,
        StorageAccess::LoadStore => ACCESS_LOAD | ACCESS_STORE,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ComputeResource {
    Buffer(vk::Buffer),
    Image { image: vk::Image, aspect: vk::ImageAspectFlags },
}

#[derive(Clone, Copy, Debug)]
struct WrittenEntry {
    resource: ComputeResource,
    /// 当前 dispatch 中的访问
    access: u8,
    /// 在当前 dispatch 中第一次被写
    new_in_dispatch: bool,
}

/// compute pass 内 dispatch 之间的写后读 / 写后写依赖
///
/// 之前的 dispatch 写过的资源，再次被访问时需要一个 barrier；
/// 之后只被读取的资源从记录中移除（它的写已经被这次 barrier 覆盖）。
#[derive(Default, Debug)]
pub(crate) struct ComputeWriteTracker {
    written: IndexMap<u64, WrittenEntry>,
}

impl ComputeWriteTracker {
    pub fn begin_dispatch(&mut self) {
        for entry in self.written.values_mut() {
            entry.access = 0;
            entry.new_in_dispatch = false;
        }
    }

    pub fn access(&mut self, id: u64, resource: ComputeResource, access: StorageAccess) {
        let bits = access_bits(access);
        if let Some(entry) = self.written.get_mut(&id) {
            entry.access |= bits;
        } else if access.writes() {
            self.written.insert(
                id,
                WrittenEntry {
                    resource,
                    access: bits,
                    new_in_dispatch: true,
                },
            );
        }
    }

    /// 返回这次 dispatch 之前需要 barrier 的资源
    pub fn finish_dispatch(&mut self) -> Vec<ComputeResource> {
        let mut barriers = Vec::new();
        self.written.retain(|_, entry| {
            if entry.access != 0 && !entry.new_in_dispatch {
                barriers.push(entry.resource);
            }
            entry.access != ACCESS_LOAD
        });
        barriers
    }

    pub fn clear(&mut self) {
        self.written.clear();
    }

    pub fn len(&self) -> usize {
        self.written.len()
    }
}

/// 一条命令应该写到哪里
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RecordTarget {
    /// 延迟列表，提交前回放到 primary
    Deferred,
    Secondary(vk::CommandBuffer),
    /// pass 的内容只能来自 secondary，但 secondary 不可用
    Dropped,
}

pub(crate) struct VulkanCommandBuffer {
    pub primary: vk::CommandBuffer,
    pub commands: Vec<Command>,
    pub trackers: Vec<PassResourceTracker>,
    pub pass: PassKind,
    pub render_pass: Option<ActiveRenderPass>,
    /// 当前 pass 以 EXTERNAL_CONTENT 开始
    pub uses_secondary: bool,
    pub active_secondary: Option<vk::CommandBuffer>,
    /// 当前 pass 的 secondary 分配或 begin 失败，直到 pass 结束都丢弃命令
    pub secondary_failed: bool,
    pub in_external: bool,
    pub cached: CachedState,
    pub compute_writes: ComputeWriteTracker,
}

impl VulkanCommandBuffer {
    pub fn new() -> Self {
        Self {
            primary: vk::CommandBuffer::null(),
            commands: Vec::new(),
            trackers: Vec::new(),
            pass: PassKind::None,
            render_pass: None,
            uses_secondary: false,
            active_secondary: None,
            secondary_failed: false,
            in_external: false,
            cached: CachedState::default(),
            compute_writes: ComputeWriteTracker::default(),
        }
    }

    /// 新的一帧开始时清空录制状态
    pub fn reset_commands(&mut self) {
        self.commands.clear();
        self.trackers.clear();
        self.pass = PassKind::None;
        self.render_pass = None;
        self.uses_secondary = false;
        self.active_secondary = None;
        self.secondary_failed = false;
        self.in_external = false;
        self.cached.reset();
        self.compute_writes.clear();
    }

    pub fn record_target(&self) -> RecordTarget {
        match self.active_secondary {
            Some(secondary) => RecordTarget::Secondary(secondary),
            None if self.secondary_failed => RecordTarget::Dropped,
            None => RecordTarget::Deferred,
        }
    }

    fn install_secondary(&mut self, secondary: vk::CommandBuffer) {
        self.active_secondary = Some(secondary);
        self.secondary_failed = false;
        self.cached.reset();
    }

    fn mark_secondary_failed(&mut self) {
        self.active_secondary = None;
        self.secondary_failed = true;
    }

    /// 已经结束录制的 secondary 在延迟列表的当前位置执行
    fn execute_secondary(&mut self, secondary: vk::CommandBuffer) {
        self.commands.push(Command::ExecuteSecondary(secondary));
    }

    fn end_pass_state(&mut self) {
        self.pass = PassKind::None;
        self.render_pass = None;
        self.uses_secondary = false;
        self.secondary_failed = false;
        self.in_external = false;
    }

    fn begin_tracker(&mut self) {
        let tracker_index = self.trackers.len();
        self.trackers.push(PassResourceTracker::new());
        self.commands.push(Command::TransitionPassResources { tracker_index });
    }

    #[inline]
    fn tracker(&mut self) -> &mut PassResourceTracker {
        self.trackers.last_mut().unwrap_or_else(|| panic!("resource tracking requires an active pass"))
    }
}

fn compute_barriers(resources: &[ComputeResource]) -> Command {
    let mut buffer_barriers = Vec::new();
    let mut image_barriers = Vec::new();
    let stage = vk::PipelineStageFlags2::COMPUTE_SHADER;
    let dst_access = vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE;
    for resource in resources {
        match *resource {
            ComputeResource::Buffer(buffer) => buffer_barriers.push(
                BufferBarrier::new()
                    .buffer(buffer, 0, vk::WHOLE_SIZE)
                    .src_mask(stage, vk::AccessFlags2::SHADER_STORAGE_WRITE)
                    .dst_mask(stage, dst_access),
            ),
            ComputeResource::Image { image, aspect } => image_barriers.push(
                ImageBarrier::new()
                    .image(image)
                    .image_aspect_flag(aspect)
                    .layout_transfer(vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL)
                    .src_mask(stage, vk::AccessFlags2::SHADER_STORAGE_WRITE)
                    .dst_mask(stage, dst_access),
            ),
        }
    }
    Command::Barrier {
        buffer_barriers,
        image_barriers,
    }
}

// 底层录制
impl VulkanRhi {
    /// pass 使用 secondary 时直接写入，否则进入延迟列表
    pub(super) fn record(&mut self, cb: CommandBufferHandle, cmd: Command) {
        let cbd = &mut self.command_buffers[cb];
        match cbd.record_target() {
            RecordTarget::Secondary(secondary) => {
                let mut encoder = NativeEncoder::new(&self.ctx.device, &self.ctx.debug_utils, secondary);
                match &cmd {
                    Command::Barrier {
                        buffer_barriers,
                        image_barriers,
                    } => encoder.pipeline_barrier(buffer_barriers, image_barriers),
                    other => encoder.encode(other),
                }
            }
            RecordTarget::Deferred => cbd.commands.push(cmd),
            RecordTarget::Dropped => log::trace!("dropped {} without a secondary command buffer", cmd.name()),
        }
    }

    /// 把延迟列表回放到 primary 并清空
    pub(super) fn flush_commands(&mut self, cb: CommandBufferHandle) {
        let cbd = &mut self.command_buffers[cb];
        debug_assert_eq!(cbd.pass, PassKind::None);
        let mut encoder = NativeEncoder::new(&self.ctx.device, &self.ctx.debug_utils, cbd.primary);
        replay(&cbd.commands, &cbd.trackers, &mut encoder);
        cbd.commands.clear();
        cbd.trackers.clear();
    }

    /// 分配并开始一个继承当前 render pass 的 secondary
    ///
    /// 失败时 command buffer 被标记，直到 pass 结束的命令都会被丢弃
    fn begin_secondary(&mut self, cb: CommandBufferHandle) -> Result<(), RhiError> {
        let slot = self.current_frame_slot;
        let pool = self.command_pools[slot].pool;
        let device = &self.ctx.device;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::SECONDARY)
            .command_buffer_count(1);
        let secondary = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                self.command_buffers[cb].mark_secondary_failed();
                return Err(e.into());
            }
        };

        let cbd = &mut self.command_buffers[cb];
        let mut inheritance = vk::CommandBufferInheritanceInfo::default();
        let mut flags = vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        if let Some(rp) = cbd.render_pass {
            inheritance = inheritance.render_pass(rp.render_pass).subpass(0).framebuffer(rp.framebuffer);
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags).inheritance_info(&inheritance);
        if let Err(e) = unsafe { device.begin_command_buffer(secondary, &begin_info) } {
            unsafe { device.free_command_buffers(pool, std::slice::from_ref(&secondary)) };
            cbd.mark_secondary_failed();
            return Err(e.into());
        }
        cbd.install_secondary(secondary);
        Ok(())
    }

    fn begin_secondary_or_drop(&mut self, cb: CommandBufferHandle) {
        if let Err(e) = self.begin_secondary(cb) {
            log::error!("failed to begin secondary command buffer, commands until the end of the pass are dropped: {}", e);
        }
    }

    /// 结束当前 secondary，并在延迟列表中执行它
    fn end_secondary(&mut self, cb: CommandBufferHandle) {
        let slot = self.current_frame_slot;
        let cbd = &mut self.command_buffers[cb];
        let Some(secondary) = cbd.active_secondary.take() else {
            return;
        };
        match unsafe { self.ctx.device.end_command_buffer(secondary) } {
            Ok(()) => cbd.execute_secondary(secondary),
            Err(e) => {
                log::error!("failed to end secondary command buffer: {:?}", e);
                cbd.mark_secondary_failed();
            }
        }
        self.release_queue.release(
            ReleaseKind::SecondaryCommandBuffer {
                pool: self.command_pools[slot].pool,
                command_buffer: secondary,
            },
            Some(slot),
        );
    }
}

// pass
impl VulkanRhi {
    pub(super) fn resource_update(&mut self, cb: CommandBufferHandle, batch: ResourceUpdateBatch) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::None, "resource_update is not allowed inside a pass");
        self.enqueue_resource_updates(cb, batch);
    }

    pub(super) fn begin_pass(
        &mut self,
        cb: CommandBufferHandle,
        target: RenderTarget,
        clear: ClearValues,
        batch: Option<ResourceUpdateBatch>,
        flags: BeginPassFlags,
    ) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::None, "begin_pass while another pass is active");
        if let Some(batch) = batch {
            self.enqueue_resource_updates(cb, batch);
        }

        let slot = self.current_frame_slot;
        self.command_buffers[cb].begin_tracker();

        let (render_pass_handle, active) = match target {
            RenderTarget::Texture(rt_handle) => {
                let rt = &mut self.render_targets[rt_handle];
                let Some(native) = rt.native.as_ref() else {
                    panic!("render target '{}' is used before create", rt.desc.name);
                };
                let Some(rp_handle) = rt.render_pass else {
                    panic!("render target '{}' has no render pass descriptor", rt.desc.name);
                };
                rt.last_active_frame_slot = Some(slot);
                let active = ActiveRenderPass {
                    render_pass: self.render_pass_descs[rp_handle].render_pass,
                    framebuffer: native.framebuffer,
                    extent: native.extent,
                };

                // attachment 进入 pass 前需要的 layout 由 tracker 生成 barrier
                let desc = rt.desc.clone();
                let tracker = self.command_buffers[cb].tracker();
                let mut track = |source: AttachmentSource, demand: TextureUsageState| match source {
                    AttachmentSource::Texture(t) => {
                        let tex = &mut self.textures[t];
                        tex.last_active_frame_slot = Some(slot);
                        let (image, aspect) = {
                            let native = tex.native();
                            (native.image, native.aspect)
                        };
                        tracked_register_texture(tracker, &mut tex.usage_state, tex.id, image, aspect, demand);
                    }
                    AttachmentSource::RenderBuffer(rb) => {
                        self.render_buffers[rb].last_active_frame_slot = Some(slot);
                    }
                };
                for color in &desc.color_attachments {
                    track(color.source, TextureUsageState::COLOR_ATTACHMENT_WRITE);
                    if let Some(resolve) = color.resolve_texture {
                        track(AttachmentSource::Texture(resolve), TextureUsageState::COLOR_ATTACHMENT_WRITE);
                    }
                }
                if let Some(ds) = desc.depth_stencil {
                    track(ds, TextureUsageState::DEPTH_ATTACHMENT_WRITE);
                }
                (rp_handle, active)
            }
            RenderTarget::Swapchain(sc_handle) => {
                assert_eq!(self.current_swapchain, Some(sc_handle), "swapchain pass outside of its frame");
                let sc = &mut self.swapchains[sc_handle];
                let Some(rp_handle) = sc.render_pass else {
                    panic!("swapchain '{}' has no render pass descriptor", sc.desc.name);
                };
                let image_index = sc.frames[sc.current_frame_slot].image_index as usize;
                let image = &mut sc.images[image_index];
                image.last_use = SwapchainImageUse::Render;
                let active = ActiveRenderPass {
                    render_pass: self.render_pass_descs[rp_handle].render_pass,
                    framebuffer: image.framebuffer,
                    extent: sc.extent,
                };
                if let Some(ds) = sc.desc.depth_stencil {
                    self.render_buffers[ds].last_active_frame_slot = Some(slot);
                }
                (rp_handle, active)
            }
        };

        let rp = &mut self.render_pass_descs[render_pass_handle];
        rp.last_active_frame_slot = Some(slot);
        let color_clear = vk::ClearValue {
            color: vk::ClearColorValue { float32: clear.color },
        };
        let mut clear_values = vec![color_clear; rp.layout.colors.len()];
        if rp.layout.depth_stencil.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear.depth,
                    stencil: clear.stencil,
                },
            });
        }
        clear_values.extend(std::iter::repeat_n(color_clear, rp.layout.resolves.len()));

        let uses_secondary = flags.contains(BeginPassFlags::EXTERNAL_CONTENT);
        let cbd = &mut self.command_buffers[cb];
        cbd.commands.push(Command::BeginRenderPass {
            render_pass: active.render_pass,
            framebuffer: active.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: active.extent,
            },
            clear_values,
            contents: if uses_secondary {
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
            } else {
                vk::SubpassContents::INLINE
            },
        });
        cbd.pass = PassKind::Render;
        cbd.render_pass = Some(active);
        cbd.uses_secondary = uses_secondary;
        cbd.cached.reset();
        if uses_secondary {
            self.begin_secondary_or_drop(cb);
        }
    }

    pub(super) fn end_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::Render, "end_pass without begin_pass");
        self.end_secondary(cb);

        let cbd = &mut self.command_buffers[cb];
        cbd.commands.push(Command::EndRenderPass);
        cbd.end_pass_state();

        if let Some(batch) = batch {
            self.enqueue_resource_updates(cb, batch);
        }
    }

    pub(super) fn begin_compute_pass(
        &mut self,
        cb: CommandBufferHandle,
        batch: Option<ResourceUpdateBatch>,
        flags: BeginPassFlags,
    ) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::None, "begin_compute_pass while another pass is active");
        if let Some(batch) = batch {
            self.enqueue_resource_updates(cb, batch);
        }

        let uses_secondary = flags.contains(BeginPassFlags::EXTERNAL_CONTENT);
        let cbd = &mut self.command_buffers[cb];
        cbd.begin_tracker();
        cbd.pass = PassKind::Compute;
        cbd.uses_secondary = uses_secondary;
        cbd.cached.reset();
        cbd.compute_writes.clear();
        if uses_secondary {
            self.begin_secondary_or_drop(cb);
        }
    }

    pub(super) fn end_compute_pass(&mut self, cb: CommandBufferHandle, batch: Option<ResourceUpdateBatch>) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::Compute, "end_compute_pass without begin_compute_pass");
        self.end_secondary(cb);

        let cbd = &mut self.command_buffers[cb];
        cbd.end_pass_state();
        cbd.compute_writes.clear();

        if let Some(batch) = batch {
            self.enqueue_resource_updates(cb, batch);
        }
    }
}

// 绑定
impl VulkanRhi {
    pub(super) fn set_graphics_pipeline(&mut self, cb: CommandBufferHandle, pipeline: GraphicsPipelineHandle) {
        let slot = self.current_frame_slot;
        let pso = &mut self.graphics_pipelines[pipeline];
        let Some(native) = pso.native else {
            panic!("graphics pipeline '{}' is used before create", pso.desc.name);
        };
        pso.last_active_frame_slot = Some(slot);
        let key = (pipeline, pso.generation);

        let cbd = &mut self.command_buffers[cb];
        assert_eq!(cbd.pass, PassKind::Render, "set_graphics_pipeline outside of a render pass");
        if cbd.cached.graphics_pipeline == Some(key) {
            return;
        }
        cbd.cached.graphics_pipeline = Some(key);
        // 不同 pipeline 的 layout 可能不同
        cbd.cached.srb = None;
        self.record(
            cb,
            Command::BindPipeline {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                pipeline: native.pipeline,
            },
        );
    }

    pub(super) fn set_compute_pipeline(&mut self, cb: CommandBufferHandle, pipeline: ComputePipelineHandle) {
        let slot = self.current_frame_slot;
        let pso = &mut self.compute_pipelines[pipeline];
        let Some(native) = pso.native else {
            panic!("compute pipeline '{}' is used before create", pso.desc.name);
        };
        pso.last_active_frame_slot = Some(slot);
        let key = (pipeline, pso.generation);

        let cbd = &mut self.command_buffers[cb];
        assert_eq!(cbd.pass, PassKind::Compute, "set_compute_pipeline outside of a compute pass");
        if cbd.cached.compute_pipeline == Some(key) {
            return;
        }
        cbd.cached.compute_pipeline = Some(key);
        cbd.cached.srb = None;
        self.record(
            cb,
            Command::BindPipeline {
                bind_point: vk::PipelineBindPoint::COMPUTE,
                pipeline: native.pipeline,
            },
        );
    }

    /// 当前 pass 的 bind point、pipeline layout 以及 pipeline 创建时的 srb
    fn current_pipeline_binding(&self, cb: CommandBufferHandle) -> Option<(vk::PipelineBindPoint, vk::PipelineLayout, SrbHandle)> {
        let cbd = &self.command_buffers[cb];
        match cbd.pass {
            PassKind::Render => {
                let (handle, _) = cbd.cached.graphics_pipeline?;
                let pso = &self.graphics_pipelines[handle];
                Some((vk::PipelineBindPoint::GRAPHICS, pso.native?.layout, pso.desc.srb))
            }
            PassKind::Compute => {
                let (handle, _) = cbd.cached.compute_pipeline?;
                let pso = &self.compute_pipelines[handle];
                Some((vk::PipelineBindPoint::COMPUTE, pso.native?.layout, pso.desc.srb))
            }
            PassKind::None => None,
        }
    }

    /// 把 srb 引用的资源登记到当前 pass
    fn track_srb_resources(&mut self, cb: CommandBufferHandle, srb: SrbHandle) {
        let slot = self.current_frame_slot;
        let bindings = self.srbs[srb].bindings.clone();
        let cbd = &mut self.command_buffers[cb];
        let is_compute = cbd.pass == PassKind::Compute;
        if is_compute {
            cbd.compute_writes.begin_dispatch();
        }

        for b in &bindings {
            let stage = convert::pipeline_stages(b.stages);
            match b.resource {
                BindingResource::UniformBuffer { buffer, .. } => {
                    let buf = &mut self.buffers[buffer];
                    buf.last_active_frame_slot = Some(slot);
                    if buf.is_dynamic() {
                        buf.execute_host_writes(&self.ctx, slot);
                    } else {
                        let native = buf.native(slot);
                        tracked_register_buffer(
                            cbd.tracker(),
                            &mut buf.usage_state[0],
                            buf.id,
                            0,
                            native,
                            BufferUsageState::uniform(stage),
                        );
                    }
                }
                BindingResource::StorageBuffer { buffer, access, .. } => {
                    let buf = &mut self.buffers[buffer];
                    buf.last_active_frame_slot = Some(slot);
                    let native = buf.native(slot);
                    let demand = BufferUsageState::storage(stage, access != StorageAccess::Store, access.writes());
                    tracked_register_buffer(cbd.tracker(), &mut buf.usage_state[0], buf.id, 0, native, demand);
                    if is_compute {
                        cbd.compute_writes.access(buf.id, ComputeResource::Buffer(native), access);
                    }
                }
                BindingResource::SampledTexture { texture, sampler } => {
                    self.samplers[sampler].last_active_frame_slot = Some(slot);
                    let tex = &mut self.textures[texture];
                    tex.last_active_frame_slot = Some(slot);
                    let (image, aspect) = {
                        let native = tex.native();
                        (native.image, native.aspect)
                    };
                    tracked_register_texture(
                        cbd.tracker(),
                        &mut tex.usage_state,
                        tex.id,
                        image,
                        aspect,
                        TextureUsageState::sampled(stage),
                    );
                }
                BindingResource::StorageImage { texture, access, .. } => {
                    let tex = &mut self.textures[texture];
                    tex.last_active_frame_slot = Some(slot);
                    let (image, aspect) = {
                        let native = tex.native();
                        (native.image, native.aspect)
                    };
                    let demand = TextureUsageState::storage(stage, access != StorageAccess::Store, access.writes());
                    tracked_register_texture(cbd.tracker(), &mut tex.usage_state, tex.id, image, aspect, demand);
                    if is_compute {
                        cbd.compute_writes.access(tex.id, ComputeResource::Image { image, aspect }, access);
                    }
                }
            }
        }

        if is_compute {
            let pending = cbd.compute_writes.finish_dispatch();
            if !pending.is_empty() {
                self.record(cb, compute_barriers(&pending));
            }
        }
    }

    pub(super) fn set_shader_resources(
        &mut self,
        cb: CommandBufferHandle,
        srb: Option<SrbHandle>,
        dynamic_offsets: &[(u32, u32)],
    ) {
        let Some((bind_point, layout, pipeline_srb)) = self.current_pipeline_binding(cb) else {
            log::error!("set_shader_resources requires a pipeline to be set first");
            return;
        };
        let srb = srb.unwrap_or(pipeline_srb);

        self.track_srb_resources(cb, srb);
        let rewritten = self.update_srb_if_stale(srb);

        let slot = self.current_frame_slot;
        let srb_data = &mut self.srbs[srb];
        srb_data.last_active_frame_slot = Some(slot);
        let Some(native) = srb_data.native.as_ref() else {
            return;
        };
        let set = native.sets[slot];
        let offsets = srb_data.dynamic_offsets(dynamic_offsets);
        let key = (srb, srb_data.generation);

        let cbd = &mut self.command_buffers[cb];
        if !rewritten && offsets.is_empty() && cbd.cached.srb == Some(key) {
            return;
        }
        cbd.cached.srb = Some(key);
        self.record(
            cb,
            Command::BindDescriptorSet {
                bind_point,
                layout,
                set,
                dynamic_offsets: offsets,
            },
        );
    }

    pub(super) fn set_vertex_input(
        &mut self,
        cb: CommandBufferHandle,
        start_binding: u32,
        bindings: &[(BufferHandle, u32)],
        index: Option<(BufferHandle, u32, IndexFormat)>,
    ) {
        let slot = self.current_frame_slot;
        let cbd = &mut self.command_buffers[cb];
        assert_eq!(cbd.pass, PassKind::Render, "set_vertex_input outside of a render pass");

        let mut needs_bind = false;
        let mut buffers = Vec::with_capacity(bindings.len());
        let mut offsets = Vec::with_capacity(bindings.len());
        for (i, (buffer, offset)) in bindings.iter().enumerate() {
            let buf = &mut self.buffers[*buffer];
            buf.last_active_frame_slot = Some(slot);
            let native = buf.native(slot);
            if buf.is_dynamic() {
                buf.execute_host_writes(&self.ctx, slot);
            } else {
                tracked_register_buffer(
                    cbd.tracker(),
                    &mut buf.usage_state[0],
                    buf.id,
                    0,
                    native,
                    BufferUsageState::VERTEX_BUFFER,
                );
            }

            let binding = start_binding as usize + i;
            debug_assert!(binding < VulkanConstants::MAX_VERTEX_INPUT_BINDINGS);
            if cbd.cached.vertex_buffers.len() <= binding {
                cbd.cached.vertex_buffers.resize(binding + 1, None);
            }
            let entry = Some((native, *offset as u64));
            if cbd.cached.vertex_buffers[binding] != entry {
                cbd.cached.vertex_buffers[binding] = entry;
                needs_bind = true;
            }
            buffers.push(native);
            offsets.push(*offset as u64);
        }

        let mut index_cmd = None;
        if let Some((buffer, offset, format)) = index {
            let buf = &mut self.buffers[buffer];
            buf.last_active_frame_slot = Some(slot);
            let native = buf.native(slot);
            if buf.is_dynamic() {
                buf.execute_host_writes(&self.ctx, slot);
            } else {
                tracked_register_buffer(
                    cbd.tracker(),
                    &mut buf.usage_state[0],
                    buf.id,
                    0,
                    native,
                    BufferUsageState::INDEX_BUFFER,
                );
            }
            let entry = (native, offset as u64, convert::index_type(format));
            if cbd.cached.index_buffer != Some(entry) {
                cbd.cached.index_buffer = Some(entry);
                index_cmd = Some(Command::BindIndexBuffer {
                    buffer: entry.0,
                    offset: entry.1,
                    index_type: entry.2,
                });
            }
        }

        if needs_bind {
            self.record(
                cb,
                Command::BindVertexBuffers {
                    first_binding: start_binding,
                    buffers,
                    offsets,
                },
            );
        }
        if let Some(cmd) = index_cmd {
            self.record(cb, cmd);
        }
    }
}

// 动态状态与绘制
impl VulkanRhi {
    fn assert_in_render_pass(&self, cb: CommandBufferHandle, what: &str) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::Render, "{} outside of a render pass", what);
    }

    pub(super) fn set_viewport(&mut self, cb: CommandBufferHandle, viewport: Viewport) {
        self.assert_in_render_pass(cb, "set_viewport");
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        self.record(cb, Command::SetViewport(vk_viewport));

        // pipeline 不使用 scissor 时，scissor 跟随 viewport
        let uses_scissor = self.command_buffers[cb]
            .cached
            .graphics_pipeline
            .is_some_and(|(pso, _)| self.graphics_pipelines[pso].desc.flags.contains(GraphicsPipelineFlags::USES_SCISSOR));
        if !uses_scissor {
            let scissor = vk::Rect2D {
                offset: vk::Offset2D {
                    x: viewport.x.max(0.0) as i32,
                    y: viewport.y.max(0.0) as i32,
                },
                extent: vk::Extent2D {
                    width: viewport.width.max(0.0) as u32,
                    height: viewport.height.max(0.0) as u32,
                },
            };
            self.record(cb, Command::SetScissor(scissor));
        }
    }

    pub(super) fn set_scissor(&mut self, cb: CommandBufferHandle, scissor: Scissor) {
        self.assert_in_render_pass(cb, "set_scissor");
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x.max(0),
                y: scissor.y.max(0),
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        self.record(cb, Command::SetScissor(rect));
    }

    pub(super) fn set_blend_constants(&mut self, cb: CommandBufferHandle, constants: [f32; 4]) {
        self.assert_in_render_pass(cb, "set_blend_constants");
        self.record(cb, Command::SetBlendConstants(constants));
    }

    pub(super) fn set_stencil_ref(&mut self, cb: CommandBufferHandle, reference: u32) {
        self.assert_in_render_pass(cb, "set_stencil_ref");
        self.record(cb, Command::SetStencilRef(reference));
    }

    pub(super) fn draw(
        &mut self,
        cb: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.assert_in_render_pass(cb, "draw");
        self.record(
            cb,
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    pub(super) fn draw_indexed(
        &mut self,
        cb: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.assert_in_render_pass(cb, "draw_indexed");
        self.record(
            cb,
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    pub(super) fn dispatch(&mut self, cb: CommandBufferHandle, x: u32, y: u32, z: u32) {
        assert_eq!(self.command_buffers[cb].pass, PassKind::Compute, "dispatch outside of a compute pass");
        self.record(cb, Command::Dispatch { x, y, z });
    }
}

// debug marker 与外部命令
impl VulkanRhi {
    pub(super) fn debug_mark_begin(&mut self, cb: CommandBufferHandle, name: &str) {
        if self.ctx.debug_utils.is_enabled() {
            self.record(cb, Command::DebugMarkerBegin(name.to_string()));
        }
    }

    pub(super) fn debug_mark_end(&mut self, cb: CommandBufferHandle) {
        if self.ctx.debug_utils.is_enabled() {
            self.record(cb, Command::DebugMarkerEnd);
        }
    }

    pub(super) fn debug_mark_msg(&mut self, cb: CommandBufferHandle, msg: &str) {
        if self.ctx.debug_utils.is_enabled() {
            self.record(cb, Command::DebugMarkerInsert(msg.to_string()));
        }
    }

    /// pass 内：结束框架的 secondary，为外部命令开一个新的 secondary；
    /// pass 外：先把延迟列表写入 primary，外部命令直接写 primary
    pub(super) fn begin_external(&mut self, cb: CommandBufferHandle) {
        let cbd = &self.command_buffers[cb];
        if cbd.in_external {
            return;
        }
        if cbd.pass == PassKind::None {
            self.flush_commands(cb);
        } else {
            assert!(cbd.uses_secondary, "begin_external inside a pass requires BeginPassFlags::EXTERNAL_CONTENT");
            self.end_secondary(cb);
            self.begin_secondary_or_drop(cb);
        }
        self.command_buffers[cb].in_external = true;
    }

    pub(super) fn end_external(&mut self, cb: CommandBufferHandle) {
        if !self.command_buffers[cb].in_external {
            return;
        }
        if self.command_buffers[cb].pass != PassKind::None {
            self.end_secondary(cb);
            self.begin_secondary_or_drop(cb);
        }
        let cbd = &mut self.command_buffers[cb];
        cbd.in_external = false;
        // 外部命令可能改变了任何绑定
        cbd.cached.reset();
    }

    pub(super) fn native_command_buffer(&self, cb: CommandBufferHandle) -> NativeCommandBuffer {
        let cbd = &self.command_buffers[cb];
        NativeCommandBuffer {
            command_buffer: cbd.active_secondary.unwrap_or(cbd.primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::command_list::tests::RecordingSink;
    use ash::vk::Handle;

    fn buffer(raw: u64) -> ComputeResource {
        ComputeResource::Buffer(vk::Buffer::from_raw(raw))
    }

    #[test]
    fn test_write_then_read_needs_one_barrier() {
        let mut writes = ComputeWriteTracker::default();

        // dispatch 1：写 A
        writes.begin_dispatch();
        writes.access(1, buffer(10), StorageAccess::Store);
        assert!(writes.finish_dispatch().is_empty());

        // dispatch 2：读 A，需要 barrier，之后不再记录
        writes.begin_dispatch();
        writes.access(1, buffer(10), StorageAccess::Load);
        assert_eq!(writes.finish_dispatch(), vec![buffer(10)]);
        assert_eq!(writes.len(), 0);

        // dispatch 3：再读 A 不需要 barrier
        writes.begin_dispatch();
        writes.access(1, buffer(10), StorageAccess::Load);
        assert!(writes.finish_dispatch().is_empty());
    }

    #[test]
    fn test_write_after_write_keeps_tracking() {
        let mut writes = ComputeWriteTracker::default();
        writes.begin_dispatch();
        writes.access(1, buffer(10), StorageAccess::LoadStore);
        assert!(writes.finish_dispatch().is_empty());

        writes.begin_dispatch();
        writes.access(1, buffer(10), StorageAccess::Store);
        assert_eq!(writes.finish_dispatch(), vec![buffer(10)]);
        assert_eq!(writes.len(), 1);

        // 不访问 A 的 dispatch 不产生 barrier，记录保留
        writes.begin_dispatch();
        writes.access(2, buffer(20), StorageAccess::Load);
        assert!(writes.finish_dispatch().is_empty());
        assert_eq!(writes.len(), 1);

        writes.begin_dispatch();
        writes.access(1, buffer(10), StorageAccess::Load);
        assert_eq!(writes.finish_dispatch(), vec![buffer(10)]);
    }

    #[test]
    fn test_read_only_resources_are_not_tracked() {
        let mut writes = ComputeWriteTracker::default();
        writes.begin_dispatch();
        writes.access(3, buffer(30), StorageAccess::Load);
        assert!(writes.finish_dispatch().is_empty());
        assert_eq!(writes.len(), 0);
    }

    #[test]
    fn test_compute_barrier_masks() {
        let image = ComputeResource::Image {
            image: vk::Image::from_raw(5),
            aspect: vk::ImageAspectFlags::COLOR,
        };
        let Command::Barrier {
            buffer_barriers,
            image_barriers,
        } = compute_barriers(&[buffer(1), image])
        else {
            panic!("expected a barrier command");
        };
        assert_eq!(buffer_barriers.len(), 1);
        assert_eq!(image_barriers.len(), 1);
        let inner = image_barriers[0].inner();
        assert_eq!(inner.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(inner.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::SHADER_STORAGE_WRITE);
    }

    #[test]
    fn test_reset_commands_clears_pass_state() {
        let mut cbd = VulkanCommandBuffer::new();
        cbd.begin_tracker();
        cbd.pass = PassKind::Compute;
        cbd.commands.push(Command::Dispatch { x: 1, y: 1, z: 1 });
        cbd.reset_commands();
        assert!(cbd.commands.is_empty());
        assert!(cbd.trackers.is_empty());
        assert_eq!(cbd.pass, PassKind::None);
    }

    #[test]
    fn test_external_content_splits_secondaries_in_order() {
        let mut cbd = VulkanCommandBuffer::new();
        cbd.commands.push(Command::Dispatch { x: 1, y: 1, z: 1 });
        cbd.begin_tracker();
        cbd.commands.push(Command::BeginRenderPass {
            render_pass: vk::RenderPass::null(),
            framebuffer: vk::Framebuffer::null(),
            render_area: vk::Rect2D::default(),
            clear_values: vec![],
            contents: vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        });
        cbd.pass = PassKind::Render;
        cbd.uses_secondary = true;

        // 框架的 secondary，begin_external 时结束，外部命令使用新的 secondary
        let framework = vk::CommandBuffer::from_raw(21);
        let external = vk::CommandBuffer::from_raw(22);
        cbd.install_secondary(framework);
        assert_eq!(cbd.record_target(), RecordTarget::Secondary(framework));
        cbd.execute_secondary(framework);
        cbd.install_secondary(external);
        assert_eq!(cbd.record_target(), RecordTarget::Secondary(external));
        cbd.active_secondary = None;
        cbd.execute_secondary(external);
        cbd.commands.push(Command::EndRenderPass);
        cbd.end_pass_state();
        assert_eq!(cbd.record_target(), RecordTarget::Deferred);

        let mut sink = RecordingSink::default();
        replay(&cbd.commands, &cbd.trackers, &mut sink);
        assert_eq!(
            sink.calls,
            vec![
                "Dispatch",
                "BeginRenderPass",
                "ExecuteSecondary(21)",
                "ExecuteSecondary(22)",
                "EndRenderPass",
            ]
        );
    }

    #[test]
    fn test_failed_secondary_drops_commands_until_pass_end() {
        let mut cbd = VulkanCommandBuffer::new();
        cbd.pass = PassKind::Render;
        cbd.uses_secondary = true;
        assert_eq!(cbd.record_target(), RecordTarget::Deferred);

        // 分配失败之后不能退回到 primary 的 inline 录制
        cbd.mark_secondary_failed();
        assert_eq!(cbd.record_target(), RecordTarget::Dropped);

        // end_external 重新分配成功则恢复
        cbd.install_secondary(vk::CommandBuffer::from_raw(5));
        assert_eq!(cbd.record_target(), RecordTarget::Secondary(vk::CommandBuffer::from_raw(5)));

        cbd.mark_secondary_failed();
        cbd.end_pass_state();
        assert_eq!(cbd.record_target(), RecordTarget::Deferred);
    }

    #[test]
    fn test_frame_reset_clears_secondary_failure() {
        let mut cbd = VulkanCommandBuffer::new();
        cbd.mark_secondary_failed();
        cbd.reset_commands();
        assert!(!cbd.secondary_failed);
        assert_eq!(cbd.record_target(), RecordTarget::Deferred);
    }
}

//! 帧调度
//!
//! RHI 为每个 frame slot 持有一个 fence 和一个 command pool，swapchain 帧和离屏帧共用。
//! 一个 slot 被再次使用之前，一定先等待它上一次提交的 fence；之后该 slot 上延迟释放的
//! 对象和回读才可以处理。

use ash::vk;

use crate::backend::vulkan::VulkanRhi;
use crate::backend::vulkan::barrier::{ImageBarrier, TextureUsageState};
use crate::backend::vulkan::command_buffer::PassKind;
use crate::backend::vulkan::command_list::Command;
use crate::backend::vulkan::context::VulkanContext;
use crate::backend::vulkan::swapchain::SwapchainImageUse;
use crate::desc::EndFrameFlags;
use crate::error::{FrameOpError, FrameOpResult};
use crate::handles::{CommandBufferHandle, SwapchainHandle};

/// 记录每个 slot 的 fence 是否有未等待的提交
#[derive(Debug)]
pub(crate) struct SlotFenceTracker {
    waitable: Vec<bool>,
}

impl SlotFenceTracker {
    pub fn new(slot_count: usize) -> Self {
        Self {
            waitable: vec![false; slot_count],
        }
    }

    #[inline]
    pub fn is_in_flight(&self, slot: usize) -> bool {
        self.waitable[slot]
    }

    pub fn in_flight_count(&self) -> usize {
        self.waitable.iter().filter(|w| **w).count()
    }

    /// slot 有未完成的提交时调用 `wait`，成功后标记为空闲
    pub fn wait_for_slot<E>(&mut self, slot: usize, wait: impl FnOnce(usize) -> Result<(), E>) -> Result<(), E> {
        if self.waitable[slot] {
            wait(slot)?;
            self.waitable[slot] = false;
        }
        Ok(())
    }

    /// 提交时使用了 slot 的 fence
    pub fn submitted(&mut self, slot: usize) {
        debug_assert!(!self.waitable[slot], "slot {} submitted twice without waiting", slot);
        self.waitable[slot] = true;
    }

    pub fn wait_all<E>(&mut self, mut wait: impl FnMut(usize) -> Result<(), E>) -> Result<(), E> {
        for slot in 0..self.waitable.len() {
            self.wait_for_slot(slot, &mut wait)?;
        }
        Ok(())
    }
}

/// 一个 frame slot 的 command pool
///
/// 每次进入 slot 时整体 reset；primary command buffer 在 slot 内复用，
/// 同一帧内 finish 之后需要新的 primary 时再额外分配
pub(crate) struct SlotCommandPool {
    pub pool: vk::CommandPool,
    primaries: Vec<vk::CommandBuffer>,
    next_primary: usize,
}

impl SlotCommandPool {
    pub fn new(ctx: &VulkanContext, slot: usize) -> Result<Self, vk::Result> {
        let ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { ctx.device.create_command_pool(&ci, None)? };
        ctx.debug_utils.set_object_name(pool, &format!("frame-slot-{slot}-command-pool"));
        Ok(Self {
            pool,
            primaries: Vec::new(),
            next_primary: 0,
        })
    }

    pub fn reset(&mut self, device: &ash::Device) -> Result<(), vk::Result> {
        unsafe { device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())? };
        self.next_primary = 0;
        Ok(())
    }

    pub fn acquire_primary(&mut self, device: &ash::Device) -> Result<vk::CommandBuffer, vk::Result> {
        if self.next_primary == self.primaries.len() {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let allocated = unsafe { device.allocate_command_buffers(&alloc_info)? };
            self.primaries.extend(allocated);
        }
        let primary = self.primaries[self.next_primary];
        self.next_primary += 1;
        Ok(primary)
    }

    pub fn destroy(self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// present 要求的 layout
const PRESENT_STATE: TextureUsageState = TextureUsageState::new(
    vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
    vk::AccessFlags2::NONE,
    vk::ImageLayout::PRESENT_SRC_KHR,
);

// 辅助
impl VulkanRhi {
    /// 把 vk 错误转换为帧操作错误，设备丢失会被记录下来
    pub(super) fn frame_op_error(&mut self, what: &str, e: vk::Result) -> FrameOpError {
        match e {
            vk::Result::ERROR_DEVICE_LOST => {
                log::error!("device lost during {}", what);
                self.device_lost = true;
                FrameOpError::DeviceLost
            }
            vk::Result::ERROR_OUT_OF_DATE_KHR => FrameOpError::SwapchainOutOfDate,
            e => {
                log::error!("{} failed: {:?}", what, e);
                FrameOpError::Error
            }
        }
    }

    /// 等待 slot 上一次提交完成
    pub(super) fn wait_command_completion(&mut self, slot: usize) -> Result<(), vk::Result> {
        let ctx = &self.ctx;
        let fences = &self.slot_fences;
        self.fence_tracker.wait_for_slot(slot, |s| ctx.wait_and_reset_fence(fences[s]))
    }

    pub(super) fn wait_all_slots(&mut self) -> Result<(), vk::Result> {
        let ctx = &self.ctx;
        let fences = &self.slot_fences;
        self.fence_tracker.wait_all(|s| ctx.wait_and_reset_fence(fences[s]))
    }

    /// 从当前 slot 的 pool 中取一个 primary 并开始录制
    fn start_primary(&mut self, cb: CommandBufferHandle) -> Result<(), vk::Result> {
        let slot = self.current_frame_slot;
        let primary = self.command_pools[slot].acquire_primary(&self.ctx.device)?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.ctx.device.begin_command_buffer(primary, &begin_info)? };
        self.command_buffers[cb].primary = primary;
        Ok(())
    }

    /// 进入 slot 时的公共步骤：等待 fence、reset pool、开始 primary、处理延迟释放和回读
    fn enter_slot(&mut self, cb: CommandBufferHandle, slot: usize) -> FrameOpResult {
        self.current_frame_slot = slot;
        self.wait_command_completion(slot).map_err(|e| self.frame_op_error("wait for frame slot fence", e))?;
        self.command_pools[slot]
            .reset(&self.ctx.device)
            .map_err(|e| self.frame_op_error("reset command pool", e))?;
        self.start_primary(cb).map_err(|e| self.frame_op_error("begin command buffer", e))?;
        self.prepare_new_frame(cb);
        Ok(())
    }

    fn prepare_new_frame(&mut self, cb: CommandBufferHandle) {
        self.execute_deferred_releases(false);
        self.command_buffers[cb].reset_commands();
        self.finish_active_readbacks(false);
    }

    /// 回放延迟命令、结束 primary 并提交
    fn submit_primary(
        &mut self,
        cb: CommandBufferHandle,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let _span = tracy_client::span!("submit_primary");
        self.flush_commands(cb);
        let primary = self.command_buffers[cb].primary;
        unsafe { self.ctx.device.end_command_buffer(primary)? };

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(primary)];
        let wait_infos = wait
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            })
            .into_iter()
            .collect::<Vec<_>>();
        let signal_infos = signal
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .into_iter()
            .collect::<Vec<_>>();
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe { self.ctx.device.queue_submit2(self.ctx.queue, std::slice::from_ref(&submit_info), fence) }
    }

    fn current_frame_command_buffer(&self) -> CommandBufferHandle {
        match self.current_swapchain {
            Some(sc) if !self.offscreen_active => self.swapchains[sc].cb,
            _ => self.offscreen_cb,
        }
    }
}

// swapchain 帧
impl VulkanRhi {
    pub(super) fn begin_frame(&mut self, handle: SwapchainHandle) -> Result<CommandBufferHandle, FrameOpError> {
        let _span = tracy_client::span!("begin_frame");
        if self.device_lost {
            return Err(FrameOpError::DeviceLost);
        }
        assert!(!self.in_frame, "begin_frame inside a frame");

        let sc = &self.swapchains[handle];
        if !sc.is_created() {
            log::warn!("begin_frame on swapchain '{}' which is not created", sc.desc.name);
            return Err(FrameOpError::SwapchainOutOfDate);
        }
        let slot = sc.current_frame_slot;
        let cb = sc.cb;
        let swapchain = sc.swapchain;
        let frame = &sc.frames[slot];
        let (image_fence, image_sem) = (frame.image_fence, frame.image_sem);

        // 上一次在这个 slot 上的 acquire 必须已经完成
        if frame.image_fence_waitable {
            self.ctx
                .wait_and_reset_fence(image_fence)
                .map_err(|e| self.frame_op_error("wait for image fence", e))?;
            self.swapchains[handle].frames[slot].image_fence_waitable = false;
        }

        if !self.swapchains[handle].frames[slot].image_acquired {
            let Some(swapchain_fn) = self.ctx.swapchain_fn.as_ref() else {
                return Err(FrameOpError::Error);
            };
            let acquired = unsafe { swapchain_fn.acquire_next_image(swapchain, u64::MAX, image_sem, image_fence) };
            match acquired {
                Ok((image_index, suboptimal)) => {
                    if suboptimal {
                        log::debug!("swapchain image {} is suboptimal", image_index);
                    }
                    let frame = &mut self.swapchains[handle].frames[slot];
                    frame.image_index = image_index;
                    frame.image_acquired = true;
                    frame.image_sem_waitable = true;
                    frame.image_fence_waitable = true;
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(FrameOpError::SwapchainOutOfDate),
                Err(e) => return Err(self.frame_op_error("acquire swapchain image", e)),
            }
        }

        self.enter_slot(cb, slot)?;
        self.in_frame = true;
        self.current_swapchain = Some(handle);
        self.swapchains[handle].last_active_frame_slot = Some(slot);
        Ok(cb)
    }

    /// 提交当前帧并 present，之后前进到下一个 slot
    ///
    /// `SKIP_PRESENT` 时 slot 同样前进，但这个 slot 已经 acquire 的 image 保持 acquired：
    /// 下次轮到这个 slot 时 begin_frame 不再 acquire，直接复用这个 image。
    pub(super) fn end_frame(&mut self, handle: SwapchainHandle, flags: EndFrameFlags) -> FrameOpResult {
        let _span = tracy_client::span!("end_frame");
        assert!(
            self.in_frame && self.current_swapchain == Some(handle),
            "end_frame without a matching begin_frame"
        );
        let slot = self.current_frame_slot;
        let cb = self.swapchains[handle].cb;
        assert_eq!(self.command_buffers[cb].pass, PassKind::None, "end_frame inside a pass");

        // 没有被渲染过（或者之后被回读）的 image 需要转换到 PRESENT_SRC
        let sc = &mut self.swapchains[handle];
        let image_index = sc.frames[slot].image_index;
        let image = &mut sc.images[image_index as usize];
        if image.last_use != SwapchainImageUse::Render {
            let barrier =
                ImageBarrier::transition(image.image, vk::ImageAspectFlags::COLOR, image.last_use.usage_state(), PRESENT_STATE);
            image.last_use = SwapchainImageUse::Render;
            self.record(
                cb,
                Command::Barrier {
                    buffer_barriers: vec![],
                    image_barriers: vec![barrier],
                },
            );
        }

        let present = !flags.contains(EndFrameFlags::SKIP_PRESENT);
        let frame = &mut self.swapchains[handle].frames[slot];
        let wait = frame.image_sem_waitable.then_some(frame.image_sem);
        frame.image_sem_waitable = false;
        // 不 present 时 draw_sem 不能 signal，否则没有人等待它
        let signal = present.then_some(frame.draw_sem);
        let draw_sem = frame.draw_sem;

        let submitted = self.submit_primary(cb, wait, signal, self.slot_fences[slot]);
        self.in_frame = false;
        self.current_swapchain = None;
        submitted.map_err(|e| self.frame_op_error("queue submit", e))?;
        self.fence_tracker.submitted(slot);

        let sc = &mut self.swapchains[handle];
        sc.current_frame_slot = (slot + 1) % sc.frames.len();
        if !present {
            return Ok(());
        }

        let _present_span = tracy_client::span!("present");
        let Some(swapchain_fn) = self.ctx.swapchain_fn.as_ref() else {
            return Err(FrameOpError::Error);
        };
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(std::slice::from_ref(&draw_sem))
            .swapchains(std::slice::from_ref(&sc.swapchain))
            .image_indices(std::slice::from_ref(&image_index));
        let presented = unsafe { swapchain_fn.queue_present(self.ctx.queue, &present_info) };
        sc.frames[slot].image_acquired = false;
        sc.images[image_index as usize].last_use = SwapchainImageUse::None;

        match presented {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("swapchain '{}' is suboptimal at present", sc.desc.name);
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(FrameOpError::SwapchainOutOfDate),
            Err(e) => Err(self.frame_op_error("present", e)),
        }
    }
}

// 离屏帧与 finish
impl VulkanRhi {
    pub(super) fn begin_offscreen_frame(&mut self) -> Result<CommandBufferHandle, FrameOpError> {
        let _span = tracy_client::span!("begin_offscreen_frame");
        if self.device_lost {
            return Err(FrameOpError::DeviceLost);
        }
        assert!(!self.in_frame, "begin_offscreen_frame inside a frame");

        let cb = self.offscreen_cb;
        let slot = (self.current_frame_slot + 1) % self.frames_in_flight;
        self.enter_slot(cb, slot)?;
        self.in_frame = true;
        self.offscreen_active = true;
        Ok(cb)
    }

    /// 提交并等待完成，返回时本帧的回读回调都已执行
    pub(super) fn end_offscreen_frame(&mut self, _flags: EndFrameFlags) -> FrameOpResult {
        let _span = tracy_client::span!("end_offscreen_frame");
        assert!(self.in_frame && self.offscreen_active, "end_offscreen_frame without begin_offscreen_frame");
        let cb = self.offscreen_cb;
        assert_eq!(self.command_buffers[cb].pass, PassKind::None, "end_offscreen_frame inside a pass");

        let slot = self.current_frame_slot;
        let submitted = self.submit_primary(cb, None, None, self.slot_fences[slot]);
        self.in_frame = false;
        self.offscreen_active = false;
        submitted.map_err(|e| self.frame_op_error("queue submit", e))?;
        self.fence_tracker.submitted(slot);

        // 所有 slot 都完成之后才能强制处理
        self.wait_all_slots().map_err(|e| self.frame_op_error("wait for frame slot fences", e))?;
        self.finish_active_readbacks(true);
        self.execute_deferred_releases(true);
        Ok(())
    }

    pub(super) fn finish(&mut self) -> FrameOpResult {
        let _span = tracy_client::span!("finish");
        if !self.in_frame {
            if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
                return Err(self.frame_op_error("device wait idle", e));
            }
            self.wait_all_slots().map_err(|e| self.frame_op_error("wait for frame slot fences", e))?;
            self.execute_deferred_releases(true);
            self.finish_active_readbacks(true);
            return Ok(());
        }

        let cb = self.current_frame_command_buffer();
        assert_eq!(self.command_buffers[cb].pass, PassKind::None, "finish inside a pass");

        // swapchain 帧的 image_sem 留给 end_frame 的提交等待
        self.submit_primary(cb, None, None, vk::Fence::null())
            .map_err(|e| self.frame_op_error("queue submit", e))?;
        if let Err(e) = unsafe { self.ctx.device.queue_wait_idle(self.ctx.queue) } {
            return Err(self.frame_op_error("queue wait idle", e));
        }
        self.wait_all_slots().map_err(|e| self.frame_op_error("wait for frame slot fences", e))?;
        self.execute_deferred_releases(true);
        self.finish_active_readbacks(true);

        // 同一帧继续录制
        self.start_primary(cb).map_err(|e| self.frame_op_error("begin command buffer", e))?;
        self.command_buffers[cb].reset_commands();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 模拟若干帧的调度，记录 wait / submit 的顺序
    fn simulate(frames_in_flight: usize, frame_count: usize) -> Vec<String> {
        let mut tracker = SlotFenceTracker::new(frames_in_flight);
        let mut events = Vec::new();
        let mut slot = 0;
        for _ in 0..frame_count {
            tracker
                .wait_for_slot(slot, |s| {
                    events.push(format!("wait{s}"));
                    Ok::<(), ()>(())
                })
                .unwrap();
            events.push(format!("submit{slot}"));
            tracker.submitted(slot);
            assert!(tracker.in_flight_count() <= frames_in_flight);
            slot = (slot + 1) % frames_in_flight;
        }
        events
    }

    #[test]
    fn test_slot_is_waited_before_reuse() {
        let events = simulate(2, 6);
        assert_eq!(
            events,
            ["submit0", "submit1", "wait0", "submit0", "wait1", "submit1", "wait0", "submit0", "wait1", "submit1"]
        );
    }

    #[test]
    fn test_every_reuse_has_a_wait_in_between() {
        for frames_in_flight in 1..=3 {
            let events = simulate(frames_in_flight, 10);
            for slot in 0..frames_in_flight {
                let submit = format!("submit{slot}");
                let wait = format!("wait{slot}");
                let mine = events.iter().filter(|e| **e == submit || **e == wait).collect::<Vec<_>>();
                // submit 之后下一次出现的一定是 wait
                for pair in mine.windows(2) {
                    if *pair[0] == submit {
                        assert_eq!(*pair[1], wait);
                    }
                }
            }
        }
    }

    #[test]
    fn test_failed_wait_keeps_slot_in_flight() {
        let mut tracker = SlotFenceTracker::new(2);
        tracker.submitted(0);
        assert_eq!(tracker.wait_for_slot(0, |_| Err("timeout")), Err("timeout"));
        assert!(tracker.is_in_flight(0));
        assert_eq!(tracker.wait_for_slot(0, |_| Ok::<(), &str>(())), Ok(()));
        assert!(!tracker.is_in_flight(0));
    }

    #[test]
    fn test_wait_all_only_waits_in_flight_slots() {
        let mut tracker = SlotFenceTracker::new(3);
        tracker.submitted(0);
        tracker.submitted(2);
        let mut waited = Vec::new();
        tracker
            .wait_all(|s| {
                waited.push(s);
                Ok::<(), ()>(())
            })
            .unwrap();
        assert_eq!(waited, vec![0, 2]);
        assert_eq!(tracker.in_flight_count(), 0);
    }
}

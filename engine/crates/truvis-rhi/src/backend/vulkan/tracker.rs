//! Pass 资源跟踪
//!
//! 录制 pass 时，每个会使用资源的命令（绑定 vertex buffer、descriptor set、attachment 等）
//! 都把资源登记到当前 pass 的 tracker。pass 全部录制完之后，tracker 才知道这个 pass
//! 对每个资源的最终需求，此时再生成 pass 开始前需要的 barrier。
//!
//! 一个资源在同一个 tracker 里最多出现一次（buffer 按 slot 区分）：
//! 第一次登记时保存进入 pass 时的状态快照，之后的登记只合并需求，不会重新拍快照。

use ash::vk;
use indexmap::IndexMap;

use crate::backend::vulkan::barrier::{BufferBarrier, BufferUsageState, ImageBarrier, TextureUsageState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BufferKey {
    id: u64,
    slot: usize,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TrackedBuffer {
    pub buffer: vk::Buffer,
    pub demand: BufferUsageState,
    pub state_at_pass_begin: BufferUsageState,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TrackedTexture {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub demand: TextureUsageState,
    pub state_at_pass_begin: TextureUsageState,
}

/// pass 开始前需要执行的 barrier
#[derive(Default, Debug)]
pub(crate) struct PassBarriers {
    pub buffer_barriers: Vec<BufferBarrier>,
    pub image_barriers: Vec<ImageBarrier>,
}

impl PassBarriers {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer_barriers.is_empty() && self.image_barriers.is_empty()
    }
}

/// 单个 render / compute pass 的资源使用记录
///
/// 使用 IndexMap 保证生成 barrier 的顺序和登记顺序一致
#[derive(Default, Debug)]
pub(crate) struct PassResourceTracker {
    buffers: IndexMap<BufferKey, TrackedBuffer>,
    textures: IndexMap<u64, TrackedTexture>,
}

impl PassResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.textures.is_empty()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// 登记 buffer，返回合并之后的需求
    pub fn register_buffer(
        &mut self,
        id: u64,
        slot: usize,
        buffer: vk::Buffer,
        demand: BufferUsageState,
        state_at_pass_begin: BufferUsageState,
    ) -> BufferUsageState {
        let key = BufferKey { id, slot };
        if let Some(tracked) = self.buffers.get_mut(&key) {
            if tracked.demand.access != demand.access && (tracked.demand.is_write() || demand.is_write()) {
                log::warn!(
                    "buffer {} (slot {}) used with different accesses ({:?} and {:?}) within the same pass",
                    id,
                    slot,
                    tracked.demand.access,
                    demand.access
                );
            }
            tracked.demand.access |= demand.access;
            tracked.demand.stage |= demand.stage;
            return tracked.demand;
        }

        self.buffers.insert(
            key,
            TrackedBuffer {
                buffer,
                demand,
                state_at_pass_begin,
            },
        );
        demand
    }

    /// 登记 texture，返回合并之后的需求
    ///
    /// 同一个 pass 内需求的 layout 不一致时退化为 GENERAL
    pub fn register_texture(
        &mut self,
        id: u64,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        demand: TextureUsageState,
        state_at_pass_begin: TextureUsageState,
    ) -> TextureUsageState {
        if let Some(tracked) = self.textures.get_mut(&id) {
            if tracked.demand.layout != demand.layout {
                tracked.demand.layout = vk::ImageLayout::GENERAL;
            }
            tracked.demand.access |= demand.access;
            tracked.demand.stage |= demand.stage;
            return tracked.demand;
        }

        self.textures.insert(
            id,
            TrackedTexture {
                image,
                aspect,
                demand,
                state_at_pass_begin,
            },
        );
        demand
    }

    pub fn buffers(&self) -> impl Iterator<Item = &TrackedBuffer> {
        self.buffers.values()
    }

    pub fn textures(&self) -> impl Iterator<Item = &TrackedTexture> {
        self.textures.values()
    }

    /// 把登记的使用情况转换成 barrier
    ///
    /// - 快照和需求相同且只读：不需要 barrier
    /// - buffer 进入 pass 前从未被使用：不需要 barrier
    /// - 其余情况每个资源恰好一个 barrier（包括写之后再写）
    pub fn resolve(&self) -> PassBarriers {
        let mut barriers = PassBarriers::default();

        for tracked in self.buffers.values() {
            let before = tracked.state_at_pass_begin;
            if before.is_unused() {
                continue;
            }
            if before == tracked.demand && !tracked.demand.is_write() {
                continue;
            }
            barriers.buffer_barriers.push(BufferBarrier::transition(tracked.buffer, before, tracked.demand));
        }

        for tracked in self.textures.values() {
            let before = tracked.state_at_pass_begin;
            if before == tracked.demand && !tracked.demand.is_write() {
                continue;
            }
            barriers
                .image_barriers
                .push(ImageBarrier::transition(tracked.image, tracked.aspect, before, tracked.demand));
        }

        barriers
    }
}

/// 根据资源当前的使用状态登记 buffer，并更新使用状态
///
/// 状态没有变化的只读使用直接跳过，不进入 tracker
pub(crate) fn tracked_register_buffer(
    tracker: &mut PassResourceTracker,
    usage: &mut BufferUsageState,
    id: u64,
    slot: usize,
    buffer: vk::Buffer,
    demand: BufferUsageState,
) {
    if *usage == demand && !demand.is_write() {
        return;
    }
    *usage = tracker.register_buffer(id, slot, buffer, demand, *usage);
}

/// texture 版本的 [`tracked_register_buffer`]
pub(crate) fn tracked_register_texture(
    tracker: &mut PassResourceTracker,
    usage: &mut TextureUsageState,
    id: u64,
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    demand: TextureUsageState,
) {
    if *usage == demand && !demand.is_write() {
        return;
    }
    *usage = tracker.register_texture(id, image, aspect, demand, *usage);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn buffer(raw: u64) -> vk::Buffer {
        vk::Buffer::from_raw(raw)
    }

    fn image(raw: u64) -> vk::Image {
        vk::Image::from_raw(raw)
    }

    #[test]
    fn test_repeated_read_with_matching_state_is_skipped() {
        let mut tracker = PassResourceTracker::new();
        // 上一个 pass 已经作为 vertex buffer 使用
        let mut usage = BufferUsageState::VERTEX_BUFFER;

        // 两个 draw 绑定同一个 vertex buffer
        tracked_register_buffer(&mut tracker, &mut usage, 1, 0, buffer(10), BufferUsageState::VERTEX_BUFFER);
        tracked_register_buffer(&mut tracker, &mut usage, 1, 0, buffer(10), BufferUsageState::VERTEX_BUFFER);

        assert_eq!(tracker.buffer_count(), 0);
        assert!(tracker.resolve().is_empty());
    }

    #[test]
    fn test_read_after_upload_emits_single_barrier() {
        let mut tracker = PassResourceTracker::new();
        let mut usage = BufferUsageState::TRANSFER_DST;

        tracked_register_buffer(&mut tracker, &mut usage, 1, 0, buffer(10), BufferUsageState::VERTEX_BUFFER);
        tracked_register_buffer(&mut tracker, &mut usage, 1, 0, buffer(10), BufferUsageState::VERTEX_BUFFER);

        let barriers = tracker.resolve();
        assert_eq!(barriers.buffer_barriers.len(), 1);
        let inner = barriers.buffer_barriers[0].inner();
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);
        assert_eq!(usage, BufferUsageState::VERTEX_BUFFER);
    }

    #[test]
    fn test_never_used_buffer_needs_no_barrier() {
        let mut tracker = PassResourceTracker::new();
        let mut usage = BufferUsageState::UNUSED;
        tracked_register_buffer(&mut tracker, &mut usage, 1, 0, buffer(10), BufferUsageState::INDEX_BUFFER);
        assert_eq!(tracker.buffer_count(), 1);
        assert!(tracker.resolve().is_empty());
    }

    #[test]
    fn test_write_after_identical_write_still_barriers() {
        let storage_write = BufferUsageState::storage(vk::PipelineStageFlags2::COMPUTE_SHADER, false, true);
        let mut tracker = PassResourceTracker::new();
        let mut usage = storage_write;

        tracked_register_buffer(&mut tracker, &mut usage, 5, 1, buffer(50), storage_write);
        let barriers = tracker.resolve();
        assert_eq!(barriers.buffer_barriers.len(), 1);
        assert_eq!(barriers.buffer_barriers[0].inner().src_access_mask, vk::AccessFlags2::SHADER_STORAGE_WRITE);
    }

    #[test]
    fn test_slots_are_tracked_separately() {
        let mut tracker = PassResourceTracker::new();
        let mut usage0 = BufferUsageState::TRANSFER_DST;
        let mut usage1 = BufferUsageState::TRANSFER_DST;
        let uniform = BufferUsageState::uniform(vk::PipelineStageFlags2::VERTEX_SHADER);
        tracked_register_buffer(&mut tracker, &mut usage0, 2, 0, buffer(20), uniform);
        tracked_register_buffer(&mut tracker, &mut usage1, 2, 1, buffer(21), uniform);
        assert_eq!(tracker.resolve().buffer_barriers.len(), 2);
    }

    #[test]
    fn test_texture_snapshot_is_kept_and_demand_merged() {
        let mut tracker = PassResourceTracker::new();
        let mut usage = TextureUsageState::TRANSFER_DST;
        let aspect = vk::ImageAspectFlags::COLOR;

        let vertex_read = TextureUsageState::sampled(vk::PipelineStageFlags2::VERTEX_SHADER);
        let fragment_read = TextureUsageState::sampled(vk::PipelineStageFlags2::FRAGMENT_SHADER);
        tracked_register_texture(&mut tracker, &mut usage, 3, image(30), aspect, vertex_read);
        tracked_register_texture(&mut tracker, &mut usage, 3, image(30), aspect, fragment_read);

        let barriers = tracker.resolve();
        assert_eq!(barriers.image_barriers.len(), 1);
        let inner = barriers.image_barriers[0].inner();
        assert_eq!(inner.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(inner.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(
            inner.dst_stage_mask,
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
        );
        assert_eq!(usage.layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_conflicting_layouts_collapse_to_general() {
        let mut tracker = PassResourceTracker::new();
        let mut usage = TextureUsageState::UNDEFINED;
        let aspect = vk::ImageAspectFlags::COLOR;

        let sampled = TextureUsageState::sampled(vk::PipelineStageFlags2::COMPUTE_SHADER);
        let store = TextureUsageState::storage(vk::PipelineStageFlags2::COMPUTE_SHADER, false, true);
        tracked_register_texture(&mut tracker, &mut usage, 4, image(40), aspect, sampled);
        tracked_register_texture(&mut tracker, &mut usage, 4, image(40), aspect, store);

        let barriers = tracker.resolve();
        assert_eq!(barriers.image_barriers.len(), 1);
        let inner = barriers.image_barriers[0].inner();
        // 快照仍然是进入 pass 时的 UNDEFINED
        assert_eq!(inner.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(inner.src_stage_mask, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(inner.new_layout, vk::ImageLayout::GENERAL);
        assert!(inner.dst_access_mask.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
        assert_eq!(usage.layout, vk::ImageLayout::GENERAL);
    }
}

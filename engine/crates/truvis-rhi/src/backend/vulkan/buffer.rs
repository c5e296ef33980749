use ash::vk;
use vk_mem::Alloc;

use crate::backend::vulkan::barrier::BufferUsageState;
use crate::backend::vulkan::context::VulkanContext;
use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::VulkanRhi;
use crate::desc::{BufferDesc, BufferType, BufferUsage};
use crate::error::RhiError;
use crate::handles::BufferHandle;
use crate::native::NativeBuffer;

/// host visible 的一次性 buffer，用作 staging 或 readback
pub(crate) struct HostBuffer {
    pub buffer: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    pub size: vk::DeviceSize,
}

impl HostBuffer {
    pub fn new(ctx: &VulkanContext, size: vk::DeviceSize, readback: bool, name: &str) -> Result<Self, vk::Result> {
        let usage = if readback { vk::BufferUsageFlags::TRANSFER_DST } else { vk::BufferUsageFlags::TRANSFER_SRC };
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: if readback {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM
            } else {
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE
            },
            ..Default::default()
        };
        let (buffer, allocation) = unsafe { ctx.allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        ctx.debug_utils.set_object_name(buffer, name);
        Ok(Self {
            buffer,
            allocation,
            size,
        })
    }

    /// map → 拷贝 → flush → unmap
    pub fn write(&mut self, ctx: &VulkanContext, offset: usize, data: &[u8]) -> Result<(), vk::Result> {
        debug_assert!(offset + data.len() <= self.size as usize);
        unsafe {
            let ptr = ctx.allocator.map_memory(&mut self.allocation)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset), data.len());
            let flushed = ctx.allocator.flush_allocation(&self.allocation, offset as u64, data.len() as u64);
            ctx.allocator.unmap_memory(&mut self.allocation);
            flushed
        }
    }

    /// map → invalidate → 读取 → unmap
    pub fn read(&mut self, ctx: &VulkanContext, size: usize) -> Result<Vec<u8>, vk::Result> {
        unsafe {
            let ptr = ctx.allocator.map_memory(&mut self.allocation)?;
            let invalidated = ctx.allocator.invalidate_allocation(&self.allocation, 0, vk::WHOLE_SIZE);
            let data = std::slice::from_raw_parts(ptr, size.min(self.size as usize)).to_vec();
            ctx.allocator.unmap_memory(&mut self.allocation);
            invalidated.map(|_| data)
        }
    }

    pub fn destroy(mut self, ctx: &VulkanContext) {
        unsafe { ctx.allocator.destroy_buffer(self.buffer, &mut self.allocation) };
    }
}

/// 原生 buffer 与它的内存
pub(crate) struct BufferNative {
    pub buffer: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    /// Dynamic buffer 持久 map 的地址
    pub mapped: Option<*mut u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DynamicUpdate {
    pub offset: u32,
    pub data: Vec<u8>,
}

/// Dynamic buffer 每个 slot 待写入的更新
///
/// 更新会复制到所有 slot；每个 slot 在下一次被使用时把自己的那份写入 mapped 内存
#[derive(Debug, Default)]
pub(crate) struct DynamicUpdateQueue {
    per_slot: Vec<Vec<DynamicUpdate>>,
}

impl DynamicUpdateQueue {
    pub fn new(slot_count: usize) -> Self {
        Self {
            per_slot: vec![Vec::new(); slot_count],
        }
    }

    /// 覆盖整个 buffer 的更新会丢弃该 slot 之前排队的所有更新
    pub fn queue(&mut self, buffer_size: u32, offset: u32, data: &[u8]) {
        let full = offset == 0 && data.len() == buffer_size as usize;
        for updates in &mut self.per_slot {
            if full {
                updates.clear();
            }
            updates.push(DynamicUpdate {
                offset,
                data: data.to_vec(),
            });
        }
    }

    #[inline]
    pub fn pending(&self, slot: usize) -> &[DynamicUpdate] {
        &self.per_slot[slot]
    }

    #[inline]
    pub fn take(&mut self, slot: usize) -> Vec<DynamicUpdate> {
        std::mem::take(&mut self.per_slot[slot])
    }

    pub fn clear(&mut self) {
        self.per_slot.iter_mut().for_each(Vec::clear);
    }
}

pub(crate) struct VulkanBuffer {
    pub desc: BufferDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    /// Dynamic 每个 slot 一个，其余类型一个；未 create 时为空
    pub natives: Vec<BufferNative>,
    pub usage_state: Vec<BufferUsageState>,
    pub dynamic_updates: DynamicUpdateQueue,
    /// Static / Immutable 上传使用的 staging buffer，每个 slot 一个
    pub staging: Vec<Option<HostBuffer>>,
}

impl VulkanBuffer {
    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.desc.ty == BufferType::Dynamic
    }

    /// 当前 frame slot 对应的原生对象下标
    #[inline]
    pub fn native_index(&self, current_slot: usize) -> usize {
        if self.is_dynamic() { current_slot } else { 0 }
    }

    #[inline]
    pub fn native(&self, current_slot: usize) -> vk::Buffer {
        self.natives[self.native_index(current_slot)].buffer
    }

    fn vk_usage(&self) -> vk::BufferUsageFlags {
        let mut usage = vk::BufferUsageFlags::TRANSFER_SRC;
        if !self.is_dynamic() {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.desc.usage.contains(BufferUsage::VERTEX) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.desc.usage.contains(BufferUsage::INDEX) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.desc.usage.contains(BufferUsage::UNIFORM) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.desc.usage.contains(BufferUsage::STORAGE) {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        usage
    }

    /// 把当前 slot 待写入的 dynamic 更新写入 mapped 内存
    pub fn execute_host_writes(&mut self, ctx: &VulkanContext, slot: usize) {
        if !self.is_dynamic() || self.natives.is_empty() {
            return;
        }
        let updates = self.dynamic_updates.take(slot);
        if updates.is_empty() {
            return;
        }
        let native = &self.natives[slot];
        let Some(mapped) = native.mapped else {
            return;
        };

        let mut changed_begin = u32::MAX;
        let mut changed_end = 0;
        for update in &updates {
            debug_assert!(update.offset as usize + update.data.len() <= self.desc.size as usize);
            unsafe {
                std::ptr::copy_nonoverlapping(update.data.as_ptr(), mapped.add(update.offset as usize), update.data.len());
            }
            changed_begin = changed_begin.min(update.offset);
            changed_end = changed_end.max(update.offset + update.data.len() as u32);
        }
        if changed_begin < changed_end {
            let flushed = ctx.allocator.flush_allocation(
                &native.allocation,
                changed_begin as u64,
                (changed_end - changed_begin) as u64,
            );
            if let Err(e) = flushed {
                log::warn!("failed to flush dynamic buffer {}: {:?}", self.desc.name, e);
            }
        }
    }

    /// 读取当前 slot mapped 内存中的数据
    pub fn read_host_visible(&self, slot: usize, offset: u32, size: u32) -> Vec<u8> {
        let native = &self.natives[slot];
        let Some(mapped) = native.mapped else {
            return Vec::new();
        };
        let end = (offset + size).min(self.desc.size);
        let begin = offset.min(end);
        unsafe { std::slice::from_raw_parts(mapped.add(begin as usize), (end - begin) as usize).to_vec() }
    }
}

// buffer 接口
impl VulkanRhi {
    pub(super) fn new_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        let id = self.next_resource_id();
        let fif = self.frames_in_flight;
        self.buffers.insert(VulkanBuffer {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            natives: Vec::new(),
            usage_state: Vec::new(),
            dynamic_updates: DynamicUpdateQueue::new(fif),
            staging: (0..fif).map(|_| None).collect(),
        })
    }

    pub(super) fn create_buffer(&mut self, handle: BufferHandle) -> Result<(), RhiError> {
        self.destroy_buffer(handle);

        let fif = self.frames_in_flight;
        let ctx = &self.ctx;
        let buf = &mut self.buffers[handle];
        assert!(
            !(buf.is_dynamic() && buf.desc.usage.contains(BufferUsage::STORAGE)),
            "dynamic storage buffers are not supported"
        );

        let native_count = if buf.is_dynamic() { fif } else { 1 };
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(buf.desc.size.max(1) as u64)
            .usage(buf.vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = if buf.is_dynamic() {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            }
        } else {
            vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            }
        };

        let mut natives: Vec<BufferNative> = Vec::with_capacity(native_count);
        let mut failure = None;
        for i in 0..native_count {
            let created = unsafe { ctx.allocator.create_buffer(&buffer_ci, &alloc_ci) };
            let (buffer, mut allocation) = match created {
                Ok(pair) => pair,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            let mapped = if buf.is_dynamic() {
                match unsafe { ctx.allocator.map_memory(&mut allocation) } {
                    Ok(ptr) => Some(ptr),
                    Err(e) => {
                        unsafe { ctx.allocator.destroy_buffer(buffer, &mut allocation) };
                        failure = Some(e);
                        break;
                    }
                }
            } else {
                None
            };
            let name = if native_count > 1 { format!("{}[{}]", buf.desc.name, i) } else { buf.desc.name.clone() };
            ctx.debug_utils.set_object_name(buffer, &name);
            natives.push(BufferNative {
                buffer,
                allocation,
                mapped,
            });
        }

        if let Some(e) = failure {
            // 已经创建的部分从未被使用，直接交给释放队列
            let partial = std::mem::take(&mut natives);
            let name = buf.desc.name.clone();
            self.release_queue.release(
                ReleaseKind::Buffer {
                    natives: partial,
                    staging: Vec::new(),
                },
                None,
            );
            return Err(self.creation_error(&format!("buffer '{}'", name), e));
        }

        buf.usage_state = vec![BufferUsageState::UNUSED; natives.len()];
        buf.natives = natives;
        buf.generation += 1;
        buf.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_buffer(&mut self, handle: BufferHandle) {
        let buf = &mut self.buffers[handle];
        if buf.natives.is_empty() {
            return;
        }
        let natives = std::mem::take(&mut buf.natives);
        let staging = buf.staging.iter_mut().filter_map(Option::take).collect();
        buf.usage_state.clear();
        buf.dynamic_updates.clear();
        let last_active = buf.last_active_frame_slot;
        self.release_queue.release(ReleaseKind::Buffer { natives, staging }, last_active);
    }

    pub(super) fn release_buffer(&mut self, handle: BufferHandle) {
        self.destroy_buffer(handle);
        self.buffers.remove(handle);
    }

    pub(super) fn native_buffer(&self, handle: BufferHandle) -> NativeBuffer {
        NativeBuffer {
            objects: self.buffers[handle].natives.iter().map(|n| n.buffer).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_update_supersedes_partial_updates() {
        let mut queue = DynamicUpdateQueue::new(2);
        queue.queue(256, 0, &[1u8; 64]);
        queue.queue(256, 0, &[2u8; 256]);

        for slot in 0..2 {
            let pending = queue.pending(slot);
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].offset, 0);
            assert_eq!(pending[0].data.len(), 256);
            assert!(pending[0].data.iter().all(|b| *b == 2));
        }
    }

    #[test]
    fn test_partial_updates_accumulate_per_slot() {
        let mut queue = DynamicUpdateQueue::new(2);
        queue.queue(256, 0, &[1u8; 64]);
        queue.queue(256, 64, &[2u8; 16]);

        // slot 0 已经写入，slot 1 还保留自己的副本
        let written = queue.take(0);
        assert_eq!(written.len(), 2);
        assert!(queue.pending(0).is_empty());
        assert_eq!(queue.pending(1).len(), 2);

        // 之后的整体更新只清掉 slot 1 的旧数据
        queue.queue(256, 0, &[3u8; 256]);
        assert_eq!(queue.pending(0).len(), 1);
        assert_eq!(queue.pending(1).len(), 1);
    }

    #[test]
    fn test_full_size_at_nonzero_offset_is_not_full() {
        let mut queue = DynamicUpdateQueue::new(1);
        queue.queue(256, 0, &[0u8; 8]);
        queue.queue(256, 8, &[0u8; 248]);
        assert_eq!(queue.pending(0).len(), 2);
    }
}

//! descriptor pool 管理
//!
//! 每个 pool 记录引用计数：一次成功的分配（一组 descriptor set）加一，
//! 对应的 srb 被释放时减一。引用计数归零的 pool 在下一次分配时被 reset 复用。

use ash::vk;

use crate::backend::vulkan::VulkanConstants;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DescriptorPoolUsage {
    pub ref_count: u32,
    pub allocated_sets: u32,
}

impl DescriptorPoolUsage {
    /// 没有存活的分配但分配计数不为 0，需要 reset 之后才能复用
    #[inline]
    pub fn needs_reset(&self) -> bool {
        self.ref_count == 0 && self.allocated_sets > 0
    }

    #[inline]
    pub fn has_room_for(&self, set_count: u32) -> bool {
        self.allocated_sets + set_count <= VulkanConstants::DESCRIPTOR_SETS_PER_POOL
    }
}

struct DescriptorPoolData {
    pool: vk::DescriptorPool,
    usage: DescriptorPoolUsage,
}

#[derive(Default)]
pub(crate) struct DescriptorPoolManager {
    pools: Vec<DescriptorPoolData>,
}

impl DescriptorPoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn create_pool(device: &ash::Device) -> Result<vk::DescriptorPool, vk::Result> {
        let pool_sizes = VulkanConstants::DESCRIPTOR_POOL_SIZES
            .iter()
            .map(|(ty, count)| vk::DescriptorPoolSize::default().ty(*ty).descriptor_count(*count))
            .collect::<Vec<_>>();
        let ci = vk::DescriptorPoolCreateInfo::default()
            .max_sets(VulkanConstants::DESCRIPTOR_SETS_PER_POOL)
            .pool_sizes(&pool_sizes);
        unsafe { device.create_descriptor_pool(&ci, None) }
    }

    fn try_allocate(
        device: &ash::Device,
        pool: &mut DescriptorPoolData,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>, vk::Result> {
        let set_count = layouts.len() as u32;
        if pool.usage.needs_reset() {
            unsafe { device.reset_descriptor_pool(pool.pool, vk::DescriptorPoolResetFlags::empty())? };
            pool.usage.allocated_sets = 0;
        }
        if !pool.usage.has_room_for(set_count) {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        let ai = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool.pool).set_layouts(layouts);
        let sets = unsafe { device.allocate_descriptor_sets(&ai)? };
        pool.usage.ref_count += 1;
        pool.usage.allocated_sets += set_count;
        Ok(sets)
    }

    /// 分配一组 descriptor set，返回 set 和 pool 的下标（释放时使用）
    pub fn allocate(
        &mut self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<(Vec<vk::DescriptorSet>, usize), vk::Result> {
        // 从后往前找，最新的 pool 最可能还有空间
        for (index, pool) in self.pools.iter_mut().enumerate().rev() {
            match Self::try_allocate(device, pool, layouts) {
                Ok(sets) => return Ok((sets, index)),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) | Err(vk::Result::ERROR_FRAGMENTED_POOL) => continue,
                Err(e) => return Err(e),
            }
        }

        let pool = Self::create_pool(device)?;
        self.pools.push(DescriptorPoolData {
            pool,
            usage: DescriptorPoolUsage::default(),
        });
        let index = self.pools.len() - 1;
        let sets = Self::try_allocate(device, &mut self.pools[index], layouts)?;
        Ok((sets, index))
    }

    /// srb 销毁时调用，pool 本身等到下一次分配才 reset
    pub fn release(&mut self, pool_index: usize) {
        let usage = &mut self.pools[pool_index].usage;
        assert!(usage.ref_count > 0, "descriptor pool {} released more times than allocated", pool_index);
        usage.ref_count -= 1;
    }

    pub fn usage(&self, pool_index: usize) -> DescriptorPoolUsage {
        self.pools[pool_index].usage
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for pool in self.pools.drain(..) {
            unsafe { device.destroy_descriptor_pool(pool.pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_reset_rules() {
        let mut usage = DescriptorPoolUsage::default();
        assert!(!usage.needs_reset());

        usage.ref_count = 2;
        usage.allocated_sets = 4;
        assert!(!usage.needs_reset());

        usage.ref_count = 0;
        assert!(usage.needs_reset());
    }

    #[test]
    fn test_capacity() {
        let usage = DescriptorPoolUsage {
            ref_count: 1,
            allocated_sets: VulkanConstants::DESCRIPTOR_SETS_PER_POOL - 2,
        };
        assert!(usage.has_room_for(2));
        assert!(!usage.has_room_for(3));
    }
}

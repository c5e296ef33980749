//! shader resource bindings
//!
//! 每个 srb 为每个 frame slot 分配一个 descriptor set。set 的内容只在绑定时更新：
//! 绑定时计算每个 binding 引用的资源 (id, generation)，与该 slot 上次写入的记录比较，
//! 有变化（资源换了，或者资源被重新 create）才重写 descriptor set。

use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::{VulkanRhi, convert};
use crate::desc::{BindingResource, ShaderResourceBinding};
use crate::error::RhiError;
use crate::handles::SrbHandle;

/// 资源的身份：id 区分对象，generation 区分同一个对象的多次 create
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct ResourceKey {
    pub id: u64,
    pub generation: u32,
}

/// 一个 binding 写入 descriptor 时引用的资源，纹理还带有 sampler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct BoundBinding {
    pub resource: ResourceKey,
    pub sampler: Option<ResourceKey>,
}

/// 某个 slot 的 descriptor set 上次写入时的资源
#[derive(Clone, Debug, Default)]
pub(crate) struct SrbSlotState {
    bound: Option<Vec<BoundBinding>>,
}

impl SrbSlotState {
    /// 和当前引用的资源比较，不同则记录并返回 true（需要重写）
    pub fn update(&mut self, current: &[BoundBinding]) -> bool {
        if self.bound.as_deref() == Some(current) {
            return false;
        }
        self.bound = Some(current.to_vec());
        true
    }

    pub fn invalidate(&mut self) {
        self.bound = None;
    }
}

pub(crate) struct SrbNative {
    pub layout: vk::DescriptorSetLayout,
    /// 每个 frame slot 一个
    pub sets: Vec<vk::DescriptorSet>,
    pub pool_index: usize,
}

pub(crate) struct VulkanSrb {
    /// 按 binding 排序
    pub bindings: Vec<ShaderResourceBinding>,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub native: Option<SrbNative>,
    pub slot_states: Vec<SrbSlotState>,
}

impl VulkanSrb {
    pub fn descriptor_type(resource: &BindingResource) -> vk::DescriptorType {
        match resource {
            BindingResource::UniformBuffer {
                has_dynamic_offset: true,
                ..
            } => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            BindingResource::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            BindingResource::SampledTexture { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingResource::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            BindingResource::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
        }
    }

    /// slot 的 descriptor set 需要重写时返回它，并记录这次写入的资源
    pub fn stale_set(&mut self, slot: usize, current: &[BoundBinding]) -> Option<vk::DescriptorSet> {
        let Some(native) = self.native.as_ref() else {
            log::error!("srb {} is bound before create", self.id);
            return None;
        };
        self.slot_states[slot].update(current).then(|| native.sets[slot])
    }

    /// 按 binding 顺序排列的 dynamic offset，缺省为 0
    pub fn dynamic_offsets(&self, offsets: &[(u32, u32)]) -> Vec<u32> {
        self.bindings
            .iter()
            .filter(|b| matches!(b.resource, BindingResource::UniformBuffer { has_dynamic_offset: true, .. }))
            .map(|b| offsets.iter().find(|(binding, _)| *binding == b.binding).map_or(0, |(_, offset)| *offset))
            .collect()
    }
}

fn sorted_bindings(mut bindings: Vec<ShaderResourceBinding>) -> Vec<ShaderResourceBinding> {
    bindings.sort_by_key(|b| b.binding);
    bindings
}

enum DescriptorInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

impl VulkanRhi {
    pub(super) fn new_shader_resource_bindings(&mut self, bindings: Vec<ShaderResourceBinding>) -> SrbHandle {
        let id = self.next_resource_id();
        let fif = self.frames_in_flight;
        self.srbs.insert(VulkanSrb {
            bindings: sorted_bindings(bindings),
            id,
            generation: 0,
            last_active_frame_slot: None,
            native: None,
            slot_states: vec![SrbSlotState::default(); fif],
        })
    }

    /// 只替换资源而 layout 不变时，不需要重新 create
    pub(super) fn set_shader_resource_bindings(&mut self, handle: SrbHandle, bindings: Vec<ShaderResourceBinding>) {
        let srb = &mut self.srbs[handle];
        srb.bindings = sorted_bindings(bindings);
        srb.slot_states.iter_mut().for_each(SrbSlotState::invalidate);
    }

    pub(super) fn create_srb(&mut self, handle: SrbHandle) -> Result<(), RhiError> {
        self.destroy_srb(handle);

        let device = &self.ctx.device;
        let srb = &mut self.srbs[handle];
        let layout_bindings = srb
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(VulkanSrb::descriptor_type(&b.resource))
                    .descriptor_count(1)
                    .stage_flags(convert::shader_stages(b.stages))
            })
            .collect_vec();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_ci, None)? };

        let layouts = vec![layout; self.frames_in_flight];
        let (sets, pool_index) = match self.descriptor_pools.allocate(device, &layouts) {
            Ok(allocated) => allocated,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(e.into());
            }
        };

        srb.native = Some(SrbNative {
            layout,
            sets,
            pool_index,
        });
        srb.slot_states.iter_mut().for_each(SrbSlotState::invalidate);
        srb.generation += 1;
        srb.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_srb(&mut self, handle: SrbHandle) {
        let srb = &mut self.srbs[handle];
        if let Some(native) = srb.native.take() {
            let last_active = srb.last_active_frame_slot;
            self.release_queue.release(
                ReleaseKind::ShaderResourceBindings {
                    layout: native.layout,
                    pool_index: native.pool_index,
                },
                last_active,
            );
        }
    }

    pub(super) fn release_srb(&mut self, handle: SrbHandle) {
        self.destroy_srb(handle);
        self.srbs.remove(handle);
    }

    /// 当前绑定的资源身份
    fn bound_bindings(&self, handle: SrbHandle) -> Vec<BoundBinding> {
        self.srbs[handle]
            .bindings
            .iter()
            .map(|b| match b.resource {
                BindingResource::UniformBuffer { buffer, .. } | BindingResource::StorageBuffer { buffer, .. } => {
                    let buf = &self.buffers[buffer];
                    BoundBinding {
                        resource: ResourceKey {
                            id: buf.id,
                            generation: buf.generation,
                        },
                        sampler: None,
                    }
                }
                BindingResource::SampledTexture { texture, sampler } => {
                    let tex = &self.textures[texture];
                    let sampler = &self.samplers[sampler];
                    BoundBinding {
                        resource: ResourceKey {
                            id: tex.id,
                            generation: tex.generation,
                        },
                        sampler: Some(ResourceKey {
                            id: sampler.id,
                            generation: sampler.generation,
                        }),
                    }
                }
                BindingResource::StorageImage { texture, .. } => {
                    let tex = &self.textures[texture];
                    BoundBinding {
                        resource: ResourceKey {
                            id: tex.id,
                            generation: tex.generation,
                        },
                        sampler: None,
                    }
                }
            })
            .collect()
    }

    /// 绑定前调用：当前 slot 的 descriptor set 过期则重写，返回是否发生了重写
    pub(super) fn update_srb_if_stale(&mut self, handle: SrbHandle) -> bool {
        let slot = self.current_frame_slot;
        let current = self.bound_bindings(handle);
        let srb = &mut self.srbs[handle];
        let Some(set) = srb.stale_set(slot, &current) else {
            return false;
        };

        let infos = srb
            .bindings
            .iter()
            .map(|b| match b.resource {
                BindingResource::UniformBuffer {
                    buffer, offset, size, ..
                }
                | BindingResource::StorageBuffer {
                    buffer, offset, size, ..
                } => {
                    let buf = &self.buffers[buffer];
                    DescriptorInfo::Buffer(vk::DescriptorBufferInfo {
                        buffer: buf.native(slot),
                        offset: offset as u64,
                        range: if size == 0 { vk::WHOLE_SIZE } else { size as u64 },
                    })
                }
                BindingResource::SampledTexture { texture, sampler } => {
                    DescriptorInfo::Image(vk::DescriptorImageInfo {
                        sampler: self.samplers[sampler].native.unwrap_or_default(),
                        image_view: self.textures[texture].native().view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    })
                }
                BindingResource::StorageImage { texture, level, .. } => {
                    let native = self.textures[texture].native();
                    let image_view = native.level_views.get(level as usize).copied().unwrap_or(native.view);
                    DescriptorInfo::Image(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view,
                        image_layout: vk::ImageLayout::GENERAL,
                    })
                }
            })
            .collect_vec();

        let writes = srb
            .bindings
            .iter()
            .zip(infos.iter())
            .map(|(b, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(b.binding)
                    .descriptor_type(VulkanSrb::descriptor_type(&b.resource));
                match info {
                    DescriptorInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    DescriptorInfo::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect_vec();

        unsafe { self.ctx.device.update_descriptor_sets(&writes, &[]) };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn binding(id: u64, generation: u32) -> BoundBinding {
        BoundBinding {
            resource: ResourceKey { id, generation },
            sampler: None,
        }
    }

    #[test]
    fn test_first_bind_writes() {
        let mut state = SrbSlotState::default();
        assert!(state.update(&[binding(1, 1)]));
        assert!(!state.update(&[binding(1, 1)]));
    }

    #[test]
    fn test_recreated_resource_is_stale() {
        let mut state = SrbSlotState::default();
        state.update(&[binding(1, 1), binding(2, 1)]);

        // buffer 2 被重新 create，id 不变 generation 变化
        assert!(state.update(&[binding(1, 1), binding(2, 2)]));
        assert!(!state.update(&[binding(1, 1), binding(2, 2)]));
    }

    #[test]
    fn test_sampler_change_is_stale() {
        let mut state = SrbSlotState::default();
        let with_sampler = |sampler_id| BoundBinding {
            resource: ResourceKey { id: 3, generation: 1 },
            sampler: Some(ResourceKey {
                id: sampler_id,
                generation: 1,
            }),
        };
        state.update(&[with_sampler(10)]);
        assert!(state.update(&[with_sampler(11)]));
    }

    #[test]
    fn test_invalidate_forces_rewrite() {
        let mut state = SrbSlotState::default();
        state.update(&[binding(1, 1)]);
        state.invalidate();
        assert!(state.update(&[binding(1, 1)]));
    }

    fn created_srb(fif: usize) -> VulkanSrb {
        VulkanSrb {
            bindings: vec![],
            id: 7,
            generation: 1,
            last_active_frame_slot: None,
            native: Some(SrbNative {
                layout: vk::DescriptorSetLayout::null(),
                sets: (0..fif as u64).map(|i| vk::DescriptorSet::from_raw(100 + i)).collect(),
                pool_index: 0,
            }),
            slot_states: vec![SrbSlotState::default(); fif],
        }
    }

    #[test]
    fn test_each_slot_rewrites_its_own_set() {
        let mut srb = created_srb(2);
        let current = [binding(1, 1)];
        assert_eq!(srb.stale_set(0, &current), Some(vk::DescriptorSet::from_raw(100)));
        assert_eq!(srb.stale_set(0, &current), None);

        // slot 1 的 set 从未写过
        assert_eq!(srb.stale_set(1, &current), Some(vk::DescriptorSet::from_raw(101)));
        assert_eq!(srb.stale_set(1, &current), None);

        // 资源重新 create 后两个 slot 都要重写
        let recreated = [binding(1, 2)];
        assert_eq!(srb.stale_set(1, &recreated), Some(vk::DescriptorSet::from_raw(101)));
        assert_eq!(srb.stale_set(0, &recreated), Some(vk::DescriptorSet::from_raw(100)));
    }

    #[test]
    fn test_bind_before_create_is_not_recorded() {
        let mut srb = created_srb(1);
        let native = srb.native.take();
        assert_eq!(srb.stale_set(0, &[binding(1, 1)]), None);

        // create 之后第一次绑定仍然要写入
        srb.native = native;
        assert_eq!(srb.stale_set(0, &[binding(1, 1)]), Some(vk::DescriptorSet::from_raw(100)));
    }
}

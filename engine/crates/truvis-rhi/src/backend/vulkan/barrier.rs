//! 资源的使用状态，以及 barrier 的构造辅助
//!
//! 使用状态记录在资源对象上，pass tracker 以它为基准判断是否需要 barrier。

use ash::vk;

/// 所有会产生写操作的 access
const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::SHADER_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::HOST_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
);

#[inline]
pub(crate) fn access_is_write(access: vk::AccessFlags2) -> bool {
    access.intersects(WRITE_ACCESS)
}

/// buffer 某个 slot 的使用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BufferUsageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl Default for BufferUsageState {
    fn default() -> Self {
        Self::UNUSED
    }
}

impl BufferUsageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    /// 从未被 GPU 使用过，不需要 barrier
    pub const UNUSED: Self = Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE);

    pub const VERTEX_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::VERTEX_INPUT, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);

    pub const INDEX_BUFFER: Self = Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ);

    pub const TRANSFER_SRC: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);

    pub const TRANSFER_DST: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

    #[inline]
    pub fn uniform(stage: vk::PipelineStageFlags2) -> Self {
        Self::new(stage, vk::AccessFlags2::UNIFORM_READ)
    }

    #[inline]
    pub fn storage(stage: vk::PipelineStageFlags2, read: bool, write: bool) -> Self {
        let mut access = vk::AccessFlags2::NONE;
        if read {
            access |= vk::AccessFlags2::SHADER_STORAGE_READ;
        }
        if write {
            access |= vk::AccessFlags2::SHADER_STORAGE_WRITE;
        }
        Self::new(stage, access)
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.stage.is_empty()
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        access_is_write(self.access)
    }
}

/// texture 的使用状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TextureUsageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for TextureUsageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl TextureUsageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 刚创建、内容未定义
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw()
                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// 采样读取
    #[inline]
    pub fn sampled(stage: vk::PipelineStageFlags2) -> Self {
        Self::new(stage, vk::AccessFlags2::SHADER_SAMPLED_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    /// storage image 的 load / store
    #[inline]
    pub fn storage(stage: vk::PipelineStageFlags2, read: bool, write: bool) -> Self {
        let mut access = vk::AccessFlags2::NONE;
        if read {
            access |= vk::AccessFlags2::SHADER_STORAGE_READ;
        }
        if write {
            access |= vk::AccessFlags2::SHADER_STORAGE_WRITE;
        }
        Self::new(stage, access, vk::ImageLayout::GENERAL)
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        access_is_write(self.access)
    }
}

/// stage 为空时（资源从未使用）barrier 的 src stage 用 TOP_OF_PIPE 代替
#[inline]
pub(crate) fn src_stage_or_top(stage: vk::PipelineStageFlags2) -> vk::PipelineStageFlags2 {
    if stage.is_empty() { vk::PipelineStageFlags2::TOP_OF_PIPE } else { stage }
}

/// 便捷创建 image memory barrier 的结构体
#[derive(Clone, Copy, Debug)]
pub(crate) struct ImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for ImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                },
                ..Default::default()
            },
        }
    }
}

impl ImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从一个使用状态过渡到另一个
    pub fn transition(image: vk::Image, aspect: vk::ImageAspectFlags, from: TextureUsageState, to: TextureUsageState) -> Self {
        Self::new()
            .image(image)
            .image_aspect_flag(aspect)
            .layout_transfer(from.layout, to.layout)
            .src_mask(src_stage_or_top(from.stage), from.access)
            .dst_mask(to.stage, to.access)
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    /// 只作用于指定的 layer 和 mip level 范围
    #[inline]
    pub fn subresource(mut self, base_layer: u32, layer_count: u32, base_level: u32, level_count: u32) -> Self {
        self.inner.subresource_range.base_array_layer = base_layer;
        self.inner.subresource_range.layer_count = layer_count;
        self.inner.subresource_range.base_mip_level = base_level;
        self.inner.subresource_range.level_count = level_count;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct BufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for BufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

impl BufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(buffer: vk::Buffer, from: BufferUsageState, to: BufferUsageState) -> Self {
        Self::new()
            .buffer(buffer, 0, vk::WHOLE_SIZE)
            .src_mask(src_stage_or_top(from.stage), from.access)
            .dst_mask(to.stage, to.access)
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'static> {
        &self.inner
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_write_detection() {
        assert!(TextureUsageState::COLOR_ATTACHMENT_WRITE.is_write());
        assert!(TextureUsageState::TRANSFER_DST.is_write());
        assert!(!TextureUsageState::sampled(vk::PipelineStageFlags2::FRAGMENT_SHADER).is_write());
        assert!(BufferUsageState::storage(vk::PipelineStageFlags2::COMPUTE_SHADER, false, true).is_write());
        assert!(!BufferUsageState::VERTEX_BUFFER.is_write());
    }

    #[test]
    fn test_transition_from_undefined_uses_top_of_pipe() {
        let image = vk::Image::from_raw(7);
        let barrier = ImageBarrier::transition(
            image,
            vk::ImageAspectFlags::COLOR,
            TextureUsageState::UNDEFINED,
            TextureUsageState::TRANSFER_DST,
        );
        let inner = barrier.inner();
        assert_eq!(inner.src_stage_mask, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(inner.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(inner.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(inner.image, image);
    }
}

//! 资源更新批次的执行
//!
//! 先处理 buffer 操作再处理 texture 操作。产生的拷贝命令和 barrier 都进入
//! 当前 command buffer，staging buffer 按当前 frame slot 延迟释放。

use ash::vk;

use crate::backend::vulkan::barrier::{BufferBarrier, BufferUsageState, ImageBarrier, TextureUsageState};
use crate::backend::vulkan::buffer::HostBuffer;
use crate::backend::vulkan::command_list::Command;
use crate::backend::vulkan::readback::ActiveReadback;
use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::swapchain::SwapchainImageUse;
use crate::backend::vulkan::{VulkanConstants, VulkanRhi, convert};
use crate::desc::{BufferType, SwapchainFlags, TextureFlags, mip_size};
use crate::handles::{BufferHandle, CommandBufferHandle, TextureHandle};
use crate::resource_update::{
    BufferOp, ReadbackCallback, ReadbackData, ReadbackSource, ResourceUpdateBatch, TextureCopyDesc, TextureOp,
    TextureSubresourceUpload,
};

/// 压缩格式的拷贝区域必须按 block 对齐：起点向下对齐，尺寸向上对齐，但不能超出 mip level 的边界
pub(crate) fn compressed_copy_region(
    offset: (u32, u32),
    size: (u32, u32),
    level_size: (u32, u32),
    block: (u32, u32),
) -> ((u32, u32), (u32, u32)) {
    let x = offset.0 / block.0 * block.0;
    let y = offset.1 / block.1 * block.1;
    let mut w = size.0.div_ceil(block.0) * block.0;
    let mut h = size.1.div_ceil(block.1) * block.1;
    if x + w > level_size.0 {
        w = level_size.0.saturating_sub(x);
    }
    if y + h > level_size.1 {
        h = level_size.1.saturating_sub(y);
    }
    ((x, y), (w, h))
}

/// 拷贝源和回读源必须以 USED_AS_TRANSFER_SOURCE 创建，否则 image 没有 TRANSFER_SRC usage
pub(crate) fn is_transfer_source(flags: TextureFlags) -> bool {
    flags.contains(TextureFlags::USED_AS_TRANSFER_SOURCE)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MipBlit {
    pub src_level: u32,
    pub dst_level: u32,
    pub src_size: (u32, u32, u32),
    pub dst_size: (u32, u32, u32),
}

/// 逐级 blit：level n-1 -> level n
pub(crate) fn mip_blit_plan(width: u32, height: u32, depth: u32, levels: u32) -> Vec<MipBlit> {
    let size_at = |level: u32| ((width >> level).max(1), (height >> level).max(1), (depth >> level).max(1));
    (1..levels)
        .map(|level| MipBlit {
            src_level: level - 1,
            dst_level: level,
            src_size: size_at(level - 1),
            dst_size: size_at(level),
        })
        .collect()
}

#[inline]
fn offset_3d((x, y, z): (u32, u32, u32)) -> vk::Offset3D {
    vk::Offset3D {
        x: x as i32,
        y: y as i32,
        z: z as i32,
    }
}

#[inline]
fn subresource_layers(aspect: vk::ImageAspectFlags, level: u32, base_layer: u32, layer_count: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: aspect,
        mip_level: level,
        base_array_layer: base_layer,
        layer_count,
    }
}

impl SwapchainImageUse {
    /// swapchain image 当前所处的状态
    pub(crate) fn usage_state(self) -> TextureUsageState {
        match self {
            Self::None => TextureUsageState::UNDEFINED,
            Self::Render => TextureUsageState::new(
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
            Self::TransferSource => TextureUsageState::TRANSFER_SRC,
        }
    }
}

// barrier 辅助
impl VulkanRhi {
    /// 把非 dynamic buffer 转到 `new_state`，返回原生 buffer
    fn transition_buffer(&mut self, cb: CommandBufferHandle, handle: BufferHandle, new_state: BufferUsageState) -> vk::Buffer {
        let slot = self.current_frame_slot;
        let buf = &mut self.buffers[handle];
        buf.last_active_frame_slot = Some(slot);
        let native = buf.native(slot);
        let old_state = buf.usage_state[0];
        buf.usage_state[0] = new_state;

        if !old_state.is_unused() && !(old_state == new_state && !new_state.is_write()) {
            self.record(
                cb,
                Command::Barrier {
                    buffer_barriers: vec![BufferBarrier::transition(native, old_state, new_state)],
                    image_barriers: vec![],
                },
            );
        }
        native
    }

    /// 把整个 texture 转到 `new_state`，返回原生 image 和 aspect
    fn transition_texture(
        &mut self,
        cb: CommandBufferHandle,
        handle: TextureHandle,
        new_state: TextureUsageState,
    ) -> (vk::Image, vk::ImageAspectFlags) {
        let slot = self.current_frame_slot;
        let tex = &mut self.textures[handle];
        tex.last_active_frame_slot = Some(slot);
        let (image, aspect) = {
            let native = tex.native();
            (native.image, native.aspect)
        };
        let old_state = tex.usage_state;
        tex.usage_state = new_state;

        if !(old_state == new_state && !new_state.is_write()) {
            self.record(
                cb,
                Command::Barrier {
                    buffer_barriers: vec![],
                    image_barriers: vec![ImageBarrier::transition(image, aspect, old_state, new_state)],
                },
            );
        }
        (image, aspect)
    }

    fn record_image_barriers(&mut self, cb: CommandBufferHandle, image_barriers: Vec<ImageBarrier>) {
        if !image_barriers.is_empty() {
            self.record(
                cb,
                Command::Barrier {
                    buffer_barriers: vec![],
                    image_barriers,
                },
            );
        }
    }
}

// 批次执行
impl VulkanRhi {
    pub(super) fn enqueue_resource_updates(&mut self, cb: CommandBufferHandle, batch: ResourceUpdateBatch) {
        let _span = tracy_client::span!("enqueue_resource_updates");
        let ResourceUpdateBatch {
            buffer_ops,
            texture_ops,
        } = batch;

        for op in buffer_ops {
            match op {
                BufferOp::DynamicUpdate { buffer, offset, data } => self.update_dynamic_buffer(buffer, offset, &data),
                BufferOp::StaticUpload { buffer, offset, data } => self.upload_static_buffer(cb, buffer, offset, &data),
                BufferOp::Read {
                    buffer,
                    offset,
                    size,
                    callback,
                } => self.read_back_buffer(cb, buffer, offset, size, callback),
            }
        }

        for op in texture_ops {
            match op {
                TextureOp::Upload { texture, subresources } => self.upload_texture(cb, texture, &subresources),
                TextureOp::Copy { dst, src, desc } => self.copy_texture(cb, dst, src, &desc),
                TextureOp::Read {
                    source: ReadbackSource::Texture { texture, layer, level },
                    callback,
                } => self.read_back_texture(cb, texture, layer, level, callback),
                TextureOp::Read {
                    source: ReadbackSource::CurrentSwapchainImage,
                    callback,
                } => self.read_back_swapchain_image(cb, callback),
                TextureOp::GenerateMips { texture } => self.generate_mips(cb, texture),
            }
        }
    }

    fn update_dynamic_buffer(&mut self, buffer: BufferHandle, offset: u32, data: &[u8]) {
        let buf = &mut self.buffers[buffer];
        assert!(buf.is_dynamic(), "buffer '{}' is not Dynamic", buf.desc.name);
        assert!(
            offset as usize + data.len() <= buf.desc.size as usize,
            "dynamic update out of range for buffer '{}'",
            buf.desc.name
        );
        buf.dynamic_updates.queue(buf.desc.size, offset, data);
    }

    fn upload_static_buffer(&mut self, cb: CommandBufferHandle, buffer: BufferHandle, offset: u32, data: &[u8]) {
        let slot = self.current_frame_slot;
        let buf = &mut self.buffers[buffer];
        assert!(!buf.is_dynamic(), "buffer '{}' is Dynamic, use update_dynamic_buffer", buf.desc.name);
        if data.is_empty() {
            return;
        }
        if buf.natives.is_empty() {
            log::error!("upload to buffer '{}' before create", buf.desc.name);
            return;
        }
        if offset as usize + data.len() > buf.desc.size as usize {
            log::error!(
                "upload of {} bytes at offset {} exceeds buffer '{}' ({} bytes)",
                data.len(),
                offset,
                buf.desc.name,
                buf.desc.size
            );
            return;
        }

        // staging 和 buffer 一样大，上传数据放在同样的 offset
        let mut staging = match buf.staging[slot].take() {
            Some(staging) => staging,
            None => match HostBuffer::new(&self.ctx, buf.desc.size as u64, false, &format!("{}-staging", buf.desc.name)) {
                Ok(staging) => staging,
                Err(e) => {
                    log::error!("failed to create staging buffer for '{}': {:?}", buf.desc.name, e);
                    return;
                }
            },
        };
        if let Err(e) = staging.write(&self.ctx, offset as usize, data) {
            log::error!("failed to write staging buffer for '{}': {:?}", buf.desc.name, e);
            buf.staging[slot] = Some(staging);
            return;
        }
        let is_immutable = buf.desc.ty == BufferType::Immutable;

        let dst = self.transition_buffer(cb, buffer, BufferUsageState::TRANSFER_DST);
        self.record(
            cb,
            Command::CopyBuffer {
                src: staging.buffer,
                dst,
                region: vk::BufferCopy {
                    src_offset: offset as u64,
                    dst_offset: offset as u64,
                    size: data.len() as u64,
                },
            },
        );

        // Immutable buffer 之后不会再上传
        if is_immutable {
            self.release_queue.release(ReleaseKind::StagingBuffer(staging), Some(slot));
        } else {
            self.buffers[buffer].staging[slot] = Some(staging);
        }
    }

    fn read_back_buffer(
        &mut self,
        cb: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u32,
        size: u32,
        callback: ReadbackCallback,
    ) {
        let slot = self.current_frame_slot;
        let buf = &mut self.buffers[buffer];
        if buf.natives.is_empty() {
            log::error!("read back of buffer '{}' before create", buf.desc.name);
            return;
        }
        let size = size.min(buf.desc.size.saturating_sub(offset));

        // dynamic buffer 直接读取 mapped 内存，回调立即执行
        if buf.is_dynamic() {
            buf.execute_host_writes(&self.ctx, slot);
            let data = buf.read_host_visible(slot, offset, size);
            callback(ReadbackData {
                data,
                ..Default::default()
            });
            return;
        }
        if size == 0 {
            callback(ReadbackData::default());
            return;
        }

        let readback = match HostBuffer::new(&self.ctx, size as u64, true, &format!("{}-readback", buf.desc.name)) {
            Ok(readback) => readback,
            Err(e) => {
                log::error!("failed to create readback buffer for '{}': {:?}", buf.desc.name, e);
                return;
            }
        };
        let src = self.transition_buffer(cb, buffer, BufferUsageState::TRANSFER_SRC);
        self.record(
            cb,
            Command::CopyBuffer {
                src,
                dst: readback.buffer,
                region: vk::BufferCopy {
                    src_offset: offset as u64,
                    dst_offset: 0,
                    size: size as u64,
                },
            },
        );
        self.active_readbacks.release(
            ActiveReadback {
                buffer: readback,
                size: size as usize,
                format: None,
                width: 0,
                height: 0,
                callback,
            },
            Some(slot),
        );
    }

    fn upload_texture(&mut self, cb: CommandBufferHandle, texture: TextureHandle, subresources: &[TextureSubresourceUpload]) {
        let slot = self.current_frame_slot;
        let tex = &self.textures[texture];
        let Some(native) = tex.native.as_ref() else {
            log::error!("upload to texture '{}' before create", tex.desc.name);
            return;
        };
        let format = tex.desc.format;
        let is_3d = tex.desc.flags.contains(TextureFlags::THREE_DIMENSIONAL);
        let block = format.block_dim();
        let alignment = format.block_bytes().max(VulkanConstants::STAGING_ALIGNMENT) as usize;

        // 所有 subresource 的数据拼到一个 staging buffer 中
        let mut staging_data: Vec<u8> = Vec::new();
        let mut regions = Vec::with_capacity(subresources.len());
        for sub in subresources {
            if sub.level >= native.mip_levels {
                log::warn!("skip upload to level {} of texture '{}'", sub.level, tex.desc.name);
                continue;
            }
            let level_size = mip_size(tex.desc.width, tex.desc.height, sub.level);
            let size = sub.size.unwrap_or(level_size);
            let (expected, _) = format.image_size_bytes(size.0, size.1);
            if sub.data.len() < expected as usize {
                log::warn!(
                    "skip upload to texture '{}' level {}: {} bytes given, {} expected",
                    tex.desc.name,
                    sub.level,
                    sub.data.len(),
                    expected
                );
                continue;
            }

            let buffer_offset = staging_data.len().next_multiple_of(alignment);
            staging_data.resize(buffer_offset, 0);
            staging_data.extend_from_slice(&sub.data[..expected as usize]);

            let (offset, extent) = if format.is_compressed() {
                compressed_copy_region((sub.dst_x, sub.dst_y), size, level_size, block)
            } else {
                ((sub.dst_x, sub.dst_y), size)
            };
            // 3D 纹理的 layer 是深度切片
            let (base_layer, z) = if is_3d { (0, sub.layer) } else { (sub.layer, 0) };
            regions.push(vk::BufferImageCopy {
                buffer_offset: buffer_offset as u64,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: subresource_layers(native.aspect, sub.level, base_layer, 1),
                image_offset: offset_3d((offset.0, offset.1, z)),
                image_extent: vk::Extent3D {
                    width: extent.0,
                    height: extent.1,
                    depth: 1,
                },
            });
        }
        if regions.is_empty() {
            return;
        }

        let name = format!("{}-upload", tex.desc.name);
        let mut staging = match HostBuffer::new(&self.ctx, staging_data.len() as u64, false, &name) {
            Ok(staging) => staging,
            Err(e) => {
                log::error!("failed to create {}: {:?}", name, e);
                return;
            }
        };
        if let Err(e) = staging.write(&self.ctx, 0, &staging_data) {
            log::error!("failed to write {}: {:?}", name, e);
            staging.destroy(&self.ctx);
            return;
        }

        let (image, _) = self.transition_texture(cb, texture, TextureUsageState::TRANSFER_DST);
        self.record(
            cb,
            Command::CopyBufferToImage {
                src: staging.buffer,
                dst: image,
                regions,
            },
        );
        self.release_queue.release(ReleaseKind::StagingBuffer(staging), Some(slot));
    }

    fn copy_texture(&mut self, cb: CommandBufferHandle, dst: TextureHandle, src: TextureHandle, desc: &TextureCopyDesc) {
        if src == dst {
            log::error!("copy between subresources of the same texture is not supported");
            return;
        }
        let src_desc = &self.textures[src].desc;
        if !is_transfer_source(src_desc.flags) {
            log::error!("copy source '{}' was not created with USED_AS_TRANSFER_SOURCE", src_desc.name);
            return;
        }
        let (width, height) = desc.size.unwrap_or_else(|| mip_size(src_desc.width, src_desc.height, desc.src_level));

        let (src_image, src_aspect) = self.transition_texture(cb, src, TextureUsageState::TRANSFER_SRC);
        let (dst_image, dst_aspect) = self.transition_texture(cb, dst, TextureUsageState::TRANSFER_DST);
        self.record(
            cb,
            Command::CopyImage {
                src: src_image,
                dst: dst_image,
                region: vk::ImageCopy {
                    src_subresource: subresource_layers(src_aspect, desc.src_level, desc.src_layer, 1),
                    src_offset: offset_3d((desc.src_offset.0, desc.src_offset.1, 0)),
                    dst_subresource: subresource_layers(dst_aspect, desc.dst_level, desc.dst_layer, 1),
                    dst_offset: offset_3d((desc.dst_offset.0, desc.dst_offset.1, 0)),
                    extent: vk::Extent3D { width, height, depth: 1 },
                },
            },
        );
    }

    fn read_back_texture(
        &mut self,
        cb: CommandBufferHandle,
        texture: TextureHandle,
        layer: u32,
        level: u32,
        callback: ReadbackCallback,
    ) {
        let slot = self.current_frame_slot;
        let tex = &self.textures[texture];
        if tex.native.is_none() {
            log::error!("read back of texture '{}' before create", tex.desc.name);
            return;
        }
        if tex.desc.sample_count > 1 {
            log::error!("read back of multisample texture '{}' is not supported", tex.desc.name);
            return;
        }
        if !is_transfer_source(tex.desc.flags) {
            log::error!("texture '{}' was not created with USED_AS_TRANSFER_SOURCE", tex.desc.name);
            return;
        }
        let format = tex.desc.format;
        let (width, height) = mip_size(tex.desc.width, tex.desc.height, level);
        let (byte_size, _) = format.image_size_bytes(width, height);
        let (base_layer, z) = if tex.desc.flags.contains(TextureFlags::THREE_DIMENSIONAL) { (0, layer) } else { (layer, 0) };

        let readback =
            match HostBuffer::new(&self.ctx, byte_size as u64, true, &format!("{}-readback", tex.desc.name)) {
                Ok(readback) => readback,
                Err(e) => {
                    log::error!("failed to create readback buffer for '{}': {:?}", tex.desc.name, e);
                    return;
                }
            };
        let (image, aspect) = self.transition_texture(cb, texture, TextureUsageState::TRANSFER_SRC);
        self.record(
            cb,
            Command::CopyImageToBuffer {
                src: image,
                src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst: readback.buffer,
                region: vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: subresource_layers(aspect, level, base_layer, 1),
                    image_offset: offset_3d((0, 0, z)),
                    image_extent: vk::Extent3D { width, height, depth: 1 },
                },
            },
        );
        self.active_readbacks.release(
            ActiveReadback {
                buffer: readback,
                size: byte_size as usize,
                format: Some(format),
                width,
                height,
                callback,
            },
            Some(slot),
        );
    }

    fn read_back_swapchain_image(&mut self, cb: CommandBufferHandle, callback: ReadbackCallback) {
        let slot = self.current_frame_slot;
        let Some(sc_handle) = self.current_swapchain else {
            log::warn!("swapchain read back requested outside of a swapchain frame");
            return;
        };
        let sc = &mut self.swapchains[sc_handle];
        if !sc.desc.flags.contains(SwapchainFlags::USED_AS_TRANSFER_SOURCE) {
            log::error!("swapchain '{}' was not created with USED_AS_TRANSFER_SOURCE", sc.desc.name);
            return;
        }
        let Some(format) = convert::surface_format_to_texture_format(sc.surface_format.format) else {
            log::error!("read back of swapchain format {:?} is not supported", sc.surface_format.format);
            return;
        };
        let (width, height) = (sc.extent.width, sc.extent.height);
        let image_index = sc.frames[sc.current_frame_slot].image_index as usize;
        let sc_image = &mut sc.images[image_index];
        let image = sc_image.image;
        if sc_image.last_use == SwapchainImageUse::None {
            log::warn!("reading back swapchain image {} which has not been rendered in this frame", image_index);
        }
        let old_state = sc_image.last_use.usage_state();
        sc_image.last_use = SwapchainImageUse::TransferSource;

        let (byte_size, _) = format.image_size_bytes(width, height);
        let readback = match HostBuffer::new(&self.ctx, byte_size as u64, true, "swapchain-readback") {
            Ok(readback) => readback,
            Err(e) => {
                log::error!("failed to create swapchain readback buffer: {:?}", e);
                return;
            }
        };

        if old_state != TextureUsageState::TRANSFER_SRC {
            let barrier =
                ImageBarrier::transition(image, vk::ImageAspectFlags::COLOR, old_state, TextureUsageState::TRANSFER_SRC);
            self.record_image_barriers(cb, vec![barrier]);
        }
        self.record(
            cb,
            Command::CopyImageToBuffer {
                src: image,
                src_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst: readback.buffer,
                region: vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: subresource_layers(vk::ImageAspectFlags::COLOR, 0, 0, 1),
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D { width, height, depth: 1 },
                },
            },
        );
        self.active_readbacks.release(
            ActiveReadback {
                buffer: readback,
                size: byte_size as usize,
                format: Some(format),
                width,
                height,
                callback,
            },
            Some(slot),
        );
    }

    /// 逐级 blit 生成 mip 链，结束后整个 texture 回到原来的状态
    /// （原来是 UNDEFINED 时转为 fragment shader 采样）
    fn generate_mips(&mut self, cb: CommandBufferHandle, texture: TextureHandle) {
        let slot = self.current_frame_slot;
        let tex = &mut self.textures[texture];
        let Some(native) = tex.native.as_ref() else {
            log::error!("generate_mips on texture '{}' before create", tex.desc.name);
            return;
        };
        if !tex.desc.flags.contains(TextureFlags::USED_WITH_GENERATE_MIPS) {
            log::warn!("texture '{}' was not created with USED_WITH_GENERATE_MIPS", tex.desc.name);
        }
        let levels = native.mip_levels;
        if levels <= 1 {
            return;
        }
        let (image, aspect, layers) = (native.image, native.aspect, native.layers);
        let plan = mip_blit_plan(tex.desc.width, tex.desc.height, tex.desc.depth.max(1), levels);

        let orig = tex.usage_state;
        let final_state = if orig.layout == vk::ImageLayout::UNDEFINED {
            TextureUsageState::sampled(vk::PipelineStageFlags2::FRAGMENT_SHADER)
        } else {
            orig
        };
        tex.usage_state = final_state;
        tex.last_active_frame_slot = Some(slot);

        let barrier = |from: TextureUsageState, to: TextureUsageState, base_level: u32, level_count: u32| {
            ImageBarrier::transition(image, aspect, from, to).subresource(0, layers, base_level, level_count)
        };

        let mut initial = Vec::with_capacity(2);
        if orig != TextureUsageState::TRANSFER_SRC {
            initial.push(barrier(orig, TextureUsageState::TRANSFER_SRC, 0, 1));
        }
        initial.push(barrier(orig, TextureUsageState::TRANSFER_DST, 1, levels - 1));
        self.record_image_barriers(cb, initial);

        for blit in &plan {
            if blit.src_level > 0 {
                let to_src = barrier(TextureUsageState::TRANSFER_DST, TextureUsageState::TRANSFER_SRC, blit.src_level, 1);
                self.record_image_barriers(cb, vec![to_src]);
            }
            self.record(
                cb,
                Command::BlitImage {
                    src: image,
                    dst: image,
                    region: vk::ImageBlit {
                        src_subresource: subresource_layers(aspect, blit.src_level, 0, layers),
                        src_offsets: [vk::Offset3D::default(), offset_3d(blit.src_size)],
                        dst_subresource: subresource_layers(aspect, blit.dst_level, 0, layers),
                        dst_offsets: [vk::Offset3D::default(), offset_3d(blit.dst_size)],
                    },
                    filter: vk::Filter::LINEAR,
                },
            );
        }

        let last_to_src = barrier(TextureUsageState::TRANSFER_DST, TextureUsageState::TRANSFER_SRC, levels - 1, 1);
        let restore = barrier(TextureUsageState::TRANSFER_SRC, final_state, 0, levels);
        self.record_image_barriers(cb, vec![last_to_src]);
        self.record_image_barriers(cb, vec![restore]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_full_level_keeps_edge_extent() {
        // 5x5 的 BC1 level 0：尺寸向上对齐为 8 会越界，截断到 level 边界
        assert_eq!(compressed_copy_region((0, 0), (5, 5), (5, 5), (4, 4)), ((0, 0), (5, 5)));
    }

    #[test]
    fn test_compressed_partial_region_is_block_aligned() {
        assert_eq!(compressed_copy_region((0, 0), (3, 3), (8, 8), (4, 4)), ((0, 0), (4, 4)));
        assert_eq!(compressed_copy_region((5, 6), (3, 2), (16, 16), (4, 4)), ((4, 4), (4, 4)));
    }

    #[test]
    fn test_uncompressed_block_is_identity() {
        assert_eq!(compressed_copy_region((3, 7), (5, 9), (64, 64), (1, 1)), ((3, 7), (5, 9)));
    }

    #[test]
    fn test_transfer_source_requires_flag() {
        assert!(is_transfer_source(TextureFlags::USED_AS_TRANSFER_SOURCE));
        assert!(is_transfer_source(TextureFlags::RENDER_TARGET | TextureFlags::USED_AS_TRANSFER_SOURCE));
        assert!(!is_transfer_source(TextureFlags::RENDER_TARGET));
        // mip 生成自带 TRANSFER_SRC usage，但不能作为外部拷贝或回读的来源
        assert!(!is_transfer_source(TextureFlags::USED_WITH_GENERATE_MIPS));
        assert!(!is_transfer_source(TextureFlags::empty()));
    }

    #[test]
    fn test_mip_blit_plan() {
        let plan = mip_blit_plan(4, 2, 1, 3);
        assert_eq!(
            plan,
            vec![
                MipBlit {
                    src_level: 0,
                    dst_level: 1,
                    src_size: (4, 2, 1),
                    dst_size: (2, 1, 1),
                },
                MipBlit {
                    src_level: 1,
                    dst_level: 2,
                    src_size: (2, 1, 1),
                    dst_size: (1, 1, 1),
                },
            ]
        );
        assert!(mip_blit_plan(16, 16, 1, 1).is_empty());
    }

    #[test]
    fn test_swapchain_image_states() {
        assert_eq!(SwapchainImageUse::None.usage_state().layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(SwapchainImageUse::Render.usage_state().layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(SwapchainImageUse::TransferSource.usage_state(), TextureUsageState::TRANSFER_SRC);
    }
}

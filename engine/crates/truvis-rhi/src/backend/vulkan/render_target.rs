//! render pass 与 texture render target
//!
//! render pass 的 attachment 顺序固定为：color..., depth stencil, resolve...
//! framebuffer 按同样的顺序提供 image view。

use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::{VulkanRhi, convert};
use crate::desc::{AttachmentSource, RenderTargetFlags, TextureFlags, TextureRenderTargetDesc, mip_size};
use crate::error::RhiError;
use crate::handles::{RenderPassDescHandle, RenderTarget, RenderTargetHandle};
use crate::native::NativeRenderPass;

/// 创建 render pass 需要的 attachment 信息
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AttachmentFormat {
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct RenderPassLayout {
    pub colors: Vec<AttachmentFormat>,
    pub depth_stencil: Option<AttachmentFormat>,
    pub resolves: Vec<AttachmentFormat>,
    pub preserve_color: bool,
    pub preserve_depth_stencil: bool,
    /// color attachment 最终交给 present
    pub for_swapchain: bool,
}

impl RenderPassLayout {
    /// 每个 attachment 的描述，顺序与 framebuffer 一致
    pub fn attachment_descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let mut attachments = Vec::with_capacity(self.colors.len() + self.resolves.len() + 1);
        let color_final = if self.for_swapchain && self.resolves.is_empty() {
            vk::ImageLayout::PRESENT_SRC_KHR
        } else {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        };
        for color in &self.colors {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(color.format)
                    .samples(color.samples)
                    .load_op(if self.preserve_color { vk::AttachmentLoadOp::LOAD } else { vk::AttachmentLoadOp::CLEAR })
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(if self.preserve_color {
                        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                    } else {
                        vk::ImageLayout::UNDEFINED
                    })
                    .final_layout(color_final),
            );
        }
        if let Some(ds) = self.depth_stencil {
            let (load, store, initial) = if self.preserve_depth_stencil {
                (
                    vk::AttachmentLoadOp::LOAD,
                    vk::AttachmentStoreOp::STORE,
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                )
            } else {
                (vk::AttachmentLoadOp::CLEAR, vk::AttachmentStoreOp::DONT_CARE, vk::ImageLayout::UNDEFINED)
            };
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(ds.format)
                    .samples(ds.samples)
                    .load_op(load)
                    .store_op(store)
                    .stencil_load_op(load)
                    .stencil_store_op(store)
                    .initial_layout(initial)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }
        let resolve_final =
            if self.for_swapchain { vk::ImageLayout::PRESENT_SRC_KHR } else { vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL };
        for resolve in &self.resolves {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(resolve.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(resolve_final),
            );
        }
        attachments
    }

    /// clear value 的数量和 attachment 数量一致
    pub fn attachment_count(&self) -> usize {
        self.colors.len() + self.depth_stencil.iter().count() + self.resolves.len()
    }

    pub fn create(&self, device: &ash::Device) -> Result<vk::RenderPass, vk::Result> {
        let attachments = self.attachment_descriptions();
        let color_refs = (0..self.colors.len())
            .map(|i| vk::AttachmentReference {
                attachment: i as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect_vec();
        let ds_ref = vk::AttachmentReference {
            attachment: self.colors.len() as u32,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_base = self.colors.len() + self.depth_stencil.iter().count();
        let resolve_refs = (0..self.resolves.len())
            .map(|i| vk::AttachmentReference {
                attachment: (resolve_base + i) as u32,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect_vec();

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if self.depth_stencil.is_some() {
            subpass = subpass.depth_stencil_attachment(&ds_ref);
        }
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        // 之前的 attachment 写入（包括 present 引擎对 swapchain image 的读取）与本 pass 的写入之间的依赖
        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let ci = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));
        unsafe { device.create_render_pass(&ci, None) }
    }
}

pub(crate) struct VulkanRenderPassDesc {
    pub id: u64,
    pub render_pass: vk::RenderPass,
    pub layout: RenderPassLayout,
    pub last_active_frame_slot: Option<usize>,
}

pub(crate) struct RenderTargetNative {
    pub framebuffer: vk::Framebuffer,
    /// 由 render target 自己创建的 view（texture 的某个 layer / level）
    pub owned_views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}

pub(crate) struct VulkanTextureRenderTarget {
    pub desc: TextureRenderTargetDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub render_pass: Option<RenderPassDescHandle>,
    pub native: Option<RenderTargetNative>,
}

impl VulkanRhi {
    pub(super) fn new_texture_render_target(&mut self, desc: TextureRenderTargetDesc) -> RenderTargetHandle {
        let id = self.next_resource_id();
        self.render_targets.insert(VulkanTextureRenderTarget {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            render_pass: None,
            native: None,
        })
    }

    fn attachment_format(&self, source: AttachmentSource) -> AttachmentFormat {
        match source {
            AttachmentSource::Texture(texture) => {
                let tex = &self.textures[texture];
                AttachmentFormat {
                    format: convert::texture_format(tex.desc.format, tex.desc.flags.contains(TextureFlags::SRGB)),
                    samples: convert::sample_count(tex.desc.sample_count),
                }
            }
            AttachmentSource::RenderBuffer(rb) => {
                let rb = &self.render_buffers[rb];
                AttachmentFormat {
                    format: rb.vk_format(self.ctx.depth_stencil_format),
                    samples: convert::sample_count(rb.desc.sample_count),
                }
            }
        }
    }

    fn render_pass_layout(&self, target: RenderTarget) -> Result<RenderPassLayout, RhiError> {
        match target {
            RenderTarget::Texture(rt) => {
                let desc = &self.render_targets[rt].desc;
                let colors = desc.color_attachments.iter().map(|c| self.attachment_format(c.source)).collect_vec();
                let resolves = desc
                    .color_attachments
                    .iter()
                    .filter_map(|c| c.resolve_texture)
                    .map(|t| self.attachment_format(AttachmentSource::Texture(t)))
                    .collect_vec();
                if !resolves.is_empty() && resolves.len() != colors.len() {
                    return Err(RhiError::Unsupported(format!(
                        "render target '{}': either all or none of the color attachments must resolve",
                        desc.name
                    )));
                }
                Ok(RenderPassLayout {
                    colors,
                    depth_stencil: desc.depth_stencil.map(|ds| self.attachment_format(ds)),
                    resolves,
                    preserve_color: desc.flags.contains(RenderTargetFlags::PRESERVE_COLOR_CONTENTS),
                    preserve_depth_stencil: desc.flags.contains(RenderTargetFlags::PRESERVE_DEPTH_STENCIL_CONTENTS),
                    for_swapchain: false,
                })
            }
            RenderTarget::Swapchain(sc) => {
                let sc = &self.swapchains[sc];
                Ok(RenderPassLayout {
                    colors: vec![AttachmentFormat {
                        format: sc.surface_format.format,
                        samples: vk::SampleCountFlags::TYPE_1,
                    }],
                    depth_stencil: sc.desc.depth_stencil.map(|rb| self.attachment_format(AttachmentSource::RenderBuffer(rb))),
                    resolves: Vec::new(),
                    preserve_color: false,
                    preserve_depth_stencil: false,
                    for_swapchain: true,
                })
            }
        }
    }

    pub(super) fn new_compatible_render_pass_descriptor(
        &mut self,
        target: RenderTarget,
    ) -> Result<RenderPassDescHandle, RhiError> {
        let layout = self.render_pass_layout(target)?;
        let render_pass = layout.create(&self.ctx.device)?;
        let id = self.next_resource_id();
        self.ctx.debug_utils.set_object_name(render_pass, &format!("render-pass-{}", id));
        Ok(self.render_pass_descs.insert(VulkanRenderPassDesc {
            id,
            render_pass,
            layout,
            last_active_frame_slot: None,
        }))
    }

    pub(super) fn set_render_pass_descriptor(&mut self, target: RenderTarget, render_pass: RenderPassDescHandle) {
        match target {
            RenderTarget::Texture(rt) => self.render_targets[rt].render_pass = Some(render_pass),
            RenderTarget::Swapchain(sc) => self.swapchains[sc].render_pass = Some(render_pass),
        }
    }

    pub(super) fn release_render_pass_descriptor(&mut self, handle: RenderPassDescHandle) {
        if let Some(rp) = self.render_pass_descs.remove(handle) {
            self.release_queue.release(ReleaseKind::RenderPass(rp.render_pass), rp.last_active_frame_slot);
        }
    }

    pub(super) fn native_render_pass(&self, handle: RenderPassDescHandle) -> NativeRenderPass {
        NativeRenderPass {
            render_pass: self.render_pass_descs[handle].render_pass,
        }
    }

    /// 为 texture 的某个 layer / level 创建单独的 2D view
    fn create_attachment_view(
        &self,
        texture: crate::handles::TextureHandle,
        layer: u32,
        level: u32,
    ) -> Result<(vk::ImageView, vk::Extent2D), RhiError> {
        let tex = &self.textures[texture];
        let Some(native) = tex.native.as_ref() else {
            return Err(RhiError::Unsupported(format!("attachment texture '{}' is not created", tex.desc.name)));
        };
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(native.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(native.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: native.aspect,
                base_mip_level: level,
                level_count: 1,
                base_array_layer: layer,
                layer_count: 1,
            });
        let view = unsafe { self.ctx.device.create_image_view(&view_ci, None)? };
        let (width, height) = mip_size(tex.desc.width, tex.desc.height, level);
        Ok((view, vk::Extent2D { width, height }))
    }

    pub(super) fn render_buffer_view(&self, rb: crate::handles::RenderBufferHandle) -> Result<(vk::ImageView, vk::Extent2D), RhiError> {
        let rb = &self.render_buffers[rb];
        let Some(native) = rb.native.as_ref() else {
            return Err(RhiError::Unsupported(format!("attachment render buffer '{}' is not created", rb.desc.name)));
        };
        Ok((
            native.view,
            vk::Extent2D {
                width: rb.desc.width.max(1),
                height: rb.desc.height.max(1),
            },
        ))
    }

    pub(super) fn create_texture_render_target(&mut self, handle: RenderTargetHandle) -> Result<(), RhiError> {
        self.destroy_texture_render_target(handle);

        let rt = &self.render_targets[handle];
        let Some(render_pass) = rt.render_pass else {
            return Err(RhiError::Unsupported(format!(
                "render target '{}' has no render pass descriptor",
                rt.desc.name
            )));
        };
        let render_pass = self.render_pass_descs[render_pass].render_pass;

        let mut owned_views = Vec::new();
        let mut attachments = Vec::new();
        let mut extent: Option<vk::Extent2D> = None;
        let mut collect = |result: Result<(vk::ImageView, vk::Extent2D), RhiError>, owned: bool| {
            result.map(|(view, size)| {
                if owned {
                    owned_views.push(view);
                }
                attachments.push(view);
                extent.get_or_insert(size);
            })
        };

        let desc = &rt.desc;
        let mut result: Result<(), RhiError> = Ok(());
        for color in &desc.color_attachments {
            result = match color.source {
                AttachmentSource::Texture(t) => collect(self.create_attachment_view(t, color.layer, color.level), true),
                AttachmentSource::RenderBuffer(rb) => collect(self.render_buffer_view(rb), false),
            };
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            if let Some(ds) = desc.depth_stencil {
                result = match ds {
                    AttachmentSource::Texture(t) => collect(self.create_attachment_view(t, 0, 0), true),
                    AttachmentSource::RenderBuffer(rb) => collect(self.render_buffer_view(rb), false),
                };
            }
        }
        if result.is_ok() {
            for color in &desc.color_attachments {
                if let Some(resolve) = color.resolve_texture {
                    result = collect(self.create_attachment_view(resolve, color.resolve_layer, color.resolve_level), true);
                    if result.is_err() {
                        break;
                    }
                }
            }
        }

        let extent = extent.unwrap_or(vk::Extent2D { width: 1, height: 1 });
        let framebuffer = result.and_then(|_| {
            let fb_ci = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            Ok(unsafe { self.ctx.device.create_framebuffer(&fb_ci, None)? })
        });
        let framebuffer = match framebuffer {
            Ok(fb) => fb,
            Err(e) => {
                for view in owned_views {
                    unsafe { self.ctx.device.destroy_image_view(view, None) };
                }
                return Err(e);
            }
        };
        self.ctx.debug_utils.set_object_name(framebuffer, &desc.name);

        let rt = &mut self.render_targets[handle];
        rt.native = Some(RenderTargetNative {
            framebuffer,
            owned_views,
            extent,
        });
        rt.generation += 1;
        rt.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_texture_render_target(&mut self, handle: RenderTargetHandle) {
        let rt = &mut self.render_targets[handle];
        if let Some(native) = rt.native.take() {
            let last_active = rt.last_active_frame_slot;
            self.release_queue.release(
                ReleaseKind::TextureRenderTarget {
                    framebuffer: native.framebuffer,
                    views: native.owned_views,
                },
                last_active,
            );
        }
    }

    pub(super) fn release_texture_render_target(&mut self, handle: RenderTargetHandle) {
        self.destroy_texture_render_target(handle);
        self.render_targets.remove(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8() -> AttachmentFormat {
        AttachmentFormat {
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    #[test]
    fn test_swapchain_pass_ends_in_present_layout() {
        let layout = RenderPassLayout {
            colors: vec![rgba8()],
            for_swapchain: true,
            ..Default::default()
        };
        let attachments = layout.attachment_descriptions();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn test_preserved_texture_pass_loads_contents() {
        let layout = RenderPassLayout {
            colors: vec![rgba8()],
            depth_stencil: Some(AttachmentFormat {
                format: vk::Format::D24_UNORM_S8_UINT,
                samples: vk::SampleCountFlags::TYPE_1,
            }),
            preserve_color: true,
            ..Default::default()
        };
        let attachments = layout.attachment_descriptions();
        assert_eq!(layout.attachment_count(), 2);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(attachments[0].initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        // depth 不保留
        assert_eq!(attachments[1].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);
    }

    #[test]
    fn test_resolve_attachments_follow_depth() {
        let msaa = AttachmentFormat {
            format: vk::Format::R8G8B8A8_UNORM,
            samples: vk::SampleCountFlags::TYPE_4,
        };
        let layout = RenderPassLayout {
            colors: vec![msaa],
            depth_stencil: Some(AttachmentFormat {
                format: vk::Format::D32_SFLOAT,
                samples: vk::SampleCountFlags::TYPE_4,
            }),
            resolves: vec![rgba8()],
            ..Default::default()
        };
        let attachments = layout.attachment_descriptions();
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].load_op, vk::AttachmentLoadOp::DONT_CARE);
    }
}

//! swapchain
//!
//! surface 在 new_swapchain 时创建，原生 swapchain 及其 image view、framebuffer、
//! 每个 frame slot 的同步对象在 create_or_resize_swapchain 时（重新）创建。

use ash::vk;

use crate::backend::vulkan::VulkanRhi;
use crate::backend::vulkan::command_buffer::VulkanCommandBuffer;
use crate::desc::{SwapchainDesc, SwapchainFlags};
use crate::error::RhiError;
use crate::handles::{CommandBufferHandle, RenderPassDescHandle, SwapchainHandle};

/// swapchain image 在当前帧中最后一次的用途，决定 present 前需要的 layout 转换
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum SwapchainImageUse {
    #[default]
    None,
    /// 作为 color attachment 渲染过，render pass 结束后已处于 PRESENT_SRC
    Render,
    /// 被回读过，处于 TRANSFER_SRC
    TransferSource,
}

pub(crate) struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    pub last_use: SwapchainImageUse,
}

/// 每个 frame slot 一份的同步对象
pub(crate) struct SwapchainFrame {
    pub image_acquired: bool,
    pub image_index: u32,
    /// acquire 完成时 signal
    pub image_fence: vk::Fence,
    pub image_fence_waitable: bool,
    /// acquire 完成时 signal，提交时等待
    pub image_sem: vk::Semaphore,
    pub image_sem_waitable: bool,
    /// 提交完成时 signal，present 时等待
    pub draw_sem: vk::Semaphore,
}

pub(crate) struct VulkanSwapchain {
    pub desc: SwapchainDesc,
    pub id: u64,
    pub surface: vk::SurfaceKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub render_pass: Option<RenderPassDescHandle>,
    pub swapchain: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<SwapchainImage>,
    pub frames: Vec<SwapchainFrame>,
    pub current_frame_slot: usize,
    /// begin_frame 返回的 command buffer
    pub cb: CommandBufferHandle,
    pub last_active_frame_slot: Option<usize>,
}

impl VulkanSwapchain {
    #[inline]
    pub fn is_created(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null()
    }
}

/// 优先 8bit UNORM 的 BGRA / RGBA，否则使用 surface 给出的第一个格式
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

    // 只有一个 UNDEFINED 表示没有限制
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return Some(vk::SurfaceFormatKHR {
            format: PREFERRED[0],
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }
    PREFERRED
        .iter()
        .find_map(|preferred| {
            formats
                .iter()
                .find(|f| f.format == *preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .copied()
        })
        .or_else(|| formats.first().copied())
}

pub(crate) fn choose_present_mode(available: &[vk::PresentModeKHR], flags: SwapchainFlags) -> vk::PresentModeKHR {
    if flags.contains(SwapchainFlags::NO_VSYNC) {
        for mode in [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX] {
            if available.contains(&mode) {
                return mode;
            }
        }
    }
    vk::PresentModeKHR::FIFO
}

/// max_image_count == 0 表示不限制 image 数量
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, flags: SwapchainFlags) -> u32 {
    let wanted = if flags.contains(SwapchainFlags::MINIMAL_BUFFER_COUNT) { 2 } else { 3 };
    let count = u32::max(wanted, caps.min_image_count);
    if caps.max_image_count == 0 { count } else { count.min(caps.max_image_count) }
}

/// 确定 swapchain 的 extent 尺寸
///
/// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
pub(crate) fn calculate_swapchain_extent(
    surface_capabilities: &vk::SurfaceCapabilitiesKHR,
    window_physical_extent: vk::Extent2D,
) -> vk::Extent2D {
    let surface_extent = surface_capabilities.current_extent;
    if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
        let width = window_physical_extent
            .width
            .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
        let height = window_physical_extent
            .height
            .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
        vk::Extent2D { width, height }
    } else {
        surface_extent
    }
}

// new & create
impl VulkanRhi {
    pub(super) fn new_swapchain(&mut self, desc: SwapchainDesc) -> Result<SwapchainHandle, RhiError> {
        let (Some(surface_fn), Some(_)) = (self.ctx.surface_fn.as_ref(), self.ctx.swapchain_fn.as_ref()) else {
            return Err(RhiError::Unsupported("surface / swapchain extensions are not available".to_string()));
        };

        let surface = unsafe {
            ash_window::create_surface(&self.ctx.entry, &self.ctx.instance, desc.display_handle, desc.window_handle, None)?
        };
        let destroy_surface = || unsafe { surface_fn.destroy_surface(surface, None) };

        let supported = unsafe {
            surface_fn.get_physical_device_surface_support(
                self.ctx.physical_device,
                self.ctx.queue_family_index,
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            destroy_surface();
            return Err(RhiError::Unsupported(format!("queue family cannot present to surface of '{}'", desc.name)));
        }

        let formats = match unsafe { surface_fn.get_physical_device_surface_formats(self.ctx.physical_device, surface) } {
            Ok(formats) => formats,
            Err(e) => {
                destroy_surface();
                return Err(e.into());
            }
        };
        let Some(surface_format) = choose_surface_format(&formats) else {
            destroy_surface();
            return Err(RhiError::Unsupported(format!("surface of '{}' reports no formats", desc.name)));
        };
        log::info!(
            "swapchain '{}' surface format: {:?} {:?}",
            desc.name,
            surface_format.format,
            surface_format.color_space
        );

        let id = self.next_resource_id();
        let cb = self.command_buffers.insert(VulkanCommandBuffer::new());
        Ok(self.swapchains.insert(VulkanSwapchain {
            desc,
            id,
            surface,
            surface_format,
            render_pass: None,
            swapchain: vk::SwapchainKHR::null(),
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            frames: Vec::new(),
            current_frame_slot: 0,
            cb,
            last_active_frame_slot: None,
        }))
    }

    pub(super) fn create_or_resize_swapchain(
        &mut self,
        handle: SwapchainHandle,
        width: u32,
        height: u32,
    ) -> Result<bool, RhiError> {
        assert!(!self.in_frame, "create_or_resize_swapchain inside a frame");
        let (Some(surface_fn), Some(swapchain_fn)) = (self.ctx.surface_fn.as_ref(), self.ctx.swapchain_fn.as_ref())
        else {
            return Err(RhiError::Unsupported("surface / swapchain extensions are not available".to_string()));
        };
        let pd = self.ctx.physical_device;

        let sc = &self.swapchains[handle];
        let surface = sc.surface;
        let caps = unsafe { surface_fn.get_physical_device_surface_capabilities(pd, surface)? };
        let extent = calculate_swapchain_extent(&caps, vk::Extent2D { width, height });
        if extent.width == 0 || extent.height == 0 {
            log::info!("swapchain '{}' surface size is 0, skip create", sc.desc.name);
            return Ok(false);
        }
        let Some(render_pass_handle) = sc.render_pass else {
            return Err(RhiError::Unsupported(format!(
                "swapchain '{}' needs a render pass descriptor before create",
                sc.desc.name
            )));
        };
        let render_pass = self.render_pass_descs[render_pass_handle].render_pass;
        let depth_view = match sc.desc.depth_stencil {
            Some(rb) => Some(self.render_buffer_view(rb)?.0),
            None => None,
        };

        unsafe { self.ctx.device.device_wait_idle()? };

        let flags = sc.desc.flags;
        let present_modes = unsafe { surface_fn.get_physical_device_surface_present_modes(pd, surface)? };
        let present_mode = choose_present_mode(&present_modes, flags);
        let image_count = choose_image_count(&caps, flags);
        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if flags.contains(SwapchainFlags::USED_AS_TRANSFER_SOURCE) {
            if caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
                usage |= vk::ImageUsageFlags::TRANSFER_SRC;
            } else {
                log::warn!("swapchain '{}' does not support TRANSFER_SRC usage", sc.desc.name);
            }
        }
        let composite_alpha = if caps.supported_composite_alpha.contains(vk::CompositeAlphaFlagsKHR::OPAQUE) {
            vk::CompositeAlphaFlagsKHR::OPAQUE
        } else {
            vk::CompositeAlphaFlagsKHR::INHERIT
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(sc.surface_format.format)
            .image_color_space(sc.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .pre_transform(caps.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(sc.swapchain);
        let new_swapchain = unsafe { swapchain_fn.create_swapchain(&create_info, None)? };
        self.ctx.debug_utils.set_object_name(new_swapchain, &sc.desc.name);
        log::info!(
            "create swapchain '{}': {}x{}, {} images, {:?}",
            sc.desc.name,
            extent.width,
            extent.height,
            image_count,
            present_mode
        );

        // 旧的 swapchain 已经交给新的 swapchain 接管，可以销毁
        self.destroy_swapchain_natives(handle);
        let sc = &mut self.swapchains[handle];
        sc.swapchain = new_swapchain;
        sc.extent = extent;
        sc.current_frame_slot = 0;
        sc.last_active_frame_slot = None;

        if let Err(e) = self.create_swapchain_images(handle, render_pass, depth_view) {
            self.destroy_swapchain_natives(handle);
            return Err(e);
        }
        self.wait_all_slots().map_err(RhiError::from)?;
        Ok(true)
    }

    fn create_swapchain_images(
        &mut self,
        handle: SwapchainHandle,
        render_pass: vk::RenderPass,
        depth_view: Option<vk::ImageView>,
    ) -> Result<(), RhiError> {
        let frames_in_flight = self.frames_in_flight;
        let ctx = &self.ctx;
        let sc = &mut self.swapchains[handle];
        let swapchain_fn = ctx
            .swapchain_fn
            .as_ref()
            .ok_or_else(|| RhiError::Unsupported("swapchain extension is not available".to_string()))?;

        let images = unsafe { swapchain_fn.get_swapchain_images(sc.swapchain)? };
        for (i, image) in images.into_iter().enumerate() {
            let view_ci = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(sc.surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { ctx.device.create_image_view(&view_ci, None)? };
            sc.images.push(SwapchainImage {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
                last_use: SwapchainImageUse::None,
            });

            let mut attachments = vec![view];
            attachments.extend(depth_view);
            let fb_ci = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(sc.extent.width)
                .height(sc.extent.height)
                .layers(1);
            let framebuffer = unsafe { ctx.device.create_framebuffer(&fb_ci, None)? };
            ctx.debug_utils.set_object_name(framebuffer, &format!("{}-framebuffer-{}", sc.desc.name, i));
            if let Some(last) = sc.images.last_mut() {
                last.framebuffer = framebuffer;
            }
        }

        for slot in 0..frames_in_flight {
            let name = &sc.desc.name;
            let image_fence = ctx.create_fence(false, &format!("{name}-image-fence-{slot}"))?;
            let image_sem = match ctx.create_semaphore(&format!("{name}-image-sem-{slot}")) {
                Ok(sem) => sem,
                Err(e) => {
                    unsafe { ctx.device.destroy_fence(image_fence, None) };
                    return Err(e.into());
                }
            };
            let draw_sem = match ctx.create_semaphore(&format!("{name}-draw-sem-{slot}")) {
                Ok(sem) => sem,
                Err(e) => unsafe {
                    ctx.device.destroy_fence(image_fence, None);
                    ctx.device.destroy_semaphore(image_sem, None);
                    return Err(e.into());
                },
            };
            sc.frames.push(SwapchainFrame {
                image_acquired: false,
                image_index: 0,
                image_fence,
                image_fence_waitable: false,
                image_sem,
                image_sem_waitable: false,
                draw_sem,
            });
        }
        Ok(())
    }
}

// destroy
impl VulkanRhi {
    /// 销毁原生 swapchain 以及依附于它的对象，surface 保留
    fn destroy_swapchain_natives(&mut self, handle: SwapchainHandle) {
        let ctx = &self.ctx;
        let sc = &mut self.swapchains[handle];
        unsafe {
            for frame in sc.frames.drain(..) {
                if frame.image_fence_waitable {
                    if let Err(e) = ctx.wait_and_reset_fence(frame.image_fence) {
                        log::warn!("failed to wait for swapchain image fence: {:?}", e);
                    }
                }
                ctx.device.destroy_fence(frame.image_fence, None);
                ctx.device.destroy_semaphore(frame.image_sem, None);
                ctx.device.destroy_semaphore(frame.draw_sem, None);
            }
            for image in sc.images.drain(..) {
                if image.framebuffer != vk::Framebuffer::null() {
                    ctx.device.destroy_framebuffer(image.framebuffer, None);
                }
                ctx.device.destroy_image_view(image.view, None);
            }
            if sc.swapchain != vk::SwapchainKHR::null() {
                if let Some(swapchain_fn) = ctx.swapchain_fn.as_ref() {
                    swapchain_fn.destroy_swapchain(sc.swapchain, None);
                }
                sc.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    pub(super) fn destroy_swapchain(&mut self, handle: SwapchainHandle) {
        assert_ne!(self.current_swapchain, Some(handle), "destroy_swapchain inside its frame");
        if !self.swapchains[handle].is_created() {
            return;
        }
        if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
            log::error!("device_wait_idle failed while destroying swapchain: {:?}", e);
        }
        self.destroy_swapchain_natives(handle);
    }

    pub(super) fn release_swapchain(&mut self, handle: SwapchainHandle) {
        self.destroy_swapchain(handle);
        if let Some(sc) = self.swapchains.remove(handle) {
            if let Some(surface_fn) = self.ctx.surface_fn.as_ref() {
                unsafe { surface_fn.destroy_surface(sc.surface, None) };
            }
            self.command_buffers.remove(sc.cb);
        }
    }

    /// surface 当前的像素尺寸，surface 不给出固定尺寸时使用创建时的窗口尺寸
    pub(super) fn swapchain_pixel_size(&self, handle: SwapchainHandle) -> (u32, u32) {
        let sc = &self.swapchains[handle];
        let fallback = (sc.desc.width, sc.desc.height);
        let Some(surface_fn) = self.ctx.surface_fn.as_ref() else {
            return fallback;
        };
        match unsafe { surface_fn.get_physical_device_surface_capabilities(self.ctx.physical_device, sc.surface) } {
            Ok(caps) if caps.current_extent.width != u32::MAX => (caps.current_extent.width, caps.current_extent.height),
            Ok(_) => fallback,
            Err(e) => {
                log::warn!("failed to query surface capabilities: {:?}", e);
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn test_surface_format_prefers_unorm_srgb_nonlinear() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).map(|f| f.format), Some(vk::Format::R8G8B8A8_UNORM));

        let only_other = [format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(
            choose_surface_format(&only_other).map(|f| f.format),
            Some(vk::Format::A2B10G10R10_UNORM_PACK32)
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_undefined_surface_format_means_any() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(choose_surface_format(&formats).map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));
    }

    #[test]
    fn test_present_mode() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, SwapchainFlags::empty()), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&all, SwapchainFlags::NO_VSYNC), vk::PresentModeKHR::IMMEDIATE);
        let no_immediate = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&no_immediate, SwapchainFlags::NO_VSYNC), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], SwapchainFlags::NO_VSYNC),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps, SwapchainFlags::empty()), 3);
        assert_eq!(choose_image_count(&caps, SwapchainFlags::MINIMAL_BUFFER_COUNT), 2);

        let limited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&limited, SwapchainFlags::empty()), 2);
    }

    #[test]
    fn test_extent_follows_window_when_surface_is_flexible() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };
        let extent = calculate_swapchain_extent(&caps, vk::Extent2D {
            width: 800,
            height: 9000,
        });
        assert_eq!(extent, vk::Extent2D {
            width: 800,
            height: 4096
        });

        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            ..Default::default()
        };
        assert_eq!(
            calculate_swapchain_extent(&fixed, vk::Extent2D {
                width: 1,
                height: 1
            }),
            vk::Extent2D {
                width: 640,
                height: 480
            }
        );
    }
}

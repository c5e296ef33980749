use ash::vk;
use vk_mem::Alloc;

use crate::backend::vulkan::barrier::TextureUsageState;
use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::{VulkanRhi, convert};
use crate::desc::{MipmapMode, RenderBufferDesc, RenderBufferType, SamplerDesc, TextureDesc, TextureFlags, TextureFormat};
use crate::error::RhiError;
use crate::handles::{RenderBufferHandle, SamplerHandle, TextureHandle};
use crate::native::NativeTexture;

pub(crate) struct TextureNative {
    pub image: vk::Image,
    /// 外部导入的 image 没有 allocation
    pub allocation: Option<vk_mem::Allocation>,
    pub view: vk::ImageView,
    /// USED_WITH_LOAD_STORE 时每个 mip level 一个 view，用于 storage image
    pub level_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub layers: u32,
}

pub(crate) struct VulkanTexture {
    pub desc: TextureDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub native: Option<TextureNative>,
    pub usage_state: TextureUsageState,
}

impl VulkanTexture {
    #[inline]
    pub fn native(&self) -> &TextureNative {
        self.native.as_ref().unwrap_or_else(|| panic!("texture '{}' is used before create", self.desc.name))
    }

    fn vk_usage(&self) -> vk::ImageUsageFlags {
        let flags = self.desc.flags;
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if flags.contains(TextureFlags::RENDER_TARGET) {
            if self.desc.format.is_depth() {
                usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
            } else {
                usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
            }
        }
        if flags.intersects(TextureFlags::USED_AS_TRANSFER_SOURCE | TextureFlags::USED_WITH_GENERATE_MIPS) {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if flags.contains(TextureFlags::USED_WITH_LOAD_STORE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        usage
    }

    fn view_type(&self) -> vk::ImageViewType {
        let flags = self.desc.flags;
        if flags.contains(TextureFlags::CUBE_MAP) {
            vk::ImageViewType::CUBE
        } else if flags.contains(TextureFlags::THREE_DIMENSIONAL) {
            vk::ImageViewType::TYPE_3D
        } else if flags.contains(TextureFlags::TEXTURE_ARRAY) {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }
}

pub(crate) struct VulkanSampler {
    pub desc: SamplerDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub native: Option<vk::Sampler>,
}

pub(crate) struct RenderBufferNative {
    pub image: vk::Image,
    pub allocation: vk_mem::Allocation,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

pub(crate) struct VulkanRenderBuffer {
    pub desc: RenderBufferDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub native: Option<RenderBufferNative>,
}

impl VulkanRenderBuffer {
    /// 没有 create 也可以查询，用于创建兼容的 render pass
    pub fn vk_format(&self, depth_stencil_format: vk::Format) -> vk::Format {
        match self.desc.ty {
            RenderBufferType::DepthStencil => depth_stencil_format,
            RenderBufferType::Color => {
                convert::texture_format(self.desc.backing_format.unwrap_or(TextureFormat::Rgba8), false)
            }
        }
    }
}

// texture 接口
impl VulkanRhi {
    pub(super) fn new_texture(&mut self, desc: TextureDesc) -> TextureHandle {
        let id = self.next_resource_id();
        self.textures.insert(VulkanTexture {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            native: None,
            usage_state: TextureUsageState::UNDEFINED,
        })
    }

    pub(super) fn create_texture(&mut self, handle: TextureHandle) -> Result<(), RhiError> {
        self.destroy_texture(handle);

        let ctx = &self.ctx;
        let tex = &self.textures[handle];
        let desc = &tex.desc;
        if desc.format.is_compressed() && desc.flags.contains(TextureFlags::RENDER_TARGET) {
            return Err(RhiError::Unsupported(format!(
                "compressed texture '{}' cannot be a render target",
                desc.name
            )));
        }
        let is_cube = desc.flags.contains(TextureFlags::CUBE_MAP);
        let is_3d = desc.flags.contains(TextureFlags::THREE_DIMENSIONAL);
        if is_cube && is_3d {
            return Err(RhiError::Unsupported(format!("texture '{}' cannot be both cube and 3D", desc.name)));
        }

        let format = convert::texture_format(desc.format, desc.flags.contains(TextureFlags::SRGB));
        let aspect = convert::aspect_mask(desc.format);
        let mip_levels = desc.mip_level_count();
        let layers = desc.layer_count();
        let image_ci = vk::ImageCreateInfo::default()
            .flags(if is_cube { vk::ImageCreateFlags::CUBE_COMPATIBLE } else { vk::ImageCreateFlags::empty() })
            .image_type(if is_3d { vk::ImageType::TYPE_3D } else { vk::ImageType::TYPE_2D })
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth: if is_3d { desc.depth.max(1) } else { 1 },
            })
            .mip_levels(mip_levels)
            .array_layers(layers)
            .samples(convert::sample_count(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(tex.vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = match unsafe { ctx.allocator.create_image(&image_ci, &alloc_ci) } {
            Ok(pair) => pair,
            Err(e) => {
                let what = format!("texture '{}'", desc.name);
                return Err(self.creation_error(&what, e));
            }
        };
        ctx.debug_utils.set_object_name(image, &desc.name);

        let view_type = tex.view_type();
        let view_ci = |base_level: u32, level_count: u32| {
            vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(view_type)
                .format(format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: base_level,
                    level_count,
                    base_array_layer: 0,
                    layer_count: layers,
                })
        };

        let mut views = Vec::new();
        let mut view_result = unsafe { ctx.device.create_image_view(&view_ci(0, mip_levels), None) }.map(|v| views.push(v));
        if view_result.is_ok() && desc.flags.contains(TextureFlags::USED_WITH_LOAD_STORE) {
            for level in 0..mip_levels {
                view_result = unsafe { ctx.device.create_image_view(&view_ci(level, 1), None) }.map(|v| views.push(v));
                if view_result.is_err() {
                    break;
                }
            }
        }
        if let Err(e) = view_result {
            unsafe {
                for view in views {
                    ctx.device.destroy_image_view(view, None);
                }
                ctx.allocator.destroy_image(image, &mut allocation);
            }
            return Err(e.into());
        }

        let view = views.remove(0);
        let tex = &mut self.textures[handle];
        tex.native = Some(TextureNative {
            image,
            allocation: Some(allocation),
            view,
            level_views: views,
            format,
            aspect,
            mip_levels,
            layers,
        });
        tex.usage_state = TextureUsageState::UNDEFINED;
        tex.generation += 1;
        tex.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_texture(&mut self, handle: TextureHandle) {
        let tex = &mut self.textures[handle];
        let Some(native) = tex.native.take() else {
            return;
        };
        let mut views = native.level_views;
        views.push(native.view);
        tex.usage_state = TextureUsageState::UNDEFINED;
        let last_active = tex.last_active_frame_slot;
        self.release_queue.release(
            ReleaseKind::Texture {
                image: native.image,
                allocation: native.allocation,
                views,
            },
            last_active,
        );
    }

    pub(super) fn release_texture(&mut self, handle: TextureHandle) {
        self.destroy_texture(handle);
        self.textures.remove(handle);
    }

    pub(super) fn native_texture(&self, handle: TextureHandle) -> NativeTexture {
        let tex = &self.textures[handle];
        NativeTexture {
            image: tex.native.as_ref().map(|n| n.image).unwrap_or_default(),
            layout: tex.usage_state.layout,
        }
    }

    /// 外部改变了 layout，之后的 barrier 以最保守的方式从这个 layout 出发
    pub(super) fn set_native_layout(&mut self, handle: TextureHandle, layout: vk::ImageLayout) {
        let tex = &mut self.textures[handle];
        tex.usage_state = TextureUsageState::new(
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
            layout,
        );
    }
}

// sampler 接口
impl VulkanRhi {
    pub(super) fn new_sampler(&mut self, desc: SamplerDesc) -> SamplerHandle {
        let id = self.next_resource_id();
        self.samplers.insert(VulkanSampler {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            native: None,
        })
    }

    pub(super) fn create_sampler(&mut self, handle: SamplerHandle) -> Result<(), RhiError> {
        self.destroy_sampler(handle);

        let sampler = &mut self.samplers[handle];
        let desc = &sampler.desc;
        let mut sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(convert::filter(desc.mag_filter))
            .min_filter(convert::filter(desc.min_filter))
            .mipmap_mode(convert::mipmap_mode(desc.mipmap_mode))
            .address_mode_u(convert::address_mode(desc.address_u))
            .address_mode_v(convert::address_mode(desc.address_v))
            .address_mode_w(convert::address_mode(desc.address_w))
            .max_anisotropy(1.0)
            .min_lod(0.0)
            // 不使用 mipmap 时只采样 level 0
            .max_lod(if desc.mipmap_mode == MipmapMode::None { 0.25 } else { vk::LOD_CLAMP_NONE });
        if let Some(op) = desc.compare_op {
            sampler_ci = sampler_ci.compare_enable(true).compare_op(convert::compare_op(op));
        }

        let native = unsafe { self.ctx.device.create_sampler(&sampler_ci, None)? };
        self.ctx.debug_utils.set_object_name(native, &desc.name);
        sampler.native = Some(native);
        sampler.generation += 1;
        sampler.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_sampler(&mut self, handle: SamplerHandle) {
        let sampler = &mut self.samplers[handle];
        if let Some(native) = sampler.native.take() {
            let last_active = sampler.last_active_frame_slot;
            self.release_queue.release(ReleaseKind::Sampler(native), last_active);
        }
    }

    pub(super) fn release_sampler(&mut self, handle: SamplerHandle) {
        self.destroy_sampler(handle);
        self.samplers.remove(handle);
    }
}

// render buffer 接口
impl VulkanRhi {
    pub(super) fn new_render_buffer(&mut self, desc: RenderBufferDesc) -> RenderBufferHandle {
        let id = self.next_resource_id();
        self.render_buffers.insert(VulkanRenderBuffer {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            native: None,
        })
    }

    pub(super) fn create_render_buffer(&mut self, handle: RenderBufferHandle) -> Result<(), RhiError> {
        self.destroy_render_buffer(handle);

        let ctx = &self.ctx;
        let rb = &self.render_buffers[handle];
        let format = rb.vk_format(ctx.depth_stencil_format);
        let (usage, aspect) = match rb.desc.ty {
            RenderBufferType::DepthStencil => (
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                convert::depth_stencil_aspect(format),
            ),
            RenderBufferType::Color => (
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                vk::ImageAspectFlags::COLOR,
            ),
        };
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: rb.desc.width.max(1),
                height: rb.desc.height.max(1),
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(convert::sample_count(rb.desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = match unsafe { ctx.allocator.create_image(&image_ci, &alloc_ci) } {
            Ok(pair) => pair,
            Err(e) => {
                let what = format!("render buffer '{}'", rb.desc.name);
                return Err(self.creation_error(&what, e));
            }
        };
        ctx.debug_utils.set_object_name(image, &rb.desc.name);

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { ctx.device.create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { ctx.allocator.destroy_image(image, &mut allocation) };
                return Err(e.into());
            }
        };

        let rb = &mut self.render_buffers[handle];
        rb.native = Some(RenderBufferNative {
            image,
            allocation,
            view,
            format,
        });
        rb.generation += 1;
        rb.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_render_buffer(&mut self, handle: RenderBufferHandle) {
        let rb = &mut self.render_buffers[handle];
        if let Some(native) = rb.native.take() {
            let last_active = rb.last_active_frame_slot;
            self.release_queue.release(
                ReleaseKind::RenderBuffer {
                    image: native.image,
                    allocation: native.allocation,
                    view: native.view,
                },
                last_active,
            );
        }
    }

    pub(super) fn release_render_buffer(&mut self, handle: RenderBufferHandle) {
        self.destroy_render_buffer(handle);
        self.render_buffers.remove(handle);
    }
}

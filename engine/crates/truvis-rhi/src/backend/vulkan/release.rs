//! 延迟释放的原生对象
//!
//! destroy 只是把原生对象交给释放队列，真正的 vkDestroy* 在
//! `VulkanRhi::execute_deferred_releases` 中按 frame slot 执行。

use ash::vk;

use crate::backend::vulkan::VulkanRhi;
use crate::backend::vulkan::buffer::{BufferNative, HostBuffer};

pub(crate) enum ReleaseKind {
    Buffer {
        natives: Vec<BufferNative>,
        staging: Vec<HostBuffer>,
    },
    /// 单独释放的 staging buffer（纹理上传、Immutable buffer 上传）
    StagingBuffer(HostBuffer),
    Texture {
        image: vk::Image,
        allocation: Option<vk_mem::Allocation>,
        views: Vec<vk::ImageView>,
    },
    RenderBuffer {
        image: vk::Image,
        allocation: vk_mem::Allocation,
        view: vk::ImageView,
    },
    Sampler(vk::Sampler),
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    },
    ShaderResourceBindings {
        layout: vk::DescriptorSetLayout,
        pool_index: usize,
    },
    RenderPass(vk::RenderPass),
    TextureRenderTarget {
        framebuffer: vk::Framebuffer,
        views: Vec<vk::ImageView>,
    },
    SecondaryCommandBuffer {
        pool: vk::CommandPool,
        command_buffer: vk::CommandBuffer,
    },
}

impl VulkanRhi {
    /// 释放所有已经可以安全销毁的对象
    ///
    /// `forced` 只能在 GPU 空闲之后使用
    pub(super) fn execute_deferred_releases(&mut self, forced: bool) {
        let _span = tracy_client::span!("execute_deferred_releases");
        let current_slot = self.current_frame_slot;
        let ctx = &self.ctx;
        let descriptor_pools = &mut self.descriptor_pools;
        self.release_queue.drain(forced, current_slot, |kind| unsafe {
            match kind {
                ReleaseKind::Buffer { natives, staging } => {
                    for mut native in natives {
                        if native.mapped.is_some() {
                            ctx.allocator.unmap_memory(&mut native.allocation);
                        }
                        ctx.allocator.destroy_buffer(native.buffer, &mut native.allocation);
                    }
                    for buffer in staging {
                        buffer.destroy(ctx);
                    }
                }
                ReleaseKind::StagingBuffer(buffer) => buffer.destroy(ctx),
                ReleaseKind::Texture {
                    image,
                    allocation,
                    views,
                } => {
                    for view in views {
                        ctx.device.destroy_image_view(view, None);
                    }
                    if let Some(mut allocation) = allocation {
                        ctx.allocator.destroy_image(image, &mut allocation);
                    }
                }
                ReleaseKind::RenderBuffer {
                    image,
                    mut allocation,
                    view,
                } => {
                    ctx.device.destroy_image_view(view, None);
                    ctx.allocator.destroy_image(image, &mut allocation);
                }
                ReleaseKind::Sampler(sampler) => ctx.device.destroy_sampler(sampler, None),
                ReleaseKind::Pipeline { pipeline, layout } => {
                    ctx.device.destroy_pipeline(pipeline, None);
                    ctx.device.destroy_pipeline_layout(layout, None);
                }
                ReleaseKind::ShaderResourceBindings { layout, pool_index } => {
                    ctx.device.destroy_descriptor_set_layout(layout, None);
                    descriptor_pools.release(pool_index);
                }
                ReleaseKind::RenderPass(render_pass) => ctx.device.destroy_render_pass(render_pass, None),
                ReleaseKind::TextureRenderTarget { framebuffer, views } => {
                    ctx.device.destroy_framebuffer(framebuffer, None);
                    for view in views {
                        ctx.device.destroy_image_view(view, None);
                    }
                }
                ReleaseKind::SecondaryCommandBuffer { pool, command_buffer } => {
                    ctx.device.free_command_buffers(pool, std::slice::from_ref(&command_buffer));
                }
            }
        });
    }
}

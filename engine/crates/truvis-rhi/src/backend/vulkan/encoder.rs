use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::barrier::{BufferBarrier, ImageBarrier};
use crate::backend::vulkan::command_list::{Command, CommandSink};
use crate::backend::vulkan::debug_utils::DebugUtils;

/// 把命令直接写入原生 command buffer
pub(crate) struct NativeEncoder<'a> {
    device: &'a ash::Device,
    debug_utils: &'a DebugUtils,
    command_buffer: vk::CommandBuffer,
}

impl<'a> NativeEncoder<'a> {
    pub fn new(device: &'a ash::Device, debug_utils: &'a DebugUtils, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            debug_utils,
            command_buffer,
        }
    }
}

impl CommandSink for NativeEncoder<'_> {
    fn encode(&mut self, cmd: &Command) {
        let cb = self.command_buffer;
        let device = self.device;
        unsafe {
            match cmd {
                Command::Barrier { .. } | Command::TransitionPassResources { .. } => {
                    // 由 replay 负责展开
                    debug_assert!(false, "barrier commands must go through pipeline_barrier");
                }
                Command::CopyBuffer { src, dst, region } => {
                    device.cmd_copy_buffer(cb, *src, *dst, std::slice::from_ref(region));
                }
                Command::CopyBufferToImage { src, dst, regions } => {
                    device.cmd_copy_buffer_to_image(cb, *src, *dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL, regions);
                }
                Command::CopyImage { src, dst, region } => {
                    device.cmd_copy_image(
                        cb,
                        *src,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        *dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(region),
                    );
                }
                Command::CopyImageToBuffer {
                    src,
                    src_layout,
                    dst,
                    region,
                } => {
                    device.cmd_copy_image_to_buffer(cb, *src, *src_layout, *dst, std::slice::from_ref(region));
                }
                Command::BlitImage {
                    src,
                    dst,
                    region,
                    filter,
                } => {
                    device.cmd_blit_image(
                        cb,
                        *src,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        *dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        std::slice::from_ref(region),
                        *filter,
                    );
                }
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    render_area,
                    clear_values,
                    contents,
                } => {
                    let begin_info = vk::RenderPassBeginInfo::default()
                        .render_pass(*render_pass)
                        .framebuffer(*framebuffer)
                        .render_area(*render_area)
                        .clear_values(clear_values);
                    device.cmd_begin_render_pass(cb, &begin_info, *contents);
                }
                Command::EndRenderPass => device.cmd_end_render_pass(cb),
                Command::BindPipeline { bind_point, pipeline } => {
                    device.cmd_bind_pipeline(cb, *bind_point, *pipeline);
                }
                Command::BindDescriptorSet {
                    bind_point,
                    layout,
                    set,
                    dynamic_offsets,
                } => {
                    device.cmd_bind_descriptor_sets(
                        cb,
                        *bind_point,
                        *layout,
                        0,
                        std::slice::from_ref(set),
                        dynamic_offsets,
                    );
                }
                Command::BindVertexBuffers {
                    first_binding,
                    buffers,
                    offsets,
                } => {
                    device.cmd_bind_vertex_buffers(cb, *first_binding, buffers, offsets);
                }
                Command::BindIndexBuffer {
                    buffer,
                    offset,
                    index_type,
                } => {
                    device.cmd_bind_index_buffer(cb, *buffer, *offset, *index_type);
                }
                Command::SetViewport(viewport) => device.cmd_set_viewport(cb, 0, std::slice::from_ref(viewport)),
                Command::SetScissor(scissor) => device.cmd_set_scissor(cb, 0, std::slice::from_ref(scissor)),
                Command::SetBlendConstants(constants) => device.cmd_set_blend_constants(cb, constants),
                Command::SetStencilRef(reference) => {
                    device.cmd_set_stencil_reference(cb, vk::StencilFaceFlags::FRONT_AND_BACK, *reference);
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => {
                    device.cmd_draw(cb, *vertex_count, *instance_count, *first_vertex, *first_instance);
                }
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => {
                    device.cmd_draw_indexed(
                        cb,
                        *index_count,
                        *instance_count,
                        *first_index,
                        *vertex_offset,
                        *first_instance,
                    );
                }
                Command::Dispatch { x, y, z } => device.cmd_dispatch(cb, *x, *y, *z),
                Command::DebugMarkerBegin(name) => self.debug_utils.cmd_begin_label(cb, name),
                Command::DebugMarkerEnd => self.debug_utils.cmd_end_label(cb),
                Command::DebugMarkerInsert(name) => self.debug_utils.cmd_insert_label(cb, name),
                Command::ExecuteSecondary(secondary) => {
                    device.cmd_execute_commands(cb, std::slice::from_ref(secondary));
                }
            }
        }
    }

    fn pipeline_barrier(&mut self, buffer_barriers: &[BufferBarrier], image_barriers: &[ImageBarrier]) {
        let buffer_barriers = buffer_barriers.iter().map(|b| *b.inner()).collect_vec();
        let image_barriers = image_barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default()
            .buffer_memory_barriers(&buffer_barriers)
            .image_memory_barriers(&image_barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.command_buffer, &dependency_info);
        }
    }
}

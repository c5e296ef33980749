//! 延迟录制的命令列表
//!
//! 录制阶段只把命令追加到内存中的列表，提交前再按顺序回放到原生 command buffer。
//! 这样每个 pass 的资源使用情况在回放时已经完整，可以在 `TransitionPassResources`
//! 的位置插入 tracker 生成的 barrier。

use ash::vk;

use crate::backend::vulkan::barrier::{BufferBarrier, ImageBarrier};
use crate::backend::vulkan::tracker::PassResourceTracker;

/// 单条延迟命令，变长的数据由命令自身持有
#[derive(Clone)]
pub(crate) enum Command {
    /// 资源更新等 pass 外的操作产生的 barrier
    Barrier {
        buffer_barriers: Vec<BufferBarrier>,
        image_barriers: Vec<ImageBarrier>,
    },
    /// 回放时替换为对应 tracker 生成的 barrier
    TransitionPassResources {
        tracker_index: usize,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    },
    /// dst 必须处于 TRANSFER_DST_OPTIMAL
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        regions: Vec<vk::BufferImageCopy>,
    },
    /// src 处于 TRANSFER_SRC_OPTIMAL，dst 处于 TRANSFER_DST_OPTIMAL
    CopyImage {
        src: vk::Image,
        dst: vk::Image,
        region: vk::ImageCopy,
    },
    CopyImageToBuffer {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        region: vk::BufferImageCopy,
    },
    BlitImage {
        src: vk::Image,
        dst: vk::Image,
        region: vk::ImageBlit,
        filter: vk::Filter,
    },
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: Vec<vk::ClearValue>,
        contents: vk::SubpassContents,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    SetBlendConstants([f32; 4]),
    SetStencilRef(u32),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DebugMarkerBegin(String),
    DebugMarkerEnd,
    DebugMarkerInsert(String),
    ExecuteSecondary(vk::CommandBuffer),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Barrier { .. } => "Barrier",
            Self::TransitionPassResources { .. } => "TransitionPassResources",
            Self::CopyBuffer { .. } => "CopyBuffer",
            Self::CopyBufferToImage { .. } => "CopyBufferToImage",
            Self::CopyImage { .. } => "CopyImage",
            Self::CopyImageToBuffer { .. } => "CopyImageToBuffer",
            Self::BlitImage { .. } => "BlitImage",
            Self::BeginRenderPass { .. } => "BeginRenderPass",
            Self::EndRenderPass => "EndRenderPass",
            Self::BindPipeline { .. } => "BindPipeline",
            Self::BindDescriptorSet { .. } => "BindDescriptorSet",
            Self::BindVertexBuffers { .. } => "BindVertexBuffers",
            Self::BindIndexBuffer { .. } => "BindIndexBuffer",
            Self::SetViewport(_) => "SetViewport",
            Self::SetScissor(_) => "SetScissor",
            Self::SetBlendConstants(_) => "SetBlendConstants",
            Self::SetStencilRef(_) => "SetStencilRef",
            Self::Draw { .. } => "Draw",
            Self::DrawIndexed { .. } => "DrawIndexed",
            Self::Dispatch { .. } => "Dispatch",
            Self::DebugMarkerBegin(_) => "DebugMarkerBegin",
            Self::DebugMarkerEnd => "DebugMarkerEnd",
            Self::DebugMarkerInsert(_) => "DebugMarkerInsert",
            Self::ExecuteSecondary(_) => "ExecuteSecondary",
        }
    }
}

/// 命令的最终去向
///
/// 原生实现把命令写入 vk::CommandBuffer；测试里用来捕获回放顺序
pub(crate) trait CommandSink {
    /// barrier 以外的所有命令
    fn encode(&mut self, cmd: &Command);

    fn pipeline_barrier(&mut self, buffer_barriers: &[BufferBarrier], image_barriers: &[ImageBarrier]);
}

/// 按记录顺序回放命令，只在 `TransitionPassResources` 处插入 tracker 的 barrier
pub(crate) fn replay(commands: &[Command], trackers: &[PassResourceTracker], sink: &mut dyn CommandSink) {
    for cmd in commands {
        match cmd {
            Command::TransitionPassResources { tracker_index } => {
                let barriers = trackers[*tracker_index].resolve();
                if !barriers.is_empty() {
                    sink.pipeline_barrier(&barriers.buffer_barriers, &barriers.image_barriers);
                }
            }
            Command::Barrier {
                buffer_barriers,
                image_barriers,
            } => {
                if !buffer_barriers.is_empty() || !image_barriers.is_empty() {
                    sink.pipeline_barrier(buffer_barriers, image_barriers);
                }
            }
            _ => sink.encode(cmd),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::vulkan::barrier::{BufferUsageState, TextureUsageState};
    use crate::backend::vulkan::tracker::tracked_register_texture;
    use ash::vk::Handle;

    /// 把回放结果记录成字符串，便于比较顺序
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub calls: Vec<String>,
    }

    impl CommandSink for RecordingSink {
        fn encode(&mut self, cmd: &Command) {
            let call = match cmd {
                Command::Draw { vertex_count, .. } => format!("Draw({vertex_count})"),
                Command::BindPipeline { pipeline, .. } => format!("BindPipeline({})", pipeline.as_raw()),
                Command::CopyBuffer { src, dst, .. } => format!("CopyBuffer({}->{})", src.as_raw(), dst.as_raw()),
                Command::ExecuteSecondary(secondary) => format!("ExecuteSecondary({})", secondary.as_raw()),
                other => other.name().to_string(),
            };
            self.calls.push(call);
        }

        fn pipeline_barrier(&mut self, buffer_barriers: &[BufferBarrier], image_barriers: &[ImageBarrier]) {
            self.calls.push(format!("Barrier(b={}, i={})", buffer_barriers.len(), image_barriers.len()));
        }
    }

    fn sample_list() -> (Vec<Command>, Vec<PassResourceTracker>) {
        let mut tracker = PassResourceTracker::new();
        let mut usage = TextureUsageState::UNDEFINED;
        tracked_register_texture(
            &mut tracker,
            &mut usage,
            1,
            vk::Image::from_raw(100),
            vk::ImageAspectFlags::COLOR,
            TextureUsageState::COLOR_ATTACHMENT_WRITE,
        );

        let commands = vec![
            Command::Barrier {
                buffer_barriers: vec![BufferBarrier::transition(
                    vk::Buffer::from_raw(7),
                    BufferUsageState::VERTEX_BUFFER,
                    BufferUsageState::TRANSFER_DST,
                )],
                image_barriers: vec![],
            },
            Command::CopyBuffer {
                src: vk::Buffer::from_raw(6),
                dst: vk::Buffer::from_raw(7),
                region: vk::BufferCopy::default().size(16),
            },
            Command::TransitionPassResources { tracker_index: 0 },
            Command::BeginRenderPass {
                render_pass: vk::RenderPass::from_raw(1),
                framebuffer: vk::Framebuffer::from_raw(2),
                render_area: vk::Rect2D::default(),
                clear_values: vec![vk::ClearValue::default()],
                contents: vk::SubpassContents::INLINE,
            },
            Command::BindPipeline {
                bind_point: vk::PipelineBindPoint::GRAPHICS,
                pipeline: vk::Pipeline::from_raw(9),
            },
            Command::Draw {
                vertex_count: 3,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            Command::Draw {
                vertex_count: 6,
                instance_count: 1,
                first_vertex: 0,
                first_instance: 0,
            },
            Command::EndRenderPass,
        ];
        (commands, vec![tracker])
    }

    #[test]
    fn test_replay_keeps_recorded_order() {
        let (commands, trackers) = sample_list();
        let mut sink = RecordingSink::default();
        replay(&commands, &trackers, &mut sink);

        assert_eq!(
            sink.calls,
            vec![
                "Barrier(b=1, i=0)",
                "CopyBuffer(6->7)",
                "Barrier(b=0, i=1)",
                "BeginRenderPass",
                "BindPipeline(9)",
                "Draw(3)",
                "Draw(6)",
                "EndRenderPass",
            ]
        );
    }

    #[test]
    fn test_replay_is_deterministic() {
        let (commands, trackers) = sample_list();
        let mut first = RecordingSink::default();
        let mut second = RecordingSink::default();
        replay(&commands, &trackers, &mut first);
        replay(&commands, &trackers, &mut second);
        assert_eq!(first.calls, second.calls);
    }

    #[test]
    fn test_empty_tracker_emits_no_barrier() {
        let commands = vec![
            Command::TransitionPassResources { tracker_index: 0 },
            Command::Dispatch { x: 1, y: 1, z: 1 },
        ];
        let mut sink = RecordingSink::default();
        replay(&commands, &[PassResourceTracker::new()], &mut sink);
        assert_eq!(sink.calls, vec!["Dispatch"]);
    }
}

use std::ffi::CString;
use std::io::Cursor;
use std::time::Instant;

use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::release::ReleaseKind;
use crate::backend::vulkan::{VulkanRhi, convert};
use crate::desc::{ComputePipelineDesc, GraphicsPipelineDesc, GraphicsPipelineFlags, ShaderStage};
use crate::error::RhiError;
use crate::handles::{ComputePipelineHandle, GraphicsPipelineHandle, SrbHandle};

#[derive(Clone, Copy, Debug)]
pub(crate) struct PipelineNative {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

pub(crate) struct VulkanGraphicsPipeline {
    pub desc: GraphicsPipelineDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub native: Option<PipelineNative>,
}

pub(crate) struct VulkanComputePipeline {
    pub desc: ComputePipelineDesc,
    pub id: u64,
    pub generation: u32,
    pub last_active_frame_slot: Option<usize>,
    pub native: Option<PipelineNative>,
}

/// 一个 shader module 和它的入口函数名
struct ShaderModule {
    module: vk::ShaderModule,
    entry_point: CString,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    fn new(device: &ash::Device, stage: &ShaderStage) -> Result<Self, RhiError> {
        let code = ash::util::read_spv(&mut Cursor::new(&stage.spirv))?;
        let ci = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.create_shader_module(&ci, None)? };
        Ok(Self {
            module,
            entry_point: CString::new(stage.entry_point.as_str()).unwrap_or_else(|_| c"main".to_owned()),
            stage: convert::shader_stage_kind(stage.kind),
        })
    }

    fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(self.entry_point.as_c_str())
    }

    fn destroy(self, device: &ash::Device) {
        unsafe { device.destroy_shader_module(self.module, None) };
    }
}

impl VulkanRhi {
    fn create_pipeline_layout(&self, srb: SrbHandle) -> Result<vk::PipelineLayout, RhiError> {
        let srb = &self.srbs[srb];
        let Some(srb_native) = srb.native.as_ref() else {
            return Err(RhiError::Unsupported(format!("srb {} must be created before the pipeline", srb.id)));
        };
        let ci = vk::PipelineLayoutCreateInfo::default().set_layouts(std::slice::from_ref(&srb_native.layout));
        Ok(unsafe { self.ctx.device.create_pipeline_layout(&ci, None)? })
    }

    fn create_shader_modules(&self, stages: &[ShaderStage]) -> Result<Vec<ShaderModule>, RhiError> {
        let mut modules = Vec::with_capacity(stages.len());
        for stage in stages {
            match ShaderModule::new(&self.ctx.device, stage) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    modules.into_iter().for_each(|m| m.destroy(&self.ctx.device));
                    return Err(e);
                }
            }
        }
        Ok(modules)
    }
}

// graphics pipeline
impl VulkanRhi {
    pub(super) fn new_graphics_pipeline(&mut self, desc: GraphicsPipelineDesc) -> GraphicsPipelineHandle {
        let id = self.next_resource_id();
        self.graphics_pipelines.insert(VulkanGraphicsPipeline {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            native: None,
        })
    }

    pub(super) fn create_graphics_pipeline(&mut self, handle: GraphicsPipelineHandle) -> Result<(), RhiError> {
        self.destroy_graphics_pipeline(handle);
        let timer = Instant::now();

        let desc = &self.graphics_pipelines[handle].desc;
        let render_pass = &self.render_pass_descs[desc.render_pass];
        let layout = self.create_pipeline_layout(desc.srb)?;
        let modules = match self.create_shader_modules(&desc.stages) {
            Ok(modules) => modules,
            Err(e) => {
                unsafe { self.ctx.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };
        let stage_infos = modules.iter().map(ShaderModule::stage_info).collect_vec();

        let vertex_bindings = desc
            .vertex_bindings
            .iter()
            .enumerate()
            .map(|(i, b)| {
                vk::VertexInputBindingDescription::default().binding(i as u32).stride(b.stride).input_rate(
                    if b.per_instance { vk::VertexInputRate::INSTANCE } else { vk::VertexInputRate::VERTEX },
                )
            })
            .collect_vec();
        let vertex_attributes = desc
            .vertex_attributes
            .iter()
            .map(|a| {
                vk::VertexInputAttributeDescription::default()
                    .binding(a.binding)
                    .location(a.location)
                    .format(convert::vertex_format(a.format))
                    .offset(a.offset)
            })
            .collect_vec();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(convert::topology(desc.topology));
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert::cull_mode(desc.cull_mode))
            .front_face(convert::front_face(desc.front_face))
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(convert::sample_count(desc.sample_count));
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(convert::compare_op(desc.depth_op));

        // 每个 color attachment 一个 blend 状态，缺省的使用默认值
        let blend_attachments = (0..render_pass.layout.colors.len())
            .map(|i| {
                let blend = desc.target_blends.get(i).copied().unwrap_or_default();
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(blend.enable)
                    .src_color_blend_factor(convert::blend_factor(blend.src_color))
                    .dst_color_blend_factor(convert::blend_factor(blend.dst_color))
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(convert::blend_factor(blend.src_alpha))
                    .dst_alpha_blend_factor(convert::blend_factor(blend.dst_alpha))
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect_vec();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let mut dynamic_states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        if desc.flags.contains(GraphicsPipelineFlags::USES_BLEND_CONSTANTS) {
            dynamic_states.push(vk::DynamicState::BLEND_CONSTANTS);
        }
        if desc.flags.contains(GraphicsPipelineFlags::USES_STENCIL_REF) {
            dynamic_states.push(vk::DynamicState::STENCIL_REFERENCE);
        }
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.render_pass)
            .subpass(0);
        let created = unsafe {
            self.ctx.device.create_graphics_pipelines(self.pipeline_cache, std::slice::from_ref(&pipeline_ci), None)
        };
        modules.into_iter().for_each(|m| m.destroy(&self.ctx.device));

        let pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { self.ctx.device.destroy_pipeline_layout(layout, None) };
                return Err(e.into());
            }
        };
        self.ctx.debug_utils.set_object_name(pipeline, &desc.name);
        self.pipeline_creation_time += timer.elapsed();

        let pso = &mut self.graphics_pipelines[handle];
        pso.native = Some(PipelineNative { pipeline, layout });
        pso.generation += 1;
        pso.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_graphics_pipeline(&mut self, handle: GraphicsPipelineHandle) {
        let pso = &mut self.graphics_pipelines[handle];
        if let Some(native) = pso.native.take() {
            let last_active = pso.last_active_frame_slot;
            self.release_queue.release(
                ReleaseKind::Pipeline {
                    pipeline: native.pipeline,
                    layout: native.layout,
                },
                last_active,
            );
        }
    }

    pub(super) fn release_graphics_pipeline(&mut self, handle: GraphicsPipelineHandle) {
        self.destroy_graphics_pipeline(handle);
        self.graphics_pipelines.remove(handle);
    }
}

// compute pipeline
impl VulkanRhi {
    pub(super) fn new_compute_pipeline(&mut self, desc: ComputePipelineDesc) -> ComputePipelineHandle {
        let id = self.next_resource_id();
        self.compute_pipelines.insert(VulkanComputePipeline {
            desc,
            id,
            generation: 0,
            last_active_frame_slot: None,
            native: None,
        })
    }

    pub(super) fn create_compute_pipeline(&mut self, handle: ComputePipelineHandle) -> Result<(), RhiError> {
        self.destroy_compute_pipeline(handle);
        let timer = Instant::now();

        let desc = &self.compute_pipelines[handle].desc;
        let layout = self.create_pipeline_layout(desc.srb)?;
        let module = match ShaderModule::new(&self.ctx.device, &desc.stage) {
            Ok(module) => module,
            Err(e) => {
                unsafe { self.ctx.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let pipeline_ci = vk::ComputePipelineCreateInfo::default().stage(module.stage_info()).layout(layout);
        let created = unsafe {
            self.ctx.device.create_compute_pipelines(self.pipeline_cache, std::slice::from_ref(&pipeline_ci), None)
        };
        module.destroy(&self.ctx.device);

        let pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { self.ctx.device.destroy_pipeline_layout(layout, None) };
                return Err(e.into());
            }
        };
        self.ctx.debug_utils.set_object_name(pipeline, &desc.name);
        self.pipeline_creation_time += timer.elapsed();

        let pso = &mut self.compute_pipelines[handle];
        pso.native = Some(PipelineNative { pipeline, layout });
        pso.generation += 1;
        pso.last_active_frame_slot = None;
        Ok(())
    }

    pub(super) fn destroy_compute_pipeline(&mut self, handle: ComputePipelineHandle) {
        let pso = &mut self.compute_pipelines[handle];
        if let Some(native) = pso.native.take() {
            let last_active = pso.last_active_frame_slot;
            self.release_queue.release(
                ReleaseKind::Pipeline {
                    pipeline: native.pipeline,
                    layout: native.layout,
                },
                last_active,
            );
        }
    }

    pub(super) fn release_compute_pipeline(&mut self, handle: ComputePipelineHandle) {
        self.destroy_compute_pipeline(handle);
        self.compute_pipelines.remove(handle);
    }
}

//! 可移植描述到 vk 枚举的转换

use ash::vk;

use crate::desc::*;

pub(crate) fn texture_format(format: TextureFormat, srgb: bool) -> vk::Format {
    match format {
        TextureFormat::Rgba8 => {
            if srgb {
                vk::Format::R8G8B8A8_SRGB
            } else {
                vk::Format::R8G8B8A8_UNORM
            }
        }
        TextureFormat::Bgra8 => {
            if srgb {
                vk::Format::B8G8R8A8_SRGB
            } else {
                vk::Format::B8G8R8A8_UNORM
            }
        }
        TextureFormat::R8 => vk::Format::R8_UNORM,
        TextureFormat::Rg8 => vk::Format::R8G8_UNORM,
        TextureFormat::R16 => vk::Format::R16_UNORM,
        TextureFormat::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32F => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::R16F => vk::Format::R16_SFLOAT,
        TextureFormat::R32F => vk::Format::R32_SFLOAT,
        TextureFormat::D16 => vk::Format::D16_UNORM,
        TextureFormat::D24S8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::D32F => vk::Format::D32_SFLOAT,
        TextureFormat::Bc1 => {
            if srgb {
                vk::Format::BC1_RGB_SRGB_BLOCK
            } else {
                vk::Format::BC1_RGB_UNORM_BLOCK
            }
        }
        TextureFormat::Bc3 => {
            if srgb {
                vk::Format::BC3_SRGB_BLOCK
            } else {
                vk::Format::BC3_UNORM_BLOCK
            }
        }
        TextureFormat::Bc7 => {
            if srgb {
                vk::Format::BC7_SRGB_BLOCK
            } else {
                vk::Format::BC7_UNORM_BLOCK
            }
        }
        TextureFormat::Etc2Rgb8 => {
            if srgb {
                vk::Format::ETC2_R8G8B8_SRGB_BLOCK
            } else {
                vk::Format::ETC2_R8G8B8_UNORM_BLOCK
            }
        }
        TextureFormat::Astc4x4 => {
            if srgb {
                vk::Format::ASTC_4X4_SRGB_BLOCK
            } else {
                vk::Format::ASTC_4X4_UNORM_BLOCK
            }
        }
    }
}

/// swapchain 的 surface 格式反查回可移植格式，用于回读
pub(crate) fn surface_format_to_texture_format(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8),
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16F),
        _ => None,
    }
}

pub(crate) fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn depth_stencil_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        _ => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

pub(crate) fn sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        other => {
            log::warn!("unsupported sample count {}, falling back to 1", other);
            vk::SampleCountFlags::TYPE_1
        }
    }
}

pub(crate) fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(crate) fn mipmap_mode(mode: MipmapMode) -> vk::SamplerMipmapMode {
    match mode {
        MipmapMode::None | MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub(crate) fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Mirror => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

pub(crate) fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub(crate) fn shader_stages(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

/// 资源在这些 shader stage 中被访问时对应的 pipeline stage
pub(crate) fn pipeline_stages(stages: ShaderStages) -> vk::PipelineStageFlags2 {
    let mut flags = vk::PipelineStageFlags2::NONE;
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::PipelineStageFlags2::VERTEX_SHADER;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::PipelineStageFlags2::FRAGMENT_SHADER;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::PipelineStageFlags2::COMPUTE_SHADER;
    }
    flags
}

pub(crate) fn shader_stage_kind(kind: ShaderStageKind) -> vk::ShaderStageFlags {
    match kind {
        ShaderStageKind::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStageKind::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStageKind::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub(crate) fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::UNormByte4 => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::UInt => vk::Format::R32_UINT,
        VertexFormat::UInt2 => vk::Format::R32G32_UINT,
    }
}

pub(crate) fn topology(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::Triangles => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        Topology::Lines => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::Points => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub(crate) fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(crate) fn front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Ccw => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Cw => vk::FrontFace::CLOCKWISE,
    }
}

pub(crate) fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
    }
}

pub(crate) fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srgb_variants() {
        assert_eq!(texture_format(TextureFormat::Rgba8, true), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(texture_format(TextureFormat::Rgba8, false), vk::Format::R8G8B8A8_UNORM);
        // 非颜色格式忽略 srgb
        assert_eq!(texture_format(TextureFormat::D32F, true), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_stage_mapping() {
        let stages = pipeline_stages(ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert_eq!(stages, vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER);
        assert_eq!(aspect_mask(TextureFormat::D24S8), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
    }
}

//! 可移植的资源描述
//!
//! 这些类型不依赖任何图形 API，后端负责转换成原生结构

use bitflags::bitflags;

use crate::handles::{BufferHandle, RenderBufferHandle, RenderPassDescHandle, SamplerHandle, SrbHandle, TextureHandle};

// ---------------------------------------------------------------------------
// buffer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferType {
    /// 内容只上传一次，staging buffer 用完即释放
    Immutable,
    /// 位于 device local 内存，可以多次上传，staging buffer 会按 slot 复用
    Static,
    /// 每个 frame slot 一份 host visible 的副本，CPU 直接写入
    Dynamic,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
    }
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub ty: BufferType,
    pub usage: BufferUsage,
    pub size: u32,
    pub name: String,
}

// ---------------------------------------------------------------------------
// texture
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Bgra8,
    R8,
    Rg8,
    R16,
    Rgba16F,
    Rgba32F,
    R16F,
    R32F,
    D16,
    D24S8,
    D32F,
    Bc1,
    Bc3,
    Bc7,
    Etc2Rgb8,
    Astc4x4,
}

impl TextureFormat {
    #[inline]
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Bc1 | Self::Bc3 | Self::Bc7 | Self::Etc2Rgb8 | Self::Astc4x4)
    }

    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D16 | Self::D24S8 | Self::D32F)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24S8)
    }

    /// 压缩格式的 block 尺寸（texel），非压缩格式为 1x1
    pub fn block_dim(self) -> (u32, u32) {
        if self.is_compressed() { (4, 4) } else { (1, 1) }
    }

    /// 一个 block（非压缩格式即一个 texel）占用的字节数
    pub fn block_bytes(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rg8 | Self::R16 | Self::R16F | Self::D16 => 2,
            Self::Rgba8 | Self::Bgra8 | Self::R32F | Self::D24S8 | Self::D32F => 4,
            Self::Rgba16F => 8,
            Self::Rgba32F => 16,
            Self::Bc1 | Self::Etc2Rgb8 => 8,
            Self::Bc3 | Self::Bc7 | Self::Astc4x4 => 16,
        }
    }

    /// 一个 width x height 的区域占用的字节数，以及每行的字节数
    pub fn image_size_bytes(self, width: u32, height: u32) -> (u32, u32) {
        let (bw, bh) = self.block_dim();
        let blocks_x = width.div_ceil(bw).max(1);
        let blocks_y = height.div_ceil(bh).max(1);
        let bpl = blocks_x * self.block_bytes();
        (bpl * blocks_y, bpl)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureFlags: u32 {
        const RENDER_TARGET = 1 << 0;
        const CUBE_MAP = 1 << 1;
        const MIP_MAPPED = 1 << 2;
        const SRGB = 1 << 3;
        const USED_AS_TRANSFER_SOURCE = 1 << 4;
        const USED_WITH_GENERATE_MIPS = 1 << 5;
        const USED_WITH_LOAD_STORE = 1 << 6;
        const TEXTURE_ARRAY = 1 << 7;
        const THREE_DIMENSIONAL = 1 << 8;
    }
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// 3D 纹理的深度，其余类型为 1
    pub depth: u32,
    /// TEXTURE_ARRAY 时的层数
    pub array_size: u32,
    pub sample_count: u32,
    pub flags: TextureFlags,
    pub name: String,
}

impl TextureDesc {
    pub fn new_2d(format: TextureFormat, width: u32, height: u32, flags: TextureFlags, name: impl Into<String>) -> Self {
        Self {
            format,
            width,
            height,
            depth: 1,
            array_size: 0,
            sample_count: 1,
            flags,
            name: name.into(),
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        if self.flags.contains(TextureFlags::MIP_MAPPED) {
            mip_level_count(self.width.max(self.height).max(self.depth))
        } else {
            1
        }
    }

    pub fn layer_count(&self) -> u32 {
        if self.flags.contains(TextureFlags::CUBE_MAP) {
            6
        } else if self.flags.contains(TextureFlags::TEXTURE_ARRAY) {
            self.array_size.max(1)
        } else {
            1
        }
    }
}

/// 完整 mip 链的层级数
#[inline]
pub fn mip_level_count(max_dim: u32) -> u32 {
    32 - max_dim.max(1).leading_zeros()
}

/// 指定 mip level 的尺寸，每一维最小为 1
#[inline]
pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

// ---------------------------------------------------------------------------
// sampler
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MipmapMode {
    None,
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
    Mirror,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Clone, Debug)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: MipmapMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub compare_op: Option<CompareOp>,
    pub name: String,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: MipmapMode::None,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            compare_op: None,
            name: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// render buffer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderBufferType {
    DepthStencil,
    /// 只用作 MSAA color attachment，需要 resolve 到纹理
    Color,
}

#[derive(Clone, Debug)]
pub struct RenderBufferDesc {
    pub ty: RenderBufferType,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    /// Color 类型使用的格式，DepthStencil 时忽略
    pub backing_format: Option<TextureFormat>,
    pub name: String,
}

// ---------------------------------------------------------------------------
// shader resource bindings
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageAccess {
    Load,
    Store,
    LoadStore,
}

impl StorageAccess {
    #[inline]
    pub fn writes(self) -> bool {
        !matches!(self, Self::Load)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingResource {
    UniformBuffer {
        buffer: BufferHandle,
        offset: u32,
        /// 0 表示从 offset 到 buffer 末尾
        size: u32,
        has_dynamic_offset: bool,
    },
    SampledTexture {
        texture: TextureHandle,
        sampler: SamplerHandle,
    },
    StorageBuffer {
        buffer: BufferHandle,
        offset: u32,
        size: u32,
        access: StorageAccess,
    },
    StorageImage {
        texture: TextureHandle,
        level: u32,
        access: StorageAccess,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderResourceBinding {
    pub binding: u32,
    pub stages: ShaderStages,
    pub resource: BindingResource,
}

// ---------------------------------------------------------------------------
// pipeline
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub kind: ShaderStageKind,
    /// SPIR-V 字节码
    pub spirv: Vec<u8>,
    pub entry_point: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexFormat {
    Float,
    Float2,
    Float3,
    Float4,
    UNormByte4,
    UInt,
    UInt2,
}

#[derive(Clone, Copy, Debug)]
pub struct VertexInputBinding {
    pub stride: u32,
    pub per_instance: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct VertexInputAttribute {
    pub binding: u32,
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrontFace {
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
}

#[derive(Clone, Copy, Debug)]
pub struct TargetBlend {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl Default for TargetBlend {
    fn default() -> Self {
        Self {
            enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GraphicsPipelineFlags: u32 {
        const USES_BLEND_CONSTANTS = 1 << 0;
        const USES_STENCIL_REF = 1 << 1;
        const USES_SCISSOR = 1 << 2;
    }
}

#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc {
    pub stages: Vec<ShaderStage>,
    pub vertex_bindings: Vec<VertexInputBinding>,
    pub vertex_attributes: Vec<VertexInputAttribute>,
    pub topology: Topology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_op: CompareOp,
    /// 每个 color attachment 一项，为空时按单个不混合的 target 处理
    pub target_blends: Vec<TargetBlend>,
    pub sample_count: u32,
    pub flags: GraphicsPipelineFlags,
    pub srb: SrbHandle,
    pub render_pass: RenderPassDescHandle,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDesc {
    pub stage: ShaderStage,
    pub srb: SrbHandle,
    pub name: String,
}

// ---------------------------------------------------------------------------
// render target
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentSource {
    Texture(TextureHandle),
    RenderBuffer(RenderBufferHandle),
}

#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    pub source: AttachmentSource,
    pub layer: u32,
    pub level: u32,
    /// MSAA 时的 resolve 目标
    pub resolve_texture: Option<TextureHandle>,
    pub resolve_layer: u32,
    pub resolve_level: u32,
}

impl ColorAttachment {
    pub fn texture(texture: TextureHandle) -> Self {
        Self {
            source: AttachmentSource::Texture(texture),
            layer: 0,
            level: 0,
            resolve_texture: None,
            resolve_layer: 0,
            resolve_level: 0,
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RenderTargetFlags: u32 {
        /// begin_pass 时保留 color 内容（load 而不是 clear）
        const PRESERVE_COLOR_CONTENTS = 1 << 0;
        const PRESERVE_DEPTH_STENCIL_CONTENTS = 1 << 1;
    }
}

#[derive(Clone, Debug)]
pub struct TextureRenderTargetDesc {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<AttachmentSource>,
    pub flags: RenderTargetFlags,
    pub name: String,
}

// ---------------------------------------------------------------------------
// swapchain
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SwapchainFlags: u32 {
        const NO_VSYNC = 1 << 0;
        const MINIMAL_BUFFER_COUNT = 1 << 1;
        /// 允许对 swapchain image 做 readback
        const USED_AS_TRANSFER_SOURCE = 1 << 2;
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub display_handle: raw_window_handle::RawDisplayHandle,
    pub window_handle: raw_window_handle::RawWindowHandle,
    /// 由调用者提供的窗口像素尺寸，用于 surface 没有给出固定尺寸的情况
    pub width: u32,
    pub height: u32,
    pub flags: SwapchainFlags,
    pub depth_stencil: Option<RenderBufferHandle>,
    pub name: String,
}

// ---------------------------------------------------------------------------
// command buffer
// ---------------------------------------------------------------------------

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct BeginPassFlags: u32 {
        /// pass 内会调用 begin_external / end_external 插入原生命令
        const EXTERNAL_CONTENT = 1 << 0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct EndFrameFlags: u32 {
        /// 提交命令但不 present
        const SKIP_PRESENT = 1 << 0;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
            stencil: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scissor {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain() {
        assert_eq!(mip_level_count(1), 1);
        assert_eq!(mip_level_count(256), 9);
        assert_eq!(mip_level_count(300), 9);
        assert_eq!(mip_size(256, 64, 7), (2, 1));
        assert_eq!(mip_size(256, 64, 20), (1, 1));
    }

    #[test]
    fn test_compressed_size() {
        // 5x5 的 BC1 需要 2x2 个 block
        assert_eq!(TextureFormat::Bc1.image_size_bytes(5, 5), (32, 16));
        assert_eq!(TextureFormat::Rgba8.image_size_bytes(3, 2), (24, 12));
    }

    #[test]
    fn test_layer_count() {
        let mut desc = TextureDesc::new_2d(TextureFormat::Rgba8, 4, 4, TextureFlags::CUBE_MAP, "cube");
        assert_eq!(desc.layer_count(), 6);
        desc.flags = TextureFlags::TEXTURE_ARRAY;
        desc.array_size = 4;
        assert_eq!(desc.layer_count(), 4);
    }
}

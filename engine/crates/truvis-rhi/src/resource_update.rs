//! 资源更新批次
//!
//! 客户端先把上传、拷贝、回读请求记录到 [`ResourceUpdateBatch`]，再通过
//! `resource_update` / `begin_pass` / `end_pass` 交给后端，后端在录制时转换成
//! staging buffer、拷贝命令和 barrier。

use crate::desc::TextureFormat;
use crate::handles::{BufferHandle, TextureHandle};

/// 回读完成后交给回调的数据
#[derive(Clone, Debug, Default)]
pub struct ReadbackData {
    pub data: Vec<u8>,
    /// 纹理回读时的格式，buffer 回读为 None
    pub format: Option<TextureFormat>,
    pub width: u32,
    pub height: u32,
}

pub type ReadbackCallback = Box<dyn FnOnce(ReadbackData)>;

/// 纹理某个 subresource 的上传描述
#[derive(Clone, Debug)]
pub struct TextureSubresourceUpload {
    pub layer: u32,
    pub level: u32,
    /// 紧密排列的像素数据
    pub data: Vec<u8>,
    pub dst_x: u32,
    pub dst_y: u32,
    /// 上传区域的尺寸，None 表示整个 subresource
    pub size: Option<(u32, u32)>,
}

impl TextureSubresourceUpload {
    pub fn full(layer: u32, level: u32, data: Vec<u8>) -> Self {
        Self {
            layer,
            level,
            data,
            dst_x: 0,
            dst_y: 0,
            size: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextureCopyDesc {
    pub src_layer: u32,
    pub src_level: u32,
    pub src_offset: (u32, u32),
    pub dst_layer: u32,
    pub dst_level: u32,
    pub dst_offset: (u32, u32),
    /// None 表示 src 这个 mip level 的完整尺寸
    pub size: Option<(u32, u32)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadbackSource {
    Texture { texture: TextureHandle, layer: u32, level: u32 },
    /// 当前帧 swapchain 的 back buffer
    CurrentSwapchainImage,
}

pub(crate) enum BufferOp {
    DynamicUpdate {
        buffer: BufferHandle,
        offset: u32,
        data: Vec<u8>,
    },
    StaticUpload {
        buffer: BufferHandle,
        offset: u32,
        data: Vec<u8>,
    },
    Read {
        buffer: BufferHandle,
        offset: u32,
        size: u32,
        callback: ReadbackCallback,
    },
}

pub(crate) enum TextureOp {
    Upload {
        texture: TextureHandle,
        subresources: Vec<TextureSubresourceUpload>,
    },
    Copy {
        dst: TextureHandle,
        src: TextureHandle,
        desc: TextureCopyDesc,
    },
    Read {
        source: ReadbackSource,
        callback: ReadbackCallback,
    },
    GenerateMips {
        texture: TextureHandle,
    },
}

/// 一批资源更新请求
///
/// 执行顺序：先处理全部 buffer 操作，再处理全部 texture 操作，各自保持记录顺序
#[derive(Default)]
pub struct ResourceUpdateBatch {
    pub(crate) buffer_ops: Vec<BufferOp>,
    pub(crate) texture_ops: Vec<TextureOp>,
}

impl ResourceUpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer_ops.is_empty() && self.texture_ops.is_empty()
    }

    /// 把另一个批次的请求追加到本批次之后
    pub fn merge(&mut self, mut other: ResourceUpdateBatch) {
        self.buffer_ops.append(&mut other.buffer_ops);
        self.texture_ops.append(&mut other.texture_ops);
    }

    /// 只能用于 Dynamic buffer
    pub fn update_dynamic_buffer(&mut self, buffer: BufferHandle, offset: u32, data: &[u8]) {
        self.buffer_ops.push(BufferOp::DynamicUpdate {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    /// 用于 Immutable 和 Static buffer
    pub fn upload_static_buffer(&mut self, buffer: BufferHandle, offset: u32, data: &[u8]) {
        self.buffer_ops.push(BufferOp::StaticUpload {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    pub fn read_back_buffer(&mut self, buffer: BufferHandle, offset: u32, size: u32, callback: ReadbackCallback) {
        self.buffer_ops.push(BufferOp::Read {
            buffer,
            offset,
            size,
            callback,
        });
    }

    pub fn upload_texture(&mut self, texture: TextureHandle, subresources: Vec<TextureSubresourceUpload>) {
        self.texture_ops.push(TextureOp::Upload { texture, subresources });
    }

    pub fn copy_texture(&mut self, dst: TextureHandle, src: TextureHandle, desc: TextureCopyDesc) {
        self.texture_ops.push(TextureOp::Copy { dst, src, desc });
    }

    pub fn read_back_texture(&mut self, source: ReadbackSource, callback: ReadbackCallback) {
        self.texture_ops.push(TextureOp::Read { source, callback });
    }

    pub fn generate_mips(&mut self, texture: TextureHandle) {
        self.texture_ops.push(TextureOp::GenerateMips { texture });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_merge_keeps_order() {
        let mut buffers: SlotMap<BufferHandle, ()> = SlotMap::with_key();
        let a = buffers.insert(());
        let b = buffers.insert(());

        let mut first = ResourceUpdateBatch::new();
        first.update_dynamic_buffer(a, 0, &[1, 2, 3, 4]);
        let mut second = ResourceUpdateBatch::new();
        second.upload_static_buffer(b, 16, &[5, 6]);

        first.merge(second);
        assert_eq!(first.buffer_ops.len(), 2);
        assert!(matches!(first.buffer_ops[0], BufferOp::DynamicUpdate { buffer, .. } if buffer == a));
        assert!(matches!(first.buffer_ops[1], BufferOp::StaticUpload { buffer, offset: 16, .. } if buffer == b));
        assert!(first.texture_ops.is_empty());
    }
}

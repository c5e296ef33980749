//! 原生句柄，用于和外部直接调用 Vulkan 的代码互操作

use ash::vk;

#[derive(Clone, Debug, Default)]
pub struct NativeBuffer {
    /// Dynamic buffer 每个 frame slot 一个，其余类型只有一个
    pub objects: Vec<vk::Buffer>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeTexture {
    pub image: vk::Image,
    /// RHI 记录的当前 layout
    pub layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeCommandBuffer {
    /// pass 内 begin_external 之后为当前的 secondary command buffer，否则为 primary
    pub command_buffer: vk::CommandBuffer,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NativeRenderPass {
    pub render_pass: vk::RenderPass,
}

#[derive(Clone, Copy, Debug)]
pub struct NativeDevice {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub queue_family_index: u32,
    pub queue: vk::Queue,
}

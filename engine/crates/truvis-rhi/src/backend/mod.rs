pub(crate) mod vulkan;

//! VK_EXT_debug_utils 的封装
//!
//! 扩展不可用或者没有启用时，所有接口都是空操作，调用方不需要判断。

use std::ffi::{CStr, CString};

use ash::vk;

/// validation layer 的消息转发到 log
pub(crate) struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self, vk::Result> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = Self::messenger_ci();
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
        Ok(Self { loader, messenger })
    }

    /// 用于创建 debug messenger 的结构体，也可以挂到 InstanceCreateInfo 上捕获 instance 创建期间的消息
    pub fn messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }

    pub fn destroy(self) {
        unsafe {
            log::info!("Destroying DebugMessenger");
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

/// debug messenger 的回调函数
/// # Safety
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    // 部分 layer 输出 json，把 MainMessage 单独拿出来，里面有换行符
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg.as_ref());
    let mut json_obj = json_value.as_mut().map_or(None, |v| v.as_object_mut());
    let main_msg_value = json_obj.as_mut().and_then(|obj| obj.remove("MainMessage"));
    let main_msg_str = main_msg_value.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let total_msg_str =
        json_obj.and_then(|obj| serde_json::to_string_pretty(&obj).ok()).unwrap_or_else(|| msg.to_string());

    let format_msg = format!("[{:?}]\n{}\n{}\n", message_type, total_msg_str, main_msg_str);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

/// object name 与 command buffer label
pub(crate) struct DebugUtils {
    device_fn: Option<ash::ext::debug_utils::Device>,
}

impl DebugUtils {
    pub fn new(instance: &ash::Instance, device: &ash::Device, enabled: bool) -> Self {
        Self {
            device_fn: enabled.then(|| ash::ext::debug_utils::Device::new(instance, device)),
        }
    }

    /// 扩展不可用时使用
    pub fn disabled() -> Self {
        Self { device_fn: None }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.device_fn.is_some()
    }

    pub fn set_object_name<T: vk::Handle + Copy>(&self, handle: T, name: &str) {
        let Some(device_fn) = &self.device_fn else {
            return;
        };
        if name.is_empty() {
            return;
        }
        let Ok(name) = CString::new(name) else {
            return;
        };
        unsafe {
            let info = vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle);
            if let Err(e) = device_fn.set_debug_utils_object_name(&info) {
                log::warn!("failed to set object name {:?}: {:?}", name, e);
            }
        }
    }

    pub fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, label: &str) {
        let Some(device_fn) = &self.device_fn else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        unsafe {
            device_fn.cmd_begin_debug_utils_label(
                command_buffer,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color([0.5, 0.7, 0.3, 1.0]),
            );
        }
    }

    pub fn cmd_end_label(&self, command_buffer: vk::CommandBuffer) {
        let Some(device_fn) = &self.device_fn else {
            return;
        };
        unsafe {
            device_fn.cmd_end_debug_utils_label(command_buffer);
        }
    }

    pub fn cmd_insert_label(&self, command_buffer: vk::CommandBuffer, label: &str) {
        let Some(device_fn) = &self.device_fn else {
            return;
        };
        let name = CString::new(label).unwrap_or_default();
        unsafe {
            device_fn.cmd_insert_debug_utils_label(
                command_buffer,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color([0.8, 0.8, 0.8, 1.0]),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_disabled_calls_are_noops() {
        let debug_utils = DebugUtils::disabled();
        assert!(!debug_utils.is_enabled());
        // 没有设备也可以安全调用
        debug_utils.set_object_name(vk::Buffer::from_raw(1), "buffer");
        debug_utils.cmd_begin_label(vk::CommandBuffer::from_raw(2), "pass");
        debug_utils.cmd_insert_label(vk::CommandBuffer::from_raw(2), "msg");
        debug_utils.cmd_end_label(vk::CommandBuffer::from_raw(2));
    }
}

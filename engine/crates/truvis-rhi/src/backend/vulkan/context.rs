//! 设备初始化
//!
//! 负责 instance、physical device、queue family、logical device、内存分配器的创建，
//! 这些对象在 RHI 的整个生命周期内不变。

use std::ffi::{CStr, c_char};
use std::mem::ManuallyDrop;

use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::debug_utils::{DebugMessenger, DebugUtils};
use crate::config::RhiInitParams;
use crate::error::RhiError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// 各个平台的 surface 扩展，实例创建时启用当前驱动支持的全部
const SURFACE_EXTENSIONS: &[&CStr] = &[
    ash::khr::surface::NAME,
    ash::khr::win32_surface::NAME,
    ash::khr::xlib_surface::NAME,
    ash::khr::xcb_surface::NAME,
    ash::khr::wayland_surface::NAME,
    ash::khr::android_surface::NAME,
    ash::ext::metal_surface::NAME,
];

/// 依次尝试的 depth stencil 格式
const DEPTH_STENCIL_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
];

pub(crate) struct VulkanContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub physical_device_props: vk::PhysicalDeviceProperties,
    pub device: ash::Device,
    pub queue_family_index: u32,
    pub queue: vk::Queue,

    pub allocator: ManuallyDrop<vk_mem::Allocator>,

    /// 驱动不支持 VK_KHR_surface 时为 None，只能使用离屏帧
    pub surface_fn: Option<ash::khr::surface::Instance>,
    pub swapchain_fn: Option<ash::khr::swapchain::Device>,

    pub debug_utils: DebugUtils,
    debug_messenger: Option<DebugMessenger>,

    pub depth_stencil_format: vk::Format,
}

// new & init
impl VulkanContext {
    pub fn new(params: &RhiInitParams) -> Result<Self, RhiError> {
        let entry = unsafe { ash::Entry::load()? };

        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None)? };
        let has_instance_ext = |name: &CStr| {
            available_exts.iter().any(|ext| ext.extension_name_as_c_str().is_ok_and(|ext_name| ext_name == name))
        };

        let mut instance_exts: Vec<*const c_char> =
            SURFACE_EXTENSIONS.iter().filter(|name| has_instance_ext(name)).map(|name| name.as_ptr()).collect_vec();
        let has_surface = has_instance_ext(ash::khr::surface::NAME);
        let has_debug_utils = has_instance_ext(ash::ext::debug_utils::NAME);
        let use_debug_utils = has_debug_utils && (params.enable_debug_markers || params.enable_validation);
        if use_debug_utils {
            instance_exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        if (params.enable_debug_markers || params.enable_validation) && !has_debug_utils {
            log::warn!("VK_EXT_debug_utils is not available, debug markers are disabled");
        }

        let mut layers = Vec::new();
        if params.enable_validation {
            let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
            if available_layers.iter().any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER)) {
                layers.push(VALIDATION_LAYER.as_ptr());
            } else {
                log::warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
            }
        }

        let app_name = std::ffi::CString::new(params.app_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .engine_name(c"Truvis")
            .api_version(vk::API_VERSION_1_3);

        let mut messenger_ci = DebugMessenger::messenger_ci();
        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&instance_exts)
            .enabled_layer_names(&layers);
        if use_debug_utils && params.enable_validation {
            instance_ci = instance_ci.push_next(&mut messenger_ci);
        }

        let instance = unsafe { entry.create_instance(&instance_ci, None)? };

        let debug_messenger = if use_debug_utils && params.enable_validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("failed to create debug messenger: {:?}", e);
                    None
                }
            }
        } else {
            None
        };

        let (physical_device, queue_family_index) = Self::pick_physical_device(&instance, params.prefer_discrete_gpu)?;
        let physical_device_props = unsafe { instance.get_physical_device_properties(physical_device) };
        log::info!(
            "using physical device: {:?}, type: {:?}, api: {}.{}.{}, queue family: {}",
            physical_device_props.device_name_as_c_str().unwrap_or(c"unknown"),
            physical_device_props.device_type,
            vk::api_version_major(physical_device_props.api_version),
            vk::api_version_minor(physical_device_props.api_version),
            vk::api_version_patch(physical_device_props.api_version),
            queue_family_index
        );

        let device_exts = unsafe { instance.enumerate_device_extension_properties(physical_device)? };
        let has_swapchain = has_surface
            && device_exts
                .iter()
                .any(|ext| ext.extension_name_as_c_str().is_ok_and(|name| name == ash::khr::swapchain::NAME));
        let mut enabled_device_exts = Vec::new();
        if has_swapchain {
            enabled_device_exts.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let queue_priorities = [1.0_f32];
        let queue_ci = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);
        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_ci))
            .enabled_extension_names(&enabled_device_exts)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(physical_device, &device_ci, None)? };
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let mut allocator_ci = vk_mem::AllocatorCreateInfo::new(&instance, &device, physical_device);
        allocator_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(allocator_ci)? };

        let surface_fn = has_surface.then(|| ash::khr::surface::Instance::new(&entry, &instance));
        let swapchain_fn = has_swapchain.then(|| ash::khr::swapchain::Device::new(&instance, &device));
        let debug_utils = DebugUtils::new(&instance, &device, use_debug_utils && params.enable_debug_markers);

        let depth_stencil_format = DEPTH_STENCIL_FORMAT_CANDIDATES
            .iter()
            .copied()
            .find(|format| {
                let props = unsafe { instance.get_physical_device_format_properties(physical_device, *format) };
                props.optimal_tiling_features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .unwrap_or(vk::Format::D32_SFLOAT_S8_UINT);

        Ok(Self {
            entry,
            instance,
            physical_device,
            physical_device_props,
            device,
            queue_family_index,
            queue,
            allocator: ManuallyDrop::new(allocator),
            surface_fn,
            swapchain_fn,
            debug_utils,
            debug_messenger,
            depth_stencil_format,
        })
    }

    /// 选择支持 Vulkan 1.3 且有 graphics + compute queue 的设备，可以优先选择独显
    fn pick_physical_device(instance: &ash::Instance, prefer_discrete: bool) -> Result<(vk::PhysicalDevice, u32), RhiError> {
        let candidates = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .filter_map(|pdevice| {
                let props = unsafe { instance.get_physical_device_properties(pdevice) };
                if props.api_version < vk::API_VERSION_1_3 {
                    return None;
                }
                let queue_family_index = unsafe { instance.get_physical_device_queue_family_properties(pdevice) }
                    .iter()
                    .position(|family| {
                        family.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                    })?;
                Some((pdevice, queue_family_index as u32, props.device_type))
            })
            .collect_vec();

        let preferred = prefer_discrete
            .then(|| candidates.iter().find(|(_, _, ty)| *ty == vk::PhysicalDeviceType::DISCRETE_GPU))
            .flatten()
            .or_else(|| candidates.first());

        preferred.map(|(pdevice, family, _)| (*pdevice, *family)).ok_or(RhiError::NoSuitableDevice)
    }

    pub fn destroy(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

// tools
impl VulkanContext {
    pub fn device_name(&self) -> String {
        self.physical_device_props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[inline]
    pub fn min_uniform_buffer_offset_alignment(&self) -> u64 {
        self.physical_device_props.limits.min_uniform_buffer_offset_alignment
    }

    #[inline]
    pub fn min_storage_buffer_offset_alignment(&self) -> u64 {
        self.physical_device_props.limits.min_storage_buffer_offset_alignment
    }

    pub fn create_fence(&self, signaled: bool, name: &str) -> Result<vk::Fence, vk::Result> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { self.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None)? };
        self.debug_utils.set_object_name(fence, name);
        Ok(fence)
    }

    pub fn create_semaphore(&self, name: &str) -> Result<vk::Semaphore, vk::Result> {
        let semaphore = unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
        self.debug_utils.set_object_name(semaphore, name);
        Ok(semaphore)
    }

    /// 等待并重置 fence
    pub fn wait_and_reset_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        unsafe {
            self.device.wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX)?;
            self.device.reset_fences(std::slice::from_ref(&fence))
        }
    }

    /// 当前分配器的统计信息
    pub fn allocator_statistics(&self) -> Option<vk_mem::ffi::VmaStatistics> {
        match self.allocator.calculate_statistics() {
            Ok(stats) => Some(stats.total.statistics),
            Err(e) => {
                log::warn!("failed to query allocator statistics: {:?}", e);
                None
            }
        }
    }
}

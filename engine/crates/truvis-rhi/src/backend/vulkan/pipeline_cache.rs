//! pipeline cache 的序列化格式
//!
//! | 头部 (8 个 u32) | pipeline cache uuid (uuid_size 字节) | 驱动给出的 cache 数据 (data_size 字节) |
//!
//! 载入时头部的任何一项和当前设备不一致都会丢弃数据，使用空的 cache。

use ash::vk;
use bytemuck::{Pod, Zeroable};

use crate::backend::vulkan::VulkanRhi;

/// 头部中标识本后端的 tag
pub(crate) const PIPELINE_CACHE_RHI_ID: u32 = u32::from_le_bytes(*b"TVKC");

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct PipelineCacheHeader {
    pub rhi_id: u32,
    /// 指针宽度，区分 32 / 64 位进程
    pub arch: u32,
    pub driver_version: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub data_size: u32,
    pub uuid_size: u32,
    pub reserved: u32,
}

const HEADER_SIZE: usize = size_of::<PipelineCacheHeader>();

/// 当前设备的身份，用于生成和校验头部
#[derive(Clone, Copy, Debug)]
pub(crate) struct DeviceIdentity {
    pub driver_version: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub uuid: [u8; vk::UUID_SIZE],
}

impl DeviceIdentity {
    pub fn from_props(props: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            driver_version: props.driver_version,
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            uuid: props.pipeline_cache_uuid,
        }
    }

    fn header(&self, data_size: usize) -> PipelineCacheHeader {
        PipelineCacheHeader {
            rhi_id: PIPELINE_CACHE_RHI_ID,
            arch: size_of::<usize>() as u32,
            driver_version: self.driver_version,
            vendor_id: self.vendor_id,
            device_id: self.device_id,
            data_size: data_size as u32,
            uuid_size: vk::UUID_SIZE as u32,
            reserved: 0,
        }
    }
}

/// 头部 + uuid + 数据
pub(crate) fn serialize(identity: &DeviceIdentity, data: &[u8]) -> Vec<u8> {
    let header = identity.header(data.len());
    let mut blob = Vec::with_capacity(HEADER_SIZE + vk::UUID_SIZE + data.len());
    blob.extend_from_slice(bytemuck::bytes_of(&header));
    blob.extend_from_slice(&identity.uuid);
    blob.extend_from_slice(data);
    blob
}

/// 校验头部，通过则返回驱动的 cache 数据，否则返回拒绝原因
pub(crate) fn validate<'a>(identity: &DeviceIdentity, blob: &'a [u8]) -> Result<&'a [u8], String> {
    if blob.len() < HEADER_SIZE {
        return Err(format!("blob too small ({} bytes)", blob.len()));
    }
    let header: PipelineCacheHeader = bytemuck::pod_read_unaligned(&blob[..HEADER_SIZE]);
    let expected = identity.header(header.data_size as usize);

    if header.rhi_id != expected.rhi_id {
        return Err(format!("rhi id mismatch ({:#x})", header.rhi_id));
    }
    if header.arch != expected.arch {
        return Err(format!("arch mismatch ({} vs {})", header.arch, expected.arch));
    }
    if header.driver_version != expected.driver_version {
        return Err(format!(
            "driver version mismatch ({} vs {})",
            header.driver_version, expected.driver_version
        ));
    }
    if header.vendor_id != expected.vendor_id || header.device_id != expected.device_id {
        return Err(format!(
            "device mismatch ({:#x}:{:#x} vs {:#x}:{:#x})",
            header.vendor_id, header.device_id, expected.vendor_id, expected.device_id
        ));
    }
    if header.uuid_size != expected.uuid_size {
        return Err(format!("uuid size mismatch ({})", header.uuid_size));
    }

    let uuid_end = HEADER_SIZE + vk::UUID_SIZE;
    if blob.len() < uuid_end {
        return Err("blob truncated before uuid".to_string());
    }
    if blob[HEADER_SIZE..uuid_end] != identity.uuid {
        return Err("pipeline cache uuid mismatch".to_string());
    }

    let data_end = uuid_end + header.data_size as usize;
    if blob.len() < data_end {
        return Err(format!(
            "blob truncated ({} bytes, header claims {})",
            blob.len(),
            data_end
        ));
    }
    Ok(&blob[uuid_end..data_end])
}

impl VulkanRhi {
    pub(super) fn create_pipeline_cache(device: &ash::Device, initial_data: &[u8]) -> Result<vk::PipelineCache, vk::Result> {
        let ci = vk::PipelineCacheCreateInfo::default().initial_data(initial_data);
        unsafe { device.create_pipeline_cache(&ci, None) }
    }

    pub(super) fn pipeline_cache_data(&self) -> Vec<u8> {
        let data = match unsafe { self.ctx.device.get_pipeline_cache_data(self.pipeline_cache) } {
            Ok(data) => data,
            Err(e) => {
                log::warn!("failed to retrieve pipeline cache data: {:?}", e);
                return Vec::new();
            }
        };
        serialize(&DeviceIdentity::from_props(&self.ctx.physical_device_props), &data)
    }

    pub(super) fn set_pipeline_cache_data(&mut self, blob: &[u8]) {
        if blob.is_empty() {
            return;
        }
        let identity = DeviceIdentity::from_props(&self.ctx.physical_device_props);
        let data = match validate(&identity, blob) {
            Ok(data) => data,
            Err(reason) => {
                log::warn!("discarding pipeline cache data: {}", reason);
                return;
            }
        };

        match Self::create_pipeline_cache(&self.ctx.device, data) {
            Ok(cache) => {
                unsafe { self.ctx.device.destroy_pipeline_cache(self.pipeline_cache, None) };
                self.pipeline_cache = cache;
                log::info!("pipeline cache initialized with {} bytes", data.len());
            }
            Err(e) => log::warn!("failed to create pipeline cache from data: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            driver_version: 42,
            vendor_id: 0x10de,
            device_id: 0x2684,
            uuid: [7; vk::UUID_SIZE],
        }
    }

    #[test]
    fn test_matching_blob_is_accepted() {
        let blob = serialize(&identity(), &[1, 2, 3, 4, 5]);
        assert_eq!(blob.len(), HEADER_SIZE + vk::UUID_SIZE + 5);
        assert_eq!(validate(&identity(), &blob), Ok(&[1u8, 2, 3, 4, 5][..]));
    }

    #[test]
    fn test_driver_version_mismatch_is_rejected() {
        let blob = serialize(&identity(), &[1, 2, 3]);
        let mut other = identity();
        other.driver_version = 43;
        let err = validate(&other, &blob).unwrap_err();
        assert!(err.contains("driver version"));
    }

    #[test]
    fn test_uuid_mismatch_is_rejected() {
        let blob = serialize(&identity(), &[1, 2, 3]);
        let mut other = identity();
        other.uuid[0] = 8;
        assert!(validate(&other, &blob).is_err());
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let blob = serialize(&identity(), &[9; 64]);
        assert!(validate(&identity(), &blob[..blob.len() - 1]).is_err());
        assert!(validate(&identity(), &blob[..10]).is_err());
    }

    #[test]
    fn test_foreign_tag_is_rejected() {
        let mut blob = serialize(&identity(), &[1]);
        blob[0] ^= 0xff;
        assert!(validate(&identity(), &blob).unwrap_err().contains("rhi id"));
    }
}

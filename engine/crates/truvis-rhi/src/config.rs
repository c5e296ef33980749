use std::path::Path;

use serde::Deserialize;

/// RHI 创建参数
///
/// 可以直接构造，也可以从 toml 读取，例如：
/// ```toml
/// frames_in_flight = 2
/// enable_validation = true
/// app_name = "truvis"
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RhiInitParams {
    /// 同时在 GPU 上执行的帧数，也就是 frame slot 的数量
    pub frames_in_flight: usize,
    pub enable_validation: bool,
    /// 是否尝试启用 VK_EXT_debug_utils（object name 和 debug label）
    pub enable_debug_markers: bool,
    pub prefer_discrete_gpu: bool,
    pub app_name: String,
}

impl Default for RhiInitParams {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            enable_validation: cfg!(debug_assertions),
            enable_debug_markers: cfg!(debug_assertions),
            prefer_discrete_gpu: true,
            app_name: "truvis-rhi".to_string(),
        }
    }
}

impl RhiInitParams {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
    /// 用于覆盖 validation 开关的环境变量，取值 0 或 1
    pub const VALIDATION_ENV: &'static str = "TRUVIS_RHI_VALIDATION";

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let params: Self = toml::from_str(text)?;
        Ok(params.normalized())
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(Self::from_toml_str(&text)?)
    }

    /// 把 frames_in_flight 限制到合法范围，并应用环境变量覆盖
    pub fn normalized(mut self) -> Self {
        let clamped = self.frames_in_flight.clamp(1, Self::MAX_FRAMES_IN_FLIGHT);
        if clamped != self.frames_in_flight {
            log::warn!("frames_in_flight {} is out of range, clamped to {}", self.frames_in_flight, clamped);
            self.frames_in_flight = clamped;
        }
        if let Ok(value) = std::env::var(Self::VALIDATION_ENV) {
            match value.trim() {
                "0" => self.enable_validation = false,
                "1" => self.enable_validation = true,
                other => log::warn!("ignore {}={}, expected 0 or 1", Self::VALIDATION_ENV, other),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_toml() {
        let params = RhiInitParams::from_toml_str("frames_in_flight = 3\napp_name = \"demo\"").unwrap();
        assert_eq!(params.frames_in_flight, 3);
        assert_eq!(params.app_name, "demo");
        assert!(params.prefer_discrete_gpu);
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        let params = RhiInitParams::from_toml_str("frames_in_flight = 8").unwrap();
        assert_eq!(params.frames_in_flight, RhiInitParams::MAX_FRAMES_IN_FLIGHT);

        let params = RhiInitParams::from_toml_str("frames_in_flight = 0").unwrap();
        assert_eq!(params.frames_in_flight, 1);
    }

    #[test]
    fn test_reject_unknown_type() {
        assert!(RhiInitParams::from_toml_str("frames_in_flight = \"two\"").is_err());
    }
}

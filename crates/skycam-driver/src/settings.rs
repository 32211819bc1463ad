//! 采集参数
//!
//! [`AcquisitionSettings`] 只在模式仲裁器的互斥区内修改，以不可变快照
//! （`ArcSwap`）的形式发布给各个工作线程。

use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use skycam_port::{CameraInfo, ImageType, RoiFormat};
use std::time::Duration;

/// 曝光时长上限（微秒，1 小时）
pub const MAX_EXPOSURE_US: u64 = 3_600_000_000;

/// 采集参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub gain: i64,
    /// 单次曝光时长（微秒）
    pub photo_exposure_us: u64,
    /// 视频模式的曝光时长上限（微秒）
    pub video_exposure_ceiling_us: u64,
    /// 单次曝光使用的像素格式（视频流固定为 RGB24）
    pub pixel_format: ImageType,
    /// 画面宽度；0 表示传感器最大宽度
    pub width: u32,
    /// 画面高度；0 表示传感器最大高度
    pub height: u32,
    pub bin: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            gain: 50,
            photo_exposure_us: 1_000_000,
            video_exposure_ceiling_us: 100_000,
            pixel_format: ImageType::Rgb24,
            width: 0,
            height: 0,
            bin: 1,
        }
    }
}

impl AcquisitionSettings {
    pub fn photo_exposure(&self) -> Duration {
        Duration::from_micros(self.photo_exposure_us)
    }

    pub fn video_exposure_ceiling(&self) -> Duration {
        Duration::from_micros(self.video_exposure_ceiling_us)
    }

    /// 视频流（以及设备默认状态）使用的格式
    pub fn stream_format(&self) -> RoiFormat {
        RoiFormat::new(self.width, self.height, self.bin, ImageType::Rgb24)
    }

    /// 单次曝光使用的格式
    pub fn capture_format(&self, override_format: Option<ImageType>) -> RoiFormat {
        self.stream_format()
            .with_image_type(override_format.unwrap_or(self.pixel_format))
    }

    /// 按传感器属性补全/收紧画面尺寸
    ///
    /// 未指定或超出最大值的尺寸取传感器最大值（宽度对齐到 8，高度对齐到 2）。
    pub fn fit_to(mut self, info: &CameraInfo) -> Self {
        let max_width = info.max_width / self.bin.max(1) / 8 * 8;
        let max_height = info.max_height / self.bin.max(1) / 2 * 2;
        if self.width == 0 || self.width > max_width {
            self.width = max_width;
        }
        if self.height == 0 || self.height > max_height {
            self.height = max_height;
        }
        self
    }

    /// 应用部分更新并校验结果
    ///
    /// `info` 为 `None`（未连接）时只做与传感器无关的校验。
    pub fn apply(&self, update: &SettingsUpdate, info: Option<&CameraInfo>) -> Result<Self, CaptureError> {
        let mut next = self.clone();
        if let Some(gain) = update.gain {
            next.gain = gain;
        }
        if let Some(us) = update.photo_exposure_us {
            next.photo_exposure_us = us;
        }
        if let Some(us) = update.video_exposure_ceiling_us {
            next.video_exposure_ceiling_us = us;
        }
        if let Some(format) = update.pixel_format {
            next.pixel_format = format;
        }
        if let Some(width) = update.width {
            next.width = width;
        }
        if let Some(height) = update.height {
            next.height = height;
        }
        if let Some(bin) = update.bin {
            next.bin = bin;
        }
        next.validate(info)?;
        Ok(next)
    }

    pub fn validate(&self, info: Option<&CameraInfo>) -> Result<(), CaptureError> {
        if self.gain < 0 {
            return Err(invalid(format!("gain must be non-negative, got {}", self.gain)));
        }
        if !(1..=MAX_EXPOSURE_US).contains(&self.photo_exposure_us) {
            return Err(invalid(format!(
                "photo exposure must be within 1..={} us, got {}",
                MAX_EXPOSURE_US, self.photo_exposure_us
            )));
        }
        if !(1..=MAX_EXPOSURE_US).contains(&self.video_exposure_ceiling_us) {
            return Err(invalid(format!(
                "video exposure ceiling must be within 1..={} us, got {}",
                MAX_EXPOSURE_US, self.video_exposure_ceiling_us
            )));
        }
        if self.bin == 0 {
            return Err(invalid("bin must be at least 1".to_string()));
        }
        if self.width % 8 != 0 {
            return Err(invalid(format!("width {} is not a multiple of 8", self.width)));
        }
        if self.height % 2 != 0 {
            return Err(invalid(format!("height {} is not a multiple of 2", self.height)));
        }

        let Some(info) = info else {
            return Ok(());
        };
        if !info.supports(self.pixel_format) {
            return Err(CaptureError::UnsupportedFormat(self.pixel_format));
        }
        if !info.supported_bins.contains(&self.bin) {
            return Err(invalid(format!("bin {} not supported by {}", self.bin, info.name)));
        }
        let bin = u64::from(self.bin);
        if u64::from(self.width) * bin > u64::from(info.max_width)
            || u64::from(self.height) * bin > u64::from(info.max_height)
        {
            return Err(invalid(format!(
                "{}x{} (bin {}) exceeds sensor size {}x{}",
                self.width, self.height, self.bin, info.max_width, info.max_height
            )));
        }
        Ok(())
    }

    /// 更新后是否需要重启视频流
    pub(crate) fn requires_stream_restart(&self, next: &Self) -> bool {
        self.gain != next.gain
            || self.video_exposure_ceiling_us != next.video_exposure_ceiling_us
            || self.stream_format() != next.stream_format()
    }
}

fn invalid(message: String) -> CaptureError {
    CaptureError::InvalidSettings(message)
}

/// 曝光时长转换为设备控制值
pub(crate) fn exposure_control_value(us: u64) -> Result<i64, CaptureError> {
    i64::try_from(us)
        .ok()
        .filter(|_| us <= MAX_EXPOSURE_US)
        .ok_or_else(|| invalid(format!("exposure {} us out of range", us)))
}

/// 部分更新（未设置的字段保持不变）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub gain: Option<i64>,
    pub photo_exposure_us: Option<u64>,
    pub video_exposure_ceiling_us: Option<u64>,
    pub pixel_format: Option<ImageType>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bin: Option<u32>,
}

impl SettingsUpdate {
    pub fn gain(gain: i64) -> Self {
        Self {
            gain: Some(gain),
            ..Default::default()
        }
    }

    pub fn photo_exposure_us(us: u64) -> Self {
        Self {
            photo_exposure_us: Some(us),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

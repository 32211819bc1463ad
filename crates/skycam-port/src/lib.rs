//! # Skycam Driver Port
//!
//! 相机硬件抽象层，提供统一的曝光/视频采集接口。
//!
//! 上层（`skycam-driver`）只依赖 [`CameraPort`] 这一组原语操作，
//! 不关心底层是厂商 SDK 还是软件模拟相机。

use std::time::Duration;
use thiserror::Error;

pub mod backend;
pub mod session;

#[cfg(feature = "asi")]
pub mod asi;

#[cfg(feature = "mock")]
pub mod sim;

pub use backend::{BackendKind, BoxedPort, open_backend};
pub use session::DeviceSession;

#[cfg(feature = "mock")]
pub use sim::{PortCall, SimCamera, SimHandle};

/// 端口层统一错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    /// 取帧超时（视频模式下属于正常现象）
    #[error("Read timeout")]
    Timeout,
    /// 视频采集仍处于活动状态，无法开始曝光
    #[error("Video mode still active")]
    VideoModeActive,
    /// 上一次曝光仍在进行
    #[error("Exposure in progress")]
    ExposureInProgress,
    #[error("Invalid control: {0:?}")]
    InvalidControl(ControlKind),
    #[error("Invalid buffer size: expected {expected}, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("Unsupported image type: {0:?}")]
    UnsupportedImageType(ImageType),
    #[error("Camera not open")]
    NotOpen,
    #[error("Camera {0} is already open in this process")]
    AlreadyOpen(i32),
    #[error("No camera found")]
    NoCamera,
    #[error("Camera removed")]
    Removed,
    /// 设备返回的其他错误码
    #[error("Device error {code}: {message}")]
    Device { code: i32, message: String },
}

impl PortError {
    pub fn device(code: i32, message: impl Into<String>) -> Self {
        Self::Device {
            code,
            message: message.into(),
        }
    }

    /// 是否为致命错误（需要调用者显式重连）
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotOpen | Self::Removed | Self::NoCamera)
    }
}

/// 控制项类型（顺序与 SDK 头文件一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum ControlKind {
    Gain = 0,
    /// 曝光时间（微秒）
    Exposure = 1,
    Gamma = 2,
    WhiteBalanceRed = 3,
    WhiteBalanceBlue = 4,
    Offset = 5,
    BandwidthOverload = 6,
    Overclock = 7,
    /// 传感器温度（0.1 °C）
    Temperature = 8,
    Flip = 9,
    AutoMaxGain = 10,
    /// 自动曝光上限（毫秒）
    AutoMaxExposure = 11,
    AutoTargetBrightness = 12,
    HardwareBin = 13,
    HighSpeedMode = 14,
}

impl ControlKind {
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// 控制项当前值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlValue {
    pub value: i64,
    pub auto: bool,
}

/// 像素格式
///
/// - `Raw8` / `Y8`: 单通道 8 位
/// - `Rgb24`: 三通道打包
/// - `Raw16`: 单通道 16 位（小端，两字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(i32)]
pub enum ImageType {
    Raw8 = 0,
    #[default]
    Rgb24 = 1,
    Raw16 = 2,
    Y8 = 3,
}

impl ImageType {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Raw8),
            1 => Some(Self::Rgb24),
            2 => Some(Self::Raw16),
            3 => Some(Self::Y8),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// 每像素字节数
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Raw8 | Self::Y8 => 1,
            Self::Raw16 => 2,
            Self::Rgb24 => 3,
        }
    }
}

/// 曝光状态（轮询得到）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    Idle,
    Working,
    Success,
    Failed,
}

impl ExposureStatus {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Working),
            2 => Some(Self::Success),
            3 => Some(Self::Failed),
            _ => None,
        }
    }
}

/// 画面几何 + 像素格式（ROI 设置）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoiFormat {
    pub width: u32,
    pub height: u32,
    pub bin: u32,
    pub image_type: ImageType,
}

impl RoiFormat {
    pub fn new(width: u32, height: u32, bin: u32, image_type: ImageType) -> Self {
        Self {
            width,
            height,
            bin,
            image_type,
        }
    }

    /// 以相同几何、不同像素格式构造
    pub fn with_image_type(self, image_type: ImageType) -> Self {
        Self { image_type, ..self }
    }

    /// 一帧原始数据的字节数
    pub fn buffer_len(&self) -> usize {
        self.width as usize * self.height as usize * self.image_type.bytes_per_pixel()
    }
}

/// 相机属性（打开设备时读取）
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub name: String,
    pub id: i32,
    pub max_width: u32,
    pub max_height: u32,
    pub is_color: bool,
    pub bit_depth: u32,
    pub supported_bins: Vec<u32>,
    pub supported_formats: Vec<ImageType>,
    /// 像元尺寸（微米）
    pub pixel_size_um: f64,
}

impl CameraInfo {
    pub fn supports(&self, image_type: ImageType) -> bool {
        self.supported_formats.contains(&image_type)
    }
}

/// 相机驱动端口
///
/// 所有方法都以 `&mut self` 调用：端口本身不允许并发访问，
/// 由上层的模式仲裁器负责串行化。
pub trait CameraPort {
    /// 设备标识（打开前即可获得，用于进程内会话唯一性检查）
    fn device_id(&self) -> i32;

    fn open(&mut self) -> Result<CameraInfo, PortError>;
    fn close(&mut self) -> Result<(), PortError>;

    fn set_control(&mut self, kind: ControlKind, value: i64, auto: bool)
    -> Result<(), PortError>;
    fn get_control(&mut self, kind: ControlKind) -> Result<ControlValue, PortError>;

    fn set_frame_format(&mut self, format: RoiFormat) -> Result<(), PortError>;

    fn start_video_capture(&mut self) -> Result<(), PortError>;
    fn stop_video_capture(&mut self) -> Result<(), PortError>;
    /// 拉取一帧视频数据；超时返回 [`PortError::Timeout`]
    fn pull_video_frame(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<(), PortError>;

    fn start_exposure(&mut self, dark_frame: bool) -> Result<(), PortError>;
    fn exposure_status(&mut self) -> Result<ExposureStatus, PortError>;
    fn stop_exposure(&mut self) -> Result<(), PortError>;
    fn fetch_exposure_result(&mut self, buffer: &mut [u8]) -> Result<(), PortError>;
}

impl<T: CameraPort + ?Sized> CameraPort for Box<T> {
    fn device_id(&self) -> i32 {
        (**self).device_id()
    }

    fn open(&mut self) -> Result<CameraInfo, PortError> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), PortError> {
        (**self).close()
    }

    fn set_control(
        &mut self,
        kind: ControlKind,
        value: i64,
        auto: bool,
    ) -> Result<(), PortError> {
        (**self).set_control(kind, value, auto)
    }

    fn get_control(&mut self, kind: ControlKind) -> Result<ControlValue, PortError> {
        (**self).get_control(kind)
    }

    fn set_frame_format(&mut self, format: RoiFormat) -> Result<(), PortError> {
        (**self).set_frame_format(format)
    }

    fn start_video_capture(&mut self) -> Result<(), PortError> {
        (**self).start_video_capture()
    }

    fn stop_video_capture(&mut self) -> Result<(), PortError> {
        (**self).stop_video_capture()
    }

    fn pull_video_frame(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<(), PortError> {
        (**self).pull_video_frame(buffer, timeout)
    }

    fn start_exposure(&mut self, dark_frame: bool) -> Result<(), PortError> {
        (**self).start_exposure(dark_frame)
    }

    fn exposure_status(&mut self) -> Result<ExposureStatus, PortError> {
        (**self).exposure_status()
    }

    fn stop_exposure(&mut self) -> Result<(), PortError> {
        (**self).stop_exposure()
    }

    fn fetch_exposure_result(&mut self, buffer: &mut [u8]) -> Result<(), PortError> {
        (**self).fetch_exposure_result(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_type_conversions() {
        for t in [
            ImageType::Raw8,
            ImageType::Rgb24,
            ImageType::Raw16,
            ImageType::Y8,
        ] {
            assert_eq!(ImageType::from_raw(t.as_raw()), Some(t));
        }
        assert_eq!(ImageType::from_raw(-1), None);
        assert_eq!(ImageType::default(), ImageType::Rgb24);
    }

    #[test]
    fn test_buffer_len() {
        let roi = RoiFormat::new(1280, 960, 1, ImageType::Rgb24);
        assert_eq!(roi.buffer_len(), 1280 * 960 * 3);
        assert_eq!(roi.with_image_type(ImageType::Raw16).buffer_len(), 1280 * 960 * 2);
        assert_eq!(roi.with_image_type(ImageType::Y8).buffer_len(), 1280 * 960);
    }

    #[test]
    fn test_exposure_status_from_raw() {
        assert_eq!(ExposureStatus::from_raw(0), Some(ExposureStatus::Idle));
        assert_eq!(ExposureStatus::from_raw(1), Some(ExposureStatus::Working));
        assert_eq!(ExposureStatus::from_raw(2), Some(ExposureStatus::Success));
        assert_eq!(ExposureStatus::from_raw(3), Some(ExposureStatus::Failed));
        assert_eq!(ExposureStatus::from_raw(9), None);
    }

    #[test]
    fn test_port_error_display() {
        assert_eq!(PortError::Timeout.to_string(), "Read timeout");
        let e = PortError::device(16, "general error");
        assert!(e.to_string().contains("16") && e.to_string().contains("general error"));
        assert!(PortError::Removed.is_fatal());
        assert!(!PortError::Timeout.is_fatal());
    }
}

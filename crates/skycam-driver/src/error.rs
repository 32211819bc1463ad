//! 控制器错误类型定义

use skycam_port::{ExposureStatus, ImageType, PortError};
use std::time::Duration;
use thiserror::Error;

/// 采集控制器错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// 设备未连接（需要调用者显式 connect）
    #[error("Camera not connected")]
    NotConnected,

    /// 有其他模式切换正在进行，或序列任务占用设备
    #[error("Device busy: {0}")]
    DeviceBusy(&'static str),

    /// 切换过程中设备调用失败（设备已尽力恢复到安全状态，不自动重试）
    #[error("Mode transition failed: {0}")]
    TransitionFailed(String),

    /// 曝光在 `exposure + margin` 内没有完成
    #[error("Exposure timed out after {elapsed:?} (limit {limit:?})")]
    ExposureTimeout { elapsed: Duration, limit: Duration },

    /// 设备报告曝光失败
    #[error("Exposure failed (reported by device)")]
    ExposureFailed,

    /// 曝光成功但取数据失败
    #[error("Failed to fetch exposure result: {0}")]
    FetchFailed(PortError),

    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedFormat(ImageType),

    /// 请求被取消（序列任务停止）
    #[error("Cancelled")]
    Cancelled,

    /// 强制停止后设备仍未回到空闲
    #[error("Camera did not return to idle (status: {0:?})")]
    PreconditionNotIdle(ExposureStatus),

    /// 设备拒绝开始曝光（含一次 stop-video 重试）
    #[error("Exposure start rejected: {0}")]
    StartRejected(PortError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// 其他端口错误
    #[error("Device error: {0}")]
    Port(#[from] PortError),
}

/// 扁平化的错误分类（供上层映射为状态码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotConnected,
    DeviceBusy,
    TransitionFailed,
    ExposureTimeout,
    ExposureFailed,
    FetchFailed,
    UnsupportedFormat,
    Cancelled,
    InvalidSettings,
    Device,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConnected => ErrorKind::NotConnected,
            Self::DeviceBusy(_) => ErrorKind::DeviceBusy,
            Self::TransitionFailed(_) | Self::PreconditionNotIdle(_) | Self::StartRejected(_) => {
                ErrorKind::TransitionFailed
            },
            Self::ExposureTimeout { .. } => ErrorKind::ExposureTimeout,
            Self::ExposureFailed => ErrorKind::ExposureFailed,
            Self::FetchFailed(_) => ErrorKind::FetchFailed,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidSettings(_) => ErrorKind::InvalidSettings,
            Self::Port(e) if e.is_fatal() => ErrorKind::NotConnected,
            Self::Port(_) => ErrorKind::Device,
        }
    }

    /// 把设备调用失败包装为切换失败
    pub(crate) fn transition(step: &str, e: impl std::fmt::Display) -> Self {
        Self::TransitionFailed(format!("{step}: {e}"))
    }
}

/// 持久化（帧写入）错误
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(String),

    /// 帧布局与容器格式不兼容
    #[error("Unsupported output: {0}")]
    Unsupported(String),
}

//! 采集模式定义
//!
//! 任意时刻只有一个模式是权威值，由模式仲裁器（[`Camera`](crate::Camera)）
//! 在其互斥区内写入；其他线程通过 [`AtomicMode`] 无锁读取。

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// 采集模式
///
/// # 切换表
///
/// - `Idle → Streaming`: 开始视频流
/// - `Streaming → Idle`: 停止视频流
/// - `Idle → Exposing → Idle`: 单次曝光
/// - `Streaming → Exposing → Streaming`: 视频流中拍照（先暂停，后恢复）
/// - `Idle/Streaming → SequenceRunning`: 开始序列任务
/// - `SequenceRunning → Idle/Streaming`: 任务完成或取消，回到任务前的模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Mode {
    #[default]
    Idle = 0,
    Streaming = 1,
    /// 单次曝光进行中
    Exposing = 2,
    SequenceRunning = 3,
}

impl Mode {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Idle。
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Streaming,
            2 => Self::Exposing,
            3 => Self::SequenceRunning,
            _ => Self::Idle,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Exposing => "exposing",
            Self::SequenceRunning => "sequence_running",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 采集模式（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicMode {
    inner: AtomicU8,
}

impl AtomicMode {
    pub fn new(mode: Mode) -> Self {
        Self {
            inner: AtomicU8::new(mode.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> Mode {
        Mode::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, mode: Mode, ordering: Ordering) {
        self.inner.store(mode.as_u8(), ordering);
    }
}

impl Default for AtomicMode {
    fn default() -> Self {
        Self::new(Mode::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_conversions() {
        for mode in [
            Mode::Idle,
            Mode::Streaming,
            Mode::Exposing,
            Mode::SequenceRunning,
        ] {
            assert_eq!(Mode::from_u8(mode.as_u8()), mode);
        }
        assert_eq!(Mode::from_u8(200), Mode::Idle); // 无效值
        assert_eq!(Mode::SequenceRunning.to_string(), "sequence_running");
        assert_eq!(Mode::default(), Mode::Idle);
    }

    #[test]
    fn test_atomic_mode() {
        let mode = AtomicMode::default();
        assert_eq!(mode.get(Ordering::Relaxed), Mode::Idle);

        mode.set(Mode::Streaming, Ordering::Relaxed);
        assert_eq!(mode.get(Ordering::Relaxed), Mode::Streaming);

        mode.set(Mode::SequenceRunning, Ordering::Release);
        assert_eq!(mode.get(Ordering::Acquire), Mode::SequenceRunning);
    }
}

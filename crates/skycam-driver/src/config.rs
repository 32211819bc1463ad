//! 控制器时序配置

use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 控制器时序配置
///
/// 所有等待/轮询都有显式上界，默认值与 ASI 相机上的实测行为一致。
/// 测试中可以把所有时间缩小到毫秒级。
///
/// # Example
///
/// ```
/// use skycam_driver::ControllerConfig;
///
/// let config = ControllerConfig {
///     exposure_margin_ms: 2_000,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// 视频取帧超时 = clamp(2 × 曝光上限 + margin, min, max)
    pub stream_pull_margin_ms: u64,
    pub stream_pull_min_ms: u64,
    pub stream_pull_max_ms: u64,
    /// 视频流每次循环后的让出时间
    pub stream_loop_delay_ms: u64,
    /// 停止视频流时等待线程退出的上限
    pub stream_stop_wait_ms: u64,
    /// 视频流线程退出检查间隔
    pub stream_stop_poll_ms: u64,

    /// 曝光前等待设备空闲
    pub idle_poll_interval_ms: u64,
    pub idle_wait_ms: u64,
    /// 强制 stop exposure 后的稳定时间
    pub forced_stop_settle_ms: u64,

    /// 曝光状态轮询间隔
    pub exposure_poll_interval_ms: u64,
    /// 曝光等待上限 = 曝光时间 + margin
    pub exposure_margin_ms: u64,

    /// 拍照前暂停视频流后的稳定时间
    pub suspend_settle_ms: u64,
    /// 恢复视频流前的稳定时间
    pub resume_settle_ms: u64,

    /// 快速序列的帧间等待 = max(曝光时间 + buffer, floor)
    pub fast_pacing_buffer_ms: u64,
    pub fast_pacing_floor_ms: u64,

    /// 连续取帧错误：第 1 次以及每第 N 次输出日志
    pub pull_error_report_every: u64,
    /// 连接时写入的 USB 带宽占用（BandwidthOverload）
    pub bandwidth_overload: i64,
    /// 停止类请求等待互斥区的上限
    pub stop_lock_wait_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            stream_pull_margin_ms: 500,
            stream_pull_min_ms: 200,
            stream_pull_max_ms: 2_000,
            stream_loop_delay_ms: 10,
            stream_stop_wait_ms: 2_000,
            stream_stop_poll_ms: 10,
            idle_poll_interval_ms: 100,
            idle_wait_ms: 10_000,
            forced_stop_settle_ms: 500,
            exposure_poll_interval_ms: 100,
            exposure_margin_ms: 5_000,
            suspend_settle_ms: 500,
            resume_settle_ms: 300,
            fast_pacing_buffer_ms: 200,
            fast_pacing_floor_ms: 500,
            pull_error_report_every: 10,
            bandwidth_overload: 40,
            stop_lock_wait_ms: 10_000,
        }
    }
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

impl ControllerConfig {
    /// 检查配置的一致性
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.stream_pull_min_ms > self.stream_pull_max_ms {
            return Err(CaptureError::InvalidSettings(format!(
                "stream_pull_min_ms ({}) > stream_pull_max_ms ({})",
                self.stream_pull_min_ms, self.stream_pull_max_ms
            )));
        }
        if self.stream_pull_max_ms == 0 {
            return Err(CaptureError::InvalidSettings(
                "stream_pull_max_ms must be positive".to_string(),
            ));
        }
        if self.pull_error_report_every == 0 {
            return Err(CaptureError::InvalidSettings(
                "pull_error_report_every must be at least 1".to_string(),
            ));
        }
        if self.idle_poll_interval_ms == 0 || self.exposure_poll_interval_ms == 0 {
            return Err(CaptureError::InvalidSettings(
                "poll intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// 视频取帧超时
    ///
    /// `2 × 曝光 + stream_pull_margin_ms`，限制在 `[stream_pull_min_ms, stream_pull_max_ms]` 内。
    pub fn pull_timeout(&self, video_exposure: Duration) -> Duration {
        let wanted = video_exposure * 2 + ms(self.stream_pull_margin_ms);
        wanted.clamp(ms(self.stream_pull_min_ms), ms(self.stream_pull_max_ms))
    }

    /// 曝光等待上限
    pub fn exposure_deadline(&self, exposure: Duration) -> Duration {
        exposure + ms(self.exposure_margin_ms)
    }

    /// 快速序列的帧间等待
    pub fn fast_pacing(&self, exposure: Duration) -> Duration {
        (exposure + ms(self.fast_pacing_buffer_ms)).max(ms(self.fast_pacing_floor_ms))
    }

    pub fn stream_loop_delay(&self) -> Duration {
        ms(self.stream_loop_delay_ms)
    }

    pub fn stream_stop_wait(&self) -> Duration {
        ms(self.stream_stop_wait_ms)
    }

    pub fn stream_stop_poll(&self) -> Duration {
        ms(self.stream_stop_poll_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        ms(self.idle_poll_interval_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        ms(self.idle_wait_ms)
    }

    pub fn forced_stop_settle(&self) -> Duration {
        ms(self.forced_stop_settle_ms)
    }

    pub fn exposure_poll_interval(&self) -> Duration {
        ms(self.exposure_poll_interval_ms)
    }

    pub fn suspend_settle(&self) -> Duration {
        ms(self.suspend_settle_ms)
    }

    pub fn resume_settle(&self) -> Duration {
        ms(self.resume_settle_ms)
    }

    pub fn stop_lock_wait(&self) -> Duration {
        ms(self.stop_lock_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pull_timeout() {
        let config = ControllerConfig::default();
        // 100ms 视频曝光: 2 × 100 + 500
        assert_eq!(
            config.pull_timeout(Duration::from_millis(100)),
            Duration::from_millis(700)
        );
        // 下界
        assert_eq!(
            ControllerConfig {
                stream_pull_margin_ms: 0,
                ..Default::default()
            }
            .pull_timeout(Duration::from_millis(10)),
            Duration::from_millis(200)
        );
        // 上界
        assert_eq!(
            config.pull_timeout(Duration::from_secs(5)),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn test_fast_pacing() {
        let config = ControllerConfig::default();
        assert_eq!(
            config.fast_pacing(Duration::from_millis(1)),
            Duration::from_millis(500)
        );
        assert_eq!(
            config.fast_pacing(Duration::from_secs(2)),
            Duration::from_millis(2_200)
        );
    }

    #[test]
    fn test_exposure_deadline() {
        let config = ControllerConfig::default();
        assert_eq!(
            config.exposure_deadline(Duration::from_millis(500)),
            Duration::from_millis(5_500)
        );
    }

    #[test]
    fn test_validate() {
        assert!(ControllerConfig::default().validate().is_ok());

        let bad = ControllerConfig {
            stream_pull_min_ms: 3_000,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(CaptureError::InvalidSettings(_))
        ));

        let bad = ControllerConfig {
            pull_error_report_every: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"exposure_margin_ms": 1000}"#).unwrap();
        assert_eq!(config.exposure_margin_ms, 1_000);
        assert_eq!(config.idle_wait_ms, 10_000);
    }
}

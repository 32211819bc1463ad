//! 控制器运行指标
//!
//! 原子计数器，可以在任何线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 控制器实时指标
///
/// # 使用示例
///
/// ```rust
/// use skycam_driver::CameraMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = CameraMetrics::new();
/// metrics.frames_streamed.fetch_add(1, Ordering::Relaxed);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.frames_streamed, 1);
/// ```
#[derive(Debug, Default)]
pub struct CameraMetrics {
    /// 视频流成功发布的帧数
    pub frames_streamed: AtomicU64,

    /// 取帧超时次数（正常现象）
    pub pull_timeouts: AtomicU64,

    /// 取帧错误次数（不含超时）
    pub pull_errors: AtomicU64,

    /// 实际输出日志的取帧错误次数（节流后）
    pub pull_errors_reported: AtomicU64,

    /// 当前连续取帧错误数（成功后归零）
    pub consecutive_pull_errors: AtomicU64,

    pub exposures_succeeded: AtomicU64,

    /// 设备报告失败、启动被拒或取数据失败
    pub exposures_failed: AtomicU64,

    pub exposures_timed_out: AtomicU64,

    /// 曝光前发现设备非空闲而强制 stop 的次数
    pub forced_recoveries: AtomicU64,

    /// 视频流启动次数（含拍照后的恢复）
    pub stream_starts: AtomicU64,
}

impl CameraMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
            pull_timeouts: self.pull_timeouts.load(Ordering::Relaxed),
            pull_errors: self.pull_errors.load(Ordering::Relaxed),
            pull_errors_reported: self.pull_errors_reported.load(Ordering::Relaxed),
            consecutive_pull_errors: self.consecutive_pull_errors.load(Ordering::Relaxed),
            exposures_succeeded: self.exposures_succeeded.load(Ordering::Relaxed),
            exposures_failed: self.exposures_failed.load(Ordering::Relaxed),
            exposures_timed_out: self.exposures_timed_out.load(Ordering::Relaxed),
            forced_recoveries: self.forced_recoveries.load(Ordering::Relaxed),
            stream_starts: self.stream_starts.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub frames_streamed: u64,
    pub pull_timeouts: u64,
    pub pull_errors: u64,
    pub pull_errors_reported: u64,
    pub consecutive_pull_errors: u64,
    pub exposures_succeeded: u64,
    pub exposures_failed: u64,
    pub exposures_timed_out: u64,
    pub forced_recoveries: u64,
    pub stream_starts: u64,
}

impl MetricsSnapshot {
    /// 取帧错误率（百分比，不含超时）
    ///
    /// 返回 0.0 到 100.0 之间的值。没有任何取帧时返回 0.0。
    pub fn pull_error_rate(&self) -> f64 {
        let total = self.frames_streamed + self.pull_errors;
        if total == 0 {
            return 0.0;
        }
        (self.pull_errors as f64 / total as f64) * 100.0
    }

    /// 曝光总次数
    pub fn exposures_total(&self) -> u64 {
        self.exposures_succeeded + self.exposures_failed + self.exposures_timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_default() {
        let snapshot = CameraMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.pull_error_rate(), 0.0);
    }

    #[test]
    fn test_metrics_derived_values() {
        let metrics = CameraMetrics::new();
        metrics.frames_streamed.fetch_add(90, Ordering::Relaxed);
        metrics.pull_errors.fetch_add(10, Ordering::Relaxed);
        metrics.exposures_succeeded.fetch_add(2, Ordering::Relaxed);
        metrics.exposures_timed_out.fetch_add(1, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert!((snapshot.pull_error_rate() - 10.0).abs() < 1e-9);
        assert_eq!(snapshot.exposures_total(), 3);
    }

    #[test]
    fn test_metrics_concurrent_updates() {
        let metrics = Arc::new(CameraMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.frames_streamed.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().frames_streamed, 4000);
    }
}

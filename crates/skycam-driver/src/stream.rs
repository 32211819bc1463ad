//! 视频流线程
//!
//! 视频模式下反复从端口拉取一帧并发布到 [`FrameSlot`]。
//! 取帧超时不算错误；其他错误只计数并节流输出日志，从不终止循环。

use crate::frame::{Frame, FrameSlot, FrameSource};
use crate::metrics::CameraMetrics;
use crate::poll::{PollPolicy, join_within};
use parking_lot::Mutex;
use skycam_port::{CameraPort, PortError, RoiFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 视频流参数（启动时确定，运行期间不变）
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamParams {
    pub format: RoiFormat,
    pub pull_timeout: Duration,
    pub loop_delay: Duration,
    pub report_every: u64,
}

/// 连续错误节流：第 1 次以及每第 N 次报告
#[derive(Debug)]
pub(crate) struct ErrorThrottle {
    consecutive: u64,
    every: u64,
}

impl ErrorThrottle {
    pub fn new(every: u64) -> Self {
        Self {
            consecutive: 0,
            every: every.max(1),
        }
    }

    /// 记录一次失败，返回是否需要报告
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive == 1 || self.consecutive % self.every == 0
    }

    /// 记录一次成功，返回之前的连续失败数
    pub fn record_success(&mut self) -> u64 {
        std::mem::take(&mut self.consecutive)
    }

    pub fn consecutive(&self) -> u64 {
        self.consecutive
    }
}

/// 视频流主循环
///
/// 每次迭代检查一次 `is_running`，因此在标志清除后最多一个取帧超时内退出。
pub(crate) fn stream_loop<P: CameraPort>(
    port: Arc<Mutex<P>>,
    frames: Arc<FrameSlot>,
    metrics: Arc<CameraMetrics>,
    params: StreamParams,
    is_running: Arc<AtomicBool>,
) {
    let mut buffer = vec![0u8; params.format.buffer_len()];
    let mut throttle = ErrorThrottle::new(params.report_every);
    debug!(
        "Stream loop started: {}x{}, pull timeout {:?}",
        params.format.width, params.format.height, params.pull_timeout
    );

    loop {
        // Acquire: 看到 false 时也能看到停止方之前的所有写入
        if !is_running.load(Ordering::Acquire) {
            trace!("Stream loop: is_running flag is false, exiting");
            break;
        }

        let pulled = port.lock().pull_video_frame(&mut buffer, params.pull_timeout);
        let result =
            pulled.and_then(|()| Frame::decode(params.format, &buffer, FrameSource::Stream));
        record_pull(result, &frames, &metrics, &mut throttle);

        if !params.loop_delay.is_zero() {
            spin_sleep::sleep(params.loop_delay);
        }
    }

    debug!("Stream loop exited");
}

/// 处理一次取帧结果
///
/// 解码失败与取帧错误一样计入 `pull_errors` 并经过节流。
fn record_pull(
    result: Result<Frame, PortError>,
    frames: &FrameSlot,
    metrics: &CameraMetrics,
    throttle: &mut ErrorThrottle,
) {
    match result {
        Ok(frame) => {
            frames.publish(frame);
            metrics.frames_streamed.fetch_add(1, Ordering::Relaxed);
            let recovered = throttle.record_success();
            if recovered > 0 {
                metrics.consecutive_pull_errors.store(0, Ordering::Relaxed);
                info!("Stream recovered after {} consecutive pull errors", recovered);
            }
        },
        Err(PortError::Timeout) => {
            metrics.pull_timeouts.fetch_add(1, Ordering::Relaxed);
            trace!("Stream pull timeout");
        },
        Err(e) => {
            metrics.pull_errors.fetch_add(1, Ordering::Relaxed);
            let report = throttle.record_failure();
            metrics
                .consecutive_pull_errors
                .store(throttle.consecutive(), Ordering::Relaxed);
            if report {
                metrics.pull_errors_reported.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Error getting video data: {} (consecutive: {})",
                    e,
                    throttle.consecutive()
                );
            }
        },
    }
}

/// 运行中的视频流线程
#[derive(Debug)]
pub(crate) struct StreamWorker {
    is_running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    pub fn spawn<P: CameraPort + Send + 'static>(
        port: Arc<Mutex<P>>,
        frames: Arc<FrameSlot>,
        metrics: Arc<CameraMetrics>,
        params: StreamParams,
    ) -> std::io::Result<Self> {
        let is_running = Arc::new(AtomicBool::new(true));
        let flag = is_running.clone();
        let handle = Builder::new()
            .name("skycam-stream".to_string())
            .spawn(move || stream_loop(port, frames, metrics, params, flag))?;
        Ok(Self { is_running, handle })
    }

    /// 通知线程退出并有界等待
    ///
    /// 返回 false 表示线程在上限内没有退出（会在当前取帧返回后自行结束）。
    pub fn stop(self, wait: PollPolicy) -> bool {
        // Release: 确保之前的写入对流线程可见
        self.is_running.store(false, Ordering::Release);
        join_within(self.handle, wait, "Stream")
    }
}

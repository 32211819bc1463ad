//! 序列任务编排
//!
//! 后台线程按节拍反复调用曝光控制器，每帧前后暂停/恢复视频流，
//! 并把结果写入外部持久化接口（[`FrameSink`]）。
//!
//! - 单帧失败只记录日志并继续下一帧（尽力而为）
//! - 取消在每次迭代开始和帧间等待时检查；进行中的曝光不会被打断
//! - 帧间等待：`interval == 0` 为快速模式（`max(曝光 + buffer, floor)`），
//!   否则固定间隔

use crate::camera::Camera;
use crate::error::{CaptureError, SinkError};
use crate::frame::Frame;
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use skycam_port::{CameraPort, ImageType};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// 输出容器格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
    Tiff,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "tif" | "tiff" => Ok(Self::Tiff),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// 持久化接口
///
/// 由外部实现（例如写入目录）。在序列线程中调用，调用时不持有任何设备锁。
pub trait FrameSink: Send + Sync {
    fn write(&self, frame: &Frame, file_name: &str, format: OutputFormat) -> Result<(), SinkError>;
}

/// 序列任务
#[derive(Clone)]
pub struct SequenceJob {
    /// 请求的帧数
    pub total: u32,
    pub output_format: OutputFormat,
    /// 本任务使用的像素格式（`None` 使用当前设置）
    pub pixel_format: Option<ImageType>,
    /// 帧间隔；0 表示快速模式
    pub interval: Duration,
    pub sink: Arc<dyn FrameSink>,
}

impl SequenceJob {
    pub fn new(total: u32, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            total,
            output_format: OutputFormat::default(),
            pixel_format: None,
            interval: Duration::ZERO,
            sink,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_pixel_format(mut self, format: ImageType) -> Self {
        self.pixel_format = Some(format);
        self
    }

    pub fn is_fast(&self) -> bool {
        self.interval.is_zero()
    }
}

impl fmt::Debug for SequenceJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceJob")
            .field("total", &self.total)
            .field("output_format", &self.output_format)
            .field("pixel_format", &self.pixel_format)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// 序列任务状态快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SequenceStatus {
    pub active: bool,
    pub completed: u32,
    pub total: u32,
    /// 拍摄失败的帧数
    pub failed: u32,
    /// 拍摄成功但写入失败的帧数
    pub save_errors: u32,
    pub last_error: Option<String>,
}

/// 单个任务的进度（原子计数，读取无锁）
#[derive(Debug, Default)]
pub(crate) struct SequenceProgress {
    job_id: u64,
    total: u32,
    active: AtomicBool,
    completed: AtomicU32,
    failed: AtomicU32,
    save_errors: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl SequenceProgress {
    pub fn new(job_id: u64, total: u32) -> Self {
        Self {
            job_id,
            total,
            active: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    pub fn status(&self) -> SequenceStatus {
        SequenceStatus {
            active: self.active.load(Ordering::Acquire),
            completed: self.completed.load(Ordering::Acquire),
            total: self.total,
            failed: self.failed.load(Ordering::Acquire),
            save_errors: self.save_errors.load(Ordering::Acquire),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// 一次成功的序列拍摄
#[derive(Debug)]
pub(crate) struct Shot {
    pub frame: Arc<Frame>,
    pub gain: i64,
    pub exposure_us: u64,
}

/// 运行中的序列线程
#[derive(Debug)]
pub(crate) struct SequenceWorker {
    pub job_id: u64,
    pub cancel: Sender<()>,
    pub handle: JoinHandle<()>,
}

/// 文件名：时间戳、序号/总数、增益、曝光时间
///
/// 例如 `20260314_213005_0003of0010_g120_e2000000us.jpg`
pub fn frame_file_name(
    captured_at: &DateTime<Local>,
    index: u32,
    total: u32,
    gain: i64,
    exposure_us: u64,
    format: OutputFormat,
) -> String {
    format!(
        "{}_{:04}of{:04}_g{}_e{}us.{}",
        captured_at.format("%Y%m%d_%H%M%S"),
        index,
        total,
        gain,
        exposure_us,
        format.extension()
    )
}

fn is_cancelled(cancel: &Receiver<()>) -> bool {
    !matches!(cancel.try_recv(), Err(TryRecvError::Empty))
}

/// 可被取消打断的帧间等待，返回是否被取消
fn wait_cancelled(cancel: &Receiver<()>, pause: Duration) -> bool {
    !matches!(cancel.recv_timeout(pause), Err(RecvTimeoutError::Timeout))
}

/// 序列线程主循环
pub(crate) fn run_sequence<P: CameraPort + Send + 'static>(
    camera: Camera<P>,
    job: SequenceJob,
    progress: Arc<SequenceProgress>,
    cancel: Receiver<()>,
) {
    let job_id = progress.job_id();
    info!(
        "Sequence #{} started: {} frames, {}",
        job_id,
        job.total,
        if job.is_fast() {
            "fast pacing".to_string()
        } else {
            format!("interval {:?}", job.interval)
        }
    );

    let mut outcome = "completed";
    for slot in 1..=job.total {
        if is_cancelled(&cancel) {
            outcome = "cancelled";
            break;
        }

        match camera.sequence_shot(job_id, job.pixel_format) {
            Ok(shot) => {
                progress.completed.fetch_add(1, Ordering::AcqRel);
                let name = frame_file_name(
                    &shot.frame.captured_at,
                    slot,
                    job.total,
                    shot.gain,
                    shot.exposure_us,
                    job.output_format,
                );
                match job.sink.write(&shot.frame, &name, job.output_format) {
                    Ok(()) => info!("Sequence #{}: saved {} ({}/{})", job_id, name, slot, job.total),
                    Err(e) => {
                        error!("Sequence #{}: failed to save {}: {}", job_id, name, e);
                        progress.save_errors.fetch_add(1, Ordering::AcqRel);
                        progress.record_error(format!("save {name}: {e}"));
                    },
                }
            },
            Err(CaptureError::Cancelled) => {
                outcome = "cancelled";
                break;
            },
            Err(CaptureError::NotConnected) => {
                error!("Sequence #{}: camera disconnected, aborting", job_id);
                progress.record_error(CaptureError::NotConnected.to_string());
                outcome = "aborted";
                break;
            },
            Err(e) => {
                warn!("Sequence #{}: frame {}/{} failed: {}", job_id, slot, job.total, e);
                progress.failed.fetch_add(1, Ordering::AcqRel);
                progress.record_error(e.to_string());
            },
        }

        if slot < job.total {
            let pause = if job.is_fast() {
                camera.config().fast_pacing(camera.settings().photo_exposure())
            } else {
                job.interval
            };
            if wait_cancelled(&cancel, pause) {
                outcome = "cancelled";
                break;
            }
        }
    }

    camera.finish_sequence(job_id);
    progress.set_inactive();
    let status = progress.status();
    info!(
        "Sequence #{} {}: {}/{} frames ({} failed)",
        job_id, outcome, status.completed, status.total, status.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_frame_file_name() {
        let at = Local.with_ymd_and_hms(2026, 3, 14, 21, 30, 5).unwrap();
        assert_eq!(
            frame_file_name(&at, 3, 10, 120, 2_000_000, OutputFormat::Jpeg),
            "20260314_213005_0003of0010_g120_e2000000us.jpg"
        );
        assert_eq!(
            frame_file_name(&at, 12, 12, 0, 500, OutputFormat::Tiff),
            "20260314_213005_0012of0012_g0_e500us.tiff"
        );
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JPG".parse::<OutputFormat>(), Ok(OutputFormat::Jpeg));
        assert_eq!("tif".parse::<OutputFormat>(), Ok(OutputFormat::Tiff));
        assert!("bmp".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::Png.to_string(), "png");
    }

    #[test]
    fn test_progress_status() {
        let progress = SequenceProgress::new(7, 5);
        progress.completed.fetch_add(2, Ordering::AcqRel);
        progress.failed.fetch_add(1, Ordering::AcqRel);
        progress.record_error("exposure timed out".to_string());

        let status = progress.status();
        assert!(status.active);
        assert_eq!((status.completed, status.total, status.failed), (2, 5, 1));
        assert_eq!(status.last_error.as_deref(), Some("exposure timed out"));

        progress.set_inactive();
        assert!(!progress.status().active);
    }

    #[test]
    fn test_cancellation_helpers() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        assert!(!is_cancelled(&rx));
        assert!(!wait_cancelled(&rx, Duration::from_millis(1)));

        tx.send(()).unwrap();
        assert!(wait_cancelled(&rx, Duration::from_secs(5)));

        drop(tx);
        assert!(is_cancelled(&rx));
    }
}

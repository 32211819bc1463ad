//! 曝光控制器
//!
//! 驱动一次完整的定时曝光：
//! 1. 前置检查：设备非空闲时有界等待，仍不空闲则强制 stop 并稳定
//! 2. 写入曝光时间、增益，必要时切换画面格式
//! 3. 启动曝光；若设备报告视频模式仍活动，先 stop video 再重试一次
//! 4. 轮询状态直到成功、失败或超过 `exposure + margin`
//! 5. 取数据、解码并发布到 [`FrameSlot`]
//!
//! 调用者（模式仲裁器）保证调用期间视频流线程已经停止。

use crate::config::ControllerConfig;
use crate::error::CaptureError;
use crate::frame::{Frame, FrameSlot, FrameSource};
use crate::metrics::CameraMetrics;
use crate::poll::{PollError, PollPolicy};
use crate::settings::exposure_control_value;
use skycam_port::{CameraPort, ControlKind, ExposureStatus, PortError, RoiFormat};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 一次曝光请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExposureRequest {
    pub exposure_us: u64,
    pub gain: i64,
    pub format: RoiFormat,
    pub dark_frame: bool,
}

impl ExposureRequest {
    pub fn exposure(&self) -> Duration {
        Duration::from_micros(self.exposure_us)
    }
}

pub(crate) struct ExposureController<'a, P: CameraPort + ?Sized> {
    port: &'a mut P,
    config: &'a ControllerConfig,
    metrics: &'a CameraMetrics,
}

impl<'a, P: CameraPort + ?Sized> ExposureController<'a, P> {
    pub fn new(port: &'a mut P, config: &'a ControllerConfig, metrics: &'a CameraMetrics) -> Self {
        Self {
            port,
            config,
            metrics,
        }
    }

    /// 执行一次曝光并发布结果
    ///
    /// `applied` 记录设备当前的画面格式（`None` 表示未知），格式切换后会被更新。
    pub fn run(
        mut self,
        request: &ExposureRequest,
        applied: &mut Option<RoiFormat>,
        frames: &FrameSlot,
    ) -> Result<Arc<Frame>, CaptureError> {
        let result = self.capture(request, applied);
        match &result {
            Ok(_) => {
                self.metrics.exposures_succeeded.fetch_add(1, Ordering::Relaxed);
            },
            Err(CaptureError::ExposureTimeout { .. }) => {
                self.metrics.exposures_timed_out.fetch_add(1, Ordering::Relaxed);
            },
            Err(_) => {
                self.metrics.exposures_failed.fetch_add(1, Ordering::Relaxed);
            },
        }
        result.map(|frame| frames.publish(frame))
    }

    fn capture(
        &mut self,
        request: &ExposureRequest,
        applied: &mut Option<RoiFormat>,
    ) -> Result<Frame, CaptureError> {
        self.ensure_idle()?;
        self.apply(request, applied)?;
        self.start(request.dark_frame)?;
        self.wait(request.exposure())?;
        self.fetch(request.format)
    }

    /// 前置检查：设备必须处于空闲
    pub fn ensure_idle(&mut self) -> Result<(), CaptureError> {
        let mut status = self.port.exposure_status()?;
        if status == ExposureStatus::Idle {
            return Ok(());
        }

        if status == ExposureStatus::Working {
            warn!(
                "Camera not idle at exposure entry, waiting up to {:?}",
                self.config.idle_wait()
            );
            let policy = PollPolicy::new(self.config.idle_poll_interval(), self.config.idle_wait());
            let port = &mut *self.port;
            status = match policy.poll(|| {
                let s = port.exposure_status()?;
                Ok::<_, PortError>((s != ExposureStatus::Working).then_some(s))
            }) {
                Ok(s) => s,
                Err(PollError::Probe(e)) => return Err(e.into()),
                Err(PollError::TimedOut { .. }) => ExposureStatus::Working,
            };
            if status == ExposureStatus::Idle {
                return Ok(());
            }
        }

        if status == ExposureStatus::Working {
            warn!("Camera still not idle after {:?}, forcing stop", self.config.idle_wait());
            self.metrics.forced_recoveries.fetch_add(1, Ordering::Relaxed);
            self.port.stop_exposure()?;
            spin_sleep::sleep(self.config.forced_stop_settle());
        } else {
            // 上一次曝光的结果没有被取走
            debug!("Clearing stale exposure status {:?}", status);
            self.port.stop_exposure()?;
        }

        match self.port.exposure_status()? {
            ExposureStatus::Working => Err(CaptureError::PreconditionNotIdle(ExposureStatus::Working)),
            _ => Ok(()),
        }
    }

    fn apply(
        &mut self,
        request: &ExposureRequest,
        applied: &mut Option<RoiFormat>,
    ) -> Result<(), CaptureError> {
        let exposure = exposure_control_value(request.exposure_us)?;
        self.port.set_control(ControlKind::Exposure, exposure, false)?;
        self.port.set_control(ControlKind::Gain, request.gain, false)?;

        if *applied != Some(request.format) {
            *applied = None;
            self.port
                .set_frame_format(request.format)
                .map_err(|e| match e {
                    PortError::UnsupportedImageType(t) => CaptureError::UnsupportedFormat(t),
                    e => CaptureError::transition("set frame format", e),
                })?;
            *applied = Some(request.format);
        }
        Ok(())
    }

    fn start(&mut self, dark_frame: bool) -> Result<(), CaptureError> {
        match self.port.start_exposure(dark_frame) {
            Ok(()) => Ok(()),
            Err(PortError::VideoModeActive) => {
                warn!("Video mode still active, stopping video capture and retrying exposure");
                if let Err(e) = self.port.stop_video_capture() {
                    warn!("Stop video capture failed: {}", e);
                }
                self.port
                    .start_exposure(dark_frame)
                    .map_err(CaptureError::StartRejected)
            },
            Err(e) => Err(CaptureError::StartRejected(e)),
        }
    }

    fn wait(&mut self, exposure: Duration) -> Result<(), CaptureError> {
        let limit = self.config.exposure_deadline(exposure);
        let policy = PollPolicy::new(self.config.exposure_poll_interval(), limit);
        let port = &mut *self.port;
        let result = policy.poll(|| match port.exposure_status()? {
            ExposureStatus::Success => Ok(Some(())),
            ExposureStatus::Failed => Err(CaptureError::ExposureFailed),
            ExposureStatus::Idle | ExposureStatus::Working => Ok(None),
        });

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Probe(e)) => {
                warn!("Exposure failed: {}", e);
                Err(e)
            },
            Err(PollError::TimedOut { elapsed }) => {
                warn!("Exposure did not complete within {:?}, stopping", limit);
                // 保证后续的视频流/曝光请求不会撞上残留的曝光
                if let Err(e) = self.port.stop_exposure() {
                    warn!("Stop exposure after timeout failed: {}", e);
                }
                Err(CaptureError::ExposureTimeout { elapsed, limit })
            },
        }
    }

    fn fetch(&mut self, format: RoiFormat) -> Result<Frame, CaptureError> {
        let mut buffer = vec![0u8; format.buffer_len()];
        self.port
            .fetch_exposure_result(&mut buffer)
            .map_err(CaptureError::FetchFailed)?;
        let frame = Frame::decode(format, &buffer, FrameSource::Exposure)
            .map_err(CaptureError::FetchFailed)?;
        info!(
            "Exposure complete: {}x{} {:?}",
            format.width, format.height, format.image_type
        );
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycam_port::sim::{EXPOSURE_FILL, PortCall};
    use skycam_port::{ImageType, SimCamera, SimHandle};

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            idle_poll_interval_ms: 1,
            idle_wait_ms: 20,
            forced_stop_settle_ms: 1,
            exposure_poll_interval_ms: 1,
            exposure_margin_ms: 30,
            ..Default::default()
        }
    }

    fn opened() -> (SimCamera, SimHandle) {
        let mut camera = SimCamera::new();
        let sim = camera.handle();
        camera.open().unwrap();
        (camera, sim)
    }

    fn request(image_type: ImageType) -> ExposureRequest {
        ExposureRequest {
            exposure_us: 2_000,
            gain: 80,
            format: RoiFormat::new(64, 48, 1, image_type),
            dark_frame: false,
        }
    }

    #[test]
    fn test_exposure_success_publishes_frame() {
        let (mut camera, sim) = opened();
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let frames = FrameSlot::new();
        let mut applied = None;

        let frame = ExposureController::new(&mut camera, &config, &metrics)
            .run(&request(ImageType::Rgb24), &mut applied, &frames)
            .unwrap();

        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.source, FrameSource::Exposure);
        assert!(frame.data.iter().all(|&b| b == EXPOSURE_FILL));
        assert_eq!(applied, Some(request(ImageType::Rgb24).format));
        assert_eq!(sim.control(ControlKind::Gain).map(|c| c.value), Some(80));
        assert_eq!(metrics.snapshot().exposures_succeeded, 1);
        assert!(sim.violations().is_empty());
    }

    #[test]
    fn test_format_only_applied_when_different() {
        let (mut camera, sim) = opened();
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let frames = FrameSlot::new();
        let req = request(ImageType::Raw16);
        let mut applied = None;

        let frame = ExposureController::new(&mut camera, &config, &metrics)
            .run(&req, &mut applied, &frames)
            .unwrap();
        assert_eq!(sim.count(|c| matches!(c, PortCall::SetFormat(_))), 1);
        // Raw16 截断为高字节
        assert!(frame.data.iter().all(|&b| b == EXPOSURE_FILL));
        assert_eq!(frame.data.len(), 64 * 48);

        ExposureController::new(&mut camera, &config, &metrics)
            .run(&req, &mut applied, &frames)
            .unwrap();
        assert_eq!(sim.count(|c| matches!(c, PortCall::SetFormat(_))), 1);
        assert_eq!(frames.sequence(), 2);
    }

    #[test]
    fn test_video_mode_race_retries_once() {
        let (mut camera, sim) = opened();
        sim.inject_lingering_video();
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let mut applied = None;

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut applied,
            &FrameSlot::new(),
        );
        assert!(result.is_ok());
        assert_eq!(sim.count(|c| *c == PortCall::StopVideo), 1);
        assert_eq!(
            sim.count(|c| matches!(c, PortCall::StartExposure { .. })),
            2
        );
    }

    #[test]
    fn test_device_reported_failure() {
        let (mut camera, sim) = opened();
        sim.inject_failed_exposures(1);
        let config = fast_config();
        let metrics = CameraMetrics::new();

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut None,
            &FrameSlot::new(),
        );
        assert_eq!(result.unwrap_err(), CaptureError::ExposureFailed);
        assert_eq!(metrics.snapshot().exposures_failed, 1);
    }

    #[test]
    fn test_stuck_exposure_times_out_and_is_stopped() {
        let (mut camera, sim) = opened();
        sim.inject_stuck_exposures(1);
        let config = fast_config();
        let metrics = CameraMetrics::new();

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut None,
            &FrameSlot::new(),
        );
        assert!(matches!(result, Err(CaptureError::ExposureTimeout { .. })));
        assert_eq!(sim.exposure_status(), ExposureStatus::Idle);
        assert_eq!(metrics.snapshot().exposures_timed_out, 1);
    }

    #[test]
    fn test_stuck_status_at_entry_is_recovered() {
        let (mut camera, sim) = opened();
        sim.inject_stuck_status();
        let config = fast_config();
        let metrics = CameraMetrics::new();

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut None,
            &FrameSlot::new(),
        );
        assert!(result.is_ok());
        assert_eq!(metrics.snapshot().forced_recoveries, 1);
        assert_eq!(sim.count(|c| *c == PortCall::StopExposure), 1);
    }

    #[test]
    fn test_status_still_working_after_forced_stop() {
        let (mut camera, sim) = opened();
        sim.inject_stuck_status();
        sim.inject_ignored_stops(1);
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let frames = FrameSlot::new();

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut None,
            &frames,
        );
        assert_eq!(
            result.unwrap_err(),
            CaptureError::PreconditionNotIdle(ExposureStatus::Working)
        );
        assert_eq!(sim.count(|c| matches!(c, PortCall::StartExposure { .. })), 0);
        assert_eq!(metrics.snapshot().exposures_failed, 1);

        // 下一次强制 stop 生效
        ExposureController::new(&mut camera, &config, &metrics)
            .run(&request(ImageType::Rgb24), &mut None, &frames)
            .unwrap();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.forced_recoveries, 2);
        assert_eq!(snapshot.exposures_succeeded, 1);
    }

    #[test]
    fn test_start_rejected_by_device() {
        let (mut camera, sim) = opened();
        sim.inject_start_rejections(1);
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let frames = FrameSlot::new();
        let mut applied = None;

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut applied,
            &frames,
        );
        assert!(
            matches!(result, Err(CaptureError::StartRejected(PortError::Device { .. }))),
            "{:?}",
            result
        );
        assert_eq!(sim.count(|c| *c == PortCall::StopVideo), 0);
        assert_eq!(frames.sequence(), 0);

        ExposureController::new(&mut camera, &config, &metrics)
            .run(&request(ImageType::Rgb24), &mut applied, &frames)
            .unwrap();
        assert_eq!(frames.sequence(), 1);
    }

    #[test]
    fn test_start_rejected_after_video_retry() {
        let (mut camera, sim) = opened();
        sim.inject_lingering_video();
        sim.inject_start_rejections(1);
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let frames = FrameSlot::new();

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut None,
            &frames,
        );
        assert!(matches!(result, Err(CaptureError::StartRejected(_))));
        assert_eq!(sim.count(|c| *c == PortCall::StopVideo), 1);
        assert_eq!(
            sim.count(|c| matches!(c, PortCall::StartExposure { .. })),
            2
        );
        assert_eq!(metrics.snapshot().exposures_failed, 1);

        ExposureController::new(&mut camera, &config, &metrics)
            .run(&request(ImageType::Rgb24), &mut None, &frames)
            .unwrap();
        assert!(sim.violations().is_empty());
    }

    #[test]
    fn test_fetch_failure_is_classified() {
        let (mut camera, sim) = opened();
        sim.inject_fetch_failures(1);
        let config = fast_config();
        let metrics = CameraMetrics::new();

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &request(ImageType::Rgb24),
            &mut None,
            &FrameSlot::new(),
        );
        assert!(matches!(result, Err(CaptureError::FetchFailed(_))));
    }

    #[test]
    fn test_invalid_geometry_fails_transition() {
        let mut camera = SimCamera::with_sensor("mono", 64, 48);
        camera.open().unwrap();
        let config = fast_config();
        let metrics = CameraMetrics::new();
        let mut req = request(ImageType::Rgb24);
        req.format = RoiFormat::new(128, 48, 1, ImageType::Rgb24);

        let result = ExposureController::new(&mut camera, &config, &metrics).run(
            &req,
            &mut None,
            &FrameSlot::new(),
        );
        assert!(matches!(result, Err(CaptureError::TransitionFailed(_))));
    }
}

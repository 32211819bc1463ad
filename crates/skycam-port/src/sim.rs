//! 软件模拟相机（Mock 模式）
//!
//! 在没有硬件的情况下实现 [`CameraPort`]，用于测试和 `--simulate` 运行。
//!
//! - 曝光按 `Exposure` 控制值（微秒）计时，到时后状态变为 `Success`
//! - 视频帧按 `frame_interval` 节拍产生
//! - 通过 [`SimHandle`] 注入故障（取帧错误、曝光卡死、视频模式残留等）
//! - 记录每一次端口调用，并检测违反互斥约束的调用（例如曝光期间拉取视频帧）
//!
//! # 示例
//!
//! ```rust
//! use skycam_port::{CameraPort, SimCamera};
//!
//! let mut camera = SimCamera::new();
//! let handle = camera.handle();
//!
//! let info = camera.open().unwrap();
//! assert!(info.max_width > 0);
//! assert!(handle.violations().is_empty());
//! ```

use crate::{
    CameraInfo, CameraPort, ControlKind, ControlValue, ExposureStatus, ImageType, PortError,
    RoiFormat,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Duration, Instant};

static NEXT_SIM_ID: AtomicI32 = AtomicI32::new(0x51_0000);

/// 曝光结果中每个 8 位采样的填充值（Raw16 的高字节）
pub const EXPOSURE_FILL: u8 = 0xE0;
/// Raw16 曝光结果的低字节（截断后应被丢弃）
pub const EXPOSURE_FILL_LOW: u8 = 0x34;

/// 端口调用记录
///
/// 高频调用（拉取视频帧、查询曝光状态）只计数，不记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortCall {
    Open,
    Close,
    SetControl {
        kind: ControlKind,
        value: i64,
        auto: bool,
    },
    SetFormat(RoiFormat),
    StartVideo,
    StopVideo,
    StartExposure {
        dark: bool,
    },
    StopExposure,
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeed,
    Fail,
    Stuck,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Working {
        started: Instant,
        duration: Duration,
        outcome: Outcome,
    },
    Success,
    Failed,
}

#[derive(Debug, Default)]
struct Faults {
    pull_timeouts: u32,
    pull_errors: u32,
    stuck_exposures: u32,
    failed_exposures: u32,
    fetch_failures: u32,
    start_video_failures: u32,
    format_failures: u32,
    /// 注入的格式失败生效前先放行的次数
    format_skip: u32,
    /// 视频模式残留：在调用 stop_video_capture 之前 start_exposure 一直被拒绝
    lingering_video: bool,
    /// 被设备拒绝的 start_exposure 次数
    start_rejections: u32,
    /// 不生效的 stop_exposure 次数
    ignored_stops: u32,
}

#[derive(Debug)]
struct SimState {
    info: CameraInfo,
    open: bool,
    controls: BTreeMap<ControlKind, ControlValue>,
    format: RoiFormat,
    video_active: bool,
    phase: Phase,
    frame_interval: Duration,
    video_frames: u64,
    pulls: u64,
    status_queries: u64,
    faults: Faults,
    calls: Vec<PortCall>,
    violations: Vec<String>,
    in_call: bool,
}

impl SimState {
    fn refresh_phase(&mut self) {
        if let Phase::Working {
            started,
            duration,
            outcome,
        } = self.phase
            && outcome != Outcome::Stuck
            && started.elapsed() >= duration
        {
            self.phase = match outcome {
                Outcome::Fail => Phase::Failed,
                _ => Phase::Success,
            };
        }
    }

    fn status(&self) -> ExposureStatus {
        match self.phase {
            Phase::Idle => ExposureStatus::Idle,
            Phase::Working { .. } => ExposureStatus::Working,
            Phase::Success => ExposureStatus::Success,
            Phase::Failed => ExposureStatus::Failed,
        }
    }

    fn require_open(&self) -> Result<(), PortError> {
        if self.open {
            Ok(())
        } else {
            Err(PortError::NotOpen)
        }
    }

    fn check_buffer(&self, buffer: &[u8]) -> Result<(), PortError> {
        let expected = self.format.buffer_len();
        if buffer.len() != expected {
            return Err(PortError::InvalidSize {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(())
    }
}

/// 调用期间的占用标记，Drop 时释放
struct CallGuard<'a> {
    shared: &'a Mutex<SimState>,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().in_call = false;
    }
}

/// 软件模拟相机
pub struct SimCamera {
    id: i32,
    shared: Arc<Mutex<SimState>>,
}

impl SimCamera {
    /// 默认 64x48 彩色传感器（适合测试）
    pub fn new() -> Self {
        Self::with_sensor("Simulated ASI120MC", 64, 48)
    }

    pub fn with_sensor(name: impl Into<String>, max_width: u32, max_height: u32) -> Self {
        let id = NEXT_SIM_ID.fetch_add(1, Ordering::Relaxed);
        let info = CameraInfo {
            name: name.into(),
            id,
            max_width,
            max_height,
            is_color: true,
            bit_depth: 12,
            supported_bins: vec![1, 2],
            supported_formats: vec![
                ImageType::Raw8,
                ImageType::Rgb24,
                ImageType::Raw16,
                ImageType::Y8,
            ],
            pixel_size_um: 3.75,
        };
        let state = SimState {
            format: RoiFormat::new(max_width, max_height, 1, ImageType::Raw8),
            info,
            open: false,
            controls: BTreeMap::new(),
            video_active: false,
            phase: Phase::Idle,
            frame_interval: Duration::from_millis(5),
            video_frames: 0,
            pulls: 0,
            status_queries: 0,
            faults: Faults::default(),
            calls: Vec::new(),
            violations: Vec::new(),
            in_call: false,
        };
        Self {
            id,
            shared: Arc::new(Mutex::new(state)),
        }
    }

    /// 获取故障注入 / 观测句柄
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: self.shared.clone(),
        }
    }

    fn enter(&self, name: &str) -> CallGuard<'_> {
        let mut state = self.shared.lock();
        if state.in_call {
            state.violations.push(format!("overlapping port call: {name}"));
        }
        state.in_call = true;
        CallGuard {
            shared: &self.shared,
        }
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

enum PullPlan {
    Timeout,
    Error,
    Frame(u8),
}

impl CameraPort for SimCamera {
    fn device_id(&self) -> i32 {
        self.id
    }

    fn open(&mut self) -> Result<CameraInfo, PortError> {
        let _call = self.enter("open");
        let mut s = self.shared.lock();
        s.calls.push(PortCall::Open);
        s.open = true;
        Ok(s.info.clone())
    }

    fn close(&mut self) -> Result<(), PortError> {
        let _call = self.enter("close");
        let mut s = self.shared.lock();
        s.calls.push(PortCall::Close);
        s.open = false;
        s.video_active = false;
        s.phase = Phase::Idle;
        Ok(())
    }

    fn set_control(&mut self, kind: ControlKind, value: i64, auto: bool) -> Result<(), PortError> {
        let _call = self.enter("set_control");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::SetControl { kind, value, auto });
        if kind == ControlKind::Temperature {
            return Err(PortError::InvalidControl(kind));
        }
        s.controls.insert(kind, ControlValue { value, auto });
        Ok(())
    }

    fn get_control(&mut self, kind: ControlKind) -> Result<ControlValue, PortError> {
        let _call = self.enter("get_control");
        let s = self.shared.lock();
        s.require_open()?;
        if kind == ControlKind::Temperature {
            return Ok(ControlValue {
                value: 250,
                auto: false,
            });
        }
        Ok(s.controls.get(&kind).copied().unwrap_or(ControlValue {
            value: 0,
            auto: false,
        }))
    }

    fn set_frame_format(&mut self, format: RoiFormat) -> Result<(), PortError> {
        let _call = self.enter("set_frame_format");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::SetFormat(format));
        if s.faults.format_failures > 0 {
            if s.faults.format_skip > 0 {
                s.faults.format_skip -= 1;
            } else {
                s.faults.format_failures -= 1;
                return Err(PortError::device(16, "injected format failure"));
            }
        }
        if !s.info.supports(format.image_type) {
            return Err(PortError::UnsupportedImageType(format.image_type));
        }
        if format.width == 0
            || format.height == 0
            || format.width > s.info.max_width
            || format.height > s.info.max_height
        {
            return Err(PortError::device(8, "invalid size"));
        }
        s.format = format;
        Ok(())
    }

    fn start_video_capture(&mut self) -> Result<(), PortError> {
        let _call = self.enter("start_video_capture");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::StartVideo);
        s.refresh_phase();
        if matches!(s.phase, Phase::Working { .. }) {
            s.violations
                .push("start_video_capture while an exposure is running".to_string());
            return Err(PortError::ExposureInProgress);
        }
        if s.faults.start_video_failures > 0 {
            s.faults.start_video_failures -= 1;
            return Err(PortError::device(16, "injected start video failure"));
        }
        s.video_active = true;
        Ok(())
    }

    fn stop_video_capture(&mut self) -> Result<(), PortError> {
        let _call = self.enter("stop_video_capture");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::StopVideo);
        s.video_active = false;
        s.faults.lingering_video = false;
        Ok(())
    }

    fn pull_video_frame(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<(), PortError> {
        let _call = self.enter("pull_video_frame");
        let (plan, interval) = {
            let mut s = self.shared.lock();
            s.require_open()?;
            s.pulls += 1;
            s.refresh_phase();
            if matches!(s.phase, Phase::Working { .. }) {
                s.violations
                    .push("pull_video_frame while an exposure is running".to_string());
            }
            if !s.video_active {
                return Err(PortError::device(12, "video capture not started"));
            }
            s.check_buffer(buffer)?;

            let plan = if s.faults.pull_timeouts > 0 {
                s.faults.pull_timeouts -= 1;
                PullPlan::Timeout
            } else if s.faults.pull_errors > 0 {
                s.faults.pull_errors -= 1;
                PullPlan::Error
            } else {
                s.video_frames += 1;
                PullPlan::Frame((s.video_frames % 200) as u8 + 1)
            };
            (plan, s.frame_interval)
        };

        match plan {
            PullPlan::Timeout => {
                std::thread::sleep(timeout);
                Err(PortError::Timeout)
            },
            PullPlan::Error => {
                std::thread::sleep(Duration::from_millis(1));
                Err(PortError::device(16, "injected pull error"))
            },
            PullPlan::Frame(fill) => {
                std::thread::sleep(interval.min(timeout));
                buffer.fill(fill);
                Ok(())
            },
        }
    }

    fn start_exposure(&mut self, dark_frame: bool) -> Result<(), PortError> {
        let _call = self.enter("start_exposure");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::StartExposure { dark: dark_frame });
        if s.video_active {
            s.violations
                .push("start_exposure while video capture is active".to_string());
            return Err(PortError::VideoModeActive);
        }
        if s.faults.lingering_video {
            return Err(PortError::VideoModeActive);
        }
        if s.faults.start_rejections > 0 {
            s.faults.start_rejections -= 1;
            return Err(PortError::device(16, "injected start exposure rejection"));
        }
        s.refresh_phase();
        if matches!(s.phase, Phase::Working { .. }) {
            return Err(PortError::ExposureInProgress);
        }

        let outcome = if s.faults.stuck_exposures > 0 {
            s.faults.stuck_exposures -= 1;
            Outcome::Stuck
        } else if s.faults.failed_exposures > 0 {
            s.faults.failed_exposures -= 1;
            Outcome::Fail
        } else {
            Outcome::Succeed
        };
        let exposure_us = s
            .controls
            .get(&ControlKind::Exposure)
            .map(|c| c.value.max(0) as u64)
            .unwrap_or(0);
        s.phase = Phase::Working {
            started: Instant::now(),
            duration: Duration::from_micros(exposure_us),
            outcome,
        };
        Ok(())
    }

    fn exposure_status(&mut self) -> Result<ExposureStatus, PortError> {
        let _call = self.enter("exposure_status");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.status_queries += 1;
        s.refresh_phase();
        Ok(s.status())
    }

    fn stop_exposure(&mut self) -> Result<(), PortError> {
        let _call = self.enter("stop_exposure");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::StopExposure);
        if s.faults.ignored_stops > 0 {
            s.faults.ignored_stops -= 1;
            return Ok(());
        }
        s.phase = Phase::Idle;
        Ok(())
    }

    fn fetch_exposure_result(&mut self, buffer: &mut [u8]) -> Result<(), PortError> {
        let _call = self.enter("fetch_exposure_result");
        let mut s = self.shared.lock();
        s.require_open()?;
        s.calls.push(PortCall::Fetch);
        s.refresh_phase();
        if !matches!(s.phase, Phase::Success) {
            return Err(PortError::device(12, "no exposure result available"));
        }
        s.check_buffer(buffer)?;
        if s.faults.fetch_failures > 0 {
            s.faults.fetch_failures -= 1;
            return Err(PortError::device(16, "injected fetch failure"));
        }
        if s.format.image_type == ImageType::Raw16 {
            for pair in buffer.chunks_exact_mut(2) {
                pair[0] = EXPOSURE_FILL_LOW;
                pair[1] = EXPOSURE_FILL;
            }
        } else {
            buffer.fill(EXPOSURE_FILL);
        }
        s.phase = Phase::Idle;
        Ok(())
    }
}

/// 模拟相机的故障注入 / 观测句柄
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// 接下来 `n` 次取帧超时
    pub fn inject_pull_timeouts(&self, n: u32) {
        self.shared.lock().faults.pull_timeouts += n;
    }

    /// 接下来 `n` 次取帧返回设备错误
    pub fn inject_pull_errors(&self, n: u32) {
        self.shared.lock().faults.pull_errors += n;
    }

    /// 接下来 `n` 次曝光永远停留在 `Working`，直到 stop_exposure
    pub fn inject_stuck_exposures(&self, n: u32) {
        self.shared.lock().faults.stuck_exposures += n;
    }

    /// 接下来 `n` 次曝光由设备报告失败
    pub fn inject_failed_exposures(&self, n: u32) {
        self.shared.lock().faults.failed_exposures += n;
    }

    pub fn inject_fetch_failures(&self, n: u32) {
        self.shared.lock().faults.fetch_failures += n;
    }

    pub fn inject_start_video_failures(&self, n: u32) {
        self.shared.lock().faults.start_video_failures += n;
    }

    pub fn inject_format_failures(&self, n: u32) {
        self.shared.lock().faults.format_failures += n;
    }

    /// 先放行 `skip` 次格式设置，之后的 `n` 次失败
    pub fn inject_format_failures_after(&self, skip: u32, n: u32) {
        let mut s = self.shared.lock();
        s.faults.format_skip += skip;
        s.faults.format_failures += n;
    }

    /// 模拟视频模式尚未完全停止的竞争
    pub fn inject_lingering_video(&self) {
        self.shared.lock().faults.lingering_video = true;
    }

    /// 接下来 `n` 次 start_exposure 被设备拒绝（在视频模式检查之后生效）
    pub fn inject_start_rejections(&self, n: u32) {
        self.shared.lock().faults.start_rejections += n;
    }

    /// 接下来 `n` 次 stop_exposure 返回成功但不改变状态
    pub fn inject_ignored_stops(&self, n: u32) {
        self.shared.lock().faults.ignored_stops += n;
    }

    /// 模拟上一个调用者异常退出后残留的曝光
    pub fn inject_stuck_status(&self) {
        self.shared.lock().phase = Phase::Working {
            started: Instant::now(),
            duration: Duration::ZERO,
            outcome: Outcome::Stuck,
        };
    }

    pub fn set_frame_interval(&self, interval: Duration) {
        self.shared.lock().frame_interval = interval;
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.shared.lock().calls.clone()
    }

    /// 统计满足条件的调用次数
    pub fn count(&self, pred: impl Fn(&PortCall) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.shared.lock().calls.clear();
    }

    pub fn pulls(&self) -> u64 {
        self.shared.lock().pulls
    }

    pub fn status_queries(&self) -> u64 {
        self.shared.lock().status_queries
    }

    /// 违反互斥约束的调用（应始终为空）
    pub fn violations(&self) -> Vec<String> {
        self.shared.lock().violations.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    pub fn is_video_active(&self) -> bool {
        self.shared.lock().video_active
    }

    pub fn exposure_status(&self) -> ExposureStatus {
        let mut s = self.shared.lock();
        s.refresh_phase();
        s.status()
    }

    pub fn control(&self, kind: ControlKind) -> Option<ControlValue> {
        self.shared.lock().controls.get(&kind).copied()
    }

    pub fn format(&self) -> RoiFormat {
        self.shared.lock().format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> (SimCamera, SimHandle) {
        let mut cam = SimCamera::new();
        let handle = cam.handle();
        cam.open().unwrap();
        (cam, handle)
    }

    #[test]
    fn test_sim_ids_are_unique() {
        let a = SimCamera::new();
        let b = SimCamera::new();
        assert_ne!(a.device_id(), b.device_id());
    }

    #[test]
    fn test_exposure_completes_after_duration() {
        let (mut cam, handle) = opened();
        let roi = RoiFormat::new(64, 48, 1, ImageType::Raw8);
        cam.set_frame_format(roi).unwrap();
        cam.set_control(ControlKind::Exposure, 10_000, false).unwrap();
        cam.start_exposure(false).unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Working);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Success);

        let mut buf = vec![0u8; roi.buffer_len()];
        cam.fetch_exposure_result(&mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == EXPOSURE_FILL));
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Idle);
        assert!(handle.violations().is_empty());
    }

    #[test]
    fn test_exposure_rejected_while_video_active() {
        let (mut cam, handle) = opened();
        cam.start_video_capture().unwrap();
        assert_eq!(cam.start_exposure(false), Err(PortError::VideoModeActive));
        assert_eq!(handle.violations().len(), 1);
    }

    #[test]
    fn test_lingering_video_cleared_by_stop() {
        let (mut cam, handle) = opened();
        handle.inject_lingering_video();
        assert_eq!(cam.start_exposure(false), Err(PortError::VideoModeActive));
        cam.stop_video_capture().unwrap();
        assert!(cam.start_exposure(false).is_ok());
        assert!(handle.violations().is_empty());
    }

    #[test]
    fn test_start_rejection_and_ignored_stop() {
        let (mut cam, handle) = opened();
        handle.inject_start_rejections(1);
        assert!(matches!(
            cam.start_exposure(false),
            Err(PortError::Device { .. })
        ));

        handle.inject_stuck_status();
        handle.inject_ignored_stops(1);
        cam.stop_exposure().unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Working);
        cam.stop_exposure().unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Idle);
        assert!(cam.start_exposure(false).is_ok());
    }

    #[test]
    fn test_stuck_exposure_until_stopped() {
        let (mut cam, handle) = opened();
        handle.inject_stuck_exposures(1);
        cam.start_exposure(false).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Working);
        cam.stop_exposure().unwrap();
        assert_eq!(cam.exposure_status().unwrap(), ExposureStatus::Idle);
    }

    #[test]
    fn test_pull_faults_and_frames() {
        let (mut cam, handle) = opened();
        let roi = RoiFormat::new(64, 48, 1, ImageType::Rgb24);
        cam.set_frame_format(roi).unwrap();
        cam.start_video_capture().unwrap();
        handle.inject_pull_timeouts(1);
        handle.inject_pull_errors(1);

        let mut buf = vec![0u8; roi.buffer_len()];
        let timeout = Duration::from_millis(2);
        assert_eq!(cam.pull_video_frame(&mut buf, timeout), Err(PortError::Timeout));
        assert!(matches!(
            cam.pull_video_frame(&mut buf, timeout),
            Err(PortError::Device { .. })
        ));
        assert!(cam.pull_video_frame(&mut buf, timeout).is_ok());
        assert_ne!(buf[0], 0);
        assert_eq!(handle.pulls(), 3);

        let mut short = vec![0u8; 10];
        assert!(matches!(
            cam.pull_video_frame(&mut short, timeout),
            Err(PortError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_not_open() {
        let mut cam = SimCamera::new();
        assert_eq!(cam.start_video_capture(), Err(PortError::NotOpen));
    }
}

//! 模式仲裁器
//!
//! [`Camera`] 是设备模式的唯一权威：所有会改变采集模式的请求都必须先进入
//! 同一个互斥区（`state`），因此任意两个切换都不会交错。
//!
//! # 锁顺序
//!
//! `state` → `job` → `port`。视频流线程只持有 `port`（每次取帧），
//! 停止序列任务只持有 `job`。
//!
//! # 并发请求
//!
//! - 启动类请求（连接、开始视频流、拍照、开始序列、修改参数）使用 `try_lock`，
//!   有切换进行中时立即返回 [`CaptureError::DeviceBusy`]，不排队
//! - 停止类请求在有界时间内等待互斥区；停止序列任务只发送取消信号，不需要互斥区

use crate::config::ControllerConfig;
use crate::error::CaptureError;
use crate::exposure::{ExposureController, ExposureRequest};
use crate::frame::{Frame, FrameSlot};
use crate::metrics::{CameraMetrics, MetricsSnapshot};
use crate::mode::{AtomicMode, Mode};
use crate::poll::{PollPolicy, join_within};
use crate::sequence::{SequenceJob, SequenceProgress, SequenceStatus, SequenceWorker, Shot, run_sequence};
use crate::settings::{AcquisitionSettings, SettingsUpdate, exposure_control_value};
use crate::stream::{StreamParams, StreamWorker};
use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use skycam_port::{CameraInfo, CameraPort, ControlKind, DeviceSession, ImageType, PortError, RoiFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::Builder;
use tracing::{debug, error, info, warn};

/// 互斥区内的仲裁状态
#[derive(Debug, Default)]
struct ArbiterState {
    session: Option<DeviceSession>,
    stream: Option<StreamWorker>,
    /// 设备当前的画面格式（`None` 表示未知，下次使用前重新设置）
    applied_format: Option<RoiFormat>,
    /// 恢复默认格式失败的记录，由下一个依赖格式的请求报告
    format_fault: Option<String>,
}

struct Inner<P: CameraPort> {
    state: Mutex<ArbiterState>,
    job: Mutex<Option<SequenceWorker>>,
    port: Arc<Mutex<P>>,
    frames: Arc<FrameSlot>,
    metrics: Arc<CameraMetrics>,
    config: ControllerConfig,

    // 以下为互斥区内写入、无锁读取的镜像
    mode: AtomicMode,
    connected: AtomicBool,
    streaming: AtomicBool,
    settings: ArcSwap<AcquisitionSettings>,
    info: ArcSwapOption<CameraInfo>,
    progress: ArcSwap<SequenceProgress>,
    last_fault: ArcSwapOption<String>,
    next_job_id: AtomicU64,
}

/// 相机状态报告
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub connected: bool,
    pub mode: Mode,
    pub streaming: bool,
    /// 最近一次发布帧的时间
    pub last_frame_at: Option<DateTime<Local>>,
    pub frames_published: u64,
    /// 最近一次失败的描述（连接成功后清除）
    pub fault: Option<String>,
    pub sequence: SequenceStatus,
}

/// 相机（模式仲裁器）
///
/// 可廉价克隆，所有克隆共享同一台设备。
pub struct Camera<P: CameraPort> {
    inner: Arc<Inner<P>>,
}

impl<P: CameraPort> Clone for Camera<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: CameraPort + Send + 'static> Camera<P> {
    /// 创建相机（不打开设备）
    ///
    /// # 错误
    /// - `CaptureError::InvalidSettings`: 配置或初始参数不合法
    pub fn new(
        port: P,
        config: ControllerConfig,
        settings: AcquisitionSettings,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        settings.validate(None)?;
        let inner = Inner {
            state: Mutex::new(ArbiterState::default()),
            job: Mutex::new(None),
            port: Arc::new(Mutex::new(port)),
            frames: Arc::new(FrameSlot::new()),
            metrics: Arc::new(CameraMetrics::new()),
            config,
            mode: AtomicMode::new(Mode::Idle),
            connected: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            settings: ArcSwap::from_pointee(settings),
            info: ArcSwapOption::empty(),
            progress: ArcSwap::from_pointee(SequenceProgress::default()),
            last_fault: ArcSwapOption::empty(),
            next_job_id: AtomicU64::new(0),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    // ------------------------------------------------------------------
    // 连接
    // ------------------------------------------------------------------

    /// 打开并初始化设备
    ///
    /// 已连接时直接返回设备属性。初始化步骤：全幅 RGB24 画面、USB 带宽、
    /// 初始增益（回读校验）。
    ///
    /// # 错误
    /// - `CaptureError::Port(PortError::AlreadyOpen)`: 同一进程内该设备已被打开
    /// - `CaptureError::DeviceBusy`: 有切换进行中
    pub fn connect(&self) -> Result<CameraInfo, CaptureError> {
        let mut st = self.begin_transition()?;
        if st.session.is_some() {
            return self
                .inner
                .info
                .load_full()
                .map(|info| (*info).clone())
                .ok_or(CaptureError::NotConnected);
        }
        let result = self.connect_locked(&mut st);
        self.record(result)
    }

    fn connect_locked(&self, st: &mut ArbiterState) -> Result<CameraInfo, CaptureError> {
        let mut port = self.inner.port.lock();
        let session = DeviceSession::acquire(port.device_id())?;
        let info = port.open()?;

        let settings = self.inner.settings.load().as_ref().clone().fit_to(&info);
        if let Err(e) = settings.validate(Some(&info)) {
            if let Err(close) = port.close() {
                warn!("Failed to close camera: {}", close);
            }
            return Err(e);
        }

        let format = settings.stream_format();
        st.applied_format = match port.set_frame_format(format) {
            Ok(()) => Some(format),
            Err(e) => {
                warn!("Failed to set ROI format {:?}: {}", format, e);
                None
            },
        };
        if let Err(e) = port.set_control(
            ControlKind::BandwidthOverload,
            self.inner.config.bandwidth_overload,
            false,
        ) {
            warn!("Failed to set bandwidth overload: {}", e);
        }
        verify_gain(&mut *port, settings.gain);
        drop(port);

        st.session = Some(session);
        st.format_fault = None;
        self.inner.settings.store(Arc::new(settings));
        self.inner.info.store(Some(Arc::new(info.clone())));
        self.inner.connected.store(true, Ordering::Release);
        self.inner.mode.set(Mode::Idle, Ordering::Release);
        self.inner.last_fault.store(None);
        info!(
            "Camera connected: {} ({}x{}, color: {})",
            info.name, info.max_width, info.max_height, info.is_color
        );
        Ok(info)
    }

    /// 关闭设备
    ///
    /// 先停止序列任务和视频流；未连接时为空操作。
    pub fn disconnect(&self) -> Result<(), CaptureError> {
        self.stop_sequence()?;
        let mut st = self.begin_stop()?;
        if st.session.is_none() {
            return Ok(());
        }

        if let Err(e) = self.stop_stream_locked(&mut st) {
            warn!("Stopping stream during disconnect: {}", e);
        }
        let closed = self.inner.port.lock().close();

        st.session = None;
        st.applied_format = None;
        st.format_fault = None;
        self.inner.info.store(None);
        self.inner.connected.store(false, Ordering::Release);
        self.inner.mode.set(Mode::Idle, Ordering::Release);
        info!("Camera disconnected");
        closed.map_err(CaptureError::from)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // 视频流
    // ------------------------------------------------------------------

    /// 开始视频流（已在运行时为空操作）
    ///
    /// # 错误
    /// - `CaptureError::NotConnected`
    /// - `CaptureError::DeviceBusy`: 序列任务运行中或有切换进行中
    /// - `CaptureError::TransitionFailed`: 设备调用失败，模式保持 Idle
    pub fn start_streaming(&self) -> Result<(), CaptureError> {
        let mut st = self.begin_transition()?;
        self.require_connected(&st)?;
        if self.job_active() {
            return Err(CaptureError::DeviceBusy("sequence running"));
        }
        if st.stream.is_some() {
            return Ok(());
        }
        let result = self
            .take_format_fault(&mut st)
            .and_then(|()| self.start_stream_locked(&mut st));
        self.record(result)
    }

    /// 停止视频流（未运行时为空操作）
    pub fn stop_streaming(&self) -> Result<(), CaptureError> {
        let mut st = self.begin_stop()?;
        if st.stream.is_none() {
            return Ok(());
        }
        let result = self.stop_stream_locked(&mut st);
        self.record(result)
    }

    fn start_stream_locked(&self, st: &mut ArbiterState) -> Result<(), CaptureError> {
        let settings = self.inner.settings.load_full();
        let format = settings.stream_format();
        {
            let mut port = self.inner.port.lock();
            if st.applied_format != Some(format) {
                st.applied_format = None;
                port.set_frame_format(format).map_err(format_error)?;
                st.applied_format = Some(format);
            }
            port.set_control(ControlKind::Gain, settings.gain, false)
                .map_err(|e| CaptureError::transition("set gain", e))?;
            port.set_control(
                ControlKind::Exposure,
                exposure_control_value(settings.video_exposure_ceiling_us)?,
                false,
            )
            .map_err(|e| CaptureError::transition("set video exposure", e))?;
            port.start_video_capture()
                .map_err(|e| CaptureError::transition("start video capture", e))?;
        }

        let config = &self.inner.config;
        let params = StreamParams {
            format,
            pull_timeout: config.pull_timeout(settings.video_exposure_ceiling()),
            loop_delay: config.stream_loop_delay(),
            report_every: config.pull_error_report_every,
        };
        let worker = match StreamWorker::spawn(
            self.inner.port.clone(),
            self.inner.frames.clone(),
            self.inner.metrics.clone(),
            params,
        ) {
            Ok(worker) => worker,
            Err(e) => {
                if let Err(stop) = self.inner.port.lock().stop_video_capture() {
                    warn!("Stop video capture failed: {}", stop);
                }
                return Err(CaptureError::transition("spawn stream thread", e));
            },
        };

        st.stream = Some(worker);
        self.inner.streaming.store(true, Ordering::Release);
        self.inner.metrics.stream_starts.fetch_add(1, Ordering::Relaxed);
        if !self.job_active() {
            self.inner.mode.set(Mode::Streaming, Ordering::Release);
        }
        info!(
            "Streaming started: {}x{}, video exposure {} us, pull timeout {:?}",
            format.width, format.height, settings.video_exposure_ceiling_us, params.pull_timeout
        );
        Ok(())
    }

    /// 停止视频流线程（有界等待），然后停止设备视频采集
    ///
    /// 即使线程没有按时退出也会发出设备停止调用。
    fn stop_stream_locked(&self, st: &mut ArbiterState) -> Result<(), CaptureError> {
        let Some(worker) = st.stream.take() else {
            return Ok(());
        };
        let config = &self.inner.config;
        worker.stop(PollPolicy::new(
            config.stream_stop_poll(),
            config.stream_stop_wait(),
        ));
        self.inner.streaming.store(false, Ordering::Release);
        if !self.job_active() {
            self.inner.mode.set(Mode::Idle, Ordering::Release);
        }

        let stopped = self.inner.port.lock().stop_video_capture();
        info!("Streaming stopped");
        stopped.map_err(|e| CaptureError::transition("stop video capture", e))
    }

    /// 为曝光让出设备：停止视频流并等待稳定
    fn suspend_stream(&self, st: &mut ArbiterState) {
        debug!("Suspending stream");
        if let Err(e) = self.stop_stream_locked(st) {
            warn!("Suspending stream: {}", e);
        }
        spin_sleep::sleep(self.inner.config.suspend_settle());
    }

    fn resume_stream(&self, st: &mut ArbiterState) -> Result<(), CaptureError> {
        debug!("Resuming stream");
        spin_sleep::sleep(self.inner.config.resume_settle());
        self.start_stream_locked(st).inspect_err(|e| {
            error!("Failed to resume streaming: {}", e);
        })
    }

    // ------------------------------------------------------------------
    // 单次曝光
    // ------------------------------------------------------------------

    /// 拍摄一张照片
    ///
    /// 视频流运行时先暂停，拍摄后以原参数恢复。恢复失败时设备停留在 Idle，
    /// 返回 `TransitionFailed`（照片仍然发布在最新帧中）。
    ///
    /// # 错误
    /// - `CaptureError::DeviceBusy`: 序列任务运行中或有切换进行中
    /// - 曝光控制器的各类失败（超时、设备报告失败、取数据失败等）
    pub fn capture_snapshot(&self) -> Result<Arc<Frame>, CaptureError> {
        let mut st = self.begin_transition()?;
        self.require_connected(&st)?;
        if self.job_active() {
            return Err(CaptureError::DeviceBusy("sequence running"));
        }
        let result = self
            .take_format_fault(&mut st)
            .and_then(|()| self.snapshot_locked(&mut st));
        self.record(result)
    }

    fn snapshot_locked(&self, st: &mut ArbiterState) -> Result<Arc<Frame>, CaptureError> {
        let was_streaming = st.stream.is_some();
        if was_streaming {
            self.suspend_stream(st);
        }

        self.inner.mode.set(Mode::Exposing, Ordering::Release);
        let settings = self.inner.settings.load_full();
        let request = ExposureRequest {
            exposure_us: settings.photo_exposure_us,
            gain: settings.gain,
            format: settings.capture_format(None),
            dark_frame: false,
        };
        info!(
            "Snapshot: exposure {} us, gain {}, {:?}",
            request.exposure_us, request.gain, request.format.image_type
        );
        let result = self.expose(st, &request);
        self.restore_default_format(st, &settings);
        self.inner.mode.set(Mode::Idle, Ordering::Release);

        if was_streaming {
            self.resume_stream(st)?;
        }
        result
    }

    fn expose(
        &self,
        st: &mut ArbiterState,
        request: &ExposureRequest,
    ) -> Result<Arc<Frame>, CaptureError> {
        let mut port = self.inner.port.lock();
        ExposureController::new(&mut *port, &self.inner.config, &self.inner.metrics).run(
            request,
            &mut st.applied_format,
            &self.inner.frames,
        )
    }

    /// 恢复视频流默认格式；失败时记录，由下一个依赖格式的请求报告
    fn restore_default_format(&self, st: &mut ArbiterState, settings: &AcquisitionSettings) {
        let default = settings.stream_format();
        if st.applied_format == Some(default) {
            return;
        }
        match self.inner.port.lock().set_frame_format(default) {
            Ok(()) => st.applied_format = Some(default),
            Err(e) => {
                warn!("Failed to restore frame format {:?}: {}", default, e);
                st.applied_format = None;
                st.format_fault = Some(format!("restore frame format failed: {e}"));
            },
        }
    }

    fn take_format_fault(&self, st: &mut ArbiterState) -> Result<(), CaptureError> {
        match st.format_fault.take() {
            Some(message) => Err(CaptureError::TransitionFailed(message)),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // 序列任务
    // ------------------------------------------------------------------

    /// 开始序列任务
    ///
    /// # 错误
    /// - `CaptureError::InvalidSettings`: 帧数为 0
    /// - `CaptureError::DeviceBusy`: 已有任务运行或有切换进行中
    pub fn start_sequence(&self, job: SequenceJob) -> Result<(), CaptureError> {
        if job.total == 0 {
            return Err(CaptureError::InvalidSettings(
                "sequence count must be at least 1".to_string(),
            ));
        }
        if let Some(format) = job.pixel_format
            && let Some(info) = self.inner.info.load_full()
            && !info.supports(format)
        {
            return Err(CaptureError::UnsupportedFormat(format));
        }

        let mut st = self.begin_transition()?;
        self.require_connected(&st)?;
        let mut slot = self.inner.job.lock();
        if slot.is_some() {
            return Err(CaptureError::DeviceBusy("sequence already running"));
        }
        self.take_format_fault(&mut st)?;

        let job_id = self.inner.next_job_id.fetch_add(1, Ordering::Relaxed) + 1;
        let progress = Arc::new(SequenceProgress::new(job_id, job.total));
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);
        let camera = self.clone();
        let worker_progress = progress.clone();
        let handle = Builder::new()
            .name("skycam-sequence".to_string())
            .spawn(move || run_sequence(camera, job, worker_progress, cancel_rx))
            .map_err(|e| CaptureError::transition("spawn sequence thread", e))?;

        self.inner.progress.store(progress);
        *slot = Some(SequenceWorker {
            job_id,
            cancel: cancel_tx,
            handle,
        });
        self.inner.mode.set(Mode::SequenceRunning, Ordering::Release);
        Ok(())
    }

    /// 停止序列任务（协作取消）
    ///
    /// 进行中的曝光会先完成。没有任务时为空操作。
    pub fn stop_sequence(&self) -> Result<SequenceStatus, CaptureError> {
        let Some(worker) = self.inner.job.lock().take() else {
            return Ok(self.sequence_status());
        };
        info!("Stopping sequence #{}", worker.job_id);
        // 容量为 1，已有信号时忽略
        let _ = worker.cancel.try_send(());

        let config = &self.inner.config;
        let wait = config.exposure_deadline(self.settings().photo_exposure())
            + config.stream_stop_wait()
            + config.stop_lock_wait();
        if !join_within(
            worker.handle,
            PollPolicy::new(config.stream_stop_poll(), wait),
            "Sequence",
        ) {
            warn!("Sequence #{} is still finishing its current frame", worker.job_id);
        }
        Ok(self.sequence_status())
    }

    pub fn sequence_status(&self) -> SequenceStatus {
        self.inner.progress.load().status()
    }

    fn job_active(&self) -> bool {
        self.inner.job.lock().is_some()
    }

    /// 序列线程的一次拍摄（在互斥区内完成暂停、曝光、格式恢复、恢复视频流）
    pub(crate) fn sequence_shot(
        &self,
        job_id: u64,
        pixel_format: Option<ImageType>,
    ) -> Result<Shot, CaptureError> {
        let mut st = self.inner.state.lock();
        self.require_connected(&st)?;
        if self.inner.job.lock().as_ref().map(|w| w.job_id) != Some(job_id) {
            return Err(CaptureError::Cancelled);
        }
        self.take_format_fault(&mut st)?;

        let was_streaming = st.stream.is_some();
        if was_streaming {
            self.suspend_stream(&mut st);
        }

        let settings = self.inner.settings.load_full();
        let request = ExposureRequest {
            exposure_us: settings.photo_exposure_us,
            gain: settings.gain,
            format: settings.capture_format(pixel_format),
            dark_frame: false,
        };
        let result = self.expose(&mut st, &request);
        self.restore_default_format(&mut st, &settings);

        if was_streaming && let Err(e) = self.resume_stream(&mut st) {
            self.inner.last_fault.store(Some(Arc::new(e.to_string())));
        }

        result.map(|frame| Shot {
            frame,
            gain: request.gain,
            exposure_us: request.exposure_us,
        })
    }

    /// 任务结束：回到任务前的模式（视频流仍在运行则为 Streaming）
    pub(crate) fn finish_sequence(&self, job_id: u64) {
        let st = self.inner.state.lock();
        let mut slot = self.inner.job.lock();
        match slot.as_ref().map(|w| w.job_id) {
            // 新任务已经接管设备
            Some(current) if current != job_id => return,
            Some(_) => {
                slot.take();
            },
            None => {},
        }
        let mode = if st.stream.is_some() {
            Mode::Streaming
        } else {
            Mode::Idle
        };
        self.inner.mode.set(mode, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // 参数
    // ------------------------------------------------------------------

    /// 修改采集参数，返回生效后的完整参数
    ///
    /// - 增益、视频曝光上限、画面几何变化时，若视频流在运行则重启视频流
    /// - 单次曝光时间和像素格式只保存，在下一次曝光时生效
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<AcquisitionSettings, CaptureError> {
        if update.is_empty() {
            return Ok(self.settings());
        }
        let mut st = self.begin_transition()?;
        let current = self.inner.settings.load_full();
        let info = self.inner.info.load_full();
        let next = current.apply(&update, info.as_deref())?;
        if next == *current {
            return Ok(next);
        }
        if st.session.is_none() {
            self.inner.settings.store(Arc::new(next.clone()));
            return Ok(next);
        }

        let restart = st.stream.is_some() && current.requires_stream_restart(&next);
        if restart {
            self.suspend_stream(&mut st);
        }

        let applied = if next.gain != current.gain {
            let mut port = self.inner.port.lock();
            match port.set_control(ControlKind::Gain, next.gain, false) {
                Ok(()) => {
                    verify_gain(&mut *port, next.gain);
                    Ok(())
                },
                Err(e) => Err(CaptureError::transition("set gain", e)),
            }
        } else {
            Ok(())
        };
        if applied.is_ok() {
            self.inner.settings.store(Arc::new(next.clone()));
            info!(
                "Settings updated: gain {}, photo exposure {} us, video exposure {} us, {}x{} {:?}",
                next.gain,
                next.photo_exposure_us,
                next.video_exposure_ceiling_us,
                next.width,
                next.height,
                next.pixel_format
            );
        }

        if restart {
            let resumed = self.resume_stream(&mut st);
            self.record(resumed)?;
        }
        self.record(applied.map(|()| next))
    }

    /// 当前参数快照
    pub fn settings(&self) -> AcquisitionSettings {
        self.inner.settings.load().as_ref().clone()
    }

    // ------------------------------------------------------------------
    // 读取
    // ------------------------------------------------------------------

    /// 最新帧快照（视频流或曝光产生）
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.inner.frames.latest()
    }

    pub fn mode(&self) -> Mode {
        self.inner.mode.get(Ordering::Acquire)
    }

    pub fn info(&self) -> Option<CameraInfo> {
        self.inner.info.load_full().map(|info| (*info).clone())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// 状态报告（无锁，不会被进行中的曝光阻塞）
    pub fn status(&self) -> CameraStatus {
        let latest = self.inner.frames.latest();
        CameraStatus {
            connected: self.is_connected(),
            mode: self.mode(),
            streaming: self.inner.streaming.load(Ordering::Acquire),
            last_frame_at: latest.as_ref().map(|f| f.captured_at),
            frames_published: self.inner.frames.sequence(),
            fault: self.inner.last_fault.load_full().map(|f| (*f).clone()),
            sequence: self.sequence_status(),
        }
    }

    /// 传感器温度（°C）
    ///
    /// 需要访问设备，曝光进行中时会等待曝光结束。
    pub fn sensor_temperature(&self) -> Result<f64, CaptureError> {
        if !self.is_connected() {
            return Err(CaptureError::NotConnected);
        }
        let value = self.inner.port.lock().get_control(ControlKind::Temperature)?;
        Ok(value.value as f64 / 10.0)
    }

    // ------------------------------------------------------------------
    // 内部工具
    // ------------------------------------------------------------------

    fn begin_transition(&self) -> Result<MutexGuard<'_, ArbiterState>, CaptureError> {
        self.inner
            .state
            .try_lock()
            .ok_or(CaptureError::DeviceBusy("mode transition in progress"))
    }

    fn begin_stop(&self) -> Result<MutexGuard<'_, ArbiterState>, CaptureError> {
        self.inner
            .state
            .try_lock_for(self.inner.config.stop_lock_wait())
            .ok_or(CaptureError::DeviceBusy("mode transition in progress"))
    }

    fn require_connected(&self, st: &ArbiterState) -> Result<(), CaptureError> {
        if st.session.is_some() {
            Ok(())
        } else {
            Err(CaptureError::NotConnected)
        }
    }

    /// 记录失败（状态报告中的 fault）
    fn record<T>(&self, result: Result<T, CaptureError>) -> Result<T, CaptureError> {
        if let Err(e) = &result {
            warn!("{}", e);
            self.inner.last_fault.store(Some(Arc::new(e.to_string())));
        }
        result
    }
}

fn format_error(e: PortError) -> CaptureError {
    match e {
        PortError::UnsupportedImageType(t) => CaptureError::UnsupportedFormat(t),
        e => CaptureError::transition("set frame format", e),
    }
}

/// 回读增益并记录（不一致只告警）
fn verify_gain<P: CameraPort + ?Sized>(port: &mut P, requested: i64) {
    match port.get_control(ControlKind::Gain) {
        Ok(actual) if actual.value == requested => {
            info!("Gain set to {} (verified, auto: {})", actual.value, actual.auto)
        },
        Ok(actual) => warn!(
            "Gain readback mismatch: requested {}, actual {} (auto: {})",
            requested, actual.value, actual.auto
        ),
        Err(e) => warn!("Failed to read back gain: {}", e),
    }
}

impl<P: CameraPort> Drop for Inner<P> {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(worker) = st.stream.take() {
            worker.stop(PollPolicy::new(
                self.config.stream_stop_poll(),
                self.config.stream_stop_wait(),
            ));
            if let Err(e) = self.port.lock().stop_video_capture() {
                warn!("Stop video capture on drop failed: {}", e);
            }
        }
        if st.session.take().is_some()
            && let Err(e) = self.port.lock().close()
        {
            warn!("Close camera on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycam_port::{PortCall, SimCamera, SimHandle};
    use std::time::Duration;

    fn quick_config() -> ControllerConfig {
        ControllerConfig {
            stream_pull_margin_ms: 20,
            stream_pull_min_ms: 10,
            stream_pull_max_ms: 50,
            stream_loop_delay_ms: 1,
            stream_stop_wait_ms: 500,
            stream_stop_poll_ms: 1,
            idle_poll_interval_ms: 1,
            idle_wait_ms: 20,
            forced_stop_settle_ms: 1,
            exposure_poll_interval_ms: 1,
            exposure_margin_ms: 50,
            suspend_settle_ms: 1,
            resume_settle_ms: 1,
            fast_pacing_buffer_ms: 1,
            fast_pacing_floor_ms: 2,
            stop_lock_wait_ms: 500,
            ..Default::default()
        }
    }

    fn camera() -> (Camera<SimCamera>, SimHandle) {
        let sim = SimCamera::new();
        let handle = sim.handle();
        let settings = AcquisitionSettings {
            photo_exposure_us: 2_000,
            video_exposure_ceiling_us: 1_000,
            ..Default::default()
        };
        (Camera::new(sim, quick_config(), settings).unwrap(), handle)
    }

    #[test]
    fn test_connect_initializes_device() {
        let (camera, sim) = camera();
        let info = camera.connect().unwrap();
        assert_eq!((info.max_width, info.max_height), (64, 48));
        assert!(camera.is_connected());

        let settings = camera.settings();
        assert_eq!((settings.width, settings.height), (64, 48));
        assert_eq!(sim.format(), RoiFormat::new(64, 48, 1, ImageType::Rgb24));
        assert_eq!(
            sim.control(ControlKind::BandwidthOverload).map(|c| c.value),
            Some(40)
        );
        assert_eq!(sim.control(ControlKind::Gain).map(|c| c.value), Some(50));

        // 幂等
        camera.connect().unwrap();
        assert_eq!(sim.count(|c| *c == PortCall::Open), 1);
    }

    #[test]
    fn test_requests_require_connection() {
        let (camera, _sim) = camera();
        assert_eq!(camera.start_streaming(), Err(CaptureError::NotConnected));
        assert_eq!(
            camera.capture_snapshot().unwrap_err(),
            CaptureError::NotConnected
        );
        assert!(camera.stop_streaming().is_ok());
        assert!(camera.disconnect().is_ok());
        assert_eq!(camera.sensor_temperature(), Err(CaptureError::NotConnected));
    }

    #[test]
    fn test_disconnect_releases_session() {
        let (camera, sim) = camera();
        camera.connect().unwrap();
        let id = camera.info().unwrap().id;
        assert!(DeviceSession::is_open(id));

        camera.disconnect().unwrap();
        assert!(!DeviceSession::is_open(id));
        assert!(!sim.is_open());
        assert!(!camera.is_connected());
        assert!(camera.info().is_none());
    }

    #[test]
    fn test_second_session_for_same_device_rejected() {
        let sim = SimCamera::new();
        let id = sim.device_id();
        let camera = Camera::new(sim, quick_config(), AcquisitionSettings::default()).unwrap();

        let other = DeviceSession::acquire(id).unwrap();
        assert_eq!(
            camera.connect().unwrap_err(),
            CaptureError::Port(PortError::AlreadyOpen(id))
        );
        assert!(!camera.is_connected());

        drop(other);
        assert!(camera.connect().is_ok());
    }

    #[test]
    fn test_busy_while_transition_in_flight() {
        let (camera, _sim) = camera();
        camera.connect().unwrap();
        let guard = camera.inner.state.lock();
        assert_eq!(
            camera.capture_snapshot().unwrap_err(),
            CaptureError::DeviceBusy("mode transition in progress")
        );
        assert_eq!(
            camera.start_streaming(),
            Err(CaptureError::DeviceBusy("mode transition in progress"))
        );
        drop(guard);
        assert!(camera.capture_snapshot().is_ok());
    }

    #[test]
    fn test_restore_failure_surfaces_on_next_operation() {
        let (camera, sim) = camera();
        camera.connect().unwrap();
        camera
            .update_settings(SettingsUpdate {
                pixel_format: Some(ImageType::Raw16),
                ..Default::default()
            })
            .unwrap();

        // 切到 Raw16 成功，恢复 RGB24 失败
        sim.inject_format_failures_after(1, 1);
        let frame = camera.capture_snapshot().unwrap();
        assert_eq!(frame.image_type, ImageType::Raw16);
        assert_eq!(sim.format().image_type, ImageType::Raw16);

        let next = camera.start_streaming();
        assert!(matches!(next, Err(CaptureError::TransitionFailed(_))));
        assert_eq!(camera.mode(), Mode::Idle);
        assert!(camera.status().fault.is_some());

        // 报告一次后清除，下一次请求重新设置格式
        camera.start_streaming().unwrap();
        assert_eq!(sim.format().image_type, ImageType::Rgb24);
        camera.stop_streaming().unwrap();
        assert!(sim.violations().is_empty());
    }

    #[test]
    fn test_temperature() {
        let (camera, _sim) = camera();
        camera.connect().unwrap();
        assert_eq!(camera.sensor_temperature(), Ok(25.0));
    }
}

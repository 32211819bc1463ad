//! 集成测试公共设施：毫秒级时序配置、模拟相机、内存 sink

#![allow(dead_code)]

use parking_lot::Mutex;
use skycam_driver::{
    AcquisitionSettings, Camera, ControllerConfig, Frame, FrameSink, OutputFormat, PollPolicy,
    SinkError,
};
use skycam_port::{SimCamera, SimHandle};
use std::sync::Arc;
use std::time::Duration;

/// 所有等待都缩短到毫秒级
pub fn quick_config() -> ControllerConfig {
    ControllerConfig {
        stream_pull_margin_ms: 20,
        stream_pull_min_ms: 10,
        stream_pull_max_ms: 50,
        stream_loop_delay_ms: 1,
        stream_stop_wait_ms: 1000,
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
        stop_lock_wait_ms: 2000,
        ..Default::default()
    }
}

pub fn quick_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        photo_exposure_us: 2_000,
        video_exposure_ceiling_us: 1_000,
        ..Default::default()
    }
}

/// 已连接的模拟相机
pub fn connected_camera() -> (Camera<SimCamera>, SimHandle) {
    let sim = SimCamera::new();
    let handle = sim.handle();
    let camera = Camera::new(sim, quick_config(), quick_settings()).unwrap();
    camera.connect().unwrap();
    (camera, handle)
}

/// 等待条件成立（最多 5 秒）
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    PollPolicy::new(Duration::from_millis(2), Duration::from_secs(5))
        .poll(|| Ok::<_, ()>(condition().then_some(())))
        .is_ok()
}

/// 记录写入请求的内存 sink
#[derive(Default)]
pub struct MemorySink {
    pub names: Mutex<Vec<String>>,
    pub fail: bool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }
}

impl FrameSink for MemorySink {
    fn write(&self, frame: &Frame, file_name: &str, _format: OutputFormat) -> Result<(), SinkError> {
        assert!(!frame.data.is_empty());
        if self.fail {
            return Err(SinkError::Encode("disk full".to_string()));
        }
        self.names.lock().push(file_name.to_string());
        Ok(())
    }
}

//! # Skycam Driver
//!
//! 相机采集模式控制器：
//! - 模式仲裁（空闲 / 视频流 / 单次曝光 / 序列任务，任意时刻只有一个生效）
//! - 后台视频流线程（最新帧通过 ArcSwap 无锁发布）
//! - 曝光控制（启动 → 轮询状态 → 取数据，含超时与卡死恢复）
//! - 序列任务编排（每帧前后暂停/恢复视频流，可协作取消）
//!
//! # 示例
//!
//! ```rust,no_run
//! use skycam_driver::CameraBuilder;
//!
//! let camera = CameraBuilder::new().build().unwrap();
//! camera.connect().unwrap();
//! camera.start_streaming().unwrap();
//!
//! // 单次曝光会自动暂停并恢复视频流
//! let frame = camera.capture_snapshot().unwrap();
//! println!("{}x{} #{}", frame.width, frame.height, frame.sequence);
//! ```

mod builder;
mod camera;
pub mod config;
mod error;
mod exposure;
pub mod frame;
pub mod metrics;
pub mod mode;
pub mod poll;
pub mod sequence;
pub mod settings;
mod stream;

pub use builder::CameraBuilder;
pub use camera::{Camera, CameraStatus};
pub use config::ControllerConfig;
pub use error::{CaptureError, ErrorKind, SinkError};
pub use frame::{Frame, FrameSlot, FrameSource, PixelLayout};
pub use metrics::{CameraMetrics, MetricsSnapshot};
pub use mode::{AtomicMode, Mode};
pub use poll::{PollError, PollPolicy};
pub use sequence::{FrameSink, OutputFormat, SequenceJob, SequenceStatus};
pub use settings::{AcquisitionSettings, MAX_EXPOSURE_US, SettingsUpdate};

pub use skycam_port::{BackendKind, BoxedPort, CameraInfo, CameraPort, ImageType, PortError};

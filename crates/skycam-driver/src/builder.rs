//! Builder 模式实现
//!
//! 提供链式构造 [`Camera`] 实例的便捷方式。

use crate::camera::Camera;
use crate::config::ControllerConfig;
use crate::error::CaptureError;
use crate::settings::AcquisitionSettings;
use skycam_port::{BackendKind, BoxedPort, CameraPort, open_backend};
use tracing::info;

/// Camera Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use skycam_driver::{BackendKind, CameraBuilder, ControllerConfig};
///
/// // 使用默认配置（自动选择后端）
/// let camera = CameraBuilder::new().build().unwrap();
///
/// // 指定后端并在构造时连接
/// let config = ControllerConfig {
///     exposure_margin_ms: 10_000,
///     ..Default::default()
/// };
/// let camera = CameraBuilder::new()
///     .backend(BackendKind::Asi)
///     .camera_index(1)
///     .config(config)
///     .connect_on_build(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CameraBuilder {
    /// 后端类型（默认 Auto：优先厂商 SDK，没有设备时使用模拟相机）
    backend: BackendKind,
    /// 设备序号（多台相机时区分）
    camera_index: usize,
    config: Option<ControllerConfig>,
    settings: Option<AcquisitionSettings>,
    connect_on_build: bool,
}

impl CameraBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 显式指定后端（可选，默认 Auto）
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// 设备序号（可选，默认 0）
    pub fn camera_index(mut self, index: usize) -> Self {
        self.camera_index = index;
        self
    }

    /// 控制器时序配置（可选）
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 初始采集参数（可选）
    pub fn settings(mut self, settings: AcquisitionSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// 构造完成后立即连接设备
    pub fn connect_on_build(mut self, connect: bool) -> Self {
        self.connect_on_build = connect;
        self
    }

    /// 打开后端并构造相机
    ///
    /// # Errors
    /// - `CaptureError::Port(PortError::NoCamera)`: 所选后端没有可用设备
    /// - `CaptureError::InvalidSettings`: 配置或初始参数不合法
    pub fn build(self) -> Result<Camera<BoxedPort>, CaptureError> {
        let port = open_backend(self.backend, self.camera_index)?;
        info!(
            "Camera backend selected: {} (index {})",
            self.backend, self.camera_index
        );
        self.build_with(port)
    }

    /// 使用给定端口构造相机（测试或自定义后端）
    pub fn build_with<P: CameraPort + Send + 'static>(
        self,
        port: P,
    ) -> Result<Camera<P>, CaptureError> {
        let camera = Camera::new(
            port,
            self.config.unwrap_or_default(),
            self.settings.unwrap_or_default(),
        )?;
        if self.connect_on_build {
            camera.connect()?;
        }
        Ok(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skycam_port::SimCamera;

    #[test]
    fn test_build_with_connects() {
        let sim = SimCamera::new();
        let handle = sim.handle();
        let camera = CameraBuilder::new()
            .connect_on_build(true)
            .build_with(sim)
            .unwrap();
        assert!(camera.is_connected());
        assert!(handle.is_open());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = ControllerConfig {
            stream_pull_min_ms: 3000,
            stream_pull_max_ms: 1000,
            ..Default::default()
        };
        let result = CameraBuilder::new().config(config).build_with(SimCamera::new());
        assert!(matches!(result, Err(CaptureError::InvalidSettings(_))));
    }

    #[test]
    fn test_simulated_backend() {
        let camera = CameraBuilder::new()
            .backend(BackendKind::Simulated)
            .build()
            .unwrap();
        assert!(!camera.is_connected());
        let info = camera.connect().unwrap();
        assert_eq!((info.max_width, info.max_height), (1280, 960));
        camera.disconnect().unwrap();
    }
}

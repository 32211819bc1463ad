//! 后端选择（平台相关的工厂）
//!
//! 厂商库的加载与平台检测属于端口层的配置问题，核心只拿到一个
//! [`CameraPort`] 实例。

use crate::{CameraPort, PortError};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// 装箱的端口对象（可跨线程移动）
pub type BoxedPort = Box<dyn CameraPort + Send>;

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// 自动选择（默认）
    /// - 编译了 `asi` 且检测到相机：使用 ASI SDK
    /// - 否则编译了 `mock`：使用模拟相机
    #[default]
    Auto,
    /// 强制使用 ASI SDK
    Asi,
    /// 强制使用模拟相机
    Simulated,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Asi => "asi",
            Self::Simulated => "sim",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "asi" | "zwo" => Ok(Self::Asi),
            "sim" | "simulated" | "mock" => Ok(Self::Simulated),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// 按后端类型创建端口（不打开设备）
///
/// # 参数
/// - `kind`: 后端类型
/// - `index`: 相机枚举序号（模拟后端忽略）
///
/// # 错误
/// - `PortError::NoCamera`: 所选后端不可用或未找到相机
pub fn open_backend(kind: BackendKind, index: usize) -> Result<BoxedPort, PortError> {
    match kind {
        BackendKind::Asi => asi_port(index),
        BackendKind::Simulated => sim_port(),
        BackendKind::Auto => match asi_port(index) {
            Ok(port) => Ok(port),
            Err(PortError::NoCamera) => {
                info!("No ASI camera available, falling back to simulated camera");
                sim_port()
            },
            Err(e) => Err(e),
        },
    }
}

#[cfg(feature = "asi")]
fn asi_port(index: usize) -> Result<BoxedPort, PortError> {
    let camera = crate::asi::AsiCamera::new(index)?;
    info!("Using ASI backend (camera index {})", index);
    Ok(Box::new(camera))
}

#[cfg(not(feature = "asi"))]
fn asi_port(_index: usize) -> Result<BoxedPort, PortError> {
    Err(PortError::NoCamera)
}

#[cfg(feature = "mock")]
fn sim_port() -> Result<BoxedPort, PortError> {
    info!("Using simulated camera backend");
    Ok(Box::new(crate::sim::SimCamera::with_sensor(
        "Simulated ASI178MC",
        1280,
        960,
    )))
}

#[cfg(not(feature = "mock"))]
fn sim_port() -> Result<BoxedPort, PortError> {
    Err(PortError::NoCamera)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("auto".parse::<BackendKind>(), Ok(BackendKind::Auto));
        assert_eq!("ASI".parse::<BackendKind>(), Ok(BackendKind::Asi));
        assert_eq!("mock".parse::<BackendKind>(), Ok(BackendKind::Simulated));
        assert!("v4l2".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Simulated.to_string(), "sim");
    }

    #[cfg(not(feature = "asi"))]
    #[test]
    fn test_asi_unavailable_without_feature() {
        assert_eq!(
            open_backend(BackendKind::Asi, 0).err(),
            Some(PortError::NoCamera)
        );
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_simulated_backend() {
        let mut port = open_backend(BackendKind::Simulated, 0).unwrap();
        let info = port.open().unwrap();
        assert_eq!((info.max_width, info.max_height), (1280, 960));
    }
}

//! # 服务配置
//!
//! 配置文件路径：
//! - Linux: `~/.config/skycam/config.toml`
//! - macOS: `~/Library/Application Support/skycam/config.toml`
//! - Windows: `%APPDATA%\skycam\config.toml`
//!
//! ```toml
//! [controller]
//! exposure_margin_ms = 5000
//!
//! [settings]
//! gain = 120
//! photo_exposure_us = 2000000
//!
//! [output]
//! directory = "captures"
//! format = "png"
//! ```

use crate::sink::{DEFAULT_JPEG_QUALITY, DirectorySink};
use serde::{Deserialize, Serialize};
use skycam_driver::{AcquisitionSettings, CaptureError, ControllerConfig, OutputFormat, SinkError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// 配置文件错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 输出设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// 照片与序列的保存目录
    pub directory: PathBuf,
    pub format: OutputFormat,
    /// JPEG 质量（1-100）
    pub jpeg_quality: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("captures"),
            format: OutputFormat::Jpeg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl OutputConfig {
    /// 按输出设置创建目录 sink
    pub fn sink(&self) -> Result<DirectorySink, SinkError> {
        Ok(DirectorySink::new(&self.directory)?.with_jpeg_quality(self.jpeg_quality))
    }
}

/// 服务配置（整个文件）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub controller: ControllerConfig,
    /// 连接时使用的初始采集参数
    pub settings: AcquisitionSettings,
    pub output: OutputConfig,
}

impl ServiceConfig {
    /// 默认配置文件路径
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("skycam").join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// 从文件加载配置（文件不存在时返回默认配置）
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            },
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            },
        };
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// 保存配置到文件（自动创建父目录）
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_error)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 检查各部分的一致性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: CaptureError| ConfigError::Invalid(e.to_string());
        self.controller.validate().map_err(invalid)?;
        self.settings.validate(None).map_err(invalid)?;
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.output.jpeg_quality
            )));
        }
        Ok(())
    }
}

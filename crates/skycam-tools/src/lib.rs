//! # Skycam Tools - 应用层协作组件
//!
//! **依赖原则**: 只依赖 `skycam-driver`，不直接访问设备端口
//!
//! ## 包含模块
//!
//! - `sink` - 目录持久化（JPEG / PNG / TIFF 编码）
//! - `config` - 服务配置文件（TOML）

pub mod config;
pub mod sink;

// 重新导出常用类型
pub use config::{ConfigError, OutputConfig, ServiceConfig};
pub use sink::DirectorySink;

//! 公共参数与辅助函数

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use skycam_driver::{BackendKind, BoxedPort, Camera, CameraBuilder, ImageType};
use skycam_tools::ServiceConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 连接相关的全局参数（覆盖配置文件）
#[derive(Args, Debug)]
pub struct CameraArgs {
    /// 配置文件路径（默认 <config_dir>/skycam/config.toml）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 后端（auto / asi / sim）
    #[arg(long, global = true, default_value = "auto")]
    pub backend: BackendKind,

    /// 使用模拟相机（等同于 --backend sim）
    #[arg(long, global = true)]
    pub simulate: bool,

    /// 相机序号
    #[arg(long, global = true, default_value_t = 0)]
    pub index: usize,

    /// 增益
    #[arg(long, global = true)]
    pub gain: Option<i64>,

    /// 单次曝光时间（微秒）
    #[arg(long, global = true)]
    pub exposure_us: Option<u64>,

    /// 输出目录
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,
}

impl CameraArgs {
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => ServiceConfig::default_path().context("无法确定配置文件路径"),
        }
    }

    /// 加载配置文件并应用命令行覆盖
    pub fn load_config(&self) -> Result<ServiceConfig> {
        let path = self.config_path()?;
        let mut config = ServiceConfig::load(&path)
            .with_context(|| format!("加载配置失败: {}", path.display()))?;

        if let Some(gain) = self.gain {
            config.settings.gain = gain;
        }
        if let Some(us) = self.exposure_us {
            config.settings.photo_exposure_us = us;
        }
        if let Some(dir) = &self.output {
            config.output.directory = dir.clone();
        }
        config.validate().context("参数不合法")?;
        Ok(config)
    }

    pub fn backend(&self) -> BackendKind {
        if self.simulate {
            BackendKind::Simulated
        } else {
            self.backend
        }
    }

    /// 打开并连接相机
    pub fn open_camera(&self, config: &ServiceConfig) -> Result<Camera<BoxedPort>> {
        let camera = CameraBuilder::new()
            .backend(self.backend())
            .camera_index(self.index)
            .config(config.controller.clone())
            .settings(config.settings.clone())
            .connect_on_build(true)
            .build()
            .context("连接相机失败")?;
        if let Some(info) = camera.info() {
            println!(
                "✅ 已连接: {} ({}x{}, {})",
                info.name,
                info.max_width,
                info.max_height,
                if info.is_color { "color" } else { "mono" }
            );
        }
        Ok(camera)
    }
}

/// 像素格式参数
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Raw8,
    Rgb24,
    Raw16,
    Y8,
}

impl From<PixelFormat> for ImageType {
    fn from(format: PixelFormat) -> Self {
        match format {
            PixelFormat::Raw8 => ImageType::Raw8,
            PixelFormat::Rgb24 => ImageType::Rgb24,
            PixelFormat::Raw16 => ImageType::Raw16,
            PixelFormat::Y8 => ImageType::Y8,
        }
    }
}

/// 安装 Ctrl-C 处理，返回中断标志
pub fn install_interrupt() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal. Stopping...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("设置 Ctrl-C 处理失败")?;
    Ok(interrupted)
}

/// 可被中断的等待，返回是否被中断
pub fn sleep_unless(interrupted: &AtomicBool, total: Duration) -> bool {
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < total {
        if interrupted.load(Ordering::SeqCst) {
            return true;
        }
        let chunk = step.min(total - waited);
        std::thread::sleep(chunk);
        waited += chunk;
    }
    interrupted.load(Ordering::SeqCst)
}

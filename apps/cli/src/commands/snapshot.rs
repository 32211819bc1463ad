//! 拍照命令

use crate::utils::{CameraArgs, PixelFormat};
use anyhow::{Context, Result};
use clap::Args;
use skycam_driver::sequence::frame_file_name;
use skycam_driver::{FrameSink, OutputFormat};

/// 拍照命令参数
#[derive(Args, Debug)]
pub struct SnapshotCommand {
    /// 输出格式（jpeg / png / tiff，覆盖配置）
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// 像素格式（覆盖配置）
    #[arg(long, value_enum)]
    pub pixel_format: Option<PixelFormat>,
}

impl SnapshotCommand {
    pub fn execute(&self, args: &CameraArgs) -> Result<()> {
        let mut config = args.load_config()?;
        if let Some(pixel_format) = self.pixel_format {
            config.settings.pixel_format = pixel_format.into();
        }
        let format = self.format.unwrap_or(config.output.format);
        let sink = config.output.sink().context("创建输出目录失败")?;

        let camera = args.open_camera(&config)?;
        let settings = camera.settings();
        println!(
            "⏳ 曝光中 ({} us, gain {}, {:?})...",
            settings.photo_exposure_us, settings.gain, settings.pixel_format
        );

        let frame = camera.capture_snapshot().context("拍照失败")?;
        let name = frame_file_name(
            &frame.captured_at,
            1,
            1,
            settings.gain,
            settings.photo_exposure_us,
            format,
        );
        sink.write(&frame, &name, format).context("保存照片失败")?;
        println!(
            "✅ 已保存 {}x{}: {}",
            frame.width,
            frame.height,
            sink.path_for(&name).display()
        );

        camera.disconnect().context("断开相机失败")?;
        Ok(())
    }
}

//! 序列拍摄命令
//!
//! Ctrl-C 协作取消：当前曝光完成后停止。

use crate::utils::{CameraArgs, PixelFormat, install_interrupt, sleep_unless};
use anyhow::{Context, Result, bail};
use clap::Args;
use skycam_driver::{OutputFormat, SequenceJob};
use std::sync::Arc;
use std::time::Duration;

/// 序列命令参数
#[derive(Args, Debug)]
pub struct SequenceCommand {
    /// 帧数
    #[arg(short = 'n', long)]
    pub count: u32,

    /// 帧间隔（毫秒），0 表示快速模式
    #[arg(short, long, default_value_t = 0)]
    pub interval_ms: u64,

    /// 输出格式（jpeg / png / tiff，覆盖配置）
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// 本次序列的像素格式
    #[arg(long, value_enum)]
    pub pixel_format: Option<PixelFormat>,

    /// 序列期间保持视频流（每帧前后暂停/恢复）
    #[arg(long)]
    pub with_stream: bool,
}

impl SequenceCommand {
    pub fn execute(&self, args: &CameraArgs) -> Result<()> {
        if self.count == 0 {
            bail!("帧数必须至少为 1");
        }
        let config = args.load_config()?;
        let sink = config.output.sink().context("创建输出目录失败")?;
        let interrupted = install_interrupt()?;

        let mut job = SequenceJob::new(self.count, Arc::new(sink.clone()))
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_output_format(self.format.unwrap_or(config.output.format));
        if let Some(pixel_format) = self.pixel_format {
            job = job.with_pixel_format(pixel_format.into());
        }

        let camera = args.open_camera(&config)?;
        if self.with_stream {
            camera.start_streaming().context("启动视频流失败")?;
        }
        camera.start_sequence(job).context("启动序列失败")?;
        println!(
            "⏳ 序列开始: {} 帧 → {}",
            self.count,
            sink.dir().display()
        );

        let mut reported = 0;
        let status = loop {
            let status = camera.sequence_status();
            if status.completed + status.failed != reported {
                reported = status.completed + status.failed;
                println!(
                    "📷 {}/{} (失败 {}, 保存失败 {})",
                    status.completed, status.total, status.failed, status.save_errors
                );
            }
            if !status.active {
                break status;
            }
            if sleep_unless(&interrupted, Duration::from_millis(200)) {
                println!("⏳ 正在取消（等待当前曝光完成）...");
                break camera.stop_sequence().context("取消序列失败")?;
            }
        };

        println!(
            "✅ 序列结束: 完成 {}/{}, 失败 {}, 保存失败 {}",
            status.completed, status.total, status.failed, status.save_errors
        );
        if let Some(error) = &status.last_error {
            println!("⚠️  最近错误: {}", error);
        }
        camera.disconnect().context("断开相机失败")?;
        Ok(())
    }
}

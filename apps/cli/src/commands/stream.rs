//! 视频流预览命令
//!
//! 按固定间隔把最新帧写成 `preview.jpg`，直到时长结束或 Ctrl-C。

use crate::utils::{CameraArgs, install_interrupt, sleep_unless};
use anyhow::{Context, Result};
use clap::Args;
use skycam_driver::{FrameSink, OutputFormat};
use std::time::{Duration, Instant};
use tracing::warn;

const PREVIEW_NAME: &str = "preview.jpg";

/// 预览命令参数
#[derive(Args, Debug)]
pub struct StreamCommand {
    /// 预览时长（秒），0 表示直到 Ctrl-C
    #[arg(short, long, default_value_t = 10)]
    pub duration: u64,

    /// 预览刷新间隔（毫秒）
    #[arg(long, default_value_t = 1000)]
    pub preview_interval_ms: u64,
}

impl StreamCommand {
    pub fn execute(&self, args: &CameraArgs) -> Result<()> {
        let config = args.load_config()?;
        let sink = config.output.sink().context("创建输出目录失败")?;
        let interrupted = install_interrupt()?;

        let camera = args.open_camera(&config)?;
        camera.start_streaming().context("启动视频流失败")?;
        println!("✅ 视频流已启动，预览: {}", sink.path_for(PREVIEW_NAME).display());

        let start = Instant::now();
        let limit = (self.duration > 0).then(|| Duration::from_secs(self.duration));
        let interval = Duration::from_millis(self.preview_interval_ms.max(1));
        let mut last_written = 0;

        loop {
            if sleep_unless(&interrupted, interval) {
                break;
            }
            if let Some(frame) = camera.latest_frame()
                && frame.sequence != last_written
            {
                match sink.write(&frame, PREVIEW_NAME, OutputFormat::Jpeg) {
                    Ok(()) => last_written = frame.sequence,
                    Err(e) => warn!("Failed to write preview: {}", e),
                }
            }
            let metrics = camera.metrics();
            println!(
                "📷 frames: {}, pull errors: {}, timeouts: {}",
                metrics.frames_streamed, metrics.pull_errors, metrics.pull_timeouts
            );
            if limit.is_some_and(|limit| start.elapsed() >= limit) {
                println!("⏱️  达到时长限制");
                break;
            }
        }

        camera.stop_streaming().context("停止视频流失败")?;
        let metrics = camera.metrics();
        println!(
            "✅ 视频流已停止: {} 帧, 错误率 {:.2}%",
            metrics.frames_streamed,
            metrics.pull_error_rate() * 100.0
        );
        camera.disconnect().context("断开相机失败")?;
        Ok(())
    }
}

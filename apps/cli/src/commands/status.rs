//! 状态命令

use crate::utils::CameraArgs;
use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

/// 状态命令参数
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub fn execute(&self, args: &CameraArgs) -> Result<()> {
        let config = args.load_config()?;
        let camera = args.open_camera(&config)?;
        let info = camera.info().context("相机未连接")?;
        let temperature = camera.sensor_temperature().ok();
        let status = camera.status();
        let settings = camera.settings();

        if self.json {
            let report = json!({
                "camera": {
                    "name": info.name,
                    "id": info.id,
                    "max_width": info.max_width,
                    "max_height": info.max_height,
                    "is_color": info.is_color,
                    "bit_depth": info.bit_depth,
                    "pixel_size_um": info.pixel_size_um,
                },
                "temperature_c": temperature,
                "settings": settings,
                "status": status,
                "metrics": camera.metrics(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Camera:      {} (id {})", info.name, info.id);
            println!(
                "Sensor:      {}x{}, {} bit, {:.2} µm, {}",
                info.max_width,
                info.max_height,
                info.bit_depth,
                info.pixel_size_um,
                if info.is_color { "color" } else { "mono" }
            );
            match temperature {
                Some(t) => println!("Temperature: {:.1} °C", t),
                None => println!("Temperature: (unavailable)"),
            }
            println!("Mode:        {}", status.mode);
            println!(
                "Settings:    gain {}, exposure {} us, video ceiling {} us, {}x{} bin{} {:?}",
                settings.gain,
                settings.photo_exposure_us,
                settings.video_exposure_ceiling_us,
                settings.width,
                settings.height,
                settings.bin,
                settings.pixel_format
            );
            let metrics = camera.metrics();
            println!(
                "Exposures:   {} total ({} failed, {} timed out)",
                metrics.exposures_total(),
                metrics.exposures_failed,
                metrics.exposures_timed_out
            );
            println!(
                "Stream:      {} frames, {:.1}% pull errors",
                metrics.frames_streamed,
                metrics.pull_error_rate()
            );
            if let Some(fault) = &status.fault {
                println!("Last fault:  {}", fault);
            }
        }

        camera.disconnect().context("断开相机失败")?;
        Ok(())
    }
}

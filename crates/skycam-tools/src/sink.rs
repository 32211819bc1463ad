//! # 目录持久化
//!
//! 把帧编码为图像容器写入目录。先写临时文件再重命名，
//! 读取方不会看到写了一半的文件。

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder};
use skycam_driver::{Frame, FrameSink, OutputFormat, PixelLayout, SinkError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// JPEG 默认质量
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// 写入目录的 sink
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    jpeg_quality: u8,
}

impl DirectorySink {
    /// 创建 sink（目录不存在时自动创建）
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        })
    }

    /// JPEG 质量（1-100，超出范围会被截断）
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    fn encode<W: Write + std::io::Seek>(
        &self,
        writer: W,
        frame: &Frame,
        format: OutputFormat,
    ) -> Result<(), SinkError> {
        let color = match frame.layout {
            PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
            PixelLayout::Gray8 => ExtendedColorType::L8,
        };
        let result = match format {
            OutputFormat::Jpeg => JpegEncoder::new_with_quality(writer, self.jpeg_quality)
                .write_image(&frame.data, frame.width, frame.height, color),
            OutputFormat::Png => {
                PngEncoder::new(writer).write_image(&frame.data, frame.width, frame.height, color)
            },
            OutputFormat::Tiff => {
                TiffEncoder::new(writer).write_image(&frame.data, frame.width, frame.height, color)
            },
        };
        result.map_err(|e| SinkError::Encode(e.to_string()))
    }
}

impl FrameSink for DirectorySink {
    fn write(&self, frame: &Frame, file_name: &str, format: OutputFormat) -> Result<(), SinkError> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(SinkError::Unsupported(format!("invalid file name: {file_name:?}")));
        }
        let expected = frame.width as usize * frame.height as usize * frame.layout.channels();
        if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
            return Err(SinkError::Unsupported(format!(
                "frame {}x{} with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        let path = self.path_for(file_name);
        let partial = self.path_for(&format!(".{file_name}.partial"));
        let written = File::create(&partial)
            .map_err(SinkError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                self.encode(&mut writer, frame, format)?;
                writer.flush()?;
                Ok(())
            })
            .and_then(|()| fs::rename(&partial, &path).map_err(SinkError::from));
        if written.is_err() {
            let _ = fs::remove_file(&partial);
        }
        written?;

        debug!("Frame #{} written to {}", frame.sequence, path.display());
        Ok(())
    }
}

//! 帧与最新帧发布槽
//!
//! 视频流线程和曝光控制器都把解码后的帧写入同一个 [`FrameSlot`]。
//! 帧一经发布即不可变，读者拿到的是 `Arc<Frame>` 快照，不会看到写了一半的帧。

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Local};
use skycam_port::{ImageType, PortError, RoiFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 解码后的像素布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 三通道打包，每通道 8 位
    Rgb8,
    /// 单通道 8 位
    Gray8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb8 => 3,
            Self::Gray8 => 1,
        }
    }
}

/// 帧来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Stream,
    Exposure,
}

/// 解码后的帧
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// 设备输出的原始像素格式
    pub image_type: ImageType,
    pub data: Vec<u8>,
    /// 发布序号（发布前为 0）
    pub sequence: u64,
    pub captured_at: DateTime<Local>,
    pub source: FrameSource,
}

impl Frame {
    /// 把设备原始缓冲区解码为帧
    ///
    /// - `Rgb24`: 原样复制
    /// - `Raw8` / `Y8`: 单通道，Bayer 原始数据按灰度处理（不做去马赛克）
    /// - `Raw16`: 小端 16 位，截断为高 8 位
    pub fn decode(format: RoiFormat, raw: &[u8], source: FrameSource) -> Result<Self, PortError> {
        let expected = format.buffer_len();
        if raw.len() != expected {
            return Err(PortError::InvalidSize {
                expected,
                actual: raw.len(),
            });
        }

        let (layout, data) = match format.image_type {
            ImageType::Rgb24 => (PixelLayout::Rgb8, raw.to_vec()),
            ImageType::Raw8 | ImageType::Y8 => (PixelLayout::Gray8, raw.to_vec()),
            ImageType::Raw16 => (
                PixelLayout::Gray8,
                raw.chunks_exact(2).map(|px| px[1]).collect(),
            ),
        };

        Ok(Self {
            width: format.width,
            height: format.height,
            layout,
            image_type: format.image_type,
            data,
            sequence: 0,
            captured_at: Local::now(),
            source,
        })
    }

    /// 坐标 (x, y) 处的像素（越界返回 None）
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let channels = self.layout.channels();
        let start = (y as usize * self.width as usize + x as usize) * channels;
        self.data.get(start..start + channels)
    }
}

/// 最新帧发布槽（最后写入者胜出）
///
/// 整帧原子替换，读取无锁。
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: ArcSwapOption<Frame>,
    sequence: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布一帧，分配递增序号
    pub fn publish(&self, mut frame: Frame) -> Arc<Frame> {
        frame.sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = Arc::new(frame);
        self.current.store(Some(frame.clone()));
        frame
    }

    /// 最新帧快照
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.current.load_full()
    }

    /// 已发布的帧数
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

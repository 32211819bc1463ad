//! 参数与时序配置的属性测试
//!
//! 使用 proptest 验证尺寸补全与各类等待上限的数学性质。

use proptest::prelude::*;
use skycam_driver::sequence::frame_file_name;
use skycam_driver::{AcquisitionSettings, CameraInfo, ControllerConfig, ImageType, OutputFormat};
use std::time::Duration;

fn sensor(max_width: u32, max_height: u32) -> CameraInfo {
    CameraInfo {
        name: "prop".to_string(),
        id: 1,
        max_width,
        max_height,
        is_color: true,
        bit_depth: 12,
        supported_bins: vec![1, 2],
        supported_formats: vec![ImageType::Raw8, ImageType::Rgb24, ImageType::Raw16],
        pixel_size_um: 2.9,
    }
}

proptest! {
    /// 补全后的尺寸总能通过传感器校验
    #[test]
    fn fitted_geometry_is_valid(
        max_width in 16u32..6000,
        max_height in 4u32..4000,
        width_blocks in 0u32..800,
        height_pairs in 0u32..2000,
        bin in 1u32..=2,
    ) {
        let settings = AcquisitionSettings {
            width: width_blocks * 8,
            height: height_pairs * 2,
            bin,
            ..Default::default()
        };
        let fitted = settings.fit_to(&sensor(max_width, max_height));
        prop_assert!(fitted.width > 0 && fitted.height > 0);
        prop_assert!(fitted.width * bin <= max_width);
        prop_assert!(fitted.height * bin <= max_height);
        prop_assert!(fitted.validate(Some(&sensor(max_width, max_height))).is_ok());
    }

    /// 取帧超时总在 [min, max] 内
    #[test]
    fn pull_timeout_is_clamped(
        exposure_us in 0u64..60_000_000,
        min_ms in 1u64..1000,
        extra_ms in 0u64..5000,
        margin_ms in 0u64..2000,
    ) {
        let config = ControllerConfig {
            stream_pull_min_ms: min_ms,
            stream_pull_max_ms: min_ms + extra_ms,
            stream_pull_margin_ms: margin_ms,
            ..Default::default()
        };
        let timeout = config.pull_timeout(Duration::from_micros(exposure_us));
        prop_assert!(timeout >= Duration::from_millis(min_ms));
        prop_assert!(timeout <= Duration::from_millis(min_ms + extra_ms));
    }

    /// 快速模式的帧间等待不短于下限，也不短于曝光本身
    #[test]
    fn fast_pacing_covers_exposure(exposure_us in 0u64..10_000_000) {
        let config = ControllerConfig::default();
        let exposure = Duration::from_micros(exposure_us);
        let pause = config.fast_pacing(exposure);
        prop_assert!(pause >= Duration::from_millis(config.fast_pacing_floor_ms));
        prop_assert!(pause >= exposure);
        prop_assert!(config.exposure_deadline(exposure) > exposure);
    }

    /// 序号零填充到 4 位，按序号排序即按拍摄顺序
    #[test]
    fn file_names_sort_by_index(a in 1u32..9999, b in 1u32..9999) {
        let at = chrono::Local::now();
        let name_a = frame_file_name(&at, a, 9999, 50, 1000, OutputFormat::Png);
        let name_b = frame_file_name(&at, b, 9999, 50, 1000, OutputFormat::Png);
        prop_assert_eq!(a.cmp(&b), name_a.cmp(&name_b));
        prop_assert!(name_a.ends_with(".png"));
    }
}

//! 视频流容错测试
//!
//! 取帧错误只计数并节流报告，超时不算错误，循环从不终止。

mod common;

use common::*;
use skycam_driver::{FrameSource, Mode};

#[test]
fn test_pull_errors_are_throttled_and_recovered() {
    let (camera, sim) = connected_camera();
    sim.inject_pull_errors(10);
    camera.start_streaming().unwrap();

    assert!(wait_until(|| {
        let m = camera.metrics();
        m.pull_errors == 10 && m.frames_streamed >= 1
    }));

    let metrics = camera.metrics();
    // 第 1 次和第 10 次报告
    assert_eq!(metrics.pull_errors_reported, 2);
    assert_eq!(metrics.consecutive_pull_errors, 0);
    assert!(metrics.pull_error_rate() > 0.0);
    assert_eq!(camera.mode(), Mode::Streaming);

    camera.stop_streaming().unwrap();
}

#[test]
fn test_pull_timeouts_are_not_errors() {
    let (camera, sim) = connected_camera();
    camera.start_streaming().unwrap();
    assert!(wait_until(|| camera.metrics().frames_streamed >= 1));

    sim.inject_pull_timeouts(9);
    assert!(wait_until(|| camera.metrics().pull_timeouts == 9));
    let before = camera.metrics().frames_streamed;
    assert!(wait_until(|| camera.metrics().frames_streamed > before));

    let metrics = camera.metrics();
    assert_eq!(metrics.pull_errors, 0);
    assert_eq!(metrics.pull_errors_reported, 0);
    assert_eq!(
        camera.latest_frame().map(|f| f.source),
        Some(FrameSource::Stream)
    );

    camera.stop_streaming().unwrap();
    assert!(sim.violations().is_empty());
}

#[test]
fn test_stream_stop_is_prompt_even_with_timeouts() {
    let (camera, sim) = connected_camera();
    sim.inject_pull_timeouts(1000);
    camera.start_streaming().unwrap();
    assert!(wait_until(|| camera.metrics().pull_timeouts >= 1));

    let started = std::time::Instant::now();
    camera.stop_streaming().unwrap();
    // 最多一个取帧超时（上限 50 ms）加上循环间隔
    assert!(started.elapsed() < std::time::Duration::from_millis(500));
    assert!(!sim.is_video_active());
}

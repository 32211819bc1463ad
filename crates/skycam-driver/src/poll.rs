//! 有界轮询
//!
//! 空闲等待、曝光等待、视频流停止等待共用同一个轮询抽象：
//! 固定间隔探测，超过上限返回 [`PollError::TimedOut`]。

use std::convert::Infallible;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::error;

/// 轮询策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// 探测间隔
    pub interval: Duration,
    /// 总等待上限
    pub deadline: Duration,
}

/// 轮询失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError<E> {
    /// 在上限内未满足条件
    TimedOut { elapsed: Duration },
    /// 探测本身返回错误（立即终止）
    Probe(E),
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// 反复调用 `probe` 直到返回 `Some`
    ///
    /// `probe` 至少调用一次；最后一次探测发生在上限到达时。
    ///
    /// # Example
    ///
    /// ```
    /// use skycam_driver::{PollError, PollPolicy};
    /// use std::time::Duration;
    ///
    /// let policy = PollPolicy::new(Duration::from_millis(1), Duration::from_millis(50));
    /// let mut n = 0;
    /// let value = policy.poll(|| {
    ///     n += 1;
    ///     Ok::<_, ()>((n == 3).then_some(n))
    /// });
    /// assert_eq!(value, Ok(3));
    /// ```
    pub fn poll<T, E>(
        &self,
        mut probe: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<T, PollError<E>> {
        let start = Instant::now();
        loop {
            if let Some(value) = probe().map_err(PollError::Probe)? {
                return Ok(value);
            }
            let elapsed = start.elapsed();
            if elapsed >= self.deadline {
                return Err(PollError::TimedOut { elapsed });
            }
            spin_sleep::sleep(self.interval.min(self.deadline - elapsed));
        }
    }
}

/// 有界等待后台线程退出
///
/// 返回 false 表示线程在上限内没有退出（线程被分离，由其自行结束）。
pub(crate) fn join_within<T>(handle: JoinHandle<T>, policy: PollPolicy, name: &str) -> bool {
    let exited = policy.poll(|| Ok::<_, Infallible>(handle.is_finished().then_some(())));
    match exited {
        Ok(()) => {
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
            true
        },
        Err(PollError::TimedOut { elapsed }) => {
            error!("{} thread failed to shut down within {:?}", name, elapsed);
            false
        },
        Err(PollError::Probe(never)) => match never {},
    }
}

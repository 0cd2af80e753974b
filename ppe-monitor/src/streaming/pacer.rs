// 输出帧率控制
//
// 限制广播循环的输出速率，不超过目标帧率。

use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 帧率控制器
pub struct FrameRatePacer {
    /// 目标帧率（帧/秒）
    target_fps: f64,
    /// 帧间隔
    frame_interval: Duration,
    /// 本周期开始时间
    cycle_started: Option<Instant>,
}

impl FrameRatePacer {
    /// 创建帧率控制器
    ///
    /// # 参数
    ///
    /// * `target_fps` - 目标帧率（帧/秒），非正数时按30fps处理
    pub fn new(target_fps: f64) -> Self {
        let target_fps = if target_fps > 0.0 { target_fps } else { 30.0 };
        let frame_interval = Duration::from_secs_f64(1.0 / target_fps);

        info!(
            "Creating FrameRatePacer: target_fps={:.2}, interval={:.3}ms",
            target_fps,
            frame_interval.as_secs_f64() * 1000.0
        );

        Self {
            target_fps,
            frame_interval,
            cycle_started: None,
        }
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// 标记一个周期开始
    pub fn begin_cycle(&mut self) {
        self.cycle_started = Some(Instant::now());
    }

    /// 距离下一周期还需等待的时间
    ///
    /// 本周期处理耗时已超过帧间隔时返回零。
    pub fn delay_until_next(&self) -> Duration {
        let Some(started) = self.cycle_started else {
            return Duration::ZERO;
        };

        let elapsed = started.elapsed();
        if elapsed >= self.frame_interval {
            debug!(
                "Cycle overran frame interval by {:.3}ms",
                (elapsed - self.frame_interval).as_secs_f64() * 1000.0
            );
            Duration::ZERO
        } else {
            self.frame_interval - elapsed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_fps() {
        let pacer = FrameRatePacer::new(30.0);
        let interval = pacer.frame_interval().as_secs_f64();
        assert!((interval - 1.0 / 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_fps_defaults() {
        let pacer = FrameRatePacer::new(0.0);
        assert_eq!(pacer.target_fps(), 30.0);
    }

    #[test]
    fn test_delay_shrinks_with_elapsed_time() {
        let mut pacer = FrameRatePacer::new(10.0);
        assert_eq!(pacer.delay_until_next(), Duration::ZERO);

        pacer.begin_cycle();
        let delay = pacer.delay_until_next();
        assert!(delay <= Duration::from_millis(100));
        assert!(delay > Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(110));
        assert_eq!(pacer.delay_until_next(), Duration::ZERO);
    }
}

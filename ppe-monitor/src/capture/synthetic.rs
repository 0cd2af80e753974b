// 合成测试画面
//
// 不依赖硬件的采集设备：按目标帧率生成带移动色条的画面。

use super::device::{CaptureDevice, CaptureError};
use image::{Rgb, RgbImage};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_interval: Duration,
    frame_index: u64,
    last_read: Option<Instant>,
    opened: bool,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            frame_index: 0,
            last_read: None,
            opened: false,
        }
    }

    fn render(&self) -> RgbImage {
        let bar_width = (self.width / 8).max(1);
        let offset = (self.frame_index * 4) % self.width as u64;

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let shifted = (x as u64 + offset) % self.width as u64;
            if (shifted as u32) < bar_width {
                Rgb([230, 200, 40])
            } else {
                let shade = (y * 255 / self.height.max(1)) as u8;
                Rgb([40, shade / 2, 90])
            }
        })
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::OpenFailed(format!(
                "invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        self.opened = true;
        info!(
            "Synthetic camera opened: {}x{} @ {:.1}fps",
            self.width,
            self.height,
            1.0 / self.frame_interval.as_secs_f64()
        );
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        if !self.opened {
            return Err(CaptureError::NotOpened);
        }

        // 模拟真实设备按帧率阻塞
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());

        let image = self.render();
        self.frame_index += 1;
        Ok(image)
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

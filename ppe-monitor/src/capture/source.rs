// 采集源
//
// 在独立线程上运行阻塞式采集循环，把最新帧写入单槽缓冲。

use super::device::{CaptureDevice, CaptureError};
use super::frame::{Frame, FrameSlot};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 采集源
///
/// 设备在 `start` 时打开，打开失败直接返回错误。
/// 采集线程退出后把设备交还给 `stop`，由 `stop` 负责释放，保证只释放一次。
pub struct FrameSource {
    /// 设备名称
    device_name: String,
    /// 帧缓冲
    slot: Arc<FrameSlot>,
    /// 停止信号
    shutdown: CancellationToken,
    /// 采集线程句柄
    worker: Option<JoinHandle<Box<dyn CaptureDevice>>>,
}

impl FrameSource {
    /// 打开设备并启动采集线程
    ///
    /// # 参数
    ///
    /// - `device`: 采集设备
    /// - `slot`: 帧缓冲
    /// - `shutdown`: 停止信号（采集循环每次迭代检查）
    /// - `retry_delay`: 读取失败后的等待时间
    pub fn start(
        mut device: Box<dyn CaptureDevice>,
        slot: Arc<FrameSlot>,
        shutdown: CancellationToken,
        retry_delay: Duration,
    ) -> Result<Self, CaptureError> {
        let device_name = device.name().to_string();
        info!("Opening capture device: {}", device_name);
        device.open()?;

        let loop_slot = slot.clone();
        let loop_shutdown = shutdown.clone();
        let worker = thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || capture_loop(device, loop_slot, loop_shutdown, retry_delay))?;

        info!("✓ Capture thread started for {}", device_name);

        Ok(Self {
            device_name,
            slot,
            shutdown,
            worker: Some(worker),
        })
    }

    /// 获取最新帧的副本；尚未采集到帧时返回None
    pub fn get_frame(&self) -> Option<Frame> {
        self.slot.get()
    }

    /// 帧缓冲
    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// 采集线程是否仍在运行
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }

    /// 停止采集并释放设备
    ///
    /// 最多等待 `timeout`。超时则由后台线程在采集循环退出后释放设备。
    ///
    /// # 返回
    ///
    /// 采集线程在超时前退出返回true
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.shutdown.cancel();

        let Some(worker) = self.worker.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if worker.is_finished() {
            release_device(worker, &self.device_name);
            true
        } else {
            warn!(
                "Capture thread for {} did not exit within {:?}, releasing in background",
                self.device_name, timeout
            );
            let device_name = self.device_name.clone();
            thread::spawn(move || release_device(worker, &device_name));
            false
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop(Duration::ZERO);
        }
    }
}

fn release_device(worker: JoinHandle<Box<dyn CaptureDevice>>, device_name: &str) {
    match worker.join() {
        Ok(mut device) => {
            device.release();
            info!("Capture device released: {}", device_name);
        }
        Err(_) => {
            error!("Capture thread for {} panicked", device_name);
        }
    }
}

/// 采集循环
///
/// 读取失败不退出：等待 `retry_delay` 后重试，直到收到停止信号。
fn capture_loop(
    mut device: Box<dyn CaptureDevice>,
    slot: Arc<FrameSlot>,
    shutdown: CancellationToken,
    retry_delay: Duration,
) -> Box<dyn CaptureDevice> {
    let mut sequence = 0u64;
    let mut consecutive_failures = 0u32;

    debug!("Capture loop started for {}", device.name());

    while !shutdown.is_cancelled() {
        match device.read() {
            Ok(image) => {
                if consecutive_failures > 0 {
                    info!(
                        "Capture recovered after {} failed reads ({})",
                        consecutive_failures,
                        device.name()
                    );
                    consecutive_failures = 0;
                }

                sequence += 1;
                slot.publish(Frame::new(sequence, image));

                if sequence % 300 == 0 {
                    debug!("Captured {} frames from {}", sequence, device.name());
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures == 1 || consecutive_failures % 50 == 0 {
                    warn!(
                        "Camera read failed ({} consecutive): {}",
                        consecutive_failures, e
                    );
                } else {
                    debug!("Camera read failed: {}", e);
                }
                thread::sleep(retry_delay);
            }
        }
    }

    info!(
        "Capture loop stopped for {} (total frames: {})",
        device.name(),
        sequence
    );
    device
}

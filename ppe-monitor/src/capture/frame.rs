// 帧与单槽帧缓冲
//
// 采集线程与异步运行时之间唯一的共享对象。

use chrono::{DateTime, Local};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// 采集到的一帧
///
/// 图像数据发布后不可变，读者拿到的是共享只读快照；
/// 需要绘制叠加层时先复制一份再修改。
#[derive(Debug, Clone)]
pub struct Frame {
    /// 采集序号（从1开始递增）
    pub sequence: u64,
    /// 图像数据
    pub image: Arc<RgbImage>,
    /// 采集时间（墙上时钟，用于证据命名）
    pub captured_at: DateTime<Local>,
    /// 采集时间（单调时钟，用于违规计时）
    pub captured_instant: Instant,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self {
            sequence,
            image: Arc::new(image),
            captured_at: Local::now(),
            captured_instant: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 单槽帧缓冲
///
/// 只保存最新一帧，每次采集覆盖。锁只在替换/克隆句柄时持有，
/// 不会跨越采集调用或网络发送。
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布新帧（序号不大于当前帧的旧帧会被忽略）
    pub fn publish(&self, frame: Frame) {
        let mut latest = self.lock();
        if let Some(current) = latest.as_ref() {
            if current.sequence >= frame.sequence {
                return;
            }
        }
        *latest = Some(frame);
    }

    /// 获取最新帧的副本；从未采集过时返回None
    pub fn get(&self) -> Option<Frame> {
        self.lock().clone()
    }

    /// 最新帧序号
    pub fn latest_sequence(&self) -> Option<u64> {
        self.lock().as_ref().map(|frame| frame.sequence)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

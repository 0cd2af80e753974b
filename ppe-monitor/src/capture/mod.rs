// 采集模块
//
// 阻塞式采集设备运行在独立线程上，通过单槽帧缓冲与异步侧交接。

pub mod device;
pub mod frame;
pub mod image_dir;
pub mod source;
pub mod synthetic;

pub use device::{CaptureDevice, CaptureError};
pub use frame::{Frame, FrameSlot};
pub use image_dir::ImageDirCamera;
pub use source::FrameSource;
pub use synthetic::SyntheticCamera;

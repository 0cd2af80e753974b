// 图片目录采集设备
//
// 按文件名顺序循环读取目录中的JPEG/PNG图片，模拟摄像头输入。

use super::device::{CaptureDevice, CaptureError};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use walkdir::WalkDir;

pub struct ImageDirCamera {
    dir: PathBuf,
    files: Vec<PathBuf>,
    index: usize,
    frame_interval: Duration,
    last_read: Option<Instant>,
}

impl ImageDirCamera {
    pub fn new(dir: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            index: 0,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
            last_read: None,
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref(),
        Some("jpg") | Some("jpeg") | Some("png")
    )
}

impl CaptureDevice for ImageDirCamera {
    fn name(&self) -> &str {
        "image-dir"
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        if !self.dir.is_dir() {
            return Err(CaptureError::OpenFailed(format!(
                "{:?} is not a directory",
                self.dir
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::NoImages(self.dir.clone()));
        }

        info!("Image directory opened: {:?} ({} images)", self.dir, files.len());
        self.files = files;
        self.index = 0;
        Ok(())
    }

    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        if self.files.is_empty() {
            return Err(CaptureError::NotOpened);
        }

        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());

        let path = &self.files[self.index];
        self.index = (self.index + 1) % self.files.len();

        debug!("Reading frame from {:?}", path);
        let image = image::open(path)?.to_rgb8();
        Ok(image)
    }

    fn release(&mut self) {
        self.files.clear();
        self.index = 0;
    }
}

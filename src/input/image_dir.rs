//! 图片序列输入
//!
//! 按文件名顺序读取目录中的图片 (png/jpg/jpeg/bmp), 可选限速。

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use super::{Frame, FrameSource, NextFrame, RateLimiter};
use crate::error::CaptureError;

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    seq: u64,
    limiter: RateLimiter,
}

impl ImageSequenceSource {
    pub fn new(dir: impl AsRef<Path>, fps: Option<f32>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(CaptureError::SourceLost(format!(
                "目录不存在: {}",
                dir.display()
            )));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        info!("🖼️ 图片序列: {} ({} 张)", dir.display(), files.len());

        Ok(Self {
            dir,
            files,
            cursor: 0,
            seq: 0,
            limiter: RateLimiter::new(fps),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn name(&self) -> String {
        format!("images:{}", self.dir.display())
    }

    fn next_frame(&mut self) -> Result<NextFrame, CaptureError> {
        let Some(path) = self.files.get(self.cursor).cloned() else {
            return Ok(NextFrame::EndOfStream);
        };
        self.cursor += 1;
        self.limiter.wait();

        let image = image::open(&path)
            .map_err(|e| CaptureError::Decode(format!("{}: {}", path.display(), e)))?
            .to_rgb8();

        self.seq += 1;
        debug!("📷 帧 #{} ← {}", self.seq, path.display());
        Ok(NextFrame::Frame(Frame::new(self.seq, Utc::now(), image)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_reads_images_in_name_order() {
        let dir = std::env::temp_dir().join(format!("redframe-seq-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        for (name, value) in [("b.png", 20u8), ("a.png", 10u8), ("notes.txt", 0u8)] {
            let path = dir.join(name);
            if name.ends_with(".png") {
                RgbImage::from_pixel(4, 3, Rgb([value, 0, 0])).save(&path).unwrap();
            } else {
                std::fs::write(&path, b"skip").unwrap();
            }
        }

        let mut src = ImageSequenceSource::new(&dir, None).unwrap();
        assert_eq!(src.len(), 2);

        let NextFrame::Frame(first) = src.next_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(first.seq, 1);
        assert_eq!(first.image.get_pixel(0, 0)[0], 10);

        let NextFrame::Frame(second) = src.next_frame().unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(second.seq, 2);
        assert_eq!(second.image.get_pixel(0, 0)[0], 20);

        assert!(matches!(src.next_frame(), Ok(NextFrame::EndOfStream)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let err = ImageSequenceSource::new("/definitely/not/here", None).err().unwrap();
        assert!(err.is_fatal());
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use parking_lot::Mutex;

/// One camera image
///
/// Pixel data is shared, so cloning a frame never copies the image. A frame
/// is held only for the duration of one detection attempt.
#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbaImage>,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// Source of the most recent camera frame
///
/// Injected into the throttler; the camera session itself lives outside the
/// crate.
pub trait FrameSource: Send + Sync {
    /// The latest frame, or `None` when the camera has not produced one yet
    fn latest_frame(&self) -> Option<Frame>;
}

/// Single-slot frame holder fed by a camera callback
///
/// Publishing replaces the previous frame; readers always see the newest one.
#[derive(Default)]
pub struct LatestFrameSlot {
    slot: Mutex<Option<Frame>>,
    next_sequence: AtomicU64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, image: RgbaImage) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        *self.slot.lock() = Some(Frame::new(image, sequence));
        sequence
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

impl FrameSource for LatestFrameSlot {
    fn latest_frame(&self) -> Option<Frame> {
        self.slot.lock().clone()
    }
}

/// Replays the images of a directory as a looping camera feed
///
/// Images are decoded once at startup and handed out in file-name order, one
/// per request.
pub struct DirectoryFrameSource {
    frames: Vec<Arc<RgbaImage>>,
    cursor: AtomicUsize,
    sequence: AtomicU64,
}

impl DirectoryFrameSource {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let image = image::open(path)
                .with_context(|| format!("Failed to decode frame {}", path.display()))?
                .to_rgba8();
            tracing::debug!("Loaded frame {} ({}x{})", path.display(), image.width(), image.height());
            frames.push(Arc::new(image));
        }

        if frames.is_empty() {
            return Err(anyhow!("No JPEG or PNG frames found in {}", dir.display()));
        }

        tracing::info!("Replaying {} frames from {}", frames.len(), dir.display());

        Ok(Self {
            frames,
            cursor: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for DirectoryFrameSource {
    fn latest_frame(&self) -> Option<Frame> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Some(Frame {
            image: Arc::clone(&self.frames[index]),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            captured_at: Instant::now(),
        })
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_latest_frame_slot_keeps_newest() {
        let slot = LatestFrameSlot::new();
        assert!(slot.latest_frame().is_none());

        slot.publish(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])));
        let second = slot.publish(RgbaImage::from_pixel(8, 6, Rgba([255, 0, 0, 255])));

        let frame = slot.latest_frame().unwrap();
        assert_eq!(frame.sequence(), second);
        assert_eq!((frame.width(), frame.height()), (8, 6));

        slot.clear();
        assert!(slot.latest_frame().is_none());
    }

    #[test]
    fn test_frame_clone_shares_pixels() {
        let frame = Frame::new(RgbaImage::new(16, 16), 7);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.image(), copy.image()));
        assert_eq!(copy.sequence(), 7);
    }

    #[test]
    fn test_directory_source_cycles_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([10, 10, 10, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbaImage::from_pixel(3, 3, Rgba([20, 20, 20, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirectoryFrameSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let widths: Vec<u32> = (0..4)
            .map(|_| source.latest_frame().unwrap().width())
            .collect();
        assert_eq!(widths, vec![3, 2, 3, 2]);
    }

    #[test]
    fn test_directory_source_requires_images() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectoryFrameSource::open(dir.path()).is_err());
    }
}

//! Frame acquisition and face location boundary.
//!
//! Capture and detection live outside this crate; they plug in through
//! [`FrameSource`] and [`FaceLocator`]. The provided implementations read
//! pre-recorded frames from a directory and treat each frame as one
//! already-cropped face.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// File extensions [`ImageSequenceSource`] picks up.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "pgm", "pnm", "tif"];

/// Fraction of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("can't decode frame {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// A captured grayscale frame.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub captured_at: Instant,
}

impl Frame {
    pub fn from_gray(image: GrayImage, sequence: u32) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// True if more than `threshold_pct` of the pixels are in the darkest bucket (0–31).
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        if self.data.is_empty() {
            return true;
        }
        let dark_count = self.data.iter().filter(|&&p| p < 32).count();
        (dark_count as f32 / self.data.len() as f32) > threshold_pct
    }

    /// Copy out `region`, clipped to the frame. `None` if nothing is left.
    pub fn crop(&self, region: &FaceRegion) -> Option<GrayImage> {
        let r = region.clamp_to(self.width, self.height)?;
        Some(GrayImage::from_fn(r.width, r.height, |x, y| {
            let idx = (r.y + y) as usize * self.width as usize + (r.x + x) as usize;
            Luma([self.data[idx]])
        }))
    }
}

/// Axis-aligned face rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with a `width × height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRegion::new(self.x, self.y, w, h))
    }
}

/// Supplies frames until exhausted.
pub trait FrameSource {
    /// Next frame, `None` at end of stream. A per-frame error does not end the stream.
    fn next_frame(&mut self) -> Option<Result<Frame, AcquisitionError>>;
}

/// Finds faces in a frame. Regions are ordered most prominent first.
pub trait FaceLocator {
    fn locate(&mut self, frame: &Frame) -> Vec<FaceRegion>;
}

/// Treats the whole frame as a single face, for pre-cropped input.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholeFrameLocator;

impl FaceLocator for WholeFrameLocator {
    fn locate(&mut self, frame: &Frame) -> Vec<FaceRegion> {
        if frame.width == 0 || frame.height == 0 {
            return Vec::new();
        }
        vec![FaceRegion::new(0, 0, frame.width, frame.height)]
    }
}

/// Frames read from image files, in file-name order.
pub struct ImageSequenceSource {
    paths: std::vec::IntoIter<PathBuf>,
    sequence: u32,
}

impl ImageSequenceSource {
    /// A directory of frames, or a single image file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AcquisitionError> {
        let path = path.as_ref();
        let paths = if path.is_dir() {
            let entries = std::fs::read_dir(path).map_err(|source| AcquisitionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut paths = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| AcquisitionError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let p = entry.path();
                if is_image_file(&p) {
                    paths.push(p);
                }
            }
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(AcquisitionError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
            });
        };

        tracing::info!(source = %path.display(), frames = paths.len(), "opened image sequence");
        Ok(Self {
            paths: paths.into_iter(),
            sequence: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Option<Result<Frame, AcquisitionError>> {
        let path = self.paths.next()?;
        let sequence = self.sequence;
        self.sequence += 1;

        Some(
            image::open(&path)
                .map(|img| Frame::from_gray(img.to_luma8(), sequence))
                .map_err(|source| AcquisitionError::Decode { path, source }),
        )
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_gray(GrayImage::from_pixel(width, height, Luma([value])), 0)
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(frame(10, 10, 0).is_dark(DARK_FRAME_THRESHOLD));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!frame(10, 10, 128).is_dark(DARK_FRAME_THRESHOLD));
        assert_eq!(frame(10, 10, 128).avg_brightness(), 128.0);
    }

    #[test]
    fn test_crop_inside() {
        let img = GrayImage::from_fn(6, 4, |x, y| Luma([(y * 6 + x) as u8]));
        let f = Frame::from_gray(img, 0);
        let face = f.crop(&FaceRegion::new(2, 1, 3, 2)).unwrap();
        assert_eq!(face.dimensions(), (3, 2));
        assert_eq!(face.get_pixel(0, 0).0[0], 8);
        assert_eq!(face.get_pixel(2, 1).0[0], 16);
    }

    #[test]
    fn test_crop_clipped_to_frame() {
        let f = frame(10, 10, 50);
        let face = f.crop(&FaceRegion::new(8, 8, 5, 5)).unwrap();
        assert_eq!(face.dimensions(), (2, 2));
        assert!(f.crop(&FaceRegion::new(10, 0, 5, 5)).is_none());
    }

    #[test]
    fn test_whole_frame_locator() {
        let f = frame(7, 9, 10);
        assert_eq!(WholeFrameLocator.locate(&f), vec![FaceRegion::new(0, 0, 7, 9)]);
    }

    #[test]
    fn test_image_sequence_sorted() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 4, Luma([20])).save(dir.path().join("b.png")).unwrap();
        GrayImage::from_pixel(5, 5, Luma([10])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut src = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(src.remaining(), 2);
        let first = src.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.sequence), (5, 0));
        let second = src.next_frame().unwrap().unwrap();
        assert_eq!((second.width, second.sequence), (4, 1));
        assert!(src.next_frame().is_none());
    }

    #[test]
    fn test_image_sequence_bad_frame_does_not_end_stream() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), "not a png").unwrap();
        GrayImage::from_pixel(4, 4, Luma([20])).save(dir.path().join("b.png")).unwrap();

        let mut src = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(matches!(src.next_frame(), Some(Err(AcquisitionError::Decode { .. }))));
        assert!(src.next_frame().unwrap().is_ok());
    }

    #[test]
    fn test_image_sequence_missing_source() {
        assert!(ImageSequenceSource::open("/nonexistent/frames").is_err());
    }
}

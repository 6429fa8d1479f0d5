//! Frame difference estimation.
//!
//! Both frames are downsampled to a fixed size, converted to 8-bit luma and
//! compared with the structural similarity index (7x7 uniform window, sample
//! covariance). The score is `1 - SSIM`, clamped to `[0, 1]`: 0 for identical
//! frames, close to 1 for unrelated ones.

use std::path::Path;

use image::imageops::FilterType;
use image::GrayImage;
use tracing::debug;

/// Resolution both frames are reduced to before comparison.
pub const DOWNSAMPLE_SIZE: (u32, u32) = (100, 100);

const WINDOW: usize = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Dissimilarity between two frame files.
///
/// Returns `None` when either file is missing or cannot be decoded; callers
/// treat that as "undetermined", never as motion.
pub fn difference(a: impl AsRef<Path>, b: impl AsRef<Path>) -> Option<f64> {
    let a = load_luma(a.as_ref())?;
    let b = load_luma(b.as_ref())?;
    let ssim = structural_similarity(&a, &b)?;
    Some((1.0 - ssim).clamp(0.0, 1.0))
}

fn load_luma(path: &Path) -> Option<GrayImage> {
    match image::open(path) {
        Ok(img) => Some(
            img.resize_exact(DOWNSAMPLE_SIZE.0, DOWNSAMPLE_SIZE.1, FilterType::Triangle)
                .to_luma8(),
        ),
        Err(e) => {
            debug!("Cannot read frame {}: {}", path.display(), e);
            None
        }
    }
}

/// Mean SSIM of two equally sized grayscale images.
///
/// Returns `None` if the sizes differ or the images are smaller than the
/// comparison window.
pub fn structural_similarity(a: &GrayImage, b: &GrayImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() {
        return None;
    }
    let (w, h) = (a.width() as usize, a.height() as usize);
    if w < WINDOW || h < WINDOW {
        return None;
    }

    let x: Vec<f64> = a.as_raw().iter().map(|&v| f64::from(v)).collect();
    let y: Vec<f64> = b.as_raw().iter().map(|&v| f64::from(v)).collect();

    let sx = Integral::new(w, h, |i| x[i]);
    let sy = Integral::new(w, h, |i| y[i]);
    let sxx = Integral::new(w, h, |i| x[i] * x[i]);
    let syy = Integral::new(w, h, |i| y[i] * y[i]);
    let sxy = Integral::new(w, h, |i| x[i] * y[i]);

    let n = (WINDOW * WINDOW) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for top in 0..=(h - WINDOW) {
        for left in 0..=(w - WINDOW) {
            let ux = sx.window_sum(left, top) / n;
            let uy = sy.window_sum(left, top) / n;
            let uxx = sxx.window_sum(left, top) / n;
            let uyy = syy.window_sum(left, top) / n;
            let uxy = sxy.window_sum(left, top) / n;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    Some(total / count as f64)
}

/// Summed-area table for constant-time window sums.
struct Integral {
    width: usize,
    table: Vec<f64>,
}

impl Integral {
    fn new(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut table = vec![0.0; stride * (height + 1)];
        for row in 0..height {
            let mut row_sum = 0.0;
            for col in 0..width {
                row_sum += value(row * width + col);
                table[(row + 1) * stride + col + 1] = table[row * stride + col + 1] + row_sum;
            }
        }
        Self { width, table }
    }

    fn window_sum(&self, left: usize, top: usize) -> f64 {
        let stride = self.width + 1;
        let (right, bottom) = (left + WINDOW, top + WINDOW);
        self.table[bottom * stride + right] - self.table[top * stride + right]
            - self.table[bottom * stride + left]
            + self.table[top * stride + left]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    fn solid(dir: &TempDir, name: &str, value: u8) -> std::path::PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_pixel(64, 48, Rgb([value, value, value]))
            .save(&path)
            .unwrap();
        path
    }

    fn gradient(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        RgbImage::from_fn(160, 90, |x, y| {
            let v = ((x * 3 + y * 2) % 256) as u8;
            Rgb([v, 255 - v, v / 2])
        })
        .save(&path)
        .unwrap();
        path
    }

    #[test]
    fn test_identical_frames_score_zero() {
        let dir = TempDir::new().unwrap();
        let frame = gradient(&dir, "a.png");
        let score = difference(&frame, &frame).unwrap();
        assert!(score.abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn test_white_vs_black_scores_one() {
        let dir = TempDir::new().unwrap();
        let white = solid(&dir, "white.png", 255);
        let black = solid(&dir, "black.png", 0);
        let score = difference(&white, &black).unwrap();
        assert!(score > 0.99, "score was {score}");
    }

    #[test]
    fn test_missing_frame_is_absent() {
        let dir = TempDir::new().unwrap();
        let frame = gradient(&dir, "a.png");
        assert!(difference(&frame, dir.path().join("missing.png")).is_none());
        assert!(difference(dir.path().join("missing.png"), &frame).is_none());
    }

    #[test]
    fn test_unreadable_frame_is_absent() {
        let dir = TempDir::new().unwrap();
        let frame = gradient(&dir, "a.png");
        let garbage = dir.path().join("broken.png");
        std::fs::write(&garbage, b"not an image").unwrap();
        assert!(difference(&frame, &garbage).is_none());
    }

    #[test]
    fn test_small_change_scores_low() {
        let mut a = GrayImage::from_pixel(100, 100, Luma([120]));
        for x in 0..100 {
            a.put_pixel(x, x, Luma([200]));
        }
        let mut b = a.clone();
        b.put_pixel(50, 10, Luma([0]));
        let ssim = structural_similarity(&a, &b).unwrap();
        assert!(ssim > 0.9 && ssim < 1.0, "ssim was {ssim}");
    }

    #[test]
    fn test_mismatched_sizes() {
        let a = GrayImage::new(10, 10);
        let b = GrayImage::new(12, 10);
        assert!(structural_similarity(&a, &b).is_none());
        assert!(structural_similarity(&GrayImage::new(4, 4), &GrayImage::new(4, 4)).is_none());
    }
}

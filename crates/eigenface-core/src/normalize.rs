//! Face normalization shared by training and recognition.
//!
//! Every face, enrolled or probed, goes through the same steps: grayscale,
//! bilinear resize to the model geometry, global histogram equalization and
//! a fixed Gaussian smoothing pass. Projections are only comparable when
//! both sides were produced by [`normalize`].

use crate::types::FaceGeometry;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use std::path::Path;

/// Taps of the smoothing kernel, applied along both axes.
pub const BLUR_KERNEL_SIZE: usize = 7;

/// Standard deviation of the smoothing kernel, in pixels.
pub const BLUR_SIGMA: f32 = 3.0;

/// Decode an image file and convert it to 8-bit grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, image::ImageError> {
    Ok(image::open(path)?.to_luma8())
}

/// Convert any decoded image to 8-bit grayscale. Already-gray input is copied as is.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    match image {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => other.to_luma8(),
    }
}

/// Bilinear resize to `geometry`; a no-op copy when the size already matches.
pub fn resize_to(image: &GrayImage, geometry: FaceGeometry) -> GrayImage {
    if FaceGeometry::of(image) == geometry {
        return image.clone();
    }
    imageops::resize(image, geometry.width, geometry.height, FilterType::Triangle)
}

/// Run the full normalization pipeline on a grayscale face.
pub fn normalize(image: &GrayImage, geometry: FaceGeometry) -> GrayImage {
    let sized = resize_to(image, geometry);
    let equalized = imageproc::contrast::equalize_histogram(&sized);
    imageproc::filter::separable_filter_equal(&equalized, &blur_kernel(BLUR_KERNEL_SIZE, BLUR_SIGMA))
}

/// Normalized 1-D Gaussian of `size` taps. The kernel is truncated at
/// `size`, not at a multiple of `sigma`.
fn blur_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let center = (size / 2) as f32;
    let weights: Vec<f32> = (0..size)
        .map(|i| {
            let x = i as f32 - center;
            (-(x * x) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

/// Flatten a raster row-major into a float vector of length `width * height`.
pub fn flatten(image: &GrayImage) -> Vec<f32> {
    image.as_raw().iter().map(|&p| p as f32).collect()
}

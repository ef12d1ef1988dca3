use image::{DynamicImage, GrayImage};
use imageproc::contrast::adaptive_threshold;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;

/// Convert frame to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Apply Gaussian blur to suppress sensor noise
pub fn apply_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_f32(img, sigma)
}

/// Locally-thresholded binarization with dark strokes as foreground.
///
/// `adaptive_threshold` marks pixels at least as bright as their local mean;
/// inverting afterwards leaves grid lines and digit strokes white.
pub fn binarize(img: &GrayImage, block_radius: u32) -> GrayImage {
    let mut binary = adaptive_threshold(img, block_radius);
    image::imageops::invert(&mut binary);
    binary
}

/// Morphological closing to bridge small gaps in grid lines
pub fn close_gaps(img: &GrayImage, k: u8) -> GrayImage {
    morphology::close(img, Norm::LInf, k)
}

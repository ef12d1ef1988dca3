pub mod preprocessing;
pub mod quad;

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use log::debug;

use crate::models::{CornerSet, GridDetection};

/// Locates a grid quadrilateral in a raw frame and produces a rectified
/// top-down view of it.
///
/// Detection never panics on malformed input; every failure mode is reported
/// as [`GridDetection::NotFound`].
pub struct GridDetector;

// Detection parameters
const MIN_AREA_RATIO: f64 = 0.1;
const MAX_AREA_RATIO: f64 = 0.9;
const APPROX_EPSILON: f64 = 0.02;
const ASPECT_RATIO_TOLERANCE: f64 = 0.3;
const GAUSSIAN_SIGMA: f32 = 1.1;
const ADAPTIVE_BLOCK_RADIUS: u32 = 5;
const MORPH_RADIUS: u8 = 1;
const GRID_OUTPUT_SIZE: u32 = 450;

impl GridDetector {
    pub fn new() -> Self {
        Self
    }

    /// Rectified output side length in pixels.
    pub fn output_size() -> u32 {
        GRID_OUTPUT_SIZE
    }

    /// Detect a grid in the given frame.
    pub fn detect(&self, frame: &DynamicImage) -> GridDetection {
        if frame.width() == 0 || frame.height() == 0 {
            debug!("frame is empty");
            return GridDetection::NotFound;
        }

        let gray = preprocessing::to_grayscale(frame);
        let blurred = preprocessing::apply_blur(&gray, GAUSSIAN_SIGMA);
        let binary = preprocessing::binarize(&blurred, ADAPTIVE_BLOCK_RADIUS);
        let morphed = preprocessing::close_gaps(&binary, MORPH_RADIUS);

        let contours = find_contours::<i32>(&morphed);
        let frame_area = (frame.width() * frame.height()) as f64;

        let Some(points) = quad::find_largest_quadrilateral(
            &contours,
            frame_area * MIN_AREA_RATIO,
            frame_area * MAX_AREA_RATIO,
            APPROX_EPSILON,
            ASPECT_RATIO_TOLERANCE,
        ) else {
            debug!("no valid quadrilateral found");
            return GridDetection::NotFound;
        };

        let corners = CornerSet::from_unordered(points);

        let Some(rectified) = rectify(&gray, &corners) else {
            debug!("perspective warp failed");
            return GridDetection::NotFound;
        };

        let confidence = corners.squareness();
        debug!("grid detected with confidence {confidence:.3}");

        GridDetection::Found {
            corners,
            rectified,
            confidence,
        }
    }
}

impl Default for GridDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Warp the quadrilateral bounded by `corners` into a fixed-size square.
/// Returns `None` when the four corners admit no perspective transform.
fn rectify(gray: &GrayImage, corners: &CornerSet) -> Option<GrayImage> {
    let [tl, tr, br, bl] = corners.points();
    let size = GRID_OUTPUT_SIZE as f32;

    let from = [(tl.x, tl.y), (tr.x, tr.y), (br.x, br.y), (bl.x, bl.y)];
    let to = [(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)];
    let projection = Projection::from_control_points(from, to)?;

    let mut rectified = GrayImage::new(GRID_OUTPUT_SIZE, GRID_OUTPUT_SIZE);
    warp_into(
        gray,
        &projection,
        Interpolation::Bilinear,
        Luma([0]),
        &mut rectified,
    );
    Some(rectified)
}

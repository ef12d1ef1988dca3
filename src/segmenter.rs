use std::collections::HashMap;

use anyhow::bail;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::region_labelling::{Connectivity, connected_components};
use log::{debug, warn};

use crate::models::CellImage;

/// Slices a rectified grid image into N^2 cell images normalized for
/// classification, row-major.
pub struct GridSegmenter {
    grid_size: usize,
}

/// Border trimmed from each cell to discount grid-line bleed.
const PADDING_RATIO: f64 = 0.15;
/// Foreground blobs smaller than this are treated as noise in an empty cell.
const MIN_BLOB_AREA: u32 = 10;
/// Margin added around a digit's bounding box when re-centering it.
const BLOB_MARGIN: f64 = 1.2;

impl GridSegmenter {
    pub fn new(grid_size: usize) -> anyhow::Result<Self> {
        if !(4..=16).contains(&grid_size) {
            bail!("grid size must be between 4 and 16, got {grid_size}");
        }
        Ok(Self { grid_size })
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Segment the rectified grid into cells. An empty input yields zero
    /// cells, never a panic.
    pub fn segment(&self, rectified: &GrayImage) -> Vec<CellImage> {
        if rectified.width() == 0 || rectified.height() == 0 {
            warn!("rectified grid is empty");
            return Vec::new();
        }

        let cell_px = rectified.width().min(rectified.height()) / self.grid_size as u32;
        if cell_px == 0 {
            warn!(
                "rectified grid {}x{} too small for a {} cell grid",
                rectified.width(),
                rectified.height(),
                self.grid_size
            );
            return Vec::new();
        }

        debug!(
            "segmenting {0}x{0} grid, cell size {1}px",
            self.grid_size, cell_px
        );

        let mut cells = Vec::with_capacity(self.grid_size * self.grid_size);
        for row in 0..self.grid_size {
            for col in 0..self.grid_size {
                let roi = imageops::crop_imm(
                    rectified,
                    col as u32 * cell_px,
                    row as u32 * cell_px,
                    cell_px,
                    cell_px,
                )
                .to_image();
                cells.push(preprocess_cell(&roi));
            }
        }
        cells
    }
}

/// Normalize one cell: trim the border, binarize, re-center the digit and
/// scale to the classifier input size.
fn preprocess_cell(roi: &GrayImage) -> CellImage {
    let trimmed = trim_border(roi, PADDING_RATIO);
    let level = otsu_level(&trimmed);
    let binary = threshold(&trimmed, level, ThresholdType::BinaryInverted);
    let centered = center_digit(&binary);
    let resized = imageops::resize(
        &centered,
        CellImage::SIZE as u32,
        CellImage::SIZE as u32,
        FilterType::CatmullRom,
    );
    CellImage::from_gray(&resized)
}

fn trim_border(img: &GrayImage, ratio: f64) -> GrayImage {
    let pad = (img.height() as f64 * ratio) as u32;
    if pad > 0 && img.width() > 2 * pad && img.height() > 2 * pad {
        imageops::crop_imm(img, pad, pad, img.width() - 2 * pad, img.height() - 2 * pad).to_image()
    } else {
        img.clone()
    }
}

/// Crop a square around the largest foreground blob and center it on a black
/// canvas. Cells without a non-trivial blob (likely empty) pass through.
fn center_digit(binary: &GrayImage) -> GrayImage {
    let labeled = connected_components(binary, Connectivity::Eight, Luma([0u8]));

    // Bounding box and pixel count per blob label.
    let mut blobs: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        if label[0] == 0 {
            continue;
        }
        blobs
            .entry(label[0])
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert((x, y, x, y, 1));
    }

    let Some((min_x, min_y, max_x, max_y, count)) =
        blobs.values().max_by_key(|blob| blob.4).copied()
    else {
        return binary.clone();
    };
    if count < MIN_BLOB_AREA {
        return binary.clone();
    }

    let width = max_x - min_x + 1;
    let height = max_y - min_y + 1;
    let side = ((width.max(height) as f64 * BLOB_MARGIN) as u32)
        .min(binary.width())
        .min(binary.height())
        .max(1);

    let digit = imageops::crop_imm(binary, min_x, min_y, width, height).to_image();
    let mut canvas = GrayImage::from_pixel(side, side, Luma([0]));
    let x = side.saturating_sub(width) / 2;
    let y = side.saturating_sub(height) / 2;
    imageops::replace(&mut canvas, &digit, x as i64, y as i64);
    canvas
}

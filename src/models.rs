use image::GrayImage;
use serde::{Deserialize, Serialize};

/// A point in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// The four corners of a detected grid, ordered clockwise starting from the
/// top-left (minimal x + y) corner.
#[derive(Debug, Clone, PartialEq)]
pub struct CornerSet {
    points: [Point; 4],
}

impl CornerSet {
    /// Order four arbitrary quadrilateral corners clockwise from top-left.
    ///
    /// Sorts by polar angle around the centroid, then rotates the sequence so
    /// the point with the smallest x + y sum comes first.
    pub fn from_unordered(mut points: [Point; 4]) -> Self {
        let cx = points.iter().map(|p| p.x).sum::<f32>() / 4.0;
        let cy = points.iter().map(|p| p.y).sum::<f32>() / 4.0;

        points.sort_by(|a, b| {
            let angle_a = ((a.y - cy) as f64).atan2((a.x - cx) as f64);
            let angle_b = ((b.y - cy) as f64).atan2((b.x - cx) as f64);
            angle_a.total_cmp(&angle_b)
        });

        let top_left = points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let mut ordered = [Point::new(0.0, 0.0); 4];
        for (i, slot) in ordered.iter_mut().enumerate() {
            *slot = points[(top_left + i) % 4];
        }
        Self { points: ordered }
    }

    pub fn points(&self) -> [Point; 4] {
        self.points
    }

    /// Maximum per-corner displacement relative to another corner set.
    pub fn max_displacement(&self, other: &CornerSet) -> f64 {
        self.points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| a.distance(b))
            .fold(0.0, f64::max)
    }

    /// How close the quadrilateral is to a square, in [0, 1].
    ///
    /// Average of the shorter/longer length ratios of the two opposite-side
    /// pairs; 1.0 means perfectly regular.
    pub fn squareness(&self) -> f64 {
        let [tl, tr, br, bl] = &self.points;
        let top = tl.distance(tr);
        let bottom = br.distance(bl);
        let left = tl.distance(bl);
        let right = tr.distance(br);

        let width_similarity = top.min(bottom) / top.max(bottom).max(f64::EPSILON);
        let height_similarity = left.min(right) / left.max(right).max(f64::EPSILON);
        (width_similarity + height_similarity) / 2.0
    }
}

/// Outcome of grid detection on one frame.
///
/// A found grid always carries both its corners and the rectified image;
/// the two never exist without each other.
#[derive(Debug, Clone)]
pub enum GridDetection {
    Found {
        corners: CornerSet,
        rectified: GrayImage,
        confidence: f64,
    },
    NotFound,
}

impl GridDetection {
    pub fn is_found(&self) -> bool {
        matches!(self, GridDetection::Found { .. })
    }

    pub fn corners(&self) -> Option<&CornerSet> {
        match self {
            GridDetection::Found { corners, .. } => Some(corners),
            GridDetection::NotFound => None,
        }
    }
}

/// A single grid cell, normalized for classification: fixed-size,
/// single-channel, intensities in [0, 1].
#[derive(Debug, Clone)]
pub struct CellImage {
    pixels: Vec<f32>,
}

impl CellImage {
    /// Classifier input side length.
    pub const SIZE: usize = 28;

    /// Build from a grayscale image of exactly `SIZE`x`SIZE` pixels.
    pub fn from_gray(img: &GrayImage) -> Self {
        debug_assert_eq!(
            (img.width() as usize, img.height() as usize),
            (Self::SIZE, Self::SIZE)
        );
        Self {
            pixels: img.pixels().map(|p| p[0] as f32 / 255.0).collect(),
        }
    }

    pub fn from_pixels(pixels: Vec<f32>) -> Self {
        Self { pixels }
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn mean(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().sum::<f32>() / self.pixels.len() as f32
    }

    pub fn stddev(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .pixels
            .iter()
            .map(|p| {
                let d = p - mean;
                d * d
            })
            .sum::<f32>()
            / self.pixels.len() as f32;
        var.sqrt()
    }
}

/// Classification of one cell: digit 0 means "empty cell", not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub cell_index: usize,
    pub digit: u8,
    pub confidence: f32,
}

impl Classification {
    /// An empty cell is a fully confident non-classification.
    pub fn empty(cell_index: usize) -> Self {
        Self {
            cell_index,
            digit: 0,
            confidence: 1.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.digit == 0
    }
}

/// An N x N matrix of recognized digits; 0 denotes an unfilled cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    size: usize,
    cells: Vec<u8>,
}

impl Board {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![0; size * size],
        }
    }

    /// Assemble a board from per-cell classifications (row-major indices).
    pub fn from_classifications(size: usize, classifications: &[Classification]) -> Self {
        let mut board = Self::new(size);
        for c in classifications {
            if c.cell_index < board.cells.len() {
                board.cells[c.cell_index] = c.digit;
            }
        }
        board
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row * self.size + col]
    }

    pub fn set(&mut self, row: usize, col: usize, digit: u8) {
        self.cells[row * self.size + col] = digit;
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells
    }
}

/// State of the recognition process.
///
/// The board only exists on `Completed`; the other states cannot carry one.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionState {
    /// Looking for a grid.
    Scanning,
    /// Grid detected but not yet stable.
    Detected,
    /// Multi-frame verification in progress.
    Verifying { frames: u32 },
    /// Grid confirmed; digit extraction running.
    Confirmed,
    /// Board recognition finished.
    Completed { board: Board, confidence: f64 },
    /// Something unexpected failed; clears on the next good frame.
    Error,
}

/// The externally observable unit of recognition state, republished
/// wholesale on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub state: RecognitionState,
    pub message: String,
}

impl RecognitionResult {
    pub fn scanning(message: impl Into<String>) -> Self {
        Self {
            state: RecognitionState::Scanning,
            message: message.into(),
        }
    }

    pub fn detected(message: impl Into<String>) -> Self {
        Self {
            state: RecognitionState::Detected,
            message: message.into(),
        }
    }

    pub fn verifying(message: impl Into<String>, frames: u32) -> Self {
        Self {
            state: RecognitionState::Verifying { frames },
            message: message.into(),
        }
    }

    pub fn confirmed(message: impl Into<String>) -> Self {
        Self {
            state: RecognitionState::Confirmed,
            message: message.into(),
        }
    }

    pub fn completed(board: Board, confidence: f64) -> Self {
        Self {
            state: RecognitionState::Completed { board, confidence },
            message: "Board recognized successfully".into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            state: RecognitionState::Error,
            message: message.into(),
        }
    }

    pub fn board(&self) -> Option<&Board> {
        match &self.state {
            RecognitionState::Completed { board, .. } => Some(board),
            _ => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match &self.state {
            RecognitionState::Completed { confidence, .. } => *confidence,
            _ => 0.0,
        }
    }
}

mod backend;

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::thread;

use log::{debug, error, warn};

pub use backend::{ClassifierBackend, NUM_CLASSES, PlaceholderBackend, RtenBackend};

use crate::models::{CellImage, Classification};

/// Cells whose mean and standard deviation both fall below this are empty
/// without ever reaching the model.
const EMPTY_CELL_THRESHOLD: f32 = 0.05;
/// Minimum model probability to accept a digit prediction.
const MIN_CONFIDENCE: f32 = 0.5;

/// Classifies batches of cell images into digits, fanning the independent
/// cells out across a worker pool bounded by hardware parallelism.
///
/// Failures are local: a cell whose inference fails degrades to "empty" and
/// the batch continues.
pub struct DigitClassifier {
    backend: RwLock<Arc<dyn ClassifierBackend>>,
    workers: usize,
}

impl DigitClassifier {
    /// Classifier without a model; every cell classifies as empty.
    pub fn placeholder() -> Self {
        Self::from_backend(Arc::new(PlaceholderBackend))
    }

    /// Try to load a digit model. A missing or unreadable model is not an
    /// error; the classifier falls back to placeholder mode.
    pub fn with_model(path: &Path) -> Self {
        match RtenBackend::load(path) {
            Ok(backend) => {
                debug!("digit model loaded from {}", path.display());
                Self::from_backend(Arc::new(backend))
            }
            Err(e) => {
                warn!("{e:#}; running in placeholder mode");
                Self::placeholder()
            }
        }
    }

    fn from_backend(backend: Arc<dyn ClassifierBackend>) -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            backend: RwLock::new(backend),
            workers,
        }
    }

    pub fn is_model_loaded(&self) -> bool {
        self.current_backend().is_loaded()
    }

    /// Drop the loaded model, swapping the placeholder in. Called when the
    /// service shuts down.
    pub fn release(&self) {
        let mut guard = self
            .backend
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_loaded() {
            debug!("releasing digit model");
        }
        *guard = Arc::new(PlaceholderBackend);
    }

    fn current_backend(&self) -> Arc<dyn ClassifierBackend> {
        self.backend
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Classify every cell, returning one result per input in input order.
    /// Blocks until the whole batch is done; never panics the caller.
    pub fn classify_batch(&self, cells: &[CellImage]) -> Vec<Classification> {
        if cells.is_empty() {
            return Vec::new();
        }

        debug!("classifying batch of {} cells", cells.len());

        let backend = self.current_backend();
        let workers = self.workers.min(cells.len()).max(1);
        let chunk_len = cells.len().div_ceil(workers);

        let mut results = Vec::with_capacity(cells.len());
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for (chunk_idx, chunk) in cells.chunks(chunk_len).enumerate() {
                let base = chunk_idx * chunk_len;
                let backend = Arc::clone(&backend);
                let handle = scope.spawn(move || {
                    chunk
                        .iter()
                        .enumerate()
                        .map(|(offset, cell)| classify_cell(backend.as_ref(), cell, base + offset))
                        .collect::<Vec<_>>()
                });
                handles.push((base, chunk.len(), handle));
            }

            for (base, len, handle) in handles {
                match handle.join() {
                    Ok(mut chunk_results) => results.append(&mut chunk_results),
                    Err(_) => {
                        error!(
                            "classification worker panicked; cells {base}..{} degrade to empty",
                            base + len
                        );
                        results.extend((base..base + len).map(Classification::empty));
                    }
                }
            }
        });
        results
    }
}

fn classify_cell(backend: &dyn ClassifierBackend, cell: &CellImage, index: usize) -> Classification {
    // Uniformly dark cells never reach the model.
    if cell.mean() < EMPTY_CELL_THRESHOLD && cell.stddev() < EMPTY_CELL_THRESHOLD {
        return Classification::empty(index);
    }

    if !backend.is_loaded() {
        return Classification::empty(index);
    }

    match backend.infer(cell) {
        Ok(probs) => {
            let (digit, confidence) = argmax(&probs);
            debug!("cell {index}: predicted={digit}, confidence={confidence:.3}");
            if digit == 0 || confidence < MIN_CONFIDENCE {
                Classification::empty(index)
            } else {
                Classification {
                    cell_index: index,
                    digit: digit as u8,
                    confidence,
                }
            }
        }
        Err(e) => {
            error!("inference error for cell {index}: {e:#}");
            Classification::empty(index)
        }
    }
}

fn argmax(probs: &[f32; NUM_CLASSES]) -> (usize, f32) {
    let mut best = 0;
    for (i, p) in probs.iter().enumerate() {
        if *p > probs[best] {
            best = i;
        }
    }
    (best, probs[best])
}

use std::path::Path;

use anyhow::{Context, anyhow};
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

use crate::models::CellImage;

/// Digit classes 0-9; class 0 is the empty cell.
pub const NUM_CLASSES: usize = 10;

/// Capability interface over the optional digit model.
///
/// Two implementations exist: [`RtenBackend`] drives a real model,
/// [`PlaceholderBackend`] stands in when none is loaded.
pub trait ClassifierBackend: Send + Sync {
    fn is_loaded(&self) -> bool;

    /// Probability for each digit class given one normalized cell.
    fn infer(&self, cell: &CellImage) -> anyhow::Result<[f32; NUM_CLASSES]>;
}

/// Inference backend over an rten digit model with a
/// `[1, 1, 28, 28]` float input and a 10-class probability output.
pub struct RtenBackend {
    model: Model,
}

impl RtenBackend {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let model = Model::load_file(path)
            .with_context(|| format!("failed to load digit model from {}", path.display()))?;
        Ok(Self { model })
    }
}

impl ClassifierBackend for RtenBackend {
    fn is_loaded(&self) -> bool {
        true
    }

    fn infer(&self, cell: &CellImage) -> anyhow::Result<[f32; NUM_CLASSES]> {
        let input = NdTensor::from_data(
            [1, 1, CellImage::SIZE, CellImage::SIZE],
            cell.pixels().to_vec(),
        );
        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| anyhow!("digit model inference failed: {e}"))?;
        let output: NdTensor<f32, 2> = output
            .try_into()
            .map_err(|_| anyhow!("digit model produced an unexpected output tensor"))?;

        if output.size(0) == 0 || output.size(1) == 0 {
            return Err(anyhow!("digit model produced an empty output"));
        }

        let mut probs = [0.0f32; NUM_CLASSES];
        for (class, slot) in probs.iter_mut().enumerate().take(output.size(1)) {
            *slot = output[[0, class]];
        }
        Ok(probs)
    }
}

/// No-op backend used when no model resource was supplied. Every cell
/// classifies as empty.
pub struct PlaceholderBackend;

impl ClassifierBackend for PlaceholderBackend {
    fn is_loaded(&self) -> bool {
        false
    }

    fn infer(&self, _cell: &CellImage) -> anyhow::Result<[f32; NUM_CLASSES]> {
        let mut probs = [0.0f32; NUM_CLASSES];
        probs[0] = 1.0;
        Ok(probs)
    }
}

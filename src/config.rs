use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Configuration for the recognition pipeline.
///
/// Every setter validates its range and fails fast; a constructed config is
/// always usable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Grid side length (e.g. 9 for a 9x9 puzzle).
    pub grid_size: usize,
    /// Interval between frame deliveries in milliseconds. Consumed by the
    /// frame source; the service itself makes no cadence assumption.
    pub frame_interval_ms: u64,
    /// Consecutive stable frames required before digit extraction starts.
    pub consensus_frames: u32,
    /// Corner movement at or above this many pixels between frames restarts
    /// stability verification.
    pub position_tolerance_px: f64,
    /// Extra debug logging.
    pub debug_mode: bool,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            grid_size: 9,
            frame_interval_ms: 100,
            consensus_frames: 5,
            position_tolerance_px: 10.0,
            debug_mode: false,
        }
    }
}

impl VisionConfig {
    pub fn with_grid_size(mut self, grid_size: usize) -> anyhow::Result<Self> {
        if !(4..=16).contains(&grid_size) {
            bail!("grid size must be between 4 and 16, got {grid_size}");
        }
        self.grid_size = grid_size;
        Ok(self)
    }

    pub fn with_frame_interval_ms(mut self, interval_ms: u64) -> anyhow::Result<Self> {
        if !(50..=1000).contains(&interval_ms) {
            bail!("frame interval must be between 50 and 1000 ms, got {interval_ms}");
        }
        self.frame_interval_ms = interval_ms;
        Ok(self)
    }

    pub fn with_consensus_frames(mut self, frames: u32) -> anyhow::Result<Self> {
        if !(1..=20).contains(&frames) {
            bail!("consensus frames must be between 1 and 20, got {frames}");
        }
        self.consensus_frames = frames;
        Ok(self)
    }

    pub fn with_position_tolerance_px(mut self, tolerance_px: f64) -> anyhow::Result<Self> {
        if !(1.0..=100.0).contains(&tolerance_px) {
            bail!("position tolerance must be between 1 and 100 pixels, got {tolerance_px}");
        }
        self.position_tolerance_px = tolerance_px;
        Ok(self)
    }

    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Re-check all ranges. Used by consumers that build the struct directly.
    pub fn validate(&self) -> anyhow::Result<()> {
        Self::default()
            .with_grid_size(self.grid_size)?
            .with_frame_interval_ms(self.frame_interval_ms)?
            .with_consensus_frames(self.consensus_frames)?
            .with_position_tolerance_px(self.position_tolerance_px)?;
        Ok(())
    }

    /// Human-readable settings summary.
    pub fn summary(&self) -> String {
        format!(
            "grid {}x{}, frame interval {} ms, consensus frames {}, position tolerance {:.1} px, debug {}",
            self.grid_size,
            self.grid_size,
            self.frame_interval_ms,
            self.consensus_frames,
            self.position_tolerance_px,
            if self.debug_mode { "on" } else { "off" },
        )
    }
}

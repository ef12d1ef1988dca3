use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::bail;
use image::DynamicImage;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::classifier::DigitClassifier;
use crate::config::VisionConfig;
use crate::consensus::{ConsensusState, FrameConsensusManager};
use crate::detector::GridDetector;
use crate::models::{Board, CornerSet, GridDetection, RecognitionResult};
use crate::segmenter::GridSegmenter;

/// How long `stop()` waits for an in-flight frame before abandoning it.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Orchestrates the recognition pipeline: detect, verify stability, segment,
/// classify and vote, publishing one [`RecognitionResult`] per transition.
///
/// At most one frame is processed at a time; frames arriving while the
/// pipeline is busy are dropped, not queued. `process_frame` must be called
/// from within a Tokio runtime.
pub struct RecognitionService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: VisionConfig,
    detector: GridDetector,
    segmenter: GridSegmenter,
    classifier: DigitClassifier,
    consensus: Mutex<FrameConsensusManager>,
    corners: Mutex<Option<CornerSet>>,
    running: AtomicBool,
    processing: AtomicBool,
    result_tx: watch::Sender<RecognitionResult>,
    inflight: Mutex<Option<JoinHandle<()>>>,
}

impl RecognitionService {
    /// Build a service without a digit model (placeholder classification).
    pub fn new(config: VisionConfig) -> anyhow::Result<Self> {
        Self::build(config, DigitClassifier::placeholder())
    }

    /// Build a service with an optional digit model; a model that fails to
    /// load falls back to placeholder mode rather than erroring.
    pub fn with_model(config: VisionConfig, model_path: &std::path::Path) -> anyhow::Result<Self> {
        Self::build(config, DigitClassifier::with_model(model_path))
    }

    fn build(config: VisionConfig, classifier: DigitClassifier) -> anyhow::Result<Self> {
        config.validate()?;
        let segmenter = GridSegmenter::new(config.grid_size)?;
        let consensus =
            FrameConsensusManager::new(config.consensus_frames, config.position_tolerance_px)?;
        let (result_tx, _) = watch::channel(RecognitionResult::scanning("Ready to scan"));

        info!("recognition service created: {}", config.summary());

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                detector: GridDetector::new(),
                segmenter,
                classifier,
                consensus: Mutex::new(consensus),
                corners: Mutex::new(None),
                running: AtomicBool::new(false),
                processing: AtomicBool::new(false),
                result_tx,
                inflight: Mutex::new(None),
            }),
        })
    }

    /// Start admitting frames. Idempotent: a second call warns and does
    /// nothing.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("recognition service already running");
            return;
        }
        self.inner.processing.store(false, Ordering::Release);
        self.inner
            .publish(RecognitionResult::scanning("Scanning for grid..."));
        info!("recognition service started");
    }

    /// Stop admitting frames, wait for the in-flight frame up to a bounded
    /// timeout, then release the classifier model. Idempotent and safe to
    /// call on a service that never started.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            debug!("stop called on a service that is not running");
        }

        let handle = lock(&self.inner.inflight).take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("in-flight frame task failed during shutdown: {e}"),
                Err(_) => warn!(
                    "in-flight frame did not finish within {SHUTDOWN_TIMEOUT:?}; abandoning it"
                ),
            }
        }

        self.inner.classifier.release();
        info!("recognition service stopped");
    }

    /// Submit one frame. Dropped silently when the service is not running or
    /// a previous frame is still in flight (deliberate backpressure).
    pub fn process_frame(&self, frame: DynamicImage) {
        if !self.inner.running.load(Ordering::Acquire) {
            return;
        }
        if frame.width() == 0 || frame.height() == 0 {
            return;
        }
        // Admission gate: flip before spawning so a racing call sees it.
        if self.inner.processing.swap(true, Ordering::AcqRel) {
            debug!("frame dropped: previous frame still in flight");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let pipeline_inner = Arc::clone(&inner);
            let outcome =
                tokio::task::spawn_blocking(move || pipeline_inner.run_pipeline(frame)).await;
            match outcome {
                Ok(result) => inner.publish(result),
                Err(e) => {
                    error!("frame pipeline panicked: {e}");
                    inner.publish(RecognitionResult::error("Processing error"));
                }
            }
            inner.processing.store(false, Ordering::Release);
        });
        *lock(&self.inner.inflight) = Some(handle);
    }

    /// Clear stability and voting state and go back to scanning, without
    /// touching threading resources.
    pub fn reset(&self) {
        lock(&self.inner.consensus).reset();
        *lock(&self.inner.corners) = None;
        self.inner
            .publish(RecognitionResult::scanning("Scanning for grid..."));
        info!("recognition service reset");
    }

    /// Subscribe to recognition results. Every transition publishes a new
    /// value; receivers can lag without blocking the pipeline.
    pub fn subscribe(&self) -> watch::Receiver<RecognitionResult> {
        self.inner.result_tx.subscribe()
    }

    /// The most recently published result.
    pub fn current_result(&self) -> RecognitionResult {
        self.inner.result_tx.borrow().clone()
    }

    /// The last detected grid corners, for UI overlay scaling.
    pub fn current_corners(&self) -> Option<CornerSet> {
        lock(&self.inner.corners).clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }
}

impl ServiceInner {
    /// Whole-frame pipeline with the orchestrator-boundary catch-all: any
    /// unexpected failure becomes an Error result, never a crash.
    fn run_pipeline(&self, frame: DynamicImage) -> RecognitionResult {
        match self.process_internal(&frame) {
            Ok(result) => {
                if self.config.debug_mode {
                    // Debug mode surfaces per-frame outcomes without
                    // requiring a debug-level log filter.
                    info!(
                        "frame {}x{} processed: {}",
                        frame.width(),
                        frame.height(),
                        result.message
                    );
                }
                result
            }
            Err(e) => {
                error!("unexpected failure in frame pipeline: {e:#}");
                RecognitionResult::error(format!("Processing error: {e}"))
            }
        }
    }

    fn process_internal(&self, frame: &DynamicImage) -> anyhow::Result<RecognitionResult> {
        let detection = self.detector.detect(frame);
        *lock(&self.corners) = detection.corners().cloned();

        let state = lock(&self.consensus).observe(detection.corners());
        match state {
            ConsensusState::Unstable { .. } => Ok(RecognitionResult::detected(state.message())),
            ConsensusState::Verifying { frames } => Ok(RecognitionResult::verifying(
                format!("Verifying... {frames}/{}", self.config.consensus_frames),
                frames,
            )),
            ConsensusState::Ready { .. } => {
                let GridDetection::Found { rectified, .. } = detection else {
                    bail!("consensus reported ready without a detection");
                };
                self.extract_board(&rectified)
            }
        }
    }

    /// Segment, classify and vote once the grid is geometrically stable.
    fn extract_board(&self, rectified: &image::GrayImage) -> anyhow::Result<RecognitionResult> {
        self.publish(RecognitionResult::confirmed("Processing grid..."));

        let cells = self.segmenter.segment(rectified);
        if cells.is_empty() {
            return Ok(RecognitionResult::error("Failed to segment grid"));
        }

        let classifications = self.classifier.classify_batch(&cells);
        let board = Board::from_classifications(self.config.grid_size, &classifications);

        let mut consensus = lock(&self.consensus);
        consensus.add_board_result(board);

        if let Some(result) = consensus.consensus_board()
            && result.confidence > 0.5
        {
            info!(
                "board recognized after {} extractions with confidence {:.3}",
                consensus.history_len(),
                result.confidence
            );
            drop(consensus);
            // Terminal state: the service stops admitting frames itself.
            self.running.store(false, Ordering::Release);
            self.classifier.release();
            return Ok(RecognitionResult::completed(result.board, result.confidence));
        }

        Ok(RecognitionResult::verifying(
            "Analyzing digits...",
            consensus.frame_count(),
        ))
    }

    fn publish(&self, result: RecognitionResult) {
        // send_replace never fails; subscribers may come and go freely.
        self.result_tx.send_replace(result);
    }
}

/// Mutex guard that shrugs off poisoning: the protected state stays usable
/// even if a pipeline task panicked mid-update.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

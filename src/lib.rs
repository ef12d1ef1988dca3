pub mod classifier;
pub mod config;
pub mod consensus;
pub mod detector;
pub mod models;
pub mod segmenter;
pub mod service;

pub use classifier::{ClassifierBackend, DigitClassifier};
pub use config::VisionConfig;
pub use consensus::{BoardConsensus, ConsensusState, FrameConsensusManager};
pub use detector::GridDetector;
pub use models::{
    Board, CellImage, Classification, CornerSet, GridDetection, Point, RecognitionResult,
    RecognitionState,
};
pub use segmenter::GridSegmenter;
pub use service::RecognitionService;

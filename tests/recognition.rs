use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use gridscan::{RecognitionService, RecognitionState, VisionConfig};

/// White frame with a filled dark square the detector reliably finds.
fn frame_with_square() -> DynamicImage {
    let mut img = RgbImage::from_pixel(300, 300, Rgb([255, 255, 255]));
    draw_filled_rect_mut(&mut img, Rect::at(50, 50).of_size(200, 200), Rgb([0, 0, 0]));
    DynamicImage::ImageRgb8(img)
}

fn blank_frame() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 300, Rgb([255, 255, 255])))
}

async fn wait_until_idle(service: &RecognitionService) {
    while service.is_processing() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn test_config() -> VisionConfig {
    VisionConfig::default()
}

#[tokio::test]
async fn completes_with_all_zero_board_in_placeholder_mode() {
    let service = RecognitionService::new(test_config()).expect("valid config");
    service.start();
    let mut rx = service.subscribe();

    // 5 stable frames reach consensus; the 5th extracts a board whose single
    // history entry votes with full confidence.
    for _ in 0..5 {
        service.process_frame(frame_with_square());
        wait_until_idle(&service).await;
    }

    let result = rx.borrow_and_update().clone();
    let RecognitionState::Completed { board, confidence } = result.state else {
        panic!("expected completion, got {:?}", result.state);
    };

    assert_eq!(board.size(), 9);
    assert!(board.cells().iter().all(|&d| d == 0));
    assert!((confidence - 1.0).abs() < 1e-9);

    // Terminal state: the service stopped itself.
    assert!(!service.is_running());
}

#[tokio::test]
async fn stability_counts_are_published_in_order() {
    // Debug mode only adds diagnostics; published results are identical.
    let service =
        RecognitionService::new(test_config().with_debug_mode(true)).expect("valid config");
    service.start();

    for expected in 1..=4u32 {
        service.process_frame(frame_with_square());
        wait_until_idle(&service).await;
        let result = service.current_result();
        assert_eq!(
            result.state,
            RecognitionState::Verifying { frames: expected },
            "frame {expected}: {}",
            result.message
        );
        assert_eq!(result.message, format!("Verifying... {expected}/5"));
    }
}

#[tokio::test]
async fn blank_frame_interrupts_verification() {
    let service = RecognitionService::new(test_config()).expect("valid config");
    service.start();

    service.process_frame(frame_with_square());
    wait_until_idle(&service).await;
    assert!(service.current_corners().is_some());

    service.process_frame(blank_frame());
    wait_until_idle(&service).await;

    let result = service.current_result();
    assert_eq!(result.state, RecognitionState::Detected);
    assert_eq!(result.message, "No grid detected");
    assert!(service.current_corners().is_none());

    // Verification restarts from 1 on the next good frame.
    service.process_frame(frame_with_square());
    wait_until_idle(&service).await;
    assert_eq!(
        service.current_result().state,
        RecognitionState::Verifying { frames: 1 }
    );
}

#[tokio::test]
async fn admission_gate_drops_overlapping_frames() {
    let service = RecognitionService::new(test_config()).expect("valid config");
    service.start();

    // The single-threaded test runtime has not run the spawned pipeline yet,
    // so the second call hits the closed gate and is dropped.
    service.process_frame(frame_with_square());
    assert!(service.is_processing());
    service.process_frame(frame_with_square());

    wait_until_idle(&service).await;

    // Only one frame was processed: the stability count sits at 1.
    assert_eq!(
        service.current_result().state,
        RecognitionState::Verifying { frames: 1 }
    );
}

#[tokio::test]
async fn frames_before_start_are_ignored() {
    let service = RecognitionService::new(test_config()).expect("valid config");
    let before = service.current_result();

    service.process_frame(frame_with_square());
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(!service.is_processing());
    assert_eq!(service.current_result(), before);
}

#[tokio::test]
async fn start_is_idempotent_and_stop_is_safe_without_start() {
    let service = RecognitionService::new(test_config()).expect("valid config");

    // Stop before start is a logged no-op.
    service.stop().await;
    assert!(!service.is_running());

    service.start();
    service.start();
    assert!(service.is_running());

    service.stop().await;
    assert!(!service.is_running());
    service.stop().await;
}

#[tokio::test]
async fn reset_returns_to_scanning_and_restarts_counting() {
    let service = RecognitionService::new(test_config()).expect("valid config");
    service.start();

    for _ in 0..3 {
        service.process_frame(frame_with_square());
        wait_until_idle(&service).await;
    }
    assert_eq!(
        service.current_result().state,
        RecognitionState::Verifying { frames: 3 }
    );

    service.reset();
    let result = service.current_result();
    assert_eq!(result.state, RecognitionState::Scanning);
    assert!(service.current_corners().is_none());

    service.process_frame(frame_with_square());
    wait_until_idle(&service).await;
    assert_eq!(
        service.current_result().state,
        RecognitionState::Verifying { frames: 1 }
    );
}

#[tokio::test]
async fn invalid_configuration_fails_at_construction() {
    let config = VisionConfig {
        grid_size: 30,
        ..VisionConfig::default()
    };
    assert!(RecognitionService::new(config).is_err());
}

#[tokio::test]
async fn consensus_frames_of_one_completes_on_second_stable_frame() {
    let config = test_config()
        .with_consensus_frames(1)
        .expect("valid consensus frames");
    let service = RecognitionService::new(config).expect("valid config");
    service.start();

    // The first detection only establishes the baseline.
    service.process_frame(frame_with_square());
    wait_until_idle(&service).await;
    assert_eq!(
        service.current_result().state,
        RecognitionState::Verifying { frames: 1 }
    );

    // The confirming frame reaches readiness and completes.
    service.process_frame(frame_with_square());
    wait_until_idle(&service).await;

    let result = service.current_result();
    assert!(
        matches!(result.state, RecognitionState::Completed { .. }),
        "expected completion, got {:?}",
        result.state
    );
}

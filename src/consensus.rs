use anyhow::bail;
use log::debug;

use crate::models::{Board, CornerSet};

/// Stability of the detected grid across recent frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusState {
    /// No grid, or the grid moved; verification restarts.
    Unstable { frames: u32 },
    /// Counting consecutive stable frames.
    Verifying { frames: u32 },
    /// Enough stable frames; digit extraction may proceed.
    Ready { frames: u32 },
}

impl ConsensusState {
    pub fn frames(&self) -> u32 {
        match self {
            ConsensusState::Unstable { frames }
            | ConsensusState::Verifying { frames }
            | ConsensusState::Ready { frames } => *frames,
        }
    }

    /// User-facing status message.
    pub fn message(&self) -> &'static str {
        match self {
            ConsensusState::Unstable { frames: 0 } => "No grid detected",
            ConsensusState::Unstable { .. } => "Hold camera steady!",
            ConsensusState::Verifying { .. } => "Hold steady...",
            ConsensusState::Ready { .. } => "Grid confirmed",
        }
    }
}

/// A consensus board and its average per-cell majority fraction.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConsensus {
    pub board: Board,
    pub confidence: f64,
}

/// Tracks geometric stability of the detected grid across frames and runs
/// majority voting over repeated board extractions.
///
/// State is replaced, not mutated in place: every observed frame yields a
/// fresh [`ConsensusState`].
pub struct FrameConsensusManager {
    required_frames: u32,
    position_tolerance_px: f64,
    stable_frames: u32,
    last_corners: Option<CornerSet>,
    board_history: Vec<Board>,
}

impl FrameConsensusManager {
    pub fn new(required_frames: u32, position_tolerance_px: f64) -> anyhow::Result<Self> {
        if required_frames < 1 {
            bail!("required frames must be at least 1, got {required_frames}");
        }
        if position_tolerance_px <= 0.0 {
            bail!("position tolerance must be positive, got {position_tolerance_px}");
        }
        Ok(Self {
            required_frames,
            position_tolerance_px,
            stable_frames: 0,
            last_corners: None,
            board_history: Vec::new(),
        })
    }

    /// Fold one frame's detection into the stability state machine.
    ///
    /// Stability requires movement strictly below the tolerance; a
    /// displacement exactly equal to it restarts verification.
    pub fn observe(&mut self, corners: Option<&CornerSet>) -> ConsensusState {
        let Some(corners) = corners else {
            self.reset();
            return ConsensusState::Unstable { frames: 0 };
        };

        let Some(last) = &self.last_corners else {
            debug!("first grid detection");
            self.last_corners = Some(corners.clone());
            self.stable_frames = 1;
            return ConsensusState::Verifying { frames: 1 };
        };

        let movement = last.max_displacement(corners);
        self.last_corners = Some(corners.clone());

        if movement >= self.position_tolerance_px {
            debug!("grid moved {movement:.1}px, restarting verification");
            self.stable_frames = 1;
            return ConsensusState::Unstable { frames: 1 };
        }

        self.stable_frames += 1;
        debug!("stable frame {}/{}", self.stable_frames, self.required_frames);

        if self.stable_frames >= self.required_frames {
            ConsensusState::Ready {
                frames: self.stable_frames,
            }
        } else {
            ConsensusState::Verifying {
                frames: self.stable_frames,
            }
        }
    }

    /// Append one extracted board to the voting history.
    pub fn add_board_result(&mut self, board: Board) {
        self.board_history.push(board);
        debug!("added board to history, size: {}", self.board_history.len());
    }

    /// Majority-vote board across the history.
    ///
    /// Ties between digits with equal vote counts resolve to the lowest
    /// digit, so results do not depend on insertion order.
    pub fn consensus_board(&self) -> Option<BoardConsensus> {
        let first = self.board_history.first()?;
        let size = first.size();
        let mut board = Board::new(size);
        let history_len = self.board_history.len() as f64;
        let mut total_confidence = 0.0;

        for row in 0..size {
            for col in 0..size {
                let mut votes = [0usize; 10];
                for past in &self.board_history {
                    votes[past.get(row, col) as usize] += 1;
                }

                let mut winner = 0usize;
                for (digit, &count) in votes.iter().enumerate() {
                    if count > votes[winner] {
                        winner = digit;
                    }
                }

                board.set(row, col, winner as u8);
                total_confidence += votes[winner] as f64 / history_len;
            }
        }

        let confidence = total_confidence / (size * size) as f64;
        debug!("consensus board computed with confidence {confidence:.3}");
        Some(BoardConsensus { board, confidence })
    }

    /// Clear corners, counters and board history as one operation.
    pub fn reset(&mut self) {
        self.stable_frames = 0;
        self.last_corners = None;
        self.board_history.clear();
        debug!("consensus manager reset");
    }

    pub fn frame_count(&self) -> u32 {
        self.stable_frames
    }

    pub fn required_frames(&self) -> u32 {
        self.required_frames
    }

    pub fn history_len(&self) -> usize {
        self.board_history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Point;
    use approx::assert_relative_eq;

    fn square(x: f32, y: f32, side: f32) -> CornerSet {
        CornerSet::from_unordered([
            Point::new(x, y),
            Point::new(x + side, y),
            Point::new(x + side, y + side),
            Point::new(x, y + side),
        ])
    }

    fn manager() -> FrameConsensusManager {
        FrameConsensusManager::new(5, 10.0).expect("valid config")
    }

    fn board_filled(size: usize, digit: u8) -> Board {
        let mut board = Board::new(size);
        for row in 0..size {
            for col in 0..size {
                board.set(row, col, digit);
            }
        }
        board
    }

    #[test]
    fn construction_is_validated() {
        assert!(FrameConsensusManager::new(0, 10.0).is_err());
        assert!(FrameConsensusManager::new(5, 0.0).is_err());
        assert!(FrameConsensusManager::new(1, 1.0).is_ok());
    }

    #[test]
    fn missing_grid_resets_to_unstable() {
        let mut manager = manager();
        manager.observe(Some(&square(100.0, 100.0, 300.0)));

        let state = manager.observe(None);
        assert_eq!(state, ConsensusState::Unstable { frames: 0 });
        assert_eq!(state.message(), "No grid detected");
        assert_eq!(manager.frame_count(), 0);
    }

    #[test]
    fn identical_corners_count_up_to_ready() {
        let mut manager = manager();
        let corners = square(100.0, 100.0, 300.0);

        for expected in 1..5 {
            let state = manager.observe(Some(&corners));
            assert_eq!(
                state,
                ConsensusState::Verifying { frames: expected },
                "frame {expected}"
            );
        }

        let state = manager.observe(Some(&corners));
        assert_eq!(state, ConsensusState::Ready { frames: 5 });
        assert_eq!(state.message(), "Grid confirmed");
    }

    #[test]
    fn first_detection_is_verifying_even_when_one_frame_suffices() {
        let mut manager = FrameConsensusManager::new(1, 10.0).expect("valid config");
        let corners = square(100.0, 100.0, 300.0);

        // The first observation only establishes the baseline; readiness
        // needs at least one confirming frame.
        let state = manager.observe(Some(&corners));
        assert_eq!(state, ConsensusState::Verifying { frames: 1 });

        let state = manager.observe(Some(&corners));
        assert_eq!(state, ConsensusState::Ready { frames: 2 });
    }

    #[test]
    fn large_movement_rebaselines_the_count() {
        let mut manager = manager();
        let corners = square(100.0, 100.0, 300.0);
        manager.observe(Some(&corners));
        manager.observe(Some(&corners));
        manager.observe(Some(&corners));
        assert_eq!(manager.frame_count(), 3);

        let moved = square(150.0, 150.0, 300.0);
        let state = manager.observe(Some(&moved));
        assert_eq!(state, ConsensusState::Unstable { frames: 1 });
        assert_eq!(state.message(), "Hold camera steady!");
        assert_eq!(manager.frame_count(), 1);

        // The moved position becomes the new baseline.
        let state = manager.observe(Some(&moved));
        assert_eq!(state, ConsensusState::Verifying { frames: 2 });
    }

    #[test]
    fn movement_within_tolerance_keeps_counting() {
        let mut manager = manager();
        manager.observe(Some(&square(100.0, 100.0, 300.0)));

        let state = manager.observe(Some(&square(102.0, 102.0, 300.0)));
        assert_eq!(state, ConsensusState::Verifying { frames: 2 });
    }

    #[test]
    fn displacement_exactly_at_tolerance_is_unstable() {
        let mut manager = manager();
        manager.observe(Some(&square(100.0, 100.0, 300.0)));

        // Just under the tolerance (9px horizontal shift) stays stable.
        let state = manager.observe(Some(&square(109.0, 100.0, 300.0)));
        assert_eq!(state, ConsensusState::Verifying { frames: 2 });

        // Exactly 10px == tolerance restarts verification.
        let state = manager.observe(Some(&square(119.0, 100.0, 300.0)));
        assert_eq!(state, ConsensusState::Unstable { frames: 1 });
    }

    #[test]
    fn majority_vote_picks_most_frequent_digit() {
        let mut manager = manager();
        manager.add_board_result(board_filled(9, 5));
        manager.add_board_result(board_filled(9, 5));
        manager.add_board_result(board_filled(9, 3));

        let consensus = manager.consensus_board().expect("history is non-empty");
        assert_eq!(consensus.board.get(0, 0), 5);
        assert_relative_eq!(consensus.confidence, 2.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn identical_boards_reach_full_confidence() {
        let mut manager = manager();
        for _ in 0..3 {
            manager.add_board_result(board_filled(9, 7));
        }

        let consensus = manager.consensus_board().expect("history is non-empty");
        assert_relative_eq!(consensus.confidence, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn vote_ties_resolve_to_the_lowest_digit() {
        let mut manager = manager();
        manager.add_board_result(board_filled(4, 8));
        manager.add_board_result(board_filled(4, 2));

        let consensus = manager.consensus_board().expect("history is non-empty");
        assert_eq!(consensus.board.get(0, 0), 2);
        assert_relative_eq!(consensus.confidence, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn empty_history_has_no_consensus() {
        assert!(manager().consensus_board().is_none());
    }

    #[test]
    fn reset_is_idempotent_and_clears_everything() {
        let mut manager = manager();
        manager.observe(Some(&square(100.0, 100.0, 300.0)));
        manager.add_board_result(board_filled(9, 1));

        manager.reset();
        assert_eq!(manager.frame_count(), 0);
        assert_eq!(manager.history_len(), 0);
        assert!(manager.consensus_board().is_none());

        manager.reset();
        assert_eq!(manager.frame_count(), 0);

        // Reusable after reset.
        let state = manager.observe(Some(&square(100.0, 100.0, 300.0)));
        assert_eq!(state, ConsensusState::Verifying { frames: 1 });
    }
}

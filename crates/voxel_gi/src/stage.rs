use crate::error::{Result, VoxelGiError};

/// Per-frame stages of the voxelization pipeline.
///
/// `Idle → Clearing → Populating → (MipGenerating) → Idle`. Each stage reads
/// what the one before it wrote, so stages are only ever recorded in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    Clearing,
    Populating,
    MipGenerating,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Idle, Stage::Clearing)
                | (Stage::Clearing, Stage::Populating)
                | (Stage::Clearing, Stage::Idle)
                | (Stage::Populating, Stage::MipGenerating)
                | (Stage::Populating, Stage::Idle)
                | (Stage::MipGenerating, Stage::Idle)
        )
    }
}

#[derive(Debug, Default)]
pub struct StageTracker {
    current: Stage,
    frames_completed: u64,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.current.can_advance_to(next) {
            return Err(VoxelGiError::StageOrder {
                from: self.current,
                to: next,
            });
        }
        if next == Stage::Idle {
            self.frames_completed += 1;
        }
        self.current = next;
        Ok(())
    }

    /// Returns to `Idle` after an aborted frame so the next frame starts clean.
    pub fn reset(&mut self) {
        self.current = Stage::Idle;
    }
}

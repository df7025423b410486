// Seek Recovery Handler: re-seeds the cursor after a jump to unbuffered time.

use crate::config::SeekConfig;
use crate::sink::BufferedRanges;
use dash::Manifest;
use tracing::debug;

/// Fetches to issue after a seek, in increasing index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// First index of the burst
    pub start: u64,
    pub indices: Vec<u64>,
    /// Cursor value once the burst has been issued
    pub next_cursor: u64,
}

#[derive(Debug, Clone)]
pub struct SeekRecovery {
    config: SeekConfig,
}

impl SeekRecovery {
    pub fn new(config: SeekConfig) -> Self {
        Self { config }
    }

    /// Cursor for a playhead that landed outside buffered data:
    /// `floor(position / segment_duration) - rewind`, never below 1.
    pub fn cursor_for(&self, manifest: &Manifest, position: f64) -> u64 {
        manifest
            .segments_before(position)
            .saturating_sub(self.config.rewind_segments)
            .max(1)
    }

    /// Returns `None` when the new position is already buffered.
    pub fn plan(
        &self,
        manifest: &Manifest,
        position: f64,
        buffered: &BufferedRanges,
    ) -> Option<RecoveryPlan> {
        if buffered.containing(position).is_some() {
            debug!(position, "Seek landed in buffered data");
            return None;
        }

        let start = self.cursor_for(manifest, position);
        let end = start
            .saturating_add(self.config.burst)
            .min(manifest.max_segment_index + 1);
        let indices: Vec<u64> = (start..end).collect();

        debug!(
            position,
            start,
            count = indices.len(),
            "Seek landed outside buffered data, recovering"
        );

        Some(RecoveryPlan {
            start,
            next_cursor: end,
            indices,
        })
    }
}

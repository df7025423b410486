// Representation Switch Handler: decides how fetching restarts for a newly
// selected representation.

use crate::config::{SwitchConfig, SwitchCursorPolicy};
use crate::seek::SeekRecovery;
use crate::sink::BufferedRanges;
use dash::Manifest;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RepresentationSwitch {
    config: SwitchConfig,
    seek: SeekRecovery,
}

impl RepresentationSwitch {
    pub fn new(config: SwitchConfig, seek: SeekRecovery) -> Self {
        Self { config, seek }
    }

    /// Segment cursor for the first media fetch of the new representation.
    pub fn cursor_after_switch(
        &self,
        manifest: &Manifest,
        position: f64,
        buffered: &BufferedRanges,
    ) -> u64 {
        let cursor = match self.config.cursor_policy {
            SwitchCursorPolicy::Restart => 1,
            SwitchCursorPolicy::FollowPlayhead => match buffered.containing(position) {
                // Continue right after the data already buffered around the playhead
                Some(range) => (range.end / manifest.segment_duration).round() as u64 + 1,
                None if position > 0.0 => self.seek.cursor_for(manifest, position),
                None => 1,
            },
        };
        let cursor = cursor.clamp(1, manifest.max_segment_index + 1);

        debug!(
            position,
            cursor,
            policy = ?self.config.cursor_policy,
            "Segment cursor reset for representation switch"
        );
        cursor
    }
}

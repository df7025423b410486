// Prefetch Scheduler: decides when the next sequential segment is fetched.
//
// Fires when the buffered interval around the playhead is about to run out
// (its end is within the lookahead of the current position). A fire is
// recorded against the interval end and the requested index, so repeated
// position updates inside the same window request a single segment. The
// scheduler re-arms when the playhead leaves the window, when the interval
// end moves forward, or when the requested segment has settled (appended or
// failed). The last case keeps fetching when a segment lands inside data that
// is already buffered, e.g. after a switch restarts at segment 1.

use crate::config::PrefetchConfig;
use crate::sink::BufferedRanges;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct Fired {
    /// End of the buffered interval when the fetch was triggered
    end: f64,
    index: u64,
}

#[derive(Debug)]
pub struct PrefetchScheduler {
    config: PrefetchConfig,
    fired: Option<Fired>,
}

impl PrefetchScheduler {
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            config,
            fired: None,
        }
    }

    /// Returns the segment index to fetch for this position update, if any.
    ///
    /// `next` is the index the caller would fetch next; the caller advances
    /// its cursor when an index is returned.
    pub fn on_position(
        &mut self,
        position: f64,
        buffered: &BufferedRanges,
        next: u64,
        max_index: u64,
    ) -> Option<u64> {
        if !self.config.enabled {
            return None;
        }

        // Unbuffered playhead is handled by seek recovery
        let range = buffered.containing(position)?;

        let remaining = range.end - position;
        if remaining >= self.config.lookahead.as_secs_f64() {
            if self.fired.take().is_some() {
                trace!(position, end = range.end, "Prefetch re-armed");
            }
            return None;
        }

        if next > max_index {
            return None;
        }

        if self.fired.is_some_and(|fired| range.end <= fired.end) {
            return None;
        }

        debug!(
            position,
            buffered_end = range.end,
            remaining,
            index = next,
            "Buffered data running low, prefetching"
        );
        self.fired = Some(Fired {
            end: range.end,
            index: next,
        });
        Some(next)
    }

    /// Re-arms once the segment requested by the last fire was appended.
    pub fn on_segment_settled(&mut self, index: u64) {
        if self.fired.is_some_and(|fired| fired.index == index) {
            trace!(index, "Prefetched segment settled, re-armed");
            self.fired = None;
        }
    }

    /// Forget the last fire, e.g. after a seek, switch or failed fetch.
    pub fn reset(&mut self) {
        self.fired = None;
    }
}

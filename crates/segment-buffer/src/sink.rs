// Decode sink interface: the platform buffer that media bytes are appended to.

use crate::error::BufferError;
use async_trait::async_trait;
use bytes::Bytes;

/// Gaps smaller than this are treated as contiguous when merging ranges.
const MERGE_TOLERANCE: f64 = 1e-6;

/// A contiguous time range in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position <= self.end
    }
}

/// Disjoint, ascending set of buffered time ranges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedRanges {
    ranges: Vec<TimeRange>,
}

impl BufferedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a normalized set from arbitrary (possibly overlapping) ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = TimeRange>) -> Self {
        let mut set = Self::new();
        for range in ranges {
            set.insert(range);
        }
        set
    }

    /// Adds a range, merging it with any overlapping or touching neighbours.
    pub fn insert(&mut self, range: TimeRange) {
        if !(range.end > range.start) {
            return;
        }

        let mut merged = range;
        self.ranges.retain(|existing| {
            let overlaps = existing.start <= merged.end + MERGE_TOLERANCE
                && merged.start <= existing.end + MERGE_TOLERANCE;
            if overlaps {
                merged.start = merged.start.min(existing.start);
                merged.end = merged.end.max(existing.end);
            }
            !overlaps
        });

        let pos = self
            .ranges
            .iter()
            .position(|r| r.start > merged.start)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(pos, merged);
    }

    /// The range containing `position`, if any.
    pub fn containing(&self, position: f64) -> Option<TimeRange> {
        self.ranges.iter().copied().find(|r| r.contains(position))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> {
        self.ranges.iter()
    }
}

/// Completion signals raised by the sink after an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    AppendCompleted,
    /// The sink rejected the appended data (malformed or mismatched codec).
    AppendFailed { reason: String },
}

/// The platform decode/playback buffer.
///
/// Only one append may be pending at a time. Completion is reported through
/// the [`SinkEvent`] channel handed to the controller alongside the sink.
#[async_trait]
pub trait DecodeSink: Send {
    /// Resolves once the sink is ready to accept a source.
    async fn open(&mut self) -> Result<(), BufferError>;

    /// Creates the source buffer for the given mime type. Repeated calls
    /// after the first are no-ops.
    fn add_source(&mut self, mime_type: &str) -> Result<(), BufferError>;

    /// Starts appending `data`. Fails if an append is already pending.
    fn append(&mut self, data: Bytes) -> Result<(), BufferError>;

    fn is_appending(&self) -> bool;

    fn buffered(&self) -> BufferedRanges;

    /// Current playback position in seconds.
    fn position(&self) -> f64;
}

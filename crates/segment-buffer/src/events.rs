use crate::segment::{RepresentationId, SegmentKind};

/// Playback signals forwarded from the player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    /// The playhead moved during normal playback.
    PositionAdvanced { position: f64 },
    /// The user jumped to a new position.
    Seeking { position: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    SelectRepresentation(RepresentationId),
    Shutdown,
}

/// Lifecycle of a controller session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Uninitialized,
    AwaitingManifest,
    AwaitingSinkOpen,
    Steady,
    /// Recovery fetches after a seek are still outstanding
    Seeking,
    /// The initialization segment of a new representation has not been
    /// appended yet
    Switching,
}

/// Notifications emitted by a running controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    RepresentationChanged {
        representation: RepresentationId,
        generation: u64,
    },
    BufferEnqueued {
        representation: RepresentationId,
        kind: SegmentKind,
        bytes: usize,
    },
    BufferAppended {
        representation: RepresentationId,
        kind: SegmentKind,
    },
    /// A fetch failed permanently or exhausted its retries.
    FetchFailed {
        representation: RepresentationId,
        kind: SegmentKind,
        error: String,
    },
    SeekRecovered {
        position: f64,
        cursor: u64,
        indices: Vec<u64>,
    },
    SinkReinitialized {
        representation: RepresentationId,
        reason: String,
    },
    /// Every media segment up to the last index has been requested.
    EndOfSegments { last_index: u64 },
}

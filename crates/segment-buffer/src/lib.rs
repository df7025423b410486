// Segment buffer controller for adaptive DASH playback

pub mod config;
pub mod controller;
mod coordinator;
pub mod error;
pub mod events;
pub mod fetcher;
mod loader;
mod metrics;
pub mod prefetch;
pub mod pump;
pub mod queue;
pub mod retry;
pub mod seek;
pub mod segment;
pub mod sink;
pub mod switch;

// Re-exports for easier access
pub use config::{
    ControllerConfig, FetcherConfig, PrefetchConfig, PumpConfig, SeekConfig, SwitchConfig,
    SwitchCursorPolicy, create_client,
};
pub use controller::{ControllerInputs, ControllerOutputs, SegmentBufferController};
pub use coordinator::{ControllerHandle, SessionCoordinator};
pub use error::BufferError;
pub use events::{ControllerCommand, ControllerEvent, ControllerState, PlaybackEvent};
pub use fetcher::{SegmentDownloader, SegmentFetcher};
pub use loader::ManifestLoader;
pub use metrics::{ControllerMetrics, MetricsSnapshot};
pub use queue::{AppendQueue, Ticket};
pub use retry::RetryPolicy;
pub use segment::{FetchOrigin, FetchedBuffer, RepresentationId, SegmentKind, SegmentRequest};
pub use sink::{BufferedRanges, DecodeSink, SinkEvent, TimeRange};

pub use dash::{Manifest, ManifestError, Representation, UrlTemplate};

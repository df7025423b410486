use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Identifier of a representation (quality tier) from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepresentationId(Arc<str>);

impl RepresentationId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepresentationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RepresentationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RepresentationId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Initialization segment; precedes all media segments of a representation.
    Init,
    /// Media segment number, starting at 1.
    Media(u64),
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Media(index) => write!(f, "#{index}"),
        }
    }
}

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    Startup,
    Prefetch,
    SeekRecovery,
    Switch,
}

#[derive(Debug, Clone)]
pub struct SegmentRequest {
    pub representation: RepresentationId,
    pub kind: SegmentKind,
    /// Switch epoch the request belongs to
    pub generation: u64,
    pub origin: FetchOrigin,
}

/// Fetched bytes awaiting delivery to the decode sink.
#[derive(Debug, Clone)]
pub struct FetchedBuffer {
    pub representation: RepresentationId,
    pub kind: SegmentKind,
    pub generation: u64,
    pub data: Bytes,
}

impl FetchedBuffer {
    pub fn from_request(request: &SegmentRequest, data: Bytes) -> Self {
        Self {
            representation: request.representation.clone(),
            kind: request.kind,
            generation: request.generation,
            data,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }
}

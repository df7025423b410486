// MPEG-DASH manifest handling for segment-template (number addressed) streams
pub mod duration;
pub mod error;
pub mod manifest;
pub mod template;

pub use duration::parse_presentation_duration;
pub use error::ManifestError;
pub use manifest::{DEFAULT_MIME_TYPE, Manifest, Representation};
pub use template::UrlTemplate;

// MPD manifest model: the static description of a segment-template asset.

use crate::duration::parse_presentation_duration;
use crate::error::ManifestError;
use crate::template::UrlTemplate;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, trace};
use url::Url;

/// Mime type used when the manifest does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "video/mp4; codecs=\"avc1.424034\"";

/// One selectable quality tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    pub id: String,
    pub bandwidth: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codecs: Option<String>,
}

impl Representation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bandwidth: None,
            width: None,
            height: None,
            codecs: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub base_url: Url,
    /// Representations of the first adaptation set, in document order.
    pub representations: Vec<Representation>,
    pub init_template: UrlTemplate,
    pub media_template: UrlTemplate,
    /// Nominal duration of one media segment, in seconds.
    pub segment_duration: f64,
    /// Total presentation duration, in seconds.
    pub total_duration: f64,
    /// Highest valid media segment number (`ceil(total / segment)`).
    pub max_segment_index: u64,
    pub mime_type: String,
}

impl Manifest {
    pub fn new(
        base_url: Url,
        representations: Vec<Representation>,
        init_template: UrlTemplate,
        media_template: UrlTemplate,
        segment_duration: f64,
        total_duration: f64,
    ) -> Result<Self, ManifestError> {
        if representations.is_empty() {
            return Err(ManifestError::Missing {
                what: "Representation",
            });
        }
        if !(segment_duration.is_finite() && segment_duration > 0.0) {
            return Err(ManifestError::invalid_value(
                "segment duration",
                segment_duration.to_string(),
            ));
        }
        if !(total_duration.is_finite() && total_duration >= 0.0) {
            return Err(ManifestError::invalid_value(
                "presentation duration",
                total_duration.to_string(),
            ));
        }

        let max_segment_index = (total_duration / segment_duration).ceil() as u64;

        Ok(Self {
            base_url,
            representations,
            init_template,
            media_template,
            segment_duration,
            total_duration,
            max_segment_index,
            mime_type: DEFAULT_MIME_TYPE.to_owned(),
        })
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Parses MPD XML. `manifest_url` is the URL the document was retrieved
    /// from and anchors relative segment URLs.
    pub fn from_mpd(text: &str, manifest_url: &str) -> Result<Self, ManifestError> {
        let manifest_url = Url::parse(manifest_url).map_err(|e| ManifestError::InvalidUrl {
            input: manifest_url.to_owned(),
            reason: e.to_string(),
        })?;
        let raw = RawMpd::parse(text)?;

        let mut base_url =
            manifest_url
                .join("./")
                .map_err(|e| ManifestError::InvalidUrl {
                    input: manifest_url.to_string(),
                    reason: e.to_string(),
                })?;
        if let Some(base) = raw.base_url.as_deref() {
            base_url = base_url.join(base).map_err(|e| ManifestError::InvalidUrl {
                input: base.to_owned(),
                reason: e.to_string(),
            })?;
        }

        let total_duration = parse_presentation_duration(
            raw.presentation_duration
                .as_deref()
                .ok_or(ManifestError::Missing {
                    what: "MPD@mediaPresentationDuration",
                })?,
        )?;

        let segment_duration = match (raw.max_segment_duration.as_deref(), raw.template_duration) {
            (Some(max), _) => parse_presentation_duration(max)?,
            (None, Some(duration)) => duration as f64 / raw.timescale.unwrap_or(1).max(1) as f64,
            (None, None) => {
                return Err(ManifestError::Missing {
                    what: "MPD@maxSegmentDuration or SegmentTemplate@duration",
                });
            }
        };

        let init_template = UrlTemplate::parse(raw.initialization.as_deref().ok_or(
            ManifestError::Missing {
                what: "SegmentTemplate@initialization",
            },
        )?)?;
        let media_template = UrlTemplate::parse(raw.media.as_deref().ok_or(
            ManifestError::Missing {
                what: "SegmentTemplate@media",
            },
        )?)?;
        if !media_template.has_number() {
            return Err(ManifestError::invalid_value(
                "SegmentTemplate@media",
                media_template.as_str(),
            ));
        }

        let mime_type = match (&raw.mime_type, &raw.codecs) {
            (Some(mime), Some(codecs)) => format!("{mime}; codecs=\"{codecs}\""),
            (Some(mime), None) => mime.clone(),
            _ => DEFAULT_MIME_TYPE.to_owned(),
        };

        let manifest = Self::new(
            base_url,
            raw.representations,
            init_template,
            media_template,
            segment_duration,
            total_duration,
        )?
        .with_mime_type(mime_type);

        debug!(
            representations = manifest.representations.len(),
            segment_duration = manifest.segment_duration,
            total_duration = manifest.total_duration,
            max_segment_index = manifest.max_segment_index,
            "Parsed MPD manifest"
        );

        Ok(manifest)
    }

    pub fn representation_ids(&self) -> impl Iterator<Item = &str> {
        self.representations.iter().map(|r| r.id.as_str())
    }

    pub fn representation(&self, id: &str) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.representation(id).is_some()
    }

    /// The representation selected when playback starts.
    pub fn default_representation(&self) -> &Representation {
        // `new` guarantees at least one representation
        &self.representations[0]
    }

    pub fn init_url(&self, representation: &str) -> Result<Url, ManifestError> {
        self.resolve(&self.init_template.expand(representation, None))
    }

    pub fn segment_url(&self, representation: &str, index: u64) -> Result<Url, ManifestError> {
        self.resolve(&self.media_template.expand(representation, Some(index)))
    }

    /// Zero-based count of whole segments before `position`
    /// (`floor(position / segment_duration)`).
    pub fn segments_before(&self, position: f64) -> u64 {
        if position <= 0.0 || !position.is_finite() {
            return 0;
        }
        (position / self.segment_duration).floor() as u64
    }

    /// Whether `index` is a valid media segment number.
    pub fn is_valid_index(&self, index: u64) -> bool {
        (1..=self.max_segment_index).contains(&index)
    }

    fn resolve(&self, relative: &str) -> Result<Url, ManifestError> {
        self.base_url
            .join(relative)
            .map_err(|e| ManifestError::InvalidUrl {
                input: relative.to_owned(),
                reason: e.to_string(),
            })
    }
}

/// Attribute values collected from a single pass over the MPD.
#[derive(Debug, Default)]
struct RawMpd {
    presentation_duration: Option<String>,
    max_segment_duration: Option<String>,
    base_url: Option<String>,
    initialization: Option<String>,
    media: Option<String>,
    template_duration: Option<u64>,
    timescale: Option<u64>,
    mime_type: Option<String>,
    codecs: Option<String>,
    representations: Vec<Representation>,
}

impl RawMpd {
    fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut raw = RawMpd::default();
        let mut seen_mpd = false;
        let mut adaptation_sets = 0usize;
        let mut in_first_set = false;
        let mut in_base_url = false;

        loop {
            let event = reader.read_event().map_err(ManifestError::xml)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_start = matches!(event, Event::Start(_));
                    match e.local_name().as_ref() {
                        b"MPD" => {
                            seen_mpd = true;
                            raw.presentation_duration = attr(e, b"mediaPresentationDuration")?;
                            raw.max_segment_duration = attr(e, b"maxSegmentDuration")?;
                        }
                        b"BaseURL" if is_start && raw.base_url.is_none() => {
                            in_base_url = true;
                        }
                        b"AdaptationSet" => {
                            adaptation_sets += 1;
                            in_first_set = adaptation_sets == 1 && is_start;
                            if adaptation_sets == 1 {
                                raw.mime_type = attr(e, b"mimeType")?;
                                raw.codecs = attr(e, b"codecs")?;
                            }
                        }
                        b"SegmentTemplate" if raw.media.is_none() => {
                            raw.initialization = attr(e, b"initialization")?;
                            raw.media = attr(e, b"media")?;
                            raw.template_duration = parse_attr(e, b"duration", "SegmentTemplate@duration")?;
                            raw.timescale = parse_attr(e, b"timescale", "SegmentTemplate@timescale")?;
                        }
                        b"Representation" if in_first_set => {
                            let id = attr(e, b"id")?.ok_or(ManifestError::Missing {
                                what: "Representation@id",
                            })?;
                            let codecs = attr(e, b"codecs")?;
                            if raw.codecs.is_none() {
                                raw.codecs.clone_from(&codecs);
                            }
                            if raw.mime_type.is_none() {
                                raw.mime_type = attr(e, b"mimeType")?;
                            }
                            trace!(id = %id, "Found representation");
                            raw.representations.push(Representation {
                                id,
                                bandwidth: parse_attr(e, b"bandwidth", "Representation@bandwidth")?,
                                width: parse_attr(e, b"width", "Representation@width")?,
                                height: parse_attr(e, b"height", "Representation@height")?,
                                codecs,
                            });
                        }
                        _ => {}
                    }
                }
                Event::Text(ref t) if in_base_url => {
                    let text = t.unescape().map_err(ManifestError::xml)?;
                    raw.base_url = Some(text.trim().to_owned());
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"AdaptationSet" => in_first_set = false,
                    b"BaseURL" => in_base_url = false,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if !seen_mpd {
            return Err(ManifestError::Missing { what: "MPD element" });
        }

        Ok(raw)
    }
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, ManifestError> {
    for attr in e.attributes() {
        let attr = attr.map_err(ManifestError::xml)?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(ManifestError::xml)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_attr<T: std::str::FromStr>(
    e: &BytesStart<'_>,
    name: &[u8],
    field: &'static str,
) -> Result<Option<T>, ManifestError> {
    match attr(e, name)? {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ManifestError::invalid_value(field, value)),
        None => Ok(None),
    }
}

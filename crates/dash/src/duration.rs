// ISO 8601 presentation durations as used by MPD attributes (`PT1H2M3.5S`).

use crate::error::ManifestError;
use regex::Regex;
use std::sync::LazyLock;

static PRESENTATION_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?T?(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?$")
        .expect("presentation duration pattern is valid")
});

/// Parses an MPD duration attribute into seconds.
///
/// Each of the day, hour, minute and second components is optional, but at
/// least one must be present. Year and month designators are rejected since
/// their length in seconds is ambiguous.
pub fn parse_presentation_duration(input: &str) -> Result<f64, ManifestError> {
    let invalid = || ManifestError::InvalidDuration {
        input: input.to_owned(),
    };

    let trimmed = input.trim();
    let captures = PRESENTATION_DURATION
        .captures(trimmed)
        .ok_or_else(invalid)?;

    if captures.iter().skip(1).all(|c| c.is_none()) {
        return Err(invalid());
    }

    let component = |idx: usize| -> Result<f64, ManifestError> {
        match captures.get(idx) {
            Some(m) => m.as_str().parse::<f64>().map_err(|_| invalid()),
            None => Ok(0.0),
        }
    };

    let days = component(1)?;
    let hours = component(2)?;
    let minutes = component(3)?;
    let seconds = component(4)?;

    Ok(days * 86_400.0 + hours * 3_600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_form() {
        let secs = parse_presentation_duration("PT0H14M48.000S").unwrap();
        assert!((secs - 888.0).abs() < f64::EPSILON);
    }

    #[test]
    fn parses_fractional_seconds() {
        let secs = parse_presentation_duration("PT0H0M4.011S").unwrap();
        assert!((secs - 4.011).abs() < 1e-9);
    }

    #[test]
    fn parses_partial_components() {
        assert_eq!(parse_presentation_duration("PT10S").unwrap(), 10.0);
        assert_eq!(parse_presentation_duration("PT2M").unwrap(), 120.0);
        assert_eq!(parse_presentation_duration("PT1H").unwrap(), 3600.0);
        assert_eq!(parse_presentation_duration("P1DT1S").unwrap(), 86_401.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_presentation_duration("").is_err());
        assert!(parse_presentation_duration("PT").is_err());
        assert!(parse_presentation_duration("10 seconds").is_err());
        assert!(parse_presentation_duration("P1Y").is_err());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("malformed manifest XML: {reason}")]
    Xml { reason: String },

    #[error("manifest is missing required {what}")]
    Missing { what: &'static str },

    #[error("invalid value `{value}` for {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("invalid presentation duration `{input}`")]
    InvalidDuration { input: String },

    #[error("invalid base URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unknown representation `{id}`")]
    UnknownRepresentation { id: String },
}

impl ManifestError {
    pub fn xml(reason: impl std::fmt::Display) -> Self {
        Self::Xml {
            reason: reason.to_string(),
        }
    }

    pub fn invalid_value(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }
}

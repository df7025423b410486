// SegmentTemplate URL expansion.
//
// Supported identifiers: `$RepresentationID$`, `$Number$`, `$Number%0Nd$`
// and the `$$` escape. Anything else between dollar signs is left verbatim.

use crate::error::ManifestError;
use std::fmt;

const REPRESENTATION_ID: &str = "RepresentationID";
const NUMBER: &str = "Number";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    RepresentationId,
    Number { width: usize },
}

/// A parsed `initialization` or `media` attribute of a `SegmentTemplate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    tokens: Vec<Token>,
}

impl UrlTemplate {
    pub fn parse(raw: &str) -> Result<Self, ManifestError> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while let Some(start) = rest.find('$') {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('$') else {
                return Err(ManifestError::invalid_value("segment template", raw));
            };
            let ident = &after[..end];
            rest = &after[end + 1..];

            if ident.is_empty() {
                literal.push('$');
                continue;
            }

            let token = if ident == REPRESENTATION_ID {
                Token::RepresentationId
            } else if ident == NUMBER {
                Token::Number { width: 0 }
            } else if let Some(format) = ident.strip_prefix(NUMBER) {
                Token::Number {
                    width: parse_width(format)
                        .ok_or_else(|| ManifestError::invalid_value("segment template", raw))?,
                }
            } else {
                literal.push('$');
                literal.push_str(ident);
                literal.push('$');
                continue;
            };

            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(token);
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_owned(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the template references `$Number$`.
    pub fn has_number(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Number { .. }))
    }

    /// Expands the template. `number` is ignored by templates without a
    /// `$Number$` identifier (initialization templates).
    pub fn expand(&self, representation: &str, number: Option<u64>) -> String {
        let mut out = String::with_capacity(self.raw.len() + representation.len());
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::RepresentationId => out.push_str(representation),
                Token::Number { width } => {
                    let n = number.unwrap_or_default();
                    out.push_str(&format!("{n:0width$}", width = *width));
                }
            }
        }
        out
    }
}

/// Parses the `%0Nd` suffix of a `$Number%0Nd$` identifier.
fn parse_width(format: &str) -> Option<usize> {
    let digits = format.strip_prefix('%')?.strip_suffix('d')?;
    let digits = digits.strip_prefix('0').unwrap_or(digits);
    if digits.is_empty() {
        return Some(0);
    }
    digits.parse().ok()
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

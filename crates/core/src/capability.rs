//! Streaming capability check from the API revision string
//!
//! A revision looks like `G.003.123`: device family, `.`, three-digit
//! major version, then anything. Only family `G` from major version 3
//! (Vega) supports the STREAM command.

use std::fmt;

use crate::error::ParseError;

/// Device family known to support streaming
pub const STREAMING_FAMILY: char = 'G';

/// First major version of [`STREAMING_FAMILY`] with streaming
pub const STREAMING_MIN_MAJOR: u16 = 3;

const MIN_REVISION_LEN: usize = 5;

/// Parsed leading fields of an API revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiRevision {
    pub family: char,
    pub major: u16,
}

impl ApiRevision {
    pub fn parse(revision: &str) -> Result<Self, ParseError> {
        let chars: Vec<char> = revision.chars().take(MIN_REVISION_LEN).collect();
        if chars.len() < MIN_REVISION_LEN {
            return Err(ParseError::TooShort {
                revision: revision.to_string(),
                min: MIN_REVISION_LEN,
            });
        }

        if chars[1] != '.' {
            return Err(ParseError::MissingSeparator {
                revision: revision.to_string(),
            });
        }

        let field: String = chars[2..5].iter().collect();
        if !field.chars().all(|c| c.is_ascii_digit()) {
            return Err(ParseError::NonNumericVersion {
                revision: revision.to_string(),
                field,
            });
        }
        let major = field
            .parse::<u16>()
            .map_err(|_| ParseError::NonNumericVersion {
                revision: revision.to_string(),
                field: field.clone(),
            })?;

        Ok(Self {
            family: chars[0],
            major,
        })
    }

    pub fn supports_streaming(&self) -> bool {
        self.family == STREAMING_FAMILY && self.major >= STREAMING_MIN_MAJOR
    }
}

impl fmt::Display for ApiRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.family, self.major)
    }
}

/// Whether the device reporting `revision` can stream
///
/// A malformed revision is an error, never `false`.
pub fn supports_streaming(revision: &str) -> Result<bool, ParseError> {
    ApiRevision::parse(revision).map(|rev| rev.supports_streaming())
}

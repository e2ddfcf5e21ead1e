//! Licence plate text normalisation and candidate selection.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Plates shorter than this are treated as OCR noise.
pub const MIN_PLATE_LEN: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlateError {
    #[error("plate text is empty")]
    Empty,
    #[error("plate text {text:?} is too short to be a plate")]
    TooShort { text: String },
    #[error("plate text contains unsupported character {0:?}")]
    InvalidChar(char),
}

/// Validated, normalised plate text: uppercase `A-Z`, `0-9`, and `-` only.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlateText(String);

impl PlateText {
    /// Normalise raw OCR output: drop whitespace, uppercase, then validate.
    pub fn parse(raw: &str) -> Result<Self, PlateError> {
        let normalised: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect();
        if normalised.is_empty() {
            return Err(PlateError::Empty);
        }
        if let Some(bad) = normalised
            .chars()
            .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(PlateError::InvalidChar(bad));
        }
        if normalised.chars().count() < MIN_PLATE_LEN {
            return Err(PlateError::TooShort { text: normalised });
        }
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlateText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlateText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One OCR reading and the reader's confidence in it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TextCandidate {
    pub text: String,
    pub confidence: f32,
}

/// Pick the most confident reading and accept it if it is a valid plate.
///
/// Only the top candidate is considered; a low-confidence valid string is not
/// promoted when the best reading is garbage.
pub fn best_plate(candidates: &[TextCandidate]) -> Option<PlateText> {
    let best = candidates
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;
    PlateText::parse(&best.text).ok()
}

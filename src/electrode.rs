// Electrode labels, sets and pairs
//
// Labels follow the EEG-cap naming used by the leadfield, "E" followed by a
// fixed number of digits (E001 .. E256 for the EGI template).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ElectrodeError {
    #[error("Invalid electrode label '{token}' in set {set}: expected {expected}")]
    InvalidLabel {
        set: String,
        token: String,
        expected: String,
    },

    #[error("Electrode set {0} is empty")]
    EmptySet(String),
}

/// Expected shape of an electrode label: a literal prefix followed by
/// exactly `digits` ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelFormat {
    pub prefix: String,
    pub digits: usize,
}

impl Default for LabelFormat {
    fn default() -> Self {
        Self { prefix: "E".to_string(), digits: 3 }
    }
}

impl LabelFormat {
    pub fn matches(&self, token: &str) -> bool {
        self.match_len(token) == Some(token.len())
    }

    /// Length of a label match at the start of `text`, if any
    fn match_len(&self, text: &str) -> Option<usize> {
        let rest = text.strip_prefix(self.prefix.as_str())?;
        let digits = rest.bytes().take(self.digits).filter(u8::is_ascii_digit).count();
        if digits == self.digits && rest.len() >= self.digits {
            Some(self.prefix.len() + self.digits)
        } else {
            None
        }
    }

    /// Length of a `<label>_<label>` match at the start of `text`
    fn pair_match_len(&self, text: &str) -> Option<usize> {
        let first = self.match_len(text)?;
        let rest = text[first..].strip_prefix('_')?;
        let second = self.match_len(rest)?;
        Some(first + 1 + second)
    }

    /// All non-overlapping `<label>_<label>` pair identifiers in `text`,
    /// scanning left to right.
    pub fn find_pairs<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut found = Vec::new();
        let mut i = 0;
        while i < text.len() {
            if !text.is_char_boundary(i) {
                i += 1;
                continue;
            }
            match self.pair_match_len(&text[i..]) {
                Some(len) => {
                    found.push(&text[i..i + len]);
                    i += len;
                }
                None => i += 1,
            }
        }
        found
    }

    fn describe(&self) -> String {
        format!("'{}' followed by {} digits", self.prefix, self.digits)
    }
}

/// Named, immutable group of validated electrode labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectrodeSet {
    name: String,
    electrodes: Vec<String>,
}

impl ElectrodeSet {
    /// Validate every label against `format`. The first offending token is
    /// reported.
    pub fn new<S: Into<String>>(
        name: &str,
        electrodes: impl IntoIterator<Item = S>,
        format: &LabelFormat,
    ) -> Result<Self, ElectrodeError> {
        let electrodes: Vec<String> = electrodes.into_iter().map(Into::into).collect();
        if electrodes.is_empty() {
            return Err(ElectrodeError::EmptySet(name.to_string()));
        }

        if let Some(bad) = electrodes.iter().find(|e| !format.matches(e)) {
            return Err(ElectrodeError::InvalidLabel {
                set: name.to_string(),
                token: bad.clone(),
                expected: format.describe(),
            });
        }

        Ok(Self { name: name.to_string(), electrodes })
    }

    /// Parse a user-supplied list. Commas take precedence as separators,
    /// otherwise whitespace is used.
    pub fn parse(name: &str, text: &str, format: &LabelFormat) -> Result<Self, ElectrodeError> {
        let text = text.trim();
        let tokens: Vec<&str> = if text.contains(',') {
            text.split(',').map(str::trim).collect()
        } else {
            text.split_whitespace().collect()
        };

        if let Some(empty) = tokens.iter().find(|t| t.is_empty()) {
            return Err(ElectrodeError::InvalidLabel {
                set: name.to_string(),
                token: empty.to_string(),
                expected: format.describe(),
            });
        }

        Self::new(name, tokens, format)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn electrodes(&self) -> &[String] {
        &self.electrodes
    }

    pub fn len(&self) -> usize {
        self.electrodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.electrodes.is_empty()
    }
}

/// One stimulating channel: anode and cathode
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElectrodePair {
    pub plus: String,
    pub minus: String,
}

impl ElectrodePair {
    pub fn new(plus: impl Into<String>, minus: impl Into<String>) -> Self {
        Self { plus: plus.into(), minus: minus.into() }
    }

    /// Same electrode used as both poles
    pub fn is_degenerate(&self) -> bool {
        self.plus == self.minus
    }
}

impl fmt::Display for ElectrodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.plus, self.minus)
    }
}

// Search settings
//
// A SearchConfig is built once, from a JSON file or from command-line flags,
// and validated before any leadfield is loaded. Nothing in the library
// prompts for input.

use crate::combination::DuplicatePolicy;
use crate::electrode::{ElectrodeError, ElectrodeSet, LabelFormat};
use crate::leadfield::LeadfieldVariant;
use crate::synthesis::Intensity;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to open config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Electrode(#[from] ElectrodeError),

    #[error("Intensity must be a positive number of millivolts, got {0}")]
    Intensity(f64),

    #[error("No leadfield variant selected")]
    NoVariants,
}

/// Electrode list as free text ("E001, E002" or "E001 E002") or as a JSON
/// array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElectrodeList {
    Text(String),
    Labels(Vec<String>),
}

impl ElectrodeList {
    fn to_set(&self, name: &str, format: &LabelFormat) -> Result<ElectrodeSet, ElectrodeError> {
        match self {
            ElectrodeList::Text(text) => ElectrodeSet::parse(name, text, format),
            ElectrodeList::Labels(labels) => ElectrodeSet::new(name, labels.iter().map(String::as_str), format),
        }
    }
}

impl From<&str> for ElectrodeList {
    fn from(text: &str) -> Self {
        ElectrodeList::Text(text.to_string())
    }
}

fn default_intensity() -> f64 {
    1.0
}

fn default_variants() -> Vec<LeadfieldVariant> {
    vec![LeadfieldVariant::Surface, LeadfieldVariant::Volume]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub e1_plus: ElectrodeList,
    pub e1_minus: ElectrodeList,
    pub e2_plus: ElectrodeList,
    pub e2_minus: ElectrodeList,
    /// Stimulation intensity in millivolts
    #[serde(default = "default_intensity")]
    pub intensity_mv: f64,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// Keep result meshes from an earlier run instead of regenerating them
    #[serde(default)]
    pub skip_existing: bool,
    #[serde(default)]
    pub parallel: bool,
    /// Processed in this order
    #[serde(default = "default_variants")]
    pub variants: Vec<LeadfieldVariant>,
    #[serde(default)]
    pub label_format: LabelFormat,
}

/// The four validated electrode sets of a config
#[derive(Debug, Clone, PartialEq)]
pub struct ElectrodeSets {
    pub e1_plus: ElectrodeSet,
    pub e1_minus: ElectrodeSet,
    pub e2_plus: ElectrodeSet,
    pub e2_minus: ElectrodeSet,
}

impl SearchConfig {
    pub fn new(
        e1_plus: impl Into<ElectrodeList>,
        e1_minus: impl Into<ElectrodeList>,
        e2_plus: impl Into<ElectrodeList>,
        e2_minus: impl Into<ElectrodeList>,
    ) -> Self {
        Self {
            e1_plus: e1_plus.into(),
            e1_minus: e1_minus.into(),
            e2_plus: e2_plus.into(),
            e2_minus: e2_minus.into(),
            intensity_mv: default_intensity(),
            duplicate_policy: DuplicatePolicy::default(),
            skip_existing: false,
            parallel: false,
            variants: default_variants(),
            label_format: LabelFormat::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ConfigError::Format { path: path.display().to_string(), source })
    }

    /// Check everything a run depends on and return the electrode sets
    pub fn validate(&self) -> Result<ElectrodeSets, ConfigError> {
        if !(self.intensity_mv.is_finite() && self.intensity_mv > 0.0) {
            return Err(ConfigError::Intensity(self.intensity_mv));
        }
        if self.variants.is_empty() {
            return Err(ConfigError::NoVariants);
        }

        let format = &self.label_format;
        Ok(ElectrodeSets {
            e1_plus: self.e1_plus.to_set("E1+", format)?,
            e1_minus: self.e1_minus.to_set("E1-", format)?,
            e2_plus: self.e2_plus.to_set("E2+", format)?,
            e2_minus: self.e2_minus.to_set("E2-", format)?,
        })
    }

    pub fn intensity(&self) -> Intensity {
        Intensity::from_millivolts(self.intensity_mv)
    }
}

// Project layout for one subject
//
// Everything below the project directory is derived from the subject name
// and the EEG cap. The environment is only read by the `from_env` constructors.

use crate::leadfield::LeadfieldVariant;
use std::path::{Path, PathBuf};

pub const PROJECT_DIR_VAR: &str = "PROJECT_DIR";
pub const SUBJECT_NAME_VAR: &str = "SUBJECT_NAME";
pub const EEG_CAP_VAR: &str = "EEG_CAP";

pub const DEFAULT_EEG_CAP: &str = "EGI_template";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("Environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub project_dir: PathBuf,
    pub subject_name: String,
    pub eeg_cap: String,
}

impl RunContext {
    pub fn new<P: Into<PathBuf>>(
        project_dir: P,
        subject_name: impl Into<String>,
        eeg_cap: impl Into<String>,
    ) -> Result<Self, ContextError> {
        let context = Self {
            project_dir: project_dir.into(),
            subject_name: subject_name.into(),
            eeg_cap: eeg_cap.into(),
        };
        if context.project_dir.as_os_str().is_empty() {
            return Err(ContextError::Empty(PROJECT_DIR_VAR));
        }
        if context.subject_name.trim().is_empty() {
            return Err(ContextError::Empty(SUBJECT_NAME_VAR));
        }
        if context.eeg_cap.trim().is_empty() {
            return Err(ContextError::Empty(EEG_CAP_VAR));
        }
        Ok(context)
    }

    /// `PROJECT_DIR` and `SUBJECT_NAME` are required, `EEG_CAP` falls back to
    /// the EGI template
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_env_with(None, None, None)
    }

    /// Like [`RunContext::from_env`], with explicit values taking precedence
    /// over the environment
    pub fn from_env_with(
        project_dir: Option<PathBuf>,
        subject_name: Option<String>,
        eeg_cap: Option<String>,
    ) -> Result<Self, ContextError> {
        Self::resolve(project_dir, subject_name, eeg_cap, |key| std::env::var(key).ok())
    }

    fn resolve(
        project_dir: Option<PathBuf>,
        subject_name: Option<String>,
        eeg_cap: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ContextError> {
        let project_dir = project_dir
            .or_else(|| lookup(PROJECT_DIR_VAR).map(PathBuf::from))
            .ok_or(ContextError::MissingVar(PROJECT_DIR_VAR))?;
        let subject_name = subject_name
            .or_else(|| lookup(SUBJECT_NAME_VAR))
            .ok_or(ContextError::MissingVar(SUBJECT_NAME_VAR))?;
        let eeg_cap = eeg_cap
            .or_else(|| lookup(EEG_CAP_VAR))
            .filter(|cap| !cap.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EEG_CAP.to_string());
        Self::new(project_dir, subject_name, eeg_cap)
    }

    fn subjects_dir(&self) -> PathBuf {
        self.project_dir.join("Subjects")
    }

    pub fn leadfield_dir(&self, variant: LeadfieldVariant) -> PathBuf {
        self.subjects_dir().join(format!("leadfield_{}_{}", variant.tag(), self.subject_name))
    }

    pub fn leadfield_path(&self, variant: LeadfieldVariant) -> PathBuf {
        self.leadfield_dir(variant)
            .join(format!("{}_leadfield_{}.json", self.subject_name, self.eeg_cap))
    }

    /// Directory receiving result meshes, checkpoint and matrix
    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join("Simulations").join(format!("opt_{}", self.subject_name))
    }

    pub fn volume_dir(&self) -> PathBuf {
        self.output_dir().join("niftis")
    }

    pub fn reference_image(&self) -> PathBuf {
        self.subjects_dir().join(format!("m2m_{}", self.subject_name)).join("T1.json")
    }

    pub fn regions_dir(&self) -> PathBuf {
        self.project_dir.join("ROIs")
    }

    pub fn region_list(&self) -> PathBuf {
        self.regions_dir().join("roi_list.txt")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir().join(crate::aggregate::CHECKPOINT_FILE)
    }

    pub fn matrix_path(&self) -> PathBuf {
        self.output_dir().join(crate::aggregate::MATRIX_FILE)
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

// Field sampling at region coordinates
//
// Sampling is delegated to an external tool that reads a result mesh and a
// region file and writes the interpolated field values to a CSV next to the
// region file. The aggregator consumes and removes that file.

use crate::region::Region;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    #[error("Expected sampler output {0} was not produced")]
    MissingOutput(PathBuf),

    #[error("Failed to read sampler output {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Produces a per-(mesh, region) output file of sampled values. The caller
/// owns the file at `output_path` and deletes it after every call, whether
/// or not `sample` succeeded.
pub trait FieldSampler: Send + Sync {
    /// Where `sample` writes its values for `region`
    fn output_path(&self, region: &Region) -> PathBuf;

    fn sample(&self, mesh: &Path, region: &Region) -> Result<PathBuf, SamplerError>;
}

/// Settings for the external sampling tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub program: String,
    /// Arguments placed before the sampling arguments, e.g. a wrapper script
    #[serde(default)]
    pub leading_args: Vec<String>,
    pub method: String,
    /// Field the tool samples, part of its output file name
    pub field: String,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Extra attempts after a failed or timed-out call
    pub retries: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            program: "get_fields_at_coordinates".to_string(),
            leading_args: Vec::new(),
            method: "linear".to_string(),
            field: "TImax".to_string(),
            timeout: Duration::from_secs(300),
            retries: 1,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs `<program> -s <region> -m <mesh> --method <method>`
#[derive(Debug, Clone, Default)]
pub struct SubprocessSampler {
    config: SamplerConfig,
}

impl SubprocessSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    fn run_once(&self, mesh: &Path, region: &Region) -> Result<(), SamplerError> {
        let program = &self.config.program;
        log::debug!("Running {} -s {} -m {} --method {}", program, region.path.display(), mesh.display(), self.config.method);

        let mut child = Command::new(program)
            .args(&self.config.leading_args)
            .arg("-s")
            .arg(&region.path)
            .arg("-m")
            .arg(mesh)
            .arg("--method")
            .arg(&self.config.method)
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| SamplerError::Spawn { program: program.clone(), source })?;

        let deadline = Instant::now() + self.config.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SamplerError::Timeout { program: program.clone(), timeout: self.config.timeout });
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(source) => return Err(SamplerError::Spawn { program: program.clone(), source }),
            }
        };

        if !status.success() {
            return Err(SamplerError::Failed { program: program.clone(), status: status.to_string() });
        }
        Ok(())
    }
}

fn remove_stale(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::debug!("  Could not remove {}: {}", path.display(), e);
        }
    }
}

impl FieldSampler for SubprocessSampler {
    /// `<region dir>/<region name>_<field>.csv`
    fn output_path(&self, region: &Region) -> PathBuf {
        region.path.with_file_name(format!("{}_{}.csv", region.name, self.config.field))
    }

    fn sample(&self, mesh: &Path, region: &Region) -> Result<PathBuf, SamplerError> {
        let output = self.output_path(region);
        let mut attempt = 0;
        loop {
            // only output written by this attempt counts
            remove_stale(&output);
            match self.run_once(mesh, region) {
                Ok(()) => break,
                Err(e) if attempt < self.config.retries => {
                    attempt += 1;
                    log::warn!("  {} (attempt {}/{}), retrying", e, attempt, self.config.retries + 1);
                }
                Err(e) => {
                    remove_stale(&output);
                    return Err(e);
                }
            }
        }

        if !output.exists() {
            return Err(SamplerError::MissingOutput(output));
        }
        Ok(output)
    }
}

/// Numeric values of the first column. Rows whose first field is not a
/// number, or is NaN, are dropped.
pub fn parse_sample_output(path: &Path) -> Result<Vec<f64>, SamplerError> {
    let display = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| SamplerError::Read { path: display.clone(), source })?;

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| SamplerError::Read { path: display.clone(), source })?;
        if let Some(v) = record.get(0).and_then(|s| s.parse::<f64>().ok()) {
            if !v.is_nan() {
                values.push(v);
            }
        }
    }
    Ok(values)
}

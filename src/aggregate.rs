// Region aggregation
//
// Samples every result mesh at every region, keeps the values in a nested
// mesh -> region -> values map (also written as a JSON checkpoint), then
// pivots that map into one CSV row per montage and one column per region.

use crate::electrode::LabelFormat;
use crate::leadfield::LeadfieldVariant;
use crate::mesh::list_mesh_files;
use crate::region::Region;
use crate::sampler::{parse_sample_output, FieldSampler};
use crate::writer::file_prefix;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// mesh file name -> region name -> sampled values
pub type RegionSamples = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Checkpoint file name inside the simulation directory
pub const CHECKPOINT_FILE: &str = "mesh_data.json";

/// Matrix file name inside the simulation directory
pub const MATRIX_FILE: &str = "output.csv";

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid checkpoint {path}: {source}")]
    Checkpoint {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write matrix {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// A (mesh, region) pair that contributed nothing
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub mesh: String,
    pub region: String,
    pub reason: String,
}

/// Everything one aggregation pass produced
#[derive(Debug, Default)]
pub struct AggregationReport {
    pub samples: RegionSamples,
    /// Meshes whose names do not carry two electrode-pair identifiers
    pub skipped_meshes: Vec<String>,
    pub failures: Vec<SampleFailure>,
}

/// Drives a [`FieldSampler`] over meshes and regions
pub struct Aggregator<'a, S: FieldSampler> {
    sampler: &'a S,
    format: LabelFormat,
    /// Only mesh files whose name starts with this are sampled, so one
    /// leadfield variant fills the matrix
    prefix: String,
}

impl<'a, S: FieldSampler> Aggregator<'a, S> {
    /// Samples the volume results (`TI_field_*`) by default
    pub fn new(sampler: &'a S) -> Self {
        Self {
            sampler,
            format: LabelFormat::default(),
            prefix: file_prefix(LeadfieldVariant::Volume).to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_label_format(mut self, format: LabelFormat) -> Self {
        self.format = format;
        self
    }

    /// Sample every matching `*.msh` file in `mesh_dir` at every region
    pub fn run(&self, mesh_dir: &Path, regions: &[Region]) -> Result<AggregationReport, AggregateError> {
        let meshes = list_mesh_files(mesh_dir, &self.prefix)
            .map_err(|source| AggregateError::Io { path: mesh_dir.display().to_string(), source })?;
        let total = meshes.len();
        let mut report = AggregationReport::default();

        for (i, mesh_path) in meshes.iter().enumerate() {
            let mesh_name = file_name(mesh_path);
            log::info!("{:03}/{} Processing {}", i + 1, total, mesh_name);

            if self.format.find_pairs(&mesh_name).len() != 2 {
                log::warn!("  Could not extract two electrode pairs from {}, skipping", mesh_name);
                report.skipped_meshes.push(mesh_name);
                continue;
            }

            let mut per_region = BTreeMap::new();
            for region in regions {
                match self.sample_one(mesh_path, region) {
                    Ok(values) => {
                        per_region.insert(region.name.clone(), values);
                    }
                    Err(reason) => {
                        log::warn!("  {} @ {}: {}", mesh_name, region.name, reason);
                        report.failures.push(SampleFailure {
                            mesh: mesh_name.clone(),
                            region: region.name.clone(),
                            reason,
                        });
                    }
                }
            }
            report.samples.insert(mesh_name, per_region);
        }

        log::info!(
            "Aggregated {} meshes ({} skipped, {} failed samples)",
            report.samples.len(),
            report.skipped_meshes.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Values for one (mesh, region) pair. The sampler's output file is
    /// removed after every call, including failed ones.
    fn sample_one(&self, mesh: &Path, region: &Region) -> Result<Vec<f64>, String> {
        let result = self
            .sampler
            .sample(mesh, region)
            .map_err(|e| e.to_string())
            .and_then(|output| {
                let values = parse_sample_output(&output).map_err(|e| e.to_string())?;
                if values.is_empty() {
                    return Err(format!("no numeric values in {}", output.display()));
                }
                Ok(values)
            });

        let output = self.sampler.output_path(region);
        if let Err(e) = std::fs::remove_file(&output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::debug!("  Could not remove {}: {}", output.display(), e);
            }
        }
        result
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Overwrite the checkpoint with the current samples
pub fn save_checkpoint(samples: &RegionSamples, path: &Path) -> Result<(), AggregateError> {
    let file = File::create(path).map_err(|source| AggregateError::Io { path: path.display().to_string(), source })?;
    serde_json::to_writer_pretty(BufWriter::new(file), samples)
        .map_err(|source| AggregateError::Checkpoint { path: path.display().to_string(), source })
}

pub fn load_checkpoint(path: &Path) -> Result<RegionSamples, AggregateError> {
    let file = File::open(path).map_err(|source| AggregateError::Io { path: path.display().to_string(), source })?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|source| AggregateError::Checkpoint { path: path.display().to_string(), source })
}

/// Montage x region table
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMatrix {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RegionMatrix {
    /// Pivot samples into a table. Columns are the sorted union of
    /// `regions` and every sampled region; cells hold the first sampled
    /// value or are empty.
    pub fn from_samples(samples: &RegionSamples, regions: &[String], format: &LabelFormat) -> Self {
        let columns: BTreeSet<&str> = regions
            .iter()
            .map(String::as_str)
            .chain(samples.values().flat_map(|r| r.keys().map(String::as_str)))
            .collect();

        let mut header = vec!["Mesh".to_string()];
        header.extend(columns.iter().map(|c| c.to_string()));

        let rows = samples
            .iter()
            .map(|(mesh, per_region)| {
                let mut row = vec![montage_label(mesh, format)];
                row.extend(columns.iter().map(|c| {
                    per_region
                        .get(*c)
                        .and_then(|values| values.first())
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                }));
                row
            })
            .collect();

        Self { header, rows }
    }

    /// Rows including the header
    pub fn num_rows(&self) -> usize {
        self.rows.len() + 1
    }

    /// Columns including the row label
    pub fn num_columns(&self) -> usize {
        self.header.len()
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), AggregateError> {
        let display = path.display().to_string();
        let mut writer = csv::Writer::from_path(path).map_err(|source| AggregateError::Csv { path: display.clone(), source })?;

        for record in std::iter::once(&self.header).chain(&self.rows) {
            writer
                .write_record(record)
                .map_err(|source| AggregateError::Csv { path: display.clone(), source })?;
        }
        writer.flush().map_err(|source| AggregateError::Io { path: display, source })
    }
}

/// "E076_E172 <> E097_E162" for a result mesh name, the name itself when it
/// carries no pair identifiers
pub fn montage_label(mesh_name: &str, format: &LabelFormat) -> String {
    match format.find_pairs(mesh_name).as_slice() {
        [first, second] => format!("{} <> {}", first, second),
        _ => mesh_name.to_string(),
    }
}

/// Paths written by [`finish`]
#[derive(Debug, Clone)]
pub struct AggregationOutputs {
    pub checkpoint: PathBuf,
    pub matrix: PathBuf,
}

/// Write the checkpoint and the matrix for a finished pass
pub fn finish(
    samples: &RegionSamples,
    regions: &[String],
    format: &LabelFormat,
    out_dir: &Path,
) -> Result<AggregationOutputs, AggregateError> {
    let checkpoint = out_dir.join(CHECKPOINT_FILE);
    save_checkpoint(samples, &checkpoint)?;
    log::info!("Checkpoint saved to {}", checkpoint.display());

    let matrix = out_dir.join(MATRIX_FILE);
    RegionMatrix::from_samples(samples, regions, format).write_csv(&matrix)?;
    log::info!("Matrix written to {}", matrix.display());

    Ok(AggregationOutputs { checkpoint, matrix })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3D;
    use crate::sampler::SamplerError;
    use std::collections::HashMap;

    /// Writes canned output next to the region file
    struct StubSampler {
        /// (mesh file name, region name) -> file contents; missing pairs fail
        outputs: HashMap<(String, String), String>,
    }

    impl FieldSampler for StubSampler {
        fn output_path(&self, region: &Region) -> PathBuf {
            region.path.with_file_name(format!("{}_TImax.csv", region.name))
        }

        fn sample(&self, mesh: &Path, region: &Region) -> Result<PathBuf, SamplerError> {
            let key = (file_name(mesh), region.name.clone());
            let out = self.output_path(region);
            match self.outputs.get(&key) {
                Some(contents) => {
                    std::fs::write(&out, contents).unwrap();
                    Ok(out)
                }
                None => Err(SamplerError::MissingOutput(out)),
            }
        }
    }

    fn region(dir: &Path, name: &str) -> Region {
        Region { name: name.to_string(), path: dir.join(format!("{}.csv", name)), coordinates: vec![Point3D::origin()] }
    }

    const MESH_A: &str = "TI_field_E001_E002_and_E003_E004.msh";
    const MESH_B: &str = "TI_field_E005_E006_and_E007_E008.msh";

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let meshes = root.path().join("opt");
        let rois = root.path().join("ROIs");
        std::fs::create_dir_all(&meshes).unwrap();
        std::fs::create_dir_all(&rois).unwrap();
        // the surface result is not part of a volume aggregation
        for name in [MESH_A, MESH_B, "TI_field_Cz_Fz.msh", "TI_norm_field_E001_E002_and_E003_E004.msh"] {
            std::fs::write(meshes.join(name), "{}").unwrap();
        }
        (root, meshes, rois)
    }

    #[test]
    fn test_aggregation_and_matrix_shape() {
        let (_root, meshes, rois) = setup();
        let regions = vec![region(&rois, "motor"), region(&rois, "insula")];

        let mut outputs = HashMap::new();
        outputs.insert((MESH_A.to_string(), "motor".to_string()), "0.25\n0.5\n".to_string());
        outputs.insert((MESH_A.to_string(), "insula".to_string()), "header\n0.125\n".to_string());
        outputs.insert((MESH_B.to_string(), "motor".to_string()), "not-a-number\n".to_string());
        let sampler = StubSampler { outputs };

        let report = Aggregator::new(&sampler).run(&meshes, &regions).unwrap();

        assert_eq!(report.skipped_meshes, vec!["TI_field_Cz_Fz.msh".to_string()]);
        assert_eq!(report.samples.len(), 2);
        assert!(!report.samples.contains_key("TI_norm_field_E001_E002_and_E003_E004.msh"));
        assert_eq!(report.samples[MESH_A]["motor"], vec![0.25, 0.5]);
        assert_eq!(report.samples[MESH_A]["insula"], vec![0.125]);
        assert!(report.samples[MESH_B].is_empty());
        // unparsable output plus a missing one
        assert_eq!(report.failures.len(), 2);

        // temporary sampler outputs are gone
        let leftovers: Vec<_> = std::fs::read_dir(&rois).unwrap().collect();
        assert!(leftovers.is_empty());

        let names: Vec<String> = regions.iter().map(|r| r.name.clone()).collect();
        let matrix = RegionMatrix::from_samples(&report.samples, &names, &LabelFormat::default());
        assert_eq!(matrix.num_rows(), 3);
        assert_eq!(matrix.num_columns(), 3);
        assert_eq!(matrix.header, vec!["Mesh", "insula", "motor"]);
        assert_eq!(matrix.rows[0], vec!["E001_E002 <> E003_E004", "0.125", "0.25"]);
        assert_eq!(matrix.rows[1], vec!["E005_E006 <> E007_E008", "", ""]);
    }

    #[test]
    fn test_prefix_selects_surface_results() {
        let (_root, meshes, rois) = setup();
        let regions = vec![region(&rois, "motor")];
        let mut outputs = HashMap::new();
        outputs.insert(("TI_norm_field_E001_E002_and_E003_E004.msh".to_string(), "motor".to_string()), "0.5\n".to_string());
        let sampler = StubSampler { outputs };

        let report = Aggregator::new(&sampler).with_prefix("TI_norm_field").run(&meshes, &regions).unwrap();
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples["TI_norm_field_E001_E002_and_E003_E004.msh"]["motor"], vec![0.5]);
        assert!(report.failures.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_sample_not_credited_to_next_mesh() {
        use crate::sampler::{SamplerConfig, SubprocessSampler};

        let (root, meshes, rois) = setup();
        let regions = vec![region(&rois, "motor")];
        // writes a value for the first montage and then fails, stays silent for the second
        let script = root.path().join("sampler.sh");
        let output = rois.join("motor_TImax.csv");
        std::fs::write(
            &script,
            format!("case \"$4\" in *E001*) echo 0.9 > '{}'; exit 1;; esac\nexit 0\n", output.display()),
        )
        .unwrap();
        let sampler = SubprocessSampler::new(SamplerConfig {
            program: "sh".to_string(),
            leading_args: vec![script.display().to_string()],
            retries: 0,
            ..SamplerConfig::default()
        });

        let report = Aggregator::new(&sampler).run(&meshes, &regions).unwrap();
        assert!(report.samples[MESH_A].is_empty());
        assert!(report.samples[MESH_B].is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|f| f.mesh == MESH_B && f.region == "motor"));
        assert!(!output.exists());
    }

    #[test]
    fn test_checkpoint_round_trip_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut samples = RegionSamples::new();
        samples
            .entry(MESH_A.to_string())
            .or_default()
            .insert("motor".to_string(), vec![0.3, 0.1]);

        let outputs = finish(&samples, &["motor".to_string()], &LabelFormat::default(), dir.path()).unwrap();
        assert_eq!(load_checkpoint(&outputs.checkpoint).unwrap(), samples);

        let csv = std::fs::read_to_string(&outputs.matrix).unwrap();
        assert_eq!(csv, "Mesh,motor\nE001_E002 <> E003_E004,0.3\n");
    }

    #[test]
    fn test_montage_label_fallback() {
        let format = LabelFormat::default();
        assert_eq!(montage_label(MESH_B, &format), "E005_E006 <> E007_E008");
        assert_eq!(montage_label("odd.msh", &format), "odd.msh");
    }
}

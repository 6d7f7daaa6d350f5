// Leadfield container
//
// The FEM solver writes one field-vector row per electrode, relative to a
// reference electrode whose row is implicitly zero. Rows are sampled per
// element for volume leadfields and per node for gray-matter surface
// leadfields.

use crate::geometry::Vector3D;
use crate::mesh::{FieldMesh, MeshError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LeadfieldError {
    #[error("Failed to open leadfield {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid leadfield {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Leadfield mesh: {0}")]
    Mesh(#[from] MeshError),

    #[error("Reference electrode {0} is not in the electrode list")]
    MissingReference(String),

    #[error("Electrode {0} listed twice")]
    DuplicateElectrode(String),

    #[error("Leadfield has {actual} basis rows, expected {expected} (electrodes minus reference)")]
    RowCount { expected: usize, actual: usize },

    #[error("Basis row for {electrode} has {actual} samples, mesh provides {expected}")]
    SampleCount {
        electrode: String,
        expected: usize,
        actual: usize,
    },
}

/// Leadfield flavour, which also decides the TI metric computed from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadfieldVariant {
    /// Whole-head volume, sampled per element
    #[serde(rename = "vol")]
    Volume,
    /// Gray-matter middle surface, sampled per node
    #[serde(rename = "gm")]
    Surface,
}

impl LeadfieldVariant {
    /// Short name used in directory names
    pub fn tag(self) -> &'static str {
        match self {
            LeadfieldVariant::Volume => "vol",
            LeadfieldVariant::Surface => "gm",
        }
    }

    /// Number of field samples a mesh provides for this variant
    pub fn sample_count(self, mesh: &FieldMesh) -> usize {
        match self {
            LeadfieldVariant::Volume => mesh.num_elements(),
            LeadfieldVariant::Surface => mesh.num_nodes(),
        }
    }
}

impl fmt::Display for LeadfieldVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for LeadfieldVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vol" | "volume" => Ok(LeadfieldVariant::Volume),
            "gm" | "surface" => Ok(LeadfieldVariant::Surface),
            other => Err(format!("unknown leadfield variant '{}'", other)),
        }
    }
}

/// On-disk layout
#[derive(Serialize, Deserialize)]
struct LeadfieldFile {
    variant: LeadfieldVariant,
    electrodes: Vec<String>,
    reference: String,
    mesh: FieldMesh,
    basis: Vec<Vec<Vector3D>>,
}

/// Loaded leadfield. Read-only; the base mesh is shared with every result
/// derived from it.
#[derive(Debug, Clone)]
pub struct Leadfield {
    variant: LeadfieldVariant,
    electrodes: Vec<String>,
    reference: String,
    mesh: Arc<FieldMesh>,
    basis: Vec<Vec<Vector3D>>,
    /// label -> basis row; `None` for the reference electrode
    index: HashMap<String, Option<usize>>,
}

impl Leadfield {
    /// `basis` holds one row per electrode except the reference, in the
    /// order of `electrodes`.
    pub fn new(
        variant: LeadfieldVariant,
        electrodes: Vec<String>,
        reference: String,
        mesh: FieldMesh,
        basis: Vec<Vec<Vector3D>>,
    ) -> Result<Self, LeadfieldError> {
        if !electrodes.contains(&reference) {
            return Err(LeadfieldError::MissingReference(reference));
        }

        let mut index = HashMap::with_capacity(electrodes.len());
        let mut row = 0;
        for label in &electrodes {
            let slot = if *label == reference {
                None
            } else {
                row += 1;
                Some(row - 1)
            };
            if index.insert(label.clone(), slot).is_some() {
                return Err(LeadfieldError::DuplicateElectrode(label.clone()));
            }
        }

        if basis.len() != electrodes.len() - 1 {
            return Err(LeadfieldError::RowCount { expected: electrodes.len() - 1, actual: basis.len() });
        }

        let samples = variant.sample_count(&mesh);
        for (label, slot) in &index {
            if let Some(r) = slot {
                if basis[*r].len() != samples {
                    return Err(LeadfieldError::SampleCount {
                        electrode: label.clone(),
                        expected: samples,
                        actual: basis[*r].len(),
                    });
                }
            }
        }

        Ok(Self { variant, electrodes, reference, mesh: Arc::new(mesh), basis, index })
    }

    /// Load a leadfield file. Failure here is fatal for a search run.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LeadfieldError> {
        let path = path.as_ref();
        log::info!("Loading leadfield {}", path.display());

        let file = File::open(path).map_err(|source| LeadfieldError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: LeadfieldFile = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            LeadfieldError::Format { path: path.display().to_string(), source }
        })?;

        let leadfield = Self::new(raw.variant, raw.electrodes, raw.reference, raw.mesh, raw.basis)?;
        log::info!(
            "  {} leadfield: {} electrodes, {} samples",
            leadfield.variant,
            leadfield.electrodes.len(),
            leadfield.num_samples()
        );
        Ok(leadfield)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), LeadfieldError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| LeadfieldError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let raw = LeadfieldFile {
            variant: self.variant,
            electrodes: self.electrodes.clone(),
            reference: self.reference.clone(),
            mesh: (*self.mesh).clone(),
            basis: self.basis.clone(),
        };
        serde_json::to_writer(BufWriter::new(file), &raw).map_err(|source| LeadfieldError::Format {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn variant(&self) -> LeadfieldVariant {
        self.variant
    }

    pub fn electrodes(&self) -> &[String] {
        &self.electrodes
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn mesh(&self) -> &Arc<FieldMesh> {
        &self.mesh
    }

    pub fn num_samples(&self) -> usize {
        self.variant.sample_count(&self.mesh)
    }

    /// Basis row for an electrode. `Some(None)` is the reference electrode,
    /// `None` an unknown label.
    pub fn row(&self, label: &str) -> Option<Option<&[Vector3D]>> {
        self.index.get(label).map(|slot| slot.map(|r| self.basis[r].as_slice()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mesh::tests::sample_mesh;

    /// Volume leadfield on the sample mesh (3 elements), reference E001
    pub(crate) fn volume_leadfield() -> Leadfield {
        let basis = vec![
            vec![Vector3D::new(1.0, 0.0, 0.0); 3],
            vec![Vector3D::new(0.0, 1.0, 0.0); 3],
            vec![Vector3D::new(0.0, 0.0, 2.0); 3],
        ];
        Leadfield::new(
            LeadfieldVariant::Volume,
            vec!["E001".into(), "E002".into(), "E003".into(), "E004".into()],
            "E001".into(),
            sample_mesh(),
            basis,
        )
        .unwrap()
    }

    #[test]
    fn test_index_resolves_rows() {
        let lf = volume_leadfield();
        assert_eq!(lf.num_samples(), 3);
        assert_eq!(lf.row("E001"), Some(None));
        assert_eq!(lf.row("E003").unwrap().unwrap()[0], Vector3D::new(0.0, 1.0, 0.0));
        assert_eq!(lf.row("E999"), None);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let labels = vec!["E001".to_string(), "E002".to_string()];

        let err = Leadfield::new(LeadfieldVariant::Volume, labels.clone(), "E009".into(), sample_mesh(), vec![])
            .unwrap_err();
        assert!(matches!(err, LeadfieldError::MissingReference(_)));

        let err = Leadfield::new(LeadfieldVariant::Volume, labels.clone(), "E001".into(), sample_mesh(), vec![])
            .unwrap_err();
        assert!(matches!(err, LeadfieldError::RowCount { expected: 1, actual: 0 }));

        // surface variant needs one sample per node (5), not per element
        let err = Leadfield::new(
            LeadfieldVariant::Surface,
            labels,
            "E001".into(),
            sample_mesh(),
            vec![vec![Vector3D::zeros(); 3]],
        )
        .unwrap_err();
        assert!(matches!(err, LeadfieldError::SampleCount { expected: 5, actual: 3, .. }));
    }

    #[test]
    fn test_duplicate_electrode() {
        let err = Leadfield::new(
            LeadfieldVariant::Volume,
            vec!["E001".into(), "E002".into(), "E002".into()],
            "E001".into(),
            sample_mesh(),
            vec![vec![Vector3D::zeros(); 3]; 2],
        )
        .unwrap_err();
        assert!(matches!(err, LeadfieldError::DuplicateElectrode(_)));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lf.json");
        volume_leadfield().save(&path).unwrap();

        let loaded = Leadfield::load(&path).unwrap();
        assert_eq!(loaded.variant(), LeadfieldVariant::Volume);
        assert_eq!(loaded.electrodes().len(), 4);
        assert_eq!(loaded.row("E004").unwrap().unwrap()[2], Vector3D::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Leadfield::load("/nonexistent/leadfield.json").unwrap_err();
        assert!(matches!(err, LeadfieldError::Io { .. }));
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!("gm".parse::<LeadfieldVariant>().unwrap(), LeadfieldVariant::Surface);
        assert_eq!("vol".parse::<LeadfieldVariant>().unwrap(), LeadfieldVariant::Volume);
        assert!("both".parse::<LeadfieldVariant>().is_err());
    }
}

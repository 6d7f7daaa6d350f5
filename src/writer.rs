// Result mesh output
//
// Each combination gets its own mesh file next to a small display
// descriptor (.opt) that limits the visible tissues and selects the TI
// field for viewing.

use crate::combination::Combination;
use crate::leadfield::LeadfieldVariant;
use crate::mesh::{FieldMesh, MeshError};
use crate::synthesis::IntensityField;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Field name for the volume metric
pub const MAX_ENVELOPE_FIELD: &str = "TImax";

/// Field name for the surface metric
pub const DIRECTIONAL_FIELD: &str = "TIamp_localnorm";

/// Extension of result mesh files
pub const MESH_EXTENSION: &str = "msh";

/// Scalp, skull and the gray-matter surface
pub const DEFAULT_VISIBLE_TAGS: [i32; 3] = [1, 2, 1006];

/// Companion display configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    pub mesh: String,
    pub visible_tags: Vec<i32>,
    pub visible_field: String,
}

impl ViewDescriptor {
    /// `<mesh>.opt`
    pub fn path_for(mesh_path: &Path) -> PathBuf {
        let mut name = mesh_path.as_os_str().to_owned();
        name.push(".opt");
        PathBuf::from(name)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MeshError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MeshError::Io { path: path.display().to_string(), source })?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|source| MeshError::InvalidFormat { path: path.display().to_string(), source })
    }
}

/// Output file prefix per variant
pub fn file_prefix(variant: LeadfieldVariant) -> &'static str {
    match variant {
        LeadfieldVariant::Volume => "TI_field",
        LeadfieldVariant::Surface => "TI_norm_field",
    }
}

/// Field name per variant
pub fn field_name(variant: LeadfieldVariant) -> &'static str {
    match variant {
        LeadfieldVariant::Volume => MAX_ENVELOPE_FIELD,
        LeadfieldVariant::Surface => DIRECTIONAL_FIELD,
    }
}

/// `<prefix>_<e1+>_<e1->_and_<e2+>_<e2->.msh`
pub fn mesh_file_name(variant: LeadfieldVariant, combination: &Combination) -> String {
    format!(
        "{}_{}_and_{}.{}",
        file_prefix(variant),
        combination.first,
        combination.second,
        MESH_EXTENSION
    )
}

/// Writes per-combination result meshes into one output directory
#[derive(Debug, Clone)]
pub struct MeshResultWriter {
    output_dir: PathBuf,
    visible_tags: Vec<i32>,
}

impl MeshResultWriter {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Self {
        Self { output_dir: output_dir.into(), visible_tags: DEFAULT_VISIBLE_TAGS.to_vec() }
    }

    pub fn with_visible_tags(mut self, tags: Vec<i32>) -> Self {
        self.visible_tags = tags;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where the mesh for this combination goes
    pub fn path_for(&self, variant: LeadfieldVariant, combination: &Combination) -> PathBuf {
        self.output_dir.join(mesh_file_name(variant, combination))
    }

    /// Attach `field` to a copy of `base`, write mesh and descriptor.
    /// `base` is never modified.
    pub fn write(
        &self,
        base: &FieldMesh,
        variant: LeadfieldVariant,
        combination: &Combination,
        field: IntensityField,
    ) -> Result<PathBuf, MeshError> {
        let name = field_name(variant);
        let mut result = base.derive_writable();
        match field {
            IntensityField::MaxEnvelope(values) => result.add_element_field(name, values)?,
            IntensityField::Directional(values) => result.add_node_field(name, values)?,
        }

        let path = self.path_for(variant, combination);
        result.save(&path)?;

        let view = ViewDescriptor {
            mesh: mesh_file_name(variant, combination),
            visible_tags: self.visible_tags.clone(),
            visible_field: name.to_string(),
        };
        let opt_path = ViewDescriptor::path_for(&path);
        let file = File::create(&opt_path)
            .map_err(|source| MeshError::Io { path: opt_path.display().to_string(), source })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &view)
            .map_err(|source| MeshError::InvalidFormat { path: opt_path.display().to_string(), source })?;

        Ok(path)
    }
}

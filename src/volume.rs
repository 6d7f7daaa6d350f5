// Voxel volumes and reference image headers
//
// Volumes use x-fastest ordering: data[x + y*nx + z*nx*ny].

use crate::geometry::Affine3D;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid volume header {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Volume data holds {actual} values, shape {shape:?} needs {expected}")]
    DataLength {
        shape: [usize; 3],
        expected: usize,
        actual: usize,
    },

    #[error("Volume shape {0:?} has an empty axis")]
    EmptyShape([usize; 3]),
}

/// Header as stored on disk: row-major 4x4 affine
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeHeader {
    shape: [usize; 3],
    affine: [[f64; 4]; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_file: Option<String>,
}

fn affine_to_rows(affine: &Affine3D) -> [[f64; 4]; 4] {
    let mut rows = [[0.0; 4]; 4];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = affine[(r, c)];
        }
    }
    rows
}

fn affine_from_rows(rows: &[[f64; 4]; 4]) -> Affine3D {
    Affine3D::from_fn(|r, c| rows[r][c])
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> VolumeError + '_ {
    move |source| VolumeError::Io { path: path.display().to_string(), source }
}

fn read_header(path: &Path) -> Result<VolumeHeader, VolumeError> {
    let file = File::open(path).map_err(io_err(path))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|source| VolumeError::Format { path: path.display().to_string(), source })
}

/// Grid definition of an anatomical image: shape and voxel-to-world affine
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub shape: [usize; 3],
    pub affine: Affine3D,
}

impl ReferenceImage {
    pub fn new(shape: [usize; 3], affine: Affine3D) -> Result<Self, VolumeError> {
        if shape.iter().any(|&d| d == 0) {
            return Err(VolumeError::EmptyShape(shape));
        }
        Ok(Self { shape, affine })
    }

    /// Read the header of a reference image
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, VolumeError> {
        let header = read_header(path.as_ref())?;
        Self::new(header.shape, affine_from_rows(&header.affine))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), VolumeError> {
        let path = path.as_ref();
        let header = VolumeHeader { shape: self.shape, affine: affine_to_rows(&self.affine), data_file: None };
        let file = File::create(path).map_err(io_err(path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &header)
            .map_err(|source| VolumeError::Format { path: path.display().to_string(), source })
    }

    pub fn num_voxels(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Scalar grid congruent with a reference image
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelVolume {
    shape: [usize; 3],
    affine: Affine3D,
    data: Vec<f64>,
}

impl VoxelVolume {
    /// All-zero volume on the reference grid
    pub fn zeros(reference: &ReferenceImage) -> Self {
        Self {
            shape: reference.shape,
            affine: reference.affine,
            data: vec![0.0; reference.num_voxels()],
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn affine(&self) -> &Affine3D {
        &self.affine
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Flat index, `None` outside the grid
    pub fn index(&self, x: i64, y: i64, z: i64) -> Option<usize> {
        let [nx, ny, nz] = self.shape;
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= nx || y >= ny || z >= nz {
            return None;
        }
        Some(x + y * nx + z * nx * ny)
    }

    pub fn get(&self, x: i64, y: i64, z: i64) -> Option<f64> {
        self.index(x, y, z).map(|i| self.data[i])
    }

    /// Write one voxel; returns false (and writes nothing) outside the grid
    pub fn set(&mut self, x: i64, y: i64, z: i64, value: f64) -> bool {
        match self.index(x, y, z) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    /// Write `<stem>.json` (header) and `<stem>.raw` (little-endian f64)
    /// into `dir`, returning the header path.
    pub fn save(&self, dir: &Path, stem: &str) -> Result<PathBuf, VolumeError> {
        let header_path = dir.join(format!("{}.json", stem));
        let raw_name = format!("{}.raw", stem);
        let raw_path = dir.join(&raw_name);

        let header = VolumeHeader {
            shape: self.shape,
            affine: affine_to_rows(&self.affine),
            data_file: Some(raw_name),
        };
        let file = File::create(&header_path).map_err(io_err(&header_path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &header)
            .map_err(|source| VolumeError::Format { path: header_path.display().to_string(), source })?;

        let file = File::create(&raw_path).map_err(io_err(&raw_path))?;
        let mut out = BufWriter::new(file);
        for v in &self.data {
            out.write_all(&v.to_le_bytes()).map_err(io_err(&raw_path))?;
        }
        out.flush().map_err(io_err(&raw_path))?;

        Ok(header_path)
    }

    /// Read a volume written by [`VoxelVolume::save`]
    pub fn load(header_path: &Path) -> Result<Self, VolumeError> {
        let header = read_header(header_path)?;
        let raw_name = match &header.data_file {
            Some(name) => name.clone(),
            None => {
                let stem = header_path.file_stem().unwrap_or_default().to_string_lossy();
                format!("{}.raw", stem)
            }
        };
        let raw_path = header_path.parent().map_or_else(|| PathBuf::from(&raw_name), |p| p.join(&raw_name));

        let mut bytes = Vec::new();
        File::open(&raw_path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(io_err(&raw_path))?;

        let expected: usize = header.shape.iter().product();
        if bytes.len() != expected * 8 {
            return Err(VolumeError::DataLength { shape: header.shape, expected, actual: bytes.len() / 8 });
        }

        let data = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();

        Ok(Self { shape: header.shape, affine: affine_from_rows(&header.affine), data })
    }
}

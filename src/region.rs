// Regions of interest
//
// A region is a CSV file of world coordinates (one x,y,z row per point),
// named after its file stem. A run lists the regions to analyse in a plain
// text file, one path per line.

use crate::geometry::Point3D;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("Row {row} of {path} is not an x,y,z triple")]
    BadRow { path: String, row: usize },

    #[error("Region file {0} has no coordinates")]
    Empty(String),

    #[error("Region name '{0}' must be a single non-empty word")]
    InvalidName(String),
}

/// Named set of world coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub path: PathBuf,
    pub coordinates: Vec<Point3D>,
}

impl Region {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegionError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| RegionError::Io { path: display.clone(), source })?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);

        let mut coordinates = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|source| RegionError::Csv { path: display.clone(), source })?;
            if record.iter().all(str::is_empty) {
                continue;
            }

            let values: Vec<f64> = record.iter().filter_map(|v| v.parse().ok()).collect();
            if values.len() != 3 || record.len() != 3 {
                return Err(RegionError::BadRow { path: display, row: row + 1 });
            }
            coordinates.push(Point3D::new(values[0], values[1], values[2]));
        }

        if coordinates.is_empty() {
            return Err(RegionError::Empty(display));
        }

        Ok(Self { name: region_name(path), path: path.to_path_buf(), coordinates })
    }
}

/// Region name from a definition path (file stem)
pub fn region_name(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

fn validate_name(name: &str) -> Result<(), RegionError> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
        return Err(RegionError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Write `<dir>/<name>.csv` holding the given coordinates
pub fn save_region(dir: &Path, name: &str, coordinates: &[Point3D]) -> Result<PathBuf, RegionError> {
    validate_name(name)?;
    std::fs::create_dir_all(dir).map_err(|source| RegionError::Io { path: dir.display().to_string(), source })?;

    let path = dir.join(format!("{}.csv", name));
    let display = path.display().to_string();
    let mut writer = csv::Writer::from_path(&path).map_err(|source| RegionError::Csv { path: display.clone(), source })?;
    for p in coordinates {
        writer
            .write_record([p.x.to_string(), p.y.to_string(), p.z.to_string()])
            .map_err(|source| RegionError::Csv { path: display.clone(), source })?;
    }
    writer.flush().map_err(|source| RegionError::Io { path: display, source })?;

    Ok(path)
}

/// Names of region files in `dir`, sorted. A missing directory has none.
pub fn list_regions(dir: &Path) -> Result<Vec<String>, RegionError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| RegionError::Io { path: dir.display().to_string(), source })?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .map(|p| region_name(&p))
        .collect();
    names.sort();
    Ok(names)
}

/// Region paths listed in a text file, blank lines ignored
pub fn read_region_list(path: &Path) -> Result<Vec<PathBuf>, RegionError> {
    let file = File::open(path).map_err(|source| RegionError::Io { path: path.display().to_string(), source })?;

    let mut paths = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| RegionError::Io { path: path.display().to_string(), source })?;
        let line = line.trim();
        if !line.is_empty() {
            paths.push(PathBuf::from(line));
        }
    }
    Ok(paths)
}

pub fn write_region_list(path: &Path, regions: &[PathBuf]) -> Result<(), RegionError> {
    let mut file = File::create(path).map_err(|source| RegionError::Io { path: path.display().to_string(), source })?;
    for region in regions {
        writeln!(file, "{}", region.display())
            .map_err(|source| RegionError::Io { path: path.display().to_string(), source })?;
    }
    Ok(())
}

// Mesh-to-voxel projection
//
// Nearest-voxel scatter: each mesh sample is mapped through the inverse
// reference affine, rounded (ties to even) and written if it lands inside
// the grid. Later samples overwrite earlier ones. No interpolation, cost is
// linear in the number of samples.

use crate::geometry::{apply_affine, invert_affine, Point3D};
use crate::mesh::{list_mesh_files, FieldMesh, MeshError};
use crate::volume::{ReferenceImage, VolumeError, VoxelVolume};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Reference affine is singular")]
    SingularAffine,

    #[error("{points} sample points but {values} values")]
    LengthMismatch { points: usize, values: usize },

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("Failed to list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome counts of one projection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub written: usize,
    pub dropped: usize,
}

/// Scatter `values` at world-space `points` into a volume on the reference
/// grid.
pub fn project_points(
    points: &[Point3D],
    values: &[f64],
    reference: &ReferenceImage,
) -> Result<(VoxelVolume, ProjectionStats), ProjectionError> {
    if points.len() != values.len() {
        return Err(ProjectionError::LengthMismatch { points: points.len(), values: values.len() });
    }

    let world_to_voxel = invert_affine(&reference.affine).ok_or(ProjectionError::SingularAffine)?;
    let mut volume = VoxelVolume::zeros(reference);
    let mut stats = ProjectionStats::default();

    for (point, &value) in points.iter().zip(values) {
        let voxel = apply_affine(&world_to_voxel, point);
        if !(voxel.x.is_finite() && voxel.y.is_finite() && voxel.z.is_finite()) {
            stats.dropped += 1;
            continue;
        }
        let (x, y, z) = (voxel.x.round_ties_even(), voxel.y.round_ties_even(), voxel.z.round_ties_even());

        // huge coordinates saturate in the cast and fail the bounds check
        if volume.set(x as i64, y as i64, z as i64, value) {
            stats.written += 1;
        } else {
            stats.dropped += 1;
        }
    }

    Ok((volume, stats))
}

/// Project a named mesh field. Node fields use node positions, element
/// fields use element centroids.
pub fn project_mesh_field(
    mesh: &FieldMesh,
    field: &str,
    reference: &ReferenceImage,
) -> Result<(VoxelVolume, ProjectionStats), ProjectionError> {
    let (points, values, _) = mesh.field_samples(field)?;
    project_points(&points, values, reference)
}

/// Settings for a directory-wide projection
#[derive(Debug, Clone)]
pub struct BatchProjection {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Only mesh files whose name starts with this are projected
    pub prefix: String,
    pub field: String,
}

/// Summary of a batch run
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchProjection {
    /// Project every matching mesh against one reference image. A file that
    /// cannot be read or lacks the field is logged and skipped.
    pub fn run(&self, reference: &ReferenceImage) -> Result<BatchReport, ProjectionError> {
        // Fail early on a singular affine instead of once per file
        invert_affine(&reference.affine).ok_or(ProjectionError::SingularAffine)?;

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|source| ProjectionError::Io { path: self.output_dir.display().to_string(), source })?;

        let files = list_mesh_files(&self.input_dir, &self.prefix)
            .map_err(|source| ProjectionError::Io { path: self.input_dir.display().to_string(), source })?;
        let total = files.len();
        let mut report = BatchReport::default();

        for (i, path) in files.iter().enumerate() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            log::info!("{:03}/{} Processing {}...", i + 1, total, name);

            let stem = format!("{}_volumetric", path.file_stem().and_then(|s| s.to_str()).unwrap_or_default());
            let result = FieldMesh::load(path)
                .map_err(ProjectionError::from)
                .and_then(|mesh| project_mesh_field(&mesh, &self.field, reference))
                .and_then(|(volume, stats)| {
                    log::debug!("  {} samples written, {} outside the grid", stats.written, stats.dropped);
                    volume.save(&self.output_dir, &stem).map_err(ProjectionError::from)
                });

            match result {
                Ok(out) => {
                    log::info!("  Volume saved to {}", out.display());
                    report.written.push(out);
                }
                Err(e) => {
                    log::warn!("  Skipping {}: {}", name, e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        log::info!("Projected {} of {} mesh files", report.written.len(), total);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Affine3D;
    use crate::mesh::Element;

    /// 10x10x10 grid, 2 mm voxels, origin at (-10, -10, -10)
    fn reference() -> ReferenceImage {
        let mut affine = Affine3D::identity() * 2.0;
        affine[(3, 3)] = 1.0;
        affine[(0, 3)] = -10.0;
        affine[(1, 3)] = -10.0;
        affine[(2, 3)] = -10.0;
        ReferenceImage::new([10, 10, 10], affine).unwrap()
    }

    #[test]
    fn test_point_lands_in_nearest_voxel() {
        let points = vec![Point3D::new(-10.0, -10.0, -10.0), Point3D::new(0.9, 2.2, -3.1)];
        let (volume, stats) = project_points(&points, &[1.0, 2.0], &reference()).unwrap();

        assert_eq!(stats, ProjectionStats { written: 2, dropped: 0 });
        assert_eq!(volume.get(0, 0, 0), Some(1.0));
        // (0.9, 2.2, -3.1) -> voxel (5.45, 6.1, 3.45) -> (5, 6, 3)
        assert_eq!(volume.get(5, 6, 3), Some(2.0));
        assert_eq!(volume.count_nonzero(), 2);
    }

    #[test]
    fn test_out_of_bounds_values_never_written() {
        let points = vec![
            Point3D::new(100.0, 0.0, 0.0),
            Point3D::new(0.0, -11.5, 0.0),
            Point3D::new(0.0, 0.0, 9.1),
            Point3D::new(f64::NAN, 0.0, 0.0),
        ];
        let values = [7.0, 7.0, 7.0, 7.0];
        let (volume, stats) = project_points(&points, &values, &reference()).unwrap();

        assert_eq!(stats.dropped, 4);
        assert!(volume.data().iter().all(|&v| v != 7.0));
    }

    #[test]
    fn test_last_writer_wins() {
        // both map to voxel (5, 5, 5)
        let points = vec![Point3D::new(0.1, 0.1, 0.1), Point3D::new(0.6, -0.4, 0.2)];
        let (volume, _) = project_points(&points, &[1.0, 3.0], &reference()).unwrap();
        assert_eq!(volume.get(5, 5, 5), Some(3.0));
        assert_eq!(volume.count_nonzero(), 1);
    }

    #[test]
    fn test_ties_round_to_even() {
        // voxel coordinate 2.5 -> 2, 3.5 -> 4
        let points = vec![Point3D::new(-5.0, -10.0, -10.0), Point3D::new(-3.0, -10.0, -10.0)];
        let (volume, _) = project_points(&points, &[1.0, 2.0], &reference()).unwrap();
        assert_eq!(volume.get(2, 0, 0), Some(1.0));
        assert_eq!(volume.get(4, 0, 0), Some(2.0));
    }

    #[test]
    fn test_projection_is_idempotent() {
        let points: Vec<Point3D> = (0..50)
            .map(|i| Point3D::new(i as f64 * 0.37 - 9.0, (i % 7) as f64 - 3.0, (i % 5) as f64 * 1.3))
            .collect();
        let values: Vec<f64> = (0..50).map(|i| i as f64 * 0.01 + 0.5).collect();

        let (a, _) = project_points(&points, &values, &reference()).unwrap();
        let (b, _) = project_points(&points, &values, &reference()).unwrap();
        let bits = |v: &VoxelVolume| v.data().iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_singular_affine() {
        let reference = ReferenceImage::new([2, 2, 2], Affine3D::zeros()).unwrap();
        let err = project_points(&[Point3D::origin()], &[1.0], &reference).unwrap_err();
        assert!(matches!(err, ProjectionError::SingularAffine));
    }

    #[test]
    fn test_length_mismatch() {
        let err = project_points(&[Point3D::origin()], &[], &reference()).unwrap_err();
        assert!(matches!(err, ProjectionError::LengthMismatch { points: 1, values: 0 }));
    }

    #[test]
    fn test_batch_projection() {
        let input = tempfile::tempdir().unwrap();
        let output = input.path().join("niftis");

        let nodes = vec![
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(2.0, 0.0, 0.0),
            Point3D::new(0.0, 2.0, 0.0),
        ];
        let mut mesh = FieldMesh::new(nodes, vec![Element::triangle([0, 1, 2], 1006)]).unwrap();
        mesh.add_node_field("TIamp_localnorm", vec![0.1, 0.2, 0.3]).unwrap();
        mesh.save(input.path().join("TI_norm_field_E001_E002_and_E003_E004.msh")).unwrap();

        // no field of that name: skipped, not fatal
        let bare = FieldMesh::new(vec![Point3D::origin()], vec![]).unwrap();
        bare.save(input.path().join("TI_norm_field_E005_E006_and_E007_E008.msh")).unwrap();

        // wrong prefix: ignored
        mesh.save(input.path().join("TI_field_E001_E002_and_E003_E004.msh")).unwrap();

        let batch = BatchProjection {
            input_dir: input.path().to_path_buf(),
            output_dir: output.clone(),
            prefix: "TI_norm_field".to_string(),
            field: "TIamp_localnorm".to_string(),
        };
        let report = batch.run(&reference()).unwrap();

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.failed.len(), 1);

        let volume = VoxelVolume::load(&output.join("TI_norm_field_E001_E002_and_E003_E004_volumetric.json")).unwrap();
        assert_eq!(volume.get(5, 5, 5), Some(0.1));
        assert_eq!(volume.get(6, 5, 5), Some(0.2));
        assert_eq!(volume.get(5, 6, 5), Some(0.3));
    }
}

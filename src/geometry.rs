use nalgebra::{Matrix4, Point3, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// 3D point type (world coordinates, millimetres)
pub type Point3D = Point3<f64>;

/// 3D vector type
pub type Vector3D = Vector3<f64>;

/// Homogeneous 4x4 transform from voxel-index space to world space
pub type Affine3D = Matrix4<f64>;

/// Triangle defined by three vertices
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Triangle {
    pub v0: Point3D,
    pub v1: Point3D,
    pub v2: Point3D,
}

impl Triangle {
    pub fn new(v0: Point3D, v1: Point3D, v2: Point3D) -> Self {
        Self { v0, v1, v2 }
    }

    /// Unnormalized normal; its length is twice the triangle area.
    pub fn area_normal(&self) -> Vector3D {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal, or (0, 0, 1) for degenerate triangles
    pub fn normal(&self) -> Vector3D {
        let cross = self.area_normal();
        let norm = cross.norm();

        if norm < 1e-10 || !norm.is_finite() {
            return Vector3D::new(0.0, 0.0, 1.0);
        }

        cross / norm
    }

    pub fn area(&self) -> f64 {
        self.area_normal().norm() / 2.0
    }

    pub fn centroid(&self) -> Point3D {
        Point3D::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }
}

/// Centroid of an arbitrary point set (element barycenter)
pub fn centroid(points: &[Point3D]) -> Point3D {
    if points.is_empty() {
        return Point3D::origin();
    }

    let sum: Vector3D = points.iter().map(|p| p.coords).sum();
    Point3D::from(sum / points.len() as f64)
}

/// Apply a homogeneous affine to a point
pub fn apply_affine(affine: &Affine3D, point: &Point3D) -> Point3D {
    let h = affine * Vector4::new(point.x, point.y, point.z, 1.0);
    Point3D::new(h.x, h.y, h.z)
}

/// Invert an affine, returning `None` when it is singular
pub fn invert_affine(affine: &Affine3D) -> Option<Affine3D> {
    affine.try_inverse()
}

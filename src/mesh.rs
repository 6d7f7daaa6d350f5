use crate::geometry::{centroid, Point3D, Triangle, Vector3D};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Failed to read mesh {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid mesh format in {path}: {source}")]
    InvalidFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Empty mesh")]
    EmptyMesh,

    #[error("Element {element} references node {node}, mesh has {num_nodes} nodes")]
    InvalidNodeIndex {
        element: usize,
        node: usize,
        num_nodes: usize,
    },

    #[error("Element {element} is a {kind:?} with {actual} nodes")]
    InvalidArity {
        element: usize,
        kind: ElementKind,
        actual: usize,
    },

    #[error("Field '{name}' has {actual} values, expected {expected}")]
    FieldLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Field '{0}' not found in mesh")]
    MissingField(String),
}

/// Element types carried by head meshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Triangle,
    Tetrahedron,
}

impl ElementKind {
    pub fn arity(self) -> usize {
        match self {
            ElementKind::Triangle => 3,
            ElementKind::Tetrahedron => 4,
        }
    }
}

/// One mesh element with its anatomical tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    pub tag: i32,
}

impl Element {
    pub fn triangle(nodes: [usize; 3], tag: i32) -> Self {
        Self { kind: ElementKind::Triangle, nodes: nodes.to_vec(), tag }
    }

    pub fn tetrahedron(nodes: [usize; 4], tag: i32) -> Self {
        Self { kind: ElementKind::Tetrahedron, nodes: nodes.to_vec(), tag }
    }
}

/// Which sample points a scalar field lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLocation {
    Node,
    Element,
}

/// Head mesh with per-node and per-element scalar fields.
///
/// A loaded base mesh is shared read-only between combinations; results are
/// attached to an owned copy obtained with [`FieldMesh::derive_writable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMesh {
    pub nodes: Vec<Point3D>,
    pub elements: Vec<Element>,
    #[serde(default)]
    pub node_fields: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub element_fields: BTreeMap<String, Vec<f64>>,
}

impl FieldMesh {
    /// Create a mesh, checking element arity and node references
    pub fn new(nodes: Vec<Point3D>, elements: Vec<Element>) -> Result<Self, MeshError> {
        let mesh = Self {
            nodes,
            elements,
            node_fields: BTreeMap::new(),
            element_fields: BTreeMap::new(),
        };
        mesh.validate()?;
        Ok(mesh)
    }

    fn validate(&self) -> Result<(), MeshError> {
        if self.nodes.is_empty() {
            return Err(MeshError::EmptyMesh);
        }

        let num_nodes = self.nodes.len();
        for (idx, element) in self.elements.iter().enumerate() {
            if element.nodes.len() != element.kind.arity() {
                return Err(MeshError::InvalidArity {
                    element: idx,
                    kind: element.kind,
                    actual: element.nodes.len(),
                });
            }
            if let Some(&node) = element.nodes.iter().find(|&&n| n >= num_nodes) {
                return Err(MeshError::InvalidNodeIndex { element: idx, node, num_nodes });
            }
        }

        for (name, values) in &self.node_fields {
            check_len(name, num_nodes, values.len())?;
        }
        for (name, values) in &self.element_fields {
            check_len(name, self.elements.len(), values.len())?;
        }

        Ok(())
    }

    /// Load a mesh file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MeshError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MeshError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mesh: FieldMesh = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            MeshError::InvalidFormat { path: path.display().to_string(), source }
        })?;
        mesh.validate()?;
        Ok(mesh)
    }

    /// Write the mesh and all of its fields
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), MeshError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| MeshError::Io {
            path: path.display().to_string(),
            source,
        })?;

        serde_json::to_writer(BufWriter::new(file), self).map_err(|source| {
            MeshError::InvalidFormat { path: path.display().to_string(), source }
        })
    }

    /// Owned copy for attaching per-combination results. The receiver is
    /// left untouched.
    pub fn derive_writable(&self) -> FieldMesh {
        self.clone()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn add_node_field(&mut self, name: &str, values: Vec<f64>) -> Result<(), MeshError> {
        check_len(name, self.nodes.len(), values.len())?;
        self.node_fields.insert(name.to_string(), values);
        Ok(())
    }

    pub fn add_element_field(&mut self, name: &str, values: Vec<f64>) -> Result<(), MeshError> {
        check_len(name, self.elements.len(), values.len())?;
        self.element_fields.insert(name.to_string(), values);
        Ok(())
    }

    /// Names of node fields and element fields, in that order
    pub fn field_names(&self) -> (Vec<&str>, Vec<&str>) {
        (
            self.node_fields.keys().map(String::as_str).collect(),
            self.element_fields.keys().map(String::as_str).collect(),
        )
    }

    /// Sample points and values of a named field. Node fields take
    /// precedence; element fields are located at element centroids.
    pub fn field_samples(&self, name: &str) -> Result<(Vec<Point3D>, &[f64], FieldLocation), MeshError> {
        if let Some(values) = self.node_fields.get(name) {
            return Ok((self.nodes.clone(), values, FieldLocation::Node));
        }
        if let Some(values) = self.element_fields.get(name) {
            return Ok((self.element_centroids(), values, FieldLocation::Element));
        }
        Err(MeshError::MissingField(name.to_string()))
    }

    pub fn element_centroids(&self) -> Vec<Point3D> {
        self.elements
            .iter()
            .map(|element| {
                let corners: Vec<Point3D> = element.nodes.iter().map(|&n| self.nodes[n]).collect();
                centroid(&corners)
            })
            .collect()
    }

    /// Area-weighted unit normals per node, accumulated from triangle
    /// elements. Nodes without an adjacent triangle get a zero vector.
    pub fn node_normals(&self) -> Vec<Vector3D> {
        let mut normals = vec![Vector3D::zeros(); self.nodes.len()];

        for element in self.elements.iter().filter(|e| e.kind == ElementKind::Triangle) {
            let tri = Triangle::new(
                self.nodes[element.nodes[0]],
                self.nodes[element.nodes[1]],
                self.nodes[element.nodes[2]],
            );
            let weighted = tri.area_normal();
            for &n in &element.nodes {
                normals[n] += weighted;
            }
        }

        for normal in &mut normals {
            let norm = normal.norm();
            if norm > 1e-12 {
                *normal /= norm;
            }
        }

        normals
    }

    /// Keep only elements whose tag is listed, dropping unreferenced nodes.
    /// Fields are carried over for the surviving nodes/elements.
    pub fn crop_to_tags(&self, tags: &[i32]) -> Result<FieldMesh, MeshError> {
        let kept: Vec<usize> = self
            .elements
            .iter()
            .enumerate()
            .filter(|(_, e)| tags.contains(&e.tag))
            .map(|(i, _)| i)
            .collect();

        let mut remap: HashMap<usize, usize> = HashMap::new();
        let mut old_nodes: Vec<usize> = Vec::new();
        let mut elements = Vec::with_capacity(kept.len());

        for &ei in &kept {
            let element = &self.elements[ei];
            let nodes = element
                .nodes
                .iter()
                .map(|&n| {
                    *remap.entry(n).or_insert_with(|| {
                        old_nodes.push(n);
                        old_nodes.len() - 1
                    })
                })
                .collect();
            elements.push(Element { kind: element.kind, nodes, tag: element.tag });
        }

        if old_nodes.is_empty() {
            return Err(MeshError::EmptyMesh);
        }

        let nodes = old_nodes.iter().map(|&n| self.nodes[n]).collect();
        let mut cropped = FieldMesh::new(nodes, elements)?;

        for (name, values) in &self.node_fields {
            cropped
                .node_fields
                .insert(name.clone(), old_nodes.iter().map(|&n| values[n]).collect());
        }
        for (name, values) in &self.element_fields {
            cropped
                .element_fields
                .insert(name.clone(), kept.iter().map(|&e| values[e]).collect());
        }

        Ok(cropped)
    }

    /// Bounding box of all nodes
    pub fn bounds(&self) -> (Point3D, Point3D) {
        let mut min = Point3D::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3D::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);

        for p in &self.nodes {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);

            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        (min, max)
    }
}

/// Mesh files (`*.msh`) in `dir` whose name starts with `prefix`, sorted
pub fn list_mesh_files(dir: &Path, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.starts_with(prefix) && name.ends_with(".msh")
        })
        .collect();
    files.sort();
    Ok(files)
}

fn check_len(name: &str, expected: usize, actual: usize) -> Result<(), MeshError> {
    if expected != actual {
        return Err(MeshError::FieldLength { name: name.to_string(), expected, actual });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two triangles in the z=0 plane sharing an edge, tag 2, plus a tet tagged 1
    pub(crate) fn sample_mesh() -> FieldMesh {
        let nodes = vec![
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(1.0, 0.0, 0.0),
            Point3D::new(0.0, 1.0, 0.0),
            Point3D::new(1.0, 1.0, 0.0),
            Point3D::new(0.0, 0.0, 1.0),
        ];
        let elements = vec![
            Element::triangle([0, 1, 2], 2),
            Element::triangle([1, 3, 2], 2),
            Element::tetrahedron([0, 1, 2, 4], 1),
        ];
        FieldMesh::new(nodes, elements).unwrap()
    }

    #[test]
    fn test_mesh_creation() {
        let mesh = sample_mesh();
        assert_eq!(mesh.num_nodes(), 5);
        assert_eq!(mesh.num_elements(), 3);
    }

    #[test]
    fn test_invalid_node_index() {
        let nodes = vec![Point3D::origin()];
        let err = FieldMesh::new(nodes, vec![Element::triangle([0, 1, 2], 1)]).unwrap_err();
        assert!(matches!(err, MeshError::InvalidNodeIndex { node: 1, .. }));
    }

    #[test]
    fn test_field_length_checked() {
        let mut mesh = sample_mesh();
        assert!(mesh.add_node_field("v", vec![1.0; 5]).is_ok());
        let err = mesh.add_element_field("e", vec![1.0; 2]).unwrap_err();
        assert!(matches!(err, MeshError::FieldLength { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_derive_writable_leaves_base_untouched() {
        let base = sample_mesh();
        let mut derived = base.derive_writable();
        derived.add_element_field("TImax", vec![1.0, 2.0, 3.0]).unwrap();

        assert!(base.element_fields.is_empty());
        assert_eq!(derived.element_fields["TImax"], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_node_normals() {
        let mesh = sample_mesh();
        let normals = mesh.node_normals();

        assert!((normals[3] - Vector3D::new(0.0, 0.0, 1.0)).norm() < 1e-12);
        assert!((normals[0] - Vector3D::new(0.0, 0.0, 1.0)).norm() < 1e-12);
        // node 4 only belongs to the tetrahedron
        assert_eq!(normals[4], Vector3D::zeros());
    }

    #[test]
    fn test_crop_to_tags() {
        let mut mesh = sample_mesh();
        mesh.add_node_field("n", vec![0.0, 1.0, 2.0, 3.0, 4.0]).unwrap();
        mesh.add_element_field("e", vec![10.0, 20.0, 30.0]).unwrap();

        let grey = mesh.crop_to_tags(&[2]).unwrap();
        assert_eq!(grey.num_elements(), 2);
        assert_eq!(grey.num_nodes(), 4);
        assert_eq!(grey.element_fields["e"], vec![10.0, 20.0]);
        assert_eq!(grey.node_fields["n"], vec![0.0, 1.0, 2.0, 3.0]);

        assert!(matches!(mesh.crop_to_tags(&[99]), Err(MeshError::EmptyMesh)));
    }

    #[test]
    fn test_field_samples_prefers_nodes() {
        let mut mesh = sample_mesh();
        mesh.add_element_field("TImax", vec![1.0, 2.0, 3.0]).unwrap();

        let (points, values, location) = mesh.field_samples("TImax").unwrap();
        assert_eq!(location, FieldLocation::Element);
        assert_eq!(points.len(), 3);
        assert_eq!(values, &[1.0, 2.0, 3.0]);

        assert!(matches!(mesh.field_samples("missing"), Err(MeshError::MissingField(_))));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.msh");

        let mut mesh = sample_mesh();
        mesh.add_node_field("n", vec![0.5; 5]).unwrap();
        mesh.save(&path).unwrap();

        let loaded = FieldMesh::load(&path).unwrap();
        assert_eq!(loaded, mesh);
    }

    #[test]
    fn test_list_mesh_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["TI_field_b.msh", "TI_field_a.msh", "TI_norm_field_a.msh", "TI_field_a.msh.opt"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }

        let files = list_mesh_files(dir.path(), "TI_field").unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["TI_field_a.msh", "TI_field_b.msh"]);
        assert_eq!(list_mesh_files(dir.path(), "").unwrap().len(), 3);
    }

    #[test]
    fn test_mesh_bounds() {
        let (min, max) = sample_mesh().bounds();
        assert_eq!(min, Point3D::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3D::new(1.0, 1.0, 1.0));
    }
}

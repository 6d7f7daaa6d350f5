// Field kernels
//
// Two seams: turning an electrode pair into a per-sample E-field, and
// turning two E-fields into a TI amplitude. The bundled implementations
// follow the usual envelope formulas (Grossman et al. 2017) and can be
// swapped out for an external solver's kernels.

use crate::electrode::ElectrodePair;
use crate::geometry::Vector3D;
use crate::leadfield::Leadfield;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("Electrode {0} not found in leadfield index")]
    UnknownElectrode(String),

    #[error("Field arrays differ in length ({left} vs {right})")]
    LengthMismatch { left: usize, right: usize },
}

/// Resolves an electrode pair to one E-field vector per leadfield sample
pub trait FieldLookup: Send + Sync {
    fn field(&self, leadfield: &Leadfield, pair: &ElectrodePair, current: f64) -> Result<Vec<Vector3D>, KernelError>;
}

/// Computes TI amplitudes from the fields of the two channels
pub trait TiAmplitude: Send + Sync {
    /// Maximal envelope amplitude over all orientations, per sample
    fn max_envelope(&self, e1: &[Vector3D], e2: &[Vector3D]) -> Result<Vec<f64>, KernelError>;

    /// Envelope amplitude along a per-sample direction
    fn directional(&self, e1: &[Vector3D], e2: &[Vector3D], directions: &[Vector3D]) -> Result<Vec<f64>, KernelError>;
}

/// Linear superposition over the leadfield basis:
/// `current * (row(plus) - row(minus))`, the reference row being zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadfieldLookup;

impl FieldLookup for LeadfieldLookup {
    fn field(&self, leadfield: &Leadfield, pair: &ElectrodePair, current: f64) -> Result<Vec<Vector3D>, KernelError> {
        let plus = leadfield
            .row(&pair.plus)
            .ok_or_else(|| KernelError::UnknownElectrode(pair.plus.clone()))?;
        let minus = leadfield
            .row(&pair.minus)
            .ok_or_else(|| KernelError::UnknownElectrode(pair.minus.clone()))?;

        let n = leadfield.num_samples();
        let sample = |row: Option<&[Vector3D]>, i: usize| row.map_or_else(Vector3D::zeros, |r| r[i]);

        Ok((0..n).map(|i| (sample(plus, i) - sample(minus, i)) * current).collect())
    }
}

/// Reference TI amplitude kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeKernel;

/// Below this magnitude a field is treated as zero
const FIELD_EPS: f64 = 1e-12;

/// Order the two vectors so |a| >= |b| and flip b into the half-space of a
fn orient(e1: Vector3D, e2: Vector3D) -> (Vector3D, Vector3D) {
    let (a, mut b) = if e2.norm() > e1.norm() { (e2, e1) } else { (e1, e2) };
    if a.dot(&b) < 0.0 {
        b = -b;
    }
    (a, b)
}

/// Twice the part of `b` that survives the envelope: `b` itself when it is
/// no longer than the projection of `a` onto it, otherwise its component
/// perpendicular to `a - b`.
fn envelope_vector(e1: Vector3D, e2: Vector3D) -> Vector3D {
    let (a, b) = orient(e1, e2);
    let (na, nb) = (a.norm(), b.norm());
    if nb < FIELD_EPS {
        return Vector3D::zeros();
    }

    let diff = a - b;
    let nd = diff.norm();
    let cos_alpha = a.dot(&b) / (na * nb);

    if nb <= na * cos_alpha || nd < FIELD_EPS * na {
        2.0 * b
    } else {
        2.0 * (b - diff * (b.dot(&diff) / (nd * nd)))
    }
}

fn check_lengths(left: usize, right: usize) -> Result<(), KernelError> {
    if left != right {
        return Err(KernelError::LengthMismatch { left, right });
    }
    Ok(())
}

impl EnvelopeKernel {
    /// Vector form of the maximal envelope, one vector per sample
    pub fn ti_vectors(&self, e1: &[Vector3D], e2: &[Vector3D]) -> Result<Vec<Vector3D>, KernelError> {
        check_lengths(e1.len(), e2.len())?;
        Ok(e1.iter().zip(e2).map(|(a, b)| envelope_vector(*a, *b)).collect())
    }
}

impl TiAmplitude for EnvelopeKernel {
    fn max_envelope(&self, e1: &[Vector3D], e2: &[Vector3D]) -> Result<Vec<f64>, KernelError> {
        check_lengths(e1.len(), e2.len())?;
        Ok(e1.iter().zip(e2).map(|(a, b)| envelope_vector(*a, *b).norm()).collect())
    }

    fn directional(&self, e1: &[Vector3D], e2: &[Vector3D], directions: &[Vector3D]) -> Result<Vec<f64>, KernelError> {
        check_lengths(e1.len(), e2.len())?;
        check_lengths(e1.len(), directions.len())?;

        Ok(e1
            .iter()
            .zip(e2)
            .zip(directions)
            .map(|((a, b), n)| {
                let norm = n.norm();
                if norm < FIELD_EPS {
                    return 0.0;
                }
                let n = n / norm;
                ((a + b).dot(&n).abs() - (a - b).dot(&n).abs()).abs()
            })
            .collect())
    }
}

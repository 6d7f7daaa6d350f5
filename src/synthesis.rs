// Per-combination TI field synthesis

use crate::combination::Combination;
use crate::geometry::Vector3D;
use crate::kernel::{EnvelopeKernel, FieldLookup, KernelError, LeadfieldLookup, TiAmplitude};
use crate::leadfield::{Leadfield, LeadfieldVariant};
use serde::{Deserialize, Serialize};

/// Stimulation intensity. Users give millivolts; kernels receive volts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intensity {
    millivolts: f64,
}

impl Intensity {
    pub fn from_millivolts(millivolts: f64) -> Self {
        Self { millivolts }
    }

    pub fn millivolts(&self) -> f64 {
        self.millivolts
    }

    /// Value handed to the field lookup
    pub fn volts(&self) -> f64 {
        self.millivolts / 1000.0
    }
}

/// TI metric of one combination, one value per leadfield sample
#[derive(Debug, Clone, PartialEq)]
pub enum IntensityField {
    /// Maximal envelope amplitude per volume element
    MaxEnvelope(Vec<f64>),
    /// Envelope amplitude along the local surface normal per node
    Directional(Vec<f64>),
}

impl IntensityField {
    pub fn values(&self) -> &[f64] {
        match self {
            IntensityField::MaxEnvelope(v) | IntensityField::Directional(v) => v,
        }
    }

    pub fn into_values(self) -> Vec<f64> {
        match self {
            IntensityField::MaxEnvelope(v) | IntensityField::Directional(v) => v,
        }
    }

    /// Peak value, ignoring NaN
    pub fn max(&self) -> f64 {
        self.values().iter().copied().filter(|v| !v.is_nan()).fold(0.0, f64::max)
    }
}

/// Runs the lookup and amplitude kernels for single combinations. Holds no
/// per-combination state, so one instance serves every worker.
pub struct FieldSynthesizer<L = LeadfieldLookup, K = EnvelopeKernel> {
    lookup: L,
    kernel: K,
    /// Node normals of the surface mesh, computed once per leadfield
    normals: Option<Vec<Vector3D>>,
}

impl FieldSynthesizer {
    pub fn new(leadfield: &Leadfield) -> Self {
        Self::with_kernels(leadfield, LeadfieldLookup, EnvelopeKernel)
    }
}

impl<L: FieldLookup, K: TiAmplitude> FieldSynthesizer<L, K> {
    pub fn with_kernels(leadfield: &Leadfield, lookup: L, kernel: K) -> Self {
        let normals = match leadfield.variant() {
            LeadfieldVariant::Surface => Some(leadfield.mesh().node_normals()),
            LeadfieldVariant::Volume => None,
        };
        Self { lookup, kernel, normals }
    }

    /// Fields of both channels, then the TI metric for the leadfield variant
    pub fn synthesize(
        &self,
        leadfield: &Leadfield,
        combination: &Combination,
        intensity: Intensity,
    ) -> Result<IntensityField, KernelError> {
        let current = intensity.volts();
        let e1 = self.lookup.field(leadfield, &combination.first, current)?;
        let e2 = self.lookup.field(leadfield, &combination.second, current)?;

        match &self.normals {
            Some(normals) => Ok(IntensityField::Directional(self.kernel.directional(&e1, &e2, normals)?)),
            None => Ok(IntensityField::MaxEnvelope(self.kernel.max_envelope(&e1, &e2)?)),
        }
    }
}

// Core modules for temporal-interference montage search
pub mod geometry;
pub mod mesh;
pub mod electrode;
pub mod combination;
pub mod leadfield;
pub mod kernel;
pub mod synthesis;
pub mod writer;
pub mod volume;
pub mod projection;
pub mod region;
pub mod sampler;
pub mod aggregate;
pub mod context;
pub mod config;
pub mod search;

// Re-export commonly used types
pub use geometry::{Point3D, Vector3D, Affine3D, Triangle};
pub use mesh::{FieldMesh, MeshError};
pub use electrode::{ElectrodeError, ElectrodePair, ElectrodeSet, LabelFormat};
pub use combination::{generate_combinations, Combination, DuplicatePolicy};
pub use leadfield::{Leadfield, LeadfieldError, LeadfieldVariant};
pub use kernel::{EnvelopeKernel, FieldLookup, KernelError, LeadfieldLookup, TiAmplitude};
pub use synthesis::{FieldSynthesizer, Intensity, IntensityField};
pub use writer::MeshResultWriter;
pub use volume::{ReferenceImage, VolumeError, VoxelVolume};
pub use projection::{project_points, BatchProjection, ProjectionError};
pub use region::{Region, RegionError};
pub use sampler::{FieldSampler, SamplerConfig, SamplerError, SubprocessSampler};
pub use aggregate::{AggregateError, Aggregator, RegionMatrix, RegionSamples};
pub use context::{ContextError, RunContext};
pub use config::{ConfigError, SearchConfig};
pub use search::{CombinationOutcome, SearchReport};

/// Main result type for the optimizer
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the optimizer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Electrode error: {0}")]
    Electrode(#[from] ElectrodeError),

    #[error("Leadfield error: {0}")]
    Leadfield(#[from] LeadfieldError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    #[error("Sampler error: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

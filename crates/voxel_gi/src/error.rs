use glam::Vec3;
use thiserror::Error;

use crate::stage::Stage;

/// Errors surfaced by grid construction, voxelizer initialization and frame recording.
///
/// Everything here is reported synchronously at the call site. Initialization
/// failures are fatal: the grid size and format are fixed configuration, so
/// nothing is retried.
#[derive(Debug, Error)]
pub enum VoxelGiError {
    #[error("scene bounds are degenerate (min {min:?}, max {max:?})")]
    DegenerateBounds { min: Vec3, max: Vec3 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("no GPU adapter available")]
    NoAdapter,

    #[error("GPU adapter is not supported: {0}")]
    UnsupportedAdapter(String),

    #[error("failed to request device: {0}")]
    DeviceRequest(String),

    #[error("failed to allocate {resource}: {message}")]
    ResourceAllocation { resource: String, message: String },

    #[error("failed to create pipeline {pipeline}: {message}")]
    Pipeline { pipeline: String, message: String },

    #[error("{resource}: buffer size {bytes} bytes exceeds max {max} bytes")]
    ResourceLimit {
        resource: String,
        bytes: u64,
        max: u64,
    },

    #[error("failed to map buffer: {0}")]
    BufferMap(String),

    #[error("frame stage {to:?} cannot follow {from:?}")]
    StageOrder { from: Stage, to: Stage },

    #[error("mip level {level} out of range (chain has {levels} levels)")]
    MipLevelOutOfRange { level: u32, levels: u32 },
}

pub type Result<T, E = VoxelGiError> = std::result::Result<T, E>;

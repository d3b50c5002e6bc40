pub mod core;
pub mod debug_view;
pub mod error;
pub mod frustum;
pub mod gpu;
pub mod grid;
pub mod mip;
pub mod packing;
pub mod reference_cpu;
pub mod stage;
pub mod transform;

pub use crate::core::{
    Aabb, AccumulationPolicy, FrameInputs, Material, MeshVertex, PopulateStats, RasterMode, SubMesh,
    VoxelGiConfig,
};
pub use crate::debug_view::{DebugCubeInstance, DebugDrawStats, DebugVoxelVisualizer};
pub use crate::error::{Result, VoxelGiError};
pub use crate::frustum::{Frustum, Plane};
pub use crate::gpu::{DebugCubeRenderer, GpuContext, GpuVoxelGrid, GpuVoxelizer};
pub use crate::grid::{GridSnapshot, VoxelGrid};
pub use crate::mip::MipChain;
pub use crate::reference_cpu::CpuVoxelizer;
pub use crate::stage::{Stage, StageTracker};
pub use crate::transform::WorldToVoxelGridTransform;

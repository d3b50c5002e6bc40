use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::error::{Result, VoxelGiError};
use crate::frustum::Frustum;

pub const MIN_RESOLUTION: u32 = 2;
pub const MAX_RESOLUTION: u32 = 512;

/// Axis-aligned bounding box. `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    /// Bounds of all vertices of the given sub-meshes, transformed by `world`.
    pub fn from_submeshes(submeshes: &[SubMesh], world: Mat4) -> Option<Self> {
        Self::from_points(submeshes.iter().flat_map(|submesh| {
            submesh
                .vertices
                .iter()
                .map(move |v| world.transform_point3(Vec3::from(v.position)))
        }))
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        self.min + self.extent() * 0.5
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Zero extent on every axis, or non-finite bounds.
    pub fn is_degenerate(&self) -> bool {
        !self.min.is_finite() || !self.max.is_finite() || self.extent().max_element() <= 0.0
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

/// How concurrent contributions to one voxel are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationPolicy {
    /// Running average weighted by the per-voxel sample count (saturates at 255 samples).
    #[default]
    Average,
    /// Every contribution overwrites the voxel. Biased towards whichever
    /// invocation happens to write last.
    LastWriteWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterMode {
    /// One sample per cell centre of the dominant-axis projection.
    #[default]
    Standard,
    /// Every voxel the triangle overlaps is written.
    Conservative,
}

/// Configuration for the voxel grid and the voxelization passes.
#[derive(Debug, Clone)]
pub struct VoxelGiConfig {
    /// Voxels per grid edge. Must be a power of two.
    pub resolution: u32,
    /// Total number of levels including the base level; 0 means the full chain down to 1³.
    pub mip_levels: u32,
    pub accumulation: AccumulationPolicy,
    pub raster_mode: RasterMode,
    /// Alpha-masked sub-meshes need special handling this pipeline does not provide.
    pub skip_alpha_masked: bool,
    pub generate_mips: bool,
    /// Enables the per-voxel debug cube visualizer. Not viable at large resolutions.
    pub debug_draw: bool,
}

impl Default for VoxelGiConfig {
    fn default() -> Self {
        Self {
            resolution: 64,
            mip_levels: 0,
            accumulation: AccumulationPolicy::Average,
            raster_mode: RasterMode::Standard,
            skip_alpha_masked: true,
            generate_mips: true,
            debug_draw: false,
        }
    }
}

impl VoxelGiConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.resolution.is_power_of_two()
            || self.resolution < MIN_RESOLUTION
            || self.resolution > MAX_RESOLUTION
        {
            return Err(VoxelGiError::InvalidConfig(format!(
                "resolution must be a power of two in {MIN_RESOLUTION}..={MAX_RESOLUTION} (got {})",
                self.resolution
            )));
        }
        let max_levels = max_mip_levels(self.resolution);
        if self.mip_levels > max_levels {
            return Err(VoxelGiError::InvalidConfig(format!(
                "mip_levels must be <= {max_levels} for resolution {} (got {})",
                self.resolution, self.mip_levels
            )));
        }
        Ok(())
    }

    /// Number of levels in the chain, base level included.
    pub fn mip_level_count(&self) -> u32 {
        if !self.generate_mips {
            1
        } else if self.mip_levels == 0 {
            max_mip_levels(self.resolution)
        } else {
            self.mip_levels
        }
    }

    pub fn num_voxels(&self) -> u64 {
        let n = self.resolution as u64;
        n * n * n
    }
}

/// Levels from `resolution`³ down to 1³.
pub fn max_mip_levels(resolution: u32) -> u32 {
    resolution.max(1).ilog2() + 1
}

/// Edge length of `level` for a base resolution.
pub fn mip_resolution(resolution: u32, level: u32) -> u32 {
    (resolution >> level).max(1)
}

/// Vertex layout of the mesh collaborator's vertex buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub uv: [f32; 2],
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.into(),
            normal: normal.into(),
            tangent: [1.0, 0.0, 0.0],
            uv: Vec2::ZERO.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub diffuse: Vec4,
    pub alpha_mask: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            diffuse: Vec4::ONE,
            alpha_mask: false,
        }
    }
}

/// Indexed triangle list with a single material.
#[derive(Debug, Clone)]
pub struct SubMesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub material: Material,
}

impl SubMesh {
    pub fn validate(&self) -> Result<()> {
        if self.indices.len() % 3 != 0 {
            return Err(VoxelGiError::InvalidMesh(format!(
                "index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        let vertex_count = self.vertices.len();
        if let Some(index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(VoxelGiError::InvalidMesh(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }
        for v in &self.vertices {
            if !Vec3::from(v.position).is_finite() || !Vec3::from(v.normal).is_finite() {
                return Err(VoxelGiError::InvalidMesh(
                    "vertex contains non-finite position or normal".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangles(&self) -> impl Iterator<Item = [&MeshVertex; 3]> + '_ {
        self.indices.chunks_exact(3).map(move |tri| {
            [
                &self.vertices[tri[0] as usize],
                &self.vertices[tri[1] as usize],
                &self.vertices[tri[2] as usize],
            ]
        })
    }
}

/// Per-frame camera and model inputs.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs {
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub eye: Vec3,
}

impl Default for FrameInputs {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            eye: Vec3::ZERO,
        }
    }
}

impl FrameInputs {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Camera frustum for culling debug cubes, optionally with the far plane
    /// pulled in to `far_depth` from `eye`.
    pub fn frustum(&self, far_depth: Option<f32>) -> Frustum {
        let frustum = Frustum::from_view_projection(self.view_projection());
        match far_depth {
            Some(depth) => frustum.with_far_depth(self.eye, depth),
            None => frustum,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateStats {
    pub submeshes: u32,
    pub skipped_submeshes: u32,
    pub triangles: u32,
    /// Accumulated samples. Only counted by the CPU path.
    pub voxel_writes: u64,
    pub clipped_samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_from_points_and_center() {
        let aabb = Aabb::from_points([
            Vec3::new(-1.0, 2.0, 0.0),
            Vec3::new(3.0, -2.0, 1.0),
            Vec3::new(0.0, 0.0, 5.0),
        ])
        .expect("aabb");
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(3.0, 2.0, 5.0));
        assert_eq!(aabb.center(), Vec3::new(1.0, 0.0, 2.5));
        assert!(aabb.contains_point(aabb.max));
        assert!(!aabb.contains_point(Vec3::new(0.0, 0.0, 5.1)));
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn point_box_is_degenerate() {
        let p = Vec3::splat(4.0);
        assert!(Aabb::new(p, p).is_degenerate());
        assert!(!Aabb::new(p, p + Vec3::X).is_degenerate());
        let non_finite = Aabb {
            min: Vec3::splat(f32::NAN),
            max: p,
        };
        assert!(non_finite.is_degenerate());
    }

    #[test]
    fn config_rejects_bad_resolution_and_mips() {
        let mut config = VoxelGiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mip_level_count(), 7);

        config.resolution = 48;
        assert!(matches!(config.validate(), Err(VoxelGiError::InvalidConfig(_))));

        config.resolution = 16;
        config.mip_levels = 6;
        assert!(config.validate().is_err());
        config.mip_levels = 5;
        assert!(config.validate().is_ok());

        config.generate_mips = false;
        assert_eq!(config.mip_level_count(), 1);
    }

    #[test]
    fn mip_resolution_halves_down_to_one() {
        assert_eq!(mip_resolution(64, 0), 64);
        assert_eq!(mip_resolution(64, 3), 8);
        assert_eq!(mip_resolution(64, 6), 1);
        assert_eq!(mip_resolution(64, 9), 1);
    }

    #[test]
    fn submesh_validation() {
        let vertices = vec![
            MeshVertex::new(Vec3::ZERO, Vec3::Z),
            MeshVertex::new(Vec3::X, Vec3::Z),
            MeshVertex::new(Vec3::Y, Vec3::Z),
        ];
        let mut mesh = SubMesh {
            vertices,
            indices: vec![0, 1, 2],
            material: Material::default(),
        };
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.triangles().count(), 1);

        mesh.indices = vec![0, 1, 3];
        assert!(matches!(mesh.validate(), Err(VoxelGiError::InvalidMesh(_))));
        mesh.indices = vec![0, 1];
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn frame_frustum_uses_camera_and_eye() {
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let frame = FrameInputs {
            world: Mat4::IDENTITY,
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0),
            eye,
        };

        let full = frame.frustum(None);
        assert!(full.contains_point(Vec3::ZERO));
        assert!(full.contains_point(Vec3::new(0.0, 0.0, -50.0)));
        assert!(!full.contains_point(Vec3::new(0.0, 0.0, 10.0)));

        let near = frame.frustum(Some(3.0));
        assert!(near.contains_point(Vec3::new(0.0, 0.0, 3.0)));
        assert!(!near.contains_point(Vec3::ZERO));
        let from_camera = Frustum::from_camera(frame.view, frame.projection, Some(3.0));
        for (a, b) in near.planes().iter().zip(from_camera.planes()) {
            assert!(a.normal.abs_diff_eq(b.normal, 1e-5));
            assert!((a.displacement - b.displacement).abs() < 1e-4);
        }
    }
}

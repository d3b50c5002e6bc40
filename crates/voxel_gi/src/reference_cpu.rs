//! CPU implementation of the clear / populate / mip pipeline.
//!
//! Mirrors the GPU passes: each triangle is rasterized once, through the
//! orthographic projection along the dominant axis of its face normal, at one
//! sample per cell centre. Samples whose depth falls outside the grid are
//! clipped. Used as the reference for the GPU path and wherever no adapter is
//! available.

use glam::{Mat3, UVec3, Vec2, Vec3};

use crate::core::{FrameInputs, PopulateStats, RasterMode, SubMesh, VoxelGiConfig};
use crate::error::Result;
use crate::grid::VoxelGrid;
use crate::mip::MipChain;
use crate::stage::{Stage, StageTracker};
use crate::transform::{grid_to_voxel_space, WorldToVoxelGridTransform};

/// A triangle in continuous voxel space `[0, N]³`.
#[derive(Debug, Clone, Copy)]
pub struct VoxelTriangle {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
}

impl VoxelTriangle {
    pub fn face_normal(&self) -> Vec3 {
        let [p0, p1, p2] = self.positions;
        (p1 - p0).cross(p2 - p0)
    }
}

/// Index of the largest absolute component; ties prefer z, then y.
pub fn dominant_axis(normal: Vec3) -> usize {
    let n = normal.abs();
    if n.z >= n.x && n.z >= n.y {
        2
    } else if n.y >= n.x {
        1
    } else {
        0
    }
}

/// The two axes spanning the projection plane of `axis`.
fn projection_axes(axis: usize) -> (usize, usize) {
    match axis {
        0 => (1, 2),
        1 => (2, 0),
        _ => (0, 1),
    }
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Fill-rule tie-break for an edge `a -> b` of a counter-clockwise triangle.
/// A sample exactly on the edge belongs to the triangle only for top edges
/// (horizontal, interior below) and left edges (running downwards), so a
/// sample on an edge shared by two triangles is written once.
fn is_top_left(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    (d.y == 0.0 && d.x < 0.0) || d.y < 0.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterCounts {
    pub written: u64,
    pub clipped: u64,
}

/// Samples a triangle at the cell centres of its dominant-axis projection and
/// calls `emit` with the voxel and interpolated normal of each covered sample.
pub fn rasterize_triangle(
    tri: &VoxelTriangle,
    resolution: u32,
    mut emit: impl FnMut(UVec3, Vec3),
) -> RasterCounts {
    let mut counts = RasterCounts::default();
    let face = tri.face_normal();
    if face.length_squared() == 0.0 || !face.is_finite() {
        return counts;
    }
    let axis = dominant_axis(face);
    let (u, v) = projection_axes(axis);
    let p = tri.positions.map(|p| Vec2::new(p[u], p[v]));
    let area = edge(p[0], p[1], p[2]);
    if area == 0.0 {
        return counts;
    }
    // Walk the edges counter-clockwise whatever the winding.
    let order = if area > 0.0 { [0, 1, 2] } else { [0, 2, 1] };
    let area = area.abs();
    let edges = [0, 1, 2].map(|i| (p[order[(i + 1) % 3]], p[order[(i + 2) % 3]]));
    let owns_edge = edges.map(|(a, b)| is_top_left(a, b));

    let last = resolution as i64 - 1;
    let lo = p[0].min(p[1]).min(p[2]);
    let hi = p[0].max(p[1]).max(p[2]);
    let u_min = ((lo.x - 0.5).ceil() as i64).max(0);
    let v_min = ((lo.y - 0.5).ceil() as i64).max(0);
    let u_max = ((hi.x - 0.5).floor() as i64).min(last);
    let v_max = ((hi.y - 0.5).floor() as i64).min(last);
    let depth_limit = resolution as f32;

    for cv in v_min..=v_max {
        for cu in u_min..=u_max {
            let sample = Vec2::new(cu as f32 + 0.5, cv as f32 + 0.5);
            let mut weights = [0.0f32; 3];
            let mut inside = true;
            for (i, &(a, b)) in edges.iter().enumerate() {
                let e = edge(a, b, sample);
                if e < 0.0 || (e == 0.0 && !owns_edge[i]) {
                    inside = false;
                    break;
                }
                weights[order[i]] = e / area;
            }
            if !inside {
                continue;
            }
            let [w0, w1, w2] = weights;
            let depth = w0 * tri.positions[0][axis]
                + w1 * tri.positions[1][axis]
                + w2 * tri.positions[2][axis];
            if !(0.0..=depth_limit).contains(&depth) {
                counts.clipped += 1;
                continue;
            }
            let mut index = [0u32; 3];
            index[axis] = (depth.floor() as u32).min(resolution - 1);
            index[u] = cu as u32;
            index[v] = cv as u32;

            let normal = (tri.normals[0] * w0 + tri.normals[1] * w1 + tri.normals[2] * w2)
                .try_normalize()
                .unwrap_or_else(|| face.normalize());
            emit(UVec3::from(index), normal);
            counts.written += 1;
        }
    }
    counts
}

/// Separating-axis overlap test between a triangle and an axis-aligned box.
pub fn triangle_box_overlap(box_center: Vec3, box_half: Vec3, v0: Vec3, v1: Vec3, v2: Vec3) -> bool {
    let v0 = v0 - box_center;
    let v1 = v1 - box_center;
    let v2 = v2 - box_center;

    let e0 = v1 - v0;
    let e1 = v2 - v1;
    let e2 = v0 - v2;

    let axes = [
        Vec3::new(0.0, -e0.z, e0.y),
        Vec3::new(0.0, -e1.z, e1.y),
        Vec3::new(0.0, -e2.z, e2.y),
        Vec3::new(e0.z, 0.0, -e0.x),
        Vec3::new(e1.z, 0.0, -e1.x),
        Vec3::new(e2.z, 0.0, -e2.x),
        Vec3::new(-e0.y, e0.x, 0.0),
        Vec3::new(-e1.y, e1.x, 0.0),
        Vec3::new(-e2.y, e2.x, 0.0),
    ];

    for axis in axes.iter() {
        let p0 = v0.dot(*axis);
        let p1 = v1.dot(*axis);
        let p2 = v2.dot(*axis);
        let min_p = p0.min(p1.min(p2));
        let max_p = p0.max(p1.max(p2));
        let r = box_half.dot(axis.abs());
        if min_p > r || max_p < -r {
            return false;
        }
    }

    let tri_min = v0.min(v1).min(v2);
    let tri_max = v0.max(v1).max(v2);
    if tri_min.cmpgt(box_half).any() || tri_max.cmplt(-box_half).any() {
        return false;
    }

    let normal = e0.cross(e1);
    let d = -normal.dot(v0);
    let r = box_half.dot(normal.abs());
    d.abs() <= r
}

/// Emits every voxel the triangle overlaps, with the averaged vertex normal.
pub fn rasterize_triangle_conservative(
    tri: &VoxelTriangle,
    resolution: u32,
    mut emit: impl FnMut(UVec3, Vec3),
) -> RasterCounts {
    let mut counts = RasterCounts::default();
    let face = tri.face_normal();
    if !face.is_finite() {
        return counts;
    }
    let [v0, v1, v2] = tri.positions;
    let last = resolution as f32 - 1.0;
    let lo = v0.min(v1).min(v2).floor().max(Vec3::ZERO);
    let hi = v0.max(v1).max(v2).floor().min(Vec3::splat(last));
    if lo.cmpgt(hi).any() {
        counts.clipped += 1;
        return counts;
    }
    let normal = (tri.normals[0] + tri.normals[1] + tri.normals[2])
        .try_normalize()
        .or_else(|| face.try_normalize())
        .unwrap_or(Vec3::Z);
    let half = Vec3::splat(0.5);
    let (lo, hi) = (lo.as_uvec3(), hi.as_uvec3());
    for z in lo.z..=hi.z {
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let index = UVec3::new(x, y, z);
                let center = index.as_vec3() + half;
                if triangle_box_overlap(center, half, v0, v1, v2) {
                    emit(index, normal);
                    counts.written += 1;
                }
            }
        }
    }
    counts
}

/// CPU voxelizer owning its grid and mip chain.
#[derive(Debug)]
pub struct CpuVoxelizer {
    config: VoxelGiConfig,
    transform: WorldToVoxelGridTransform,
    grid: VoxelGrid,
    mips: Option<MipChain>,
    stages: StageTracker,
}

impl CpuVoxelizer {
    pub fn new(config: VoxelGiConfig, transform: WorldToVoxelGridTransform) -> Result<Self> {
        config.validate()?;
        let grid = VoxelGrid::new(config.resolution)?;
        Ok(Self {
            config,
            transform,
            grid,
            mips: None,
            stages: StageTracker::new(),
        })
    }

    pub fn config(&self) -> &VoxelGiConfig {
        &self.config
    }

    pub fn transform(&self) -> &WorldToVoxelGridTransform {
        &self.transform
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    /// The chain built by the last [`generate_mips`](Self::generate_mips) of the current frame.
    pub fn mip_chain(&self) -> Option<&MipChain> {
        self.mips.as_ref()
    }

    pub fn stage(&self) -> Stage {
        self.stages.current()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.stages.advance(Stage::Clearing)?;
        self.grid.clear();
        self.mips = None;
        Ok(())
    }

    pub fn populate(&mut self, submeshes: &[SubMesh], frame: &FrameInputs) -> Result<PopulateStats> {
        self.stages.advance(Stage::Populating)?;
        for submesh in submeshes {
            submesh.validate()?;
        }

        let resolution = self.config.resolution;
        let world = frame.world;
        let normal_matrix = normal_matrix(world);
        let mut stats = PopulateStats::default();

        for submesh in submeshes {
            if submesh.material.alpha_mask && self.config.skip_alpha_masked {
                log::debug!("skipping alpha-masked submesh ({} triangles)", submesh.triangle_count());
                stats.skipped_submeshes += 1;
                continue;
            }
            stats.submeshes += 1;
            let colour = submesh.material.diffuse.truncate();

            for vertices in submesh.triangles() {
                stats.triangles += 1;
                let tri = VoxelTriangle {
                    positions: vertices.map(|v| {
                        let world_pos = world.transform_point3(Vec3::from(v.position));
                        grid_to_voxel_space(self.transform.world_to_grid_point(world_pos), resolution)
                    }),
                    normals: vertices.map(|v| normal_matrix * Vec3::from(v.normal)),
                };
                let grid = &self.grid;
                let policy = self.config.accumulation;
                let emit = |index: UVec3, normal: Vec3| {
                    grid.accumulate(index, colour, normal, policy);
                };
                let counts = match self.config.raster_mode {
                    RasterMode::Standard => rasterize_triangle(&tri, resolution, emit),
                    RasterMode::Conservative => rasterize_triangle_conservative(&tri, resolution, emit),
                };
                stats.voxel_writes += counts.written;
                stats.clipped_samples += counts.clipped;
            }
        }

        log::debug!(
            "populated {} submeshes ({} skipped), {} triangles, {} voxel writes, {} clipped",
            stats.submeshes,
            stats.skipped_submeshes,
            stats.triangles,
            stats.voxel_writes,
            stats.clipped_samples
        );
        Ok(stats)
    }

    pub fn generate_mips(&mut self) -> Result<&MipChain> {
        self.stages.advance(Stage::MipGenerating)?;
        let chain = MipChain::generate(&self.grid.snapshot(), self.config.mip_level_count());
        Ok(self.mips.insert(chain))
    }

    pub fn finish_frame(&mut self) -> Result<()> {
        self.stages.advance(Stage::Idle)
    }

    /// Clear, populate, build mips when enabled, and return to idle.
    pub fn voxelize_frame(&mut self, submeshes: &[SubMesh], frame: &FrameInputs) -> Result<PopulateStats> {
        self.clear()?;
        let stats = match self.populate(submeshes, frame) {
            Ok(stats) => stats,
            Err(err) => {
                self.stages.reset();
                return Err(err);
            }
        };
        if self.config.generate_mips {
            self.generate_mips()?;
        }
        self.finish_frame()?;
        Ok(stats)
    }
}

/// Inverse-transpose of the upper 3×3, falling back to the plain 3×3 for singular matrices.
pub(crate) fn normal_matrix(world: glam::Mat4) -> Mat3 {
    let m = Mat3::from_mat4(world);
    if m.determinant().abs() > f32::EPSILON {
        m.inverse().transpose()
    } else {
        m
    }
}

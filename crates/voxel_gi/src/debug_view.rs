//! One cube per occupied voxel, for inspecting grid contents.
//!
//! The walk is O(N³) on the CPU and only meant for small grids, so it stays
//! behind `VoxelGiConfig::debug_draw`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec3};

use crate::core::VoxelGiConfig;
use crate::frustum::Frustum;
use crate::grid::GridSnapshot;
use crate::packing;
use crate::transform::WorldToVoxelGridTransform;

/// Per-instance data for the debug cube draw: a model matrix placing a unit
/// cube centred at the origin, and the voxel colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugCubeInstance {
    pub model: [[f32; 4]; 4],
    pub colour: [f32; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugDrawStats {
    pub visited: u64,
    pub occupied: u64,
    pub culled: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DebugVoxelVisualizer {
    enabled: bool,
}

impl DebugVoxelVisualizer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_config(config: &VoxelGiConfig) -> Self {
        Self::new(config.debug_draw)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Cube instances for the occupied voxels of `level` whose world bounds
    /// intersect the frustum. Empty when disabled.
    pub fn collect_instances(
        &self,
        level: &GridSnapshot,
        transform: &WorldToVoxelGridTransform,
        frustum: &Frustum,
    ) -> (Vec<DebugCubeInstance>, DebugDrawStats) {
        let mut stats = DebugDrawStats::default();
        let mut instances = Vec::new();
        if !self.enabled {
            return (instances, stats);
        }

        let n = level.resolution;
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    stats.visited += 1;
                    let index = UVec3::new(x, y, z);
                    let colour = level.colour_at(index).unwrap_or(packing::EMPTY_VOXEL);
                    if colour == packing::EMPTY_VOXEL {
                        continue;
                    }
                    stats.occupied += 1;
                    let bounds = transform.voxel_world_aabb(index, n);
                    if !frustum.intersects_aabb(&bounds) {
                        stats.culled += 1;
                        continue;
                    }
                    let model = Mat4::from_translation(bounds.center()) * Mat4::from_scale(bounds.extent());
                    let rgb = packing::unpack_unorm4(colour).truncate();
                    instances.push(DebugCubeInstance {
                        model: model.to_cols_array_2d(),
                        colour: rgb.extend(1.0).into(),
                    });
                }
            }
        }

        log::debug!(
            "debug voxels: {} occupied, {} culled, {} drawn",
            stats.occupied,
            stats.culled,
            instances.len()
        );
        (instances, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccumulationPolicy, Aabb};
    use crate::grid::VoxelGrid;
    use glam::{Vec3, Vec4};

    fn setup() -> (GridSnapshot, WorldToVoxelGridTransform) {
        let transform =
            WorldToVoxelGridTransform::from_aabb(Aabb::new(Vec3::splat(-4.0), Vec3::splat(4.0)))
                .expect("transform");
        let grid = VoxelGrid::new(4).expect("grid");
        // Voxel (0, *, 1) spans x in [-4, -2]; voxel (3, *, 1) spans x in [2, 4].
        grid.accumulate(UVec3::new(0, 1, 1), Vec3::X, Vec3::Y, AccumulationPolicy::Average);
        grid.accumulate(UVec3::new(3, 1, 1), Vec3::Y, Vec3::Y, AccumulationPolicy::Average);
        (grid.snapshot(), transform)
    }

    fn frustum_over_negative_x() -> Frustum {
        // Sees x in [-5, -1], y in [-5, 5], looking down -Z from z = 10.
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::orthographic_rh(-5.0, -1.0, -5.0, 5.0, 0.1, 100.0);
        Frustum::from_view_projection(projection * view)
    }

    #[test]
    fn disabled_visualizer_draws_nothing() {
        let (level, transform) = setup();
        let visualizer = DebugVoxelVisualizer::from_config(&VoxelGiConfig::default());
        let (instances, stats) = visualizer.collect_instances(&level, &transform, &frustum_over_negative_x());
        assert!(instances.is_empty());
        assert_eq!(stats.visited, 0);
    }

    #[test]
    fn voxels_outside_frustum_are_culled() {
        let (level, transform) = setup();
        let visualizer = DebugVoxelVisualizer::new(true);
        let (instances, stats) = visualizer.collect_instances(&level, &transform, &frustum_over_negative_x());
        assert_eq!(stats.visited, 64);
        assert_eq!(stats.occupied, 2);
        assert_eq!(stats.culled, 1);
        assert_eq!(instances.len(), 1);

        let model = Mat4::from_cols_array_2d(&instances[0].model);
        let center = model.transform_point3(Vec3::ZERO);
        assert!(center.abs_diff_eq(Vec3::new(-3.0, -1.0, -1.0), 1e-5));
        let corner = model.transform_point3(Vec3::splat(0.5));
        assert!(corner.abs_diff_eq(Vec3::new(-2.0, 0.0, 0.0), 1e-5));
        assert_eq!(Vec4::from(instances[0].colour), Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn voxel_touching_frustum_boundary_is_drawn() {
        let (level, transform) = setup();
        // Right plane at x = -2 touches the max face of voxel (0, 1, 1).
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::orthographic_rh(-6.0, -2.0, -5.0, 5.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(projection * view);
        let (instances, _) = DebugVoxelVisualizer::new(true).collect_instances(&level, &transform, &frustum);
        assert_eq!(instances.len(), 1);
    }
}

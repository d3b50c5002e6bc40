//! Mapping between world space, normalized voxel-grid space and voxel indices.
//!
//! Grid space is the cube `[-1, 1]³`. The scene bounds are fitted into it with a
//! single uniform scale taken from the longest scene axis, so the grid is always
//! a cube and the two shorter axes are only partly used.
//!
//! Voxel space is grid space rescaled to `[0, N]³` for a resolution `N`; voxel
//! `(x, y, z)` covers `[x, x + 1) × [y, y + 1) × [z, z + 1)` there.

use glam::{Mat4, UVec3, Vec3};

use crate::core::Aabb;
use crate::error::{Result, VoxelGiError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldToVoxelGridTransform {
    scene_bounds: Aabb,
    voxel_grid_size: f32,
    world_to_grid: Mat4,
    grid_to_world: Mat4,
}

impl WorldToVoxelGridTransform {
    /// Builds the transform for the given scene bounds.
    ///
    /// Fails with [`VoxelGiError::DegenerateBounds`] when the bounds have no
    /// extent or are not finite, since the scale would be infinite.
    pub fn from_aabb(scene_bounds: Aabb) -> Result<Self> {
        if scene_bounds.is_degenerate() {
            return Err(VoxelGiError::DegenerateBounds {
                min: scene_bounds.min,
                max: scene_bounds.max,
            });
        }
        let extent = scene_bounds.extent();
        let voxel_grid_size = extent.max_element();
        let scale = 2.0 / voxel_grid_size;
        let center = scene_bounds.min + extent * 0.5;
        let translation = -center * scale;

        let world_to_grid = Mat4::from_translation(translation) * Mat4::from_scale(Vec3::splat(scale));
        let grid_to_world =
            Mat4::from_translation(center) * Mat4::from_scale(Vec3::splat(voxel_grid_size * 0.5));

        Ok(Self {
            scene_bounds,
            voxel_grid_size,
            world_to_grid,
            grid_to_world,
        })
    }

    pub fn scene_bounds(&self) -> Aabb {
        self.scene_bounds
    }

    /// World-space edge length of the cubic grid volume.
    pub fn voxel_grid_size(&self) -> f32 {
        self.voxel_grid_size
    }

    /// Column-vector matrix (translation in `w_axis`).
    pub fn world_to_grid(&self) -> Mat4 {
        self.world_to_grid
    }

    pub fn grid_to_world(&self) -> Mat4 {
        self.grid_to_world
    }

    /// The transform laid out for row-vector consumers (translation in the fourth row).
    pub fn to_row_major(&self) -> [[f32; 4]; 4] {
        // Columns of the column-vector matrix are the rows of its transpose.
        self.world_to_grid.to_cols_array_2d()
    }

    pub fn world_to_grid_point(&self, world: Vec3) -> Vec3 {
        self.world_to_grid.transform_point3(world)
    }

    pub fn grid_to_world_point(&self, grid: Vec3) -> Vec3 {
        self.grid_to_world.transform_point3(grid)
    }

    /// The cube of world space covered by the grid, centred on the scene bounds.
    pub fn grid_bounds_world(&self) -> Aabb {
        let half = Vec3::splat(self.voxel_grid_size * 0.5);
        let center = self.scene_bounds.center();
        Aabb::new(center - half, center + half)
    }

    pub fn voxel_size_world(&self, resolution: u32) -> f32 {
        self.voxel_grid_size / resolution as f32
    }

    /// Voxel containing a world point, or `None` when the point falls outside
    /// the grid. Points on the `+1` face belong to the last voxel.
    pub fn world_to_voxel(&self, world: Vec3, resolution: u32) -> Option<UVec3> {
        grid_to_voxel(self.world_to_grid_point(world), resolution)
    }

    /// World-space bounds of one voxel.
    pub fn voxel_world_aabb(&self, index: UVec3, resolution: u32) -> Aabb {
        let n = resolution as f32;
        let grid_min = index.as_vec3() / n * 2.0 - Vec3::ONE;
        let grid_max = (index + UVec3::ONE).as_vec3() / n * 2.0 - Vec3::ONE;
        Aabb::new(
            self.grid_to_world_point(grid_min),
            self.grid_to_world_point(grid_max),
        )
    }
}

/// Grid space `[-1, 1]³` to continuous voxel space `[0, N]³`.
pub fn grid_to_voxel_space(grid: Vec3, resolution: u32) -> Vec3 {
    (grid + Vec3::ONE) * 0.5 * resolution as f32
}

/// Continuous voxel space back to grid space.
pub fn voxel_space_to_grid(voxel: Vec3, resolution: u32) -> Vec3 {
    voxel / resolution as f32 * 2.0 - Vec3::ONE
}

/// Voxel index of a grid-space point. Clips, never clamps points outside `[-1, 1]³`.
pub fn grid_to_voxel(grid: Vec3, resolution: u32) -> Option<UVec3> {
    if !grid.is_finite() || grid.cmplt(Vec3::NEG_ONE).any() || grid.cmpgt(Vec3::ONE).any() {
        return None;
    }
    let voxel = grid_to_voxel_space(grid, resolution).floor();
    let last = resolution.saturating_sub(1);
    Some(voxel.as_uvec3().min(UVec3::splat(last)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};

    fn scenario_transform() -> WorldToVoxelGridTransform {
        WorldToVoxelGridTransform::from_aabb(Aabb::new(
            Vec3::new(-100.0, -50.0, -100.0),
            Vec3::new(100.0, 150.0, 100.0),
        ))
        .expect("transform")
    }

    #[test]
    fn cubic_scene_maps_to_unit_cube() {
        let transform = scenario_transform();
        assert_abs_diff_eq!(transform.voxel_grid_size(), 200.0);

        let m = transform.world_to_grid();
        assert_abs_diff_eq!(m.x_axis.x, 0.01);
        assert_abs_diff_eq!(m.y_axis.y, 0.01);
        assert_abs_diff_eq!(m.z_axis.z, 0.01);
        assert_abs_diff_eq!(m.w_axis.y, -0.5);

        let origin = transform.world_to_grid_point(Vec3::new(0.0, 50.0, 0.0));
        assert!(origin.abs_diff_eq(Vec3::ZERO, 1e-6));
        let corner = transform.world_to_grid_point(Vec3::new(100.0, 150.0, 100.0));
        assert!(corner.abs_diff_eq(Vec3::ONE, 1e-6));
        let low = transform.world_to_grid_point(Vec3::new(-100.0, -50.0, -100.0));
        assert!(low.abs_diff_eq(Vec3::NEG_ONE, 1e-6));
    }

    #[test]
    fn row_major_layout_puts_translation_in_fourth_row() {
        let rows = scenario_transform().to_row_major();
        assert_abs_diff_eq!(rows[3][1], -0.5);
        assert_abs_diff_eq!(rows[0][0], 0.01);
        assert_abs_diff_eq!(rows[1][3], 0.0);
        assert_abs_diff_eq!(rows[3][3], 1.0);

        // Row vector times matrix agrees with the column-vector path.
        let world = [100.0_f32, 150.0, 100.0, 1.0];
        let mut grid = [0.0_f32; 4];
        for (col, out) in grid.iter_mut().enumerate() {
            *out = (0..4).map(|row| world[row] * rows[row][col]).sum();
        }
        assert_abs_diff_eq!(grid[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(grid[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(grid[2], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(grid[3], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn points_inside_bounds_land_in_unit_cube() {
        let bounds = Aabb::new(Vec3::new(-3.0, 10.0, 0.5), Vec3::new(7.0, 12.0, 4.0));
        let transform = WorldToVoxelGridTransform::from_aabb(bounds).expect("transform");
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let t = Vec3::new(rng.gen(), rng.gen(), rng.gen());
            let p = bounds.min + bounds.extent() * t;
            let g = transform.world_to_grid_point(p);
            assert!(g.cmpge(Vec3::splat(-1.0 - 1e-5)).all(), "{g:?}");
            assert!(g.cmple(Vec3::splat(1.0 + 1e-5)).all(), "{g:?}");
            let back = transform.grid_to_world_point(g);
            assert!(back.abs_diff_eq(p, 1e-4), "{back:?} vs {p:?}");
        }
        assert!(transform
            .world_to_grid_point(bounds.center())
            .abs_diff_eq(Vec3::ZERO, 1e-6));
    }

    #[test]
    fn grid_size_is_longest_extent_and_contains_scene() {
        let bounds = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(4.0, 10.0, 2.0));
        let transform = WorldToVoxelGridTransform::from_aabb(bounds).expect("transform");
        assert_abs_diff_eq!(transform.voxel_grid_size(), 10.0);
        let cube = transform.grid_bounds_world();
        assert!(cube.extent().abs_diff_eq(Vec3::splat(10.0), 1e-5));
        assert!(cube.center().abs_diff_eq(bounds.center(), 1e-5));
        for corner in bounds.corners() {
            assert!(cube.contains_point(corner));
        }
        assert!(transform
            .grid_to_world()
            .abs_diff_eq(transform.world_to_grid().inverse(), 1e-5));
    }

    #[test]
    fn degenerate_bounds_are_rejected() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        let result = WorldToVoxelGridTransform::from_aabb(Aabb::new(p, p));
        assert!(matches!(result, Err(VoxelGiError::DegenerateBounds { .. })));
    }

    #[test]
    fn flat_bounds_are_accepted() {
        // A ground plane has zero height but a usable extent.
        let bounds = Aabb::new(Vec3::new(-5.0, 0.0, -5.0), Vec3::new(5.0, 0.0, 5.0));
        let transform = WorldToVoxelGridTransform::from_aabb(bounds).expect("transform");
        assert_abs_diff_eq!(transform.voxel_grid_size(), 10.0);
    }

    #[test]
    fn world_to_voxel_clips_outside_points() {
        let transform = scenario_transform();
        let n = 64;
        assert_eq!(
            transform.world_to_voxel(Vec3::new(0.0, 50.0, 0.0), n),
            Some(UVec3::splat(32))
        );
        assert_eq!(
            transform.world_to_voxel(Vec3::new(100.0, 150.0, 100.0), n),
            Some(UVec3::splat(63))
        );
        assert_eq!(
            transform.world_to_voxel(Vec3::new(-100.0, -50.0, -100.0), n),
            Some(UVec3::ZERO)
        );
        assert_eq!(transform.world_to_voxel(Vec3::new(100.5, 50.0, 0.0), n), None);
        assert_eq!(transform.world_to_voxel(Vec3::new(0.0, -60.0, 0.0), n), None);
    }

    #[test]
    fn voxel_aabb_contains_points_mapping_to_it() {
        let transform = scenario_transform();
        let n = 16;
        let index = UVec3::new(3, 9, 15);
        let aabb = transform.voxel_world_aabb(index, n);
        assert!(aabb
            .extent()
            .abs_diff_eq(Vec3::splat(transform.voxel_size_world(n)), 1e-4));
        assert_eq!(transform.world_to_voxel(aabb.center(), n), Some(index));
    }

    #[test]
    fn voxel_space_round_trip() {
        let g = Vec3::new(-0.25, 0.5, 0.999);
        let v = grid_to_voxel_space(g, 8);
        assert!(v.abs_diff_eq(Vec3::new(3.0, 6.0, 7.996), 1e-4));
        assert!(voxel_space_to_grid(v, 8).abs_diff_eq(g, 1e-6));
    }
}

//! Mip chain generation for the voxel grid.
//!
//! Level 0 is first resolved from accumulation format (alpha = sample count)
//! into the resolved format (alpha = coverage). Every coarser voxel is then a
//! coverage-weighted box filter of its eight children. Colour uses integer
//! arithmetic only, so regenerating from the same level 0 is bit-identical.

use glam::{UVec3, UVec4, Vec3};

use crate::core::mip_resolution;
use crate::error::{Result, VoxelGiError};
use crate::grid::{linear_index, GridSnapshot};
use crate::packing::{self, EMPTY_VOXEL};

pub const FULL_COVERAGE: u32 = 255;

/// Converts accumulated samples into resolved voxels with full coverage.
pub fn resolve_base_level(accumulated: &GridSnapshot) -> GridSnapshot {
    let colour = accumulated
        .colour
        .iter()
        .map(|&packed| {
            if packing::sample_count(packed) == 0 {
                EMPTY_VOXEL
            } else {
                let rgba = packing::unpack_rgba8(packed);
                packing::pack_rgba8(rgba.truncate().extend(FULL_COVERAGE))
            }
        })
        .collect();
    let normal = accumulated
        .normal
        .iter()
        .map(|&packed| {
            if packing::sample_count(packed) == 0 {
                EMPTY_VOXEL
            } else {
                let encoded = packing::unpack_unorm4(packed).truncate();
                pack_normal(packing::decode_normal(encoded), FULL_COVERAGE)
            }
        })
        .collect();
    GridSnapshot {
        resolution: accumulated.resolution,
        colour,
        normal,
    }
}

fn pack_normal(normal: Vec3, coverage: u32) -> u32 {
    let encoded = packing::encode_normal(normal);
    packing::pack_rgba8(UVec4::new(
        packing::unorm_to_byte(encoded.x),
        packing::unorm_to_byte(encoded.y),
        packing::unorm_to_byte(encoded.z),
        coverage,
    ))
}

/// Computes the next coarser level from a resolved level.
pub fn downsample(fine: &GridSnapshot) -> GridSnapshot {
    let coarse_res = (fine.resolution / 2).max(1);
    let mut coarse = GridSnapshot::empty(coarse_res);

    for z in 0..coarse_res {
        for y in 0..coarse_res {
            for x in 0..coarse_res {
                let (colour, normal) = filter_children(fine, UVec3::new(x, y, z));
                let linear = linear_index(UVec3::new(x, y, z), coarse_res);
                coarse.colour[linear] = colour;
                coarse.normal[linear] = normal;
            }
        }
    }
    coarse
}

fn filter_children(fine: &GridSnapshot, coarse_index: UVec3) -> (u32, u32) {
    let mut coverage_sum = 0u32;
    let mut weighted_rgb = UVec3::ZERO;
    let mut weighted_normal = Vec3::ZERO;

    for dz in 0..2 {
        for dy in 0..2 {
            for dx in 0..2 {
                let child = coarse_index * 2 + UVec3::new(dx, dy, dz);
                let (Some(colour), Some(normal)) = (fine.colour_at(child), fine.normal_at(child)) else {
                    continue;
                };
                let colour = packing::unpack_rgba8(colour);
                let coverage = colour.w;
                if coverage == 0 {
                    continue;
                }
                coverage_sum += coverage;
                weighted_rgb += colour.truncate() * coverage;
                let normal = packing::unpack_unorm4(normal).truncate();
                weighted_normal += packing::decode_normal(normal) * coverage as f32;
            }
        }
    }

    if coverage_sum == 0 {
        return (EMPTY_VOXEL, EMPTY_VOXEL);
    }
    let rgb = (weighted_rgb + UVec3::splat(coverage_sum / 2)) / coverage_sum;
    let coverage = ((coverage_sum + 4) / 8).max(1);
    (
        packing::pack_rgba8(rgb.extend(coverage)),
        pack_normal(weighted_normal, coverage),
    )
}

/// Resolved levels from the base resolution down, one per configured mip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipChain {
    levels: Vec<GridSnapshot>,
}

impl MipChain {
    pub fn generate(accumulated: &GridSnapshot, level_count: u32) -> Self {
        let mut levels = Vec::with_capacity(level_count.max(1) as usize);
        levels.push(resolve_base_level(accumulated));
        for level in 1..level_count {
            let next = downsample(&levels[level as usize - 1]);
            debug_assert_eq!(next.resolution, mip_resolution(accumulated.resolution, level));
            levels.push(next);
        }
        Self { levels }
    }

    /// Recomputes every level above the base from the current base level.
    pub fn regenerate(&mut self) {
        for level in 1..self.levels.len() {
            let next = downsample(&self.levels[level - 1]);
            self.levels[level] = next;
        }
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level(&self, level: u32) -> Result<&GridSnapshot> {
        self.levels
            .get(level as usize)
            .ok_or(VoxelGiError::MipLevelOutOfRange {
                level,
                levels: self.level_count(),
            })
    }

    pub fn levels(&self) -> &[GridSnapshot] {
        &self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AccumulationPolicy;
    use crate::grid::VoxelGrid;

    fn grid_with_voxels(resolution: u32, voxels: &[(UVec3, Vec3, Vec3)]) -> GridSnapshot {
        let grid = VoxelGrid::new(resolution).expect("grid");
        for &(index, colour, normal) in voxels {
            grid.accumulate(index, colour, normal, AccumulationPolicy::Average);
        }
        grid.snapshot()
    }

    #[test]
    fn resolve_sets_full_coverage() {
        let accumulated = grid_with_voxels(2, &[(UVec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::Y)]);
        let resolved = resolve_base_level(&accumulated);
        assert_eq!(packing::unpack_rgba8(resolved.colour_at(UVec3::ZERO).expect("in range")), UVec4::new(255, 0, 0, 255));
        assert_eq!(packing::unpack_rgba8(resolved.normal_at(UVec3::ZERO).expect("in range")).w, 255);
        assert_eq!(resolved.colour_at(UVec3::ONE).expect("in range"), EMPTY_VOXEL);
    }

    #[test]
    fn coarse_voxel_is_coverage_weighted_average_of_children() {
        let accumulated = grid_with_voxels(
            2,
            &[
                (UVec3::new(0, 0, 0), Vec3::new(1.0, 0.0, 0.0), Vec3::Y),
                (UVec3::new(1, 1, 1), Vec3::new(0.0, 0.0, 1.0), Vec3::Y),
            ],
        );
        let chain = MipChain::generate(&accumulated, 2);
        let top = chain.level(1).expect("level 1");
        assert_eq!(top.resolution, 1);
        let colour = packing::unpack_rgba8(top.colour_at(UVec3::ZERO).expect("in range"));
        assert_eq!(colour, UVec4::new(128, 0, 128, 64));
        let normal = packing::unpack_unorm4(top.normal_at(UVec3::ZERO).expect("in range")).truncate();
        assert!(packing::decode_normal(normal).abs_diff_eq(Vec3::Y, 0.01));
    }

    #[test]
    fn single_faint_child_keeps_nonzero_coverage() {
        let mut fine = GridSnapshot::empty(2);
        fine.colour[0] = packing::pack_rgba8(UVec4::new(0, 0, 0, 1));
        fine.normal[0] = packing::pack_rgba8(UVec4::new(128, 255, 128, 1));
        let coarse = downsample(&fine);
        assert_ne!(coarse.colour[0], EMPTY_VOXEL);
        assert_eq!(packing::unpack_rgba8(coarse.colour[0]).w, 1);
    }

    #[test]
    fn empty_grid_stays_empty_through_chain() {
        let chain = MipChain::generate(&GridSnapshot::empty(8), 4);
        assert_eq!(chain.level_count(), 4);
        for level in chain.levels() {
            assert_eq!(level.occupied_count(), 0);
        }
        assert_eq!(chain.level(3).expect("level 3").resolution, 1);
        assert!(matches!(
            chain.level(4),
            Err(VoxelGiError::MipLevelOutOfRange { level: 4, levels: 4 })
        ));
    }

    #[test]
    fn regeneration_is_bit_identical() {
        let mut voxels = Vec::new();
        for i in 0..40u32 {
            let index = UVec3::new(i % 8, (i * 3) % 8, (i * 5) % 8);
            let colour = Vec3::new((i % 7) as f32 / 7.0, (i % 3) as f32 / 3.0, 0.25);
            let normal = Vec3::new(1.0, i as f32 * 0.1, -0.5);
            voxels.push((index, colour, normal));
        }
        let accumulated = grid_with_voxels(8, &voxels);
        let mut chain = MipChain::generate(&accumulated, 4);
        let first = chain.clone();
        chain.regenerate();
        assert_eq!(chain, first);
        assert_eq!(MipChain::generate(&accumulated, 4), first);
    }
}

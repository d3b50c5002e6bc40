use std::sync::atomic::{AtomicU32, Ordering};

use glam::{UVec3, Vec3, Vec4};

use crate::core::{AccumulationPolicy, MAX_RESOLUTION};
use crate::error::{Result, VoxelGiError};
use crate::packing::{self, EMPTY_VOXEL};

/// Linear index of a voxel, x fastest.
pub fn linear_index(index: UVec3, resolution: u32) -> usize {
    let n = resolution as usize;
    index.x as usize + n * (index.y as usize + n * index.z as usize)
}

/// Linear index of a voxel, or `None` when it lies outside the grid.
pub fn checked_linear_index(index: UVec3, resolution: u32) -> Option<usize> {
    index
        .cmplt(UVec3::splat(resolution))
        .all()
        .then(|| linear_index(index, resolution))
}

pub fn voxel_coords(linear: usize, resolution: u32) -> UVec3 {
    let n = resolution as usize;
    UVec3::new(
        (linear % n) as u32,
        ((linear / n) % n) as u32,
        (linear / (n * n)) as u32,
    )
}

/// CPU voxel grid with colour and normal channels in accumulation format.
///
/// Every slot is an [`AtomicU32`], so a shared `&VoxelGrid` can be populated
/// from several threads with the same compare-and-swap average the GPU uses.
#[derive(Debug)]
pub struct VoxelGrid {
    resolution: u32,
    colour: Vec<AtomicU32>,
    normal: Vec<AtomicU32>,
}

impl VoxelGrid {
    pub fn new(resolution: u32) -> Result<Self> {
        if resolution == 0 || resolution > MAX_RESOLUTION {
            return Err(VoxelGiError::InvalidConfig(format!(
                "grid resolution must be in 1..={MAX_RESOLUTION} (got {resolution})"
            )));
        }
        let num_voxels = (resolution as usize).pow(3);
        Ok(Self {
            resolution,
            colour: (0..num_voxels).map(|_| AtomicU32::new(EMPTY_VOXEL)).collect(),
            normal: (0..num_voxels).map(|_| AtomicU32::new(EMPTY_VOXEL)).collect(),
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn num_voxels(&self) -> usize {
        self.colour.len()
    }

    /// Writes the empty sentinel into every voxel of both channels.
    pub fn clear(&self) {
        for slot in self.colour.iter().chain(self.normal.iter()) {
            slot.store(EMPTY_VOXEL, Ordering::Relaxed);
        }
    }

    /// Adds one colour and normal sample to a voxel. Out-of-range indices are ignored.
    pub fn accumulate(&self, index: UVec3, colour: Vec3, normal: Vec3, policy: AccumulationPolicy) -> bool {
        let Some(linear) = checked_linear_index(index, self.resolution) else {
            return false;
        };
        packing::accumulate(&self.colour[linear], colour, policy);
        packing::accumulate(&self.normal[linear], packing::encode_normal(normal), policy);
        true
    }

    /// Packed colour of a voxel, `None` outside the grid.
    pub fn colour_at(&self, index: UVec3) -> Option<u32> {
        checked_linear_index(index, self.resolution).map(|i| self.colour[i].load(Ordering::Relaxed))
    }

    pub fn normal_at(&self, index: UVec3) -> Option<u32> {
        checked_linear_index(index, self.resolution).map(|i| self.normal[i].load(Ordering::Relaxed))
    }

    pub fn is_occupied(&self, index: UVec3) -> bool {
        self.colour_at(index).is_some_and(|c| c != EMPTY_VOXEL)
    }

    pub fn occupied_count(&self) -> usize {
        self.colour
            .iter()
            .filter(|slot| slot.load(Ordering::Relaxed) != EMPTY_VOXEL)
            .count()
    }

    /// Copies the current contents out of the atomic slots.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            resolution: self.resolution,
            colour: self.colour.iter().map(|s| s.load(Ordering::Relaxed)).collect(),
            normal: self.normal.iter().map(|s| s.load(Ordering::Relaxed)).collect(),
        }
    }
}

/// Plain copy of one grid level, either read back from the GPU or taken from
/// a [`VoxelGrid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSnapshot {
    pub resolution: u32,
    pub colour: Vec<u32>,
    pub normal: Vec<u32>,
}

/// A voxel with a non-empty colour channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupiedVoxel {
    pub index: UVec3,
    pub colour: u32,
    pub normal: u32,
}

impl OccupiedVoxel {
    pub fn colour_rgba(&self) -> Vec4 {
        packing::unpack_unorm4(self.colour)
    }

    pub fn decoded_normal(&self) -> Vec3 {
        packing::decode_normal(packing::unpack_unorm4(self.normal).truncate()).normalize_or_zero()
    }
}

impl GridSnapshot {
    pub fn empty(resolution: u32) -> Self {
        let num_voxels = (resolution as usize).pow(3);
        Self {
            resolution,
            colour: vec![EMPTY_VOXEL; num_voxels],
            normal: vec![EMPTY_VOXEL; num_voxels],
        }
    }

    pub fn from_raw(resolution: u32, colour: Vec<u32>, normal: Vec<u32>) -> Result<Self> {
        let expected = (resolution as usize).pow(3);
        if colour.len() != expected || normal.len() != expected {
            return Err(VoxelGiError::InvalidConfig(format!(
                "snapshot of resolution {resolution} needs {expected} voxels per channel (got {} and {})",
                colour.len(),
                normal.len()
            )));
        }
        Ok(Self {
            resolution,
            colour,
            normal,
        })
    }

    pub fn colour_at(&self, index: UVec3) -> Option<u32> {
        checked_linear_index(index, self.resolution).map(|i| self.colour[i])
    }

    pub fn normal_at(&self, index: UVec3) -> Option<u32> {
        checked_linear_index(index, self.resolution).map(|i| self.normal[i])
    }

    pub fn is_occupied(&self, index: UVec3) -> bool {
        self.colour_at(index).is_some_and(|c| c != EMPTY_VOXEL)
    }

    pub fn occupied_count(&self) -> usize {
        self.colour.iter().filter(|&&c| c != EMPTY_VOXEL).count()
    }

    pub fn occupied_voxels(&self) -> impl Iterator<Item = OccupiedVoxel> + '_ {
        self.colour
            .iter()
            .zip(self.normal.iter())
            .enumerate()
            .filter(|(_, (&colour, _))| colour != EMPTY_VOXEL)
            .map(|(linear, (&colour, &normal))| OccupiedVoxel {
                index: voxel_coords(linear, self.resolution),
                colour,
                normal,
            })
    }
}

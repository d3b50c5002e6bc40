//! Vertex stream for the populate pass.
//!
//! wgpu has no geometry stage, so the dominant axis of each triangle is picked
//! here and stored per vertex. The pass draws the stream once per axis and the
//! vertex shader discards triangles belonging to the other two draws.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::core::{FrameInputs, PopulateStats, SubMesh};
use crate::reference_cpu::{dominant_axis, normal_matrix};
use crate::transform::WorldToVoxelGridTransform;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct PopulateVertex {
    pub grid_position: [f32; 3],
    pub axis: u32,
    pub normal: [f32; 3],
    pub colour: [f32; 4],
}

impl PopulateVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Uint32, 2 => Float32x3, 3 => Float32x4];

    pub(crate) fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Transforms every drawable triangle into grid space `[-1, 1]³` and tags it
/// with its dominant axis. Zero-area triangles produce no fragments and are
/// dropped.
pub(crate) fn build_triangle_stream(
    submeshes: &[SubMesh],
    frame: &FrameInputs,
    transform: &WorldToVoxelGridTransform,
    skip_alpha_masked: bool,
) -> (Vec<PopulateVertex>, PopulateStats) {
    let world_to_grid = transform.world_to_grid() * frame.world;
    let normal_matrix = normal_matrix(frame.world);
    let mut stats = PopulateStats::default();
    let mut vertices = Vec::new();

    for submesh in submeshes {
        if submesh.material.alpha_mask && skip_alpha_masked {
            log::debug!("skipping alpha-masked submesh ({} triangles)", submesh.triangle_count());
            stats.skipped_submeshes += 1;
            continue;
        }
        stats.submeshes += 1;
        let colour = submesh.material.diffuse.to_array();
        vertices.reserve(submesh.indices.len());

        for triangle in submesh.triangles() {
            stats.triangles += 1;
            let positions = triangle.map(|v| world_to_grid.transform_point3(Vec3::from(v.position)));
            let face_normal = (positions[1] - positions[0]).cross(positions[2] - positions[0]);
            if face_normal == Vec3::ZERO {
                continue;
            }
            let axis = dominant_axis(face_normal) as u32;
            for (vertex, position) in triangle.iter().zip(positions) {
                vertices.push(PopulateVertex {
                    grid_position: position.to_array(),
                    axis,
                    normal: (normal_matrix * Vec3::from(vertex.normal)).to_array(),
                    colour,
                });
            }
        }
    }
    (vertices, stats)
}

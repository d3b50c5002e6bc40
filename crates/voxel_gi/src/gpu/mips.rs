use super::buffers::workgroups_for;
use super::pipelines::GpuPipelines;
use super::resources::GpuVoxelGrid;

/// Resolves level 0 from the accumulation buffers, then builds each coarser
/// level from the one before it. One compute pass per level so every level
/// sees the complete previous one.
pub(crate) fn record_mip_passes(encoder: &mut wgpu::CommandEncoder, pipelines: &GpuPipelines, grid: &GpuVoxelGrid) {
    for (level, bind_group) in grid.level_bind_groups.iter().enumerate() {
        let (label, pipeline) = if level == 0 {
            ("voxel_gi.resolve_pass", &pipelines.resolve)
        } else {
            ("voxel_gi.downsample_pass", &pipelines.downsample)
        };
        let workgroups = workgroups_for(crate::core::mip_resolution(grid.resolution(), level as u32));
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups, workgroups, workgroups);
    }
}

pub(crate) fn record_clear_pass(encoder: &mut wgpu::CommandEncoder, pipelines: &GpuPipelines, grid: &GpuVoxelGrid) {
    let workgroups = workgroups_for(grid.resolution());
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some("voxel_gi.clear_pass"),
        timestamp_writes: None,
    });
    pass.set_pipeline(&pipelines.clear);
    pass.set_bind_group(0, &grid.clear_bind_group, &[]);
    pass.dispatch_workgroups(workgroups, workgroups, workgroups);
}

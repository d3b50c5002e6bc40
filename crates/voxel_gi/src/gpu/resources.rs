//! GPU-resident voxel grid: accumulation buffers, the resolved mip chain (as
//! buffers for readback and as 3D textures for sampling) and the bind groups
//! of every pass.

use super::buffers::{capture_errors, storage_buffer, uniform_buffer};
use super::params::{LevelParams, PopulateParams};
use super::pipelines::{GpuPipelines, RASTER_TARGET_FORMAT, VOXEL_TEXTURE_FORMAT};
use crate::core::{mip_resolution, AccumulationPolicy, VoxelGiConfig};
use crate::error::{Result, VoxelGiError};

pub struct LevelBuffers {
    pub resolution: u32,
    pub colour: wgpu::Buffer,
    pub normal: wgpu::Buffer,
}

pub struct GpuVoxelGrid {
    resolution: u32,
    accum_colour: wgpu::Buffer,
    accum_normal: wgpu::Buffer,
    levels: Vec<LevelBuffers>,
    colour_texture: wgpu::Texture,
    normal_texture: wgpu::Texture,
    colour_view: wgpu::TextureView,
    normal_view: wgpu::TextureView,
    raster_target: wgpu::TextureView,
    pub(crate) clear_bind_group: wgpu::BindGroup,
    pub(crate) populate_bind_groups: [wgpu::BindGroup; 3],
    /// Index 0 resolves the accumulation buffers; index `l` downsamples level `l - 1` into `l`.
    pub(crate) level_bind_groups: Vec<wgpu::BindGroup>,
}

fn policy_code(policy: AccumulationPolicy) -> u32 {
    match policy {
        AccumulationPolicy::Average => 0,
        AccumulationPolicy::LastWriteWins => 1,
    }
}

fn voxel_texture(device: &wgpu::Device, label: &str, resolution: u32, levels: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: resolution,
        },
        mip_level_count: levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D3,
        format: VOXEL_TEXTURE_FORMAT,
        usage: wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn mip_view(texture: &wgpu::Texture, level: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("voxel_gi.mip_view"),
        dimension: Some(wgpu::TextureViewDimension::D3),
        base_mip_level: level,
        mip_level_count: Some(1),
        ..Default::default()
    })
}

impl GpuVoxelGrid {
    /// Allocates every resource for `config`, failing on device limits or on
    /// allocation errors raised by the device.
    pub async fn new(device: &wgpu::Device, pipelines: &GpuPipelines, config: &VoxelGiConfig) -> Result<Self> {
        let resolution = config.resolution;
        let level_count = config.mip_level_count();
        let bytes = config.num_voxels() * 4;
        let max = device.limits().max_storage_buffer_binding_size as u64;
        if bytes > max {
            return Err(VoxelGiError::ResourceLimit {
                resource: "voxel grid".to_string(),
                bytes,
                max,
            });
        }
        let max_extent = device.limits().max_texture_dimension_3d;
        if resolution > max_extent {
            return Err(VoxelGiError::UnsupportedAdapter(format!(
                "3D textures are limited to {max_extent} texels per edge (need {resolution})"
            )));
        }

        let (grid, err) = capture_errors(device, || {
            Self::allocate(device, pipelines, config, resolution, level_count, bytes)
        })
        .await;
        if let Some(err) = err {
            return Err(VoxelGiError::ResourceAllocation {
                resource: format!("{resolution}³ voxel grid with {level_count} levels"),
                message: err.to_string(),
            });
        }
        log::debug!(
            "allocated {resolution}³ voxel grid: {level_count} levels, {} bytes per channel at level 0",
            bytes
        );
        Ok(grid)
    }

    fn allocate(
        device: &wgpu::Device,
        pipelines: &GpuPipelines,
        config: &VoxelGiConfig,
        resolution: u32,
        level_count: u32,
        bytes: u64,
    ) -> Self {
        let accum_colour = storage_buffer(device, "voxel_gi.accum_colour", bytes);
        let accum_normal = storage_buffer(device, "voxel_gi.accum_normal", bytes);

        let levels: Vec<LevelBuffers> = (0..level_count)
            .map(|level| {
                let res = mip_resolution(resolution, level);
                let level_bytes = (res as u64).pow(3) * 4;
                LevelBuffers {
                    resolution: res,
                    colour: storage_buffer(device, "voxel_gi.level_colour", level_bytes),
                    normal: storage_buffer(device, "voxel_gi.level_normal", level_bytes),
                }
            })
            .collect();

        let colour_texture = voxel_texture(device, "voxel_gi.colour_texture", resolution, level_count);
        let normal_texture = voxel_texture(device, "voxel_gi.normal_texture", resolution, level_count);
        let colour_view = colour_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let normal_view = normal_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let raster_target = device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("voxel_gi.raster_target"),
                size: wgpu::Extent3d {
                    width: resolution,
                    height: resolution,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: RASTER_TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        let base_params = uniform_buffer(
            device,
            "voxel_gi.base_params",
            &LevelParams::new(resolution, resolution),
        );
        let clear_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxel_gi.clear_bind_group"),
            layout: &pipelines.clear_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: base_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: accum_colour.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: accum_normal.as_entire_binding(),
                },
            ],
        });

        let policy = policy_code(config.accumulation);
        let populate_bind_groups = [0u32, 1, 2].map(|axis| {
            let params = uniform_buffer(
                device,
                "voxel_gi.populate_params",
                &PopulateParams {
                    resolution,
                    axis,
                    policy,
                    _pad0: 0,
                },
            );
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("voxel_gi.populate_bind_group"),
                layout: &pipelines.populate_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: accum_colour.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: accum_normal.as_entire_binding(),
                    },
                ],
            })
        });

        let level_bind_groups = (0..level_count as usize)
            .map(|level| {
                let target = &levels[level];
                let (source_colour, source_normal) = if level == 0 {
                    (&accum_colour, &accum_normal)
                } else {
                    (&levels[level - 1].colour, &levels[level - 1].normal)
                };
                let source_res = mip_resolution(resolution, (level as u32).saturating_sub(1));
                let params = uniform_buffer(
                    device,
                    "voxel_gi.level_params",
                    &LevelParams::new(target.resolution, source_res),
                );
                let colour_mip = mip_view(&colour_texture, level as u32);
                let normal_mip = mip_view(&normal_texture, level as u32);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("voxel_gi.level_bind_group"),
                    layout: &pipelines.level_bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: params.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: source_colour.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: source_normal.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: target.colour.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: target.normal.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 5,
                            resource: wgpu::BindingResource::TextureView(&colour_mip),
                        },
                        wgpu::BindGroupEntry {
                            binding: 6,
                            resource: wgpu::BindingResource::TextureView(&normal_mip),
                        },
                    ],
                })
            })
            .collect();

        Self {
            resolution,
            accum_colour,
            accum_normal,
            levels,
            colour_texture,
            normal_texture,
            colour_view,
            normal_view,
            raster_target,
            clear_bind_group,
            populate_bind_groups,
            level_bind_groups,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Accumulation-format colour buffer (alpha = sample count), written by populate.
    pub fn accum_colour(&self) -> &wgpu::Buffer {
        &self.accum_colour
    }

    pub fn accum_normal(&self) -> &wgpu::Buffer {
        &self.accum_normal
    }

    pub fn level(&self, level: u32) -> Result<&LevelBuffers> {
        self.levels
            .get(level as usize)
            .ok_or(VoxelGiError::MipLevelOutOfRange {
                level,
                levels: self.level_count(),
            })
    }

    /// Resolved colour (alpha = coverage) as a mipmapped 3D texture.
    pub fn colour_texture(&self) -> &wgpu::Texture {
        &self.colour_texture
    }

    pub fn normal_texture(&self) -> &wgpu::Texture {
        &self.normal_texture
    }

    pub fn colour_view(&self) -> &wgpu::TextureView {
        &self.colour_view
    }

    pub fn normal_view(&self) -> &wgpu::TextureView {
        &self.normal_view
    }

    pub(crate) fn raster_target(&self) -> &wgpu::TextureView {
        &self.raster_target
    }
}

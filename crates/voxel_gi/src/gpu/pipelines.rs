use super::buffers::capture_errors;
use super::populate::PopulateVertex;
use super::shaders::{with_packing, CLEAR_WGSL, DOWNSAMPLE_WGSL, POPULATE_WGSL, RESOLVE_WGSL};
use crate::error::{Result, VoxelGiError};

/// Format of the dummy attachment the populate pass renders into. Nothing is
/// written to it; it only sizes the viewport to the grid.
pub(crate) const RASTER_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;

/// Format of the sampled colour and normal 3D textures.
pub const VOXEL_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct GpuPipelines {
    pub clear: wgpu::ComputePipeline,
    pub clear_bind_group_layout: wgpu::BindGroupLayout,
    pub populate: wgpu::RenderPipeline,
    pub populate_bind_group_layout: wgpu::BindGroupLayout,
    pub resolve: wgpu::ComputePipeline,
    pub downsample: wgpu::ComputePipeline,
    /// Shared by the resolve and downsample passes.
    pub level_bind_group_layout: wgpu::BindGroupLayout,
    pub conservative: bool,
}

fn storage_entry(binding: u32, visibility: wgpu::ShaderStages, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: VOXEL_TEXTURE_FORMAT,
            view_dimension: wgpu::TextureViewDimension::D3,
        },
        count: None,
    }
}

pub async fn create_pipelines(device: &wgpu::Device, conservative: bool) -> Result<GpuPipelines> {
    let compute = wgpu::ShaderStages::COMPUTE;

    let clear_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("voxel_gi.clear_bind_group_layout"),
        entries: &[
            uniform_entry(0, compute),
            storage_entry(1, compute, false),
            storage_entry(2, compute, false),
        ],
    });
    let populate_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("voxel_gi.populate_bind_group_layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
            storage_entry(1, wgpu::ShaderStages::FRAGMENT, false),
            storage_entry(2, wgpu::ShaderStages::FRAGMENT, false),
        ],
    });
    let level_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("voxel_gi.level_bind_group_layout"),
        entries: &[
            uniform_entry(0, compute),
            storage_entry(1, compute, true),
            storage_entry(2, compute, true),
            storage_entry(3, compute, false),
            storage_entry(4, compute, false),
            storage_texture_entry(5),
            storage_texture_entry(6),
        ],
    });

    let clear_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("voxel_gi.clear_pipeline_layout"),
        bind_group_layouts: &[&clear_bind_group_layout],
        push_constant_ranges: &[],
    });
    let populate_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("voxel_gi.populate_pipeline_layout"),
        bind_group_layouts: &[&populate_bind_group_layout],
        push_constant_ranges: &[],
    });
    let level_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("voxel_gi.level_pipeline_layout"),
        bind_group_layouts: &[&level_bind_group_layout],
        push_constant_ranges: &[],
    });

    let compute_pipeline = |label: &str, source: &str, layout: &wgpu::PipelineLayout| {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(with_packing(source).into()),
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(layout),
            module: &module,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        })
    };

    let ((clear, resolve, downsample), err) = capture_errors(device, || {
        (
            compute_pipeline("voxel_gi.clear", CLEAR_WGSL, &clear_pipeline_layout),
            compute_pipeline("voxel_gi.resolve", RESOLVE_WGSL, &level_pipeline_layout),
            compute_pipeline("voxel_gi.downsample", DOWNSAMPLE_WGSL, &level_pipeline_layout),
        )
    })
    .await;
    if let Some(err) = err {
        return Err(VoxelGiError::Pipeline {
            pipeline: "voxel_gi.clear/resolve/downsample".to_string(),
            message: err.to_string(),
        });
    }

    let (populate, err) = capture_errors(device, || {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("voxel_gi.populate.wgsl"),
            source: wgpu::ShaderSource::Wgsl(with_packing(POPULATE_WGSL).into()),
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("voxel_gi.populate"),
            layout: Some(&populate_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[PopulateVertex::layout()],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                conservative,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: RASTER_TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::empty(),
                })],
            }),
            multiview: None,
            cache: None,
        })
    })
    .await;
    if let Some(err) = err {
        return Err(VoxelGiError::Pipeline {
            pipeline: "voxel_gi.populate".to_string(),
            message: err.to_string(),
        });
    }

    Ok(GpuPipelines {
        clear,
        clear_bind_group_layout,
        populate,
        populate_bind_group_layout,
        resolve,
        downsample,
        level_bind_group_layout,
        conservative,
    })
}

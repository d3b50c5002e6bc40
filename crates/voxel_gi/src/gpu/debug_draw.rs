//! Instanced cube draw for [`DebugCubeInstance`]s.

use glam::Mat4;
use wgpu::util::DeviceExt;

use super::buffers::{capture_errors, uniform_buffer};
use super::params::CameraUniform;
use super::shaders::DEBUG_CUBE_WGSL;
use crate::debug_view::DebugCubeInstance;
use crate::error::{Result, VoxelGiError};

const CUBE_VERTEX_COUNT: u32 = 36;

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
    0 => Float32x4,
    1 => Float32x4,
    2 => Float32x4,
    3 => Float32x4,
    4 => Float32x4
];

fn camera_uniform(view_projection: Mat4) -> CameraUniform {
    CameraUniform {
        view_projection: view_projection.to_cols_array_2d(),
    }
}

pub struct DebugCubeRenderer {
    pipeline: wgpu::RenderPipeline,
    camera_layout: wgpu::BindGroupLayout,
}

impl DebugCubeRenderer {
    /// Builds the pipeline for the caller's colour target and optional depth format.
    pub async fn new(
        device: &wgpu::Device,
        colour_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Result<Self> {
        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxel_gi.debug_bind_group_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("voxel_gi.debug_pipeline_layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });

        let (pipeline, err) = capture_errors(device, || {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("voxel_gi.debug_cube.wgsl"),
                source: wgpu::ShaderSource::Wgsl(DEBUG_CUBE_WGSL.into()),
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("voxel_gi.debug_cube"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<DebugCubeInstance>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &INSTANCE_ATTRIBUTES,
                    }],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: None,
                    ..Default::default()
                },
                depth_stencil: depth_format.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: colour_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
        })
        .await;
        if let Some(err) = err {
            return Err(VoxelGiError::Pipeline {
                pipeline: "voxel_gi.debug_cube".to_string(),
                message: err.to_string(),
            });
        }

        Ok(Self { pipeline, camera_layout })
    }

    /// Draws one cube per instance on top of the existing contents of `target`.
    /// `depth` must be given exactly when the renderer was built with a depth format.
    /// Each call gets its own camera uniform, so several draws may share an encoder.
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
        view_projection: Mat4,
        instances: &[DebugCubeInstance],
    ) {
        if instances.is_empty() {
            return;
        }
        let camera_buffer = uniform_buffer(device, "voxel_gi.debug_camera", &camera_uniform(view_projection));
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxel_gi.debug_bind_group"),
            layout: &self.camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });
        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("voxel_gi.debug_instances"),
            contents: bytemuck::cast_slice(instances),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("voxel_gi.debug_cube_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &camera_bind_group, &[]);
        pass.set_vertex_buffer(0, instance_buffer.slice(..));
        pass.draw(0..CUBE_VERTEX_COUNT, 0..instances.len() as u32);
        log::trace!("drew {} debug voxel cubes", instances.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::buffers::{map_buffer_u32, readback_buffer};
    use crate::gpu::GpuContext;
    use glam::Vec3;

    const TARGET_SIZE: u32 = 64;

    #[test]
    fn camera_uniform_is_column_major() {
        let uniform = camera_uniform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(uniform.view_projection[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(std::mem::size_of::<CameraUniform>(), 64);
    }

    // Skipped without an adapter.
    #[test]
    fn draws_in_one_encoder_keep_their_own_camera() {
        let context = match pollster::block_on(GpuContext::new()) {
            Ok(context) => context,
            Err(VoxelGiError::NoAdapter) => return,
            Err(err) => panic!("GPU setup failed: {err}"),
        };
        let device = context.device();
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let renderer = pollster::block_on(DebugCubeRenderer::new(device, format, None)).expect("renderer");

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("debug_draw_target"),
            size: wgpu::Extent3d {
                width: TARGET_SIZE,
                height: TARGET_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let cube = [DebugCubeInstance {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            colour: [1.0, 1.0, 1.0, 1.0],
        }];
        // Squash the unit cube into depth 0.25..0.75 and push it to one half of the target.
        let camera = |x: f32| Mat4::from_translation(Vec3::new(x, 0.0, 0.5)) * Mat4::from_scale(Vec3::new(1.0, 1.0, 0.5));

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        renderer.draw(device, &mut encoder, &view, None, camera(-0.5), &cube);
        renderer.draw(device, &mut encoder, &view, None, camera(0.5), &cube);

        let bytes_per_row = TARGET_SIZE * 4;
        let readback = readback_buffer(device, "debug_draw_readback", (bytes_per_row * TARGET_SIZE) as u64);
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(TARGET_SIZE),
                },
            },
            wgpu::Extent3d {
                width: TARGET_SIZE,
                height: TARGET_SIZE,
                depth_or_array_layers: 1,
            },
        );
        context.queue().submit(Some(encoder.finish()));

        let pixels = pollster::block_on(map_buffer_u32(&readback, device)).expect("readback");
        let at = |x: u32, y: u32| pixels[(y * TARGET_SIZE + x) as usize];
        let mid = TARGET_SIZE / 2;
        assert_ne!(at(TARGET_SIZE / 4, mid), 0, "left cube missing");
        assert_ne!(at(3 * TARGET_SIZE / 4, mid), 0, "right cube missing");
    }

    #[test]
    fn instance_layout_matches_struct() {
        assert_eq!(std::mem::size_of::<DebugCubeInstance>(), 80);
        let last = INSTANCE_ATTRIBUTES[4];
        assert_eq!(last.offset, 64);
        assert_eq!(last.shader_location, 4);
    }
}

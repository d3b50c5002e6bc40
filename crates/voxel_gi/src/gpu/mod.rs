//! GPU voxelization using wgpu.
//!
//! The populate pass is a render pass over an N×N viewport whose fragment
//! stage accumulates into storage buffers. Clear, resolve and downsample are
//! compute passes. The resolved chain is kept both as storage buffers (for
//! readback) and as mipmapped `rgba8unorm` 3D textures (for sampling).

use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::core::{FrameInputs, PopulateStats, RasterMode, SubMesh, VoxelGiConfig};
use crate::debug_view::{DebugCubeInstance, DebugDrawStats, DebugVoxelVisualizer};
use crate::error::{Result, VoxelGiError};
use crate::frustum::Frustum;
use crate::grid::GridSnapshot;
use crate::stage::{Stage, StageTracker};
use crate::transform::WorldToVoxelGridTransform;

mod buffers;
mod debug_draw;
mod mips;
mod pipelines;
mod populate;
mod resources;
mod shaders;

pub use debug_draw::DebugCubeRenderer;
pub use pipelines::VOXEL_TEXTURE_FORMAT;
pub use resources::{GpuVoxelGrid, LevelBuffers};

use buffers::{map_buffer_u32, readback_buffer};
use pipelines::{create_pipelines, GpuPipelines};
use populate::build_triangle_stream;

mod params {
    use bytemuck::{Pod, Zeroable};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct LevelParams {
        pub resolution: u32,
        pub source_resolution: u32,
        pub _pad0: [u32; 2],
    }

    impl LevelParams {
        pub fn new(resolution: u32, source_resolution: u32) -> Self {
            Self {
                resolution,
                source_resolution,
                _pad0: [0; 2],
            }
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct PopulateParams {
        pub resolution: u32,
        pub axis: u32,
        pub policy: u32,
        pub _pad0: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct CameraUniform {
        pub view_projection: [[f32; 4]; 4],
    }
}

/// Instance, adapter, device and queue shared with the host renderer.
pub struct GpuContext {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Requests a high-performance adapter and a device with its full limits.
    /// Conservative rasterization is enabled when the adapter offers it.
    /// Only the primary backends are considered; GL cannot run the populate pass.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                ..Default::default()
            })
            .await
            .ok_or(VoxelGiError::NoAdapter)?;

        let mut required_features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::CONSERVATIVE_RASTERIZATION) {
            required_features |= wgpu::Features::CONSERVATIVE_RASTERIZATION;
        }
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("voxel_gi.device"),
                    required_features,
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| VoxelGiError::DeviceRequest(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);
        Ok(Self::from_parts(instance, adapter, Arc::new(device), Arc::new(queue)))
    }

    /// Wraps a device the host renderer already owns.
    pub fn from_parts(
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
    ) -> Self {
        Self {
            instance,
            adapter,
            device,
            queue,
        }
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }
}

/// The GLSL backend cannot express the compare-exchange result the populate
/// fragment shader relies on.
fn ensure_supported_backend(backend: wgpu::Backend) -> Result<()> {
    match backend {
        wgpu::Backend::Gl => Err(VoxelGiError::UnsupportedAdapter(
            "the GL backend cannot compile atomic compare-exchange in fragment shaders".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Runs the clear / populate / mip passes against a [`GpuVoxelGrid`].
pub struct GpuVoxelizer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: VoxelGiConfig,
    transform: WorldToVoxelGridTransform,
    pipelines: GpuPipelines,
    grid: GpuVoxelGrid,
    stages: StageTracker,
}

impl GpuVoxelizer {
    pub async fn new(
        context: &GpuContext,
        config: VoxelGiConfig,
        transform: WorldToVoxelGridTransform,
    ) -> Result<Self> {
        config.validate()?;
        let device = Arc::clone(&context.device);
        let queue = Arc::clone(&context.queue);

        ensure_supported_backend(context.adapter.get_info().backend)?;
        let downlevel = context.adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::FRAGMENT_WRITABLE_STORAGE)
        {
            return Err(VoxelGiError::UnsupportedAdapter(
                "fragment shaders cannot write storage buffers".to_string(),
            ));
        }
        let limits = device.limits();
        if limits.max_storage_buffers_per_shader_stage < 4 || limits.max_storage_textures_per_shader_stage < 2 {
            return Err(VoxelGiError::UnsupportedAdapter(format!(
                "need 4 storage buffers and 2 storage textures per stage (have {} and {})",
                limits.max_storage_buffers_per_shader_stage, limits.max_storage_textures_per_shader_stage
            )));
        }

        let conservative = match config.raster_mode {
            RasterMode::Standard => false,
            RasterMode::Conservative => {
                let supported = device
                    .features()
                    .contains(wgpu::Features::CONSERVATIVE_RASTERIZATION);
                if !supported {
                    log::warn!("conservative rasterization unavailable, falling back to standard");
                }
                supported
            }
        };

        let pipelines = create_pipelines(&device, conservative).await?;
        let grid = GpuVoxelGrid::new(&device, &pipelines, &config).await?;
        log::info!(
            "GPU voxelizer ready: {}³ grid, {} mip levels, {:?} accumulation, conservative raster {}",
            config.resolution,
            grid.level_count(),
            config.accumulation,
            conservative
        );

        Ok(Self {
            device,
            queue,
            config,
            transform,
            pipelines,
            grid,
            stages: StageTracker::new(),
        })
    }

    pub fn config(&self) -> &VoxelGiConfig {
        &self.config
    }

    pub fn transform(&self) -> &WorldToVoxelGridTransform {
        &self.transform
    }

    pub fn grid(&self) -> &GpuVoxelGrid {
        &self.grid
    }

    pub fn stage(&self) -> Stage {
        self.stages.current()
    }

    pub fn frames_completed(&self) -> u64 {
        self.stages.frames_completed()
    }

    /// Whether the populate pass rasterizes conservatively on this device.
    pub fn is_conservative(&self) -> bool {
        self.pipelines.conservative
    }

    pub fn record_clear(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        self.stages.advance(Stage::Clearing)?;
        mips::record_clear_pass(encoder, &self.pipelines, &self.grid);
        Ok(())
    }

    /// Records the three dominant-axis draws. The triangle stream is built on
    /// the CPU and uploaded into a buffer that lives until the commands finish.
    pub fn record_populate(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        submeshes: &[SubMesh],
        frame: &FrameInputs,
    ) -> Result<PopulateStats> {
        self.stages.advance(Stage::Populating)?;
        for submesh in submeshes {
            submesh.validate()?;
        }

        let (vertices, stats) =
            build_triangle_stream(submeshes, frame, &self.transform, self.config.skip_alpha_masked);
        log::debug!(
            "populate: {} submeshes ({} skipped), {} triangles, {} vertices",
            stats.submeshes,
            stats.skipped_submeshes,
            stats.triangles,
            vertices.len()
        );
        if vertices.is_empty() {
            return Ok(stats);
        }

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("voxel_gi.populate_vertices"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let vertex_count = vertices.len() as u32;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("voxel_gi.populate_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: self.grid.raster_target(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Discard,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipelines.populate);
        pass.set_vertex_buffer(0, vertex_buffer.slice(..));
        for bind_group in &self.grid.populate_bind_groups {
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw(0..vertex_count, 0..1);
        }
        Ok(stats)
    }

    /// Resolves level 0 and, when mips are enabled, downsamples every coarser
    /// level. With mips disabled the chain has a single level.
    pub fn record_mips(&mut self, encoder: &mut wgpu::CommandEncoder) -> Result<()> {
        self.stages.advance(Stage::MipGenerating)?;
        mips::record_mip_passes(encoder, &self.pipelines, &self.grid);
        Ok(())
    }

    pub fn finish_frame(&mut self) -> Result<()> {
        self.stages.advance(Stage::Idle)
    }

    /// Records and submits a whole frame.
    pub fn voxelize_frame(&mut self, submeshes: &[SubMesh], frame: &FrameInputs) -> Result<PopulateStats> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("voxel_gi.frame"),
            });
        self.record_clear(&mut encoder)?;
        let stats = match self.record_populate(&mut encoder, submeshes, frame) {
            Ok(stats) => stats,
            Err(err) => {
                self.stages.reset();
                return Err(err);
            }
        };
        self.record_mips(&mut encoder)?;
        self.finish_frame()?;
        self.queue.submit(Some(encoder.finish()));
        Ok(stats)
    }

    /// Reads back the accumulation buffers (alpha = sample count).
    pub async fn read_accumulation(&self) -> Result<GridSnapshot> {
        self.read_channels(self.grid.accum_colour(), self.grid.accum_normal(), self.grid.resolution())
            .await
    }

    /// Reads back one resolved level (alpha = coverage).
    pub async fn read_level(&self, level: u32) -> Result<GridSnapshot> {
        let buffers = self.grid.level(level)?;
        self.read_channels(&buffers.colour, &buffers.normal, buffers.resolution)
            .await
    }

    /// Debug cubes for the resolved base level. Skips the readback entirely
    /// when the visualizer is disabled.
    pub async fn debug_instances(
        &self,
        visualizer: &DebugVoxelVisualizer,
        frustum: &Frustum,
    ) -> Result<(Vec<DebugCubeInstance>, DebugDrawStats)> {
        if !visualizer.is_enabled() {
            return Ok((Vec::new(), DebugDrawStats::default()));
        }
        let level = self.read_level(0).await?;
        Ok(visualizer.collect_instances(&level, &self.transform, frustum))
    }

    async fn read_channels(&self, colour: &wgpu::Buffer, normal: &wgpu::Buffer, resolution: u32) -> Result<GridSnapshot> {
        let bytes = (resolution as u64).pow(3) * 4;
        let colour_staging = readback_buffer(&self.device, "voxel_gi.readback_colour", bytes);
        let normal_staging = readback_buffer(&self.device, "voxel_gi.readback_normal", bytes);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("voxel_gi.readback"),
            });
        encoder.copy_buffer_to_buffer(colour, 0, &colour_staging, 0, bytes);
        encoder.copy_buffer_to_buffer(normal, 0, &normal_staging, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let colour = map_buffer_u32(&colour_staging, &self.device).await?;
        let normal = map_buffer_u32(&normal_staging, &self.device).await?;
        GridSnapshot::from_raw(resolution, colour, normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Aabb, Material, MeshVertex};
    use crate::packing;
    use glam::{UVec3, UVec4, Vec3, Vec4};

    fn layer_quad(z: f32) -> SubMesh {
        SubMesh {
            vertices: vec![
                MeshVertex::new(Vec3::new(-1.0, -1.0, z), Vec3::Z),
                MeshVertex::new(Vec3::new(1.0, -1.0, z), Vec3::Z),
                MeshVertex::new(Vec3::new(1.0, 1.0, z), Vec3::Z),
                MeshVertex::new(Vec3::new(-1.0, 1.0, z), Vec3::Z),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            material: Material {
                diffuse: Vec4::new(1.0, 0.0, 0.0, 1.0),
                alpha_mask: false,
            },
        }
    }

    /// Missing or unsupported adapters skip the test. Any other error fails it.
    fn skip_without_adapter<T>(result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(VoxelGiError::NoAdapter) | Err(VoxelGiError::UnsupportedAdapter(_)) => None,
            Err(err) => panic!("GPU setup failed: {err}"),
        }
    }

    #[test]
    fn gl_backend_is_rejected_up_front() {
        let err = ensure_supported_backend(wgpu::Backend::Gl).unwrap_err();
        assert!(matches!(err, VoxelGiError::UnsupportedAdapter(_)));
        assert!(ensure_supported_backend(wgpu::Backend::Vulkan).is_ok());
        assert!(ensure_supported_backend(wgpu::Backend::Metal).is_ok());
        assert!(ensure_supported_backend(wgpu::Backend::Dx12).is_ok());
    }

    #[test]
    fn setup_errors_other_than_adapter_support_are_not_skipped() {
        assert_eq!(skip_without_adapter(Ok(3)), Some(3));
        assert_eq!(skip_without_adapter::<u32>(Err(VoxelGiError::NoAdapter)), None);
        let pipeline_failure = std::panic::catch_unwind(|| {
            skip_without_adapter::<u32>(Err(VoxelGiError::Pipeline {
                pipeline: "voxel_gi.populate".to_string(),
                message: "shader translation failed".to_string(),
            }))
        });
        assert!(pipeline_failure.is_err());
    }

    // Needs a non-GL adapter with writable fragment storage; skipped without one.
    #[test]
    fn gpu_frame_fills_one_layer() {
        let Some(context) = skip_without_adapter(pollster::block_on(GpuContext::new())) else {
            return;
        };
        let config = VoxelGiConfig {
            resolution: 8,
            ..VoxelGiConfig::default()
        };
        let transform =
            WorldToVoxelGridTransform::from_aabb(Aabb::new(Vec3::NEG_ONE, Vec3::ONE)).expect("transform");
        let Some(mut voxelizer) =
            skip_without_adapter(pollster::block_on(GpuVoxelizer::new(&context, config, transform)))
        else {
            return;
        };

        voxelizer
            .voxelize_frame(&[layer_quad(0.1)], &FrameInputs::default())
            .expect("frame");
        assert_eq!(voxelizer.stage(), Stage::Idle);
        assert_eq!(voxelizer.frames_completed(), 1);

        let accumulated = pollster::block_on(voxelizer.read_accumulation()).expect("readback");
        assert_eq!(accumulated.occupied_count(), 64);
        let colour = packing::unpack_rgba8(accumulated.colour_at(UVec3::new(3, 5, 4)).expect("in range"));
        assert_eq!(colour, UVec4::new(255, 0, 0, 1));

        let base = pollster::block_on(voxelizer.read_level(0)).expect("level 0");
        assert_eq!(packing::unpack_rgba8(base.colour_at(UVec3::new(3, 5, 4)).expect("in range")).w, 255);
        let top = pollster::block_on(voxelizer.read_level(3)).expect("level 3");
        assert_eq!(top.resolution, 1);
        assert_eq!(top.occupied_count(), 1);
    }

    #[test]
    fn gpu_populate_requires_clear() {
        let Some(context) = skip_without_adapter(pollster::block_on(GpuContext::new())) else {
            return;
        };
        let config = VoxelGiConfig {
            resolution: 4,
            ..VoxelGiConfig::default()
        };
        let transform =
            WorldToVoxelGridTransform::from_aabb(Aabb::new(Vec3::NEG_ONE, Vec3::ONE)).expect("transform");
        let Some(mut voxelizer) =
            skip_without_adapter(pollster::block_on(GpuVoxelizer::new(&context, config, transform)))
        else {
            return;
        };
        let mut encoder = context
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        let err = voxelizer
            .record_populate(&mut encoder, &[], &FrameInputs::default())
            .unwrap_err();
        assert!(matches!(err, VoxelGiError::StageOrder { .. }));
    }
}

use wgpu::util::DeviceExt;

use crate::error::{Result, VoxelGiError};

pub(crate) async fn map_buffer_u32(buffer: &wgpu::Buffer, device: &wgpu::Device) -> Result<Vec<u32>> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .await
        .map_err(|_| VoxelGiError::BufferMap("map callback dropped".to_string()))?
        .map_err(|err| VoxelGiError::BufferMap(err.to_string()))?;
    let data = slice.get_mapped_range();
    let result = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    buffer.unmap();
    Ok(result)
}

pub(crate) fn storage_buffer(device: &wgpu::Device, label: &str, bytes: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub(crate) fn uniform_buffer<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub(crate) fn readback_buffer(device: &wgpu::Device, label: &str, bytes: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Runs `create` inside out-of-memory and validation error scopes and returns
/// whichever error was raised, out-of-memory first.
pub(crate) async fn capture_errors<T>(
    device: &wgpu::Device,
    create: impl FnOnce() -> T,
) -> (T, Option<wgpu::Error>) {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = device.pop_error_scope().await;
    let out_of_memory = device.pop_error_scope().await;
    (value, out_of_memory.or(validation))
}

/// Workgroup count per dimension for a `4x4x4` compute shader covering `resolution³` voxels.
pub(crate) fn workgroups_for(resolution: u32) -> u32 {
    resolution.div_ceil(4)
}

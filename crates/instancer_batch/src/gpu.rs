//! WGPU buffer backend.
//!
//! Merged geometry becomes static vertex/index buffers. The world-transform
//! array gets its own `COPY_DST` buffer that the render loop overwrites once
//! per frame.

use std::sync::Arc;

use instancer_core::Matrix3x4;
use wgpu::util::DeviceExt;

use crate::allocator::{BufferAllocator, BufferDesc, BufferKind};
use crate::error::BatchResult;

/// Allocates batch geometry on a wgpu device.
pub struct WgpuBufferAllocator {
    device: Arc<wgpu::Device>,
}

impl WgpuBufferAllocator {
    /// Creates an allocator for `device`.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self { device }
    }

    /// Creates the per-frame world-transform buffer for a batch.
    #[must_use]
    pub fn create_transform_buffer(&self, label: &str, num_world_transforms: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (num_world_transforms * Matrix3x4::SIZE) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }
}

impl BufferAllocator for WgpuBufferAllocator {
    type Buffer = wgpu::Buffer;

    fn create_buffer(&self, desc: &BufferDesc<'_>, contents: &[u8]) -> BatchResult<wgpu::Buffer> {
        let usage = match desc.kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        };
        Ok(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(desc.label),
            contents,
            usage,
        }))
    }

    fn release(&self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }
}

/// Uploads a frame's world transforms, as produced by
/// `Batch::get_world_transforms`.
pub fn upload_world_transforms(queue: &wgpu::Queue, buffer: &wgpu::Buffer, transforms: &[Matrix3x4]) {
    queue.write_buffer(buffer, 0, bytemuck::cast_slice(transforms));
}

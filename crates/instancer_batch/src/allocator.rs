//! Buffer allocation for merged geometry.
//!
//! Batches never talk to a graphics device directly. They hand finished
//! bytes to a [`BufferAllocator`] and keep whatever handle it returns until
//! they are dropped.

use parking_lot::Mutex;

use crate::error::{BatchError, BatchResult};

/// Binding a buffer is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex stream.
    Vertex,
    /// Index list.
    Index,
}

/// Description of a static, write-once buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Binding.
    pub kind: BufferKind,
    /// Bytes per element (vertex stride or index width).
    pub element_size: usize,
    /// Number of elements.
    pub element_count: usize,
}

impl BufferDesc<'_> {
    /// Total size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.element_size * self.element_count
    }
}

/// Creates and releases the static buffers a batch owns.
pub trait BufferAllocator {
    /// Handle to a created buffer.
    type Buffer;

    /// Creates a buffer initialized with `contents`.
    ///
    /// # Errors
    ///
    /// Returns `Allocation` if the buffer cannot be created.
    fn create_buffer(&self, desc: &BufferDesc<'_>, contents: &[u8]) -> BatchResult<Self::Buffer>;

    /// Releases a buffer created by this allocator.
    fn release(&self, buffer: Self::Buffer);
}

/// CPU-memory buffer created by [`HostBufferAllocator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostBuffer {
    label: String,
    kind: BufferKind,
    element_size: usize,
    data: Vec<u8>,
}

impl HostBuffer {
    /// Debug label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Binding.
    #[must_use]
    pub const fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Bytes per element.
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Number of elements.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.data.len() / self.element_size.max(1)
    }

    /// Buffer contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Live totals for a [`HostBufferAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Buffers currently alive.
    pub live_buffers: usize,
    /// Bytes currently alive.
    pub live_bytes: usize,
    /// Buffers ever created.
    pub total_allocations: usize,
    /// Buffers ever released.
    pub total_releases: usize,
}

/// Allocator that keeps buffers in CPU memory.
///
/// Used by tools, tests and software paths. Accounting is shared between all
/// batches using the allocator, so it sits behind a mutex.
#[derive(Debug, Default)]
pub struct HostBufferAllocator {
    stats: Mutex<AllocatorStats>,
    budget: Option<usize>,
}

impl HostBufferAllocator {
    /// Creates an unbounded allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator that refuses to hold more than `bytes` at once.
    #[must_use]
    pub fn with_budget(bytes: usize) -> Self {
        Self {
            stats: Mutex::new(AllocatorStats::default()),
            budget: Some(bytes),
        }
    }

    /// Returns a snapshot of the accounting.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        *self.stats.lock()
    }
}

impl BufferAllocator for HostBufferAllocator {
    type Buffer = HostBuffer;

    fn create_buffer(&self, desc: &BufferDesc<'_>, contents: &[u8]) -> BatchResult<HostBuffer> {
        if contents.len() != desc.size() {
            return Err(BatchError::Allocation(format!(
                "{}: {} bytes supplied for {} elements of {} bytes",
                desc.label,
                contents.len(),
                desc.element_count,
                desc.element_size
            )));
        }

        let mut stats = self.stats.lock();
        if let Some(budget) = self.budget {
            if stats.live_bytes + contents.len() > budget {
                return Err(BatchError::Allocation(format!(
                    "{}: {} bytes would exceed budget of {budget} ({} in use)",
                    desc.label,
                    contents.len(),
                    stats.live_bytes
                )));
            }
        }
        stats.live_buffers += 1;
        stats.live_bytes += contents.len();
        stats.total_allocations += 1;

        Ok(HostBuffer {
            label: desc.label.to_owned(),
            kind: desc.kind,
            element_size: desc.element_size,
            data: contents.to_vec(),
        })
    }

    fn release(&self, buffer: HostBuffer) {
        let mut stats = self.stats.lock();
        stats.live_buffers -= 1;
        stats.live_bytes -= buffer.data.len();
        stats.total_releases += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(count: usize) -> BufferDesc<'static> {
        BufferDesc {
            label: "test",
            kind: BufferKind::Vertex,
            element_size: 4,
            element_count: count,
        }
    }

    #[test]
    fn test_create_release_accounting() {
        let allocator = HostBufferAllocator::new();

        let buffer = allocator.create_buffer(&desc(2), &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(buffer.element_count(), 2);
        assert_eq!(buffer.as_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(allocator.stats().live_bytes, 8);

        allocator.release(buffer);
        let stats = allocator.stats();
        assert_eq!(stats.live_buffers, 0);
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.total_allocations, 1);
        assert_eq!(stats.total_releases, 1);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let allocator = HostBufferAllocator::new();
        assert!(matches!(
            allocator.create_buffer(&desc(3), &[0; 8]),
            Err(BatchError::Allocation(_))
        ));
        assert_eq!(allocator.stats().total_allocations, 0);
    }

    #[test]
    fn test_budget() {
        let allocator = HostBufferAllocator::with_budget(12);
        let first = allocator.create_buffer(&desc(2), &[0; 8]).unwrap();
        assert!(allocator.create_buffer(&desc(2), &[0; 8]).is_err());

        allocator.release(first);
        assert!(allocator.create_buffer(&desc(2), &[0; 8]).is_ok());
    }
}

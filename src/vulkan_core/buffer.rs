use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
pub use gpu_allocator::MemoryLocation;

use super::device::Device;
use super::{vk_try, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: usize,
    pub usage: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
}
impl BufferInfo {
    /// Storage buffer the host can map, placed in write-combined memory that
    /// prefers the device-local heap.
    pub fn unordered_access(size: usize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            memory_location: MemoryLocation::CpuToGpu,
        }
    }
}

pub struct Buffer {
    device: Arc<Device>,
    allocation: Option<Allocation>,
    buffer: vk::Buffer,
    info: BufferInfo,
}
impl Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("buffer", &self.buffer)
            .field("info", &self.info)
            .finish()
    }
}

impl Buffer {
    #[profiling::function]
    pub fn create(device: &Arc<Device>, info: BufferInfo) -> Result<Self> {
        let queue_family_indices = [device.queue_family_index];
        let buffer_info = vk::BufferCreateInfo::default()
            .size(info.size as _)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_family_indices);
        let buffer = unsafe { vk_try!(device.create_buffer(&buffer_info, None))? };

        // From here on `Drop` owns the cleanup of whatever has been created.
        let mut this = Self {
            device: device.clone(),
            allocation: None,
            buffer,
            info,
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location: info.memory_location,
            linear: true, // Buffers are always linear
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        unsafe {
            let bound = vk_try!(device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset()
            ));
            this.allocation = Some(allocation);
            bound?;
        }
        log::trace!("Created Buffer with id {buffer:?} and {info:?}.");

        Ok(this)
    }

    /// Host view of `range`, valid while the buffer lives.
    pub fn mapped_range(&self, range: Range<usize>) -> Result<&[u8]> {
        if range.start > range.end || range.end > self.info.size {
            return Err(Error::MapOutOfRange {
                range,
                size: self.info.size,
            });
        }
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or(Error::NotMappable)?;
        Ok(&mapped[range])
    }

    /// Reads `range` as consecutive `u32`s.
    pub fn read_u32(&self, range: Range<usize>) -> Result<Vec<u32>> {
        let bytes = self.mapped_range(range)?;
        let whole = bytes.len() - bytes.len() % std::mem::size_of::<u32>();
        Ok(bytemuck::pod_collect_to_vec(&bytes[..whole]))
    }

    pub fn size(&self) -> usize {
        self.info.size
    }
    pub fn vk(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.device.has_abandoned_work() {
            log::warn!("Leaking buffer {:?}, the device may still write to it", self.buffer);
            return;
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(err) = self.device.allocator().free(allocation) {
                log::error!("Could not free buffer memory: {err}");
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

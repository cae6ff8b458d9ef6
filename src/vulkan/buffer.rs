use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::{ComputeError, Result};
use crate::vulkan::allocator::{BufferIntent, BufferMemory};
use crate::vulkan::VulkanContext;

/// A storage buffer of `len` elements of `T` in host-visible memory.
///
/// Host access goes through [`GpuBuffer::map`], which needs `&mut self`, so a
/// mapping cannot outlive the borrow that produced it.
pub struct GpuBuffer<T: Pod> {
    ctx: Arc<VulkanContext>,
    pub buffer: vk::Buffer,
    memory: Option<BufferMemory>,
    len: usize,
    intent: BufferIntent,
    _marker: PhantomData<T>,
}

impl<T: Pod> std::fmt::Debug for GpuBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("buffer", &self.buffer)
            .field("len", &self.len)
            .field("byte_size", &self.byte_size())
            .field("intent", &self.intent)
            .finish()
    }
}

impl<T: Pod> GpuBuffer<T> {
    /// Creates a zero-filled buffer.
    pub fn new(ctx: Arc<VulkanContext>, len: usize, intent: BufferIntent) -> Result<Self> {
        let mut buffer = Self::create(ctx, len, intent)?;
        buffer.map()?.fill(0);
        Ok(buffer)
    }

    /// Creates a buffer holding a copy of `data`.
    pub fn from_slice(ctx: Arc<VulkanContext>, data: &[T], intent: BufferIntent) -> Result<Self> {
        let mut buffer = Self::create(ctx, data.len(), intent)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    fn create(ctx: Arc<VulkanContext>, len: usize, intent: BufferIntent) -> Result<Self> {
        if len == 0 {
            return Err(ComputeError::EmptyBuffer);
        }
        let size = (len * std::mem::size_of::<T>()) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { ctx.device.create_buffer(&buffer_info, None) }
            .map_err(ComputeError::vulkan("vkCreateBuffer"))?;

        let name = match intent {
            BufferIntent::Upload => "upload buffer",
            BufferIntent::Readback => "readback buffer",
        };
        let memory = match unsafe { ctx.allocator().allocate_and_bind(&ctx.device, buffer, intent, name) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { ctx.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        tracing::debug!(
            ?buffer,
            len,
            size,
            allocation = memory.size(),
            ?intent,
            "buffer created"
        );
        Ok(Self {
            ctx,
            buffer,
            memory: Some(memory),
            len,
            intent,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Requested size in bytes.
    pub fn byte_size(&self) -> vk::DeviceSize {
        (self.len * std::mem::size_of::<T>()) as vk::DeviceSize
    }

    /// Size of the backing allocation, which alignment may round up.
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.memory.as_ref().map_or(0, BufferMemory::size)
    }

    pub fn intent(&self) -> BufferIntent {
        self.intent
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.byte_size())
    }

    /// Maps the requested byte range for host access. Unmapped again when the
    /// returned guard is dropped.
    pub fn map(&mut self) -> Result<Mapping<'_>> {
        let byte_size = self.byte_size() as usize;
        let device = &self.ctx.device;

        match &mut self.memory {
            Some(BufferMemory::Dedicated { memory, .. }) => {
                let memory = *memory;
                let ptr = unsafe {
                    device.map_memory(memory, 0, byte_size as vk::DeviceSize, vk::MemoryMapFlags::empty())
                }
                .map_err(ComputeError::vulkan("vkMapMemory"))?;
                // Valid until vkUnmapMemory in `Mapping::drop`.
                let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), byte_size) };
                Ok(Mapping {
                    bytes,
                    unmap: Some((device, memory)),
                })
            }
            Some(BufferMemory::Pooled(allocation)) => {
                let bytes = allocation.mapped_slice_mut().ok_or(ComputeError::NotMappable)?;
                Ok(Mapping {
                    bytes: &mut bytes[..byte_size],
                    unmap: None,
                })
            }
            None => Err(ComputeError::NotMappable),
        }
    }

    /// Overwrites the whole buffer. `data` must have exactly [`Self::len`]
    /// elements.
    pub fn write(&mut self, data: &[T]) -> Result<()> {
        if data.len() != self.len {
            return Err(ComputeError::LengthMismatch {
                expected: self.len,
                actual: data.len(),
            });
        }
        self.map()?.copy_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }

    /// Copies the buffer out. Only meaningful once the device is done with it.
    pub fn read_back(&mut self) -> Result<Vec<T>> {
        let mut out = vec![T::zeroed(); self.len];
        let mapping = self.map()?;
        bytemuck::cast_slice_mut(&mut out).copy_from_slice(&mapping);
        Ok(out)
    }
}

impl<T: Pod> Drop for GpuBuffer<T> {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_buffer(self.buffer, None);
            if let Some(memory) = self.memory.take() {
                self.ctx.allocator().free(&self.ctx.device, memory);
            }
        }
        tracing::trace!(buffer = ?self.buffer, "buffer destroyed");
    }
}

/// Host view of a buffer's bytes.
pub struct Mapping<'a> {
    bytes: &'a mut [u8],
    unmap: Option<(&'a ash::Device, vk::DeviceMemory)>,
}

impl Deref for Mapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl DerefMut for Mapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        // Pooled memory stays persistently mapped.
        if let Some((device, memory)) = self.unmap.take() {
            unsafe { device.unmap_memory(memory) };
        }
    }
}

//! Device memory for buffers.
//!
//! [`ResourceAllocator`] hides who picks the memory type and owns the
//! `VkDeviceMemory`:
//!
//! - `Manual`: one `vkAllocateMemory` per buffer, memory type chosen from the
//!   [`CapabilitySnapshot`] with `HOST_VISIBLE | HOST_COHERENT`, mapped on demand.
//! - `Pooled`: buffers are sub-allocated from large blocks by `gpu-allocator`,
//!   which keeps host-visible blocks persistently mapped.
//!
//! Both keep the same counters so a statistics dump looks alike either way.

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config::AllocationStrategy;
use crate::error::{ComputeError, Result};
use crate::vulkan::capability::CapabilitySnapshot;

/// Properties the manual strategy asks for: host writes land on the device
/// without an explicit flush.
pub const HOST_SHARED: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Which direction host traffic flows for a buffer. Only the pooled
/// strategy uses it to pick a memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferIntent {
    /// Host writes, device reads.
    Upload,
    /// Device writes, host reads.
    Readback,
}

impl BufferIntent {
    fn location(self) -> MemoryLocation {
        match self {
            BufferIntent::Upload => MemoryLocation::CpuToGpu,
            BufferIntent::Readback => MemoryLocation::GpuToCpu,
        }
    }
}

/// Memory backing one buffer.
#[derive(Debug)]
pub enum BufferMemory {
    Dedicated {
        memory: vk::DeviceMemory,
        memory_type: u32,
        size: vk::DeviceSize,
    },
    Pooled(Allocation),
}

impl BufferMemory {
    pub fn size(&self) -> vk::DeviceSize {
        match self {
            BufferMemory::Dedicated { size, .. } => *size,
            BufferMemory::Pooled(allocation) => allocation.size(),
        }
    }
}

enum Backend {
    Manual(CapabilitySnapshot),
    Pooled(Mutex<Allocator>),
}

#[derive(Default)]
struct Counters {
    live: AtomicU64,
    total: AtomicU64,
    bytes: AtomicU64,
}

pub struct ResourceAllocator {
    backend: Backend,
    counters: Counters,
}

impl ResourceAllocator {
    pub fn new(
        strategy: AllocationStrategy,
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
        capabilities: &CapabilitySnapshot,
    ) -> Result<Self> {
        let backend = match strategy {
            AllocationStrategy::Manual => Backend::Manual(capabilities.clone()),
            AllocationStrategy::Pooled => {
                let allocator = Allocator::new(&AllocatorCreateDesc {
                    instance: instance.clone(),
                    device: device.clone(),
                    physical_device,
                    debug_settings: Default::default(),
                    buffer_device_address: false,
                    allocation_sizes: Default::default(),
                })?;
                Backend::Pooled(Mutex::new(allocator))
            }
        };
        Ok(Self {
            backend,
            counters: Counters::default(),
        })
    }

    pub fn strategy(&self) -> AllocationStrategy {
        match self.backend {
            Backend::Manual(_) => AllocationStrategy::Manual,
            Backend::Pooled(_) => AllocationStrategy::Pooled,
        }
    }

    fn pool(allocator: &Mutex<Allocator>) -> MutexGuard<'_, Allocator> {
        allocator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Finds memory for `buffer` and binds it.
    ///
    /// # Safety
    /// `buffer` must be an unbound buffer created on `device`.
    pub unsafe fn allocate_and_bind(
        &self,
        device: &ash::Device,
        buffer: vk::Buffer,
        intent: BufferIntent,
        name: &str,
    ) -> Result<BufferMemory> {
        // May be larger than the buffer because of alignment.
        let requirements = device.get_buffer_memory_requirements(buffer);

        let memory = match &self.backend {
            Backend::Manual(capabilities) => {
                let memory_type =
                    capabilities.find_memory_type_index(requirements.memory_type_bits, HOST_SHARED)?;
                let alloc_info = vk::MemoryAllocateInfo::default()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type);
                let memory = device
                    .allocate_memory(&alloc_info, None)
                    .map_err(ComputeError::vulkan("vkAllocateMemory"))?;

                if let Err(result) = device.bind_buffer_memory(buffer, memory, 0) {
                    device.free_memory(memory, None);
                    return Err(ComputeError::vulkan("vkBindBufferMemory")(result));
                }
                tracing::debug!(
                    name,
                    memory_type,
                    heap_size = capabilities.heap_for_memory_type(memory_type).map_or(0, |h| h.size),
                    size = requirements.size,
                    "dedicated allocation"
                );
                BufferMemory::Dedicated {
                    memory,
                    memory_type,
                    size: requirements.size,
                }
            }
            Backend::Pooled(allocator) => {
                let allocation = Self::pool(allocator).allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: intent.location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })?;

                if let Err(result) =
                    device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                {
                    let _ = Self::pool(allocator).free(allocation);
                    return Err(ComputeError::vulkan("vkBindBufferMemory")(result));
                }
                tracing::debug!(
                    name,
                    offset = allocation.offset(),
                    size = allocation.size(),
                    "sub-allocation"
                );
                BufferMemory::Pooled(allocation)
            }
        };

        self.counters.live.fetch_add(1, Ordering::Relaxed);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(memory.size(), Ordering::Relaxed);
        Ok(memory)
    }

    /// Releases memory obtained from [`Self::allocate_and_bind`].
    ///
    /// # Safety
    /// The buffer bound to `memory` must already be destroyed and no pending
    /// device work may reference it.
    pub unsafe fn free(&self, device: &ash::Device, memory: BufferMemory) {
        let size = memory.size();
        match (memory, &self.backend) {
            (BufferMemory::Dedicated { memory, .. }, _) => device.free_memory(memory, None),
            (BufferMemory::Pooled(allocation), Backend::Pooled(allocator)) => {
                if let Err(e) = Self::pool(allocator).free(allocation) {
                    tracing::warn!("failed to return sub-allocation: {e}");
                }
            }
            (BufferMemory::Pooled(_), Backend::Manual(_)) => {
                tracing::error!("pooled allocation handed to the manual allocator");
            }
        }
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
        self.counters.bytes.fetch_sub(size, Ordering::Relaxed);
    }

    pub fn stats(&self) -> AllocatorStats {
        let live_allocations = self.counters.live.load(Ordering::Relaxed);
        let total_allocations = self.counters.total.load(Ordering::Relaxed);
        let allocated_bytes = self.counters.bytes.load(Ordering::Relaxed);

        match &self.backend {
            Backend::Manual(_) => AllocatorStats {
                strategy: AllocationStrategy::Manual,
                live_allocations,
                total_allocations,
                allocated_bytes,
                reserved_bytes: allocated_bytes,
                blocks: Vec::new(),
            },
            Backend::Pooled(allocator) => {
                let report = Self::pool(allocator).generate_report();
                let blocks = report
                    .blocks
                    .iter()
                    .map(|block| BlockStats {
                        size: block.size,
                        allocations: report.allocations[block.allocations.clone()]
                            .iter()
                            .map(|a| AllocationStats {
                                name: a.name.clone(),
                                offset: a.offset,
                                size: a.size,
                            })
                            .collect(),
                    })
                    .collect();
                AllocatorStats {
                    strategy: AllocationStrategy::Pooled,
                    live_allocations,
                    total_allocations,
                    allocated_bytes: report.total_allocated_bytes,
                    reserved_bytes: report.total_reserved_bytes,
                    blocks,
                }
            }
        }
    }

    /// Writes [`Self::stats`] as pretty JSON. Diagnostic only.
    pub fn write_stats(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.stats())?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "allocator statistics written");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocatorStats {
    pub strategy: AllocationStrategy,
    pub live_allocations: u64,
    pub total_allocations: u64,
    pub allocated_bytes: u64,
    /// Device memory held, including pooled blocks' unused space.
    pub reserved_bytes: u64,
    pub blocks: Vec<BlockStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockStats {
    pub size: u64,
    pub allocations: Vec<AllocationStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationStats {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

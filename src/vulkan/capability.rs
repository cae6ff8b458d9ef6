//! Device capability snapshot and the two lookups everything else hangs off:
//! which memory type backs a buffer, and which queue family runs compute.
//!
//! The snapshot is plain data. It is queried once from the physical device
//! and never changes for the life of the logical device, which also lets the
//! lookups be exercised without a GPU.

use ash::vk;
use serde::Serialize;

use crate::error::{Result, UnsupportedError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeInfo {
    pub flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapInfo {
    pub size: vk::DeviceSize,
    pub flags: vk::MemoryHeapFlags,
}

/// Compute-related device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComputeLimits {
    pub max_work_group_count: [u32; 3],
    pub max_work_group_size: [u32; 3],
    pub max_work_group_invocations: u32,
    pub max_shared_memory_size: u32,
}

impl Default for ComputeLimits {
    /// The minimums every conforming Vulkan implementation guarantees.
    fn default() -> Self {
        Self {
            max_work_group_count: [65_535; 3],
            max_work_group_size: [128, 128, 64],
            max_work_group_invocations: 128,
            max_shared_memory_size: 16_384,
        }
    }
}

impl From<&vk::PhysicalDeviceLimits> for ComputeLimits {
    fn from(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            max_work_group_count: limits.max_compute_work_group_count,
            max_work_group_size: limits.max_compute_work_group_size,
            max_work_group_invocations: limits.max_compute_work_group_invocations,
            max_shared_memory_size: limits.max_compute_shared_memory_size,
        }
    }
}

/// Read-only view of what a physical device offers.
#[derive(Debug, Clone)]
pub struct CapabilitySnapshot {
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub memory_types: Vec<MemoryTypeInfo>,
    pub memory_heaps: Vec<MemoryHeapInfo>,
    pub limits: ComputeLimits,
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            device_type: vk::PhysicalDeviceType::OTHER,
            api_version: 0,
            queue_families: Vec::new(),
            memory_types: Vec::new(),
            memory_heaps: Vec::new(),
            limits: ComputeLimits::default(),
        }
    }
}

impl CapabilitySnapshot {
    /// Snapshots `physical_device`.
    ///
    /// # Safety
    /// `physical_device` must have been enumerated from `instance`.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let props = instance.get_physical_device_properties(physical_device);
        let device_name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed device>".to_string());

        let queue_families = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .map(|qf| QueueFamilyInfo {
                flags: qf.queue_flags,
                queue_count: qf.queue_count,
            })
            .collect();

        let mem = instance.get_physical_device_memory_properties(physical_device);
        let memory_types = mem.memory_types[..mem.memory_type_count as usize]
            .iter()
            .map(|ty| MemoryTypeInfo {
                flags: ty.property_flags,
                heap_index: ty.heap_index,
            })
            .collect();
        let memory_heaps = mem.memory_heaps[..mem.memory_heap_count as usize]
            .iter()
            .map(|heap| MemoryHeapInfo {
                size: heap.size,
                flags: heap.flags,
            })
            .collect();

        Self {
            device_name,
            device_type: props.device_type,
            api_version: props.api_version,
            queue_families,
            memory_types,
            memory_heaps,
            limits: ComputeLimits::from(&props.limits),
        }
    }

    /// Lowest memory type index allowed by `type_bits` whose properties are a
    /// superset of `required`.
    pub fn find_memory_type_index(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        self.memory_types
            .iter()
            .enumerate()
            .take(32)
            .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.flags.contains(required))
            .map(|(i, _)| i as u32)
            .ok_or_else(|| UnsupportedError::MemoryType { type_bits, required }.into())
    }

    /// Lowest queue family index whose operation bits are a superset of
    /// `required`.
    pub fn find_queue_family(&self, required: vk::QueueFlags) -> Result<u32> {
        self.queue_families
            .iter()
            .position(|qf| qf.flags.contains(required))
            .map(|i| i as u32)
            .ok_or_else(|| UnsupportedError::QueueFamily { required }.into())
    }

    pub fn heap_for_memory_type(&self, index: u32) -> Option<&MemoryHeapInfo> {
        let ty = self.memory_types.get(index as usize)?;
        self.memory_heaps.get(ty.heap_index as usize)
    }

    pub fn report(&self) -> DeviceReport {
        DeviceReport {
            device_name: self.device_name.clone(),
            device_type: format!("{:?}", self.device_type),
            api_version: format!(
                "{}.{}.{}",
                vk::api_version_major(self.api_version),
                vk::api_version_minor(self.api_version),
                vk::api_version_patch(self.api_version)
            ),
            queue_families: self
                .queue_families
                .iter()
                .map(|qf| QueueFamilyReport {
                    flags: format!("{:?}", qf.flags),
                    queue_count: qf.queue_count,
                })
                .collect(),
            memory_types: self
                .memory_types
                .iter()
                .map(|ty| MemoryTypeReport {
                    flags: format!("{:?}", ty.flags),
                    heap_index: ty.heap_index,
                    heap_size: self
                        .memory_heaps
                        .get(ty.heap_index as usize)
                        .map_or(0, |h| h.size),
                })
                .collect(),
            limits: self.limits,
        }
    }
}

/// Serialisable summary of a [`CapabilitySnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device_name: String,
    pub device_type: String,
    pub api_version: String,
    pub queue_families: Vec<QueueFamilyReport>,
    pub memory_types: Vec<MemoryTypeReport>,
    pub limits: ComputeLimits,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueFamilyReport {
    pub flags: String,
    pub queue_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryTypeReport {
    pub flags: String,
    pub heap_index: u32,
    pub heap_size: u64,
}

//! Descriptor pools and sets.
//!
//! The pool's capacity is tracked on the host as well, so running out is
//! reported the same way on every driver instead of depending on whether the
//! implementation over-allocates internally.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use crate::error::{ComputeError, Result};
use crate::vulkan::buffer::GpuBuffer;
use crate::vulkan::pipeline::{BindingSpec, PipelineBundle};
use crate::vulkan::VulkanContext;

/// Host-side account of what a pool was created with and what is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBudget {
    capacity: u32,
    max_sets: u32,
    used: u32,
    sets: u32,
}

impl DescriptorBudget {
    pub fn new(capacity: u32, max_sets: u32) -> Self {
        Self {
            capacity,
            max_sets,
            used: 0,
            sets: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.used
    }

    pub fn sets_allocated(&self) -> u32 {
        self.sets
    }

    /// Claims `descriptors` for one more set. Leaves the budget untouched on
    /// failure.
    pub fn reserve(&mut self, descriptors: u32) -> Result<()> {
        let total = self
            .used
            .checked_add(descriptors)
            .filter(|&total| total <= self.capacity);
        match total {
            Some(total) if self.sets < self.max_sets => {
                self.used = total;
                self.sets += 1;
                Ok(())
            }
            _ => Err(ComputeError::DescriptorPoolExhausted {
                requested: descriptors,
                available: self.remaining(),
                set: self.sets,
            }),
        }
    }

    /// Gives back a reservation the driver then refused.
    fn release(&mut self, descriptors: u32) {
        self.used -= descriptors;
        self.sets -= 1;
    }
}

/// Which binding elements of a set have been pointed at a buffer.
#[derive(Debug, Clone)]
pub struct BindingTable {
    specs: Vec<BindingSpec>,
    written: Vec<Vec<bool>>,
}

impl BindingTable {
    pub fn new(specs: &[BindingSpec]) -> Self {
        Self {
            specs: specs.to_vec(),
            written: specs.iter().map(|s| vec![false; s.count as usize]).collect(),
        }
    }

    /// Looks up the declared binding for `binding[element]`.
    pub fn spec(&self, binding: u32, element: u32) -> Result<&BindingSpec> {
        self.specs
            .iter()
            .find(|s| s.binding == binding && element < s.count)
            .ok_or(ComputeError::UndeclaredBinding { binding, element })
    }

    pub fn mark_written(&mut self, binding: u32, element: u32) -> Result<()> {
        let index = self
            .specs
            .iter()
            .position(|s| s.binding == binding && element < s.count)
            .ok_or(ComputeError::UndeclaredBinding { binding, element })?;
        self.written[index][element as usize] = true;
        Ok(())
    }

    /// The first element that was never written, in declaration order.
    pub fn first_missing(&self) -> Option<(u32, u32)> {
        self.specs.iter().zip(&self.written).find_map(|(spec, written)| {
            written
                .iter()
                .position(|w| !w)
                .map(|element| (spec.binding, element as u32))
        })
    }
}

struct PoolHandle {
    ctx: Arc<VulkanContext>,
    pool: vk::DescriptorPool,
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        // Frees every set allocated from it as well.
        unsafe { self.ctx.device.destroy_descriptor_pool(self.pool, None) };
        tracing::trace!(pool = ?self.pool, "descriptor pool destroyed");
    }
}

pub struct DescriptorPool {
    handle: Arc<PoolHandle>,
    budget: DescriptorBudget,
}

impl DescriptorPool {
    /// A pool holding `descriptor_count` storage-buffer descriptors spread
    /// over at most `max_sets` sets.
    pub fn new(ctx: Arc<VulkanContext>, descriptor_count: u32, max_sets: u32) -> Result<Self> {
        if descriptor_count == 0 || max_sets == 0 {
            return Err(ComputeError::InvalidLayout(
                "descriptor pool needs at least one descriptor and one set".into(),
            ));
        }
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(descriptor_count)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);
        let pool = unsafe { ctx.device.create_descriptor_pool(&pool_info, None) }
            .map_err(ComputeError::vulkan("vkCreateDescriptorPool"))?;

        tracing::debug!(descriptor_count, max_sets, "descriptor pool created");
        Ok(Self {
            handle: Arc::new(PoolHandle { ctx, pool }),
            budget: DescriptorBudget::new(descriptor_count, max_sets),
        })
    }

    pub fn budget(&self) -> &DescriptorBudget {
        &self.budget
    }

    /// Allocates one set with `bundle`'s layout. Its bindings still have to
    /// be written.
    pub fn allocate(&mut self, bundle: &PipelineBundle) -> Result<DescriptorSet> {
        let requested = bundle.descriptor_count();
        let set_index = self.budget.sets_allocated();
        self.budget.reserve(requested)?;

        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle.pool)
            .set_layouts(std::slice::from_ref(&bundle.set_layout));
        let sets = match unsafe { self.handle.ctx.device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets,
            Err(result) => {
                self.budget.release(requested);
                return Err(match result {
                    vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                        ComputeError::DescriptorPoolExhausted {
                            requested,
                            available: self.budget.remaining(),
                            set: set_index,
                        }
                    }
                    other => ComputeError::vulkan("vkAllocateDescriptorSets")(other),
                });
            }
        };
        let set = sets
            .first()
            .copied()
            .ok_or(ComputeError::vulkan("vkAllocateDescriptorSets")(vk::Result::INCOMPLETE))?;

        tracing::debug!(set = set_index, descriptors = requested, "descriptor set allocated");
        Ok(DescriptorSet {
            pool: self.handle.clone(),
            set,
            table: BindingTable::new(bundle.bindings()),
        })
    }
}

/// A set whose bindings point at concrete buffers.
pub struct DescriptorSet {
    pool: Arc<PoolHandle>,
    pub set: vk::DescriptorSet,
    table: BindingTable,
}

impl DescriptorSet {
    /// Points `binding` (element 0) at the whole of `buffer`.
    pub fn write<T: Pod>(&mut self, binding: u32, buffer: &GpuBuffer<T>) -> Result<()> {
        self.write_range(binding, 0, buffer, 0, buffer.byte_size())
    }

    /// Points `binding[element]` at `range` bytes of `buffer` from `offset`.
    /// Writing the same slot again simply replaces it.
    pub fn write_range<T: Pod>(
        &mut self,
        binding: u32,
        element: u32,
        buffer: &GpuBuffer<T>,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) -> Result<()> {
        let descriptor_type = self.table.spec(binding, element)?.kind.descriptor_type();

        let size = buffer.byte_size();
        let end = offset.saturating_add(range);
        if range == 0 || end > size {
            return Err(ComputeError::RangeOutOfBounds { offset, end, size });
        }

        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer.buffer)
            .offset(offset)
            .range(range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(element)
            .descriptor_type(descriptor_type)
            .buffer_info(&buffer_info);
        unsafe { self.pool.ctx.device.update_descriptor_sets(&[write], &[]) };

        self.table.mark_written(binding, element)?;
        tracing::debug!(binding, element, offset, range, "descriptor written");
        Ok(())
    }

    /// Fails with the first binding element that was never written.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.table.first_missing() {
            Some((binding, element)) => Err(ComputeError::IncompleteDescriptorSet { binding, element }),
            None => Ok(()),
        }
    }
}

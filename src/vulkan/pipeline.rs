use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use crate::error::{ComputeError, Result};
use crate::vulkan::shader::ShaderBinary;
use crate::vulkan::VulkanContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    StorageBuffer,
}

impl ResourceKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            ResourceKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

/// One entry of the descriptor-set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    pub binding: u32,
    pub kind: ResourceKind,
    /// Array arity; 1 for a plain buffer binding.
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl BindingSpec {
    pub fn storage(binding: u32) -> Self {
        Self::storage_array(binding, 1)
    }

    pub fn storage_array(binding: u32, count: u32) -> Self {
        Self {
            binding,
            kind: ResourceKind::StorageBuffer,
            count,
            stages: vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Bindings `0..n`, one buffer each.
    pub fn sequential(n: u32) -> Vec<Self> {
        (0..n).map(Self::storage).collect()
    }

    fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.kind.descriptor_type())
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// Rejects layouts the driver would either refuse or accept with surprising
/// results: no bindings, repeated indices, zero arity, or bindings the
/// compute stage cannot see.
pub fn validate_bindings(specs: &[BindingSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(ComputeError::InvalidLayout("no bindings declared".into()));
    }
    for (i, spec) in specs.iter().enumerate() {
        if spec.count == 0 {
            return Err(ComputeError::InvalidLayout(format!(
                "binding {} has zero descriptors",
                spec.binding
            )));
        }
        if !spec.stages.contains(vk::ShaderStageFlags::COMPUTE) {
            return Err(ComputeError::InvalidLayout(format!(
                "binding {} is not visible to the compute stage",
                spec.binding
            )));
        }
        if specs[..i].iter().any(|other| other.binding == spec.binding) {
            return Err(ComputeError::InvalidLayout(format!(
                "binding {} declared twice",
                spec.binding
            )));
        }
    }
    Ok(())
}

/// Set layout, pipeline layout and compute pipeline for one shader entry
/// point. Immutable once built.
pub struct PipelineBundle {
    ctx: Arc<VulkanContext>,
    pub set_layout: vk::DescriptorSetLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    bindings: Vec<BindingSpec>,
    entry_point: String,
    local_size: [u32; 3],
}

impl std::fmt::Debug for PipelineBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBundle")
            .field("pipeline", &self.pipeline)
            .field("entry_point", &self.entry_point)
            .field("local_size", &self.local_size)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl PipelineBundle {
    pub fn build(
        ctx: Arc<VulkanContext>,
        shader: &ShaderBinary,
        specs: &[BindingSpec],
        entry: &str,
    ) -> Result<Self> {
        validate_bindings(specs)?;
        let entry_point = shader.entry_point(entry)?;
        let entry_name =
            CString::new(entry).map_err(|_| ComputeError::MissingEntryPoint(entry.to_string()))?;

        // Handles start out null; Drop skips whatever was never created.
        let mut bundle = Self {
            ctx: ctx.clone(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            bindings: specs.to_vec(),
            entry_point: entry.to_string(),
            local_size: entry_point.local_size,
        };
        let device = &ctx.device;

        let layout_bindings: Vec<_> = specs.iter().map(BindingSpec::layout_binding).collect();
        bundle.set_layout = unsafe {
            device.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings),
                None,
            )
        }
        .map_err(ComputeError::vulkan("vkCreateDescriptorSetLayout"))?;

        bundle.pipeline_layout = unsafe {
            device.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::default()
                    .set_layouts(std::slice::from_ref(&bundle.set_layout)),
                None,
            )
        }
        .map_err(ComputeError::vulkan("vkCreatePipelineLayout"))?;

        let module = unsafe {
            device.create_shader_module(
                &vk::ShaderModuleCreateInfo::default().code(shader.words()),
                None,
            )
        }
        .map_err(ComputeError::vulkan("vkCreateShaderModule"))?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_name);
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(bundle.pipeline_layout);

        let created = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        // Only needed while the pipeline is being compiled.
        unsafe { device.destroy_shader_module(module, None) };

        bundle.pipeline = created
            .map_err(|(_, result)| ComputeError::vulkan("vkCreateComputePipelines")(result))?[0];

        tracing::info!(
            entry,
            local_size = ?bundle.local_size,
            bindings = specs.len(),
            "compute pipeline built"
        );
        Ok(bundle)
    }

    pub fn bindings(&self) -> &[BindingSpec] {
        &self.bindings
    }

    /// Sum of arities over every binding: what one set of this layout costs.
    pub fn descriptor_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.count).sum()
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn local_size(&self) -> [u32; 3] {
        self.local_size
    }
}

impl Drop for PipelineBundle {
    fn drop(&mut self) {
        unsafe {
            let device = &self.ctx.device;
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.pipeline_layout, None);
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.set_layout, None);
            }
        }
        tracing::trace!(entry = %self.entry_point, "pipeline destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_sequential_bindings() {
        let specs = BindingSpec::sequential(3);
        assert_eq!(specs.iter().map(|s| s.binding).collect::<Vec<_>>(), [0, 1, 2]);
        assert!(specs.iter().all(|s| s.count == 1 && s.kind == ResourceKind::StorageBuffer));
        assert!(validate_bindings(&specs).is_ok());
    }

    #[test]
    fn test_array_binding_is_valid() {
        assert!(validate_bindings(&[BindingSpec::storage_array(0, 3)]).is_ok());
    }

    #[test]
    fn test_duplicate_binding_rejected() {
        let err = validate_bindings(&[BindingSpec::storage(1), BindingSpec::storage(1)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_zero_arity_rejected() {
        assert!(validate_bindings(&[BindingSpec::storage_array(0, 0)]).is_err());
    }

    #[test]
    fn test_invisible_binding_rejected() {
        let mut spec = BindingSpec::storage(0);
        spec.stages = vk::ShaderStageFlags::FRAGMENT;
        assert!(validate_bindings(&[spec]).is_err());
    }

    #[test]
    fn test_empty_layout_rejected() {
        assert!(validate_bindings(&[]).is_err());
    }
}

//! One pass through the whole lifecycle: upload, bind, dispatch, wait, read
//! back, tear down.

use bytemuck::Pod;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ComputeConfig;
use crate::error::{ComputeError, Result};
use crate::vulkan::{
    BindingSpec, BufferIntent, DescriptorPool, DispatchExecutor, GpuBuffer, PipelineBundle,
    ShaderBinary, VulkanContext, WorkgroupCount,
};

/// What a finished job read back.
#[derive(Debug, Clone)]
pub struct JobOutput<T> {
    /// Every buffer in binding order; the output buffer is last.
    pub buffers: Vec<Vec<T>>,
    pub groups: WorkgroupCount,
    /// Submit to completion, as seen by the host.
    pub elapsed: Duration,
}

impl<T> JobOutput<T> {
    pub fn output(&self) -> &[T] {
        self.buffers.last().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn inputs(&self) -> &[Vec<T>] {
        self.buffers.split_last().map(|(_, inputs)| inputs).unwrap_or_default()
    }
}

/// A shader plus the settings to run it with. Input buffers are bound to
/// `0..n` and the output buffer to `n`.
pub struct ComputeJob {
    ctx: Arc<VulkanContext>,
    shader: ShaderBinary,
    config: ComputeConfig,
}

impl ComputeJob {
    pub fn new(ctx: Arc<VulkanContext>, shader: ShaderBinary, config: ComputeConfig) -> Result<Self> {
        shader.entry_point(&config.entry_point)?;
        Ok(Self { ctx, shader, config })
    }

    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.ctx
    }

    /// Runs the shader once over `output_len` elements. Every input must hold
    /// exactly `output_len` elements.
    pub fn run<T: Pod>(&self, inputs: &[&[T]], output_len: usize) -> Result<JobOutput<T>> {
        if let Some(bad) = inputs.iter().find(|input| input.len() != output_len) {
            return Err(ComputeError::LengthMismatch {
                expected: output_len,
                actual: bad.len(),
            });
        }
        let ctx = &self.ctx;

        // Declared in creation order; dropped in reverse on every exit path.
        let mut buffers = inputs
            .iter()
            .map(|data| GpuBuffer::from_slice(ctx.clone(), data, BufferIntent::Upload))
            .collect::<Result<Vec<_>>>()?;
        buffers.push(GpuBuffer::new(ctx.clone(), output_len, BufferIntent::Readback)?);
        let binding_count = buffers.len() as u32;

        let bundle = PipelineBundle::build(
            ctx.clone(),
            &self.shader,
            &BindingSpec::sequential(binding_count),
            &self.config.entry_point,
        )?;

        let mut pool = DescriptorPool::new(ctx.clone(), binding_count, 1)?;
        let mut set = pool.allocate(&bundle)?;
        for (binding, buffer) in buffers.iter().enumerate() {
            set.write(binding as u32, buffer)?;
        }

        let groups = WorkgroupCount::covering(
            output_len as u64,
            bundle.local_size()[0],
            &ctx.capabilities.limits,
        )?;

        let executor = DispatchExecutor::new(ctx.clone())?;
        let elapsed = {
            let mut submission = executor.record(&bundle, &set, groups)?;
            submission.submit(self.config.wait)?;
            submission.wait(self.config.timeout)?
        };

        let read = buffers
            .iter_mut()
            .map(GpuBuffer::read_back)
            .collect::<Result<Vec<_>>>()?;

        if let Some(path) = &self.config.stats_path {
            ctx.allocator().write_stats(path)?;
        }

        Ok(JobOutput {
            buffers: read,
            groups,
            elapsed,
        })
    }
}

use ash::vk;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{timeout_nanos, WaitMode};
use crate::error::{ComputeError, Result, UnsupportedError};
use crate::vulkan::capability::ComputeLimits;
use crate::vulkan::descriptor::DescriptorSet;
use crate::vulkan::pipeline::PipelineBundle;
use crate::vulkan::VulkanContext;

/// Where a [`Submission`] is in its single pass from recording to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionState {
    Initial,
    Recording,
    Recorded,
    Submitted,
    Completed,
}

impl SubmissionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Recording => "recording",
            Self::Recorded => "recorded",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
        }
    }

    fn successor(self) -> Option<Self> {
        match self {
            Self::Initial => Some(Self::Recording),
            Self::Recording => Some(Self::Recorded),
            Self::Recorded => Some(Self::Submitted),
            Self::Submitted => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Checks that `next` is the one forward edge out of the current state.
    pub fn check(self, next: Self) -> Result<()> {
        if self.successor() == Some(next) {
            Ok(())
        } else {
            Err(ComputeError::InvalidState {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }

    pub fn advance(&mut self, next: Self) -> Result<()> {
        self.check(next)?;
        *self = next;
        Ok(())
    }
}

/// Workgroup counts for one `vkCmdDispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupCount {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupCount {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Enough groups of `local_size_x` invocations to cover `elements`.
    ///
    /// Counts above the device's x limit spill into y, so shaders index with
    /// `id.x + id.y * num_workgroups.x * local_size_x` and bounds-check.
    pub fn covering(elements: u64, local_size_x: u32, limits: &ComputeLimits) -> Result<Self> {
        if elements == 0 {
            return Err(ComputeError::EmptyDispatch);
        }
        let groups = elements.div_ceil(u64::from(local_size_x.max(1)));
        let [max_x, max_y, _] = limits.max_work_group_count.map(u64::from);
        let too_large = || UnsupportedError::DispatchTooLarge {
            groups,
            limits: limits.max_work_group_count,
        };

        if groups <= max_x {
            return Ok(Self::new(groups as u32, 1, 1));
        }
        let y = groups.div_ceil(max_x);
        if y > max_y {
            return Err(too_large().into());
        }
        // Spread evenly so the padding is less than one row.
        let x = groups.div_ceil(y);
        Ok(Self::new(x as u32, y as u32, 1))
    }

    pub fn total(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    pub fn fits(&self, limits: &ComputeLimits) -> bool {
        let [mx, my, mz] = limits.max_work_group_count;
        self.x <= mx && self.y <= my && self.z <= mz
    }
}

/// Owns the command pool every submission's command buffer comes from.
pub struct DispatchExecutor {
    ctx: Arc<VulkanContext>,
    command_pool: vk::CommandPool,
}

impl DispatchExecutor {
    pub fn new(ctx: Arc<VulkanContext>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(ctx.queue_family);
        let command_pool = unsafe { ctx.device.create_command_pool(&pool_info, None) }
            .map_err(ComputeError::vulkan("vkCreateCommandPool"))?;
        tracing::debug!(queue_family = ctx.queue_family, "command pool created");
        Ok(Self { ctx, command_pool })
    }

    /// Records bind pipeline, bind set and one dispatch into a fresh command
    /// buffer. The pipeline and set stay borrowed until the submission is
    /// dropped.
    pub fn record<'a>(
        &'a self,
        bundle: &'a PipelineBundle,
        set: &'a DescriptorSet,
        groups: WorkgroupCount,
    ) -> Result<Submission<'a>> {
        set.ensure_complete()?;
        if !groups.fits(&self.ctx.capabilities.limits) {
            return Err(UnsupportedError::DispatchTooLarge {
                groups: groups.total(),
                limits: self.ctx.capabilities.limits.max_work_group_count,
            }
            .into());
        }

        let device = &self.ctx.device;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(ComputeError::vulkan("vkAllocateCommandBuffers"))?
            .first()
            .copied()
            .ok_or(ComputeError::vulkan("vkAllocateCommandBuffers")(vk::Result::INCOMPLETE))?;

        let mut submission = Submission {
            executor: self,
            command_buffer,
            fence: vk::Fence::null(),
            state: SubmissionState::Initial,
            wait_mode: WaitMode::Fence,
            groups,
            submitted_at: None,
            _bound: PhantomData,
        };

        submission.state.advance(SubmissionState::Recording)?;
        unsafe {
            device
                .begin_command_buffer(
                    command_buffer,
                    &vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )
                .map_err(ComputeError::vulkan("vkBeginCommandBuffer"))?;

            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, bundle.pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                bundle.pipeline_layout,
                0,
                &[set.set],
                &[],
            );
            device.cmd_dispatch(command_buffer, groups.x, groups.y, groups.z);

            device
                .end_command_buffer(command_buffer)
                .map_err(ComputeError::vulkan("vkEndCommandBuffer"))?;
        }
        submission.state.advance(SubmissionState::Recorded)?;

        tracing::debug!(x = groups.x, y = groups.y, z = groups.z, "dispatch recorded");
        Ok(submission)
    }
}

impl Drop for DispatchExecutor {
    fn drop(&mut self) {
        unsafe { self.ctx.device.destroy_command_pool(self.command_pool, None) };
    }
}

/// One recorded command buffer, submitted once and observed once.
pub struct Submission<'a> {
    executor: &'a DispatchExecutor,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    state: SubmissionState,
    wait_mode: WaitMode,
    groups: WorkgroupCount,
    submitted_at: Option<Instant>,
    _bound: PhantomData<(&'a PipelineBundle, &'a DescriptorSet)>,
}

impl Submission<'_> {
    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn groups(&self) -> WorkgroupCount {
        self.groups
    }

    /// Hands the command buffer to the compute queue. A fence is created only
    /// for [`WaitMode::Fence`].
    pub fn submit(&mut self, mode: WaitMode) -> Result<()> {
        self.state.check(SubmissionState::Submitted)?;
        let ctx = &self.executor.ctx;

        if mode == WaitMode::Fence {
            self.fence = unsafe { ctx.device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .map_err(ComputeError::vulkan("vkCreateFence"))?;
        }

        let submit_info = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&self.command_buffer));
        unsafe { ctx.device.queue_submit(ctx.queue, &[submit_info], self.fence) }
            .map_err(ComputeError::vulkan("vkQueueSubmit"))?;

        self.wait_mode = mode;
        self.submitted_at = Some(Instant::now());
        self.state.advance(SubmissionState::Submitted)?;
        tracing::info!(?mode, groups = self.groups.total(), "dispatch submitted");
        Ok(())
    }

    /// Blocks until the device has finished. A fence wait gives up after
    /// `timeout` and leaves the submission pending, so it may be waited on
    /// again. Queue-idle waits ignore the timeout.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Duration> {
        self.state.check(SubmissionState::Completed)?;
        let ctx = &self.executor.ctx;

        match self.wait_mode {
            WaitMode::Fence => {
                match unsafe { ctx.device.wait_for_fences(&[self.fence], true, timeout_nanos(timeout)) } {
                    Ok(()) => {}
                    Err(vk::Result::TIMEOUT) => {
                        let waited = timeout.unwrap_or(Duration::MAX);
                        tracing::warn!(?waited, "dispatch still running");
                        return Err(ComputeError::Timeout(waited));
                    }
                    Err(e) => return Err(ComputeError::vulkan("vkWaitForFences")(e)),
                }
            }
            WaitMode::QueueIdle => unsafe { ctx.device.queue_wait_idle(ctx.queue) }
                .map_err(ComputeError::vulkan("vkQueueWaitIdle"))?,
        }

        self.state.advance(SubmissionState::Completed)?;
        let elapsed = self.submitted_at.map(|t| t.elapsed()).unwrap_or_default();
        tracing::info!(?elapsed, "dispatch completed");
        Ok(elapsed)
    }
}

impl Drop for Submission<'_> {
    fn drop(&mut self) {
        let ctx = &self.executor.ctx;
        unsafe {
            if self.state == SubmissionState::Submitted {
                // Never observed: the command buffer may still be executing.
                tracing::warn!("dropping a pending submission, waiting for the device");
                let _ = ctx.device.device_wait_idle();
            }
            if self.fence != vk::Fence::null() {
                ctx.device.destroy_fence(self.fence, None);
            }
            ctx.device
                .free_command_buffers(self.executor.command_pool, &[self.command_buffer]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_forward_walk() {
        let mut state = SubmissionState::Initial;
        for next in [
            SubmissionState::Recording,
            SubmissionState::Recorded,
            SubmissionState::Submitted,
            SubmissionState::Completed,
        ] {
            state.advance(next).unwrap();
        }
        assert_eq!(state, SubmissionState::Completed);
    }

    #[test]
    fn test_no_skipping_or_reuse() {
        let mut state = SubmissionState::Recorded;
        let err = state.advance(SubmissionState::Completed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(err.to_string(), "submission cannot move from recorded to completed");
        assert_eq!(state, SubmissionState::Recorded);

        let mut done = SubmissionState::Completed;
        assert!(done.advance(SubmissionState::Submitted).is_err());
        assert!(done.advance(SubmissionState::Initial).is_err());
    }

    #[test]
    fn test_one_group_per_element() {
        let groups = WorkgroupCount::covering(10, 1, &ComputeLimits::default()).unwrap();
        assert_eq!(groups, WorkgroupCount::new(10, 1, 1));
    }

    #[test]
    fn test_rounds_up_partial_group() {
        let groups = WorkgroupCount::covering(65, 64, &ComputeLimits::default()).unwrap();
        assert_eq!(groups, WorkgroupCount::new(2, 1, 1));
    }

    #[test]
    fn test_folds_into_y() {
        let limits = ComputeLimits::default();
        let groups = WorkgroupCount::covering(1_000_000, 1, &limits).unwrap();
        assert!(groups.y > 1);
        assert!(groups.fits(&limits));
        assert!(groups.total() >= 1_000_000);
        // Padding stays under one row.
        assert!(groups.total() - 1_000_000 < u64::from(groups.y));
    }

    #[test]
    fn test_large_x_limit_stays_one_dimensional() {
        let limits = ComputeLimits {
            max_work_group_count: [u32::MAX, 65535, 65535],
            ..ComputeLimits::default()
        };
        let groups = WorkgroupCount::covering(1_000_000, 1, &limits).unwrap();
        assert_eq!(groups, WorkgroupCount::new(1_000_000, 1, 1));
    }

    #[test]
    fn test_too_large_is_unsupported() {
        let limits = ComputeLimits {
            max_work_group_count: [4, 4, 4],
            ..ComputeLimits::default()
        };
        let err = WorkgroupCount::covering(17, 1, &limits).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_zero_elements() {
        assert!(matches!(
            WorkgroupCount::covering(0, 1, &ComputeLimits::default()),
            Err(ComputeError::EmptyDispatch)
        ));
    }
}

pub mod allocator;
pub mod buffer;
pub mod capability;
pub mod context;
pub mod descriptor;
pub mod dispatch;
pub mod pipeline;
pub mod shader;

pub use allocator::{AllocatorStats, BufferIntent, ResourceAllocator};
pub use buffer::{GpuBuffer, Mapping};
pub use capability::{CapabilitySnapshot, ComputeLimits, DeviceReport};
pub use context::VulkanContext;
pub use descriptor::{DescriptorBudget, DescriptorPool, DescriptorSet};
pub use dispatch::{DispatchExecutor, Submission, SubmissionState, WorkgroupCount};
pub use pipeline::{BindingSpec, PipelineBundle, ResourceKind};
pub use shader::{EntryPoint, ShaderBinary};

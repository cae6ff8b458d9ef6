//! vkcompute - one-shot Vulkan compute dispatches
//!
//! # Lifecycle
//! - **Capability**: first physical device, lowest compute queue family
//! - **Resources**: host-visible storage buffers, manual or pooled memory
//! - **Pipeline**: set layout → pipeline layout → compute pipeline from SPIR-V
//! - **Descriptors**: a pool sized to the bindings, every binding written
//! - **Dispatch**: record, submit, wait once (fence or queue idle)
//!
//! Everything is torn down in reverse creation order, including when a step
//! in the middle fails.

pub mod config;
pub mod error;
pub mod job;
pub mod scenario;
pub mod shaders;
pub mod vulkan;

pub use crate::config::{AllocationStrategy, ComputeConfig, WaitMode};
pub use crate::error::{ComputeError, ErrorKind, Result, UnsupportedError};
pub use crate::job::{ComputeJob, JobOutput};
pub use crate::scenario::Scenario;
pub use crate::vulkan::{CapabilitySnapshot, GpuBuffer, ShaderBinary, VulkanContext};

//! # Run Configuration
//!
//! A [`ComputeConfig`] is fixed for the lifetime of a [`crate::VulkanContext`]:
//! the allocation strategy in particular is chosen when the context is built
//! and cannot be switched afterwards.
//!
//! ```rust
//! use std::time::Duration;
//! use vkcompute::config::{AllocationStrategy, ComputeConfig, WaitMode};
//!
//! // Raw vkAllocateMemory per buffer, queue-idle completion.
//! let manual = ComputeConfig::manual();
//!
//! // Sub-allocated memory with a bounded fence wait.
//! let custom = ComputeConfig::builder()
//!     .allocation(AllocationStrategy::Pooled)
//!     .wait(WaitMode::Fence)
//!     .timeout(Duration::from_secs(5))
//!     .build();
//! assert!(custom.is_pooled());
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Who picks memory types and owns `VkDeviceMemory` objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStrategy {
    /// One dedicated allocation per buffer, memory type chosen by
    /// [`crate::CapabilitySnapshot::find_memory_type_index`].
    Manual,

    /// Buffers are sub-allocated from large blocks by `gpu-allocator`,
    /// which also keeps them persistently mapped.
    Pooled,
}

impl Default for AllocationStrategy {
    fn default() -> Self {
        AllocationStrategy::Manual
    }
}

impl std::str::FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "pooled" => Ok(Self::Pooled),
            other => Err(format!("unknown allocator {other:?} (expected manual|pooled)")),
        }
    }
}

/// How the host observes completion of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitMode {
    /// Attach a fence to the submit and wait on it (honours the timeout).
    Fence,
    /// Submit without a fence and block in `vkQueueWaitIdle`.
    QueueIdle,
}

impl Default for WaitMode {
    fn default() -> Self {
        WaitMode::Fence
    }
}

impl std::str::FromStr for WaitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fence" => Ok(Self::Fence),
            "idle" | "queue-idle" => Ok(Self::QueueIdle),
            other => Err(format!("unknown wait mode {other:?} (expected fence|idle)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComputeConfig {
    /// Reported to the driver in `VkApplicationInfo`.
    pub application_name: String,

    /// Request `VK_LAYER_KHRONOS_validation` if it is installed.
    pub validation: bool,

    pub allocation: AllocationStrategy,

    pub wait: WaitMode,

    /// Upper bound for a fence wait. `None` waits forever.
    pub timeout: Option<Duration>,

    /// Shader entry symbol.
    pub entry_point: String,

    /// Where to dump allocator statistics after a job, if anywhere.
    pub stats_path: Option<PathBuf>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self::manual()
    }
}

impl ComputeConfig {
    pub fn manual() -> Self {
        Self {
            application_name: "vkcompute".to_string(),
            validation: false,
            allocation: AllocationStrategy::Manual,
            wait: WaitMode::Fence,
            timeout: None,
            entry_point: "main".to_string(),
            stats_path: None,
        }
    }

    pub fn pooled() -> Self {
        Self {
            allocation: AllocationStrategy::Pooled,
            ..Self::manual()
        }
    }

    pub fn builder() -> ComputeConfigBuilder {
        ComputeConfigBuilder::new()
    }

    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.allocation == AllocationStrategy::Pooled
    }

    /// The fence timeout in nanoseconds as Vulkan expects it.
    pub fn timeout_nanos(&self) -> u64 {
        timeout_nanos(self.timeout)
    }
}

/// `None` and anything that overflows a `u64` of nanoseconds mean "forever".
pub fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(u64::MAX)
}

/// Builder for [`ComputeConfig`].
#[derive(Debug, Clone)]
pub struct ComputeConfigBuilder {
    config: ComputeConfig,
}

impl ComputeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ComputeConfig::manual(),
        }
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    pub fn validation(mut self, enabled: bool) -> Self {
        self.config.validation = enabled;
        self
    }

    pub fn allocation(mut self, strategy: AllocationStrategy) -> Self {
        self.config.allocation = strategy;
        self
    }

    pub fn wait(mut self, mode: WaitMode) -> Self {
        self.config.wait = mode;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn entry_point(mut self, name: impl Into<String>) -> Self {
        self.config.entry_point = name.into();
        self
    }

    pub fn stats_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.stats_path = Some(path.into());
        self
    }

    pub fn build(self) -> ComputeConfig {
        self.config
    }
}

impl Default for ComputeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_defaults() {
        let config = ComputeConfig::manual();
        assert_eq!(config.allocation, AllocationStrategy::Manual);
        assert_eq!(config.wait, WaitMode::Fence);
        assert_eq!(config.entry_point, "main");
        assert!(config.timeout.is_none());
        assert!(!config.is_pooled());
        assert_eq!(config.timeout_nanos(), u64::MAX);
    }

    #[test]
    fn test_pooled_preset() {
        let config = ComputeConfig::pooled();
        assert!(config.is_pooled());
        assert_eq!(config.entry_point, "main");
    }

    #[test]
    fn test_builder() {
        let config = ComputeConfig::builder()
            .application_name("bench")
            .validation(true)
            .allocation(AllocationStrategy::Pooled)
            .wait(WaitMode::QueueIdle)
            .timeout(Duration::from_millis(250))
            .entry_point("kernel")
            .stats_path("stats.json")
            .build();

        assert_eq!(config.application_name, "bench");
        assert!(config.validation);
        assert!(config.is_pooled());
        assert_eq!(config.wait, WaitMode::QueueIdle);
        assert_eq!(config.timeout_nanos(), 250_000_000);
        assert_eq!(config.entry_point, "kernel");
        assert_eq!(config.stats_path, Some(PathBuf::from("stats.json")));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("pooled".parse::<AllocationStrategy>(), Ok(AllocationStrategy::Pooled));
        assert_eq!("idle".parse::<WaitMode>(), Ok(WaitMode::QueueIdle));
        assert!("vma".parse::<AllocationStrategy>().is_err());
        assert!("spin".parse::<WaitMode>().is_err());
    }

    #[test]
    fn test_huge_timeout_saturates() {
        assert_eq!(timeout_nanos(Some(Duration::MAX)), u64::MAX);
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use vkcompute::{ComputeConfig, VulkanContext};

/// A context for `config`, or `None` when this machine has no usable Vulkan
/// driver. Tests that need a device return early in that case.
pub fn context(config: &ComputeConfig) -> Option<Arc<VulkanContext>> {
    match VulkanContext::new(config) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: no Vulkan device ({e})");
            None
        }
    }
}

pub fn both_strategies() -> [ComputeConfig; 2] {
    [ComputeConfig::manual(), ComputeConfig::pooled()]
}

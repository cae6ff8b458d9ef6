use ash::vk;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use crate::config::{AllocationStrategy, ComputeConfig};
use crate::error::{ComputeError, Result, UnsupportedError};
use crate::vulkan::allocator::ResourceAllocator;
use crate::vulkan::capability::CapabilitySnapshot;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const PORTABILITY_ENUMERATION: &CStr = c"VK_KHR_portability_enumeration";
const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

/// Instance, device and the single compute queue every other object is
/// created against.
pub struct VulkanContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub capabilities: CapabilitySnapshot,
    allocator: ManuallyDrop<ResourceAllocator>,
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("device_name", &self.capabilities.device_name)
            .field("physical_device", &self.physical_device)
            .field("queue_family", &self.queue_family)
            .field("allocation", &self.allocator.strategy())
            .finish()
    }
}

// Destroys what was created so far if `VulkanContext::new` bails out.
// `disarm` hands the handle over once construction has succeeded.
struct InstanceGuard(ash::Instance);

impl InstanceGuard {
    fn disarm(self) -> ash::Instance {
        let instance = self.0.clone();
        std::mem::forget(self);
        instance
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        unsafe { self.0.destroy_instance(None) };
    }
}

struct DeviceGuard(ash::Device);

impl DeviceGuard {
    fn disarm(self) -> ash::Device {
        let device = self.0.clone();
        std::mem::forget(self);
        device
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        unsafe { self.0.destroy_device(None) };
    }
}

impl VulkanContext {
    /// Loads Vulkan, takes the first physical device it reports and opens one
    /// queue on the lowest compute-capable family.
    pub fn new(config: &ComputeConfig) -> Result<Arc<Self>> {
        let entry = unsafe { ash::Entry::load()? };
        tracing::debug!("Vulkan loader found");

        let instance = InstanceGuard(unsafe { create_instance(&entry, config)? });
        let inst = &instance.0;

        let physical_devices = unsafe { inst.enumerate_physical_devices() }
            .map_err(ComputeError::vulkan("vkEnumeratePhysicalDevices"))?;
        let physical_device = *physical_devices
            .first()
            .ok_or(UnsupportedError::NoPhysicalDevice)?;

        let capabilities = unsafe { CapabilitySnapshot::query(inst, physical_device) };
        for (i, pd) in physical_devices.iter().enumerate() {
            let props = unsafe { inst.get_physical_device_properties(*pd) };
            let name = props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::debug!(index = i, %name, "physical device");
        }
        tracing::info!(
            device = %capabilities.device_name,
            api = %format!(
                "{}.{}",
                vk::api_version_major(capabilities.api_version),
                vk::api_version_minor(capabilities.api_version)
            ),
            "using first physical device"
        );

        let queue_family = capabilities.find_queue_family(vk::QueueFlags::COMPUTE)?;
        tracing::info!(queue_family, "compute queue family selected");

        let queue_priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        let mut device_extensions = Vec::new();
        if unsafe { device_supports(inst, physical_device, PORTABILITY_SUBSET) } {
            device_extensions.push(PORTABILITY_SUBSET.as_ptr());
        }

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions);
        let device = DeviceGuard(
            unsafe { inst.create_device(physical_device, &device_info, None) }
                .map_err(ComputeError::vulkan("vkCreateDevice"))?,
        );
        let dev = &device.0;
        tracing::debug!("logical device created");

        let queue = unsafe { dev.get_device_queue(queue_family, 0) };

        let allocator = ResourceAllocator::new(
            config.allocation,
            inst,
            dev,
            physical_device,
            &capabilities,
        )?;

        let device = device.disarm();
        let instance = instance.disarm();

        tracing::info!(allocation = ?config.allocation, "context initialized");
        Ok(Arc::new(Self {
            entry,
            instance,
            physical_device,
            device,
            queue,
            queue_family,
            capabilities,
            allocator: ManuallyDrop::new(allocator),
        }))
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn allocation_strategy(&self) -> AllocationStrategy {
        self.allocator.strategy()
    }

    /// Blocks until the device has no outstanding work.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(ComputeError::vulkan("vkDeviceWaitIdle"))
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        tracing::debug!("destroying context");
        unsafe {
            let _ = self.device.device_wait_idle();
            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

unsafe fn create_instance(entry: &ash::Entry, config: &ComputeConfig) -> Result<ash::Instance> {
    let app_name = std::ffi::CString::new(config.application_name.as_str())
        .unwrap_or_else(|_| std::ffi::CString::from(c"vkcompute"));

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(c"vkcompute")
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_1);

    let mut layers = Vec::new();
    if config.validation {
        let available = entry
            .enumerate_instance_layer_properties()
            .map_err(ComputeError::vulkan("vkEnumerateInstanceLayerProperties"))?;
        let found = available
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        if found {
            layers.push(VALIDATION_LAYER.as_ptr());
            tracing::info!("validation layer enabled");
        } else {
            tracing::warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
    }

    let mut extensions = Vec::new();
    let mut flags = vk::InstanceCreateFlags::empty();
    let instance_extensions = entry
        .enumerate_instance_extension_properties(None)
        .map_err(ComputeError::vulkan("vkEnumerateInstanceExtensionProperties"))?;
    if instance_extensions
        .iter()
        .any(|ext| ext.extension_name_as_c_str() == Ok(PORTABILITY_ENUMERATION))
    {
        extensions.push(PORTABILITY_ENUMERATION.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(flags)
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);

    let instance = entry
        .create_instance(&create_info, None)
        .map_err(ComputeError::vulkan("vkCreateInstance"))?;
    tracing::debug!("instance created");
    Ok(instance)
}

unsafe fn device_supports(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    name: &CStr,
) -> bool {
    instance
        .enumerate_device_extension_properties(physical_device)
        .map(|exts| exts.iter().any(|ext| ext.extension_name_as_c_str() == Ok(name)))
        .unwrap_or(false)
}

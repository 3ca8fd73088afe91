//! GPU context management.

use crate::capabilities::{GpuCapabilities, RayTracingCapabilities};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) ray_tracing_enabled: bool,

    // Queue families and queues
    pub(crate) graphics_queue_family: u32,
    pub(crate) compute_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) compute_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device, for components that outlive a borrow.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Whether the ray tracing extensions were enabled on the logical device.
    pub fn ray_tracing_enabled(&self) -> bool {
        self.ray_tracing_enabled
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the compute queue family index.
    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    request_ray_tracing: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Radiant".to_string(),
            enable_validation: cfg!(debug_assertions),
            request_ray_tracing: true,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Enable the ray tracing extensions when the device supports them.
    ///
    /// Devices without support still produce a context; the hardware tracer
    /// then reports itself unsupported.
    pub fn ray_tracing(mut self, enable: bool) -> Self {
        self.request_ray_tracing = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // Create Vulkan instance
        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        // Select best physical device
        let physical_device = unsafe { select_physical_device(&instance) }?;

        // Query capabilities
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        // Validate requirements
        if !capabilities.meets_requirements() {
            unsafe { instance.destroy_instance(None) };
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let enable_ray_tracing =
            self.request_ray_tracing && capabilities.ray_tracing.is_supported(1);
        if self.request_ray_tracing && !enable_ray_tracing {
            tracing::info!(
                missing = ?capabilities.ray_tracing.missing(1),
                "Hardware ray tracing unavailable"
            );
        }

        // Find queue families
        let queue_families = unsafe { find_queue_families(&instance, physical_device) }?;

        // Create logical device
        let (device, graphics_queue, compute_queue) = unsafe {
            create_device(
                &instance,
                physical_device,
                &queue_families,
                enable_ray_tracing,
            )?
        };

        let device = Arc::new(device);

        // Create GPU allocator
        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            ray_tracing_enabled: enable_ray_tracing,
            graphics_queue_family: queue_families.graphics,
            compute_queue_family: queue_families.compute,
            graphics_queue,
            compute_queue,
        })
    }
}

/// Queue family indices.
struct QueueFamilyIndices {
    graphics: u32,
    compute: u32,
}

/// Find queue families for graphics and compute.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    let mut graphics_family = None;
    let mut compute_family = None;

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        // Look for dedicated compute queue (no graphics)
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        // Graphics queue (also supports compute and transfer)
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    // Graphics queue is required
    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;

    // Fall back to graphics queue for compute if no dedicated queue
    let compute = compute_family.unwrap_or(graphics);

    Ok(QueueFamilyIndices { graphics, compute })
}

/// Device extensions to enable.
fn device_extensions(ray_tracing: bool) -> Vec<&'static CStr> {
    let mut extensions = Vec::new();
    if ray_tracing {
        extensions.extend(RayTracingCapabilities::required_extensions());
    }
    extensions
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    ray_tracing: bool,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    // Collect unique queue families
    let mut unique_families = vec![queue_families.graphics];
    if queue_families.compute != queue_families.graphics {
        unique_families.push(queue_families.compute);
    }

    // Create queue create infos
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = device_extensions(ray_tracing);
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Enable Vulkan 1.3 features
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true)
        .maintenance4(true);

    // Enable Vulkan 1.2 features
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .scalar_block_layout(true);

    let mut as_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut rt_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

    // Chain features together
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(vk::PhysicalDeviceFeatures::default())
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);
    if ray_tracing {
        features2 = features2
            .push_next(&mut as_features)
            .push_next(&mut rt_features);
    }

    // Create the device
    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    // Get queue handles
    let graphics_queue = device.get_device_queue(queue_families.graphics, 0);
    let compute_queue = device.get_device_queue(queue_families.compute, 0);

    Ok((device, graphics_queue, compute_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_tracing_extensions_only_when_requested() {
        assert!(device_extensions(false).is_empty());
        let rt = device_extensions(true);
        assert_eq!(rt.len(), 3);
        assert!(rt.contains(&ash::khr::acceleration_structure::NAME));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn create_headless_context() {
        let ctx = GpuContextBuilder::new()
            .validation(false)
            .build()
            .expect("context");
        assert!(ctx.capabilities().meets_requirements());
        ctx.wait_idle().expect("idle");
    }
}

//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Hardware ray tracing support and the pipeline limits the tracer depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    /// `VK_KHR_ray_tracing_pipeline` extension and feature
    pub supports_ray_tracing_pipeline: bool,
    /// `VK_KHR_acceleration_structure` extension and feature
    pub supports_acceleration_structure: bool,
    /// `VK_KHR_deferred_host_operations` (required by the AS extension)
    pub supports_deferred_host_operations: bool,
    /// Buffer device address feature
    pub supports_buffer_device_address: bool,
    /// `maxRayRecursionDepth`
    pub max_ray_recursion_depth: u32,
    /// `shaderGroupHandleSize`
    pub shader_group_handle_size: u32,
    /// `shaderGroupHandleAlignment`
    pub shader_group_handle_alignment: u32,
    /// `shaderGroupBaseAlignment`
    pub shader_group_base_alignment: u32,
}

impl RayTracingCapabilities {
    /// Capability set of a device without any ray tracing support.
    pub const NONE: Self = Self {
        supports_ray_tracing_pipeline: false,
        supports_acceleration_structure: false,
        supports_deferred_host_operations: false,
        supports_buffer_device_address: false,
        max_ray_recursion_depth: 0,
        shader_group_handle_size: 0,
        shader_group_handle_alignment: 0,
        shader_group_base_alignment: 0,
    };

    /// Device extensions that must be enabled to use hardware ray tracing.
    pub fn required_extensions() -> [&'static CStr; 3] {
        [
            ash::khr::acceleration_structure::NAME,
            ash::khr::ray_tracing_pipeline::NAME,
            ash::khr::deferred_host_operations::NAME,
        ]
    }

    /// Names of the capabilities missing for a pipeline that needs `recursion_depth`.
    ///
    /// An empty list means the device can run the pipeline.
    pub fn missing(&self, recursion_depth: u32) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.supports_ray_tracing_pipeline {
            missing.push("ray tracing pipeline");
        }
        if !self.supports_acceleration_structure {
            missing.push("acceleration structure");
        }
        if !self.supports_deferred_host_operations {
            missing.push("deferred host operations");
        }
        if !self.supports_buffer_device_address {
            missing.push("buffer device address");
        }
        if self.max_ray_recursion_depth < recursion_depth {
            missing.push("ray recursion depth");
        }
        missing
    }

    /// True when the full capability set for a pipeline with `recursion_depth` is present.
    pub fn is_supported(&self, recursion_depth: u32) -> bool {
        self.missing(recursion_depth).is_empty()
    }

    /// Query ray tracing features and properties.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        available_extensions: &HashSet<String>,
    ) -> Self {
        let has = |name: &CStr| {
            name.to_str()
                .is_ok_and(|name| available_extensions.contains(name))
        };
        let has_pipeline_ext = has(ash::khr::ray_tracing_pipeline::NAME);
        let has_as_ext = has(ash::khr::acceleration_structure::NAME);
        let has_deferred_ext = has(ash::khr::deferred_host_operations::NAME);

        let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut as_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut rt_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();

        // Extension structs may only be chained when the extension exists
        {
            let mut features2 =
                vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_2_features);
            if has_as_ext {
                features2 = features2.push_next(&mut as_features);
            }
            if has_pipeline_ext {
                features2 = features2.push_next(&mut rt_features);
            }
            instance.get_physical_device_features2(physical_device, &mut features2);
        }

        if has_pipeline_ext {
            let mut properties2 =
                vk::PhysicalDeviceProperties2::default().push_next(&mut rt_properties);
            instance.get_physical_device_properties2(physical_device, &mut properties2);
        }

        Self {
            supports_ray_tracing_pipeline: has_pipeline_ext
                && rt_features.ray_tracing_pipeline == vk::TRUE,
            supports_acceleration_structure: has_as_ext
                && as_features.acceleration_structure == vk::TRUE,
            supports_deferred_host_operations: has_deferred_ext,
            supports_buffer_device_address: vulkan_1_2_features.buffer_device_address == vk::TRUE,
            max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
            shader_group_handle_size: rt_properties.shader_group_handle_size,
            shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
            shader_group_base_alignment: rt_properties.shader_group_base_alignment,
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    // Vulkan 1.3 core features
    /// Synchronization2 support (VK 1.3 core)
    pub supports_synchronization2: bool,
    /// Dynamic rendering support (VK 1.3 core), used by material pipelines
    pub supports_dynamic_rendering: bool,

    // Buffer and descriptor features
    /// Buffer device address support
    pub supports_buffer_device_address: bool,
    /// Scalar block layout support
    pub supports_scalar_block_layout: bool,

    // Memory info
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Compute limits
    /// Maximum compute workgroup size
    pub max_compute_workgroup_size: [u32; 3],
    /// Maximum compute workgroup invocations
    pub max_compute_workgroup_invocations: u32,
    /// Maximum push constant block size
    pub max_push_constants_size: u32,
    /// Maximum 2D image dimension
    pub max_image_dimension_2d: u32,

    /// Hardware ray tracing support
    pub ray_tracing: RayTracingCapabilities,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // Get basic properties
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        // Get available extensions
        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        // Parse device info
        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        // Calculate device-local memory
        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        // Vulkan 1.3 features are core, so we check API version
        let api_version = properties.api_version;
        let has_vulkan_1_3 = vk::api_version_major(api_version) > 1
            || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) >= 3);

        let ray_tracing = if has_vulkan_1_3 {
            RayTracingCapabilities::query(instance, physical_device, &available_extensions)
        } else {
            RayTracingCapabilities::NONE
        };

        Self {
            vendor,
            device_name,
            api_version,
            driver_version: properties.driver_version,

            supports_synchronization2: has_vulkan_1_3,
            supports_dynamic_rendering: has_vulkan_1_3,

            supports_buffer_device_address: has_vulkan_1_3
                || available_extensions.contains("VK_KHR_buffer_device_address"),
            supports_scalar_block_layout: has_vulkan_1_3
                || available_extensions.contains("VK_EXT_scalar_block_layout"),

            device_local_memory_mb,

            max_compute_workgroup_size: properties.limits.max_compute_work_group_size,
            max_compute_workgroup_invocations: properties.limits.max_compute_work_group_invocations,
            max_push_constants_size: properties.limits.max_push_constants_size,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,

            ray_tracing,

            available_extensions,
        }
    }

    /// Check if the GPU meets minimum requirements for the renderer.
    pub fn meets_requirements(&self) -> bool {
        // Require Vulkan 1.3 for synchronization2 and dynamic rendering
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        if api_major < 1 || (api_major == 1 && api_minor < 3) {
            return false;
        }

        // 8x8 tracing workgroups
        if self.max_compute_workgroup_invocations < 64 {
            return false;
        }

        // Trace push constants
        self.max_push_constants_size >= 128
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM - ray tracing: {}",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            if self.ray_tracing.is_supported(1) {
                "yes"
            } else {
                "no"
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_support() -> RayTracingCapabilities {
        RayTracingCapabilities {
            supports_ray_tracing_pipeline: true,
            supports_acceleration_structure: true,
            supports_deferred_host_operations: true,
            supports_buffer_device_address: true,
            max_ray_recursion_depth: 31,
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    #[test]
    fn ray_tracing_requires_full_set() {
        assert!(full_support().is_supported(2));
        assert!(!RayTracingCapabilities::NONE.is_supported(2));

        let no_bda = RayTracingCapabilities {
            supports_buffer_device_address: false,
            ..full_support()
        };
        assert_eq!(no_bda.missing(2), vec!["buffer device address"]);
    }

    #[test]
    fn ray_tracing_recursion_depth_limit() {
        let shallow = RayTracingCapabilities {
            max_ray_recursion_depth: 1,
            ..full_support()
        };
        assert!(shallow.is_supported(1));
        assert!(!shallow.is_supported(2));
    }
}

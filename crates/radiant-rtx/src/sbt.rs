//! Shader Binding Table (SBT) for the hardware tracer.
//!
//! Handles are laid out by group type, each region starting on the base
//! alignment:
//! - Ray generation: 1 group
//! - Miss: primary, shadow
//! - Hit groups: primary closest-hit, shadow closest-hit
//! - Callable: none

use ash::vk;
use gpu_allocator::MemoryLocation;
use radiant_gpu::{GpuAllocator, GpuBuffer, GpuError, RayTracingCapabilities, Result};

/// Byte offsets and sizes of the SBT regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u32,
    /// Handle size rounded up to the handle alignment.
    pub stride: u32,
    pub raygen_size: u32,
    pub miss_offset: u32,
    pub miss_size: u32,
    pub hit_offset: u32,
    pub hit_size: u32,
    pub miss_count: u32,
    pub hit_count: u32,
}

impl SbtLayout {
    pub fn new(capabilities: &RayTracingCapabilities, miss_count: u32, hit_count: u32) -> Self {
        let handle_size = capabilities.shader_group_handle_size;
        let base_alignment = capabilities.shader_group_base_alignment.max(1);
        let stride = align_up(handle_size, capabilities.shader_group_handle_alignment.max(1));

        let raygen_size = align_up(stride, base_alignment);
        let miss_size = align_up(stride * miss_count, base_alignment);
        let hit_size = align_up(stride * hit_count, base_alignment);

        Self {
            handle_size,
            stride,
            raygen_size,
            miss_offset: raygen_size,
            miss_size,
            hit_offset: raygen_size + miss_size,
            hit_size,
            miss_count,
            hit_count,
        }
    }

    pub fn group_count(&self) -> u32 {
        1 + self.miss_count + self.hit_count
    }

    pub fn total_size(&self) -> u32 {
        self.hit_offset + self.hit_size
    }

    /// Byte offset in the table of pipeline group `group`.
    pub fn group_offset(&self, group: u32) -> u32 {
        if group == 0 {
            0
        } else if group <= self.miss_count {
            self.miss_offset + (group - 1) * self.stride
        } else {
            self.hit_offset + (group - 1 - self.miss_count) * self.stride
        }
    }
}

/// Shader Binding Table for the ray tracing pipeline.
pub struct ShaderBindingTable {
    pub buffer: GpuBuffer,
    pub layout: SbtLayout,
    pub raygen_region: vk::StridedDeviceAddressRegionKHR,
    pub miss_region: vk::StridedDeviceAddressRegionKHR,
    pub hit_region: vk::StridedDeviceAddressRegionKHR,
    /// Empty but required by `vkCmdTraceRaysKHR`.
    pub callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    /// Copy the group handles of `pipeline` into a new table.
    ///
    /// Pipeline groups must be ordered raygen, miss groups, hit groups.
    ///
    /// # Safety
    /// - Device and allocator must be valid.
    /// - `pipeline` must be a ray tracing pipeline created on `device`.
    pub unsafe fn new(
        device: &ash::Device,
        rt_loader: &ash::khr::ray_tracing_pipeline::Device,
        allocator: &mut GpuAllocator,
        pipeline: vk::Pipeline,
        layout: SbtLayout,
    ) -> Result<Self> {
        let group_count = layout.group_count();
        let handle_size = layout.handle_size as usize;
        let handles = rt_loader.get_ray_tracing_shader_group_handles(
            pipeline,
            0,
            group_count,
            handle_size * group_count as usize,
        )?;

        if handles.len() < handle_size * group_count as usize {
            return Err(GpuError::PipelineCreation(format!(
                "Expected {group_count} shader group handles, got {} bytes",
                handles.len()
            )));
        }

        let buffer = allocator.create_buffer(
            u64::from(layout.total_size()),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "shader_binding_table",
        )?;

        for (group, handle) in handles.chunks_exact(handle_size).enumerate() {
            buffer.write_bytes(u64::from(layout.group_offset(group as u32)), handle)?;
        }

        let address = buffer.device_address(device);
        let stride = u64::from(layout.stride);

        // Raygen size must equal its stride
        let raygen_region = vk::StridedDeviceAddressRegionKHR {
            device_address: address,
            stride,
            size: stride,
        };
        let miss_region = vk::StridedDeviceAddressRegionKHR {
            device_address: address + u64::from(layout.miss_offset),
            stride,
            size: u64::from(layout.miss_size),
        };
        let hit_region = vk::StridedDeviceAddressRegionKHR {
            device_address: address + u64::from(layout.hit_offset),
            stride,
            size: u64::from(layout.hit_size),
        };

        Ok(Self {
            buffer,
            layout,
            raygen_region,
            miss_region,
            hit_region,
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
        })
    }

    /// Free the table buffer. The table must not be in use.
    pub fn destroy(&mut self, allocator: &mut GpuAllocator) -> Result<()> {
        allocator.free_buffer(&mut self.buffer)
    }
}

/// Align a value up to a power-of-two alignment.
fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

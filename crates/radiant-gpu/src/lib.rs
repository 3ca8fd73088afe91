//! Vulkan abstraction layer for the Radiant renderer.
//!
//! This crate provides:
//! - Headless Vulkan instance and device management
//! - GPU and ray tracing capability detection
//! - Memory allocation via gpu-allocator (buffers, images, storage images)
//! - Command buffer management and single-time submission
//! - Descriptor, pipeline and barrier helpers
//! - Cleanup of partially created objects

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod guard;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor, RayTracingCapabilities};
pub use command::{execute_single_time_commands, CommandPool};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_acceleration_structure, write_storage_buffer, write_storage_image, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result};
pub use guard::{CreationGuard, VkObject};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage, StorageImage};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig};
pub use sync::{create_fence, image_barrier, memory_barrier, reset_fence, wait_for_fence};

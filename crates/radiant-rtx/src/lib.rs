//! Hardware ray tracing backend for the Radiant renderer.
//!
//! This crate provides a [`ProgressiveTracer`](radiant_trace::ProgressiveTracer)
//! built on:
//! - `VK_KHR_ray_tracing_pipeline`
//! - `VK_KHR_acceleration_structure`
//!
//! # Feature Flags
//!
//! - `rtx` - Build the ray tracing pipeline (requires the ray tracing shaders)
//!
//! Without the feature, or on a device lacking the extensions, the tracer is
//! created in the unsupported state and every call is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use radiant_rtx::HardwareRayTracer;
//!
//! let mut tracer = HardwareRayTracer::new(context);
//! if tracer.is_ready() {
//!     tracer.update_scene(&scene)?;
//!     tracer.trace(&request)?;
//! }
//! ```

pub mod acceleration;
pub mod dirty;
#[cfg(feature = "rtx")]
pub mod pipeline;
pub mod sbt;
pub mod support;
pub mod tracer;

pub use acceleration::{triangle_geometry_data, AccelerationStructure, SceneAccelerationStructure};
pub use dirty::DirtyFlags;
#[cfg(feature = "rtx")]
pub use pipeline::RtPipeline;
pub use sbt::{SbtLayout, ShaderBindingTable};
pub use support::{RayTracingSupport, RECURSION_DEPTH};
pub use tracer::{HardwareRayTracer, RtBackend};

/// Check if the ray tracing pipeline was compiled in.
pub fn is_available() -> bool {
    cfg!(feature = "rtx")
}
